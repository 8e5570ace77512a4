use crate::error::ExportError;
use crate::rds::object::{
    Attributes, EnvId, EnvRef, Environment, Marker, RObject, RVersion, RdsFile, SpecialEnv, Vector,
    format_r_number,
};

const NILSXP: u8 = 0;
const SYMSXP: u8 = 1;
const LISTSXP: u8 = 2;
const CLOSXP: u8 = 3;
const ENVSXP: u8 = 4;
const PROMSXP: u8 = 5;
const LANGSXP: u8 = 6;
const SPECIALSXP: u8 = 7;
const BUILTINSXP: u8 = 8;
const CHARSXP: u8 = 9;
const LGLSXP: u8 = 10;
const INTSXP: u8 = 13;
const REALSXP: u8 = 14;
const CPLXSXP: u8 = 15;
const STRSXP: u8 = 16;
const DOTSXP: u8 = 17;
const VECSXP: u8 = 19;
const EXPRSXP: u8 = 20;
const BCODESXP: u8 = 21;
const EXTPTRSXP: u8 = 22;
const WEAKREFSXP: u8 = 23;
const RAWSXP: u8 = 24;
const S4SXP: u8 = 25;

const ALTREP_SXP: u8 = 238;
const ATTRLISTSXP: u8 = 239;
const ATTRLANGSXP: u8 = 240;
const BASEENV_SXP: u8 = 241;
const EMPTYENV_SXP: u8 = 242;
const BCREPREF: u8 = 243;
const BCREPDEF: u8 = 244;
const GENERICREFSXP: u8 = 245;
const CLASSREFSXP: u8 = 246;
const PERSISTSXP: u8 = 247;
const PACKAGESXP: u8 = 248;
const NAMESPACESXP: u8 = 249;
const BASENAMESPACE_SXP: u8 = 250;
const MISSINGARG_SXP: u8 = 251;
const UNBOUNDVALUE_SXP: u8 = 252;
const GLOBALENV_SXP: u8 = 253;
const NILVALUE_SXP: u8 = 254;
const REFSXP: u8 = 255;

const NA_INTEGER: i32 = i32::MIN;
const LATIN1_MASK: i32 = 1 << 2;

#[derive(Debug, Clone, Copy)]
struct Flags {
    ty: u8,
    levels: i32,
    has_attr: bool,
    has_tag: bool,
    raw: i32,
}

impl Flags {
    fn unpack(raw: i32) -> Self {
        Self {
            ty: (raw & 0xFF) as u8,
            levels: raw >> 12,
            has_attr: raw & (1 << 9) != 0,
            has_tag: raw & (1 << 10) != 0,
            raw,
        }
    }
}

/// Decoder for the XDR ("X\n") serialization stream, after decompression.
pub(crate) struct XdrReader<'a> {
    data: &'a [u8],
    pos: usize,
    refs: Vec<RObject>,
    environments: Vec<Environment>,
}

impl<'a> XdrReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            refs: Vec::new(),
            environments: Vec::new(),
        }
    }

    pub(crate) fn read_file(mut self) -> Result<RdsFile, ExportError> {
        let magic = self.take(2)?;
        match magic {
            b"X\n" => {}
            b"A\n" => return Err(malformed("ASCII serialization is not supported")),
            b"B\n" => return Err(malformed("native binary serialization is not supported")),
            _ if magic.starts_with(b"RD") => {
                return Err(malformed("input is an .RData workspace, not an .rds object"));
            }
            _ => return Err(malformed("missing serialization header")),
        }

        let format_version = self.read_int()?;
        if !(2..=3).contains(&format_version) {
            return Err(malformed(&format!(
                "unsupported serialization version {format_version}"
            )));
        }
        let writer_version = RVersion::from_packed(self.read_int()?);
        let _min_reader_version = self.read_int()?;
        let native_encoding = if format_version == 3 {
            let len = self.read_int()?;
            let len = usize::try_from(len).map_err(|_| malformed("negative encoding length"))?;
            Some(String::from_utf8_lossy(self.take(len)?).into_owned())
        } else {
            None
        };

        let root = self.read_item()?;
        Ok(RdsFile {
            format_version: format_version as u32,
            writer_version,
            native_encoding,
            root,
            environments: self.environments,
        })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ExportError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| malformed("unexpected end of stream"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_int(&mut self) -> Result<i32, ExportError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_double(&mut self) -> Result<f64, ExportError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(buf))
    }

    fn read_length(&mut self) -> Result<usize, ExportError> {
        let len = self.read_int()?;
        match len {
            -1 => {
                let upper = self.read_int()? as u32 as u64;
                let lower = self.read_int()? as u32 as u64;
                usize::try_from((upper << 32) + lower)
                    .map_err(|_| malformed("long vector does not fit in memory"))
            }
            len if len < -1 => Err(malformed(&format!("negative vector length {len}"))),
            len => Ok(len as usize),
        }
    }

    /// Rejects lengths that cannot fit in the rest of the stream before
    /// allocating for them.
    fn checked_length(&mut self, element_size: usize) -> Result<usize, ExportError> {
        let len = self.read_length()?;
        let needed = len
            .checked_mul(element_size)
            .ok_or_else(|| malformed("vector length overflow"))?;
        if needed > self.remaining() {
            return Err(malformed(&format!(
                "vector of length {len} exceeds remaining input"
            )));
        }
        Ok(len)
    }

    fn read_flags(&mut self) -> Result<Flags, ExportError> {
        Ok(Flags::unpack(self.read_int()?))
    }

    fn read_item(&mut self) -> Result<RObject, ExportError> {
        let flags = self.read_flags()?;
        self.read_item_with(flags)
    }

    fn read_item_with(&mut self, flags: Flags) -> Result<RObject, ExportError> {
        match flags.ty {
            NILVALUE_SXP => Ok(RObject::Null),
            EMPTYENV_SXP => Ok(RObject::Environment(EnvRef::Special(SpecialEnv::Empty))),
            BASEENV_SXP => Ok(RObject::Environment(EnvRef::Special(SpecialEnv::Base))),
            GLOBALENV_SXP => Ok(RObject::Environment(EnvRef::Special(SpecialEnv::Global))),
            BASENAMESPACE_SXP => Ok(RObject::Environment(EnvRef::Special(
                SpecialEnv::BaseNamespace,
            ))),
            UNBOUNDVALUE_SXP => Ok(RObject::Marker(Marker::UnboundValue)),
            MISSINGARG_SXP => Ok(RObject::Marker(Marker::MissingArg)),
            REFSXP => self.read_reference(flags),
            PERSISTSXP => {
                let names = self.read_string_vec()?;
                let object = RObject::Opaque {
                    kind: "persistent",
                    attributes: Attributes::new(vec![(
                        "names".to_string(),
                        character_vector(names),
                    )]),
                };
                self.refs.push(object.clone());
                Ok(object)
            }
            SYMSXP => {
                let name = match self.read_item()? {
                    RObject::Char(Some(name)) => name,
                    RObject::Char(None) => "NA".to_string(),
                    other => {
                        return Err(malformed(&format!(
                            "symbol name is {}, expected char",
                            other.type_name()
                        )));
                    }
                };
                let symbol = RObject::Symbol(name);
                self.refs.push(symbol.clone());
                Ok(symbol)
            }
            PACKAGESXP => {
                let names = self.read_string_vec()?.into_iter().flatten().collect();
                let env = RObject::Environment(EnvRef::Package(names));
                self.refs.push(env.clone());
                Ok(env)
            }
            NAMESPACESXP => {
                let names = self.read_string_vec()?.into_iter().flatten().collect();
                let env = RObject::Environment(EnvRef::Namespace(names));
                self.refs.push(env.clone());
                Ok(env)
            }
            ENVSXP => self.read_environment(),
            LISTSXP | LANGSXP | CLOSXP | PROMSXP | DOTSXP => self.read_pairlist(flags),
            ALTREP_SXP => self.read_altrep(),
            BCODESXP | BCREPDEF | BCREPREF | ATTRLANGSXP | ATTRLISTSXP => {
                Err(malformed("byte-compiled code is not supported"))
            }
            CLASSREFSXP | GENERICREFSXP => Err(malformed("class references are not supported")),
            _ => self.read_leaf(flags),
        }
    }

    fn read_reference(&mut self, flags: Flags) -> Result<RObject, ExportError> {
        let mut index = flags.raw >> 8;
        if index == 0 {
            index = self.read_int()?;
        }
        usize::try_from(index)
            .ok()
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| self.refs.get(index))
            .cloned()
            .ok_or_else(|| malformed(&format!("dangling reference {index}")))
    }

    fn read_string_vec(&mut self) -> Result<Vec<Option<String>>, ExportError> {
        if self.read_int()? != 0 {
            return Err(malformed("names in persistent string vectors are not supported"));
        }
        let len = self.checked_length(4)?;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(self.read_char_element()?);
        }
        Ok(values)
    }

    fn read_char_element(&mut self) -> Result<Option<String>, ExportError> {
        match self.read_item()? {
            RObject::Char(value) => Ok(value),
            other => Err(malformed(&format!(
                "character element is {}, expected char",
                other.type_name()
            ))),
        }
    }

    fn read_environment(&mut self) -> Result<RObject, ExportError> {
        let locked = self.read_int()? != 0;
        let id = EnvId(self.environments.len());
        self.environments.push(Environment::default());
        let env = RObject::Environment(EnvRef::Arena(id));
        self.refs.push(env.clone());

        let enclosure = match self.read_item()? {
            RObject::Environment(enclosure) => Some(enclosure),
            _ => None,
        };
        let frame = self.read_item()?;
        let hashtab = self.read_item()?;
        let attributes = into_attributes(self.read_item()?)?;

        let mut bindings = Vec::new();
        collect_bindings(frame, &mut bindings);
        if let RObject::Vector {
            data: Vector::List(buckets),
            ..
        } = hashtab
        {
            for bucket in buckets {
                collect_bindings(bucket, &mut bindings);
            }
        }

        self.environments[id.0] = Environment {
            locked,
            enclosure,
            bindings,
            attributes,
        };
        Ok(env)
    }

    /// Pairlists are read iteratively along their CDR chain so that long
    /// lists do not recurse once per cell.
    fn read_pairlist(&mut self, first: Flags) -> Result<RObject, ExportError> {
        let kind = first.ty;
        let mut items = Vec::new();
        let mut attributes = Attributes::default();
        let mut flags = first;
        loop {
            if flags.has_attr {
                let cell_attributes = into_attributes(self.read_item()?)?;
                if items.is_empty() {
                    attributes = cell_attributes;
                }
            }
            let tag = if flags.has_tag {
                match self.read_item()? {
                    RObject::Symbol(name) => Some(name),
                    _ => None,
                }
            } else {
                None
            };
            let car = self.read_item()?;
            items.push((tag, car));

            let next = self.read_flags()?;
            if kind == LISTSXP && next.ty == LISTSXP {
                flags = next;
                continue;
            }
            match self.read_item_with(next)? {
                RObject::Null => {}
                RObject::PairList { items: rest, .. } => items.extend(rest),
                tail => items.push((None, tail)),
            }
            break;
        }

        Ok(match kind {
            LISTSXP => RObject::PairList { items, attributes },
            LANGSXP => RObject::Opaque {
                kind: "language",
                attributes,
            },
            CLOSXP => RObject::Opaque {
                kind: "closure",
                attributes,
            },
            PROMSXP => RObject::Opaque {
                kind: "promise",
                attributes,
            },
            _ => RObject::Opaque {
                kind: "dots",
                attributes,
            },
        })
    }

    fn read_altrep(&mut self) -> Result<RObject, ExportError> {
        let info = self.read_item()?;
        let state = self.read_item()?;
        let attributes = into_attributes(self.read_item()?)?;

        let class = match &info {
            RObject::PairList { items, .. } => match items.first() {
                Some((_, RObject::Symbol(name))) => name.clone(),
                _ => return Err(malformed("ALTREP info without a class symbol")),
            },
            _ => return Err(malformed("ALTREP info is not a pairlist")),
        };

        let mut object = expand_altrep(&class, state)?;
        if let Some(existing) = object.attributes_mut() {
            existing.extend(attributes);
        }
        Ok(object)
    }

    fn read_leaf(&mut self, flags: Flags) -> Result<RObject, ExportError> {
        let mut placeholder = None;
        let data = match flags.ty {
            NILSXP => return Ok(RObject::Null),
            EXTPTRSXP | WEAKREFSXP => {
                placeholder = Some(self.refs.len());
                let kind = if flags.ty == EXTPTRSXP {
                    "externalptr"
                } else {
                    "weakref"
                };
                self.refs.push(RObject::Opaque {
                    kind,
                    attributes: Attributes::default(),
                });
                if flags.ty == EXTPTRSXP {
                    let _protected = self.read_item()?;
                    let _tag = self.read_item()?;
                }
                None
            }
            SPECIALSXP | BUILTINSXP => {
                let len = self.read_int()?;
                let len = usize::try_from(len).map_err(|_| malformed("negative builtin name"))?;
                self.take(len)?;
                None
            }
            CHARSXP => return self.read_charsxp(flags),
            LGLSXP => {
                let len = self.checked_length(4)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push(match self.read_int()? {
                        NA_INTEGER => None,
                        0 => Some(false),
                        _ => Some(true),
                    });
                }
                Some(Vector::Logical(values))
            }
            INTSXP => {
                let len = self.checked_length(4)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    let value = self.read_int()?;
                    values.push((value != NA_INTEGER).then_some(value));
                }
                Some(Vector::Integer(values))
            }
            REALSXP => {
                let len = self.checked_length(8)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push(self.read_double()?);
                }
                Some(Vector::Real(values))
            }
            CPLXSXP => {
                let len = self.checked_length(16)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push((self.read_double()?, self.read_double()?));
                }
                Some(Vector::Complex(values))
            }
            STRSXP => {
                let len = self.checked_length(4)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push(self.read_char_element()?);
                }
                Some(Vector::Character(values))
            }
            VECSXP | EXPRSXP => {
                let len = self.checked_length(4)?;
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push(self.read_item()?);
                }
                Some(if flags.ty == VECSXP {
                    Vector::List(values)
                } else {
                    Vector::Expression(values)
                })
            }
            RAWSXP => {
                let len = self.checked_length(1)?;
                Some(Vector::Raw(self.take(len)?.to_vec()))
            }
            S4SXP => None,
            other => return Err(malformed(&format!("unknown SEXP type {other}"))),
        };

        let attributes = if flags.has_attr {
            into_attributes(self.read_item()?)?
        } else {
            Attributes::default()
        };

        let object = match (flags.ty, data) {
            (_, Some(data)) => RObject::Vector { data, attributes },
            (S4SXP, None) => RObject::S4 { attributes },
            (EXTPTRSXP, None) => RObject::Opaque {
                kind: "externalptr",
                attributes,
            },
            (WEAKREFSXP, None) => RObject::Opaque {
                kind: "weakref",
                attributes,
            },
            (_, None) => RObject::Opaque {
                kind: "builtin",
                attributes,
            },
        };
        if let Some(index) = placeholder {
            self.refs[index] = object.clone();
        }
        Ok(object)
    }

    fn read_charsxp(&mut self, flags: Flags) -> Result<RObject, ExportError> {
        let len = self.read_int()?;
        let value = if len == -1 {
            None
        } else {
            let len = usize::try_from(len).map_err(|_| malformed("negative string length"))?;
            let bytes = self.take(len)?;
            Some(if flags.levels & LATIN1_MASK != 0 {
                bytes.iter().map(|byte| char::from(*byte)).collect()
            } else {
                String::from_utf8_lossy(bytes).into_owned()
            })
        };
        if flags.has_attr {
            let _ = self.read_item()?;
        }
        Ok(RObject::Char(value))
    }
}

fn expand_altrep(class: &str, state: RObject) -> Result<RObject, ExportError> {
    match class {
        "compact_intseq" => {
            let (n, start, step) = sequence_info(&state)?;
            let values = (0..n)
                .map(|i| Some((start + step * i as f64) as i32))
                .collect();
            Ok(RObject::vector(Vector::Integer(values)))
        }
        "compact_realseq" => {
            let (n, start, step) = sequence_info(&state)?;
            let values = (0..n).map(|i| start + step * i as f64).collect();
            Ok(RObject::vector(Vector::Real(values)))
        }
        "deferred_string" => {
            let source = match state {
                RObject::PairList { mut items, .. } if !items.is_empty() => items.swap_remove(0).1,
                other => other,
            };
            let values = match source.vector_data() {
                Some(Vector::Integer(values)) => values
                    .iter()
                    .map(|value| value.map(|value| value.to_string()))
                    .collect(),
                Some(Vector::Real(values)) => {
                    values.iter().map(|value| format_r_number(*value)).collect()
                }
                Some(Vector::Character(values)) => values.clone(),
                _ => return Err(malformed("deferred string over a non-atomic vector")),
            };
            Ok(RObject::vector(Vector::Character(values)))
        }
        class if class.starts_with("wrap_") => match state {
            RObject::PairList { mut items, .. } if !items.is_empty() => Ok(items.swap_remove(0).1),
            RObject::Vector {
                data: Vector::List(mut values),
                ..
            } if !values.is_empty() => Ok(values.swap_remove(0)),
            _ => Err(malformed(&format!("malformed {class} state"))),
        },
        _ => match state {
            vector @ RObject::Vector { .. } => Ok(vector),
            _ => Err(malformed(&format!("unsupported ALTREP class {class}"))),
        },
    }
}

fn sequence_info(state: &RObject) -> Result<(usize, f64, f64), ExportError> {
    let values: Vec<f64> = match state.vector_data() {
        Some(Vector::Real(values)) => values.clone(),
        Some(Vector::Integer(values)) => values
            .iter()
            .map(|value| value.map(f64::from).unwrap_or(f64::NAN))
            .collect(),
        _ => return Err(malformed("compact sequence state is not numeric")),
    };
    match values.as_slice() {
        [n, start, step] if n.is_finite() && *n >= 0.0 => Ok((*n as usize, *start, *step)),
        _ => Err(malformed("compact sequence state must hold n, start and step")),
    }
}

fn collect_bindings(frame: RObject, bindings: &mut Vec<(String, RObject)>) {
    if let RObject::PairList { items, .. } = frame {
        for (tag, value) in items {
            if let Some(name) = tag {
                bindings.push((name, value));
            }
        }
    }
}

fn into_attributes(object: RObject) -> Result<Attributes, ExportError> {
    match object {
        RObject::Null => Ok(Attributes::default()),
        RObject::PairList { items, .. } => items
            .into_iter()
            .map(|(tag, value)| {
                tag.map(|tag| (tag, value))
                    .ok_or_else(|| malformed("attribute without a name"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Attributes::new),
        other => Err(malformed(&format!(
            "attributes stored as {}, expected pairlist",
            other.type_name()
        ))),
    }
}

fn character_vector(values: Vec<Option<String>>) -> RObject {
    RObject::vector(Vector::Character(values))
}

fn malformed(message: &str) -> ExportError {
    ExportError::Deserialization(message.to_string())
}
