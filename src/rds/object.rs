use serde::Serialize;

/// Placeholder R writes for an S4 slot whose value is `NULL`.
pub const NULL_SLOT_SENTINEL: &str = "\u{1}NULL\u{1}";

static NULL: RObject = RObject::Null;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attributes(Vec<(String, RObject)>);

impl Attributes {
    pub fn new(entries: Vec<(String, RObject)>) -> Self {
        Self(entries)
    }

    pub fn get(&self, name: &str) -> Option<&RObject> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn extend(&mut self, other: Attributes) {
        for (key, value) in other.0 {
            match self.0.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = value,
                None => self.0.push((key, value)),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Vector {
    Logical(Vec<Option<bool>>),
    Integer(Vec<Option<i32>>),
    /// NA and NaN are both carried as NaN.
    Real(Vec<f64>),
    Complex(Vec<(f64, f64)>),
    Character(Vec<Option<String>>),
    Raw(Vec<u8>),
    List(Vec<RObject>),
    Expression(Vec<RObject>),
}

impl Vector {
    pub fn len(&self) -> usize {
        match self {
            Vector::Logical(values) => values.len(),
            Vector::Integer(values) => values.len(),
            Vector::Real(values) => values.len(),
            Vector::Complex(values) => values.len(),
            Vector::Character(values) => values.len(),
            Vector::Raw(values) => values.len(),
            Vector::List(values) | Vector::Expression(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Vector::Logical(_) => "logical",
            Vector::Integer(_) => "integer",
            Vector::Real(_) => "double",
            Vector::Complex(_) => "complex",
            Vector::Character(_) => "character",
            Vector::Raw(_) => "raw",
            Vector::List(_) => "list",
            Vector::Expression(_) => "expression",
        }
    }

    /// `as.character(x)[i]`, with NA as `None`. Recursive elements yield
    /// `None`.
    pub fn element_as_string(&self, index: usize) -> Option<String> {
        match self {
            Vector::Logical(values) => values
                .get(index)
                .copied()
                .flatten()
                .map(|value| if value { "TRUE" } else { "FALSE" }.to_string()),
            Vector::Integer(values) => values
                .get(index)
                .copied()
                .flatten()
                .map(|value| value.to_string()),
            Vector::Real(values) => values.get(index).copied().and_then(format_r_number),
            Vector::Complex(values) => values.get(index).map(|(re, im)| {
                let re = format_r_number(*re).unwrap_or_else(|| "NA".to_string());
                let im_abs = format_r_number(im.abs()).unwrap_or_else(|| "NA".to_string());
                let sign = if *im < 0.0 { '-' } else { '+' };
                format!("{re}{sign}{im_abs}i")
            }),
            Vector::Character(values) => values.get(index).cloned().flatten(),
            Vector::Raw(values) => values.get(index).map(|byte| format!("{byte:02x}")),
            Vector::List(values) | Vector::Expression(values) => {
                values.get(index).and_then(RObject::first_as_string)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EnvId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialEnv {
    Global,
    Base,
    Empty,
    BaseNamespace,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnvRef {
    Arena(EnvId),
    Special(SpecialEnv),
    Namespace(Vec<String>),
    Package(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    UnboundValue,
    MissingArg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RObject {
    Null,
    Symbol(String),
    /// A bare CHARSXP. Only seen as an element of a character vector.
    Char(Option<String>),
    Vector {
        data: Vector,
        attributes: Attributes,
    },
    PairList {
        items: Vec<(Option<String>, RObject)>,
        attributes: Attributes,
    },
    S4 {
        attributes: Attributes,
    },
    Environment(EnvRef),
    /// Code, pointers and other values that carry no tabular data.
    Opaque {
        kind: &'static str,
        attributes: Attributes,
    },
    Marker(Marker),
}

impl RObject {
    pub fn vector(data: Vector) -> Self {
        RObject::Vector {
            data,
            attributes: Attributes::default(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RObject::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RObject::Null => "NULL",
            RObject::Symbol(_) => "symbol",
            RObject::Char(_) => "char",
            RObject::Vector { data, .. } => data.type_name(),
            RObject::PairList { .. } => "pairlist",
            RObject::S4 { .. } => "S4",
            RObject::Environment(_) => "environment",
            RObject::Opaque { kind, .. } => *kind,
            RObject::Marker(_) => "marker",
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            RObject::Vector { attributes, .. }
            | RObject::PairList { attributes, .. }
            | RObject::S4 { attributes }
            | RObject::Opaque { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    pub fn attributes_mut(&mut self) -> Option<&mut Attributes> {
        match self {
            RObject::Vector { attributes, .. }
            | RObject::PairList { attributes, .. }
            | RObject::S4 { attributes }
            | RObject::Opaque { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&RObject> {
        self.attributes().and_then(|attrs| attrs.get(name))
    }

    /// `object@name`. A slot holding `NULL` resolves to `RObject::Null`.
    pub fn slot(&self, name: &str) -> Option<&RObject> {
        match self.attr(name)? {
            RObject::Symbol(symbol) if symbol == NULL_SLOT_SENTINEL => Some(&NULL),
            value => Some(value),
        }
    }

    pub fn vector_data(&self) -> Option<&Vector> {
        match self {
            RObject::Vector { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RObject::Null => 0,
            RObject::Vector { data, .. } => data.len(),
            RObject::PairList { items, .. } => items.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn class(&self) -> Vec<&str> {
        match self.attr("class").and_then(RObject::vector_data) {
            Some(Vector::Character(values)) => {
                values.iter().flatten().map(String::as_str).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn inherits(&self, class: &str) -> bool {
        self.class().iter().any(|value| *value == class)
    }

    pub fn is_data_frame(&self) -> bool {
        self.inherits("data.frame")
    }

    pub fn names(&self) -> Option<Vec<Option<&str>>> {
        match self {
            RObject::PairList { items, .. } => {
                Some(items.iter().map(|(tag, _)| tag.as_deref()).collect())
            }
            _ => match self.attr("names").and_then(RObject::vector_data) {
                Some(Vector::Character(values)) => {
                    Some(values.iter().map(|value| value.as_deref()).collect())
                }
                _ => None,
            },
        }
    }

    pub fn dim(&self) -> Option<Vec<usize>> {
        match self.attr("dim").and_then(RObject::vector_data)? {
            Vector::Integer(values) => values
                .iter()
                .map(|&value| value.and_then(|value| usize::try_from(value).ok()))
                .collect(),
            Vector::Real(values) => values
                .iter()
                .map(|&value| (value.is_finite() && value >= 0.0).then_some(value as usize))
                .collect(),
            _ => None,
        }
    }

    /// Named elements of a list or pairlist, in storage order.
    pub fn list_entries(&self) -> Option<Vec<(Option<&str>, &RObject)>> {
        match self {
            RObject::Vector {
                data: Vector::List(values),
                ..
            } => {
                let names = self.names();
                Some(
                    values
                        .iter()
                        .enumerate()
                        .map(|(i, value)| {
                            let name = names
                                .as_ref()
                                .and_then(|names| names.get(i).copied().flatten());
                            (name, value)
                        })
                        .collect(),
                )
            }
            RObject::PairList { items, .. } => Some(
                items
                    .iter()
                    .map(|(tag, value)| (tag.as_deref(), value))
                    .collect(),
            ),
            RObject::Null => Some(Vec::new()),
            _ => None,
        }
    }

    /// `x[[name]]` on a list, exact matching only.
    pub fn list_get(&self, name: &str) -> Option<&RObject> {
        self.list_entries()?
            .into_iter()
            .find(|(key, _)| *key == Some(name))
            .map(|(_, value)| value)
    }

    /// `as.character(x)[1]`; `None` for NULL, zero-length values and NA.
    pub fn first_as_string(&self) -> Option<String> {
        match self {
            RObject::Vector { data, .. } => {
                if factor_levels(self).is_some() {
                    return factor_label(self, 0);
                }
                data.element_as_string(0)
            }
            RObject::Symbol(name) => Some(name.clone()),
            RObject::Char(value) => value.clone(),
            RObject::PairList { items, .. } => items
                .first()
                .and_then(|(_, value)| value.first_as_string()),
            _ => None,
        }
    }
}

pub fn factor_levels(object: &RObject) -> Option<&[Option<String>]> {
    if !object.inherits("factor") {
        return None;
    }
    match object.attr("levels").and_then(RObject::vector_data) {
        Some(Vector::Character(levels)) => Some(levels.as_slice()),
        _ => None,
    }
}

fn factor_label(object: &RObject, index: usize) -> Option<String> {
    let levels = factor_levels(object)?;
    match object.vector_data()? {
        Vector::Integer(codes) => {
            let code = codes.get(index).copied().flatten()?;
            let position = usize::try_from(code).ok()?.checked_sub(1)?;
            levels.get(position).cloned().flatten()
        }
        _ => None,
    }
}

/// Renders a double the way `as.character` does for the common cases:
/// integral values without a fraction, everything else at shortest
/// round-trip precision.
pub fn format_r_number(value: f64) -> Option<String> {
    if value.is_nan() {
        return None;
    }
    if value.is_infinite() {
        return Some(if value > 0.0 { "Inf" } else { "-Inf" }.to_string());
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return Some(format!("{}", value as i64));
    }
    Some(format!("{value}"))
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Environment {
    pub locked: bool,
    pub enclosure: Option<EnvRef>,
    pub bindings: Vec<(String, RObject)>,
    pub attributes: Attributes,
}

impl Environment {
    pub fn get(&self, name: &str) -> Option<&RObject> {
        self.bindings
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// A decoded `.rds` file. Environments live in an arena so that
/// self-referencing environments can be represented.
#[derive(Debug, Clone, PartialEq)]
pub struct RdsFile {
    pub format_version: u32,
    pub writer_version: RVersion,
    pub native_encoding: Option<String>,
    pub root: RObject,
    pub(crate) environments: Vec<Environment>,
}

impl RdsFile {
    pub fn environment(&self, id: EnvId) -> Option<&Environment> {
        self.environments.get(id.0)
    }

    pub fn environment_count(&self) -> usize {
        self.environments.len()
    }

    /// Looks a variable up in an environment-valued object without walking
    /// enclosures.
    pub fn env_get<'a>(&'a self, env: &'a RObject, name: &str) -> Option<&'a RObject> {
        match env {
            RObject::Environment(EnvRef::Arena(id)) => self.environment(*id)?.get(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl RVersion {
    pub fn from_packed(packed: i32) -> Self {
        let packed = packed.max(0) as u32;
        Self {
            major: packed / 65536,
            minor: (packed % 65536) / 256,
            patch: packed % 256,
        }
    }
}

impl std::fmt::Display for RVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
