#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;

pub const NULL_SLOT: &str = "\u{1}NULL\u{1}";

pub type Attrs = Vec<(String, Node)>;

/// Minimal R value tree for building serialized fixtures.
#[derive(Debug, Clone)]
pub enum Node {
    Null,
    Sym(String),
    Logical(Vec<Option<bool>>, Attrs),
    Int(Vec<Option<i32>>, Attrs),
    Real(Vec<f64>, Attrs),
    Str(Vec<Option<String>>, Attrs),
    List(Vec<Node>, Attrs),
    S4(Attrs),
    Env(Vec<(String, Node)>),
}

impl Node {
    pub fn with_attr(self, name: &str, value: Node) -> Node {
        let push = |mut attrs: Attrs| {
            attrs.push((name.to_string(), value));
            attrs
        };
        match self {
            Node::Logical(v, a) => Node::Logical(v, push(a)),
            Node::Int(v, a) => Node::Int(v, push(a)),
            Node::Real(v, a) => Node::Real(v, push(a)),
            Node::Str(v, a) => Node::Str(v, push(a)),
            Node::List(v, a) => Node::List(v, push(a)),
            Node::S4(a) => Node::S4(push(a)),
            other => other,
        }
    }
}

pub fn strs(values: &[&str]) -> Node {
    Node::Str(values.iter().map(|v| Some(v.to_string())).collect(), Vec::new())
}

pub fn str_na() -> Node {
    Node::Str(vec![None], Vec::new())
}

pub fn reals(values: &[f64]) -> Node {
    Node::Real(values.to_vec(), Vec::new())
}

pub fn ints(values: &[i32]) -> Node {
    Node::Int(values.iter().map(|v| Some(*v)).collect(), Vec::new())
}

pub fn named_list(entries: Vec<(&str, Node)>) -> Node {
    let names = strs(&entries.iter().map(|(name, _)| *name).collect::<Vec<_>>());
    let values = entries.into_iter().map(|(_, value)| value).collect();
    Node::List(values, Vec::new()).with_attr("names", names)
}

pub fn data_frame(columns: Vec<(&str, Node)>, nrow: i32) -> Node {
    named_list(columns)
        .with_attr("class", strs(&["data.frame"]))
        .with_attr("row.names", Node::Int(vec![None, Some(-nrow)], Vec::new()))
}

pub fn data_frame_with_rows(columns: Vec<(&str, Node)>, rows: &[&str]) -> Node {
    named_list(columns)
        .with_attr("class", strs(&["data.frame"]))
        .with_attr("row.names", strs(rows))
}

pub fn matrix(values: &[f64], nrow: i32, ncol: i32, rows: &[&str], cols: &[&str]) -> Node {
    reals(values)
        .with_attr("dim", ints(&[nrow, ncol]))
        .with_attr(
            "dimnames",
            Node::List(vec![strs(rows), strs(cols)], Vec::new()),
        )
}

pub fn s4(class: &str, package: &str, slots: Vec<(&str, Node)>) -> Node {
    let mut attrs: Attrs = slots
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    attrs.push((
        "class".to_string(),
        strs(&[class]).with_attr("package", strs(&[package])),
    ));
    Node::S4(attrs)
}

pub fn null_slot() -> Node {
    Node::Sym(NULL_SLOT.to_string())
}

pub fn expression_set(exprs: Node) -> Node {
    s4(
        "ExpressionSet",
        "Biobase",
        vec![
            ("experimentData", Node::Null),
            ("assayData", Node::Env(vec![("exprs".to_string(), exprs)])),
            ("annotation", strs(&["rnaseq"])),
        ],
    )
}

pub fn pdx_model(model_id: &str, drug: &str, data: Node) -> Node {
    s4(
        "pdxModel",
        "Xeva",
        vec![
            ("model.id", strs(&[model_id])),
            (
                "drug",
                named_list(vec![
                    ("join.name", strs(&[drug])),
                    ("names", named_list(vec![(drug, strs(&[drug]))])),
                ]),
            ),
            ("data", data),
            ("treatment.type", strs(&["single"])),
        ],
    )
}

pub fn tumor_volume(times: &[f64], volumes: &[f64]) -> Node {
    data_frame(
        vec![
            ("time", reals(times)),
            ("volume", reals(volumes)),
            ("dose", Node::Int(vec![Some(10); times.len()], Vec::new())),
        ],
        times.len() as i32,
    )
}

pub fn default_model_table() -> Node {
    data_frame_with_rows(
        vec![
            ("model.id", strs(&["X-1004.BGJ398", "X-1004.untreated"])),
            ("tissue", strs(&["BRCA", "BRCA"])),
            ("patient.id", strs(&["X-1004", "X-1004"])),
        ],
        &["X-1004.BGJ398", "X-1004.untreated"],
    )
}

pub fn default_expression() -> Node {
    matrix(
        &[1.5, 2.0, 0.25, 3.0, 4.5, 6.0],
        3,
        2,
        &["ENSG01", "ENSG02", "ENSG03"],
        &["X-1004", "X-1008"],
    )
}

pub fn xevaset(exp_design: Node, experiment: Node) -> Node {
    s4(
        "XevaSet",
        "Xeva",
        vec![
            ("annotation", named_list(vec![("name", strs(&["PDXE"]))])),
            ("model", default_model_table()),
            ("drug", Node::Null),
            ("sensitivity", Node::Null),
            ("expDesign", exp_design),
            ("experiment", experiment),
            (
                "molecularProfiles",
                named_list(vec![("RNASeq", expression_set(default_expression()))]),
            ),
        ],
    )
}

pub fn scenario_set() -> Node {
    xevaset(
        named_list(vec![("exp1", named_list(vec![("name", strs(&["exp1"]))]))]),
        named_list(vec![(
            "X-1004.BGJ398",
            pdx_model(
                "X-1004",
                "BGJ398",
                tumor_volume(&[0.0, 3.0, 7.0], &[199.1, 250.5, 301.0]),
            ),
        )]),
    )
}

/// XDR writer for `Node`, interning symbols through the reference table the
/// way R does.
pub struct Encoder {
    buf: Vec<u8>,
    symbols: HashMap<String, i32>,
    refs: i32,
}

impl Encoder {
    pub fn new(version: i32) -> Self {
        let mut encoder = Self {
            buf: b"X\n".to_vec(),
            symbols: HashMap::new(),
            refs: 0,
        };
        encoder.int(version);
        encoder.int(0x040201);
        if version == 3 {
            encoder.int(0x030500);
            encoder.int(5);
            encoder.buf.extend_from_slice(b"UTF-8");
        } else {
            encoder.int(0x020300);
        }
        encoder
    }

    pub fn int(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn charsxp(&mut self, value: Option<&str>) {
        match value {
            Some(value) => {
                self.int(9 | (8 << 12));
                self.int(value.len() as i32);
                self.buf.extend_from_slice(value.as_bytes());
            }
            None => {
                self.int(9);
                self.int(-1);
            }
        }
    }

    fn symbol(&mut self, name: &str) {
        if let Some(index) = self.symbols.get(name) {
            let index = *index;
            self.int((index << 8) | 255);
            return;
        }
        self.refs += 1;
        self.symbols.insert(name.to_string(), self.refs);
        self.int(1);
        self.charsxp(Some(name));
    }

    fn header(&mut self, ty: i32, attrs: &Attrs, s4: bool) {
        let mut flags = ty;
        if !attrs.is_empty() {
            flags |= 1 << 9;
        }
        if attrs.iter().any(|(name, _)| name == "class") {
            flags |= 1 << 8;
        }
        if s4 {
            flags |= 16 << 12;
        }
        self.int(flags);
    }

    fn attributes(&mut self, attrs: &Attrs) {
        if attrs.is_empty() {
            return;
        }
        for (name, value) in attrs {
            self.int(2 | (1 << 10));
            self.symbol(name);
            self.write(value);
        }
        self.int(254);
    }

    pub fn write(&mut self, node: &Node) {
        match node {
            Node::Null => self.int(254),
            Node::Sym(name) => self.symbol(name),
            Node::Logical(values, attrs) => {
                self.header(10, attrs, false);
                self.int(values.len() as i32);
                for value in values {
                    self.int(match value {
                        Some(true) => 1,
                        Some(false) => 0,
                        None => i32::MIN,
                    });
                }
                self.attributes(attrs);
            }
            Node::Int(values, attrs) => {
                self.header(13, attrs, false);
                self.int(values.len() as i32);
                for value in values {
                    self.int(value.unwrap_or(i32::MIN));
                }
                self.attributes(attrs);
            }
            Node::Real(values, attrs) => {
                self.header(14, attrs, false);
                self.int(values.len() as i32);
                for value in values {
                    self.buf.extend_from_slice(&value.to_be_bytes());
                }
                self.attributes(attrs);
            }
            Node::Str(values, attrs) => {
                self.header(16, attrs, false);
                self.int(values.len() as i32);
                for value in values {
                    self.charsxp(value.as_deref());
                }
                self.attributes(attrs);
            }
            Node::List(values, attrs) => {
                self.header(19, attrs, false);
                self.int(values.len() as i32);
                for value in values {
                    self.write(value);
                }
                self.attributes(attrs);
            }
            Node::S4(attrs) => {
                self.header(25, attrs, true);
                self.attributes(attrs);
            }
            Node::Env(bindings) => {
                self.int(4);
                self.int(1);
                self.refs += 1;
                self.int(253);
                if bindings.is_empty() {
                    self.int(254);
                } else {
                    for (name, value) in bindings {
                        self.int(2 | (1 << 10));
                        self.symbol(name);
                        self.write(value);
                    }
                    self.int(254);
                }
                self.int(254);
                self.int(254);
            }
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub fn encode(node: &Node) -> Vec<u8> {
    let mut encoder = Encoder::new(3);
    encoder.write(node);
    encoder.finish()
}

pub fn encode_gzip(node: &Node) -> Vec<u8> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&encode(node)).unwrap();
    gz.finish().unwrap()
}
