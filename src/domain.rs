use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const FALLBACK_BASE_NAME: &str = "downloaded";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    /// Entries still being processed are listed with a null link.
    #[serde(rename = "downloadLink", default)]
    pub download_link: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TableKind {
    Expression,
    Model,
    ExpDesign,
    Experiment,
}

impl TableKind {
    pub const ALL: [TableKind; 4] = [
        TableKind::Expression,
        TableKind::Model,
        TableKind::ExpDesign,
        TableKind::Experiment,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            TableKind::Expression => "_expression",
            TableKind::Model => "_model",
            TableKind::ExpDesign => "_expDesign",
            TableKind::Experiment => "_experiment",
        }
    }

    /// Expression and model rows keep their R row names; the concatenated
    /// tables are renumbered and carry no index.
    pub fn writes_index(self) -> bool {
        matches!(self, TableKind::Expression | TableKind::Model)
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableKind::Expression => write!(f, "expression"),
            TableKind::Model => write!(f, "model"),
            TableKind::ExpDesign => write!(f, "expDesign"),
            TableKind::Experiment => write!(f, "experiment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    base: String,
    derived: bool,
}

impl ArtifactNames {
    /// Only the last path component of the stem is kept, so a link can never
    /// name a file outside the output directory.
    pub fn from_download_link(link: &str) -> Self {
        let stem = file_stem_regex()
            .captures(link)
            .and_then(|caps| caps.get(1))
            .map(|stem| stem.as_str());
        let base = stem.and_then(|stem| {
            let last = stem.rsplit(['/', '\\']).next().unwrap_or(stem);
            if last != stem {
                tracing::debug!(stem, base = last, "dropping directories from artifact name");
            }
            (!matches!(last, "" | "." | "..")).then_some(last)
        });
        match base {
            Some(base) => Self {
                base: base.to_string(),
                derived: true,
            },
            None => Self {
                base: FALLBACK_BASE_NAME.to_string(),
                derived: false,
            },
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// False when the link had no `files/<name>.rds` segment.
    pub fn is_derived(&self) -> bool {
        self.derived
    }

    pub fn rds_file(&self) -> String {
        format!("{}.rds", self.base)
    }

    pub fn csv_file(&self, kind: TableKind) -> String {
        format!("{}{}.csv", self.base, kind.suffix())
    }
}

fn file_stem_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"files/([^?]+)\.rds").expect("static regex"))
}
