use camino::Utf8PathBuf;

use crate::error::ExportError;

pub const DEFAULT_CATALOG_BASE_URL: &str = "https://www.orcestra.ca/api/xevaset";
pub const DEFAULT_DATASET: &str = "PDXE";

/// Fixed run parameters. There is no config file or CLI surface; the
/// values are held here so the pipeline and its tests take them explicitly.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub catalog_base_url: String,
    pub dataset_name: String,
    pub output_dir: Utf8PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            catalog_base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
            dataset_name: DEFAULT_DATASET.to_string(),
            output_dir: Utf8PathBuf::from("."),
        }
    }
}

impl ExportConfig {
    pub fn validate(&self) -> Result<(), ExportError> {
        if self.dataset_name.trim().is_empty() {
            return Err(ExportError::InvalidConfig(
                "dataset name must not be empty".to_string(),
            ));
        }
        let url = self.catalog_base_url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ExportError::InvalidConfig(format!(
                "catalog url must be http(s): {url}"
            )));
        }
        Ok(())
    }

    pub fn catalog_url(&self) -> String {
        format!("{}/available", self.catalog_base_url.trim().trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn default_points_at_orcestra() {
        let config = ExportConfig::default();
        assert_eq!(
            config.catalog_url(),
            "https://www.orcestra.ca/api/xevaset/available"
        );
        assert_eq!(config.dataset_name, "PDXE");
        config.validate().unwrap();
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let config = ExportConfig {
            catalog_base_url: "http://localhost:8080/api/".to_string(),
            ..ExportConfig::default()
        };
        assert_eq!(config.catalog_url(), "http://localhost:8080/api/available");
    }

    #[test]
    fn rejects_blank_dataset() {
        let config = ExportConfig {
            dataset_name: "  ".to_string(),
            ..ExportConfig::default()
        };
        assert_matches!(config.validate(), Err(ExportError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_non_http_catalog() {
        let config = ExportConfig {
            catalog_base_url: "ftp://orcestra.ca".to_string(),
            ..ExportConfig::default()
        };
        assert_matches!(config.validate(), Err(ExportError::InvalidConfig(_)));
    }
}
