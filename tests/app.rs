mod common;

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use pdxe_export::app::{App, ProgressEvent, ProgressSink};
use pdxe_export::catalog::CatalogClient;
use pdxe_export::config::ExportConfig;
use pdxe_export::domain::{CatalogEntry, TableKind};
use pdxe_export::error::ExportError;
use pdxe_export::output::JsonOutput;
use pdxe_export::table::{Cell, Table};

use common::{Node, encode_gzip, named_list, pdx_model, scenario_set, strs, xevaset};

struct MockCatalog {
    entries: Vec<CatalogEntry>,
    artifact: Vec<u8>,
    downloads: Arc<Mutex<Vec<String>>>,
}

impl MockCatalog {
    fn new(link: &str, set: &Node) -> Self {
        Self {
            entries: vec![
                CatalogEntry {
                    name: "PDXE_alt".to_string(),
                    download_link: Some("https://zenodo.org/records/1/files/Other.rds".to_string()),
                },
                CatalogEntry {
                    name: "PDXE".to_string(),
                    download_link: Some(link.to_string()),
                },
            ],
            artifact: encode_gzip(set),
            downloads: Arc::default(),
        }
    }
}

impl CatalogClient for MockCatalog {
    fn fetch_available(&self) -> Result<Vec<CatalogEntry>, ExportError> {
        Ok(self.entries.clone())
    }

    fn download_artifact(&self, url: &str, destination: &Path) -> Result<u64, ExportError> {
        self.downloads.lock().unwrap().push(url.to_string());
        fs::write(destination, &self.artifact)
            .map_err(|err| ExportError::Filesystem(err.to_string()))?;
        Ok(self.artifact.len() as u64)
    }
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

fn config_in(dir: &tempfile::TempDir) -> ExportConfig {
    ExportConfig {
        output_dir: Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap(),
        ..ExportConfig::default()
    }
}

fn csv_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".csv"))
        .collect();
    names.sort();
    names
}

#[test]
fn exports_all_four_tables() {
    let dir = tempfile::tempdir().unwrap();
    let link = "https://zenodo.org/records/2/files/PDXE_2021.rds?download=1";
    let client = MockCatalog::new(link, &scenario_set());
    let app = App::new(config_in(&dir), client);
    let sink = RecordingSink::default();

    let result = app.export(&sink).unwrap();

    assert_eq!(result.dataset, "PDXE");
    assert_eq!(result.download_link, link);
    assert!(result.artifact.base_name_derived);
    assert_eq!(result.artifact.root_class.as_deref(), Some("XevaSet"));
    assert_eq!(result.artifact.r_version, "4.2.1");
    assert!(dir.path().join("PDXE_2021.rds").exists());
    assert_eq!(
        result.outputs.iter().map(|out| out.kind).collect::<Vec<_>>(),
        TableKind::ALL.to_vec()
    );
    assert_eq!(
        csv_files(dir.path()),
        vec![
            "PDXE_2021_expDesign.csv",
            "PDXE_2021_experiment.csv",
            "PDXE_2021_expression.csv",
            "PDXE_2021_model.csv",
        ]
    );

    let out = config_in(&dir).output_dir;
    let design = Table::read_csv(&out.join("PDXE_2021_expDesign.csv"), false).unwrap();
    assert_eq!(design.rows(), 1);
    assert_eq!(design.column("name").unwrap().cells, vec![Cell::text("exp1")]);
    assert_eq!(design.column("control").unwrap().cells, vec![Cell::Missing]);
    assert_eq!(design.column("treatment").unwrap().cells, vec![Cell::Missing]);

    let experiment = Table::read_csv(&out.join("PDXE_2021_experiment.csv"), false).unwrap();
    assert_eq!(experiment.rows(), 3);
    for (column, value) in [
        ("experiment", "X-1004.BGJ398"),
        ("model_id", "X-1004"),
        ("drug", "BGJ398"),
    ] {
        assert!(
            experiment
                .column(column)
                .unwrap()
                .cells
                .iter()
                .all(|cell| *cell == Cell::text(value)),
            "{column} should be constant"
        );
    }

    let expression = fs::read_to_string(dir.path().join("PDXE_2021_expression.csv")).unwrap();
    assert_eq!(
        expression,
        ",X-1004,X-1008\nENSG01,1.5,3.0\nENSG02,2.0,4.5\nENSG03,0.25,6.0\n"
    );
    let model = Table::read_csv(&out.join("PDXE_2021_model.csv"), true).unwrap();
    assert_eq!(model.index().unwrap(), ["X-1004.BGJ398", "X-1004.untreated"]);

    let messages = sink.messages.lock().unwrap();
    assert!(messages.iter().any(|m| m.starts_with("phase=Resolve")));
    assert!(messages.iter().any(|m| m.starts_with("phase=Store")));

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["outputs"][2]["kind"], "expDesign");
    assert_eq!(json["outputs"][0]["index"], true);
    JsonOutput::print_export(&result).unwrap();
}

#[test]
fn downloads_the_resolved_link_only() {
    let dir = tempfile::tempdir().unwrap();
    let link = "https://zenodo.org/records/2/files/PDXE_2021.rds";
    let client = MockCatalog::new(link, &scenario_set());
    let downloads = Arc::clone(&client.downloads);
    let app = App::new(config_in(&dir), client);
    app.export(&RecordingSink::default()).unwrap();
    assert_eq!(*downloads.lock().unwrap(), vec![link.to_string()]);
}

#[test]
fn unknown_dataset_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExportConfig {
        dataset_name: "PDXE_2099".to_string(),
        ..config_in(&dir)
    };
    let app = App::new(
        config,
        MockCatalog::new("https://zenodo.org/files/PDXE.rds", &scenario_set()),
    );
    let result = app.export(&RecordingSink::default());
    assert_matches!(result, Err(ExportError::DatasetNotFound(name)) if name == "PDXE_2099");
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn earlier_tables_survive_a_later_failure() {
    let dir = tempfile::tempdir().unwrap();
    let broken = xevaset(
        named_list(vec![("exp1", named_list(vec![("name", strs(&["exp1"]))]))]),
        named_list(vec![("X-1.drugA", pdx_model("X-1", "drugA", strs(&["bogus"])))]),
    );
    let app = App::new(
        config_in(&dir),
        MockCatalog::new("https://zenodo.org/files/PDXE.rds", &broken),
    );
    let result = app.export(&RecordingSink::default());
    assert_matches!(result, Err(ExportError::Extraction(_)));
    assert_eq!(
        csv_files(dir.path()),
        vec!["PDXE_expDesign.csv", "PDXE_expression.csv", "PDXE_model.csv"]
    );
}

#[test]
fn non_rds_link_uses_fallback_names() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::new(
        config_in(&dir),
        MockCatalog::new("https://example.org/download?id=42", &scenario_set()),
    );
    let result = app.export(&RecordingSink::default()).unwrap();
    assert!(!result.artifact.base_name_derived);
    assert!(dir.path().join("downloaded.rds").exists());
    assert!(dir.path().join("downloaded_experiment.csv").exists());
}

#[test]
fn non_s4_artifact_is_a_deserialization_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::new(
        config_in(&dir),
        MockCatalog::new("https://zenodo.org/files/PDXE.rds", &strs(&["not a set"])),
    );
    assert_matches!(
        app.export(&RecordingSink::default()),
        Err(ExportError::Deserialization(_))
    );
    assert!(csv_files(dir.path()).is_empty());
}

#[test]
fn rejects_invalid_config_before_network() {
    let dir = tempfile::tempdir().unwrap();
    let config = ExportConfig {
        dataset_name: "  ".to_string(),
        ..config_in(&dir)
    };
    let client = MockCatalog::new("https://zenodo.org/files/PDXE.rds", &scenario_set());
    let app = App::new(config, client);
    assert_matches!(
        app.export(&RecordingSink::default()),
        Err(ExportError::InvalidConfig(_))
    );
}
