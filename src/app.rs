use std::fs;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::catalog::{CatalogClient, resolve_download_link};
use crate::config::ExportConfig;
use crate::domain::{ArtifactNames, TableKind};
use crate::error::ExportError;
use crate::extract::{XevaSet, extract_table};
use crate::rds::read_rds;

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub dataset: String,
    pub download_link: String,
    pub artifact: ArtifactInfo,
    pub outputs: Vec<OutputFile>,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub path: String,
    pub bytes: u64,
    pub base_name_derived: bool,
    pub r_version: String,
    pub root_class: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputFile {
    pub kind: TableKind,
    pub path: String,
    pub rows: usize,
    pub columns: usize,
    pub index: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: CatalogClient> {
    config: ExportConfig,
    client: C,
}

impl<C: CatalogClient> App<C> {
    pub fn new(config: ExportConfig, client: C) -> Self {
        Self { config, client }
    }

    /// Runs resolve, fetch, load, then extract-and-write for each table in
    /// turn. Files written before a failure are left in place.
    pub fn export(&self, sink: &dyn ProgressSink) -> Result<ExportResult, ExportError> {
        self.config.validate()?;
        let dataset = self.config.dataset_name.as_str();

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; looking up {dataset}"),
            elapsed: None,
        });
        let start = Instant::now();
        let entries = self.client.fetch_available()?;
        tracing::debug!(entries = entries.len(), "catalog listing received");
        let download_link = resolve_download_link(&entries, dataset)?;
        sink.event(ProgressEvent {
            message: format!("catalog.response entries={}", entries.len()),
            elapsed: Some(start.elapsed()),
        });

        let names = ArtifactNames::from_download_link(&download_link);
        if !names.is_derived() {
            tracing::warn!(
                link = %download_link,
                base = names.base(),
                "download link has no files/<name>.rds segment; using fallback name"
            );
        }

        fs::create_dir_all(self.config.output_dir.as_std_path())
            .map_err(|err| ExportError::Filesystem(err.to_string()))?;
        let artifact_path = self.output_path(&names.rds_file());

        sink.event(ProgressEvent {
            message: format!("phase=Fetch; downloading {}", names.rds_file()),
            elapsed: None,
        });
        let start = Instant::now();
        let bytes = self
            .client
            .download_artifact(&download_link, artifact_path.as_std_path())?;
        sink.event(ProgressEvent {
            message: format!("artifact.response bytes={bytes}"),
            elapsed: Some(start.elapsed()),
        });

        sink.event(ProgressEvent {
            message: "phase=Load; decoding R object".to_string(),
            elapsed: None,
        });
        let start = Instant::now();
        let rds = read_rds(artifact_path.as_std_path())?;
        let set = XevaSet::from_rds(&rds)?;
        tracing::debug!(
            version = rds.format_version,
            writer = %rds.writer_version,
            environments = rds.environment_count(),
            "decoded rds"
        );
        sink.event(ProgressEvent {
            message: format!(
                "rds.decoded class={}",
                set.class_name().unwrap_or("<none>")
            ),
            elapsed: Some(start.elapsed()),
        });

        let mut outputs = Vec::with_capacity(TableKind::ALL.len());
        for kind in TableKind::ALL {
            sink.event(ProgressEvent {
                message: format!("phase=Extract; {kind}"),
                elapsed: None,
            });
            let table = extract_table(kind, &set)?;
            let path = self.output_path(&names.csv_file(kind));
            table.write_csv(&path, kind.writes_index())?;
            sink.event(ProgressEvent {
                message: format!("phase=Store; wrote {path} rows={}", table.rows()),
                elapsed: None,
            });
            outputs.push(OutputFile {
                kind,
                path: path.to_string(),
                rows: table.rows(),
                columns: table.columns().len(),
                index: kind.writes_index(),
            });
        }

        Ok(ExportResult {
            dataset: dataset.to_string(),
            download_link,
            artifact: ArtifactInfo {
                path: artifact_path.to_string(),
                bytes,
                base_name_derived: names.is_derived(),
                r_version: rds.writer_version.to_string(),
                root_class: set.class_name().map(str::to_string),
            },
            outputs,
            finished_at: iso_timestamp(),
        })
    }

    fn output_path(&self, file_name: &str) -> Utf8PathBuf {
        self.config.output_dir.join(file_name)
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
