use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::CatalogEntry;
use crate::error::ExportError;

pub trait CatalogClient: Send + Sync {
    fn fetch_available(&self) -> Result<Vec<CatalogEntry>, ExportError>;
    fn download_artifact(&self, url: &str, destination: &Path) -> Result<u64, ExportError>;
}

pub const CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct OrcestraHttpClient {
    client: Client,
    catalog_url: String,
}

impl OrcestraHttpClient {
    /// Only connection setup is bounded; a large artifact may take as long
    /// as it needs to transfer.
    pub fn new(catalog_url: impl Into<String>) -> Result<Self, ExportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pdxe-export/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ExportError::InvalidConfig(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| ExportError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            catalog_url: catalog_url.into(),
        })
    }
}

impl CatalogClient for OrcestraHttpClient {
    fn fetch_available(&self) -> Result<Vec<CatalogEntry>, ExportError> {
        let response = self
            .client
            .get(&self.catalog_url)
            .send()
            .map_err(|err| ExportError::CatalogHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalog request failed".to_string());
            return Err(ExportError::CatalogStatus { status, message });
        }
        let body = response
            .text()
            .map_err(|err| ExportError::CatalogHttp(err.to_string()))?;
        parse_catalog(&body)
    }

    fn download_artifact(&self, url: &str, destination: &Path) -> Result<u64, ExportError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| ExportError::ArtifactHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "artifact request failed".to_string());
            return Err(ExportError::ArtifactStatus { status, message });
        }

        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = tempfile::Builder::new()
            .prefix("pdxe-export-artifact")
            .tempfile_in(parent)
            .map_err(|err| ExportError::Filesystem(err.to_string()))?;
        let written = std::io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| ExportError::ArtifactHttp(err.to_string()))?;
        temp.persist(destination)
            .map_err(|err| ExportError::Filesystem(err.to_string()))?;
        Ok(written)
    }
}

pub fn parse_catalog(body: &str) -> Result<Vec<CatalogEntry>, ExportError> {
    serde_json::from_str(body).map_err(|err| ExportError::CatalogParse(err.to_string()))
}

/// Only the matched entry has to carry a link; siblings are not inspected.
pub fn resolve_download_link(entries: &[CatalogEntry], name: &str) -> Result<String, ExportError> {
    let entry = entries
        .iter()
        .find(|entry| entry.name == name)
        .ok_or_else(|| ExportError::DatasetNotFound(name.to_string()))?;
    match entry.download_link.as_deref() {
        Some(link) if !link.trim().is_empty() => Ok(link.to_string()),
        _ => Err(ExportError::CatalogParse(format!(
            "catalog entry {name} has no downloadLink"
        ))),
    }
}
