//! Reader for R's `saveRDS` format: a gzip (or uncompressed) wrapper around
//! the XDR serialization stream, versions 2 and 3.

mod object;
mod reader;

use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::MultiGzDecoder;

pub use object::{
    Attributes, EnvId, EnvRef, Environment, Marker, NULL_SLOT_SENTINEL, RObject, RVersion,
    RdsFile, SpecialEnv, Vector, factor_levels, format_r_number,
};

use crate::error::ExportError;
use reader::XdrReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl Compression {
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&[0x1f, 0x8b]) {
            Compression::Gzip
        } else if bytes.starts_with(b"BZh") {
            Compression::Bzip2
        } else if bytes.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Compression::Xz
        } else {
            Compression::None
        }
    }
}

pub fn read_rds(path: &Path) -> Result<RdsFile, ExportError> {
    let bytes = fs::read(path)
        .map_err(|err| ExportError::Filesystem(format!("read {}: {err}", path.display())))?;
    parse_rds(&bytes)
}

pub fn parse_rds(bytes: &[u8]) -> Result<RdsFile, ExportError> {
    match Compression::detect(bytes) {
        Compression::None => XdrReader::new(bytes).read_file(),
        Compression::Gzip => {
            let mut decoded = Vec::new();
            MultiGzDecoder::new(bytes)
                .read_to_end(&mut decoded)
                .map_err(|err| ExportError::Deserialization(format!("gzip: {err}")))?;
            tracing::debug!(
                compressed = bytes.len(),
                decompressed = decoded.len(),
                "inflated rds stream"
            );
            XdrReader::new(&decoded).read_file()
        }
        Compression::Bzip2 => Err(ExportError::UnsupportedCompression("bzip2".to_string())),
        Compression::Xz => Err(ExportError::UnsupportedCompression("xz".to_string())),
    }
}
