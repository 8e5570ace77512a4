use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use pdxe_export::app::App;
use pdxe_export::catalog::OrcestraHttpClient;
use pdxe_export::config::ExportConfig;
use pdxe_export::error::ExportError;
use pdxe_export::output::{JsonOutput, TracingSink};

#[derive(Parser)]
#[command(name = "pdxe-export")]
#[command(
    about = "Download the PDXE XevaSet from ORCESTRA and export expression, model, design and experiment tables as CSV"
)]
#[command(version, author)]
struct Cli {}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ExportError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ExportError) -> u8 {
    match error {
        ExportError::DatasetNotFound(_) => 2,
        error if error.is_network() => 3,
        ExportError::Deserialization(_)
        | ExportError::UnsupportedCompression(_)
        | ExportError::Extraction(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let Cli {} = Cli::parse();

    let config = ExportConfig::default();
    let client = OrcestraHttpClient::new(config.catalog_url())?;
    let app = App::new(config, client);
    let result = app.export(&TracingSink)?;
    JsonOutput::print_export(&result).into_diagnostic()?;
    Ok(())
}
