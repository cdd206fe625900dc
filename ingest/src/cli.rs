use std::path::Path;

use anstyle::{AnsiColor, Style};
use clap::builder::Styles;
use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::info;
use yieldline_observability::init_opentelemetry;

use crate::error::{IngestError, IngestErrorReportExt, IngestErrorResultExt};

/// Initialize opentelemetry and the sigint (ctrl-c) handler.
pub fn initialize(
    package_name: &'static str,
    package_version: &'static str,
    ct: CancellationToken,
) -> Result<(), IngestError> {
    init_opentelemetry(package_name, package_version)
        .map_err(|err| err.configuration("failed to initialize opentelemetry"))?;

    set_ctrlc_handler(ct).map_err(|err| err.fatal("failed to setup ctrl-c handler"))?;

    Ok(())
}

/// Connect the cancellation token to the ctrl-c handler.
pub fn set_ctrlc_handler(ct: CancellationToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler({
        move || {
            ct.cancel();
        }
    })
    .attach_printable("failed to register ctrl-c handler")?;

    Ok(())
}

/// Loads the variables of an env file into the process environment.
///
/// Variables already set in the environment take precedence.
pub fn load_environment_variables(path: &Path) -> Result<(), IngestError> {
    dotenvy::from_path(path)
        .configuration("failed to load environment file")
        .attach_printable_lazy(|| format!("path: {:?}", path))?;

    info!(path = ?path, "loaded environment file");

    Ok(())
}

/// A clap style for all yieldline CLI applications.
pub fn yieldline_cli_style() -> Styles {
    Styles::styled()
        .header(Style::new().bold().fg_color(Some(AnsiColor::Green.into())))
        .error(Style::new().bold().fg_color(Some(AnsiColor::Red.into())))
        .usage(Style::new().bold().fg_color(Some(AnsiColor::Green.into())))
        .literal(Style::new().fg_color(Some(AnsiColor::BrightCyan.into())))
        .placeholder(Style::new())
        .valid(Style::new().fg_color(Some(AnsiColor::BrightBlue.into())))
        .invalid(
            Style::new()
                .underline()
                .fg_color(Some(AnsiColor::Red.into())),
        )
}
