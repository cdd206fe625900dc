use std::{fmt, process::ExitCode};

use error_stack::{report, Context, Report, Result, ResultExt};

/// Ingestion error.
///
/// Transient read failures (a missing block, a zero or unparseable raw value) are not errors:
/// adapters report them as [crate::Derivation::Skipped] and the run continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestError {
    /// Configuration error. Fatal at startup, should not retry.
    Configuration,
    /// Chain oracle, aggregator or sink unreachable. Aborts the run, retry on the next trigger.
    Connectivity,
    /// The sink accepted the writes but failed to commit them.
    Flush,
    /// The cursor store failed.
    Persistence,
    /// The run was cancelled before advancing its checkpoint.
    Cancelled,
    /// Anything else.
    Fatal,
}

impl Context for IngestError {}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Configuration => f.write_str("ingest error: configuration"),
            IngestError::Connectivity => f.write_str("ingest error: connectivity"),
            IngestError::Flush => f.write_str("ingest error: flush"),
            IngestError::Persistence => f.write_str("ingest error: persistence"),
            IngestError::Cancelled => f.write_str("ingest error: cancelled"),
            IngestError::Fatal => f.write_str("ingest error: fatal"),
        }
    }
}

impl IngestError {
    pub fn configuration(reason: &str) -> Report<IngestError> {
        report!(IngestError::Configuration).attach_printable(reason.to_string())
    }

    pub fn connectivity(reason: &str) -> Report<IngestError> {
        report!(IngestError::Connectivity).attach_printable(reason.to_string())
    }

    pub fn flush(reason: &str) -> Report<IngestError> {
        report!(IngestError::Flush).attach_printable(reason.to_string())
    }

    pub fn persistence(reason: &str) -> Report<IngestError> {
        report!(IngestError::Persistence).attach_printable(reason.to_string())
    }

    pub fn fatal(reason: &str) -> Report<IngestError> {
        report!(IngestError::Fatal).attach_printable(reason.to_string())
    }
}

pub trait ReportExt {
    fn to_exit_code(&self) -> ExitCode;
}

impl<T> ReportExt for Result<T, IngestError> {
    fn to_exit_code(&self) -> ExitCode {
        match self {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{:?}", err);
                // Exit codes based on sysexits.h
                match err.current_context() {
                    IngestError::Configuration => ExitCode::from(78),
                    IngestError::Connectivity | IngestError::Flush => ExitCode::from(75),
                    IngestError::Persistence => ExitCode::from(74),
                    IngestError::Cancelled => ExitCode::SUCCESS,
                    IngestError::Fatal => ExitCode::FAILURE,
                }
            }
        }
    }
}

pub trait IngestErrorResultExt {
    type Ok;

    fn configuration(self, reason: &str) -> Result<Self::Ok, IngestError>;
    fn connectivity(self, reason: &str) -> Result<Self::Ok, IngestError>;
    fn flush(self, reason: &str) -> Result<Self::Ok, IngestError>;
    fn persistence(self, reason: &str) -> Result<Self::Ok, IngestError>;
    fn fatal(self, reason: &str) -> Result<Self::Ok, IngestError>;
}

impl<T, C> IngestErrorResultExt for core::result::Result<T, C>
where
    C: Context,
{
    type Ok = T;

    fn configuration(self, reason: &str) -> Result<T, IngestError> {
        self.change_context(IngestError::Configuration)
            .attach_printable(reason.to_string())
    }

    fn connectivity(self, reason: &str) -> Result<T, IngestError> {
        self.change_context(IngestError::Connectivity)
            .attach_printable(reason.to_string())
    }

    fn flush(self, reason: &str) -> Result<T, IngestError> {
        self.change_context(IngestError::Flush)
            .attach_printable(reason.to_string())
    }

    fn persistence(self, reason: &str) -> Result<T, IngestError> {
        self.change_context(IngestError::Persistence)
            .attach_printable(reason.to_string())
    }

    fn fatal(self, reason: &str) -> Result<T, IngestError> {
        self.change_context(IngestError::Fatal)
            .attach_printable(reason.to_string())
    }
}

pub trait IngestErrorReportExt {
    fn configuration(self, reason: &str) -> Report<IngestError>;
    fn connectivity(self, reason: &str) -> Report<IngestError>;
    fn fatal(self, reason: &str) -> Report<IngestError>;
}

impl<C> IngestErrorReportExt for Report<C> {
    fn configuration(self, reason: &str) -> Report<IngestError> {
        self.change_context(IngestError::Configuration)
            .attach_printable(reason.to_string())
    }

    fn connectivity(self, reason: &str) -> Report<IngestError> {
        self.change_context(IngestError::Connectivity)
            .attach_printable(reason.to_string())
    }

    fn fatal(self, reason: &str) -> Report<IngestError> {
        self.change_context(IngestError::Fatal)
            .attach_printable(reason.to_string())
    }
}
