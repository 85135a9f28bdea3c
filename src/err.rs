//! Error types for report generation.

use std::process::{ExitCode, Termination};

/// Errors raised while preparing or writing a report.
///
/// Functions generally return `anyhow::Error`; these values are wrapped into it so that
/// callers can `downcast_ref::<ReportError>()` where they need to distinguish failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    /// No result database was given.
    #[error("No result database given")]
    NoInput,
    /// The result database is missing or not a result database.
    #[error("Wrong input: {0}")]
    WrongInput(String),
    /// The report could not be set up.
    #[error("Setup failed: {0}")]
    Setup(String),
    /// Columns required by the report writer are not in the result database.
    #[error("Mandatory columns missing from {path}: {}", columns.join(", "))]
    MissingMandatoryColumns { path: String, columns: Vec<String> },
    /// A connection to the result database could not be used.
    #[error("Database connection error: {0}")]
    DatabaseConnection(String),
    /// The requested module is not known.
    #[error("Module does not exist: {0}")]
    ModuleNotExist(String),
    /// A column definition in a header table could not be interpreted.
    #[error("Invalid column definition for {column}: {reason}")]
    InvalidColumnDef { column: String, reason: String },
    /// The filter could not be parsed or is not applicable.
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
}

impl Termination for ReportError {
    fn report(self) -> ExitCode {
        match self {
            ReportError::NoInput | ReportError::WrongInput(_) => ExitCode::from(2),
            ReportError::Setup(_) | ReportError::ModuleNotExist(_) => ExitCode::from(3),
            ReportError::MissingMandatoryColumns { .. } => ExitCode::from(4),
            ReportError::DatabaseConnection(_) => ExitCode::from(5),
            ReportError::InvalidColumnDef { .. } | ReportError::InvalidFilter(_) => {
                ExitCode::from(1)
            }
        }
    }
}
