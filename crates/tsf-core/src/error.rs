//! Error types for the trigger scale factor workspace

use thiserror::Error;

/// Workspace-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Lookup of an unknown catalog object
    #[error("{kind} not found: '{name}'")]
    NotFound {
        /// Object kind (dataset, process, ...)
        kind: &'static str,
        /// Requested name
        name: String,
    },

    /// Expression referenced a column that is neither read nor defined
    #[error("column not found: '{column}' ({context})")]
    ColumnNotFound {
        /// Missing column name
        column: String,
        /// Where the column was referenced
        context: String,
    },

    /// Malformed selection or weight expression
    #[error("Expression error: {0}")]
    Expression(String),

    /// Setup defect in the analysis configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input data problem (missing files, unreadable columns)
    #[error("Data error: {0}")]
    Data(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Cyclic stage dependencies
    #[error("dependency cycle: {0}")]
    DependencyCycle(String),

    /// A pipeline stage failed
    #[error("stage {stage} failed: {source}")]
    Stage {
        /// Canonical key of the failing stage
        stage: String,
        /// Underlying error
        source: Box<Error>,
    },
}

impl Error {
    /// Innermost error, looking through [`Error::Stage`] wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// `true` for errors caused by the analysis setup rather than the data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::NotFound { .. }
                | Error::Expression(_)
                | Error::Config(_)
                | Error::DependencyCycle(_)
                | Error::ColumnNotFound { .. }
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
