use thiserror::Error;

/// Failures raised by the automation core and the reconciliation layer.
///
/// The first five variants are the operational taxonomy the orchestrator
/// reasons about; the rest are plumbing.
#[derive(Error, Debug)]
pub enum AutomationError {
    /// An expected group of controls could not be assembled. The driven
    /// application's screen probably changed.
    #[error("Structural mismatch: {0}")]
    StructuralMismatch(String),

    /// A primitive could not verify its effect after all retries.
    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The driven application reported a business error through a modal.
    #[error("Driven application reported an error: {0}")]
    ForeignError(String),

    /// A result could not be resolved back to a row of the store.
    #[error("Unmapped row: {0}")]
    UnmappedRow(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AutomationError {
    /// Failures that only cost the current record; the batch carries on.
    pub fn is_per_record(&self) -> bool {
        matches!(
            self,
            AutomationError::Timeout(_)
                | AutomationError::ForeignError(_)
                | AutomationError::UnmappedRow(_)
                | AutomationError::ActionFailed(_)
                | AutomationError::StructuralMismatch(_)
        )
    }
}

impl From<std::io::Error> for AutomationError {
    fn from(error: std::io::Error) -> Self {
        AutomationError::Artifact(format!("I/O error: {error}"))
    }
}

impl From<csv::Error> for AutomationError {
    fn from(error: csv::Error) -> Self {
        AutomationError::Artifact(format!("CSV error: {error}"))
    }
}

impl From<serde_json::Error> for AutomationError {
    fn from(error: serde_json::Error) -> Self {
        AutomationError::Artifact(format!("JSON error: {error}"))
    }
}
