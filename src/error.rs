//! Error taxonomy shared by the pipeline and both front ends.

use thiserror::Error;

/// HTTP-equivalent classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 400: the caller sent something unusable.
    ClientInput,
    /// 500: the request was fine but processing failed.
    ProcessingFailure,
}

impl StatusClass {
    pub fn http_status(self) -> u16 {
        match self {
            StatusClass::ClientInput => 400,
            StatusClass::ProcessingFailure => 500,
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            StatusClass::ClientInput => 2,
            StatusClass::ProcessingFailure => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum PanelError {
    /// Bad year order, unsupported tier combination, non-numeric year.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Source unreachable or missing year columns. Safe to retry.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// Writing a spreadsheet, statistical file or bundle failed.
    #[error("export failed: {0}")]
    ExportFailure(String),
}

impl PanelError {
    pub fn status_class(&self) -> StatusClass {
        match self {
            PanelError::InvalidRequest(_) => StatusClass::ClientInput,
            PanelError::DataUnavailable(_) | PanelError::ExportFailure(_) => {
                StatusClass::ProcessingFailure
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PanelError::DataUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, PanelError>;
