use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid input: expected an array of rows, received {0}")]
    InvalidInput(String),
    #[error("extraction format error: {0}")]
    ExtractionFormat(String),
    #[error("no data extracted from {0}")]
    NoDataExtracted(String),
    #[error("oracle request failed: {0}")]
    Oracle(String),
    #[error("operation superseded by a newer request")]
    Superseded,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Single human-readable line shown to the user when a flow fails.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::InvalidInput(shape) => {
                format!("The extracted data is not a list of rows (received {shape}).")
            }
            PipelineError::ExtractionFormat(_) => {
                "Failed to parse the model's response. The extraction service did not return a JSON array of records.".to_string()
            }
            PipelineError::NoDataExtracted(name) => {
                format!("No data could be extracted from {name}. Please check the source document.")
            }
            PipelineError::Oracle(reason) => {
                format!("The extraction service could not process the file: {reason}")
            }
            PipelineError::Superseded => "The upload was cancelled.".to_string(),
            PipelineError::Io(err) => format!("Failed to read the file: {err}"),
            PipelineError::SerdeJson(err) => format!("Failed to decode data: {err}"),
        }
    }

    pub fn is_format_error(&self) -> bool {
        matches!(self, PipelineError::ExtractionFormat(_))
    }
}
