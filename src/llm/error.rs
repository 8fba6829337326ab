use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Failed to create HTTP client: {0}")]
    HttpClientCreationError(reqwest::Error),

    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Language model API error (status {status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Language model returned no candidates{}", .0.as_ref().map(|r| format!(" (blocked: {})", r)).unwrap_or_default())]
    NoCandidates(Option<String>),

    #[error("Language model error: {0}")]
    Other(String),
}
