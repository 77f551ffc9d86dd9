use thiserror::Error;

/// Errors from application metadata lookups.
#[derive(Debug, Error)]
pub enum ApplicationError {
  /// A mandatory request parameter was empty.
  #[error("missing required parameter: {0}")]
  MissingRequiredParameter(&'static str),

  /// The service base URL cannot be used to build request URLs.
  #[error("invalid base url '{url}': {message}")]
  InvalidBaseUrl { url: String, message: String },

  /// The request could not be sent or its body could not be read.
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// The service answered with a non-success status other than not found.
  #[error("application service returned {status}: {body}")]
  Status { status: u16, body: String },
}
