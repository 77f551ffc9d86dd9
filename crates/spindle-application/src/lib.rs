//! Spindle Application
//!
//! Looks up application metadata by account and application name.
//!
//! - [`ApplicationService`] is the lookup contract. A missing application is
//!   `Ok(None)`, never an error.
//! - [`HttpApplicationService`] implements it against the metadata service's
//!   HTTP API.

mod error;
mod http;

pub use error::ApplicationError;
pub use http::HttpApplicationService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Metadata describing one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
  pub name: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
  /// Everything else the service returned.
  #[serde(flatten)]
  pub attributes: serde_json::Map<String, serde_json::Value>,
}

#[async_trait]
pub trait ApplicationService: Send + Sync {
  /// Fetch an application, or `None` if the service does not know it.
  async fn get_application(
    &self,
    account: &str,
    name: &str,
  ) -> Result<Option<Application>, ApplicationError>;
}

/// Reject blank request parameters before any I/O.
pub(crate) fn require(parameter: &'static str, value: &str) -> Result<(), ApplicationError> {
  if value.trim().is_empty() {
    return Err(ApplicationError::MissingRequiredParameter(parameter));
  }
  Ok(())
}
