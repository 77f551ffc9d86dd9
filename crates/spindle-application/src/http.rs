use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, instrument};

use crate::error::ApplicationError;
use crate::{Application, ApplicationService, require};

/// Application lookups over HTTP.
///
/// Requests go to `GET {base_url}/v2/applications/{name}?account={account}`.
#[derive(Debug, Clone)]
pub struct HttpApplicationService {
  client: Client,
  base_url: Url,
}

impl HttpApplicationService {
  pub fn new(base_url: &str) -> Result<Self, ApplicationError> {
    Self::with_client(Client::new(), base_url)
  }

  pub fn with_client(client: Client, base_url: &str) -> Result<Self, ApplicationError> {
    let parsed = Url::parse(base_url).map_err(|e| ApplicationError::InvalidBaseUrl {
      url: base_url.to_string(),
      message: e.to_string(),
    })?;
    if parsed.cannot_be_a_base() {
      return Err(ApplicationError::InvalidBaseUrl {
        url: base_url.to_string(),
        message: "url cannot be a base".to_string(),
      });
    }
    Ok(Self {
      client,
      base_url: parsed,
    })
  }

  /// The request URL for one lookup.
  pub fn application_url(&self, account: &str, name: &str) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
      segments.pop_if_empty().extend(["v2", "applications", name]);
    }
    url.query_pairs_mut().append_pair("account", account);
    url
  }
}

#[async_trait]
impl ApplicationService for HttpApplicationService {
  #[instrument(name = "application_get", skip(self))]
  async fn get_application(
    &self,
    account: &str,
    name: &str,
  ) -> Result<Option<Application>, ApplicationError> {
    require("account", account)?;
    require("application", name)?;

    let response = self
      .client
      .get(self.application_url(account, name))
      .send()
      .await?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
      debug!("application_not_found");
      return Ok(None);
    }
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(ApplicationError::Status {
        status: status.as_u16(),
        body,
      });
    }

    Ok(Some(response.json().await?))
  }
}
