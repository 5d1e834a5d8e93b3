use std::time::Duration;

use careline_domain::notify::CrmEvent;
use careline_domain::ports::notify::{CrmError, CrmPublisher};
use careline_domain::ports::BoxFuture;

use crate::config::AppConfig;

const CRM_TOKEN_HEADER: &str = "X-Crm-Token";

/// Thin outbound client for the marketing CRM. Callers treat every failure
/// as best-effort; this client only classifies them for logging.
#[derive(Clone)]
pub struct HttpCrmPublisher {
    client: reqwest::Client,
    base_url: String,
    token: String,
    enabled: bool,
}

impl HttpCrmPublisher {
    pub fn from_config(config: &AppConfig) -> Result<Self, CrmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.crm_timeout_ms))
            .build()
            .map_err(|err| CrmError::Configuration(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.crm_base_url.trim_end_matches('/').to_string(),
            token: config.crm_token.clone(),
            enabled: config.crm_enabled,
        })
    }
}

impl CrmPublisher for HttpCrmPublisher {
    fn publish(&self, event: &CrmEvent) -> BoxFuture<'_, Result<(), CrmError>> {
        let event = event.clone();
        Box::pin(async move {
            if !self.enabled {
                tracing::debug!(event_type = %event.event_type, "crm publishing disabled; dropping event");
                return Ok(());
            }

            let url = format!("{}/events", self.base_url);
            let response = self
                .client
                .post(&url)
                .header(CRM_TOKEN_HEADER, &self.token)
                .json(&event)
                .send()
                .await
                .map_err(|err| CrmError::Transport(err.to_string()))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let body = response.text().await.unwrap_or_default();
            Err(CrmError::Upstream(format!("{status}: {body}")))
        })
    }
}
