use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use std::time::Duration;

use crate::event::EventPayload;
use crate::output_writer::EventSink;

const API_KEY_HEADER: &str = "Api-Key";

/// Posts custom events to the New Relic Insights collector.
#[derive(Clone)]
pub struct InsightsClient {
    client: reqwest::Client,
    events_url: String,
}

impl InsightsClient {
    pub fn new(
        base_url: &str,
        account_id: &str,
        api_key: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut key =
            HeaderValue::from_str(api_key).context("API key is not a valid header value")?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .default_headers(headers)
            .build()
            .context("failed to create Insights HTTP client")?;

        Ok(Self {
            client,
            events_url: events_url(base_url, account_id),
        })
    }

    pub fn events_url(&self) -> &str {
        &self.events_url
    }
}

fn events_url(base_url: &str, account_id: &str) -> String {
    format!(
        "{}/v1/accounts/{}/events",
        base_url.trim_end_matches('/'),
        account_id.trim()
    )
}

#[async_trait]
impl EventSink for InsightsClient {
    async fn send_event(&self, payload: &EventPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.events_url)
            .json(payload)
            .send()
            .await
            .context("Insights request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return Err(anyhow!("Insights returned {status}: {preview}"));
        }
        Ok(())
    }
}
