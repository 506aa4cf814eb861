//! Loopback client for the agent's internal API.
//!
//! Bounded timeouts, the shared internal key on every call, and retries with
//! backoff on transient failures only; a 4xx from the agent is a contract
//! problem and is surfaced immediately.

use std::time::Duration;

use thiserror::Error;
use vivarium_core::{AgentStateReport, BirthPayload, BudgetReport, ForceSyncPayload};

const LOOPBACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AgentClientError {
    #[error("agent unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("agent rejected the request: {status} {body}")]
    Rejected { status: u16, body: String },
    #[error("agent failed transiently: {status}")]
    Transient { status: u16 },
}

impl AgentClientError {
    fn from_status(status: u16, body: String) -> Self {
        if (400..500).contains(&status) {
            AgentClientError::Rejected { status, body }
        } else {
            AgentClientError::Transient { status }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentClientError::Transport(_) | AgentClientError::Transient { .. }
        )
    }
}

#[derive(Clone)]
pub struct AgentClient {
    base_url: String,
    internal_key: String,
    client: reqwest::Client,
}

impl AgentClient {
    pub fn new(base_url: &str, internal_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LOOPBACK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            internal_key: internal_key.to_string(),
            client,
        }
    }

    pub async fn state(&self) -> Result<AgentStateReport, AgentClientError> {
        let res = self
            .client
            .get(format!("{}/state", self.base_url))
            .header("X-Internal-Key", &self.internal_key)
            .send()
            .await?;
        let status = res.status().as_u16();
        if !res.status().is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(AgentClientError::from_status(status, body));
        }
        Ok(res.json().await?)
    }

    pub async fn budget(&self) -> Result<BudgetReport, AgentClientError> {
        let res = self
            .client
            .get(format!("{}/budget", self.base_url))
            .header("X-Internal-Key", &self.internal_key)
            .send()
            .await?;
        let status = res.status().as_u16();
        if !res.status().is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(AgentClientError::from_status(status, body));
        }
        Ok(res.json().await?)
    }

    /// Deliver a birth, retrying transient failures with a widening backoff.
    /// Permanent rejections come back on the first attempt.
    pub async fn birth(&self, payload: &BirthPayload, attempts: u32) -> Result<(), AgentClientError> {
        let mut last = None;
        for attempt in 1..=attempts.max(1) {
            match self.post_once("/birth", payload).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        target: "vivarium::agent_client",
                        attempt,
                        error = %err,
                        "birth delivery failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(5 * attempt as u64)).await;
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last.unwrap_or(AgentClientError::Transient { status: 0 }))
    }

    pub async fn force_sync(&self, payload: &ForceSyncPayload) -> Result<(), AgentClientError> {
        self.post_once("/force-sync", payload).await
    }

    async fn post_once<T: serde::Serialize>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<(), AgentClientError> {
        let res = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-Internal-Key", &self.internal_key)
            .json(payload)
            .send()
            .await?;
        let status = res.status().as_u16();
        if !res.status().is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(AgentClientError::from_status(status, body));
        }
        Ok(())
    }
}
