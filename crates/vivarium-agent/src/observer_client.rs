//! Reporting back to the observer.
//!
//! Best-effort by design: a missed activity report or heartbeat is logged and
//! forgotten, never fatal; the sync validator reconciles any drift.

use std::time::Duration;

use serde::Deserialize;

use vivarium_core::{EventKind, OracleMessage};

const LOOPBACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ObserverClient {
    base_url: String,
    internal_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CountsBody {
    live: u64,
    die: u64,
}

#[derive(Deserialize)]
struct PendingOracleBody {
    message: Option<OracleMessage>,
}

impl ObserverClient {
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

    pub async fn report_activity(&self, kind: EventKind, payload: &str) {
        let body = serde_json::json!({ "kind": kind.as_str(), "payload": payload });
        self.post("/api/internal/activity", &body).await;
    }

    pub async fn report_thought(&self, text: &str) {
        self.report_activity(EventKind::Think, text).await;
    }

    pub async fn heartbeat(&self, model: &str) {
        let body = serde_json::json!({ "model": model });
        self.post("/api/internal/heartbeat", &body).await;
    }

    pub async fn report_identity(&self, life_number: u64, name: &str, icon: &str, pronoun: &str) {
        let body = serde_json::json!({
            "life_number": life_number,
            "name": name,
            "icon": icon,
            "pronoun": pronoun,
        });
        self.post("/api/internal/identity", &body).await;
    }

    pub async fn vote_counts(&self) -> Option<(u64, u64)> {
        let res = self
            .client
            .get(format!("{}/api/votes", self.base_url))
            .send()
            .await
            .ok()?;
        let counts: CountsBody = res.json().await.ok()?;
        Some((counts.live, counts.die))
    }

    pub async fn pending_oracle(&self) -> Option<OracleMessage> {
        let res = self
            .client
            .get(format!("{}/api/internal/oracle/pending", self.base_url))
            .header("X-Internal-Key", &self.internal_key)
            .send()
            .await
            .ok()?;
        let body: PendingOracleBody = res.json().await.ok()?;
        body.message
    }

    pub async fn ack_oracle(&self, id: u64) {
        let body = serde_json::json!({ "id": id });
        self.post("/api/internal/oracle/ack", &body).await;
    }

    async fn post(&self, path: &str, body: &serde_json::Value) {
        let result = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-Internal-Key", &self.internal_key)
            .json(body)
            .send()
            .await;
        match result {
            Ok(res) if !res.status().is_success() => {
                tracing::warn!(
                    target: "vivarium::observer_client",
                    path,
                    status = res.status().as_u16(),
                    "observer rejected report"
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: "vivarium::observer_client",
                    path,
                    error = %err,
                    "observer unreachable"
                );
            }
            _ => {}
        }
    }
}
