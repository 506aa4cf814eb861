//! Outbound traffic guard.
//!
//! Every HTTP request the entity makes leaves through here. Request payloads,
//! auth headers, and response bodies are scanned against the secret patterns;
//! matches are quarantined into the private vault (never served anywhere) and
//! a sanitized traffic record is appended for the public side. Callers that
//! mirror any of this text into events must use [`TrafficGuard::redact`].

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use vivarium_core::{sanitize_url, SecretScanner};

#[derive(Debug, Serialize)]
struct VaultRecord<'a> {
    timestamp: String,
    host: &'a str,
    pattern_name: &'a str,
    redacted_value: String,
    full_value: &'a str,
}

#[derive(Debug, Serialize)]
struct TrafficRecord {
    timestamp: String,
    method: String,
    url: String,
    status: Option<u16>,
}

/// The guarded HTTP client.
pub struct TrafficGuard {
    client: reqwest::Client,
    scanner: Arc<SecretScanner>,
    vault_path: PathBuf,
    traffic_path: PathBuf,
    /// Values already quarantined this process, so a key that rides along on
    /// every call is captured once, not thousands of times.
    seen: Mutex<HashSet<String>>,
}

pub struct GuardedResponse {
    pub status: u16,
    pub body: String,
}

impl TrafficGuard {
    pub fn new(scanner: Arc<SecretScanner>, vault_path: PathBuf, timeout: Duration) -> Self {
        let traffic_path = vault_path
            .parent()
            .map(|p| p.join("traffic.jsonl"))
            .unwrap_or_else(|| PathBuf::from("traffic.jsonl"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            scanner,
            vault_path,
            traffic_path,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// GET, scanned on the way out and back.
    pub async fn get(&self, url: &str) -> Result<GuardedResponse, reqwest::Error> {
        self.send(reqwest::Method::GET, url, None, None).await
    }

    /// POST a JSON body, scanned on the way out and back.
    pub async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<GuardedResponse, reqwest::Error> {
        self.send(reqwest::Method::POST, url, bearer, Some(body)).await
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer: Option<&str>,
        body: Option<&serde_json::Value>,
    ) -> Result<GuardedResponse, reqwest::Error> {
        let host = host_of(url);

        if let Some(body) = body {
            let raw = body.to_string();
            self.quarantine(&host, &raw);
        }
        if let Some(token) = bearer {
            self.quarantine(&host, &format!("Bearer {token}"));
        }

        let mut request = self.client.request(method.clone(), url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let result = request.send().await;
        let (status, body_text) = match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                (Some(status), text)
            }
            Err(err) => {
                self.record_traffic(method.as_str(), url, None);
                return Err(err);
            }
        };

        self.quarantine(&host, &body_text);
        self.record_traffic(method.as_str(), url, status);

        Ok(GuardedResponse {
            status: status.unwrap_or(0),
            body: body_text,
        })
    }

    /// Sanitize text before it is mirrored anywhere public.
    pub fn redact(&self, text: &str) -> String {
        self.scanner.redact(text).0
    }

    fn quarantine(&self, host: &str, text: &str) {
        let hits = self.scanner.scan(text);
        if hits.is_empty() {
            return;
        }
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        for hit in &hits {
            if !seen.insert(hit.value.clone()) {
                continue;
            }
            let record = VaultRecord {
                timestamp: Utc::now().to_rfc3339(),
                host,
                pattern_name: hit.pattern_name,
                redacted_value: hit.redacted_value(),
                full_value: &hit.value,
            };
            if let Err(err) = self.append_jsonl(&self.vault_path, &record) {
                tracing::error!(target: "vivarium::guard", error = %err, "vault write failed");
            } else {
                tracing::info!(
                    target: "vivarium::guard",
                    host,
                    pattern = hit.pattern_name,
                    value = %hit.redacted_value(),
                    "secret quarantined"
                );
            }
        }
    }

    fn record_traffic(&self, method: &str, url: &str, status: Option<u16>) {
        let record = TrafficRecord {
            timestamp: Utc::now().to_rfc3339(),
            method: method.to_string(),
            url: sanitize_url(url),
            status,
        };
        if let Err(err) = self.append_jsonl(&self.traffic_path, &record) {
            tracing::debug!(target: "vivarium::guard", error = %err, "traffic log write failed");
        }
    }

    fn append_jsonl<T: Serialize>(&self, path: &PathBuf, record: &T) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")
    }
}

fn host_of(url: &str) -> String {
    url.split("://")
        .nth(1)
        .and_then(|rest| rest.split('/').next())
        .unwrap_or(url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn guard(dir: &TempDir) -> TrafficGuard {
        TrafficGuard::new(
            Arc::new(SecretScanner::new()),
            dir.path().join("vault").join("secrets.jsonl"),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn quarantine_writes_once_per_value() {
        let dir = TempDir::new().unwrap();
        let g = guard(&dir);
        let text = "leaked sk-abcdefghijklmnopqrstuvwxyz123456 twice";
        g.quarantine("example.com", text);
        g.quarantine("example.com", text);
        let vault = std::fs::read_to_string(dir.path().join("vault").join("secrets.jsonl")).unwrap();
        assert_eq!(vault.lines().count(), 1);
        let record: serde_json::Value = serde_json::from_str(vault.lines().next().unwrap()).unwrap();
        assert_eq!(record["pattern_name"], "anthropic_key");
        assert_eq!(record["host"], "example.com");
        assert!(record["redacted_value"].as_str().unwrap().ends_with('…'));
    }

    #[test]
    fn clean_text_leaves_no_vault() {
        let dir = TempDir::new().unwrap();
        let g = guard(&dir);
        g.quarantine("example.com", "nothing secret here");
        assert!(!dir.path().join("vault").join("secrets.jsonl").exists());
    }

    #[test]
    fn redact_strips_secrets_for_public_mirrors() {
        let dir = TempDir::new().unwrap();
        let g = guard(&dir);
        let out = g.redact("token sk-abcdefghijklmnopqrstuvwxyz123456 done");
        assert!(!out.contains("sk-abcdefghijk"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://api.example.com/v1/x"), "api.example.com");
        assert_eq!(host_of("plain-string"), "plain-string");
    }
}
