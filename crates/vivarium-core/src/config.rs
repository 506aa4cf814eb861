//! Service configuration loaded from the environment.
//!
//! One struct per process. Unset optional variables fall back to the defaults
//! documented on each field; missing required secrets are hard errors at
//! startup, not at first use.

use std::net::IpAddr;
use std::path::PathBuf;

use crate::error::CoreError;

/// An `a.b.c.d/n` (or IPv6) network used for the admin-local check and the
/// trusted-proxy set. Containment works on the raw address bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrRange {
    network: u128,
    prefix: u8,
    v4: bool,
}

impl CidrRange {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some(parts) => parts,
            None => (s, ""),
        };
        let addr: IpAddr = addr_part
            .trim()
            .parse()
            .map_err(|_| CoreError::Validation(format!("bad CIDR address: {s}")))?;
        let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
        let prefix: u8 = if prefix_part.is_empty() {
            max_prefix
        } else {
            prefix_part
                .trim()
                .parse()
                .map_err(|_| CoreError::Validation(format!("bad CIDR prefix: {s}")))?
        };
        if prefix > max_prefix {
            return Err(CoreError::Validation(format!("CIDR prefix out of range: {s}")));
        }
        Ok(Self {
            network: Self::bits(addr) & Self::mask(prefix, addr.is_ipv4()),
            prefix,
            v4: addr.is_ipv4(),
        })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        if addr.is_ipv4() != self.v4 {
            return false;
        }
        Self::bits(addr) & Self::mask(self.prefix, self.v4) == self.network
    }

    fn bits(addr: IpAddr) -> u128 {
        match addr {
            IpAddr::V4(v4) => u32::from(v4) as u128,
            IpAddr::V6(v6) => u128::from(v6),
        }
    }

    fn mask(prefix: u8, v4: bool) -> u128 {
        let width: u32 = if v4 { 32 } else { 128 };
        if prefix == 0 {
            0
        } else {
            (!0u128) << (width - prefix as u32) & if v4 { 0xffff_ffff } else { !0u128 }
        }
    }
}

/// Observer-side configuration.
#[derive(Debug, Clone)]
pub struct ObserverConfig {
    /// Listen address (`OBSERVER_BIND`, default `0.0.0.0:8000`).
    pub bind_addr: String,
    /// Base URL of the agent's loopback API (`AGENT_API_URL`, default `http://127.0.0.1:8001`).
    pub agent_url: String,
    /// Shared secret for internal endpoints (`INTERNAL_API_KEY`, required).
    pub internal_api_key: String,
    /// Bearer token for remote admin access (`ADMIN_TOKEN`, required).
    pub admin_token: String,
    /// Network treated as admin-local (`LOCAL_NETWORK_CIDR`, default `192.168.0.0/24`).
    pub local_network: CidrRange,
    /// Peers whose forwarded-for headers are honored (`TRUSTED_PROXY_CIDRS`, comma separated).
    pub trusted_proxies: Vec<CidrRange>,
    /// Salt for voter fingerprints (`IP_SALT`, required).
    pub ip_salt: String,
    /// Respawn delay bounds in seconds (`RESPAWN_DELAY_MIN_S`/`RESPAWN_DELAY_MAX_S`, default 10/60).
    pub respawn_delay_min_s: u64,
    pub respawn_delay_max_s: u64,
    /// Sync validator cadence (`SYNC_INTERVAL_S`, default 30).
    pub sync_interval_s: u64,
    /// Vote round duration (`VOTING_WINDOW_S`, default 3600).
    pub voting_window_s: u64,
    /// Budget poll cadence (`BUDGET_POLL_INTERVAL_S`, default 30).
    pub budget_poll_interval_s: u64,
    /// Root for observer.db, memories/, workspace/ (`DATA_DIR`, default `./data`).
    pub data_dir: PathBuf,
}

impl ObserverConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        let trusted_proxies = env_opt("TRUSTED_PROXY_CIDRS")
            .map(|raw| {
                raw.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(CidrRange::parse)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            bind_addr: env_or("OBSERVER_BIND", "0.0.0.0:8000"),
            agent_url: env_or("AGENT_API_URL", "http://127.0.0.1:8001"),
            internal_api_key: env_required("INTERNAL_API_KEY")?,
            admin_token: env_required("ADMIN_TOKEN")?,
            local_network: CidrRange::parse(&env_or("LOCAL_NETWORK_CIDR", "192.168.0.0/24"))?,
            trusted_proxies,
            ip_salt: env_required("IP_SALT")?,
            respawn_delay_min_s: env_u64("RESPAWN_DELAY_MIN_S", 10),
            respawn_delay_max_s: env_u64("RESPAWN_DELAY_MAX_S", 60),
            sync_interval_s: env_u64("SYNC_INTERVAL_S", 30),
            voting_window_s: env_u64("VOTING_WINDOW_S", 3600),
            budget_poll_interval_s: env_u64("BUDGET_POLL_INTERVAL_S", 30),
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),
        })
    }
}

/// Agent-side configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Loopback listen address (`AGENT_BIND`, default `127.0.0.1:8001`).
    pub bind_addr: String,
    /// Observer base URL (`OBSERVER_URL`, default `http://127.0.0.1:8000`).
    pub observer_url: String,
    /// Shared secret for internal endpoints (`INTERNAL_API_KEY`, required).
    pub internal_api_key: String,
    /// Model gateway API key (`MODEL_GATEWAY_KEY`, required).
    pub model_gateway_key: String,
    /// Model gateway base URL (`MODEL_GATEWAY_URL`, OpenRouter-compatible default).
    pub model_gateway_url: String,
    /// Monthly budget in USD (`MONTHLY_BUDGET_USD`, default 5.00).
    pub monthly_budget_usd: f64,
    /// Minimum balance required to switch models (`MODEL_SWITCH_FLOOR_USD`, default 0.10).
    pub model_switch_floor_usd: f64,
    /// Think interval bounds (`THINK_INTERVAL_MIN_S`/`THINK_INTERVAL_MAX_S`, default 60/300).
    pub think_interval_min_s: u64,
    pub think_interval_max_s: u64,
    /// Root for credits/, workspace/, vault/ (`DATA_DIR`, default `./data`).
    pub data_dir: PathBuf,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, CoreError> {
        Ok(Self {
            bind_addr: env_or("AGENT_BIND", "127.0.0.1:8001"),
            observer_url: env_or("OBSERVER_URL", "http://127.0.0.1:8000"),
            internal_api_key: env_required("INTERNAL_API_KEY")?,
            model_gateway_key: env_required("MODEL_GATEWAY_KEY")?,
            model_gateway_url: env_or(
                "MODEL_GATEWAY_URL",
                "https://openrouter.ai/api/v1/chat/completions",
            ),
            monthly_budget_usd: env_f64("MONTHLY_BUDGET_USD", 5.00),
            model_switch_floor_usd: env_f64("MODEL_SWITCH_FLOOR_USD", 0.10),
            think_interval_min_s: env_u64("THINK_INTERVAL_MIN_S", 60),
            think_interval_max_s: env_u64("THINK_INTERVAL_MAX_S", 300),
            data_dir: PathBuf::from(env_or("DATA_DIR", "./data")),
        })
    }

    pub fn credits_file(&self) -> PathBuf {
        self.data_dir.join("credits").join("balance.json")
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.data_dir.join("workspace")
    }

    pub fn vault_file(&self) -> PathBuf {
        self.data_dir.join("vault").join("secrets.jsonl")
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_required(name: &str) -> Result<String, CoreError> {
    env_opt(name).ok_or_else(|| CoreError::Validation(format!("{name} is required")))
}

fn env_u64(name: &str, default: u64) -> u64 {
    env_opt(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(name: &str, default: f64) -> f64 {
    env_opt(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_v4_containment() {
        let net = CidrRange::parse("192.168.0.0/24").unwrap();
        assert!(net.contains("192.168.0.42".parse().unwrap()));
        assert!(!net.contains("192.168.1.42".parse().unwrap()));
        assert!(!net.contains("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn cidr_v6_containment() {
        let net = CidrRange::parse("2606:4700::/32").unwrap();
        assert!(net.contains("2606:4700:1:2::3".parse().unwrap()));
        assert!(!net.contains("2607:4700::1".parse().unwrap()));
        // Family mismatch never matches.
        assert!(!net.contains("192.168.0.1".parse().unwrap()));
    }

    #[test]
    fn cidr_bare_address_is_host_route() {
        let net = CidrRange::parse("127.0.0.1").unwrap();
        assert!(net.contains("127.0.0.1".parse().unwrap()));
        assert!(!net.contains("127.0.0.2".parse().unwrap()));
    }

    #[test]
    fn cidr_rejects_garbage() {
        assert!(CidrRange::parse("not-a-net/8").is_err());
        assert!(CidrRange::parse("10.0.0.0/33").is_err());
    }
}
