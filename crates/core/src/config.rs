use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::message::MessageType;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub engine: EngineConfig,
    pub routing: RoutingConfig,
}

/// Well-known env keys that identify a profile when prefixed.
const PROFILE_MARKER_KEYS: &[&str] = &[
    "WORKER_COUNT",
    "MALFORMED_SEND_TIME",
    "SMS_PROVIDER",
    "MMS_PROVIDER",
    "EMAIL_PROVIDER",
];

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `SWITCHBOARD_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("SWITCHBOARD_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            engine: EngineConfig::from_env_profiled(p),
            routing: RoutingConfig::from_env_profiled(p),
        }
    }

    /// Profiles that have at least one `{PROFILE}_{KEY}` variable set, plus
    /// `default`. Sorted.
    pub fn available_profiles() -> Vec<String> {
        let mut profiles: BTreeSet<String> = env::vars()
            .filter_map(|(key, _)| profile_prefix(&key).map(str::to_string))
            .collect();
        profiles.insert("default".to_string());
        profiles.into_iter().collect()
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  engine:      workers={}, malformed_send_time={}",
            self.engine.worker_count,
            self.engine.malformed_send_time
        );
        for (message_type, provider) in self.routing.overrides() {
            tracing::info!("  routing:     {} -> {}", message_type, provider);
        }
    }

    /// Effective settings as JSON, printed by `switchboard config`.
    pub fn summary(&self) -> serde_json::Value {
        let routes: serde_json::Map<String, serde_json::Value> = self
            .routing
            .overrides()
            .into_iter()
            .map(|(message_type, provider)| (message_type.to_string(), provider.into()))
            .collect();
        serde_json::json!({
            "profile": self.profile_label(),
            "worker_count": self.engine.worker_count,
            "malformed_send_time": self.engine.malformed_send_time.to_string(),
            "provider_overrides": routes,
        })
    }
}

/// `PROD` for `PROD_WORKER_COUNT`; `None` for unprefixed or unrelated keys.
fn profile_prefix(key: &str) -> Option<&str> {
    PROFILE_MARKER_KEYS.iter().find_map(|marker| {
        let prefix = key.strip_suffix(marker)?.strip_suffix('_')?;
        let valid = !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_uppercase() || b == b'_');
        valid.then_some(prefix)
    })
}

// ── Engine ────────────────────────────────────────────────────

pub const DEFAULT_WORKER_COUNT: usize = 10;

/// What the scheduler does with a send time it cannot parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedTimePolicy {
    /// Log and deliver immediately.
    #[default]
    SendNow,
    /// Refuse the schedule call.
    Reject,
}

impl fmt::Display for MalformedTimePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedTimePolicy::SendNow => f.write_str("send_now"),
            MalformedTimePolicy::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for MalformedTimePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "send_now" | "now" => Ok(MalformedTimePolicy::SendNow),
            "reject" => Ok(MalformedTimePolicy::Reject),
            other => Err(format!("unknown malformed send time policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub worker_count: usize,
    pub malformed_send_time: MalformedTimePolicy,
}

impl EngineConfig {
    fn from_env_profiled(p: &str) -> Self {
        let worker_count = profiled_env_usize(p, "WORKER_COUNT", DEFAULT_WORKER_COUNT).max(1);
        let policy_raw = profiled_env_or(p, "MALFORMED_SEND_TIME", "send_now");
        let malformed_send_time = policy_raw.parse().unwrap_or_else(|e| {
            tracing::warn!(value = %policy_raw, error = %e, "falling back to send_now");
            MalformedTimePolicy::SendNow
        });
        Self {
            worker_count,
            malformed_send_time,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            malformed_send_time: MalformedTimePolicy::SendNow,
        }
    }
}

// ── Provider routing ──────────────────────────────────────────

/// Optional message type → provider name remaps applied on top of the
/// registry defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub sms_provider: Option<String>,
    pub mms_provider: Option<String>,
    pub email_provider: Option<String>,
}

impl RoutingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            sms_provider: profiled_env_opt(p, "SMS_PROVIDER"),
            mms_provider: profiled_env_opt(p, "MMS_PROVIDER"),
            email_provider: profiled_env_opt(p, "EMAIL_PROVIDER"),
        }
    }

    /// Configured remaps, in `MessageType` order.
    pub fn overrides(&self) -> Vec<(MessageType, &str)> {
        [
            (MessageType::Sms, self.sms_provider.as_deref()),
            (MessageType::Mms, self.mms_provider.as_deref()),
            (MessageType::Email, self.email_provider.as_deref()),
        ]
        .into_iter()
        .filter_map(|(t, name)| name.map(|n| (t, n)))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own profile prefix so parallel tests do not collide.

    #[test]
    fn profile_prefixed_keys_win() {
        env::set_var("CFGTESTA_WORKER_COUNT", "3");
        env::set_var("CFGTESTA_MALFORMED_SEND_TIME", "reject");
        env::set_var("CFGTESTA_EMAIL_PROVIDER", "sendgrid");

        let config = Config::for_profile("cfgtesta");
        assert_eq!(config.profile, "CFGTESTA");
        assert_eq!(config.engine.worker_count, 3);
        assert_eq!(config.engine.malformed_send_time, MalformedTimePolicy::Reject);
        assert_eq!(config.routing.email_provider.as_deref(), Some("sendgrid"));
        assert_eq!(
            config.routing.overrides(),
            vec![(MessageType::Email, "sendgrid")]
        );
        assert!(Config::available_profiles().contains(&"CFGTESTA".to_string()));
    }

    #[test]
    fn invalid_values_fall_back() {
        env::set_var("CFGTESTB_WORKER_COUNT", "0");
        env::set_var("CFGTESTB_MALFORMED_SEND_TIME", "explode");

        let config = Config::for_profile("CFGTESTB");
        assert_eq!(config.engine.worker_count, 1);
        assert_eq!(config.engine.malformed_send_time, MalformedTimePolicy::SendNow);
    }

    #[test]
    fn profile_prefix_needs_a_marker_key() {
        assert_eq!(profile_prefix("PROD_WORKER_COUNT"), Some("PROD"));
        assert_eq!(profile_prefix("EU_WEST_SMS_PROVIDER"), Some("EU_WEST"));
        assert_eq!(profile_prefix("WORKER_COUNT"), None);
        assert_eq!(profile_prefix("prod_WORKER_COUNT"), None);
        assert_eq!(profile_prefix("PROD_DATABASE_URL"), None);
    }

    #[test]
    fn policy_round_trips_through_display() {
        for policy in [MalformedTimePolicy::SendNow, MalformedTimePolicy::Reject] {
            assert_eq!(policy.to_string().parse::<MalformedTimePolicy>(), Ok(policy));
        }
    }

    #[test]
    fn default_profile_label() {
        let config = Config {
            profile: String::new(),
            engine: EngineConfig::default(),
            routing: RoutingConfig::default(),
        };
        assert_eq!(config.profile_label(), "default");
        let summary = config.summary();
        assert_eq!(summary["profile"], "default");
        assert_eq!(summary["worker_count"], 10);
        assert_eq!(summary["malformed_send_time"], "send_now");
        assert!(summary["provider_overrides"].as_object().unwrap().is_empty());
    }
}
