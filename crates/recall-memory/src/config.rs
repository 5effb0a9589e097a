use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use recall_access::AccessPolicyConfig;
use recall_core::PollPolicy;
use serde::{Deserialize, Serialize};

use crate::confirmation::ConfirmationConfig;

fn default_verification_max_attempts() -> usize {
    10
}

fn default_verification_interval_ms() -> u64 {
    1_500
}

fn default_verification_max_total_wait_ms() -> u64 {
    15_000
}

fn default_search_top_k() -> usize {
    5
}

fn default_search_max_top_k() -> usize {
    50
}

fn default_identifier_scan_max_pages() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Read-after-write polling budget.
pub struct VerificationConfig {
    #[serde(default = "default_verification_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_verification_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_verification_max_total_wait_ms")]
    pub max_total_wait_ms: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_verification_max_attempts(),
            interval_ms: default_verification_interval_ms(),
            max_total_wait_ms: default_verification_max_total_wait_ms(),
        }
    }
}

impl VerificationConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.max_attempts,
            interval: Duration::from_millis(self.interval_ms),
            max_total_wait: Duration::from_millis(self.max_total_wait_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Read-path limits.
pub struct SearchConfig {
    #[serde(default = "default_search_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_search_max_top_k")]
    pub max_top_k: usize,
    #[serde(default = "default_identifier_scan_max_pages")]
    pub identifier_scan_max_pages: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_search_top_k(),
            max_top_k: default_search_max_top_k(),
            identifier_scan_max_pages: default_identifier_scan_max_pages(),
        }
    }
}

impl SearchConfig {
    /// Resolves a caller-requested `top_k` against the configured bounds.
    pub fn resolve_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_top_k)
            .clamp(1, self.max_top_k.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
/// Full gateway configuration; every section is optional in config files.
pub struct GatewayConfig {
    #[serde(default)]
    pub access: AccessPolicyConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

/// Rejects configurations the gateway cannot run with.
pub fn validate_gateway_config(config: &GatewayConfig) -> Result<()> {
    if config.access.owner_identity.trim().is_empty() {
        bail!("access.owner_identity cannot be empty");
    }
    if config
        .access
        .superusers
        .iter()
        .any(|superuser| superuser.trim().is_empty())
    {
        bail!("access.superusers cannot contain empty identities");
    }
    if config.confirmation.affirmation_token.trim().is_empty() {
        bail!("confirmation.affirmation_token cannot be empty");
    }
    if config.verification.max_attempts == 0 {
        bail!("verification.max_attempts must be at least 1");
    }
    if config.search.default_top_k == 0 {
        bail!("search.default_top_k must be at least 1");
    }
    if config.search.default_top_k > config.search.max_top_k {
        bail!(
            "search.default_top_k ({}) cannot exceed search.max_top_k ({})",
            config.search.default_top_k,
            config.search.max_top_k
        );
    }
    Ok(())
}

/// Loads and validates a gateway config from a `.toml` or `.json` file.
pub fn load_gateway_config(path: &Path) -> Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read gateway config {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase());
    let config = match extension.as_deref() {
        Some("json") => serde_json::from_str::<GatewayConfig>(&raw)
            .with_context(|| format!("failed to parse gateway config {}", path.display()))?,
        Some("toml") | None => toml::from_str::<GatewayConfig>(&raw)
            .with_context(|| format!("failed to parse gateway config {}", path.display()))?,
        Some(other) => bail!(
            "unsupported gateway config extension '{other}' for {} (expected .toml or .json)",
            path.display()
        ),
    };
    validate_gateway_config(&config)
        .with_context(|| format!("invalid gateway config {}", path.display()))?;
    Ok(config)
}
