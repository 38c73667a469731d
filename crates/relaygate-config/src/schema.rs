use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration — maps to `relaygate.toml`. Everything a gateway
/// process needs: which providers it can reach, where the pricing
/// descriptors live, how it binds, and how it logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub providers: HashMap<String, ProviderConfig>,
    pub pricing: PricingConfig,
    pub budget: BudgetConfig,
    pub ratelimit: RateLimitConfig,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut providers = HashMap::new();
        for name in ["openai", "anthropic", "xai", "openrouter", "ollama"] {
            providers.insert(name.to_string(), ProviderConfig::default());
        }
        Self {
            server: ServerConfig::default(),
            providers,
            pricing: PricingConfig::default(),
            budget: BudgetConfig::default(),
            ratelimit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address, e.g. "0.0.0.0:8787".
    pub listen: String,
    /// `"development"` or `"production"` — surfaced verbatim by `GET /config/status`.
    pub environment: String,
    /// Optional API key clients must present; `None` means the gateway is open.
    pub api_key: Option<String>,
    /// Enable permissive CORS (for browser-based dev clients).
    pub cors: bool,
    /// Non-streaming request timeout before a 504 `GatewayTimeout`.
    pub request_timeout_secs: u64,
    /// Streaming request timeout before the socket is closed.
    pub stream_timeout_secs: u64,
    /// Whether the x402 payments module is configured; the blockchain
    /// receipt sink itself is out of scope, but `GET /config/status` still
    /// truthfully reports this switch to callers.
    pub x402_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".into(),
            environment: "development".into(),
            api_key: None,
            cors: false,
            request_timeout_secs: 60,
            stream_timeout_secs: 600,
            x402_enabled: false,
        }
    }
}

impl ServerConfig {
    pub fn port(&self) -> Option<u16> {
        self.listen.rsplit(':').next()?.parse().ok()
    }
}

// ── Providers ──────────────────────────────────────────────────

/// Deliberately carries no credential field: provider credentials come
/// only from environment variables (`OPENAI_API_KEY`, etc.), read by the
/// provider clients directly at construction time, so keys never land in
/// a config file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Whether this provider participates in routing at all.
    pub enabled: bool,
    /// Override base URL (mainly useful for Ollama or self-hosted gateways
    /// in front of a provider).
    pub base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { enabled: true, base_url: None }
    }
}

// ── Pricing ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Directory of per-provider YAML pricing descriptors.
    pub directory: PathBuf,
    /// Periodically re-fetch OpenRouter's live model catalog and fold it
    /// into the snapshot (best-effort; a failed fetch keeps the snapshot).
    pub refresh_openrouter: bool,
    /// Hours between OpenRouter refresh attempts.
    pub refresh_interval_hours: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("pricing"),
            refresh_openrouter: false,
            refresh_interval_hours: 6,
        }
    }
}

// ── Budget ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Initial budget ceiling in USD; `None` disables enforcement until a
    /// caller sets one via `PUT /budget`.
    pub amount_usd: Option<f64>,
    pub alert_only: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { amount_usd: None, alert_only: true }
    }
}

// ── Rate limiting ──────────────────────────────────────────────

/// Per-caller token bucket, ahead of the pipeline — independent of the
/// accounting budget above (one throttles request rate, the other spend).
/// Callers are keyed by presented bearer token, falling back to client IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub burst: u32,
    pub refill_per_sec: f64,
    /// How many bucket tokens one chat dispatch draws. Chat requests spend
    /// upstream quota and money; management reads only touch local state
    /// and always draw one.
    pub chat_weight: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { enabled: true, burst: 20, refill_per_sec: 5.0, chat_weight: 5 }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), format: "pretty".into(), file: None }
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite file holding `usage_records` and the budget row.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: PathBuf::from("relaygate.db") }
    }
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warn",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   -> {}", h)?;
        }
        Ok(())
    }
}

impl GatewayConfig {
    /// Validate the config and return warnings; an `Err` means at least one
    /// issue is severity `Error` and the process should refuse to boot.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        if self.server.listen.is_empty() {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: "listen address is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '0.0.0.0:8787'".into()),
            });
        } else if self.server.listen.starts_with("0.0.0.0") && self.server.api_key.is_none() {
            warnings.push(ConfigWarning {
                field: "server.api_key".into(),
                message: "binding to 0.0.0.0 with no API key set".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set server.api_key to protect the gateway".into()),
            });
        }

        let any_provider_enabled = self.providers.values().any(|p| p.enabled);
        if !any_provider_enabled && !self.server.x402_enabled {
            warnings.push(ConfigWarning {
                field: "providers".into(),
                message: "no providers configured AND no passthrough fallback AND no x402 payments module".into(),
                severity: WarningSeverity::Error,
                hint: Some("Enable at least one provider, set its API key, or enable server.x402_enabled".into()),
            });
        }

        if let Some(amount) = self.budget.amount_usd {
            if amount < 0.0 {
                warnings.push(ConfigWarning {
                    field: "budget.amount_usd".into(),
                    message: format!("amount {} is negative", amount),
                    severity: WarningSeverity::Error,
                    hint: Some("Use null to disable enforcement, or a value >= 0".into()),
                });
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        let valid_environments = ["development", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            warnings.push(ConfigWarning {
                field: "server.environment".into(),
                message: format!("unknown environment '{}'", self.server.environment),
                severity: WarningSeverity::Warning,
                hint: Some("Valid: development, production".into()),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  - {}", errors.join("\n  - ")));
        }

        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_fatal_errors() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn no_enabled_providers_is_a_hard_error() {
        let mut config = GatewayConfig::default();
        for provider in config.providers.values_mut() {
            provider.enabled = false;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_budget_amount_is_rejected() {
        let mut config = GatewayConfig::default();
        config.budget.amount_usd = Some(-5.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn server_port_parses_from_listen_address() {
        let config = ServerConfig { listen: "0.0.0.0:9000".into(), ..ServerConfig::default() };
        assert_eq!(config.port(), Some(9000));
    }
}
