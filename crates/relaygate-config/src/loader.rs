use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use relaygate_core::error::GatewayError;
use tracing::{info, warn};

use crate::schema::GatewayConfig;

/// Loads and optionally hot-reloads the gateway configuration: resolve the
/// config path, parse the TOML file (defaults when absent), apply
/// `RELAYGATE_*` environment overrides, validate, and watch the file for
/// changes via `notify`.
pub struct ConfigLoader {
    config: Arc<RwLock<GatewayConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > `RELAYGATE_CONFIG` env >
    /// `~/.relaygate/relaygate.toml`.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("RELAYGATE_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".relaygate")
            .join("relaygate.toml")
    }

    /// Load the config from disk, falling back to defaults when the file is
    /// absent. Fails if the resulting config has a hard validation error.
    pub fn load(path: Option<&Path>) -> relaygate_core::error::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<GatewayConfig>(&raw)
                .map_err(|e| GatewayError::InvalidInput(format!("failed to parse {}: {}", config_path.display(), e)))?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            GatewayConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(GatewayError::InvalidInput(e)),
        }

        Ok(Self { config: Arc::new(RwLock::new(config)), config_path })
    }

    pub fn get(&self) -> GatewayConfig {
        self.config.read().clone()
    }

    pub fn shared(&self) -> Arc<RwLock<GatewayConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// `RELAYGATE_*` overrides. Provider credentials are never read here —
    /// they live only in `std::env` and are picked up directly by
    /// `relaygate-providers` at client construction time (see
    /// `ProviderConfig`'s doc comment for why).
    fn apply_env_overrides(mut config: GatewayConfig) -> GatewayConfig {
        if let Ok(v) = std::env::var("RELAYGATE_LISTEN") {
            config.server.listen = v;
        }
        if let Ok(v) = std::env::var("RELAYGATE_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("RELAYGATE_ENVIRONMENT") {
            config.server.environment = v;
        }
        if let Ok(v) = std::env::var("RELAYGATE_BUDGET_USD") {
            config.budget.amount_usd = v.parse::<f64>().ok();
        }
        config
    }

    /// Reload the config from disk, keeping the previous state if the new
    /// file fails to parse.
    pub fn reload(&self) -> relaygate_core::error::Result<()> {
        if !self.config_path.exists() {
            return Err(GatewayError::InvalidInput(format!("config file not found: {}", self.config_path.display())));
        }
        let raw = std::fs::read_to_string(&self.config_path)?;
        let new_config = toml::from_str::<GatewayConfig>(&raw)
            .map_err(|e| GatewayError::InvalidInput(format!("failed to parse {}: {}", self.config_path.display(), e)))?;
        let new_config = Self::apply_env_overrides(new_config);
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that reloads on changes to the
    /// config file. The returned watcher must be kept alive.
    pub fn watch(&self) -> relaygate_core::error::Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let config_path = self.config_path.clone();

        info!(?config_path, "starting config file watcher");

        let path_for_event = config_path.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                let is_our_file = event.paths.iter().any(|p| p.file_name() == path_for_event.file_name());
                if !is_our_file {
                    return;
                }
                info!("config file changed, reloading");
                match std::fs::read_to_string(&path_for_event) {
                    Ok(raw) => match toml::from_str::<GatewayConfig>(&raw) {
                        Ok(new_config) => {
                            let new_config = ConfigLoader::apply_env_overrides(new_config);
                            *config.write() = new_config;
                            info!("configuration hot-reloaded successfully");
                        }
                        Err(e) => warn!(error = %e, "config file has errors, keeping current config"),
                    },
                    Err(e) => warn!(error = %e, "failed to read config file during hot-reload"),
                }
            }
            Err(e) => warn!(error = %e, "file watcher error"),
        })
        .map_err(|e| GatewayError::Other(e.into()))?;

        let watch_path = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| GatewayError::Other(e.into()))?;

        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_prefers_explicit_over_env() {
        let explicit = PathBuf::from("/tmp/explicit.toml");
        assert_eq!(ConfigLoader::resolve_path(Some(&explicit)), explicit);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let loader = ConfigLoader::load(Some(Path::new("/nonexistent/relaygate.toml"))).unwrap();
        let config = loader.get();
        assert_eq!(config.server.listen, "127.0.0.1:8787");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaygate.toml");
        std::fs::write(&path, "[server]\nenvironment = \"production\"\n\n[logging]\nlevel = \"warn\"\n").unwrap();

        let loader = ConfigLoader::load(Some(&path)).unwrap();
        let config = loader.get();
        assert_eq!(config.server.environment, "production");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn reload_picks_up_a_changed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relaygate.toml");
        std::fs::write(&path, "[logging]\nlevel = \"info\"\n").unwrap();
        let loader = ConfigLoader::load(Some(&path)).unwrap();

        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().logging.level, "debug");
    }

    #[test]
    fn env_var_overrides_listen_address() {
        // SAFETY: test runs single-threaded with respect to this variable;
        // set_var/remove_var are unsafe in edition 2024.
        unsafe { std::env::set_var("RELAYGATE_LISTEN", "0.0.0.0:9999") };
        let loader = ConfigLoader::load(Some(Path::new("/nonexistent/relaygate.toml"))).unwrap();
        let config = loader.get();
        assert_eq!(config.server.listen, "0.0.0.0:9999");
        unsafe { std::env::remove_var("RELAYGATE_LISTEN") };
    }
}
