//! Per-model pricing catalog and cost calculation.
//!
//! A gateway tracking spend across five providers needs pricing as data,
//! not a match arm per model name, so prices load from YAML descriptors —
//! one file per provider, a map of bare model name to per-million-token
//! prices — with vendor-specific cache-price keys coalesced onto a common
//! pair at load time.
//!
//! The catalog is read-mostly: loaded once at startup, shared behind a
//! `parking_lot::RwLock`, refreshed in place (directory re-scan, or the
//! OpenRouter live catalog) without disturbing readers.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use parking_lot::RwLock;
use relaygate_core::schema::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// One model's price sheet, in `currency` per million tokens. Cache prices
/// are optional since not every provider bills them separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingEntry {
    pub input: f64,
    pub output: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cache_write: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cache_read: Option<f64>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// The raw per-model block as it appears in a descriptor file, before
/// vendor-specific cache keys are coalesced: Anthropic writes
/// `5m_cache_write`/`1h_cache_write`/`cache_read`, xAI writes
/// `cached_input`, everyone else (if they price caching at all) uses the
/// common `cache_write`/`cache_read` pair.
#[derive(Debug, Deserialize)]
struct RawModelPrices {
    input: f64,
    output: f64,
    #[serde(default)]
    cache_write: Option<f64>,
    #[serde(default)]
    cache_read: Option<f64>,
    #[serde(rename = "5m_cache_write", default)]
    cache_write_5m: Option<f64>,
    #[serde(rename = "1h_cache_write", default)]
    cache_write_1h: Option<f64>,
    #[serde(default)]
    cached_input: Option<f64>,
}

impl RawModelPrices {
    fn normalize(self, currency: &str) -> PricingEntry {
        PricingEntry {
            input: self.input,
            output: self.output,
            cache_write: self.cache_write.or(self.cache_write_5m).or(self.cache_write_1h),
            cache_read: self.cache_read.or(self.cached_input),
            currency: currency.to_string(),
        }
    }
}

/// On-disk provider descriptor: `{provider, currency, unit, models,
/// metadata}`. `unit` and `metadata` are carried for the file format's
/// sake but not interpreted — prices are always per million tokens.
#[derive(Debug, Deserialize)]
struct ProviderDescriptor {
    provider: String,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    #[allow(dead_code)]
    unit: Option<String>,
    models: BTreeMap<String, RawModelPrices>,
    #[serde(default)]
    #[allow(dead_code)]
    metadata: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub cache_write_cost: f64,
    pub cache_read_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub currency: String,
}

/// Round to 6 fractional digits using round-half-to-even, applied once
/// per cost class and again to the summed total (the documented rounding
/// rule for the ledger).
fn round6(value: f64) -> f64 {
    let scaled = value * 1_000_000.0;
    let rounded = if (scaled.fract().abs() - 0.5).abs() < f64::EPSILON {
        // Exactly on the tie: round to even.
        let floor = scaled.floor();
        if (floor as i64) % 2 == 0 {
            floor
        } else {
            floor + 1.0
        }
    } else {
        scaled.round()
    };
    rounded / 1_000_000.0
}

impl CostBreakdown {
    /// `cost_class = tokens / 1_000_000 × price_per_million`.
    pub fn from_usage(usage: &Usage, pricing: &PricingEntry) -> Self {
        let input_cost = round6(usage.input_tokens as f64 / 1_000_000.0 * pricing.input);
        let output_cost = round6(usage.output_tokens as f64 / 1_000_000.0 * pricing.output);
        let cache_write_cost = round6(
            usage.cache_write_tokens as f64 / 1_000_000.0
                * pricing.cache_write.unwrap_or(pricing.input),
        );
        let cache_read_cost =
            round6(usage.cached_tokens as f64 / 1_000_000.0 * pricing.cache_read.unwrap_or(0.0));
        let total_cost = round6(input_cost + output_cost + cache_write_cost + cache_read_cost);

        Self {
            input_cost,
            cache_write_cost,
            cache_read_cost,
            output_cost,
            total_cost,
            currency: pricing.currency.clone(),
        }
    }

    /// A zero-cost breakdown for the pricing-miss path: record a zero-cost
    /// row and warn, never reject the request over an unpriced model.
    pub fn zero() -> Self {
        Self {
            currency: default_currency(),
            ..Default::default()
        }
    }
}

/// All configured providers' price sheets, keyed by `"<provider>/<model>"`.
#[derive(Debug, Default)]
pub struct PricingCatalog {
    entries: RwLock<HashMap<String, PricingEntry>>,
}

impl PricingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one provider descriptor. Returns the provider name the file
    /// declared, so directory scans can log what they loaded.
    pub fn load_provider_yaml(&self, yaml: &str) -> Result<String, serde_yaml::Error> {
        let descriptor: ProviderDescriptor = serde_yaml::from_str(yaml)?;
        let mut entries = self.entries.write();
        for (model, raw) in descriptor.models {
            entries.insert(
                format!("{}/{}", descriptor.provider, model.to_lowercase()),
                raw.normalize(&descriptor.currency),
            );
        }
        Ok(descriptor.provider)
    }

    /// Scan a pricing directory of `*.yaml` descriptors. Unreadable or
    /// malformed files are logged and skipped — an absent price sheet
    /// means `compute_cost` records zero cost, not a boot failure. Safe to
    /// call again at runtime: a re-scan only ever adds or overwrites
    /// entries, so a failed refresh leaves the existing snapshot intact.
    pub fn load_dir(&self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(?dir, error = %e, "pricing directory not readable — requests will record zero cost");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if ext != Some("yaml") && ext != Some("yml") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(yaml) => match self.load_provider_yaml(&yaml) {
                    Ok(provider) => info!(provider, ?path, "loaded pricing descriptor"),
                    Err(e) => warn!(?path, error = %e, "failed to parse pricing descriptor"),
                },
                Err(e) => warn!(?path, error = %e, "failed to read pricing descriptor"),
            }
        }
    }

    /// Insert or overwrite a single entry directly — used by tests and by
    /// the OpenRouter live refresh, which is an API response, not a file.
    pub fn insert(&self, provider: &str, model: &str, entry: PricingEntry) {
        self.entries.write().insert(format!("{provider}/{}", model.to_lowercase()), entry);
    }

    /// Lookup fall-throughs: normalized full id (lowercase — OpenRouter
    /// models keep their `vendor/` qualifier as part of the id) → id with
    /// any embedded prefix collapsed → raw string taken as a direct
    /// catalog key.
    pub fn lookup(&self, provider: &str, model: &str) -> Option<PricingEntry> {
        let entries = self.entries.read();
        let full = model.to_lowercase();

        if let Some(entry) = entries.get(&format!("{provider}/{full}")) {
            return Some(entry.clone());
        }
        let stripped = full.rsplit('/').next().unwrap_or(&full);
        if stripped != full {
            if let Some(entry) = entries.get(&format!("{provider}/{stripped}")) {
                return Some(entry.clone());
            }
        }
        entries.get(model).cloned()
    }

    pub fn compute_cost(&self, provider: &str, model: &str, usage: &Usage) -> CostBreakdown {
        match self.lookup(provider, model) {
            Some(entry) => CostBreakdown::from_usage(usage, &entry),
            None => {
                warn!(provider, model, "no pricing entry for model — recording zero cost");
                CostBreakdown::zero()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Every model id priced for `provider`, sorted — the static
    /// model→provider capability map the router consults, and the model
    /// list each provider client advertises on `GET /v1/models`.
    pub fn models_for(&self, provider: &str) -> Vec<String> {
        let prefix = format!("{provider}/");
        let mut models: Vec<String> = self
            .entries
            .read()
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        models.sort();
        models
    }

    /// Fold the live OpenRouter model catalog (`GET /api/v1/models`) into
    /// the snapshot. OpenRouter quotes prices per *token* as decimal
    /// strings; they're scaled to the catalog's per-million convention.
    /// Returns how many models were updated. Best-effort by construction:
    /// unparseable rows are skipped, and an empty or malformed catalog
    /// updates nothing.
    pub fn apply_openrouter_catalog(&self, catalog: &Value) -> usize {
        let Some(models) = catalog["data"].as_array() else {
            return 0;
        };

        let per_token = |pricing: &Value, key: &str| -> Option<f64> {
            let raw = &pricing[key];
            raw.as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .or_else(|| raw.as_f64())
        };

        let mut updated = 0;
        for model in models {
            let Some(id) = model["id"].as_str() else { continue };
            let pricing = &model["pricing"];
            let (Some(input), Some(output)) =
                (per_token(pricing, "prompt"), per_token(pricing, "completion"))
            else {
                continue;
            };
            self.insert(
                "openrouter",
                id,
                PricingEntry {
                    input: input * 1_000_000.0,
                    output: output * 1_000_000.0,
                    cache_write: per_token(pricing, "input_cache_write").map(|p| p * 1_000_000.0),
                    cache_read: per_token(pricing, "input_cache_read").map(|p| p * 1_000_000.0),
                    currency: default_currency(),
                },
            );
            updated += 1;
        }
        updated
    }

    /// Serialise one provider's current entries back into descriptor form —
    /// the on-disk snapshot the OpenRouter refresh writes back. `None` when
    /// the provider has no entries.
    pub fn snapshot_yaml(&self, provider: &str) -> Option<String> {
        let entries = self.entries.read();
        let prefix = format!("{provider}/");
        let mut models = BTreeMap::new();
        let mut currency = default_currency();
        for (key, entry) in entries.iter() {
            if let Some(model) = key.strip_prefix(&prefix) {
                currency = entry.currency.clone();
                models.insert(model.to_string(), entry.clone());
            }
        }
        if models.is_empty() {
            return None;
        }
        #[derive(Serialize)]
        struct Snapshot<'a> {
            provider: &'a str,
            currency: String,
            unit: &'static str,
            models: BTreeMap<String, PricingEntry>,
        }
        serde_yaml::to_string(&Snapshot {
            provider,
            currency,
            unit: "per_million_tokens",
            models,
        })
        .ok()
    }
}

/// Periodic OpenRouter price refresh: fetch the public model catalog, fold
/// it into the shared snapshot, and (when a pricing directory is
/// configured) write the snapshot back to `openrouter.yaml`. Every failure
/// path is a logged no-op — the existing snapshot always survives.
pub async fn refresh_openrouter(catalog: &PricingCatalog, pricing_dir: Option<&Path>) {
    let resp = match reqwest::get("https://openrouter.ai/api/v1/models").await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(error = %e, "openrouter pricing refresh failed — keeping existing snapshot");
            return;
        }
    };
    let body: Value = match resp.json().await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "openrouter catalog was not valid JSON — keeping existing snapshot");
            return;
        }
    };

    let updated = catalog.apply_openrouter_catalog(&body);
    info!(updated, "openrouter pricing refreshed");

    if updated == 0 {
        return;
    }
    if let Some(dir) = pricing_dir {
        if let Some(snapshot) = catalog.snapshot_yaml("openrouter") {
            let path = dir.join("openrouter.yaml");
            if let Err(e) = std::fs::write(&path, snapshot) {
                warn!(?path, error = %e, "failed to write openrouter pricing snapshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_entry(input: f64, output: f64) -> PricingEntry {
        PricingEntry {
            input,
            output,
            cache_write: None,
            cache_read: None,
            currency: "USD".into(),
        }
    }

    #[test]
    fn s4_gpt4o_cost_matches_literal_scenario() {
        let catalog = PricingCatalog::new();
        catalog.insert("openai", "gpt-4o", flat_entry(2.5, 10.0));
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 500_000,
            ..Default::default()
        };
        let cost = catalog.compute_cost("openai", "gpt-4o", &usage);
        assert_eq!(cost.input_cost, 2.5);
        assert_eq!(cost.output_cost, 5.0);
        assert_eq!(cost.total_cost, 7.5);
    }

    #[test]
    fn missing_pricing_entry_yields_zero_cost_not_error() {
        let catalog = PricingCatalog::new();
        let usage = Usage {
            input_tokens: 100,
            output_tokens: 50,
            ..Default::default()
        };
        let cost = catalog.compute_cost("openai", "unknown-model", &usage);
        assert_eq!(cost.total_cost, 0.0);
    }

    #[test]
    fn cache_tokens_priced_separately_from_input() {
        let catalog = PricingCatalog::new();
        catalog.insert(
            "anthropic",
            "claude-sonnet-4",
            PricingEntry {
                input: 3.0,
                output: 15.0,
                cache_write: Some(3.75),
                cache_read: Some(0.3),
                currency: "USD".into(),
            },
        );
        let usage = Usage {
            input_tokens: 1_000_000,
            output_tokens: 0,
            cache_write_tokens: 1_000_000,
            cached_tokens: 1_000_000,
            ..Default::default()
        };
        let cost = catalog.compute_cost("anthropic", "claude-sonnet-4", &usage);
        assert_eq!(cost.cache_write_cost, 3.75);
        assert_eq!(cost.cache_read_cost, 0.3);
    }

    #[test]
    fn lookup_falls_through_to_normalized_and_raw_forms() {
        let catalog = PricingCatalog::new();
        catalog.insert("openai", "gpt-4o", flat_entry(2.5, 10.0));
        // Mixed-case, provider-qualified model string still resolves.
        assert!(catalog.lookup("openai", "OpenAI/GPT-4O").is_some());

        catalog
            .entries
            .write()
            .insert("claude-sonnet-4-raw".to_string(), flat_entry(3.0, 15.0));
        // No "<provider>/<model>" entry exists; the raw string itself is a key.
        assert!(catalog.lookup("anthropic", "claude-sonnet-4-raw").is_some());
    }

    #[test]
    fn descriptor_normalizes_anthropic_cache_keys() {
        let catalog = PricingCatalog::new();
        let yaml = "
provider: anthropic
currency: USD
unit: per_million_tokens
models:
  claude-sonnet-4:
    input: 3.0
    output: 15.0
    5m_cache_write: 3.75
    cache_read: 0.3
  claude-3-opus-20240229:
    input: 15.0
    output: 75.0
    1h_cache_write: 30.0
";
        let provider = catalog.load_provider_yaml(yaml).unwrap();
        assert_eq!(provider, "anthropic");

        let sonnet = catalog.lookup("anthropic", "claude-sonnet-4").unwrap();
        assert_eq!(sonnet.cache_write, Some(3.75));
        assert_eq!(sonnet.cache_read, Some(0.3));

        let opus = catalog.lookup("anthropic", "claude-3-opus-20240229").unwrap();
        assert_eq!(opus.cache_write, Some(30.0));
    }

    #[test]
    fn descriptor_normalizes_xai_cached_input_key() {
        let catalog = PricingCatalog::new();
        let yaml = "
provider: xai
currency: USD
models:
  grok-3:
    input: 3.0
    output: 15.0
    cached_input: 0.75
";
        catalog.load_provider_yaml(yaml).unwrap();
        let grok = catalog.lookup("xai", "grok-3").unwrap();
        assert_eq!(grok.cache_read, Some(0.75));
        assert_eq!(grok.cache_write, None);
    }

    #[test]
    fn openrouter_catalog_scales_per_token_prices_to_per_million() {
        let catalog = PricingCatalog::new();
        let live = serde_json::json!({
            "data": [
                {"id": "anthropic/claude-sonnet-4", "pricing": {"prompt": "0.000003", "completion": "0.000015"}},
                {"id": "broken/no-pricing", "pricing": {}},
            ]
        });
        assert_eq!(catalog.apply_openrouter_catalog(&live), 1);
        let entry = catalog.lookup("openrouter", "anthropic/claude-sonnet-4").unwrap();
        assert!((entry.input - 3.0).abs() < 1e-9);
        assert!((entry.output - 15.0).abs() < 1e-9);
    }

    #[test]
    fn failed_openrouter_refresh_leaves_snapshot_intact() {
        let catalog = PricingCatalog::new();
        catalog.insert("openrouter", "some/model", flat_entry(1.0, 2.0));
        assert_eq!(catalog.apply_openrouter_catalog(&serde_json::json!({"error": "down"})), 0);
        assert!(catalog.lookup("openrouter", "some/model").is_some());
    }

    #[test]
    fn snapshot_round_trips_through_the_descriptor_loader() {
        let catalog = PricingCatalog::new();
        catalog.insert("openrouter", "meta/llama-3", flat_entry(0.5, 0.8));
        let yaml = catalog.snapshot_yaml("openrouter").unwrap();

        let reloaded = PricingCatalog::new();
        reloaded.load_provider_yaml(&yaml).unwrap();
        assert_eq!(reloaded.lookup("openrouter", "meta/llama-3"), catalog.lookup("openrouter", "meta/llama-3"));
    }

    #[test]
    fn rounding_is_half_to_even_at_six_digits() {
        // 0.0000005 is exactly on the tie between 0.000000 and 0.000001;
        // half-to-even rounds down to the even millionth.
        assert_eq!(round6(0.0000005), 0.0);
        assert_eq!(round6(0.0000015), 0.000002);
        assert_eq!(round6(0.1234564), 0.123456);
        assert_eq!(round6(0.1234566), 0.123457);
    }
}
