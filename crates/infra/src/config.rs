//! Engine configuration.

use anyhow::Context;
use serde::{Deserialize, Serialize};

use stockledger_inventory::{CostingMethod, OversoldPolicy};

pub const DEFAULT_METHOD_ENV: &str = "STOCKLEDGER_DEFAULT_COSTING_METHOD";
pub const OVERSOLD_POLICY_ENV: &str = "STOCKLEDGER_OVERSOLD_POLICY";
pub const MAX_CONCURRENCY_ENV: &str = "STOCKLEDGER_MAX_CONCURRENCY";

/// Engine-wide knobs shared by the valuation and reconciliation services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Used when neither the caller nor the business names a method.
    pub default_method: CostingMethod,
    pub oversold_policy: OversoldPolicy,
    /// Upper bound on per-item tasks in flight during batch runs.
    pub max_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_method: CostingMethod::Fifo,
            oversold_policy: OversoldPolicy::Warn,
            max_concurrency: 8,
        }
    }
}

impl EngineConfig {
    pub fn with_default_method(mut self, method: CostingMethod) -> Self {
        self.default_method = method;
        self
    }

    pub fn with_oversold_policy(mut self, policy: OversoldPolicy) -> Self {
        self.oversold_policy = policy;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Read overrides from the process environment; unset variables keep
    /// their defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup(DEFAULT_METHOD_ENV) {
            let method = raw
                .parse::<CostingMethod>()
                .with_context(|| format!("invalid {DEFAULT_METHOD_ENV}: '{raw}'"))?;
            cfg = cfg.with_default_method(method);
        }

        if let Some(raw) = lookup(OVERSOLD_POLICY_ENV) {
            let policy = raw
                .parse::<OversoldPolicy>()
                .with_context(|| format!("invalid {OVERSOLD_POLICY_ENV}: '{raw}'"))?;
            cfg = cfg.with_oversold_policy(policy);
        }

        if let Some(raw) = lookup(MAX_CONCURRENCY_ENV) {
            let n = raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("invalid {MAX_CONCURRENCY_ENV}: '{raw}'"))?;
            anyhow::ensure!(n > 0, "{MAX_CONCURRENCY_ENV} must be at least 1");
            cfg = cfg.with_max_concurrency(n);
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.default_method, CostingMethod::Fifo);
        assert_eq!(cfg.oversold_policy, OversoldPolicy::Warn);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = EngineConfig::from_lookup(lookup_from(&[
            (DEFAULT_METHOD_ENV, "weighted_average"),
            (OVERSOLD_POLICY_ENV, "reject"),
            (MAX_CONCURRENCY_ENV, "2"),
        ]))
        .unwrap();

        assert_eq!(cfg.default_method, CostingMethod::WeightedAverage);
        assert_eq!(cfg.oversold_policy, OversoldPolicy::Reject);
        assert_eq!(cfg.max_concurrency, 2);
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = EngineConfig::from_lookup(lookup_from(&[(DEFAULT_METHOD_ENV, "HIFO")])).unwrap_err();
        assert!(format!("{err:#}").contains(DEFAULT_METHOD_ENV));

        let err = EngineConfig::from_lookup(lookup_from(&[(MAX_CONCURRENCY_ENV, "0")])).unwrap_err();
        assert!(err.to_string().contains(MAX_CONCURRENCY_ENV));
    }

    #[test]
    fn concurrency_is_never_zero() {
        assert_eq!(EngineConfig::default().with_max_concurrency(0).max_concurrency, 1);
    }
}
