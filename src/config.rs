use anyhow::{bail, Context};

pub const DEFAULT_CRITICAL_BELOW: f64 = 30.0;
pub const DEFAULT_PROBLEMATIC_BELOW: f64 = 50.0;
pub const DEFAULT_NORMAL_RATE: f64 = 12.5;
pub const DEFAULT_DATA_ENTRY_DELAY_DAYS: u32 = 30;

/// Thresholds the evaluator classifies against.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    /// Progress strictly below this is `critical`.
    pub critical_below: f64,
    /// Progress strictly below this (and not critical) is `problematic`.
    pub problematic_below: f64,
    /// Expected monthly increment of the baseline schedule.
    pub normal_rate: f64,
    /// Days without a new entry before a site is flagged.
    pub data_entry_delay_days: u32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            critical_below: DEFAULT_CRITICAL_BELOW,
            problematic_below: DEFAULT_PROBLEMATIC_BELOW,
            normal_rate: DEFAULT_NORMAL_RATE,
            data_entry_delay_days: DEFAULT_DATA_ENTRY_DELAY_DAYS,
        }
    }
}

impl EvaluatorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, falling back to
    /// defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("PROGRESS_CRITICAL_BELOW") {
            config.critical_below = parse_number("PROGRESS_CRITICAL_BELOW", &value)?;
        }
        if let Some(value) = lookup("PROGRESS_PROBLEMATIC_BELOW") {
            config.problematic_below = parse_number("PROGRESS_PROBLEMATIC_BELOW", &value)?;
        }
        if let Some(value) = lookup("PROGRESS_NORMAL_RATE") {
            config.normal_rate = parse_number("PROGRESS_NORMAL_RATE", &value)?;
        }
        if let Some(value) = lookup("DATA_ENTRY_DELAY_DAYS") {
            config.data_entry_delay_days = value
                .trim()
                .parse()
                .with_context(|| format!("DATA_ENTRY_DELAY_DAYS must be a whole number, got `{value}`"))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=100.0).contains(&self.critical_below)
            || !(0.0..=100.0).contains(&self.problematic_below)
        {
            bail!("progress thresholds must lie within 0-100");
        }
        if self.critical_below > self.problematic_below {
            bail!(
                "critical threshold ({}) must not exceed problematic threshold ({})",
                self.critical_below,
                self.problematic_below
            );
        }
        if !(self.normal_rate.is_finite() && self.normal_rate > 0.0) {
            bail!("normal rate must be a positive number, got {}", self.normal_rate);
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> anyhow::Result<f64> {
    let parsed: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a number, got `{value}`"))?;
    if parsed.is_nan() {
        bail!("{key} must be a number, got `{value}`");
    }
    Ok(parsed)
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
    fn defaults_match_policy_constants() {
        let config = EvaluatorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, EvaluatorConfig::default());
        assert_eq!(config.critical_below, 30.0);
        assert_eq!(config.problematic_below, 50.0);
        assert_eq!(config.normal_rate, 12.5);
        assert_eq!(config.data_entry_delay_days, 30);
    }

    #[test]
    fn overrides_are_applied() {
        let config = EvaluatorConfig::from_lookup(lookup_from(&[
            ("PROGRESS_CRITICAL_BELOW", "25"),
            ("PROGRESS_PROBLEMATIC_BELOW", " 60.5 "),
            ("DATA_ENTRY_DELAY_DAYS", "45"),
        ]))
        .unwrap();
        assert_eq!(config.critical_below, 25.0);
        assert_eq!(config.problematic_below, 60.5);
        assert_eq!(config.normal_rate, 12.5);
        assert_eq!(config.data_entry_delay_days, 45);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let result = EvaluatorConfig::from_lookup(lookup_from(&[
            ("PROGRESS_CRITICAL_BELOW", "60"),
            ("PROGRESS_PROBLEMATIC_BELOW", "50"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_garbage_values() {
        assert!(EvaluatorConfig::from_lookup(lookup_from(&[("PROGRESS_NORMAL_RATE", "fast")])).is_err());
        assert!(EvaluatorConfig::from_lookup(lookup_from(&[("PROGRESS_NORMAL_RATE", "0")])).is_err());
        assert!(EvaluatorConfig::from_lookup(lookup_from(&[("PROGRESS_CRITICAL_BELOW", "NaN")])).is_err());
        assert!(EvaluatorConfig::from_lookup(lookup_from(&[("DATA_ENTRY_DELAY_DAYS", "-3")])).is_err());
    }
}
