//! Limit specifications and per-key configuration.
//!
//! A key carries a table of default limits plus per-model overrides. The
//! two-letter wire codes distinguish sliding request windows (`RPS`, `RPm`,
//! `RPD`) from token windows (`TPm` tumbling minute, `TPM` calendar month)
//! and the monthly request cap (`RPM`). The uppercase-M codes are monthly,
//! not per-minute.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bucket key used for requests that name no model.
pub const DEFAULT_MODEL_KEY: &str = "__default__";

/// Kinds of limits a key can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LimitType {
    /// Requests in a sliding 1-second window
    #[serde(rename = "RPS")]
    RequestsPerSecond,

    /// Requests in a sliding 1-minute window
    #[serde(rename = "RPm")]
    RequestsPerMinute,

    /// Requests in a sliding 1-day window
    #[serde(rename = "RPD")]
    RequestsPerDay,

    /// Tokens in a fixed 1-minute window
    #[serde(rename = "TPm")]
    TokensPerMinute,

    /// Tokens in the current calendar month
    #[serde(rename = "TPM")]
    TokensPerMonth,

    /// Requests in the current calendar month
    #[serde(rename = "RPM")]
    RequestsPerMonth,
}

impl LimitType {
    /// Parse a wire code such as `"RPS"` or `"TPm"`. Case-sensitive because
    /// `TPm` and `TPM` are different limits.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "RPS" => Some(Self::RequestsPerSecond),
            "RPm" => Some(Self::RequestsPerMinute),
            "RPD" => Some(Self::RequestsPerDay),
            "TPm" => Some(Self::TokensPerMinute),
            "TPM" => Some(Self::TokensPerMonth),
            "RPM" => Some(Self::RequestsPerMonth),
            _ => None,
        }
    }
}

/// One limit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSpec {
    /// Which dimension this entry constrains
    #[serde(rename = "type")]
    pub limit_type: LimitType,

    /// Maximum count within the dimension's window
    pub limit: u64,
}

impl LimitSpec {
    pub fn new(limit_type: LimitType, limit: u64) -> Self {
        Self { limit_type, limit }
    }
}

/// Configuration for one API key, produced by a key resolver
#[derive(Debug, Clone, Default)]
pub struct KeyConfig {
    /// The raw API key
    pub key: String,

    /// Human-readable queue identifier, also used to namespace persisted
    /// usage keys
    pub label: String,

    /// Limits applied to every model unless overridden
    pub default_limits: Vec<LimitSpec>,

    /// Per-model overrides and additions
    pub model_limits: HashMap<String, Vec<LimitSpec>>,

    /// Fixed inter-item delay for queues without structured limits
    pub fallback_delay_ms: Option<u64>,
}

impl KeyConfig {
    /// Effective limit set for a model: defaults first, model entries
    /// override matching types, unmatched model entries are appended.
    pub fn active_limits(&self, model: Option<&str>) -> Vec<LimitSpec> {
        let mut merged = self.default_limits.clone();

        let overrides = model.and_then(|m| self.model_limits.get(m));
        if let Some(overrides) = overrides {
            for spec in overrides {
                match merged.iter_mut().find(|s| s.limit_type == spec.limit_type) {
                    Some(existing) => existing.limit = spec.limit,
                    None => merged.push(*spec),
                }
            }
        }

        merged
    }

    /// Model names with explicit limit tables. Models served purely under
    /// the default limits do not appear here.
    pub fn limited_models(&self) -> impl Iterator<Item = &str> {
        self.model_limits
            .keys()
            .map(String::as_str)
            .filter(|m| *m != DEFAULT_MODEL_KEY)
    }
}

/// Parse a limit table from its stored JSON form.
///
/// Two shapes are accepted: the compact flat form `{"RPS": 1, "TPM": 10000}`
/// which populates the defaults, and the nested form
/// `{"default": {"RPS": 1}, "some-model": {"RPS": 10}}`. Unknown codes and
/// non-numeric values are skipped.
pub fn parse_limit_table(
    value: &serde_json::Value,
) -> (Vec<LimitSpec>, HashMap<String, Vec<LimitSpec>>) {
    let mut defaults = Vec::new();
    let mut models = HashMap::new();

    let Some(table) = value.as_object() else {
        return (defaults, models);
    };

    for (name, entry) in table {
        match entry {
            serde_json::Value::Number(n) => {
                if let (Some(limit_type), Some(limit)) = (LimitType::from_code(name), n.as_u64()) {
                    defaults.push(LimitSpec::new(limit_type, limit));
                }
            }
            serde_json::Value::Object(_) => {
                let specs = parse_flat_limits(entry);
                if specs.is_empty() {
                    continue;
                }
                if name == "default" {
                    defaults.extend(specs);
                } else {
                    models.insert(name.clone(), specs);
                }
            }
            _ => {}
        }
    }

    (defaults, models)
}

fn parse_flat_limits(value: &serde_json::Value) -> Vec<LimitSpec> {
    let Some(table) = value.as_object() else {
        return Vec::new();
    };

    table
        .iter()
        .filter_map(|(code, n)| {
            let limit_type = LimitType::from_code(code)?;
            let limit = n.as_u64()?;
            Some(LimitSpec::new(limit_type, limit))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with(
        defaults: Vec<LimitSpec>,
        model_limits: Vec<(&str, Vec<LimitSpec>)>,
    ) -> KeyConfig {
        KeyConfig {
            key: "k".to_string(),
            label: "q1".to_string(),
            default_limits: defaults,
            model_limits: model_limits
                .into_iter()
                .map(|(m, l)| (m.to_string(), l))
                .collect(),
            fallback_delay_ms: None,
        }
    }

    #[test]
    fn test_limit_codes_are_case_sensitive() {
        assert_eq!(LimitType::from_code("TPm"), Some(LimitType::TokensPerMinute));
        assert_eq!(LimitType::from_code("TPM"), Some(LimitType::TokensPerMonth));
        assert_eq!(LimitType::from_code("RPm"), Some(LimitType::RequestsPerMinute));
        assert_eq!(LimitType::from_code("RPM"), Some(LimitType::RequestsPerMonth));
        assert_eq!(LimitType::from_code("rps"), None);
    }

    #[test]
    fn test_active_limits_override_matching_type() {
        let config = config_with(
            vec![LimitSpec::new(LimitType::RequestsPerSecond, 1)],
            vec![("fast", vec![LimitSpec::new(LimitType::RequestsPerSecond, 100)])],
        );

        let active = config.active_limits(Some("fast"));
        assert_eq!(active, vec![LimitSpec::new(LimitType::RequestsPerSecond, 100)]);

        // Other models keep the defaults
        let active = config.active_limits(Some("slow"));
        assert_eq!(active, vec![LimitSpec::new(LimitType::RequestsPerSecond, 1)]);
    }

    #[test]
    fn test_active_limits_append_new_types() {
        let config = config_with(
            vec![LimitSpec::new(LimitType::RequestsPerSecond, 5)],
            vec![("m", vec![LimitSpec::new(LimitType::TokensPerMonth, 1000)])],
        );

        let active = config.active_limits(Some("m"));
        assert_eq!(active.len(), 2);
        assert!(active.contains(&LimitSpec::new(LimitType::RequestsPerSecond, 5)));
        assert!(active.contains(&LimitSpec::new(LimitType::TokensPerMonth, 1000)));
    }

    #[test]
    fn test_active_limits_no_model() {
        let config = config_with(
            vec![LimitSpec::new(LimitType::RequestsPerDay, 100)],
            vec![("m", vec![LimitSpec::new(LimitType::RequestsPerDay, 1)])],
        );
        assert_eq!(
            config.active_limits(None),
            vec![LimitSpec::new(LimitType::RequestsPerDay, 100)]
        );
    }

    #[test]
    fn test_parse_flat_table() {
        let (defaults, models) = parse_limit_table(&json!({"RPS": 1, "TPM": 50000}));
        assert_eq!(defaults.len(), 2);
        assert!(models.is_empty());
        assert!(defaults.contains(&LimitSpec::new(LimitType::RequestsPerSecond, 1)));
        assert!(defaults.contains(&LimitSpec::new(LimitType::TokensPerMonth, 50000)));
    }

    #[test]
    fn test_parse_nested_table() {
        let (defaults, models) = parse_limit_table(&json!({
            "default": {"RPS": 1},
            "mistral-large": {"RPS": 2, "RPM": 1000},
        }));
        assert_eq!(defaults, vec![LimitSpec::new(LimitType::RequestsPerSecond, 1)]);
        assert_eq!(models.len(), 1);
        assert_eq!(models["mistral-large"].len(), 2);
    }

    #[test]
    fn test_parse_skips_unknown_codes() {
        let (defaults, models) = parse_limit_table(&json!({"XYZ": 1, "RPS": "not-a-number"}));
        assert!(defaults.is_empty());
        assert!(models.is_empty());
    }

    #[test]
    fn test_limited_models_excludes_default_key() {
        let config = config_with(
            vec![],
            vec![
                ("model-a", vec![LimitSpec::new(LimitType::RequestsPerSecond, 1)]),
                (DEFAULT_MODEL_KEY, vec![LimitSpec::new(LimitType::RequestsPerSecond, 1)]),
            ],
        );
        let models: Vec<&str> = config.limited_models().collect();
        assert_eq!(models, vec!["model-a"]);
    }
}
