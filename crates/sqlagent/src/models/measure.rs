use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// On-disk shape of one measure config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MeasureConfigFile {
    #[serde(alias = "code")]
    pub measure_code: String,

    #[serde(alias = "name")]
    pub measure_name: String,

    #[serde(default)]
    pub aliases: Vec<String>,

    pub info_type: String,
    pub formula: String,

    #[serde(default)]
    pub report_aspects: Vec<String>,

    #[serde(alias = "required_filters")]
    pub filters: Vec<String>,

    #[serde(default)]
    pub default_group_by: Vec<String>,
}

/// A validated measure definition. Built only by the measure store, so every
/// instance already satisfies the load-time invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureConfig {
    pub code: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub info_type: String,
    pub formula: String,
    pub report_aspects: Vec<String>,
    pub required_filters: Vec<String>,
    pub default_group_by: Vec<String>,
}

impl MeasureConfig {
    /// Aliases in index order: code, name, then declared aliases, each once
    /// after normalization.
    #[must_use]
    pub fn indexed_aliases(&self) -> Vec<String> {
        let mut seen = Vec::new();
        let candidates = std::iter::once(&self.code)
            .chain(std::iter::once(&self.name))
            .chain(self.aliases.iter());
        for alias in candidates {
            let normalized = normalize_alias(alias);
            if !normalized.is_empty() && !seen.contains(&normalized) {
                seen.push(normalized);
            }
        }
        seen
    }
}

#[must_use]
pub fn normalize_alias(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[must_use]
pub fn json_schema() -> Value {
    let schema = schemars::schema_for!(MeasureConfigFile);
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(error) => {
            panic!("failed to serialize generated measure config schema: {error}");
        }
    }
}
