use serde::{Deserialize, Serialize};

use crate::measures::AliasIndex;
use crate::models::normalize_alias;

pub const DEFAULT_TABLE: &str = "risk_measures";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub aliases: Vec<String>,
}

/// The fixed fact table the agent queries. `table` is the only table name the
/// assembler will ever emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            columns: vec![
                column("info_type", "Type of information/measure (e.g. CE, EAD, LGD)", &[]),
                column("measure_code", "Measure code identifier", &[]),
                column(
                    "report_aspect",
                    "Reporting aspect (e.g. CREDIT, CREDIT_ALD)",
                    &["aspect"],
                ),
                column("info_value", "Numeric value for the measure", &["value"]),
                column(
                    "obligor_rdm_id",
                    "Obligor identifier",
                    &["obligor", "obligors", "counterparty"],
                ),
                column(
                    "product_group_code",
                    "Product group code",
                    &["product", "products", "product group"],
                ),
                column(
                    "legal_entity",
                    "Legal entity identifier",
                    &["entity", "legal entities"],
                ),
                column("is_internal", "Internal/external flag", &["internal"]),
            ],
        }
    }
}

fn column(name: &str, description: &str, aliases: &[&str]) -> ColumnSpec {
    ColumnSpec {
        name: name.to_string(),
        description: description.to_string(),
        aliases: aliases.iter().map(ToString::to_string).collect(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionResolution {
    pub columns: Vec<String>,
    pub unmatched: Vec<String>,
}

impl SchemaCatalog {
    /// Column owning `dimension` by exact normalized name or alias.
    #[must_use]
    pub fn column_for(&self, dimension: &str) -> Option<&ColumnSpec> {
        let wanted = normalize_alias(dimension);
        self.columns.iter().find(|column| {
            normalize_alias(&column.name) == wanted
                || column
                    .aliases
                    .iter()
                    .any(|alias| normalize_alias(alias) == wanted)
        })
    }

    pub fn resolve_dimensions<S: AsRef<str>>(&self, dimensions: &[S]) -> DimensionResolution {
        let mut resolution = DimensionResolution::default();
        for dimension in dimensions {
            let dimension = dimension.as_ref();
            match self.column_for(dimension) {
                Some(column) => {
                    if !resolution.columns.contains(&column.name) {
                        resolution.columns.push(column.name.clone());
                    }
                }
                None => {
                    if !resolution.unmatched.iter().any(|seen| seen == dimension) {
                        resolution.unmatched.push(dimension.to_string());
                    }
                }
            }
        }
        resolution
    }

    /// Schema and measure vocabulary handed to the interpretation service.
    #[must_use]
    pub fn describe(&self, measures: &AliasIndex) -> String {
        let mut lines = vec![
            format!("Table: {}", self.table),
            String::new(),
            "Columns:".to_string(),
        ];
        for column in &self.columns {
            let mut line = format!("- {}", column.name);
            if !column.description.is_empty() {
                line.push_str(&format!(": {}", column.description));
            }
            if !column.aliases.is_empty() {
                line.push_str(&format!(" (also: {})", column.aliases.join(", ")));
            }
            lines.push(line);
        }

        lines.push(String::new());
        lines.push("Measures:".to_string());
        if measures.is_empty() {
            lines.push("- (none configured)".to_string());
        }
        for measure in measures.configs() {
            let mut line = format!("- {}: {}", measure.code, measure.name);
            if !measure.aliases.is_empty() {
                line.push_str(&format!(" (also: {})", measure.aliases.join(", ")));
            }
            lines.push(line);
        }

        lines.join("\n")
    }
}
