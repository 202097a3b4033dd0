use super::RewriteRequest;

const IDENTIFICATION_TASK: &str = r#"You read an analyst's request for risk measures and extract three lists.

1. "measures": the measures being asked for. Prefer the canonical measure code
   from the vocabulary above (write "CE", not "Current Exposure").
2. "group_by": the dimensions the result should be broken down by, using the
   column names from the schema above.
3. "filters": extra SQL boolean predicates the request implies, written against
   the schema columns (for example "legal_entity = 'LE01'"). Leave it empty
   when the request restricts nothing.

Return only a JSON object, with no commentary:
{"measures": ["CE"], "group_by": ["obligor_rdm_id"], "filters": []}"#;

const REWRITE_TASK: &str = "Rewrite the analyst's request as one precise technical sentence or two. \
Name each measure by its full name and code, state its aggregation formula, list its filters \
exactly as configured (never invent a filter that is not listed), and state the grouping \
columns. Return only the rewritten request.";

/// System prompt for measure and dimension identification.
#[must_use]
pub fn identification_prompt(schema_description: &str) -> String {
    format!("{schema_description}\n\n{IDENTIFICATION_TASK}")
}

#[must_use]
pub fn identification_message(query: &str) -> String {
    format!("User query: {query}")
}

#[must_use]
pub fn rewrite_prompt() -> &'static str {
    REWRITE_TASK
}

/// User message carrying the request plus everything known about it so far.
#[must_use]
pub fn rewrite_message(request: &RewriteRequest<'_>) -> String {
    let interpretation = request.interpretation;
    let mut lines = vec![
        format!("Original query: {}", request.raw_query),
        format!("Identified measures: {}", interpretation.measures.join(", ")),
        format!("Group by: {}", interpretation.dimensions.join(", ")),
    ];
    if !interpretation.filters.is_empty() {
        lines.push(format!(
            "Requested filters: {}",
            interpretation.filters.join(" AND ")
        ));
    }

    lines.push(String::new());
    lines.push("Measure configurations:".to_string());
    if request.known_measures.is_empty() {
        lines.push("- none of the identified measures are configured".to_string());
    }
    for measure in request.known_measures {
        lines.push(format!("- {} ({})", measure.name, measure.code));
        lines.push(format!("  formula: {}", measure.formula));
        lines.push(format!("  filters: {}", measure.required_filters.join(" AND ")));
        if !measure.default_group_by.is_empty() {
            lines.push(format!(
                "  default group by: {}",
                measure.default_group_by.join(", ")
            ));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{identification_prompt, rewrite_message};
    use crate::collaborators::{Interpretation, RewriteRequest};
    use crate::models::MeasureConfig;

    #[test]
    fn identification_prompt_embeds_schema_first() {
        let prompt = identification_prompt("Table: risk_measures");
        assert!(prompt.starts_with("Table: risk_measures"));
        assert!(prompt.contains("\"group_by\""));
    }

    #[test]
    fn rewrite_message_lists_configured_filters_verbatim() {
        let interpretation = Interpretation {
            measures: vec!["CE".to_string()],
            dimensions: vec!["obligor".to_string()],
            filters: Vec::new(),
        };
        let ce = MeasureConfig {
            code: "CE".to_string(),
            name: "Current Exposure".to_string(),
            aliases: Vec::new(),
            info_type: "CE".to_string(),
            formula: "SUM(info_value)".to_string(),
            report_aspects: vec!["CREDIT".to_string()],
            required_filters: vec!["info_type='CE'".to_string(), "measure_code='CE'".to_string()],
            default_group_by: Vec::new(),
        };
        let message = rewrite_message(&RewriteRequest {
            raw_query: "Show me CE by obligor",
            interpretation: &interpretation,
            known_measures: &[ce],
        });

        assert!(message.contains("Original query: Show me CE by obligor"));
        assert!(message.contains("filters: info_type='CE' AND measure_code='CE'"));
        assert!(!message.contains("Requested filters"));
    }
}
