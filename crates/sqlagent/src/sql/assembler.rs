use std::sync::OnceLock;

use regex::Regex;

use super::validator::check_predicate;
use crate::models::MeasureConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssemblyError {
    #[error("at least one measure is required to assemble SQL")]
    NoMeasures,

    #[error("{role} `{value}` is not a plain SQL identifier")]
    InvalidIdentifier { role: &'static str, value: String },

    #[error("filter predicate `{predicate}` is not allowed: {reason}")]
    InvalidFilter { predicate: String, reason: String },
}

/// Merged pieces of the statement, kept apart so callers can inspect them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledQuery {
    pub select: Vec<String>,
    pub table: String,
    pub predicates: Vec<String>,
    pub group_by: Vec<String>,
}

impl AssembledQuery {
    #[must_use]
    pub fn to_sql(&self) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.select.join(", "), self.table);
        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.predicates.join(" AND "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        sql
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("valid regex")
    })
}

fn disjunction_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\bOR\b").expect("valid regex"))
}

/// Builds the single SELECT for `measures` against the trusted `table`.
///
/// Group-by columns are the first-seen union of every measure's default
/// grouping followed by `requested_group_by`. The WHERE clause conjoins the
/// union of required filters with `requested_filters`. Contradictory fixed
/// values on one column (two measures pinning `info_type` differently) are
/// emitted as-is and produce an empty result at execution time.
pub fn assemble(
    table: &str,
    measures: &[MeasureConfig],
    requested_group_by: &[String],
    requested_filters: &[String],
) -> Result<AssembledQuery, AssemblyError> {
    if measures.is_empty() {
        return Err(AssemblyError::NoMeasures);
    }
    ensure_identifier("table", table)?;

    let mut measure_columns = Vec::new();
    let mut seen_codes: Vec<&str> = Vec::new();
    let mut group_by: Vec<String> = Vec::new();
    let mut predicates: Vec<String> = Vec::new();
    let mut predicate_keys: Vec<String> = Vec::new();

    for measure in measures {
        if seen_codes.contains(&measure.code.as_str()) {
            continue;
        }
        seen_codes.push(&measure.code);
        ensure_identifier("measure code", &measure.code)?;
        measure_columns.push(format!("{} AS {}", measure.formula, measure.code));

        for column in &measure.default_group_by {
            push_column(&mut group_by, column)?;
        }
        for predicate in &measure.required_filters {
            push_predicate(&mut predicates, &mut predicate_keys, predicate, false)?;
        }
    }

    for column in requested_group_by {
        push_column(&mut group_by, column)?;
    }
    for predicate in requested_filters {
        push_predicate(&mut predicates, &mut predicate_keys, predicate, true)?;
    }

    let mut select = measure_columns;
    select.extend(group_by.iter().cloned());

    Ok(AssembledQuery {
        select,
        table: table.to_string(),
        predicates,
        group_by,
    })
}

fn ensure_identifier(role: &'static str, value: &str) -> Result<(), AssemblyError> {
    if identifier_pattern().is_match(value) {
        Ok(())
    } else {
        Err(AssemblyError::InvalidIdentifier {
            role,
            value: value.to_string(),
        })
    }
}

fn push_column(group_by: &mut Vec<String>, column: &str) -> Result<(), AssemblyError> {
    let column = column.trim();
    ensure_identifier("group-by column", column)?;
    if !group_by
        .iter()
        .any(|existing| existing.eq_ignore_ascii_case(column))
    {
        group_by.push(column.to_string());
    }
    Ok(())
}

fn push_predicate(
    predicates: &mut Vec<String>,
    keys: &mut Vec<String>,
    predicate: &str,
    requested: bool,
) -> Result<(), AssemblyError> {
    let trimmed = predicate.trim();
    let invalid = |reason: String| AssemblyError::InvalidFilter {
        predicate: predicate.to_string(),
        reason,
    };
    if trimmed.is_empty() {
        return Err(invalid("predicate is empty".to_string()));
    }
    if trimmed.contains("--") || trimmed.contains("/*") {
        return Err(invalid("predicate contains a comment".to_string()));
    }
    check_predicate(trimmed).map_err(|rejection| invalid(rejection.detail))?;

    let key = predicate_key(trimmed);
    if keys.contains(&key) {
        return Ok(());
    }
    keys.push(key);

    // Requested predicates come from free text and always get their own group;
    // a bare disjunction would escape the surrounding AND chain.
    let needs_group = requested || disjunction_pattern().is_match(trimmed);
    if needs_group && !is_parenthesized(trimmed) {
        predicates.push(format!("({trimmed})"));
    } else {
        predicates.push(trimmed.to_string());
    }
    Ok(())
}

fn predicate_key(predicate: &str) -> String {
    predicate.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_parenthesized(predicate: &str) -> bool {
    if !(predicate.starts_with('(') && predicate.ends_with(')')) {
        return false;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (position, ch) in predicate.char_indices() {
        match (quote, ch) {
            (Some(open), _) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth = depth.saturating_sub(1);
                if depth == 0 && position + 1 < predicate.len() {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::{AssemblyError, assemble};
    use crate::models::MeasureConfig;

    fn measure(code: &str, filters: &[&str], group_by: &[&str]) -> MeasureConfig {
        MeasureConfig {
            code: code.to_string(),
            name: code.to_string(),
            aliases: Vec::new(),
            info_type: code.to_string(),
            formula: "SUM(info_value)".to_string(),
            report_aspects: vec!["CREDIT".to_string()],
            required_filters: filters.iter().map(ToString::to_string).collect(),
            default_group_by: group_by.iter().map(ToString::to_string).collect(),
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn single_measure_matches_reference_statement() {
        let ce = measure(
            "CE",
            &[
                "info_type='CE'",
                "measure_code='CE'",
                "report_aspect IN ('CREDIT','CREDIT_ALD')",
            ],
            &["obligor_rdm_id"],
        );
        let query = assemble("risk_measures", &[ce], &strings(&["obligor_rdm_id"]), &[])
            .expect("assembly should succeed");

        assert_snapshot!(
            query.to_sql(),
            @"SELECT SUM(info_value) AS CE, obligor_rdm_id FROM risk_measures WHERE info_type='CE' AND measure_code='CE' AND report_aspect IN ('CREDIT','CREDIT_ALD') GROUP BY obligor_rdm_id"
        );
    }

    #[test]
    fn shared_group_by_column_appears_once() {
        let ce = measure("CE", &["info_type='CE'"], &["obligor_rdm_id"]);
        let ead = measure("EAD", &["info_type='EAD'"], &["obligor_rdm_id", "legal_entity"]);
        let query = assemble("risk_measures", &[ce, ead], &[], &[]).expect("assembly");

        assert_eq!(query.group_by, vec!["obligor_rdm_id", "legal_entity"]);
        assert_eq!(query.to_sql().matches("obligor_rdm_id").count(), 2);
        assert_snapshot!(
            query.to_sql(),
            @"SELECT SUM(info_value) AS CE, SUM(info_value) AS EAD, obligor_rdm_id, legal_entity FROM risk_measures WHERE info_type='CE' AND info_type='EAD' GROUP BY obligor_rdm_id, legal_entity"
        );
    }

    #[test]
    fn contradictory_filters_are_conjoined_without_reconciliation() {
        let ce = measure("CE", &["info_type='CE'", "measure_code='CE'"], &[]);
        let lgd = measure("LGD", &["info_type='LGD'", "measure_code = 'CE'"], &[]);
        let query = assemble("risk_measures", &[ce, lgd], &[], &[]).expect("assembly");

        assert_eq!(
            query.predicates,
            vec!["info_type='CE'", "measure_code='CE'", "info_type='LGD'", "measure_code = 'CE'"]
        );
    }

    #[test]
    fn requested_filters_are_deduplicated_against_required_ones() {
        let ce = measure("CE", &["info_type='CE'"], &[]);
        let query = assemble(
            "risk_measures",
            &[ce],
            &[],
            &strings(&["info_type  =  'CE'", "info_type='CE'", "is_internal = 1"]),
        )
        .expect("assembly");

        assert_eq!(
            query.predicates,
            vec!["info_type='CE'", "(info_type  =  'CE')", "(is_internal = 1)"]
        );
    }

    #[test]
    fn whitespace_variants_of_the_same_predicate_collapse() {
        let ce = measure("CE", &["info_type = 'CE'"], &[]);
        let query = assemble(
            "risk_measures",
            &[ce],
            &[],
            &strings(&["info_type   =   'CE'"]),
        )
        .expect("assembly");
        assert_eq!(query.predicates, vec!["info_type = 'CE'"]);
    }

    #[test]
    fn disjunctions_are_parenthesized() {
        let ce = measure("CE", &["info_type='CE'"], &[]);
        let query = assemble(
            "risk_measures",
            &[ce],
            &[],
            &strings(&["legal_entity = 'A' OR legal_entity = 'B'", "(is_internal = 1 or is_internal = 0)"]),
        )
        .expect("assembly");

        assert_eq!(
            query.predicates,
            vec![
                "info_type='CE'",
                "(legal_entity = 'A' OR legal_entity = 'B')",
                "(is_internal = 1 or is_internal = 0)"
            ]
        );
    }

    #[test]
    fn duplicate_measures_are_selected_once() {
        let ce = measure("CE", &["info_type='CE'"], &[]);
        let query = assemble("risk_measures", &[ce.clone(), ce], &[], &[]).expect("assembly");
        assert_eq!(query.select, vec!["SUM(info_value) AS CE"]);
        assert!(!query.to_sql().contains("GROUP BY"));
    }

    #[test]
    fn rejects_empty_measure_list_and_unsafe_inputs() {
        assert_eq!(
            assemble("risk_measures", &[], &[], &[]),
            Err(AssemblyError::NoMeasures)
        );

        let ce = measure("CE", &["info_type='CE'"], &[]);
        assert!(matches!(
            assemble("risk_measures; DROP TABLE x", &[ce.clone()], &[], &[]),
            Err(AssemblyError::InvalidIdentifier { role: "table", .. })
        ));
        assert!(matches!(
            assemble("risk_measures", &[ce.clone()], &strings(&["a, b"]), &[]),
            Err(AssemblyError::InvalidIdentifier { .. })
        ));
        assert!(matches!(
            assemble("risk_measures", &[ce], &[], &strings(&["1=1; DELETE FROM t"])),
            Err(AssemblyError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn requested_filters_cannot_close_the_where_clause() {
        let ce = measure("CE", &["info_type='CE'"], &[]);
        let escape = strings(&["1=1) UNION SELECT secret FROM credentials WHERE (1=1"]);
        let error = assemble("risk_measures", &[ce.clone()], &[], &escape)
            .expect_err("unbalanced predicate should be refused");
        assert!(matches!(error, AssemblyError::InvalidFilter { .. }));

        for predicate in [
            "legal_entity IN (SELECT legal_entity FROM credentials)",
            "1=1 UNION ALL SELECT 1",
            "(a = 1",
            "name = 'x\\'; DROP TABLE risk_measures; --'",
        ] {
            assert!(
                matches!(
                    assemble("risk_measures", &[ce.clone()], &[], &strings(&[predicate])),
                    Err(AssemblyError::InvalidFilter { .. })
                ),
                "{predicate}"
            );
        }
    }

    #[test]
    fn requested_filters_are_wrapped_in_their_own_group() {
        let ce = measure("CE", &["info_type='CE'"], &[]);
        let query = assemble(
            "risk_measures",
            &[ce],
            &[],
            &strings(&["legal_entity = 'LE-1'", "note = ')'", "('(' = a) OR (b = ')')"]),
        )
        .expect("assembly");

        assert_snapshot!(
            query.to_sql(),
            @"SELECT SUM(info_value) AS CE FROM risk_measures WHERE info_type='CE' AND (legal_entity = 'LE-1') AND (note = ')') AND (('(' = a) OR (b = ')'))"
        );
    }
}
