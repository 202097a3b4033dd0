use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Keywords that never appear in a read-only statement.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE", "EXEC",
    "EXECUTE", "MERGE", "CALL", "INTO",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlRule {
    UnterminatedToken,
    EmptyStatement,
    MultipleStatements,
    NotSelect,
    ForbiddenKeyword,
    UnbalancedParentheses,
}

impl SqlRule {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnterminatedToken => "unterminated_token",
            Self::EmptyStatement => "empty_statement",
            Self::MultipleStatements => "multiple_statements",
            Self::NotSelect => "not_select",
            Self::ForbiddenKeyword => "forbidden_keyword",
            Self::UnbalancedParentheses => "unbalanced_parentheses",
        }
    }
}

impl Display for SqlRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a statement was refused. `token` is the offending keyword or
/// construct, when there is one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("SQL rejected ({rule}): {detail}")]
pub struct SqlRejection {
    pub rule: SqlRule,
    pub detail: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SqlRejection {
    fn new(rule: SqlRule, detail: impl Into<String>, token: Option<String>) -> Self {
        Self {
            rule,
            detail: detail.into(),
            token,
        }
    }

    #[must_use]
    pub fn details(&self) -> Value {
        json!({
            "guardrail": "read_only_single_select",
            "rule": self.rule,
            "token": self.token,
            "forbidden_keywords": FORBIDDEN_KEYWORDS,
        })
    }
}

/// SQL text that passed `validate`. Only this type reaches an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for ValidatedSql {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted,
    Separator,
    Symbol(char),
}

/// Allow-SELECT-only gate. Rules run in order and the first failure wins:
/// lexing, empty input, statement stacking, leading keyword, forbidden
/// keywords. String literals and quoted identifiers are opaque.
pub fn validate(sql: &str) -> Result<ValidatedSql, SqlRejection> {
    let mut tokens = tokenize(sql)?;
    while matches!(tokens.last(), Some(Token::Separator)) {
        tokens.pop();
    }

    if tokens.is_empty() {
        return Err(SqlRejection::new(
            SqlRule::EmptyStatement,
            "SQL is empty after removing comments and trailing semicolons",
            None,
        ));
    }

    if tokens.contains(&Token::Separator) {
        return Err(SqlRejection::new(
            SqlRule::MultipleStatements,
            "more than one statement submitted; exactly one SELECT is allowed",
            Some(";".to_string()),
        ));
    }

    match tokens.first() {
        Some(Token::Word(word)) if word.eq_ignore_ascii_case("select") => {}
        first => {
            let leading = match first {
                Some(Token::Word(word)) => word.to_ascii_uppercase(),
                _ => "<non-keyword>".to_string(),
            };
            return Err(SqlRejection::new(
                SqlRule::NotSelect,
                format!("statement starts with `{leading}`; only SELECT statements are allowed"),
                Some(leading),
            ));
        }
    }

    let forbidden = tokens.iter().find_map(|token| match token {
        Token::Word(word) => FORBIDDEN_KEYWORDS
            .iter()
            .find(|keyword| word.eq_ignore_ascii_case(keyword))
            .copied(),
        _ => None,
    });
    if let Some(keyword) = forbidden {
        return Err(SqlRejection::new(
            SqlRule::ForbiddenKeyword,
            format!("forbidden keyword `{keyword}` found in statement"),
            Some(keyword.to_string()),
        ));
    }

    Ok(ValidatedSql(strip_trailing_semicolons(sql).to_string()))
}

/// Words that would let a WHERE fragment open a second query.
const QUERY_KEYWORDS: &[&str] = &["SELECT", "UNION", "INTERSECT", "EXCEPT"];

/// Checks a predicate that will be spliced into a WHERE clause. It must lex
/// cleanly, hold no separator, keep its parentheses balanced and name no
/// forbidden or query keyword.
pub fn check_predicate(fragment: &str) -> Result<(), SqlRejection> {
    let tokens = tokenize(fragment)?;

    if tokens.contains(&Token::Separator) {
        return Err(SqlRejection::new(
            SqlRule::MultipleStatements,
            "predicate contains a statement separator",
            Some(";".to_string()),
        ));
    }

    let mut depth = 0usize;
    for token in &tokens {
        match token {
            Token::Symbol('(') => depth += 1,
            Token::Symbol(')') => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    SqlRejection::new(
                        SqlRule::UnbalancedParentheses,
                        "predicate closes a parenthesis it never opened",
                        Some(")".to_string()),
                    )
                })?;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(SqlRejection::new(
            SqlRule::UnbalancedParentheses,
            "predicate leaves a parenthesis open",
            Some("(".to_string()),
        ));
    }

    let keyword = tokens.iter().find_map(|token| match token {
        Token::Word(word) => FORBIDDEN_KEYWORDS
            .iter()
            .chain(QUERY_KEYWORDS)
            .find(|keyword| word.eq_ignore_ascii_case(keyword))
            .copied(),
        _ => None,
    });
    if let Some(keyword) = keyword {
        return Err(SqlRejection::new(
            SqlRule::ForbiddenKeyword,
            format!("keyword `{keyword}` is not allowed in a predicate"),
            Some(keyword.to_string()),
        ));
    }

    Ok(())
}

fn strip_trailing_semicolons(raw_sql: &str) -> &str {
    let mut candidate = raw_sql.trim();
    while let Some(stripped) = candidate.strip_suffix(';') {
        candidate = stripped.trim_end();
    }
    candidate
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

fn tokenize(sql: &str) -> Result<Vec<Token>, SqlRejection> {
    let chars = sql.chars().collect::<Vec<_>>();
    let mut tokens = Vec::new();
    let mut index = 0usize;

    while index < chars.len() {
        let ch = chars[index];
        let next = chars.get(index + 1).copied();

        if ch.is_whitespace() {
            index += 1;
        } else if ch == '-' && next == Some('-') {
            while index < chars.len() && chars[index] != '\n' {
                index += 1;
            }
        } else if ch == '/' && next == Some('*') {
            index += 2;
            loop {
                if index + 1 >= chars.len() {
                    return Err(unterminated("block comment"));
                }
                if chars[index] == '*' && chars[index + 1] == '/' {
                    index += 2;
                    break;
                }
                index += 1;
            }
        } else if matches!(ch, '\'' | '"' | '`') {
            index = skip_quoted(&chars, index, ch)?;
            tokens.push(Token::Quoted);
        } else if ch == ';' {
            tokens.push(Token::Separator);
            index += 1;
        } else if is_word_char(ch) {
            let start = index;
            while index < chars.len() && is_word_char(chars[index]) {
                index += 1;
            }
            tokens.push(Token::Word(chars[start..index].iter().collect()));
        } else {
            tokens.push(Token::Symbol(ch));
            index += 1;
        }
    }

    Ok(tokens)
}

/// Returns the index just past the closing quote; a doubled quote escapes.
fn skip_quoted(chars: &[char], start: usize, quote: char) -> Result<usize, SqlRejection> {
    let mut index = start + 1;
    while index < chars.len() {
        if chars[index] == quote {
            if chars.get(index + 1) == Some(&quote) {
                index += 2;
                continue;
            }
            return Ok(index + 1);
        }
        index += 1;
    }

    let construct = match quote {
        '\'' => "string literal",
        _ => "quoted identifier",
    };
    Err(unterminated(construct))
}

fn unterminated(construct: &str) -> SqlRejection {
    SqlRejection::new(
        SqlRule::UnterminatedToken,
        format!("unterminated {construct}"),
        Some(construct.to_string()),
    )
}
