//! Where-key grammar.
//!
//! A where key is `"field"` or `"field operator"`, where the operator may be
//! prefixed by `!` to negate it (`"title !like"`). The negation marker must
//! touch the operator; `"title ! like"` is rejected.

use crate::error::{QueryError, QueryResult};

use super::types::{ConditionToken, Operator};

/// Parse a where key into a condition token.
///
/// `relation_operators` enables `has`, `hasany` and `hasall`; without it those
/// tokens are a grammar error naming the key.
pub fn parse_condition(key: &str, relation_operators: bool) -> QueryResult<ConditionToken> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(QueryError::grammar(key, "empty where key"));
    }

    let Some((field, operator_part)) = trimmed.split_once(' ') else {
        return Ok(ConditionToken {
            field: validated_field(key, trimmed)?,
            operator: Operator::Equals,
            negated: false,
        });
    };

    let field = validated_field(key, field)?;
    let operator_part = operator_part.trim();

    let (negated, operator_text) = match operator_part.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, operator_part),
    };

    if operator_text.is_empty() {
        return Err(QueryError::grammar(key, "missing operator after negation marker"));
    }
    if operator_text.starts_with(char::is_whitespace) {
        return Err(QueryError::grammar(
            key,
            "whitespace between negation marker and operator",
        ));
    }

    let operator = match_operator(&operator_text.to_lowercase(), relation_operators)
        .ok_or_else(|| {
            let reason = if !relation_operators && is_relation_token(operator_text) {
                format!("operator '{operator_text}' is not supported by this adapter")
            } else {
                format!("unknown operator '{operator_text}'")
            };
            QueryError::grammar(key, reason)
        })?;

    Ok(ConditionToken {
        field,
        operator,
        negated,
    })
}

fn match_operator(text: &str, relation_operators: bool) -> Option<Operator> {
    let mut allowed = Operator::BASIC.to_vec();
    if relation_operators {
        allowed.extend(Operator::RELATION);
    }
    allowed.into_iter().find(|op| op.token() == text)
}

fn is_relation_token(text: &str) -> bool {
    let text = text.to_lowercase();
    Operator::RELATION.iter().any(|op| op.token() == text)
}

/// Field names are dotted identifiers (`title`, `company.uid`).
fn validated_field(key: &str, field: &str) -> QueryResult<String> {
    if is_safe_field_path(field) {
        Ok(field.to_string())
    } else {
        Err(QueryError::grammar(key, format!("invalid field name '{field}'")))
    }
}

/// Allows only `[a-zA-Z_][a-zA-Z0-9_]*` segments, dot-separated.
pub(crate) fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

fn is_safe_field_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(is_safe_identifier)
}
