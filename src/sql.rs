//! Identifier quoting, literal escaping and small SQL-fragment builders shared
//! by every SQL-generating component. Nothing here interpolates a caller
//! controlled value straight into a statement without going through one of
//! these helpers.

use chrono::NaiveDate;

use crate::error::{Result, ScdError};

/// Quote an identifier (double-quote, escaping inner double-quotes).
pub fn qi(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Escape a string literal for inline interpolation (single-quote doubling).
/// Used only for trusted, already-validated text (e.g. a parsed date's ISO
/// rendering); free-form caller values are bound as parameters instead.
pub fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Parse and validate a `YYYY-MM-DD` date string, rejecting anything else.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| ScdError::InvalidDate(s.to_string()))
}

/// Build the NULL-safe pairwise equality fragment `SAME(left, right)` over a
/// set of value columns, given the two column-alias prefixes to compare.
/// e.g. `same_expr(&values, "i", "sm")` yields
/// `((i_v IS NULL AND sm_v IS NULL) OR i_v = sm_v) AND ...`.
pub fn same_expr(value_cols: &[String], left_prefix: &str, right_prefix: &str) -> String {
    if value_cols.is_empty() {
        return "TRUE".to_string();
    }
    value_cols
        .iter()
        .map(|c| {
            let l = qi(&format!("{left_prefix}_{c}"));
            let r = qi(&format!("{right_prefix}_{c}"));
            format!("(({l} IS NULL AND {r} IS NULL) OR {l} = {r})")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}
