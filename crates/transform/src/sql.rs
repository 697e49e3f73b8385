use std::hash::{Hash, Hasher};

use apmx_core::config::RecordSql;
use apmx_core::model::segment::DatastoreVendor;
use apmx_core::{ApmError, Result};
use fnv::FnvHasher;
use regex::Regex;

/// Byte cap for SQL carried on span events, including the trailing ellipsis.
pub const MAX_SQL_STATEMENT_BYTES: usize = 2000;

const ELLIPSIS: &str = "...";

/// Matches quoted literals (an unterminated quote runs to the end) and numeric literals.
const LITERAL_PATTERN: &str = concat!(
    r#"'(?:''|[^'])*'?"#,
    r#"|"(?:""|[^"])*"?"#,
    r"|\b0[xX][0-9a-fA-F]+\b",
    r"|\b\d+(?:\.\d+)?(?:[eE][+-]?\d+)?\b",
);

pub trait SqlObfuscator: Send + Sync {
    fn obfuscate(&self, sql: &str) -> Result<String>;
}

/// Replaces literals with `?`.
#[derive(Debug, Clone)]
pub struct RegexObfuscator {
    literals: Regex,
}

impl RegexObfuscator {
    pub fn new() -> Result<Self> {
        let literals = Regex::new(LITERAL_PATTERN)
            .map_err(|e| ApmError::Internal(format!("invalid SQL literal pattern: {e}")))?;
        Ok(Self { literals })
    }
}

impl SqlObfuscator for RegexObfuscator {
    fn obfuscate(&self, sql: &str) -> Result<String> {
        Ok(self.literals.replace_all(sql, "?").into_owned())
    }
}

/// Statement text as the record-sql policy allows it to leave the process.
/// `None` when recording is off.
pub fn prepare_sql(
    obfuscator: &dyn SqlObfuscator,
    sql: &str,
    record_sql: RecordSql,
) -> Result<Option<String>> {
    match record_sql {
        RecordSql::Obfuscated => obfuscator.obfuscate(sql).map(Some),
        RecordSql::Raw => Ok(Some(sql.to_string())),
        RecordSql::Off => Ok(None),
    }
}

/// Cuts `s` to at most `max_bytes`, ending in `...` when anything was dropped.
/// Never splits a character.
pub fn truncate_with_ellipsis(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes.saturating_sub(ELLIPSIS.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{ELLIPSIS}", &s[..end])
}

/// Stable id for a statement: equal inputs hash equally across processes.
pub fn sql_id(vendor: DatastoreVendor, statement: &str, metric_name: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    vendor.as_str().hash(&mut hasher);
    statement.hash(&mut hasher);
    metric_name.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn obfuscate(sql: &str) -> String {
        RegexObfuscator::new().unwrap().obfuscate(sql).unwrap()
    }

    #[test]
    fn numbers_and_strings_become_placeholders() {
        assert_eq!(
            obfuscate("SELECT * FROM users WHERE ssn = 433871122"),
            "SELECT * FROM users WHERE ssn = ?"
        );
        assert_eq!(
            obfuscate("SELECT * FROM t WHERE name = 'it''s' AND x = 1.5e3"),
            "SELECT * FROM t WHERE name = ? AND x = ?"
        );
        assert_eq!(obfuscate("SELECT 0xFF"), "SELECT ?");
    }

    #[test]
    fn identifiers_with_digits_survive() {
        assert_eq!(obfuscate("SELECT c1 FROM table2"), "SELECT c1 FROM table2");
    }

    #[test]
    fn unterminated_quote_runs_to_end() {
        assert_eq!(obfuscate("SELECT 'abc FROM t"), "SELECT ?");
    }

    #[test]
    fn record_sql_policy() {
        let ob = RegexObfuscator::new().unwrap();
        assert_eq!(
            prepare_sql(&ob, "SELECT 1", RecordSql::Obfuscated).unwrap().as_deref(),
            Some("SELECT ?")
        );
        assert_eq!(
            prepare_sql(&ob, "SELECT 1", RecordSql::Raw).unwrap().as_deref(),
            Some("SELECT 1")
        );
        assert!(prepare_sql(&ob, "SELECT 1", RecordSql::Off).unwrap().is_none());
    }

    #[test]
    fn truncation_fixed_cases() {
        assert_eq!(truncate_with_ellipsis("short", 2000), "short");

        let exact = "a".repeat(2000);
        assert_eq!(truncate_with_ellipsis(&exact, 2000), exact);

        let long = "a".repeat(2001);
        let cut = truncate_with_ellipsis(&long, 2000);
        assert_eq!(cut.len(), 2000);
        assert!(cut.ends_with("a..."));

        // 'é' is two bytes; byte 1997 falls inside one.
        let multibyte = format!("{}{}", "a".repeat(1996), "é".repeat(10));
        let cut = truncate_with_ellipsis(&multibyte, 2000);
        assert_eq!(cut, format!("{}...", "a".repeat(1996)));
    }

    #[test]
    fn sql_ids_are_stable_and_input_sensitive() {
        let a = sql_id(DatastoreVendor::MSSQL, "SELECT ?", "Datastore/statement/MSSQL/t/select");
        let b = sql_id(DatastoreVendor::MSSQL, "SELECT ?", "Datastore/statement/MSSQL/t/select");
        let c = sql_id(DatastoreVendor::MySQL, "SELECT ?", "Datastore/statement/MSSQL/t/select");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    proptest! {
        #[test]
        fn truncation_respects_budget_and_boundaries(s in "\\PC{0,1500}", max in 3usize..2500) {
            let cut = truncate_with_ellipsis(&s, max);
            prop_assert!(cut.len() <= max);
            if s.len() <= max {
                prop_assert_eq!(&cut, &s);
            } else {
                prop_assert!(cut.ends_with(ELLIPSIS));
                let kept = &cut[..cut.len() - ELLIPSIS.len()];
                prop_assert!(s.starts_with(kept));
            }
        }
    }
}
