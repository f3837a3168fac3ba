//! Running SQL against a resolved artifact

use miette::Diagnostic;
use rusqlite::types::Value;
use thiserror::Error;

use crate::core::cache::{ArtifactHandle, CacheError};

/// Result set of one query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Open(#[from] CacheError),

    #[error("SQL error: {0}")]
    #[diagnostic(
        code(quarry::query::sql),
        help("each source is a table named after its file; see 'quarry import' for the names")
    )]
    Sql(#[from] rusqlite::Error),
}

/// Execute `sql` against the artifact behind `handle`
pub fn run_query(handle: &ArtifactHandle, sql: &str) -> Result<QueryResult, QueryError> {
    let conn = handle.connect()?;
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let width = columns.len();

    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(QueryResult { columns, rows })
}

/// Render a value the way the text output formats show it
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

/// Convert a value to JSON for the json output format
pub fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Blob(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{ImportCache, MissReason};
    use crate::core::options::ImportOptions;
    use crate::core::source::SourceDescriptor;
    use crate::formats::Format;

    fn handle(json: &str) -> ArtifactHandle {
        let sources = vec![SourceDescriptor::piped(
            json.as_bytes().to_vec(),
            Format::Json,
            "t",
        )];
        ImportCache::import_uncached(&sources, &ImportOptions::default(), MissReason::UnstableSource)
            .unwrap()
            .handle
    }

    #[test]
    fn test_query_columns_and_rows() {
        let handle = handle(r#"[{"a":1,"b":"x"},{"a":2,"b":null}]"#);
        let result = run_query(&handle, "SELECT a, b FROM t ORDER BY a").unwrap();
        assert_eq!(result.columns, ["a", "b"]);
        assert_eq!(result.rows[0], vec![Value::Integer(1), Value::Text("x".to_string())]);
        assert_eq!(result.rows[1][1], Value::Null);
    }

    #[test]
    fn test_artifact_is_read_only() {
        let handle = handle(r#"[{"a":1}]"#);
        assert!(matches!(
            run_query(&handle, "DELETE FROM t"),
            Err(QueryError::Sql(_))
        ));
    }

    #[test]
    fn test_bad_sql() {
        let handle = handle(r#"[{"a":1}]"#);
        assert!(run_query(&handle, "SELECT nope FROM t").is_err());
    }

    #[test]
    fn test_render_values() {
        assert_eq!(display_value(&Value::Null), "");
        assert_eq!(display_value(&Value::Real(1.5)), "1.5");
        assert_eq!(json_value(&Value::Integer(3)), serde_json::json!(3));
    }
}
