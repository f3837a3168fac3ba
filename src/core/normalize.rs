//! Schema normalizer - shapes heterogeneous records into uniform rows
//!
//! Normalization runs in two passes over the same source. The first pass
//! discovers the column set (first-seen order) and widens each column's type;
//! the second re-reads the source and emits one cell per column, null-filled
//! and coerced to the column's final type.
//!
//! Flattening rules:
//! - nested objects join their keys with `_` (`user.name` -> `user_name`)
//! - arrays of scalars become one `;`-joined text cell
//! - arrays containing objects or arrays are kept as compact JSON text and
//!   reported as a warning
//! - `#text` inside a nested element names the element itself, so markup
//!   text lands in column `p` next to its attributes in `p_@a`
//!
//! Columns are keyed by the value's path in the record, not by its joined
//! name, so a literal `a_b` and a nested `a.b` stay in separate columns for
//! the whole table. Whichever appears first keeps the plain name.

use std::collections::{HashMap, HashSet};
use std::fmt;

use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::formats::{FormatError, Record, RecordStream, TEXT_KEY, VALUE_KEY};

/// Column type, ordered by widening precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Boolean,
    Integer,
    Float,
    Text,
}

impl ColumnType {
    /// Declared SQLite type
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    pub fn widen(self, other: ColumnType) -> ColumnType {
        self.max(other)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
        };
        f.write_str(name)
    }
}

/// One scalar value of a normalized row
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Cell::Null => None,
            Cell::Boolean(_) => Some(ColumnType::Boolean),
            Cell::Integer(_) => Some(ColumnType::Integer),
            Cell::Float(_) => Some(ColumnType::Float),
            Cell::Text(_) => Some(ColumnType::Text),
        }
    }

    /// Convert to a column type at least as wide as this cell's own
    pub fn coerce(self, ty: ColumnType) -> Cell {
        match (self, ty) {
            (Cell::Null, _) => Cell::Null,
            (Cell::Boolean(b), ColumnType::Integer) => Cell::Integer(b as i64),
            (Cell::Boolean(b), ColumnType::Float) => Cell::Float(if b { 1.0 } else { 0.0 }),
            (Cell::Integer(i), ColumnType::Float) => Cell::Float(i as f64),
            (Cell::Text(s), ColumnType::Text) => Cell::Text(s),
            (cell, ColumnType::Text) => Cell::Text(cell.to_string()),
            (cell, _) => cell,
        }
    }

    /// Interpret untyped text: booleans, integers, floats, else text
    pub fn infer(text: &str) -> Cell {
        if text.is_empty() {
            return Cell::Null;
        }
        if text.eq_ignore_ascii_case("true") {
            return Cell::Boolean(true);
        }
        if text.eq_ignore_ascii_case("false") {
            return Cell::Boolean(false);
        }
        if !has_leading_zero(text) {
            if let Ok(i) = text.parse::<i64>() {
                return Cell::Integer(i);
            }
            if text.bytes().any(|b| b.is_ascii_digit()) {
                if let Ok(f) = text.parse::<f64>() {
                    if f.is_finite() {
                        return Cell::Float(f);
                    }
                }
            }
        }
        Cell::Text(text.to_string())
    }
}

/// `007` and `-01` are identifiers, not numbers
fn has_leading_zero(text: &str) -> bool {
    let digits = text.trim_start_matches(['+', '-']);
    let mut chars = digits.chars();
    chars.next() == Some('0') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Boolean(b) => write!(f, "{}", b),
            Cell::Integer(i) => write!(f, "{}", i),
            Cell::Float(x) => write!(f, "{}", x),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

impl ToSql for Cell {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Cell::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Cell::Boolean(b) => ToSqlOutput::from(*b as i64),
            Cell::Integer(i) => ToSqlOutput::from(*i),
            Cell::Float(f) => ToSqlOutput::from(*f),
            Cell::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// A resolved column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

/// Final column set of one table
#[derive(Debug, Clone, Default)]
pub struct Schema {
    columns: Vec<Column>,
    /// Flattened record path -> column position
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, path: &str) -> Option<usize> {
        self.index.get(path).copied()
    }
}

/// Builds a [`Schema`] while records stream past
#[derive(Default)]
struct SchemaBuilder {
    columns: Vec<Column>,
    seen_value: Vec<bool>,
    index: HashMap<String, usize>,
    taken: HashSet<String>,
}

impl SchemaBuilder {
    fn column_for(&mut self, path: &str, base: &str) -> usize {
        if let Some(&position) = self.index.get(path) {
            return position;
        }

        let mut name = base.to_string();
        let mut n = 2;
        while self.taken.contains(&name.to_lowercase()) {
            name = format!("{}_{}", base, n);
            n += 1;
        }

        let position = self.columns.len();
        self.taken.insert(name.to_lowercase());
        self.columns.push(Column {
            name,
            ty: ColumnType::Boolean,
        });
        self.seen_value.push(false);
        self.index.insert(path.to_string(), position);
        position
    }

    fn observe(&mut self, key: &FlatKey, cell: &Cell) {
        let position = self.column_for(&key.path, &key.name);
        if let Some(ty) = cell.column_type() {
            let column = &mut self.columns[position];
            column.ty = if self.seen_value[position] {
                column.ty.widen(ty)
            } else {
                ty
            };
            self.seen_value[position] = true;
        }
    }

    fn finish(mut self) -> Schema {
        if self.columns.is_empty() {
            self.column_for(VALUE_KEY, VALUE_KEY);
        }
        for (column, seen) in self.columns.iter_mut().zip(&self.seen_value) {
            if !seen {
                column.ty = ColumnType::Text;
            }
        }
        Schema {
            columns: self.columns,
            index: self.index,
        }
    }
}

/// Something worth telling the user about a column, reported once per column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub column: String,
    pub first_record: u64,
    pub occurrences: u64,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "column '{}': nested array stored as JSON text (first at record {}, {} record(s))",
            self.column, self.first_record, self.occurrences
        )
    }
}

/// Result of the discovery pass
#[derive(Debug)]
pub struct Discovery {
    pub schema: Schema,
    pub records: u64,
    pub warnings: Vec<Warning>,
}

/// Flattens records and resolves their schema
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    infer_text: bool,
    row_limit: Option<u64>,
}

impl Normalizer {
    /// `infer_text` types string values (for formats whose values are all text)
    pub fn new(infer_text: bool, row_limit: Option<u64>) -> Self {
        Self {
            infer_text,
            row_limit,
        }
    }

    fn limited<'a>(&self, stream: RecordStream<'a>) -> impl Iterator<Item = Result<Record, FormatError>> + 'a {
        let limit = self.row_limit.map(|l| l as usize).unwrap_or(usize::MAX);
        stream.take(limit)
    }

    /// First pass: discover columns and types
    pub fn discover(&self, stream: RecordStream<'_>) -> Result<Discovery, FormatError> {
        let mut builder = SchemaBuilder::default();
        for name in stream.declared_columns() {
            builder.column_for(name, name);
        }

        let mut warnings: Vec<Warning> = Vec::new();
        let mut records = 0u64;

        for record in self.limited(stream) {
            let record = record?;
            records += 1;

            let flat = flatten(record, self.infer_text);
            for column in flat.json_columns {
                match warnings.iter_mut().find(|w| w.column == column) {
                    Some(warning) => warning.occurrences += 1,
                    None => warnings.push(Warning {
                        column,
                        first_record: records,
                        occurrences: 1,
                    }),
                }
            }
            for (key, cell) in &flat.cells {
                builder.observe(key, cell);
            }
        }

        let schema = builder.finish();
        debug!(
            records,
            columns = schema.len(),
            warnings = warnings.len(),
            "schema discovered"
        );
        Ok(Discovery {
            schema,
            records,
            warnings,
        })
    }

    /// Second pass: emit rows shaped by `schema`
    pub fn rows<'a>(
        &self,
        schema: &'a Schema,
        stream: RecordStream<'a>,
    ) -> impl Iterator<Item = Result<Vec<Cell>, FormatError>> + 'a {
        let infer_text = self.infer_text;
        self.limited(stream).map(move |record| {
            let flat = flatten(record?, infer_text);
            let mut row = vec![Cell::Null; schema.len()];
            for (key, cell) in flat.cells {
                if let Some(position) = schema.position(&key.path) {
                    row[position] = cell.coerce(schema.columns[position].ty);
                }
            }
            Ok(row)
        })
    }
}

/// Separates path segments; cannot occur in a column name
const PATH_SEP: char = '\u{1f}';

/// Where a flattened value came from, and the name it would like
#[derive(Debug, Clone)]
struct FlatKey {
    path: String,
    name: String,
}

impl FlatKey {
    fn root(key: String) -> Self {
        Self {
            path: key.clone(),
            name: key,
        }
    }

    fn child(&self, child: &str) -> Self {
        Self {
            path: format!("{}{}{}", self.path, PATH_SEP, child),
            name: format!("{}_{}", self.name, child),
        }
    }
}

/// One record flattened to `(key, cell)` pairs
#[derive(Debug, Default)]
struct Flattened {
    cells: Vec<(FlatKey, Cell)>,
    /// Names of values whose arrays were kept as JSON text
    json_columns: Vec<String>,
}

/// Flatten a record; a path repeated within one record gets `_2`, `_3`, ...
fn flatten(record: Record, infer_text: bool) -> Flattened {
    let mut flat = Flattened::default();
    for (key, value) in record {
        flatten_value(FlatKey::root(key), value, infer_text, &mut flat);
    }

    let mut occurrences: HashMap<String, usize> = HashMap::new();
    for (key, _) in flat.cells.iter_mut() {
        let n = occurrences.entry(key.path.clone()).or_insert(0);
        *n += 1;
        if *n > 1 {
            key.path = format!("{}{}#{}", key.path, PATH_SEP, n);
            key.name = format!("{}_{}", key.name, n);
        }
    }
    flat
}

fn flatten_value(key: FlatKey, value: Value, infer_text: bool, flat: &mut Flattened) {
    match value {
        Value::Object(map) if map.is_empty() => flat.cells.push((key, Cell::Null)),
        Value::Object(map) => {
            for (child, value) in map {
                let child_key = if child == TEXT_KEY {
                    key.clone()
                } else {
                    key.child(&child)
                };
                flatten_value(child_key, value, infer_text, flat);
            }
        }
        Value::Array(items) if items.is_empty() => flat.cells.push((key, Cell::Null)),
        Value::Array(items) => {
            if items
                .iter()
                .any(|item| matches!(item, Value::Object(_) | Value::Array(_)))
            {
                let json = Value::Array(items).to_string();
                flat.json_columns.push(key.name.clone());
                flat.cells.push((key, Cell::Text(json)));
            } else {
                let joined = items
                    .iter()
                    .map(scalar_text)
                    .collect::<Vec<_>>()
                    .join(";");
                flat.cells.push((key, Cell::Text(joined)));
            }
        }
        scalar => flat.cells.push((key, scalar_cell(scalar, infer_text))),
    }
}

fn scalar_cell(value: Value, infer_text: bool) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Bool(b) => Cell::Boolean(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Cell::Integer(i),
            None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
        },
        Value::String(s) if infer_text => Cell::infer(&s),
        Value::String(s) => Cell::Text(s),
        other => Cell::Text(other.to_string()),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{CsvAdapter, Format, FormatAdapter, JsonAdapter, JsonLinesAdapter, XmlAdapter};
    use std::io::Cursor;

    fn run(
        adapter: &dyn FormatAdapter,
        input: &'static str,
        limit: Option<u64>,
    ) -> (Discovery, Vec<Vec<Cell>>) {
        let normalizer = Normalizer::new(adapter.infers_types(), limit);
        let discovery = normalizer
            .discover(adapter.open(Box::new(Cursor::new(input.as_bytes()))).unwrap())
            .unwrap();
        let rows = normalizer
            .rows(
                &discovery.schema,
                adapter.open(Box::new(Cursor::new(input.as_bytes()))).unwrap(),
            )
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        (discovery, rows)
    }

    fn names(schema: &Schema) -> Vec<&str> {
        schema.columns().iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_jsonl_widening_fills_nulls() {
        let input = "{\"a\":1,\"b\":\"x\"}\n{\"a\":2,\"b\":\"y\"}\n{\"a\":3,\"b\":\"z\",\"c\":true}\n";
        let (discovery, rows) = run(&JsonLinesAdapter, input, None);

        assert_eq!(names(&discovery.schema), ["a", "b", "c"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][2], Cell::Null);
        assert_eq!(rows[1][2], Cell::Null);
        assert_eq!(rows[2][2], Cell::Boolean(true));
    }

    #[test]
    fn test_nested_json_flattens_with_underscore() {
        let input = r#"[{"user":{"name":"A","age":1}},{"user":{"name":"B"}}]"#;
        let (discovery, rows) = run(&JsonAdapter::default(), input, None);

        assert_eq!(names(&discovery.schema), ["user_name", "user_age"]);
        assert_eq!(rows[1][0], Cell::Text("B".to_string()));
        assert_eq!(rows[1][1], Cell::Null);
        assert_eq!(discovery.schema.columns()[1].ty, ColumnType::Integer);
    }

    #[test]
    fn test_type_widening_order() {
        let input = "[{\"v\":true},{\"v\":2},{\"v\":2.5}]";
        let (discovery, rows) = run(&JsonAdapter::default(), input, None);
        assert_eq!(discovery.schema.columns()[0].ty, ColumnType::Float);
        assert_eq!(rows[0][0], Cell::Float(1.0));
        assert_eq!(rows[1][0], Cell::Float(2.0));

        let input = "[{\"v\":1},{\"v\":\"n/a\"}]";
        let (discovery, rows) = run(&JsonAdapter::default(), input, None);
        assert_eq!(discovery.schema.columns()[0].ty, ColumnType::Text);
        assert_eq!(rows[0][0], Cell::Text("1".to_string()));
    }

    #[test]
    fn test_csv_text_is_inferred() {
        let adapter = CsvAdapter::new(Format::Csv, ',', true).unwrap();
        let input = "id,price,active,code,note\n1,2.50,true,007,\n2,3,FALSE,010,hi\n";
        let (discovery, rows) = run(&adapter, input, None);
        let types: Vec<_> = discovery.schema.columns().iter().map(|c| c.ty).collect();
        assert_eq!(
            types,
            [
                ColumnType::Integer,
                ColumnType::Float,
                ColumnType::Boolean,
                ColumnType::Text,
                ColumnType::Text
            ]
        );
        assert_eq!(rows[0][4], Cell::Null);
        assert_eq!(rows[1][1], Cell::Float(3.0));
        assert_eq!(rows[0][3], Cell::Text("007".to_string()));
    }

    #[test]
    fn test_json_strings_are_not_inferred() {
        let (discovery, _) = run(&JsonAdapter::default(), r#"[{"zip":"12345"}]"#, None);
        assert_eq!(discovery.schema.columns()[0].ty, ColumnType::Text);
    }

    #[test]
    fn test_arrays() {
        let input = r#"[{"tags":["a","b",3],"items":[{"id":1}]},{"tags":[],"items":[{"id":2}]}]"#;
        let (discovery, rows) = run(&JsonAdapter::default(), input, None);
        assert_eq!(rows[0][0], Cell::Text("a;b;3".to_string()));
        assert_eq!(rows[0][1], Cell::Text(r#"[{"id":1}]"#.to_string()));
        assert_eq!(rows[1][0], Cell::Null);
        assert_eq!(
            discovery.warnings,
            vec![Warning {
                column: "items".to_string(),
                first_record: 1,
                occurrences: 2
            }]
        );
    }

    #[test]
    fn test_markup_attributes_and_text() {
        let input = r#"<root><row id="1"><p a="x">hello</p></row><row id="2">loose</row></root>"#;
        let (discovery, rows) = run(&XmlAdapter::default(), input, None);
        assert_eq!(names(&discovery.schema), ["@id", "p_@a", "p", "#text"]);
        assert_eq!(rows[0][0], Cell::Integer(1));
        assert_eq!(rows[0][2], Cell::Text("hello".to_string()));
        assert_eq!(rows[1][3], Cell::Text("loose".to_string()));
    }

    #[test]
    fn test_case_insensitive_column_names() {
        let input = r#"[{"Name":"a","name":"b","NAME":"c"}]"#;
        let (discovery, rows) = run(&JsonAdapter::default(), input, None);
        assert_eq!(names(&discovery.schema), ["Name", "name_2", "NAME_3"]);
        assert_eq!(rows[0].len(), 3);
        let lowered: HashSet<String> = discovery
            .schema
            .columns()
            .iter()
            .map(|c| c.name.to_lowercase())
            .collect();
        assert_eq!(lowered.len(), 3);
    }

    #[test]
    fn test_colliding_flattened_keys() {
        let input = r#"[{"a_b":1,"a":{"b":2}}]"#;
        let (discovery, rows) = run(&JsonAdapter::default(), input, None);
        assert_eq!(names(&discovery.schema), ["a_b", "a_b_2"]);
        assert_eq!(rows[0], vec![Cell::Integer(1), Cell::Integer(2)]);
    }

    #[test]
    fn test_nested_key_keeps_its_column_across_records() {
        let input = r#"[{"a":{"b":1}},{"a_b":9,"a":{"b":2}},{"a_b":7}]"#;
        let (discovery, rows) = run(&JsonAdapter::default(), input, None);
        assert_eq!(names(&discovery.schema), ["a_b", "a_b_2"]);
        assert_eq!(rows[0], vec![Cell::Integer(1), Cell::Null]);
        assert_eq!(rows[1], vec![Cell::Integer(2), Cell::Integer(9)]);
        assert_eq!(rows[2], vec![Cell::Null, Cell::Integer(7)]);
    }

    #[test]
    fn test_row_limit_caps_both_passes() {
        let input = "{\"a\":1}\n{\"a\":2}\n{\"a\":3,\"late\":1}\n";
        let (discovery, rows) = run(&JsonLinesAdapter, input, Some(2));
        assert_eq!(discovery.records, 2);
        assert_eq!(names(&discovery.schema), ["a"]);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_empty_source_has_value_column() {
        let (discovery, rows) = run(&JsonAdapter::default(), "[]", None);
        assert_eq!(names(&discovery.schema), [VALUE_KEY]);
        assert_eq!(discovery.schema.columns()[0].ty, ColumnType::Text);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_header_only_csv_keeps_columns() {
        let adapter = CsvAdapter::new(Format::Csv, ',', true).unwrap();
        let (discovery, rows) = run(&adapter, "a,b\n", None);
        assert_eq!(names(&discovery.schema), ["a", "b"]);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_all_null_column_is_text() {
        let (discovery, _) = run(&JsonAdapter::default(), r#"[{"a":null},{"a":null}]"#, None);
        assert_eq!(discovery.schema.columns()[0].ty, ColumnType::Text);
    }

    #[test]
    fn test_infer() {
        assert_eq!(Cell::infer(""), Cell::Null);
        assert_eq!(Cell::infer("TRUE"), Cell::Boolean(true));
        assert_eq!(Cell::infer("-42"), Cell::Integer(-42));
        assert_eq!(Cell::infer("0"), Cell::Integer(0));
        assert_eq!(Cell::infer("1e3"), Cell::Float(1000.0));
        assert_eq!(Cell::infer("0.25"), Cell::Float(0.25));
        assert_eq!(Cell::infer("inf"), Cell::Text("inf".to_string()));
        assert_eq!(Cell::infer("NaN"), Cell::Text("NaN".to_string()));
        assert_eq!(Cell::infer("0042"), Cell::Text("0042".to_string()));
    }
}
