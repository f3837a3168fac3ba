//! TOML key-value documents

use std::io::{BufRead, Read};

use serde_json::{Number, Value};

use super::{document_records, Format, FormatAdapter, FormatError, ImportOption, RecordStream};

/// Reads a TOML document; arrays of tables are selected with a collection
#[derive(Debug, Clone, Default)]
pub struct TomlAdapter {
    collection: Option<String>,
}

impl TomlAdapter {
    pub fn new(collection: Option<String>) -> Self {
        Self { collection }
    }
}

impl FormatAdapter for TomlAdapter {
    fn format(&self) -> Format {
        Format::Toml
    }

    fn accepts(&self, option: ImportOption) -> bool {
        option == ImportOption::Collection
    }

    fn open<'a>(&self, mut input: Box<dyn BufRead + 'a>) -> Result<RecordStream<'a>, FormatError> {
        let mut text = String::new();
        input
            .read_to_string(&mut text)
            .map_err(|source| FormatError::Io {
                format: Format::Toml,
                source,
            })?;

        let table: ::toml::Table = ::toml::from_str(&text).map_err(|e| {
            let line = e
                .span()
                .map(|span| text[..span.start.min(text.len())].lines().count().max(1) as u64)
                .unwrap_or(0);
            FormatError::MalformedLine {
                format: Format::Toml,
                line,
                message: e.message().to_string(),
            }
        })?;

        let root = toml_to_json(::toml::Value::Table(table));
        let records = document_records(Format::Toml, root, self.collection.as_deref())?;
        Ok(RecordStream::new(records.into_iter().map(Ok)))
    }
}

fn toml_to_json(value: ::toml::Value) -> Value {
    match value {
        ::toml::Value::String(s) => Value::String(s),
        ::toml::Value::Integer(i) => Value::Number(i.into()),
        ::toml::Value::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ::toml::Value::Boolean(b) => Value::Bool(b),
        ::toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        ::toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        ::toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, toml_to_json(value)))
                .collect(),
        ),
    }
}
