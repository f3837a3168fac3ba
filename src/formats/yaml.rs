//! YAML documents

use std::io::BufRead;

use serde_json::{Number, Value};

use super::{document_records, Format, FormatAdapter, FormatError, ImportOption, RecordStream};

/// Reads a YAML document and yields its record sequence
#[derive(Debug, Clone, Default)]
pub struct YamlAdapter {
    collection: Option<String>,
}

impl YamlAdapter {
    pub fn new(collection: Option<String>) -> Self {
        Self { collection }
    }
}

impl FormatAdapter for YamlAdapter {
    fn format(&self) -> Format {
        Format::Yaml
    }

    fn accepts(&self, option: ImportOption) -> bool {
        option == ImportOption::Collection
    }

    fn open<'a>(&self, input: Box<dyn BufRead + 'a>) -> Result<RecordStream<'a>, FormatError> {
        let doc: serde_yml::Value =
            serde_yml::from_reader(input).map_err(|e| FormatError::MalformedLine {
                format: Format::Yaml,
                line: e.location().map(|loc| loc.line() as u64).unwrap_or(0),
                message: e.to_string(),
            })?;

        let records = document_records(Format::Yaml, yaml_to_json(doc), self.collection.as_deref())?;
        Ok(RecordStream::new(records.into_iter().map(Ok)))
    }
}

/// Convert a YAML value into the JSON shape records use
///
/// Non-string mapping keys are rendered to text; tags are dropped.
fn yaml_to_json(value: serde_yml::Value) -> Value {
    match value {
        serde_yml::Value::Null => Value::Null,
        serde_yml::Value::Bool(b) => Value::Bool(b),
        serde_yml::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Number(u.into())
            } else {
                n.as_f64()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        serde_yml::Value::String(s) => Value::String(s),
        serde_yml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(yaml_to_json).collect())
        }
        serde_yml::Value::Mapping(map) => {
            let mut object = serde_json::Map::new();
            for (key, value) in map {
                object.insert(yaml_key(key), yaml_to_json(value));
            }
            Value::Object(object)
        }
        serde_yml::Value::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn yaml_key(key: serde_yml::Value) -> String {
    match key {
        serde_yml::Value::String(s) => s,
        serde_yml::Value::Null => "null".to_string(),
        serde_yml::Value::Bool(b) => b.to_string(),
        serde_yml::Value::Number(n) => n.to_string(),
        other => serde_json::to_string(&yaml_to_json(other)).unwrap_or_default(),
    }
}
