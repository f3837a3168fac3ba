//! Structured JSON documents

use std::io::BufRead;

use serde_json::Value;

use super::{document_records, Format, FormatAdapter, FormatError, ImportOption, RecordStream};

/// Reads a whole JSON document and yields its record array
#[derive(Debug, Clone, Default)]
pub struct JsonAdapter {
    collection: Option<String>,
}

impl JsonAdapter {
    pub fn new(collection: Option<String>) -> Self {
        Self { collection }
    }
}

impl FormatAdapter for JsonAdapter {
    fn format(&self) -> Format {
        Format::Json
    }

    fn accepts(&self, option: ImportOption) -> bool {
        option == ImportOption::Collection
    }

    fn open<'a>(&self, input: Box<dyn BufRead + 'a>) -> Result<RecordStream<'a>, FormatError> {
        let root: Value = serde_json::from_reader(input).map_err(|e| FormatError::MalformedLine {
            format: Format::Json,
            line: e.line() as u64,
            message: e.to_string(),
        })?;

        let records = document_records(Format::Json, root, self.collection.as_deref())?;
        Ok(RecordStream::new(records.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_array_of_objects() {
        let adapter = JsonAdapter::default();
        let records: Vec<_> = adapter
            .open(Box::new(Cursor::new(br#"[{"a":1},{"a":2,"b":true}]"#.as_slice())))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["b"], json!(true));
    }

    #[test]
    fn test_collection() {
        let adapter = JsonAdapter::new(Some("rows".to_string()));
        let records: Vec<_> = adapter
            .open(Box::new(Cursor::new(br#"{"meta":{},"rows":[{"x":1}]}"#.as_slice())))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["x"], json!(1));
    }

    #[test]
    fn test_malformed_reports_line() {
        let adapter = JsonAdapter::default();
        let err = adapter
            .open(Box::new(Cursor::new(b"[\n{\"a\": }\n]".as_slice())))
            .err()
            .unwrap();
        assert!(matches!(err, FormatError::MalformedLine { line: 2, .. }));
    }
}
