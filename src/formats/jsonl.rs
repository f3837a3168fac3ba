//! Line-delimited JSON (one document per line)

use std::io::BufRead;

use serde_json::Value;

use super::{into_record, Format, FormatAdapter, FormatError, ImportOption, RecordStream};

/// Reads one JSON value per line; blank lines are skipped
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLinesAdapter;

impl FormatAdapter for JsonLinesAdapter {
    fn format(&self) -> Format {
        Format::Jsonl
    }

    fn accepts(&self, _option: ImportOption) -> bool {
        false
    }

    fn open<'a>(&self, input: Box<dyn BufRead + 'a>) -> Result<RecordStream<'a>, FormatError> {
        let records = input
            .lines()
            .enumerate()
            .filter_map(|(index, line)| match line {
                Err(source) => Some(Err(FormatError::Io {
                    format: Format::Jsonl,
                    source,
                })),
                Ok(text) if text.trim().is_empty() => None,
                Ok(text) => Some(
                    serde_json::from_str::<Value>(&text)
                        .map(into_record)
                        .map_err(|e| FormatError::MalformedLine {
                            format: Format::Jsonl,
                            line: index as u64 + 1,
                            message: e.to_string(),
                        }),
                ),
            });

        Ok(RecordStream::new(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_skips_blank_lines() {
        let input = "{\"a\":1}\n\n   \n{\"a\":2}\n";
        let records: Vec<_> = JsonLinesAdapter
            .open(Box::new(Cursor::new(input.as_bytes())))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_bad_line_aborts_with_line_number() {
        let input = "{\"a\":1}\n\n{oops}\n{\"a\":3}\n";
        let result: Result<Vec<_>, _> = JsonLinesAdapter
            .open(Box::new(Cursor::new(input.as_bytes())))
            .unwrap()
            .collect();
        assert!(matches!(
            result,
            Err(FormatError::MalformedLine { line: 3, .. })
        ));
    }

    #[test]
    fn test_scalar_lines_become_value_records() {
        let records: Vec<_> = JsonLinesAdapter
            .open(Box::new(Cursor::new("1\n2\n".as_bytes())))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records[1]["value"], serde_json::json!(2));
    }
}
