//! Delimited text (CSV / TSV)

use std::collections::HashSet;
use std::io::BufRead;

use serde_json::Value;

use super::{Format, FormatAdapter, FormatError, ImportOption, Record, RecordStream};

/// Reads comma- or tab-separated text with an optional header row
#[derive(Debug, Clone)]
pub struct CsvAdapter {
    format: Format,
    delimiter: u8,
    has_header: bool,
}

impl CsvAdapter {
    pub fn new(format: Format, delimiter: char, has_header: bool) -> Result<Self, FormatError> {
        if !delimiter.is_ascii() {
            return Err(FormatError::InvalidDelimiter(delimiter));
        }
        Ok(Self {
            format,
            delimiter: delimiter as u8,
            has_header,
        })
    }
}

impl FormatAdapter for CsvAdapter {
    fn format(&self) -> Format {
        self.format
    }

    fn accepts(&self, option: ImportOption) -> bool {
        matches!(option, ImportOption::Delimiter | ImportOption::NoHeader)
    }

    fn infers_types(&self) -> bool {
        true
    }

    fn open<'a>(&self, input: Box<dyn BufRead + 'a>) -> Result<RecordStream<'a>, FormatError> {
        let format = self.format;
        let mut reader = ::csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_header)
            .trim(::csv::Trim::All)
            .from_reader(input);

        let headers = if self.has_header {
            let record = reader.headers().map_err(|e| FormatError::Malformed {
                format,
                record: 0,
                message: e.to_string(),
            })?;
            header_names(record)
        } else {
            Vec::new()
        };

        let names = headers.clone();
        let records = reader
            .into_records()
            .enumerate()
            .map(move |(index, result)| -> Result<Record, FormatError> {
                let row = result.map_err(|e| FormatError::Malformed {
                    format,
                    record: index as u64 + 1,
                    message: e.to_string(),
                })?;

                let mut record = Record::new();
                for (i, field) in row.iter().enumerate() {
                    let key = names
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| format!("c{}", i + 1));
                    record.insert(key, Value::String(field.to_string()));
                }
                Ok(record)
            });

        Ok(RecordStream::new(records).with_declared_columns(headers))
    }
}

/// Header names with blanks filled in and duplicates suffixed
fn header_names(headers: &::csv::StringRecord) -> Vec<String> {
    let mut seen = HashSet::new();
    headers
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let base = if raw.is_empty() {
                format!("c{}", i + 1)
            } else {
                raw.to_string()
            };
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}
