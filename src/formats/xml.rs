//! Attribute-bearing markup (XML)
//!
//! By default every child of the document root is one record. With a
//! collection, every element with that local name (outside another record)
//! is a record. Inside a record:
//! - attributes become `@name` keys on their element
//! - an element holding only text becomes a string value
//! - an element with attributes or children becomes an object, its own text
//!   stored under `#text`
//! - repeated child elements become arrays

use std::io::BufRead;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::Value;

use super::{
    Format, FormatAdapter, FormatError, ImportOption, Record, RecordStream, ATTRIBUTE_PREFIX,
    TEXT_KEY,
};

/// Streams records out of an XML document
#[derive(Debug, Clone, Default)]
pub struct XmlAdapter {
    record_element: Option<String>,
}

impl XmlAdapter {
    pub fn new(record_element: Option<String>) -> Self {
        Self { record_element }
    }
}

impl FormatAdapter for XmlAdapter {
    fn format(&self) -> Format {
        Format::Xml
    }

    fn accepts(&self, option: ImportOption) -> bool {
        option == ImportOption::Collection
    }

    fn infers_types(&self) -> bool {
        true
    }

    fn open<'a>(&self, input: Box<dyn BufRead + 'a>) -> Result<RecordStream<'a>, FormatError> {
        let mut reader = Reader::from_reader(input);
        reader.config_mut().trim_text(true);

        Ok(RecordStream::new(XmlRecords {
            reader,
            buf: Vec::new(),
            record_element: self.record_element.clone(),
            depth: 0,
            stack: Vec::new(),
            emitted: 0,
            done: false,
        }))
    }
}

/// One parser event reduced to owned data
enum Step {
    Open {
        name: String,
        attributes: Vec<(String, String)>,
        empty: bool,
    },
    Close,
    Text(String),
    Eof,
    Skip,
}

/// An element under construction
struct Frame {
    name: String,
    fields: Record,
    text: String,
}

impl Frame {
    fn new(name: String, attributes: Vec<(String, String)>) -> Self {
        let mut fields = Record::new();
        for (key, value) in attributes {
            fields.insert(format!("{}{}", ATTRIBUTE_PREFIX, key), Value::String(value));
        }
        Self {
            name,
            fields,
            text: String::new(),
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(text);
    }

    fn into_value(self) -> Value {
        if self.fields.is_empty() {
            if self.text.is_empty() {
                Value::Null
            } else {
                Value::String(self.text)
            }
        } else {
            Value::Object(self.into_record())
        }
    }

    fn into_record(self) -> Record {
        let mut fields = self.fields;
        if !self.text.is_empty() {
            fields.insert(TEXT_KEY.to_string(), Value::String(self.text));
        }
        fields
    }

    fn add_child(&mut self, name: String, value: Value) {
        match self.fields.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.fields.insert(name, value);
            }
        }
    }
}

struct XmlRecords<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    record_element: Option<String>,
    depth: usize,
    stack: Vec<Frame>,
    emitted: u64,
    done: bool,
}

impl<R: BufRead> XmlRecords<R> {
    fn malformed(&mut self, message: String) -> FormatError {
        self.done = true;
        FormatError::Malformed {
            format: Format::Xml,
            record: self.emitted + 1,
            message,
        }
    }

    fn read_step(&mut self) -> Result<Step, String> {
        self.buf.clear();
        let step = match self.reader.read_event_into(&mut self.buf) {
            Err(e) => return Err(e.to_string()),
            Ok(Event::Start(e)) => Step::Open {
                name: local_name(&e),
                attributes: attributes(&e)?,
                empty: false,
            },
            Ok(Event::Empty(e)) => Step::Open {
                name: local_name(&e),
                attributes: attributes(&e)?,
                empty: true,
            },
            Ok(Event::End(_)) => Step::Close,
            Ok(Event::Text(e)) => Step::Text(e.unescape().map_err(|e| e.to_string())?.into_owned()),
            Ok(Event::CData(e)) => Step::Text(String::from_utf8_lossy(&e.into_inner()).into_owned()),
            Ok(Event::Eof) => Step::Eof,
            Ok(_) => Step::Skip,
        };
        Ok(step)
    }

    fn is_record(&self, name: &str) -> bool {
        match &self.record_element {
            Some(element) => element == name,
            None => self.depth == 2,
        }
    }

    /// Close the innermost element; returns a record when one completes
    fn close(&mut self) -> Option<Record> {
        self.depth = self.depth.saturating_sub(1);
        let frame = self.stack.pop()?;
        match self.stack.last_mut() {
            Some(parent) => {
                let name = frame.name.clone();
                parent.add_child(name, frame.into_value());
                None
            }
            None => Some(frame.into_record()),
        }
    }
}

impl<R: BufRead> Iterator for XmlRecords<R> {
    type Item = Result<Record, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let step = match self.read_step() {
                Ok(step) => step,
                Err(message) => return Some(Err(self.malformed(message))),
            };

            match step {
                Step::Open {
                    name,
                    attributes,
                    empty,
                } => {
                    self.depth += 1;
                    if !self.stack.is_empty() || self.is_record(&name) {
                        self.stack.push(Frame::new(name, attributes));
                    }
                    if empty {
                        if let Some(record) = self.close() {
                            self.emitted += 1;
                            return Some(Ok(record));
                        }
                    }
                }
                Step::Close => {
                    if let Some(record) = self.close() {
                        self.emitted += 1;
                        return Some(Ok(record));
                    }
                }
                Step::Text(text) => {
                    if let Some(frame) = self.stack.last_mut() {
                        frame.push_text(&text);
                    }
                }
                Step::Eof => {
                    self.done = true;
                    if !self.stack.is_empty() {
                        return Some(Err(
                            self.malformed("unexpected end of document".to_string())
                        ));
                    }
                    return None;
                }
                Step::Skip => {}
            }
        }
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attributes(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, String> {
    e.attributes()
        .map(|attr| {
            let attr = attr.map_err(|e| e.to_string())?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
            Ok((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn read(adapter: XmlAdapter, input: &'static str) -> Result<Vec<Record>, FormatError> {
        adapter
            .open(Box::new(Cursor::new(input.as_bytes())))
            .unwrap()
            .collect()
    }

    #[test]
    fn test_children_of_root_are_records() {
        let input = r#"<?xml version="1.0"?>
<people>
  <person id="1"><name>Ann</name><age>31</age></person>
  <person id="2"><name lang="fr">Bea</name></person>
</people>"#;
        let records = read(XmlAdapter::default(), input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["@id"], json!("1"));
        assert_eq!(records[0]["name"], json!("Ann"));
        assert_eq!(records[1]["name"], json!({"@lang": "fr", "#text": "Bea"}));
    }

    #[test]
    fn test_repeated_children_become_array() {
        let input = "<r><item><tag>a</tag><tag>b</tag></item></r>";
        let records = read(XmlAdapter::default(), input).unwrap();
        assert_eq!(records[0]["tag"], json!(["a", "b"]));
    }

    #[test]
    fn test_named_record_element() {
        let input = "<feed><meta><v>1</v></meta><entries><entry>x</entry><entry>y</entry></entries></feed>";
        let records = read(XmlAdapter::new(Some("entry".to_string())), input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1][TEXT_KEY], json!("y"));
    }

    #[test]
    fn test_empty_record_element() {
        let input = r#"<rows><row a="1"/><row a="2"/></rows>"#;
        let records = read(XmlAdapter::default(), input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["@a"], json!("2"));
    }

    #[test]
    fn test_entities_are_unescaped() {
        let input = "<r><row><q>a &amp; b</q></row></r>";
        let records = read(XmlAdapter::default(), input).unwrap();
        assert_eq!(records[0]["q"], json!("a & b"));
    }

    #[test]
    fn test_mismatched_tags_fail() {
        let input = "<r><row><a>1</b></row></r>";
        assert!(read(XmlAdapter::default(), input).is_err());
    }
}
