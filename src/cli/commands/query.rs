//! `quarry query` command - Run SQL over files

use miette::{IntoDiagnostic, Result};
use std::io::{self, Write};
use tabled::{builder::Builder, settings::Style};

use crate::cli::args::{GlobalOpts, ImportFlags, OutputFormat};
use crate::cli::helpers::{load_config, resolve_sources};
use crate::core::query::{display_value, json_value, run_query, QueryResult};

#[derive(clap::Args, Debug)]
pub struct QueryArgs {
    /// SQL to run; each source is a table named after its file
    pub sql: String,

    /// Files to query (`-` for stdin)
    #[arg(required = true, value_name = "SOURCE")]
    pub sources: Vec<String>,

    #[command(flatten)]
    pub import: ImportFlags,

    /// Output format
    #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Tsv)]
    pub output: OutputFormat,
}

pub fn run(args: QueryArgs, global: &GlobalOpts) -> Result<()> {
    let config = load_config(global);
    let resolution = resolve_sources(&config, &args.import, &args.sources)?;
    let result = run_query(&resolution.handle, &args.sql)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_result(&mut out, &result, args.output)?;
    out.flush().into_diagnostic()?;
    Ok(())
}

/// Write a result set in the requested format
pub fn write_result(out: &mut impl Write, result: &QueryResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Tsv => {
            writeln!(out, "{}", result.columns.join("\t")).into_diagnostic()?;
            for row in &result.rows {
                let fields: Vec<String> = row.iter().map(|v| escape_tsv(&display_value(v))).collect();
                writeln!(out, "{}", fields.join("\t")).into_diagnostic()?;
            }
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(&mut *out);
            writer.write_record(&result.columns).into_diagnostic()?;
            for row in &result.rows {
                writer
                    .write_record(row.iter().map(display_value))
                    .into_diagnostic()?;
            }
            writer.flush().into_diagnostic()?;
        }
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = result
                .rows
                .iter()
                .map(|row| {
                    let mut obj = serde_json::Map::new();
                    for (col, value) in result.columns.iter().zip(row) {
                        obj.insert(col.clone(), json_value(value));
                    }
                    serde_json::Value::Object(obj)
                })
                .collect();
            serde_json::to_writer_pretty(&mut *out, &rows).into_diagnostic()?;
            writeln!(out).into_diagnostic()?;
        }
        OutputFormat::Table => {
            let mut builder = Builder::default();
            builder.push_record(result.columns.iter().cloned());
            for row in &result.rows {
                builder.push_record(row.iter().map(display_value));
            }
            writeln!(out, "{}", builder.build().with(Style::rounded())).into_diagnostic()?;
        }
    }
    Ok(())
}

/// Tabs and newlines inside a field would break the row structure
fn escape_tsv(s: &str) -> String {
    if s.contains(['\t', '\n', '\r']) {
        s.replace('\t', "\\t").replace('\n', "\\n").replace('\r', "\\r")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::types::Value;

    fn sample() -> QueryResult {
        QueryResult {
            columns: vec!["name".to_string(), "n".to_string()],
            rows: vec![
                vec![Value::Text("a,b".to_string()), Value::Integer(1)],
                vec![Value::Text("tab\there".to_string()), Value::Null],
            ],
        }
    }

    fn render(format: OutputFormat) -> String {
        let mut buf = Vec::new();
        write_result(&mut buf, &sample(), format).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_tsv_output() {
        assert_eq!(render(OutputFormat::Tsv), "name\tn\na,b\t1\ntab\\there\t\n");
    }

    #[test]
    fn test_csv_output_quotes() {
        assert_eq!(render(OutputFormat::Csv), "name,n\n\"a,b\",1\ntab\there,\n");
    }

    #[test]
    fn test_json_output() {
        let parsed: serde_json::Value = serde_json::from_str(&render(OutputFormat::Json)).unwrap();
        assert_eq!(parsed[0]["n"], serde_json::json!(1));
        assert_eq!(parsed[1]["n"], serde_json::Value::Null);
    }

    #[test]
    fn test_table_output() {
        let table = render(OutputFormat::Table);
        assert!(table.contains("name"));
        assert!(table.contains("a,b"));
    }
}
