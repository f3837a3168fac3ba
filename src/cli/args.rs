//! CLI argument definitions using clap derive

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::cli::commands::{
    cache::CacheCommands, completions::CompletionsArgs, import::ImportArgs, query::QueryArgs,
};
use crate::core::config::Config;
use crate::core::options::ImportOptions;
use crate::formats::Format;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(author, version, about = "Run SQL over structured files")]
#[command(long_about = "Run SQL over CSV, TSV, JSON, JSON Lines, XML, YAML and TOML files. \
Each source becomes a table; imports are cached so repeated queries over unchanged files are instant.")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(clap::Args, Clone, Debug, Default)]
pub struct GlobalOpts {
    /// Only report errors
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Report cache hits, misses and import progress on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Cache directory (default: platform cache dir, or QUARRY_CACHE_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Import without reading or writing the cache
    #[arg(long, global = true)]
    pub no_cache: bool,
}

impl GlobalOpts {
    /// Command-line layer on top of the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        config.merge(Config {
            cache_dir: self.cache_dir.clone(),
            cache: self.no_cache.then_some(false),
            ..Default::default()
        });
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a SQL query over one or more files
    Query(QueryArgs),

    /// Import files into the cache without querying
    Import(ImportArgs),

    /// Inspect and manage the import cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Options controlling how sources become tables
#[derive(clap::Args, Clone, Debug, Default)]
pub struct ImportFlags {
    /// Input format for every source (default: from the file extension)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<Format>,

    /// Field delimiter for csv/tsv ("tab" for a tab)
    #[arg(long, short = 'd', value_parser = parse_delimiter)]
    pub delimiter: Option<char>,

    /// Import at most N records per source
    #[arg(long, value_name = "N")]
    pub limit: Option<u64>,

    /// Table name for the source in the same position (repeatable)
    #[arg(long = "table", short = 't', value_name = "NAME")]
    pub tables: Vec<String>,

    /// Dotted path to the record array (json/yaml/toml) or record element name (xml)
    #[arg(long, value_name = "PATH")]
    pub collection: Option<String>,

    /// The first csv/tsv row is data, not a header
    #[arg(long)]
    pub no_header: bool,

    /// Identify sources by content digest instead of modification time
    #[arg(long)]
    pub digest: bool,
}

impl ImportFlags {
    /// Build import options, falling back to configured defaults
    pub fn to_options(&self, config: &Config) -> ImportOptions {
        ImportOptions {
            format: self.format,
            delimiter: self.delimiter,
            row_limit: self.limit.or(config.row_limit),
            table_names: self.tables.clone(),
            collection: self.collection.clone(),
            no_header: self.no_header,
            content_digest: self.digest || config.content_digest(),
        }
    }
}

fn parse_delimiter(s: &str) -> Result<char, String> {
    match s {
        "tab" | "\\t" => Ok('\t'),
        _ => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(format!("delimiter must be a single character, got '{}'", s)),
            }
        }
    }
}

/// Output format for query results
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Tab-separated values with a header row (for piping)
    #[default]
    Tsv,
    /// CSV with a header row
    Csv,
    /// JSON array of objects
    Json,
    /// Aligned table for reading
    Table,
}
