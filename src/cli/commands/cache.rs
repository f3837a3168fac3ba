//! `quarry cache` command - Inspect and manage the import cache
//!
//! Every import is stored as a SQLite artifact next to a JSON sidecar named
//! after the import's fingerprint. These commands never touch source files.

use chrono::Utc;
use clap::Subcommand;
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm};
use miette::{bail, IntoDiagnostic, Result};
use std::io::IsTerminal;
use tabled::{builder::Builder, settings::Style};

use crate::cli::args::GlobalOpts;
use crate::cli::helpers::{format_age, format_bytes, load_config, ok_mark, short_fingerprint};
use crate::core::cache::{CacheEntry, ImportCache};

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// List cached imports, newest first
    List,

    /// Show cache directory statistics
    Stats,

    /// Remove one entry by fingerprint prefix, or everything with --all
    Clear {
        /// Fingerprint (or unique prefix) of the entry to remove
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        prefix: Option<String>,

        /// Remove every entry and artifact
        #[arg(long)]
        all: bool,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Remove orphaned artifacts, dangling entries and leftover temp files
    Prune,

    /// Print the cache directory
    Path,
}

pub fn run(cmd: CacheCommands, global: &GlobalOpts) -> Result<()> {
    let config = load_config(global);
    let dir = config.cache_dir();

    if let CacheCommands::Path = cmd {
        println!("{}", dir.display());
        return Ok(());
    }

    let cache = ImportCache::open(&dir)?;
    match cmd {
        CacheCommands::List => run_list(&cache),
        CacheCommands::Stats => run_stats(&cache),
        CacheCommands::Clear { prefix, all, yes } => {
            run_clear(&cache, prefix.as_deref(), all, yes, global.quiet)
        }
        CacheCommands::Prune => run_prune(&cache, global.quiet),
        CacheCommands::Path => Ok(()),
    }
}

fn run_list(cache: &ImportCache) -> Result<()> {
    let entries = cache.list()?;
    if entries.is_empty() {
        println!("No cache entries");
        return Ok(());
    }

    let mut builder = Builder::default();
    builder.push_record(["FINGERPRINT", "AGE", "TABLES", "ROWS", "SIZE", "SOURCES"]);
    let now = Utc::now();
    for entry in &entries {
        builder.push_record([
            short_fingerprint(&entry.fingerprint).to_string(),
            format_age(now - entry.created_at),
            describe_tables(entry),
            entry.total_rows().to_string(),
            format_bytes(entry.artifact_size),
            describe_sources(entry),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));
    let noun = if entries.len() == 1 { "entry" } else { "entries" };
    println!("{} {}", style(entries.len()).cyan(), noun);
    Ok(())
}

fn describe_tables(entry: &CacheEntry) -> String {
    entry
        .tables
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_sources(entry: &CacheEntry) -> String {
    entry
        .sources
        .iter()
        .map(|s| s.path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn run_stats(cache: &ImportCache) -> Result<()> {
    let stats = cache.stats()?;

    println!("{}", style("Cache Statistics").bold());
    println!("{}", style("─".repeat(40)).dim());
    println!("  Location:    {}", cache.dir().display());
    println!("  Entries:     {}", style(stats.entries).cyan());
    println!("  Tables:      {}", style(stats.tables).cyan());
    println!("  Rows:        {}", style(stats.rows).cyan());
    println!("  Disk usage:  {}", style(format_bytes(stats.total_bytes)).cyan());
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!("  Oldest:      {}", oldest.format("%Y-%m-%d %H:%M:%S"));
        println!("  Newest:      {}", newest.format("%Y-%m-%d %H:%M:%S"));
    }
    if stats.orphans > 0 || stats.temp_files > 0 {
        println!();
        println!(
            "  {} {} orphaned artifact(s), {} temp file(s); run `quarry cache prune`",
            style("!").yellow(),
            stats.orphans,
            stats.temp_files
        );
    }
    Ok(())
}

fn run_clear(
    cache: &ImportCache,
    prefix: Option<&str>,
    all: bool,
    yes: bool,
    quiet: bool,
) -> Result<()> {
    if all {
        if !yes && !confirm("Remove every cache entry?")? {
            println!("Aborted.");
            return Ok(());
        }
        let removed = cache.clear_all()?;
        if !quiet {
            println!("{} Cache cleared ({} entries)", ok_mark(), removed);
        }
        return Ok(());
    }

    let Some(prefix) = prefix else {
        bail!("give a fingerprint prefix or --all");
    };
    let entry = cache.clear(prefix)?;
    if !quiet {
        println!(
            "{} Removed {} ({})",
            ok_mark(),
            short_fingerprint(&entry.fingerprint),
            describe_sources(&entry)
        );
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        bail!("refusing to clear the cache without a terminal; pass --yes");
    }
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()
        .into_diagnostic()
}

fn run_prune(cache: &ImportCache, quiet: bool) -> Result<()> {
    let report = cache.prune()?;
    if quiet {
        return Ok(());
    }
    if report.total() == 0 {
        println!("{} Nothing to prune", ok_mark());
        return Ok(());
    }

    println!(
        "{} Pruned {} file(s), freed {}",
        ok_mark(),
        report.total(),
        format_bytes(report.bytes_freed)
    );
    if report.orphan_artifacts > 0 {
        println!("  Orphaned artifacts: {}", style(report.orphan_artifacts).red());
    }
    if report.dangling_entries > 0 {
        println!("  Dangling entries:   {}", style(report.dangling_entries).red());
    }
    if report.temp_files > 0 {
        println!("  Temp files:         {}", style(report.temp_files).red());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn parse(args: &[&str]) -> Result<CacheCommands, clap::Error> {
        let mut full = vec!["quarry", "cache"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).map(|cli| match cli.command {
            crate::cli::Commands::Cache(cmd) => cmd,
            _ => panic!("expected a cache command"),
        })
    }

    #[test]
    fn test_clear_requires_prefix_or_all() {
        assert!(parse(&["clear"]).is_err());
        assert!(parse(&["clear", "abc", "--all"]).is_err());
        assert!(matches!(
            parse(&["clear", "--all", "-y"]).unwrap(),
            CacheCommands::Clear { all: true, yes: true, prefix: None }
        ));
    }

    #[test]
    fn test_clear_with_prefix() {
        match parse(&["clear", "ab12"]).unwrap() {
            CacheCommands::Clear { prefix, all, .. } => {
                assert_eq!(prefix.as_deref(), Some("ab12"));
                assert!(!all);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
