//! `quarry import` command - Warm the cache and show the resulting tables

use console::style;
use miette::Result;

use crate::cli::args::{GlobalOpts, ImportFlags};
use crate::cli::helpers::{load_config, ok_mark, resolve_sources, short_fingerprint};

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    /// Files to import (`-` for stdin)
    #[arg(required = true, value_name = "SOURCE")]
    pub sources: Vec<String>,

    #[command(flatten)]
    pub import: ImportFlags,
}

pub fn run(args: ImportArgs, global: &GlobalOpts) -> Result<()> {
    let config = load_config(global);
    let resolution = resolve_sources(&config, &args.import, &args.sources)?;

    if global.quiet {
        return Ok(());
    }

    let status = if resolution.cache_hit {
        style("cached").green().to_string()
    } else if resolution.handle.is_temporary() {
        style("not cached").yellow().to_string()
    } else {
        style("imported").cyan().to_string()
    };
    match &resolution.fingerprint {
        Some(fp) => println!("{} {} ({})", ok_mark(), status, short_fingerprint(fp)),
        None => println!("{} {}", ok_mark(), status),
    }

    for table in &resolution.tables {
        println!();
        println!(
            "  {} {} rows  {}",
            style(&table.name).bold(),
            style(table.row_count).cyan(),
            style(&table.source).dim()
        );
        for column in &table.columns {
            println!("    {:<24} {}", column.name, style(column.ty).dim());
        }
    }

    if !resolution.warnings.is_empty() {
        println!();
        for warning in &resolution.warnings {
            println!("  {} {}", style("!").yellow(), warning);
        }
    }

    Ok(())
}
