//! `quarry completions` - shell completion scripts
//!
//! ```bash
//! source <(quarry completions bash)
//! quarry completions fish --dir ~/.config/fish/completions
//! ```

use clap::CommandFactory;
use clap_complete::{generate, generate_to, Shell};
use console::style;
use miette::{IntoDiagnostic, Result};
use std::io;
use std::path::PathBuf;

use crate::cli::Cli;

const BIN_NAME: &str = "quarry";

#[derive(clap::Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,

    /// Write the script into this directory instead of stdout
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,
}

pub fn run(args: CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    match args.dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir).into_diagnostic()?;
            let path = generate_to(args.shell, &mut cmd, BIN_NAME, &dir).into_diagnostic()?;
            eprintln!("{} wrote {}", style("✓").green(), path.display());
        }
        None => generate(args.shell, &mut cmd, BIN_NAME, &mut io::stdout()),
    }
    Ok(())
}
