use clap::Parser;
use miette::Result;
use quarry::cli::{Cli, Commands, GlobalOpts};
use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Reset SIGPIPE so piping into `head` exits quietly instead of panicking
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    let global = cli.global;
    init_logging(&global);

    match cli.command {
        Commands::Query(args) => quarry::cli::commands::query::run(args, &global),
        Commands::Import(args) => quarry::cli::commands::import::run(args, &global),
        Commands::Cache(cmd) => quarry::cli::commands::cache::run(cmd, &global),
        Commands::Completions(args) => quarry::cli::commands::completions::run(args),
    }
}

/// Diagnostics go to stderr; `RUST_LOG` overrides the -q/-v level
fn init_logging(global: &GlobalOpts) {
    let default_level = if global.quiet {
        "quarry=error"
    } else if global.verbose {
        "quarry=debug"
    } else {
        "quarry=warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .without_time()
        .init();
}
