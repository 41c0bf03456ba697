mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{Context, EXIT_FAILURE, EXIT_PROJECT_ERROR, EXIT_STATE_ERROR};
use lamina_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "lamina",
    version,
    about = "Overlay layer stacks for part-based builds"
)]
struct Cli {
    /// Path to the project file.
    #[arg(long, default_value = "lamina.toml", global = true)]
    project: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    /// Override the runtime backend from the project file.
    #[arg(long, global = true, value_parser = ["fuse", "mock"])]
    backend: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the layer stack each part would be mounted with.
    Plan {
        /// Include the package cache layer.
        #[arg(long, default_value_t = false)]
        pkg_cache: bool,
    },
    /// Refresh the package index and download packages into the package cache.
    Fetch {
        /// Packages to download (default: every part's overlay packages).
        packages: Vec<String>,
    },
    /// Install packages into a part's layer.
    Install {
        /// Part whose layer receives the packages.
        part: String,
        /// Packages to install.
        #[arg(required = true)]
        packages: Vec<String>,
        /// Mount the stack without the package cache layer.
        #[arg(long, default_value_t = false)]
        no_pkg_cache: bool,
    },
    /// Run the overlay step: fetch every overlay package, then install each
    /// part's packages into its layer.
    Build,
    /// Check host tools and the project's overlay state.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LAMINA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let ctx = Context {
        project_path: cli.project,
        backend: cli.backend,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Plan { pkg_cache } => commands::plan::run(&ctx, pkg_cache),
        Commands::Fetch { packages } => commands::fetch::run(&ctx, &packages),
        Commands::Install {
            part,
            packages,
            no_pkg_cache,
        } => commands::install::run(&ctx, &part, &packages, !no_pkg_cache),
        Commands::Build => commands::build::run(&ctx),
        Commands::Doctor => commands::doctor::run(&ctx),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("project error:") {
                EXIT_PROJECT_ERROR
            } else if msg.starts_with("illegal state:") || msg.starts_with("work lock:") {
                EXIT_STATE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
