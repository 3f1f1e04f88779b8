use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use formwork::{
    handle_synth, handle_validate, load, render_listing, render_order, Settings,
};

#[derive(Parser)]
#[command(name = "formwork")]
#[command(about = "Synthesize construct-tree applications into deployable templates", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Settings file (defaults to formwork.toml next to the application file)
    #[arg(short, long, global = true, env = "FORMWORK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize every unit and write templates plus manifest
    Synth {
        /// Application definition (YAML, JSON or TOML)
        #[arg(short, long)]
        app: PathBuf,

        /// Output directory
        #[arg(short, long, env = "FORMWORK_OUTPUT_DIR")]
        output: Option<PathBuf>,

        /// Record construct paths in resource metadata
        #[arg(long)]
        path_metadata: bool,
    },

    /// Print the deployment order with dependencies and reasons
    Order {
        /// Application definition (YAML, JSON or TOML)
        #[arg(short, long)]
        app: PathBuf,
    },

    /// Build and synthesize in memory without writing anything
    Validate {
        /// Application definition (YAML, JSON or TOML)
        #[arg(short, long)]
        app: PathBuf,
    },

    /// List units and the construct paths inside them
    Ls {
        /// Application definition (YAML, JSON or TOML)
        #[arg(short, long)]
        app: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; RUST_LOG takes precedence over the flags
    let level = if cli.debug {
        tracing::Level::TRACE
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(cli.debug); // Show target module in debug mode
    if std::env::var_os("RUST_LOG").is_some() {
        subscriber.with_env_filter(EnvFilter::from_default_env()).init();
    } else {
        subscriber.with_max_level(level).init();
    }

    match cli.command {
        Commands::Synth {
            app,
            output,
            path_metadata,
        } => {
            let settings = Settings::resolve(cli.config.as_deref(), &app)?;
            let mut config = settings.synth_config();
            config.path_metadata |= path_metadata;
            let output = output.unwrap_or(settings.output_dir);

            let assembly = handle_synth(&app, &output, config)?;
            info!(
                "Synthesized {} unit(s) into {}",
                assembly.order().len(),
                output.display()
            );
            Ok(())
        }
        Commands::Order { app } => {
            print!("{}", render_order(&load(&app)?)?);
            Ok(())
        }
        Commands::Validate { app } => {
            let settings = Settings::resolve(cli.config.as_deref(), &app)?;
            let units = handle_validate(&app, settings.synth_config())?;
            println!("{}: {} unit(s) synthesized without errors", app.display(), units);
            Ok(())
        }
        Commands::Ls { app } => {
            print!("{}", render_listing(&load(&app)?));
            Ok(())
        }
    }
}
