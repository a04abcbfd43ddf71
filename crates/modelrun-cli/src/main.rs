mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "modelrun",
    version,
    about = "Run, record and replay model pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Record the run into a replay archive at this path
        #[arg(long)]
        record: Option<PathBuf>,
        /// Embed input data files in the archive (requires --record)
        #[arg(long, requires = "record")]
        include_data: bool,
        /// Configure and record stages without staging files or spawning processes
        #[arg(long)]
        dry_run: bool,
        /// Copy inputs into place instead of symlinking them
        #[arg(long)]
        copy_inputs: bool,
    },
    /// Replay a recorded archive
    Replay {
        /// Path to the replay archive
        archive: PathBuf,
        /// Pipeline that declares the recorded stages
        #[arg(long)]
        pipeline: PathBuf,
        /// Load and configure stages without running them
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a pipeline and check its inputs without running it
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// List the stages recorded in an archive
    Inspect {
        /// Path to the replay archive
        archive: PathBuf,
        /// Print the full manifest as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            pipeline,
            record,
            include_data,
            dry_run,
            copy_inputs,
        } => commands::run::execute(
            &pipeline,
            &commands::run::RunArgs {
                record,
                include_data,
                dry_run,
                copy_inputs,
            },
        ),
        Commands::Replay {
            archive,
            pipeline,
            dry_run,
        } => commands::replay::execute(&archive, &pipeline, dry_run),
        Commands::Check { pipeline } => commands::check::execute(&pipeline),
        Commands::Inspect { archive, json } => commands::inspect::execute(&archive, json),
    }
}
