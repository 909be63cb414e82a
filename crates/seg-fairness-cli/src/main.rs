//! seg-fairness CLI - demographic fairness evaluation for segmentation models

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

/// Fairness evaluation for knee and hip radiograph segmentation models.
#[derive(Parser)]
#[command(name = "seg-fairness")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write train/valid/test, subgroup, and balanced split CSVs
    Split {
        /// Anatomy (knee or hip)
        anatomy: String,

        /// Demographic CSV with id, P02SEX, P02RACE, V00AGE
        csv_file: PathBuf,

        /// Output directory; files go to {outdir}/{anatomy}/
        outdir: PathBuf,

        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Evaluate models across protected-attribute groups
    Evaluate {
        /// Cohort CSV (id column plus protected attributes)
        #[arg(short, long)]
        cohort: PathBuf,

        /// Run name; the report is written to {output}/{name}.json
        #[arg(short, long)]
        name: String,

        /// Output directory
        #[arg(short, long, default_value = "results")]
        output: PathBuf,

        /// Evaluation config JSON (otherwise the standard preset is used)
        #[arg(long, conflicts_with_all = ["attribute", "backbone", "models"])]
        config: Option<PathBuf>,

        /// Anatomy for the preset (knee or hip)
        #[arg(long, default_value = "knee")]
        anatomy: String,

        /// Protected attribute for the preset (sex, race, age)
        #[arg(long)]
        attribute: Option<String>,

        /// Encoder backbone for the preset, e.g. resnet18
        #[arg(long)]
        backbone: Option<String>,

        /// Directory holding one subdirectory per trained run, for the preset
        #[arg(long)]
        models: Option<PathBuf>,

        /// Image store root with Images/ and Annotations/
        #[arg(long)]
        images: Option<PathBuf>,
    },

    /// Summarize a bias report
    Summarize {
        /// Report JSON written by `evaluate`
        input: PathBuf,

        /// Only show this metric (IoU, Dice)
        #[arg(long)]
        metric: Option<String>,

        /// Print per-metric partition statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the label catalog of an anatomy
    Labels {
        /// Anatomy (knee or hip)
        anatomy: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Split {
            anatomy,
            csv_file,
            outdir,
            seed,
        } => commands::split::run(&anatomy, csv_file, outdir, seed),
        Commands::Evaluate {
            cohort,
            name,
            output,
            config,
            anatomy,
            attribute,
            backbone,
            models,
            images,
        } => commands::evaluate::run(commands::evaluate::Args {
            cohort,
            name,
            output,
            config,
            anatomy,
            attribute,
            backbone,
            models,
            images,
        }),
        Commands::Summarize {
            input,
            metric,
            json,
        } => commands::summarize::run(input, metric.as_deref(), json),
        Commands::Labels { anatomy } => commands::labels::run(&anatomy),
    }
}
