use lenscheck::{
    common::{Config, SpoofConfig},
    core::{
        evaluation::{self, SearchSpace, Trial},
        LineSpoofDetector,
    },
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lenscheck-tune")]
#[command(about = "Score and tune the line detector on labelled image sets")]
struct Cli {
    /// Directory of real-scene photos (every hit is a false positive)
    #[arg(long, global = true, default_value = "data/nature")]
    nature: PathBuf,

    /// Directory of re-photographed screens/prints (every hit is a true positive)
    #[arg(long, global = true, default_value = "data/recapture")]
    recapture: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score the configured (or default) detector parameters
    Evaluate {
        /// Config file to take `[spoof]` parameters from
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Random search over detector parameters, maximising F1
    Tune {
        #[arg(short, long, default_value = "50")]
        iterations: usize,
        #[arg(long, default_value = "42")]
        seed: u64,
        /// Append every trial to this CSV file
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate { config, json } => {
            let params = match config {
                Some(path) => Config::load_from_path(&path)?.spoof,
                None => SpoofConfig::default(),
            };
            let detector = LineSpoofDetector::new(params)?;
            let report = evaluation::evaluate_dirs(&detector, &cli.nature, &cli.recapture)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            println!("Nature images:     {}", report.total_nature);
            println!("Recapture images:  {}", report.total_recapture);
            println!("False positives:   {}", report.false_positives);
            println!("True positives:    {}", report.true_positives);
            println!("Precision:         {:.4}", report.precision);
            println!("Recall:            {:.4}", report.recall);
            println!("F1 score:          {:.4}", report.f1_score);
            for name in &report.flagged_nature {
                println!("  false positive: {}", name);
            }
            for error in &report.errors {
                println!("  error: {}", error);
            }
        }
        Commands::Tune { iterations, seed, csv } => {
            let nature = evaluation::load_image_dir(&cli.nature)?;
            let recapture = evaluation::load_image_dir(&cli.recapture)?;
            println!(
                "Loaded {} nature and {} recapture images",
                nature.len(),
                recapture.len()
            );

            let mut log = match &csv {
                Some(path) => {
                    let new_file = !path.exists();
                    let mut file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    if new_file {
                        writeln!(file, "{}", Trial::CSV_HEADER)?;
                    }
                    Some(file)
                }
                None => None,
            };

            let best = evaluation::tune(
                &SearchSpace::default(),
                &nature,
                &recapture,
                iterations,
                seed,
                |i, trial| {
                    println!(
                        "[{:>3}/{}] f1={:.4} precision={:.4} recall={:.4}",
                        i + 1,
                        iterations,
                        trial.report.f1_score,
                        trial.report.precision,
                        trial.report.recall
                    );
                    if let Some(file) = log.as_mut() {
                        writeln!(file, "{}", trial.csv_row())?;
                    }
                    Ok(())
                },
            )?;

            match best {
                Some(trial) => {
                    println!("\nBest parameters (f1={:.4}):", trial.report.f1_score);
                    println!("[spoof]\n{}", toml::to_string(&trial.params)?);
                }
                None => println!("No trials run"),
            }
        }
    }

    Ok(())
}
