use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use droplet::{
    io::write_log, synthetic::SessileDrop, BatchEvent, BatchRunner, ContactAngleEngine, EngineBuilder, EngineConfig,
    ImageOutcome,
};
use droplet_cli::{log_path, BatchConfig};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure the contact angle of one or more images
    Measure {
        /// Images to measure
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Engine configuration (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print one JSON object per image instead of log lines
        #[arg(long)]
        json: bool,
    },

    /// Measure a folder, or a list of files, and write a results log
    Batch {
        /// Folder scanned for images; also where the log is written
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Measure exactly these files instead of scanning the folder
        #[arg(short, long, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Log file name; `.log` is appended when missing
        #[arg(short, long)]
        log: Option<String>,

        /// Batch configuration (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Concurrent measurements
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Per-image time limit in seconds
        #[arg(long)]
        timeout_secs: Option<f64>,

        /// Accepted extensions when scanning, repeatable
        #[arg(long = "ext")]
        extensions: Vec<String>,
    },

    /// Render a synthetic droplet with a known contact angle
    Synth {
        /// Contact angle in degrees, strictly between 0 and 180
        #[arg(short, long)]
        angle: f64,

        /// Output image path
        #[arg(short, long)]
        output: PathBuf,

        /// Grey level of a visible substrate below the drop
        #[arg(long)]
        substrate: Option<u8>,
    },

    /// Print the JSON schema of the configuration file
    Schema {
        /// Schema of the batch configuration instead of the engine one
        #[arg(long)]
        batch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Measure { images, config, json } => {
            measure_images(images, config.as_deref(), *json)?;
        }
        Commands::Batch {
            dir,
            files,
            log,
            config,
            jobs,
            timeout_secs,
            extensions,
        } => {
            let mut batch = match config {
                Some(path) => BatchConfig::from_file(path)?,
                None => BatchConfig::default(),
            };
            if let Some(log) = log {
                batch.log_file = log.clone();
            }
            if jobs.is_some() {
                batch.jobs = *jobs;
            }
            if timeout_secs.is_some() {
                batch.timeout_secs = *timeout_secs;
            }
            if !extensions.is_empty() {
                batch.accepted_extensions = extensions.clone();
            }
            run_batch(dir, files, &batch).await?;
        }
        Commands::Synth {
            angle,
            output,
            substrate,
        } => {
            synthesize(*angle, output, *substrate)?;
        }
        Commands::Schema { batch } => {
            let schema = if *batch {
                schemars::schema_for!(BatchConfig)
            } else {
                EngineConfig::schema()
            };
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }

    Ok(())
}

fn engine_from(config: &EngineConfig) -> Result<ContactAngleEngine> {
    Ok(EngineBuilder::from_config(config)?.build())
}

fn measure_images(images: &[PathBuf], config: Option<&Path>, json: bool) -> Result<()> {
    let config = match config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let engine = engine_from(&config)?;
    let precision = engine.precision() as usize;

    let mut failures = 0;
    for path in images {
        let outcome = ImageOutcome {
            path: path.clone(),
            result: engine.measure(path),
        };
        if !outcome.is_success() {
            failures += 1;
        }

        if json {
            let value = match &outcome.result {
                Ok(result) => serde_json::json!({
                    "file": path,
                    "result": result,
                }),
                Err(err) => serde_json::json!({
                    "file": path,
                    "error": {
                        "kind": err.kind().to_string(),
                        "stage": err.stage,
                        "reason": err.reason.to_string(),
                    },
                }),
            };
            println!("{}", serde_json::to_string(&value)?);
        } else {
            println!("{}", outcome.log_line(precision));
        }
    }

    if failures > 0 {
        warn!("{failures} of {} images could not be measured", images.len());
    }
    Ok(())
}

async fn run_batch(dir: &Path, files: &[PathBuf], config: &BatchConfig) -> Result<()> {
    if !dir.is_dir() {
        return Err(eyre!("Working folder does not exist: {}", dir.display()));
    }

    let engine = Arc::new(engine_from(&config.engine)?);
    let precision = engine.precision() as usize;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let runner = BatchRunner::new(engine, config.batch_options()).with_events(tx);

    let progress = tokio::spawn(async move {
        let mut total = 0;
        let mut done = 0;
        while let Some(event) = rx.recv().await {
            match event {
                BatchEvent::Started { total: count } => {
                    total = count;
                    info!("Measuring {total} images");
                }
                BatchEvent::Completed { log_line, .. } => {
                    done += 1;
                    info!("[{done}/{total}] {log_line}");
                }
                BatchEvent::Finished { succeeded, failed } => {
                    info!("{succeeded} measured, {failed} failed");
                }
            }
        }
    });

    let outcomes = if files.is_empty() {
        runner.run_dir(dir, &config.accepted_extensions).await?
    } else {
        runner.run(files.to_vec()).await
    };
    drop(runner);
    progress.await?;

    let log = log_path(dir, &config.log_file);
    let writer = BufWriter::new(File::create(&log)?);
    write_log(writer, &outcomes, precision)?;
    info!("Results stored in {}", log.display());
    Ok(())
}

fn synthesize(angle: f64, output: &Path, substrate: Option<u8>) -> Result<()> {
    if !(angle > 0.0 && angle < 180.0) {
        return Err(eyre!("Contact angle must be strictly between 0 and 180 degrees, got {angle}"));
    }
    let mut drop = SessileDrop::new(angle);
    if let Some(level) = substrate {
        drop = drop.with_substrate_level(level);
    }
    drop.save(output)?;
    info!(
        "Wrote {}x{} drop at {angle} degrees to {}",
        drop.width,
        drop.height,
        output.display()
    );
    Ok(())
}
