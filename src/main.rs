//! CLI for training runs tracked in an experiment database.
//!
//! Usage: dl-tracker train --store file://./tracker --epochs 10
//!        dl-tracker test --store file://./tracker            (latest checkpoint)
//!        dl-tracker last --store file://./tracker
//!
//! The store defaults to `$MONGODB_CONNECTION_STR`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use dl_tracker::blob::Compression;
use dl_tracker::config::{Endpoint, StoreConfig, CONNECTION_ENV, DEFAULT_CHUNK_SIZE};
use dl_tracker::experiment::ExperimentDb;
use dl_tracker::model::{ClassifierConfig, Metrics};
use dl_tracker::pipeline::{self, CheckpointSource, DataSource, TestOptions, TrainOptions};
use dl_tracker::train::{MonitorMode, TrainerConfig};

#[derive(Parser, Debug)]
#[command(name = "dl-tracker", about = "Train, test and inspect tracked experiments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a classifier and record the run.
    Train(TrainArgs),
    /// Evaluate a checkpoint (local file, experiment id or latest).
    Test(TestArgs),
    /// Download a stored checkpoint.
    Fetch(FetchArgs),
    /// Print an experiment record as JSON.
    Show(ShowArgs),
    /// Print the most recent experiment id.
    Last(LastArgs),
}

// ── Shared ─────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
struct StoreArgs {
    /// Connection string: memory://, file://<dir> or mongodb://...
    #[arg(long = "store", env = CONNECTION_ENV, default_value = "memory://")]
    connection_string: String,
    #[arg(long, default_value = "acc")]
    database: String,
    /// Blob chunk size in bytes.
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    /// Checkpoint compression: none, lz4, zstd.
    #[arg(long, default_value = "none")]
    compression: Compression,
}

impl StoreArgs {
    fn config(&self) -> Result<StoreConfig> {
        let config = StoreConfig::new(&self.connection_string)
            .database(&self.database)
            .chunk_size(self.chunk_size)
            .compression(self.compression);
        if config.endpoint()? == Endpoint::Memory {
            warn!("memory:// store: records are lost when the process exits");
        }
        Ok(config)
    }

    fn connect(&self) -> Result<ExperimentDb> {
        Ok(ExperimentDb::connect(self.config()?)?)
    }
}

#[derive(Args, Debug)]
struct DataArgs {
    /// JSON-lines dataset; synthetic data when omitted.
    #[arg(long)]
    data: Option<PathBuf>,
    #[arg(long, default_value_t = 512)]
    samples: usize,
    #[arg(long, default_value_t = 16)]
    features: usize,
    #[arg(long, default_value_t = 10)]
    classes: usize,
    #[arg(long, default_value_t = 7)]
    data_seed: u64,
}

impl DataArgs {
    fn source(&self) -> DataSource {
        match &self.data {
            Some(path) => DataSource::Jsonl(path.clone()),
            None => DataSource::Synthetic {
                samples: self.samples,
                features: self.features,
                classes: self.classes,
                seed: self.data_seed,
            },
        }
    }
}

// ── Train ──────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    store: StoreArgs,
    #[command(flatten)]
    data: DataArgs,
    #[arg(long, default_value = "runs")]
    output_dir: PathBuf,
    #[arg(long, default_value_t = 10)]
    epochs: usize,
    #[arg(long, default_value_t = 1)]
    check_val_every_n_epoch: usize,
    /// One epoch, no checkpoint, no upload.
    #[arg(long)]
    fast_dev_run: bool,
    /// Short run recorded in the sanity-check collection.
    #[arg(long)]
    sanity_check: bool,
    #[arg(long, default_value_t = 64)]
    sanity_samples: usize,
    #[arg(long, default_value = "val.acc")]
    monitor: String,
    #[arg(long, default_value = "max")]
    mode: MonitorMode,
    #[arg(long, default_value_t = 0.1)]
    lr: f64,
    /// Exponential LR decay per epoch.
    #[arg(long, default_value_t = 0.95)]
    gamma: f64,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
    #[arg(long, default_value_t = 0.2)]
    dropout: f64,
    #[arg(long, default_value_t = 10)]
    output_size: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 0.2)]
    val_fraction: f64,
    /// Skip evaluating the best checkpoint after training.
    #[arg(long)]
    no_test: bool,
}

fn cmd_train(args: TrainArgs) -> Result<()> {
    let store = args.store.config()?;
    let options = TrainOptions {
        trainer: TrainerConfig {
            max_epochs: args.epochs,
            check_val_every_n_epoch: args.check_val_every_n_epoch,
            fast_dev_run: args.fast_dev_run,
            sanity_check: args.sanity_check,
            sanity_samples: args.sanity_samples,
            output_dir: args.output_dir,
            monitor: args.monitor,
            mode: args.mode,
        },
        model: ClassifierConfig {
            output_size: args.output_size,
            dropout: args.dropout,
            lr: args.lr,
            gamma: args.gamma,
            batch_size: args.batch_size,
            seed: args.seed,
            ..ClassifierConfig::default()
        },
        data: args.data.source(),
        val_fraction: args.val_fraction,
        split_seed: args.seed,
        run_test: !args.no_test,
    };

    let outcome = pipeline::train(&options, &store)?;
    println!("experiment: {}", outcome.experiment_id);
    match &outcome.fit.best_model_path {
        Some(path) => println!("best checkpoint: {}", path.display()),
        None => println!("best checkpoint: none"),
    }
    if let Some(metrics) = &outcome.test_metrics {
        print_metrics(metrics);
    }
    Ok(())
}

// ── Test ───────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
struct TestArgs {
    #[command(flatten)]
    store: StoreArgs,
    #[command(flatten)]
    data: DataArgs,
    /// Local checkpoint file.
    #[arg(long, conflicts_with = "experiment")]
    checkpoint: Option<PathBuf>,
    /// Experiment whose stored checkpoint to evaluate.
    #[arg(long)]
    experiment: Option<String>,
    #[arg(long, default_value = "runs/downloads")]
    download_dir: PathBuf,
}

fn cmd_test(args: TestArgs) -> Result<()> {
    let checkpoint = match (args.checkpoint, args.experiment) {
        (Some(path), _) => CheckpointSource::Path(path),
        (None, Some(id)) => CheckpointSource::Experiment(id),
        (None, None) => CheckpointSource::Latest,
    };
    let options = TestOptions {
        checkpoint,
        data: args.data.source(),
        download_dir: args.download_dir,
    };
    let metrics = pipeline::test(&options, &args.store.config()?)?;
    print_metrics(&metrics);
    Ok(())
}

// ── Inspect ────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
struct FetchArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Experiment id; latest checkpoint when omitted.
    #[arg(long)]
    experiment: Option<String>,
    #[arg(long, default_value = "checkpoint.ckpt")]
    dest: PathBuf,
}

fn cmd_fetch(args: FetchArgs) -> Result<()> {
    let db = args.store.connect()?;
    let info = db
        .load_checkpoint(&args.dest, args.experiment.as_deref())
        .context("checkpoint download failed")?;
    println!(
        "{} -> {} ({} bytes, uploaded {})",
        info.id(),
        args.dest.display(),
        info.raw_length(),
        info.upload_date()
    );
    Ok(())
}

#[derive(Args, Debug)]
struct ShowArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Experiment id; latest when omitted.
    experiment: Option<String>,
    #[arg(long)]
    sanity_check: bool,
}

fn cmd_show(args: ShowArgs) -> Result<()> {
    let db = args.store.connect()?;
    let id = match args.experiment {
        Some(id) => id,
        None => match db.last_experiment_id(args.sanity_check)? {
            Some(id) => id,
            None => bail!("no experiments in '{}'", db.collection(args.sanity_check)),
        },
    };
    let Some(document) = db.find_document(&id, args.sanity_check)? else {
        bail!("experiment '{id}' not found in '{}'", db.collection(args.sanity_check));
    };
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

#[derive(Args, Debug)]
struct LastArgs {
    #[command(flatten)]
    store: StoreArgs,
    #[arg(long)]
    sanity_check: bool,
    /// Report the most recent stored checkpoint instead.
    #[arg(long)]
    checkpoint: bool,
}

fn cmd_last(args: LastArgs) -> Result<()> {
    let db = args.store.connect()?;
    let last = if args.checkpoint {
        db.last_checkpoint_id()?
    } else {
        db.last_experiment_id(args.sanity_check)?
    };
    match last {
        Some(id) => println!("{id}"),
        None => bail!("nothing stored yet"),
    }
    Ok(())
}

fn print_metrics(metrics: &Metrics) {
    for (name, value) in metrics {
        println!("{name:<12} {value:.4}");
    }
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("dl_tracker=info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Train(args) => cmd_train(args),
        Command::Test(args) => cmd_test(args),
        Command::Fetch(args) => cmd_fetch(args),
        Command::Show(args) => cmd_show(args),
        Command::Last(args) => cmd_last(args),
    }
}
