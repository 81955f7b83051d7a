use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand, arg};
use log::{error, info};
use paddock::{
    InfoSnapshot, PaddockConfig, PaddockError, Pipeline,
    storage::{HistoryStorage, open_file_storage},
    telemetry::producer::ReplayTelemetryProducer,
    writer,
};

const MODULE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recorded telemetry file through every enabled calculator
    Run {
        #[arg(short, long)]
        input: PathBuf,

        /// Config file, defaults to the user's config directory
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory for lap traces and consumption history
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Write read-model snapshots to this JSON Lines file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Interval between read-model snapshots
        #[arg(long, default_value_t = 1000)]
        snapshot_interval_ms: u64,
    },
    /// Write the default config to the user's config directory
    InitConfig,
}

fn summarize(snapshot: &InfoSnapshot) {
    info!(
        "delta best {:+.3} | pace {:.3} | fuel {:.2}L est {:.2}L/lap {:.1} laps left | standings {}",
        snapshot.delta.delta_best,
        snapshot.delta.lap_time_pace,
        snapshot.fuel.amount_current,
        snapshot.fuel.estimated_consumption,
        snapshot.fuel.estimated_laps_left,
        snapshot.relative.standings.len(),
    );
}

fn run(
    input: PathBuf,
    config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    snapshot_interval: Duration,
) -> Result<(), PaddockError> {
    let mut config = match config {
        Some(path) => PaddockConfig::load(&path)?,
        None => PaddockConfig::from_local_file()?,
    };
    if data_dir.is_some() {
        config.data_dir = data_dir;
    }

    let storage: Arc<dyn HistoryStorage> = Arc::new(open_file_storage(config.history_dir()?)?);
    let producer = ReplayTelemetryProducer::from_file(&input)?;
    let mut pipeline = Pipeline::start(&config, producer, storage)?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_running = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        handler_running.store(false, Ordering::SeqCst);
    }) {
        error!("Could not set Ctrl-C handler: {}", e);
    }

    let (snapshot_tx, snapshot_writer) = match output {
        Some(path) => {
            let (tx, rx) = mpsc::channel();
            let handle = thread::spawn(move || writer::write_snapshots(&path, rx));
            (Some(tx), Some(handle))
        }
        None => (None, None),
    };

    let start = Instant::now();
    let mut last_snapshot = Instant::now();
    while running.load(Ordering::SeqCst) && pipeline.is_collecting() {
        thread::sleep(Duration::from_millis(50));
        if last_snapshot.elapsed() < snapshot_interval {
            continue;
        }
        last_snapshot = Instant::now();
        let snapshot = pipeline.info().snapshot(start.elapsed().as_millis());
        summarize(&snapshot);
        if let Some(ref tx) = snapshot_tx {
            // the writer only goes away on an io error, which it reports on join
            let _ = tx.send(snapshot);
        }
    }

    info!("Stopping modules");
    let stopped = pipeline.stop(MODULE_STOP_TIMEOUT);
    let snapshot = pipeline.info().snapshot(start.elapsed().as_millis());
    summarize(&snapshot);
    if let Some(tx) = snapshot_tx {
        let _ = tx.send(snapshot);
    }
    if let Some(handle) = snapshot_writer {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => error!("Snapshot writer thread panicked"),
        }
    }
    stopped
}

fn init_config() -> Result<(), PaddockError> {
    let path = PaddockConfig::default_path().ok_or(PaddockError::NoConfigDir)?;
    PaddockConfig::default().save(&path)?;
    info!("Default config written to {:?}", path);
    Ok(())
}

fn main() -> ExitCode {
    #[cfg(debug_assertions)]
    colog::init();

    let cli = Args::parse();
    let result = match cli.command {
        Commands::Run {
            input,
            config,
            data_dir,
            output,
            snapshot_interval_ms,
        } => run(
            input,
            config,
            data_dir,
            output,
            Duration::from_millis(snapshot_interval_ms),
        ),
        Commands::InitConfig => init_config(),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
