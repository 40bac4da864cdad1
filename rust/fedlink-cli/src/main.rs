//! `fedlink`: runs a participant of a round-based federated learning protocol.

use std::{
    fmt::Write as _,
    mem,
    path::{Path, PathBuf},
    process,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{bail, Context};
use structopt::StructOpt;
use tokio::{signal, time::sleep};
use tracing_futures::Instrument;
use tracing_subscriber::*;

use fedlink_core::{
    storage::{GlobalModelSlot, RoundLog, RoundLogEntry, RoundSummary},
    ClientSession,
    RoundNumber,
};
use fedlink_sdk::{
    client::api_url,
    settings::{self, Settings},
    HttpChannel,
    Notify,
    RoundCoordinator,
    RoundOutcome,
    TransferChannel,
};

use crate::{
    progress::ProgressNotifier,
    trainer::{CommandTrainer, TrainerSection},
};

mod progress;
mod trainer;

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "fedlink")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,

    /// Overrides the participant id of the configuration file
    #[structopt(long)]
    client_id: Option<String>,

    /// Round to start from, instead of the one published by the server
    #[structopt(long)]
    round: Option<RoundNumber>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Run rounds until interrupted. Ctrl-C rolls the running round back.
    Run {
        /// Stop after this many successful rounds
        #[structopt(long)]
        rounds: Option<u64>,
    },
    /// Run a single round
    Round,
    /// Compare the round published by the server with the local round log
    Sync,
    /// Print the round log and a summary per round
    History,
    /// Download the global model into the model slot
    Pull,
    /// Remove the log rows of a round
    Rollback { round: RoundNumber },
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let mut settings = Settings::new(&opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let log_settings = mem::take(&mut settings.log);

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    if let Err(err) = run(opt, settings).await {
        error!("{:#}", err);
        process::exit(1);
    }
}

async fn run(opt: Opt, mut settings: Settings) -> anyhow::Result<()> {
    if let Some(client_id) = opt.client_id {
        if client_id.is_empty() {
            bail!("the participant id must not be empty");
        }
        settings.client.id = client_id;
    }

    let log = RoundLog::new(&settings.storage.log_path);
    log.initialize()?;

    match opt.command {
        Command::History => {
            print!("{}", history_table(&log.read_all()?));
            print!("{}", summary_table(&log.rounds()?));
            Ok(())
        }
        Command::Rollback { round } => {
            let removed = log.rollback(round)?;
            println!("removed {} rows of round {}", removed, round);
            Ok(())
        }
        Command::Pull => pull(&settings).await,
        Command::Sync => sync(&settings, &log).await,
        Command::Round => run_rounds(&opt.config_path, opt.round, settings, Some(1)).await,
        Command::Run { rounds } => run_rounds(&opt.config_path, opt.round, settings, rounds).await,
    }
}

fn http_channel(settings: &Settings) -> anyhow::Result<HttpChannel> {
    HttpChannel::new(settings.transfer.chunk_size).context("failed to build the HTTP client")
}

/// Download the global model with a progress bar.
async fn pull(settings: &Settings) -> anyhow::Result<()> {
    let server_url = settings
        .endpoints
        .server_url
        .as_ref()
        .context("no federated server configured in [endpoints] server_url")?;
    let slot = GlobalModelSlot::new(&settings.storage.global_model_path);
    let mut notifier = ProgressNotifier::new();
    let bytes = http_channel(settings)?
        .download(
            &api_url(server_url, "get-global-model"),
            slot.path(),
            &mut |progress| notifier.download_progress(progress),
        )
        .await?;
    notifier.finish();
    info!(
        "global model stored in {} ({} bytes)",
        slot.path().display(),
        bytes
    );
    Ok(())
}

async fn sync(settings: &Settings, log: &RoundLog) -> anyhow::Result<()> {
    let server_url = settings
        .endpoints
        .server_url
        .as_ref()
        .context("no federated server configured in [endpoints] server_url")?;
    let remote = http_channel(settings)?.current_round(server_url).await?;
    println!("server round: {}", remote);
    match log.latest()? {
        Some(entry) if entry.round >= remote => println!(
            "last logged round: {} (the server has not moved past it yet)",
            entry.round
        ),
        Some(entry) => println!("last logged round: {}", entry.round),
        None => println!("no round logged yet"),
    }
    println!("the next round will run as round {}", remote);
    Ok(())
}

/// The round to start from: the one given on the command line, else the one published by the
/// server, else the first round.
async fn starting_round(settings: &Settings) -> Option<RoundNumber> {
    let server_url = settings.endpoints.server_url.as_ref()?;
    let mut channel = http_channel(settings).ok()?;
    match channel.current_round(server_url).await {
        Ok(0) => {
            warn!("{} published round 0, starting from round 1", server_url);
            None
        }
        Ok(round) => Some(round),
        Err(err) => {
            warn!(
                "failed to fetch the current round from {}: {}, starting from round 1",
                server_url, err
            );
            None
        }
    }
}

async fn run_rounds(
    config_path: &Path,
    round: Option<RoundNumber>,
    settings: Settings,
    limit: Option<u64>,
) -> anyhow::Result<()> {
    let TrainerSection { trainer } = settings::load(config_path)
        .context("failed to load the [trainer] section of the configuration")?;
    let trainer = CommandTrainer::new(trainer, settings.client.device.clone());

    let session = ClientSession::new(
        settings.client.id.as_str(),
        round.unwrap_or(1),
        settings.client.device.clone(),
    );
    let mut coordinator = RoundCoordinator::new(
        session,
        settings.coordinator(),
        http_channel(&settings)?,
        trainer,
        ProgressNotifier::new(),
    );
    if round.is_none() {
        if let Some(remote) = starting_round(&settings).await {
            coordinator.sync_round_from_server(remote)?;
        }
    }

    let handle = coordinator.handle();
    let stop = Arc::new(AtomicBool::new(false));
    let span = info_span!("participant", id = %settings.client.id);
    let mut task = tokio::spawn(
        drive_rounds(
            coordinator,
            limit,
            Arc::clone(&stop),
            settings.round.poll_interval,
        )
        .instrument(span),
    );

    let result = tokio::select! {
        result = &mut task => result,
        _ = signal::ctrl_c() => {
            let status = handle.status();
            warn!(
                "interrupted while {} in round {}, rolling back (press Ctrl-C again to exit now)",
                status.state, status.round
            );
            stop.store(true, Ordering::SeqCst);
            handle.request_cancel();
            tokio::select! {
                result = &mut task => result,
                _ = signal::ctrl_c() => process::exit(130),
            }
        }
    };
    result?
}

/// Run rounds until `limit` rounds have been advanced, a round is cancelled or `stop` is set.
async fn drive_rounds(
    mut coordinator: RoundCoordinator,
    limit: Option<u64>,
    stop: Arc<AtomicBool>,
    retry_delay: Duration,
) -> anyhow::Result<()> {
    let mut advanced = 0;
    while limit.map_or(true, |limit| advanced < limit) && !stop.load(Ordering::SeqCst) {
        let mut outcome = coordinator.start_round().await?;
        while let RoundOutcome::UploadPending { round, .. } = outcome {
            if stop.load(Ordering::SeqCst) {
                warn!("giving up the upload of round {}", round);
                outcome = coordinator.abandon_round().await?;
                break;
            }
            sleep(retry_delay).await;
            outcome = coordinator.retry_upload().await?;
        }

        match outcome {
            RoundOutcome::Advanced {
                round,
                server_response,
                ..
            } => {
                debug!("server response for round {}: {}", round, server_response);
                advanced += 1;
            }
            RoundOutcome::Cancelled {
                round,
                removed_rows,
            } => {
                info!("round {} cancelled, {} log rows removed", round, removed_rows);
                break;
            }
            RoundOutcome::UploadPending { round, error } => {
                bail!("round {} could not be uploaded: {}", round, error)
            }
        }
    }
    info!(
        "{} rounds done, next round is {}",
        advanced,
        coordinator.session().current_round()
    );
    Ok(())
}

fn history_table(entries: &[RoundLogEntry]) -> String {
    let mut table = format!(
        "{:<20} {:>6} {:>6} {:>11} {:>11} {:>11}\n",
        "timestamp", "round", "epoch", "train_loss", "val_loss", "val_metric"
    );
    for entry in entries {
        let _ = writeln!(
            table,
            "{:<20} {:>6} {:>6} {:>11.4} {:>11.4} {:>11.4}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            entry.round,
            entry.epoch,
            entry.train_loss,
            entry.val_loss,
            entry.val_metric
        );
    }
    table
}

fn summary_table(rounds: &[RoundSummary]) -> String {
    let mut table = String::new();
    for summary in rounds {
        let _ = writeln!(
            table,
            "round {}: {} epochs, last val loss {:.4}, last val metric {:.4}",
            summary.round, summary.epochs, summary.last.val_loss, summary.last.val_metric
        );
    }
    table
}
