use std::{path::PathBuf, process};

use fedlink_relay::{
    forward::Forwarder,
    rest,
    settings::{Settings, UpstreamSettings},
};
use structopt::StructOpt;
use tokio::signal;
use tracing_subscriber::*;

#[macro_use]
extern crate tracing;

#[derive(Debug, StructOpt)]
#[structopt(name = "fedlink-relay")]
struct Opt {
    /// Path of the configuration file
    #[structopt(short, parse(from_os_str))]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();

    let settings = Settings::new(opt.config_path).unwrap_or_else(|err| {
        eprintln!("{}", err);
        process::exit(1);
    });
    let Settings {
        api: api_settings,
        upstream: UpstreamSettings { default_url },
        log: log_settings,
    } = settings;

    let _fmt_subscriber = FmtSubscriber::builder()
        .with_env_filter(log_settings.filter)
        .with_ansi(true)
        .init();

    match &default_url {
        Some(url) => info!("default federated server: {}", url),
        None => info!("no default federated server, participants must name one"),
    }
    let forwarder = Forwarder::new(default_url).unwrap_or_else(|err| {
        error!("{}", err);
        process::exit(1);
    });

    let shutdown = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("failed to listen for shutdown signal: {}", err);
            futures::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    };

    if let Err(err) = rest::serve(api_settings, forwarder, shutdown).await {
        error!("{}", err);
        process::exit(1);
    }
    info!("relay stopped");
}
