use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::info;
use tokio::net::TcpListener;
use tokio::sync::watch;

use podwatch_lib::clock::system_clock;
use podwatch_lib::commands::collect::{cleanup_loop, collect_loop};
use podwatch_lib::commands::settings::load_settings;
use podwatch_lib::{router, AppState};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// JSON settings file; missing keys fall back to defaults
    #[arg(long, global = true, default_value = "podwatch.json")]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
enum Cmd {
    /// Run the HTTP server and any configured schedulers
    Serve,
    /// Sweep both networks once and print the report
    Collect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("podwatch=info")).init();

    let args = Args::parse();
    let settings = load_settings(&args.config)
        .with_context(|| format!("loading settings from {}", args.config.display()))?;
    let state = AppState::from_settings(&settings, system_clock())
        .with_context(|| format!("opening history database {}", settings.database_path))?;

    if let Cmd::Collect = args.cmd {
        let summary = state.collector.run_all().await;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel::<bool>(false);
    let mut schedulers = Vec::new();
    if settings.collect_interval_secs > 0 {
        schedulers.push(tokio::spawn(collect_loop(
            state.collector.clone(),
            Duration::from_secs(settings.collect_interval_secs),
            shutdown_rx.clone(),
        )));
    }
    if settings.cleanup_interval_secs > 0 {
        schedulers.push(tokio::spawn(cleanup_loop(
            state.collector.clone(),
            Duration::from_secs(settings.cleanup_interval_secs),
            shutdown_rx.clone(),
        )));
    }
    if settings.cron_secret.is_none() {
        log::warn!("no cron secret configured; trigger endpoints will reject every call");
    }

    let app = router(state);
    let listener = TcpListener::bind(&settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    info!("listening on {}", settings.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let _ = shutdown_tx.send(true);
    for handle in schedulers {
        let _ = handle.await;
    }
    Ok(())
}
