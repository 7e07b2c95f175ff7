// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

mod cli;
mod config;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use fluxion_timeline::{
    DayView, PlanCache, SessionView, SystemClock, TabKind, TimelineSession, normalize_intervals,
};
use fluxion_timeline_ha::TimelineApiClient;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, ViewArgs};
use crate::config::AppConfig;

const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    init_tracing(&loaded.config.system.log_level);

    info!("Starting FluxION timeline v{}", env!("CARGO_PKG_VERSION"));
    loaded.log();
    let config = loaded.config;

    let token = config
        .api
        .token
        .clone()
        .context("No API token configured (api.token, HA_TOKEN or SUPERVISOR_TOKEN)")?;
    let client = Arc::new(
        TimelineApiClient::new(&config.api.base_url, token)?
            .with_retry_policy(config.retry_policy())
            .with_timeout(config.api_timeout())?,
    );

    match cli.command {
        Commands::Show(args) => {
            let session = open_session(&config, &client, &args)?;
            session.open().await;
            print_json(&session.view())?;
            session.close().await;
        }
        Commands::Watch(args) => watch(&config, &client, &args).await?,
        Commands::Timeline => {
            let raw = client
                .fetch_active_timeline()
                .await
                .context("Failed to fetch active timeline")?;
            let store = normalize_intervals(&raw, config.timezone()?, Utc::now())
                .context("Active timeline is malformed")?;
            let view =
                DayView::from_intervals(TabKind::Detail, None, store, &config.analysis);
            print_json(&view)?;
        }
    }

    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,fluxion_timeline={level},fluxion_timeline_ha={level},fluxion_timeline_main={level}"
        ))
    });

    // stdout carries the JSON output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// An explicit `--plan` is a manual pick; otherwise planner settings choose
fn open_session(
    config: &AppConfig,
    client: &Arc<TimelineApiClient>,
    args: &ViewArgs,
) -> Result<TimelineSession> {
    let cache = PlanCache::new(
        client.clone(),
        Arc::new(SystemClock),
        config.cache_settings()?,
    );

    let session = match &args.plan {
        Some(plan) => TimelineSession::new(cache, plan, args.tab, config.refresh_interval()),
        None => TimelineSession::with_settings_store(
            cache,
            client.clone(),
            &config.system.default_plan,
            args.tab,
            config.refresh_interval(),
        ),
    };
    Ok(session)
}

async fn watch(config: &AppConfig, client: &Arc<TimelineApiClient>, args: &ViewArgs) -> Result<()> {
    let session = open_session(config, client, args)?;
    session.open().await;

    let mut last_printed: Option<String> = None;
    let mut poll = tokio::time::interval(WATCH_POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, closing session");
                break;
            }
            _ = poll.tick() => {
                let rendered = render(&session.view())?;
                if last_printed.as_ref() != Some(&rendered) {
                    println!("{rendered}");
                    last_printed = Some(rendered);
                }
            }
        }
    }

    session.close().await;
    Ok(())
}

fn render(view: &SessionView) -> Result<String> {
    serde_json::to_string_pretty(view).context("Failed to serialize view")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{rendered}");
    Ok(())
}
