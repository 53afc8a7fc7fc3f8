//! Command handlers. Each prints a short human-readable result to stdout.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use pointscan_core::assets::{HttpFetcher, Source, APP_SHELL};
use pointscan_core::utils::{format_scan_time, last_sync_display};
use pointscan_core::{Settings, Station, SyncOutcome};

/// Scanner input line that triggers a sync instead of a scan
const SYNC_COMMAND: &str = ":sync";

/// Scanner input line that ends the scan loop
const QUIT_COMMAND: &str = ":quit";

/// Text the operator must type to confirm a device reset
const RESET_CONFIRMATION: &str = "RESET";

pub async fn scan_loop(station: &Station) -> Result<()> {
    println!("Ready to scan. Type {SYNC_COMMAND} to sync, {QUIT_COMMAND} or Ctrl-D to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read scanner input")? {
        let input = line.trim();
        match input {
            "" => continue,
            SYNC_COMMAND => print_sync_result(station.sync().await),
            QUIT_COMMAND => break,
            _ => submit(station, input).await,
        }
    }

    let pending = station.pending().await?.len();
    if pending > 0 {
        println!("{pending} scan(s) still queued; run `pointscan sync` when online.");
    }
    Ok(())
}

async fn submit(station: &Station, raw: &str) {
    match station.submit_scan(raw).await {
        Ok(record) => {
            let pending = station.pending().await.map(|p| p.len()).unwrap_or(0);
            println!("OK  {}  queued ({} pending)", record.member_id, pending);
        }
        Err(e) if e.is_retryable() => {
            warn!(error = %e, "Scan not stored");
            println!("ERR {raw}  not stored, scan again: {e}");
        }
        Err(e) => println!("ERR {raw}  {e}"),
    }
}

pub async fn add(station: &Station, member_id: &str) -> Result<()> {
    let record = station.submit_scan(member_id).await?;
    println!("Queued {} as #{}", record.member_id, record.id);
    Ok(())
}

pub async fn sync(station: &Station) -> Result<()> {
    let outcome = station.sync().await?;
    let failed = !matches!(outcome, SyncOutcome::Success(_) | SyncOutcome::NothingToSync);
    print_sync_result(Ok(outcome));
    if failed {
        bail!("sync did not complete; queued scans were kept");
    }
    Ok(())
}

fn print_sync_result(result: pointscan_core::Result<SyncOutcome>) {
    match result {
        Ok(SyncOutcome::NothingToSync) => println!("Nothing to sync."),
        Ok(SyncOutcome::Success(message)) if message.is_empty() => println!("Sync complete."),
        Ok(SyncOutcome::Success(message)) => println!("Sync complete: {message}"),
        Ok(SyncOutcome::RemoteRejected(message)) => {
            println!("Sync rejected by endpoint: {message} (scans kept)")
        }
        Ok(SyncOutcome::TransportError(detail)) => {
            println!("Sync failed, endpoint unreachable: {detail} (scans kept)")
        }
        Err(e) => println!("Sync not started: {e}"),
    }
}

pub async fn list(station: &Station) -> Result<()> {
    let records = station.pending().await?;
    if records.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    for record in &records {
        println!(
            "#{:<6} {}  {}",
            record.id,
            record.member_id,
            format_scan_time(&record.timestamp)
        );
    }
    println!("{} scan(s) queued", records.len());
    Ok(())
}

pub async fn status(station: &Station) -> Result<()> {
    let status = station.status().await?;
    let unset = || "(not set)".to_string();

    println!("Device:     {}", status.device_id);
    println!("Queued:     {}", status.pending);
    println!("Last sync:  {}", last_sync_display(status.last_sync_ms, Utc::now()));
    println!(
        "Endpoint:   {}",
        status.settings.endpoint_url.clone().unwrap_or_else(unset)
    );
    println!(
        "Store:      {}",
        status.settings.store_id.clone().unwrap_or_else(unset)
    );
    println!(
        "Points:     {}",
        status
            .settings
            .point_value
            .map(|p| p.to_string())
            .unwrap_or_else(unset)
    );
    if let Err(e) = status.settings.target() {
        println!("Not ready:  {e}");
    }
    Ok(())
}

pub fn configure(
    station: &mut Station,
    endpoint: Option<String>,
    store_id: Option<String>,
    points: Option<u32>,
) -> Result<()> {
    let update = Settings {
        endpoint_url: endpoint,
        store_id,
        point_value: points,
    };
    if update == Settings::default() {
        bail!("nothing to change; pass --endpoint, --store-id or --points");
    }

    let merged = station.settings().merged(&update);
    station.update_settings(merged)?;
    println!("Settings saved.");
    Ok(())
}

pub async fn reset(station: &mut Station, confirmed: bool) -> Result<()> {
    if !confirmed {
        let pending = station.pending().await?.len();
        println!(
            "This discards {pending} unsynced scan(s), all settings and this device's identity."
        );
        println!("Type {RESET_CONFIRMATION} to continue:");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let answer = lines.next_line().await?.unwrap_or_default();
        if answer.trim() != RESET_CONFIRMATION {
            println!("Reset cancelled.");
            return Ok(());
        }
    }

    let device_id = station.reset_device().await?;
    info!(device_id = %device_id, "Device reset by operator");
    println!("Device reset. New device id: {device_id}");
    Ok(())
}

pub async fn assets_install(station: &Station, origin: &str) -> Result<()> {
    let fetcher = HttpFetcher::new(origin)?;
    let cache = station.asset_cache();
    let stored = cache.install(&fetcher, APP_SHELL).await?;
    println!("Cached {stored} asset(s) in {}", cache.name());
    Ok(())
}

pub async fn assets_activate(station: &Station) -> Result<()> {
    let deleted = station.asset_cache().activate().await?;
    if deleted.is_empty() {
        println!("No stale caches.");
    } else {
        for name in &deleted {
            println!("Deleted {name}");
        }
    }
    Ok(())
}

pub async fn assets_get(station: &Station, origin: &str, path: &str) -> Result<()> {
    let fetcher = HttpFetcher::new(origin)?;
    let served = station.asset_cache().serve(&fetcher, path).await?;
    let source = match served.source {
        Source::Cache => "cache",
        Source::Network => "network",
    };
    println!("{path}: {} bytes from {source}", served.body.len());
    Ok(())
}
