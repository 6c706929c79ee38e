//! Command implementations
//!
//! The CLI carries no database of its own: it seeds the in-memory store
//! from the config file's account entries, so query commands run a sync
//! first and report on the result.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use tracing::info;

use brim_core::{
    classify_bills, AccountConnection, Config, ConnectionStatus, Credentials, Enricher,
    HttpBankingFeed, HttpEnricher, MemoryStore, Store, SyncEngine, SyncOutcome,
};
use brim_server::{start_sync_scheduler, AppState};

/// Build the engine from config: HTTP feed, optional enricher, and an
/// in-memory store seeded with the configured account connections.
async fn build_engine(config: &Config) -> Result<Arc<SyncEngine>> {
    let feed_url = config
        .engine
        .feed_url
        .as_deref()
        .context("engine.feed_url (or BRIM_FEED_URL) is required")?;
    let feed = Arc::new(HttpBankingFeed::new(feed_url));

    let enricher = config
        .engine
        .enrich_url
        .as_deref()
        .map(|url| Arc::new(HttpEnricher::new(url)) as Arc<dyn Enricher>);
    if enricher.is_none() {
        info!("no enrichment service configured; using local classification only");
    }

    let store = Arc::new(MemoryStore::new());
    for account in &config.accounts {
        store
            .upsert_connection(&AccountConnection {
                account_id: account.account_id,
                user_id: account.user_id,
                status: ConnectionStatus::Active,
                credentials: Credentials {
                    access_token: account.access_token.clone(),
                    refresh_token: account.refresh_token.clone(),
                    expires_at: account
                        .token_expires_at
                        .unwrap_or_else(|| Utc::now() + Duration::days(365)),
                },
                last_synced_at: None,
                next_recalibration_at: None,
                last_error: None,
            })
            .await?;
    }

    Ok(Arc::new(SyncEngine::new(
        store,
        feed,
        enricher,
        config.engine.clone(),
    )))
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Ok(Config::load(path)?)
}

pub async fn cmd_serve(config_path: Option<&Path>, listen: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config).await?;

    start_sync_scheduler(engine.clone(), config.engine.sync_interval_secs);

    let state = Arc::new(AppState {
        engine,
        config: config.server.clone(),
    });
    let addr = listen.unwrap_or(&config.server.listen_addr);
    brim_server::serve(state, addr).await
}

pub async fn cmd_sync(config_path: Option<&Path>, account: Option<i64>) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config).await?;

    match account {
        Some(account_id) => {
            let outcome = engine.sync_account(account_id).await?;
            match outcome {
                SyncOutcome::Completed(stats) => {
                    println!(
                        "Synced account {}: {} fetched, {} new, {} ghost pairs, {} patterns",
                        account_id,
                        stats.fetched,
                        stats.inserted,
                        stats.ghost_pairs,
                        stats.patterns_upserted
                    );
                }
                SyncOutcome::NeedsReauth => {
                    bail!("account {} needs re-authentication", account_id)
                }
                SyncOutcome::AlreadyRunning => {
                    println!("Sync already running for account {}", account_id);
                }
                SyncOutcome::Skipped(status) => {
                    bail!("account {} is {}; reconnect to sync", account_id, status)
                }
            }
        }
        None => {
            let report = engine.run_cycle().await;
            println!(
                "Cycle complete: {} selected, {} completed, {} failed, {} need re-auth",
                report.selected, report.completed, report.failed, report.needs_reauth
            );
        }
    }
    Ok(())
}

/// Sync every account of `user`, so the printed figures are fresh.
async fn sync_user_accounts(engine: &SyncEngine, config: &Config, user: i64) -> Result<()> {
    for account in config.accounts.iter().filter(|a| a.user_id == user) {
        if let Err(e) = engine.sync_account(account.account_id).await {
            // Partial failure is fine; the summary covers what synced
            tracing::warn!(account_id = account.account_id, error = %e, "account sync failed");
        }
    }
    Ok(())
}

pub async fn cmd_summary(
    config_path: Option<&Path>,
    user: i64,
    account: Option<i64>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config).await?;
    sync_user_accounts(&engine, &config, user).await?;

    let summary = match account {
        Some(account_id) => engine.store().get_account_summary(account_id).await?,
        None => engine.store().get_user_summary(user).await?,
    };
    match summary {
        Some(s) => println!("{}", serde_json::to_string_pretty(&s)?),
        None => bail!("no summary available; did any account sync succeed?"),
    }
    Ok(())
}

pub async fn cmd_bills(config_path: Option<&Path>, user: i64) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config).await?;
    sync_user_accounts(&engine, &config, user).await?;

    let patterns = engine.store().list_patterns(user, true).await?;
    let transactions = engine.store().list_user_transactions(user).await?;
    let bills = classify_bills(&patterns, &transactions, Utc::now().date_naive());
    println!("{}", serde_json::to_string_pretty(&bills)?);
    Ok(())
}

pub async fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config).await?;

    let connections = engine.store().list_connections().await?;
    if connections.is_empty() {
        println!("No accounts configured");
        return Ok(());
    }
    for c in connections {
        let last = c
            .last_synced_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let error = c.last_error.as_deref().unwrap_or("-");
        println!(
            "account {} (user {}): {} | last synced: {} | {}",
            c.account_id, c.user_id, c.status, last, error
        );
    }
    Ok(())
}
