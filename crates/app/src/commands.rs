use anyhow::{bail, Context, Result};
use bankfeed_core::{Classification, Session};
use bankfeed_storage::DbPool;
use bankfeed_sync::{
    GoCardlessClient, LinkSettings, SqliteStore, SyncOptions, SyncOrchestrator, SyncReport,
    TokenManager,
};
use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;

type Orchestrator = SyncOrchestrator<GoCardlessClient, SqliteStore>;

async fn orchestrator(config: &Config, pool: DbPool, dry_run: bool) -> Result<Orchestrator> {
    config.upstream.require_credentials()?;
    let upstream = &config.upstream;

    let client = GoCardlessClient::new(
        &upstream.base_url,
        &upstream.secret_id,
        &upstream.secret_key,
        upstream.timeout(),
    )?;
    let tokens = TokenManager::connect(Arc::new(client), upstream.timeout())
        .await
        .context("Failed to obtain an aggregator token")?;

    Ok(SyncOrchestrator::new(
        Arc::new(tokens),
        Arc::new(SqliteStore::new(pool)),
        LinkSettings {
            country: upstream.country.clone(),
            redirect_uri: upstream.redirect_uri.clone(),
        },
        SyncOptions {
            dry_run,
            max_concurrent_sessions: config.sync.max_concurrent_sessions,
        },
    ))
}

pub async fn sync(config: &Config, pool: DbPool, dry_run: bool) -> Result<()> {
    let orchestrator = orchestrator(config, pool, dry_run || config.sync.dry_run).await?;

    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current account");
            stop.stop();
        }
    });

    let report = orchestrator.run_once().await?;
    print_report(&report);
    if !report.is_clean() {
        warn!(
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "Sync cycle incomplete"
        );
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    let prefix = if report.dry_run { "[dry run] " } else { "" };
    println!(
        "{prefix}{} sessions, {} accounts: {} inserted, {} updated, {} unchanged, {} rejected",
        report.sessions,
        report.accounts,
        report.tally.inserted,
        report.tally.updated,
        report.tally.unchanged,
        report.rejected,
    );
    for skipped in &report.skipped {
        println!(
            "  skipped {} ({}): status {}",
            skipped.requisition_id,
            skipped.bank_name,
            skipped.status.code()
        );
    }
    for failure in &report.failures {
        println!("  failed {:?}: {}", failure.scope, failure.reason);
    }
    if report.cancelled {
        println!("  cycle stopped early");
    }
}

pub async fn link(config: &Config, pool: DbPool, bank_name: &str) -> Result<()> {
    let orchestrator = orchestrator(config, pool, false).await?;
    let link = orchestrator.directory().link(bank_name).await?;
    info!(requisition_id = %link.session.requisition_id, "Session saved");
    println!("Open this link to grant access:\n{}", link.link);
    Ok(())
}

pub async fn sessions(pool: &DbPool) -> Result<()> {
    let sessions = bankfeed_storage::list_sessions(pool).await?;
    if sessions.is_empty() {
        println!("No linked sessions. Run `bankfeed link <bank>` first.");
    }
    for s in &sessions {
        println!("{}", session_line(s));
    }
    Ok(())
}

fn session_line(s: &Session) -> String {
    let line = format!("{}  {:<20} {}", s.requisition_id, s.bank_name, s.status.code());
    if s.status.is_pending() {
        format!("{line}  (awaiting consent)")
    } else {
        line
    }
}

pub async fn tag(
    pool: &DbPool,
    id: &str,
    kind: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<()> {
    let classification = parse_classification(kind, from, to)?;
    if !bankfeed_storage::apply_classification(pool, id, &classification).await? {
        bail!("No transaction with id '{id}'");
    }
    println!("{id}: {classification}");
    Ok(())
}

pub async fn show(pool: &DbPool, limit: i64) -> Result<()> {
    for tx in bankfeed_storage::list_transactions(pool, limit).await? {
        let date = tx
            .transaction_datetime
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "----------".to_string());
        println!(
            "{date}  {:>14}  {:<7} {:<30} {}  [{}]",
            tx.transaction_amount.to_string(),
            tx.status.as_str(),
            tx.short_name.as_deref().unwrap_or("-"),
            tx.classification,
            tx.id,
        );
    }
    Ok(())
}

fn parse_classification(kind: &str, from: Option<&str>, to: Option<&str>) -> Result<Classification> {
    match kind.to_ascii_lowercase().as_str() {
        "unknown" => Ok(Classification::Unknown {}),
        "one-off" | "oneoff" => Ok(Classification::OneOff {}),
        "periodic" => {
            let (Some(from), Some(to)) = (from, to) else {
                bail!("periodic needs --from and --to");
            };
            Ok(Classification::periodic(parse_day(from)?, parse_day(to)?)?)
        }
        other => bail!("Unknown classification '{other}' (expected unknown, one-off or periodic)"),
    }
}

fn parse_day(s: &str) -> Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{s}', expected YYYY-MM-DD"))?;
    Ok(Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)))
}
