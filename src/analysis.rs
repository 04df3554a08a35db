//! This module contains the core analysis pipeline logic.

use crate::batch::process_in_batches;
use crate::delivery::{ChunkedDelivery, DeliveryReport, MessageTransport};
use crate::detector::AnomalyDetector;
use crate::digest::Digest;
use crate::fetcher::CandleWindowFetcher;
use crate::model::{Symbol, VolumeAnomalyResult};
use crate::source::MarketDataSource;
use crate::storage_utils::{AppConfig, AsyncStorageManager, ExchangeSettings, ScanConfig};
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// One exchange to scan and the policy that selects its symbols.
pub struct ExchangeJob {
    pub source: Box<dyn MarketDataSource>,
    pub settings: ExchangeSettings,
}

/// Result of scanning a single exchange.
#[derive(Debug)]
pub struct ExchangeScan {
    pub exchange: String,
    pub display_suffix: String,
    pub requested: usize,
    pub failed: usize,
    pub digest: Digest,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub exchanges_scanned: usize,
    pub symbols_requested: usize,
    pub symbols_failed: usize,
    pub anomalies: usize,
    pub segments_delivered: usize,
    pub segments_failed: usize,
}

#[derive(Serialize)]
struct AnomalySnapshot<'a> {
    last_updated_timestamp: i64,
    exchanges: Vec<ExchangeAnomalies<'a>>,
}

#[derive(Serialize)]
struct ExchangeAnomalies<'a> {
    exchange: &'a str,
    requested: usize,
    failed: usize,
    results: &'a [VolumeAnomalyResult],
}

/// Keeps symbols trading more than `min_quote_volume` in the last 24h and not matching an
/// excluded substring, most liquid first.
pub fn select_liquid_symbols(
    active: Vec<Symbol>,
    volumes: &HashMap<Symbol, f64>,
    settings: &ExchangeSettings,
) -> Vec<Symbol> {
    let volume_of = |s: &Symbol| volumes.get(s).copied().unwrap_or(0.0);

    let mut liquid: Vec<Symbol> = active
        .into_iter()
        .filter(|s| volume_of(s) > settings.min_quote_volume)
        .filter(|s| !settings.exclude.iter().any(|x| s.as_str().contains(x.as_str())))
        .collect();

    liquid.sort_by(|a, b| {
        volume_of(b)
            .partial_cmp(&volume_of(a))
            .unwrap_or(Ordering::Equal)
    });
    liquid
}

/// Universe -> liquidity filter -> batched window fetches -> detection -> digest.
pub async fn scan_exchange(
    source: &dyn MarketDataSource,
    settings: &ExchangeSettings,
    scan: &ScanConfig,
) -> Result<ExchangeScan> {
    let exchange = source.label().to_string();

    // Step 1: Universe and liquidity
    let active = source.list_active_symbols(&settings.filters).await?;
    let volumes = source.quote_volume_24h().await?;
    let active_count = active.len();
    let symbols = select_liquid_symbols(active, &volumes, settings);
    info!(
        exchange = %exchange,
        active = active_count,
        liquid = symbols.len(),
        min_quote_volume = settings.min_quote_volume,
        "universe ready"
    );

    // Step 2: Download candle windows
    let fetcher = CandleWindowFetcher::new(source, settings.interval, scan.window_size);
    let outcome = process_in_batches(
        &symbols,
        scan.batch_size,
        scan.inter_batch_delay(),
        |symbol| fetcher.fetch(symbol),
    )
    .await?;

    // Step 3: Detect
    let detector = AnomalyDetector::new(scan.volume_multiplier);
    let results: Vec<VolumeAnomalyResult> =
        outcome.results.iter().map(|w| detector.detect(w)).collect();
    let digest = Digest::build(&results, scan.volume_multiplier);

    info!(
        exchange = %exchange,
        interval = %settings.interval,
        batches = outcome.batches,
        analysed = results.len(),
        failed = outcome.failed,
        anomalies = digest.rows().len(),
        "scan finished"
    );

    Ok(ExchangeScan {
        exchange,
        display_suffix: source.display_suffix().to_string(),
        requested: symbols.len(),
        failed: outcome.failed,
        digest,
    })
}

/// Runs the full pipeline for every enabled exchange.
///
/// An exchange whose universe or volumes cannot be fetched is logged and skipped; the other
/// exchanges still produce digests. Only an invalid configuration aborts the run.
pub async fn run_analysis_pipeline(
    config: &AppConfig,
    exchanges: &[ExchangeJob],
    transport: Option<&dyn MessageTransport>,
    storage: Option<&AsyncStorageManager>,
) -> Result<RunSummary> {
    config.validate()?;

    let mut summary = RunSummary::default();
    let mut scans = Vec::with_capacity(exchanges.len());

    for job in exchanges {
        let label = job.source.label();
        info!(exchange = label, "scanning");
        match scan_exchange(job.source.as_ref(), &job.settings, &config.scan).await {
            Ok(scan) => scans.push(scan),
            Err(e) => error!(exchange = label, error = %e, "exchange scan failed, skipping"),
        }
    }

    for scan in &scans {
        summary.exchanges_scanned += 1;
        summary.symbols_requested += scan.requested;
        summary.symbols_failed += scan.failed;
        summary.anomalies += scan.digest.rows().len();

        let report = scan.digest.render(
            &scan.exchange,
            &scan.display_suffix,
            config.scan.high_ratio_threshold,
            Utc::now(),
        );
        println!("\n{}\n", report);

        // Quiet runs stay on the console
        if scan.digest.is_empty() {
            continue;
        }
        if let Some(transport) = transport {
            let delivery = ChunkedDelivery::new(transport, &config.delivery);
            let outcome = delivery.deliver(&report).await;
            record_delivery(&mut summary, &scan.exchange, &outcome);
        }
    }

    if let Some(storage) = storage {
        save_snapshot(storage, &scans).await;
    }

    Ok(summary)
}

fn record_delivery(summary: &mut RunSummary, exchange: &str, report: &DeliveryReport) {
    summary.segments_delivered += report.delivered();
    summary.segments_failed += report.failed();
    if !report.is_complete() {
        let failed: Vec<(usize, u32)> = report
            .segments
            .iter()
            .filter(|s| s.result.is_err())
            .map(|s| (s.index, s.attempts))
            .collect();
        warn!(exchange, ?failed, "digest only partially delivered");
    }
}

async fn save_snapshot(storage: &AsyncStorageManager, scans: &[ExchangeScan]) {
    let snapshot = AnomalySnapshot {
        last_updated_timestamp: Utc::now().timestamp_millis(),
        exchanges: scans
            .iter()
            .map(|s| ExchangeAnomalies {
                exchange: &s.exchange,
                requested: s.requested,
                failed: s.failed,
                results: s.digest.rows(),
            })
            .collect(),
    };
    if let Err(e) = storage.save("anomalies", &snapshot).await {
        warn!(error = %e, "could not write anomalies snapshot");
    }
}
