mod analysis;
mod batch;
mod delivery;
mod detector;
mod digest;
mod error;
mod fetcher;
mod indicators;
mod model;
mod schedule;
mod source;
mod storage_utils;
#[cfg(test)]
mod testing;

use analysis::ExchangeJob;
use chrono::Utc;
use delivery::{MessageTransport, TelegramTransport, telegram};
use source::{BinanceSource, OkxCredentials, OkxSource, build_http_client};
use storage_utils::{AppConfig, AsyncStorageManager};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    // Step 1: Configuration
    let storage = AsyncStorageManager::new_relative("storage").await?;
    let config = match storage.load_optional::<AppConfig>("config").await? {
        Some(config) => config,
        None => {
            warn!(dir = ?storage.base_dir, "no config.json found, using defaults");
            AppConfig::default()
        }
    };
    config.validate()?;
    if config.delivery.max_segment_length >= telegram::MAX_MESSAGE_LENGTH {
        warn!(
            max_segment_length = config.delivery.max_segment_length,
            ceiling = telegram::MAX_MESSAGE_LENGTH,
            "segments may exceed the Telegram message limit, which counts emoji as two units"
        );
    }

    // Step 2: Exchanges and transport
    let client = build_http_client(config.proxy.as_deref())?;
    let exchanges = build_exchanges(&config, &client);
    if exchanges.is_empty() {
        warn!("no exchange enabled, nothing to scan");
        return Ok(());
    }

    let transport = match TelegramTransport::from_env(client.clone()) {
        Ok(transport) => Some(transport),
        Err(e) => {
            warn!(error = %e, "Telegram delivery disabled, digests go to stdout only");
            None
        }
    };
    let transport = transport.as_ref().map(|t| t as &dyn MessageTransport);

    // Step 3: Scan now, then every hour at the configured minute
    loop {
        info!("--- Starting volume scan ---");
        match analysis::run_analysis_pipeline(&config, &exchanges, transport, Some(&storage)).await
        {
            Ok(summary) => info!(
                exchanges = summary.exchanges_scanned,
                requested = summary.symbols_requested,
                failed = summary.symbols_failed,
                anomalies = summary.anomalies,
                delivered = summary.segments_delivered,
                undelivered = summary.segments_failed,
                "scan complete"
            ),
            Err(e) => error!(error = %e, "scan aborted"),
        }

        if config.schedule.run_once {
            break;
        }

        let now = Utc::now();
        let next = schedule::next_run_at(now, config.schedule.minute);
        info!(next_run = %next, "waiting for next scan");
        tokio::time::sleep(schedule::wait_until_next_run(now, config.schedule.minute)).await;
    }

    Ok(())
}

fn build_exchanges(config: &AppConfig, client: &reqwest::Client) -> Vec<ExchangeJob> {
    let mut exchanges = Vec::new();

    if config.binance.enabled {
        exchanges.push(ExchangeJob {
            source: Box::new(BinanceSource::new(client.clone())),
            settings: config.binance.clone(),
        });
    }

    if config.okx.enabled {
        match OkxCredentials::from_env() {
            Ok(credentials) => exchanges.push(ExchangeJob {
                source: Box::new(OkxSource::new(client.clone(), credentials)),
                settings: config.okx.clone(),
            }),
            Err(e) => warn!(error = %e, "OKX analysis disabled for this run"),
        }
    }

    exchanges
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
