use crate::error::{ConfigError, FetchError};
use crate::model::Symbol;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// What survived a scheduled sweep over a symbol list.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// Successful fetches, in input order.
    pub results: Vec<T>,
    pub failed: usize,
    pub batches: usize,
}

/// Runs `fetch` over `symbols` in consecutive groups of at most `batch_size`.
///
/// Every fetch in a group runs concurrently and the whole group settles before the next one
/// starts. Groups are separated by `inter_batch_delay` to stay inside exchange request quotas.
/// Failed fetches are logged and dropped; they never abort or delay their siblings.
pub async fn process_in_batches<T, F, Fut>(
    symbols: &[Symbol],
    batch_size: usize,
    inter_batch_delay: Duration,
    fetch: F,
) -> Result<BatchOutcome<T>, ConfigError>
where
    F: Fn(Symbol) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    if batch_size == 0 {
        return Err(ConfigError::Invalid("batch size must be at least 1".into()));
    }

    let batches = symbols.len().div_ceil(batch_size);
    let mut outcome = BatchOutcome {
        results: Vec::with_capacity(symbols.len()),
        failed: 0,
        batches,
    };

    for (i, batch) in symbols.chunks(batch_size).enumerate() {
        let tasks: Vec<_> = batch.iter().cloned().map(&fetch).collect();
        let results = futures::future::join_all(tasks).await;

        for result in results {
            match result {
                Ok(value) => outcome.results.push(value),
                Err(e) => {
                    outcome.failed += 1;
                    warn!(symbol = %e.symbol(), error = %e, "skipping symbol");
                }
            }
        }
        debug!(batch = i + 1, of = batches, size = batch.len(), "batch settled");

        if i + 1 < batches {
            tokio::time::sleep(inter_batch_delay).await;
        }
    }

    Ok(outcome)
}
