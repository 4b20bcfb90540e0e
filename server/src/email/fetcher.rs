use std::time::Duration;

use google_gmail1::api::Message;
use indexmap::IndexMap;

use crate::email::api::{BatchError, FetchError, MailApi, MessageFormat};
use crate::server_config::cfg;

/// Chunking and backoff policy for grouped message fetches
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub chunk_size: usize,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 25,
            max_attempts: 20,
            backoff_base_secs: 2,
        }
    }
}

impl FetchPolicy {
    pub fn from_config() -> Self {
        Self {
            chunk_size: cfg.scan.fetch_chunk_size,
            max_attempts: cfg.scan.max_fetch_attempts,
            backoff_base_secs: cfg.scan.backoff_base_secs,
        }
    }
}

/// Fetch message details for a set of ids in bounded chunks, covering as
/// many ids as possible.
///
/// A rate-limit signal fails the whole chunk; any other per-item error fails
/// only that item. After each full pass the failed subset is retried after
/// an exponentially growing delay (base^attempt, attempt starting at 1),
/// up to `policy.max_attempts` passes. Ids that never succeed are logged and
/// dropped; callers must tolerate missing entries in the result map.
pub async fn fetch_messages<M: MailApi + ?Sized>(
    api: &M,
    ids: &[String],
    format: MessageFormat,
    metadata_headers: &[&str],
    policy: &FetchPolicy,
    mut on_fetched: impl FnMut(usize),
) -> IndexMap<String, Message> {
    let mut fetched: IndexMap<String, Message> = IndexMap::with_capacity(ids.len());
    let mut pending: Vec<String> = ids.to_vec();
    let mut attempt: u32 = 0;

    while !pending.is_empty() {
        let mut failed: Vec<String> = Vec::new();

        for chunk in pending.chunks(policy.chunk_size.max(1)) {
            match api.batch_get_messages(chunk, format, metadata_headers).await {
                Ok(items) => {
                    let mut chunk_rate_limited = false;
                    let mut item_failures: Vec<String> = Vec::new();

                    for item in items {
                        match item.result {
                            Ok(message) => {
                                on_fetched(1);
                                fetched.insert(item.id, message);
                            }
                            Err(FetchError::RateLimited) => {
                                chunk_rate_limited = true;
                            }
                            Err(FetchError::Failed(reason)) => {
                                tracing::warn!("Fetch failed for message {}: {}", item.id, reason);
                                item_failures.push(item.id);
                            }
                        }
                    }

                    if chunk_rate_limited {
                        // the whole chunk goes back in the retry pool
                        failed.extend(
                            chunk
                                .iter()
                                .filter(|id| !fetched.contains_key(*id))
                                .cloned(),
                        );
                    } else {
                        failed.extend(item_failures);
                    }
                }
                Err(BatchError::RateLimited) => {
                    tracing::info!("Chunk of {} messages rate limited", chunk.len());
                    failed.extend_from_slice(chunk);
                }
                Err(BatchError::Transport(e)) => {
                    tracing::warn!("Batch call failed for {} messages: {:?}", chunk.len(), e);
                    failed.extend_from_slice(chunk);
                }
            }
        }

        if failed.is_empty() {
            break;
        }

        attempt += 1;
        if attempt >= policy.max_attempts {
            tracing::error!(
                "Giving up on {} messages after {} attempts: {:?}",
                failed.len(),
                attempt,
                failed
            );
            break;
        }

        let delay = Duration::from_secs(policy.backoff_base_secs.pow(attempt));
        tracing::info!(
            "Retrying {} messages after {:?} (attempt {}/{})",
            failed.len(),
            delay,
            attempt,
            policy.max_attempts
        );
        tokio::time::sleep(delay).await;
        pending = failed;
    }

    fetched
}
