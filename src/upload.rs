//! Bounded upload buffering.
//!
//! The reader checks the cap after every chunk and stops pulling from the
//! stream as soon as it is exceeded. A watchdog task samples the number of
//! buffered bytes on a fixed interval as well, so a stream that stalls after
//! going over the cap is cancelled instead of waited on. Either way the
//! request fails with 400.

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::ApiConfig;
use crate::error::ApiError;

pub const DEFAULT_MAX_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_bytes: usize,
    pub poll_interval: Duration,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl From<&ApiConfig> for UploadLimits {
    fn from(config: &ApiConfig) -> Self {
        Self {
            max_bytes: config.upload_max_bytes,
            poll_interval: config.upload_poll_interval(),
        }
    }
}

impl UploadLimits {
    fn too_large(&self) -> ApiError {
        ApiError::payload_too_large(format!("upload exceeds the {} byte limit", self.max_bytes))
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn watchdog(buffered: Arc<AtomicUsize>, limits: UploadLimits, trip: watch::Sender<bool>) {
    let mut ticker = tokio::time::interval(limits.poll_interval);
    loop {
        ticker.tick().await;
        if buffered.load(Ordering::Relaxed) > limits.max_bytes {
            let _ = trip.send(true);
            return;
        }
    }
}

/// Buffer a byte stream, failing once it grows past `limits.max_bytes`
pub async fn read_bounded<S, E>(mut stream: S, limits: UploadLimits) -> Result<Vec<u8>, ApiError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let buffered = Arc::new(AtomicUsize::new(0));
    let (trip_tx, mut tripped) = watch::channel(false);
    let _watchdog = AbortOnDrop(tokio::spawn(watchdog(buffered.clone(), limits, trip_tx)));

    let mut buffer = Vec::new();
    loop {
        tokio::select! {
            biased;
            _ = tripped.changed() => {
                warn!("Upload cancelled after buffering {} bytes", buffer.len());
                return Err(limits.too_large());
            }
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    buffered.store(buffer.len(), Ordering::Relaxed);
                    if buffer.len() > limits.max_bytes {
                        warn!("Upload rejected after buffering {} bytes", buffer.len());
                        return Err(limits.too_large());
                    }
                }
                Some(Err(err)) => return Err(ApiError::bad_request(format!("upload stream failed: {}", err))),
                None => break,
            },
        }
    }

    Ok(buffer)
}
