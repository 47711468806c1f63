// =============================================================================
// BatchSignalCollector — groups near-simultaneous same-wave alerts
// =============================================================================
//
// Every 5-minute boundary can finalize candles across hundreds of symbols
// at once; forwarding each PERFECT_HAMMER individually floods downstream.
// The collector keys on kline_time: the first signal for a key opens a
// fixed, NON-resetting window (default 2 s); everything accumulating under
// that key flushes as one batch when the window closes.  Downstream can
// then apply cross-symbol capacity limits per wave deterministically.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Alert, AlertType};

/// One flushed wave of same-kind, same-kline_time alerts.
#[derive(Debug, Clone)]
pub struct SignalBatch {
    pub id: Uuid,
    pub kline_time: i64,
    pub alerts: Vec<Alert>,
}

pub struct BatchSignalCollector {
    window: Duration,
    batched_types: HashSet<AlertType>,
    buckets: Arc<Mutex<HashMap<i64, Vec<Alert>>>>,
    output: mpsc::Sender<SignalBatch>,
}

impl BatchSignalCollector {
    /// `batched_types` selects which alert types the collector groups;
    /// everything else is ignored (other fan-out subscribers see it
    /// directly).
    pub fn new(
        window: Duration,
        batched_types: impl IntoIterator<Item = AlertType>,
        output: mpsc::Sender<SignalBatch>,
    ) -> Self {
        Self {
            window,
            batched_types: batched_types.into_iter().collect(),
            buckets: Arc::new(Mutex::new(HashMap::new())),
            output,
        }
    }

    /// Offer one alert. The first alert for a kline_time opens the window;
    /// later ones with the same key join the bucket. Returns true when the
    /// alert was accepted into a bucket.
    pub fn offer(&self, alert: Alert) -> bool {
        if !self.batched_types.contains(&alert.alert_type) {
            return false;
        }
        let key = alert.kline_time;

        let opened = {
            let mut buckets = self.buckets.lock();
            match buckets.get_mut(&key) {
                Some(bucket) => {
                    bucket.push(alert);
                    false
                }
                None => {
                    buckets.insert(key, vec![alert]);
                    true
                }
            }
        };

        if opened {
            // Fixed window: the timer starts once and never resets.
            let buckets = self.buckets.clone();
            let output = self.output.clone();
            let window = self.window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let alerts = buckets.lock().remove(&key).unwrap_or_default();
                if alerts.is_empty() {
                    return;
                }
                let batch = SignalBatch {
                    id: Uuid::new_v4(),
                    kline_time: key,
                    alerts,
                };
                info!(
                    kline_time = key,
                    count = batch.alerts.len(),
                    batch_id = %batch.id,
                    "signal batch flushed"
                );
                if output.send(batch).await.is_err() {
                    debug!("batch receiver dropped, discarding wave");
                }
            });
        }
        true
    }

    /// Run the collector against the alert fan-out until the channel closes
    /// or shutdown fires.
    pub async fn run(
        self: Arc<Self>,
        mut alerts: tokio::sync::broadcast::Receiver<Alert>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("batch collector stopped");
                    return;
                }
                received = alerts.recv() => {
                    match received {
                        Ok(alert) => {
                            self.offer(alert);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            debug!(missed = n, "batch collector lagged on alert fan-out");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }
}
