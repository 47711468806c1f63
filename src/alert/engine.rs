// =============================================================================
// AlertEngine — cooldowns, duplicate suppression, persistence, fan-out
// =============================================================================
//
// Detector hits arrive as fully built alerts.  The engine gates them on a
// per-(symbol, interval, type, level_key) cooldown, refuses exact
// duplicates already stored, persists the survivors, and publishes them to
// the in-process fan-out.  Cooldown state is armed BEFORE the store write
// and never rolled back: a missed alert beats a duplicate.  It is also
// in-memory only, so a restart makes every key immediately eligible.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::store::AlertStore;
use crate::types::{Alert, AlertType, Interval};

/// What happened to a submitted alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    Emitted,
    CooldownSuppressed,
    Duplicate,
    StoreFailed,
}

// =============================================================================
// CooldownGate
// =============================================================================

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CooldownKey {
    symbol: String,
    interval: Interval,
    alert_type: AlertType,
    /// Rounded level price (two decimals) for S/R alerts, 0 for the rest.
    level_key: i64,
}

#[derive(Debug, Clone, Copy)]
struct CooldownEntry {
    last_emit_ms: i64,
    last_squeeze_pct: Option<f64>,
}

/// Pure cooldown state machine. Critical sections never do I/O.
pub struct CooldownGate {
    cooldown_ms: i64,
    entries: Mutex<HashMap<CooldownKey, CooldownEntry>>,
}

impl CooldownGate {
    pub fn new(cooldown_ms: i64) -> Self {
        Self {
            cooldown_ms,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key_for(alert: &Alert) -> CooldownKey {
        CooldownKey {
            symbol: alert.symbol.clone(),
            interval: alert.interval,
            alert_type: alert.alert_type,
            level_key: alert
                .level_price
                .map(|p| (p * 100.0).round() as i64)
                .unwrap_or(0),
        }
    }

    /// Check the cooldown for this alert and, if it passes, arm it.
    ///
    /// SQUEEZE alerts bypass an active cooldown when the current
    /// convergence is tighter than at the last emitted alert — a
    /// tightening squeeze is always informative.
    pub fn check_and_arm(&self, alert: &Alert, squeeze_pct: Option<f64>, now_ms: i64) -> bool {
        let key = Self::key_for(alert);
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(&key) {
            let cooling = now_ms - entry.last_emit_ms < self.cooldown_ms;
            if cooling {
                let tightening = alert.alert_type == AlertType::Squeeze
                    && match (squeeze_pct, entry.last_squeeze_pct) {
                        (Some(now_pct), Some(prev_pct)) => now_pct < prev_pct,
                        _ => false,
                    };
                if !tightening {
                    return false;
                }
            }
        }

        entries.insert(
            key,
            CooldownEntry {
                last_emit_ms: now_ms,
                last_squeeze_pct: squeeze_pct,
            },
        );
        true
    }
}

// =============================================================================
// AlertEngine
// =============================================================================

pub struct AlertEngine {
    store: Arc<AlertStore>,
    gate: CooldownGate,
    fanout: broadcast::Sender<Alert>,
    /// Alerts whose store write failed, retried on the next tick.
    retry_queue: Mutex<Vec<Alert>>,
    emitted: AtomicU64,
}

impl AlertEngine {
    pub fn new(store: Arc<AlertStore>, cooldown_ms: i64) -> Self {
        let (fanout, _) = broadcast::channel(1024);
        Self {
            store,
            gate: CooldownGate::new(cooldown_ms),
            fanout,
            retry_queue: Mutex::new(Vec::new()),
            emitted: AtomicU64::new(0),
        }
    }

    /// Subscribe to emitted alerts (batch collector, trading adapter).
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.fanout.subscribe()
    }

    /// Total alerts emitted since startup.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Alerts currently awaiting a store retry.
    pub fn pending_retries(&self) -> usize {
        self.retry_queue.lock().len()
    }

    /// Gate, dedup, persist, and publish one alert.
    ///
    /// `squeeze_pct` is the convergence carried by squeeze hits; pass
    /// `None` for every other type.
    pub async fn submit(
        &self,
        alert: Alert,
        squeeze_pct: Option<f64>,
        now_ms: i64,
    ) -> AlertOutcome {
        if !self.gate.check_and_arm(&alert, squeeze_pct, now_ms) {
            debug!(symbol = %alert.symbol, alert_type = %alert.alert_type, "alert suppressed by cooldown");
            return AlertOutcome::CooldownSuppressed;
        }

        // Exact duplicate already stored: refuse.
        match self.store.exists(&alert).await {
            Ok(true) => {
                debug!(symbol = %alert.symbol, alert_type = %alert.alert_type, "duplicate alert refused");
                return AlertOutcome::Duplicate;
            }
            Ok(false) => {}
            Err(e) => {
                // The probe failed: persist optimistically rather than lose
                // the alert; the unique data shape keeps duplicates rare.
                warn!(error = %e, "duplicate probe failed");
            }
        }

        let outcome = match self.store.insert(&alert).await {
            Ok(()) => AlertOutcome::Emitted,
            Err(e) => {
                warn!(symbol = %alert.symbol, alert_type = %alert.alert_type, error = %e, "alert store write failed, queued for retry");
                self.retry_queue.lock().push(alert.clone());
                AlertOutcome::StoreFailed
            }
        };

        // Fan out regardless of store outcome: subscribers prefer a live
        // alert over a perfectly persisted one.
        self.emitted.fetch_add(1, Ordering::Relaxed);
        info!(
            symbol = %alert.symbol,
            interval = %alert.interval,
            alert_type = %alert.alert_type,
            score = format!("{:.1}", alert.breakout_score),
            "alert emitted"
        );
        let _ = self.fanout.send(alert);
        outcome
    }

    /// Retry previously failed store writes. Runs from a periodic tick.
    pub async fn retry_failed(&self) {
        let pending = {
            let mut queue = self.retry_queue.lock();
            std::mem::take(&mut *queue)
        };
        if pending.is_empty() {
            return;
        }

        for alert in pending {
            match self.store.exists(&alert).await {
                Ok(true) => continue,
                _ => {}
            }
            if let Err(e) = self.store.insert(&alert).await {
                warn!(symbol = %alert.symbol, error = %e, "alert retry failed, keeping in queue");
                self.retry_queue.lock().push(alert);
            }
        }
    }
}
