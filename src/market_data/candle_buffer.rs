// =============================================================================
// CandleBuffer — thread-safe ring buffer per (symbol, interval)
// =============================================================================
//
// Stores the most recent candles per `CandleKey`.  The provisional
// (current-period) candle is continuously replaced in place; when a candle
// finalizes it becomes permanent and the ring is trimmed to `max_candles`.
// Detectors read final candles only.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::types::{Candle, CandleKey};

pub struct CandleBuffer {
    buffers: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a new buffer that retains at most `max_candles` final candles
    /// per key, plus one provisional candle.
    pub fn new(max_candles: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_candles,
        }
    }

    /// Insert or replace the latest candle for the given key.
    ///
    /// * A final candle replaces its own provisional version (same
    ///   open_time) and the ring is trimmed to `max_candles`.
    /// * A provisional candle replaces the existing provisional candle with
    ///   the same `open_time`, otherwise it is appended.
    pub fn update(&self, key: CandleKey, candle: Candle) {
        let mut map = self.buffers.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

        if let Some(last) = ring.back() {
            if !last.is_final && last.open_time == candle.open_time {
                ring.pop_back();
            }
        }
        ring.push_back(candle);

        while ring.iter().filter(|c| c.is_final).count() > self.max_candles {
            ring.pop_front();
        }
    }

    /// The most recent `count` **final** candles (oldest-first order).
    pub fn recent_final(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.buffers.read();
        match map.get(key) {
            Some(ring) => {
                let finals: Vec<&Candle> = ring.iter().filter(|c| c.is_final).collect();
                let start = finals.len().saturating_sub(count);
                finals[start..].iter().map(|c| (*c).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    /// The most recent `count` close prices from final candles
    /// (oldest-first order).
    pub fn closes(&self, key: &CandleKey, count: usize) -> Vec<f64> {
        self.recent_final(key, count)
            .iter()
            .map(|c| c.close)
            .collect()
    }

    /// Close price of the most recent final candle, if any.
    pub fn last_close(&self, key: &CandleKey) -> Option<f64> {
        let map = self.buffers.read();
        map.get(key)
            .and_then(|ring| ring.iter().rev().find(|c| c.is_final).map(|c| c.close))
    }

    /// The current provisional candle, if one is buffered.
    pub fn provisional(&self, key: &CandleKey) -> Option<Candle> {
        let map = self.buffers.read();
        map.get(key)
            .and_then(|ring| ring.back().filter(|c| !c.is_final).cloned())
    }

    /// Total number of candles (including any provisional candle) stored
    /// for a key.
    pub fn count(&self, key: &CandleKey) -> usize {
        let map = self.buffers.read();
        map.get(key).map_or(0, VecDeque::len)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Interval;

    fn sample_candle(open_time: i64, close: f64, is_final: bool) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 299_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            is_final,
        }
    }

    fn make_key(sym: &str, iv: Interval) -> CandleKey {
        CandleKey {
            symbol: sym.into(),
            interval: iv,
        }
    }

    #[test]
    fn ring_buffer_trimming() {
        let buf = CandleBuffer::new(3);
        let key = make_key("BTCUSDT", Interval::M5);

        for i in 0..5 {
            buf.update(
                key.clone(),
                sample_candle(i * 300_000, 100.0 + i as f64, true),
            );
        }

        assert_eq!(buf.count(&key), 3);
        let closes = buf.closes(&key, 10);
        assert_eq!(closes, vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn provisional_replacement() {
        let buf = CandleBuffer::new(10);
        let key = make_key("ETHUSDT", Interval::M5);

        buf.update(key.clone(), sample_candle(0, 50.0, false));
        assert_eq!(buf.count(&key), 1);

        // Same open_time, still provisional -- should replace.
        buf.update(key.clone(), sample_candle(0, 51.0, false));
        assert_eq!(buf.count(&key), 1);
        assert_eq!(buf.provisional(&key).map(|c| c.close), Some(51.0));

        // Finalize it.
        buf.update(key.clone(), sample_candle(0, 52.0, true));
        assert_eq!(buf.count(&key), 1);
        assert_eq!(buf.last_close(&key), Some(52.0));
        assert!(buf.provisional(&key).is_none());
    }

    #[test]
    fn recent_final_filters_out_provisional() {
        let buf = CandleBuffer::new(10);
        let key = make_key("BTCUSDT", Interval::M5);

        buf.update(key.clone(), sample_candle(0, 100.0, true));
        buf.update(key.clone(), sample_candle(300_000, 101.0, true));
        buf.update(key.clone(), sample_candle(600_000, 102.0, false));

        let finals = buf.recent_final(&key, 10);
        assert_eq!(finals.len(), 2);
    }

    #[test]
    fn last_close_empty_returns_none() {
        let buf = CandleBuffer::new(10);
        let key = make_key("XYZUSDT", Interval::H1);
        assert_eq!(buf.last_close(&key), None);
    }

    #[test]
    fn trim_keeps_provisional_tail() {
        let buf = CandleBuffer::new(2);
        let key = make_key("BTCUSDT", Interval::M5);

        for i in 0..4 {
            buf.update(key.clone(), sample_candle(i * 300_000, 10.0 + i as f64, true));
        }
        buf.update(key.clone(), sample_candle(4 * 300_000, 99.0, false));

        // Two final candles plus the provisional one.
        assert_eq!(buf.count(&key), 3);
        assert_eq!(buf.closes(&key, 10), vec![12.0, 13.0]);
        assert_eq!(buf.provisional(&key).map(|c| c.close), Some(99.0));
    }
}
