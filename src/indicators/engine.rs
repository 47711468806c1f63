// =============================================================================
// IndicatorEngine — per-(symbol, interval) running indicator state
// =============================================================================
//
// Maintains, per candle series: a bounded ring of final candles, EMAs for
// the standard period set updated incrementally, and the rolling volume
// baseline.  Detectors receive an immutable `IndicatorSnapshot` taken at
// the moment of the last final candle; the engine itself never blocks on
// I/O.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::indicators::atr;
use crate::indicators::ema::{ema_step, latest_sma};
use crate::indicators::pivots::{self, SwingKind, SwingPoint};
use crate::types::{Candle, CandleKey};

/// EMA periods the engine maintains incrementally.
pub const EMA_PERIODS: [usize; 7] = [10, 20, 30, 60, 120, 200, 240];

/// Window for the rolling volume baseline (mean of the last K volumes
/// before the current candle).
pub const VOLUME_BASELINE_WINDOW: usize = 20;

/// Ring capacity per series; the widest detector window is 240 closes.
pub const DEFAULT_CAPACITY: usize = 240;

/// Running state for one candle series.
struct SeriesState {
    candles: VecDeque<Candle>,
    emas: HashMap<usize, f64>,
    /// Baseline computed over the volumes *preceding* the newest candle.
    volume_baseline: Option<f64>,
}

impl SeriesState {
    fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity + 1),
            emas: HashMap::new(),
            volume_baseline: None,
        }
    }

    fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    fn apply(&mut self, candle: Candle, capacity: usize) {
        // Baseline over the volumes before this candle.
        let volumes: Vec<f64> = self.candles.iter().map(|c| c.volume).collect();
        self.volume_baseline = latest_sma(&volumes, VOLUME_BASELINE_WINDOW.min(volumes.len()))
            .filter(|_| volumes.len() >= VOLUME_BASELINE_WINDOW);

        self.candles.push_back(candle);
        while self.candles.len() > capacity {
            self.candles.pop_front();
        }

        let closes = self.closes();
        let last = *closes.last().expect("just pushed");
        for period in EMA_PERIODS {
            match self.emas.get_mut(&period) {
                Some(ema) => *ema = ema_step(*ema, last, period),
                None if closes.len() >= period => {
                    // Seed with the simple mean of the first `period` closes.
                    let seed = closes[..period].iter().sum::<f64>() / period as f64;
                    let mut ema = seed;
                    for &c in &closes[period..] {
                        ema = ema_step(ema, c, period);
                    }
                    self.emas.insert(period, ema);
                }
                None => {}
            }
        }
    }
}

/// Immutable indicator read at the time of the last final candle.
#[derive(Debug, Clone)]
pub struct IndicatorSnapshot {
    pub key: CandleKey,
    pub last_close: f64,
    pub last_open_time: i64,
    pub emas: HashMap<usize, f64>,
    pub atr14: Option<f64>,
    pub volume_baseline: Option<f64>,
    /// Recent final candles, oldest first (up to the engine capacity).
    pub window: Vec<Candle>,
}

impl IndicatorSnapshot {
    pub fn ema(&self, period: usize) -> Option<f64> {
        self.emas.get(&period).copied()
    }

    /// Simple moving average over the last `period` closes in the window.
    pub fn sma(&self, period: usize) -> Option<f64> {
        let closes: Vec<f64> = self.window.iter().map(|c| c.close).collect();
        latest_sma(&closes, period)
    }

    /// EMA20/EMA60 convergence as a percentage of price.
    pub fn squeeze_pct(&self) -> Option<f64> {
        let e20 = self.ema(20)?;
        let e60 = self.ema(60)?;
        if self.last_close == 0.0 {
            return None;
        }
        Some((e20 - e60).abs() / self.last_close * 100.0)
    }

    /// Short-term trend gate shared by most detectors: EMA30 above EMA60.
    pub fn trend_gate(&self) -> bool {
        match (self.ema(30), self.ema(60)) {
            (Some(e30), Some(e60)) => e30 > e60,
            _ => false,
        }
    }

    /// Most recent confirmed swing of `kind` in the window.
    pub fn latest_swing(&self, kind: SwingKind) -> Option<SwingPoint> {
        pivots::latest_swing(&self.window, pivots::DEFAULT_WING, kind)
    }

    /// All confirmed swings in the window.
    pub fn swings(&self) -> Vec<SwingPoint> {
        pivots::find_swings(&self.window, pivots::DEFAULT_WING)
    }
}

pub struct IndicatorEngine {
    states: RwLock<HashMap<CandleKey, SeriesState>>,
    capacity: usize,
}

impl IndicatorEngine {
    pub fn new(capacity: usize) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Feed one final candle into its series.
    pub fn on_final_candle(&self, key: &CandleKey, candle: &Candle) {
        if !candle.is_final {
            return;
        }
        let mut states = self.states.write();
        states
            .entry(key.clone())
            .or_insert_with(|| SeriesState::new(self.capacity))
            .apply(candle.clone(), self.capacity);
    }

    /// Seed a series from stored history (oldest first). Replaces any
    /// existing state for the key.
    pub fn warm_up(&self, key: &CandleKey, candles: &[Candle]) {
        let mut state = SeriesState::new(self.capacity);
        for candle in candles.iter().filter(|c| c.is_final) {
            state.apply(candle.clone(), self.capacity);
        }
        self.states.write().insert(key.clone(), state);
    }

    /// Pure read snapshot for detectors. `None` until the series has seen
    /// at least one final candle.
    pub fn snapshot(&self, key: &CandleKey) -> Option<IndicatorSnapshot> {
        let states = self.states.read();
        let state = states.get(key)?;
        let last = state.candles.back()?;
        let window: Vec<Candle> = state.candles.iter().cloned().collect();

        Some(IndicatorSnapshot {
            key: key.clone(),
            last_close: last.close,
            last_open_time: last.open_time,
            emas: state.emas.clone(),
            atr14: atr::calculate_atr(&window, atr::DEFAULT_PERIOD),
            volume_baseline: state.volume_baseline,
            window,
        })
    }
}
