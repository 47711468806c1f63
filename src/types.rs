// =============================================================================
// Shared types used across the OI Sentinel surveillance engine
// =============================================================================

use serde::{Deserialize, Serialize};

// =============================================================================
// Candles
// =============================================================================

/// Candle intervals the engine works with. The 5m stream is the ingest
/// resolution; 15m/1h/4h are rolled up by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
}

impl Interval {
    /// Wire / table-name token for this interval (`5m`, `15m`, `1h`, `4h`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
        }
    }

    /// Period length in milliseconds.
    pub fn period_ms(&self) -> i64 {
        match self {
            Self::M5 => 5 * 60 * 1000,
            Self::M15 => 15 * 60 * 1000,
            Self::H1 => 60 * 60 * 1000,
            Self::H4 => 4 * 60 * 60 * 1000,
        }
    }

    /// Parse a wire token. Unknown intervals are a config error, not a panic.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "5m" => Some(Self::M5),
            "15m" => Some(Self::M15),
            "1h" => Some(Self::H1),
            "4h" => Some(Self::H4),
            _ => None,
        }
    }

    /// The rollup targets built from the 5m ingest stream.
    pub const ROLLUP_TARGETS: [Interval; 3] = [Interval::M15, Interval::H1, Interval::H4];
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single OHLCV candle. `is_final` distinguishes the mutable current-period
/// candle from a closed one; only final candles are persisted and aggregated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_final: bool,
}

impl Candle {
    /// Body size as a fraction of the full range. 0 for zero-range candles.
    pub fn body_fraction(&self) -> f64 {
        let range = self.high - self.low;
        if range <= 0.0 {
            return 0.0;
        }
        (self.close - self.open).abs() / range
    }

    /// Lower shadow as a fraction of the full range.
    pub fn lower_shadow_fraction(&self) -> f64 {
        let range = self.high - self.low;
        if range <= 0.0 {
            return 0.0;
        }
        (self.open.min(self.close) - self.low) / range
    }

    /// Upper shadow as a fraction of the full range.
    pub fn upper_shadow_fraction(&self) -> f64 {
        let range = self.high - self.low;
        if range <= 0.0 {
            return 0.0;
        }
        (self.high - self.open.max(self.close)) / range
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Percent gain of close over open.
    pub fn gain_pct(&self) -> f64 {
        if self.open == 0.0 {
            return 0.0;
        }
        (self.close - self.open) / self.open * 100.0
    }
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: Interval,
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

// =============================================================================
// Open interest
// =============================================================================

/// One open-interest observation for a symbol. Unique by (symbol,
/// timestamp_ms); batches are immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OISnapshot {
    pub symbol: String,
    pub timestamp_ms: i64,
    pub open_interest: f64,
    pub mark_price: Option<f64>,
    pub funding_rate: Option<f64>,
    pub next_funding_time: Option<i64>,
    pub source: String,
}

/// Severity of an OI anomaly, derived from |percent_change| against the
/// configured thresholds (inclusive on the lower edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_pct(pct_abs: f64, high_threshold: f64, medium_threshold: f64) -> Self {
        if pct_abs >= high_threshold {
            Self::High
        } else if pct_abs >= medium_threshold {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction label for a moving-average stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    Up,
    Down,
    Flat,
}

impl TrendLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Flat => "flat",
        }
    }
}

/// A discrete OI anomaly, created once by the detector and never mutated.
/// The enrichment fields capture market context at detection time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OIAnomalyRecord {
    pub symbol: String,
    pub period_seconds: i64,
    pub percent_change: f64,
    pub oi_before: f64,
    pub oi_after: f64,
    pub threshold_value: f64,
    pub anomaly_time: i64,
    pub severity: Severity,

    // ── Enrichment ──────────────────────────────────────────────────────
    pub price_before: Option<f64>,
    pub price_after: Option<f64>,
    pub funding_rate_before: Option<f64>,
    pub funding_rate_after: Option<f64>,
    pub long_account_pct: Option<f64>,
    pub short_account_pct: Option<f64>,
    pub long_short_ratio: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub low_2h: Option<f64>,
    pub distance_from_high_pct: Option<f64>,
    pub distance_from_low_2h_pct: Option<f64>,
    pub high_30m: Option<f64>,
    pub low_30m: Option<f64>,
    pub broke_30m_high: bool,
    pub broke_30m_low: bool,
    pub ma10: Option<f64>,
    pub ma30: Option<f64>,
    pub ma60: Option<f64>,
    pub ma120: Option<f64>,
    pub ma240: Option<f64>,
    pub short_ma_trend: Option<TrendLabel>,
    pub long_ma_trend: Option<TrendLabel>,
}

// =============================================================================
// Alerts
// =============================================================================

/// Every kind of alert the pattern pipeline can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Touched,
    Approaching,
    Squeeze,
    BullishStreak,
    PullbackReady,
    VolumeSurge,
    Hammer,
    PerfectHammer,
    Doji,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Touched => "TOUCHED",
            Self::Approaching => "APPROACHING",
            Self::Squeeze => "SQUEEZE",
            Self::BullishStreak => "BULLISH_STREAK",
            Self::PullbackReady => "PULLBACK_READY",
            Self::VolumeSurge => "VOLUME_SURGE",
            Self::Hammer => "HAMMER",
            Self::PerfectHammer => "PERFECT_HAMMER",
            Self::Doji => "DOJI",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a support/resistance level sits below or above price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelType {
    Support,
    Resistance,
}

impl LevelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Support => "support",
            Self::Resistance => "resistance",
        }
    }
}

/// Predicted breakout direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Unclear,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Unclear => "unclear",
        }
    }
}

/// A clustered pivot price at which the market has repeatedly reversed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrLevel {
    pub level_type: LevelType,
    pub price: f64,
    pub strength: f64,
    pub touch_count: u32,
}

/// Sub-scores feeding the composite breakout score, each in 0–100.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeatureScores {
    pub volatility: f64,
    pub volume: f64,
    pub ma_convergence: f64,
    pub position: f64,
    pub pattern: f64,
}

/// A fully enriched alert as emitted to subscribers and persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub symbol: String,
    pub interval: Interval,
    pub alert_type: AlertType,
    pub level_type: Option<LevelType>,
    pub level_price: Option<f64>,
    pub current_price: f64,
    pub distance_pct: f64,
    pub level_strength: f64,
    pub kline_time: i64,
    pub description: String,
    pub breakout_score: f64,
    pub feature_scores: FeatureScores,
    pub predicted_direction: Direction,
}

// =============================================================================
// Symbols
// =============================================================================

/// Exchange-reported trading status for a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolStatus {
    Trading,
    Break,
}

impl SymbolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trading => "TRADING",
            Self::Break => "BREAK",
        }
    }
}

/// A tradable perpetual contract with its precision/lot metadata. Symbols
/// that disappear from the exchange are disabled, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub contract_type: String,
    pub status: SymbolStatus,
    pub enabled: bool,
    pub priority: i32,
    pub price_precision: u32,
    pub quantity_precision: u32,
    pub step_size: f64,
    pub min_notional: f64,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 299_999,
            open,
            high,
            low,
            close,
            volume: 100.0,
            is_final: true,
        }
    }

    #[test]
    fn interval_roundtrip() {
        for iv in [Interval::M5, Interval::M15, Interval::H1, Interval::H4] {
            assert_eq!(Interval::parse(iv.as_str()), Some(iv));
        }
        assert_eq!(Interval::parse("3d"), None);
    }

    #[test]
    fn interval_period_ms() {
        assert_eq!(Interval::M5.period_ms(), 300_000);
        assert_eq!(Interval::H1.period_ms(), 3_600_000);
        assert_eq!(Interval::H4.period_ms(), 14_400_000);
    }

    #[test]
    fn candle_shadow_fractions() {
        // Range 10, body 2 (98->100), lower shadow 3 (95..98), upper 5 (100..105).
        let c = candle(98.0, 105.0, 95.0, 100.0);
        assert!((c.body_fraction() - 0.2).abs() < 1e-12);
        assert!((c.lower_shadow_fraction() - 0.3).abs() < 1e-12);
        assert!((c.upper_shadow_fraction() - 0.5).abs() < 1e-12);
        assert!(c.is_bullish());
    }

    #[test]
    fn candle_zero_range_is_safe() {
        let c = candle(100.0, 100.0, 100.0, 100.0);
        assert_eq!(c.body_fraction(), 0.0);
        assert_eq!(c.lower_shadow_fraction(), 0.0);
        assert_eq!(c.upper_shadow_fraction(), 0.0);
    }

    #[test]
    fn severity_boundaries_inclusive() {
        assert_eq!(Severity::from_pct(30.0, 30.0, 15.0), Severity::High);
        assert_eq!(Severity::from_pct(29.999, 30.0, 15.0), Severity::Medium);
        assert_eq!(Severity::from_pct(15.0, 30.0, 15.0), Severity::Medium);
        assert_eq!(Severity::from_pct(14.999, 30.0, 15.0), Severity::Low);
    }

    #[test]
    fn alert_type_wire_names() {
        assert_eq!(AlertType::PerfectHammer.to_string(), "PERFECT_HAMMER");
        assert_eq!(AlertType::Touched.to_string(), "TOUCHED");
        let json = serde_json::to_string(&AlertType::VolumeSurge).unwrap();
        assert_eq!(json, "\"VOLUME_SURGE\"");
    }

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
    }
}
