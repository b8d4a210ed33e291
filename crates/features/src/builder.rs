//! Multi-timeframe feature builder.
//!
//! Fetches historical candles for each configured timeframe in parallel,
//! computes per-timeframe indicators, then layers on order-book features,
//! higher-timeframe anchors, the confluence score, liquidity flags and the
//! regime classification. A failed timeframe logs a warning and is omitted;
//! the snapshot is built from whatever survives.

use crate::indicators::{
    atr, atr_series, macd, median, obv_direction, percentile_rank, rsi, sma, true_ranges, vwap,
    vwap_zscore, zscore,
};
use crate::snapshot::{
    BarFlags, BarSummary, Confluence, FeatureSnapshot, HtfAnchors, LiquidityFlags, MaStack,
    MomentumRegime, OrderbookFeatures, PositionSummary, Regime, RiskSummary, SwingFeatures,
    TimeframeFeatures, TrendRegime, VolatilityRegime,
};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use spot_bot_core::config::FeatureConfig;
use spot_bot_core::symbol::SymbolPair;
use spot_bot_core::types::Candle;
use spot_bot_kraken::{BookState, KrakenRestClient};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::RwLock;

/// One configured timeframe.
#[derive(Debug, Clone, Copy)]
pub struct TimeframeSpec {
    pub name: &'static str,
    pub minutes: u32,
    pub lookback: usize,
}

pub static TIMEFRAMES: [TimeframeSpec; 6] = [
    TimeframeSpec {
        name: "1m",
        minutes: 1,
        lookback: 300,
    },
    TimeframeSpec {
        name: "5m",
        minutes: 5,
        lookback: 300,
    },
    TimeframeSpec {
        name: "15m",
        minutes: 15,
        lookback: 300,
    },
    TimeframeSpec {
        name: "1h",
        minutes: 60,
        lookback: 360,
    },
    TimeframeSpec {
        name: "4h",
        minutes: 240,
        lookback: 360,
    },
    TimeframeSpec {
        name: "1d",
        minutes: 1440,
        lookback: 120,
    },
];

const WEEKLY_MINUTES: u32 = 10_080;
const SWING_LOOKBACK: usize = 50;

/// Seam over the gateway's historical-candle fetch so the builder can be
/// exercised against canned data.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn recent_candles(
        &self,
        pair: &str,
        interval_min: u32,
        count: usize,
    ) -> anyhow::Result<Vec<Candle>>;
}

#[async_trait]
impl CandleSource for KrakenRestClient {
    async fn recent_candles(
        &self,
        pair: &str,
        interval_min: u32,
        count: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        Ok(self.ohlc_recent(pair, interval_min, count).await?)
    }
}

pub struct FeatureBuilder {
    source: Arc<dyn CandleSource>,
    book: Arc<RwLock<BookState>>,
    pair: SymbolPair,
    config: FeatureConfig,
    last_price: StdRwLock<Option<f64>>,
}

impl FeatureBuilder {
    #[must_use]
    pub fn new(
        source: Arc<dyn CandleSource>,
        book: Arc<RwLock<BookState>>,
        pair: SymbolPair,
        config: FeatureConfig,
    ) -> Self {
        Self {
            source,
            book,
            pair,
            config,
            last_price: StdRwLock::new(None),
        }
    }

    /// Records the latest traded price from the live feed.
    pub fn set_last_price(&self, price: f64) {
        if let Ok(mut guard) = self.last_price.write() {
            *guard = Some(price);
        }
    }

    #[must_use]
    pub fn last_price(&self) -> Option<f64> {
        self.last_price.read().ok().and_then(|guard| *guard)
    }

    /// Builds a snapshot. `position` and `risk` are passed through opaque.
    pub async fn build(&self, position: PositionSummary, risk: RiskSummary) -> FeatureSnapshot {
        let fetches = TIMEFRAMES.iter().map(|spec| {
            let source = Arc::clone(&self.source);
            let pair = self.pair.rest_pair.clone();
            async move {
                let candles = source
                    .recent_candles(&pair, spec.minutes, spec.lookback)
                    .await;
                (spec, candles)
            }
        });
        let weekly_fetch = {
            let source = Arc::clone(&self.source);
            let pair = self.pair.rest_pair.clone();
            async move { source.recent_candles(&pair, WEEKLY_MINUTES, 5).await }
        };
        let (results, weekly) = tokio::join!(join_all(fetches), weekly_fetch);

        let mut timeframes = BTreeMap::new();
        let mut daily_candles: Option<Vec<Candle>> = None;
        for (spec, result) in results {
            match result {
                Ok(candles) if candles.len() >= 2 => {
                    if spec.minutes == 1440 {
                        daily_candles = Some(candles.clone());
                    }
                    timeframes.insert(spec.name.to_string(), compute_timeframe(&candles));
                }
                Ok(candles) => {
                    tracing::warn!(
                        timeframe = spec.name,
                        count = candles.len(),
                        "not enough candles, omitting timeframe"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        timeframe = spec.name,
                        error = %e,
                        "timeframe fetch failed, omitting"
                    );
                }
            }
        }
        let weekly = match weekly {
            Ok(candles) => candles,
            Err(e) => {
                tracing::warn!(error = %e, "weekly anchor fetch failed");
                Vec::new()
            }
        };

        let close_15m = timeframes.get("15m").map(|tf: &TimeframeFeatures| tf.close);
        let htf_anchors = compute_anchors(daily_candles.as_deref(), &weekly, close_15m);
        let orderbook = self.orderbook_features().await;
        let confluence = compute_confluence(&timeframes);
        let regime = compute_regime(&timeframes);
        let liquidity = compute_liquidity(timeframes.get("15m"), &htf_anchors);

        FeatureSnapshot {
            pair: self.pair.ws_pair.clone(),
            ts_unix_ms: Utc::now().timestamp_millis(),
            timeframes,
            htf_anchors,
            orderbook,
            confluence,
            liquidity,
            regime,
            position,
            risk,
        }
    }

    async fn orderbook_features(&self) -> OrderbookFeatures {
        let book = self.book.read().await;
        OrderbookFeatures {
            imbalance: book.imbalance(),
            spread_bps: book.spread_bps(),
            slippage_bps_for_size: book.slippage_bps_for_notional(self.config.slippage_notional),
            top_bid: book.best_bid().map(|l| l.price),
            top_ask: book.best_ask().map(|l| l.price),
        }
    }
}

// =============================================================================
// Per-timeframe computation
// =============================================================================

fn compute_timeframe(candles: &[Candle]) -> TimeframeFeatures {
    let last = candles[candles.len() - 1];
    let prev = candles[candles.len() - 2];
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    let sma20 = sma(&closes, 20);
    let sma50 = sma(&closes, 50);
    let sma200 = sma(&closes, 200);
    let ma_stack = classify_ma_stack(sma20, sma50, sma200);

    let trs = true_ranges(candles);
    let atrs = atr_series(candles, 14);
    let atr14 = atrs.last().copied();
    let atr_pct = atr14.and_then(|a| (last.close > 0.0).then(|| a / last.close));
    let atr_percentile = atr14.and_then(|a| {
        let window = if atrs.len() > 90 {
            &atrs[atrs.len() - 90..]
        } else {
            &atrs[..]
        };
        percentile_rank(window, a)
    });
    let range_ratio = {
        let window = if trs.len() > 20 {
            &trs[trs.len() - 20..]
        } else {
            &trs[..]
        };
        match (trs.last(), median(window)) {
            (Some(last_tr), Some(med)) if med > 0.0 => Some(last_tr / med),
            _ => None,
        }
    };

    let rsi_pair = rsi(&closes, 14);
    let macd_point = macd(&closes, 12, 26, 9);

    let swing = compute_swing(candles, atr14);
    let flags = compute_flags(&trs, atr14, &last, &prev);

    let last_3_bars = candles
        .iter()
        .rev()
        .take(3)
        .rev()
        .map(|c| BarSummary {
            ts: c.ts,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
        })
        .collect();

    TimeframeFeatures {
        close: last.close,
        open: last.open,
        high: last.high,
        low: last.low,
        volume: last.volume,
        sma20,
        sma50,
        sma200,
        ma_stack,
        price_z20: zscore(&closes, 20),
        vwap20: vwap(candles, 20),
        vwap_z: vwap_zscore(candles, 20),
        atr14,
        atr_pct,
        atr_percentile,
        range_ratio,
        rsi14: rsi_pair.map(|(current, _)| current),
        rsi_slope: rsi_pair.map(|(current, previous)| current - previous),
        macd: macd_point.map(|p| p.macd),
        macd_signal: macd_point.map(|p| p.signal),
        macd_hist: macd_point.map(|p| p.histogram),
        macd_slope: macd_point.map(|p| p.histogram - p.prev_histogram),
        volume_z20: zscore(&volumes, 20),
        obv_direction: obv_direction(candles, 5),
        swing,
        flags,
        last_3_bars,
    }
}

fn classify_ma_stack(sma20: Option<f64>, sma50: Option<f64>, sma200: Option<f64>) -> MaStack {
    match (sma20, sma50, sma200) {
        (Some(fast), Some(mid), Some(slow)) => {
            if fast > mid && mid > slow {
                MaStack::Bull
            } else if fast < mid && mid < slow {
                MaStack::Bear
            } else {
                MaStack::Neutral
            }
        }
        // Two-MA fallback while the 200 window is still filling.
        (Some(fast), Some(mid), None) => {
            if fast > mid {
                MaStack::Bull
            } else if fast < mid {
                MaStack::Bear
            } else {
                MaStack::Neutral
            }
        }
        _ => MaStack::Neutral,
    }
}

fn compute_swing(candles: &[Candle], atr14: Option<f64>) -> SwingFeatures {
    let last = candles[candles.len() - 1];
    let window = if candles.len() > SWING_LOOKBACK {
        &candles[candles.len() - SWING_LOOKBACK..]
    } else {
        candles
    };
    let max_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let min_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);

    let (to_last_high_atr, to_last_low_atr) = match atr14 {
        Some(atr) if atr > 0.0 => (
            Some((max_high - last.close) / atr),
            Some((last.close - min_low) / atr),
        ),
        _ => (None, None),
    };

    let range = last.range();
    let (upper_wick_pct, lower_wick_pct) = if range > 0.0 {
        let body_high = last.open.max(last.close);
        let body_low = last.open.min(last.close);
        (
            Some(((last.high - body_high).max(0.0)) / range),
            Some(((body_low - last.low).max(0.0)) / range),
        )
    } else {
        (None, None)
    };

    SwingFeatures {
        to_last_high_atr,
        to_last_low_atr,
        upper_wick_pct,
        lower_wick_pct,
    }
}

fn compute_flags(trs: &[f64], atr14: Option<f64>, last: &Candle, prev: &Candle) -> BarFlags {
    let breakout = match (atr14, trs.len()) {
        (Some(atr), n) if n >= 2 && atr > 0.0 => {
            trs[n - 1] > 0.6 * atr && trs[n - 2] < 0.4 * atr
        }
        _ => false,
    };
    let liquidity_sweep = match atr14 {
        Some(atr) if atr > 0.0 => {
            (last.high > prev.high + 0.5 * atr && last.close < prev.high)
                || (last.low < prev.low - 0.5 * atr && last.close > prev.low)
        }
        _ => false,
    };
    BarFlags {
        liquidity_sweep,
        breakout,
    }
}

// =============================================================================
// Cross-timeframe aggregation
// =============================================================================

fn compute_anchors(
    daily: Option<&[Candle]>,
    weekly: &[Candle],
    close_15m: Option<f64>,
) -> HtfAnchors {
    let mut anchors = HtfAnchors::default();

    let daily_atr = daily.and_then(|candles| atr(candles, 14));
    if let Some(daily) = daily {
        if daily.len() >= 2 {
            let prev_day = &daily[daily.len() - 2];
            anchors.prev_day_high = Some(prev_day.high);
            anchors.prev_day_low = Some(prev_day.low);
            anchors.daily_open = Some(daily[daily.len() - 1].open);
        }
    }
    if weekly.len() >= 2 {
        let prev_week = &weekly[weekly.len() - 2];
        anchors.prev_week_high = Some(prev_week.high);
        anchors.prev_week_low = Some(prev_week.low);
    }

    if let (Some(close), Some(atr)) = (close_15m, daily_atr) {
        if atr > 0.0 {
            let distance = |anchor: Option<f64>| anchor.map(|a| (close - a) / atr);
            anchors.distance_prev_day_high_atr = distance(anchors.prev_day_high);
            anchors.distance_prev_day_low_atr = distance(anchors.prev_day_low);
            anchors.distance_prev_week_high_atr = distance(anchors.prev_week_high);
            anchors.distance_prev_week_low_atr = distance(anchors.prev_week_low);
            anchors.distance_daily_open_atr = distance(anchors.daily_open);
        }
    }
    anchors
}

fn compute_confluence(timeframes: &BTreeMap<String, TimeframeFeatures>) -> Confluence {
    let mut confluence = Confluence::default();

    if let Some(tf) = timeframes.get("15m") {
        match tf.ma_stack {
            MaStack::Bull => confluence.add(2, "15m_stack_bull"),
            MaStack::Bear => confluence.add(-2, "15m_stack_bear"),
            MaStack::Neutral => {}
        }
        if let Some(hist) = tf.macd_hist {
            if hist > 0.0 {
                confluence.add(1, "15m_macd_pos");
            } else if hist < 0.0 {
                confluence.add(-1, "15m_macd_neg");
            }
        }
        if let Some(rsi) = tf.rsi14 {
            if rsi > 55.0 {
                confluence.add(1, "15m_rsi_strong");
            } else if rsi < 45.0 {
                confluence.add(-1, "15m_rsi_weak");
            }
        }
    }
    if let Some(tf) = timeframes.get("5m") {
        if let Some(z) = tf.price_z20 {
            if z > 1.2 {
                confluence.add(1, "5m_price_stretch_up");
            } else if z < -1.2 {
                confluence.add(-1, "5m_price_stretch_down");
            }
        }
        if let Some(vz) = tf.volume_z20 {
            if vz > 1.5 {
                confluence.add(1, "5m_volume_surge");
            }
        }
    }
    if let Some(tf) = timeframes.get("1h") {
        match tf.ma_stack {
            MaStack::Bull => confluence.add(1, "1h_stack_bull"),
            MaStack::Bear => confluence.add(-1, "1h_stack_bear"),
            MaStack::Neutral => {}
        }
    }

    confluence
}

fn compute_regime(timeframes: &BTreeMap<String, TimeframeFeatures>) -> Regime {
    let stack_15m = timeframes.get("15m").map(|tf| tf.ma_stack);
    let stack_1h = timeframes.get("1h").map(|tf| tf.ma_stack);
    let trend = classify_trend(stack_15m, stack_1h);

    let volatility = match timeframes.get("15m").and_then(|tf| tf.atr_percentile) {
        Some(pct) if pct >= 70.0 => VolatilityRegime::High,
        Some(pct) if pct <= 30.0 => VolatilityRegime::Low,
        Some(_) => VolatilityRegime::Normal,
        None => VolatilityRegime::Unknown,
    };

    let hist_5m = timeframes.get("5m").and_then(|tf| tf.macd_hist);
    let hist_15m = timeframes.get("15m").and_then(|tf| tf.macd_hist);
    let momentum = match (hist_5m, hist_15m) {
        (Some(a), Some(b)) if a > 0.0 && b > 0.0 => MomentumRegime::Positive,
        (Some(a), Some(b)) if (a > 0.0) != (b > 0.0) && a != 0.0 && b != 0.0 => {
            MomentumRegime::Mixed
        }
        _ => MomentumRegime::Neutral,
    };

    Regime {
        trend,
        volatility,
        momentum,
    }
}

fn classify_trend(stack_15m: Option<MaStack>, stack_1h: Option<MaStack>) -> TrendRegime {
    let stacks: Vec<MaStack> = [stack_15m, stack_1h].into_iter().flatten().collect();
    if stacks.is_empty() {
        return TrendRegime::Neutral;
    }
    let any_bull = stacks.iter().any(|s| *s == MaStack::Bull);
    let any_bear = stacks.iter().any(|s| *s == MaStack::Bear);
    match (any_bull, any_bear) {
        (true, false) => TrendRegime::Bull,
        (false, true) => TrendRegime::Bear,
        _ => TrendRegime::Neutral,
    }
}

fn compute_liquidity(tf_15m: Option<&TimeframeFeatures>, anchors: &HtfAnchors) -> LiquidityFlags {
    let mut flags = LiquidityFlags::default();
    let Some(tf) = tf_15m else {
        return flags;
    };
    let Some(atr) = tf.atr14.filter(|a| *a > 0.0) else {
        return flags;
    };

    if let Some(prev_day_low) = anchors.prev_day_low {
        flags.sweep_low = tf.low < prev_day_low - 0.6 * atr && tf.close > prev_day_low;
        flags.break_and_hold_low = tf.close < prev_day_low - 0.3 * atr;
    }
    if let Some(prev_day_high) = anchors.prev_day_high {
        flags.sweep_high = tf.high > prev_day_high + 0.6 * atr && tf.close < prev_day_high;
        flags.break_and_hold_high = tf.close > prev_day_high + 0.3 * atr;
    }
    flags
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticSource {
        by_interval: HashMap<u32, Vec<Candle>>,
        fail_intervals: Vec<u32>,
    }

    #[async_trait]
    impl CandleSource for StaticSource {
        async fn recent_candles(
            &self,
            _pair: &str,
            interval_min: u32,
            count: usize,
        ) -> anyhow::Result<Vec<Candle>> {
            if self.fail_intervals.contains(&interval_min) {
                anyhow::bail!("simulated fetch failure");
            }
            let candles = self
                .by_interval
                .get(&interval_min)
                .cloned()
                .unwrap_or_default();
            let start = candles.len().saturating_sub(count);
            Ok(candles[start..].to_vec())
        }
    }

    fn ramp_candles(n: usize, start: f64, step: f64, interval_sec: i64) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let close = start + step * i as f64;
                Candle {
                    ts: i as i64 * interval_sec,
                    open: close - step / 2.0,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 100.0,
                }
            })
            .collect()
    }

    fn builder_with(source: StaticSource) -> FeatureBuilder {
        FeatureBuilder::new(
            Arc::new(source),
            Arc::new(RwLock::new(BookState::new())),
            SymbolPair::parse("DOGE/USD").unwrap(),
            FeatureConfig::default(),
        )
    }

    fn full_source() -> StaticSource {
        let mut by_interval = HashMap::new();
        for spec in &TIMEFRAMES {
            by_interval.insert(
                spec.minutes,
                ramp_candles(spec.lookback, 1.0, 0.01, i64::from(spec.minutes) * 60),
            );
        }
        by_interval.insert(WEEKLY_MINUTES, ramp_candles(5, 1.0, 0.1, 604_800));
        StaticSource {
            by_interval,
            fail_intervals: Vec::new(),
        }
    }

    #[tokio::test]
    async fn snapshot_covers_all_timeframes() {
        let builder = builder_with(full_source());
        let snapshot = builder
            .build(PositionSummary::default(), RiskSummary::default())
            .await;
        for spec in &TIMEFRAMES {
            assert!(
                snapshot.timeframes.contains_key(spec.name),
                "missing {}",
                spec.name
            );
        }
        assert_eq!(snapshot.pair, "DOGE/USD");
    }

    #[tokio::test]
    async fn uptrend_classifies_bullish() {
        let builder = builder_with(full_source());
        let snapshot = builder
            .build(PositionSummary::default(), RiskSummary::default())
            .await;
        let tf = snapshot.timeframe("15m").unwrap();
        assert_eq!(tf.ma_stack, MaStack::Bull);
        assert_eq!(snapshot.regime.trend, TrendRegime::Bull);
        assert!(snapshot.confluence.score > 0);
        assert!(snapshot
            .confluence
            .components
            .iter()
            .any(|c| c.contains("15m_stack_bull")));
    }

    #[tokio::test]
    async fn failed_timeframe_is_omitted_not_fatal() {
        let mut source = full_source();
        source.fail_intervals = vec![60];
        let builder = builder_with(source);
        let snapshot = builder
            .build(PositionSummary::default(), RiskSummary::default())
            .await;
        assert!(!snapshot.timeframes.contains_key("1h"));
        assert!(snapshot.timeframes.contains_key("15m"));
    }

    #[tokio::test]
    async fn confluence_is_deterministic() {
        let builder = builder_with(full_source());
        let first = builder
            .build(PositionSummary::default(), RiskSummary::default())
            .await;
        let second = builder
            .build(PositionSummary::default(), RiskSummary::default())
            .await;
        assert_eq!(first.confluence, second.confluence);
        assert_eq!(first.regime, second.regime);
    }

    #[tokio::test]
    async fn empty_book_yields_null_features() {
        let builder = builder_with(full_source());
        let snapshot = builder
            .build(PositionSummary::default(), RiskSummary::default())
            .await;
        assert!(snapshot.orderbook.imbalance.is_none());
        assert!(snapshot.orderbook.spread_bps.is_none());
        assert!(snapshot.orderbook.top_bid.is_none());
    }

    #[tokio::test]
    async fn anchors_derive_from_previous_day_and_week() {
        let builder = builder_with(full_source());
        let snapshot = builder
            .build(PositionSummary::default(), RiskSummary::default())
            .await;
        let anchors = &snapshot.htf_anchors;
        assert!(anchors.prev_day_high.is_some());
        assert!(anchors.prev_week_low.is_some());
        assert!(anchors.daily_open.is_some());
        assert!(anchors.distance_prev_day_high_atr.is_some());
    }

    #[test]
    fn ma_stack_two_ma_fallback() {
        assert_eq!(
            classify_ma_stack(Some(2.0), Some(1.0), None),
            MaStack::Bull
        );
        assert_eq!(
            classify_ma_stack(Some(1.0), Some(2.0), None),
            MaStack::Bear
        );
        assert_eq!(classify_ma_stack(Some(1.0), None, None), MaStack::Neutral);
    }

    #[test]
    fn trend_requires_agreement() {
        assert_eq!(
            classify_trend(Some(MaStack::Bull), Some(MaStack::Bull)),
            TrendRegime::Bull
        );
        assert_eq!(
            classify_trend(Some(MaStack::Bull), Some(MaStack::Bear)),
            TrendRegime::Neutral
        );
        assert_eq!(
            classify_trend(Some(MaStack::Bull), Some(MaStack::Neutral)),
            TrendRegime::Bull
        );
        assert_eq!(classify_trend(None, None), TrendRegime::Neutral);
    }

    #[test]
    fn last_price_cache_round_trips() {
        let builder = builder_with(full_source());
        assert_eq!(builder.last_price(), None);
        builder.set_last_price(0.205);
        assert_eq!(builder.last_price(), Some(0.205));
    }

    // ==================== Liquidity / Flags ====================

    fn bar_features(open: f64, high: f64, low: f64, close: f64, atr: f64) -> TimeframeFeatures {
        TimeframeFeatures {
            close,
            open,
            high,
            low,
            volume: 100.0,
            sma20: None,
            sma50: None,
            sma200: None,
            ma_stack: MaStack::Neutral,
            price_z20: None,
            vwap20: None,
            vwap_z: None,
            atr14: Some(atr),
            atr_pct: None,
            atr_percentile: None,
            range_ratio: None,
            rsi14: None,
            rsi_slope: None,
            macd: None,
            macd_signal: None,
            macd_hist: None,
            macd_slope: None,
            volume_z20: None,
            obv_direction: 0,
            swing: SwingFeatures::default(),
            flags: BarFlags::default(),
            last_3_bars: Vec::new(),
        }
    }

    fn anchors_with_prev_day(high: f64, low: f64) -> HtfAnchors {
        HtfAnchors {
            prev_day_high: Some(high),
            prev_day_low: Some(low),
            ..HtfAnchors::default()
        }
    }

    #[test]
    fn sweep_low_needs_a_deep_wick_and_a_reclaim() {
        let anchors = anchors_with_prev_day(1.10, 1.00);
        // Wick 0.08 below yesterday's low (> 0.6 · ATR 0.1), close reclaimed.
        let tf = bar_features(1.01, 1.02, 0.92, 1.01, 0.1);
        let flags = compute_liquidity(Some(&tf), &anchors);
        assert!(flags.sweep_low);
        assert!(!flags.sweep_high);

        // Same wick but the close stays below the anchor: no sweep, and a
        // close only 0.01 under is not a break-and-hold either.
        let tf = bar_features(1.01, 1.02, 0.92, 0.99, 0.1);
        let flags = compute_liquidity(Some(&tf), &anchors);
        assert!(!flags.sweep_low);
        assert!(!flags.break_and_hold_low);

        // Settling 0.05 under the anchor is.
        let tf = bar_features(1.01, 1.02, 0.92, 0.95, 0.1);
        let flags = compute_liquidity(Some(&tf), &anchors);
        assert!(flags.break_and_hold_low);
    }

    #[test]
    fn break_and_hold_needs_distance_beyond_the_anchor() {
        let anchors = anchors_with_prev_day(1.10, 1.00);
        // Close 0.04 above yesterday's high with ATR 0.1: > 0.3 · ATR.
        let tf = bar_features(1.10, 1.15, 1.09, 1.14, 0.1);
        let flags = compute_liquidity(Some(&tf), &anchors);
        assert!(flags.break_and_hold_high);
        assert!(!flags.sweep_high);

        // Close only just above: held but not by 0.3 ATR.
        let tf = bar_features(1.10, 1.12, 1.09, 1.11, 0.1);
        let flags = compute_liquidity(Some(&tf), &anchors);
        assert!(!flags.break_and_hold_high);
    }

    #[test]
    fn liquidity_needs_a_timeframe_and_an_atr() {
        let anchors = anchors_with_prev_day(1.10, 1.00);
        assert_eq!(compute_liquidity(None, &anchors), LiquidityFlags::default());

        let mut tf = bar_features(1.0, 1.2, 0.8, 1.0, 0.1);
        tf.atr14 = None;
        assert_eq!(
            compute_liquidity(Some(&tf), &anchors),
            LiquidityFlags::default()
        );
    }

    #[test]
    fn breakout_flag_needs_expansion_after_compression() {
        let last = Candle {
            ts: 0,
            open: 1.0,
            high: 1.1,
            low: 1.0,
            close: 1.09,
            volume: 1.0,
        };
        let prev = last;
        // Prior bar compressed (TR 0.02 < 0.4 · ATR), current expanded
        // (TR 0.08 > 0.6 · ATR 0.1).
        let trs = vec![0.05, 0.02, 0.08];
        let flags = compute_flags(&trs, Some(0.1), &last, &prev);
        assert!(flags.breakout);

        // No compression beforehand: no breakout.
        let trs = vec![0.05, 0.07, 0.08];
        let flags = compute_flags(&trs, Some(0.1), &last, &prev);
        assert!(!flags.breakout);
    }

    #[test]
    fn momentum_classification_follows_histogram_signs() {
        let mut timeframes = BTreeMap::new();
        let mut tf_5m = bar_features(1.0, 1.1, 0.9, 1.0, 0.1);
        let mut tf_15m = bar_features(1.0, 1.1, 0.9, 1.0, 0.1);
        tf_5m.macd_hist = Some(0.5);
        tf_15m.macd_hist = Some(0.2);
        timeframes.insert("5m".to_string(), tf_5m.clone());
        timeframes.insert("15m".to_string(), tf_15m.clone());
        assert_eq!(
            compute_regime(&timeframes).momentum,
            MomentumRegime::Positive
        );

        tf_15m.macd_hist = Some(-0.2);
        timeframes.insert("15m".to_string(), tf_15m.clone());
        assert_eq!(compute_regime(&timeframes).momentum, MomentumRegime::Mixed);

        tf_5m.macd_hist = Some(-0.5);
        timeframes.insert("5m".to_string(), tf_5m);
        assert_eq!(
            compute_regime(&timeframes).momentum,
            MomentumRegime::Neutral
        );
    }

    #[test]
    fn wick_percentages_split_the_range() {
        // Bar: open 1.02, close 1.04, high 1.10, low 1.00. Range 0.10,
        // upper wick 0.06, lower wick 0.02.
        let candles = vec![
            Candle {
                ts: 0,
                open: 1.0,
                high: 1.05,
                low: 0.95,
                close: 1.0,
                volume: 1.0,
            },
            Candle {
                ts: 60,
                open: 1.02,
                high: 1.10,
                low: 1.00,
                close: 1.04,
                volume: 1.0,
            },
        ];
        let swing = compute_swing(&candles, Some(0.1));
        assert!((swing.upper_wick_pct.unwrap() - 0.6).abs() < 1e-9);
        assert!((swing.lower_wick_pct.unwrap() - 0.2).abs() < 1e-9);
    }
}
