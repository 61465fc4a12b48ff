//! Historical bar loading from the local CSV cache.
//!
//! Lookup order for `(symbol, timeframe)`:
//! 1. `{data_dir}/{exchange}/{BASE-QUOTE}_{tf}.csv`
//! 2. for sub-minute frames, the 1m cache split into equal segments
//! 3. for frames above 1m, the 1m cache resampled into buckets
//! 4. a seeded random walk when `synthesize_missing` is set
//!
//! Anything else yields zero bars. Results are always sorted, deduplicated by
//! timestamp and clipped to the requested `[start_ms, end_ms]` window.

use crate::csv_storage::CsvStorage;
use crate::error::DataError;
use crate::models::OhlcvBar;
use crate::timeframe::Timeframe;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use spotgate_core::events::Tick;
use std::path::PathBuf;
use tracing::{debug, warn};

const SYNTHETIC_SIGMA: f64 = 0.0005;
const SYNTHETIC_WICK: f64 = 0.0008;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub data_dir: PathBuf,
    pub exchange: String,
    pub synthesize_missing: bool,
    /// Mixed into the per-symbol seed of synthetic series.
    pub seed: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            exchange: "bitget".to_string(),
            synthesize_missing: false,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataLoader {
    config: LoaderConfig,
}

impl DataLoader {
    #[must_use]
    pub const fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Cache file for a symbol, e.g. `data/bitget/BTC-USDT_1m.csv`.
    #[must_use]
    pub fn symbol_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.config
            .data_dir
            .join(&self.config.exchange)
            .join(format!("{}_{}.csv", symbol.replace('/', "-"), timeframe))
    }

    /// Loads bars for `symbol` within `[start_ms, end_ms]`.
    ///
    /// # Errors
    ///
    /// Returns an error if a cache file exists but cannot be read or parsed.
    pub fn load_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<OhlcvBar>, DataError> {
        let path = self.symbol_path(symbol, timeframe);
        let minute_path = self.symbol_path(symbol, Timeframe::one_minute());
        let bars = if path.exists() {
            CsvStorage::read_ohlcv(&path)?
        } else if timeframe.is_subminute() && minute_path.exists() {
            let base = CsvStorage::read_ohlcv(&minute_path)?;
            debug!(symbol, %timeframe, base_bars = base.len(), "synthesizing sub-minute bars from 1m cache");
            Self::synthesize_subminute(&base, timeframe)
        } else if timeframe.seconds() > 60 && minute_path.exists() {
            let mut base = CsvStorage::read_ohlcv(&minute_path)?;
            base.sort_by_key(|b| b.timestamp_ms);
            base.dedup_by_key(|b| b.timestamp_ms);
            debug!(symbol, %timeframe, base_bars = base.len(), "resampling 1m cache");
            Self::resample(&base, timeframe)
        } else if self.config.synthesize_missing {
            debug!(symbol, %timeframe, "no cache file, generating synthetic bars");
            Self::synthesize_direct(symbol, timeframe, start_ms, end_ms, self.config.seed)
        } else {
            warn!(symbol, path = %path.display(), "no cached data for symbol");
            Vec::new()
        };

        Ok(normalize(bars, start_ms, end_ms))
    }

    /// Splits each 1m bar into `60 / tf` segments with linearly interpolated
    /// open/close and evenly divided volume.
    #[must_use]
    pub fn synthesize_subminute(bars_1m: &[OhlcvBar], timeframe: Timeframe) -> Vec<OhlcvBar> {
        let seconds = timeframe.seconds().max(1);
        let segments = (60 / seconds).max(1);
        let seg_dec = Decimal::from(segments);
        let mut out = Vec::with_capacity(bars_1m.len() * segments as usize);

        for bar in bars_1m {
            let span = bar.close - bar.open;
            for k in 0..segments {
                let ts = bar.timestamp_ms + i64::from(k) * i64::from(seconds) * 1000;
                let open = bar.open + span * Decimal::from(k) / seg_dec;
                let close = bar.open + span * Decimal::from(k + 1) / seg_dec;
                out.push(OhlcvBar {
                    timestamp_ms: ts,
                    open,
                    high: bar.high.max(open).max(close),
                    low: bar.low.min(open).min(close),
                    close,
                    volume: bar.volume / seg_dec,
                });
            }
        }
        out
    }

    /// Deterministic random-walk bars. The same symbol, window and seed
    /// always produce the same series.
    #[must_use]
    pub fn synthesize_direct(
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
        seed: u64,
    ) -> Vec<OhlcvBar> {
        let step_ms = timeframe.millis();
        let n = ((end_ms - start_ms) / step_ms).max(1);
        let symbol_hash = symbol_seed(symbol);
        let mut rng = ChaCha8Rng::seed_from_u64(symbol_hash ^ seed);

        #[allow(clippy::cast_precision_loss)]
        let mut price = 100.0 + (symbol_hash % 100) as f64 * 0.1;
        let mut out = Vec::with_capacity(usize::try_from(n).unwrap_or_default());

        for i in 0..n {
            let open = price;
            price *= 1.0 + standard_normal(&mut rng) * SYNTHETIC_SIGMA;
            let close = price;
            let high = open.max(close) * (1.0 + SYNTHETIC_WICK);
            let low = open.min(close) * (1.0 - SYNTHETIC_WICK);
            out.push(OhlcvBar {
                timestamp_ms: start_ms + i * step_ms,
                open: to_decimal(open),
                high: to_decimal(high),
                low: to_decimal(low),
                close: to_decimal(close),
                volume: Decimal::from(5 + i % 7),
            });
        }
        out
    }

    /// Aggregates bars into `timeframe` buckets aligned to the epoch.
    ///
    /// First open, max high, min low, last close and summed volume. Input
    /// must be sorted by timestamp.
    #[must_use]
    pub fn resample(bars: &[OhlcvBar], timeframe: Timeframe) -> Vec<OhlcvBar> {
        let step = timeframe.millis();
        let mut out: Vec<OhlcvBar> = Vec::new();

        for bar in bars {
            let bucket = bar.timestamp_ms.div_euclid(step) * step;
            match out.last_mut() {
                Some(agg) if agg.timestamp_ms == bucket => {
                    agg.high = agg.high.max(bar.high);
                    agg.low = agg.low.min(bar.low);
                    agg.close = bar.close;
                    agg.volume += bar.volume;
                }
                _ => out.push(OhlcvBar {
                    timestamp_ms: bucket,
                    ..bar.clone()
                }),
            }
        }
        out
    }

    /// Converts bars to ticks with a symmetric synthetic spread around the close.
    #[must_use]
    pub fn bars_to_ticks(symbol: &str, bars: &[OhlcvBar], spread_bps: Decimal) -> Vec<Tick> {
        bars.iter()
            .filter_map(|bar| {
                let ts = bar.timestamp()?;
                Some(Tick::from_bar(
                    symbol, ts, bar.open, bar.high, bar.low, bar.close, bar.volume, spread_bps,
                ))
            })
            .collect()
    }
}

/// Sorts by timestamp, keeps the first bar per timestamp and clips to the window.
#[must_use]
pub fn normalize(mut bars: Vec<OhlcvBar>, start_ms: i64, end_ms: i64) -> Vec<OhlcvBar> {
    bars.sort_by_key(|b| b.timestamp_ms);
    bars.dedup_by_key(|b| b.timestamp_ms);
    bars.retain(|b| b.timestamp_ms >= start_ms && b.timestamp_ms <= end_ms);
    bars
}

// FNV-1a; stable across processes, unlike the std hasher.
fn symbol_seed(symbol: &str) -> u64 {
    symbol.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn standard_normal(rng: &mut ChaCha8Rng) -> f64 {
    // Box-Muller
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::try_from(value).map_or(Decimal::ZERO, |d| d.round_dp(8))
}
