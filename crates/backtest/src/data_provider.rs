//! Multi-symbol tick stream for the backtest loop.
//!
//! Each symbol contributes an already time-ordered sequence of ticks; the
//! merger interleaves them with a k-way heap merge so the loop sees one
//! globally time-ordered stream.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use spotgate_core::events::Tick;
use spotgate_data::{DataError, DataLoader, Timeframe};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::vec::IntoIter;
use tracing::{debug, warn};

/// Heap key: `(timestamp, symbol, seq)`. `seq` is a global insertion
/// counter, so equal `(timestamp, symbol)` pairs keep their stream order.
struct HeapEntry {
    timestamp: DateTime<Utc>,
    symbol: String,
    seq: u64,
    stream: usize,
    tick: Tick,
}

impl HeapEntry {
    fn key(&self) -> (DateTime<Utc>, &str, u64) {
        (self.timestamp, self.symbol.as_str(), self.seq)
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Time-ordered merge of per-symbol tick streams.
///
/// Ties on timestamp are broken lexicographically by symbol. The merger is
/// single-use: once exhausted it keeps returning `None`.
pub struct TickMerger {
    streams: Vec<(String, IntoIter<Tick>)>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
    seq: u64,
}

impl TickMerger {
    /// Builds a merger over per-symbol streams. Each stream must already be
    /// sorted by timestamp.
    #[must_use]
    pub fn new(per_symbol: BTreeMap<String, Vec<Tick>>) -> Self {
        let mut merger = Self {
            streams: Vec::with_capacity(per_symbol.len()),
            heap: BinaryHeap::new(),
            seq: 0,
        };

        for (symbol, ticks) in per_symbol {
            if ticks.is_empty() {
                warn!(symbol = %symbol, "no ticks for symbol, it will not trade");
            }
            merger.streams.push((symbol, ticks.into_iter()));
        }
        for stream in 0..merger.streams.len() {
            merger.advance(stream);
        }
        merger
    }

    /// Loads each symbol's bars for `[start_ms, end_ms]` and converts them
    /// to ticks with the given synthetic spread.
    ///
    /// # Errors
    ///
    /// Returns an error if a cached data file exists but is malformed.
    pub fn from_loader(
        loader: &DataLoader,
        symbols: &[String],
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
        spread_bps: Decimal,
    ) -> Result<Self, DataError> {
        let mut per_symbol = BTreeMap::new();
        for symbol in symbols {
            let bars = loader.load_ohlcv(symbol, timeframe, start_ms, end_ms)?;
            debug!(symbol = %symbol, bars = bars.len(), "loaded bars");
            per_symbol.insert(
                symbol.clone(),
                DataLoader::bars_to_ticks(symbol, &bars, spread_bps),
            );
        }
        Ok(Self::new(per_symbol))
    }

    /// Ticks still queued across all streams.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.heap.len() + self.streams.iter().map(|(_, s)| s.len()).sum::<usize>()
    }

    fn advance(&mut self, stream: usize) {
        let (symbol, ticks) = &mut self.streams[stream];
        if let Some(tick) = ticks.next() {
            self.heap.push(Reverse(HeapEntry {
                timestamp: tick.timestamp,
                symbol: symbol.clone(),
                seq: self.seq,
                stream,
                tick,
            }));
            self.seq += 1;
        }
    }
}

impl Iterator for TickMerger {
    type Item = (String, Tick);

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(entry) = self.heap.pop()?;
        self.advance(entry.stream);
        Some((entry.symbol, entry.tick))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tick(symbol: &str, secs: i64, last: Decimal) -> Tick {
        Tick::from_bar(
            symbol,
            DateTime::from_timestamp(secs, 0).unwrap(),
            last,
            last,
            last,
            last,
            dec!(1),
            dec!(1),
        )
    }

    #[test]
    fn test_merges_in_timestamp_order() {
        let mut streams = BTreeMap::new();
        streams.insert(
            "ETH/USDT".to_string(),
            vec![tick("ETH/USDT", 1, dec!(10)), tick("ETH/USDT", 4, dec!(11))],
        );
        streams.insert(
            "BTC/USDT".to_string(),
            vec![tick("BTC/USDT", 2, dec!(100)), tick("BTC/USDT", 3, dec!(101))],
        );

        let order: Vec<i64> = TickMerger::new(streams)
            .map(|(_, t)| t.timestamp.timestamp())
            .collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_equal_timestamps_break_by_symbol() {
        let mut streams = BTreeMap::new();
        streams.insert("SOL/USDT".to_string(), vec![tick("SOL/USDT", 5, dec!(1))]);
        streams.insert("ADA/USDT".to_string(), vec![tick("ADA/USDT", 5, dec!(1))]);
        streams.insert("BTC/USDT".to_string(), vec![tick("BTC/USDT", 5, dec!(1))]);

        let symbols: Vec<String> = TickMerger::new(streams).map(|(s, _)| s).collect();
        assert_eq!(symbols, vec!["ADA/USDT", "BTC/USDT", "SOL/USDT"]);
    }

    #[test]
    fn test_duplicate_timestamps_keep_stream_order() {
        let mut streams = BTreeMap::new();
        streams.insert(
            "BTC/USDT".to_string(),
            vec![tick("BTC/USDT", 5, dec!(1)), tick("BTC/USDT", 5, dec!(2))],
        );

        let prices: Vec<Decimal> = TickMerger::new(streams).map(|(_, t)| t.last).collect();
        assert_eq!(prices, vec![dec!(1), dec!(2)]);
    }

    #[test]
    fn test_empty_stream_contributes_nothing_and_stays_exhausted() {
        let mut streams = BTreeMap::new();
        streams.insert("BTC/USDT".to_string(), Vec::new());
        streams.insert("ETH/USDT".to_string(), vec![tick("ETH/USDT", 1, dec!(1))]);

        let mut merger = TickMerger::new(streams);
        assert_eq!(merger.remaining(), 1);
        assert!(merger.next().is_some());
        assert!(merger.next().is_none());
        assert!(merger.next().is_none());
    }
}
