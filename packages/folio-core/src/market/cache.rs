//! Time-bucketed cache around any [`MarketDataProvider`].

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{HistoricalSeries, MarketDataProvider};
use crate::types::{normalize_ticker, Period, PriceMap};
use crate::Result;

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tickers: Vec<String>,
    period: Option<Period>,
    bucket: i64,
}

/// Caches provider responses keyed by (sorted ticker set, period, time bucket).
///
/// Time is divided into buckets of `ttl` length; a response is reused for the
/// rest of the bucket it was fetched in. Entries from older buckets are dropped
/// on the next insert.
pub struct CachedMarketData<P> {
    inner: P,
    ttl_seconds: i64,
    clock: Clock,
    prices: Mutex<HashMap<CacheKey, PriceMap>>,
    history: Mutex<HashMap<CacheKey, HistoricalSeries>>,
    validity: Mutex<HashMap<CacheKey, bool>>,
}

impl<P: MarketDataProvider> CachedMarketData<P> {
    /// Wrap a provider with the given time-to-live (at least one second).
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl_seconds: ttl.num_seconds().max(1),
            clock: Box::new(Utc::now),
            prices: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            validity: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the wall clock, e.g. with a fixed time in tests.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Drop every cached response.
    pub fn clear(&self) {
        lock(&self.prices).clear();
        lock(&self.history).clear();
        lock(&self.validity).clear();
    }

    fn bucket(&self) -> i64 {
        (self.clock)().timestamp().div_euclid(self.ttl_seconds)
    }

    fn key<'a, I>(&self, tickers: I, period: Option<Period>) -> CacheKey
    where
        I: IntoIterator<Item = &'a String>,
    {
        let tickers: BTreeSet<String> = tickers.into_iter().map(|t| normalize_ticker(t)).collect();
        CacheKey {
            tickers: tickers.into_iter().collect(),
            period,
            bucket: self.bucket(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn cached<T: Clone>(
    map: &Mutex<HashMap<CacheKey, T>>,
    key: CacheKey,
    fetch: impl FnOnce() -> Result<T>,
) -> Result<T> {
    if let Some(hit) = lock(map).get(&key) {
        debug!(tickers = ?key.tickers, bucket = key.bucket, "market data cache hit");
        return Ok(hit.clone());
    }

    let value = fetch()?;
    let mut entries = lock(map);
    entries.retain(|existing, _| existing.bucket == key.bucket);
    entries.insert(key, value.clone());
    Ok(value)
}

impl<P: MarketDataProvider> MarketDataProvider for CachedMarketData<P> {
    fn current_prices(&self, tickers: &BTreeSet<String>) -> Result<PriceMap> {
        let key = self.key(tickers, None);
        cached(&self.prices, key, || self.inner.current_prices(tickers))
    }

    fn historical_series(
        &self,
        tickers: &BTreeSet<String>,
        period: Period,
    ) -> Result<HistoricalSeries> {
        let key = self.key(tickers, Some(period));
        cached(&self.history, key, || {
            self.inner.historical_series(tickers, period)
        })
    }

    fn validate_ticker(&self, ticker: &str) -> Result<bool> {
        let ticker = normalize_ticker(ticker);
        let key = self.key(std::iter::once(&ticker), None);
        cached(&self.validity, key, || self.inner.validate_ticker(&ticker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
    }

    impl MarketDataProvider for CountingProvider {
        fn current_prices(&self, tickers: &BTreeSet<String>) -> Result<PriceMap> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(tickers.iter().map(|t| (t.as_str(), 100.0)).collect())
        }

        fn historical_series(
            &self,
            tickers: &BTreeSet<String>,
            period: Period,
        ) -> Result<HistoricalSeries> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HistoricalSeries::new(period, tickers.iter().cloned().collect()))
        }

        fn validate_ticker(&self, _ticker: &str) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn setup() -> (CachedMarketData<CountingProvider>, Arc<AtomicUsize>, Arc<AtomicI64>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let now = Arc::new(AtomicI64::new(1_700_000_000));
        let clock_now = Arc::clone(&now);
        let cache = CachedMarketData::new(
            CountingProvider {
                calls: Arc::clone(&calls),
            },
            Duration::seconds(60),
        )
        .with_clock(move || {
            Utc.timestamp_opt(clock_now.load(Ordering::SeqCst), 0)
                .single()
                .unwrap()
        });
        (cache, calls, now)
    }

    fn set(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_repeated_request_hits_cache() {
        let (cache, calls, _) = setup();
        cache.current_prices(&set(&["AAPL", "MSFT"])).unwrap();
        cache.current_prices(&set(&["msft", "aapl"])).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_period_is_part_of_key() {
        let (cache, calls, _) = setup();
        cache.historical_series(&set(&["AAPL"]), Period::OneYear).unwrap();
        cache.historical_series(&set(&["AAPL"]), Period::OneMonth).unwrap();
        cache.historical_series(&set(&["AAPL"]), Period::OneYear).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_new_bucket_refetches() {
        let (cache, calls, now) = setup();
        cache.validate_ticker("AAPL").unwrap();
        now.fetch_add(120, Ordering::SeqCst);
        cache.validate_ticker("AAPL").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_drops_entries() {
        let (cache, calls, _) = setup();
        cache.current_prices(&set(&["AAPL"])).unwrap();
        cache.clear();
        cache.current_prices(&set(&["AAPL"])).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
