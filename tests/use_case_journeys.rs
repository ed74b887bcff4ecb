//! End-to-end journeys through the quote fetcher and indicator calculator
//!
//! These tests drive the public use-case wrappers against in-memory
//! providers and verify what reaches the provider and what is served
//! from cache.

use ferrotick_access::{
    AccessConfig, AccessError, Bar, BarSource, BatchConfig, Indicator, IndicatorCalculator,
    Quote, QuoteFetcher, QuoteSource, SourceFuture, Symbol, UtcDateTime, MAX_RETRIES_EXCEEDED,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn symbol(raw: &str) -> Symbol {
    Symbol::parse(raw).expect("valid symbol")
}

fn fast_config() -> AccessConfig {
    AccessConfig {
        batch: BatchConfig {
            delay_between_chunks: Duration::ZERO,
            ..BatchConfig::default()
        },
        ..AccessConfig::default()
    }
}

#[derive(Default)]
struct FakeQuoteSource {
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeQuoteSource {
    fn calls(&self, raw: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .get(raw)
            .copied()
            .unwrap_or_default()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls lock").values().sum()
    }
}

impl QuoteSource for FakeQuoteSource {
    fn fetch_quote<'a>(&'a self, symbol: &'a Symbol) -> SourceFuture<'a, Option<Quote>> {
        Box::pin(async move {
            *self
                .calls
                .lock()
                .expect("calls lock")
                .entry(symbol.as_str().to_owned())
                .or_default() += 1;

            match symbol.as_str() {
                "FAIL" => Err(AccessError::fetch(symbol.as_str(), "provider returned 503")),
                "NONE" => Ok(None),
                _ => Ok(Some(Quote::new(
                    symbol.clone(),
                    100.0,
                    Some(99.5),
                    Some(100.5),
                    Some(1_000),
                    "usd",
                    UtcDateTime::now(),
                )?)),
            }
        })
    }
}

struct FakeBarSource {
    closes: HashMap<String, Vec<f64>>,
    calls: Mutex<usize>,
}

impl FakeBarSource {
    fn new(series: &[(&str, Vec<f64>)]) -> Self {
        Self {
            closes: series
                .iter()
                .map(|(raw, closes)| ((*raw).to_owned(), closes.clone()))
                .collect(),
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().expect("calls lock")
    }
}

impl BarSource for FakeBarSource {
    fn fetch_bars<'a>(&'a self, symbol: &'a Symbol, limit: usize) -> SourceFuture<'a, Vec<Bar>> {
        Box::pin(async move {
            *self.calls.lock().expect("calls lock") += 1;
            let closes = self.closes.get(symbol.as_str()).cloned().unwrap_or_default();
            let skip = closes.len().saturating_sub(limit);

            let mut bars = Vec::with_capacity(closes.len() - skip);
            for (day, close) in closes.into_iter().enumerate().skip(skip) {
                let ts = UtcDateTime::from_unix_seconds(1_700_000_000 + day as i64 * 86_400)?;
                bars.push(Bar::new(ts, close, close, close, close, None)?);
            }
            Ok(bars)
        })
    }
}

// =============================================================================
// Quotes
// =============================================================================

#[tokio::test]
async fn when_quote_is_requested_twice_provider_is_called_once() {
    // Given: A fetcher over an in-memory provider
    let source = Arc::new(FakeQuoteSource::default());
    let fetcher = QuoteFetcher::new(source.clone(), &fast_config());
    let aapl = symbol("aapl");

    // When: The same quote is requested twice
    let first = fetcher.quote(&aapl).await.expect("first quote");
    let second = fetcher.quote(&aapl).await.expect("second quote");

    // Then: The provider was hit once and the limiter saw the call
    assert_eq!(first, second);
    assert_eq!(first.expect("quote present").currency, "USD");
    assert_eq!(source.calls("AAPL"), 1);
    assert_eq!(fetcher.limiter().snapshot().success_count, 1);

    fetcher.shutdown().await;
}

#[tokio::test]
async fn unknown_quote_is_not_cached() {
    let source = Arc::new(FakeQuoteSource::default());
    let fetcher = QuoteFetcher::new(source.clone(), &fast_config());
    let none = symbol("NONE");

    assert_eq!(fetcher.quote(&none).await, Ok(None));
    assert_eq!(fetcher.quote(&none).await, Ok(None));

    assert_eq!(source.calls("NONE"), 2);
    fetcher.shutdown().await;
}

#[tokio::test]
async fn batch_quotes_retry_failures_and_reuse_cache() {
    // Given: A fetcher with one retry round
    let source = Arc::new(FakeQuoteSource::default());
    let fetcher = QuoteFetcher::new(source.clone(), &fast_config()).with_max_retries(1);

    // When: A batch with a failing and an empty symbol is fetched
    let result = fetcher
        .quotes(vec![
            symbol("AAPL"),
            symbol("MSFT"),
            symbol("FAIL"),
            symbol("NONE"),
            symbol("AAPL"),
        ])
        .await;

    // Then: Good symbols succeed and the rest carry the retry marker
    assert_eq!(result.success_count, 2);
    assert_eq!(result.failed_count, 2);
    assert_eq!(result.failed[&symbol("FAIL")], MAX_RETRIES_EXCEEDED);
    assert_eq!(result.failed[&symbol("NONE")], MAX_RETRIES_EXCEEDED);
    assert_eq!(source.calls("AAPL"), 1);
    assert_eq!(source.calls("FAIL"), 2);

    // When: The good symbols are requested again
    let calls_before = source.total_calls();
    let again = fetcher.quotes(vec![symbol("AAPL"), symbol("MSFT")]).await;

    // Then: They are served from cache
    assert!(again.is_complete());
    assert_eq!(again.success_count, 2);
    assert_eq!(source.total_calls(), calls_before);

    fetcher.shutdown().await;
}

// =============================================================================
// Indicators
// =============================================================================

#[tokio::test]
async fn indicator_is_computed_once_and_then_served_from_cache() {
    // Given: Ten rising closes
    let source = Arc::new(FakeBarSource::new(&[(
        "AAPL",
        (1..=10).map(f64::from).collect(),
    )]));
    let calculator = IndicatorCalculator::new(source.clone(), &fast_config());
    let sma = Indicator::sma(3).expect("valid period");

    // When: The SMA is requested twice
    let first = calculator.calculate(&symbol("AAPL"), sma).await;
    let second = calculator.calculate(&symbol("AAPL"), sma).await;

    // Then: The trailing mean is returned and bars were fetched once
    assert_eq!(first, Ok(Some(9.0)));
    assert_eq!(second, Ok(Some(9.0)));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn batch_indicators_report_short_history_as_failure() {
    // Given: One cached symbol, one fresh symbol and one with two bars
    let source = Arc::new(FakeBarSource::new(&[
        ("AAPL", vec![10.0; 30]),
        ("MSFT", (1..=30).map(f64::from).collect()),
        ("TINY", vec![1.0, 2.0]),
    ]));
    let calculator = IndicatorCalculator::new(source.clone(), &fast_config()).with_history(30);
    let rsi = Indicator::rsi(14).expect("valid period");
    assert_eq!(
        calculator.calculate(&symbol("AAPL"), rsi).await,
        Ok(Some(50.0))
    );

    // When: All three are calculated together
    let result = calculator
        .calculate_many(vec![symbol("AAPL"), symbol("MSFT"), symbol("TINY")], rsi)
        .await;

    // Then: The cached value is reused and the short series fails
    assert_eq!(result.success[&symbol("AAPL")], 50.0);
    assert_eq!(result.success[&symbol("MSFT")], 100.0);
    assert!(result.failed[&symbol("TINY")].contains("insufficient history"));
    assert_eq!(source.calls(), 3);
}
