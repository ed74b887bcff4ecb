//! Cached technical indicators computed from provider bars.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use tokio::time::Instant;

use crate::batch::{BatchExecutor, BatchResult};
use crate::config::AccessConfig;
use crate::error::{AccessError, ValidationError};
use crate::quotes::SourceFuture;
use crate::smart_cache::SmartCache;
use crate::store::CacheStore;
use crate::{Bar, Symbol};

const INDICATOR_NAMESPACE: &str = "indicator";

/// Provider-specific bar history lookup, most recent bar last.
pub trait BarSource: Send + Sync {
    fn fetch_bars<'a>(&'a self, symbol: &'a Symbol, limit: usize) -> SourceFuture<'a, Vec<Bar>>;
}

/// Indicator computed over close prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indicator {
    Sma { period: usize },
    Ema { period: usize },
    Rsi { period: usize },
}

impl Indicator {
    pub fn sma(period: usize) -> Result<Self, ValidationError> {
        validate_period(period).map(|period| Self::Sma { period })
    }

    pub fn ema(period: usize) -> Result<Self, ValidationError> {
        validate_period(period).map(|period| Self::Ema { period })
    }

    pub fn rsi(period: usize) -> Result<Self, ValidationError> {
        validate_period(period).map(|period| Self::Rsi { period })
    }

    /// Bars needed for one value.
    pub const fn required_bars(self) -> usize {
        match self {
            Self::Sma { period } | Self::Ema { period } => period,
            Self::Rsi { period } => period + 1,
        }
    }

    /// Latest indicator value, or `None` when `closes` is too short.
    pub fn compute(self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.required_bars() || self.required_bars() == 0 {
            return None;
        }

        match self {
            Self::Sma { period } => Some(mean(&closes[closes.len() - period..])),
            Self::Ema { period } => {
                let alpha = 2.0 / (period as f64 + 1.0);
                let seed = mean(&closes[..period]);
                Some(
                    closes[period..]
                        .iter()
                        .fold(seed, |ema, close| alpha * close + (1.0 - alpha) * ema),
                )
            }
            Self::Rsi { period } => Some(wilder_rsi(closes, period)),
        }
    }
}

impl Display for Indicator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sma { period } => write!(f, "sma{period}"),
            Self::Ema { period } => write!(f, "ema{period}"),
            Self::Rsi { period } => write!(f, "rsi{period}"),
        }
    }
}

fn validate_period(period: usize) -> Result<usize, ValidationError> {
    if period == 0 {
        return Err(ValidationError::InvalidIndicatorPeriod);
    }
    Ok(period)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn wilder_rsi(closes: &[f64], period: usize) -> f64 {
    let deltas = closes.windows(2).map(|pair| pair[1] - pair[0]).collect::<Vec<_>>();
    let (seed, rest) = deltas.split_at(period);

    let mut avg_gain = seed.iter().map(|delta| delta.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = seed.iter().map(|delta| (-delta).max(0.0)).sum::<f64>() / period as f64;
    for delta in rest {
        avg_gain = (avg_gain * (period as f64 - 1.0) + delta.max(0.0)) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + (-delta).max(0.0)) / period as f64;
    }

    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Indicator values cached per symbol and indicator.
pub struct IndicatorCalculator {
    cache: SmartCache<f64>,
    executor: BatchExecutor,
    source: Arc<dyn BarSource>,
    history: usize,
}

impl IndicatorCalculator {
    pub fn new(source: Arc<dyn BarSource>, config: &AccessConfig) -> Self {
        let store = Arc::new(CacheStore::<f64>::new(config.cache.default_ttl));
        Self {
            cache: SmartCache::new(store, config.cache.clone()),
            executor: BatchExecutor::new(config.batch.clone()),
            source,
            history: 250,
        }
    }

    /// Bars requested beyond the indicator minimum, smoothing EMA and RSI.
    /// Defaults to 250.
    pub fn with_history(mut self, history: usize) -> Self {
        self.history = history;
        self
    }

    pub fn cache(&self) -> &SmartCache<f64> {
        &self.cache
    }

    /// Latest value, `None` when the source has too little history.
    pub async fn calculate(
        &self,
        symbol: &Symbol,
        indicator: Indicator,
    ) -> Result<Option<f64>, AccessError> {
        let key = indicator_key(symbol, indicator);
        let limit = self.history.max(indicator.required_bars());
        self.cache
            .get_or_fetch(&key, || async {
                let bars = self.source.fetch_bars(symbol, limit).await?;
                Ok::<_, AccessError>(indicator.compute(&closes(&bars)))
            })
            .await
    }

    /// Batched [`IndicatorCalculator::calculate`]. Symbols with too little
    /// history are reported as failed.
    pub async fn calculate_many(
        &self,
        symbols: Vec<Symbol>,
        indicator: Indicator,
    ) -> BatchResult<Symbol, f64> {
        let started = Instant::now();
        let mut success = HashMap::new();
        let mut misses = Vec::new();

        for symbol in symbols {
            if success.contains_key(&symbol) {
                continue;
            }
            match self.cache.get(&indicator_key(&symbol, indicator)).await {
                Some(value) => {
                    success.insert(symbol, value);
                }
                None => misses.push(symbol),
            }
        }

        let source = Arc::clone(&self.source);
        let limit = self.history.max(indicator.required_bars());
        let computed = self
            .executor
            .batch_execute(misses, move |symbol: Symbol| {
                let source = Arc::clone(&source);
                async move {
                    let bars = source.fetch_bars(&symbol, limit).await?;
                    indicator.compute(&closes(&bars)).ok_or_else(|| {
                        AccessError::fetch(
                            symbol.as_str(),
                            format!("insufficient history for {indicator}: {} bars", bars.len()),
                        )
                    })
                }
            })
            .await;

        for (symbol, value) in &computed.success {
            self.cache
                .set(&indicator_key(symbol, indicator), *value)
                .await;
        }
        success.extend(computed.success);

        BatchResult::new(success, computed.failed, started.elapsed())
    }
}

fn indicator_key(symbol: &Symbol, indicator: Indicator) -> String {
    format!("{}:{indicator}", symbol.cache_key(INDICATOR_NAMESPACE))
}

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|bar| bar.close).collect()
}
