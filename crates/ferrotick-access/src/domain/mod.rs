//! # Domain Models
//!
//! Market-data values moved through the access layer by the use-case
//! wrappers.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Quote`] | Top-of-book quote with price, bid, ask |
//! | [`Bar`] | OHLCV bar with timestamp |
//! | [`Symbol`] | Validated stock symbol |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! All types validate their invariants at construction time:
//!
//! ```rust,ignore
//! use ferrotick_access::{Bar, UtcDateTime, ValidationError};
//!
//! let ts = UtcDateTime::parse("2024-01-01T00:00:00Z")?;
//! let invalid = Bar::new(ts, 100.0, 95.0, 105.0, 102.0, Some(1000));
//! assert!(matches!(invalid, Err(ValidationError::InvalidBarRange)));
//! ```

mod models;
mod symbol;
mod timestamp;

pub use models::{validate_currency_code, Bar, Quote};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
