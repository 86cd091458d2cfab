//! Quote provider seam, raw-frame formatting and universe loading.

pub mod circuit_breaker;
pub mod formatter;
pub mod provider;
pub mod schema;
pub mod universe;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use formatter::{classify_column, CanonicalColumn, FormatError, RowFormatter};
pub use provider::{DataError, DataProvider, ProviderFrame};
pub use schema::{store_header, TimestampCodec, STORE_WIDTH, TICKER_COLUMN};
pub use universe::{EligibilityFilter, SymbolPolicy, TickerUniverse, UniverseError};
pub use yahoo::YahooProvider;
