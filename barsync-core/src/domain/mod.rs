//! Domain types for barsync

pub mod bar;
pub mod granularity;

pub use bar::Bar;
pub use granularity::Granularity;
