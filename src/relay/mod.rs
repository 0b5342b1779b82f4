//! Relay core shared by both workers.

pub mod duplex;
pub mod envelope;
pub mod filter;

pub use duplex::{DuplexEnd, duplex};
pub use envelope::Envelope;
pub use filter::RelayFilter;
