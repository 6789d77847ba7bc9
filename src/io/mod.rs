//! Input/output helpers.
//!
//! - spectrum CSV ingest + validation (`ingest`)
//! - per-pixel result export (CSV) (`export`)
//! - continuum parameter JSON read/write (`params`)

pub mod export;
pub mod ingest;
pub mod params;

pub use export::*;
pub use ingest::*;
pub use params::*;
