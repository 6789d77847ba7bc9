//! `contfit` library crate.
//!
//! The binary (`contfit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - continuum models can be embedded in other spectral pipelines
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod continuum;
pub mod data;
pub mod debug;
pub mod domain;
pub mod error;
pub mod finders;
pub mod fit;
pub mod io;
pub mod mask;
pub mod math;
pub mod models;
pub mod report;
pub mod trace;
pub mod transform;
