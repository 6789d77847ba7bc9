//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - configuration enums (`Basis`, `ShapeKind`, `FinderKind`, `InitialParams`)
//! - wavelength `Range`s and range `Buffer`s
//! - the `Spectrum` container consumed by the continuum models
//! - run configuration (`FitConfig`) and the saved-continuum schema (`ContinuumFile`)

pub mod types;

pub use types::*;
