//! Report assembly and rendering.
//!
//! Stage outcomes are merged into a [`Report`] by the aggregator and
//! rendered as JSON or Markdown by the generator.

pub mod aggregator;
pub mod generator;

pub use aggregator::*;
pub use generator::*;
