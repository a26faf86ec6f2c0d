//! Priority scoring, text classification and duplicate detection for
//! municipal issue reports.

pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod intake;
pub mod rules;
pub mod schema;
pub mod scoring;
pub mod text;
pub mod timefmt;
pub mod training;
pub mod voting;

pub use error::{Error, Result};
