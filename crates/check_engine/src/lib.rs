//! Adaptive check selection engine.
//!
//! Decides which checks a store performs in each run and whether each needs
//! photo evidence, learning from the brand's response history which checks
//! are likely to fail.

pub mod commands;
pub mod pipeline;
pub mod selector;

#[cfg(test)]
mod fixtures;

pub use pipeline::{TrainingOutcome, TrainingPipeline, TrainingResult};
pub use selector::{PhotoReason, SelectedCheck, Selector, rule_score};
