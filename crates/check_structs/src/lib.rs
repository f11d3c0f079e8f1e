//! Common structs for stores, check templates and check history shared across crates.

mod coverage;
mod history;
mod store;
mod template;

pub use coverage::*;
pub use history::*;
pub use store::*;
pub use template::*;
