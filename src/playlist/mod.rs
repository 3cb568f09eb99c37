pub mod candidates;
pub mod config;
pub mod filters;
pub mod generator;
pub mod metadata;
pub mod selector;
pub mod similarity;
pub mod strategy;
pub mod utils;
pub mod weights;

pub use config::*;
pub use generator::*;
pub use metadata::*;
