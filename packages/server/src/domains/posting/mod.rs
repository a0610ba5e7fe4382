//! Bulk post publication with optional image upload and profile pinning.

pub mod executor;
pub mod image;

pub use executor::run;
