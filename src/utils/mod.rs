//! Shared utilities

pub mod error;
pub mod image;
pub mod math;
