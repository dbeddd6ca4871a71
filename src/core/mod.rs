//! Core types and traits for the training and evaluation engine

pub mod error;
pub mod progress;
pub mod traits;
pub mod types;

pub use self::error::*;
pub use self::progress::*;
pub use self::traits::*;
pub use self::types::*;
