//! Common types for the lost-and-found client workspace

mod error;

pub use error::{Error, Result};
