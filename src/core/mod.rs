//! Core data model, collaborator traits, constants, and error types.
//!
//! This module has no runtime state; everything else builds on it.

mod constants;
mod error;
mod feature;
mod snapshot;
mod traits;

pub use constants::*;
pub use error::*;
pub use feature::*;
pub use snapshot::*;
pub use traits::*;
