#![doc = include_str!("../README.md")]

mod error;
mod handoff;
mod intercept;
mod recover;
pub mod relay;
mod scaler;
#[cfg(test)]
mod test_utils;
mod timer;
mod worker;

pub use crate::error::*;
pub use crate::intercept::Intercept;
pub use crate::scaler::{MIN_LIFE, MIN_WAIT, Scaler};
// Re-exported so callers can build tokens without naming `tokio-util`.
pub use tokio_util::sync::CancellationToken;
