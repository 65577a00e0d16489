//! Error types for the scaling engine.
//!
//! Only configuration problems surface as errors. Once a run is started,
//! cancellation, idle shutdown and recovered panics are all observed through
//! the output stream closing, never through a `Result`.

pub type Result<T> = core::result::Result<T, Error>;

/// All errors `surge` can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// [`crate::Scaler::exec`] was called without a transform.
    ///
    /// Detected synchronously, before any task or timer is started.
    #[error("invalid scaler config: no intercept function set")]
    MissingIntercept,
}
