//! Error taxonomy for the combiner protocol.
//!
//! Every error here is fatal for the enclosing task. The core performs no
//! retries; the host pipeline owns restart policy at the task level.

use thiserror::Error;

/// Errors surfaced by the combiner core.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// A function reference could not be resolved: unknown module, failed
    /// module init, or undefined symbol. A missing user function is a
    /// configuration error, not a transient fault, so the task aborts
    /// without retry.
    #[error("cannot resolve aggregate function `{module}/{symbol}`: {reason}")]
    Resolution {
        module: String,
        symbol: String,
        reason: String,
    },

    /// A wire payload could not be decoded or an accumulator could not be
    /// encoded. Indicates data corruption or a schema mismatch between the
    /// partial and final stages.
    #[error("codec failure while {context}")]
    Codec {
        context: &'static str,
        #[source]
        source: bincode::Error,
    },

    /// A user-supplied prepare/reduce/combine raised. Retrying with the
    /// same input would not help, so the failure propagates as-is.
    #[error("user aggregate function failed in `{phase}`")]
    UserFunction {
        phase: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A lifecycle call arrived out of order (fold before group start,
    /// close with no open group) or group state was corrupted.
    #[error("aggregator lifecycle violation: {0}")]
    Lifecycle(String),

    /// Assembly construction was given an invalid configuration.
    #[error("invalid aggregation assembly: {0}")]
    Assembly(String),
}

/// Result alias used throughout the crate.
pub type Result<T, E = AggregateError> = std::result::Result<T, E>;
