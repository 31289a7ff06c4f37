/// Error taxonomy for pipeline execution
///
/// Resolution problems never show up here: bad paths resolve to nothing.
/// Everything else that can fail a node, or the whole run, is an `ExecError`.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// The spec itself is unusable; fatal to the run
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// A node definition that can't be compiled into a request
    #[error("invalid node '{node}': {reason}")]
    InvalidNode { node: String, reason: String },

    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed after {attempts} attempt(s): {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("fallback declared but not supported; failed after {attempts} attempt(s): {message}")]
    FallbackUnsupported { attempts: u32, message: String },

    #[error("all {failed} fan-out call(s) failed; last error: {message}")]
    FanoutFailed { failed: usize, attempts: u32, message: String },

    #[error("unknown transform function: {0}")]
    UnknownTransform(String),

    #[error("invalid arguments for {function}: {reason}")]
    TransformArgs { function: String, reason: String },

    #[error("{function} failed: {reason}")]
    Transform { function: String, reason: String },
}

impl ExecError {
    /// Attempt count carried by the error (0 for non-HTTP failures)
    pub fn attempts(&self) -> u32 {
        match self {
            ExecError::RetriesExhausted { attempts, .. }
            | ExecError::FallbackUnsupported { attempts, .. }
            | ExecError::FanoutFailed { attempts, .. } => *attempts,
            ExecError::Timeout(_) | ExecError::Transport(_) | ExecError::Status { .. } => 1,
            _ => 0,
        }
    }

    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Timeout(_) | ExecError::Transport(_) | ExecError::Status { .. }
        )
    }
}
