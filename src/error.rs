use thiserror::Error;

/// The caller handed the harness inputs that violate the round contract.
/// Fatal to the round; never truncated, padded or retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("transaction batch has {got} entries, expected {expected} (one per instance)")]
    BatchLenMismatch { expected: usize, got: usize },
    #[error("missing required config field: {0}")]
    MissingConfig(&'static str),
    #[error("num_instances must be non-zero")]
    NoInstances,
}

/// The executor returned a result this harness cannot interpret. Fatal to
/// the round and surfaced to the caller; retrying a deterministic executor
/// would reproduce the same result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedTraceError {
    #[error("post state has {got} entries, expected {expected} (one per instance)")]
    PostLenMismatch { expected: usize, got: usize },
    #[error("instance {instance}: post state is missing sender account {sender}")]
    MissingSender { instance: usize, sender: String },
    #[error("pc {pc}: arithmetic bug event {opcode} has bad operand: {reason}")]
    BadOperand {
        pc: u64,
        opcode: String,
        reason: String,
    },
}

/// Round-level error of the batch driver.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("precondition: {0}")]
    Precondition(#[from] PreconditionError),
    #[error("malformed trace: {0}")]
    MalformedTrace(#[from] MalformedTraceError),
    /// Internal error of the external executor.
    #[error("executor: {0}")]
    Exec(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}
