//! evmlane: a persistent-state fuzzing harness for EVM smart contracts.
//!
//! The harness clones one seeded contract state into `num_instances`
//! independent lanes, drives all lanes through rounds of transactions via
//! an external batch executor, folds each lane's post-state back as the
//! precondition of its next round, and distills the raw execution traces
//! into branch-coverage keys, heuristic bug findings, and reconstructed
//! call trees with revert flags.

pub mod error;
pub mod exec;
pub mod harness;
pub mod model;
pub mod state;
pub mod trace;

pub use error::{HarnessError, MalformedTraceError, PreconditionError};
pub use exec::BatchExecutor;
pub use harness::Harness;
pub use state::InstanceSet;
