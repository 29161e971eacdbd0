//! Batch Driver: one round = merge the transaction batch, execute every
//! lane as a single blocking batch, fold post-state, distill the traces.

use crate::error::{HarnessError, MalformedTraceError};
use crate::exec::BatchExecutor;
use crate::model::TxOverride;
use crate::state::InstanceSet;
use crate::trace::{self, SimplifiedTrace};

/// Drives rounds of batched transactions against a fixed-size lane
/// collection, carrying each lane's state forward between rounds. The
/// entry point for external fuzzing/orchestration logic.
pub struct Harness<E> {
    set: InstanceSet,
    executor: E,
    /// When false, bug extraction is skipped; branch coverage and call
    /// trees are still produced.
    detect_bugs: bool,
}

impl<E: BatchExecutor> Harness<E> {
    pub fn new(set: InstanceSet, executor: E, detect_bugs: bool) -> Self {
        Self {
            set,
            executor,
            detect_bugs,
        }
    }

    /// Run one round: one transaction override per lane, one executor
    /// call, one simplified trace per lane. Every failure aborts the whole
    /// round and propagates; nothing partial is returned and nothing is
    /// retried, since the executor is deterministic for identical input.
    pub fn run_round(
        &mut self,
        batch: &[TxOverride],
    ) -> Result<Vec<SimplifiedTrace>, HarnessError> {
        self.set.apply_batch(batch)?;

        log::debug!(
            "executing round: {} instances, detect_bugs={}",
            self.set.len(),
            self.detect_bugs
        );
        let result = self
            .executor
            .execute(self.set.instances())
            .map_err(|e| HarnessError::Exec(Box::new(e)))?;
        if result.post.len() != self.set.len() {
            return Err(MalformedTraceError::PostLenMismatch {
                expected: self.set.len(),
                got: result.post.len(),
            }
            .into());
        }

        self.set.fold_post_state(&result)?;

        let mut round = Vec::with_capacity(result.post.len());
        for post in &result.post {
            round.push(trace::analyze(&post.traces, self.detect_bugs)?);
        }
        Ok(round)
    }

    pub fn instances(&self) -> &InstanceSet {
        &self.set
    }

    /// Direct lane access for debugging scenarios between rounds.
    pub fn instances_mut(&mut self) -> &mut InstanceSet {
        &mut self.set
    }

    /// Hand the lane collection back, consuming the harness.
    pub fn into_instances(self) -> InstanceSet {
        self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PreconditionError;
    use crate::exec::{
        BranchEvent, BugEvent, CallEvent, InstanceTraces, Opcode, PostInstanceResult,
        RawTraceResult,
    };
    use crate::model::{Instance, RunOverrides, SeedTemplate, DEFAULT_SENDER};
    use crate::trace::BugClass;
    use serde_json::json;
    use std::convert::Infallible;

    const TARGET: &str = "0xcccccccccccccccccccccccccccccccccccccccc";

    fn seeded(num: usize) -> InstanceSet {
        let template: SeedTemplate = serde_json::from_value(json!({
            "target_address": TARGET,
            "env": { "currentNumber": "0x1" },
            "pre": {
                TARGET: { "balance": "0x0" },
                DEFAULT_SENDER: { "balance": "0xffffffff", "nonce": "0x0" }
            },
            "transaction": { "gasprice": "0x0a" }
        }))
        .unwrap();
        InstanceSet::seed(&template, &RunOverrides::default(), "0x6000", num, None).unwrap()
    }

    fn batch(num: usize) -> Vec<TxOverride> {
        (0..num)
            .map(|i| TxOverride {
                data: vec![format!("0x{:02x}", i)],
                value: vec![json!("0x0")],
                sender: None,
            })
            .collect()
    }

    /// Echoes each instance's pre-state back as post-state with the sender
    /// nonce incremented, plus canned trace sections.
    struct MockExecutor {
        traces: InstanceTraces,
        rounds: std::rc::Rc<std::cell::Cell<usize>>,
    }

    impl MockExecutor {
        fn new(traces: InstanceTraces) -> Self {
            Self {
                traces,
                rounds: Default::default(),
            }
        }
    }

    impl BatchExecutor for MockExecutor {
        type Error = Infallible;

        fn execute(&mut self, instances: &[Instance]) -> Result<RawTraceResult, Infallible> {
            self.rounds.set(self.rounds.get() + 1);
            let post = instances
                .iter()
                .map(|instance| {
                    let mut state = instance.pre.clone();
                    let sender = state.get_mut(DEFAULT_SENDER).unwrap();
                    let nonce =
                        u64::from_str_radix(sender.nonce.trim_start_matches("0x"), 16).unwrap();
                    sender.nonce = format!("0x{:x}", nonce + 1);
                    PostInstanceResult {
                        state,
                        traces: self.traces.clone(),
                    }
                })
                .collect();
            Ok(RawTraceResult { post })
        }
    }

    struct FailingExecutor;

    impl BatchExecutor for FailingExecutor {
        type Error = std::io::Error;

        fn execute(&mut self, _: &[Instance]) -> Result<RawTraceResult, std::io::Error> {
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "engine hang"))
        }
    }

    fn sample_traces() -> InstanceTraces {
        InstanceTraces {
            branches: vec![BranchEvent {
                pc: 10,
                destination: 20,
                missed_destination: 30,
                distance: 4,
            }],
            bugs: vec![BugEvent {
                pc: 5,
                opcode: Opcode::Sub,
                operand_1: Some("0x1".to_string()),
                operand_2: Some("0x2".to_string()),
            }],
            calls: vec![
                CallEvent {
                    pc: 1,
                    opcode: Opcode::Call,
                    to: TARGET.to_string(),
                    value: json!("0x0"),
                },
                CallEvent {
                    pc: 0,
                    opcode: Opcode::from_byte(0),
                    to: String::new(),
                    value: json!("0x0"),
                },
            ],
        }
    }

    #[test]
    fn round_returns_one_trace_per_instance_and_folds_state() {
        let mut harness = Harness::new(seeded(2), MockExecutor::new(sample_traces()), true);
        let round = harness.run_round(&batch(2)).unwrap();
        assert_eq!(round.len(), 2);
        for trace in &round {
            assert_eq!(trace.missed_branches, vec![("10,30".to_string(), 4)]);
            assert_eq!(trace.covered_branches, vec!["10,20".to_string()]);
            assert_eq!(trace.bugs.len(), 1);
            assert_eq!(trace.bugs[0].class, BugClass::Underflow);
            assert_eq!(trace.calls.len(), 1);
            assert!(trace.calls[0].revert);
        }
        for instance in harness.instances().instances() {
            assert_eq!(instance.transaction.nonce, "0x1");
            assert_eq!(instance.pre[DEFAULT_SENDER].nonce, "0x1");
        }
    }

    #[test]
    fn nonce_advances_monotonically_across_rounds() {
        let mut harness = Harness::new(seeded(1), MockExecutor::new(Default::default()), true);
        for expected in ["0x1", "0x2", "0x3"].iter() {
            harness.run_round(&batch(1)).unwrap();
            assert_eq!(harness.instances().instances()[0].transaction.nonce, *expected);
        }
    }

    #[test]
    fn batch_length_mismatch_never_reaches_the_executor() {
        let executor = MockExecutor::new(Default::default());
        let rounds = executor.rounds.clone();
        let mut harness = Harness::new(seeded(2), executor, true);
        match harness.run_round(&batch(3)) {
            Err(HarnessError::Precondition(PreconditionError::BatchLenMismatch {
                expected: 2,
                got: 3,
            })) => {}
            other => panic!("expected BatchLenMismatch, got {:?}", other.map(|_| ())),
        }
        assert_eq!(rounds.get(), 0);
    }

    #[test]
    fn executor_failure_surfaces_and_leaves_state_unfolded() {
        let mut harness = Harness::new(seeded(1), FailingExecutor, true);
        let before = harness.instances().instances()[0].clone();
        match harness.run_round(&batch(1)) {
            Err(HarnessError::Exec(_)) => {}
            other => panic!("expected Exec error, got {:?}", other.map(|_| ())),
        }
        // the batch merge ran, but nothing was folded: the precondition
        // state and the sender-tracked nonce are untouched
        let after = &harness.instances().instances()[0];
        assert_eq!(after.pre, before.pre);
        assert_eq!(after.transaction.nonce, before.transaction.nonce);
        // the merge itself did land, as it does on any round
        assert_eq!(after.transaction.value, vec![json!("0x0")]);
        assert_ne!(after.transaction.value, before.transaction.value);
    }

    #[test]
    fn detect_bugs_off_suppresses_bug_records_only() {
        let mut harness = Harness::new(seeded(1), MockExecutor::new(sample_traces()), false);
        let round = harness.run_round(&batch(1)).unwrap();
        assert!(round[0].bugs.is_empty());
        assert_eq!(round[0].covered_branches.len(), 1);
        assert_eq!(round[0].calls.len(), 1);
    }

    #[test]
    fn wire_format_round_trip_through_json() {
        // instances serialize to the executor's JSON shape and a raw JSON
        // result folds back, end to end
        let mut set = seeded(1);
        let wire = serde_json::to_value(set.instances()).unwrap();
        assert_eq!(wire[0]["transaction"]["to"], json!(TARGET));
        assert_eq!(wire[0]["transaction"]["gasprice"], json!("0x0a"));

        let result: RawTraceResult = serde_json::from_value(json!({
            "post": [{
                "state": {
                    TARGET: { "code": "0x6000", "storage": { "0x00": "0x2a" } },
                    DEFAULT_SENDER: { "balance": "0xfffffffe", "nonce": "0x1" }
                },
                "traces": {
                    "branches": [
                        { "pc": 7, "destination": 9, "missed_destination": 13, "distance": 2 }
                    ],
                    "bugs": [
                        { "pc": 3, "opcode": 1,
                          "operand_1": "0xfffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffe",
                          "operand_2": "0x3" }
                    ],
                    "calls": [
                        { "pc": 4, "opcode": 0xf1, "to": TARGET, "value": "0x0" },
                        { "pc": 0, "opcode": 0, "to": "", "value": "0x0" }
                    ]
                }
            }]
        }))
        .unwrap();
        set.fold_post_state(&result).unwrap();
        assert_eq!(set.instances()[0].pre[TARGET].storage["0x00"], "0x2a");
        assert_eq!(set.instances()[0].transaction.nonce, "0x1");

        let trace = crate::trace::analyze(&result.post[0].traces, true).unwrap();
        assert_eq!(trace.missed_branches, vec![("7,13".to_string(), 2)]);
        assert_eq!(trace.bugs[0].class, BugClass::Overflow);
        assert_eq!(trace.calls[0].opcode, Opcode::Call);
        assert!(trace.calls[0].revert);
    }
}
