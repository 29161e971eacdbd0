//! Instance State Manager: owns the ordered lane collection between rounds.
//! Seeds N deep-independent clones of the initial contract state, merges
//! per-round transaction batches into them, and folds executor post-state
//! back into each lane as the precondition of the next round.

use crate::error::{MalformedTraceError, PreconditionError};
use crate::exec::RawTraceResult;
use crate::model::{
    Address, Instance, RunOverrides, SeedTemplate, TransactionSpec, TxOverride,
};

/// The ordered, fixed-length collection of fuzzing lanes. Exclusively owns
/// every instance's state between rounds; during an executor call the
/// collection is handed out read-only and frozen until results fold back.
#[derive(Debug, Clone)]
pub struct InstanceSet {
    instances: Vec<Instance>,
    /// Fixed sender address whose post-state nonce feeds the next round's
    /// transaction nonce. Per-round sender overrides do not move it.
    sender: Address,
}

impl InstanceSet {
    /// Clone the initial contract state `num_instances` ways: the compiled
    /// runtime bytecode lands at the template's target address, the per-run
    /// storage preset replaces that account's storage, extra pre-state
    /// accounts are merged in, and the uniform default transaction is
    /// applied. Each clone owns its state; mutating one lane never affects
    /// another.
    pub fn seed(
        template: &SeedTemplate,
        overrides: &RunOverrides,
        code: &str,
        num_instances: usize,
        sender: Option<&str>,
    ) -> Result<Self, PreconditionError> {
        if num_instances == 0 {
            return Err(PreconditionError::NoInstances);
        }
        if template.target_address.is_empty() {
            return Err(PreconditionError::MissingConfig("target_address"));
        }
        let mut pre = template.pre.clone();
        let target = pre
            .get_mut(&template.target_address)
            .ok_or(PreconditionError::MissingConfig("pre[target_address]"))?;
        target.code = code.to_string();
        target.storage = overrides.storage.clone();
        for (addr, account) in &overrides.pre {
            pre.insert(addr.clone(), account.clone());
        }

        let sender = sender.unwrap_or(crate::model::DEFAULT_SENDER);
        let transaction =
            TransactionSpec::from_template(&template.transaction, &template.target_address, sender);
        let sender = transaction.sender.clone();

        let seed = Instance {
            env: template.env.clone(),
            pre,
            transaction,
        };
        Ok(Self {
            instances: vec![seed; num_instances],
            sender,
        })
    }

    /// Merge one round's transaction overrides into the lanes, a partial
    /// merge that leaves absent fields untouched. The batch must be
    /// length-matched to the lane collection.
    pub fn apply_batch(&mut self, batch: &[TxOverride]) -> Result<(), PreconditionError> {
        if batch.len() != self.instances.len() {
            return Err(PreconditionError::BatchLenMismatch {
                expected: self.instances.len(),
                got: batch.len(),
            });
        }
        for (instance, tx) in self.instances.iter_mut().zip(batch) {
            instance.transaction.data = tx.data.clone();
            instance.transaction.value = tx.value.clone();
            if let Some(sender) = &tx.sender {
                instance.transaction.sender = sender.clone();
            }
        }
        Ok(())
    }

    /// Replace every lane's precondition with its own post-execution state
    /// (the whole account universe the executor observed) and refresh the
    /// transaction nonce from the sender account, so each lane continues as
    /// an independent chain picking up where it left off.
    ///
    /// The whole result is validated before any lane is touched; a
    /// malformed result leaves the set unchanged.
    pub fn fold_post_state(&mut self, result: &RawTraceResult) -> Result<(), MalformedTraceError> {
        if result.post.len() != self.instances.len() {
            return Err(MalformedTraceError::PostLenMismatch {
                expected: self.instances.len(),
                got: result.post.len(),
            });
        }
        for (i, post) in result.post.iter().enumerate() {
            // the sender paid gas, so the executor must report its account
            if !post.state.contains_key(&self.sender) {
                return Err(MalformedTraceError::MissingSender {
                    instance: i,
                    sender: self.sender.clone(),
                });
            }
        }
        for (instance, post) in self.instances.iter_mut().zip(&result.post) {
            instance.pre = post.state.clone();
            instance.transaction.nonce = post.state[&self.sender].nonce.clone();
        }
        Ok(())
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Direct lane access for debugging scenarios that poke individual
    /// instance state between rounds.
    pub fn instance_mut(&mut self, index: usize) -> Option<&mut Instance> {
        self.instances.get_mut(index)
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Debug dump of every lane through the log facade.
    pub fn log_instances(&self) {
        for (i, instance) in self.instances.iter().enumerate() {
            match serde_json::to_string_pretty(instance) {
                Ok(doc) => log::debug!("instance {}:\n{}", i, doc),
                Err(e) => log::debug!("instance {}: <unserializable: {}>", i, e),
            }
        }
    }
}
