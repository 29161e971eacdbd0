//! Passive data shapes shared by the state manager and the executor
//! boundary: accounts, environments, per-instance precondition/transaction
//! pairs, and the seed-time configuration documents.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hex-encoded 160-bit address, as it appears on the wire.
pub type Address = String;
/// Hex word -> hex word storage mapping of one account.
pub type StorageMap = FxHashMap<String, String>;
/// Address -> account mapping of one instance's pre/post state.
pub type AccountMap = FxHashMap<Address, Account>;

/// Sender used when the caller does not pick one. The executor expects this
/// account to exist in the default pre-state.
pub const DEFAULT_SENDER: &str = "0x1111111111111111111111111111111111111111";

fn zero_word() -> String {
    "0x0".to_string()
}

/// One account of the pre/post state universe. Field defaults mirror what
/// the executor assumes for absent fields. Mutated only by folding
/// post-execution state, never mid-round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub storage: StorageMap,
    #[serde(default = "zero_word")]
    pub balance: String,
    #[serde(default = "zero_word")]
    pub nonce: String,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            code: String::new(),
            storage: StorageMap::default(),
            balance: zero_word(),
            nonce: zero_word(),
        }
    }
}

/// Transaction of one instance. `data` and `value` are ordered sequences
/// because one "transaction" may be a multi-call sequence within one
/// instance; their length correspondence is the executor's contract and is
/// not validated here. `extra` carries the remaining fields of the
/// configured transaction document (gas price, gas limit, ...) to the
/// executor untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSpec {
    pub to: Address,
    pub data: Vec<String>,
    pub value: Vec<Value>,
    pub nonce: String,
    pub sender: Address,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One fuzzing lane: an independent cloned execution state progressing
/// through its own transaction sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Fixed execution context (block number, timestamp, gas limits, ...).
    /// Opaque to the harness, copied verbatim per instance.
    pub env: Value,
    pub pre: AccountMap,
    pub transaction: TransactionSpec,
}

/// Per-instance transaction override supplied by the fuzz driver each
/// round. Absent fields are left untouched on the instance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxOverride {
    pub data: Vec<String>,
    pub value: Vec<Value>,
    #[serde(default)]
    pub sender: Option<Address>,
}

/// The shared default account/environment document. Loading it from disk is
/// the caller's concern; it is threaded into seeding as a value so that
/// multiple harnesses in one process stay independent.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedTemplate {
    pub env: Value,
    pub pre: AccountMap,
    /// Default transaction document; known fields are overridden at seed
    /// time, the rest passes through as `extra`.
    #[serde(default)]
    pub transaction: Map<String, Value>,
    pub target_address: Address,
}

/// Per-run overrides for one contract under test: storage preset for the
/// target and extra pre-state accounts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunOverrides {
    #[serde(default)]
    pub contract_name: Option<String>,
    #[serde(default)]
    pub storage: StorageMap,
    #[serde(default)]
    pub pre: AccountMap,
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            // non-string form of a known field still overrides the default
            Some(other.to_string())
        }
        None => None,
    }
}

impl TransactionSpec {
    /// Build the uniform default transaction applied to every instance at
    /// seed time, on top of the template's transaction document.
    pub fn from_template(template: &Map<String, Value>, target: &str, sender: &str) -> Self {
        let mut extra = template.clone();
        // known fields get fixed defaults regardless of the template
        extra.remove("to");
        extra.remove("data");
        extra.remove("value");
        extra.remove("nonce");
        let sender = take_string(&mut extra, "sender").unwrap_or_else(|| sender.to_string());
        Self {
            to: target.to_string(),
            data: vec!["0x00".to_string()],
            value: vec![Value::from(0)],
            nonce: "0x00".to_string(),
            sender,
            extra,
        }
    }
}
