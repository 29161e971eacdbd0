//! The executor boundary: the batch-executing seam the harness drives, and
//! the raw trace records it returns. Record shapes are validated here, at
//! the boundary, so malformed executor output is rejected before analysis.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::model::{AccountMap, Instance};

/// External smart-contract execution engine. One call executes the whole
/// instance collection as a single blocking batch; the engine may
/// parallelize internally, but no partial results exist. This is the only
/// suspension point of a round.
pub trait BatchExecutor {
    type Error: std::error::Error + Send + Sync + 'static;

    fn execute(&mut self, instances: &[Instance]) -> Result<RawTraceResult, Self::Error>;
}

/// Opcode of one trace event. The engine reports raw opcode bytes, older
/// trace formats report mnemonics; both normalize to the same value here.
/// Opcodes outside the recognized set are preserved for display but carry
/// no recognized bug/call semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    Add,
    Mul,
    Sub,
    Exp,
    Origin,
    SelfDestruct,
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
    Other(Box<str>),
}

impl Opcode {
    pub fn from_byte(byte: u64) -> Self {
        match byte {
            0x01 => Opcode::Add,
            0x02 => Opcode::Mul,
            0x03 => Opcode::Sub,
            0x0a => Opcode::Exp,
            0x32 => Opcode::Origin,
            0xf0 => Opcode::Create,
            0xf1 => Opcode::Call,
            0xf2 => Opcode::CallCode,
            0xf4 => Opcode::DelegateCall,
            0xf5 => Opcode::Create2,
            0xfa => Opcode::StaticCall,
            0xff => Opcode::SelfDestruct,
            other => Opcode::Other(format!("0x{:02x}", other).into_boxed_str()),
        }
    }

    pub fn from_mnemonic(s: &str) -> Self {
        match s {
            "ADD" => Opcode::Add,
            "MUL" => Opcode::Mul,
            "SUB" => Opcode::Sub,
            "EXP" => Opcode::Exp,
            "ORIGIN" => Opcode::Origin,
            "CREATE" => Opcode::Create,
            "CALL" => Opcode::Call,
            "CALLCODE" => Opcode::CallCode,
            "DELEGATECALL" => Opcode::DelegateCall,
            "CREATE2" => Opcode::Create2,
            "STATICCALL" => Opcode::StaticCall,
            "SELFDESTRUCT" => Opcode::SelfDestruct,
            other => Opcode::Other(other.into()),
        }
    }

    pub fn is_arith(&self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Mul | Opcode::Sub | Opcode::Exp
        )
    }

    pub fn mnemonic(&self) -> &str {
        match self {
            Opcode::Add => "ADD",
            Opcode::Mul => "MUL",
            Opcode::Sub => "SUB",
            Opcode::Exp => "EXP",
            Opcode::Origin => "ORIGIN",
            Opcode::SelfDestruct => "SELFDESTRUCT",
            Opcode::Call => "CALL",
            Opcode::CallCode => "CALLCODE",
            Opcode::DelegateCall => "DELEGATECALL",
            Opcode::StaticCall => "STATICCALL",
            Opcode::Create => "CREATE",
            Opcode::Create2 => "CREATE2",
            Opcode::Other(s) => s,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl Serialize for Opcode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.mnemonic())
    }
}

impl<'de> Deserialize<'de> for Opcode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OpcodeVisitor;

        impl<'de> Visitor<'de> for OpcodeVisitor {
            type Value = Opcode;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an opcode byte or mnemonic string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Opcode, E> {
                Ok(Opcode::from_byte(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Opcode, E> {
                if v < 0 {
                    return Err(E::custom(format!("negative opcode {}", v)));
                }
                Ok(Opcode::from_byte(v as u64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Opcode, E> {
                Ok(Opcode::from_mnemonic(v))
            }
        }

        deserializer.deserialize_any(OpcodeVisitor)
    }
}

/// One branch instruction's taken/not-taken targets plus the heuristic
/// distance to flipping the outcome, used as fuzzing guidance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BranchEvent {
    pub pc: u64,
    pub destination: u64,
    pub missed_destination: u64,
    pub distance: u64,
}

/// One potential-bug site reported by the engine's detectors. Operands are
/// present only for the arithmetic opcodes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BugEvent {
    pub pc: u64,
    pub opcode: Opcode,
    #[serde(default)]
    pub operand_1: Option<String>,
    #[serde(default)]
    pub operand_2: Option<String>,
}

/// One call-site event. A `pc == 0` entry is a revert sentinel, not a real
/// call: it signals that the most recent still-open call reverted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallEvent {
    pub pc: u64,
    pub opcode: Opcode,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub value: Value,
}

/// Raw trace sections of one instance. Sections absent on the wire are
/// treated as empty, matching engines that only emit what they observed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InstanceTraces {
    #[serde(default)]
    pub branches: Vec<BranchEvent>,
    #[serde(default)]
    pub bugs: Vec<BugEvent>,
    #[serde(default)]
    pub calls: Vec<CallEvent>,
}

/// Post-execution view of one instance: the whole account universe as
/// observed after the round, plus the raw trace.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostInstanceResult {
    pub state: AccountMap,
    #[serde(default)]
    pub traces: InstanceTraces,
}

/// Batch result of one executor call, index-aligned with the instance
/// collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTraceResult {
    pub post: Vec<PostInstanceResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn opcode_accepts_byte_and_mnemonic() {
        let byte: Opcode = serde_json::from_value(json!(0x01)).unwrap();
        let name: Opcode = serde_json::from_value(json!("ADD")).unwrap();
        assert_eq!(byte, Opcode::Add);
        assert_eq!(byte, name);

        let unknown: Opcode = serde_json::from_value(json!(0x42)).unwrap();
        assert_eq!(unknown, Opcode::Other("0x42".into()));
        assert_eq!(unknown.to_string(), "0x42");
    }

    #[test]
    fn opcode_rejects_negative_byte() {
        assert!(serde_json::from_value::<Opcode>(json!(-1)).is_err());
    }

    #[test]
    fn raw_trace_tolerates_absent_sections() {
        let raw: RawTraceResult = serde_json::from_value(json!({
            "post": [{
                "state": {
                    "0x1111111111111111111111111111111111111111": { "nonce": "0x1" }
                }
            }]
        }))
        .unwrap();
        assert_eq!(raw.post.len(), 1);
        assert!(raw.post[0].traces.branches.is_empty());
        assert!(raw.post[0].traces.bugs.is_empty());
        assert!(raw.post[0].traces.calls.is_empty());
    }

    #[test]
    fn bug_event_parses_numeric_opcode_with_operands() {
        let ev: BugEvent = serde_json::from_value(json!({
            "pc": 42,
            "opcode": 0x03,
            "operand_1": "0x1",
            "operand_2": "0x2"
        }))
        .unwrap();
        assert_eq!(ev.opcode, Opcode::Sub);
        assert!(ev.opcode.is_arith());
        assert_eq!(ev.operand_1.as_deref(), Some("0x1"));
    }

    #[test]
    fn post_result_requires_state() {
        // a post entry without its state map is rejected at the boundary
        assert!(serde_json::from_value::<PostInstanceResult>(json!({ "traces": {} })).is_err());
    }
}
