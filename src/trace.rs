//! Trace post-processing: distills one instance's raw trace into branch
//! coverage keys, heuristically flagged bug sites, and a reconstructed call
//! tree with revert flags.
//!
//! The overflow/underflow heuristics flag "the true result would exceed
//! 2^256"; they do not model the wrapped 256-bit result the contract
//! actually observed. This is fuzzing guidance, not an arithmetic oracle.

use std::fmt;

use ethnum::U256;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::MalformedTraceError;
use crate::exec::{BugEvent, CallEvent, InstanceTraces, Opcode};

/// Heuristic classification of one flagged bug site. Displays as the label
/// consumed by external reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BugClass {
    Overflow,
    Underflow,
    SelfDestruct,
    TxOrigin,
}

impl fmt::Display for BugClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BugClass::Overflow => "overflow",
            BugClass::Underflow => "underflow",
            BugClass::SelfDestruct => "self destruct",
            BugClass::TxOrigin => "tx.origin",
        };
        f.write_str(label)
    }
}

impl Serialize for BugClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BugRecord {
    pub pc: u64,
    pub class: BugClass,
}

/// One genuine call of the reconstructed call tree; sentinels are consumed
/// during reconstruction and never emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub pc: u64,
    pub opcode: Opcode,
    pub to: String,
    pub value: Value,
    pub revert: bool,
}

/// Distilled per-instance trace handed to fuzz-feedback and reporting
/// logic. Branch entry order follows the raw trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimplifiedTrace {
    /// Coverage-map key `"{pc},{missed_destination}"` paired with the
    /// branch-flip distance.
    pub missed_branches: Vec<(String, u64)>,
    /// Coverage-map key `"{pc},{destination}"`.
    pub covered_branches: Vec<String>,
    pub bugs: Vec<BugRecord>,
    pub calls: Vec<CallRecord>,
}

/// Distill one instance's raw trace sections. Instances never interact;
/// callers invoke this once per lane.
pub fn analyze(
    traces: &InstanceTraces,
    detect_bugs: bool,
) -> Result<SimplifiedTrace, MalformedTraceError> {
    let mut out = SimplifiedTrace::default();
    for branch in &traces.branches {
        out.missed_branches.push((
            format!("{},{}", branch.pc, branch.missed_destination),
            branch.distance,
        ));
        out.covered_branches
            .push(format!("{},{}", branch.pc, branch.destination));
    }
    if detect_bugs {
        out.bugs = extract_bugs(&traces.bugs)?;
    }
    out.calls = reconstruct_calls(&traces.calls);
    Ok(out)
}

fn extract_bugs(events: &[BugEvent]) -> Result<Vec<BugRecord>, MalformedTraceError> {
    let mut bugs = Vec::new();
    let mut unrecognized = 0u64;
    for ev in events {
        let class = match ev.opcode {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Exp => {
                let op1 = parse_operand(ev, &ev.operand_1)?;
                let op2 = parse_operand(ev, &ev.operand_2)?;
                match ev.opcode {
                    Opcode::Add if add_exceeds(op1, op2) => Some(BugClass::Overflow),
                    Opcode::Sub if op1 < op2 => Some(BugClass::Underflow),
                    Opcode::Mul if mul_exceeds(op1, op2) => Some(BugClass::Overflow),
                    Opcode::Exp if exp_exceeds(op1, op2) => Some(BugClass::Overflow),
                    _ => None,
                }
            }
            Opcode::SelfDestruct => Some(BugClass::SelfDestruct),
            Opcode::Origin => Some(BugClass::TxOrigin),
            _ => {
                // not a recognized pattern; a known incompleteness, not an error
                unrecognized += 1;
                log::debug!("pc {}: unrecognized bug opcode {}, ignored", ev.pc, ev.opcode);
                None
            }
        };
        if let Some(class) = class {
            bugs.push(BugRecord { pc: ev.pc, class });
        }
    }
    if unrecognized > 0 {
        log::debug!("{} unrecognized bug events ignored this instance", unrecognized);
    }
    Ok(bugs)
}

fn parse_operand(ev: &BugEvent, operand: &Option<String>) -> Result<U256, MalformedTraceError> {
    let bad = |reason: String| MalformedTraceError::BadOperand {
        pc: ev.pc,
        opcode: ev.opcode.to_string(),
        reason,
    };
    let raw = operand
        .as_deref()
        .ok_or_else(|| bad("operand missing".to_string()))?;
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    U256::from_str_radix(digits, 16).map_err(|e| bad(format!("{:?}: {}", raw, e)))
}

/// `a + b > 2^256`, exactly. The wrapped sum is zero precisely when the
/// true sum equals 2^256, which strict `>` does not flag.
fn add_exceeds(a: U256, b: U256) -> bool {
    let (sum, carried) = a.overflowing_add(b);
    carried && sum != 0
}

/// `a * b > 2^256`, exactly. An overflowing product equals 2^256 only when
/// both factors are powers of two whose exponents sum to 256.
fn mul_exceeds(a: U256, b: U256) -> bool {
    if a.checked_mul(b).is_some() {
        return false;
    }
    !(a.count_ones() == 1 && b.count_ones() == 1 && a.trailing_zeros() + b.trailing_zeros() == 256)
}

/// `a ^ b > 2^256`, exactly, without materializing huge powers.
fn exp_exceeds(base: U256, exp: U256) -> bool {
    if base <= U256::new(1) {
        return false;
    }
    if exp > U256::new(256) {
        // base >= 2, so the power is at least 2^257
        return true;
    }
    let exp = exp.as_u32();
    if base.count_ones() == 1 {
        return u64::from(base.trailing_zeros()) * u64::from(exp) > 256;
    }
    // base has an odd factor, so no power of it can equal 2^256 exactly;
    // overflowing out of 256 bits means strictly greater
    let mut acc = U256::new(1);
    for _ in 0..exp {
        acc = match acc.checked_mul(base) {
            Some(v) => v,
            None => return true,
        };
    }
    false
}

/// Rebuild the call tree of one instance from the raw call sequence. A
/// `pc == 0` sentinel reverts the nearest call not yet marked reverted, a
/// LIFO approximation of call-stack unwinding that needs no call-depth
/// bookkeeping from the executor. Reentrant patterns that break the LIFO
/// assumption are a known limitation.
pub fn reconstruct_calls(events: &[CallEvent]) -> Vec<CallRecord> {
    let mut calls: Vec<CallRecord> = Vec::new();
    for ev in events {
        if ev.pc != 0 {
            calls.push(CallRecord {
                pc: ev.pc,
                opcode: ev.opcode.clone(),
                to: ev.to.clone(),
                value: ev.value.clone(),
                revert: false,
            });
            continue;
        }
        // sentinel with no open call left has no effect
        if let Some(open) = calls.iter_mut().rev().find(|call| !call.revert) {
            open.revert = true;
        }
    }
    calls
}
