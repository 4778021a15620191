//! The property-contract vocabulary and the pure propagate/validate functions
//! that implement it (`spec.md` §4.3).
//!
//! There are exactly seven properties; the vocabulary is closed by design so
//! that a `PropertyTable` can be a fixed-size array rather than a map.

use bpipe_ring::SampleType;
use std::fmt;

/// The closed property vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    DataType,
    MinBatchCapacity,
    MaxBatchCapacity,
    SamplePeriodNs,
    MinThroughputHz,
    MaxThroughputHz,
    MaxTotalSamples,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 7] = [
        PropertyKey::DataType,
        PropertyKey::MinBatchCapacity,
        PropertyKey::MaxBatchCapacity,
        PropertyKey::SamplePeriodNs,
        PropertyKey::MinThroughputHz,
        PropertyKey::MaxThroughputHz,
        PropertyKey::MaxTotalSamples,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// A property's value, or the explicit `Unknown` first-class state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyValue {
    Unknown,
    DataType(SampleType),
    UInt(u64),
}

impl PropertyValue {
    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, PropertyValue::Unknown)
    }

    fn as_uint(&self) -> Option<u64> {
        match self {
            PropertyValue::UInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Unknown => write!(f, "UNKNOWN"),
            PropertyValue::DataType(t) => write!(f, "{t}"),
            PropertyValue::UInt(v) => write!(f, "{v}"),
        }
    }
}

/// A per-port (or, for the pipeline's own cached value, standalone) snapshot
/// of all seven properties.
#[derive(Debug, Clone, Copy)]
pub struct PropertyTable {
    values: [PropertyValue; 7],
}

impl PropertyTable {
    #[must_use]
    pub fn all_unknown() -> Self {
        Self {
            values: [PropertyValue::Unknown; 7],
        }
    }

    #[must_use]
    pub fn get(&self, key: PropertyKey) -> PropertyValue {
        self.values[key.index()]
    }

    pub fn set(&mut self, key: PropertyKey, value: PropertyValue) {
        self.values[key.index()] = value;
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::all_unknown()
    }
}

/// A bitmask over input port indices (`spec.md` §4.3's "bitmask of ports").
/// 32 ports is far beyond any filter's realistic fan-in; a `u32` keeps the
/// mask a plain `Copy` value with no allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortMask(u32);

impl PortMask {
    #[must_use]
    pub fn single(port: usize) -> Self {
        Self(1 << port)
    }

    #[must_use]
    pub fn of(ports: &[usize]) -> Self {
        ports.iter().fold(Self::default(), |mask, &p| mask.with(p))
    }

    #[must_use]
    pub fn with(self, port: usize) -> Self {
        Self(self.0 | (1 << port))
    }

    #[must_use]
    pub fn contains(self, port: usize) -> bool {
        self.0 & (1 << port) != 0
    }

    pub fn ports(self) -> impl Iterator<Item = usize> {
        (0..32).filter(move |&p| self.contains(p))
    }
}

/// A single-input relational constraint (`spec.md` §4.3).
#[derive(Debug, Clone, Copy)]
pub enum ConstraintKind {
    Exists,
    Eq(PropertyValue),
    Gte(u64),
    Lte(u64),
}

#[derive(Debug, Clone, Copy)]
pub struct PortConstraint {
    pub port: usize,
    pub key: PropertyKey,
    pub kind: ConstraintKind,
}

#[derive(Debug, Clone, Copy)]
pub struct AlignmentConstraint {
    pub key: PropertyKey,
    pub ports: PortMask,
}

/// An output-port behavior (`spec.md` §4.3).
#[derive(Debug, Clone, Copy)]
pub enum BehaviorKind {
    Set(PropertyValue),
    /// Mirror the property from the named input port; `input_port` defaults
    /// to `0` at the call sites that build contracts.
    Preserve { input_port: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct OutputBehavior {
    pub port: usize,
    pub key: PropertyKey,
    pub kind: BehaviorKind,
}

/// A filter's declared contract: constraints on its inputs, behaviors on its
/// outputs. Built imperatively during construction, matching `spec.md` §4.3's
/// "declared imperatively during init by appending constraints and behaviors".
#[derive(Debug, Clone, Default)]
pub struct Contract {
    port_constraints: Vec<PortConstraint>,
    alignment_constraints: Vec<AlignmentConstraint>,
    behaviors: Vec<OutputBehavior>,
}

impl Contract {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constrain(&mut self, port: usize, key: PropertyKey, kind: ConstraintKind) -> &mut Self {
        self.port_constraints.push(PortConstraint { port, key, kind });
        self
    }

    pub fn align(&mut self, key: PropertyKey, ports: PortMask) -> &mut Self {
        self.alignment_constraints.push(AlignmentConstraint { key, ports });
        self
    }

    pub fn behave(&mut self, port: usize, key: PropertyKey, kind: BehaviorKind) -> &mut Self {
        self.behaviors.push(OutputBehavior { port, key, kind });
        self
    }

    #[must_use]
    pub fn port_constraints(&self, port: usize) -> impl Iterator<Item = &PortConstraint> {
        self.port_constraints.iter().filter(move |c| c.port == port)
    }

    #[must_use]
    pub fn alignment_constraints(&self) -> &[AlignmentConstraint] {
        &self.alignment_constraints
    }

    #[must_use]
    pub fn behaviors_for(&self, port: usize) -> impl Iterator<Item = &OutputBehavior> {
        self.behaviors.iter().filter(move |b| b.port == port)
    }
}

/// A single constraint or alignment failure, with enough context to print a
/// human-readable diagnostic (`spec.md` §4.4/§7: "full context... via an owned
/// message").
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("input port {port} requires {key:?} to be known, but it is UNKNOWN")]
    MissingProperty { port: usize, key: PropertyKey },

    #[error("input port {port} requires {key:?} == {expected}, got {actual}")]
    NotEqual {
        port: usize,
        key: PropertyKey,
        expected: PropertyValue,
        actual: PropertyValue,
    },

    #[error("input port {port} requires {key:?} >= {expected}, got {actual}")]
    BelowMinimum {
        port: usize,
        key: PropertyKey,
        expected: u64,
        actual: PropertyValue,
    },

    #[error("input port {port} requires {key:?} <= {expected}, got {actual}")]
    AboveMaximum {
        port: usize,
        key: PropertyKey,
        expected: u64,
        actual: PropertyValue,
    },

    #[error("multi-input alignment on {key:?} cannot be decided: port {port} is UNKNOWN")]
    MultiInputUnknown { key: PropertyKey, port: usize },

    #[error(
        "multi-input alignment on {key:?} disagrees: port {port_a} = {value_a}, port {port_b} = {value_b}"
    )]
    MultiInputMismatch {
        key: PropertyKey,
        port_a: usize,
        value_a: PropertyValue,
        port_b: usize,
        value_b: PropertyValue,
    },
}

/// Computes a filter's output property table for one output port from its
/// input tables and its declared contract (`spec.md` §4.3 "Propagation").
#[must_use]
pub fn propagate(inputs: &[PropertyTable], contract: &Contract, out_port: usize) -> PropertyTable {
    let mut table = PropertyTable::all_unknown();
    for behavior in contract.behaviors_for(out_port) {
        let value = match behavior.kind {
            BehaviorKind::Set(v) => v,
            BehaviorKind::Preserve { input_port } => inputs
                .get(input_port)
                .map_or(PropertyValue::Unknown, |t| t.get(behavior.key)),
        };
        table.set(behavior.key, value);
    }
    table
}

/// Checks every single-input constraint declared on `in_port` against the
/// upstream filter's published output table (`spec.md` §4.3 "Validation").
pub fn validate_connection(
    upstream_out: &PropertyTable,
    contract: &Contract,
    in_port: usize,
) -> Result<(), ValidationError> {
    for c in contract.port_constraints(in_port) {
        let actual = upstream_out.get(c.key);
        match c.kind {
            ConstraintKind::Exists => {
                if !actual.is_known() {
                    return Err(ValidationError::MissingProperty { port: in_port, key: c.key });
                }
            }
            ConstraintKind::Eq(expected) => {
                if actual != expected {
                    return Err(ValidationError::NotEqual {
                        port: in_port,
                        key: c.key,
                        expected,
                        actual,
                    });
                }
            }
            ConstraintKind::Gte(expected) => match actual.as_uint() {
                Some(v) if v >= expected => {}
                _ => {
                    return Err(ValidationError::BelowMinimum {
                        port: in_port,
                        key: c.key,
                        expected,
                        actual,
                    })
                }
            },
            ConstraintKind::Lte(expected) => match actual.as_uint() {
                Some(v) if v <= expected => {}
                _ => {
                    return Err(ValidationError::AboveMaximum {
                        port: in_port,
                        key: c.key,
                        expected,
                        actual,
                    })
                }
            },
        }
    }
    Ok(())
}

/// Checks every `MULTI_INPUT_ALIGNED` constraint. Any participant reporting
/// `Unknown` rejects the pipeline outright: `spec.md` §4.3 mandates rejection
/// rather than treating UNKNOWN as vacuously aligned, because the predicate
/// cannot be decided.
pub fn validate_multi_input_alignment(
    inputs: &[PropertyTable],
    contract: &Contract,
) -> Result<(), ValidationError> {
    for ac in contract.alignment_constraints() {
        let mut reference: Option<(usize, PropertyValue)> = None;
        for port in ac.ports.ports() {
            let value = inputs.get(port).map_or(PropertyValue::Unknown, |t| t.get(ac.key));
            if !value.is_known() {
                return Err(ValidationError::MultiInputUnknown { key: ac.key, port });
            }
            match reference {
                None => reference = Some((port, value)),
                Some((ref_port, ref_value)) if ref_value != value => {
                    return Err(ValidationError::MultiInputMismatch {
                        key: ac.key,
                        port_a: ref_port,
                        value_a: ref_value,
                        port_b: port,
                        value_b: value,
                    })
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserve_mirrors_the_named_input_port() {
        let mut contract = Contract::new();
        contract.behave(0, PropertyKey::SamplePeriodNs, BehaviorKind::Preserve { input_port: 1 });
        let mut input0 = PropertyTable::all_unknown();
        input0.set(PropertyKey::SamplePeriodNs, PropertyValue::UInt(100));
        let mut input1 = PropertyTable::all_unknown();
        input1.set(PropertyKey::SamplePeriodNs, PropertyValue::UInt(200));

        let out = propagate(&[input0, input1], &contract, 0);
        assert_eq!(out.get(PropertyKey::SamplePeriodNs), PropertyValue::UInt(200));
    }

    #[test]
    fn set_behavior_ignores_inputs() {
        let mut contract = Contract::new();
        contract.behave(0, PropertyKey::DataType, BehaviorKind::Set(PropertyValue::DataType(SampleType::F32)));
        let out = propagate(&[], &contract, 0);
        assert_eq!(out.get(PropertyKey::DataType), PropertyValue::DataType(SampleType::F32));
    }

    #[test]
    fn exists_constraint_rejects_unknown() {
        let mut contract = Contract::new();
        contract.constrain(0, PropertyKey::SamplePeriodNs, ConstraintKind::Exists);
        let upstream = PropertyTable::all_unknown();
        assert!(validate_connection(&upstream, &contract, 0).is_err());
    }

    #[test]
    fn gte_constraint_accepts_boundary_value() {
        let mut contract = Contract::new();
        contract.constrain(0, PropertyKey::MinBatchCapacity, ConstraintKind::Gte(32));
        let mut upstream = PropertyTable::all_unknown();
        upstream.set(PropertyKey::MinBatchCapacity, PropertyValue::UInt(32));
        assert!(validate_connection(&upstream, &contract, 0).is_ok());
    }

    #[test]
    fn multi_input_alignment_rejects_unknown_participant() {
        let mut contract = Contract::new();
        contract.align(PropertyKey::SamplePeriodNs, PortMask::of(&[0, 1]));
        let aligned = {
            let mut t = PropertyTable::all_unknown();
            t.set(PropertyKey::SamplePeriodNs, PropertyValue::UInt(1000));
            t
        };
        let unknown = PropertyTable::all_unknown();
        let err = validate_multi_input_alignment(&[aligned, unknown], &contract).unwrap_err();
        assert!(matches!(err, ValidationError::MultiInputUnknown { .. }));
    }

    #[test]
    fn multi_input_alignment_rejects_disagreement() {
        let mut contract = Contract::new();
        contract.align(PropertyKey::SamplePeriodNs, PortMask::of(&[0, 1]));
        let mut a = PropertyTable::all_unknown();
        a.set(PropertyKey::SamplePeriodNs, PropertyValue::UInt(20833));
        let mut b = PropertyTable::all_unknown();
        b.set(PropertyKey::SamplePeriodNs, PropertyValue::UInt(22675));
        let err = validate_multi_input_alignment(&[a, b], &contract).unwrap_err();
        assert!(matches!(err, ValidationError::MultiInputMismatch { .. }));
    }

    #[test]
    fn multi_input_alignment_accepts_agreement() {
        let mut contract = Contract::new();
        contract.align(PropertyKey::SamplePeriodNs, PortMask::of(&[0, 1]));
        let mut a = PropertyTable::all_unknown();
        a.set(PropertyKey::SamplePeriodNs, PropertyValue::UInt(20833));
        let b = a;
        assert!(validate_multi_input_alignment(&[a, b], &contract).is_ok());
    }
}
