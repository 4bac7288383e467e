//! Boundary value model
//!
//! [`BridgeValue`] is the closed tagged-variant representation of every value
//! that crosses between the host and the embedded runtime. The variant set is
//! fixed; anything outside it must be rejected by the codec with
//! `UnsupportedType` rather than smuggled across as an opaque blob.
//!
//! # Round-trip invariant
//!
//! Every `BridgeValue` produced by the codec in one direction round-trips
//! through the opposite direction to an equal value, except `Callable`
//! (identity-only: only the handle survives) and `Float` (standard
//! floating-point equality caveats apply).

use std::fmt;
use std::sync::Arc;

use crate::bridge::buffer::BufferView;

#[cfg(test)]
mod tests;

/// What an opaque callable handle is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// A host-owned function registered through the callback registry
    HostCallback,
    /// Embedded-side instance state returned by constructor dispatch
    Instance,
}

/// Opaque handle plus capability tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallableValue {
    /// Registry id; meaningful only to the side that issued it
    pub handle: u64,
    /// Capability tag
    pub capability: Capability,
}

/// Error payload carried as a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    /// Exception kind (e.g. `TypeError`, `RuntimeError`)
    pub kind: String,
    /// Raw message
    pub message: String,
    /// Optional embedded traceback text
    pub traceback: Option<String>,
}

/// Tagged variant crossing the runtime boundary
#[derive(Debug, Clone, Default)]
pub enum BridgeValue {
    /// Absent value (host `null`/`undefined`, embedded `None`)
    #[default]
    Null,

    /// Boolean
    Bool(bool),

    /// Integer
    Int(i64),

    /// Float
    Float(f64),

    /// String (shared, immutable)
    Str(Arc<str>),

    /// Raw byte sequence (shared, immutable)
    Bytes(Arc<[u8]>),

    /// Ordered list
    Sequence(Vec<BridgeValue>),

    /// Key-unique, insertion-order-preserving pairs
    ///
    /// Key order is an implementation detail: the exposed guarantee is "keys
    /// unique, values retrievable by key", not a stable order across the
    /// boundary.
    ///
    /// Keys crossing to the host become property names: numeric and bool
    /// keys are stringified, so an `Int`-keyed mapping comes back with
    /// `Str` keys rather than round-tripping to an identical key type.
    /// Codec-produced mappings always carry `Str` keys already.
    Mapping(Vec<(BridgeValue, BridgeValue)>),

    /// Unordered, de-duplicated by value equality; heterogeneous elements
    /// are preserved without coercion
    Set(Vec<BridgeValue>),

    /// Fixed-arity ordered record, heterogeneous element types
    Tuple(Vec<BridgeValue>),

    /// Typed byte buffer (owned or borrowed)
    Buffer(BufferView),

    /// Opaque handle + capability tag
    Callable(CallableValue),

    /// Error carried as a value
    Error(ErrorValue),
}

// ============================================================================
// Constructors
// ============================================================================

impl BridgeValue {
    /// Build a string value
    pub fn str(s: impl AsRef<str>) -> Self {
        BridgeValue::Str(Arc::from(s.as_ref()))
    }

    /// Build a byte value
    pub fn bytes(b: impl AsRef<[u8]>) -> Self {
        BridgeValue::Bytes(Arc::from(b.as_ref()))
    }

    /// Build a mapping from pairs; later occurrences of an equal key win
    pub fn mapping(pairs: impl IntoIterator<Item = (BridgeValue, BridgeValue)>) -> Self {
        let mut out: Vec<(BridgeValue, BridgeValue)> = Vec::new();
        for (k, v) in pairs {
            if let Some(slot) = out.iter_mut().find(|(ek, _)| *ek == k) {
                slot.1 = v;
            } else {
                out.push((k, v));
            }
        }
        BridgeValue::Mapping(out)
    }

    /// Build a set, de-duplicating by value equality
    pub fn set(elems: impl IntoIterator<Item = BridgeValue>) -> Self {
        let mut out: Vec<BridgeValue> = Vec::new();
        for e in elems {
            if !out.contains(&e) {
                out.push(e);
            }
        }
        BridgeValue::Set(out)
    }

    /// Wrap an instance id as an instance-capability callable
    pub fn instance(handle: u64) -> Self {
        BridgeValue::Callable(CallableValue {
            handle,
            capability: Capability::Instance,
        })
    }

    /// Wrap a callback registry id as a host-callback callable
    pub fn host_callback(handle: u64) -> Self {
        BridgeValue::Callable(CallableValue {
            handle,
            capability: Capability::HostCallback,
        })
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl BridgeValue {
    /// Variant name for diagnostics
    pub fn variant(&self) -> &'static str {
        match self {
            BridgeValue::Null => "Null",
            BridgeValue::Bool(_) => "Bool",
            BridgeValue::Int(_) => "Int",
            BridgeValue::Float(_) => "Float",
            BridgeValue::Str(_) => "Str",
            BridgeValue::Bytes(_) => "Bytes",
            BridgeValue::Sequence(_) => "Sequence",
            BridgeValue::Mapping(_) => "Mapping",
            BridgeValue::Set(_) => "Set",
            BridgeValue::Tuple(_) => "Tuple",
            BridgeValue::Buffer(_) => "Buffer",
            BridgeValue::Callable(_) => "Callable",
            BridgeValue::Error(_) => "Error",
        }
    }

    /// Convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BridgeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert to i64
    pub fn as_int(&self) -> Option<i64> {
        match self {
            BridgeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert to f64, accepting Int as well
    pub fn as_number(&self) -> Option<f64> {
        match self {
            BridgeValue::Int(i) => Some(*i as f64),
            BridgeValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Borrow as &str
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BridgeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a sequence slice
    pub fn as_sequence(&self) -> Option<&[BridgeValue]> {
        match self {
            BridgeValue::Sequence(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow mapping pairs
    pub fn as_mapping(&self) -> Option<&[(BridgeValue, BridgeValue)]> {
        match self {
            BridgeValue::Mapping(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Look up a mapping value by key equality
    pub fn mapping_get(
        &self,
        key: &BridgeValue,
    ) -> Option<&BridgeValue> {
        self.as_mapping()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Borrow the callable payload
    pub fn as_callable(&self) -> Option<&CallableValue> {
        match self {
            BridgeValue::Callable(c) => Some(c),
            _ => None,
        }
    }

    /// Instance id if this is an instance-capability callable
    pub fn as_instance(&self) -> Option<u64> {
        match self {
            BridgeValue::Callable(c) if c.capability == Capability::Instance => Some(c.handle),
            _ => None,
        }
    }

    /// Truthiness in the embedded runtime's sense
    pub fn is_truthy(&self) -> bool {
        match self {
            BridgeValue::Null => false,
            BridgeValue::Bool(b) => *b,
            BridgeValue::Int(i) => *i != 0,
            BridgeValue::Float(f) => *f != 0.0,
            BridgeValue::Str(s) => !s.is_empty(),
            BridgeValue::Bytes(b) => !b.is_empty(),
            BridgeValue::Sequence(v) | BridgeValue::Set(v) | BridgeValue::Tuple(v) => !v.is_empty(),
            BridgeValue::Mapping(pairs) => !pairs.is_empty(),
            BridgeValue::Buffer(b) => !b.is_empty(),
            BridgeValue::Callable(_) => true,
            BridgeValue::Error(_) => true,
        }
    }
}

// ============================================================================
// Equality
// ============================================================================

/// Equality is structural. Mappings compare order-insensitively (key-unique
/// by construction); sets compare by mutual containment. Floats use standard
/// `f64` equality.
impl PartialEq for BridgeValue {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        use BridgeValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Sequence(a), Sequence(b)) | (Tuple(a), Tuple(b)) => a == b,
            (Mapping(a), Mapping(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.iter().any(|(bk, bv)| bk == k && bv == v))
            }
            (Set(a), Set(b)) => {
                a.len() == b.len() && a.iter().all(|e| b.contains(e))
            }
            (Buffer(a), Buffer(b)) => a == b,
            (Callable(a), Callable(b)) => a == b,
            (Error(a), Error(b)) => a == b,
            _ => false,
        }
    }
}

// ============================================================================
// Display
// ============================================================================

impl fmt::Display for BridgeValue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            BridgeValue::Null => write!(f, "null"),
            BridgeValue::Bool(b) => write!(f, "{}", b),
            BridgeValue::Int(i) => write!(f, "{}", i),
            BridgeValue::Float(fl) => write!(f, "{}", fl),
            BridgeValue::Str(s) => write!(f, "\"{}\"", s),
            BridgeValue::Bytes(b) => write!(f, "bytes[{}]", b.len()),
            BridgeValue::Sequence(v) => write!(f, "[{}]", join(v)),
            BridgeValue::Mapping(pairs) => {
                write!(
                    f,
                    "{{{}}}",
                    pairs
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k, v))
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
            BridgeValue::Set(v) => write!(f, "set{{{}}}", join(v)),
            BridgeValue::Tuple(v) => write!(f, "({})", join(v)),
            BridgeValue::Buffer(b) => write!(f, "{}", b),
            BridgeValue::Callable(c) => match c.capability {
                Capability::HostCallback => write!(f, "callback#{}", c.handle),
                Capability::Instance => write!(f, "instance#{}", c.handle),
            },
            BridgeValue::Error(e) => write!(f, "error({}: {})", e.kind, e.message),
        }
    }
}

fn join(values: &[BridgeValue]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
