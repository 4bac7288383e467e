//! Value codec: host-native ⇄ bridge representation
//!
//! [`HostValue`] models the host runtime's native values: shared mutable
//! arrays and string-keyed objects (so aliasing and cycles are
//! representable, like host-language object graphs), plus scalars, byte
//! buffers, registered callbacks and instance handles.
//!
//! [`Codec`] converts in both directions and is total over the supported
//! variant set; anything else - including cyclic object graphs and host
//! functions that were not registered as callbacks - fails with
//! `UnsupportedType`.
//!
//! Mapping keys become host object property names; a mapping produced by the
//! codec therefore always carries string keys, which is what keeps the
//! round-trip invariant closed.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::bridge::buffer::{BufferView, CallScope, ElementWidth};
use crate::bridge::callback::CallbackHandle;
use crate::bridge::error::BridgeError;
use crate::bridge::value::{BridgeValue, Capability, CallableValue, ErrorValue};

/// Shared mutable host array
pub type HostArray = Arc<RwLock<Vec<HostValue>>>;

/// Shared mutable host object (string-keyed, insertion-ordered)
pub type HostObject = Arc<RwLock<IndexMap<String, HostValue>>>;

/// Host-native value
#[derive(Debug, Clone, Default)]
pub enum HostValue {
    /// Host `undefined`
    #[default]
    Undefined,
    /// Host `null`
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    Str(String),
    /// Raw byte sequence (shared, immutable)
    Bytes(Arc<[u8]>),
    /// Shared mutable array
    Array(HostArray),
    /// Shared mutable object
    Object(HostObject),
    /// Immutable fixed-width record
    Tuple(Vec<HostValue>),
    /// Unordered, de-duplicated collection
    Set(Vec<HostValue>),
    /// Typed byte buffer
    Buffer(BufferView),
    /// Host function registered through the callback registry
    Callback(CallbackHandle),
    /// Embedded instance handle previously returned by constructor dispatch
    Instance(u64),
    /// Error carried as a value
    Error(ErrorValue),
}

impl HostValue {
    /// Build a shared array
    pub fn array(elems: impl IntoIterator<Item = HostValue>) -> Self {
        HostValue::Array(Arc::new(RwLock::new(elems.into_iter().collect())))
    }

    /// Build a shared object from key/value pairs (later keys win)
    pub fn object(pairs: impl IntoIterator<Item = (String, HostValue)>) -> Self {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            map.insert(k, v);
        }
        HostValue::Object(Arc::new(RwLock::new(map)))
    }

    /// Build a string value
    pub fn str(s: impl Into<String>) -> Self {
        HostValue::Str(s.into())
    }

    /// Variant name for diagnostics
    pub fn variant(&self) -> &'static str {
        match self {
            HostValue::Undefined => "Undefined",
            HostValue::Null => "Null",
            HostValue::Bool(_) => "Bool",
            HostValue::Int(_) => "Int",
            HostValue::Float(_) => "Float",
            HostValue::Str(_) => "Str",
            HostValue::Bytes(_) => "Bytes",
            HostValue::Array(_) => "Array",
            HostValue::Object(_) => "Object",
            HostValue::Tuple(_) => "Tuple",
            HostValue::Set(_) => "Set",
            HostValue::Buffer(_) => "Buffer",
            HostValue::Callback(_) => "Callback",
            HostValue::Instance(_) => "Instance",
            HostValue::Error(_) => "Error",
        }
    }
}

/// Structural equality; shared containers compare by contents, not identity
impl PartialEq for HostValue {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        use HostValue::*;
        match (self, other) {
            (Undefined, Undefined) | (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Array(a), Array(b)) => *a.read() == *b.read(),
            (Object(a), Object(b)) => *a.read() == *b.read(),
            (Tuple(a), Tuple(b)) => a == b,
            (Set(a), Set(b)) => a.len() == b.len() && a.iter().all(|e| b.contains(e)),
            (Buffer(a), Buffer(b)) => a == b,
            (Callback(a), Callback(b)) => a == b,
            (Instance(a), Instance(b)) => a == b,
            (Error(a), Error(b)) => a == b,
            _ => false,
        }
    }
}

/// Bidirectional converter between host and bridge representations
pub struct Codec;

impl Codec {
    /// Convert host → embedded, copying buffers
    pub fn to_embedded(value: &HostValue) -> Result<BridgeValue, BridgeError> {
        let mut seen = Vec::new();
        convert_to_embedded(value, None, &mut seen)
    }

    /// Convert host → embedded, pinning byte buffers to `scope` instead of
    /// copying them; the resulting borrowed views expire when the scope
    /// closes
    pub fn to_embedded_in(
        scope: &CallScope,
        value: &HostValue,
    ) -> Result<BridgeValue, BridgeError> {
        let mut seen = Vec::new();
        convert_to_embedded(value, Some(scope), &mut seen)
    }

    /// Convert embedded → host; buffers are always copied into owned views
    pub fn to_host(value: &BridgeValue) -> Result<HostValue, BridgeError> {
        match value {
            BridgeValue::Null => Ok(HostValue::Undefined),
            BridgeValue::Bool(b) => Ok(HostValue::Bool(*b)),
            BridgeValue::Int(i) => Ok(HostValue::Int(*i)),
            BridgeValue::Float(f) => Ok(HostValue::Float(*f)),
            BridgeValue::Str(s) => Ok(HostValue::Str(s.to_string())),
            BridgeValue::Bytes(b) => Ok(HostValue::Bytes(b.clone())),
            BridgeValue::Sequence(v) => Ok(HostValue::array(
                v.iter()
                    .map(Self::to_host)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            BridgeValue::Mapping(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    out.push((property_name(k)?, Self::to_host(v)?));
                }
                Ok(HostValue::object(out))
            }
            BridgeValue::Set(v) => Ok(HostValue::Set(
                v.iter()
                    .map(Self::to_host)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            BridgeValue::Tuple(v) => Ok(HostValue::Tuple(
                v.iter()
                    .map(Self::to_host)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            BridgeValue::Buffer(view) => Ok(HostValue::Buffer(view.to_owned_view()?)),
            BridgeValue::Callable(c) => match c.capability {
                Capability::HostCallback => Ok(HostValue::Callback(CallbackHandle(c.handle))),
                Capability::Instance => Ok(HostValue::Instance(c.handle)),
            },
            BridgeValue::Error(e) => Ok(HostValue::Error(e.clone())),
        }
    }
}

/// Mapping keys must be representable as host property names
fn property_name(key: &BridgeValue) -> Result<String, BridgeError> {
    match key {
        BridgeValue::Str(s) => Ok(s.to_string()),
        BridgeValue::Int(i) => Ok(i.to_string()),
        BridgeValue::Float(f) => Ok(f.to_string()),
        BridgeValue::Bool(b) => Ok(b.to_string()),
        other => Err(BridgeError::UnsupportedType(format!(
            "{} is not representable as a mapping key on the host side",
            other.variant()
        ))),
    }
}

fn convert_to_embedded(
    value: &HostValue,
    scope: Option<&CallScope>,
    seen: &mut Vec<*const ()>,
) -> Result<BridgeValue, BridgeError> {
    match value {
        HostValue::Undefined | HostValue::Null => Ok(BridgeValue::Null),
        HostValue::Bool(b) => Ok(BridgeValue::Bool(*b)),
        HostValue::Int(i) => Ok(BridgeValue::Int(*i)),
        HostValue::Float(f) => Ok(BridgeValue::Float(*f)),
        HostValue::Str(s) => Ok(BridgeValue::str(s)),
        HostValue::Bytes(b) => match scope {
            // The shared allocation is pinned for the call: no copy
            Some(scope) => Ok(BridgeValue::Buffer(BufferView::borrowed(
                b.clone(),
                scope,
                ElementWidth::U8,
            ))),
            None => Ok(BridgeValue::Bytes(b.clone())),
        },
        HostValue::Array(arr) => {
            let ptr = Arc::as_ptr(arr) as *const ();
            enter(seen, ptr)?;
            let guard = arr.read();
            let out = guard
                .iter()
                .map(|v| convert_to_embedded(v, scope, seen))
                .collect::<Result<Vec<_>, _>>();
            drop(guard);
            seen.pop();
            Ok(BridgeValue::Sequence(out?))
        }
        HostValue::Object(obj) => {
            let ptr = Arc::as_ptr(obj) as *const ();
            enter(seen, ptr)?;
            let guard = obj.read();
            let mut pairs = Vec::with_capacity(guard.len());
            let mut failed = None;
            for (k, v) in guard.iter() {
                match convert_to_embedded(v, scope, seen) {
                    Ok(bv) => pairs.push((BridgeValue::str(k), bv)),
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                }
            }
            drop(guard);
            seen.pop();
            match failed {
                Some(e) => Err(e),
                None => Ok(BridgeValue::Mapping(pairs)),
            }
        }
        HostValue::Tuple(v) => Ok(BridgeValue::Tuple(
            v.iter()
                .map(|v| convert_to_embedded(v, scope, seen))
                .collect::<Result<Vec<_>, _>>()?,
        )),
        HostValue::Set(v) => {
            let elems = v
                .iter()
                .map(|v| convert_to_embedded(v, scope, seen))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(BridgeValue::set(elems))
        }
        HostValue::Buffer(view) => match scope {
            Some(scope) if !view.is_borrowed() => {
                // Rebind the owned allocation to the call scope; zero copy
                let bytes: Arc<[u8]> = Arc::from(view.bytes()?);
                Ok(BridgeValue::Buffer(BufferView::borrowed(
                    bytes,
                    scope,
                    view.width(),
                )))
            }
            _ => Ok(BridgeValue::Buffer(view.clone())),
        },
        HostValue::Callback(h) => Ok(BridgeValue::Callable(CallableValue {
            handle: h.0,
            capability: Capability::HostCallback,
        })),
        HostValue::Instance(id) => Ok(BridgeValue::instance(*id)),
        HostValue::Error(e) => Ok(BridgeValue::Error(e.clone())),
    }
}

fn enter(
    seen: &mut Vec<*const ()>,
    ptr: *const (),
) -> Result<(), BridgeError> {
    if seen.contains(&ptr) {
        return Err(BridgeError::UnsupportedType(
            "cyclic value cannot cross the boundary".into(),
        ));
    }
    seen.push(ptr);
    Ok(())
}
