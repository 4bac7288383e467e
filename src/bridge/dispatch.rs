//! Call dispatcher
//!
//! Resolves a target callable against positional and keyword arguments,
//! enters the embedded execution context, and wraps the result or exception.
//!
//! Binding order: positional arguments bind left-to-right, then keywords by
//! name. A keyword colliding with an already-bound positional slot fails
//! with `DuplicateBinding`; a required parameter left unbound fails with
//! `MissingArgument`; a variadic-keyword target collects unconsumed keywords
//! into a trailing mapping. All binding errors are detected before the
//! embedded runtime is entered - no partial side effects.
//!
//! The embedded execution context is a single mutable resource: entry is
//! serialized through a re-entrant mutex, so host threads queue while the
//! same thread may re-enter during a callback-triggered nested dispatch.

use std::time::Instant;

use parking_lot::ReentrantMutex;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::bridge::error::BridgeError;
use crate::bridge::value::BridgeValue;
use crate::engine::{EmbeddedEngine, HostCalls, Signature, TargetKind};

/// Handle to a loaded embedded module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u64);

/// Handle to embedded instance state returned by constructor dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle(pub u64);

impl InstanceHandle {
    /// Extract an instance handle from a dispatch result
    pub fn from_value(value: &BridgeValue) -> Option<Self> {
        value.as_instance().map(InstanceHandle)
    }
}

/// What a call resolves against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// Qualified name in a loaded module's namespace; a target flagged as a
    /// constructor returns an instance handle instead of a value
    Named {
        /// Owning module
        module: ModuleHandle,
        /// Function or class name
        name: String,
    },
    /// Method resolved through a live instance rather than the namespace
    Method {
        /// Instance returned by an earlier constructor dispatch
        instance: InstanceHandle,
        /// Method name
        name: String,
    },
}

impl CallTarget {
    fn describe(&self) -> String {
        match self {
            CallTarget::Named { name, .. } => name.clone(),
            CallTarget::Method { instance, name } => {
                format!("instance#{}.{}", instance.0, name)
            }
        }
    }
}

/// A fully described call: target, positional args, keywords, deadline
#[derive(Debug, Clone)]
pub struct CallSpec {
    /// Resolution target
    pub target: CallTarget,
    /// Positional arguments, bound left-to-right
    pub args: Vec<BridgeValue>,
    /// Keyword arguments; names must be valid identifiers and unique
    pub kwargs: Vec<(String, BridgeValue)>,
    /// Optional deadline; expiry while queued cancels, expiry while
    /// executing is reported as `Timeout` after the call returns
    pub deadline: Option<Instant>,
}

impl CallSpec {
    /// Call a named target (function, or constructor yielding an instance)
    pub fn function(
        module: ModuleHandle,
        name: impl Into<String>,
    ) -> Self {
        Self {
            target: CallTarget::Named {
                module,
                name: name.into(),
            },
            args: Vec::new(),
            kwargs: Vec::new(),
            deadline: None,
        }
    }

    /// Call a method on a previously returned instance handle
    pub fn method(
        instance: InstanceHandle,
        name: impl Into<String>,
    ) -> Self {
        Self {
            target: CallTarget::Method {
                instance,
                name: name.into(),
            },
            args: Vec::new(),
            kwargs: Vec::new(),
            deadline: None,
        }
    }

    /// Append a positional argument
    pub fn arg(
        mut self,
        value: BridgeValue,
    ) -> Self {
        self.args.push(value);
        self
    }

    /// Append a keyword argument
    pub fn kwarg(
        mut self,
        name: impl Into<String>,
        value: BridgeValue,
    ) -> Self {
        self.kwargs.push((name.into(), value));
        self
    }

    /// Set the deadline
    pub fn deadline(
        mut self,
        deadline: Instant,
    ) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Serializes entry into the embedded execution context and performs
/// resolution, binding, invocation and fault capture
pub struct Dispatcher {
    engine: ReentrantMutex<Box<dyn EmbeddedEngine>>,
}

impl Dispatcher {
    /// Wrap an engine
    pub fn new(engine: Box<dyn EmbeddedEngine>) -> Self {
        Self {
            engine: ReentrantMutex::new(engine),
        }
    }

    /// Load a module by name
    pub fn import(
        &self,
        name: &str,
    ) -> Result<ModuleHandle, BridgeError> {
        let engine = self.engine.lock();
        let id = engine.import(name).map_err(BridgeError::from)?;
        debug!("imported module `{name}` as #{id}");
        Ok(ModuleHandle(id))
    }

    /// Drop embedded instance state
    pub fn release_instance(
        &self,
        instance: InstanceHandle,
    ) {
        self.engine.lock().release_instance(instance.0);
        debug!("released instance #{}", instance.0);
    }

    /// Spawn isolated engines for pool workers
    pub fn spawn_workers(
        &self,
        count: usize,
    ) -> Vec<Box<dyn EmbeddedEngine>> {
        let engine = self.engine.lock();
        (0..count).map(|_| engine.spawn_worker()).collect()
    }

    /// Dispatch a call, returning the result or the most specific error
    pub fn dispatch(
        &self,
        spec: CallSpec,
        host: &dyn HostCalls,
    ) -> Result<BridgeValue, BridgeError> {
        validate_kwargs(&spec.kwargs)?;

        // Deadline expiry while still queued cancels before entry
        if let Some(deadline) = spec.deadline {
            if Instant::now() >= deadline {
                return Err(BridgeError::Cancelled);
            }
        }

        let described = spec.target.describe();
        let engine = self.engine.lock();

        let result = match spec.target {
            CallTarget::Named { module, name } => {
                let target = engine.resolve(module.0, &name).map_err(BridgeError::from)?;
                let sig = engine.signature(target).map_err(BridgeError::from)?;
                let bound = bind(&sig, spec.args, spec.kwargs)?;
                match sig.kind {
                    TargetKind::Function => {
                        engine.invoke(target, bound, host).map_err(BridgeError::from)
                    }
                    TargetKind::Constructor => engine
                        .construct(target, bound, host)
                        .map(BridgeValue::instance)
                        .map_err(BridgeError::from),
                }
            }
            CallTarget::Method { instance, name } => {
                let sig = engine
                    .method_signature(instance.0, &name)
                    .map_err(BridgeError::from)?;
                let bound = bind(&sig, spec.args, spec.kwargs)?;
                engine
                    .invoke_method(instance.0, &name, bound, host)
                    .map_err(BridgeError::from)
            }
        };
        drop(engine);

        // An executing call is not preemptible; overruns are reported once
        // it returns
        if let Some(deadline) = spec.deadline {
            if Instant::now() > deadline {
                warn!("`{described}` overran its deadline");
                return Err(BridgeError::Timeout);
            }
        }

        match &result {
            Ok(v) => debug!("`{described}` -> {}", v.variant()),
            Err(e) => debug!("`{described}` failed: {e}"),
        }
        result
    }
}

/// Reject malformed keyword lists before any embedded work happens
fn validate_kwargs(kwargs: &[(String, BridgeValue)]) -> Result<(), BridgeError> {
    for (i, (name, _)) in kwargs.iter().enumerate() {
        if !is_identifier(name) {
            return Err(BridgeError::UnsupportedType(format!(
                "keyword `{name}` is not a valid identifier"
            )));
        }
        if kwargs[..i].iter().any(|(prev, _)| prev == name) {
            return Err(BridgeError::DuplicateBinding(name.clone()));
        }
    }
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Bind positional and keyword arguments against a signature
pub(crate) fn bind(
    sig: &Signature,
    args: Vec<BridgeValue>,
    kwargs: Vec<(String, BridgeValue)>,
) -> Result<Vec<BridgeValue>, BridgeError> {
    if args.len() > sig.params.len() {
        // The embedded runtime's own arity rule, surfaced as an error
        return Err(BridgeError::raised(
            "TypeError",
            format!(
                "takes {} positional arguments but {} were given",
                sig.params.len(),
                args.len()
            ),
        ));
    }

    let positional = args.len();
    let mut slots: SmallVec<[Option<BridgeValue>; 8]> =
        sig.params.iter().map(|_| None).collect();
    for (slot, value) in slots.iter_mut().zip(args) {
        *slot = Some(value);
    }

    let mut surplus: Vec<(BridgeValue, BridgeValue)> = Vec::new();
    for (name, value) in kwargs {
        match sig.params.iter().position(|p| p.name == name) {
            Some(idx) => {
                if idx < positional {
                    return Err(BridgeError::DuplicateBinding(name));
                }
                // kwargs are pre-validated unique, so the slot is free
                slots[idx] = Some(value);
            }
            None if sig.has_varkw => surplus.push((BridgeValue::str(&name), value)),
            None => {
                return Err(BridgeError::raised(
                    "TypeError",
                    format!("got an unexpected keyword argument `{name}`"),
                ));
            }
        }
    }

    let mut bound = Vec::with_capacity(sig.params.len() + usize::from(sig.has_varkw));
    for (slot, param) in slots.into_iter().zip(&sig.params) {
        match slot.or_else(|| param.default.clone()) {
            Some(value) => bound.push(value),
            None => return Err(BridgeError::MissingArgument(param.name.clone())),
        }
    }
    if sig.has_varkw {
        bound.push(BridgeValue::Mapping(surplus));
    }
    Ok(bound)
}
