//! Embedded runtime interface
//!
//! The execution engine behind the bridge is an external collaborator; this
//! module specifies it as a trait. The bridge only ever talks to the engine
//! through [`EmbeddedEngine`]: namespace resolution, invocation, constructor
//! invocation returning instance ids, and worker spawning for the pool
//! adapter.
//!
//! Engine methods take `&self`: the dispatcher serializes entry from
//! separate threads, and a call already executing may re-enter the engine
//! through a host callback on the same thread, so engines keep their mutable
//! state behind interior mutability.

use crate::bridge::error::BridgeError;
use crate::bridge::value::BridgeValue;

pub mod fixtures;

/// Opaque reference to a resolved callable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallableRef(pub usize);

/// What kind of target a callable resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Plain function returning a value
    Function,
    /// Constructor returning an instance id
    Constructor,
}

/// A declared parameter
#[derive(Debug, Clone)]
pub struct Param {
    /// Parameter name, used for keyword binding
    pub name: String,
    /// Default value; `None` means the parameter is required
    pub default: Option<BridgeValue>,
}

impl Param {
    /// Required parameter
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }
}

/// Callable signature exposed for argument binding
#[derive(Debug, Clone)]
pub struct Signature {
    /// Declared parameters in positional order
    pub params: Vec<Param>,
    /// Whether surplus keywords are collected into a trailing mapping
    pub has_varkw: bool,
    /// Function or constructor
    pub kind: TargetKind,
}

impl Signature {
    /// Plain function signature with required parameters only
    pub fn function(params: &[&str]) -> Self {
        Self {
            params: params.iter().map(|p| Param::required(*p)).collect(),
            has_varkw: false,
            kind: TargetKind::Function,
        }
    }

    /// Mark as variadic-keyword
    pub fn with_varkw(mut self) -> Self {
        self.has_varkw = true;
        self
    }

    /// Mark as constructor
    pub fn constructor(mut self) -> Self {
        self.kind = TargetKind::Constructor;
        self
    }
}

/// Failure produced by the engine
///
/// `Raised` models the embedded runtime's own exceptions; `Bridge` passes a
/// bridge error through unchanged, so that e.g. an expired callback handle
/// surfaces to the host as `HandleExpired` rather than being re-wrapped as
/// an embedded exception.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineFault {
    /// The embedded runtime raised an exception
    Raised {
        /// Exception kind
        kind: String,
        /// Message
        message: String,
        /// Optional traceback text
        traceback: Option<String>,
    },
    /// Bridge error passing through the engine unchanged
    Bridge(BridgeError),
}

impl EngineFault {
    /// Build a raised fault from kind and message
    pub fn raised(
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        EngineFault::Raised {
            kind: kind.into(),
            message: message.into(),
            traceback: None,
        }
    }
}

impl From<EngineFault> for BridgeError {
    fn from(fault: EngineFault) -> Self {
        match fault {
            EngineFault::Raised {
                kind,
                message,
                traceback,
            } => BridgeError::EmbeddedException {
                kind,
                message,
                traceback,
            },
            EngineFault::Bridge(e) => e,
        }
    }
}

/// Host services visible from inside an embedded call
///
/// The embedded code sees host callbacks as ordinary callables; invoking one
/// blocks the embedded execution context until the host function returns.
pub trait HostCalls {
    /// Invoke the host function behind `handle` with embedded-side arguments
    fn invoke_callback(
        &self,
        handle: u64,
        args: Vec<BridgeValue>,
    ) -> Result<BridgeValue, EngineFault>;
}

/// Host services stub for contexts where no callback may cross (pool workers)
pub struct NoHostCalls;

impl HostCalls for NoHostCalls {
    fn invoke_callback(
        &self,
        _handle: u64,
        _args: Vec<BridgeValue>,
    ) -> Result<BridgeValue, EngineFault> {
        Err(EngineFault::Bridge(BridgeError::NotSerializable(
            "host callbacks are not available inside pool workers".into(),
        )))
    }
}

/// The embedded interpreter, specified at its interface
pub trait EmbeddedEngine: Send {
    /// Load a named module, returning its id
    fn import(
        &self,
        name: &str,
    ) -> Result<u64, EngineFault>;

    /// Resolve a callable by name within a loaded module
    fn resolve(
        &self,
        module: u64,
        name: &str,
    ) -> Result<CallableRef, EngineFault>;

    /// Signature of a resolved callable
    fn signature(
        &self,
        target: CallableRef,
    ) -> Result<Signature, EngineFault>;

    /// Invoke a plain function with fully bound arguments
    ///
    /// `args` follows the declared parameter order; for variadic-keyword
    /// targets the collected surplus mapping is appended as the final
    /// argument.
    fn invoke(
        &self,
        target: CallableRef,
        args: Vec<BridgeValue>,
        host: &dyn HostCalls,
    ) -> Result<BridgeValue, EngineFault>;

    /// Invoke a constructor, returning a fresh instance id
    fn construct(
        &self,
        target: CallableRef,
        args: Vec<BridgeValue>,
        host: &dyn HostCalls,
    ) -> Result<u64, EngineFault>;

    /// Signature of a method on a live instance
    fn method_signature(
        &self,
        instance: u64,
        name: &str,
    ) -> Result<Signature, EngineFault>;

    /// Invoke a method on a live instance
    fn invoke_method(
        &self,
        instance: u64,
        name: &str,
        args: Vec<BridgeValue>,
        host: &dyn HostCalls,
    ) -> Result<BridgeValue, EngineFault>;

    /// Drop instance state; later dispatches on the id fail with
    /// `HandleExpired`
    fn release_instance(
        &self,
        instance: u64,
    );

    /// Spawn a fresh engine sharing no state with this one, for pool workers
    fn spawn_worker(&self) -> Box<dyn EmbeddedEngine>;
}
