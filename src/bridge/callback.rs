//! Callback registry and proxy
//!
//! Host functions cross the boundary as opaque [`CallbackHandle`]s. The host
//! owns the function; the embedded side holds only the handle and may invoke
//! through it while the registration lives. Invoking after
//! [`CallbackRegistry::release`] fails with `HandleExpired` - never
//! undefined behavior, never a silent no-op.
//!
//! [`CallbackProxy`] is the embedded side's view: it reconverts arguments
//! embedded→host, runs the host function synchronously (the embedded
//! execution context blocks until it returns), converts the return value
//! host→embedded, and re-raises host failures as embedded exceptions.
//!
//! Re-entrancy: the registry lock is never held across an invocation, so a
//! callback is free to dispatch back into the embedded runtime, nested up to
//! the host's native call-stack limit.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::bridge::codec::{Codec, HostValue};
use crate::bridge::error::BridgeError;
use crate::bridge::value::BridgeValue;
use crate::engine::{EngineFault, HostCalls};

/// Opaque reference to a host-owned function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(pub u64);

/// Host function stored in the registry
pub type HostFn = Arc<dyn Fn(&[HostValue]) -> Result<HostValue, BridgeError> + Send + Sync>;

/// Host-owned registry of callback functions
#[derive(Default)]
pub struct CallbackRegistry {
    slots: RwLock<HashMap<u64, HostFn>>,
}

impl CallbackRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host function, returning its handle
    pub fn register<F>(
        &self,
        func: F,
    ) -> CallbackHandle
    where
        F: Fn(&[HostValue]) -> Result<HostValue, BridgeError> + Send + Sync + 'static,
    {
        let mut slots = self.slots.write();
        // Handle ids are salted so stale ids from released slots do not
        // accidentally resolve again
        let mut id = rand::random::<u64>();
        while slots.contains_key(&id) {
            id = rand::random::<u64>();
        }
        slots.insert(id, Arc::new(func));
        trace!("registered callback #{id}");
        CallbackHandle(id)
    }

    /// Release a registration; returns false when the handle was already gone
    pub fn release(
        &self,
        handle: CallbackHandle,
    ) -> bool {
        let released = self.slots.write().remove(&handle.0).is_some();
        trace!("released callback #{} (live: {released})", handle.0);
        released
    }

    /// Invoke the function behind `handle` with host-side arguments
    pub fn invoke(
        &self,
        handle: CallbackHandle,
        args: &[HostValue],
    ) -> Result<HostValue, BridgeError> {
        // Clone the Arc and drop the guard first: the callback may re-enter
        // the registry (nested registration or dispatch)
        let func = self
            .slots
            .read()
            .get(&handle.0)
            .cloned()
            .ok_or(BridgeError::HandleExpired)?;
        func(args)
    }
}

/// The embedded runtime's gateway back into host functions
pub struct CallbackProxy {
    registry: Arc<CallbackRegistry>,
}

impl CallbackProxy {
    /// Wrap a registry
    pub fn new(registry: Arc<CallbackRegistry>) -> Self {
        Self { registry }
    }
}

impl HostCalls for CallbackProxy {
    fn invoke_callback(
        &self,
        handle: u64,
        args: Vec<BridgeValue>,
    ) -> Result<BridgeValue, EngineFault> {
        let host_args = args
            .iter()
            .map(Codec::to_host)
            .collect::<Result<Vec<_>, _>>()
            .map_err(EngineFault::Bridge)?;

        trace!("invoking callback #{handle} with {} args", host_args.len());
        let ret = match self.registry.invoke(CallbackHandle(handle), &host_args) {
            Ok(ret) => ret,
            // A stale handle keeps its own error kind across the boundary
            Err(BridgeError::HandleExpired) => {
                return Err(EngineFault::Bridge(BridgeError::HandleExpired))
            }
            // Any other host failure re-raises as an embedded exception of
            // the equivalent kind
            Err(e) => return Err(EngineFault::raised(e.kind(), e.to_string())),
        };

        Codec::to_embedded(&ret).map_err(EngineFault::Bridge)
    }
}
