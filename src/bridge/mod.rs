//! Bridge facade
//!
//! [`Bridge`] owns the moving parts and exposes the host-facing API: module
//! import, synchronous and asynchronous dispatch, host-native dispatch
//! through the codec, callback registration, instance release and the
//! parallel worker pool.
//!
//! A `Bridge` is cheap to clone; clones share the same embedded engine,
//! callback registry and dispatch workers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::bridge::buffer::CallScope;
use crate::bridge::callback::{CallbackHandle, CallbackProxy, CallbackRegistry, HostFn};
use crate::bridge::codec::{Codec, HostValue};
use crate::bridge::dispatch::{CallSpec, CallTarget, Dispatcher, InstanceHandle, ModuleHandle};
use crate::bridge::error::BridgeError;
use crate::bridge::executor::AsyncExecutor;
use crate::bridge::pending::PendingResult;
use crate::bridge::value::BridgeValue;
use crate::engine::EmbeddedEngine;
use crate::util::config::BridgeConfig;

pub mod buffer;
pub mod callback;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod pending;
pub mod pool;
pub mod value;

struct Inner {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<CallbackRegistry>,
    proxy: Arc<CallbackProxy>,
    executor: AsyncExecutor,
    config: BridgeConfig,
}

/// Host-facing entry point
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl Bridge {
    /// Wire a bridge around an embedded engine
    pub fn new(
        engine: Box<dyn EmbeddedEngine>,
        config: BridgeConfig,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(engine));
        let registry = Arc::new(CallbackRegistry::new());
        let proxy = Arc::new(CallbackProxy::new(registry.clone()));
        let executor = AsyncExecutor::new(
            dispatcher.clone(),
            proxy.clone(),
            config.async_workers,
        );
        debug!(
            "bridge up: {} async workers, pool cap {}",
            config.async_workers, config.max_pool_workers
        );
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                registry,
                proxy,
                executor,
                config,
            }),
        }
    }

    /// Load an embedded module by name
    pub fn import(
        &self,
        name: &str,
    ) -> Result<ModuleHandle, BridgeError> {
        self.inner.dispatcher.import(name)
    }

    /// Dispatch a call synchronously, blocking until it completes
    pub fn dispatch(
        &self,
        spec: CallSpec,
    ) -> Result<BridgeValue, BridgeError> {
        let spec = self.with_default_deadline(spec);
        self.inner
            .dispatcher
            .dispatch(spec, self.inner.proxy.as_ref())
    }

    /// Queue a call for asynchronous dispatch
    ///
    /// The returned [`PendingResult`] transitions exactly once; cancel it
    /// before the call starts and it resolves with `Cancelled` without ever
    /// entering the embedded context.
    pub fn dispatch_async(
        &self,
        spec: CallSpec,
    ) -> PendingResult {
        let spec = self.with_default_deadline(spec);
        let pending = PendingResult::new();
        self.inner.executor.submit(spec, pending.clone());
        pending
    }

    /// Dispatch with host-native arguments and a host-native result
    ///
    /// Byte buffers among the arguments cross zero-copy as borrowed views
    /// pinned to this call; they expire the moment the call returns, so the
    /// embedded side must copy anything it wants to keep.
    pub fn dispatch_host(
        &self,
        target: CallTarget,
        args: &[HostValue],
        kwargs: &[(String, HostValue)],
    ) -> Result<HostValue, BridgeError> {
        let scope = CallScope::new();
        let mut spec = CallSpec {
            target,
            args: Vec::with_capacity(args.len()),
            kwargs: Vec::with_capacity(kwargs.len()),
            deadline: None,
        };
        for arg in args {
            spec.args.push(Codec::to_embedded_in(&scope, arg)?);
        }
        for (name, value) in kwargs {
            spec.kwargs
                .push((name.clone(), Codec::to_embedded_in(&scope, value)?));
        }

        let result = self.dispatch(spec)?;
        // to_host copies buffers into owned views before the scope closes
        let host = Codec::to_host(&result);
        scope.close();
        host
    }

    /// Register a host function, making it invocable from the embedded side
    pub fn register_callback<F>(
        &self,
        func: F,
    ) -> CallbackHandle
    where
        F: Fn(&[HostValue]) -> Result<HostValue, BridgeError> + Send + Sync + 'static,
    {
        self.inner.registry.register(func)
    }

    /// Register an already-shared host function
    pub fn register_callback_fn(
        &self,
        func: HostFn,
    ) -> CallbackHandle {
        self.inner.registry.register(move |args| func(args))
    }

    /// Release a callback registration; later embedded invocations through
    /// the handle fail with `HandleExpired`
    pub fn release_callback(
        &self,
        handle: CallbackHandle,
    ) -> bool {
        self.inner.registry.release(handle)
    }

    /// Drop embedded instance state behind a handle
    pub fn release_instance(
        &self,
        instance: InstanceHandle,
    ) {
        self.inner.dispatcher.release_instance(instance);
    }

    /// Apply `target` (`module.function`) to every input on isolated
    /// workers, in input order
    ///
    /// `worker_count` is clamped to the configured pool cap and to the
    /// number of inputs.
    pub fn parallel_map(
        &self,
        target: &str,
        inputs: Vec<BridgeValue>,
        worker_count: usize,
    ) -> Result<Vec<BridgeValue>, BridgeError> {
        let capped = worker_count.min(self.inner.config.max_pool_workers);
        pool::parallel_map(&self.inner.dispatcher, target, inputs, capped)
    }

    fn with_default_deadline(
        &self,
        mut spec: CallSpec,
    ) -> CallSpec {
        if spec.deadline.is_none() {
            if let Some(ms) = self.inner.config.default_deadline_ms {
                spec.deadline = Some(Instant::now() + Duration::from_millis(ms));
            }
        }
        spec
    }
}
