//! Qiao (桥) runtime bridge
//!
//! A marshaling and dispatch layer connecting a HOST runtime to an EMBEDDED
//! interpreter. The bridge converts values between the two runtimes, resolves
//! and invokes embedded callables (plain functions, constructors, bound
//! methods), proxies host callbacks into the embedded side, exposes
//! asynchronous completion to the host, and runs pure functions over an
//! isolated worker set.
//!
//! # Example
//!
//! ```rust
//! use qiao::{Bridge, BridgeValue, CallSpec};
//! use qiao::engine::fixtures::FixtureEngine;
//!
//! fn main() -> Result<(), qiao::BridgeError> {
//!     let bridge = Bridge::new(Box::new(FixtureEngine::new()), Default::default());
//!     let module = bridge.import("fixtures")?;
//!     let spec = CallSpec::function(module, "calc")
//!         .arg(BridgeValue::Bool(true))
//!         .arg(BridgeValue::Int(2))
//!         .arg(BridgeValue::Int(3));
//!     assert_eq!(bridge.dispatch(spec)?, BridgeValue::Int(5));
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/qiao")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod bridge;
pub mod engine;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use thiserror::Error;

pub use bridge::buffer::{BufferView, CallScope, ElementWidth};
pub use bridge::callback::CallbackHandle;
pub use bridge::codec::{Codec, HostValue};
pub use bridge::dispatch::{CallSpec, CallTarget, InstanceHandle, ModuleHandle};
pub use bridge::error::BridgeError;
pub use bridge::pending::{PendingResult, PendingState};
pub use bridge::value::{BridgeValue, Capability, ErrorValue};
pub use bridge::Bridge;
pub use util::config::BridgeConfig;

/// Bridge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bridge name
pub const NAME: &str = "Qiao (桥)";
