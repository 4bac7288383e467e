//! Process pool adapter
//!
//! `parallel_map` partitions a sequence of plain inputs across a fixed set
//! of isolated workers, applies a pure function per element, and merges
//! outputs in input order regardless of completion order.
//!
//! Workers share no state with the dispatching engine: each one runs a
//! freshly spawned engine and receives its inputs through a serialized wire
//! format, so the no-shared-memory worker contract is enforced exactly as it
//! would be across process boundaries. Values that cannot cross that
//! boundary - callback handles, instance handles, borrowed buffer views -
//! fail fast with `NotSerializable` before any worker starts.
//!
//! The worker set lives for one invocation and is torn down on completion
//! or failure; one worker's fault aborts the whole call with that worker's
//! error, without partial results.

use std::thread;

use crossbeam::channel;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bridge::buffer::{BufferView, ElementWidth};
use crate::bridge::dispatch::{bind, Dispatcher};
use crate::bridge::error::BridgeError;
use crate::bridge::value::{BridgeValue, ErrorValue};
use crate::engine::{EmbeddedEngine, NoHostCalls};

/// Serializable mirror of the worker-crossing value subset
#[derive(Debug, Serialize, Deserialize)]
enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<WireValue>),
    Map(Vec<(WireValue, WireValue)>),
    Set(Vec<WireValue>),
    Tuple(Vec<WireValue>),
    Buffer {
        bytes: Vec<u8>,
        width: ElementWidth,
    },
    Error {
        kind: String,
        message: String,
        traceback: Option<String>,
    },
}

fn to_wire(value: &BridgeValue) -> Result<WireValue, BridgeError> {
    match value {
        BridgeValue::Null => Ok(WireValue::Null),
        BridgeValue::Bool(b) => Ok(WireValue::Bool(*b)),
        BridgeValue::Int(i) => Ok(WireValue::Int(*i)),
        BridgeValue::Float(f) => Ok(WireValue::Float(*f)),
        BridgeValue::Str(s) => Ok(WireValue::Str(s.to_string())),
        BridgeValue::Bytes(b) => Ok(WireValue::Bytes(b.to_vec())),
        BridgeValue::Sequence(v) => Ok(WireValue::Seq(wire_list(v)?)),
        BridgeValue::Mapping(pairs) => Ok(WireValue::Map(
            pairs
                .iter()
                .map(|(k, v)| Ok((to_wire(k)?, to_wire(v)?)))
                .collect::<Result<Vec<_>, BridgeError>>()?,
        )),
        BridgeValue::Set(v) => Ok(WireValue::Set(wire_list(v)?)),
        BridgeValue::Tuple(v) => Ok(WireValue::Tuple(wire_list(v)?)),
        BridgeValue::Buffer(view) if view.is_borrowed() => Err(BridgeError::NotSerializable(
            "borrowed buffer view cannot cross a worker boundary".into(),
        )),
        BridgeValue::Buffer(view) => Ok(WireValue::Buffer {
            bytes: view.bytes()?.to_vec(),
            width: view.width(),
        }),
        BridgeValue::Callable(_) => Err(BridgeError::NotSerializable(
            "callable handles cannot cross a worker boundary".into(),
        )),
        BridgeValue::Error(e) => Ok(WireValue::Error {
            kind: e.kind.clone(),
            message: e.message.clone(),
            traceback: e.traceback.clone(),
        }),
    }
}

fn wire_list(values: &[BridgeValue]) -> Result<Vec<WireValue>, BridgeError> {
    values.iter().map(to_wire).collect()
}

fn from_wire(value: WireValue) -> BridgeValue {
    match value {
        WireValue::Null => BridgeValue::Null,
        WireValue::Bool(b) => BridgeValue::Bool(b),
        WireValue::Int(i) => BridgeValue::Int(i),
        WireValue::Float(f) => BridgeValue::Float(f),
        WireValue::Str(s) => BridgeValue::str(s),
        WireValue::Bytes(b) => BridgeValue::bytes(b),
        WireValue::Seq(v) => BridgeValue::Sequence(v.into_iter().map(from_wire).collect()),
        WireValue::Map(pairs) => BridgeValue::Mapping(
            pairs
                .into_iter()
                .map(|(k, v)| (from_wire(k), from_wire(v)))
                .collect(),
        ),
        WireValue::Set(v) => BridgeValue::set(v.into_iter().map(from_wire)),
        WireValue::Tuple(v) => BridgeValue::Tuple(v.into_iter().map(from_wire).collect()),
        WireValue::Buffer { bytes, width } => {
            BridgeValue::Buffer(BufferView::owned(bytes, width))
        }
        WireValue::Error {
            kind,
            message,
            traceback,
        } => BridgeValue::Error(ErrorValue {
            kind,
            message,
            traceback,
        }),
    }
}

fn encode(value: &BridgeValue) -> Result<Vec<u8>, BridgeError> {
    let wire = to_wire(value)?;
    serde_json::to_vec(&wire).map_err(|e| BridgeError::NotSerializable(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<BridgeValue, BridgeError> {
    let wire: WireValue =
        serde_json::from_slice(bytes).map_err(|e| BridgeError::NotSerializable(e.to_string()))?;
    Ok(from_wire(wire))
}

/// Apply `target` (a `module.function` qualified name) to every input on an
/// isolated worker set, preserving input order
pub fn parallel_map(
    dispatcher: &Dispatcher,
    target: &str,
    inputs: Vec<BridgeValue>,
    worker_count: usize,
) -> Result<Vec<BridgeValue>, BridgeError> {
    let (module_name, func_name) = target
        .rsplit_once('.')
        .ok_or_else(|| BridgeError::UnknownTarget(target.to_string()))?;

    // Every input must cross the worker boundary; reject before spawning
    let wire_inputs = inputs
        .iter()
        .map(encode)
        .collect::<Result<Vec<_>, _>>()?;
    if wire_inputs.is_empty() {
        return Ok(Vec::new());
    }

    let worker_count = worker_count.max(1).min(wire_inputs.len());
    let engines = dispatcher.spawn_workers(worker_count);
    debug!(
        "parallel_map `{target}`: {} inputs across {worker_count} workers",
        wire_inputs.len()
    );

    let chunk_size = wire_inputs.len().div_ceil(worker_count);
    let indexed: Vec<(usize, Vec<u8>)> = wire_inputs.into_iter().enumerate().collect();
    let (tx, rx) = channel::unbounded::<(usize, Result<Vec<u8>, BridgeError>)>();

    thread::scope(|scope| {
        for (engine, chunk) in engines.into_iter().zip(indexed.chunks(chunk_size)) {
            let tx = tx.clone();
            scope.spawn(move || run_pool_worker(engine, module_name, func_name, chunk, tx));
        }
    });
    drop(tx);

    let total = indexed.len();
    let mut outputs: Vec<Option<BridgeValue>> = (0..total).map(|_| None).collect();
    let mut first_error: Option<(usize, BridgeError)> = None;
    for (idx, outcome) in rx.iter() {
        match outcome {
            Ok(bytes) => outputs[idx] = Some(decode(&bytes)?),
            Err(e) => {
                if first_error.as_ref().is_none_or(|(i, _)| idx < *i) {
                    first_error = Some((idx, e));
                }
            }
        }
    }

    if let Some((_, e)) = first_error {
        return Err(e);
    }
    merge_outputs(outputs)
}

/// Merge per-index results; a slot no worker reported is an internal fault,
/// not a cancellation
fn merge_outputs(
    outputs: Vec<Option<BridgeValue>>,
) -> Result<Vec<BridgeValue>, BridgeError> {
    outputs
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.ok_or_else(|| {
                BridgeError::raised(
                    "RuntimeError",
                    format!("pool worker produced no result for input {idx}"),
                )
            })
        })
        .collect()
}

fn run_pool_worker(
    engine: Box<dyn EmbeddedEngine>,
    module_name: &str,
    func_name: &str,
    chunk: &[(usize, Vec<u8>)],
    tx: channel::Sender<(usize, Result<Vec<u8>, BridgeError>)>,
) {
    let prepared = engine
        .import(module_name)
        .and_then(|module| engine.resolve(module, func_name))
        .and_then(|target| Ok((target, engine.signature(target)?)));
    let (target, sig) = match prepared {
        Ok(ok) => ok,
        Err(fault) => {
            let e = BridgeError::from(fault);
            for (idx, _) in chunk {
                let _ = tx.send((*idx, Err(e.clone())));
            }
            return;
        }
    };

    for (idx, bytes) in chunk {
        let outcome = decode(bytes)
            .and_then(|input| bind(&sig, vec![input], Vec::new()))
            .and_then(|bound| {
                engine
                    .invoke(target, bound, &NoHostCalls)
                    .map_err(BridgeError::from)
            })
            .and_then(|output| encode(&output));
        let _ = tx.send((*idx, outcome));
    }
}
