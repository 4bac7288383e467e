//! Fixture engine
//!
//! A small embedded runtime implementing [`EmbeddedEngine`] with the fixture
//! corpus the bridge is exercised against: scalar arithmetic, dict merges,
//! vector/matrix ops, buffer round trips, keyword handling, callback
//! invocation, exception raising and the pool's pure `compute` function.
//!
//! The fixtures are intentionally trivial; everything interesting happens in
//! the bridge that calls them.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::bridge::buffer::BufferView;
use crate::bridge::error::BridgeError;
use crate::bridge::value::{BridgeValue, Capability};
use crate::engine::{CallableRef, EmbeddedEngine, EngineFault, HostCalls, Signature};

/// The single importable module name
pub const MODULE: &str = "fixtures";

type FixtureFn = fn(Vec<BridgeValue>, &dyn HostCalls) -> Result<BridgeValue, EngineFault>;
type CtorFn = fn(Vec<BridgeValue>) -> Result<InstanceState, EngineFault>;

enum FixtureBody {
    Plain(FixtureFn),
    Ctor(CtorFn),
}

struct Fixture {
    name: &'static str,
    signature: Signature,
    body: FixtureBody,
}

/// Per-instance embedded state; no class-level shared defaults
#[derive(Debug, Clone)]
enum InstanceState {
    Calculator { vector: Vec<f64> },
}

static FIXTURES: Lazy<Vec<Fixture>> = Lazy::new(|| {
    vec![
        Fixture {
            name: "hello",
            signature: Signature::function(&[]),
            body: FixtureBody::Plain(fx_hello),
        },
        Fixture {
            name: "dump",
            signature: Signature::function(&["a", "b"]),
            body: FixtureBody::Plain(fx_dump),
        },
        Fixture {
            name: "calc",
            signature: Signature::function(&["add", "a", "b"]),
            body: FixtureBody::Plain(fx_calc),
        },
        Fixture {
            name: "concatenate",
            signature: Signature::function(&["s1", "s2"]),
            body: FixtureBody::Plain(fx_concatenate),
        },
        Fixture {
            name: "check",
            signature: Signature::function(&["a"]),
            body: FixtureBody::Plain(fx_check),
        },
        Fixture {
            name: "multiple",
            signature: Signature::function(&["a", "b"]),
            body: FixtureBody::Plain(fx_multiple),
        },
        Fixture {
            name: "multiple2d",
            signature: Signature::function(&["a", "b"]),
            body: FixtureBody::Plain(fx_multiple2d),
        },
        Fixture {
            name: "createtuple",
            signature: Signature::function(&[]),
            body: FixtureBody::Plain(fx_createtuple),
        },
        Fixture {
            name: "mergedict",
            signature: Signature::function(&["a", "b"]),
            body: FixtureBody::Plain(fx_mergedict),
        },
        Fixture {
            name: "undefined",
            signature: Signature::function(&["un", "n"]),
            body: FixtureBody::Plain(fx_undefined),
        },
        Fixture {
            name: "kwargstest",
            signature: Signature::function(&["value"]).with_varkw(),
            body: FixtureBody::Plain(fx_kwargstest),
        },
        Fixture {
            name: "test_buffer",
            signature: Signature::function(&["buf"]),
            body: FixtureBody::Plain(fx_test_buffer),
        },
        Fixture {
            name: "test_function_promise",
            signature: Signature::function(&["mode", "f"]),
            body: FixtureBody::Plain(fx_test_function_promise),
        },
        Fixture {
            name: "raise_error",
            signature: Signature::function(&[]),
            body: FixtureBody::Plain(fx_raise_error),
        },
        Fixture {
            name: "compute",
            signature: Signature::function(&["i"]),
            body: FixtureBody::Plain(fx_compute),
        },
        Fixture {
            name: "Calculator",
            signature: Signature::function(&["vector"]).constructor(),
            body: FixtureBody::Ctor(ctor_calculator),
        },
    ]
});

/// Embedded runtime hosting the fixture corpus
///
/// Mutable state lives behind interior mutability because the dispatcher
/// serializes entry and re-enters on the same thread during callbacks.
pub struct FixtureEngine {
    modules: RefCell<HashMap<u64, String>>,
    next_module: Cell<u64>,
    instances: RefCell<HashMap<u64, InstanceState>>,
}

impl FixtureEngine {
    /// Fresh engine with no modules loaded and no live instances
    pub fn new() -> Self {
        Self {
            modules: RefCell::new(HashMap::new()),
            next_module: Cell::new(1),
            instances: RefCell::new(HashMap::new()),
        }
    }
}

impl Default for FixtureEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip directory components and a trailing `.py`; the loader accepts
/// either a bare module name or a script path
fn normalize_module(name: &str) -> &str {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);
    base.strip_suffix(".py").unwrap_or(base)
}

impl EmbeddedEngine for FixtureEngine {
    fn import(
        &self,
        name: &str,
    ) -> Result<u64, EngineFault> {
        let normalized = normalize_module(name);
        if normalized != MODULE {
            return Err(EngineFault::Bridge(BridgeError::UnknownTarget(
                name.to_string(),
            )));
        }
        let id = self.next_module.get();
        self.next_module.set(id + 1);
        self.modules.borrow_mut().insert(id, normalized.to_string());
        Ok(id)
    }

    fn resolve(
        &self,
        module: u64,
        name: &str,
    ) -> Result<CallableRef, EngineFault> {
        if !self.modules.borrow().contains_key(&module) {
            return Err(EngineFault::Bridge(BridgeError::HandleExpired));
        }
        FIXTURES
            .iter()
            .position(|f| f.name == name)
            .map(CallableRef)
            .ok_or_else(|| EngineFault::Bridge(BridgeError::UnknownTarget(name.to_string())))
    }

    fn signature(
        &self,
        target: CallableRef,
    ) -> Result<Signature, EngineFault> {
        FIXTURES
            .get(target.0)
            .map(|f| f.signature.clone())
            .ok_or_else(|| EngineFault::Bridge(BridgeError::UnknownTarget(format!("#{}", target.0))))
    }

    fn invoke(
        &self,
        target: CallableRef,
        args: Vec<BridgeValue>,
        host: &dyn HostCalls,
    ) -> Result<BridgeValue, EngineFault> {
        let fixture = FIXTURES
            .get(target.0)
            .ok_or_else(|| EngineFault::Bridge(BridgeError::UnknownTarget(format!("#{}", target.0))))?;
        match fixture.body {
            FixtureBody::Plain(f) => f(args, host),
            FixtureBody::Ctor(_) => Err(EngineFault::raised(
                "TypeError",
                format!("`{}` is a constructor", fixture.name),
            )),
        }
    }

    fn construct(
        &self,
        target: CallableRef,
        args: Vec<BridgeValue>,
        _host: &dyn HostCalls,
    ) -> Result<u64, EngineFault> {
        let fixture = FIXTURES
            .get(target.0)
            .ok_or_else(|| EngineFault::Bridge(BridgeError::UnknownTarget(format!("#{}", target.0))))?;
        let state = match fixture.body {
            FixtureBody::Ctor(f) => f(args)?,
            FixtureBody::Plain(_) => {
                return Err(EngineFault::raised(
                    "TypeError",
                    format!("`{}` is not a constructor", fixture.name),
                ))
            }
        };

        let mut instances = self.instances.borrow_mut();
        // Ids are salted so a released id does not resolve again
        let mut id = rand::random::<u64>();
        while instances.contains_key(&id) {
            id = rand::random::<u64>();
        }
        instances.insert(id, state);
        Ok(id)
    }

    fn method_signature(
        &self,
        instance: u64,
        name: &str,
    ) -> Result<Signature, EngineFault> {
        let instances = self.instances.borrow();
        let state = instances
            .get(&instance)
            .ok_or(EngineFault::Bridge(BridgeError::HandleExpired))?;
        match (state, name) {
            (InstanceState::Calculator { .. }, "multiply") => {
                Ok(Signature::function(&["scalar", "vector"]))
            }
            _ => Err(EngineFault::Bridge(BridgeError::UnknownTarget(
                name.to_string(),
            ))),
        }
    }

    fn invoke_method(
        &self,
        instance: u64,
        name: &str,
        args: Vec<BridgeValue>,
        _host: &dyn HostCalls,
    ) -> Result<BridgeValue, EngineFault> {
        let instances = self.instances.borrow();
        let state = instances
            .get(&instance)
            .ok_or(EngineFault::Bridge(BridgeError::HandleExpired))?;
        match (state, name) {
            (InstanceState::Calculator { vector }, "multiply") => {
                let mut args = args.into_iter();
                let scalar = number(&args.next().unwrap_or_default())?;
                let addend = number_list(&args.next().unwrap_or_default())?;
                if addend.len() != vector.len() {
                    return Err(broadcast_error(vector.len(), addend.len()));
                }
                Ok(BridgeValue::Sequence(
                    vector
                        .iter()
                        .zip(&addend)
                        .map(|(v, a)| BridgeValue::Float(scalar * v + a))
                        .collect(),
                ))
            }
            _ => Err(EngineFault::Bridge(BridgeError::UnknownTarget(
                name.to_string(),
            ))),
        }
    }

    fn release_instance(
        &self,
        instance: u64,
    ) {
        self.instances.borrow_mut().remove(&instance);
    }

    fn spawn_worker(&self) -> Box<dyn EmbeddedEngine> {
        Box::new(FixtureEngine::new())
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

fn type_error(message: impl Into<String>) -> EngineFault {
    EngineFault::raised("TypeError", message)
}

fn broadcast_error(
    left: usize,
    right: usize,
) -> EngineFault {
    EngineFault::raised(
        "ValueError",
        format!("operands could not be broadcast together ({left} vs {right})"),
    )
}

fn number(v: &BridgeValue) -> Result<f64, EngineFault> {
    v.as_number()
        .ok_or_else(|| type_error(format!("expected a number, got {}", v.variant())))
}

fn string(v: &BridgeValue) -> Result<&str, EngineFault> {
    v.as_str()
        .ok_or_else(|| type_error(format!("expected a string, got {}", v.variant())))
}

fn number_list(v: &BridgeValue) -> Result<Vec<f64>, EngineFault> {
    v.as_sequence()
        .ok_or_else(|| type_error(format!("expected a list, got {}", v.variant())))?
        .iter()
        .map(number)
        .collect()
}

fn all_ints(values: &[BridgeValue]) -> bool {
    values.iter().all(|v| matches!(v, BridgeValue::Int(_)))
}

/// Integer operands produce integer results; any float operand widens
fn numeric(value: f64, integral: bool) -> BridgeValue {
    if integral {
        BridgeValue::Int(value as i64)
    } else {
        BridgeValue::Float(value)
    }
}

// ============================================================================
// Fixture bodies
// ============================================================================

fn fx_hello(
    _args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    debug!("hello world");
    Ok(BridgeValue::Null)
}

fn fx_dump(
    args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    debug!("{}{}", args[0], args[1]);
    Ok(BridgeValue::Null)
}

fn fx_calc(
    mut args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    let b = args.pop().unwrap_or_default();
    let a = args.pop().unwrap_or_default();
    let add = args.pop().unwrap_or_default();
    let integral = all_ints(&[a.clone(), b.clone()]);
    let (a, b) = (number(&a)?, number(&b)?);
    let result = if add.is_truthy() { a + b } else { a * b };
    Ok(numeric(result, integral))
}

fn fx_concatenate(
    args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    let mut out = String::from(string(&args[0])?);
    out.push_str(string(&args[1])?);
    Ok(BridgeValue::str(out))
}

fn fx_check(
    args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    Ok(BridgeValue::Bool(args[0].as_number() == Some(42.0)))
}

fn fx_multiple(
    args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    let integral = args
        .iter()
        .all(|v| v.as_sequence().is_some_and(all_ints));
    let a = number_list(&args[0])?;
    let b = number_list(&args[1])?;
    if a.len() != b.len() {
        return Err(broadcast_error(a.len(), b.len()));
    }
    Ok(BridgeValue::Sequence(
        a.iter()
            .zip(&b)
            .map(|(x, y)| numeric(x * y, integral))
            .collect(),
    ))
}

fn fx_multiple2d(
    args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    let integral = args.iter().all(|m| {
        m.as_sequence().is_some_and(|rows| {
            rows.iter()
                .all(|r| r.as_sequence().is_some_and(all_ints))
        })
    });
    let a = matrix(&args[0])?;
    let b = matrix(&args[1])?;
    let inner = b.len();
    if a.iter().any(|row| row.len() != inner) {
        return Err(broadcast_error(a.first().map_or(0, Vec::len), inner));
    }
    let cols = b.first().map_or(0, Vec::len);
    let mut out = Vec::with_capacity(a.len());
    for row in &a {
        let mut out_row = Vec::with_capacity(cols);
        for j in 0..cols {
            let sum: f64 = row.iter().zip(&b).map(|(x, brow)| x * brow[j]).sum();
            out_row.push(numeric(sum, integral));
        }
        out.push(BridgeValue::Sequence(out_row));
    }
    Ok(BridgeValue::Sequence(out))
}

fn matrix(v: &BridgeValue) -> Result<Vec<Vec<f64>>, EngineFault> {
    v.as_sequence()
        .ok_or_else(|| type_error(format!("expected a matrix, got {}", v.variant())))?
        .iter()
        .map(number_list)
        .collect()
}

fn fx_createtuple(
    _args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    Ok(BridgeValue::Tuple(vec![
        BridgeValue::str("aaa"),
        BridgeValue::Int(1),
        BridgeValue::Float(2.3),
    ]))
}

fn fx_mergedict(
    args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    let a = args[0]
        .as_mapping()
        .ok_or_else(|| type_error(format!("expected a dict, got {}", args[0].variant())))?;
    let b = args[1]
        .as_mapping()
        .ok_or_else(|| type_error(format!("expected a dict, got {}", args[1].variant())))?;
    // Later source wins on key collision
    Ok(BridgeValue::mapping(
        a.iter().chain(b.iter()).cloned(),
    ))
}

fn fx_undefined(
    mut args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    let n = args.pop().unwrap_or_default();
    let un = args.pop().unwrap_or_default();
    Ok(BridgeValue::Tuple(vec![
        un,
        n,
        BridgeValue::set(vec![
            BridgeValue::Int(1),
            BridgeValue::Int(2),
            BridgeValue::str("www"),
        ]),
    ]))
}

fn fx_kwargstest(
    mut args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    let surplus = args.pop().unwrap_or_default();
    let value = args.pop().unwrap_or_default();

    let defaults = [(BridgeValue::str("test"), BridgeValue::Int(1234))];
    let overrides = surplus.as_mapping().unwrap_or(&[]).to_vec();
    let merged = defaults
        .into_iter()
        .chain(overrides)
        .chain([(BridgeValue::str("value"), value)]);
    Ok(BridgeValue::mapping(merged))
}

fn fx_test_buffer(
    args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    let view = match &args[0] {
        BridgeValue::Buffer(view) => view.clone(),
        other => return Err(type_error(format!("expected a buffer, got {}", other.variant()))),
    };
    let doubled: Vec<f32> = view
        .as_f32s()
        .map_err(EngineFault::Bridge)?
        .into_iter()
        .map(|v| v * 2.0)
        .collect();
    Ok(BridgeValue::Buffer(BufferView::from_f32s(&doubled)))
}

fn fx_test_function_promise(
    args: Vec<BridgeValue>,
    host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    let callable = args[1]
        .as_callable()
        .filter(|c| c.capability == Capability::HostCallback)
        .ok_or_else(|| type_error(format!("expected a callback, got {}", args[1].variant())))?;

    if !args[0].is_truthy() {
        // No-op branch: one invocation, no arguments
        host.invoke_callback(callable.handle, Vec::new())?;
        return Ok(BridgeValue::Null);
    }

    // Compute branch: two invocations with different argument shapes
    let res = host.invoke_callback(
        callable.handle,
        vec![
            BridgeValue::Int(123),
            BridgeValue::Sequence(vec![
                BridgeValue::Int(1),
                BridgeValue::Int(2),
                BridgeValue::Int(4),
            ]),
            BridgeValue::mapping(vec![
                (BridgeValue::str("a"), BridgeValue::Int(1)),
                (BridgeValue::str("b"), BridgeValue::Int(2)),
            ]),
        ],
    )?;

    let integral = matches!(res, BridgeValue::Int(_));
    let n = number(&res)?;
    host.invoke_callback(callable.handle, vec![numeric(n * 125.0, integral)])?;
    Ok(numeric(n * 22.0, integral))
}

fn fx_raise_error(
    _args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    Err(EngineFault::Raised {
        kind: "RuntimeError".into(),
        message: "fixture failure".into(),
        traceback: Some(
            "Traceback (most recent call last):\n  in raise_error\nRuntimeError: fixture failure"
                .into(),
        ),
    })
}

fn fx_compute(
    args: Vec<BridgeValue>,
    _host: &dyn HostCalls,
) -> Result<BridgeValue, EngineFault> {
    let integral = matches!(args[0], BridgeValue::Int(_));
    Ok(numeric(number(&args[0])? * 2.0, integral))
}

fn ctor_calculator(args: Vec<BridgeValue>) -> Result<InstanceState, EngineFault> {
    Ok(InstanceState::Calculator {
        vector: number_list(&args[0])?,
    })
}
