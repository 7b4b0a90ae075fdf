use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, Map, ParseError, Scope, AST};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Faults raised while compiling or running an AI script.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    /// The script source does not parse.
    #[error("{}", located(line, message))]
    Compile {
        /// Line of the offending token, when known.
        line: Option<usize>,
        /// Parser message.
        message: String,
    },
    /// The script raised an error while running.
    #[error("{}", located(line, message))]
    Runtime {
        /// Line of the failing statement, when known.
        line: Option<usize>,
        /// Runtime message.
        message: String,
    },
    /// The script kept running past its processing deadline.
    #[error("script exceeded its processing deadline")]
    DeadlineExceeded,
    /// The script used up its operation budget.
    #[error("script exceeded its operation budget")]
    OperationLimitExceeded,
    /// The host was interrupted from outside.
    #[error("script was terminated")]
    Terminated,
    /// The host received a request it does not understand.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ScriptError {
    /// Reports whether the script was stopped for running too long.
    #[must_use]
    pub fn is_performance_issue(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::OperationLimitExceeded)
    }
}

fn located(line: &Option<usize>, message: &str) -> String {
    match line {
        Some(line) => format!("Line #{line}: {message}"),
        None => message.to_owned(),
    }
}

/// Resource ceilings applied to every script engine.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Operations a single `init` or `update` call may perform.
    pub max_operations: u64,
    /// Maximum function call depth.
    pub max_call_levels: usize,
    /// Maximum string length in bytes.
    pub max_string_size: usize,
    /// Maximum number of array elements.
    pub max_array_size: usize,
    /// Maximum number of map entries.
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 2_000_000,
            max_call_levels: 64,
            max_string_size: 64 * 1024,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

/// Sandboxed Rhai runtime answering `init` and `update` requests of one AI.
///
/// The script keeps its memory in the `this` map, which survives across
/// calls. `random()` draws from a generator seeded by the `init` request, so
/// two hosts initialised with different seeds never share a stream.
pub struct ScriptHost {
    engine: Engine,
    ast: Option<AST>,
    scope: Scope<'static>,
    memory: Dynamic,
    rng: Rc<RefCell<ChaCha8Rng>>,
    deadline: Rc<Cell<Option<Instant>>>,
    interrupt: Arc<AtomicBool>,
}

impl std::fmt::Debug for ScriptHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptHost")
            .field("loaded", &self.ast.is_some())
            .finish_non_exhaustive()
    }
}

impl ScriptHost {
    /// Creates a host with an empty program.
    ///
    /// Raising `interrupt` stops a running script at its next operation.
    #[must_use]
    pub fn new(limits: &ScriptLimits, interrupt: Arc<AtomicBool>) -> Self {
        let rng = Rc::new(RefCell::new(seeded_rng("")));
        let deadline = Rc::new(Cell::new(None::<Instant>));

        let mut engine = Engine::new();
        let _ = engine
            .set_max_operations(limits.max_operations)
            .set_max_call_levels(limits.max_call_levels)
            .set_max_string_size(limits.max_string_size)
            .set_max_array_size(limits.max_array_size)
            .set_max_map_size(limits.max_map_size)
            .disable_symbol("eval");

        let progress_interrupt = Arc::clone(&interrupt);
        let progress_deadline = Rc::clone(&deadline);
        let _ = engine.on_progress(move |_| {
            if progress_interrupt.load(Ordering::Relaxed) {
                return Some(Dynamic::UNIT);
            }
            match progress_deadline.get() {
                Some(limit) if Instant::now() > limit => Some(Dynamic::UNIT),
                _ => None,
            }
        });

        let script_rng = Rc::clone(&rng);
        let _ = engine.register_fn("random", move || script_rng.borrow_mut().gen::<f64>());
        let _ = engine.on_print(|text| debug!(target: "tank_arena::script", "{text}"));
        let _ = engine.on_debug(|text, _, position| {
            debug!(target: "tank_arena::script", line = position.line(), "{text}");
        });

        Self {
            engine,
            ast: None,
            scope: Scope::new(),
            memory: Dynamic::from_map(Map::new()),
            rng,
            deadline,
            interrupt,
        }
    }

    /// Answers one protocol request.
    ///
    /// `deadline` bounds the wall-clock time the script may run; past it the
    /// call fails with [`ScriptError::DeadlineExceeded`].
    pub fn handle(&mut self, request: &Value, deadline: Option<Instant>) -> Result<Value, ScriptError> {
        self.deadline.set(deadline);
        let command = request
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| ScriptError::InvalidRequest("missing command".to_owned()))?;

        let result = match command {
            "init" => self.init(request),
            "update" => self.update(request),
            other => Err(ScriptError::InvalidRequest(format!("unknown command '{other}'"))),
        };
        self.deadline.set(None);
        result
    }

    fn init(&mut self, request: &Value) -> Result<Value, ScriptError> {
        let code = request
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| ScriptError::InvalidRequest("init without code".to_owned()))?;
        let seed = request.get("seed").and_then(Value::as_str).unwrap_or_default();
        *self.rng.borrow_mut() = seeded_rng(seed);

        let ast = self.engine.compile(code).map_err(compile_error)?;
        self.scope = Scope::new();
        self.memory = Dynamic::from_map(Map::new());
        self.engine
            .run_ast_with_scope(&mut self.scope, &ast)
            .map_err(|error| self.runtime_error(error))?;

        let settings = request.get("settings").cloned().unwrap_or(Value::Null);
        let settings = if defines(&ast, "init", 2) {
            let info = request.get("info").cloned().unwrap_or(Value::Null);
            let returned = self.call(&ast, "init", &settings, &info)?;
            if returned.is_object() {
                returned
            } else {
                settings
            }
        } else {
            settings
        };

        self.ast = Some(ast);
        Ok(serde_json::json!({ "type": "init", "settings": settings }))
    }

    fn update(&mut self, request: &Value) -> Result<Value, ScriptError> {
        let Some(ast) = self.ast.take() else {
            return Err(ScriptError::InvalidRequest("update before init".to_owned()));
        };

        let state = request.get("state").cloned().unwrap_or(Value::Null);
        let control = request.get("control").cloned().unwrap_or(Value::Null);
        let result = if defines(&ast, "update", 2) {
            self.call(&ast, "update", &state, &control)
                .map(|returned| if returned.is_object() { returned } else { control })
        } else {
            Ok(control)
        };

        self.ast = Some(ast);
        result
    }

    fn call(&mut self, ast: &AST, name: &str, first: &Value, second: &Value) -> Result<Value, ScriptError> {
        let args = (to_script(first)?, to_script(second)?);
        let options = CallFnOptions::new()
            .eval_ast(false)
            .rewind_scope(true)
            .bind_this_ptr(&mut self.memory);
        let outcome = self
            .engine
            .call_fn_with_options::<Dynamic>(options, &mut self.scope, ast, name, args);

        match outcome {
            Ok(returned) => rhai::serde::from_dynamic::<Value>(&returned).map_err(|error| {
                ScriptError::Runtime {
                    line: None,
                    message: format!("cannot convert the value returned by {name}: {error}"),
                }
            }),
            Err(error) => Err(self.runtime_error(error)),
        }
    }

    fn runtime_error(&self, error: Box<EvalAltResult>) -> ScriptError {
        if self.interrupt.load(Ordering::Relaxed) {
            return ScriptError::Terminated;
        }

        let mut error = *error;
        loop {
            match error {
                EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => error = *inner,
                EvalAltResult::ErrorTerminated(..) => return ScriptError::DeadlineExceeded,
                EvalAltResult::ErrorTooManyOperations(..) => {
                    return ScriptError::OperationLimitExceeded
                }
                other => {
                    error = other;
                    break;
                }
            }
        }

        let position = error.take_position();
        ScriptError::Runtime {
            line: position.line(),
            message: error.to_string(),
        }
    }
}

fn defines(ast: &AST, name: &str, params: usize) -> bool {
    ast.iter_functions()
        .any(|function| function.name == name && function.params.len() == params)
}

fn to_script(value: &Value) -> Result<Dynamic, ScriptError> {
    rhai::serde::to_dynamic(value).map_err(|error| {
        ScriptError::InvalidRequest(format!("cannot convert request payload: {error}"))
    })
}

fn compile_error(error: ParseError) -> ScriptError {
    ScriptError::Compile {
        line: error.1.line(),
        message: error.0.to_string(),
    }
}

/// Seeds the script generator from the per-tank seed string.
fn seeded_rng(seed: &str) -> ChaCha8Rng {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0_u8; 32];
    bytes.copy_from_slice(&digest);
    ChaCha8Rng::from_seed(bytes)
}
