use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use serde_json::Value;
use tank_arena_core::{AiDefinition, TankId};
use thiserror::Error;
use tracing::{debug, warn};

use crate::script::{ScriptError, ScriptHost, ScriptLimits};

/// Faults raised by an execution context instead of a response.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ContextFault {
    /// The AI script failed.
    #[error(transparent)]
    Script(#[from] ScriptError),
    /// The context stopped without being terminated.
    #[error("execution context stopped unexpectedly")]
    Disconnected,
    /// The context could not be started.
    #[error("execution context could not start: {0}")]
    Spawn(String),
    /// A message crossing the context boundary was not valid JSON.
    #[error("malformed message: {0}")]
    Malformed(String),
    /// A request was sent after the context was terminated.
    #[error("execution context was terminated")]
    Terminated,
}

impl ContextFault {
    /// Reports whether the AI failed by running too long rather than by
    /// misbehaving.
    #[must_use]
    pub fn is_performance_issue(&self) -> bool {
        matches!(self, Self::Script(error) if error.is_performance_issue())
    }
}

/// Outcome observed when polling an execution context.
#[derive(Clone, Debug, PartialEq)]
pub enum ContextEvent {
    /// The context answered the pending request.
    Message {
        /// Response produced by the AI.
        response: Value,
        /// Time the AI spent producing the response.
        elapsed: Duration,
    },
    /// The context failed.
    Fault(ContextFault),
}

/// Isolated runtime hosting a single AI.
///
/// Contexts answer each request with exactly one event and never send
/// unsolicited messages. Nothing is shared with the caller: requests and
/// responses are owned JSON values.
pub trait ExecutionContext {
    /// Hands a request to the AI.
    fn send(&mut self, message: Value) -> Result<(), ContextFault>;

    /// Waits up to `timeout` for the next response or fault.
    fn poll(&mut self, timeout: Duration) -> Option<ContextEvent>;

    /// Stops the AI and releases its resources. Safe to call repeatedly.
    fn terminate(&mut self);
}

/// Creates execution contexts for newly activated AIs.
pub trait ContextFactory {
    /// Creates the context that will run `definition` for `tank`.
    fn create(
        &self,
        tank: TankId,
        definition: &AiDefinition,
    ) -> Result<Box<dyn ExecutionContext>, ContextFault>;
}

/// Chooses between [`WorkerContext`] and [`InProcessContext`] using
/// [`AiDefinition::use_sandbox`].
#[derive(Clone, Debug, Default)]
pub struct DefaultContextFactory {
    limits: ScriptLimits,
    hard_limit: Option<Duration>,
}

impl DefaultContextFactory {
    /// Creates a factory applying `limits` to every script.
    ///
    /// Scripts still running `hard_limit` after receiving a request are
    /// stopped and leave the request unanswered.
    #[must_use]
    pub fn new(limits: ScriptLimits, hard_limit: Duration) -> Self {
        Self {
            limits,
            hard_limit: Some(hard_limit),
        }
    }
}

impl ContextFactory for DefaultContextFactory {
    fn create(
        &self,
        tank: TankId,
        definition: &AiDefinition,
    ) -> Result<Box<dyn ExecutionContext>, ContextFault> {
        if definition.use_sandbox {
            let worker = WorkerContext::spawn(tank, self.limits.clone(), self.hard_limit)?;
            Ok(Box::new(worker))
        } else {
            Ok(Box::new(InProcessContext::new(&self.limits, self.hard_limit)))
        }
    }
}

/// Context evaluating requests synchronously on the caller's thread.
///
/// Responses are queued during [`ExecutionContext::send`] and handed out by
/// [`ExecutionContext::poll`].
#[derive(Debug)]
pub struct InProcessContext {
    host: Option<ScriptHost>,
    hard_limit: Option<Duration>,
    queue: VecDeque<ContextEvent>,
}

impl InProcessContext {
    /// Creates an in-process context with a fresh script host.
    #[must_use]
    pub fn new(limits: &ScriptLimits, hard_limit: Option<Duration>) -> Self {
        Self {
            host: Some(ScriptHost::new(limits, Arc::new(AtomicBool::new(false)))),
            hard_limit,
            queue: VecDeque::new(),
        }
    }
}

impl ExecutionContext for InProcessContext {
    fn send(&mut self, message: Value) -> Result<(), ContextFault> {
        let host = self.host.as_mut().ok_or(ContextFault::Terminated)?;
        let started = Instant::now();
        let deadline = self.hard_limit.map(|limit| started + limit);
        match host.handle(&message, deadline) {
            Ok(response) => self.queue.push_back(ContextEvent::Message {
                response,
                elapsed: started.elapsed(),
            }),
            Err(ScriptError::DeadlineExceeded) => {
                warn!("in-process script stopped at its deadline");
            }
            Err(error) => self
                .queue
                .push_back(ContextEvent::Fault(ContextFault::Script(error))),
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Option<ContextEvent> {
        let event = self.queue.pop_front();
        if event.is_none() {
            // Nothing can arrive later; waiting keeps callers from spinning.
            thread::sleep(timeout);
        }
        event
    }

    fn terminate(&mut self) {
        self.host = None;
        self.queue.clear();
    }
}

enum WorkerReply {
    Message(String, Duration),
    Fault(ScriptError),
}

/// Context running the AI on a dedicated thread.
///
/// Requests and responses cross the thread boundary as serialized JSON text,
/// so the AI never holds a reference into the simulation.
#[derive(Debug)]
pub struct WorkerContext {
    requests: Option<Sender<String>>,
    replies: Receiver<WorkerReply>,
    interrupt: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerContext {
    /// Starts the worker thread of `tank`.
    pub fn spawn(
        tank: TankId,
        limits: ScriptLimits,
        hard_limit: Option<Duration>,
    ) -> Result<Self, ContextFault> {
        let (request_tx, request_rx) = mpsc::channel::<String>();
        let (reply_tx, reply_rx) = mpsc::channel::<WorkerReply>();
        let interrupt = Arc::new(AtomicBool::new(false));
        let worker_interrupt = Arc::clone(&interrupt);

        let handle = thread::Builder::new()
            .name(format!("ai-worker-{tank}"))
            .spawn(move || run_worker(&limits, hard_limit, worker_interrupt, request_rx, reply_tx))
            .map_err(|error| ContextFault::Spawn(error.to_string()))?;

        Ok(Self {
            requests: Some(request_tx),
            replies: reply_rx,
            interrupt,
            handle: Some(handle),
        })
    }
}

fn run_worker(
    limits: &ScriptLimits,
    hard_limit: Option<Duration>,
    interrupt: Arc<AtomicBool>,
    requests: Receiver<String>,
    replies: Sender<WorkerReply>,
) {
    let mut host = ScriptHost::new(limits, interrupt);

    for text in requests {
        let reply = match serde_json::from_str::<Value>(&text) {
            Ok(request) => {
                let started = Instant::now();
                let deadline = hard_limit.map(|limit| started + limit);
                match host.handle(&request, deadline) {
                    Ok(response) => WorkerReply::Message(response.to_string(), started.elapsed()),
                    Err(ScriptError::DeadlineExceeded) => continue,
                    Err(ScriptError::Terminated) => break,
                    Err(error) => WorkerReply::Fault(error),
                }
            }
            Err(error) => WorkerReply::Fault(ScriptError::InvalidRequest(error.to_string())),
        };

        if replies.send(reply).is_err() {
            break;
        }
    }
    debug!("ai worker finished");
}

impl ExecutionContext for WorkerContext {
    fn send(&mut self, message: Value) -> Result<(), ContextFault> {
        let requests = self.requests.as_ref().ok_or(ContextFault::Terminated)?;
        requests
            .send(message.to_string())
            .map_err(|_| ContextFault::Disconnected)
    }

    fn poll(&mut self, timeout: Duration) -> Option<ContextEvent> {
        match self.replies.recv_timeout(timeout) {
            Ok(WorkerReply::Message(text, elapsed)) => Some(match serde_json::from_str(&text) {
                Ok(response) => ContextEvent::Message { response, elapsed },
                Err(error) => ContextEvent::Fault(ContextFault::Malformed(error.to_string())),
            }),
            Ok(WorkerReply::Fault(error)) => Some(ContextEvent::Fault(ContextFault::Script(error))),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) if self.requests.is_none() => {
                Some(ContextEvent::Fault(ContextFault::Terminated))
            }
            Err(RecvTimeoutError::Disconnected) => Some(ContextEvent::Fault(ContextFault::Disconnected)),
        }
    }

    fn terminate(&mut self) {
        self.interrupt.store(true, Ordering::Relaxed);
        self.requests = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("ai worker panicked while shutting down");
            }
        }
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::{ContextEvent, ContextFault, ExecutionContext, InProcessContext, WorkerContext};
    use crate::script::ScriptLimits;
    use serde_json::json;
    use std::time::Duration;
    use tank_arena_core::TankId;

    const CODE: &str = "fn update(state, control) { control.TURN = state.x; control }";

    fn init() -> serde_json::Value {
        json!({ "command": "init", "seed": "1:1", "settings": {}, "info": {}, "code": CODE })
    }

    fn update() -> serde_json::Value {
        json!({ "command": "update", "state": { "x": 0.5 }, "control": {} })
    }

    #[test]
    fn in_process_context_answers_in_order() {
        let mut context = InProcessContext::new(&ScriptLimits::default(), None);
        context.send(init()).expect("send init");
        context.send(update()).expect("send update");

        let first = context.poll(Duration::ZERO);
        assert!(matches!(
            first,
            Some(ContextEvent::Message { ref response, .. }) if response["type"] == "init"
        ));
        let second = context.poll(Duration::ZERO);
        assert!(matches!(
            second,
            Some(ContextEvent::Message { ref response, .. }) if *response == json!({ "TURN": 0.5 })
        ));
        assert_eq!(context.poll(Duration::ZERO), None);
    }

    #[test]
    fn terminated_in_process_context_refuses_requests() {
        let mut context = InProcessContext::new(&ScriptLimits::default(), None);
        context.terminate();
        context.terminate();
        assert_eq!(context.send(init()), Err(ContextFault::Terminated));
    }

    #[test]
    fn worker_context_answers_across_threads() {
        let mut context =
            WorkerContext::spawn(TankId::new(4), ScriptLimits::default(), None).expect("spawn");
        context.send(init()).expect("send init");
        context.send(update()).expect("send update");

        let first = context.poll(Duration::from_secs(5));
        assert!(matches!(first, Some(ContextEvent::Message { .. })));
        let second = context.poll(Duration::from_secs(5));
        assert!(matches!(
            second,
            Some(ContextEvent::Message { ref response, .. }) if *response == json!({ "TURN": 0.5 })
        ));

        context.terminate();
        assert_eq!(context.send(update()), Err(ContextFault::Terminated));
    }

    #[test]
    fn worker_context_reports_script_faults() {
        let mut context =
            WorkerContext::spawn(TankId::new(5), ScriptLimits::default(), None).expect("spawn");
        context
            .send(json!({ "command": "init", "seed": "x", "code": "fn broken(" }))
            .expect("send");

        let event = context.poll(Duration::from_secs(5));
        assert!(matches!(
            event,
            Some(ContextEvent::Fault(ContextFault::Script(_)))
        ));
    }

    #[test]
    fn worker_termination_stops_runaway_scripts() {
        let limits = ScriptLimits {
            max_operations: 0,
            ..ScriptLimits::default()
        };
        let mut context = WorkerContext::spawn(TankId::new(6), limits, None).expect("spawn");
        context
            .send(json!({
                "command": "init",
                "seed": "x",
                "code": "fn update(state, control) { loop {} }",
            }))
            .expect("send init");
        assert!(matches!(
            context.poll(Duration::from_secs(5)),
            Some(ContextEvent::Message { .. })
        ));
        context.send(update()).expect("send update");
        assert_eq!(context.poll(Duration::from_millis(20)), None);

        context.terminate();
    }
}
