#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Supervised execution of tank AIs.
//!
//! Every tank owns one [`AiSupervisor`]. The supervisor runs the tank's AI in
//! an isolated [`ExecutionContext`], bounds every request with a
//! [`Watchdog`], and turns raw responses into sanitized [`ControlState`]
//! values written onto the tank. A request is dispatched with
//! [`AiSupervisor::activate`] or [`AiSupervisor::simulation_step`] and its
//! outcome is collected with [`AiSupervisor::settle`], which yields exactly one
//! success or failure per request.

use std::{
    fmt,
    rc::Rc,
    time::{Duration, Instant},
};

use serde::Deserialize;
use serde_json::Value;
use tank_arena_core::{AiDefinition, ControlState, Tank, TankId, TankSettings, Team, TeamMessage};
use thiserror::Error;
use tracing::{debug, error, info, warn};

mod context;
mod observers;
mod protocol;
mod script;
mod watchdog;

pub use context::{
    ContextEvent, ContextFactory, ContextFault, DefaultContextFactory, ExecutionContext,
    InProcessContext, WorkerContext,
};
pub use observers::{ObserverId, Observers};
pub use protocol::TeamInfo;
pub use script::{ScriptError, ScriptHost, ScriptLimits};
pub use watchdog::Watchdog;

/// Tunables shared by every supervisor of a match.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Hard wall-clock cap of a single request, in milliseconds.
    pub processing_time_limit: u64,
    /// Responses over the soft execution budget tolerated before the AI is
    /// failed for performance issues.
    pub slow_ai_tolerance: u32,
    /// Resource ceilings applied to the script runtime.
    pub script: ScriptLimits,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            processing_time_limit: 3000,
            slow_ai_tolerance: 10,
            script: ScriptLimits::default(),
        }
    }
}

impl SupervisorConfig {
    /// Hard wall-clock cap of a single request.
    #[must_use]
    pub const fn hard_limit(&self) -> Duration {
        Duration::from_millis(self.processing_time_limit)
    }

    /// Builds the context factory matching this configuration.
    #[must_use]
    pub fn context_factory(&self) -> DefaultContextFactory {
        DefaultContextFactory::new(self.script.clone(), self.hard_limit())
    }
}

/// Lifecycle of a supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    /// Created, never activated.
    Idle,
    /// `init` request in flight.
    Activating,
    /// Waiting for the next simulation step.
    Ready,
    /// `update` request in flight.
    Processing,
    /// The AI failed and its context is gone.
    Failed,
    /// Deactivated by the orchestrator.
    Deactivated,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Activating => "activating",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Failed => "failed",
            Self::Deactivated => "deactivated",
        };
        f.write_str(name)
    }
}

/// Operation called in a state that does not allow it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    /// The supervisor is not in a state accepting the operation.
    #[error("cannot {operation} while the supervisor is {state}")]
    InvalidState {
        /// Rejected operation.
        operation: &'static str,
        /// State the supervisor was in.
        state: SupervisorState,
    },
    /// The supervisor was handed a tank it does not drive.
    #[error("supervisor of tank {expected} was handed tank {actual}")]
    ForeignTank {
        /// Tank driven by the supervisor.
        expected: TankId,
        /// Tank that was passed in.
        actual: TankId,
    },
}

/// Per-tank AI failure; the orchestrator decides what it means for the match.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AiFailure {
    /// Human-readable description naming the tank.
    pub message: String,
    /// The AI was too slow rather than broken.
    pub performance_issues: bool,
    /// Name of the AI driving the tank.
    pub tank_name: String,
    /// Identifier of the tank.
    pub tank_id: TankId,
}

/// Result of [`AiSupervisor::simulation_step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepDispatch {
    /// An `update` request is in flight; collect it with [`AiSupervisor::settle`].
    Dispatched,
    /// The tank is destroyed; its context was torn down and nothing is pending.
    Retired,
}

/// Successful outcome of [`AiSupervisor::settle`].
#[derive(Clone, Debug, PartialEq)]
pub enum Settled {
    /// Nothing was pending.
    Idle,
    /// The AI finished initialising and its settings were applied.
    Activated(TankSettings),
    /// Control values were applied to the tank.
    Controlled {
        /// Time the AI took to answer.
        elapsed: Duration,
        /// The response exceeded the soft execution budget.
        slow: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RequestKind {
    Init,
    Update,
}

#[derive(Clone, Copy, Debug)]
struct PendingRequest {
    kind: RequestKind,
}

/// Supervisor running one tank's AI.
pub struct AiSupervisor {
    tank: TankId,
    tank_name: String,
    full_name: String,
    definition: AiDefinition,
    config: SupervisorConfig,
    factory: Rc<dyn ContextFactory>,
    context: Option<Box<dyn ExecutionContext>>,
    state: SupervisorState,
    watchdog: Watchdog,
    pending: Option<PendingRequest>,
    deferred_fault: Option<ContextFault>,
    slow_ai_chances: u32,
    previous_control: ControlState,
    cycle_open: bool,
    activated: Observers<TankId>,
    deactivated: Observers<TankId>,
}

impl fmt::Debug for AiSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiSupervisor")
            .field("tank", &self.tank)
            .field("name", &self.tank_name)
            .field("state", &self.state)
            .field("slow_ai_chances", &self.slow_ai_chances)
            .finish_non_exhaustive()
    }
}

impl AiSupervisor {
    /// Creates an idle supervisor for `tank`.
    #[must_use]
    pub fn new(
        tank: &Tank,
        definition: AiDefinition,
        config: SupervisorConfig,
        factory: Rc<dyn ContextFactory>,
    ) -> Self {
        let watchdog = Watchdog::new(definition.execution_limit, config.hard_limit());
        Self {
            tank: tank.id(),
            tank_name: tank.name().to_owned(),
            full_name: tank.full_name(),
            slow_ai_chances: config.slow_ai_tolerance,
            definition,
            config,
            factory,
            context: None,
            state: SupervisorState::Idle,
            watchdog,
            pending: None,
            deferred_fault: None,
            previous_control: ControlState::default(),
            cycle_open: false,
            activated: Observers::new(),
            deactivated: Observers::new(),
        }
    }

    /// Tank driven by this supervisor.
    #[must_use]
    pub const fn tank(&self) -> TankId {
        self.tank
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SupervisorState {
        self.state
    }

    /// Over-budget responses still tolerated.
    #[must_use]
    pub const fn slow_ai_chances(&self) -> u32 {
        self.slow_ai_chances
    }

    /// Control values the AI will see in its next `update` request.
    #[must_use]
    pub fn previous_control(&self) -> &ControlState {
        &self.previous_control
    }

    /// Reports whether a request awaits [`AiSupervisor::settle`].
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Observers invoked when an activation completes.
    pub fn activation_observers(&mut self) -> &mut Observers<TankId> {
        &mut self.activated
    }

    /// Observers invoked once per activation cycle when the AI is deactivated.
    pub fn deactivation_observers(&mut self) -> &mut Observers<TankId> {
        &mut self.deactivated
    }

    /// Starts the AI and sends its `init` request.
    ///
    /// `seed` is the per-tank seed, see
    /// [`MatchDescription::tank_seed`](tank_arena_core::MatchDescription::tank_seed).
    pub fn activate(&mut self, seed: &str, tank: &Tank, team: &TeamInfo) -> Result<(), UsageError> {
        self.ensure_tank(tank)?;
        if !matches!(self.state, SupervisorState::Idle | SupervisorState::Deactivated) {
            return Err(self.invalid_state("activate"));
        }

        self.slow_ai_chances = self.config.slow_ai_tolerance;
        self.previous_control = ControlState::default();
        self.deferred_fault = None;
        self.cycle_open = true;
        self.state = SupervisorState::Activating;

        let request = protocol::init_request(seed, tank, team, &self.definition);
        match self.factory.create(self.tank, &self.definition) {
            Ok(context) => {
                self.context = Some(context);
                self.dispatch(RequestKind::Init, request);
            }
            Err(fault) => self.defer(RequestKind::Init, fault),
        }

        info!(tank = self.tank.get(), name = %self.tank_name, "activating AI");
        Ok(())
    }

    /// Sends the `update` request of the current tick.
    ///
    /// Destroyed tanks no longer run AI: their context is torn down and
    /// [`StepDispatch::Retired`] is returned with nothing pending.
    pub fn simulation_step(
        &mut self,
        tank: &Tank,
        inbox: &[TeamMessage],
    ) -> Result<StepDispatch, UsageError> {
        self.ensure_tank(tank)?;
        if self.state != SupervisorState::Ready {
            return Err(self.invalid_state("run a simulation step"));
        }

        if tank.is_destroyed() {
            if self.context.is_some() {
                debug!(tank = self.tank.get(), "tank destroyed, retiring AI");
            }
            self.teardown();
            return Ok(StepDispatch::Retired);
        }

        let request = protocol::update_request(&tank.state(inbox), &self.previous_control);
        self.state = SupervisorState::Processing;
        self.dispatch(RequestKind::Update, request);
        Ok(StepDispatch::Dispatched)
    }

    /// Waits for the pending request and applies its outcome to `tank`.
    ///
    /// Outgoing team messages are forwarded to `team` when one is provided.
    /// Returns [`Settled::Idle`] when nothing was pending.
    pub fn settle(&mut self, tank: &mut Tank, team: Option<&mut Team>) -> Result<Settled, AiFailure> {
        let Some(request) = self.pending else {
            return Ok(Settled::Idle);
        };

        if let Some(fault) = self.deferred_fault.take() {
            return Err(self.fail_with_fault(&fault));
        }

        // A reply already waiting is collected before the deadline is checked,
        // so time spent settling other tanks is never charged to this one.
        let mut wait = Duration::ZERO;
        loop {
            let event = match self.context.as_mut() {
                Some(context) => context.poll(wait),
                None => Some(ContextEvent::Fault(ContextFault::Terminated)),
            };

            match event {
                Some(ContextEvent::Message { response, elapsed }) => {
                    return self.complete(request, &response, elapsed, tank, team);
                }
                Some(ContextEvent::Fault(fault)) => return Err(self.fail_with_fault(&fault)),
                None => {}
            }

            let now = Instant::now();
            if self.watchdog.is_overdue(now) {
                return Err(self.fail(
                    format!(
                        "Simulation cannot be continued because {} does not respond",
                        self.full_name
                    ),
                    true,
                ));
            }
            wait = self.watchdog.next_wait(now);
        }
    }

    /// Tears the AI down. Safe to call in any state and more than once.
    ///
    /// Deactivation observers run once per activation cycle.
    pub fn deactivate(&mut self) {
        self.teardown();
        self.state = SupervisorState::Deactivated;
        if self.cycle_open {
            self.cycle_open = false;
            info!(tank = self.tank.get(), name = %self.tank_name, "AI deactivated");
            self.deactivated.notify(&self.tank);
        }
    }

    fn complete(
        &mut self,
        request: PendingRequest,
        response: &Value,
        elapsed: Duration,
        tank: &mut Tank,
        team: Option<&mut Team>,
    ) -> Result<Settled, AiFailure> {
        self.pending = None;
        self.watchdog.disarm();

        match request.kind {
            RequestKind::Init => {
                let raw = response.get("settings").unwrap_or(&Value::Null);
                let settings = TankSettings::from_raw(raw);
                tank.init(settings);
                self.state = SupervisorState::Ready;
                info!(tank = self.tank.get(), skin = tank.skin().name(), "AI ready");
                self.activated.notify(&self.tank);
                Ok(Settled::Activated(settings))
            }
            RequestKind::Update => {
                let slow = elapsed > self.definition.execution_limit;
                if slow {
                    if self.slow_ai_chances == 0 {
                        return Err(self.fail(
                            format!(
                                "Simulation cannot be continued because {} has performance issues",
                                self.full_name
                            ),
                            true,
                        ));
                    }
                    self.slow_ai_chances -= 1;
                    warn!(
                        tank = self.tank.get(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        limit_ms = self.definition.execution_limit.as_millis() as u64,
                        chances_left = self.slow_ai_chances,
                        "AI exceeded its execution limit"
                    );
                }

                let mut control = ControlState::from_response(response);
                tank.apply_control(&control);
                let outbox = std::mem::take(&mut control.outbox);
                if let Some(team) = team {
                    team.send_messages(self.tank, outbox);
                }
                self.previous_control = control.settled();
                self.state = SupervisorState::Ready;
                Ok(Settled::Controlled { elapsed, slow })
            }
        }
    }

    fn dispatch(&mut self, kind: RequestKind, request: Value) {
        self.watchdog.arm(Instant::now());
        self.pending = Some(PendingRequest { kind });
        debug!(tank = self.tank.get(), request = ?kind, "dispatching AI request");

        let sent = match self.context.as_mut() {
            Some(context) => context.send(request),
            None => Err(ContextFault::Terminated),
        };
        if let Err(fault) = sent {
            self.deferred_fault = Some(fault);
        }
    }

    fn defer(&mut self, kind: RequestKind, fault: ContextFault) {
        self.watchdog.arm(Instant::now());
        self.pending = Some(PendingRequest { kind });
        self.deferred_fault = Some(fault);
    }

    fn fail_with_fault(&mut self, fault: &ContextFault) -> AiFailure {
        if fault.is_performance_issue() {
            return self.fail(
                format!(
                    "Simulation cannot be continued because {} has performance issues",
                    self.full_name
                ),
                true,
            );
        }
        self.fail(
            format!(
                "Execution context of '{}' returned an error: {fault}",
                self.full_name
            ),
            false,
        )
    }

    fn fail(&mut self, message: String, performance_issues: bool) -> AiFailure {
        self.teardown();
        self.state = SupervisorState::Failed;
        error!(tank = self.tank.get(), performance_issues, "{message}");
        AiFailure {
            message,
            performance_issues,
            tank_name: self.tank_name.clone(),
            tank_id: self.tank,
        }
    }

    fn teardown(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.terminate();
        }
        self.watchdog.disarm();
        self.pending = None;
        self.deferred_fault = None;
    }

    fn ensure_tank(&self, tank: &Tank) -> Result<(), UsageError> {
        if tank.id() == self.tank {
            Ok(())
        } else {
            Err(UsageError::ForeignTank {
                expected: self.tank,
                actual: tank.id(),
            })
        }
    }

    fn invalid_state(&self, operation: &'static str) -> UsageError {
        UsageError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

impl Drop for AiSupervisor {
    fn drop(&mut self) {
        self.teardown();
    }
}
