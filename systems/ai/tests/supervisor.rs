use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    thread,
    time::{Duration, Instant},
};

use serde_json::{json, Value};
use tank_arena_core::{AiDefinition, Skin, Tank, TankId, Team, TeamId};
use tank_arena_system_ai::{
    AiFailure, AiSupervisor, ContextEvent, ContextFactory, ContextFault, ExecutionContext,
    ScriptLimits, Settled, StepDispatch, SupervisorConfig, SupervisorState, TeamInfo, UsageError,
};

/// How a fake context answers an `update` request.
#[derive(Clone)]
enum Reply {
    After(Duration, Value),
    Never,
    Fault,
}

#[derive(Default)]
struct Recorder {
    requests: RefCell<Vec<Value>>,
    terminations: Cell<u32>,
}

struct FakeContext {
    recorder: Rc<Recorder>,
    script: Rc<dyn Fn(usize) -> Reply>,
    updates: usize,
    queued: Option<(Instant, ContextEvent)>,
}

impl ExecutionContext for FakeContext {
    fn send(&mut self, message: Value) -> Result<(), ContextFault> {
        let now = Instant::now();
        self.queued = match message["command"].as_str() {
            Some("init") => Some((
                now,
                ContextEvent::Message {
                    response: json!({ "type": "init", "settings": { "SKIN": "ocean" } }),
                    elapsed: Duration::ZERO,
                },
            )),
            _ => {
                let reply = (self.script)(self.updates);
                self.updates += 1;
                match reply {
                    Reply::After(delay, response) => Some((
                        now + delay,
                        ContextEvent::Message {
                            response,
                            elapsed: delay,
                        },
                    )),
                    Reply::Never => None,
                    Reply::Fault => Some((now, ContextEvent::Fault(ContextFault::Disconnected))),
                }
            }
        };
        self.recorder.requests.borrow_mut().push(message);
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Option<ContextEvent> {
        let Some((ready_at, _)) = &self.queued else {
            thread::sleep(timeout);
            return None;
        };
        let now = Instant::now();
        if *ready_at > now {
            thread::sleep(timeout.min(*ready_at - now));
        }
        if Instant::now() >= *ready_at {
            self.queued.take().map(|(_, event)| event)
        } else {
            None
        }
    }

    fn terminate(&mut self) {
        self.recorder.terminations.set(self.recorder.terminations.get() + 1);
        self.queued = None;
    }
}

struct FakeFactory {
    recorder: Rc<Recorder>,
    script: Rc<dyn Fn(usize) -> Reply>,
}

impl ContextFactory for FakeFactory {
    fn create(
        &self,
        _tank: TankId,
        _definition: &AiDefinition,
    ) -> Result<Box<dyn ExecutionContext>, ContextFault> {
        Ok(Box::new(FakeContext {
            recorder: Rc::clone(&self.recorder),
            script: Rc::clone(&self.script),
            updates: 0,
            queued: None,
        }))
    }
}

fn fake(
    tank: &Tank,
    definition: AiDefinition,
    config: SupervisorConfig,
    script: impl Fn(usize) -> Reply + 'static,
) -> (AiSupervisor, Rc<Recorder>) {
    let recorder = Rc::new(Recorder::default());
    let factory = FakeFactory {
        recorder: Rc::clone(&recorder),
        script: Rc::new(script),
    };
    let supervisor = AiSupervisor::new(tank, definition, config, Rc::new(factory));
    (supervisor, recorder)
}

fn activated(supervisor: &mut AiSupervisor, tank: &mut Tank) {
    let team = TeamInfo::for_tank(tank, None);
    supervisor.activate("0.5:1", tank, &team).expect("activate");
    let settled = supervisor.settle(tank, None).expect("init settles");
    assert!(matches!(settled, Settled::Activated(_)));
}

fn step(supervisor: &mut AiSupervisor, tank: &mut Tank) -> Result<Settled, AiFailure> {
    let dispatch = supervisor.simulation_step(tank, &[]).expect("step");
    assert_eq!(dispatch, StepDispatch::Dispatched);
    supervisor.settle(tank, None)
}

fn tank() -> Tank {
    Tank::new(TankId::new(1), "fake").at(100.0, 100.0, 0.0)
}

fn instant(value: Value) -> Reply {
    Reply::After(Duration::ZERO, value)
}

#[test]
fn activation_applies_settings_and_notifies_observers() {
    let mut tank = tank();
    let (mut supervisor, recorder) = fake(
        &tank,
        AiDefinition::new("fake", "code"),
        SupervisorConfig::default(),
        |_| instant(json!({})),
    );
    let notified = Rc::new(Cell::new(0));
    let counter = Rc::clone(&notified);
    let _ = supervisor
        .activation_observers()
        .register(move |_| counter.set(counter.get() + 1));

    activated(&mut supervisor, &mut tank);

    assert_eq!(tank.skin(), Skin::Ocean);
    assert_eq!(supervisor.state(), SupervisorState::Ready);
    assert_eq!(notified.get(), 1);

    let requests = recorder.requests.borrow();
    let init = &requests[0];
    assert_eq!(init["seed"], json!("0.5:1"));
    assert_eq!(init["info"]["team"], json!({ "name": "fake #1", "mates": [1] }));
}

#[test]
fn stepping_before_activation_is_a_usage_error() {
    let tank = tank();
    let (mut supervisor, _) = fake(
        &tank,
        AiDefinition::new("fake", "code"),
        SupervisorConfig::default(),
        |_| instant(json!({})),
    );

    let error = supervisor.simulation_step(&tank, &[]).expect_err("idle supervisor");
    assert_eq!(
        error,
        UsageError::InvalidState {
            operation: "run a simulation step",
            state: SupervisorState::Idle,
        }
    );
}

#[test]
fn supervisors_refuse_foreign_tanks() {
    let tank = tank();
    let stranger = Tank::new(TankId::new(2), "stranger");
    let (mut supervisor, _) = fake(
        &tank,
        AiDefinition::new("fake", "code"),
        SupervisorConfig::default(),
        |_| instant(json!({})),
    );

    let error = supervisor
        .activate("1:2", &stranger, &TeamInfo::for_tank(&stranger, None))
        .expect_err("wrong tank");
    assert!(matches!(error, UsageError::ForeignTank { .. }));
}

#[test]
fn silent_context_fails_with_performance_issues_at_the_hard_limit() {
    let mut tank = tank();
    let config = SupervisorConfig {
        processing_time_limit: 80,
        ..SupervisorConfig::default()
    };
    let (mut supervisor, recorder) = fake(
        &tank,
        AiDefinition::new("fake", "code").with_execution_limit(Duration::from_millis(10)),
        config,
        |_| Reply::Never,
    );
    activated(&mut supervisor, &mut tank);

    let started = Instant::now();
    let failure = step(&mut supervisor, &mut tank).expect_err("no response");
    let waited = started.elapsed();

    assert!(failure.performance_issues);
    assert_eq!(failure.tank_id, TankId::new(1));
    assert_eq!(
        failure.message,
        "Simulation cannot be continued because fake #1 does not respond"
    );
    assert!(waited > Duration::from_millis(80), "failed early: {waited:?}");
    assert!(waited < Duration::from_millis(1000), "failed late: {waited:?}");
    assert_eq!(supervisor.state(), SupervisorState::Failed);
    assert_eq!(recorder.terminations.get(), 1);
}

#[test]
fn context_faults_are_not_performance_issues() {
    let mut tank = tank();
    let (mut supervisor, _) = fake(
        &tank,
        AiDefinition::new("fake", "code"),
        SupervisorConfig::default(),
        |_| Reply::Fault,
    );
    activated(&mut supervisor, &mut tank);

    let failure = step(&mut supervisor, &mut tank).expect_err("fault");
    assert!(!failure.performance_issues);
    assert_eq!(failure.tank_name, "fake");
    assert!(failure.message.contains("'fake #1'"), "{}", failure.message);
    assert!(!supervisor.is_pending());

    let error = supervisor.simulation_step(&tank, &[]).expect_err("failed supervisor");
    assert!(matches!(
        error,
        UsageError::InvalidState {
            state: SupervisorState::Failed,
            ..
        }
    ));
}

#[test]
fn ten_slow_responses_are_tolerated_and_the_eleventh_fails() {
    let mut tank = tank();
    let (mut supervisor, _) = fake(
        &tank,
        AiDefinition::new("fake", "code").with_execution_limit(Duration::from_millis(2)),
        SupervisorConfig::default(),
        |index| Reply::After(Duration::from_millis(8), json!({ "THROTTLE": index as f64 / 100.0 })),
    );
    activated(&mut supervisor, &mut tank);

    for tick in 0..10 {
        let settled = step(&mut supervisor, &mut tank).expect("tolerated");
        assert!(
            matches!(settled, Settled::Controlled { slow: true, .. }),
            "tick {tick}: {settled:?}"
        );
    }
    assert_eq!(supervisor.slow_ai_chances(), 0);
    assert!((tank.throttle() - 0.09).abs() < 1e-9);

    let failure = step(&mut supervisor, &mut tank).expect_err("eleventh slow response");
    assert!(failure.performance_issues);
    assert!(failure.message.ends_with("has performance issues"));
    assert!((tank.throttle() - 0.09).abs() < 1e-9, "rejected control is not applied");
}

#[test]
fn fast_responses_never_replenish_the_tolerance() {
    let mut tank = tank();
    let (mut supervisor, _) = fake(
        &tank,
        AiDefinition::new("fake", "code").with_execution_limit(Duration::from_millis(2)),
        SupervisorConfig::default(),
        |index| {
            if index < 3 {
                Reply::After(Duration::from_millis(8), json!({}))
            } else {
                instant(json!({}))
            }
        },
    );
    activated(&mut supervisor, &mut tank);

    for _ in 0..10 {
        let _ = step(&mut supervisor, &mut tank).expect("step");
    }
    assert_eq!(supervisor.slow_ai_chances(), 7);
}

fn dispatched(id: u32, reply: Reply) -> (AiSupervisor, Tank) {
    let mut tank = Tank::new(TankId::new(id), "fake").at(100.0, 100.0, 0.0);
    let config = SupervisorConfig {
        processing_time_limit: 80,
        ..SupervisorConfig::default()
    };
    let (mut supervisor, _) = fake(
        &tank,
        AiDefinition::new("fake", "code").with_execution_limit(Duration::from_millis(30)),
        config,
        move |_| reply.clone(),
    );
    supervisor
        .activate("0.5:1", &tank, &TeamInfo::for_tank(&tank, None))
        .expect("activate");
    let _ = supervisor.settle(&mut tank, None).expect("init settles");
    let dispatch = supervisor.simulation_step(&tank, &[]).expect("step");
    assert_eq!(dispatch, StepDispatch::Dispatched);
    (supervisor, tank)
}

#[test]
fn waiting_on_a_slow_tank_is_not_charged_to_the_next_one() {
    let (mut slow, mut slow_tank) = dispatched(1, Reply::After(Duration::from_millis(60), json!({})));
    let (mut quick, mut quick_tank) = dispatched(2, instant(json!({ "THROTTLE": 1 })));

    let settled = slow.settle(&mut slow_tank, None).expect("slow but within the hard limit");
    assert!(matches!(settled, Settled::Controlled { slow: true, .. }), "{settled:?}");

    let settled = quick.settle(&mut quick_tank, None).expect("answered at once");
    assert!(matches!(settled, Settled::Controlled { slow: false, .. }), "{settled:?}");
    assert_eq!(quick.slow_ai_chances(), 10);
    assert_eq!(quick_tank.throttle(), 1.0);
}

#[test]
fn a_hung_tank_does_not_time_out_the_tanks_settled_after_it() {
    let (mut hung, mut hung_tank) = dispatched(1, Reply::Never);
    let (mut quick, mut quick_tank) = dispatched(2, instant(json!({ "TURN": -1 })));

    let failure = hung.settle(&mut hung_tank, None).expect_err("never answers");
    assert!(failure.performance_issues);
    assert_eq!(failure.tank_id, TankId::new(1));

    let settled = quick.settle(&mut quick_tank, None).expect("reply was already waiting");
    assert!(matches!(settled, Settled::Controlled { slow: false, .. }), "{settled:?}");
    assert_eq!(quick.state(), SupervisorState::Ready);
    assert_eq!(quick_tank.turn(), -1.0);
}

#[test]
fn responses_are_clamped_and_shots_never_stick() {
    let mut tank = tank();
    let (mut supervisor, recorder) = fake(
        &tank,
        AiDefinition::new("fake", "code"),
        SupervisorConfig::default(),
        |index| match index {
            0 => instant(json!({
                "THROTTLE": "7",
                "TURN": "left",
                "RADAR_TURN": -4,
                "GUN_TURN": null,
                "SHOOT": 3,
                "BOOST": 1,
                "DEBUG": { "note": "hi" },
            })),
            _ => instant(json!({ "THROTTLE": 0.5 })),
        },
    );
    activated(&mut supervisor, &mut tank);

    let _ = step(&mut supervisor, &mut tank).expect("first tick");
    assert_eq!(tank.throttle(), 1.0);
    assert_eq!(tank.turn(), 0.0);
    assert_eq!(tank.radar_turn(), -1.0);
    assert_eq!(tank.gun_turn(), 0.0);
    assert!(tank.boost());
    assert_eq!(tank.pending_shot(), Some(1.0));
    assert_eq!(tank.debug_data(), &json!({ "note": "hi" }));

    let _ = step(&mut supervisor, &mut tank).expect("second tick");
    assert_eq!(tank.pending_shot(), None);
    assert!(!tank.boost());

    let requests = recorder.requests.borrow();
    let second_update = &requests[2];
    assert_eq!(second_update["control"]["THROTTLE"], json!(1.0));
    assert_eq!(second_update["control"]["SHOOT"], json!(0.0));
    assert_eq!(second_update["control"]["BOOST"], json!(1));
}

#[test]
fn outbox_messages_reach_the_team_mailbox() {
    let mut tank = tank().with_team(TeamId::new(1));
    let mut team = Team::new(TeamId::new(1), "blue");
    team.add_member(tank.id());
    team.add_member(TankId::new(2));

    let (mut supervisor, _) = fake(
        &tank,
        AiDefinition::new("fake", "code"),
        SupervisorConfig::default(),
        |_| instant(json!({ "OUTBOX": [{ "target": [1, 2] }] })),
    );
    activated(&mut supervisor, &mut tank);

    let _ = supervisor.simulation_step(&tank, &[]).expect("step");
    let _ = supervisor.settle(&mut tank, Some(&mut team)).expect("settle");

    assert_eq!(team.mailbox().pending(), 1);
    team.mailbox_mut().advance(1);
    assert_eq!(team.mailbox().inbox()[0].message, json!({ "target": [1, 2] }));
    assert!(supervisor.previous_control().outbox.is_empty());
}

#[test]
fn destroyed_tanks_retire_their_ai() {
    let mut tank = tank();
    let (mut supervisor, recorder) = fake(
        &tank,
        AiDefinition::new("fake", "code"),
        SupervisorConfig::default(),
        |_| instant(json!({})),
    );
    activated(&mut supervisor, &mut tank);

    tank.damage(500.0);
    let dispatch = supervisor.simulation_step(&tank, &[]).expect("step");

    assert_eq!(dispatch, StepDispatch::Retired);
    assert_eq!(recorder.terminations.get(), 1);
    assert_eq!(supervisor.settle(&mut tank, None), Ok(Settled::Idle));
    assert_eq!(recorder.requests.borrow().len(), 1, "only init was ever sent");
}

#[test]
fn deactivation_is_idempotent_and_observed_once_per_cycle() {
    let mut tank = tank();
    let (mut supervisor, recorder) = fake(
        &tank,
        AiDefinition::new("fake", "code"),
        SupervisorConfig::default(),
        |_| Reply::Never,
    );
    let notified = Rc::new(Cell::new(0));
    let counter = Rc::clone(&notified);
    let _ = supervisor
        .deactivation_observers()
        .register(move |_| counter.set(counter.get() + 1));

    supervisor.deactivate();
    assert_eq!(notified.get(), 0, "never activated");

    activated(&mut supervisor, &mut tank);
    let _ = supervisor.simulation_step(&tank, &[]).expect("step");
    supervisor.deactivate();
    supervisor.deactivate();

    assert_eq!(notified.get(), 1);
    assert_eq!(recorder.terminations.get(), 1);
    assert!(!supervisor.is_pending());
    assert_eq!(supervisor.settle(&mut tank, None), Ok(Settled::Idle));

    activated(&mut supervisor, &mut tank);
    supervisor.deactivate();
    assert_eq!(notified.get(), 2);
}

const DUELIST: &str = r#"
    fn init(settings, info) {
        this.id = info.id;
        settings.SKIN = "tiger";
        settings
    }

    fn update(state, control) {
        control.THROTTLE = random() * 2.0 - 1.0;
        control.TURN = if state.radar.enemy == () { 1 } else { 0 };
        control.SHOOT = 0.4;
        control.OUTBOX = [#{ from: this.id }];
        control
    }
"#;

fn real_supervisor(tank: &Tank, sandbox: bool, config: SupervisorConfig) -> AiSupervisor {
    let factory = Rc::new(config.context_factory());
    AiSupervisor::new(
        tank,
        AiDefinition::new("duelist", DUELIST).sandboxed(sandbox),
        config,
        factory,
    )
}

fn throttles(sandbox: bool, id: u32, seed: &str) -> Vec<f64> {
    let mut tank = Tank::new(TankId::new(id), "duelist").at(200.0, 200.0, 0.0);
    let mut supervisor = real_supervisor(&tank, sandbox, SupervisorConfig::default());
    let info = TeamInfo::for_tank(&tank, None);
    supervisor.activate(seed, &tank, &info).expect("activate");
    let _ = supervisor.settle(&mut tank, None).expect("init");
    assert_eq!(tank.skin(), Skin::Tiger);

    let mut seen = Vec::new();
    for _ in 0..5 {
        let _ = supervisor.simulation_step(&tank, &[]).expect("step");
        let _ = supervisor.settle(&mut tank, None).expect("update");
        assert_eq!(tank.turn(), 1.0);
        assert_eq!(tank.take_shot(), Some(0.4).filter(|_| seen.is_empty()));
        seen.push(tank.throttle());
    }
    supervisor.deactivate();
    seen
}

#[test]
fn in_process_scripts_are_deterministic_per_tank_seed() {
    let first = throttles(false, 1, "0.43:1");
    assert_eq!(first, throttles(false, 1, "0.43:1"));
    assert_ne!(first, throttles(false, 2, "0.43:2"));
    assert!(first.iter().all(|value| (-1.0..=1.0).contains(value)));
}

#[test]
fn worker_scripts_match_in_process_scripts() {
    assert_eq!(throttles(true, 1, "0.43:1"), throttles(false, 1, "0.43:1"));
}

#[test]
fn script_errors_identify_the_tank_and_line() {
    let mut tank = Tank::new(TankId::new(4), "broken");
    let factory = Rc::new(SupervisorConfig::default().context_factory());
    let mut supervisor = AiSupervisor::new(
        &tank,
        AiDefinition::new("broken", "fn update(state, control) {\n  control.X = 1 / 0;\n}"),
        SupervisorConfig::default(),
        factory,
    );
    supervisor
        .activate("1:4", &tank, &TeamInfo::for_tank(&tank, None))
        .expect("activate");
    let _ = supervisor.settle(&mut tank, None).expect("init");

    let _ = supervisor.simulation_step(&tank, &[]).expect("step");
    let failure = supervisor.settle(&mut tank, None).expect_err("division by zero");

    assert!(!failure.performance_issues);
    assert!(
        failure
            .message
            .starts_with("Execution context of 'broken #4' returned an error: Line #2: "),
        "{}",
        failure.message
    );
}

#[test]
fn runaway_in_process_scripts_fail_for_performance() {
    let mut tank = Tank::new(TankId::new(5), "spinner");
    let config = SupervisorConfig {
        processing_time_limit: 50,
        script: ScriptLimits {
            max_operations: 0,
            ..ScriptLimits::default()
        },
        ..SupervisorConfig::default()
    };
    let factory = Rc::new(config.context_factory());
    let mut supervisor = AiSupervisor::new(
        &tank,
        AiDefinition::new("spinner", "fn update(state, control) { loop {} }"),
        config,
        factory,
    );
    supervisor
        .activate("1:5", &tank, &TeamInfo::for_tank(&tank, None))
        .expect("activate");
    let _ = supervisor.settle(&mut tank, None).expect("init");

    let _ = supervisor.simulation_step(&tank, &[]).expect("step");
    let failure = supervisor.settle(&mut tank, None).expect_err("never returns");
    assert!(failure.performance_issues);
}

#[test]
fn runaway_worker_scripts_fail_for_performance() {
    let mut tank = Tank::new(TankId::new(6), "spinner");
    let config = SupervisorConfig {
        processing_time_limit: 50,
        script: ScriptLimits {
            max_operations: 0,
            ..ScriptLimits::default()
        },
        ..SupervisorConfig::default()
    };
    let factory = Rc::new(config.context_factory());
    let mut supervisor = AiSupervisor::new(
        &tank,
        AiDefinition::new("spinner", "fn update(state, control) { loop {} }").sandboxed(true),
        config,
        factory,
    );
    supervisor
        .activate("1:6", &tank, &TeamInfo::for_tank(&tank, None))
        .expect("activate");
    let _ = supervisor.settle(&mut tank, None).expect("init");

    let _ = supervisor.simulation_step(&tank, &[]).expect("step");
    let failure = supervisor.settle(&mut tank, None).expect_err("never returns");
    assert!(failure.performance_issues);
    assert_eq!(supervisor.state(), SupervisorState::Failed);
}

#[test]
fn runaway_scripts_fail_for_performance_under_default_limits() {
    for (id, sandbox) in [(7, false), (8, true)] {
        let mut tank = Tank::new(TankId::new(id), "spinner");
        let config = SupervisorConfig::default();
        let factory = Rc::new(config.context_factory());
        let mut supervisor = AiSupervisor::new(
            &tank,
            AiDefinition::new("spinner", "fn update(state, control) { loop {} }")
                .sandboxed(sandbox),
            config,
            factory,
        );
        supervisor
            .activate("1:7", &tank, &TeamInfo::for_tank(&tank, None))
            .expect("activate");
        let _ = supervisor.settle(&mut tank, None).expect("init");

        let _ = supervisor.simulation_step(&tank, &[]).expect("step");
        let failure = supervisor.settle(&mut tank, None).expect_err("never returns");
        assert!(failure.performance_issues, "sandbox={sandbox}: {}", failure.message);
        assert_eq!(supervisor.state(), SupervisorState::Failed);
    }
}
