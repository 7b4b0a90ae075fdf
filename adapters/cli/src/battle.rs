//! Headless match orchestrator.
//!
//! Every tick runs in a fixed order: mailboxes advance, tanks move, the
//! resolver checks tanks then bullets then radar scans, destroyed tanks are
//! retired and finally every AI is stepped and settled before the next tick.

use std::{collections::BTreeSet, fmt, rc::Rc};

use anyhow::{bail, Result};
use glam::DVec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tank_arena_core::{
    Bullet, BulletId, CollisionEvent, MatchDescription, Relation, Tank, TankId, Team, TeamId,
    TANK_RADIUS,
};
use tank_arena_system_ai::{
    AiFailure, AiSupervisor, ContextFactory, Settled, StepDispatch, TeamInfo,
};
use tank_arena_system_collision::CollisionResolver;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;

const SPEED: f64 = 2.0;
const BOOST_SPEED: f64 = 4.0;
const TURN_RATE: f64 = 2.0;
const RADAR_TURN_RATE: f64 = 6.0;
const GUN_TURN_RATE: f64 = 3.0;
const SPAWN_ATTEMPTS: usize = 64;

struct Combatant {
    tank: Tank,
    team_name: Option<String>,
    supervisor: AiSupervisor,
    failure: Option<AiFailure>,
}

impl Combatant {
    fn is_active(&self) -> bool {
        self.failure.is_none() && !self.tank.is_destroyed()
    }

    /// Side the tank fights for; tanks without a team fight alone.
    fn side(&self) -> Side {
        match self.tank.team() {
            Some(team) => Side::Team(team),
            None => Side::Solo(self.tank.id()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Side {
    Team(TeamId),
    Solo(TankId),
}

/// Deterministic headless battle between the AIs of a match description.
pub(crate) struct Battle {
    config: EngineConfig,
    resolver: CollisionResolver,
    combatants: Vec<Combatant>,
    teams: Vec<Team>,
    bullets: Vec<Bullet>,
    next_bullet: u32,
    tick: u64,
}

impl Battle {
    /// Spawns every tank of `description` and activates its AI.
    pub(crate) fn new(description: &MatchDescription, config: EngineConfig) -> Result<Self> {
        let battlefield = config.battlefield();
        let factory: Rc<dyn ContextFactory> = Rc::new(config.supervisor.context_factory());
        let mut rng = ChaCha8Rng::seed_from_u64(description.rng_seed.to_bits());

        let mut teams: Vec<Team> = Vec::new();
        let mut combatants: Vec<Combatant> = Vec::new();
        let mut occupied: Vec<DVec2> = Vec::new();

        for (index, definition) in description.definitions().into_iter().enumerate() {
            let id = TankId::new(index as u32 + 1);
            let team_name = definition.team.clone().filter(|_| description.team_mode);

            let mut tank = Tank::new(id, definition.name.clone());
            if let Some(name) = &team_name {
                let team = match teams.iter().position(|team| team.name() == name) {
                    Some(position) => position,
                    None => {
                        teams.push(Team::new(TeamId::new(teams.len() as u32), name.clone()));
                        teams.len() - 1
                    }
                };
                teams[team].add_member(id);
                tank = tank.with_team(teams[team].id());
            }

            let Some(position) = spawn_point(&mut rng, &occupied, config.width, config.height)
            else {
                bail!(
                    "arena of {}x{} is too small for {} tanks",
                    config.width,
                    config.height,
                    description.ai_list.len()
                );
            };
            occupied.push(position);
            let angle = rng.gen_range(-180.0..180.0);
            tank = tank.at(position.x, position.y, angle);

            let supervisor = AiSupervisor::new(
                &tank,
                definition,
                config.supervisor.clone(),
                Rc::clone(&factory),
            );
            combatants.push(Combatant {
                tank,
                team_name,
                supervisor,
                failure: None,
            });
        }

        let mut battle = Self {
            resolver: CollisionResolver::new(battlefield),
            config,
            combatants,
            teams,
            bullets: Vec::new(),
            next_bullet: 1,
            tick: 0,
        };
        battle.activate(description)?;
        Ok(battle)
    }

    fn activate(&mut self, description: &MatchDescription) -> Result<()> {
        for combatant in &mut self.combatants {
            let team = combatant
                .tank
                .team()
                .map(|team| &self.teams[team.get() as usize]);
            let info = TeamInfo::for_tank(&combatant.tank, team);
            let seed = description.tank_seed(combatant.tank.id());
            combatant
                .supervisor
                .activate(&seed, &combatant.tank, &info)?;
        }

        for combatant in &mut self.combatants {
            match combatant.supervisor.settle(&mut combatant.tank, None) {
                Ok(Settled::Activated(settings)) => {
                    debug!(tank = %combatant.tank.full_name(), ?settings, "tank activated");
                }
                Ok(_) => {}
                Err(failure) => eliminate(combatant, failure),
            }
        }
        Ok(())
    }

    /// Runs ticks until one side remains or the tick budget is spent.
    pub(crate) fn run(mut self) -> Result<BattleReport> {
        info!(
            tanks = self.combatants.len(),
            max_ticks = self.config.max_ticks,
            "battle started"
        );
        while self.tick < self.config.max_ticks && self.sides_left() > 1 {
            self.step()?;
        }
        for combatant in &mut self.combatants {
            combatant.supervisor.deactivate();
        }
        let report = self.report();
        info!(ticks = report.ticks, winner = ?report.winner, "battle finished");
        Ok(report)
    }

    /// Advances the simulation by one tick.
    pub(crate) fn step(&mut self) -> Result<()> {
        self.tick += 1;
        for team in &mut self.teams {
            team.mailbox_mut().advance(self.tick);
        }

        let previous = self.drive_tanks();
        self.fire_guns();

        let mut events = Vec::new();
        self.resolver.begin_tick();
        for combatant in &mut self.combatants {
            combatant.tank.begin_tick();
        }
        self.resolve_tanks(&previous, &mut events);
        self.resolve_bullets(&mut events);
        self.scan(&mut events);

        for event in &events {
            for combatant in &mut self.combatants {
                combatant.tank.record(event);
            }
        }

        self.step_ais()
    }

    fn drive_tanks(&mut self) -> Vec<DVec2> {
        self.combatants
            .iter_mut()
            .map(|combatant| {
                let tank = &mut combatant.tank;
                let origin = DVec2::new(tank.x(), tank.y());
                if combatant.failure.is_some() || tank.is_destroyed() {
                    return origin;
                }

                tank.set_angle(tank.angle() + tank.turn() * TURN_RATE);
                tank.rotate_radar(tank.radar_turn() * RADAR_TURN_RATE);
                tank.rotate_gun(tank.gun_turn() * GUN_TURN_RATE);
                let speed = if tank.boost() { BOOST_SPEED } else { SPEED };
                let heading = DVec2::from_angle(tank.angle().to_radians());
                let next = origin + heading * speed * tank.throttle();
                tank.set_position(next.x, next.y);
                origin
            })
            .collect()
    }

    fn fire_guns(&mut self) {
        for combatant in &mut self.combatants {
            let tank = &mut combatant.tank;
            if tank.is_destroyed() {
                continue;
            }
            if let Some(power) = tank.take_shot() {
                let bullet = Bullet::new(
                    BulletId::new(self.next_bullet),
                    tank.id(),
                    tank.team(),
                    tank.muzzle(),
                    tank.gun_heading(),
                    power,
                );
                self.next_bullet += 1;
                self.bullets.push(bullet);
            }
        }
    }

    fn resolve_tanks(&mut self, previous: &[DVec2], events: &mut Vec<CollisionEvent>) {
        for (combatant, origin) in self.combatants.iter_mut().zip(previous) {
            let tank = &mut combatant.tank;
            if tank.is_destroyed() {
                continue;
            }
            if !self.resolver.check_tank(&tank.body(), events) {
                tank.set_position(origin.x, origin.y);
                self.resolver.update_tank(&tank.body());
            }
        }
    }

    fn resolve_bullets(&mut self, events: &mut Vec<CollisionEvent>) {
        let mut in_flight = Vec::with_capacity(self.bullets.len());
        for mut bullet in std::mem::take(&mut self.bullets) {
            bullet.advance();
            let start = events.len();
            if !self.resolver.hit_test_bullet(&bullet.body(), events) {
                in_flight.push(bullet);
                continue;
            }

            for event in &events[start..] {
                if let CollisionEvent::BulletHitTank {
                    target,
                    relation: Relation::Enemy,
                    ..
                } = event
                {
                    if let Some(victim) = self
                        .combatants
                        .iter_mut()
                        .find(|combatant| combatant.tank.id() == *target)
                    {
                        victim.tank.damage(bullet.damage());
                        if victim.tank.is_destroyed() {
                            let _ = self.resolver.remove_tank(victim.tank.id());
                        } else {
                            self.resolver.update_tank(&victim.tank.body());
                        }
                    }
                }
            }
        }
        self.bullets = in_flight;
    }

    fn scan(&self, events: &mut Vec<CollisionEvent>) {
        for combatant in &self.combatants {
            if combatant.tank.is_destroyed() {
                continue;
            }
            let body = combatant.tank.body();
            let _ = self.resolver.scan_walls(&body, events);
            let _ = self.resolver.scan_tanks(&body, events);
            let _ = self.resolver.scan_bullets(&body, events);
        }
    }

    fn step_ais(&mut self) -> Result<()> {
        let mut dispatched = Vec::new();
        for (index, combatant) in self.combatants.iter_mut().enumerate() {
            if combatant.failure.is_some() {
                continue;
            }
            let inbox = combatant
                .tank
                .team()
                .map(|team| self.teams[team.get() as usize].mailbox().inbox())
                .unwrap_or_default();
            let dispatch = combatant.supervisor.simulation_step(&combatant.tank, inbox)?;
            if dispatch == StepDispatch::Dispatched {
                dispatched.push(index);
            }
        }

        for index in dispatched {
            let combatant = &mut self.combatants[index];
            let team = combatant
                .tank
                .team()
                .map(|team| &mut self.teams[team.get() as usize]);
            if let Err(failure) = combatant.supervisor.settle(&mut combatant.tank, team) {
                eliminate(combatant, failure);
            }
        }
        Ok(())
    }

    fn sides_left(&self) -> usize {
        self.combatants
            .iter()
            .filter(|combatant| combatant.is_active())
            .map(Combatant::side)
            .collect::<BTreeSet<_>>()
            .len()
    }

    fn report(&self) -> BattleReport {
        let survivors: Vec<&Combatant> = self
            .combatants
            .iter()
            .filter(|combatant| combatant.is_active())
            .collect();
        let winner = match survivors.as_slice() {
            [] => None,
            [first, rest @ ..] if rest.iter().all(|other| other.side() == first.side()) => Some(
                first
                    .team_name
                    .clone()
                    .unwrap_or_else(|| first.tank.full_name()),
            ),
            _ => None,
        };

        BattleReport {
            ticks: self.tick,
            winner,
            tanks: self
                .combatants
                .iter()
                .map(|combatant| TankReport {
                    name: combatant.tank.full_name(),
                    team: combatant.team_name.clone(),
                    skin: combatant.tank.skin().name(),
                    energy: combatant.tank.energy(),
                    failure: combatant.failure.as_ref().map(|failure| failure.message.clone()),
                })
                .collect(),
        }
    }
}

fn eliminate(combatant: &mut Combatant, failure: AiFailure) {
    warn!(
        tank = %combatant.tank.full_name(),
        performance_issues = failure.performance_issues,
        "tank eliminated: {}",
        failure.message
    );
    combatant.supervisor.deactivate();
    combatant.failure = Some(failure);
}

fn spawn_point(rng: &mut ChaCha8Rng, occupied: &[DVec2], width: f64, height: f64) -> Option<DVec2> {
    let margin = TANK_RADIUS * 2.0;
    if width <= margin * 2.0 || height <= margin * 2.0 {
        return None;
    }
    (0..SPAWN_ATTEMPTS)
        .map(|_| {
            DVec2::new(
                rng.gen_range(margin..width - margin),
                rng.gen_range(margin..height - margin),
            )
        })
        .find(|candidate| {
            occupied
                .iter()
                .all(|other| candidate.distance(*other) >= TANK_RADIUS * 4.0)
        })
}

/// Outcome of a finished battle.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BattleReport {
    pub(crate) ticks: u64,
    pub(crate) winner: Option<String>,
    pub(crate) tanks: Vec<TankReport>,
}

/// Final state of a single tank.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct TankReport {
    pub(crate) name: String,
    pub(crate) team: Option<String>,
    pub(crate) skin: &'static str,
    pub(crate) energy: f64,
    pub(crate) failure: Option<String>,
}

impl fmt::Display for BattleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ticks: {}", self.ticks)?;
        match &self.winner {
            Some(winner) => writeln!(f, "winner: {winner}")?,
            None => writeln!(f, "winner: none")?,
        }
        writeln!(f, "{:<24} {:<12} {:<8} {:>7}  status", "TANK", "TEAM", "SKIN", "ENERGY")?;
        for tank in &self.tanks {
            let status = match (&tank.failure, tank.energy > 0.0) {
                (Some(reason), _) => reason.as_str(),
                (None, true) => "alive",
                (None, false) => "destroyed",
            };
            writeln!(
                f,
                "{:<24} {:<12} {:<8} {:>7.1}  {status}",
                tank.name,
                tank.team.as_deref().unwrap_or("-"),
                tank.skin,
                tank.energy
            )?;
        }
        Ok(())
    }
}
