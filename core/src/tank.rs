use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    heading_vector, normalize_angle, BulletSighting, CollisionEvent, ControlState, Relation,
    TankId, TankSighting, TeamId, TeamMessage, DEFAULT_RADAR_RANGE, GUN_RELOAD_TICKS, MAX_ENERGY,
};

/// Visual skins an AI may select during initialisation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Skin {
    /// Default skin.
    #[default]
    Zebra,
    /// Green camouflage.
    Forest,
    /// Plain black.
    Black,
    /// Orange stripes.
    Tiger,
    /// Sand camouflage.
    Desert,
    /// Glowing red.
    Lava,
    /// Blue camouflage.
    Ocean,
}

impl Skin {
    /// Every skin accepted from AI settings.
    pub const ALL: [Skin; 7] = [
        Skin::Zebra,
        Skin::Forest,
        Skin::Black,
        Skin::Tiger,
        Skin::Desert,
        Skin::Lava,
        Skin::Ocean,
    ];

    /// Looks up a skin by its settings name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|skin| skin.name() == name)
    }

    /// Settings name of the skin.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Zebra => "zebra",
            Self::Forest => "forest",
            Self::Black => "black",
            Self::Tiger => "tiger",
            Self::Desert => "desert",
            Self::Lava => "lava",
            Self::Ocean => "ocean",
        }
    }
}

/// Validated configuration an AI applied to its tank during initialisation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TankSettings {
    /// Skin requested by the AI, if it named an allowed one.
    pub skin: Option<Skin>,
}

impl TankSettings {
    /// Validates raw settings returned by an AI against the allow-list.
    ///
    /// Unknown keys and values outside the allow-list are dropped.
    #[must_use]
    pub fn from_raw(raw: &Value) -> Self {
        let skin = raw
            .get("SKIN")
            .and_then(Value::as_str)
            .and_then(Skin::from_name);
        Self { skin }
    }
}

/// Per-tick snapshot of a tank registered with the collision resolver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TankBody {
    /// Identifier of the tank.
    pub id: TankId,
    /// Team membership of the tank.
    pub team: Option<TeamId>,
    /// Horizontal position of the tank centre.
    pub x: f64,
    /// Vertical position of the tank centre.
    pub y: f64,
    /// Hull heading in degrees.
    pub angle: f64,
    /// Absolute radar heading in degrees.
    pub radar_angle: f64,
    /// Maximum radar distance.
    pub radar_range: f64,
    /// Remaining energy.
    pub energy: f64,
}

impl TankBody {
    /// Reports whether the other body belongs to the same team.
    #[must_use]
    pub fn is_ally(&self, other: &TankBody) -> bool {
        matches!((self.team, other.team), (Some(mine), Some(theirs)) if mine == theirs)
    }

    /// Classifies the team relation toward another body.
    #[must_use]
    pub fn relation_to(&self, other: &TankBody) -> Relation {
        if self.is_ally(other) {
            Relation::Ally
        } else {
            Relation::Enemy
        }
    }

    /// Distance between the centres of two bodies.
    #[must_use]
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (x - self.x).hypot(y - self.y)
    }

    /// Converts the body into a radar reading seen from `distance` away.
    #[must_use]
    pub const fn sighting(&self, distance: f64) -> TankSighting {
        TankSighting {
            id: self.id,
            x: self.x,
            y: self.y,
            angle: self.angle,
            energy: self.energy,
            distance,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Sensors {
    wall_hit: bool,
    enemy_hit: bool,
    ally_hit: bool,
    wall_distance: Option<f64>,
    enemy: Option<TankSighting>,
    ally: Option<TankSighting>,
    bullets: Vec<BulletSighting>,
    targeting_alarm: bool,
}

/// Authoritative tank entity owned by the match orchestrator.
///
/// The collision resolver reads [`TankBody`] snapshots and reports events the
/// orchestrator forwards through [`Tank::record`]. AI supervisors write
/// sanitized controls through [`Tank::apply_control`].
#[derive(Clone, Debug)]
pub struct Tank {
    id: TankId,
    name: String,
    team: Option<TeamId>,
    x: f64,
    y: f64,
    angle: f64,
    radar_angle: f64,
    radar_range: f64,
    gun_angle: f64,
    energy: f64,
    skin: Skin,
    throttle: f64,
    boost: bool,
    turn: f64,
    radar_turn: f64,
    gun_turn: f64,
    debug: Value,
    pending_shot: Option<f64>,
    gun_reload: u32,
    sensors: Sensors,
}

impl Tank {
    /// Creates a tank at the origin with full energy.
    #[must_use]
    pub fn new(id: TankId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            team: None,
            x: 0.0,
            y: 0.0,
            angle: 0.0,
            radar_angle: 0.0,
            radar_range: DEFAULT_RADAR_RANGE,
            gun_angle: 0.0,
            energy: MAX_ENERGY,
            skin: Skin::default(),
            throttle: 0.0,
            boost: false,
            turn: 0.0,
            radar_turn: 0.0,
            gun_turn: 0.0,
            debug: Value::Null,
            pending_shot: None,
            gun_reload: 0,
            sensors: Sensors::default(),
        }
    }

    /// Assigns the tank to a team.
    #[must_use]
    pub fn with_team(mut self, team: TeamId) -> Self {
        self.team = Some(team);
        self
    }

    /// Places the tank at the provided position and heading.
    #[must_use]
    pub fn at(mut self, x: f64, y: f64, angle: f64) -> Self {
        self.x = x;
        self.y = y;
        self.angle = angle;
        self
    }

    /// Points the radar relative to the hull and sets its range.
    #[must_use]
    pub fn with_radar(mut self, radar_angle: f64, radar_range: f64) -> Self {
        self.radar_angle = radar_angle;
        self.radar_range = radar_range;
        self
    }

    /// Identifier of the tank.
    #[must_use]
    pub const fn id(&self) -> TankId {
        self.id
    }

    /// Name of the AI driving the tank.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name qualified with the tank identifier.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} #{}", self.name, self.id)
    }

    /// Team membership of the tank.
    #[must_use]
    pub const fn team(&self) -> Option<TeamId> {
        self.team
    }

    /// Horizontal position of the tank centre.
    #[must_use]
    pub const fn x(&self) -> f64 {
        self.x
    }

    /// Vertical position of the tank centre.
    #[must_use]
    pub const fn y(&self) -> f64 {
        self.y
    }

    /// Hull heading in degrees.
    #[must_use]
    pub const fn angle(&self) -> f64 {
        self.angle
    }

    /// Radar heading relative to the hull, in degrees.
    #[must_use]
    pub const fn radar_angle(&self) -> f64 {
        self.radar_angle
    }

    /// Absolute radar heading in degrees.
    #[must_use]
    pub fn radar_heading(&self) -> f64 {
        normalize_angle(self.angle + self.radar_angle)
    }

    /// Maximum radar distance.
    #[must_use]
    pub const fn radar_range(&self) -> f64 {
        self.radar_range
    }

    /// Gun heading relative to the hull, in degrees.
    #[must_use]
    pub const fn gun_angle(&self) -> f64 {
        self.gun_angle
    }

    /// Absolute gun heading in degrees.
    #[must_use]
    pub fn gun_heading(&self) -> f64 {
        normalize_angle(self.angle + self.gun_angle)
    }

    /// Remaining energy; zero means destroyed.
    #[must_use]
    pub const fn energy(&self) -> f64 {
        self.energy
    }

    /// Reports whether the tank has been destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.energy <= 0.0
    }

    /// Skin selected during initialisation.
    #[must_use]
    pub const fn skin(&self) -> Skin {
        self.skin
    }

    /// Current throttle in `[-1, 1]`.
    #[must_use]
    pub const fn throttle(&self) -> f64 {
        self.throttle
    }

    /// Current boost flag.
    #[must_use]
    pub const fn boost(&self) -> bool {
        self.boost
    }

    /// Current hull rotation request in `[-1, 1]`.
    #[must_use]
    pub const fn turn(&self) -> f64 {
        self.turn
    }

    /// Current radar rotation request in `[-1, 1]`.
    #[must_use]
    pub const fn radar_turn(&self) -> f64 {
        self.radar_turn
    }

    /// Current gun rotation request in `[-1, 1]`.
    #[must_use]
    pub const fn gun_turn(&self) -> f64 {
        self.gun_turn
    }

    /// Debug payload most recently published by the AI.
    #[must_use]
    pub fn debug_data(&self) -> &Value {
        &self.debug
    }

    /// Shot power requested by the AI and not yet taken by the orchestrator.
    #[must_use]
    pub const fn pending_shot(&self) -> Option<f64> {
        self.pending_shot
    }

    /// Reports whether the gun is still reloading.
    #[must_use]
    pub const fn is_reloading(&self) -> bool {
        self.gun_reload > 0
    }

    /// Applies validated initialisation settings.
    pub fn init(&mut self, settings: TankSettings) {
        if let Some(skin) = settings.skin {
            self.skin = skin;
        }
    }

    /// Moves the tank to an explicit position.
    pub fn set_position(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    /// Sets the hull heading, wrapped into `[-180, 180]`.
    pub fn set_angle(&mut self, angle: f64) {
        self.angle = normalize_angle(angle);
    }

    /// Rotates the radar relative to the hull.
    pub fn rotate_radar(&mut self, degrees: f64) {
        self.radar_angle = normalize_angle(self.radar_angle + degrees);
    }

    /// Rotates the gun relative to the hull.
    pub fn rotate_gun(&mut self, degrees: f64) {
        self.gun_angle = normalize_angle(self.gun_angle + degrees);
    }

    /// Removes energy, never dropping below zero.
    pub fn damage(&mut self, amount: f64) {
        self.energy = (self.energy - amount.max(0.0)).max(0.0);
    }

    /// Writes sanitized AI controls onto the tank.
    ///
    /// A positive `shoot` value queues a shot with that power; any other value
    /// drops a shot the orchestrator did not take.
    pub fn apply_control(&mut self, control: &ControlState) {
        self.throttle = control.throttle;
        self.boost = control.boost;
        self.turn = control.turn;
        self.radar_turn = control.radar_turn;
        self.gun_turn = control.gun_turn;
        self.debug = control.debug.clone();
        if control.wants_to_shoot() {
            self.shoot(control.shoot);
        } else {
            self.pending_shot = None;
        }
    }

    /// Queues a shot with the provided power.
    pub fn shoot(&mut self, power: f64) {
        self.pending_shot = Some(power.clamp(0.0, 1.0));
    }

    /// Takes the queued shot if the gun is loaded, starting the reload.
    ///
    /// A queued shot is discarded while the gun reloads.
    pub fn take_shot(&mut self) -> Option<f64> {
        let power = self.pending_shot.take()?;
        if self.is_reloading() || power <= 0.0 {
            return None;
        }
        self.gun_reload = (f64::from(GUN_RELOAD_TICKS) * power).ceil() as u32;
        Some(power)
    }

    /// Position of the gun muzzle.
    #[must_use]
    pub fn muzzle(&self) -> (f64, f64) {
        let (dx, dy) = heading_vector(self.gun_heading());
        (self.x + dx * crate::TANK_RADIUS, self.y + dy * crate::TANK_RADIUS)
    }

    /// Clears sensor readings and cools the gun at the start of a tick.
    pub fn begin_tick(&mut self) {
        self.sensors = Sensors::default();
        self.gun_reload = self.gun_reload.saturating_sub(1);
    }

    /// Records a resolver event if it is addressed to this tank.
    pub fn record(&mut self, event: &CollisionEvent) {
        match event {
            CollisionEvent::TankHitWall { tank } if *tank == self.id => {
                self.sensors.wall_hit = true;
            }
            CollisionEvent::TankHitTank {
                tank,
                other,
                relation,
            } if *tank == self.id && *other != self.id => match relation {
                Relation::Enemy => self.sensors.enemy_hit = true,
                Relation::Ally => self.sensors.ally_hit = true,
            },
            CollisionEvent::WallSpotted { tank, distance } if *tank == self.id => {
                self.sensors.wall_distance = Some(*distance);
            }
            CollisionEvent::TankSpotted {
                scanner,
                sighting,
                relation,
            } if *scanner == self.id => {
                let slot = match relation {
                    Relation::Enemy => &mut self.sensors.enemy,
                    Relation::Ally => &mut self.sensors.ally,
                };
                let closer = slot.map_or(true, |current| sighting.distance < current.distance);
                if closer {
                    *slot = Some(*sighting);
                }
            }
            CollisionEvent::TargetingAlarm { target, .. } if *target == self.id => {
                self.sensors.targeting_alarm = true;
            }
            CollisionEvent::BulletSpotted { scanner, sighting } if *scanner == self.id => {
                self.sensors.bullets.push(*sighting);
            }
            _ => {}
        }
    }

    /// Captures the per-tick body registered with the collision resolver.
    #[must_use]
    pub fn body(&self) -> TankBody {
        TankBody {
            id: self.id,
            team: self.team,
            x: self.x,
            y: self.y,
            angle: self.angle,
            radar_angle: self.radar_heading(),
            radar_range: self.radar_range,
            energy: self.energy,
        }
    }

    /// Builds the observable state handed to the tank's AI.
    #[must_use]
    pub fn state(&self, inbox: &[TeamMessage]) -> TankState {
        let wall_distance = self
            .sensors
            .wall_distance
            .filter(|distance| *distance <= self.radar_range);

        TankState {
            id: self.id,
            x: self.x,
            y: self.y,
            angle: self.angle,
            energy: self.energy,
            boost: self.boost,
            collisions: CollisionFlags {
                enemy: self.sensors.enemy_hit,
                ally: self.sensors.ally_hit,
                wall: self.sensors.wall_hit,
            },
            radar: RadarState {
                angle: self.radar_angle,
                targeting_alarm: self.sensors.targeting_alarm,
                wall_distance,
                enemy: self.sensors.enemy,
                ally: self.sensors.ally,
                bullets: self.sensors.bullets.clone(),
            },
            gun: GunState {
                angle: self.gun_angle,
                reloading: self.is_reloading(),
            },
            radio: RadioState {
                inbox: inbox
                    .iter()
                    .filter(|message| message.sender != self.id)
                    .cloned()
                    .collect(),
            },
        }
    }
}

/// Observable tank state sent to the AI with every `update` request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TankState {
    /// Identifier of the tank.
    pub id: TankId,
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
    /// Hull heading in degrees.
    pub angle: f64,
    /// Remaining energy.
    pub energy: f64,
    /// Whether boost is engaged.
    pub boost: bool,
    /// Collisions reported during the current tick.
    pub collisions: CollisionFlags,
    /// Radar readings of the current tick.
    pub radar: RadarState,
    /// Gun state.
    pub gun: GunState,
    /// Team messages delivered this tick.
    pub radio: RadioState,
}

/// Collisions reported during a tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CollisionFlags {
    /// Collided with an enemy tank.
    pub enemy: bool,
    /// Collided with an allied tank.
    pub ally: bool,
    /// Collided with a wall.
    pub wall: bool,
}

/// Radar readings of a tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarState {
    /// Radar heading relative to the hull.
    pub angle: f64,
    /// An enemy radar spotted this tank.
    pub targeting_alarm: bool,
    /// Distance to the wall along the radar heading, `None` when out of range.
    pub wall_distance: Option<f64>,
    /// Closest spotted enemy.
    pub enemy: Option<TankSighting>,
    /// Closest spotted ally.
    pub ally: Option<TankSighting>,
    /// Spotted bullets.
    pub bullets: Vec<BulletSighting>,
}

/// Gun state of a tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct GunState {
    /// Gun heading relative to the hull.
    pub angle: f64,
    /// The gun cannot fire yet.
    pub reloading: bool,
}

/// Team messages delivered to the tank.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RadioState {
    /// Messages sent by team mates during the previous tick.
    pub inbox: Vec<TeamMessage>,
}
