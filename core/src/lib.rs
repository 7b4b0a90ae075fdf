#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the Tank Arena engine.
//!
//! This crate defines the data surface that connects the collision resolver,
//! the AI supervisors and whatever orchestrates a match. Entities ([`Tank`],
//! [`Bullet`], [`Team`]) are long-lived and owned by the orchestrator. Systems
//! read cheap per-tick bodies captured from them and report what happened as
//! [`CollisionEvent`] values pushed into caller-provided buffers. AI output
//! reaches the tanks exclusively through sanitized [`ControlState`] values.

use std::fmt;

use serde::{Deserialize, Serialize};

mod bullet;
mod control;
mod tank;
mod team;
mod ubd;

pub use bullet::{Bullet, BulletBody};
pub use control::{coerce_number, ControlState};
pub use tank::{
    CollisionFlags, GunState, RadarState, RadioState, Skin, Tank, TankBody, TankSettings,
    TankState,
};
pub use team::{Mailbox, Team, TeamMessage};
pub use ubd::{
    AiDefinition, AiDescription, MatchDescription, MatchDescriptionError,
    DEFAULT_EXECUTION_LIMIT, SUPPORTED_UBD_VERSIONS,
};

/// Radius of the bounding circle used for every tank proximity test.
pub const TANK_RADIUS: f64 = 18.0;

/// Radius of the bounding circle used for bullet wall and tank tests.
pub const BULLET_RADIUS: f64 = 3.0;

/// Full angular width of the radar cone in degrees.
///
/// The cone is centred on the absolute radar heading, so targets are spotted
/// when their bearing differs from it by less than half of this value.
pub const RADAR_FIELD_OF_VIEW: f64 = 6.0;

/// Radar range assigned to freshly created tanks.
pub const DEFAULT_RADAR_RANGE: f64 = 300.0;

/// Energy assigned to freshly created tanks.
pub const MAX_ENERGY: f64 = 100.0;

/// Number of ticks a full-power shot keeps the gun reloading.
pub const GUN_RELOAD_TICKS: u32 = 70;

/// Unique identifier assigned to a tank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TankId(u32);

impl TankId {
    /// Creates a new tank identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier assigned to a bullet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BulletId(u32);

impl BulletId {
    /// Creates a new bullet identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Unique identifier assigned to a team.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamId(u32);

impl TeamId {
    /// Creates a new team identifier with the provided numeric value.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Retrieves the numeric representation of the identifier.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

/// Rectangular arena whose walls lie at `x ∈ [0, width]` and `y ∈ [0, height]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Battlefield {
    width: f64,
    height: f64,
}

impl Battlefield {
    /// Creates a new battlefield description.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Horizontal extent of the arena in world units.
    #[must_use]
    pub const fn width(&self) -> f64 {
        self.width
    }

    /// Vertical extent of the arena in world units.
    #[must_use]
    pub const fn height(&self) -> f64 {
        self.height
    }

    /// Reports whether any part of the circle crosses one of the walls.
    ///
    /// Exactly touching a wall is not a crossing.
    #[must_use]
    pub fn circle_crosses_wall(&self, x: f64, y: f64, radius: f64) -> bool {
        x - radius < 0.0 || y - radius < 0.0 || x + radius > self.width || y + radius > self.height
    }
}

/// Team relation between two entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    /// Entities belong to different teams, or at least one has no team.
    Enemy,
    /// Entities belong to the same team.
    Ally,
}

/// Radar reading describing a spotted tank.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TankSighting {
    /// Identifier of the spotted tank.
    pub id: TankId,
    /// Horizontal position of the spotted tank.
    pub x: f64,
    /// Vertical position of the spotted tank.
    pub y: f64,
    /// Heading of the spotted tank in degrees.
    pub angle: f64,
    /// Remaining energy of the spotted tank.
    pub energy: f64,
    /// Distance between the scanning and the spotted tank.
    pub distance: f64,
}

/// Radar reading describing a spotted bullet.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletSighting {
    /// Identifier of the spotted bullet.
    pub id: BulletId,
    /// Horizontal position of the bullet.
    pub x: f64,
    /// Vertical position of the bullet.
    pub y: f64,
    /// Heading of the bullet in degrees.
    pub angle: f64,
    /// Power the bullet was fired with.
    pub power: f64,
}

/// Events reported by the collision resolver while processing a tick.
///
/// Events are pushed in the order the resolver observes them, which follows the
/// order in which the caller registers and checks entities.
#[derive(Clone, Debug, PartialEq)]
pub enum CollisionEvent {
    /// A tank's bounding circle crossed a wall.
    TankHitWall {
        /// Tank that hit the wall.
        tank: TankId,
    },
    /// A tank overlapped another tank registered earlier in the tick.
    TankHitTank {
        /// Tank that was being checked when the overlap was found.
        tank: TankId,
        /// Previously registered tank it collided with.
        other: TankId,
        /// Team relation between the two tanks.
        relation: Relation,
    },
    /// A bullet left the arena.
    BulletHitWall {
        /// Bullet that was consumed by the wall.
        bullet: BulletId,
        /// Tank that fired the bullet.
        owner: TankId,
    },
    /// A bullet struck a registered tank.
    BulletHitTank {
        /// Bullet that was consumed by the hit.
        bullet: BulletId,
        /// Tank that fired the bullet.
        owner: TankId,
        /// Tank that was struck.
        target: TankId,
        /// Team relation between the owner and the struck tank.
        relation: Relation,
        /// Power the bullet was fired with.
        power: f64,
    },
    /// The radar ray of a tank reached a wall.
    WallSpotted {
        /// Scanning tank.
        tank: TankId,
        /// Distance from the tank to the nearest wall along the radar heading.
        distance: f64,
    },
    /// A tank was spotted inside another tank's radar cone.
    TankSpotted {
        /// Scanning tank.
        scanner: TankId,
        /// Reading describing the spotted tank.
        sighting: TankSighting,
        /// Team relation between the scanning and the spotted tank.
        relation: Relation,
    },
    /// A tank learned that an enemy radar is locked on it.
    TargetingAlarm {
        /// Tank that was spotted.
        target: TankId,
        /// Enemy tank whose radar spotted it.
        scanner: TankId,
    },
    /// A bullet was spotted inside a tank's radar cone.
    BulletSpotted {
        /// Scanning tank.
        scanner: TankId,
        /// Reading describing the spotted bullet.
        sighting: BulletSighting,
    },
}

/// Wraps an angle expressed in degrees into `[-180, 180]`.
#[must_use]
pub fn normalize_angle(degrees: f64) -> f64 {
    let wrapped = (degrees + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && degrees > 0.0 {
        180.0
    } else {
        wrapped
    }
}

/// Computes the unit direction vector of a heading expressed in degrees.
///
/// Angle `0` points toward increasing `x`; positive angles rotate toward
/// increasing `y`.
#[must_use]
pub fn heading_vector(degrees: f64) -> (f64, f64) {
    let radians = degrees.to_radians();
    (radians.cos(), radians.sin())
}
