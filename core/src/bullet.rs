use serde::{Deserialize, Serialize};

use crate::{heading_vector, BulletId, BulletSighting, TankId, TeamId};

/// Projectile fired by a tank.
///
/// Bullets travel in a straight line until the resolver reports that they hit
/// a wall or a tank.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    id: BulletId,
    owner: TankId,
    owner_team: Option<TeamId>,
    x: f64,
    y: f64,
    angle: f64,
    power: f64,
}

impl Bullet {
    /// Creates a bullet leaving the provided position along `angle`.
    ///
    /// `power` is clamped into `[0, 1]`.
    #[must_use]
    pub fn new(
        id: BulletId,
        owner: TankId,
        owner_team: Option<TeamId>,
        position: (f64, f64),
        angle: f64,
        power: f64,
    ) -> Self {
        Self {
            id,
            owner,
            owner_team,
            x: position.0,
            y: position.1,
            angle,
            power: power.clamp(0.0, 1.0),
        }
    }

    /// Identifier of the bullet.
    #[must_use]
    pub const fn id(&self) -> BulletId {
        self.id
    }

    /// Tank that fired the bullet.
    #[must_use]
    pub const fn owner(&self) -> TankId {
        self.owner
    }

    /// Horizontal position of the bullet.
    #[must_use]
    pub const fn x(&self) -> f64 {
        self.x
    }

    /// Vertical position of the bullet.
    #[must_use]
    pub const fn y(&self) -> f64 {
        self.y
    }

    /// Heading of the bullet in degrees.
    #[must_use]
    pub const fn angle(&self) -> f64 {
        self.angle
    }

    /// Power the bullet was fired with.
    #[must_use]
    pub const fn power(&self) -> f64 {
        self.power
    }

    /// Damage dealt when the bullet strikes a tank.
    #[must_use]
    pub fn damage(&self) -> f64 {
        10.0 + 10.0 * self.power
    }

    /// Speed of the bullet in world units per tick.
    #[must_use]
    pub fn speed(&self) -> f64 {
        4.0 + 4.0 * self.power
    }

    /// Moves the bullet one tick forward along its heading.
    pub fn advance(&mut self) {
        let (dx, dy) = heading_vector(self.angle);
        let speed = self.speed();
        self.x += dx * speed;
        self.y += dy * speed;
    }

    /// Places the bullet at an explicit position.
    pub fn set_position(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    /// Captures the per-tick body registered with the collision resolver.
    #[must_use]
    pub fn body(&self) -> BulletBody {
        BulletBody {
            id: self.id,
            owner: self.owner,
            owner_team: self.owner_team,
            x: self.x,
            y: self.y,
            angle: self.angle,
            power: self.power,
        }
    }
}

/// Immutable per-tick snapshot of a bullet used by the collision resolver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BulletBody {
    /// Identifier of the bullet.
    pub id: BulletId,
    /// Tank that fired the bullet.
    pub owner: TankId,
    /// Team of the tank that fired the bullet.
    pub owner_team: Option<TeamId>,
    /// Horizontal position of the bullet.
    pub x: f64,
    /// Vertical position of the bullet.
    pub y: f64,
    /// Heading of the bullet in degrees.
    pub angle: f64,
    /// Power the bullet was fired with.
    pub power: f64,
}

impl BulletBody {
    /// Converts the body into a radar reading.
    #[must_use]
    pub const fn sighting(&self) -> BulletSighting {
        BulletSighting {
            id: self.id,
            x: self.x,
            y: self.y,
            angle: self.angle,
            power: self.power,
        }
    }
}
