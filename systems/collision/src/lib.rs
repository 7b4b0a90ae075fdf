#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Per-tick collision and radar resolution for Tank Arena.
//!
//! The resolver keeps no entity across ticks. Each tick starts with
//! [`CollisionResolver::begin_tick`], after which the caller registers tanks
//! and bullets in an order of its choosing. Collision checks only test an
//! entity against entities registered *earlier* in the same tick, so the
//! processing order decides which tank a collision is attributed to.

use tank_arena_core::{
    heading_vector, normalize_angle, Battlefield, BulletBody, CollisionEvent, Relation, TankBody,
    TankId, BULLET_RADIUS, RADAR_FIELD_OF_VIEW, TANK_RADIUS,
};
use tracing::trace;

/// Resolves wall, tank and bullet interactions and radar scans for one tick.
#[derive(Debug)]
pub struct CollisionResolver {
    battlefield: Battlefield,
    tanks: Vec<TankBody>,
    bullets: Vec<BulletBody>,
}

impl CollisionResolver {
    /// Creates a resolver for the provided arena with empty registries.
    #[must_use]
    pub fn new(battlefield: Battlefield) -> Self {
        Self {
            battlefield,
            tanks: Vec::new(),
            bullets: Vec::new(),
        }
    }

    /// Replaces the arena bounds used by every subsequent check.
    pub fn set_battlefield(&mut self, battlefield: Battlefield) {
        self.battlefield = battlefield;
    }

    /// Arena bounds currently in use.
    #[must_use]
    pub const fn battlefield(&self) -> Battlefield {
        self.battlefield
    }

    /// Forgets every tank and bullet registered during the previous tick.
    pub fn begin_tick(&mut self) {
        self.tanks.clear();
        self.bullets.clear();
    }

    /// Tanks registered so far this tick, in registration order.
    #[must_use]
    pub fn registered_tanks(&self) -> &[TankBody] {
        &self.tanks
    }

    /// Bullets registered so far this tick, in registration order.
    #[must_use]
    pub fn registered_bullets(&self) -> &[BulletBody] {
        &self.bullets
    }

    /// Tests a tank against the walls and every tank registered before it.
    ///
    /// Returns `false` after reporting [`CollisionEvent::TankHitWall`] or
    /// [`CollisionEvent::TankHitTank`]; a colliding tank is not registered.
    /// Otherwise the tank is registered for the rest of the tick and `true`
    /// is returned.
    pub fn check_tank(&mut self, tank: &TankBody, out: &mut Vec<CollisionEvent>) -> bool {
        if self
            .battlefield
            .circle_crosses_wall(tank.x, tank.y, TANK_RADIUS)
        {
            trace!(tank = tank.id.get(), "tank hit a wall");
            out.push(CollisionEvent::TankHitWall { tank: tank.id });
            return false;
        }

        let collision_distance = 2.0 * TANK_RADIUS;
        let collided = self
            .tanks
            .iter()
            .filter(|other| other.id != tank.id)
            .find(|other| other.distance_to(tank.x, tank.y) < collision_distance);

        if let Some(other) = collided {
            trace!(tank = tank.id.get(), other = other.id.get(), "tank hit a tank");
            out.push(CollisionEvent::TankHitTank {
                tank: tank.id,
                other: other.id,
                relation: tank.relation_to(other),
            });
            return false;
        }

        self.update_tank(tank);
        true
    }

    /// Registers a tank's current state without running collision checks.
    ///
    /// A tank registered earlier in the tick is replaced in place.
    pub fn update_tank(&mut self, tank: &TankBody) {
        match self.tanks.iter_mut().find(|entry| entry.id == tank.id) {
            Some(entry) => *entry = *tank,
            None => self.tanks.push(*tank),
        }
    }

    /// Drops a tank from the registry for the rest of the tick.
    ///
    /// Removed tanks no longer absorb bullets or show up on radar. Returns
    /// whether the tank was registered.
    pub fn remove_tank(&mut self, tank: TankId) -> bool {
        let before = self.tanks.len();
        self.tanks.retain(|entry| entry.id != tank);
        self.tanks.len() != before
    }

    /// Tests a bullet against the walls and every registered tank.
    ///
    /// Returns `true` when the bullet was consumed by a wall or a tank. The
    /// owner is never hit by its own bullet; allies are hit and reported with
    /// [`Relation::Ally`]. A bullet still in flight is
    /// registered for radar scans and `false` is returned.
    pub fn hit_test_bullet(&mut self, bullet: &BulletBody, out: &mut Vec<CollisionEvent>) -> bool {
        if self
            .battlefield
            .circle_crosses_wall(bullet.x, bullet.y, BULLET_RADIUS)
        {
            out.push(CollisionEvent::BulletHitWall {
                bullet: bullet.id,
                owner: bullet.owner,
            });
            return true;
        }

        let hit_distance = TANK_RADIUS + BULLET_RADIUS;
        let struck = self
            .tanks
            .iter()
            .filter(|tank| tank.id != bullet.owner)
            .find(|tank| tank.distance_to(bullet.x, bullet.y) < hit_distance);

        if let Some(target) = struck {
            let relation = match (bullet.owner_team, target.team) {
                (Some(owner), Some(team)) if owner == team => Relation::Ally,
                _ => Relation::Enemy,
            };
            trace!(
                bullet = bullet.id.get(),
                target = target.id.get(),
                "bullet hit a tank"
            );
            out.push(CollisionEvent::BulletHitTank {
                bullet: bullet.id,
                owner: bullet.owner,
                target: target.id,
                relation,
                power: bullet.power,
            });
            return true;
        }

        match self.bullets.iter_mut().find(|entry| entry.id == bullet.id) {
            Some(entry) => *entry = *bullet,
            None => self.bullets.push(*bullet),
        }
        false
    }

    /// Casts the radar ray toward the nearest wall and reports its distance.
    ///
    /// Returns the reported distance, or `None` when no wall lies ahead of the
    /// tank (which only happens for tanks outside the arena).
    pub fn scan_walls(&self, tank: &TankBody, out: &mut Vec<CollisionEvent>) -> Option<f64> {
        let distance = ray_to_walls(&self.battlefield, tank.x, tank.y, tank.radar_angle)?;
        out.push(CollisionEvent::WallSpotted {
            tank: tank.id,
            distance,
        });
        Some(distance)
    }

    /// Reports every registered tank inside the scanning tank's radar cone.
    ///
    /// Spotted enemies additionally receive a
    /// [`CollisionEvent::TargetingAlarm`]. Returns whether anything was seen.
    pub fn scan_tanks(&self, tank: &TankBody, out: &mut Vec<CollisionEvent>) -> bool {
        let mut spotted = false;

        for other in self.tanks.iter().filter(|other| other.id != tank.id) {
            let Some(distance) = radar_contact(tank, other.x, other.y) else {
                continue;
            };

            spotted = true;
            let relation = tank.relation_to(other);
            out.push(CollisionEvent::TankSpotted {
                scanner: tank.id,
                sighting: other.sighting(distance),
                relation,
            });
            if relation == Relation::Enemy {
                out.push(CollisionEvent::TargetingAlarm {
                    target: other.id,
                    scanner: tank.id,
                });
            }
        }

        spotted
    }

    /// Reports every registered bullet inside the scanning tank's radar cone.
    ///
    /// Bullets fired by the scanning tank itself are ignored. Returns whether
    /// anything was seen.
    pub fn scan_bullets(&self, tank: &TankBody, out: &mut Vec<CollisionEvent>) -> bool {
        let mut spotted = false;

        for bullet in self
            .bullets
            .iter()
            .filter(|bullet| bullet.owner != tank.id)
        {
            if radar_contact(tank, bullet.x, bullet.y).is_none() {
                continue;
            }

            spotted = true;
            out.push(CollisionEvent::BulletSpotted {
                scanner: tank.id,
                sighting: bullet.sighting(),
            });
        }

        spotted
    }
}

/// Returns the distance to a point if it lies strictly inside the radar range
/// and strictly inside the radar cone.
fn radar_contact(scanner: &TankBody, x: f64, y: f64) -> Option<f64> {
    let dx = x - scanner.x;
    let dy = y - scanner.y;
    let distance = dx.hypot(dy);
    if distance >= scanner.radar_range {
        return None;
    }

    let bearing = dy.atan2(dx).to_degrees();
    let offset = normalize_angle(bearing - scanner.radar_angle).abs();
    if offset < RADAR_FIELD_OF_VIEW / 2.0 {
        Some(distance)
    } else {
        None
    }
}

/// Distance along `heading` from `(x, y)` to the closest wall crossing.
fn ray_to_walls(battlefield: &Battlefield, x: f64, y: f64, heading: f64) -> Option<f64> {
    let (dx, dy) = heading_vector(heading);
    let mut nearest: Option<f64> = None;

    let candidates = [
        (dx, 0.0 - x),
        (dx, battlefield.width() - x),
        (dy, 0.0 - y),
        (dy, battlefield.height() - y),
    ];

    for (component, offset) in candidates {
        if component == 0.0 {
            continue;
        }
        let t = offset / component;
        if t > 0.0 && nearest.map_or(true, |current| t < current) {
            nearest = Some(t);
        }
    }

    nearest
}
