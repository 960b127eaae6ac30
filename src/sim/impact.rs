//! Collision damage
//!
//! Turns the strongest contact of a freshly begun collision into a
//! radial hit on the vehicle that received it.

use glam::DVec2;

use super::collision::{Category, CollisionReport, ContactReport};
use super::damage::{DamageEngine, DamagePolicy, Hit, RadialPolicy};
use super::vehicle::{Detached, VehicleModel};
use crate::settings::Tuning;

/// Event every vehicle body subscribes to
pub const COLLISION_DAMAGE_EVENT: &str =
    "collision:begin:average-world-point:world-normal:average-normal-impulse";

#[derive(Debug, Clone)]
pub struct ImpactDamage {
    engine: DamageEngine,
    hit: Hit,
    tuning: Tuning,
}

impl ImpactDamage {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            engine: DamageEngine::new(tuning.grid_size)
                .with_policy(DamagePolicy::Radial(RadialPolicy::default())),
            hit: Hit::default(),
            tuning: tuning.clone(),
        }
    }

    /// Hit produced by the last handled collision
    pub fn last_hit(&self) -> &Hit {
        &self.hit
    }

    /// Contact with the largest average normal impulse
    pub fn strongest_contact(report: &CollisionReport) -> Option<&ContactReport> {
        report
            .contacts
            .iter()
            .filter(|c| c.average_normal_impulse.is_some())
            .fold(None, |best: Option<&ContactReport>, c| match best {
                Some(b) if b.average_normal_impulse >= c.average_normal_impulse => Some(b),
                _ => Some(c),
            })
    }

    /// Damage `vehicle` from a collision it took part in. Returns the
    /// parts destroyed, or `None` if the collision did no damage.
    pub fn handle(&mut self, vehicle: &mut VehicleModel, report: &CollisionReport) -> Option<Detached> {
        self.hit.clear();
        if report.other_category.intersects(Category::SCRAP) {
            return None;
        }

        let contact = Self::strongest_contact(report)?;
        let damage = contact.average_normal_impulse?;
        if damage < self.tuning.impulse_damage_threshold {
            return None;
        }
        let (Some(point), Some(normal)) = (contact.average_world_point, contact.world_normal) else {
            return None;
        };

        // Half a cell back along the normal lands inside our own hull
        let query = point - normal * (self.tuning.cell_size / 2.0);
        let radius = damage.sqrt() * self.tuning.damage_radius_scale;
        if let Some(radial) = self.engine.radial_mut() {
            radial.radius = Some(radius);
        }
        self.engine.compute(&*vehicle, query, damage, &mut self.hit);
        self.harden(vehicle);

        log::debug!(
            "Vehicle {} struck with impulse {:.2} at ({:.2}, {:.2}): {} atoms",
            vehicle.id(),
            damage,
            query.x,
            query.y,
            self.hit.len()
        );
        Some(vehicle.receive_hit(&self.hit))
    }

    /// Scale damage on atoms tougher than the hardened threshold
    fn harden(&mut self, vehicle: &VehicleModel) {
        for (atom, damage) in self.hit.atoms.iter().zip(self.hit.damage_values.iter_mut()) {
            let hardened = vehicle
                .atom(*atom)
                .is_some_and(|a| self.tuning.is_hardened(a.max_hp));
            if hardened {
                *damage = (*damage * self.tuning.hardened_damage_modifier).ceil();
            }
        }
    }
}
