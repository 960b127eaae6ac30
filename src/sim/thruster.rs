//! Thrusters and thrust allocation
//!
//! - [`Thruster`]: a force source fixed to the vehicle, with a usage
//!   coefficient in [0, 1]
//! - [`iterate_once`]: one greedy coordinate-descent step toward a target
//!   (forward, right, torque) wrench
//! - [`TorqueController`]: bang-bang heading controller with braking
//! - [`MouseLookPilot`]: turns steering input into coefficients

use std::borrow::{Borrow, BorrowMut};

use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

use super::physics::BodyState;
use super::vehicle::{GizmoId, GridGeometry, VehicleModel};
use crate::normalize_angle;
use crate::settings::{AxisWeights, Tuning};

/// Where a thruster came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrusterSource {
    /// Synthetic, indestructible, rebuilt around the center of mass
    Base,
    /// Backed by a loaded gizmo
    Gizmo(GizmoId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thruster {
    pub source: ThrusterSource,
    /// Maximum force
    pub force: f64,
    /// Gizmo position in cells
    pub position: DVec2,
    /// Radians, 0 is forward (+x)
    pub angle: f64,
    /// Registration point of the template (cells)
    pub reg: DVec2,
    /// Nozzle offset from the registration point, before rotation (cells)
    pub thrust_offset: DVec2,
    /// Nozzle position in vehicle-local world units
    pub local_pos: DVec2,
    /// Force at full usage in vehicle-local coordinates
    pub local_force: DVec2,
    /// Current usage in [0, 1]
    pub coeff: f64,
    /// Torque about the center of mass at full usage
    pub torque: f64,
    pub attached: bool,
}

impl Thruster {
    pub fn new(source: ThrusterSource, position: DVec2, angle: f64, force: f64) -> Self {
        Self {
            source,
            force,
            position,
            angle,
            reg: DVec2::ZERO,
            thrust_offset: DVec2::ZERO,
            local_pos: DVec2::ZERO,
            local_force: DVec2::ZERO,
            coeff: 0.0,
            torque: 0.0,
            attached: true,
        }
    }

    pub fn with_mount(mut self, reg: DVec2, thrust_offset: DVec2) -> Self {
        self.reg = reg;
        self.thrust_offset = thrust_offset;
        self
    }

    pub fn is_base(&self) -> bool {
        self.source == ThrusterSource::Base
    }

    /// Derive the local nozzle position and force vector
    pub fn init(&mut self, geometry: &GridGeometry) {
        let offset = DVec2::from_angle(self.angle).rotate(self.thrust_offset);
        self.local_pos = geometry.cell_to_local(self.position + self.reg + offset);
        self.local_force = DVec2::from_angle(self.angle) * self.force;
    }

    pub fn compute_torque(&mut self, local_com: DVec2) -> f64 {
        self.torque = (self.local_pos - local_com).perp_dot(self.local_force);
        self.torque
    }

    /// Direction of this thruster's contribution in weighted (F, R, T) space
    fn direction(&self, weights: &AxisWeights) -> DVec3 {
        DVec3::new(
            self.local_force.x * weights.forward,
            self.local_force.y * weights.right,
            self.torque * weights.torque,
        )
    }
}

/// Target forward force, lateral force and torque
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Wrench {
    pub forward: f64,
    pub right: f64,
    pub torque: f64,
}

impl Wrench {
    pub fn new(forward: f64, right: f64, torque: f64) -> Self {
        Self {
            forward,
            right,
            torque,
        }
    }

    fn weighted(&self, weights: &AxisWeights) -> DVec3 {
        DVec3::new(
            self.forward * weights.forward,
            self.right * weights.right,
            self.torque * weights.torque,
        )
    }
}

/// Aggregate wrench produced by the thrusters' current coefficients
pub fn produced_wrench<T: Borrow<Thruster>>(thrusters: &[T]) -> Wrench {
    thrusters.iter().fold(Wrench::default(), |acc, t| {
        let t: &Thruster = t.borrow();
        Wrench::new(
            acc.forward + t.local_force.x * t.coeff,
            acc.right + t.local_force.y * t.coeff,
            acc.torque + t.torque * t.coeff,
        )
    })
}

/// Adjust the single thruster coefficient that brings the produced wrench
/// closest to `target`. Returns true when no adjustment helps (converged).
pub fn iterate_once<T: BorrowMut<Thruster>>(
    thrusters: &mut [T],
    target: Wrench,
    weights: &AxisWeights,
) -> bool {
    if thrusters.is_empty() {
        return true;
    }

    let target = target.weighted(weights);
    let current: DVec3 = thrusters
        .iter()
        .map(|t| {
            let t: &Thruster = t.borrow();
            t.direction(weights) * t.coeff
        })
        .sum();

    let mut best: Option<(usize, f64, f64)> = None;
    for (index, thruster) in thrusters.iter().enumerate() {
        let thruster: &Thruster = thruster.borrow();
        let dir = thruster.direction(weights);
        let dir_sq = dir.length_squared();
        if dir_sq == 0.0 {
            continue;
        }

        // Wrench from every other thruster
        let origin = current - dir * thruster.coeff;
        let t = (dir.dot(target - origin) / dir_sq).clamp(0.0, 1.0);
        if (thruster.coeff - t).abs() < 1e-16 {
            continue;
        }

        let error = (origin + dir * t - target).length_squared();
        if best.is_none_or(|(_, _, closest)| error < closest) {
            best = Some((index, t, error));
        }
    }

    match best {
        Some((index, coeff, _)) => {
            let thruster: &mut Thruster = thrusters[index].borrow_mut();
            thruster.coeff = coeff;
            false
        }
        None => true,
    }
}

/// Output of [`TorqueController::find_target_torque`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TorqueTarget {
    /// Heading error this was computed for
    pub angle: f64,
    pub torque: f64,
    /// Turning counter-clockwise toward the target
    pub ccw: bool,
    /// Torque exactly cancels the angular velocity this step
    pub frozen: bool,
    /// Predicted braking distance when braking, else 0
    pub brake_dist: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorqueController {
    pub dt: f64,
    /// Heading error under which rotation may be frozen
    pub deadband: f64,
    pub brake_tolerance: f64,
}

impl Default for TorqueController {
    fn default() -> Self {
        Self::from_tuning(&Tuning::default())
    }
}

#[inline]
fn non_zero_sign(value: f64) -> f64 {
    if value > 0.0 { 1.0 } else { -1.0 }
}

impl TorqueController {
    pub fn from_tuning(tuning: &Tuning) -> Self {
        Self {
            dt: tuning.dt,
            deadband: tuning.heading_deadband,
            brake_tolerance: tuning.brake_tolerance,
        }
    }

    /// Torque to apply this step to turn through `target_angle` (radians,
    /// positive is counter-clockwise). `max_cw` is the clockwise authority
    /// as a negative torque.
    pub fn find_target_torque(
        &self,
        angular_velocity: f64,
        target_angle: f64,
        inverse_inertia: f64,
        max_ccw: f64,
        max_cw: f64,
    ) -> TorqueTarget {
        let dt = self.dt;
        let mut result = TorqueTarget {
            angle: target_angle,
            ..Default::default()
        };

        if target_angle.abs() > std::f64::consts::PI {
            log::warn!("Heading error outside [-π, π]: {}", target_angle);
        }

        // Zero error counts as counter-clockwise
        let (mut desired, mut brake) = if target_angle < 0.0 {
            result.ccw = false;
            (max_cw, max_ccw)
        } else {
            result.ccw = true;
            (max_ccw, max_cw)
        };

        // Massless or shapeless body: no dynamics to plan against
        if inverse_inertia <= 0.0 || !inverse_inertia.is_finite() {
            result.torque = desired;
            return result;
        }

        if target_angle.abs() < self.deadband {
            let freeze = if angular_velocity > 0.0 {
                angular_velocity + max_cw * inverse_inertia * dt < 0.0
            } else {
                angular_velocity + max_ccw * inverse_inertia * dt > 0.0
            };
            if freeze {
                result.torque = -angular_velocity / (dt * inverse_inertia);
                result.frozen = true;
                return result;
            }
        }

        // Already turning the right way: is it time to brake?
        if result.ccw == (angular_velocity > 0.0) {
            let brake_time = -angular_velocity / (brake * inverse_inertia);
            let brake_dist = brake_time * angular_velocity * 0.5;
            if brake_dist.abs() - target_angle.abs() > -self.brake_tolerance {
                result.brake_dist = brake_dist;
                std::mem::swap(&mut desired, &mut brake);
            }
        }

        // Torque that would close the heading error in exactly one step
        let optimal_velocity = target_angle / dt;
        let optimal_torque = (optimal_velocity - angular_velocity) / (dt * inverse_inertia);
        let desired_sign = non_zero_sign(desired);

        if desired_sign == non_zero_sign(optimal_torque) && desired.abs() > optimal_torque.abs() {
            // Only take the optimal torque if next step can stop us dead
            let required_brake = -optimal_velocity / (dt * inverse_inertia);
            let available_brake = if desired_sign == non_zero_sign(required_brake) {
                desired
            } else {
                brake
            };
            if required_brake.abs() <= available_brake.abs() {
                desired = optimal_torque;
            }
        }

        result.torque = desired;
        result
    }
}

/// Maximum force and torque available along each axis
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThrustEnvelope {
    pub max_forward: f64,
    pub max_backward: f64,
    pub max_right: f64,
    pub max_left: f64,
    pub max_ccw: f64,
    pub max_cw: f64,
}

impl ThrustEnvelope {
    /// Sum of every attached thruster's positive and negative contributions
    pub fn from_thrusters<'a>(thrusters: impl IntoIterator<Item = &'a Thruster>) -> Self {
        let mut env = Self::default();
        for t in thrusters.into_iter().filter(|t| t.attached) {
            env.max_forward += t.local_force.x.max(0.0);
            env.max_backward += (-t.local_force.x).max(0.0);
            env.max_right += t.local_force.y.max(0.0);
            env.max_left += (-t.local_force.y).max(0.0);
            env.max_ccw += t.torque.max(0.0);
            env.max_cw += (-t.torque).max(0.0);
        }
        env
    }
}

/// Player intent for one step
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SteeringInput {
    /// World heading to face (radians)
    pub face_heading: f64,
    /// World heading to thrust toward (radians)
    pub thrust_heading: f64,
    /// 0 is idle, 255 is full power
    pub thrust_power: u8,
}

/// What the pilot decided this step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Steering {
    pub target: Wrench,
    /// What the allocated coefficients actually deliver
    pub produced: Wrench,
    pub torque: TorqueTarget,
    /// Allocator steps taken
    pub iterations: usize,
    pub converged: bool,
}

/// Faces the vehicle toward a heading while thrusting in another
#[derive(Debug, Clone)]
pub struct MouseLookPilot {
    envelope: ThrustEnvelope,
    weights: AxisWeights,
    controller: TorqueController,
    iteration_factor: usize,
    /// Vehicle thruster revision the envelope was computed from
    revision: Option<u64>,
}

impl Default for MouseLookPilot {
    fn default() -> Self {
        Self::new(&Tuning::default())
    }
}

impl MouseLookPilot {
    pub fn new(tuning: &Tuning) -> Self {
        Self {
            envelope: ThrustEnvelope::default(),
            weights: tuning.axis_weights,
            controller: TorqueController::from_tuning(tuning),
            iteration_factor: tuning.allocator_iteration_factor,
            revision: None,
        }
    }

    pub fn envelope(&self) -> &ThrustEnvelope {
        &self.envelope
    }

    /// Recompute the envelope if the vehicle's thrusters changed
    pub fn refresh(&mut self, vehicle: &VehicleModel) {
        if self.revision != Some(vehicle.thrusters_revision()) {
            self.envelope = ThrustEnvelope::from_thrusters(vehicle.thrusters());
            self.revision = Some(vehicle.thrusters_revision());
            log::debug!("Vehicle {} thrust envelope {:?}", vehicle.id(), self.envelope);
        }
    }

    /// Set every thruster coefficient on `vehicle` for this step
    pub fn steer(
        &mut self,
        vehicle: &mut VehicleModel,
        body: &BodyState,
        input: &SteeringInput,
    ) -> Steering {
        self.refresh(vehicle);
        let env = self.envelope;

        // Signed angle from the current facing to the desired one
        let target_angle = normalize_angle(input.face_heading - body.angle);

        let torque = self.controller.find_target_torque(
            body.angular_velocity,
            target_angle,
            body.inverse_inertia,
            env.max_ccw,
            -env.max_cw,
        );

        let power = f64::from(input.thrust_power) / 255.0;
        let (mut forward_force, mut right_force) = (0.0, 0.0);
        if power > 0.0 {
            let relative = normalize_angle(input.thrust_heading - body.angle);
            let (s, c) = relative.sin_cos();
            forward_force = c * if c > 0.0 { env.max_forward } else { env.max_backward };
            right_force = s * if s > 0.0 { env.max_right } else { env.max_left };
        }
        let target = Wrench::new(forward_force, right_force, torque.torque);

        let total = vehicle.thrusters().len();
        let mut active: Vec<&mut Thruster> = vehicle
            .thrusters_mut()
            .iter_mut()
            .filter_map(|t| {
                t.coeff = 0.0;
                t.attached.then_some(t)
            })
            .collect();

        let mut iterations = 0;
        let mut converged = false;
        while iterations < self.iteration_factor * total {
            if iterate_once(&mut active, target, &self.weights) {
                converged = true;
                break;
            }
            iterations += 1;
        }

        Steering {
            target,
            produced: produced_wrench(&active),
            torque,
            iterations,
            converged,
        }
    }
}

/// World-space (force, application point) of every firing thruster
pub fn thruster_forces(vehicle: &VehicleModel) -> impl Iterator<Item = (DVec2, DVec2)> + '_ {
    let transform = *vehicle.transform();
    vehicle
        .thrusters()
        .iter()
        .filter(|t| t.attached && t.coeff > 0.0)
        .map(move |t| {
            (
                transform.rotate(t.local_force) * t.coeff,
                transform.local_to_world(t.local_pos),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::f64::consts::{PI, TAU};

    fn thruster(force: DVec2, torque: f64) -> Thruster {
        let mut t = Thruster::new(ThrusterSource::Base, DVec2::ZERO, 0.0, force.length());
        t.local_force = force;
        t.torque = torque;
        t
    }

    #[test]
    fn test_single_aligned_thruster_takes_exact_ratio() {
        let weights = AxisWeights::default();
        let mut ts = vec![thruster(DVec2::new(2.0, 0.0), 0.0)];

        assert!(!iterate_once(&mut ts, Wrench::new(1.0, 0.0, 0.0), &weights));
        assert!((ts[0].coeff - 0.5).abs() < 1e-12);
        // Nothing left to improve
        assert!(iterate_once(&mut ts, Wrench::new(1.0, 0.0, 0.0), &weights));

        let mut ts = vec![thruster(DVec2::new(2.0, 0.0), 0.0)];
        iterate_once(&mut ts, Wrench::new(5.0, 0.0, 0.0), &weights);
        assert_eq!(ts[0].coeff, 1.0);
    }

    #[test]
    fn test_empty_and_zero_direction_sets_converge() {
        let weights = AxisWeights::default();
        let mut none: Vec<Thruster> = Vec::new();
        assert!(iterate_once(&mut none, Wrench::new(1.0, 1.0, 1.0), &weights));

        let mut dud = vec![thruster(DVec2::ZERO, 0.0)];
        assert!(iterate_once(&mut dud, Wrench::new(1.0, 0.0, 0.0), &weights));
        assert_eq!(dud[0].coeff, 0.0);
    }

    #[test]
    fn test_opposing_thrusters_pick_the_useful_one() {
        let weights = AxisWeights::default();
        let mut ts = vec![
            thruster(DVec2::new(-1.0, 0.0), 0.0),
            thruster(DVec2::new(1.0, 0.0), 0.0),
        ];
        let target = Wrench::new(0.75, 0.0, 0.0);
        let mut steps = 0;
        while !iterate_once(&mut ts, target, &weights) {
            steps += 1;
            assert!(steps < 4);
        }
        assert_eq!(ts[0].coeff, 0.0);
        assert!((ts[1].coeff - 0.75).abs() < 1e-12);
        assert!((produced_wrench(&ts).forward - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_freeze_inside_deadband() {
        let c = TorqueController::default();
        // Slow spin, plenty of braking authority
        let r = c.find_target_torque(0.05, 0.001, 1.0, 10.0, -10.0);
        assert!(r.frozen);
        assert!((r.torque - (-0.05 / c.dt)).abs() < 1e-9);
    }

    #[test]
    fn test_turns_toward_target_and_brakes_near_it() {
        let c = TorqueController::default();

        let r = c.find_target_torque(0.0, 1.0, 1.0, 5.0, -5.0);
        assert!(r.ccw && !r.frozen);
        assert_eq!(r.torque, 5.0);

        let r = c.find_target_torque(0.0, -1.0, 1.0, 5.0, -5.0);
        assert!(!r.ccw);
        assert_eq!(r.torque, -5.0);

        // Spinning fast toward a nearby target: brake distance exceeds the gap
        let r = c.find_target_torque(4.0, 0.5, 1.0, 5.0, -5.0);
        assert!(r.brake_dist > 0.5);
        assert!(r.torque < 0.0);
    }

    #[test]
    fn test_optimal_torque_clamps_small_corrections() {
        let c = TorqueController::default();
        // One step at full torque would overshoot a tiny error
        let r = c.find_target_torque(0.0, 0.02, 1.0, 1000.0, -1000.0);
        let optimal = (0.02 / c.dt) / c.dt;
        assert!((r.torque - optimal).abs() < 1e-6);
    }

    #[test]
    fn test_envelope_sums_attached_only() {
        let mut a = thruster(DVec2::new(2.0, 0.0), 1.0);
        let b = thruster(DVec2::new(-1.0, 3.0), -2.0);
        let mut detached = thruster(DVec2::new(10.0, 0.0), 10.0);
        detached.attached = false;
        a.coeff = 1.0;

        let env = ThrustEnvelope::from_thrusters([&a, &b, &detached]);
        assert_eq!(env.max_forward, 2.0);
        assert_eq!(env.max_backward, 1.0);
        assert_eq!(env.max_right, 3.0);
        assert_eq!(env.max_left, 0.0);
        assert_eq!(env.max_ccw, 1.0);
        assert_eq!(env.max_cw, 2.0);
    }

    #[test]
    fn test_thruster_geometry() {
        let geometry = GridGeometry::new(24, 0.2);
        let mut t = Thruster::new(ThrusterSource::Base, DVec2::new(12.0, 12.0), PI / 2.0, 2.0)
            .with_mount(DVec2::ZERO, DVec2::new(1.0, 0.0));
        t.init(&geometry);
        // Offset (1, 0) rotated a quarter turn lands one cell down
        assert!((t.local_pos - DVec2::new(0.0, 0.2)).length() < 1e-12);
        assert!((t.local_force - DVec2::new(0.0, 2.0)).length() < 1e-12);

        // Lever (1, 0) with force (0, 2) is counter-clockwise
        let torque = t.compute_torque(DVec2::new(-1.0, 0.2));
        assert!((torque - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_pilot_thrusts_forward_with_a_real_ship() {
        let mut v = crate::sim::testing::alive(1);
        let mut pilot = MouseLookPilot::new(&crate::sim::testing::tuning());
        let body = BodyState {
            inverse_inertia: 1.0,
            ..Default::default()
        };
        let input = SteeringInput {
            face_heading: 0.0,
            thrust_heading: 0.0,
            thrust_power: 255,
        };

        let steering = pilot.steer(&mut v, &body, &input);
        assert!(pilot.envelope().max_forward > 0.0);
        assert!((steering.target.forward - pilot.envelope().max_forward).abs() < 1e-12);
        assert!(steering.iterations <= 2 * v.thrusters().len());
        assert!(steering.produced.forward > 0.0);
        assert_eq!(steering.produced, produced_wrench(v.thrusters()));
        assert!(v.thrusters().iter().all(|t| (0.0..=1.0).contains(&t.coeff)));

        // Idle power with nothing to turn toward leaves every thruster off
        let idle = SteeringInput {
            thrust_power: 0,
            ..input
        };
        let steering = pilot.steer(&mut v, &body, &idle);
        assert_eq!(steering.target.forward, 0.0);
        assert_eq!(steering.target.right, 0.0);
    }

    #[test]
    fn test_pilot_turns_the_short_way_across_the_seam() {
        let mut v = crate::sim::testing::alive(1);
        let mut pilot = MouseLookPilot::new(&crate::sim::testing::tuning());
        let body = BodyState {
            angle: 3.0,
            inverse_inertia: 1.0,
            ..Default::default()
        };
        let input = SteeringInput {
            face_heading: -3.0,
            thrust_heading: -3.0,
            thrust_power: 0,
        };

        let steering = pilot.steer(&mut v, &body, &input);
        assert!((steering.torque.angle - (TAU - 6.0)).abs() < 1e-12);
        assert!(steering.torque.ccw);

        let mirrored = BodyState {
            angle: -3.0,
            ..body
        };
        let input = SteeringInput {
            face_heading: 3.0,
            ..input
        };
        let steering = pilot.steer(&mut v, &mirrored, &input);
        assert!((steering.torque.angle + (TAU - 6.0)).abs() < 1e-12);
        assert!(!steering.torque.ccw);
    }

    #[test]
    fn test_pilot_refreshes_envelope_after_damage() {
        let mut v = crate::sim::testing::alive(1);
        let mut pilot = MouseLookPilot::default();
        pilot.refresh(&v);
        let before = *pilot.envelope();

        // Destroy both thruster atoms; the gizmo detaches
        let top = v.atom_at(3, 2).unwrap();
        let mid = v.atom_at(3, 3).unwrap();
        v.apply_damage(mid, 100.0);
        v.apply_damage(top, 100.0);
        pilot.refresh(&v);
        assert_ne!(*pilot.envelope(), before);
        assert!(v.thrusters().iter().filter(|t| !t.is_base()).all(|t| !t.attached));
    }

    #[test]
    fn test_thruster_forces_in_world_space() {
        let mut v = crate::sim::testing::alive(1);
        v.set_transform(DVec2::new(5.0, -1.0), PI / 2.0);
        let index = v.thrusters().iter().position(|t| t.is_base()).unwrap();
        v.thrusters_mut()[index].coeff = 0.5;

        let forces: Vec<_> = thruster_forces(&v).collect();
        assert_eq!(forces.len(), 1);
        let t = &v.thrusters()[index];
        let expected = DVec2::from_angle(PI / 2.0).rotate(t.local_force) * 0.5;
        assert!((forces[0].0 - expected).length() < 1e-12);
        assert!((forces[0].1 - v.transform().local_to_world(t.local_pos)).length() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_coefficients_stay_in_unit_range(
            forces in proptest::collection::vec((-5.0f64..5.0, -5.0f64..5.0, -5.0f64..5.0), 1..10),
            target in (-20.0f64..20.0, -20.0f64..20.0, -20.0f64..20.0),
        ) {
            let weights = AxisWeights::default();
            let mut ts: Vec<Thruster> = forces
                .iter()
                .map(|&(x, y, t)| thruster(DVec2::new(x, y), t))
                .collect();
            let target = Wrench::new(target.0, target.1, target.2);
            for _ in 0..2 * ts.len() {
                if iterate_once(&mut ts, target, &weights) {
                    break;
                }
            }
            for t in &ts {
                prop_assert!((0.0..=1.0).contains(&t.coeff));
            }
        }
    }
}
