//! Per-wheel vehicle dynamics.
//!
//! The step is a pure function of the previous body, one input, a fixed `dt`
//! and terrain queries. It never reads a clock or a random source, so client
//! prediction and the authoritative room produce identical results when fed
//! identical values.

use crate::game_logic::components::{Body, Input, WorldState};
use crate::game_logic::constants::{
    ANGULAR_DAMPING, BRAKE_SPEED_THRESHOLD, FLOOR_BOUNCE, FLOOR_OFFSET, GRAVITY,
    HANDBRAKE_LATERAL_GRIP, HANDBRAKE_MIN_SPEED, REVERSE_FORCE_FACTOR, SELF_RIGHTING_GAIN,
};
use crate::game_logic::terrain::TerrainQuery;
use crate::game_logic::vehicle::VehicleConfig;
use bevy::math::{DVec2, DVec3};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Vehicle class plus the world-wide grip multiplier
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Tuning {
    pub vehicle: VehicleConfig,
    pub friction_coefficient: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            vehicle: VehicleConfig::default(),
            friction_coefficient: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WheelPosition {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl WheelPosition {
    pub const ALL: [WheelPosition; 4] = [
        WheelPosition::FrontLeft,
        WheelPosition::FrontRight,
        WheelPosition::RearLeft,
        WheelPosition::RearRight,
    ];

    pub fn is_front(self) -> bool {
        matches!(self, WheelPosition::FrontLeft | WheelPosition::FrontRight)
    }

    pub fn is_left(self) -> bool {
        matches!(self, WheelPosition::FrontLeft | WheelPosition::RearLeft)
    }

    /// Mount offset in the body frame as (forward, left)
    pub fn local_offset(self, config: &VehicleConfig) -> (f64, f64) {
        let forward = if self.is_front() {
            config.half_wheelbase()
        } else {
            -config.half_wheelbase()
        };
        let left = if self.is_left() {
            config.half_track()
        } else {
            -config.half_track()
        };
        (forward, left)
    }
}

/// What one wheel did during a step
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WheelReport {
    pub contact: bool,
    pub compression: f64,
    /// Suspension force, also the tire's normal load
    pub load: f64,
    /// Maximum tire force magnitude this step
    pub ceiling: f64,
    pub longitudinal: f64,
    pub lateral: f64,
    pub friction_limited: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepReport {
    pub wheels: [WheelReport; 4],
    pub wheels_in_contact: usize,
}

/// World-space forward and right unit vectors.
///
/// Composed yaw, then pitch, then roll. Cheaper than a quaternion and fine for
/// vehicle attitudes; near ±90° pitch the usual gimbal artifacts apply.
pub fn body_axes(yaw: f64, pitch: f64, roll: f64) -> (DVec3, DVec3) {
    let (sy, cy) = yaw.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    let (sr, cr) = roll.sin_cos();

    let forward = DVec3::new(cp * cy, cp * sy, sp);

    let a = -sp * sr;
    let left = DVec3::new(a * cy - cr * sy, a * sy + cr * cy, cp * sr);
    (forward, -left)
}

/// Map an angle into [-π, π)
pub fn wrap_angle(angle: f64) -> f64 {
    (angle + PI).rem_euclid(TAU) - PI
}

pub fn step_body<T: TerrainQuery + ?Sized>(
    body: &Body,
    input: Input,
    dt: f64,
    terrain: &T,
    tuning: &Tuning,
) -> Body {
    step_body_with_report(body, input, dt, terrain, tuning).0
}

/// Advance one body by `dt`, also returning per-wheel telemetry.
pub fn step_body_with_report<T: TerrainQuery + ?Sized>(
    body: &Body,
    input: Input,
    dt: f64,
    terrain: &T,
    tuning: &Tuning,
) -> (Body, StepReport) {
    let input = input.clamped();
    let config = &tuning.vehicle;
    let mut next = body.clone();
    let mut report = StepReport::default();

    let target_steer = input.steer * config.max_steer;
    let max_steer_delta = config.steer_rate * dt;
    next.steer_angle =
        body.steer_angle + (target_steer - body.steer_angle).clamp(-max_steer_delta, max_steer_delta);

    let (forward, right) = body_axes(body.yaw, body.pitch, body.roll);
    let origin = body.position();
    let planar_velocity = body.planar_velocity();

    let mut planar_force = DVec2::ZERO;
    let mut vertical_force = 0.0;
    let mut roll_torque = 0.0;
    let mut pitch_torque = 0.0;
    let mut yaw_torque = 0.0;

    for (slot, wheel) in WheelPosition::ALL.into_iter().enumerate() {
        let (along, across) = wheel.local_offset(config);
        let mount = origin + forward * along - right * across;

        // Suspension
        let ground = terrain.height_at(mount.x, mount.y);
        let clearance = mount.z - ground;
        if clearance > config.rest_length + config.wheel_radius {
            continue;
        }
        let compression =
            (config.rest_length - (clearance - config.wheel_radius)).clamp(0.0, config.rest_length);
        let mount_vz = body.vz
            + along * body.pitch_rate * body.pitch.cos()
            + across * body.roll_rate * body.roll.cos();
        let load = (config.stiffness * compression - config.damping * mount_vz).max(0.0);

        vertical_force += load;
        roll_torque += load * across;
        pitch_torque += load * along;

        // Contact patch slip
        let offset = (mount - origin).truncate();
        let patch_velocity = planar_velocity + offset.perp() * body.yaw_rate;
        let heading = if wheel.is_front() {
            body.yaw + next.steer_angle
        } else {
            body.yaw
        };
        let (sh, ch) = heading.sin_cos();
        let wheel_forward = DVec2::new(ch, sh);
        let wheel_left = DVec2::new(-sh, ch);
        let slip_long = patch_velocity.dot(wheel_forward);
        let slip_lat = patch_velocity.dot(wheel_left);

        // Tire forces
        let ceiling =
            load * terrain.surface_friction(mount.x, mount.y) * tuning.friction_coefficient;
        let raw_lateral = -slip_lat * config.lateral_stiffness;
        let mut lateral = raw_lateral.clamp(-ceiling, ceiling);
        let mut limited = raw_lateral.abs() > ceiling;
        let mut longitudinal = drive_force(config, input, wheel, slip_long);

        if input.handbrake && !wheel.is_front() {
            longitudinal = if slip_long.abs() > HANDBRAKE_MIN_SPEED {
                -slip_long.signum() * (config.handbrake_force * 0.5).min(ceiling)
            } else {
                0.0
            };
            lateral *= HANDBRAKE_LATERAL_GRIP;
        }

        // Friction circle: cap the combined force, keep its direction
        let magnitude = longitudinal.hypot(lateral);
        if magnitude > ceiling {
            let scale = if magnitude > 0.0 { ceiling / magnitude } else { 0.0 };
            longitudinal *= scale;
            lateral *= scale;
            limited = true;
        }

        let wheel_force = wheel_forward * longitudinal + wheel_left * lateral;
        planar_force += wheel_force;
        yaw_torque += offset.perp_dot(wheel_force);

        report.wheels_in_contact += 1;
        report.wheels[slot] = WheelReport {
            contact: true,
            compression,
            load,
            ceiling,
            longitudinal,
            lateral,
            friction_limited: limited,
        };
    }

    let mass = config.mass;
    let contact_share = report.wheels_in_contact as f64 / 4.0;
    if report.wheels_in_contact > 0 {
        planar_force -= terrain.slope_at(body.x, body.y) * (mass * GRAVITY * contact_share);
    }

    // Linear
    let mut velocity = planar_velocity + planar_force / mass * dt;
    velocity *= (1.0 - config.linear_drag * dt).max(0.0);
    let vz = body.vz + (vertical_force / mass - GRAVITY) * dt;

    next.vx = velocity.x;
    next.vy = velocity.y;
    next.vz = vz;
    next.x = body.x + velocity.x * dt;
    next.y = body.y + velocity.y * dt;
    next.z = body.z + vz * dt;

    let floor = terrain.height_at(next.x, next.y) + FLOOR_OFFSET;
    if next.z < floor {
        next.z = floor;
        if next.vz < 0.0 {
            next.vz = -next.vz * FLOOR_BOUNCE;
        }
    }

    // Angular
    let mut roll_rate = body.roll_rate + roll_torque / config.roll_inertia() * dt;
    let mut pitch_rate = body.pitch_rate + pitch_torque / config.pitch_inertia() * dt;
    let mut yaw_rate = body.yaw_rate + yaw_torque / config.yaw_inertia() * dt;

    if report.wheels_in_contact == 0 {
        roll_rate -= body.roll * SELF_RIGHTING_GAIN * dt;
        pitch_rate -= body.pitch * SELF_RIGHTING_GAIN * dt;
    }

    let damping = (1.0 - ANGULAR_DAMPING * dt).max(0.0);
    roll_rate *= damping;
    pitch_rate *= damping;
    yaw_rate *= damping;

    next.roll_rate = roll_rate;
    next.pitch_rate = pitch_rate;
    next.yaw_rate = yaw_rate;
    next.roll = body.roll + roll_rate * dt;
    next.pitch = body.pitch + pitch_rate * dt;
    next.yaw = wrap_angle(body.yaw + yaw_rate * dt);

    next.skidding = input.handbrake || report.wheels.iter().any(|w| w.friction_limited);

    (next, report)
}

fn drive_force(config: &VehicleConfig, input: Input, wheel: WheelPosition, slip_long: f64) -> f64 {
    let driven = config.drivetrain.drives(wheel.is_front());
    let per_driven_wheel = config.engine_force / config.drivetrain.driven_wheels() as f64;

    if input.accel > 0.0 {
        if driven { per_driven_wheel * input.accel } else { 0.0 }
    } else if input.accel < 0.0 {
        if slip_long > BRAKE_SPEED_THRESHOLD {
            // Still rolling forward: brake on all four wheels
            config.brake_force * 0.25 * input.accel
        } else if driven {
            per_driven_wheel * REVERSE_FORCE_FACTOR * input.accel
        } else {
            0.0
        }
    } else {
        0.0
    }
}

/// Step every body, asking `input_for` which input drives each one.
pub fn step_world<T, F>(
    world: &WorldState,
    mut input_for: F,
    dt: f64,
    terrain: &T,
    tuning: &Tuning,
) -> WorldState
where
    T: TerrainQuery + ?Sized,
    F: FnMut(&Body) -> Input,
{
    WorldState {
        bodies: world
            .bodies
            .iter()
            .map(|body| step_body(body, input_for(body), dt, terrain, tuning))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_logic::terrain::{CornerHeights, Tile, TileGrid, TileKind};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const DT: f64 = 1.0 / 60.0;

    fn flat(kind: TileKind) -> TileGrid {
        TileGrid::flat(64, 4.0, kind, 0.0)
    }

    fn resting_body(tuning: &Tuning) -> Body {
        Body::at(DVec3::new(128.0, 128.0, tuning.vehicle.rest_height(GRAVITY)), 0.0)
    }

    fn run(body: &Body, input: Input, ticks: usize, terrain: &TileGrid, tuning: &Tuning) -> Body {
        let mut body = body.clone();
        for _ in 0..ticks {
            body = step_body(&body, input, DT, terrain, tuning);
        }
        body
    }

    /// Constant-friction ground for sweeping grip values
    struct UniformGround {
        friction: f64,
    }

    impl TerrainQuery for UniformGround {
        fn height_at(&self, _x: f64, _y: f64) -> f64 {
            0.0
        }
        fn tile_at(&self, _x: f64, _y: f64) -> Option<Tile> {
            Some(Tile::new(TileKind::Road, 0))
        }
        fn corner_heights(&self, _tx: i64, _ty: i64) -> CornerHeights {
            CornerHeights {
                nw: 0.0,
                ne: 0.0,
                se: 0.0,
                sw: 0.0,
            }
        }
        fn is_road(&self, _x: f64, _y: f64) -> bool {
            true
        }
        fn surface_friction(&self, _x: f64, _y: f64) -> f64 {
            self.friction
        }
    }

    #[test]
    fn test_axes_level() {
        let (forward, right) = body_axes(0.0, 0.0, 0.0);
        assert!((forward - DVec3::X).length() < 1e-12);
        assert!((right + DVec3::Y).length() < 1e-12);

        let (forward, _) = body_axes(0.0, 0.2, 0.0);
        assert!(forward.z > 0.0, "positive pitch lifts the nose");
        let (_, right) = body_axes(0.0, 0.0, 0.2);
        assert!(right.z < 0.0, "positive roll lifts the left side");
    }

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert!((wrap_angle(-0.25) + 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_suspension_settles() {
        let tuning = Tuning::default();
        let terrain = flat(TileKind::Road);
        let mut body = Body::at(DVec3::new(128.0, 128.0, 0.5), 0.0);
        let mut heights = Vec::new();

        for _ in 0..60 {
            body = step_body(&body, Input::NEUTRAL, DT, &terrain, &tuning);
            assert!(body.z > 0.2, "sank to {}", body.z);
            heights.push(body.z);
        }

        let tail = &heights[50..];
        let spread = tail.iter().cloned().fold(f64::MIN, f64::max)
            - tail.iter().cloned().fold(f64::MAX, f64::min);
        assert!(spread < 1e-3, "still oscillating, spread {spread}");
        assert!(body.vz.abs() < 0.05);
        let rest = tuning.vehicle.rest_height(GRAVITY);
        assert!((body.z - rest).abs() < 0.02, "z {} vs rest {}", body.z, rest);
    }

    #[test]
    fn test_free_fall_loses_vertical_speed() {
        let tuning = Tuning::default();
        let terrain = flat(TileKind::Road);
        let body = Body::at(DVec3::new(128.0, 128.0, 20.0), 0.0);
        let (next, report) = step_body_with_report(&body, Input::NEUTRAL, DT, &terrain, &tuning);
        assert_eq!(report.wheels_in_contact, 0);
        assert!(next.vz < body.vz);
        assert!((next.vz + GRAVITY * DT).abs() < 1e-12);
    }

    #[test]
    fn test_airborne_self_righting() {
        let tuning = Tuning::default();
        let terrain = flat(TileKind::Road);
        let mut body = Body::at(DVec3::new(128.0, 128.0, 50.0), 0.0);
        body.roll = 0.5;
        body.pitch = -0.3;
        let next = run(&body, Input::NEUTRAL, 30, &terrain, &tuning);
        assert!(next.roll.abs() < 0.5);
        assert!(next.pitch.abs() < 0.3);
    }

    #[test]
    fn test_floor_clamp() {
        let tuning = Tuning::default();
        let terrain = flat(TileKind::Road);
        let mut body = Body::at(DVec3::new(128.0, 128.0, 0.16), 0.0);
        body.vz = -30.0;
        let next = step_body(&body, Input::NEUTRAL, DT, &terrain, &tuning);
        assert!(next.z >= FLOOR_OFFSET - 1e-12);
        assert!(next.vz >= 0.0);
    }

    #[test]
    fn test_road_faster_than_grass() {
        let tuning = Tuning::default();
        let input = Input::new(1.0, 0.3, false);
        let start = resting_body(&tuning);

        let on_road = run(&start, input, 120, &flat(TileKind::Road), &tuning);
        let on_grass = run(&start, input, 120, &flat(TileKind::Grass), &tuning);
        assert!(
            on_road.speed() > on_grass.speed(),
            "road {} grass {}",
            on_road.speed(),
            on_grass.speed()
        );
    }

    #[test]
    fn test_handbrake_rotates_more_and_skids() {
        let tuning = Tuning::default();
        let terrain = flat(TileKind::Road);
        let mut start = resting_body(&tuning);
        start.vx = 15.0;

        let total_yaw = |handbrake: bool| {
            let input = Input::new(0.0, 1.0, handbrake);
            let mut body = start.clone();
            let mut turned = 0.0;
            for _ in 0..45 {
                let next = step_body(&body, input, DT, &terrain, &tuning);
                turned += wrap_angle(next.yaw - body.yaw);
                body = next;
            }
            (turned, body.skidding)
        };

        let (with_handbrake, skidding) = total_yaw(true);
        let (without_handbrake, _) = total_yaw(false);
        assert!(with_handbrake > without_handbrake, "{with_handbrake} <= {without_handbrake}");
        assert!(skidding);
    }

    #[test]
    fn test_neutral_input_stays_put() {
        let tuning = Tuning::default();
        let start = resting_body(&tuning);
        let end = run(&start, Input::NEUTRAL, 120, &flat(TileKind::Road), &tuning);
        assert!((end.x - start.x).abs() < 1e-9);
        assert!((end.y - start.y).abs() < 1e-9);
        assert!(!end.skidding);
    }

    #[test]
    fn test_reverse_from_standstill() {
        let tuning = Tuning::default();
        let start = resting_body(&tuning);
        let end = run(&start, Input::new(-1.0, 0.0, false), 60, &flat(TileKind::Road), &tuning);
        assert!(end.forward_speed() < -0.5);
    }

    #[test]
    fn test_braking_slows_forward_motion() {
        let tuning = Tuning::default();
        let terrain = flat(TileKind::Road);
        let mut start = resting_body(&tuning);
        start.vx = 20.0;
        let coasting = run(&start, Input::NEUTRAL, 30, &terrain, &tuning);
        let braking = run(&start, Input::new(-1.0, 0.0, false), 30, &terrain, &tuning);
        assert!(braking.vx < coasting.vx);
        assert!(braking.vx > 0.0);
    }

    #[test]
    fn test_rolls_downhill() {
        let tuning = Tuning::default();
        let mut terrain = TileGrid::flat(16, 4.0, TileKind::Road, 0.0);
        for cy in 0..=16 {
            for cx in 0..=16 {
                // drops 0.4m per tile toward +x
                terrain.set_corner_height(cx, cy, 10.0 - 0.4 * cx as f64);
            }
        }
        let h = terrain.height_at(32.0, 32.0);
        let start = Body::at(DVec3::new(32.0, 32.0, h + tuning.vehicle.rest_height(GRAVITY)), 0.0);
        let end = run(&start, Input::NEUTRAL, 60, &terrain, &tuning);
        assert!(end.vx > 0.1, "vx {}", end.vx);
    }

    #[test]
    fn test_step_is_deterministic() {
        let tuning = Tuning::default();
        let terrain = flat(TileKind::Dirt);
        let mut rng = StdRng::seed_from_u64(7);
        let inputs: Vec<Input> = (0..300)
            .map(|_| {
                Input::new(
                    rng.random_range(-1.0..=1.0),
                    rng.random_range(-1.0..=1.0),
                    rng.random_bool(0.2),
                )
            })
            .collect();

        let simulate = || {
            let mut world = WorldState::new();
            world.push(resting_body(&tuning));
            for input in &inputs {
                world = step_world(&world, |_| *input, DT, &terrain, &tuning);
            }
            world
        };

        let a = simulate();
        let b = simulate();
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a, b);
    }

    #[test]
    fn test_friction_circle_bound_randomized() {
        let mut rng = StdRng::seed_from_u64(0xfeed);
        for _ in 0..2_000 {
            let tuning = Tuning {
                friction_coefficient: rng.random_range(0.2..1.5),
                ..Tuning::default()
            };
            let ground = UniformGround {
                friction: rng.random_range(0.0..1.2),
            };
            let mut body = Body::at(
                DVec3::new(0.0, 0.0, rng.random_range(0.3..0.65)),
                rng.random_range(-PI..PI),
            );
            body.vx = rng.random_range(-40.0..40.0);
            body.vy = rng.random_range(-40.0..40.0);
            body.vz = rng.random_range(-3.0..3.0);
            body.yaw_rate = rng.random_range(-4.0..4.0);
            body.roll = rng.random_range(-0.3..0.3);
            body.pitch = rng.random_range(-0.3..0.3);
            body.steer_angle = rng.random_range(-0.6..0.6);
            let input = Input::new(
                rng.random_range(-1.0..=1.0),
                rng.random_range(-1.0..=1.0),
                rng.random_bool(0.3),
            );

            let (_, report) = step_body_with_report(&body, input, DT, &ground, &tuning);
            for wheel in report.wheels.iter().filter(|w| w.contact) {
                let bound = wheel.load * ground.friction * tuning.friction_coefficient;
                let magnitude = wheel.longitudinal.hypot(wheel.lateral);
                assert!(
                    magnitude <= bound * (1.0 + 1e-9) + 1e-9,
                    "{magnitude} exceeds {bound}"
                );
            }
        }
    }
}
