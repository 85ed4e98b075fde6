use crate::game_logic::{Body, WorldState, wrap_angle};
use crate::prediction::state_snapshot::Snapshot;

pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Interpolate between two angles along the shorter arc.
///
/// The result is not re-wrapped, so `t = 0` returns `from` exactly.
pub fn lerp_angle(from: f64, to: f64, t: f64) -> f64 {
    from + wrap_angle(to - from) * t
}

/// Blend two states of the same body. `t` is clamped to [0, 1]; the
/// skid flag switches over halfway.
pub fn interpolate_body(a: &Body, b: &Body, t: f64) -> Body {
    let t = t.clamp(0.0, 1.0);
    Body {
        id: b.id.or(a.id),
        x: lerp(a.x, b.x, t),
        y: lerp(a.y, b.y, t),
        z: lerp(a.z, b.z, t),
        vx: lerp(a.vx, b.vx, t),
        vy: lerp(a.vy, b.vy, t),
        vz: lerp(a.vz, b.vz, t),
        yaw: lerp_angle(a.yaw, b.yaw, t),
        pitch: lerp_angle(a.pitch, b.pitch, t),
        roll: lerp_angle(a.roll, b.roll, t),
        yaw_rate: lerp(a.yaw_rate, b.yaw_rate, t),
        pitch_rate: lerp(a.pitch_rate, b.pitch_rate, t),
        roll_rate: lerp(a.roll_rate, b.roll_rate, t),
        steer_angle: lerp(a.steer_angle, b.steer_angle, t),
        skidding: if t < 0.5 { a.skidding } else { b.skidding },
    }
}

/// The world at `target`, blended between snapshots `a` and `b`.
///
/// Bodies are paired by id, falling back to slot position for bodies
/// without one. A body present only in `b` (a new arrival) is taken as-is;
/// one present only in `a` has left and is dropped.
pub fn interpolate_world(a: &Snapshot, b: &Snapshot, target: f64) -> WorldState {
    let span = b.time - a.time;
    let t = if span > 0.0 {
        ((target - a.time) / span).clamp(0.0, 1.0)
    } else {
        1.0
    };

    let bodies = b
        .world
        .bodies
        .iter()
        .enumerate()
        .map(|(slot, next)| {
            let previous = match next.id {
                Some(id) => a.world.body(id),
                None => a.world.bodies.get(slot).filter(|body| body.id.is_none()),
            };
            match previous {
                Some(previous) => interpolate_body(previous, next, t),
                None => next.clone(),
            }
        })
        .collect();
    WorldState { bodies }
}
