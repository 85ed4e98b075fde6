use bevy::math::{DVec2, DVec3};
use serde::{Deserialize, Serialize};

/// Stable identity of one participant, assigned by the room and never reused.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ParticipantId(pub u32);

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Driver input for one tick
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct Input {
    /// -1.0 (full brake / reverse) ..= 1.0 (full throttle)
    pub accel: f64,
    /// -1.0 (full right) ..= 1.0 (full left)
    pub steer: f64,
    pub handbrake: bool,
}

impl Input {
    pub const NEUTRAL: Input = Input {
        accel: 0.0,
        steer: 0.0,
        handbrake: false,
    };

    pub fn new(accel: f64, steer: f64, handbrake: bool) -> Self {
        Self {
            accel,
            steer,
            handbrake,
        }
        .clamped()
    }

    /// Clamp both axes to [-1, 1]. Non-finite values become 0.
    pub fn clamped(self) -> Self {
        fn axis(v: f64) -> f64 {
            if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 }
        }
        Self {
            accel: axis(self.accel),
            steer: axis(self.steer),
            handbrake: self.handbrake,
        }
    }
}

/// One simulated vehicle.
///
/// `z` is height above the world datum. Yaw is measured counter-clockwise from
/// +x; positive pitch lifts the nose and positive roll lifts the left side.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Body {
    pub id: Option<ParticipantId>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub yaw_rate: f64,
    pub pitch_rate: f64,
    pub roll_rate: f64,
    pub steer_angle: f64,
    pub skidding: bool,
}

impl Body {
    pub fn at(position: DVec3, yaw: f64) -> Self {
        Self {
            x: position.x,
            y: position.y,
            z: position.z,
            yaw,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: ParticipantId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn position(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }

    pub fn planar_position(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }

    pub fn planar_velocity(&self) -> DVec2 {
        DVec2::new(self.vx, self.vy)
    }

    pub fn speed(&self) -> f64 {
        self.planar_velocity().length()
    }

    /// Signed speed along the current heading
    pub fn forward_speed(&self) -> f64 {
        self.planar_velocity()
            .dot(DVec2::new(self.yaw.cos(), self.yaw.sin()))
    }
}

/// Every body in the simulation, in insertion order.
///
/// A tick produces a new `WorldState` from the previous one; nothing outside
/// the owning loop ever sees a partially stepped value.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct WorldState {
    pub bodies: Vec<Body>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn push(&mut self, body: Body) {
        self.bodies.push(body);
    }

    pub fn body(&self, id: ParticipantId) -> Option<&Body> {
        self.bodies.iter().find(|b| b.id == Some(id))
    }

    pub fn body_mut(&mut self, id: ParticipantId) -> Option<&mut Body> {
        self.bodies.iter_mut().find(|b| b.id == Some(id))
    }

    pub fn remove(&mut self, id: ParticipantId) -> Option<Body> {
        let index = self.bodies.iter().position(|b| b.id == Some(id))?;
        Some(self.bodies.remove(index))
    }

    /// FNV-1a over the bit pattern of every field. Equal checksums mean
    /// bit-identical states.
    pub fn checksum(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let mut hash = OFFSET;
        let mut feed = |word: u64| {
            for byte in word.to_le_bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(PRIME);
            }
        };

        for body in &self.bodies {
            feed(body.id.map_or(u64::MAX, |id| id.0 as u64));
            for value in [
                body.x,
                body.y,
                body.z,
                body.vx,
                body.vy,
                body.vz,
                body.yaw,
                body.pitch,
                body.roll,
                body.yaw_rate,
                body.pitch_rate,
                body.roll_rate,
                body.steer_angle,
            ] {
                feed(value.to_bits());
            }
            feed(body.skidding as u64);
        }
        hash
    }
}
