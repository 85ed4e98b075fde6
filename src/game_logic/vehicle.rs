use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Which axle(s) receive engine force
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Drivetrain {
    Front,
    #[default]
    Rear,
    All,
}

impl Drivetrain {
    pub fn drives(self, front_wheel: bool) -> bool {
        match self {
            Drivetrain::Front => front_wheel,
            Drivetrain::Rear => !front_wheel,
            Drivetrain::All => true,
        }
    }

    pub fn driven_wheels(self) -> usize {
        match self {
            Drivetrain::All => 4,
            Drivetrain::Front | Drivetrain::Rear => 2,
        }
    }
}

/// Per-class tuning constants. Shared read-only by every body of that class.
///
/// Units are SI: kilograms, meters, newtons, radians, seconds.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct VehicleConfig {
    pub mass: f64,
    pub wheelbase: f64,
    pub track_width: f64,
    pub rest_length: f64,
    /// Spring rate per wheel, N/m
    pub stiffness: f64,
    /// Damper rate per wheel, N·s/m
    pub damping: f64,
    pub wheel_radius: f64,
    /// Total engine force, split across driven wheels
    pub engine_force: f64,
    /// Total brake force, split across all four wheels
    pub brake_force: f64,
    /// Total handbrake force, split across the rear wheels
    pub handbrake_force: f64,
    pub max_steer: f64,
    /// How fast the front wheels turn toward the requested angle, rad/s
    pub steer_rate: f64,
    /// Lateral force per unit of lateral slip velocity, per wheel
    pub lateral_stiffness: f64,
    /// Planar velocity decay per second
    pub linear_drag: f64,
    pub drivetrain: Drivetrain,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        VehicleClass::Sedan.config()
    }
}

impl VehicleConfig {
    pub fn half_wheelbase(&self) -> f64 {
        self.wheelbase * 0.5
    }

    pub fn half_track(&self) -> f64 {
        self.track_width * 0.5
    }

    // Box approximations about each body axis
    pub fn roll_inertia(&self) -> f64 {
        self.mass * self.track_width * self.track_width / 12.0
    }

    pub fn pitch_inertia(&self) -> f64 {
        self.mass * self.wheelbase * self.wheelbase / 12.0
    }

    pub fn yaw_inertia(&self) -> f64 {
        self.mass
            * (self.wheelbase * self.wheelbase + self.track_width * self.track_width)
            / 12.0
    }

    /// Ride height at which the four springs carry the body's weight
    pub fn rest_height(&self, gravity: f64) -> f64 {
        let compression = self.mass * gravity / (4.0 * self.stiffness);
        self.rest_length + self.wheel_radius - compression
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("mass", self.mass),
            ("wheelbase", self.wheelbase),
            ("track_width", self.track_width),
            ("rest_length", self.rest_length),
            ("stiffness", self.stiffness),
            ("wheel_radius", self.wheel_radius),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "vehicle.{name} must be positive, got {value}"
                )));
            }
        }

        let non_negative = [
            ("damping", self.damping),
            ("engine_force", self.engine_force),
            ("brake_force", self.brake_force),
            ("handbrake_force", self.handbrake_force),
            ("max_steer", self.max_steer),
            ("steer_rate", self.steer_rate),
            ("lateral_stiffness", self.lateral_stiffness),
            ("linear_drag", self.linear_drag),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "vehicle.{name} must be non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Tuning presets
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Kart,
    Sedan,
    Truck,
}

impl VehicleClass {
    pub fn config(self) -> VehicleConfig {
        match self {
            VehicleClass::Kart => VehicleConfig {
                mass: 200.0,
                wheelbase: 1.6,
                track_width: 1.2,
                rest_length: 0.15,
                stiffness: 12_000.0,
                damping: 1_000.0,
                wheel_radius: 0.15,
                engine_force: 1_800.0,
                brake_force: 2_500.0,
                handbrake_force: 5_000.0,
                max_steer: 0.5,
                steer_rate: 4.0,
                lateral_stiffness: 1_000.0,
                linear_drag: 0.2,
                drivetrain: Drivetrain::Rear,
            },
            VehicleClass::Sedan => VehicleConfig {
                mass: 1_200.0,
                wheelbase: 2.6,
                track_width: 1.6,
                rest_length: 0.3,
                stiffness: 35_000.0,
                damping: 4_500.0,
                wheel_radius: 0.3,
                engine_force: 8_000.0,
                brake_force: 12_000.0,
                handbrake_force: 30_000.0,
                max_steer: 0.6,
                steer_rate: 3.0,
                lateral_stiffness: 5_000.0,
                linear_drag: 0.15,
                drivetrain: Drivetrain::Rear,
            },
            VehicleClass::Truck => VehicleConfig {
                mass: 3_000.0,
                wheelbase: 3.6,
                track_width: 2.0,
                rest_length: 0.4,
                stiffness: 60_000.0,
                damping: 9_000.0,
                wheel_radius: 0.45,
                engine_force: 16_000.0,
                brake_force: 30_000.0,
                handbrake_force: 60_000.0,
                max_steer: 0.5,
                steer_rate: 2.5,
                lateral_stiffness: 12_000.0,
                linear_drag: 0.12,
                drivetrain: Drivetrain::All,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for class in [VehicleClass::Kart, VehicleClass::Sedan, VehicleClass::Truck] {
            assert!(class.config().validate().is_ok(), "{class:?} preset rejected");
        }
    }

    #[test]
    fn test_rest_height_within_suspension_travel() {
        let config = VehicleConfig::default();
        let h = config.rest_height(9.81);
        assert!(h > config.wheel_radius);
        assert!(h < config.rest_length + config.wheel_radius);
    }

    #[test]
    fn test_drivetrain_gating() {
        assert!(Drivetrain::Rear.drives(false));
        assert!(!Drivetrain::Rear.drives(true));
        assert!(Drivetrain::Front.drives(true));
        assert!(Drivetrain::All.drives(true) && Drivetrain::All.drives(false));
        assert_eq!(Drivetrain::All.driven_wheels(), 4);
    }

    #[test]
    fn test_validate_rejects_zero_mass() {
        let config = VehicleConfig {
            mass: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: VehicleConfig =
            serde_json::from_str(r#"{ "mass": 900.0, "drivetrain": "all" }"#).unwrap();
        assert_eq!(config.mass, 900.0);
        assert_eq!(config.drivetrain, Drivetrain::All);
        assert_eq!(config.wheelbase, VehicleConfig::default().wheelbase);
    }
}
