use crate::error::ConfigError;
use crate::game_logic::{
    CLIENT_TICK_RATE, GRAVITY, MAX_FRAME_TIME, SERVER_TICK_RATE, TerrainQuery, Tuning,
    VehicleConfig,
};
use bevy::math::DVec3;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Who may replace the shared terrain with MAP_UPDATE
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TerrainAuthority {
    /// Any connected participant
    #[default]
    Anyone,
    /// Only the earliest participant still connected
    FirstParticipant,
}

/// Where joining vehicles are placed: rows of `per_row` cars, `spacing`
/// metres apart, starting at `origin` (the terrain centre when unset).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SpawnConfig {
    pub origin: Option<[f64; 2]>,
    pub spacing: f64,
    pub per_row: usize,
    pub yaw: f64,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            origin: None,
            spacing: 6.0,
            per_row: 4,
            yaw: 0.0,
        }
    }
}

impl SpawnConfig {
    /// Spawn point for the `index`th arrival, resting on the terrain.
    pub fn position<T: TerrainQuery + ?Sized>(
        &self,
        index: usize,
        terrain: &T,
        extent: f64,
        vehicle: &VehicleConfig,
    ) -> DVec3 {
        let [ox, oy] = self.origin.unwrap_or([extent / 2.0, extent / 2.0]);
        let per_row = self.per_row.max(1);
        let column = (index % per_row) as f64 - (per_row - 1) as f64 / 2.0;
        let row = (index / per_row) as f64;
        let x = ox + column * self.spacing;
        let y = oy + row * self.spacing;
        DVec3::new(x, y, terrain.height_at(x, y) + vehicle.rest_height(GRAVITY))
    }
}

/// Runtime settings shared by the room, the clients and the demo.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SimConfig {
    pub server_tick_rate: f64,
    pub client_tick_rate: f64,
    pub max_frame_time: f64,
    /// How far behind "now" remote bodies are rendered, in seconds
    pub interpolation_delay: f64,
    pub snapshot_capacity: usize,
    /// Artificial one-way transport delay, in seconds
    pub latency: f64,
    pub friction_coefficient: f64,
    pub vehicle: VehicleConfig,
    pub terrain_authority: TerrainAuthority,
    pub spawn: SpawnConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            server_tick_rate: SERVER_TICK_RATE,
            client_tick_rate: CLIENT_TICK_RATE,
            max_frame_time: MAX_FRAME_TIME,
            interpolation_delay: 0.1,
            snapshot_capacity: 32,
            latency: 0.0,
            friction_coefficient: 1.0,
            vehicle: VehicleConfig::default(),
            terrain_authority: TerrainAuthority::default(),
            spawn: SpawnConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("server_tick_rate", self.server_tick_rate),
            ("client_tick_rate", self.client_tick_rate),
            ("max_frame_time", self.max_frame_time),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
            }
        }
        let non_negative = [
            ("interpolation_delay", self.interpolation_delay),
            ("latency", self.latency),
            ("friction_coefficient", self.friction_coefficient),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be zero or more, got {value}"
                )));
            }
        }
        if self.snapshot_capacity == 0 {
            return Err(ConfigError::Invalid("snapshot_capacity must be at least 1".into()));
        }
        if !(self.spawn.spacing.is_finite() && self.spawn.spacing >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "spawn.spacing must be zero or more, got {}",
                self.spawn.spacing
            )));
        }
        self.vehicle.validate()
    }

    pub fn tuning(&self) -> Tuning {
        Tuning {
            vehicle: self.vehicle.clone(),
            friction_coefficient: self.friction_coefficient,
        }
    }
}
