//! Deterministic vehicle simulation with an authoritative room and
//! predicting clients connected by message transports.

pub mod config;
pub mod error;
pub mod game_logic;
pub mod net;
pub mod prediction;
pub mod server;

pub use config::{SimConfig, SpawnConfig, TerrainAuthority};
pub use error::{Error, Result};
pub use net::{Message, Transport};
pub use prediction::Client;
pub use server::Room;
