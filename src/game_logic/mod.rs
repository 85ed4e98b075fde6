pub mod constants;
pub mod components;
pub mod vehicle;
pub mod terrain;
pub mod physics;
pub mod timestep;

pub use constants::*;
pub use components::*;
pub use vehicle::*;
pub use terrain::*;
pub use physics::*;
pub use timestep::*;
