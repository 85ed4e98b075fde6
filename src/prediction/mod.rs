// Client-side prediction and interpolation
//
// Each client keeps its own copy of the world:
// 1. The local vehicle is stepped every client tick with local input
// 2. Every STATE from the room overwrites that copy wholesale
// 3. Remote vehicles are drawn slightly in the past, blended between
//    buffered snapshots so sparse updates still move smoothly

pub mod state_snapshot;
pub mod interpolation;
pub mod client_prediction;

pub use state_snapshot::{Snapshot, SnapshotBuffer};
pub use interpolation::{interpolate_body, interpolate_world, lerp, lerp_angle};
pub use client_prediction::Client;
