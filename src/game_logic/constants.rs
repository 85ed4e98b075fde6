// Simulation timing
pub const SERVER_TICK_RATE: f64 = 30.0; // authoritative rate, Hz
pub const CLIENT_TICK_RATE: f64 = 60.0; // prediction rate, Hz
pub const MAX_FRAME_TIME: f64 = 0.25; // wall time clamp per wake-up, seconds

// World
pub const GRAVITY: f64 = 9.81;
pub const TILE_SIZE: f64 = 4.0; // meters per tile edge

// Terrain sentinels for probes outside the grid
pub const OUT_OF_BOUNDS_HEIGHT: f64 = -1000.0;
pub const OUT_OF_BOUNDS_FRICTION: f64 = 0.05;

// Limits on terrain accepted from files and the wire
pub const MAX_GRID_SIZE: usize = 1024; // tiles per edge
pub const MAX_TERRAIN_HEIGHT: f64 = 500.0; // meters, either side of zero
pub const MIN_TILE_SIZE: f64 = 0.25;
pub const MAX_TILE_SIZE: f64 = 256.0;

// Chassis floor contact
pub const FLOOR_OFFSET: f64 = 0.15; // lowest chassis height above terrain
pub const FLOOR_BOUNCE: f64 = 0.2; // fraction of downward speed reflected

// Tires
pub const HANDBRAKE_LATERAL_GRIP: f64 = 0.15;
pub const HANDBRAKE_MIN_SPEED: f64 = 0.05;
pub const REVERSE_FORCE_FACTOR: f64 = 0.5;
pub const BRAKE_SPEED_THRESHOLD: f64 = 0.5; // forward speed above which negative accel brakes

// Body damping
pub const ANGULAR_DAMPING: f64 = 1.5; // per second
pub const SELF_RIGHTING_GAIN: f64 = 6.0; // restoring angular accel per radian, airborne only
