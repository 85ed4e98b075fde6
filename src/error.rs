use thiserror::Error;

/// Failures on a transport endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport endpoint is not connected")]
    NotConnected,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures building or decoding terrain.
#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("grid size must be between 1 and {max}, got {0}", max = crate::game_logic::MAX_GRID_SIZE)]
    InvalidGridSize(usize),
    #[error("corner height {index} is {value}, outside ±{max}", max = crate::game_logic::MAX_TERRAIN_HEIGHT)]
    InvalidHeight { index: usize, value: f64 },
    #[error("tile size must be between {min} and {max}, got {0}", min = crate::game_logic::MIN_TILE_SIZE, max = crate::game_logic::MAX_TILE_SIZE)]
    InvalidTileSize(f64),
    #[error("{what} has {actual} entries, expected {expected}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("map parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("map file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures loading or validating a [`crate::config::SimConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Terrain(#[from] TerrainError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch_display() {
        let e = TerrainError::SizeMismatch {
            what: "corner heights",
            expected: 25,
            actual: 16,
        };
        let s = e.to_string();
        assert!(s.contains("corner heights"));
        assert!(s.contains("25"));
        assert!(s.contains("16"));
    }

    #[test]
    fn test_wraps_into_crate_error() {
        let e: Error = TransportError::NotConnected.into();
        assert!(matches!(e, Error::Transport(TransportError::NotConnected)));
        assert_eq!(e.to_string(), "transport endpoint is not connected");
    }
}
