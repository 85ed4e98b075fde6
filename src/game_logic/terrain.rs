//! Height-mapped tile grid and the query contract the physics step reads.
//!
//! The grid is `size × size` tiles of `tile_size` meters, with one height per
//! tile corner (`(size + 1)²` corners). Tile `(tx, ty)` covers
//! `[tx·s, (tx+1)·s) × [ty·s, (ty+1)·s)`; its north edge is the smaller `y`.
//! Any probe outside the grid gets a sentinel instead of an error, because
//! wheel probes routinely land past the playable edge.

use crate::error::TerrainError;
use crate::game_logic::constants::{
    MAX_GRID_SIZE, MAX_TERRAIN_HEIGHT, MAX_TILE_SIZE, MIN_TILE_SIZE, OUT_OF_BOUNDS_FRICTION,
    OUT_OF_BOUNDS_HEIGHT, TILE_SIZE,
};
use bevy::math::DVec2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Surface types, ordered by how bad they are to drive on
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TileKind {
    Road,
    Wet,
    Dirt,
    #[default]
    Grass,
    Sand,
    Oil,
}

impl TileKind {
    pub const ALL: [TileKind; 6] = [
        TileKind::Road,
        TileKind::Wet,
        TileKind::Dirt,
        TileKind::Grass,
        TileKind::Sand,
        TileKind::Oil,
    ];

    /// Multiplier on the tire friction ceiling
    pub fn friction(self) -> f64 {
        match self {
            TileKind::Road => 1.0,
            TileKind::Wet => 0.7,
            TileKind::Dirt => 0.65,
            TileKind::Grass => 0.55,
            TileKind::Sand => 0.45,
            TileKind::Oil => 0.1,
        }
    }

    pub fn from_index(index: u8) -> Option<TileKind> {
        Self::ALL.get(index as usize).copied()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Tile {
    #[serde(rename = "type")]
    pub kind: TileKind,
    /// Quarter turns clockwise, 0..=3
    pub orientation: u8,
}

impl Tile {
    pub fn new(kind: TileKind, orientation: u8) -> Self {
        Self {
            kind,
            orientation: orientation % 4,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct CornerHeights {
    pub nw: f64,
    pub ne: f64,
    pub se: f64,
    pub sw: f64,
}

impl CornerHeights {
    pub const OUT_OF_BOUNDS: CornerHeights = CornerHeights {
        nw: OUT_OF_BOUNDS_HEIGHT,
        ne: OUT_OF_BOUNDS_HEIGHT,
        se: OUT_OF_BOUNDS_HEIGHT,
        sw: OUT_OF_BOUNDS_HEIGHT,
    };

    /// Bilinear blend at fractional position `(u, v)` inside the tile,
    /// `u` running west to east and `v` north to south.
    pub fn sample(&self, u: f64, v: f64) -> f64 {
        let north = self.nw + (self.ne - self.nw) * u;
        let south = self.sw + (self.se - self.sw) * u;
        north + (south - north) * v
    }
}

/// Everything the physics step is allowed to ask about the ground.
pub trait TerrainQuery {
    fn height_at(&self, x: f64, y: f64) -> f64;
    fn tile_at(&self, x: f64, y: f64) -> Option<Tile>;
    fn corner_heights(&self, tile_x: i64, tile_y: i64) -> CornerHeights;
    fn is_road(&self, x: f64, y: f64) -> bool;
    fn surface_friction(&self, x: f64, y: f64) -> f64;

    /// Height gradient `(∂h/∂x, ∂h/∂y)`. Zero where there is no ground.
    fn slope_at(&self, x: f64, y: f64) -> DVec2 {
        const EPS: f64 = 1e-3;
        if self.tile_at(x, y).is_none() {
            return DVec2::ZERO;
        }
        let dx = self.height_at(x + EPS, y) - self.height_at(x - EPS, y);
        let dy = self.height_at(x, y + EPS) - self.height_at(x, y - EPS);
        DVec2::new(dx, dy) / (2.0 * EPS)
    }
}

/// Full-state terrain transfer: per-cell tiles plus every corner height,
/// both row-major.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TerrainData {
    pub grid_size: usize,
    #[serde(default = "default_tile_size")]
    pub tile_size: f64,
    pub cells: Vec<Tile>,
    pub corner_heights: Vec<f64>,
}

fn default_tile_size() -> f64 {
    TILE_SIZE
}

#[derive(Clone, Debug, PartialEq)]
pub struct TileGrid {
    size: usize,
    tile_size: f64,
    tiles: Vec<Tile>,
    heights: Vec<f64>,
}

impl TileGrid {
    /// A level grid of one surface kind
    pub fn flat(size: usize, tile_size: f64, kind: TileKind, height: f64) -> Self {
        let size = size.max(1);
        Self {
            size,
            tile_size,
            tiles: vec![Tile::new(kind, 0); size * size],
            heights: vec![height; (size + 1) * (size + 1)],
        }
    }

    /// Validate and adopt terrain received from a file or a peer.
    ///
    /// Rejects grids larger than [`MAX_GRID_SIZE`] per edge, tile sizes
    /// outside [`MIN_TILE_SIZE`]..=[`MAX_TILE_SIZE`] and corner heights that
    /// are not finite or exceed [`MAX_TERRAIN_HEIGHT`] in magnitude.
    pub fn from_data(data: TerrainData) -> Result<Self, TerrainError> {
        check_grid_size(data.grid_size)?;
        let cells = data.grid_size * data.grid_size;
        if data.cells.len() != cells {
            return Err(TerrainError::SizeMismatch {
                what: "cells",
                expected: cells,
                actual: data.cells.len(),
            });
        }
        let corners = (data.grid_size + 1) * (data.grid_size + 1);
        if data.corner_heights.len() != corners {
            return Err(TerrainError::SizeMismatch {
                what: "corner heights",
                expected: corners,
                actual: data.corner_heights.len(),
            });
        }
        if !(MIN_TILE_SIZE..=MAX_TILE_SIZE).contains(&data.tile_size) {
            return Err(TerrainError::InvalidTileSize(data.tile_size));
        }
        if let Some((index, &value)) = data
            .corner_heights
            .iter()
            .enumerate()
            .find(|(_, h)| !(h.is_finite() && h.abs() <= MAX_TERRAIN_HEIGHT))
        {
            return Err(TerrainError::InvalidHeight { index, value });
        }
        Ok(Self {
            size: data.grid_size,
            tile_size: data.tile_size,
            tiles: data.cells,
            heights: data.corner_heights,
        })
    }

    pub fn to_data(&self) -> TerrainData {
        TerrainData {
            grid_size: self.size,
            tile_size: self.tile_size,
            cells: self.tiles.clone(),
            corner_heights: self.heights.clone(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// World-space edge length of the whole grid
    pub fn extent(&self) -> f64 {
        self.size as f64 * self.tile_size
    }

    pub fn set_tile(&mut self, tile_x: usize, tile_y: usize, tile: Tile) {
        if tile_x < self.size && tile_y < self.size {
            self.tiles[tile_y * self.size + tile_x] = tile;
        }
    }

    pub fn set_corner_height(&mut self, corner_x: usize, corner_y: usize, height: f64) {
        let stride = self.size + 1;
        if corner_x < stride && corner_y < stride {
            self.heights[corner_y * stride + corner_x] = height;
        }
    }

    /// Fill a rectangle of tiles (inclusive bounds, clipped to the grid)
    pub fn paint(&mut self, from: (usize, usize), to: (usize, usize), tile: Tile) {
        for ty in from.1.min(to.1)..=from.1.max(to.1) {
            for tx in from.0.min(to.0)..=from.0.max(to.0) {
                self.set_tile(tx, ty, tile);
            }
        }
    }

    fn locate(&self, x: f64, y: f64) -> Option<(usize, usize, f64, f64)> {
        let gx = x / self.tile_size;
        let gy = y / self.tile_size;
        if !(gx.is_finite() && gy.is_finite()) || gx < 0.0 || gy < 0.0 {
            return None;
        }
        let tx = gx.floor() as usize;
        let ty = gy.floor() as usize;
        if tx >= self.size || ty >= self.size {
            return None;
        }
        Some((tx, ty, gx - tx as f64, gy - ty as f64))
    }

    fn corner(&self, cx: usize, cy: usize) -> f64 {
        self.heights[cy * (self.size + 1) + cx]
    }

    /// Parse the text map format:
    ///
    /// ```text
    /// <size> <tile_size>
    /// <size rows of size hex bytes: high nibble kind, low nibble orientation>
    /// ---
    /// <size+1 rows of size+1 corner heights>
    /// ```
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn parse(text: &str) -> Result<Self, TerrainError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

        let (header_line, header) = lines.next().ok_or(TerrainError::Parse {
            line: 0,
            reason: "missing header".into(),
        })?;
        let parts: Vec<_> = header.split_whitespace().collect();
        let parse_err = |line: usize, reason: String| TerrainError::Parse { line, reason };
        let size = parts
            .first()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| parse_err(header_line, "bad grid size".into()))?;
        let tile_size = match parts.get(1) {
            Some(s) => s
                .parse::<f64>()
                .map_err(|e| parse_err(header_line, e.to_string()))?,
            None => TILE_SIZE,
        };
        check_grid_size(size)?;

        let mut cells = Vec::with_capacity(size * size);
        let mut corner_heights = Vec::with_capacity((size + 1) * (size + 1));
        let mut in_heights = false;

        for (line_no, line) in lines {
            if line.starts_with("---") {
                in_heights = true;
                continue;
            }
            if in_heights {
                for token in line.split_whitespace() {
                    let h = token
                        .parse::<f64>()
                        .map_err(|e| parse_err(line_no, format!("{token}: {e}")))?;
                    corner_heights.push(h);
                }
            } else {
                for token in line.split_whitespace() {
                    let byte = u8::from_str_radix(token, 16)
                        .map_err(|e| parse_err(line_no, format!("{token}: {e}")))?;
                    let kind = TileKind::from_index(byte >> 4).ok_or_else(|| {
                        parse_err(line_no, format!("unknown tile kind in {token}"))
                    })?;
                    cells.push(Tile::new(kind, byte & 0x0f));
                }
            }
        }

        // A map without a height block is flat at zero
        if corner_heights.is_empty() {
            corner_heights = vec![0.0; (size + 1) * (size + 1)];
        }

        Self::from_data(TerrainData {
            grid_size: size,
            tile_size,
            cells,
            corner_heights,
        })
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, TerrainError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

fn check_grid_size(size: usize) -> Result<(), TerrainError> {
    if (1..=MAX_GRID_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(TerrainError::InvalidGridSize(size))
    }
}

impl TerrainQuery for TileGrid {
    fn height_at(&self, x: f64, y: f64) -> f64 {
        match self.locate(x, y) {
            Some((tx, ty, u, v)) => self.corner_heights(tx as i64, ty as i64).sample(u, v),
            None => OUT_OF_BOUNDS_HEIGHT,
        }
    }

    fn tile_at(&self, x: f64, y: f64) -> Option<Tile> {
        self.locate(x, y)
            .map(|(tx, ty, _, _)| self.tiles[ty * self.size + tx])
    }

    fn corner_heights(&self, tile_x: i64, tile_y: i64) -> CornerHeights {
        if tile_x < 0 || tile_y < 0 || tile_x as usize >= self.size || tile_y as usize >= self.size
        {
            return CornerHeights::OUT_OF_BOUNDS;
        }
        let (tx, ty) = (tile_x as usize, tile_y as usize);
        CornerHeights {
            nw: self.corner(tx, ty),
            ne: self.corner(tx + 1, ty),
            se: self.corner(tx + 1, ty + 1),
            sw: self.corner(tx, ty + 1),
        }
    }

    fn is_road(&self, x: f64, y: f64) -> bool {
        matches!(self.tile_at(x, y), Some(t) if t.kind == TileKind::Road)
    }

    fn surface_friction(&self, x: f64, y: f64) -> f64 {
        self.tile_at(x, y)
            .map_or(OUT_OF_BOUNDS_FRICTION, |t| t.kind.friction())
    }

    fn slope_at(&self, x: f64, y: f64) -> DVec2 {
        let Some((tx, ty, u, v)) = self.locate(x, y) else {
            return DVec2::ZERO;
        };
        let c = self.corner_heights(tx as i64, ty as i64);
        let dhdu = (c.ne - c.nw) * (1.0 - v) + (c.se - c.sw) * v;
        let dhdv = (c.sw - c.nw) * (1.0 - u) + (c.se - c.ne) * u;
        DVec2::new(dhdu, dhdv) / self.tile_size
    }
}
