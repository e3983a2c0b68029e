//! # Terrain Configuration
//!
//! Tunable parameters of a terrain session. Every subsystem reads its constants
//! from a single `TerrainConfig`, which can be built in code, taken from
//! [`TerrainConfig::default`], or loaded from a JSON document.
//!
//! ## Derived Quantities
//! - `effective_chunk_size()`: samples per chunk edge after applying `cave_scale`
//! - `chunk_step()`: world units between neighbouring chunk origins; one less than
//!   the effective size because neighbours share their boundary sample layer

use std::path::Path;

use cgmath::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating a [`TerrainConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Errors raised while bringing up a terrain session.
#[derive(Error, Debug)]
pub enum TerrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build compute pool: {0}")]
    ComputePool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Parameters shared by every terrain subsystem.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Samples per chunk edge before `cave_scale` is applied.
    pub chunk_size: usize,
    pub cave_scale: f32,
    /// Density threshold separating solid (below) from open (above).
    pub iso_level: f32,
    /// Densities in `(iso_level, iso_level + open_margin)` count as open terrain.
    pub open_margin: f32,
    pub noise_scale: f64,
    pub noise_seed: u32,
    pub amount_chunks_horizontal: usize,
    pub amount_chunks_vertical: usize,
    /// World-space corner of the grid's first chunk when the session starts.
    pub world_origin: [i32; 3],
    /// Thickness of the solid band at the floor and roof of the world.
    pub boundary_thickness: f32,
    pub amount_decorations_per_chunk: usize,
    pub decoration_ray_attempts: usize,
    pub decoration_seed: u64,
    pub flood_fill_iteration_cap: usize,
    pub path_expansion_cap: usize,
    pub path_goal_tolerance: f32,
    pub path_density_penalty: f32,
    pub raycast_chunk_limit: usize,
    /// Background threads serving path requests.
    pub worker_threads: usize,
    /// Threads in the compute pool; `0` uses one per core.
    pub compute_threads: usize,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            chunk_size: 32,
            cave_scale: 1.0,
            iso_level: 0.5,
            open_margin: 0.4,
            noise_scale: 0.06,
            noise_seed: 0,
            amount_chunks_horizontal: 5,
            amount_chunks_vertical: 2,
            world_origin: [0, 0, 0],
            boundary_thickness: 2.0,
            amount_decorations_per_chunk: 1,
            decoration_ray_attempts: 10,
            decoration_seed: 0x5eed,
            flood_fill_iteration_cap: 10_000,
            path_expansion_cap: 100_000,
            path_goal_tolerance: 2.0,
            path_density_penalty: 4.0,
            raycast_chunk_limit: 10,
            worker_threads: 1,
            compute_threads: 0,
        }
    }
}

impl TerrainConfig {
    /// Parses and validates a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: TerrainConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Serializes the config as pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects values no terrain session can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if !self.cave_scale.is_finite() || self.cave_scale <= 0.0 {
            return Err(invalid("cave_scale", "must be finite and positive"));
        }
        if self.effective_chunk_size() < 2 {
            return Err(invalid(
                "chunk_size",
                format!(
                    "effective size {} leaves no cells to mesh",
                    self.effective_chunk_size()
                ),
            ));
        }
        if self.amount_chunks_horizontal == 0 {
            return Err(invalid("amount_chunks_horizontal", "must be at least 1"));
        }
        if self.amount_chunks_vertical == 0 {
            return Err(invalid("amount_chunks_vertical", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.iso_level) {
            return Err(invalid("iso_level", "must lie within [0, 1]"));
        }
        if !self.open_margin.is_finite() || self.open_margin <= 0.0 {
            return Err(invalid("open_margin", "must be finite and positive"));
        }
        if !self.noise_scale.is_finite() || self.noise_scale <= 0.0 {
            return Err(invalid("noise_scale", "must be finite and positive"));
        }
        if !self.boundary_thickness.is_finite() {
            return Err(invalid("boundary_thickness", "must be finite"));
        }
        if !self.path_goal_tolerance.is_finite() || self.path_goal_tolerance <= 0.0 {
            return Err(invalid("path_goal_tolerance", "must be finite and positive"));
        }
        if !self.path_density_penalty.is_finite() || self.path_density_penalty < 0.0 {
            return Err(invalid("path_density_penalty", "must be finite and non-negative"));
        }
        if self.raycast_chunk_limit == 0 {
            return Err(invalid("raycast_chunk_limit", "must be at least 1"));
        }
        if self.worker_threads == 0 {
            return Err(invalid("worker_threads", "path requests need at least 1 worker"));
        }
        Ok(())
    }

    /// Samples per chunk edge after applying `cave_scale`.
    pub fn effective_chunk_size(&self) -> usize {
        (self.chunk_size as f32 * self.cave_scale) as usize
    }

    /// World units between the origins of neighbouring chunks.
    pub fn chunk_step(&self) -> i32 {
        self.effective_chunk_size() as i32 - 1
    }

    /// Noise frequency after compensating for `cave_scale`.
    pub fn noise_frequency(&self) -> f64 {
        self.noise_scale / self.cave_scale as f64
    }

    /// Grid dimensions in chunks, `horizontal × vertical × horizontal`.
    pub fn grid_dimensions(&self) -> Vector3<usize> {
        Vector3::new(
            self.amount_chunks_horizontal,
            self.amount_chunks_vertical,
            self.amount_chunks_horizontal,
        )
    }

    /// Lowest and highest world-space y covered by the chunk grid.
    pub fn vertical_extent(&self) -> (f32, f32) {
        let floor = self.world_origin[1] as f32;
        let roof = floor + (self.amount_chunks_vertical as i32 * self.chunk_step()) as f32;
        (floor, roof)
    }

    pub fn world_origin(&self) -> Point3<i32> {
        Point3::from(self.world_origin)
    }

    /// Whether `density` classifies as open terrain.
    pub fn is_open(&self, density: f32) -> bool {
        density > self.iso_level && density < self.iso_level + self.open_margin
    }
}
