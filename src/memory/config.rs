//! Configuration types for shared-memory segments

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{FloeError, Result};
use crate::limits;

/// Types of shared memory backing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingType {
    /// File-backed shared memory, openable by path from peer processes
    FileBacked,
    /// Anonymous memory file descriptor (Linux-specific)
    #[cfg(target_os = "linux")]
    MemFd,
}

impl Default for BackingType {
    fn default() -> Self {
        Self::FileBacked
    }
}

/// Configuration of a single fixed-size chunk pool
///
/// `block_size` is the usable payload capacity of one chunk; the in-memory
/// block additionally holds the chunk header and alignment padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Usable payload bytes per chunk
    pub block_size: u32,
    /// Number of chunks in the pool
    pub block_count: u32,
    /// Alignment guaranteed for every payload in this pool
    pub block_align: u32,
}

impl PoolConfig {
    /// Create a pool configuration with the default payload alignment
    pub fn new(block_size: u32, block_count: u32) -> Self {
        Self {
            block_size,
            block_count,
            block_align: limits::DEFAULT_PAYLOAD_ALIGNMENT as u32,
        }
    }

    /// Set the payload alignment (must be a power of two)
    pub fn with_align(mut self, block_align: u32) -> Self {
        self.block_align = block_align;
        self
    }

    /// Validate this pool configuration
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(FloeError::invalid_parameter(
                "block_size",
                "Pool block size must be greater than 0",
            ));
        }
        if self.block_count == 0 {
            return Err(FloeError::invalid_parameter(
                "block_count",
                "Pool block count must be greater than 0",
            ));
        }
        if !self.block_align.is_power_of_two() {
            return Err(FloeError::invalid_parameter(
                "block_align",
                "Pool alignment must be a power of two",
            ));
        }
        if self.block_count as usize > limits::MAX_CHUNKS_PER_POOL {
            return Err(FloeError::invalid_parameter(
                "block_count",
                "Pool block count exceeds the addressable chunk range",
            ));
        }
        Ok(())
    }
}

/// Configuration for creating or opening a shared-memory segment
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// Name of the segment
    pub name: String,
    /// Chunk pools, ordered by strictly increasing `block_size`
    pub pools: Vec<PoolConfig>,
    /// Backing type for the shared memory
    pub backing_type: BackingType,
    /// Optional file path for file-backed segments
    pub file_path: Option<PathBuf>,
    /// Maximum number of simultaneously registered processes
    pub max_processes: u32,
    /// Permissions for the backing file (Unix permissions)
    pub permissions: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            pools: Vec::new(),
            backing_type: BackingType::default(),
            file_path: None,
            max_processes: limits::MAX_PROCESSES as u32,
            permissions: 0o600,
        }
    }
}

impl SegmentConfig {
    /// Create a new segment configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a pool to the configuration
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pools.push(pool);
        self
    }

    /// Set the backing type
    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    /// Set the file path for file-backed segments
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Set the maximum number of registered processes
    pub fn with_max_processes(mut self, max_processes: u32) -> Self {
        self.max_processes = max_processes;
        self
    }

    /// Set the permissions for the backing file
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Resolve the backing file path for file-backed segments
    pub fn default_file_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("{}.floe", self.name)))
    }

    /// Hash of everything layout-relevant
    ///
    /// Peers opening the segment compare this against the management header
    /// to reject mappings built from a different configuration.
    pub fn config_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.pools.hash(&mut hasher);
        self.max_processes.hash(&mut hasher);
        hasher.finish()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(FloeError::invalid_parameter(
                "name",
                "Segment name cannot be empty",
            ));
        }
        if self.pools.is_empty() {
            return Err(FloeError::invalid_parameter(
                "pools",
                "Segment needs at least one chunk pool",
            ));
        }
        if self.pools.len() > limits::MAX_POOLS {
            return Err(FloeError::invalid_parameter(
                "pools",
                "Too many chunk pools configured",
            ));
        }
        for pool in &self.pools {
            pool.validate()?;
        }
        for window in self.pools.windows(2) {
            if window[1].block_size <= window[0].block_size {
                return Err(FloeError::invalid_parameter(
                    "pools",
                    "Pool block sizes must be strictly increasing",
                ));
            }
        }
        if self.max_processes == 0 || self.max_processes as usize > limits::MAX_PROCESSES {
            return Err(FloeError::invalid_parameter(
                "max_processes",
                "Process capacity must be in [1, 64]",
            ));
        }
        Ok(())
    }
}
