//! Shared-memory segment creation, opening and mapping

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::ptr::NonNull;

use memmap2::{MmapMut, MmapOptions};
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::unistd::ftruncate;

use crate::debug_enforce;
use crate::error::{FloeError, Result};
use crate::memory::config::{BackingType, PoolConfig, SegmentConfig};
use crate::memory::headers::{
    LivenessSlot, ManagementHeader, PoolHeader, LAYOUT_VERSION, SEGMENT_MAGIC,
};
use crate::memory::layout::SegmentLayout;
use crate::memory::liveness::ProcessLivenessTable;
use crate::relative::{RelativePointer, SegmentId};

/// A mapped shared-memory segment
///
/// The broker creates the segment and writes the management area; registered
/// processes open it by path and validate the header before use.
#[derive(Debug)]
pub struct SharedMemorySegment {
    /// Segment name
    name: String,
    /// Memory-mapped region
    mmap: MmapMut,
    /// Optional file handle for file-backed segments
    _file: Option<File>,
    /// Owned file descriptor for memfd segments
    _owned_fd: Option<OwnedFd>,
    /// Raw file descriptor
    fd: RawFd,
    /// Backing file path, when one exists
    path: Option<PathBuf>,
    /// Identifier assigned by the creator
    id: SegmentId,
    /// Whether this process created the segment
    creator: bool,
}

unsafe impl Send for SharedMemorySegment {}
unsafe impl Sync for SharedMemorySegment {}

impl SharedMemorySegment {
    /// Create a segment from a configuration and write its management area
    pub fn create(config: &SegmentConfig, id: SegmentId) -> Result<Self> {
        let layout = SegmentLayout::compute(config)?;

        let (file, owned_fd, fd, path) = Self::create_backing(config, layout.total_size)?;
        let mmap = Self::create_mapping(&file, &owned_fd, layout.total_size)?;

        let mut segment = Self {
            name: config.name.clone(),
            mmap,
            _file: file,
            _owned_fd: owned_fd,
            fd,
            path,
            id,
            creator: true,
        };
        segment.write_management_area(config, &layout)?;

        log::info!(
            "created segment '{}' ({} bytes, {} pools)",
            segment.name,
            layout.total_size,
            layout.pools.len()
        );
        Ok(segment)
    }

    /// Open an existing file-backed segment and validate its header
    ///
    /// When `expected_hash` is given, the segment is rejected unless it was
    /// built from a configuration with the same hash.
    pub fn open(path: impl Into<PathBuf>, expected_hash: Option<u64>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| FloeError::from_io(e, "Failed to open segment file"))?;

        let mapped_size = file
            .metadata()
            .map_err(|e| FloeError::from_io(e, "Failed to stat segment file"))?
            .len() as usize;

        let mmap = unsafe {
            MmapOptions::new()
                .len(mapped_size)
                .map_mut(&file)
                .map_err(|e| FloeError::from_io(e, "Failed to map segment file"))?
        };

        let fd = file.as_raw_fd();
        let segment = Self {
            name: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            mmap,
            _file: Some(file),
            _owned_fd: None,
            fd,
            path: Some(path),
            id: SegmentId(0),
            creator: false,
        };

        let header = segment.management();
        header.validate(mapped_size)?;
        if let Some(expected) = expected_hash {
            if header.config_hash != expected {
                return Err(FloeError::invalid_parameter(
                    "config_hash",
                    "Segment was built from a different configuration",
                ));
            }
        }

        let mut segment = segment;
        segment.id = SegmentId(segment.management().segment_id);
        Ok(segment)
    }

    fn create_backing(
        config: &SegmentConfig,
        size: usize,
    ) -> Result<(Option<File>, Option<OwnedFd>, RawFd, Option<PathBuf>)> {
        match config.backing_type {
            BackingType::FileBacked => {
                let path = config.default_file_path();
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(config.permissions)
                    .open(&path)
                    .map_err(|e| FloeError::from_io(e, "Failed to create segment file"))?;
                file.set_len(size as u64)
                    .map_err(|e| FloeError::from_io(e, "Failed to size segment file"))?;
                let fd = file.as_raw_fd();
                Ok((Some(file), None, fd, Some(path)))
            }
            #[cfg(target_os = "linux")]
            BackingType::MemFd => {
                let name_cstr = CString::new(config.name.clone()).map_err(|_| {
                    FloeError::invalid_parameter("name", "Segment name contains null bytes")
                })?;
                let owned_fd = memfd_create(&name_cstr, MemFdCreateFlag::MFD_CLOEXEC)
                    .map_err(|e| FloeError::platform(format!("Failed to create memfd: {}", e)))?;
                ftruncate(&owned_fd, size as i64)
                    .map_err(|e| FloeError::platform(format!("Failed to size memfd: {}", e)))?;
                let raw_fd = owned_fd.as_raw_fd();
                Ok((None, Some(owned_fd), raw_fd, None))
            }
        }
    }

    fn create_mapping(
        file: &Option<File>,
        owned_fd: &Option<OwnedFd>,
        size: usize,
    ) -> Result<MmapMut> {
        match (file, owned_fd) {
            (Some(f), _) => unsafe {
                MmapOptions::new()
                    .len(size)
                    .map_mut(f)
                    .map_err(|e| FloeError::from_io(e, "Failed to map segment"))
            },
            (None, Some(fd)) => unsafe {
                MmapOptions::new()
                    .len(size)
                    .map_mut(fd.as_raw_fd())
                    .map_err(|e| FloeError::from_io(e, "Failed to map memfd segment"))
            },
            (None, None) => Err(FloeError::platform("No backing available for mapping")),
        }
    }

    fn write_management_area(
        &mut self,
        config: &SegmentConfig,
        layout: &SegmentLayout,
    ) -> Result<()> {
        let serialized_pools = bincode::serialize(&config.pools)?;
        debug_enforce!(
            serialized_pools.len() == layout.config_len,
            "serialized configuration length diverged from the layout"
        );

        let header = ManagementHeader {
            magic: SEGMENT_MAGIC,
            version: LAYOUT_VERSION,
            segment_id: self.id.0,
            config_hash: config.config_hash(),
            total_size: layout.total_size as u64,
            pool_count: layout.pools.len() as u32,
            process_capacity: config.max_processes,
            config_offset: layout.config_offset as u64,
            config_len: layout.config_len as u64,
            liveness_offset: layout.liveness_offset as u64,
            pool_headers_offset: layout.pool_headers_offset as u64,
            keep_alive_interval_ns: 0,
            dead_interval_ns: 0,
        };

        unsafe {
            std::ptr::write(self.base_ptr() as *mut ManagementHeader, header);
        }
        self.mmap[layout.config_offset..layout.config_offset + serialized_pools.len()]
            .copy_from_slice(&serialized_pools);
        Ok(())
    }

    /// Record the broker's liveness intervals in the management header
    pub fn set_liveness_intervals(&self, keep_alive_ns: u64, dead_ns: u64) {
        debug_enforce!(self.creator, "only the segment creator sets intervals");
        let header = unsafe { &mut *(self.base_ptr() as *mut ManagementHeader) };
        header.keep_alive_interval_ns = keep_alive_ns;
        header.dead_interval_ns = dead_ns;
    }

    /// Base address of the mapping
    ///
    /// The returned pointer is valid for the lifetime of the segment.
    pub fn base_ptr(&self) -> *mut u8 {
        self.mmap.as_ptr() as *mut u8
    }

    /// Relative pointer to `offset` bytes into this segment
    pub fn relative(&self, offset: u64) -> RelativePointer {
        RelativePointer::new(self.id, offset)
    }

    /// Resolve a relative pointer against this mapping
    ///
    /// Returns `None` for null pointers, pointers into another segment and
    /// offsets beyond the mapping.
    pub fn resolve(&self, pointer: RelativePointer) -> Option<*mut u8> {
        if pointer.is_null() || pointer.segment() != self.id {
            return None;
        }
        if pointer.offset() >= self.mmap.len() as u64 {
            return None;
        }
        Some(unsafe { pointer.resolve(self.base_ptr()) })
    }

    /// The management header at offset 0
    pub fn management(&self) -> &ManagementHeader {
        unsafe { &*(self.base_ptr() as *const ManagementHeader) }
    }

    /// Pointer to the pool metadata header at `index`
    pub fn pool_header_ptr(&self, index: usize) -> NonNull<PoolHeader> {
        let header = self.management();
        debug_enforce!(
            index < header.pool_count as usize,
            "pool index out of range"
        );
        let offset = header.pool_headers_offset as usize
            + index * std::mem::size_of::<PoolHeader>();
        unsafe { NonNull::new_unchecked(self.base_ptr().add(offset) as *mut PoolHeader) }
    }

    /// View over the process-liveness table
    pub fn liveness_table(&self) -> ProcessLivenessTable {
        let header = self.management();
        let ptr = unsafe {
            NonNull::new_unchecked(
                self.base_ptr().add(header.liveness_offset as usize) as *mut LivenessSlot
            )
        };
        unsafe { ProcessLivenessTable::from_raw(ptr, header.process_capacity as usize) }
    }

    /// The pool configuration the segment was created from
    pub fn config_snapshot(&self) -> Result<Vec<PoolConfig>> {
        let header = self.management();
        let start = header.config_offset as usize;
        let end = start + header.config_len as usize;
        if end > self.mmap.len() {
            return Err(FloeError::invalid_parameter(
                "config_len",
                "Configuration snapshot extends beyond the segment",
            ));
        }
        Ok(bincode::deserialize(&self.mmap[start..end])?)
    }

    /// Segment name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Segment identifier
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Mapped size in bytes
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Backing file path, when the segment is file-backed
    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }

    /// Whether this process created the segment
    pub fn is_creator(&self) -> bool {
        self.creator
    }

    /// Raw file descriptor of the backing
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}
