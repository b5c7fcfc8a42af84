//! Shared Segment Module
//!
//! Lifecycle of the named shared state behind the cache:
//!
//! - `{name}.table`: the region holding the header and slot array
//! - `{name}.lock`: the cross-process lock
//! - `{name}.owner`: locked by the owning process for as long as it lives
//! - `{name}.blk.{generation}`: one object per content block
//!
//! All objects live in one directory, `/dev/shm` by default, so they are
//! memory-backed and visible to every process on the host. The process that
//! calls [`SharedSegment::initialize`] owns the objects and is the only one
//! that tears them down; workers call [`SharedSegment::attach`]. A second
//! `initialize` while the owner is alive fails instead of wiping the live
//! segment.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use memmap2::{Mmap, MmapMut};
use tracing::{debug, info, warn};

use crate::cache::lock::FileLock;
use crate::cache::table::{CacheTable, TABLE_BYTES};
use crate::cache::{BlockId, CacheStats, Content, SIZE_LIMIT_MAX, SIZE_LIMIT_MIN};
use crate::error::{CacheError, Result};

// == Segment Config ==
/// Where the shared objects live and how large the cache may grow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentConfig {
    /// Name prefix of every shared object
    pub name: String,
    /// Directory holding the shared objects
    pub dir: PathBuf,
    /// Size limit in bytes
    pub size_limit: u64,
}

impl SegmentConfig {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, size_limit: u64) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
            size_limit,
        }
    }

    /// `/dev/shm` where it exists, otherwise the system temp directory.
    pub fn default_dir() -> PathBuf {
        let shm = Path::new("/dev/shm");
        if shm.is_dir() {
            shm.to_path_buf()
        } else {
            std::env::temp_dir()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(CacheError::InvalidConfig(format!(
                "segment name '{}' must be non-empty and contain no '/'",
                self.name
            )));
        }
        if !(SIZE_LIMIT_MIN..=SIZE_LIMIT_MAX).contains(&self.size_limit) {
            return Err(CacheError::InvalidConfig(format!(
                "size limit {} outside {}..={}",
                self.size_limit, SIZE_LIMIT_MIN, SIZE_LIMIT_MAX
            )));
        }
        Ok(())
    }
}

// == Segment Paths ==
#[derive(Debug, Clone)]
struct SegmentPaths {
    dir: PathBuf,
    name: String,
}

impl SegmentPaths {
    fn table(&self) -> PathBuf {
        self.dir.join(format!("{}.table", self.name))
    }

    fn lock(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.name))
    }

    fn owner(&self) -> PathBuf {
        self.dir.join(format!("{}.owner", self.name))
    }

    fn block_prefix(&self) -> String {
        format!("{}.blk.", self.name)
    }

    fn block(&self, generation: u64) -> PathBuf {
        self.dir
            .join(format!("{}{:016x}", self.block_prefix(), generation))
    }

    fn block_files(&self) -> io::Result<Vec<PathBuf>> {
        let prefix = self.block_prefix();
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn allocation_failure(what: &str, path: &Path, err: io::Error) -> CacheError {
    CacheError::AllocationFailure(format!("{} {}: {}", what, path.display(), err))
}

// == Attached State ==
#[derive(Debug)]
struct Attached {
    lock: FileLock,
    region: MmapMut,
}

// == Shared Segment ==
/// Owning handle to the shared region, the lock and the content blocks.
///
/// Not `Clone`. A handle returned by `initialize` is consumed by `teardown`;
/// a handle returned by `attach` only detaches when dropped.
#[derive(Debug)]
pub struct SharedSegment {
    paths: SegmentPaths,
    attached: Mutex<Attached>,
    /// Held for the whole life of the handle returned by `initialize`
    owner: Option<FileLock>,
}

impl SharedSegment {
    // == Initialize ==
    /// Creates a fresh segment, clearing any leftovers with the same name.
    ///
    /// Must run before any worker attaches. Fails with `AllocationFailure`
    /// while another handle owns the segment. Failure here is fatal to startup.
    pub fn initialize(config: &SegmentConfig) -> Result<Self> {
        config.validate()?;
        let paths = SegmentPaths {
            dir: config.dir.clone(),
            name: config.name.clone(),
        };

        fs::create_dir_all(&paths.dir)
            .map_err(|e| allocation_failure("cannot create segment directory", &paths.dir, e))?;

        let owner_path = paths.owner();
        let owner = FileLock::open_or_create(&owner_path)
            .map_err(|e| allocation_failure("cannot open owner lock", &owner_path, e))?;
        let claimed = owner
            .try_lock_exclusive()
            .map_err(|e| allocation_failure("cannot acquire owner lock", &owner_path, e))?;
        if !claimed {
            return Err(CacheError::AllocationFailure(format!(
                "segment '{}' in {} is owned by a live process; attach instead",
                paths.name,
                paths.dir.display()
            )));
        }

        let stale = Self::remove_objects(&paths)
            .map_err(|e| allocation_failure("cannot clear stale segment in", &paths.dir, e))?;
        if stale > 0 {
            warn!(
                "Removed {} stale shared objects for segment '{}'",
                stale, paths.name
            );
        }

        let lock_path = paths.lock();
        let lock = FileLock::create(&lock_path)
            .map_err(|e| allocation_failure("cannot create lock", &lock_path, e))?;

        let table_path = paths.table();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&table_path)
            .map_err(|e| allocation_failure("cannot create region", &table_path, e))?;
        file.set_len(TABLE_BYTES as u64)
            .map_err(|e| allocation_failure("cannot size region", &table_path, e))?;
        // SAFETY: the file was just created by this process with create_new and
        // is only ever modified through mappings while the segment lock is held.
        let region = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| allocation_failure("cannot map region", &table_path, e))?;

        let segment = Self {
            paths,
            attached: Mutex::new(Attached { lock, region }),
            owner: Some(owner),
        };

        {
            let mut section = segment.lock()?;
            section.table()?.format(config.size_limit);
        }

        info!(
            "Shared segment '{}' initialized in {} ({} byte region, size limit {} bytes)",
            segment.paths.name,
            segment.paths.dir.display(),
            TABLE_BYTES,
            config.size_limit
        );
        Ok(segment)
    }

    // == Attach ==
    /// Opens a segment created by `initialize` in another process.
    pub fn attach(config: &SegmentConfig) -> Result<Self> {
        let paths = SegmentPaths {
            dir: config.dir.clone(),
            name: config.name.clone(),
        };

        let lock_path = paths.lock();
        let lock = FileLock::open(&lock_path)
            .map_err(|e| allocation_failure("cannot open lock", &lock_path, e))?;

        let table_path = paths.table();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&table_path)
            .map_err(|e| allocation_failure("cannot open region", &table_path, e))?;
        let len = file
            .metadata()
            .map_err(|e| allocation_failure("cannot stat region", &table_path, e))?
            .len();
        if len < TABLE_BYTES as u64 {
            return Err(CacheError::AllocationFailure(format!(
                "region {} is {} bytes, expected {}",
                table_path.display(),
                len,
                TABLE_BYTES
            )));
        }
        // SAFETY: the region is only modified through mappings while the
        // segment lock is held.
        let region = unsafe { MmapMut::map_mut(&file) }
            .map_err(|e| allocation_failure("cannot map region", &table_path, e))?;

        let segment = Self {
            paths,
            attached: Mutex::new(Attached { lock, region }),
            owner: None,
        };

        {
            let mut section = segment.lock()?;
            if !section.table()?.is_formatted() {
                return Err(CacheError::AllocationFailure(format!(
                    "region {} is not an initialized cache table",
                    table_path.display()
                )));
            }
        }

        debug!("Attached to shared segment '{}'", segment.paths.name);
        Ok(segment)
    }

    pub fn name(&self) -> &str {
        &self.paths.name
    }

    pub fn dir(&self) -> &Path {
        &self.paths.dir
    }

    /// True for the handle returned by `initialize`.
    pub fn is_owner(&self) -> bool {
        self.owner.is_some()
    }

    // == Lock ==
    /// Enters the critical section, blocking without timeout.
    pub fn lock(&self) -> Result<CriticalSection<'_>> {
        let attached = self
            .attached
            .lock()
            .map_err(|_| CacheError::AllocationFailure("segment mutex poisoned".to_string()))?;
        attached
            .lock
            .lock_exclusive()
            .map_err(|e| allocation_failure("cannot acquire lock", &self.paths.lock(), e))?;

        Ok(CriticalSection {
            attached,
            paths: &self.paths,
        })
    }

    /// Enters the critical section only if no other handle holds it.
    pub fn try_lock(&self) -> Result<Option<CriticalSection<'_>>> {
        let attached = match self.attached.try_lock() {
            Ok(guard) => guard,
            Err(std::sync::TryLockError::WouldBlock) => return Ok(None),
            Err(std::sync::TryLockError::Poisoned(_)) => {
                return Err(CacheError::AllocationFailure(
                    "segment mutex poisoned".to_string(),
                ))
            }
        };
        let taken = attached
            .lock
            .try_lock_exclusive()
            .map_err(|e| allocation_failure("cannot acquire lock", &self.paths.lock(), e))?;

        Ok(taken.then(|| CriticalSection {
            attached,
            paths: &self.paths,
        }))
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let mut section = self.lock()?;
        let stats = section.table()?.stats();
        Ok(stats)
    }

    /// Number of content block objects present in the segment directory.
    pub fn block_count(&self) -> Result<usize> {
        self.paths
            .block_files()
            .map(|files| files.len())
            .map_err(|e| allocation_failure("cannot list blocks in", &self.paths.dir, e))
    }

    // == Teardown ==
    /// Releases every block and removes the region and lock.
    ///
    /// Returns the number of entries that were still cached. On a handle that
    /// did not initialize the segment this only detaches.
    pub fn teardown(self) -> Result<usize> {
        if !self.is_owner() {
            warn!(
                "Teardown requested on attached handle for '{}'; detaching only",
                self.paths.name
            );
            return Ok(0);
        }

        let released = {
            let mut section = self.lock()?;
            let mut blocks = Vec::new();
            let count = section.table()?.drain(|block| blocks.push(block));
            for block in blocks {
                section.release_content_block(block);
            }
            count
        };

        let Self {
            paths,
            attached,
            owner,
        } = self;
        drop(attached);
        let leftovers = Self::remove_objects(&paths)
            .map_err(|e| allocation_failure("cannot remove segment in", &paths.dir, e))?;
        // Unlinked before the owner lock is released
        remove_if_present(&paths.owner())
            .map_err(|e| allocation_failure("cannot remove owner lock", &paths.owner(), e))?;
        drop(owner);

        info!(
            "Shared segment '{}' torn down ({} cached entries released, {} stray objects removed)",
            paths.name,
            released,
            leftovers.saturating_sub(2)
        );
        Ok(released)
    }

    /// Removes the region, the lock and every block; returns how many existed.
    fn remove_objects(paths: &SegmentPaths) -> io::Result<usize> {
        let mut targets = paths.block_files()?;
        targets.push(paths.table());
        targets.push(paths.lock());

        let mut removed = 0;
        for path in targets {
            if path.exists() {
                remove_if_present(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// == Critical Section ==
/// Exclusive access to the shared table across threads and processes.
///
/// Dropping the value releases the cross-process lock first and then the
/// in-process mutex.
pub struct CriticalSection<'a> {
    attached: MutexGuard<'a, Attached>,
    paths: &'a SegmentPaths,
}

impl<'a> CriticalSection<'a> {
    /// View of the shared table.
    pub fn table(&mut self) -> Result<CacheTable<'_>> {
        // SAFETY: u64 accepts any bit pattern. align_to_mut only yields the
        // aligned middle part; mappings are page aligned so the prefix is empty.
        let (prefix, words, _) = unsafe { self.attached.region.align_to_mut::<u64>() };
        if !prefix.is_empty() {
            return Err(CacheError::AllocationFailure(
                "shared region is not word aligned".to_string(),
            ));
        }
        CacheTable::from_words(words).ok_or_else(|| {
            CacheError::AllocationFailure("shared region smaller than table".to_string())
        })
    }

    // == Acquire Content Block ==
    /// Creates a new shared block of exactly `size` bytes, mapped writable.
    ///
    /// Every call creates a distinct object named by a fresh generation.
    pub fn acquire_content_block(&mut self, size: u64) -> Result<ContentBlock> {
        if size == 0 {
            return Err(CacheError::AllocationFailure(
                "cannot allocate an empty content block".to_string(),
            ));
        }
        let generation = self.table()?.next_generation();
        let path = self.paths.block(generation);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| allocation_failure("cannot create block", &path, e))?;
        if let Err(err) = file.set_len(size) {
            let _ = fs::remove_file(&path);
            return Err(allocation_failure("cannot size block", &path, err));
        }
        // SAFETY: the block was just created and is not yet referenced by any
        // slot, so no other process maps it.
        let map = match unsafe { MmapMut::map_mut(&file) } {
            Ok(map) => map,
            Err(err) => {
                let _ = fs::remove_file(&path);
                return Err(allocation_failure("cannot map block", &path, err));
            }
        };

        Ok(ContentBlock {
            id: BlockId::new(generation),
            path,
            map,
        })
    }

    // == Release Content Block ==
    /// Destroys the block named by `block`.
    ///
    /// Mappings already handed out as [`Content`] stay readable until dropped.
    pub fn release_content_block(&self, block: BlockId) {
        let path = self.paths.block(block.generation());
        match remove_if_present(&path) {
            Ok(()) => debug!("Released content block {:?}", block),
            Err(err) => warn!("Failed to release block {}: {}", path.display(), err),
        }
    }

    /// Maps the block of an occupied slot read-only into this process.
    pub fn open_content(&self, generation: u64) -> Result<Content> {
        let path = self.paths.block(generation);
        let file =
            File::open(&path).map_err(|e| allocation_failure("cannot open block", &path, e))?;
        // SAFETY: blocks are never written after their slot is occupied, and a
        // released block is unlinked rather than truncated, so the mapping
        // keeps its contents.
        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| allocation_failure("cannot map block", &path, e))?;
        Ok(Content::new(generation, map))
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.attached.lock.unlock() {
            warn!("Failed to release segment lock: {}", err);
        }
    }
}

// == Content Block ==
/// A freshly acquired, writable content block not yet owned by any slot.
///
/// Ends either in [`ContentBlock::seal`], which hands its [`BlockId`] to the
/// table, or in [`ContentBlock::discard`].
#[derive(Debug)]
pub struct ContentBlock {
    id: BlockId,
    path: PathBuf,
    map: MmapMut,
}

impl ContentBlock {
    pub fn generation(&self) -> u64 {
        self.id.generation()
    }

    pub fn size(&self) -> usize {
        self.map.len()
    }

    /// Fills the whole block from `reader`.
    pub fn fill_from(&mut self, reader: &mut impl Read) -> io::Result<()> {
        reader.read_exact(&mut self.map)
    }

    /// Finishes writing and returns the owning token plus a read-only view.
    pub fn seal(self) -> Result<(BlockId, Content)> {
        let Self { id, path, map } = self;
        if let Err(err) = map.flush() {
            let _ = fs::remove_file(&path);
            return Err(allocation_failure("cannot flush block", &path, err));
        }
        match map.make_read_only() {
            Ok(map) => {
                let generation = id.generation();
                Ok((id, Content::new(generation, map)))
            }
            Err(err) => {
                let _ = fs::remove_file(&path);
                Err(allocation_failure("cannot seal block", &path, err))
            }
        }
    }

    /// Destroys a block that never made it into a slot.
    pub fn discard(self) {
        let Self { path, map, .. } = self;
        drop(map);
        if let Err(err) = remove_if_present(&path) {
            warn!("Failed to discard block {}: {}", path.display(), err);
        }
    }
}

impl Deref for ContentBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.map
    }
}

impl DerefMut for ContentBlock {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}
