//! Cache Manager Module
//!
//! Answers `lookup_or_populate` requests: hash the resource, scan the shared
//! table under the segment lock, and on a miss populate from the local file
//! or from the origin named in the query.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::cache::{
    cache_key, CacheEntry, CacheKey, CacheStats, Content, ContentBlock, CriticalSection,
    EvictionPolicy, SharedSegment,
};
use crate::error::{CacheError, Result};
use crate::origin::{origin_from_query, OriginClient};

// == Fetch Mode ==
/// Where population I/O runs relative to the segment lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Read or fetch while holding the lock; every worker waits on slow origins
    #[default]
    Locked,
    /// Check, release, fetch unlocked, then re-check and insert if still absent
    Unlocked,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::Locked => "locked",
            FetchMode::Unlocked => "unlocked",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchMode {
    type Err = CacheError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "locked" => Ok(FetchMode::Locked),
            "unlocked" => Ok(FetchMode::Unlocked),
            other => Err(CacheError::InvalidConfig(format!(
                "unknown fetch mode '{}'",
                other
            ))),
        }
    }
}

// == Resource Request ==
/// One request as handed over by the serving layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Resolved local file path; also the path part of the cache key
    pub local_path: PathBuf,
    /// Path sent to a remote origin
    pub remote_path: String,
    /// Raw query string, possibly empty
    pub query: String,
}

impl ResourceRequest {
    pub fn new(
        local_path: impl Into<PathBuf>,
        remote_path: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            query: query.into(),
        }
    }

    /// A request whose remote path equals its local path.
    pub fn from_path(path: &Path, query: &str) -> Self {
        Self::new(path, path.to_string_lossy(), query)
    }

    /// Key over the raw bytes of the local path and the query.
    pub fn key(&self) -> CacheKey {
        cache_key(self.local_path.as_os_str().as_bytes(), &self.query)
    }
}

// == Source ==
/// Bytes ready to be copied into a content block.
enum Source {
    Local { file: File, len: u64 },
    Buffered(Vec<u8>),
}

impl Source {
    fn len(&self) -> u64 {
        match self {
            Source::Local { len, .. } => *len,
            Source::Buffered(bytes) => bytes.len() as u64,
        }
    }

    fn write_into(self, block: &mut ContentBlock) -> Result<()> {
        match self {
            Source::Local { mut file, .. } => block.fill_from(&mut file)?,
            Source::Buffered(bytes) => block.copy_from_slice(&bytes),
        }
        Ok(())
    }
}

// == Cache Manager ==
/// Per-process front of the shared cache.
///
/// Safe to share between threads; every operation serializes on the segment
/// lock, which also excludes other processes attached to the same segment.
#[derive(Debug)]
pub struct CacheManager {
    segment: SharedSegment,
    policy: EvictionPolicy,
    fetch_mode: FetchMode,
    origin: OriginClient,
}

impl CacheManager {
    // == Constructor ==
    pub fn new(segment: SharedSegment) -> Self {
        Self {
            segment,
            policy: EvictionPolicy::default(),
            fetch_mode: FetchMode::default(),
            origin: OriginClient::new(),
        }
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fetch_mode(mut self, fetch_mode: FetchMode) -> Self {
        self.fetch_mode = fetch_mode;
        self
    }

    pub fn with_origin_client(mut self, origin: OriginClient) -> Self {
        self.origin = origin;
        self
    }

    pub fn segment(&self) -> &SharedSegment {
        &self.segment
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn fetch_mode(&self) -> FetchMode {
        self.fetch_mode
    }

    // == Lookup Or Populate ==
    /// Returns the cached bytes for `(path, query)`, populating on a miss.
    ///
    /// The path is used both for the key and, with a query, as the remote
    /// resource path.
    pub fn lookup_or_populate(&self, path: &Path, query: &str) -> Result<Content> {
        self.lookup_or_populate_request(&ResourceRequest::from_path(path, query))
    }

    pub fn lookup_or_populate_request(&self, request: &ResourceRequest) -> Result<Content> {
        let key = request.key();
        match self.fetch_mode {
            FetchMode::Locked => self.populate_locked(request, key),
            FetchMode::Unlocked => self.populate_unlocked(request, key),
        }
    }

    fn populate_locked(&self, request: &ResourceRequest, key: CacheKey) -> Result<Content> {
        let mut section = self.segment.lock()?;
        if let Some(content) = Self::find_locked(&mut section, key, true)? {
            return Ok(content);
        }

        let limit = section.table()?.size_limit();
        let source = self.resolve_source(request, limit, false)?;
        self.insert_locked(&mut section, key, source)
    }

    fn populate_unlocked(&self, request: &ResourceRequest, key: CacheKey) -> Result<Content> {
        let limit = {
            let mut section = self.segment.lock()?;
            if let Some(content) = Self::find_locked(&mut section, key, true)? {
                return Ok(content);
            }
            section.table()?.size_limit()
        };

        let source = self.resolve_source(request, limit, true)?;

        let mut section = self.segment.lock()?;
        if let Some(content) = Self::find_locked(&mut section, key, false)? {
            debug!(
                "Key {:016x} populated concurrently; discarding {} fetched bytes",
                key,
                source.len()
            );
            return Ok(content);
        }
        self.insert_locked(&mut section, key, source)
    }

    // == Lookup ==
    /// Returns the cached bytes for `(path, query)` without populating.
    pub fn lookup(&self, path: &str, query: &str) -> Result<Option<Content>> {
        let mut section = self.segment.lock()?;
        Self::find_locked(&mut section, cache_key(path, query), true)
    }

    // == Insert ==
    /// Caches `bytes` under `(path, query)` unless the key is already present,
    /// in which case the existing content is returned and `bytes` discarded.
    pub fn insert(&self, path: &str, query: &str, bytes: &[u8]) -> Result<Content> {
        let key = cache_key(path, query);
        let mut section = self.segment.lock()?;
        if let Some(content) = Self::find_locked(&mut section, key, false)? {
            return Ok(content);
        }
        self.insert_locked(&mut section, key, Source::Buffered(bytes.to_vec()))
    }

    pub fn stats(&self) -> Result<CacheStats> {
        self.segment.stats()
    }

    /// Snapshot of the occupied slots in slot order.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut section = self.segment.lock()?;
        let entries = section.table()?.entries();
        Ok(entries)
    }

    /// Tears down the segment if this manager owns it.
    pub fn teardown(self) -> Result<usize> {
        self.segment.teardown()
    }

    fn find_locked(
        section: &mut CriticalSection<'_>,
        key: CacheKey,
        record: bool,
    ) -> Result<Option<Content>> {
        let generation = {
            let mut table = section.table()?;
            match table.find(key) {
                Some(index) => {
                    table.touch(index);
                    if record {
                        table.record_hit();
                    }
                    table.entry(index).map(|entry| entry.generation)
                }
                None => {
                    if record {
                        table.record_miss();
                    }
                    None
                }
            }
        };

        match generation {
            Some(generation) => {
                debug!("Cache hit for key {:016x}", key);
                section.open_content(generation).map(Some)
            }
            None => {
                debug!("Cache miss for key {:016x}", key);
                Ok(None)
            }
        }
    }

    fn resolve_source(
        &self,
        request: &ResourceRequest,
        limit: u64,
        buffered: bool,
    ) -> Result<Source> {
        if !request.query.is_empty() {
            let origin = origin_from_query(&request.query)?;
            let body = self.origin.fetch(&origin, &request.remote_path, limit)?;
            return Ok(Source::Buffered(body));
        }

        let path = &request.local_path;
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(path.display().to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        if !metadata.is_file() {
            return Err(CacheError::NotFound(path.display().to_string()));
        }
        if metadata.len() > limit {
            return Err(CacheError::TooLarge {
                size: metadata.len(),
                limit,
            });
        }

        let file = File::open(path)?;
        if buffered {
            let mut bytes = Vec::with_capacity(metadata.len() as usize);
            file.take(limit).read_to_end(&mut bytes)?;
            Ok(Source::Buffered(bytes))
        } else {
            Ok(Source::Local {
                file,
                len: metadata.len(),
            })
        }
    }

    /// Writes `source` into a fresh block, then makes room and commits it.
    ///
    /// Nothing is evicted until the new content is complete, so a failed
    /// read or block allocation leaves the table as it was.
    fn insert_locked(
        &self,
        section: &mut CriticalSection<'_>,
        key: CacheKey,
        source: Source,
    ) -> Result<Content> {
        let size = source.len();
        let limit = section.table()?.size_limit();
        if size > limit {
            return Err(CacheError::TooLarge { size, limit });
        }

        let mut block = section.acquire_content_block(size)?;
        if let Err(err) = source.write_into(&mut block) {
            block.discard();
            return Err(err);
        }
        let (id, content) = block.seal()?;

        let mut evicted = Vec::new();
        let reserved = section
            .table()
            .and_then(|mut table| table.reserve(size, self.policy, |block| evicted.push(block)));
        let eviction_count = evicted.len();
        for block in evicted {
            section.release_content_block(block);
        }
        if eviction_count > 0 {
            debug!("Evicted {} entries to fit {} bytes", eviction_count, size);
        }
        let index = match reserved {
            Ok(index) => index,
            Err(err) => {
                section.release_content_block(id);
                return Err(err);
            }
        };

        let mut table = match section.table() {
            Ok(table) => table,
            Err(err) => {
                section.release_content_block(id);
                return Err(err);
            }
        };
        if let Err(id) = table.occupy(index, key, size, id) {
            section.release_content_block(id);
            return Err(CacheError::AllocationFailure(format!("reserved slot {} was taken", index)));
        }
        debug_assert_eq!(section.table()?.invariant_violation(), None);

        debug!(
            "Cached key {:016x} in slot {} ({} bytes, generation {})",
            key,
            index,
            size,
            content.generation()
        );
        Ok(content)
    }
}
