//! Streaming file hashers.
//!
//! # Overview
//!
//! Two digests are computed over file contents:
//!
//! - **Fingerprint**: XXH64 (seed 0), a fast non-cryptographic hash used for
//!   first-pass grouping. Rendered as 16 lowercase hex digits.
//! - **Confirm hash**: BLAKE3, a cryptographic-strength hash paid only by files
//!   whose fingerprints already collided. Rendered as 64 lowercase hex digits.
//!
//! Both read the file in fixed [`CHUNK_SIZE`] chunks, so memory use does not
//! depend on file size.
//!
//! # Example
//!
//! ```no_run
//! use dedup::scanner::{FileHasher, Hasher};
//! use std::path::Path;
//!
//! let hasher = Hasher::new();
//! let fingerprint = hasher.fingerprint(Path::new("some_file.bin")).unwrap();
//! let confirm = hasher.confirm_hash(Path::new("some_file.bin")).unwrap();
//! println!("{fingerprint} {confirm}");
//! ```

use std::fs::File;
use std::hash::Hasher as _;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use twox_hash::XxHash64;

use super::HashError;

/// Read size for streaming hashes (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Content hashing used by the pipeline and the resolver.
///
/// Implementations must be deterministic: the same bytes always produce the
/// same digest. Tests substitute implementations to count invocations or to
/// force fingerprint collisions.
pub trait FileHasher: Send + Sync {
    /// Fast first-pass fingerprint of the file contents.
    fn fingerprint(&self, path: &Path) -> Result<String, HashError>;

    /// Strong hash used to confirm a fingerprint match.
    fn confirm_hash(&self, path: &Path) -> Result<String, HashError>;
}

/// Default hasher: XXH64 fingerprints and BLAKE3 confirmation hashes.
#[derive(Debug, Clone)]
pub struct Hasher {
    buffer_size: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher reading in [`CHUNK_SIZE`] chunks.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer_size: CHUNK_SIZE,
            shutdown_flag: None,
        }
    }

    /// Abort long reads between chunks once the flag is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Feed every chunk of `path` to `update`. Returns the number of bytes read.
    fn stream<F>(&self, path: &Path, mut update: F) -> Result<u64, HashError>
    where
        F: FnMut(&[u8]),
    {
        let mut file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        let mut buffer = vec![0u8; self.buffer_size];
        let mut total = 0u64;

        loop {
            if self.is_shutdown_requested() {
                return Err(HashError::Interrupted(path.to_path_buf()));
            }
            let read = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(HashError::from_io(path, e)),
            };
            update(&buffer[..read]);
            total += read as u64;
        }

        Ok(total)
    }
}

impl FileHasher for Hasher {
    fn fingerprint(&self, path: &Path) -> Result<String, HashError> {
        let mut state = XxHash64::with_seed(0);
        let bytes = self.stream(path, |chunk| state.write(chunk))?;
        log::trace!("Fingerprinted {} ({} bytes)", path.display(), bytes);
        Ok(format!("{:016x}", state.finish()))
    }

    fn confirm_hash(&self, path: &Path) -> Result<String, HashError> {
        let mut state = blake3::Hasher::new();
        let bytes = self.stream(path, |chunk| {
            state.update(chunk);
        })?;
        log::trace!("Confirm-hashed {} ({} bytes)", path.display(), bytes);
        Ok(state.finalize().to_hex().to_string())
    }
}
