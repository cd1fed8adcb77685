//! Durable storage for captured frame sequences
//!
//! The pipeline never writes files on its own; it hands an ordered frame
//! sequence to a [`FrameStore`] collaborator and reports the outcome to the
//! caller. The bundled [`DirFrameStore`] writes length-prefixed frame records
//! into a directory, staging each capture in a temporary file and renaming it
//! into place so a failed write never publishes a corrupt artifact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::pipeline::types::VideoFrame;

/// Magic bytes opening a capture file
pub const CAPTURE_MAGIC: &[u8; 4] = b"RLC1";

/// Filename extension for published captures
pub const CAPTURE_EXT: &str = "rlcap";

/// Storage failure surfaced to the caller of a save action
///
/// The only error the pipeline reports synchronously; buffer contents are
/// unchanged when one is returned and the core never retries on its own.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Nothing buffered to persist
    #[error("no frames to store")]
    EmptyCapture,

    /// Filesystem error while staging or publishing the capture
    #[error("capture write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage collaborator: persists an ordered, timestamped frame sequence
///
/// Implementations must be atomic from the observer's point of view: either
/// the destination appears fully written or it does not appear at all.
pub trait FrameStore: Send + Sync {
    /// Persist `frames` (oldest first) under `label`, returning the
    /// published destination
    fn store(&self, label: &str, frames: &[VideoFrame]) -> Result<PathBuf, StorageError>;
}

/// Directory-backed frame store
///
/// Record layout after the magic and a `u32` frame count, per frame:
/// `captured_at` micros (`i64`), width, height, pixel length (`u32` each),
/// then the raw pixel bytes. All integers little-endian.
pub struct DirFrameStore {
    root: PathBuf,
}

impl DirFrameStore {
    /// Create a store rooted at `root`; the directory is created on first use
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory captures are published into
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn encode(frames: &[VideoFrame]) -> Vec<u8> {
        let payload: usize = frames.iter().map(|f| 20 + f.size()).sum();
        let mut buf = Vec::with_capacity(8 + payload);
        buf.extend_from_slice(CAPTURE_MAGIC);
        buf.extend_from_slice(&(frames.len() as u32).to_le_bytes());
        for frame in frames {
            buf.extend_from_slice(&frame.captured_at.micros.to_le_bytes());
            buf.extend_from_slice(&frame.width.to_le_bytes());
            buf.extend_from_slice(&frame.height.to_le_bytes());
            buf.extend_from_slice(&(frame.size() as u32).to_le_bytes());
            buf.extend_from_slice(&frame.pixels);
        }
        buf
    }

    fn write_staged(&self, tmp: &Path, data: &[u8]) -> Result<(), StorageError> {
        let mut file = fs::File::create(tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    }
}

impl FrameStore for DirFrameStore {
    fn store(&self, label: &str, frames: &[VideoFrame]) -> Result<PathBuf, StorageError> {
        if frames.is_empty() {
            return Err(StorageError::EmptyCapture);
        }

        if !self.root.exists() {
            info!("DirFrameStore: creating capture dir {:?}", self.root);
            fs::create_dir_all(&self.root)?;
        }

        let dest = self.root.join(format!("{}.{}", label, CAPTURE_EXT));
        if dest.exists() {
            warn!("DirFrameStore: {:?} already exists and will be overwritten", dest);
        }

        // Stage next to the destination, publish with a rename
        let tmp = self.root.join(format!(".{}.tmp", label));
        let data = Self::encode(frames);
        if let Err(e) = self.write_staged(&tmp, &data) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        if let Err(e) = fs::rename(&tmp, &dest) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        info!(
            "DirFrameStore: stored {} frames ({} bytes) to {:?}",
            frames.len(),
            data.len(),
            dest
        );
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Timestamp;

    fn frame(tag: u8, micros: i64) -> VideoFrame {
        VideoFrame::new(vec![tag; 12], 2, 2, Timestamp::from_micros(micros))
    }

    fn decode(data: &[u8]) -> Vec<(i64, u32, u32, Vec<u8>)> {
        assert_eq!(&data[..4], CAPTURE_MAGIC);
        let count = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
        let mut frames = Vec::with_capacity(count);
        let mut at = 8;
        for _ in 0..count {
            let micros = i64::from_le_bytes(data[at..at + 8].try_into().unwrap());
            let width = u32::from_le_bytes(data[at + 8..at + 12].try_into().unwrap());
            let height = u32::from_le_bytes(data[at + 12..at + 16].try_into().unwrap());
            let len = u32::from_le_bytes(data[at + 16..at + 20].try_into().unwrap()) as usize;
            frames.push((micros, width, height, data[at + 20..at + 20 + len].to_vec()));
            at += 20 + len;
        }
        assert_eq!(at, data.len());
        frames
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirFrameStore::new(dir.path().join("captures"));

        let frames = vec![frame(1, 100), frame(2, 200), frame(3, 300)];
        let dest = store.store("session_one", &frames).unwrap();

        let decoded = decode(&fs::read(&dest).unwrap());
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].0, 100);
        assert_eq!(decoded[2].3, vec![3u8; 12]);

        // No staging leftovers
        let names: Vec<_> = fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_empty_capture_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirFrameStore::new(dir.path());
        assert!(matches!(
            store.store("empty", &[]),
            Err(StorageError::EmptyCapture)
        ));
    }

    #[test]
    fn test_failed_write_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();

        // Root path occupied by a plain file: staging under it must fail
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"not a directory").unwrap();

        let store = DirFrameStore::new(&blocked);
        assert!(store.store("cap", &[frame(1, 1)]).is_err());
        assert!(!blocked.join(format!("cap.{}", CAPTURE_EXT)).exists());
    }

    #[test]
    fn test_overwrite_existing_capture() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirFrameStore::new(dir.path());

        store.store("cap", &[frame(1, 1)]).unwrap();
        let dest = store.store("cap", &[frame(2, 2), frame(3, 3)]).unwrap();

        assert_eq!(decode(&fs::read(&dest).unwrap()).len(), 2);
    }
}
