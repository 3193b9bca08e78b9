//! Artifact placement and storage for saved plate crops.
//!
//! Key space: `{valid|invalid}/{canonicalTextOrFallback}/{sourceId}_{timestamp}_{seq}.jpg`
//! under a local root directory. Every key issued by one store is unique; the
//! sequence number breaks ties between artifacts saved within the same
//! microsecond, and writes never overwrite an existing file.

use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::frame::Frame;
use crate::plate::{EMPTY_SENTINEL, INVALID_FALLBACK};

pub const DEFAULT_OUTPUT_DIR: &str = "detected_plates";
const JPEG_QUALITY: u8 = 90;

/// Where one artifact goes. `key` is relative to the store root and is what the
/// datastore records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactPlacement {
    pub key: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    sequence: u64,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StoreError::Artifact(format!("{}: {}", root.display(), e)))?;
        Ok(Self { root, sequence: 0 })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compose a fresh placement key. Does not touch the filesystem.
    pub fn placement(
        &mut self,
        is_valid: bool,
        canonical: &str,
        source_id: &str,
        timestamp: DateTime<Local>,
    ) -> ArtifactPlacement {
        self.sequence += 1;
        let partition = if is_valid { "valid" } else { "invalid" };
        let folder = folder_for(canonical);
        let file_name = format!(
            "{}_{}_{:04}.jpg",
            sanitize_component(source_id),
            timestamp.format("%Y%m%d_%H%M%S_%6f"),
            self.sequence
        );
        let key = format!("{}/{}/{}", partition, folder, file_name);
        let path = self.root.join(partition).join(&folder).join(file_name);
        ArtifactPlacement { key, path }
    }

    /// Encode `crop` as JPEG at `placement`. Refuses to overwrite.
    pub fn write(&self, placement: &ArtifactPlacement, crop: &Frame) -> Result<(), StoreError> {
        if placement.path.exists() {
            return Err(StoreError::Artifact(format!(
                "artifact already exists: {}",
                placement.key
            )));
        }
        if let Some(parent) = placement.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::Artifact(format!("{}: {}", parent.display(), e)))?;
        }
        let encoded = encode_jpeg(crop)?;
        write_atomic(&placement.path, &encoded)
            .map_err(|e| StoreError::Artifact(format!("{}: {}", placement.key, e)))
    }

    /// Remove a previously written artifact by key. Missing files are not an error.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.root.join(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Artifact(format!("{}: {}", path.display(), e))),
        }
    }
}

fn folder_for(canonical: &str) -> String {
    if canonical.is_empty() {
        INVALID_FALLBACK.to_string()
    } else if canonical == EMPTY_SENTINEL {
        EMPTY_SENTINEL.to_string()
    } else {
        sanitize_component(canonical)
    }
}

pub(crate) fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

pub(crate) fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>, StoreError> {
    let rgb = frame
        .to_rgb()
        .map_err(|e| StoreError::Artifact(e.to_string()))?;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(rgb.pixels(), rgb.width, rgb.height, ExtendedColorType::Rgb8)
        .map_err(|e| StoreError::Artifact(e.to_string()))?;
    Ok(out)
}

pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap()
    }

    #[test]
    fn placement_partitions_by_validity_and_text() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArtifactStore::new(dir.path()).unwrap();

        let valid = store.placement(true, "30A12345", "cam-1", at());
        assert!(valid.key.starts_with("valid/30A12345/cam-1_20240517_083000_"));
        assert!(valid.key.ends_with(".jpg"));

        let empty = store.placement(false, EMPTY_SENTINEL, "cam-1", at());
        assert!(empty.key.starts_with("invalid/EMPTY/"));

        let blank = store.placement(false, "", "cam 1/../x", at());
        assert!(blank.key.starts_with("invalid/INVALID/cam_1____x_"));
    }

    #[test]
    fn placement_keys_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArtifactStore::new(dir.path()).unwrap();
        let a = store.placement(true, "30A12345", "cam-1", at());
        let b = store.placement(true, "30A12345", "cam-1", at());
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn write_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArtifactStore::new(dir.path()).unwrap();
        let placement = store.placement(true, "30A12345", "cam-1", at());
        let crop = Frame::filled(64, 24, [200, 200, 200]);

        store.write(&placement, &crop).unwrap();
        assert!(placement.path.exists());
        assert!(store.write(&placement, &crop).is_err());

        store.remove(&placement.key).unwrap();
        assert!(!placement.path.exists());
        store.remove(&placement.key).unwrap();
    }
}
