//! Annotated frame output.
//!
//! When enabled, every processed frame with at least one detection is saved as
//! `{output}/annotated/{sourceId}_{sessionStart}_{frameIndex}.jpg` with a box
//! per detection: green for valid, red for invalid, yellow for duplicates.
//! Frame indices restart with every run, so the writer's start time keeps
//! runs apart and an existing file is never overwritten.

use chrono::Local;
use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::{encode_jpeg, sanitize_component, write_atomic};
use crate::error::StoreError;
use crate::frame::{BoundingRegion, Frame};

const BOX_THICKNESS: i32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkKind {
    Valid,
    Invalid,
    Duplicate,
}

impl MarkKind {
    fn color(self) -> Rgb<u8> {
        match self {
            MarkKind::Valid => Rgb([0, 255, 0]),
            MarkKind::Invalid => Rgb([255, 0, 0]),
            MarkKind::Duplicate => Rgb([255, 255, 0]),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoxMark {
    pub region: BoundingRegion,
    pub kind: MarkKind,
}

pub struct AnnotatedFrameWriter {
    dir: PathBuf,
    source_id: String,
    file_prefix: String,
    written: u64,
    failures: u64,
}

impl AnnotatedFrameWriter {
    pub fn new(output_dir: &Path, source_id: &str) -> Result<Self, StoreError> {
        let dir = output_dir.join("annotated");
        fs::create_dir_all(&dir)
            .map_err(|e| StoreError::Artifact(format!("{}: {}", dir.display(), e)))?;
        let file_prefix = format!(
            "{}_{}",
            sanitize_component(source_id),
            Local::now().format("%Y%m%d_%H%M%S_%6f")
        );
        Ok(Self {
            dir,
            source_id: source_id.to_string(),
            file_prefix,
            written: 0,
            failures: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Draw `marks` over `frame` and save it. Failures are logged and counted.
    pub fn write(&mut self, frame: &Frame, frame_index: u64, marks: &[BoxMark]) -> Option<PathBuf> {
        if marks.is_empty() {
            return None;
        }
        match self.try_write(frame, frame_index, marks) {
            Ok(path) => {
                self.written += 1;
                Some(path)
            }
            Err(e) => {
                self.failures += 1;
                log::warn!("[{}] annotated frame {} not saved: {}", self.source_id, frame_index, e);
                None
            }
        }
    }

    fn try_write(
        &self,
        frame: &Frame,
        frame_index: u64,
        marks: &[BoxMark],
    ) -> Result<PathBuf, StoreError> {
        let mut image = frame
            .to_rgb_image()
            .map_err(|e| StoreError::Artifact(e.to_string()))?;
        for mark in marks {
            draw_box(&mut image, &mark.region, mark.kind.color());
        }
        let path = self
            .dir
            .join(format!("{}_{}.jpg", self.file_prefix, frame_index));
        if path.exists() {
            return Err(StoreError::Artifact(format!(
                "{} already exists",
                path.display()
            )));
        }
        let encoded = encode_jpeg(&Frame::from_rgb_image(image))?;
        write_atomic(&path, &encoded)
            .map_err(|e| StoreError::Artifact(format!("{}: {}", path.display(), e)))?;
        Ok(path)
    }

    /// Log what was written. Called once at session exit.
    pub fn finish(&self) {
        log::info!(
            "[{}] annotated frames: saved={} failed={} dir={}",
            self.source_id,
            self.written,
            self.failures,
            self.dir.display()
        );
    }
}

fn draw_box(image: &mut RgbImage, region: &BoundingRegion, color: Rgb<u8>) {
    let Some(r) = region.clamp_to(image.width(), image.height()) else {
        return;
    };
    let (x2, y2) = (r.x2 - 1, r.y2 - 1);
    for t in 0..BOX_THICKNESS {
        for x in r.x1..=x2 {
            put(image, x, r.y1 + t, color);
            put(image, x, y2 - t, color);
        }
        for y in r.y1..=y2 {
            put(image, r.x1 + t, y, color);
            put(image, x2 - t, y, color);
        }
    }
}

fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}
