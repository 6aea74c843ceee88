//! Run Archive - single-file container for a run's data
//!
//! One ZIP file per run, with three disjoint regions:
//!
//! ```text
//! run1.zip
//! ├── meta.json              descriptor + full step list (pretty JSON)
//! ├── raw/frame_000.bin      lossless f32 sample, bincode, field "image"
//! ├── raw/frame_001.bin
//! ├── png/frame_000.png      8-bit grayscale preview, min/max rescaled
//! └── png/frame_001.png
//! ```
//!
//! The `frame_NNN` suffix is the zero-based position of the step in the run.
//!
//! ZIP entries cannot be rewritten in place, so reopening an existing archive
//! rebuilds it: unrelated entries are copied through at open, the data regions
//! are dropped (`Fresh`) or carried over where not rewritten (`Merge`), and the
//! previous `meta.json` survives only if the new run never writes its own.
//!
//! The new container is built in a temporary file next to the target and
//! renamed over it by [`ArchiveWriter::close`], so the previous archive stays
//! loadable until the new one is sealed. Closing is idempotent, and dropping
//! an unclosed writer closes it best-effort.

use image::{codecs::png::PngEncoder, ExtendedColorType, GrayImage, ImageEncoder, ImageFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::model::RunMetadata;
use crate::error::{AcqResult, AcquisitionError};
use crate::hardware::Frame;

/// Fixed top-level name of the metadata document
pub const METADATA_ENTRY: &str = "meta.json";
/// Raw sample region
pub const RAW_PREFIX: &str = "raw/";
/// Preview image region
pub const PREVIEW_PREFIX: &str = "png/";
/// Field name every raw sample is tagged with
pub const RAW_FIELD: &str = "image";

/// Entry name of the raw sample for a step position.
pub fn raw_entry_name(position: usize) -> String {
    format!("{RAW_PREFIX}frame_{position:03}.bin")
}

/// Entry name of the preview for a step position.
pub fn preview_entry_name(position: usize) -> String {
    format!("{PREVIEW_PREFIX}frame_{position:03}.png")
}

fn in_data_region(name: &str) -> bool {
    name.starts_with(RAW_PREFIX) || name.starts_with(PREVIEW_PREFIX)
}

/// Handling of the data regions when the archive file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReopen {
    /// Start with empty raw and preview regions
    #[default]
    Fresh,
    /// Keep previous data entries the new run does not overwrite
    Merge,
}

/// On-disk record of one raw sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Always [`RAW_FIELD`]
    pub field: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major pixel values
    pub data: Vec<f32>,
}

// Serializes identically to `RawSample` without copying the pixels.
#[derive(Serialize)]
struct RawSampleRef<'a> {
    field: &'a str,
    width: u32,
    height: u32,
    data: &'a [f32],
}

/// Rescale a sample linearly from its own min/max to 0..=255.
///
/// Flat frames (and frames with no finite pixel) map to all zeros, as do
/// non-finite pixels.
pub fn preview_pixels(frame: &Frame) -> Vec<u8> {
    match frame.min_max() {
        Some((lo, hi)) if hi > lo => {
            let span = hi - lo;
            frame
                .data
                .iter()
                .map(|&v| {
                    if v.is_finite() {
                        (((v - lo) / span) * 255.0).round().clamp(0.0, 255.0) as u8
                    } else {
                        0
                    }
                })
                .collect()
        }
        _ => vec![0; frame.data.len()],
    }
}

fn check_shape(frame: &Frame, operation: &str) -> AcqResult<()> {
    let expected = (frame.width as usize) * (frame.height as usize);
    if frame.data.len() != expected {
        return Err(AcquisitionError::archive_io(
            operation,
            format!(
                "frame holds {} pixels, expected {} for {}x{}",
                frame.data.len(),
                expected,
                frame.width,
                frame.height
            ),
        ));
    }
    Ok(())
}

/// Encode a sample as an 8-bit grayscale PNG.
pub fn encode_preview(frame: &Frame) -> AcqResult<Vec<u8>> {
    check_shape(frame, "encoding preview")?;
    let pixels = preview_pixels(frame);
    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&pixels, frame.width, frame.height, ExtendedColorType::L8)
        .map_err(|e| AcquisitionError::archive_io("encoding preview", e))?;
    Ok(png)
}

/// Writer for one run's archive.
pub struct ArchiveWriter {
    path: PathBuf,
    zip: Option<ZipWriter<NamedTempFile>>,
    previous: Option<ZipArchive<Cursor<Vec<u8>>>>,
    deferred: Vec<String>,
    written: HashSet<String>,
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter")
            .field("path", &self.path)
            .field("open", &self.zip.is_some())
            .field("entries", &self.written.len())
            .finish()
    }
}

impl ArchiveWriter {
    /// Open the archive at `path`.
    ///
    /// Creates missing parent directories and an empty container when the
    /// file does not exist. An existing container is rebuilt according to
    /// `reopen`; top-level entries outside the data regions are always kept.
    pub fn open(path: impl AsRef<Path>, reopen: ArchiveReopen) -> AcqResult<Self> {
        let path = path.as_ref().to_path_buf();
        let shown = path.display().to_string();

        let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(|e| {
                    AcquisitionError::archive_io(format!("creating {}", parent.display()), e)
                })?;
                parent.to_path_buf()
            }
            None => PathBuf::from("."),
        };

        let mut previous = if path.exists() {
            let bytes = fs::read(&path)
                .map_err(|e| AcquisitionError::archive_io(format!("reading {shown}"), e))?;
            let archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
                AcquisitionError::archive_io(format!("opening existing archive {shown}"), e)
            })?;
            Some(archive)
        } else {
            None
        };

        // Same directory as the target so the final rename stays on one filesystem.
        let staging = NamedTempFile::new_in(&parent).map_err(|e| {
            AcquisitionError::archive_io(format!("staging {shown}"), e)
        })?;
        let mut zip = ZipWriter::new(staging);
        let mut written = HashSet::new();
        let mut deferred = Vec::new();

        if let Some(old) = previous.as_mut() {
            let mut kept = 0usize;
            let mut dropped = 0usize;
            for i in 0..old.len() {
                let entry = old
                    .by_index_raw(i)
                    .map_err(|e| AcquisitionError::archive_io("reading existing entry", e))?;
                let name = entry.name().to_string();

                if name == METADATA_ENTRY {
                    deferred.push(name);
                } else if in_data_region(&name) {
                    match reopen {
                        ArchiveReopen::Fresh => dropped += 1,
                        ArchiveReopen::Merge => deferred.push(name),
                    }
                } else {
                    zip.raw_copy_file(entry).map_err(|e| {
                        AcquisitionError::archive_io(format!("copying {name}"), e)
                    })?;
                    written.insert(name);
                    kept += 1;
                }
            }
            info!(path = %path.display(), ?reopen, kept, dropped, "Reopened existing archive");
        } else {
            info!(path = %path.display(), "Created archive");
        }

        for region in [RAW_PREFIX, PREVIEW_PREFIX] {
            zip.add_directory(region, Self::options())
                .map_err(|e| AcquisitionError::archive_io(format!("creating {region}"), e))?;
            written.insert(region.to_string());
        }

        Ok(Self {
            path,
            zip: Some(zip),
            previous,
            deferred,
            written,
        })
    }

    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
    }

    /// Archive location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.zip.is_none()
    }

    fn put(&mut self, name: String, bytes: &[u8]) -> AcqResult<()> {
        let zip = self.zip.as_mut().ok_or_else(|| {
            AcquisitionError::archive_io(
                format!("writing {name}"),
                std::io::Error::new(std::io::ErrorKind::Other, "archive already closed"),
            )
        })?;
        zip.start_file(name.as_str(), Self::options())
            .map_err(|e| AcquisitionError::archive_io(format!("starting {name}"), e))?;
        zip.write_all(bytes)
            .map_err(|e| AcquisitionError::archive_io(format!("writing {name}"), e))?;
        debug!(entry = %name, bytes = bytes.len(), "Archive entry written");
        self.written.insert(name);
        Ok(())
    }

    /// Store a lossless raw sample for the step at `position`.
    pub fn write_raw(&mut self, position: usize, frame: &Frame) -> AcqResult<()> {
        check_shape(frame, "encoding raw sample")?;
        let record = RawSampleRef {
            field: RAW_FIELD,
            width: frame.width,
            height: frame.height,
            data: &frame.data,
        };
        let bytes = bincode::serialize(&record)
            .map_err(|e| AcquisitionError::archive_io("encoding raw sample", e))?;
        self.put(raw_entry_name(position), &bytes)
    }

    /// Store the grayscale preview for the step at `position`.
    pub fn write_preview(&mut self, position: usize, frame: &Frame) -> AcqResult<()> {
        let png = encode_preview(frame)?;
        self.put(preview_entry_name(position), &png)
    }

    /// Store the metadata document.
    pub fn write_metadata(&mut self, metadata: &RunMetadata) -> AcqResult<()> {
        let json = serde_json::to_vec_pretty(metadata)
            .map_err(|e| AcquisitionError::archive_io("encoding metadata", e))?;
        self.put(METADATA_ENTRY.to_string(), &json)
    }

    /// Seal the archive.
    ///
    /// Carries over deferred entries from the previous container, writes the
    /// central directory and moves the sealed file over the archive path. A
    /// second call is a no-op.
    pub fn close(&mut self) -> AcqResult<()> {
        let Some(mut zip) = self.zip.take() else {
            return Ok(());
        };

        let mut first_error = None;
        if let Some(mut old) = self.previous.take() {
            for name in std::mem::take(&mut self.deferred) {
                if self.written.contains(&name) {
                    continue;
                }
                let copied = match old.index_for_name(&name) {
                    Some(i) => old.by_index_raw(i).and_then(|entry| zip.raw_copy_file(entry)),
                    None => continue,
                };
                match copied {
                    Ok(()) => {
                        self.written.insert(name);
                    }
                    Err(e) => {
                        warn!(entry = %name, error = %e, "Could not carry over archive entry");
                        first_error.get_or_insert_with(|| {
                            AcquisitionError::archive_io(format!("copying {name}"), e)
                        });
                    }
                }
            }
        }

        let sealed = zip
            .finish()
            .map_err(|e| {
                AcquisitionError::archive_io(format!("sealing {}", self.path.display()), e)
            })
            .and_then(|staged| {
                staged.as_file().sync_all().map_err(|e| {
                    AcquisitionError::archive_io(format!("syncing {}", self.path.display()), e)
                })?;
                staged.persist(&self.path).map_err(|e| {
                    AcquisitionError::archive_io(format!("replacing {}", self.path.display()), e)
                })?;
                Ok(())
            });
        info!(path = %self.path.display(), entries = self.written.len(), "Archive closed");

        match (first_error, sealed) {
            (Some(e), _) | (None, Err(e)) => Err(e),
            (None, Ok(())) => Ok(()),
        }
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                warn!(path = %self.path.display(), error = %e, "Failed to close archive on drop");
            }
        }
    }
}

/// Read-side view of a sealed archive.
pub struct ArchiveReader {
    zip: ZipArchive<File>,
}

impl ArchiveReader {
    /// Open a sealed archive.
    pub fn open(path: impl AsRef<Path>) -> AcqResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            AcquisitionError::archive_io(format!("opening {}", path.display()), e)
        })?;
        let zip = ZipArchive::new(file).map_err(|e| {
            AcquisitionError::archive_io(format!("reading {}", path.display()), e)
        })?;
        Ok(Self { zip })
    }

    /// All entry names, sorted.
    pub fn entry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.zip.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    /// Whether the archive holds the named entry.
    pub fn contains(&self, name: &str) -> bool {
        self.zip.index_for_name(name).is_some()
    }

    fn files_in(&self, prefix: &str) -> usize {
        self.zip
            .file_names()
            .filter(|n| n.starts_with(prefix) && !n.ends_with('/'))
            .count()
    }

    /// Number of raw samples.
    pub fn raw_count(&self) -> usize {
        self.files_in(RAW_PREFIX)
    }

    /// Number of previews.
    pub fn preview_count(&self) -> usize {
        self.files_in(PREVIEW_PREFIX)
    }

    fn read_entry(&mut self, name: &str) -> AcqResult<Vec<u8>> {
        let mut entry = self
            .zip
            .by_name(name)
            .map_err(|e| AcquisitionError::archive_io(format!("locating {name}"), e))?;
        let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| AcquisitionError::archive_io(format!("reading {name}"), e))?;
        Ok(bytes)
    }

    /// Load the metadata document.
    pub fn metadata(&mut self) -> AcqResult<RunMetadata> {
        let bytes = self.read_entry(METADATA_ENTRY)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| AcquisitionError::archive_io("decoding metadata", e))
    }

    /// Load the raw sample stored for a step position.
    pub fn raw(&mut self, position: usize) -> AcqResult<Frame> {
        let name = raw_entry_name(position);
        let bytes = self.read_entry(&name)?;
        let sample: RawSample = bincode::deserialize(&bytes)
            .map_err(|e| AcquisitionError::archive_io(format!("decoding {name}"), e))?;
        if sample.field != RAW_FIELD {
            return Err(AcquisitionError::archive_io(
                format!("decoding {name}"),
                format!("unexpected field '{}'", sample.field),
            ));
        }
        Frame::new(sample.width, sample.height, sample.data).map_err(|e| {
            AcquisitionError::archive_io(format!("decoding {name}"), e)
        })
    }

    /// Load the preview stored for a step position.
    pub fn preview(&mut self, position: usize) -> AcqResult<GrayImage> {
        let name = preview_entry_name(position);
        let bytes = self.read_entry(&name)?;
        let image = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
            .map_err(|e| AcquisitionError::archive_io(format!("decoding {name}"), e))?;
        Ok(image.to_luma8())
    }

    /// Load any entry's bytes.
    pub fn entry_bytes(&mut self, name: &str) -> AcqResult<Vec<u8>> {
        self.read_entry(name)
    }
}
