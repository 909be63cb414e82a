//! PNG-backed image store.

use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use imgref::ImgVec;

use super::{LabelMask, Radiograph, Sample, SampleSource};
use crate::error::{Error, Result};

/// Radiographs and annotations stored as grayscale PNGs.
///
/// Layout under the root directory:
///
/// ```text
/// Images/{id}.png       8- or 16-bit grayscale radiograph
/// Annotations/{id}.png  8-bit grayscale class-label mask
/// ```
#[derive(Debug, Clone)]
pub struct PngImageStore {
    root: PathBuf,
}

impl PngImageStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a subject's radiograph.
    #[must_use]
    pub fn image_path(&self, id: &str) -> PathBuf {
        self.root.join("Images").join(format!("{id}.png"))
    }

    /// Path of a subject's annotation mask.
    #[must_use]
    pub fn annotation_path(&self, id: &str) -> PathBuf {
        self.root.join("Annotations").join(format!("{id}.png"))
    }
}

impl SampleSource for PngImageStore {
    fn load(&self, id: &str) -> Result<Sample> {
        let image = read_radiograph(&self.image_path(id))?;
        let mask = read_label_mask(&self.annotation_path(id))?;
        Sample::new(id, image, mask)
    }
}

struct DecodedGray {
    width: usize,
    height: usize,
    bit_depth: png::BitDepth,
    data: Vec<u8>,
}

fn decode_gray(path: &Path) -> Result<DecodedGray> {
    let load_err = |reason: String| Error::ImageLoad {
        path: path.to_path_buf(),
        reason,
    };

    let file = fs::File::open(path).map_err(|e| load_err(e.to_string()))?;
    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder
        .read_info()
        .map_err(|e| load_err(format!("reading PNG header: {e}")))?;

    let buf_size = reader
        .output_buffer_size()
        .ok_or_else(|| load_err("PNG output buffer size unavailable".to_string()))?;
    let mut buf = vec![0u8; buf_size];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| load_err(format!("decoding PNG: {e}")))?;

    if info.color_type != png::ColorType::Grayscale {
        return Err(load_err(format!(
            "expected grayscale PNG, got {:?}",
            info.color_type
        )));
    }
    buf.truncate(info.buffer_size());

    Ok(DecodedGray {
        width: info.width as usize,
        height: info.height as usize,
        bit_depth: info.bit_depth,
        data: buf,
    })
}

/// Read a grayscale radiograph as raw intensities (0-255 or 0-65535).
pub fn read_radiograph(path: &Path) -> Result<Radiograph> {
    let decoded = decode_gray(path)?;
    let (width, height) = (decoded.width, decoded.height);

    let pixels: Vec<f32> = match decoded.bit_depth {
        png::BitDepth::Eight => decoded.data[..width * height]
            .iter()
            .map(|&v| f32::from(v))
            .collect(),
        png::BitDepth::Sixteen => decoded.data[..width * height * 2]
            .chunks_exact(2)
            .map(|c| f32::from(u16::from_be_bytes([c[0], c[1]])))
            .collect(),
        other => {
            return Err(Error::ImageLoad {
                path: path.to_path_buf(),
                reason: format!("unsupported radiograph bit depth {other:?}"),
            });
        }
    };

    Ok(ImgVec::new(pixels, width, height))
}

/// Read an 8-bit class-label mask.
pub fn read_label_mask(path: &Path) -> Result<LabelMask> {
    let decoded = decode_gray(path)?;
    if decoded.bit_depth != png::BitDepth::Eight {
        return Err(Error::ImageLoad {
            path: path.to_path_buf(),
            reason: format!("label masks must be 8-bit, got {:?}", decoded.bit_depth),
        });
    }
    let (width, height) = (decoded.width, decoded.height);
    let mut data = decoded.data;
    data.truncate(width * height);
    Ok(ImgVec::new(data, width, height))
}

/// Write an 8-bit class-label mask, creating parent directories.
pub fn write_label_mask(path: &Path, mask: &LabelMask) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::File::create(path)?;
    let mut encoder = png::Encoder::new(
        BufWriter::new(file),
        mask.width() as u32,
        mask.height() as u32,
    );
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Eight);

    let data: Vec<u8> = mask.pixels().collect();
    let mut writer = encoder.write_header().map_err(std::io::Error::other)?;
    writer
        .write_image_data(&data)
        .map_err(std::io::Error::other)?;
    writer.finish().map_err(std::io::Error::other)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_mask_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Annotations").join("9000001.png");
        let mask = ImgVec::new(vec![0u8, 1, 2, 3, 4, 5], 3, 2);

        write_label_mask(&path, &mask).unwrap();
        let loaded = read_label_mask(&path).unwrap();

        assert_eq!(loaded.width(), 3);
        assert_eq!(loaded.height(), 2);
        assert_eq!(loaded.pixels().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_store_loads_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = PngImageStore::new(dir.path());
        let image = ImgVec::new(vec![10u8, 20, 30, 40], 2, 2);
        let mask = ImgVec::new(vec![0u8, 0, 1, 1], 2, 2);

        // An 8-bit grayscale PNG doubles as a radiograph.
        write_label_mask(&store.image_path("42"), &image).unwrap();
        write_label_mask(&store.annotation_path("42"), &mask).unwrap();

        let sample = store.load("42").unwrap();
        assert_eq!(sample.id, "42");
        assert_eq!(sample.image.pixels().collect::<Vec<_>>(), vec![10.0, 20.0, 30.0, 40.0]);
        assert_eq!(sample.mask.pixels().collect::<Vec<_>>(), vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_missing_file_is_image_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = PngImageStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(Error::ImageLoad { .. })));
    }
}
