//! Image preparation before upload.
//!
//! Frames are flattened to RGB, shrunk so the short side fits the model's
//! vision budget and re-encoded as JPEG. Anything the decoder cannot read is
//! sent as the original bytes.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageResult, Rgb, RgbImage};
use log::warn;

/// Largest short side sent to the model, in pixels
pub const DEFAULT_MAX_SHORT_SIDE: u32 = 512;

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Encoded images kept in memory across rows
pub const DEFAULT_IMAGE_CACHE_SIZE: usize = 1000;

/// Dimensions after shrinking the short side to at most `max_short_side`
fn target_size(width: u32, height: u32, max_short_side: u32) -> (u32, u32) {
    let short = width.min(height);
    if short <= max_short_side || max_short_side == 0 {
        return (width, height);
    }
    let scale = |side: u32| ((side as u64 * max_short_side as u64) / short as u64).max(1) as u32;
    (scale(width), scale(height))
}

/// Composite any alpha channel onto white
fn flatten_to_rgb(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| ((c as u16 * a as u16 + 255 * (255 - a as u16)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Decode, downsize and re-encode one image as JPEG
pub fn compress_image(bytes: &[u8], max_short_side: u32, quality: u8) -> ImageResult<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let (width, height) = target_size(img.width(), img.height(), max_short_side);
    let img = if (width, height) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(width, height, FilterType::Lanczos3)
    };

    let rgb = flatten_to_rgb(img);
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(rgb).write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))?;
    Ok(out.into_inner())
}

/// [`compress_image`] with a fallback to the untouched bytes
pub fn prepare_image(path: &Path, bytes: Vec<u8>, max_short_side: u32, quality: u8) -> Vec<u8> {
    match compress_image(&bytes, max_short_side, quality) {
        Ok(compressed) => compressed,
        Err(e) => {
            warn!("Image compression failed for {}: {}, sending original", path.display(), e);
            bytes
        }
    }
}

/// Bounded path -> base64 cache; the oldest entry goes first
#[derive(Debug, Default)]
pub struct ImageCache {
    capacity: usize,
    entries: HashMap<PathBuf, String>,
    order: VecDeque<PathBuf>,
}

impl ImageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.entries.get(path).cloned()
    }

    pub fn insert(&mut self, path: PathBuf, encoded: String) {
        if self.capacity == 0 || self.entries.contains_key(&path) {
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(path.clone());
        self.entries.insert(path, encoded);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
