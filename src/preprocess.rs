//! Screenshot preprocessing before OCR.
//!
//! Health-app screenshots use thin light-on-dark or coloured fonts that OCR
//! engines misread. Thresholding them to a binary image first helps a lot:
//!
//! 1. grayscale
//! 2. 2× upscale (bilinear)
//! 3. light Gaussian blur to suppress JPEG noise
//! 4. adaptive mean threshold, inverted (dark glyphs become white)
//!
//! The result is written next to the original as `<stem>_proc.png`, or
//! `<stem>_proc-<tag>.png` when that name is taken. Existing files are never
//! overwritten.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use thiserror::Error;
use uuid::Uuid;

/// Upscale factor applied before thresholding.
pub const SCALE: u32 = 2;
/// Blur strength; roughly a 3×3 kernel.
pub const BLUR_SIGMA: f32 = 0.8;
/// Side of the square neighbourhood used for the local mean (odd).
pub const BLOCK_SIZE: u32 = 11;
/// A pixel must be this much darker than its local mean to count as ink.
pub const OFFSET: i64 = 2;

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to decode image {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write preprocessed image {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to create preprocessed image {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn file_stem(original: &Path) -> String {
    original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

/// Preferred path for the preprocessed copy of `original`.
pub fn processed_path(original: &Path) -> PathBuf {
    original.with_file_name(format!("{}_proc.png", file_stem(original)))
}

/// Create an empty file for the processed copy. Falls back to a tagged
/// name while the preferred one is taken.
fn reserve_output(original: &Path) -> Result<(PathBuf, File), PreprocessError> {
    let mut candidate = processed_path(original);
    loop {
        let opened = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate);
        match opened {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let tag = Uuid::new_v4().simple().to_string();
                candidate = original.with_file_name(format!(
                    "{}_proc-{}.png",
                    file_stem(original),
                    &tag[..8]
                ));
            }
            Err(source) => {
                return Err(PreprocessError::Io {
                    path: candidate,
                    source,
                })
            }
        }
    }
}

/// Threshold the image at `path` and return the path of the written copy.
pub fn preprocess_file(path: &Path) -> Result<PathBuf, PreprocessError> {
    let img = image::open(path).map_err(|source| PreprocessError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let processed = threshold_image(&img);

    let (out_path, file) = reserve_output(path)?;
    let mut writer = BufWriter::new(file);
    let result = processed
        .write_to(&mut writer, ImageFormat::Png)
        .map_err(|source| PreprocessError::Encode {
            path: out_path.clone(),
            source,
        })
        .and_then(|()| {
            writer.flush().map_err(|source| PreprocessError::Io {
                path: out_path.clone(),
                source,
            })
        });
    if let Err(e) = result {
        let _ = std::fs::remove_file(&out_path);
        return Err(e);
    }
    Ok(out_path)
}

/// Run the whole preprocessing chain in memory.
pub fn threshold_image(img: &DynamicImage) -> GrayImage {
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();
    let scaled = imageops::resize(&gray, w * SCALE, h * SCALE, FilterType::Triangle);
    let blurred = imageops::blur(&scaled, BLUR_SIGMA);
    adaptive_threshold(&blurred, BLOCK_SIZE, OFFSET)
}

/// Inverted binary threshold against the mean of a `block`×`block`
/// neighbourhood (clamped at the borders).
pub fn adaptive_threshold(gray: &GrayImage, block: u32, offset: i64) -> GrayImage {
    let (w, h) = gray.dimensions();
    let radius = block / 2;

    // Summed-area table with a zero row and column in front.
    let stride = (w + 1) as usize;
    let mut integral = vec![0u64; stride * (h + 1) as usize];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += u64::from(gray.get_pixel(x, y)[0]);
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            integral[idx] = integral[idx - stride] + row_sum;
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let x0 = x.saturating_sub(radius) as usize;
        let y0 = y.saturating_sub(radius) as usize;
        let x1 = (x + radius + 1).min(w) as usize;
        let y1 = (y + radius + 1).min(h) as usize;
        let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
            - integral[y0 * stride + x1]
            - integral[y1 * stride + x0];
        let count = ((x1 - x0) * (y1 - y0)) as i64;
        let mean = sum as i64 / count;
        let value = i64::from(gray.get_pixel(x, y)[0]);
        if value > mean - offset {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    })
}
