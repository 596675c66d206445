//! Lossless-ish optimization of documentation images.
//!
//! Every source is re-encoded in its own format and the result is kept only
//! when it is smaller. A manifest of blake3 hashes remembers what was already
//! optimized so repeated in-place runs leave finished files alone.

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;

use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::{JpegDecoder, JpegEncoder};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{
    AnimationDecoder, DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder, ImageFormat,
};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Config, ImagesConfig};
use crate::error::FileSetError;
use crate::fileset::{FileEntry, PatternSet};
use crate::hash::Hash32;
use crate::io::write_if_changed;
use crate::task::{TaskContext, TaskResult};
use crate::tasks::svg::{self, SvgError};

/// Location of the manifest, relative to the project root.
pub const MANIFEST: &str = ".cache/wpbuild/images.json";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("SVG error: {0}")]
    Svg(#[from] SvgError),

    #[error(transparent)]
    FileSet(#[from] FileSetError),

    #[error("Couldn't write the image manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

#[derive(Debug, Default)]
pub struct ImageReport {
    /// Re-encoded to fewer bytes.
    pub optimized: Vec<Utf8PathBuf>,
    /// Copied as they were, because re-encoding didn't help or the format
    /// isn't handled.
    pub copied: Vec<Utf8PathBuf>,
    /// Left alone, already optimized by an earlier run.
    pub skipped: Vec<Utf8PathBuf>,
    pub failed: Vec<(Utf8PathBuf, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Record {
    source: String,
    output: String,
}

type Manifest = BTreeMap<String, Record>;

enum Outcome {
    Optimized,
    Copied,
    Skipped,
}

pub fn images(ctx: &TaskContext) -> TaskResult {
    let report = optimize_images(&ctx.config)?;
    tracing::info!(
        "{} optimized, {} copied, {} unchanged, {} failed",
        report.optimized.len(),
        report.copied.len(),
        report.skipped.len(),
        report.failed.len()
    );
    Ok(())
}

pub fn optimize_images(config: &Config) -> Result<ImageReport, ImageError> {
    let files = PatternSet::new(&config.images.src)?.resolve(&config.root)?;
    let dest = config.path(&config.images.dest);

    let manifest_path = config.path(MANIFEST);
    let manifest = load_manifest(&manifest_path);

    let results: Vec<_> = files
        .par_iter()
        .map(|entry| {
            let output = dest.join(entry.relative());
            let result = process(config, &manifest, entry, &output);
            (entry, output, result)
        })
        .collect();

    let mut report = ImageReport::default();
    let mut updated = Manifest::new();

    for (entry, output, result) in results {
        match result {
            Ok((outcome, record)) => {
                updated.insert(entry.path.to_string(), record);
                match outcome {
                    Outcome::Optimized => report.optimized.push(output),
                    Outcome::Copied => report.copied.push(output),
                    Outcome::Skipped => report.skipped.push(output),
                }
            }
            Err(e) => {
                tracing::error!("{}: {e}", entry.path);
                report.failed.push((entry.path.clone(), e.to_string()));
                if let Err(e) = copy_through(config, entry, &output) {
                    tracing::error!("{}: couldn't copy: {e}", entry.path);
                }
            }
        }
    }

    let json = serde_json::to_vec_pretty(&updated)?;
    write_if_changed(&manifest_path, &json)?;

    Ok(report)
}

fn load_manifest(path: &Utf8Path) -> Manifest {
    fs::read(path)
        .ok()
        .and_then(|data| serde_json::from_slice(&data).ok())
        .unwrap_or_default()
}

fn process(
    config: &Config,
    manifest: &Manifest,
    entry: &FileEntry,
    output: &Utf8Path,
) -> Result<(Outcome, Record), ImageError> {
    let source = fs::read(config.path(&entry.path))?;
    let source_hash = Hash32::hash(&source).to_hex();

    if let Some(record) = manifest.get(entry.path.as_str())
        && (record.source == source_hash || record.output == source_hash)
        && let Ok(existing) = fs::read(output)
        && Hash32::hash(&existing).to_hex() == record.output
    {
        return Ok((Outcome::Skipped, record.clone()));
    }

    let extension = entry.path.extension().unwrap_or_default().to_ascii_lowercase();
    let (outcome, data) = match encode(&source, &extension, &config.images)? {
        Some(optimized) if optimized.len() < source.len() => (Outcome::Optimized, optimized),
        _ => (Outcome::Copied, source),
    };

    write_if_changed(output, &data)?;

    let record = Record {
        source: source_hash,
        output: Hash32::hash(&data).to_hex(),
    };
    Ok((outcome, record))
}

fn copy_through(config: &Config, entry: &FileEntry, output: &Utf8Path) -> std::io::Result<()> {
    let source = fs::read(config.path(&entry.path))?;
    write_if_changed(output, &source)?;
    Ok(())
}

/// Re-encodes `data` in its own format. Returns `None` for formats that are
/// copied as they are.
fn encode(
    data: &[u8],
    extension: &str,
    config: &ImagesConfig,
) -> Result<Option<Vec<u8>>, ImageError> {
    let mut out = Vec::new();

    match extension {
        "jpg" | "jpeg" => {
            // the encoder writes no EXIF, so the orientation goes into the pixels
            let mut decoder = JpegDecoder::new(Cursor::new(data))?;
            let orientation = decoder.orientation()?;
            let mut image = DynamicImage::from_decoder(decoder)?;
            image.apply_orientation(orientation);
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut out, config.jpeg_quality).encode(
                &rgb,
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )?;
        }
        "png" => {
            let image = image::load_from_memory_with_format(data, ImageFormat::Png)?;
            let compression = png_compression(config.png_level);
            PngEncoder::new_with_quality(&mut out, compression, FilterType::Adaptive).write_image(
                image.as_bytes(),
                image.width(),
                image.height(),
                image.color().into(),
            )?;
        }
        "gif" => {
            let frames = GifDecoder::new(Cursor::new(data))?
                .into_frames()
                .collect_frames()?;

            let mut encoder = GifEncoder::new(&mut out);
            if frames.len() > 1 {
                encoder.set_repeat(Repeat::Infinite)?;
            }
            encoder.encode_frames(frames)?;
        }
        "svg" => out = svg::optimize(data, &config.svg)?,
        _ => return Ok(None),
    }

    Ok(Some(out))
}

/// Maps the 0 to 7 effort scale onto the encoder presets.
fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=1 => CompressionType::Fast,
        2..=4 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn project() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, Config::with_defaults(root, "my-plugin"))
    }

    fn put(config: &Config, path: &str, data: &[u8]) {
        let path = config.path(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    /// A flat image followed by junk that decoders ignore after `IEND`.
    fn bloated_png() -> Vec<u8> {
        let image = RgbImage::from_pixel(64, 64, Rgb([200, 30, 30]));
        let mut out = Vec::new();
        PngEncoder::new_with_quality(&mut out, CompressionType::Fast, FilterType::NoFilter)
            .write_image(image.as_raw(), 64, 64, ExtendedColorType::Rgb8)
            .unwrap();
        out.extend(std::iter::repeat_n(0u8, 4096));
        out
    }

    /// Inserts an EXIF segment with `orientation` right after the SOI marker.
    fn with_orientation(jpeg: &[u8], orientation: u8) -> Vec<u8> {
        let mut exif = vec![0xFF, 0xE1, 0x00, 0x22];
        exif.extend(b"Exif\0\0MM\0\x2A\0\0\0\x08");
        exif.extend([0x00, 0x01, 0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
        exif.extend([0x00, orientation, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

        let mut out = jpeg[..2].to_vec();
        out.extend(exif);
        out.extend(&jpeg[2..]);
        out
    }

    #[test]
    fn test_jpeg_orientation_is_applied() {
        let (_dir, config) = project();
        let image = RgbImage::from_pixel(16, 8, Rgb([20, 120, 220]));
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 95)
            .encode(image.as_raw(), 16, 8, ExtendedColorType::Rgb8)
            .unwrap();

        let rotated = with_orientation(&jpeg, 6);
        let out = encode(&rotated, "jpg", &config.images).unwrap().unwrap();

        let decoded = image::load_from_memory_with_format(&out, ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 16));
    }

    #[test]
    fn test_png_compression() {
        assert!(matches!(png_compression(0), CompressionType::Fast));
        assert!(matches!(png_compression(3), CompressionType::Default));
        assert!(matches!(png_compression(5), CompressionType::Best));
    }

    #[test]
    fn test_optimize_in_place() {
        let (_dir, config) = project();
        let svg = "<?xml version=\"1.0\"?>\n<!-- comment -->\n<svg viewBox=\"0 0 1 1\">\n  <g>\n    <rect/>\n  </g>\n</svg>\n";
        put(&config, "docs/assets/img/icon.svg", svg.as_bytes());
        put(&config, "docs/assets/img/notes.txt", b"keep me");

        let report = optimize_images(&config).unwrap();
        assert_eq!(report.optimized.len(), 1);
        assert_eq!(report.copied.len(), 1);
        assert!(report.failed.is_empty());

        let optimized = fs::read_to_string(config.path("docs/assets/img/icon.svg")).unwrap();
        assert_eq!(optimized, r#"<svg viewBox="0 0 1 1"><rect/></svg>"#);
        assert_eq!(
            fs::read(config.path("docs/assets/img/notes.txt")).unwrap(),
            b"keep me"
        );

        // the second run finds both files in the manifest
        let report = optimize_images(&config).unwrap();
        assert_eq!(report.skipped.len(), 2);
        assert!(config.path(MANIFEST).exists());
    }

    #[test]
    fn test_png_is_recompressed_into_dest() {
        let (_dir, mut config) = project();
        config.images.dest = "build/img".into();
        let original = bloated_png();
        put(&config, "docs/assets/img/sub/flat.png", &original);

        let report = optimize_images(&config).unwrap();
        assert_eq!(report.optimized, vec![config.path("build/img/sub/flat.png")]);

        let optimized = fs::read(config.path("build/img/sub/flat.png")).unwrap();
        assert!(optimized.len() < original.len());

        let decoded = image::load_from_memory(&optimized).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(10, 10), &Rgb([200, 30, 30]));
    }

    #[test]
    fn test_broken_image_is_copied_through() {
        let (_dir, mut config) = project();
        config.images.dest = "build/img".into();
        put(&config, "docs/assets/img/broken.jpg", b"not a jpeg");

        let report = optimize_images(&config).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            fs::read(config.path("build/img/broken.jpg")).unwrap(),
            b"not a jpeg"
        );
    }
}
