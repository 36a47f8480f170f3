use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use camino::Utf8Path;
use image::{DynamicImage, ImageFormat};
use tempfile::NamedTempFile;

use crate::error::HarvestError;

/// Re-encodes a staged WebP file as JPEG into a fresh temp file in `staging`.
///
/// Alpha and palette images are flattened to RGB first since JPEG has no
/// alpha channel. The source temp file is left to its owner to drop.
pub fn webp_to_jpeg(source: &Path, staging: &Utf8Path) -> Result<NamedTempFile, HarvestError> {
    let conversion_err = |message: String| HarvestError::Conversion {
        file: source.display().to_string(),
        message,
    };
    let bytes = fs::read(source).map_err(|err| conversion_err(err.to_string()))?;
    let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::WebP)
        .map_err(|err| conversion_err(err.to_string()))?;
    let rgb = DynamicImage::ImageRgb8(decoded.to_rgb8());

    let target = tempfile::Builder::new()
        .prefix(".harvest-")
        .suffix(".jpg")
        .tempfile_in(staging.as_std_path())
        .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    {
        let mut writer = BufWriter::new(target.as_file());
        rgb.write_to(&mut writer, ImageFormat::Jpeg)
            .map_err(|err| conversion_err(err.to_string()))?;
        writer
            .flush()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
    }
    Ok(target)
}
