//! Final encoding of an edit for download.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;

use crate::bitmap::Bitmap;
use crate::composite::collage::{CollageStyle, comparison_collage};
use crate::composite::text::apply_watermark;
use crate::entitlement::OperationValue;
use crate::foundation::error::{StudioError, StudioResult};
use crate::remote::NoiseLevel;

pub const DEFAULT_JPEG_QUALITY: u8 = 92;

/// Output encoding. Only JPEG carries a quality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg {
        /// 1..=100
        quality: u8,
    },
}

impl ExportFormat {
    pub fn jpeg(quality: u8) -> StudioResult<Self> {
        let f = Self::Jpeg { quality };
        f.validate()?;
        Ok(f)
    }

    pub fn validate(&self) -> StudioResult<()> {
        match *self {
            Self::Jpeg { quality } if !(1..=100).contains(&quality) => Err(StudioError::validation(
                format!("jpeg quality must be within 1..=100, got {quality}"),
            )),
            _ => Ok(()),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg { .. } => "jpeg",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg { .. } => "image/jpeg",
        }
    }

    pub fn encode(&self, bitmap: &Bitmap) -> StudioResult<Vec<u8>> {
        self.validate()?;
        match *self {
            Self::Png => bitmap.encode_png(),
            Self::Jpeg { quality } => bitmap.encode_jpeg(quality),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub denoise: Option<NoiseLevel>,
    pub upscale: bool,
    pub watermark: bool,
    pub include_comparison: bool,
}

impl ExportOptions {
    /// Plain exports are free; any remote stage or the collage costs a credit.
    pub fn value(&self) -> Option<OperationValue> {
        (self.denoise.is_some() || self.upscale || self.include_comparison)
            .then_some(OperationValue::HighValue)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportedFile {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ExportedFile {
    pub fn write_into(&self, dir: &Path) -> StudioResult<PathBuf> {
        std::fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
        let path = dir.join(&self.filename);
        std::fs::write(&path, &self.bytes)
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

/// `<category>-<timestamp>.<ext>`
pub fn download_filename(category: &str, timestamp_ms: u128, extension: &str) -> String {
    format!("{category}-{timestamp_ms}.{extension}")
}

pub fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Local tail of the export pipeline: watermark, encode, then the optional collage.
///
/// `processed` is the flattened (and possibly denoised/upscaled) edit. The collage compares the
/// un-watermarked result against `original`.
#[tracing::instrument(skip(processed, original, watermark_text), fields(width = processed.width(), height = processed.height()))]
pub fn encode_export(
    processed: &Bitmap,
    original: &Bitmap,
    options: &ExportOptions,
    watermark_text: &str,
    collage: CollageStyle,
    timestamp_ms: u128,
) -> StudioResult<Vec<ExportedFile>> {
    options.format.validate()?;

    let finished = if options.watermark {
        apply_watermark(processed, watermark_text)?
    } else {
        processed.clone()
    };

    let mut files = vec![ExportedFile {
        filename: download_filename("edit", timestamp_ms, options.format.extension()),
        mime: options.format.mime().to_string(),
        bytes: options.format.encode(&finished)?,
    }];

    if options.include_comparison {
        let collage = comparison_collage(original, processed, collage)?;
        files.push(ExportedFile {
            filename: download_filename("comparison", timestamp_ms, "png"),
            mime: "image/png".to_string(),
            bytes: collage.encode_png()?,
        });
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::PixelSize;

    #[test]
    fn jpeg_quality_bounds() {
        assert!(ExportFormat::jpeg(0).is_err());
        assert!(ExportFormat::jpeg(101).is_err());
        assert_eq!(ExportFormat::jpeg(100).unwrap(), ExportFormat::Jpeg { quality: 100 });
        assert!(
            ExportFormat::Jpeg { quality: 0 }
                .encode(&Bitmap::transparent(PixelSize::new(1, 1).unwrap()))
                .is_err()
        );
    }

    #[test]
    fn value_only_for_paid_stages() {
        assert_eq!(ExportOptions::default().value(), None);
        let watermark_only = ExportOptions {
            watermark: true,
            ..ExportOptions::default()
        };
        assert_eq!(watermark_only.value(), None);
        let comparison = ExportOptions {
            include_comparison: true,
            ..ExportOptions::default()
        };
        assert_eq!(comparison.value(), Some(OperationValue::HighValue));
    }

    #[test]
    fn filenames_follow_pattern() {
        assert_eq!(download_filename("edit", 1700, "png"), "edit-1700.png");
    }

    #[test]
    fn export_with_comparison_yields_two_files() {
        let size = PixelSize::new(40, 20).unwrap();
        let before = Bitmap::filled(size, [255, 0, 0, 255]);
        let after = Bitmap::filled(size, [0, 0, 255, 255]);
        let opts = ExportOptions {
            format: ExportFormat::Jpeg { quality: 80 },
            include_comparison: true,
            ..ExportOptions::default()
        };
        let files = encode_export(&after, &before, &opts, "", CollageStyle::default(), 42).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].filename, "edit-42.jpeg");
        assert_eq!(files[0].mime, "image/jpeg");
        assert_eq!(&files[0].bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(files[1].filename, "comparison-42.png");
        let collage = Bitmap::decode(&files[1].bytes).unwrap();
        assert_eq!(collage.size(), PixelSize::new(88, 20).unwrap());
    }
}
