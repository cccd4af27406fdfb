//! Image enhancement ahead of OCR.
//!
//! No single enhancement suits every receipt photo, so each strategy writes
//! its own variant to a scratch file and gets its own recognition pass.

use std::io;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat};
use imageproc::contrast::{stretch_contrast, threshold, ThresholdType};
use imageproc::filter::median_filter;
use imageproc::map::map_subpixels_mut;
use imageproc::stats::histogram;
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::OcrError;
use crate::models::config::PreprocessConfig;

use super::{OcrConfig, PageSegMode};

/// A temporary image file produced for OCR.
///
/// The file is removed when the value is dropped.
#[derive(Debug)]
pub struct RasterImage {
    path: TempPath,
}

impl RasterImage {
    /// Reserve a uniquely named file in `dir`.
    ///
    /// The random part of the name keeps concurrent runs on the same source
    /// file apart.
    pub fn reserve(dir: &Path, prefix: &str, suffix: &str) -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)?;

        Ok(Self {
            path: file.into_temp_path(),
        })
    }

    /// Path of the image file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now, reporting any error.
    pub fn delete(self) -> io::Result<()> {
        self.path.close()
    }
}

/// An enhancement applied to a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhancementStrategy {
    /// Upscale, grayscale, contrast boost, denoise, sharpen.
    ContrastBoost,
    /// Larger upscale, grayscale, binary threshold, denoise.
    Threshold,
}

impl EnhancementStrategy {
    /// Every strategy, in the order variants are produced.
    pub const ALL: [EnhancementStrategy; 2] = [Self::ContrastBoost, Self::Threshold];

    pub fn name(self) -> &'static str {
        match self {
            Self::ContrastBoost => "contrast_boost",
            Self::Threshold => "threshold",
        }
    }

    /// Recognition settings paired with this strategy.
    pub fn ocr_config(self, whitelist: Option<&str>) -> OcrConfig {
        let mode = match self {
            Self::ContrastBoost => PageSegMode::SingleBlock,
            Self::Threshold => PageSegMode::Auto,
        };

        OcrConfig::new(self.name(), mode).with_whitelist(whitelist)
    }
}

/// Produces enhanced raster variants of receipt images.
pub struct ImagePreprocessor {
    config: PreprocessConfig,
    strategies: Vec<EnhancementStrategy>,
}

impl ImagePreprocessor {
    /// Create a preprocessor with default settings and every strategy.
    pub fn new() -> Self {
        Self::from_config(PreprocessConfig::default())
    }

    pub fn from_config(config: PreprocessConfig) -> Self {
        Self {
            config,
            strategies: EnhancementStrategy::ALL.to_vec(),
        }
    }

    /// Restrict the strategies that are run.
    pub fn with_strategies(mut self, strategies: Vec<EnhancementStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn strategies(&self) -> &[EnhancementStrategy] {
        &self.strategies
    }

    /// Write one variant per strategy into `scratch_dir`.
    ///
    /// A failing strategy is logged and skipped; the source image is never
    /// substituted for it. An empty result means no variant could be made.
    pub fn prepare_variants(
        &self,
        source: &Path,
        scratch_dir: &Path,
    ) -> Vec<(EnhancementStrategy, RasterImage)> {
        let source_image = match image::open(source) {
            Ok(image) => image,
            Err(e) => {
                warn!("Cannot read {} for preprocessing: {}", source.display(), e);
                return Vec::new();
            }
        };

        let basename = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());

        self.strategies
            .iter()
            .enumerate()
            .filter_map(|(index, &strategy)| {
                let prefix = format!("processed{}_{}_", index + 1, basename);
                match self.write_variant(&source_image, strategy, scratch_dir, &prefix) {
                    Ok(raster) => {
                        debug!("Wrote {} variant to {}", strategy.name(), raster.path().display());
                        Some((strategy, raster))
                    }
                    Err(e) => {
                        warn!("Skipping {} variant of {}: {}", strategy.name(), source.display(), e);
                        None
                    }
                }
            })
            .collect()
    }

    fn write_variant(
        &self,
        image: &DynamicImage,
        strategy: EnhancementStrategy,
        scratch_dir: &Path,
        prefix: &str,
    ) -> Result<RasterImage, OcrError> {
        let enhanced = self.enhance(image, strategy)?;

        let raster = RasterImage::reserve(scratch_dir, prefix, ".png")
            .map_err(|e| OcrError::Preprocessing(format!("cannot create scratch file: {}", e)))?;

        enhanced
            .save_with_format(raster.path(), ImageFormat::Png)
            .map_err(|e| OcrError::Preprocessing(format!("cannot write variant: {}", e)))?;

        Ok(raster)
    }

    /// Apply one strategy to an image in memory.
    pub fn enhance(
        &self,
        image: &DynamicImage,
        strategy: EnhancementStrategy,
    ) -> Result<GrayImage, OcrError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(OcrError::InvalidImage("image has no pixels".to_string()));
        }

        let config = &self.config;
        let enhanced = match strategy {
            EnhancementStrategy::ContrastBoost => {
                let gray = self.resize_to_width(&image.to_luma8(), config.contrast_target_width);
                let stretched = normalize(&gray);
                let boosted = linear(&stretched, config.contrast_gain, config.contrast_bias);
                let denoised = median_filter(
                    &boosted,
                    config.contrast_median_radius,
                    config.contrast_median_radius,
                );
                imageops::unsharpen(&denoised, config.sharpen_sigma, config.sharpen_threshold)
            }
            EnhancementStrategy::Threshold => {
                let gray = self.resize_to_width(&image.to_luma8(), config.threshold_target_width);
                let binary = binarize(&gray, config.threshold_level);
                median_filter(
                    &binary,
                    config.threshold_median_radius,
                    config.threshold_median_radius,
                )
            }
        };

        Ok(enhanced)
    }

    fn resize_to_width(&self, image: &GrayImage, target_width: u32) -> GrayImage {
        let (width, height) = image.dimensions();
        let (new_width, new_height) =
            fit_dimensions(width, height, target_width, self.config.max_pixels);

        if (new_width, new_height) == (width, height)
            || (new_width > width && !self.config.allow_upscale)
        {
            return image.clone();
        }

        imageops::resize(image, new_width, new_height, FilterType::Lanczos3)
    }

    /// Directory for variants of `source`, honouring the configured override.
    pub fn scratch_dir_for(&self, source: &Path) -> PathBuf {
        match &self.config.scratch_dir {
            Some(dir) => dir.clone(),
            None => source
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

fn scaled_dimensions(width: u32, height: u32, target_width: u32) -> (u32, u32) {
    let scale = target_width as f32 / width as f32;
    let new_height = (height as f32 * scale).round() as u32;
    (target_width.max(1), new_height.max(1))
}

/// Scale to `target_width`, shrinking further so the result holds at most
/// `max_pixels` pixels. Aspect ratio is kept.
fn fit_dimensions(width: u32, height: u32, target_width: u32, max_pixels: u64) -> (u32, u32) {
    let (new_width, new_height) = scaled_dimensions(width, height, target_width);
    let pixels = new_width as u64 * new_height as u64;
    if max_pixels == 0 || pixels <= max_pixels {
        return (new_width, new_height);
    }

    let shrink = (max_pixels as f64 / pixels as f64).sqrt();
    let capped_width = ((new_width as f64 * shrink).floor() as u32).max(1);
    let capped_height = ((new_height as f64 * shrink).floor() as u32).max(1);
    debug!(
        "Capping {}x{} resize at {}x{} ({} pixel limit)",
        new_width, new_height, capped_width, capped_height, max_pixels
    );
    (capped_width, capped_height)
}

/// Stretch the intensity range to the full 0-255 scale.
fn normalize(image: &GrayImage) -> GrayImage {
    let counts = &histogram(image).channels[0];
    let min = counts.iter().position(|&c| c > 0);
    let max = counts.iter().rposition(|&c| c > 0);

    match (min, max) {
        (Some(min), Some(max)) if min < max => {
            stretch_contrast(image, min as u8, max as u8, u8::MIN, u8::MAX)
        }
        _ => image.clone(),
    }
}

/// `value * gain + bias`, clamped to 0-255.
fn linear(image: &GrayImage, gain: f32, bias: f32) -> GrayImage {
    let mut output = image.clone();
    map_subpixels_mut(&mut output, |v| {
        (v as f32 * gain + bias).round().clamp(0.0, 255.0) as u8
    });
    output
}

/// White at or above `level`, black below.
fn binarize(image: &GrayImage, level: u8) -> GrayImage {
    match level.checked_sub(1) {
        Some(below) => threshold(image, below, ThresholdType::Binary),
        None => GrayImage::from_pixel(image.width(), image.height(), image::Luma([u8::MAX])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbImage};
    use pretty_assertions::assert_eq;
    use std::fs;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let image = RgbImage::from_fn(width, height, |x, _| {
            let v = (60 + x * 100 / width.max(1)) as u8;
            image::Rgb([v, v, v])
        });
        DynamicImage::ImageRgb8(image)
    }

    fn small_config() -> PreprocessConfig {
        PreprocessConfig {
            contrast_target_width: 40,
            threshold_target_width: 60,
            ..PreprocessConfig::default()
        }
    }

    #[test]
    fn test_scaled_dimensions_keep_aspect() {
        assert_eq!(scaled_dimensions(1000, 1500, 2000), (2000, 3000));
        assert_eq!(scaled_dimensions(4000, 1000, 2000), (2000, 500));
    }

    #[test]
    fn test_normalize_stretches_range() {
        let image = GrayImage::from_fn(3, 1, |x, _| Luma([100 + x as u8 * 10]));
        let stretched = normalize(&image);
        assert_eq!(stretched.get_pixel(0, 0)[0], 0);
        assert_eq!(stretched.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn test_binarize_level_is_white() {
        let image = GrayImage::from_fn(3, 1, |x, _| Luma([127 + x as u8]));
        let binary = binarize(&image, 128);
        assert_eq!(binary.as_raw(), &vec![0, 255, 255]);

        assert!(binarize(&image, 0).pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_normalize_flat_image_unchanged() {
        let image = GrayImage::from_pixel(4, 4, Luma([90]));
        assert_eq!(normalize(&image), image);
    }

    #[test]
    fn test_fit_dimensions_caps_pixels() {
        assert_eq!(fit_dimensions(100, 400, 200, 0), (200, 800));
        assert_eq!(fit_dimensions(100, 400, 200, 1_000_000), (200, 800));

        let (width, height) = fit_dimensions(100, 4000, 3000, 10_000_000);
        assert!(width as u64 * height as u64 <= 10_000_000);
        assert!((height as f64 / width as f64 - 40.0).abs() < 0.5);
    }

    #[test]
    fn test_tall_receipt_upscale_is_capped() {
        let config = PreprocessConfig {
            max_pixels: 20_000,
            ..small_config()
        };
        let output = ImagePreprocessor::from_config(config)
            .enhance(&gradient(10, 400), EnhancementStrategy::Threshold)
            .unwrap();

        let (width, height) = output.dimensions();
        assert!(width as u64 * height as u64 <= 20_000);
        assert!(width < 60);
        assert!((height as f64 / width as f64 - 40.0).abs() < 1.0);
    }

    #[test]
    fn test_large_photo_downscale_is_capped() {
        let config = PreprocessConfig {
            max_pixels: 600,
            ..small_config()
        };
        let output = ImagePreprocessor::from_config(config)
            .enhance(&gradient(200, 100), EnhancementStrategy::ContrastBoost)
            .unwrap();

        assert_eq!(output.dimensions(), (34, 17));
    }

    #[test]
    fn test_linear_clamps() {
        let image = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 5 } else { 250 }]));
        let boosted = linear(&image, 1.5, -20.0);
        assert_eq!(boosted.get_pixel(0, 0)[0], 0);
        assert_eq!(boosted.get_pixel(1, 0)[0], 255);
    }

    #[test]
    fn test_threshold_is_binary() {
        let preprocessor = ImagePreprocessor::from_config(small_config());
        let output = preprocessor
            .enhance(&gradient(30, 20), EnhancementStrategy::Threshold)
            .unwrap();

        assert_eq!(output.width(), 60);
        assert_eq!(output.height(), 40);
        assert!(output.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_contrast_boost_resizes() {
        let preprocessor = ImagePreprocessor::from_config(small_config());
        let output = preprocessor
            .enhance(&gradient(20, 10), EnhancementStrategy::ContrastBoost)
            .unwrap();

        assert_eq!(output.dimensions(), (40, 20));
    }

    #[test]
    fn test_no_upscale_when_disabled() {
        let config = PreprocessConfig {
            allow_upscale: false,
            ..small_config()
        };
        let output = ImagePreprocessor::from_config(config)
            .enhance(&gradient(20, 10), EnhancementStrategy::ContrastBoost)
            .unwrap();

        assert_eq!(output.dimensions(), (20, 10));
    }

    #[test]
    fn test_strategy_configs() {
        let config = EnhancementStrategy::ContrastBoost.ocr_config(Some("0-9"));
        assert_eq!(config.page_seg_mode, PageSegMode::SingleBlock);
        assert_eq!(config.char_whitelist.as_deref(), Some("0-9"));

        let config = EnhancementStrategy::Threshold.ocr_config(None);
        assert_eq!(config.page_seg_mode, PageSegMode::Auto);
        assert_eq!(config.name, "threshold");
    }

    #[test]
    fn test_prepare_variants_writes_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("receipt.png");
        gradient(20, 10).save(&source).unwrap();

        let preprocessor = ImagePreprocessor::from_config(small_config());
        let variants = preprocessor.prepare_variants(&source, dir.path());

        assert_eq!(variants.len(), 2);
        let names: Vec<String> = variants
            .iter()
            .map(|(_, raster)| raster.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names[0].starts_with("processed1_receipt.png_"));
        assert!(names[1].starts_with("processed2_receipt.png_"));
        assert!(variants.iter().all(|(_, raster)| raster.path().exists()));

        drop(variants);
        let remaining: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_prepare_variants_unreadable_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.jpg");
        fs::write(&source, b"not an image").unwrap();

        let variants = ImagePreprocessor::new().prepare_variants(&source, dir.path());

        assert!(variants.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_raster_delete() {
        let dir = tempfile::tempdir().unwrap();
        let raster = RasterImage::reserve(dir.path(), "page_", ".png").unwrap();
        let path = raster.path().to_path_buf();
        assert!(path.exists());

        raster.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_scratch_dir_defaults_to_source_parent() {
        let preprocessor = ImagePreprocessor::new();
        assert_eq!(
            preprocessor.scratch_dir_for(Path::new("/uploads/r.png")),
            PathBuf::from("/uploads")
        );
        assert_eq!(preprocessor.scratch_dir_for(Path::new("r.png")), PathBuf::from("."));
    }
}
