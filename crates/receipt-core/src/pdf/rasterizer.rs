//! First-page rasterization for PDFs without a text layer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use super::Result;
use crate::error::PdfError;
use crate::models::config::PdfConfig;
use crate::ocr::RasterImage;

/// Renders the first page of a PDF to an image file.
pub trait PageRasterizer: Send + Sync {
    /// Write a PNG of page 1 into `scratch_dir`; the caller owns the file.
    fn rasterize_first_page(&self, pdf: &Path, scratch_dir: &Path) -> Result<RasterImage>;
}

impl<T: PageRasterizer + ?Sized> PageRasterizer for Box<T> {
    fn rasterize_first_page(&self, pdf: &Path, scratch_dir: &Path) -> Result<RasterImage> {
        (**self).rasterize_first_page(pdf, scratch_dir)
    }
}

/// Rasterizer driving poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    binary: PathBuf,
    dpi: u32,
    max_width: u32,
    max_height: u32,
}

impl PdftoppmRasterizer {
    pub fn new() -> Self {
        Self::from_config(&PdfConfig::default())
    }

    pub fn from_config(config: &PdfConfig) -> Self {
        Self {
            binary: config.pdftoppm_path.clone(),
            dpi: config.render_dpi,
            max_width: config.max_render_width,
            max_height: config.max_render_height,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Whether the executable can be started. `pdftoppm -v` exits non-zero
    /// on some poppler versions, so only spawning is checked.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary).arg("-v").output().is_ok()
    }

    /// Longest side of the rendered page in pixels.
    fn scale_to(&self) -> u32 {
        self.max_width.min(self.max_height)
    }

    fn command(&self, pdf: &Path, output_root: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-f")
            .arg("1")
            .arg("-l")
            .arg("1")
            .arg("-scale-to")
            .arg(self.scale_to().to_string())
            .arg("-singlefile")
            .arg(pdf)
            .arg(output_root);
        command
    }
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn rasterize_first_page(&self, pdf: &Path, scratch_dir: &Path) -> Result<RasterImage> {
        let stem = pdf
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        let raster = RasterImage::reserve(scratch_dir, &format!("page_{}_", stem), ".png")
            .map_err(|e| PdfError::Rasterization(format!("failed to reserve output: {}", e)))?;

        // pdftoppm appends ".png" to the root it is given
        let root = raster.path().with_extension("");
        debug!("Rasterizing {} to {}", pdf.display(), raster.path().display());

        let output = self.command(pdf, &root).output().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                PdfError::RasterizerUnavailable(format!("{} not found", self.binary.display()))
            } else {
                PdfError::Rasterization(format!("failed to start pdftoppm: {}", e))
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PdfError::Rasterization(format!(
                "pdftoppm failed: {}",
                stderr.trim()
            )));
        }

        let written = std::fs::metadata(raster.path()).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(PdfError::Rasterization(
                "pdftoppm produced no image".to_string(),
            ));
        }

        info!("Rasterized first page of {} ({} bytes)", pdf.display(), written);
        Ok(raster)
    }
}
