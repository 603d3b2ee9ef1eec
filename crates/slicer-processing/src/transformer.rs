//! Raster transformer: decodes a source image, honors EXIF orientation and
//! applies the normalized transformation, encoding the result into the
//! destination writer.
//!
//! Apply order is deterministic: crop, then scale or width/height resize,
//! then rotation, then flips (horizontal before vertical). Tests rely on
//! this order being observable.

use std::io::{Cursor, Write};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};

use slicer_core::models::{Extension, Image};
use slicer_core::AppError;

use crate::orientation::{orientation_transformation, read_exif_orientation};
use crate::transformation::{Percent, Rotation, Transformation};

const DEFAULT_QUALITY: Percent = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct TransformerConfig {
    pub allow_upscale: bool,
}

/// Metadata of a freshly produced derivative.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceDescriptor {
    pub width: i32,
    pub height: i32,
    pub size: i64,
    pub quality: i32,
    pub cropped: bool,
    pub extension: Extension,
    pub mime: String,
    /// Canonical transformation filename, without the image id prefix.
    pub filename: String,
}

pub struct RasterTransformer {
    cfg: TransformerConfig,
}

impl RasterTransformer {
    pub fn new(cfg: TransformerConfig) -> Self {
        RasterTransformer { cfg }
    }

    /// Re-encode the original upload at full dimensions, correcting EXIF
    /// orientation. Used by the ingestion path.
    pub fn create_original_slice<W: Write>(
        &self,
        source: &[u8],
        dst: &mut W,
        image: &Image,
    ) -> Result<SliceDescriptor, AppError> {
        let (img, source_format) = self.decode(source)?;
        let t = original_transformation(&img, source_format);
        self.transform(source_format, img, dst, image, &t)
    }

    /// Produce a derivative according to `t`, writing the encoded bytes to
    /// `dst`.
    pub fn create_slice<W: Write>(
        &self,
        source: &[u8],
        dst: &mut W,
        image: &Image,
        t: &Transformation,
    ) -> Result<SliceDescriptor, AppError> {
        let (img, source_format) = self.decode(source)?;
        self.transform(source_format, img, dst, image, t)
    }

    /// Pre-flight upscale guard, usable before any bytes flow. The same
    /// check runs again against the decoded image during the transform.
    pub fn refuse_out_of_bounds(
        &self,
        t: &Transformation,
        original_width: u32,
        original_height: u32,
    ) -> Result<(), AppError> {
        if t.resize.width_or_height_provided()
            && !self.cfg.allow_upscale
            && (t.resize.height > original_height || t.resize.width > original_width)
        {
            return Err(AppError::TransformationRefused(format!(
                "upscale is disabled: max height is {}, max width is {}",
                original_height, original_width
            )));
        }

        Ok(())
    }

    fn decode(&self, source: &[u8]) -> Result<(DynamicImage, ImageFormat), AppError> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| AppError::RasterFailed(format!("could not probe image format: {}", e)))?;

        let source_format = reader
            .format()
            .ok_or_else(|| AppError::RasterFailed("unrecognized image format".to_string()))?;

        let mut img = reader
            .decode()
            .map_err(|e| AppError::RasterFailed(format!("bad image provided: {}", e)))?;

        if matches!(source_format, ImageFormat::Jpeg | ImageFormat::Tiff) {
            let exif_transformation = orientation_transformation(read_exif_orientation(source));
            if !exif_transformation.is_empty() {
                img = self.apply(img, &exif_transformation)?;
            }
        }

        Ok((img, source_format))
    }

    fn transform<W: Write>(
        &self,
        source_format: ImageFormat,
        img: DynamicImage,
        dst: &mut W,
        _image: &Image,
        t: &Transformation,
    ) -> Result<SliceDescriptor, AppError> {
        let target = match t.extension {
            Some(ext @ (Extension::Jpg | Extension::Png)) => ext,
            _ => servable_target(source_format),
        };

        let quality = if t.quality == 0 {
            DEFAULT_QUALITY
        } else {
            t.quality
        };

        let transformed = self.apply(img, t)?;

        let mut buf = Vec::new();
        match target {
            Extension::Jpg => {
                let encoder = JpegEncoder::new_with_quality(&mut buf, quality.min(100) as u8);
                DynamicImage::ImageRgb8(transformed.to_rgb8())
                    .write_with_encoder(encoder)
                    .map_err(|e| {
                        AppError::RasterFailed(format!("could not encode image to jpeg: {}", e))
                    })?;
            }
            Extension::Png => {
                transformed
                    .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
                    .map_err(|e| {
                        AppError::RasterFailed(format!("could not encode image to png: {}", e))
                    })?;
            }
            other => {
                return Err(AppError::TransformationRefused(format!(
                    "unsupported target format {}",
                    other
                )))
            }
        }

        dst.write_all(&buf).map_err(|e| {
            AppError::RasterFailed(format!("could not copy bytes to destination: {}", e))
        })?;

        let (width, height) = transformed.dimensions();

        Ok(SliceDescriptor {
            width: width as i32,
            height: height as i32,
            size: buf.len() as i64,
            quality: if target == Extension::Jpg {
                quality as i32
            } else {
                t.quality as i32
            },
            cropped: t.resize.requires_crop(),
            extension: target,
            mime: target.mime()?.to_string(),
            filename: t.filename(),
        })
    }

    fn apply(&self, mut img: DynamicImage, t: &Transformation) -> Result<DynamicImage, AppError> {
        if t.requires_resize() {
            tracing::debug!(
                width = t.resize.width,
                height = t.resize.height,
                scale = t.resize.scale,
                cropped = t.resize.requires_crop(),
                "applying resize"
            );
            img = self.resize(img, t)?;
        }

        img = match t.rotation {
            Rotation::None => img,
            Rotation::R90 => img.rotate90(),
            Rotation::R180 => img.rotate180(),
            Rotation::R270 => img.rotate270(),
        };

        if t.flip.horizontal {
            img = img.fliph();
        }
        if t.flip.vertical {
            img = img.flipv();
        }

        Ok(img)
    }

    fn resize(&self, mut img: DynamicImage, t: &Transformation) -> Result<DynamicImage, AppError> {
        let (original_width, original_height) = img.dimensions();

        if t.resize.requires_crop() {
            let crop = &t.resize.crop;
            let x0 = proportion(original_width, crop.left);
            let y0 = proportion(original_height, crop.top);
            let x1 = original_width - proportion(original_width, crop.right);
            let y1 = original_height - proportion(original_height, crop.bottom);

            img = img.crop_imm(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0));
        }

        if t.resize.scale != 0 {
            // proportional resize computes both dimensions automatically
            let (current_width, current_height) = img.dimensions();
            let new_width = proportion(current_width, t.resize.scale).max(1);
            let new_height = proportion(current_height, t.resize.scale).max(1);
            return Ok(img.resize_exact(new_width, new_height, FilterType::Lanczos3));
        }

        if t.resize.width_or_height_provided() {
            self.refuse_out_of_bounds(t, original_width, original_height)?;

            let (current_width, current_height) = img.dimensions();
            let (new_width, new_height) = resolve_dimensions(
                current_width,
                current_height,
                t.resize.width,
                t.resize.height,
            );

            img = if t.resize.fit && t.resize.width != 0 && t.resize.height != 0 {
                img.resize(new_width, new_height, FilterType::Lanczos3)
            } else {
                img.resize_exact(new_width, new_height, FilterType::Lanczos3)
            };
        }

        Ok(img)
    }
}

/// Servable target format derived from the source format.
fn servable_target(source_format: ImageFormat) -> Extension {
    match source_format {
        ImageFormat::Tiff | ImageFormat::WebP | ImageFormat::Jpeg => Extension::Jpg,
        _ => Extension::Png,
    }
}

fn original_transformation(img: &DynamicImage, source_format: ImageFormat) -> Transformation {
    let (width, height) = img.dimensions();
    let mut t = Transformation::default();
    t.resize.width = width;
    t.resize.height = height;
    t.extension = Some(servable_target(source_format));
    t
}

/// Truncating percentage of a dimension, matching the crop rectangle rule
/// `(W*L/100, H*T/100) -> (W*(1-R/100), H*(1-B/100))`.
fn proportion(original: u32, percent: Percent) -> u32 {
    (original as u64 * percent as u64 / 100) as u32
}

/// Fill in a missing dimension from the aspect ratio.
fn resolve_dimensions(
    current_width: u32,
    current_height: u32,
    width: u32,
    height: u32,
) -> (u32, u32) {
    match (width, height) {
        (0, h) => {
            let w = (current_width as f64 * h as f64 / current_height as f64).round() as u32;
            (w.max(1), h)
        }
        (w, 0) => {
            let h = (current_height as f64 * w as f64 / current_width as f64).round() as u32;
            (w, h.max(1))
        }
        other => other,
    }
}
