//! Normalizer: snaps a parsed transformation to the source image's bounds
//! and the configured discrete steps.
//!
//! Discrete steps bound the derivative key space so that near-duplicate
//! requests collapse onto one cache key.

use slicer_core::models::Image;
use slicer_core::AppError;

use crate::parser::{MAX_PERCENT, MIN_PERCENT};
use crate::transformation::{Percent, Pixels, Transformation};

#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizerConfig {
    pub allow_upscale: bool,
    /// Pixel step for height/width, 0 = disabled.
    pub size_discrete_step: u32,
    /// Percent step for quality, 0 = disabled.
    pub quality_discrete_step: u32,
    /// Percent step for scale, 0 = disabled.
    pub scale_discrete_step: u32,
}

pub struct Normalizer {
    cfg: NormalizerConfig,
}

impl Normalizer {
    pub fn new(cfg: NormalizerConfig) -> Self {
        Normalizer { cfg }
    }

    /// Apply per-image constraints to `t` in place and resolve the output
    /// extension from its mime type.
    pub fn normalize(&self, t: &mut Transformation, img: &Image) -> Result<(), AppError> {
        let original = img.original_slice().ok_or_else(|| {
            AppError::RegistryFailed(format!("image {} has no original slice", img.id))
        })?;

        let original_width = original.width.max(0) as u32;
        let original_height = original.height.max(0) as u32;

        if t.requires_resize() {
            if t.resize.height != 0 {
                t.resize.height = calculate_nearest_pixels(
                    self.cfg.size_discrete_step,
                    original_height,
                    t.resize.height,
                    self.cfg.allow_upscale,
                );
            }

            if t.resize.width != 0 {
                t.resize.width = calculate_nearest_pixels(
                    self.cfg.size_discrete_step,
                    original_width,
                    t.resize.width,
                    self.cfg.allow_upscale,
                );
            }

            if t.resize.scale != 0 && t.resize.scale != MAX_PERCENT as Percent {
                t.resize.scale = calculate_percent(
                    self.cfg.scale_discrete_step,
                    MAX_PERCENT as Percent,
                    t.resize.scale,
                    self.cfg.allow_upscale,
                );
            }
        }

        if t.quality != 0 && t.quality != MAX_PERCENT as Percent {
            t.quality = calculate_percent(
                self.cfg.quality_discrete_step,
                MAX_PERCENT as Percent,
                t.quality,
                self.cfg.allow_upscale,
            );
        }

        match t.mime() {
            "image/png" => t.extension = Some(slicer_core::models::Extension::Png),
            "image/jpeg" => t.extension = Some(slicer_core::models::Extension::Jpg),
            other => {
                return Err(AppError::spec_invalid(
                    "format",
                    format!("extension {} is unsupported", other),
                ))
            }
        }

        Ok(())
    }
}

/// Snap a desired pixel dimension to the discrete step grid.
///
/// Rounds to the nearest step boundary; a desired value within a remainder of
/// the original snaps to the original instead, and when upscaling is disabled
/// the result never exceeds the original.
pub(crate) fn calculate_nearest_pixels(
    step: u32,
    original: Pixels,
    desired: Pixels,
    upscale: bool,
) -> Pixels {
    if desired == 0 {
        return 0;
    }

    if step == 0 || original == 0 {
        return desired;
    }

    if !upscale && desired > original {
        return original;
    }

    if desired < step {
        return step;
    }

    let remainder = desired % step;
    let nearest = if remainder > step / 2 {
        desired - remainder + step
    } else if original - desired < remainder {
        original
    } else {
        desired - remainder
    };

    closest(nearest, original, upscale)
}

/// Snap a desired percentage to the discrete step grid, bounded by `max`.
/// Values below the minimum or equal to the maximum are treated as absent.
pub(crate) fn calculate_percent(step: u32, max: Percent, desired: Percent, upscale: bool) -> Percent {
    if (desired as u32) < MIN_PERCENT || desired == max {
        return 0;
    }

    if !upscale && desired > max {
        return max;
    }

    if step == 0 {
        return desired;
    }

    let step = step as Percent;
    if desired < step {
        return step;
    }

    let remainder = desired % step;
    let nearest = if remainder > step / 2 {
        desired - remainder + step
    } else {
        desired - remainder
    };

    closest(nearest, max, upscale)
}

fn closest<T: Ord>(nearest: T, bound: T, upscale: bool) -> T {
    if upscale {
        nearest
    } else {
        nearest.min(bound)
    }
}
