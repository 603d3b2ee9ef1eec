use slicer_core::models::Extension;

pub type Pixels = u32;
pub type Percent = u16;

/// Clockwise rotation applied after resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    None,
    R90,
    R180,
    R270,
}

impl Rotation {
    fn segment(&self) -> Option<&'static str> {
        match self {
            Rotation::None => None,
            Rotation::R90 => Some("r90"),
            Rotation::R180 => Some("r180"),
            Rotation::R270 => Some("r270"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flip {
    pub horizontal: bool,
    pub vertical: bool,
}

impl Flip {
    pub fn none(&self) -> bool {
        !self.horizontal && !self.vertical
    }
}

/// Per-side crop percentages, applied before any resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Crop {
    pub left: Percent,
    pub right: Percent,
    pub top: Percent,
    pub bottom: Percent,
}

impl Crop {
    pub fn none(&self) -> bool {
        self.left == 0 && self.right == 0 && self.top == 0 && self.bottom == 0
    }

    pub fn required(&self) -> bool {
        !self.none()
    }

    pub fn all_sides(&self) -> bool {
        self.required()
            && self.left == self.right
            && self.left == self.top
            && self.left == self.bottom
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resize {
    pub height: Pixels,
    pub width: Pixels,
    pub scale: Percent,
    /// Fit within the width/height box preserving aspect ratio.
    /// Inert unless both dimensions are present.
    pub fit: bool,
    pub crop: Crop,
}

impl Resize {
    pub fn none(&self) -> bool {
        self.crop.none() && self.scale == 0 && self.width == 0 && self.height == 0
    }

    pub fn requires_crop(&self) -> bool {
        self.crop.required()
    }

    pub fn width_or_height_provided(&self) -> bool {
        self.width != 0 || self.height != 0
    }

    fn fit_active(&self) -> bool {
        self.fit && self.width != 0 && self.height != 0
    }
}

/// A per-request transformation descriptor.
///
/// Built by the spec converter, then normalized against the source image
/// before it is used as a cache key or fed to the raster transformer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transformation {
    pub resize: Resize,
    pub quality: Percent,
    pub opacity: Percent,
    pub rotation: Rotation,
    pub flip: Flip,
    pub extension: Option<Extension>,
    pub mime: String,
}

impl Transformation {
    pub fn is_empty(&self) -> bool {
        self.resize.none()
            && self.flip.none()
            && self.quality == 0
            && self.opacity == 0
            && self.rotation == Rotation::None
    }

    pub fn requires_resize(&self) -> bool {
        !self.resize.none()
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Canonical derivative filename: lowercase segments in lexicographic
    /// order joined by `_`, suffixed with the extension.
    ///
    /// Two specs that normalize to the same transformation produce the same
    /// filename, which is what makes the filename usable as a cache key.
    pub fn filename(&self) -> String {
        let extension = self
            .extension
            .expect("transformation must carry an extension before filename derivation");

        let mut segments: Vec<String> = Vec::new();

        if self.resize.height != 0 {
            segments.push(format!("h{}", self.resize.height));
        }
        if self.resize.width != 0 {
            segments.push(format!("w{}", self.resize.width));
        }
        if self.resize.scale != 0 {
            segments.push(format!("s{}", self.resize.scale));
        }
        if self.quality != 0 {
            segments.push(format!("q{}", self.quality));
        }
        if self.opacity != 0 {
            segments.push(format!("o{}", self.opacity));
        }

        let crop = &self.resize.crop;
        if crop.all_sides() {
            segments.push(format!("c{}", crop.left));
        } else if crop.required() {
            if crop.left != 0 {
                segments.push(format!("cl{}", crop.left));
            }
            if crop.right != 0 {
                segments.push(format!("cr{}", crop.right));
            }
            if crop.top != 0 {
                segments.push(format!("ct{}", crop.top));
            }
            if crop.bottom != 0 {
                segments.push(format!("cb{}", crop.bottom));
            }
        }

        if self.resize.fit_active() {
            segments.push("fit".to_string());
        }
        if self.flip.horizontal {
            segments.push("fh".to_string());
        }
        if self.flip.vertical {
            segments.push("fv".to_string());
        }
        if let Some(segment) = self.rotation.segment() {
            segments.push(segment.to_string());
        }

        segments.sort();

        format!("{}.{}", segments.join("_"), extension).to_lowercase()
    }
}
