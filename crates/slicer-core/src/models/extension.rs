use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Image file extension.
///
/// `Tiff` and `Webp` can appear as source formats; only `Jpg` and `Png` are
/// servable derivative formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    Jpg,
    Png,
    Tiff,
    Webp,
}

impl Extension {
    /// Mime type for servable extensions.
    pub fn mime(&self) -> Result<&'static str, AppError> {
        match self {
            Extension::Jpg => Ok("image/jpeg"),
            Extension::Png => Ok("image/png"),
            other => Err(AppError::spec_invalid(
                "format",
                format!("mime type unsupported for {}", other),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Extension::Jpg => "jpg",
            Extension::Png => "png",
            Extension::Tiff => "tiff",
            Extension::Webp => "webp",
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Extension {
    type Err = AppError;

    /// Normalizing parse: `jpeg` collapses to `jpg`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jpg" | "jpeg" => Ok(Extension::Jpg),
            "png" => Ok(Extension::Png),
            "tiff" => Ok(Extension::Tiff),
            "webp" => Ok(Extension::Webp),
            other => Err(AppError::spec_invalid(
                "extension",
                format!("extension unsupported: {}", other),
            )),
        }
    }
}
