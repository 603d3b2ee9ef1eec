//! Spec converter: validates the requested extension, runs the lexer and
//! stamps the resulting transformation with its target mime type.

use std::str::FromStr;

use slicer_core::models::Extension;
use slicer_core::AppError;

use crate::parser::SpecLexer;
use crate::transformation::Transformation;

const VALID_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct SpecConverter {
    lexer: SpecLexer,
}

impl Default for SpecConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpecConverter {
    pub fn new() -> Self {
        SpecConverter {
            lexer: SpecLexer::new(),
        }
    }

    /// Convert the raw URL spec segment plus requested extension into a
    /// transformation descriptor. `jpeg` is normalized to `jpg`.
    pub fn convert(
        &self,
        requested_transformations: &str,
        requested_extension: &str,
    ) -> Result<Transformation, AppError> {
        let spec = requested_transformations.trim_matches(['/', ' ']);

        if spec.is_empty() {
            return Err(AppError::spec_invalid("segments", "no segments provided"));
        }

        if !VALID_EXTENSIONS.contains(&requested_extension) {
            return Err(AppError::spec_invalid(
                "extension",
                format!("unsupported extension {}", requested_extension),
            ));
        }

        let mut t = Transformation::default();
        self.lexer.tokenize(spec, &mut t)?;

        let extension = Extension::from_str(requested_extension)?;
        t.mime = extension.mime()?.to_string();
        t.extension = Some(extension);

        Ok(t)
    }
}
