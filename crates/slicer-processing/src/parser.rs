//! Spec lexer: splits the raw spec string into `_`-separated tokens and
//! matches each one against an ordered table of segment rules.
//!
//! Unknown tokens are skipped so that new flags can be introduced without
//! breaking old proxies; a token that matches a known integer prefix with an
//! out-of-range value rejects the whole spec.

use std::collections::BTreeMap;

use slicer_core::AppError;

use crate::transformation::{Percent, Rotation, Transformation};

pub(crate) const MIN_DIMENSION: u32 = 1;
pub(crate) const MAX_DIMENSION: u32 = 10_000;
pub(crate) const MIN_PERCENT: u32 = 1;
pub(crate) const MAX_PERCENT: u32 = 100;

enum RuleKind {
    /// Prefixed integer segment such as `h200` or `q80`. A parsed value equal
    /// to `default` is treated as absent.
    Integer {
        min: u32,
        max: u32,
        default: u32,
        apply: fn(&mut Transformation, u32),
    },
    /// Bare flag segment such as `fit` or `r90`.
    Flag { apply: fn(&mut Transformation) },
}

struct SegmentRule {
    name: &'static str,
    token: &'static str,
    kind: RuleKind,
}

pub(crate) struct SpecLexer {
    rules: Vec<SegmentRule>,
}

impl SpecLexer {
    pub(crate) fn new() -> Self {
        let rules = vec![
            SegmentRule {
                name: "height",
                token: "h",
                kind: RuleKind::Integer {
                    min: MIN_DIMENSION,
                    max: MAX_DIMENSION,
                    default: 0,
                    apply: |t, v| t.resize.height = v,
                },
            },
            SegmentRule {
                name: "width",
                token: "w",
                kind: RuleKind::Integer {
                    min: MIN_DIMENSION,
                    max: MAX_DIMENSION,
                    default: 0,
                    apply: |t, v| t.resize.width = v,
                },
            },
            SegmentRule {
                name: "scale",
                token: "s",
                kind: RuleKind::Integer {
                    min: MIN_PERCENT,
                    max: MAX_PERCENT,
                    default: MAX_PERCENT,
                    apply: |t, v| t.resize.scale = v as Percent,
                },
            },
            SegmentRule {
                name: "quality",
                token: "q",
                kind: RuleKind::Integer {
                    min: MIN_PERCENT,
                    max: MAX_PERCENT,
                    default: MAX_PERCENT,
                    apply: |t, v| t.quality = v as Percent,
                },
            },
            SegmentRule {
                name: "opacity",
                token: "o",
                kind: RuleKind::Integer {
                    min: MIN_PERCENT,
                    max: MAX_PERCENT,
                    default: MAX_PERCENT,
                    apply: |t, v| t.opacity = v as Percent,
                },
            },
            // longer crop prefixes come before the all-sides `c` rule
            SegmentRule {
                name: "crop-left",
                token: "cl",
                kind: RuleKind::Integer {
                    min: MIN_PERCENT,
                    max: MAX_PERCENT,
                    default: 0,
                    apply: |t, v| t.resize.crop.left = v as Percent,
                },
            },
            SegmentRule {
                name: "crop-right",
                token: "cr",
                kind: RuleKind::Integer {
                    min: MIN_PERCENT,
                    max: MAX_PERCENT,
                    default: 0,
                    apply: |t, v| t.resize.crop.right = v as Percent,
                },
            },
            SegmentRule {
                name: "crop-top",
                token: "ct",
                kind: RuleKind::Integer {
                    min: MIN_PERCENT,
                    max: MAX_PERCENT,
                    default: 0,
                    apply: |t, v| t.resize.crop.top = v as Percent,
                },
            },
            SegmentRule {
                name: "crop-bottom",
                token: "cb",
                kind: RuleKind::Integer {
                    min: MIN_PERCENT,
                    max: MAX_PERCENT,
                    default: 0,
                    apply: |t, v| t.resize.crop.bottom = v as Percent,
                },
            },
            SegmentRule {
                name: "crop",
                token: "c",
                kind: RuleKind::Integer {
                    min: MIN_PERCENT,
                    max: MAX_PERCENT,
                    default: 0,
                    apply: |t, v| {
                        let v = v as Percent;
                        t.resize.crop.left = v;
                        t.resize.crop.right = v;
                        t.resize.crop.top = v;
                        t.resize.crop.bottom = v;
                    },
                },
            },
            SegmentRule {
                name: "flip-horizontal",
                token: "fh",
                kind: RuleKind::Flag {
                    apply: |t| t.flip.horizontal = true,
                },
            },
            SegmentRule {
                name: "flip-vertical",
                token: "fv",
                kind: RuleKind::Flag {
                    apply: |t| t.flip.vertical = true,
                },
            },
            SegmentRule {
                name: "fit",
                token: "fit",
                kind: RuleKind::Flag {
                    apply: |t| t.resize.fit = true,
                },
            },
            SegmentRule {
                name: "rotate90",
                token: "r90",
                kind: RuleKind::Flag {
                    apply: |t| t.rotation = Rotation::R90,
                },
            },
            SegmentRule {
                name: "rotate180",
                token: "r180",
                kind: RuleKind::Flag {
                    apply: |t| t.rotation = Rotation::R180,
                },
            },
            SegmentRule {
                name: "rotate270",
                token: "r270",
                kind: RuleKind::Flag {
                    apply: |t| t.rotation = Rotation::R270,
                },
            },
        ];

        SpecLexer { rules }
    }

    /// Tokenize `spec` into `t`. Accumulates field errors and rejects the
    /// whole spec when any token is out of range or when nothing at all was
    /// accepted.
    pub(crate) fn tokenize(&self, spec: &str, t: &mut Transformation) -> Result<(), AppError> {
        let mut errors: BTreeMap<String, String> = BTreeMap::new();

        for token in spec.split('_') {
            for rule in &self.rules {
                match &rule.kind {
                    RuleKind::Integer {
                        min,
                        max,
                        default,
                        apply,
                    } => match match_integer(token, rule.token, *min, *max) {
                        Ok(Some(value)) => {
                            if value != 0 && value != *default {
                                apply(t, value);
                            }
                            break;
                        }
                        Ok(None) => {}
                        Err(message) => {
                            errors.insert(rule.name.to_string(), message);
                            break;
                        }
                    },
                    RuleKind::Flag { apply } => {
                        if token == rule.token {
                            apply(t);
                            break;
                        }
                    }
                }
            }
        }

        if t.is_empty() {
            errors.insert(
                "segments".to_string(),
                "no valid segments provided".to_string(),
            );
        }

        if !errors.is_empty() {
            return Err(AppError::SpecInvalid { details: errors });
        }

        Ok(())
    }
}

/// Match `token` against an integer rule prefix. `Ok(None)` means the token
/// does not belong to this rule; `Err` means it does but the value is out of
/// bounds.
fn match_integer(token: &str, prefix: &str, min: u32, max: u32) -> Result<Option<u32>, String> {
    let Some(rest) = token.strip_prefix(prefix) else {
        return Ok(None);
    };

    if rest.is_empty() || rest.len() > 5 || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }

    let value: u32 = rest
        .parse()
        .map_err(|_| format!("invalid value {}", token))?;

    if value < min || value > max {
        return Err(format!(
            "int value of {} must be between {} and {}",
            token, min, max
        ));
    }

    Ok(Some(value))
}
