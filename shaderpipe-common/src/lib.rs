//! Shared vocabulary types for the shaderpipe source-generation pipeline.
//!
//! This crate contains the [`Stage`](crate::Stage) identifier used across
//! the preprocessing crates, along with the naming conventions tying the
//! generic `in_`/`out_` declaration prefixes to concrete per-stage prefixes.

pub mod map;

use std::fmt;

/// A programmable shader pipeline stage.
///
/// Ordering follows the pipeline: vertex processing first, fragment
/// processing last.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Stage {
    Vertex = 0,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
}

impl Stage {
    /// All programmable stages in pipeline order.
    pub const PIPELINE: [Stage; 5] = [
        Stage::Vertex,
        Stage::TessControl,
        Stage::TessEval,
        Stage::Geometry,
        Stage::Fragment,
    ];

    /// The short prefix used for concrete per-stage variable names,
    /// e.g. `vs_position` for the vertex stage.
    pub fn prefix(self) -> &'static str {
        match self {
            Stage::Vertex => "vs",
            Stage::TessControl => "tcs",
            Stage::TessEval => "tes",
            Stage::Geometry => "gs",
            Stage::Fragment => "fs",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Vertex => "vertex",
            Stage::TessControl => "tess-control",
            Stage::TessEval => "tess-eval",
            Stage::Geometry => "geometry",
            Stage::Fragment => "fragment",
        })
    }
}

/// Known variable name prefixes, generic and stage-concrete.
const NAME_PREFIXES: [&str; 9] = [
    "in_", "out_", "u_", "c_", "gs_", "fs_", "vs_", "tes_", "tcs_",
];

/// Strips any known IO or stage prefix from a declared variable name.
///
/// `in_position`, `vs_position` and `u_position` all reduce to
/// `position`; an unprefixed name is returned unchanged.
pub fn base_name(name: &str) -> &str {
    for prefix in NAME_PREFIXES {
        if let Some(rest) = name.strip_prefix(prefix) {
            return rest;
        }
    }
    name
}
