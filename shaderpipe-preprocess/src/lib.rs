//! GLSL stage source generation for shaderpipe.
//!
//! This crate turns author-written GPU program fragments into complete,
//! compilable per-stage sources. It implements a small macro language
//! (conditional compilation, `#for` iteration, dotted-key file inclusion,
//! `${VAR}` substitution) and a cross-stage interface synthesizer that
//! keeps `in`/`out` declarations consistent across adjacent pipeline
//! stages without the author hand-wiring concrete names.
//!
//! The entry point is [`PreProcessor::process_stages`], which pulls each
//! stage's source through a chain of [`LineProcessor`]s in reverse
//! pipeline order and returns a map of finished stage sources.
//!
//! Malformed input degrades to inline `#warning`/`#error` diagnostics in
//! the generated source; nothing in this crate panics on bad shader text.

mod declaration;
mod directive;
mod error;
mod include;
mod io;
mod macros;
mod stages;

pub use declaration::{ArraySize, Declaration, IoKind};
pub use directive::DirectiveProcessor;
pub use error::PreprocessError;
pub use include::Includer;
pub use io::IoProcessor;
pub use macros::MacroTree;
pub use stages::{
    InputProvider, LineProcessor, PreProcessor, PreProcessorInput, SpecifiedInput, StageState,
};
