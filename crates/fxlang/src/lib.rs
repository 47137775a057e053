//! Effect language front end: loads effect files, runs the include/macro
//! preprocessor, and parses the result into an [`EffectDocument`]. Nothing in
//! this crate talks to a graphics context, so parsing can run on any thread.
//!
//! Modules:
//!
//! - `source` loads files and resolves `#include` targets.
//! - `preprocess` flattens includes, evaluates `#ifdef` blocks, and
//!   substitutes object-like macros.
//! - `parser` turns the flattened text into techniques, passes, and blocks.
//! - `reflect` numbers the textures and images declared in shader code.
//! - `path` expands `$VAR` and `~` in user-supplied paths.
mod document;
mod error;
mod parser;
mod path;
mod preprocess;
mod reflect;
mod source;

pub use document::{
    AddressMode, CommonBlock, Directive, EffectDocument, FilterMode, Pass, ResourceDecl,
    ResourceKind, SamplerStateDecl, ShaderBlock, Stage, StageRef, Technique, TechniqueGroup,
};
pub use error::{Location, ParseError, ParseErrorKind};
pub use parser::{parse_file, parse_str, MEMORY_FILENAME};
pub use path::PathResolver;
pub use preprocess::{preprocess, Preprocessed};
pub use reflect::{
    assign_slots, bind_resources, collect_resources, glsl_tokens, IMAGE_SET, TEXTURE_SET,
};
pub use source::{MacroSet, ParseOptions, SourceFile, SourceLoader};
