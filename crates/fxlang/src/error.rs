use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::document::Stage;

/// Position in the original (pre-include) sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: String,
    pub line: usize,
}

impl Location {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{location}: {kind}")]
pub struct ParseError {
    pub location: Location,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(location: Location, kind: ParseErrorKind) -> Self {
        Self { location, kind }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("cannot read '{}': {reason}", path.display())]
    Io { path: PathBuf, reason: String },

    #[error("include '{0}' not found in any search path")]
    IncludeNotFound(String),

    #[error("include cycle through '{0}'")]
    IncludeCycle(String),

    #[error("malformed directive: {0}")]
    Directive(String),

    #[error("'#{0}' without a matching conditional")]
    UnbalancedConditional(String),

    #[error("conditional block is never closed with '#endif'")]
    UnterminatedConditional,

    #[error("unterminated {0}")]
    Unterminated(String),

    #[error("expected {expected}, found {found}")]
    Unexpected { expected: String, found: String },

    #[error("duplicate {what} '{name}'")]
    Duplicate { what: &'static str, name: String },

    #[error("pass '{pass}' references undeclared {stage} block '{block}'")]
    UndeclaredBlock {
        pass: String,
        stage: Stage,
        block: String,
    },

    #[error("pass '{pass}' uses '{block}' as {expected} but it is a {actual} block")]
    StageMismatch {
        pass: String,
        block: String,
        expected: Stage,
        actual: Stage,
    },

    #[error("pass '{0}' does not reference any shader block")]
    EmptyPass(String),

    #[error("technique '{0}' declares no passes")]
    EmptyTechnique(String),

    #[error("sampler state '{state}' references unknown texture '{texture}'")]
    UnknownTexture { state: String, texture: String },

    #[error("binding {binding} is used by both '{first}' and '{second}'")]
    BindingConflict {
        binding: u32,
        first: String,
        second: String,
    },

    #[error("invalid sampler attribute '{key} = {value}'")]
    SamplerAttribute { key: String, value: String },
}
