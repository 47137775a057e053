use std::fmt;

use fxlang::ParseError;
use thiserror::Error;

use crate::context::{ContextError, ProgramId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Texture,
    Image,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Texture => "texture",
            ResourceKind::Image => "image",
        })
    }
}

#[derive(Debug, Error)]
pub enum EffectError {
    #[error("invalid effect handle")]
    InvalidHandle,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("failed to compile {technique}/{pass}: {message}")]
    Compile {
        technique: String,
        pass: String,
        message: String,
    },
    #[error("unknown technique '{0}'")]
    UnknownTechnique(String),
    #[error("unknown technique group '{0}'")]
    UnknownGroup(String),
    #[error("unknown pass '{pass}' in technique '{technique}'")]
    UnknownPass { technique: String, pass: String },
    #[error("program {0} was not compiled by this effect")]
    UnknownProgram(ProgramId),
    #[error("unknown resource '{0}'")]
    UnknownResource(String),
    #[error("no {kind} uses slot {slot} ({count} declared)")]
    SlotOutOfRange {
        kind: ResourceKind,
        slot: usize,
        count: usize,
    },
    #[error("effect is already applied")]
    AlreadyApplied,
    #[error("effect is not applied")]
    NotApplied,
    #[error("graphics context: {0}")]
    Context(#[from] ContextError),
}

pub type Result<T, E = EffectError> = std::result::Result<T, E>;
