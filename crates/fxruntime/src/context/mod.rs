//! Seam between the effect runtime and whatever owns the GPU.
//!
//! The registry never calls a graphics API directly: program creation, state
//! changes, and unit bindings all go through `GraphicsContext`. Two
//! implementations ship with the crate:
//!
//! - `HeadlessContext` keeps bookkeeping only. Tests and the CLI use it.
//! - `WgpuContext` turns SPIR-V stages into `wgpu::ShaderModule`s and tracks
//!   state and bindings for a pipeline builder to read back.
mod gpu;
mod headless;

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;

use serde::Serialize;
use thiserror::Error;

use crate::binder::{SamplerDesc, TextureBinding};
use crate::compile::ProgramBinary;
use crate::state::RenderState;

pub use gpu::{WgpuContext, WgpuProgram};
pub use headless::{HeadlessContext, HEADLESS_SIGNATURE};

/// A linked program owned by a context. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ProgramId(NonZeroU32);

impl ProgramId {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Caller-owned texture object; the runtime only forwards it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SamplerId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context cannot use this binary (wrong driver, corrupt words).
    #[error("program binary rejected: {0}")]
    Rejected(String),
    #[error("unknown program {0}")]
    UnknownProgram(ProgramId),
    #[error("{0}")]
    Backend(String),
}

pub trait GraphicsContext {
    /// Identifies the driver a binary was produced for; cached binaries from
    /// another signature are not offered to `create_program`.
    fn driver_signature(&self) -> String;

    fn create_program(&mut self, binary: &ProgramBinary) -> Result<ProgramId, ContextError>;

    fn delete_program(&mut self, program: ProgramId);

    /// `None` unbinds.
    fn use_program(&mut self, program: Option<ProgramId>) -> Result<(), ContextError>;

    fn render_state(&self) -> RenderState;

    fn set_render_state(&mut self, state: &RenderState);

    fn bind_texture(&mut self, unit: usize, binding: Option<&TextureBinding>);

    fn bind_image(&mut self, unit: usize, binding: Option<&TextureBinding>);

    fn bind_sampler(&mut self, unit: usize, sampler: Option<SamplerId>);

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, ContextError>;

    fn delete_sampler(&mut self, sampler: SamplerId);
}

impl<T: GraphicsContext + ?Sized> GraphicsContext for Box<T> {
    fn driver_signature(&self) -> String {
        (**self).driver_signature()
    }

    fn create_program(&mut self, binary: &ProgramBinary) -> Result<ProgramId, ContextError> {
        (**self).create_program(binary)
    }

    fn delete_program(&mut self, program: ProgramId) {
        (**self).delete_program(program)
    }

    fn use_program(&mut self, program: Option<ProgramId>) -> Result<(), ContextError> {
        (**self).use_program(program)
    }

    fn render_state(&self) -> RenderState {
        (**self).render_state()
    }

    fn set_render_state(&mut self, state: &RenderState) {
        (**self).set_render_state(state)
    }

    fn bind_texture(&mut self, unit: usize, binding: Option<&TextureBinding>) {
        (**self).bind_texture(unit, binding)
    }

    fn bind_image(&mut self, unit: usize, binding: Option<&TextureBinding>) {
        (**self).bind_image(unit, binding)
    }

    fn bind_sampler(&mut self, unit: usize, sampler: Option<SamplerId>) {
        (**self).bind_sampler(unit, sampler)
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, ContextError> {
        (**self).create_sampler(desc)
    }

    fn delete_sampler(&mut self, sampler: SamplerId) {
        (**self).delete_sampler(sampler)
    }
}

/// Checks the SPIR-V header of every stage. Both bundled contexts run this
/// before doing anything else with a binary.
pub(crate) fn check_spirv(binary: &ProgramBinary) -> Result<(), ContextError> {
    const SPIRV_MAGIC: u32 = 0x0723_0203;

    if binary.stages.is_empty() {
        return Err(ContextError::Rejected("program has no stages".into()));
    }
    for stage in &binary.stages {
        match stage.words.first() {
            Some(&SPIRV_MAGIC) if stage.words.len() >= 5 => {}
            _ => {
                return Err(ContextError::Rejected(format!(
                    "{} stage is not a SPIR-V module",
                    stage.stage
                )))
            }
        }
    }
    Ok(())
}

pub(crate) fn set_unit<T>(units: &mut HashMap<usize, T>, unit: usize, value: Option<T>) {
    match value {
        Some(value) => {
            units.insert(unit, value);
        }
        None => {
            units.remove(&unit);
        }
    }
}
