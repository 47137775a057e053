use std::collections::{BTreeMap, HashMap};

use fxlang::Stage;
use tracing::debug;

use super::{check_spirv, set_unit, ContextError, GraphicsContext, ProgramId, SamplerId};
use crate::binder::{SamplerDesc, TextureBinding};
use crate::compile::ProgramBinary;
use crate::state::RenderState;

pub const HEADLESS_SIGNATURE: &str = "headless/spirv-1.0";

/// A context with no GPU behind it. Programs, state, and unit bindings are
/// recorded so they can be inspected.
#[derive(Debug)]
pub struct HeadlessContext {
    signature: String,
    next_program: u32,
    next_sampler: u32,
    programs: BTreeMap<ProgramId, Vec<Stage>>,
    programs_created: usize,
    current: Option<ProgramId>,
    state: RenderState,
    textures: HashMap<usize, TextureBinding>,
    images: HashMap<usize, TextureBinding>,
    sampler_units: HashMap<usize, SamplerId>,
    samplers: HashMap<SamplerId, SamplerDesc>,
    reject_next: usize,
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::with_signature(HEADLESS_SIGNATURE)
    }
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signature(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            next_program: 1,
            next_sampler: 1,
            programs: BTreeMap::new(),
            programs_created: 0,
            current: None,
            state: RenderState::default(),
            textures: HashMap::new(),
            images: HashMap::new(),
            sampler_units: HashMap::new(),
            samplers: HashMap::new(),
            reject_next: 0,
        }
    }

    /// Makes the next `count` calls to `create_program` fail as if the
    /// driver refused the binary.
    pub fn reject_next_programs(&mut self, count: usize) {
        self.reject_next = count;
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.current
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Programs created over the context's lifetime, deleted ones included.
    pub fn programs_created(&self) -> usize {
        self.programs_created
    }

    pub fn program_stages(&self, program: ProgramId) -> Option<&[Stage]> {
        self.programs.get(&program).map(Vec::as_slice)
    }

    pub fn bound_texture(&self, unit: usize) -> Option<&TextureBinding> {
        self.textures.get(&unit)
    }

    pub fn bound_image(&self, unit: usize) -> Option<&TextureBinding> {
        self.images.get(&unit)
    }

    pub fn bound_sampler(&self, unit: usize) -> Option<SamplerId> {
        self.sampler_units.get(&unit).copied()
    }

    pub fn sampler_desc(&self, sampler: SamplerId) -> Option<&SamplerDesc> {
        self.samplers.get(&sampler)
    }

    pub fn sampler_count(&self) -> usize {
        self.samplers.len()
    }
}

impl GraphicsContext for HeadlessContext {
    fn driver_signature(&self) -> String {
        self.signature.clone()
    }

    fn create_program(&mut self, binary: &ProgramBinary) -> Result<ProgramId, ContextError> {
        if self.reject_next > 0 {
            self.reject_next -= 1;
            return Err(ContextError::Rejected("binary refused by driver".into()));
        }
        check_spirv(binary)?;

        let id = ProgramId::new(self.next_program)
            .ok_or_else(|| ContextError::Backend("program ids exhausted".into()))?;
        self.next_program += 1;
        self.programs_created += 1;
        self.programs
            .insert(id, binary.stages.iter().map(|stage| stage.stage).collect());
        debug!(program = %id, stages = binary.stages.len(), "created headless program");
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
        if self.current == Some(program) {
            self.current = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramId>) -> Result<(), ContextError> {
        if let Some(id) = program {
            if !self.programs.contains_key(&id) {
                return Err(ContextError::UnknownProgram(id));
            }
        }
        self.current = program;
        Ok(())
    }

    fn render_state(&self) -> RenderState {
        self.state
    }

    fn set_render_state(&mut self, state: &RenderState) {
        self.state = *state;
    }

    fn bind_texture(&mut self, unit: usize, binding: Option<&TextureBinding>) {
        set_unit(&mut self.textures, unit, binding.copied());
    }

    fn bind_image(&mut self, unit: usize, binding: Option<&TextureBinding>) {
        set_unit(&mut self.images, unit, binding.copied());
    }

    fn bind_sampler(&mut self, unit: usize, sampler: Option<SamplerId>) {
        set_unit(&mut self.sampler_units, unit, sampler);
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, ContextError> {
        let id = SamplerId(self.next_sampler);
        self.next_sampler += 1;
        self.samplers.insert(id, *desc);
        Ok(id)
    }

    fn delete_sampler(&mut self, sampler: SamplerId) {
        self.samplers.remove(&sampler);
    }
}
