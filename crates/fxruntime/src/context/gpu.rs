use std::borrow::Cow;
use std::collections::HashMap;

use fxlang::{AddressMode, FilterMode, Stage};
use tracing::{debug, warn};

use super::{check_spirv, set_unit, ContextError, GraphicsContext, ProgramId, SamplerId};
use crate::binder::{SamplerDesc, TextureBinding};
use crate::compile::ProgramBinary;
use crate::state::RenderState;

/// Shader modules of one linked program, in pipeline order.
pub struct WgpuProgram {
    pub modules: Vec<(Stage, wgpu::ShaderModule)>,
}

/// A `GraphicsContext` over a wgpu device.
///
/// wgpu has no global bind state, so program, render state, and unit
/// bindings are recorded here and read back by whoever builds the render
/// pipeline for the draw (`program`, `render_state`, `texture_unit`, ...).
pub struct WgpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    signature: String,
    next_program: u32,
    next_sampler: u32,
    programs: HashMap<ProgramId, WgpuProgram>,
    current: Option<ProgramId>,
    state: RenderState,
    textures: HashMap<usize, TextureBinding>,
    images: HashMap<usize, TextureBinding>,
    sampler_units: HashMap<usize, SamplerId>,
    samplers: HashMap<SamplerId, wgpu::Sampler>,
}

impl WgpuContext {
    /// Requests an adapter without a surface and opens a device on it.
    pub fn new_headless() -> Result<Self, ContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|err| ContextError::Backend(format!("failed to find a GPU adapter: {err}")))?;

        let info = adapter.get_info();
        debug!(
            name = %info.name,
            backend = ?info.backend,
            device_type = ?info.device_type,
            "selected GPU adapter"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("fxruntime device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
        }))
        .map_err(|err| ContextError::Backend(format!("failed to create GPU device: {err}")))?;

        Ok(Self::from_device(device, queue, &info))
    }

    /// Wraps a device the caller already owns.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, info: &wgpu::AdapterInfo) -> Self {
        Self {
            device,
            queue,
            signature: adapter_signature(info),
            next_program: 1,
            next_sampler: 1,
            programs: HashMap::new(),
            current: None,
            state: RenderState::default(),
            textures: HashMap::new(),
            images: HashMap::new(),
            sampler_units: HashMap::new(),
            samplers: HashMap::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn program(&self, program: ProgramId) -> Option<&WgpuProgram> {
        self.programs.get(&program)
    }

    pub fn current_program(&self) -> Option<&WgpuProgram> {
        self.current.and_then(|id| self.programs.get(&id))
    }

    pub fn texture_unit(&self, unit: usize) -> Option<&TextureBinding> {
        self.textures.get(&unit)
    }

    pub fn image_unit(&self, unit: usize) -> Option<&TextureBinding> {
        self.images.get(&unit)
    }

    pub fn sampler_unit(&self, unit: usize) -> Option<&wgpu::Sampler> {
        self.sampler_units
            .get(&unit)
            .and_then(|id| self.samplers.get(id))
    }

    fn create_module(&self, stage: Stage, words: &[u32]) -> Result<wgpu::ShaderModule, ContextError> {
        let label = format!("fxruntime {stage}");
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::SpirV(Cow::Borrowed(words)),
        });
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(ContextError::Rejected(format!("{stage} stage: {err}"))),
            None => Ok(module),
        }
    }
}

fn adapter_signature(info: &wgpu::AdapterInfo) -> String {
    format!(
        "wgpu-26/{:?}/{}/{:04x}:{:04x}/{} {}",
        info.backend, info.name, info.vendor, info.device, info.driver, info.driver_info
    )
}

impl GraphicsContext for WgpuContext {
    fn driver_signature(&self) -> String {
        self.signature.clone()
    }

    fn create_program(&mut self, binary: &ProgramBinary) -> Result<ProgramId, ContextError> {
        check_spirv(binary)?;
        let mut modules = Vec::with_capacity(binary.stages.len());
        for stage in &binary.stages {
            modules.push((stage.stage, self.create_module(stage.stage, &stage.words)?));
        }

        let id = ProgramId::new(self.next_program)
            .ok_or_else(|| ContextError::Backend("program ids exhausted".into()))?;
        self.next_program += 1;
        self.programs.insert(id, WgpuProgram { modules });
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_none() {
            warn!(%program, "deleting unknown program");
        }
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
        let filter = |mode: FilterMode| match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        };
        let address = match desc.address {
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
            AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
        };
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("fxruntime sampler"),
            address_mode_u: address,
            address_mode_v: address,
            address_mode_w: address,
            mag_filter: filter(desc.filter),
            min_filter: filter(desc.filter),
            mipmap_filter: filter(desc.mip_filter),
            ..Default::default()
        });
        let id = SamplerId(self.next_sampler);
        self.next_sampler += 1;
        self.samplers.insert(id, sampler);
        Ok(id)
    }

    fn delete_sampler(&mut self, sampler: SamplerId) {
        self.samplers.remove(&sampler);
    }
}
