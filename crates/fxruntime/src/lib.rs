//! Runtime half of the effect layer: compiles passes parsed by `fxlang` into
//! programs, caches the binaries on disk, and pushes render state and resource
//! bindings around the caller's draw calls.
//!
//! ```text
//!   fxlang::parse_* ─▶ EffectDocument
//!          │
//!          ▼
//!   EffectRegistry::compile_pass ──▶ ShaderCache::load ──hit──▶ GraphicsContext::create_program
//!          │ miss / refused                                          ▲
//!          └─▶ StageCompiler::compile_stage ─▶ link ─────────────────┘
//!                                                  └─▶ ShaderCache::store
//!
//!   apply ─▶ use_program + RenderState + ResourceTable::bind
//!   unapply ─▶ saved RenderState + unbind
//! ```
//!
//! `GraphicsContext` is the seam to the driver. `WgpuContext` owns a real
//! `wgpu` device and turns SPIR-V into shader modules; `HeadlessContext`
//! only records what was asked of it and backs tools and tests.
//! `StageCompiler` is the seam to the GLSL compiler: `NagaCompiler` is always
//! available, `ShadercCompiler` sits behind the `shaderc` feature.
mod binder;
mod cache;
mod compile;
pub mod context;
mod effect;
mod error;
mod interface;
mod registry;
mod state;

pub use binder::{
    BoundUnits, ResourceSlot, ResourceTable, SamplerDesc, SamplerSlot, TextureBinding,
};
pub use cache::{CacheKey, CacheStats, ShaderCache, MANIFEST_FILE};
pub use compile::{
    assemble_stage_source, link_stages, pass_sources, CompileError, NagaCompiler, ProgramBinary,
    StageBinary, StageCompiler, StageSource, DEFAULT_VERSION, NAGA_TARGET,
    NAGA_UNVALIDATED_TARGET,
};
#[cfg(feature = "shaderc")]
pub use compile::{ShadercCompiler, SHADERC_TARGET};
pub use context::{
    ContextError, GraphicsContext, HeadlessContext, ProgramId, SamplerId, TextureId,
    WgpuContext, HEADLESS_SIGNATURE,
};
pub use effect::{ApplyState, CompiledPass, Effect};
pub use error::{EffectError, ResourceKind, Result};
pub use interface::{InterfaceVar, StageInterface};
pub use registry::{EffectId, EffectRegistry, RegistryConfig};
pub use state::{
    BlendMode, CullMode, DepthFunc, DirectiveError, DirectiveErrorKind, FrontFace, PolygonMode,
    RenderState, StateOverrides,
};
