//! Turns the shader blocks of one pass into a linked `ProgramBinary`.
//!
//! Types:
//!
//! - `StageSource` is the assembled GLSL of one stage: `#version` first,
//!   then every `common` block, then the stage body. Sampler and image
//!   declarations are rewritten to the set and binding of their slot.
//! - `StageBinary` / `ProgramBinary` carry SPIR-V words plus the stage
//!   interface the linker checks.
//! - `StageCompiler` is the backend seam. `NagaCompiler` is always
//!   available; `ShadercCompiler` needs the `shaderc` feature.
//!
//! Functions:
//!
//! - `pass_sources` assembles every stage of a pass in pipeline order.
//! - `link_stages` enforces the stage set rules and matches each stage's
//!   located inputs against the previous stage's outputs.
use std::iter;

use fxlang::{bind_resources, EffectDocument, Pass, ShaderBlock, Stage};
use naga::back::spv;
use naga::front::glsl;
use naga::valid::{Capabilities, ValidationFlags, Validator};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::context::ContextError;
use crate::interface::StageInterface;
use crate::state::DirectiveError;

pub const DEFAULT_VERSION: &str = "#version 450";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSource {
    pub stage: Stage,
    /// Name of the shader block the stage came from.
    pub name: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageBinary {
    pub stage: Stage,
    pub words: Vec<u32>,
    pub interface: StageInterface,
}

impl StageBinary {
    pub fn new(source: &StageSource, words: Vec<u32>) -> Self {
        Self {
            stage: source.stage,
            words,
            interface: StageInterface::scan(&source.source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBinary {
    /// `StageCompiler::target` of the compiler that produced it.
    pub target: String,
    /// Sorted in pipeline order.
    pub stages: Vec<StageBinary>,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{stage} stage '{block}' failed to compile:\n{log}")]
    Stage {
        stage: Stage,
        block: String,
        log: String,
    },
    #[error("{target} cannot compile {stage} stages")]
    Unsupported { stage: Stage, target: String },
    #[error("link failed: {0}")]
    Link(String),
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error("compiler unavailable: {0}")]
    Unavailable(String),
    #[error("graphics context refused the program: {0}")]
    Context(#[from] ContextError),
}

pub trait StageCompiler {
    /// Identifies the compiler and its output format. Part of the cache key.
    fn target(&self) -> &str;

    fn compile_stage(&self, source: &StageSource) -> Result<StageBinary, CompileError>;

    fn link(&self, stages: Vec<StageBinary>) -> Result<ProgramBinary, CompileError> {
        link_stages(self.target(), stages)
    }
}

impl<T: StageCompiler + ?Sized> StageCompiler for Box<T> {
    fn target(&self) -> &str {
        (**self).target()
    }

    fn compile_stage(&self, source: &StageSource) -> Result<StageBinary, CompileError> {
        (**self).compile_stage(source)
    }

    fn link(&self, stages: Vec<StageBinary>) -> Result<ProgramBinary, CompileError> {
        (**self).link(stages)
    }
}

/// GLSL for one stage. The stage's own `#version` wins over one found in a
/// common block; without either, `DEFAULT_VERSION` is used.
/// Opaque uniforms come out bound to the slots the resource table uses.
pub fn assemble_stage_source(document: &EffectDocument, block: &ShaderBlock) -> String {
    let version = find_version(&block.source)
        .or_else(|| document.common.iter().find_map(|common| find_version(&common.source)))
        .unwrap_or(DEFAULT_VERSION);

    let mut assembled = String::new();
    assembled.push_str(version);
    assembled.push('\n');

    let pieces = document
        .common
        .iter()
        .map(|common| common.source.as_str())
        .chain(iter::once(block.source.as_str()));
    for piece in pieces {
        for line in piece.lines().filter(|line| !is_version(line)) {
            assembled.push_str(line);
            assembled.push('\n');
        }
    }
    bind_resources(&assembled, &document.textures, &document.images)
}

fn is_version(line: &str) -> bool {
    line.trim_start().starts_with("#version")
}

fn find_version(text: &str) -> Option<&str> {
    text.lines().find(|line| is_version(line)).map(str::trim)
}

pub fn pass_sources(document: &EffectDocument, pass: &Pass) -> Vec<StageSource> {
    document
        .stage_blocks(pass)
        .map(|(stage, block)| StageSource {
            stage,
            name: block.name.clone(),
            source: assemble_stage_source(document, block),
        })
        .collect()
}

pub fn link_stages(target: &str, mut stages: Vec<StageBinary>) -> Result<ProgramBinary, CompileError> {
    stages.sort_by_key(|binary| binary.stage);

    if let Some(pair) = stages.windows(2).find(|pair| pair[0].stage == pair[1].stage) {
        return Err(CompileError::Link(format!("duplicate {} stage", pair[0].stage)));
    }

    let has = |stage: Stage| stages.iter().any(|binary| binary.stage == stage);
    if has(Stage::Compute) {
        if stages.len() > 1 {
            return Err(CompileError::Link(
                "a compute stage cannot be linked with other stages".into(),
            ));
        }
    } else {
        for required in [Stage::Vertex, Stage::Fragment] {
            if !has(required) {
                return Err(CompileError::Link(format!(
                    "program has no {required} stage"
                )));
            }
        }
    }

    for pair in stages.windows(2) {
        let (producer, consumer) = (&pair[0], &pair[1]);
        for input in &consumer.interface.inputs {
            match producer.interface.output(input.location) {
                None => {
                    return Err(CompileError::Link(format!(
                        "{} input '{}' (location {}) is not written by the {} stage",
                        consumer.stage, input.name, input.location, producer.stage
                    )))
                }
                Some(output) if output.glsl_type != input.glsl_type => {
                    return Err(CompileError::Link(format!(
                        "{} input '{}' (location {}) is {} but the {} stage writes {} '{}'",
                        consumer.stage,
                        input.name,
                        input.location,
                        input.glsl_type,
                        producer.stage,
                        output.glsl_type,
                        output.name
                    )))
                }
                Some(_) => {}
            }
        }
    }

    Ok(ProgramBinary {
        target: target.to_string(),
        stages,
    })
}

pub const NAGA_TARGET: &str = "naga-26/spirv";
/// Target of a `NagaCompiler` with validation off, so its binaries never
/// satisfy a validating compiler's cache lookups.
pub const NAGA_UNVALIDATED_TARGET: &str = "naga-26/spirv+novalidate";

/// GLSL → naga IR → SPIR-V. naga has no geometry or tessellation frontend,
/// so those stages fail with `CompileError::Unsupported`.
#[derive(Debug, Clone)]
pub struct NagaCompiler {
    validate: bool,
}

impl Default for NagaCompiler {
    fn default() -> Self {
        Self { validate: true }
    }
}

impl NagaCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// With validation off, the IR still goes through the validator for the
    /// layout information the SPIR-V writer needs, but no checks run.
    pub fn with_validation(validate: bool) -> Self {
        Self { validate }
    }
}

fn naga_stage(stage: Stage) -> Option<naga::ShaderStage> {
    match stage {
        Stage::Vertex => Some(naga::ShaderStage::Vertex),
        Stage::Fragment => Some(naga::ShaderStage::Fragment),
        Stage::Compute => Some(naga::ShaderStage::Compute),
        Stage::TessControl | Stage::TessEval | Stage::Geometry => None,
    }
}

impl StageCompiler for NagaCompiler {
    fn target(&self) -> &str {
        if self.validate {
            NAGA_TARGET
        } else {
            NAGA_UNVALIDATED_TARGET
        }
    }

    fn compile_stage(&self, source: &StageSource) -> Result<StageBinary, CompileError> {
        let shader_stage = naga_stage(source.stage).ok_or_else(|| CompileError::Unsupported {
            stage: source.stage,
            target: self.target().to_string(),
        })?;
        let failed = |log: String| CompileError::Stage {
            stage: source.stage,
            block: source.name.clone(),
            log,
        };

        let module = glsl::Frontend::default()
            .parse(&glsl::Options::from(shader_stage), &source.source)
            .map_err(|errors| failed(errors.emit_to_string(&source.source)))?;

        let flags = if self.validate {
            ValidationFlags::all()
        } else {
            ValidationFlags::empty()
        };
        let info = Validator::new(flags, Capabilities::all())
            .validate(&module)
            .map_err(|err| failed(err.emit_to_string(&source.source)))?;

        let pipeline = spv::PipelineOptions {
            shader_stage,
            entry_point: "main".into(),
        };
        let words = spv::write_vec(&module, &info, &spv::Options::default(), Some(&pipeline))
            .map_err(|err| failed(err.to_string()))?;

        debug!(stage = %source.stage, block = %source.name, words = words.len(), "compiled stage with naga");
        Ok(StageBinary::new(source, words))
    }
}

#[cfg(feature = "shaderc")]
pub use self::shaderc_backend::{ShadercCompiler, SHADERC_TARGET};

#[cfg(feature = "shaderc")]
mod shaderc_backend {
    use fxlang::Stage;
    use shaderc::ShaderKind;
    use tracing::{debug, warn};

    use super::{CompileError, StageBinary, StageCompiler, StageSource};

    pub const SHADERC_TARGET: &str = "shaderc-0.10/spirv";

    /// glslang through shaderc; handles every stage.
    pub struct ShadercCompiler {
        compiler: shaderc::Compiler,
    }

    impl ShadercCompiler {
        pub fn new() -> Result<Self, CompileError> {
            let compiler = shaderc::Compiler::new()
                .map_err(|err| CompileError::Unavailable(err.to_string()))?;
            Ok(Self { compiler })
        }
    }

    fn shader_kind(stage: Stage) -> ShaderKind {
        match stage {
            Stage::Vertex => ShaderKind::Vertex,
            Stage::TessControl => ShaderKind::TessControl,
            Stage::TessEval => ShaderKind::TessEvaluation,
            Stage::Geometry => ShaderKind::Geometry,
            Stage::Fragment => ShaderKind::Fragment,
            Stage::Compute => ShaderKind::Compute,
        }
    }

    impl StageCompiler for ShadercCompiler {
        fn target(&self) -> &str {
            SHADERC_TARGET
        }

        fn compile_stage(&self, source: &StageSource) -> Result<StageBinary, CompileError> {
            let artifact = self
                .compiler
                .compile_into_spirv(
                    &source.source,
                    shader_kind(source.stage),
                    &source.name,
                    "main",
                    None,
                )
                .map_err(|err| CompileError::Stage {
                    stage: source.stage,
                    block: source.name.clone(),
                    log: err.to_string(),
                })?;
            if artifact.get_num_warnings() > 0 {
                warn!(
                    stage = %source.stage,
                    block = %source.name,
                    warnings = %artifact.get_warning_messages(),
                    "shaderc reported warnings"
                );
            }
            let words = artifact.as_binary().to_vec();
            debug!(stage = %source.stage, block = %source.name, words = words.len(), "compiled stage with shaderc");
            Ok(StageBinary::new(source, words))
        }
    }
}
