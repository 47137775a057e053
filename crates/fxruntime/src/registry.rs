//! The handle-based API. An `EffectRegistry` owns every effect, the stage
//! compiler, the graphics context, and the program cache; callers address
//! effects through generation-checked `EffectId`s, so a deleted handle never
//! resolves again even after its slot is reused.
//!
//! Lifecycle of one effect:
//!
//! 1. `create` returns an empty effect (no techniques).
//! 2. `parse_file` / `parse_memory` replace its document. A failed parse
//!    keeps the previous document and appends `file:line: message` to the
//!    effect log.
//! 3. `compile_program` / `compile_pass` build (or reuse) a program for one
//!    pass, going through the cache when a directory is configured.
//! 4. `apply` / `reapply` / `unapply` push and revert render state and
//!    resource bindings around the caller's draws.
//! 5. `delete` releases programs and samplers in the context.
use std::path::{Path, PathBuf};

use fxlang::{EffectDocument, MacroSet, ParseError, ParseOptions};
use slotmap::{new_key_type, Key, KeyData, SlotMap};
use tracing::{debug, info, warn};

use crate::binder::{ResourceTable, TextureBinding};
use crate::cache::{CacheKey, CacheStats, ShaderCache};
use crate::compile::{pass_sources, CompileError, StageCompiler, StageSource};
use crate::context::{GraphicsContext, ProgramId, SamplerId};
use crate::effect::{ApplyState, CompiledPass, Effect};
use crate::error::{EffectError, Result};
use crate::state::StateOverrides;

new_key_type! {
    pub struct EffectId;
}

impl EffectId {
    /// Non-zero integer form for callers that need to store a plain number.
    pub fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }

    pub fn from_raw(raw: u64) -> Self {
        KeyData::from_ffi(raw).into()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Program cache location; `None` or empty disables the cache.
    pub cache_dir: Option<PathBuf>,
}

impl RegistryConfig {
    pub fn with_cache_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: Some(dir.into()),
        }
    }
}

pub struct EffectRegistry<X, C> {
    effects: SlotMap<EffectId, Effect>,
    compiler: C,
    context: X,
    cache: ShaderCache,
}

impl<X: GraphicsContext, C: StageCompiler> EffectRegistry<X, C> {
    pub fn new(config: RegistryConfig, compiler: C, context: X) -> Self {
        Self {
            effects: SlotMap::with_key(),
            compiler,
            context,
            cache: ShaderCache::new(config.cache_dir),
        }
    }

    pub fn context(&self) -> &X {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut X {
        &mut self.context
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    pub fn create(&mut self) -> EffectId {
        let id = self.effects.insert(Effect::default());
        debug!(effect = id.to_raw(), "created effect");
        id
    }

    /// Releases the effect's programs and samplers. The on-disk cache is
    /// left alone.
    pub fn delete(&mut self, id: EffectId) -> Result<()> {
        let mut effect = self.effects.remove(id).ok_or(EffectError::InvalidHandle)?;
        release(&mut effect, &mut self.context);
        debug!(effect = id.to_raw(), "deleted effect");
        Ok(())
    }

    pub fn contains(&self, id: EffectId) -> bool {
        self.effects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn effect(&self, id: EffectId) -> Result<&Effect> {
        self.effects.get(id).ok_or(EffectError::InvalidHandle)
    }

    fn effect_mut(&mut self, id: EffectId) -> Result<&mut Effect> {
        self.effects.get_mut(id).ok_or(EffectError::InvalidHandle)
    }

    pub fn document(&self, id: EffectId) -> Result<&EffectDocument> {
        Ok(&self.effect(id)?.document)
    }

    pub fn parse_file(&mut self, id: EffectId, path: &Path, options: &ParseOptions) -> Result<()> {
        self.effect(id)?;
        let parsed = fxlang::parse_file(path, options);
        self.install(id, parsed)
    }

    /// `virtual_filename` names the source in diagnostics.
    pub fn parse_memory(
        &mut self,
        id: EffectId,
        source: &str,
        virtual_filename: Option<&str>,
        options: &ParseOptions,
    ) -> Result<()> {
        self.effect(id)?;
        let parsed = fxlang::parse_str(source, virtual_filename, options);
        self.install(id, parsed)
    }

    fn install(&mut self, id: EffectId, parsed: Result<EffectDocument, ParseError>) -> Result<()> {
        let effect = self.effects.get_mut(id).ok_or(EffectError::InvalidHandle)?;
        match parsed {
            Ok(document) => {
                release(effect, &mut self.context);
                info!(
                    effect = id.to_raw(),
                    file = %document.filename,
                    techniques = document.technique_count(),
                    "parsed effect"
                );
                effect.replace_document(document);
                Ok(())
            }
            Err(err) => {
                warn!(effect = id.to_raw(), error = %err, "effect failed to parse");
                effect.append_log(&err.to_string());
                Err(err.into())
            }
        }
    }

    pub fn group_count(&self, id: EffectId) -> Result<usize> {
        Ok(self.effect(id)?.document.group_count())
    }

    pub fn group_name(&self, id: EffectId, group: usize) -> Result<Option<&str>> {
        Ok(self.effect(id)?.document.group_name(group))
    }

    /// Restricts `active_techniques` to one group; `None` clears the filter.
    pub fn use_technique_group(&mut self, id: EffectId, group: Option<&str>) -> Result<()> {
        let effect = self.effect_mut(id)?;
        effect.active_group = match group {
            None => None,
            Some(name) => Some(
                effect
                    .document
                    .groups
                    .iter()
                    .position(|candidate| candidate.name == name)
                    .ok_or_else(|| EffectError::UnknownGroup(name.to_string()))?,
            ),
        };
        Ok(())
    }

    pub fn active_group(&self, id: EffectId) -> Result<Option<&str>> {
        let effect = self.effect(id)?;
        Ok(effect
            .active_group
            .and_then(|group| effect.document.group_name(group)))
    }

    /// Techniques of the active group, or every technique when no group is
    /// selected.
    pub fn active_techniques(&self, id: EffectId) -> Result<Vec<&str>> {
        let effect = self.effect(id)?;
        let names = effect.document.techniques.iter().filter(|technique| {
            effect.active_group.is_none() || technique.group == effect.active_group
        });
        Ok(names.map(|technique| technique.name.as_str()).collect())
    }

    pub fn technique_count(&self, id: EffectId) -> Result<usize> {
        Ok(self.effect(id)?.document.technique_count())
    }

    pub fn technique_name(&self, id: EffectId, technique: usize) -> Result<Option<&str>> {
        Ok(self
            .effect(id)?
            .document
            .technique(technique)
            .map(|technique| technique.name.as_str()))
    }

    pub fn technique_index(&self, id: EffectId, technique: &str) -> Result<Option<usize>> {
        Ok(self.effect(id)?.document.technique_index(technique))
    }

    /// `technique/pass` of a program this effect compiled, `None` for any
    /// other program.
    pub fn program_name(&self, id: EffectId, program: ProgramId) -> Result<Option<String>> {
        let effect = self.effect(id)?;
        Ok(effect.compiled_program(program).and_then(|compiled| {
            let technique = effect.document.technique(compiled.technique)?;
            let pass = technique.passes.get(compiled.pass)?;
            Some(format!("{}/{}", technique.name, pass.name))
        }))
    }

    pub fn pass_count(&self, id: EffectId, technique: &str) -> Result<usize> {
        let document = &self.effect(id)?.document;
        document
            .technique_by_name(technique)
            .map(|technique| technique.passes.len())
            .ok_or_else(|| EffectError::UnknownTechnique(technique.to_string()))
    }

    pub fn pass_name(&self, id: EffectId, technique: &str, pass: usize) -> Result<Option<&str>> {
        let document = &self.effect(id)?.document;
        let technique = document
            .technique_by_name(technique)
            .ok_or_else(|| EffectError::UnknownTechnique(technique.to_string()))?;
        Ok(technique.passes.get(pass).map(|pass| pass.name.as_str()))
    }

    /// Names are matched exactly.
    pub fn compile_program(&mut self, id: EffectId, technique: &str, pass: &str) -> Result<ProgramId> {
        let document = &self.effect(id)?.document;
        let technique_index = document
            .technique_index(technique)
            .ok_or_else(|| EffectError::UnknownTechnique(technique.to_string()))?;
        let pass_index = document.techniques[technique_index]
            .pass_index(pass)
            .ok_or_else(|| EffectError::UnknownPass {
                technique: technique.to_string(),
                pass: pass.to_string(),
            })?;
        self.compile_pass(id, technique_index, pass_index)
    }

    pub fn compile_pass(&mut self, id: EffectId, technique: usize, pass: usize) -> Result<ProgramId> {
        let effect = self.effects.get_mut(id).ok_or(EffectError::InvalidHandle)?;
        let document = &effect.document;
        let technique_decl = document
            .technique(technique)
            .ok_or_else(|| EffectError::UnknownTechnique(format!("#{technique}")))?;
        let pass_decl = technique_decl
            .passes
            .get(pass)
            .ok_or_else(|| EffectError::UnknownPass {
                technique: technique_decl.name.clone(),
                pass: format!("#{pass}"),
            })?;
        let names = (technique_decl.name.clone(), pass_decl.name.clone());

        let outcome = StateOverrides::from_directives(&pass_decl.directives)
            .map_err(CompileError::from)
            .and_then(|state| match effect.compiled(technique, pass) {
                Some(existing) => Ok((existing.program, existing.key, state, true)),
                None => {
                    let sources = pass_sources(document, pass_decl);
                    build_program(
                        &self.compiler,
                        &mut self.context,
                        &mut self.cache,
                        &sources,
                        &document.macros,
                    )
                    .map(|(program, key)| (program, key, state, false))
                }
            });

        match outcome {
            Ok((program, _, _, true)) => Ok(program),
            Ok((program, key, state, false)) => {
                info!(
                    effect = id.to_raw(),
                    technique = %names.0,
                    pass = %names.1,
                    %program,
                    "compiled pass"
                );
                effect.programs.push(CompiledPass {
                    technique,
                    pass,
                    program,
                    state,
                    key,
                });
                Ok(program)
            }
            Err(err) => {
                let (technique, pass) = names;
                warn!(effect = id.to_raw(), %technique, %pass, error = %err, "pass failed to compile");
                let message = err.to_string();
                let line = format!("{}: {technique}/{pass}: {message}", effect.document.filename);
                effect.append_log(&line);
                Err(EffectError::Compile {
                    technique,
                    pass,
                    message,
                })
            }
        }
    }

    pub fn set_cache_directory(&mut self, dir: Option<PathBuf>) {
        self.cache.set_directory(dir);
    }

    pub fn cache_directory(&self) -> Option<&Path> {
        self.cache.directory()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn texture_number(&self, id: EffectId, name: &str) -> Result<Option<usize>> {
        Ok(self.effect(id)?.resources.texture_number(name))
    }

    pub fn image_number(&self, id: EffectId, name: &str) -> Result<Option<usize>> {
        Ok(self.effect(id)?.resources.image_number(name))
    }

    /// Takes effect on the next `apply` or `reapply`.
    pub fn set_texture(&mut self, id: EffectId, slot: usize, binding: TextureBinding) -> Result<()> {
        self.effect_mut(id)?.resources.set_texture(slot, binding)
    }

    pub fn set_sampler_state(&mut self, id: EffectId, name: &str, sampler: SamplerId) -> Result<()> {
        self.effect_mut(id)?.resources.set_sampler_state(name, sampler)
    }

    pub fn is_applied(&self, id: EffectId) -> Result<bool> {
        Ok(self.effect(id)?.apply.is_applied())
    }

    pub fn apply(&mut self, id: EffectId, program: ProgramId) -> Result<()> {
        let effect = self.effects.get_mut(id).ok_or(EffectError::InvalidHandle)?;
        if effect.apply.is_applied() {
            return Err(EffectError::AlreadyApplied);
        }
        let state = effect
            .compiled_program(program)
            .ok_or(EffectError::UnknownProgram(program))?
            .state;

        let saved = self.context.render_state();
        self.context.use_program(Some(program))?;
        self.context.set_render_state(&state.apply_to(saved));
        let bound = match effect.resources.bind(&mut self.context) {
            Ok(bound) => bound,
            Err(err) => {
                self.context.set_render_state(&saved);
                self.context.use_program(None)?;
                return Err(err.into());
            }
        };

        effect.apply = ApplyState::Applied {
            program,
            saved,
            bound,
        };
        Ok(())
    }

    /// Pushes `program`'s directives and the current bindings again. The
    /// bound program does not change.
    pub fn reapply(&mut self, id: EffectId, program: ProgramId) -> Result<()> {
        let effect = self.effects.get_mut(id).ok_or(EffectError::InvalidHandle)?;
        let state = effect
            .compiled_program(program)
            .ok_or(EffectError::UnknownProgram(program))?
            .state;
        let ApplyState::Applied { saved, bound, .. } = &mut effect.apply else {
            return Err(EffectError::NotApplied);
        };

        self.context.set_render_state(&state.apply_to(*saved));
        let rebound = effect.resources.bind(&mut self.context)?;
        for unit in rebound.textures {
            if !bound.textures.contains(&unit) {
                bound.textures.push(unit);
            }
        }
        for unit in rebound.images {
            if !bound.images.contains(&unit) {
                bound.images.push(unit);
            }
        }
        Ok(())
    }

    pub fn unapply(&mut self, id: EffectId) -> Result<()> {
        let effect = self.effects.get_mut(id).ok_or(EffectError::InvalidHandle)?;
        if !effect.apply.is_applied() {
            return Err(EffectError::NotApplied);
        }
        restore(effect, &mut self.context)?;
        Ok(())
    }

    /// Pushes only `program`'s directives on top of the current state.
    pub fn apply_pass_state(&mut self, id: EffectId, program: ProgramId) -> Result<()> {
        let effect = self.effect(id)?;
        let state = effect
            .compiled_program(program)
            .ok_or(EffectError::UnknownProgram(program))?
            .state;
        let current = self.context.render_state();
        self.context.set_render_state(&state.apply_to(current));
        Ok(())
    }

    pub fn log(&self, id: EffectId) -> Result<&str> {
        Ok(self.effect(id)?.log())
    }

    /// Copies as much of the log as fits into `buffer`, followed by a NUL.
    /// Never splits a UTF-8 sequence. Returns the number of log bytes copied.
    pub fn copy_log(&self, id: EffectId, buffer: &mut [u8]) -> Result<usize> {
        let log = self.effect(id)?.log();
        let Some(capacity) = buffer.len().checked_sub(1) else {
            return Ok(0);
        };
        let mut len = log.len().min(capacity);
        while !log.is_char_boundary(len) {
            len -= 1;
        }
        buffer[..len].copy_from_slice(&log.as_bytes()[..len]);
        buffer[len] = 0;
        Ok(len)
    }

    pub fn clear_log(&mut self, id: EffectId) -> Result<()> {
        self.effect_mut(id)?.log.clear();
        Ok(())
    }
}

/// Cache lookup, then full compile and link on a miss or a refused binary.
fn build_program<X, C>(
    compiler: &C,
    context: &mut X,
    cache: &mut ShaderCache,
    sources: &[StageSource],
    macros: &MacroSet,
) -> Result<(ProgramId, Option<CacheKey>), CompileError>
where
    X: GraphicsContext + ?Sized,
    C: StageCompiler + ?Sized,
{
    let key = cache
        .is_enabled()
        .then(|| CacheKey::compute(compiler.target(), sources, macros));
    let driver = context.driver_signature();

    if let Some(key) = key {
        if let Some(binary) = cache.load(key, compiler.target(), &driver) {
            match context.create_program(&binary) {
                Ok(program) => return Ok((program, Some(key))),
                Err(err) => {
                    cache.mark_rejected(key);
                    debug!(%key, error = %err, "recompiling after cached binary was refused");
                }
            }
        }
    }

    let stages = sources
        .iter()
        .map(|source| compiler.compile_stage(source))
        .collect::<Result<Vec<_>, _>>()?;
    let binary = compiler.link(stages)?;
    let program = context.create_program(&binary)?;
    if let Some(key) = key {
        cache.store(key, &driver, &binary);
    }
    Ok((program, key))
}

/// Reverts an applied effect: saved state back, units cleared, program
/// unbound.
fn restore<X: GraphicsContext>(effect: &mut Effect, context: &mut X) -> Result<()> {
    if let ApplyState::Applied { saved, bound, .. } = std::mem::take(&mut effect.apply) {
        context.set_render_state(&saved);
        ResourceTable::unbind(&bound, context);
        context.use_program(None)?;
    }
    Ok(())
}

fn release<X: GraphicsContext>(effect: &mut Effect, context: &mut X) {
    if let Err(err) = restore(effect, context) {
        warn!(error = %err, "failed to unbind program while releasing effect");
    }
    for compiled in effect.programs.drain(..) {
        context.delete_program(compiled.program);
    }
    effect.resources.release(context);
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use fxlang::Stage;

    use super::*;
    use crate::binder::TextureBinding;
    use crate::compile::StageBinary;
    use crate::context::{HeadlessContext, TextureId};
    use crate::state::BlendMode;

    /// Emits a minimal SPIR-V header per stage and counts invocations.
    #[derive(Default)]
    struct FakeCompiler {
        compiled: Cell<usize>,
        sources: RefCell<Vec<StageSource>>,
    }

    impl StageCompiler for FakeCompiler {
        fn target(&self) -> &str {
            "fake/spirv"
        }

        fn compile_stage(&self, source: &StageSource) -> Result<StageBinary, CompileError> {
            if source.source.contains("BROKEN") {
                return Err(CompileError::Stage {
                    stage: source.stage,
                    block: source.name.clone(),
                    log: "0:1: 'BROKEN' : undeclared identifier".into(),
                });
            }
            self.compiled.set(self.compiled.get() + 1);
            self.sources.borrow_mut().push(source.clone());
            Ok(StageBinary::new(
                source,
                vec![0x0723_0203, 0x0001_0000, 0, source.source.len() as u32, 0],
            ))
        }
    }

    const EFFECT: &str = r"
vertex VS {
    layout(location = 0) out vec2 v_uv;
    void main() {}
}
fragment FS {
    uniform sampler2D albedo;
    layout(location = 0) in vec2 v_uv;
    layout(location = 0) out vec4 color;
    void main() {}
}
fragment BadFS { void main() { BROKEN; } }
sampler_state Bilinear { textures = albedo; filter = linear; }

group High {
    technique Main {
        pass P0 { vertex = VS; fragment = FS; blend = alpha; depth_test = on; }
        pass P1 { vertex = VS; fragment = FS; cull = back; }
    }
}
technique Broken { pass P0 { vertex = VS; fragment = BadFS; } }
technique BadState { pass P0 { vertex = VS; fragment = FS; blend = sometimes; } }
";

    type Registry = EffectRegistry<HeadlessContext, FakeCompiler>;

    fn registry(config: RegistryConfig) -> Registry {
        EffectRegistry::new(config, FakeCompiler::default(), HeadlessContext::new())
    }

    fn parsed(registry: &mut Registry) -> EffectId {
        let id = registry.create();
        registry
            .parse_memory(id, EFFECT, Some("effect.fx"), &ParseOptions::default())
            .unwrap();
        id
    }

    #[test]
    fn handles_are_non_zero_and_never_resurrected() {
        let mut registry = registry(RegistryConfig::default());
        let first = registry.create();
        assert_ne!(first.to_raw(), 0);
        assert_eq!(EffectId::from_raw(first.to_raw()), first);
        registry.delete(first).unwrap();

        let second = registry.create();
        assert_ne!(first, second);
        assert!(!registry.contains(first));
        assert!(matches!(registry.technique_count(first), Err(EffectError::InvalidHandle)));
        assert!(matches!(registry.log(first), Err(EffectError::InvalidHandle)));
        assert!(matches!(registry.delete(first), Err(EffectError::InvalidHandle)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn enumerates_groups_techniques_and_passes() {
        let mut registry = registry(RegistryConfig::default());
        let id = parsed(&mut registry);

        assert_eq!(registry.technique_count(id).unwrap(), 3);
        assert_eq!(registry.technique_name(id, 0).unwrap(), Some("Main"));
        assert_eq!(registry.pass_count(id, "Main").unwrap(), 2);
        assert_eq!(registry.pass_name(id, "Main", 1).unwrap(), Some("P1"));
        assert_eq!(registry.group_count(id).unwrap(), 1);
        assert_eq!(registry.group_name(id, 0).unwrap(), Some("High"));

        registry.use_technique_group(id, Some("High")).unwrap();
        assert_eq!(registry.active_group(id).unwrap(), Some("High"));
        assert_eq!(registry.active_techniques(id).unwrap(), vec!["Main"]);
        registry.use_technique_group(id, None).unwrap();
        assert_eq!(registry.active_techniques(id).unwrap().len(), 3);
        assert!(matches!(
            registry.use_technique_group(id, Some("Low")),
            Err(EffectError::UnknownGroup(_))
        ));
        assert!(matches!(
            registry.pass_count(id, "main"),
            Err(EffectError::UnknownTechnique(_))
        ));
    }

    #[test]
    fn looks_up_technique_indices_and_program_names() {
        let mut registry = registry(RegistryConfig::default());
        let id = parsed(&mut registry);
        assert_eq!(registry.technique_index(id, "Broken").unwrap(), Some(1));
        assert_eq!(registry.technique_index(id, "broken").unwrap(), None);

        let program = registry.compile_program(id, "Main", "P1").unwrap();
        assert_eq!(
            registry.program_name(id, program).unwrap().as_deref(),
            Some("Main/P1")
        );

        let other = registry.create();
        registry
            .parse_memory(other, EFFECT, None, &ParseOptions::default())
            .unwrap();
        assert_eq!(registry.program_name(other, program).unwrap(), None);
        assert!(matches!(
            registry.technique_index(EffectId::from_raw(0), "Main"),
            Err(EffectError::InvalidHandle)
        ));
    }

    #[test]
    fn failed_parse_keeps_previous_document_and_logs() {
        let mut registry = registry(RegistryConfig::default());
        let fresh = registry.create();
        let err = registry
            .parse_memory(
                fresh,
                "vertex VS { }\ntechnique T { pass P { vertex = VS; fragment = Nope; } }",
                Some("bad.fx"),
                &ParseOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, EffectError::Parse(_)));
        assert_eq!(registry.technique_count(fresh).unwrap(), 0);
        assert!(registry.log(fresh).unwrap().starts_with("bad.fx:2: "));

        let id = parsed(&mut registry);
        registry
            .parse_memory(id, "technique {", None, &ParseOptions::default())
            .unwrap_err();
        assert_eq!(registry.technique_count(id).unwrap(), 3);
    }

    #[test]
    fn compiling_twice_reuses_the_program() {
        let mut registry = registry(RegistryConfig::default());
        let id = parsed(&mut registry);
        let first = registry.compile_program(id, "Main", "P0").unwrap();
        let second = registry.compile_pass(id, 0, 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.compiler().compiled.get(), 2);
        assert_eq!(registry.context().program_stages(first), Some(&[Stage::Vertex, Stage::Fragment][..]));
    }

    #[test]
    fn compile_failure_is_logged_and_isolated() {
        let mut registry = registry(RegistryConfig::default());
        let id = parsed(&mut registry);
        let good = registry.compile_program(id, "Main", "P0").unwrap();

        let err = registry.compile_program(id, "Broken", "P0").unwrap_err();
        assert!(matches!(err, EffectError::Compile { .. }));
        assert!(registry.log(id).unwrap().contains("undeclared identifier"));

        let err = registry.compile_program(id, "BadState", "P0").unwrap_err();
        assert!(err.to_string().contains("sometimes"));

        assert!(matches!(
            registry.compile_program(id, "Main", "P9"),
            Err(EffectError::UnknownPass { .. })
        ));
        registry.apply(id, good).unwrap();
    }

    #[test]
    fn reparse_deletes_programs() {
        let mut registry = registry(RegistryConfig::default());
        let id = parsed(&mut registry);
        let program = registry.compile_program(id, "Main", "P0").unwrap();
        registry.use_technique_group(id, Some("High")).unwrap();

        registry
            .parse_memory(id, EFFECT, None, &ParseOptions::default())
            .unwrap();
        assert_eq!(registry.context().program_count(), 0);
        assert_eq!(registry.active_group(id).unwrap(), None);
        assert!(matches!(
            registry.apply(id, program),
            Err(EffectError::UnknownProgram(_))
        ));
    }

    #[test]
    fn second_compile_hits_the_cache_across_effects_and_registries() {
        let temp = tempfile::tempdir().unwrap();
        let mut first = registry(RegistryConfig::with_cache_dir(temp.path()));
        let a = parsed(&mut first);
        first.compile_program(a, "Main", "P0").unwrap();
        assert_eq!(first.cache_stats().stores, 1);

        let b = parsed(&mut first);
        first.compile_program(b, "Main", "P0").unwrap();
        assert_eq!(first.cache_stats().hits, 1);
        assert_eq!(first.compiler().compiled.get(), 2);

        let mut second = registry(RegistryConfig::with_cache_dir(temp.path()));
        let c = parsed(&mut second);
        second.compile_program(c, "Main", "P0").unwrap();
        assert_eq!(second.cache_stats().hits, 1);
        assert_eq!(second.compiler().compiled.get(), 0);
    }

    #[test]
    fn driver_change_or_refusal_falls_back_to_compiling() {
        let temp = tempfile::tempdir().unwrap();
        let mut first = registry(RegistryConfig::with_cache_dir(temp.path()));
        let a = parsed(&mut first);
        first.compile_program(a, "Main", "P0").unwrap();

        let mut refusing = registry(RegistryConfig::with_cache_dir(temp.path()));
        refusing.context_mut().reject_next_programs(1);
        let c = parsed(&mut refusing);
        refusing.compile_program(c, "Main", "P0").unwrap();
        let stats = refusing.cache_stats();
        assert_eq!((stats.hits, stats.rejected), (1, 1));
        assert_eq!(refusing.compiler().compiled.get(), 2);

        let mut other_driver = EffectRegistry::new(
            RegistryConfig::with_cache_dir(temp.path()),
            FakeCompiler::default(),
            HeadlessContext::with_signature("another-driver"),
        );
        let b = parsed(&mut other_driver);
        other_driver.compile_program(b, "Main", "P0").unwrap();
        assert_eq!(other_driver.cache_stats().hits, 0);
        assert_eq!(other_driver.compiler().compiled.get(), 2);
    }

    #[test]
    fn cache_directory_can_be_changed_and_disabled() {
        let temp = tempfile::tempdir().unwrap();
        let mut registry = registry(RegistryConfig::default());
        assert_eq!(registry.cache_directory(), None);
        registry.set_cache_directory(Some(temp.path().to_path_buf()));
        assert_eq!(registry.cache_directory(), Some(temp.path()));
        registry.set_cache_directory(Some(PathBuf::new()));
        assert_eq!(registry.cache_directory(), None);

        let id = parsed(&mut registry);
        registry.compile_program(id, "Main", "P0").unwrap();
        assert_eq!(registry.cache_stats(), CacheStats::default());
    }

    #[test]
    fn compiled_fragment_reads_the_numbered_slots() {
        let mut registry = registry(RegistryConfig::default());
        let id = registry.create();
        registry
            .parse_memory(
                id,
                r"
vertex VS { void main() {} }
fragment FS {
    layout(binding = 5) uniform sampler2D detail;
    layout(binding = 0) uniform sampler2D albedo;
    uniform sampler2D mask;
    layout(location = 0) out vec4 color;
    void main() {}
}
technique T { pass P { vertex = VS; fragment = FS; } }
",
                None,
                &ParseOptions::default(),
            )
            .unwrap();
        registry.compile_program(id, "T", "P").unwrap();

        let sources = registry.compiler().sources.borrow();
        let fragment = sources
            .iter()
            .find(|source| source.stage == Stage::Fragment)
            .unwrap();
        for name in ["detail", "albedo", "mask"] {
            let slot = registry.texture_number(id, name).unwrap().unwrap();
            let declaration = format!("layout(set = 0, binding = {slot}) uniform sampler2D {name};");
            assert!(fragment.source.contains(&declaration), "{}", fragment.source);
        }
        assert_eq!(registry.texture_number(id, "detail").unwrap(), Some(5));
        assert_eq!(registry.texture_number(id, "mask").unwrap(), Some(1));
    }

    #[test]
    fn apply_unapply_round_trips_state_and_bindings() {
        let mut registry = registry(RegistryConfig::default());
        let id = parsed(&mut registry);
        let program = registry.compile_program(id, "Main", "P0").unwrap();
        let slot = registry.texture_number(id, "albedo").unwrap().unwrap();
        registry
            .set_texture(id, slot, TextureBinding::texture_2d(TextureId(12)))
            .unwrap();

        let before = registry.context().render_state();
        registry.apply(id, program).unwrap();
        let context = registry.context();
        assert_eq!(context.current_program(), Some(program));
        assert_eq!(context.render_state().blend, BlendMode::Alpha);
        assert!(context.render_state().depth_test);
        assert_eq!(context.bound_texture(slot).map(|b| b.texture), Some(TextureId(12)));
        assert!(context.bound_sampler(slot).is_some());

        assert!(matches!(registry.apply(id, program), Err(EffectError::AlreadyApplied)));
        registry.reapply(id, program).unwrap();

        registry.unapply(id).unwrap();
        let context = registry.context();
        assert_eq!(context.render_state(), before);
        assert_eq!(context.current_program(), None);
        assert!(context.bound_texture(slot).is_none());
        assert!(matches!(registry.unapply(id), Err(EffectError::NotApplied)));
        assert!(matches!(registry.reapply(id, program), Err(EffectError::NotApplied)));
    }

    #[test]
    fn apply_pass_state_pushes_only_directives() {
        let mut registry = registry(RegistryConfig::default());
        let id = parsed(&mut registry);
        let program = registry.compile_program(id, "Main", "P1").unwrap();
        registry.apply_pass_state(id, program).unwrap();
        assert_eq!(registry.context().render_state().cull, crate::state::CullMode::Back);
        assert_eq!(registry.context().current_program(), None);
        assert!(!registry.is_applied(id).unwrap());
    }

    #[test]
    fn programs_and_bindings_belong_to_one_effect() {
        let mut registry = registry(RegistryConfig::default());
        let a = parsed(&mut registry);
        let b = parsed(&mut registry);
        let program_a = registry.compile_program(a, "Main", "P0").unwrap();
        assert!(matches!(
            registry.apply(b, program_a),
            Err(EffectError::UnknownProgram(_))
        ));

        registry
            .set_texture(a, 0, TextureBinding::texture_2d(TextureId(5)))
            .unwrap();
        let slots_b = registry.effect(b).unwrap().resources().textures();
        assert!(slots_b[0].binding.is_none());
    }

    #[test]
    fn copy_log_truncates_and_terminates() {
        let mut registry = registry(RegistryConfig::default());
        let id = registry.create();
        registry
            .parse_memory(id, "pass", Some("x.fx"), &ParseOptions::default())
            .unwrap_err();
        let log = registry.log(id).unwrap().to_string();

        let mut small = [0xffu8; 8];
        assert_eq!(registry.copy_log(id, &mut small).unwrap(), 7);
        assert_eq!(&small[..7], &log.as_bytes()[..7]);
        assert_eq!(small[7], 0);

        let mut large = vec![0xffu8; log.len() + 10];
        assert_eq!(registry.copy_log(id, &mut large).unwrap(), log.len());
        assert_eq!(large[log.len()], 0);

        assert_eq!(registry.copy_log(id, &mut []).unwrap(), 0);
        registry.clear_log(id).unwrap();
        assert_eq!(registry.log(id).unwrap(), "");
    }

    #[test]
    fn delete_releases_context_objects() {
        let mut registry = registry(RegistryConfig::default());
        let id = parsed(&mut registry);
        let program = registry.compile_program(id, "Main", "P0").unwrap();
        registry
            .set_texture(id, 0, TextureBinding::texture_2d(TextureId(1)))
            .unwrap();
        registry.apply(id, program).unwrap();

        registry.delete(id).unwrap();
        let context = registry.context();
        assert_eq!(context.program_count(), 0);
        assert_eq!(context.sampler_count(), 0);
        assert_eq!(context.current_program(), None);
    }
}
