use fxlang::EffectDocument;

use crate::binder::{BoundUnits, ResourceTable};
use crate::cache::CacheKey;
use crate::context::ProgramId;
use crate::state::{RenderState, StateOverrides};

/// A pass compiled under the effect's current document.
#[derive(Debug, Clone)]
pub struct CompiledPass {
    pub technique: usize,
    pub pass: usize,
    pub program: ProgramId,
    pub state: StateOverrides,
    /// `None` when the cache was disabled at compile time.
    pub key: Option<CacheKey>,
}

#[derive(Debug, Clone, Default)]
pub enum ApplyState {
    #[default]
    Unapplied,
    Applied {
        program: ProgramId,
        /// Context state captured by `apply`, restored by `unapply`.
        saved: RenderState,
        bound: BoundUnits,
    },
}

impl ApplyState {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyState::Applied { .. })
    }
}

#[derive(Debug, Default)]
pub struct Effect {
    pub(crate) document: EffectDocument,
    pub(crate) programs: Vec<CompiledPass>,
    pub(crate) resources: ResourceTable,
    pub(crate) apply: ApplyState,
    pub(crate) active_group: Option<usize>,
    pub(crate) log: String,
}

impl Effect {
    pub fn document(&self) -> &EffectDocument {
        &self.document
    }

    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    pub fn apply_state(&self) -> &ApplyState {
        &self.apply
    }

    pub fn programs(&self) -> &[CompiledPass] {
        &self.programs
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub(crate) fn append_log(&mut self, message: &str) {
        self.log.push_str(message.trim_end());
        self.log.push('\n');
    }

    pub(crate) fn compiled(&self, technique: usize, pass: usize) -> Option<&CompiledPass> {
        self.programs
            .iter()
            .find(|compiled| compiled.technique == technique && compiled.pass == pass)
    }

    pub(crate) fn compiled_program(&self, program: ProgramId) -> Option<&CompiledPass> {
        self.programs
            .iter()
            .find(|compiled| compiled.program == program)
    }

    /// Replaces the document and everything derived from it.
    pub(crate) fn replace_document(&mut self, document: EffectDocument) {
        self.resources = ResourceTable::from_document(&document);
        self.document = document;
        self.programs.clear();
        self.active_group = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_lines_are_newline_terminated() {
        let mut effect = Effect::default();
        effect.append_log("a.fx:3: unexpected '}'\n");
        effect.append_log("second");
        assert_eq!(effect.log(), "a.fx:3: unexpected '}'\nsecond\n");
    }
}
