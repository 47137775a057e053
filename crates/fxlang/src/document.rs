//! Structured form of a parsed effect. The parser fills an `EffectDocument`
//! once per successful parse and the runtime only ever reads it, so every
//! lookup here is by shared reference and the layout favours declaration
//! order (techniques and passes enumerate exactly as written).
//!
//! Types:
//!
//! - `Stage` enumerates the GLSL pipeline stages a block can target, ordered
//!   the way the pipeline executes them.
//! - `ShaderBlock` holds the verbatim, macro-substituted GLSL of one block.
//! - `Technique`, `Pass`, and `TechniqueGroup` describe the rendering
//!   strategies; passes keep render-state directives as raw text.
//! - `ResourceDecl` and `SamplerStateDecl` describe textures, images, and
//!   sampler states the resource binder numbers and binds.
//!
//! Functions:
//!
//! - `EffectDocument::technique_by_name`, `technique_index`, and the group
//!   helpers back the registry's enumeration queries.
//! - `EffectDocument::stage_blocks` yields the blocks a pass links, in
//!   pipeline order, for source assembly.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Location;
use crate::source::MacroSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Vertex,
    TessControl,
    TessEval,
    Geometry,
    Fragment,
    Compute,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Vertex,
        Stage::TessControl,
        Stage::TessEval,
        Stage::Geometry,
        Stage::Fragment,
        Stage::Compute,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::TessControl => "tess_control",
            Stage::TessEval => "tess_eval",
            Stage::Geometry => "geometry",
            Stage::Fragment => "fragment",
            Stage::Compute => "compute",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.keyword() == word)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShaderBlock {
    pub name: String,
    pub stage: Stage,
    pub source: String,
    pub location: Location,
}

/// Unnamed or named GLSL that is prepended to every stage.
#[derive(Debug, Clone, Serialize)]
pub struct CommonBlock {
    pub name: Option<String>,
    pub source: String,
    pub location: Location,
}

/// A single `key = value;` line inside a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directive {
    pub key: String,
    pub value: String,
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageRef {
    pub stage: Stage,
    /// Index into `EffectDocument::blocks`.
    pub block: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pass {
    pub name: String,
    pub stages: Vec<StageRef>,
    pub directives: Vec<Directive>,
    pub location: Location,
}

impl Pass {
    pub fn uses_stage(&self, stage: Stage) -> bool {
        self.stages.iter().any(|entry| entry.stage == stage)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Technique {
    pub name: String,
    /// Index into `EffectDocument::groups` when declared inside a group.
    pub group: Option<usize>,
    pub passes: Vec<Pass>,
    pub location: Location,
}

impl Technique {
    pub fn pass(&self, name: &str) -> Option<&Pass> {
        self.passes.iter().find(|pass| pass.name == name)
    }

    pub fn pass_index(&self, name: &str) -> Option<usize> {
        self.passes.iter().position(|pass| pass.name == name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TechniqueGroup {
    pub name: String,
    /// Indices into `EffectDocument::techniques`, in declaration order.
    pub techniques: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Texture,
    Image,
}

/// An opaque uniform (`sampler*` or `image*`) found in the effect's GLSL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDecl {
    pub name: String,
    pub kind: ResourceKind,
    pub glsl_type: String,
    pub dims: u8,
    pub cubemap: bool,
    pub layered: bool,
    /// `layout(binding = N)` as written in the source.
    pub binding: Option<u32>,
    /// Binding the program reads this resource from. Textures and images
    /// are numbered separately.
    pub slot: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressMode {
    #[default]
    Repeat,
    Clamp,
    Mirror,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SamplerStateDecl {
    pub name: String,
    pub textures: Vec<String>,
    pub filter: FilterMode,
    pub mip_filter: FilterMode,
    pub address: AddressMode,
    pub location: Location,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EffectDocument {
    pub filename: String,
    pub macros: MacroSet,
    pub common: Vec<CommonBlock>,
    pub blocks: Vec<ShaderBlock>,
    pub techniques: Vec<Technique>,
    pub groups: Vec<TechniqueGroup>,
    pub textures: Vec<ResourceDecl>,
    pub images: Vec<ResourceDecl>,
    pub sampler_states: Vec<SamplerStateDecl>,
}

impl EffectDocument {
    pub fn technique_count(&self) -> usize {
        self.techniques.len()
    }

    pub fn technique(&self, index: usize) -> Option<&Technique> {
        self.techniques.get(index)
    }

    pub fn technique_by_name(&self, name: &str) -> Option<&Technique> {
        self.techniques.iter().find(|technique| technique.name == name)
    }

    pub fn technique_index(&self, name: &str) -> Option<usize> {
        self.techniques
            .iter()
            .position(|technique| technique.name == name)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn group_name(&self, index: usize) -> Option<&str> {
        self.groups.get(index).map(|group| group.name.as_str())
    }

    /// Techniques of one group, or the ungrouped ones when `group` is `None`.
    pub fn techniques_in_group(&self, group: Option<usize>) -> impl Iterator<Item = &Technique> {
        self.techniques
            .iter()
            .filter(move |technique| technique.group == group)
    }

    pub fn block(&self, name: &str) -> Option<&ShaderBlock> {
        self.blocks.iter().find(|block| block.name == name)
    }

    pub fn stage_blocks<'a>(
        &'a self,
        pass: &'a Pass,
    ) -> impl Iterator<Item = (Stage, &'a ShaderBlock)> + 'a {
        let mut refs = pass.stages.clone();
        refs.sort_by_key(|entry| entry.stage);
        refs.into_iter()
            .filter_map(move |entry| self.blocks.get(entry.block).map(|block| (entry.stage, block)))
    }

    /// Slot of the named texture.
    pub fn texture_index(&self, name: &str) -> Option<usize> {
        self.textures
            .iter()
            .find(|decl| decl.name == name)
            .map(|decl| decl.slot)
    }

    pub fn image_index(&self, name: &str) -> Option<usize> {
        self.images
            .iter()
            .find(|decl| decl.name == name)
            .map(|decl| decl.slot)
    }

    pub fn sampler_state(&self, name: &str) -> Option<&SamplerStateDecl> {
        self.sampler_states.iter().find(|state| state.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass_with(stages: &[(Stage, usize)]) -> Pass {
        Pass {
            name: "P0".into(),
            stages: stages
                .iter()
                .map(|(stage, block)| StageRef {
                    stage: *stage,
                    block: *block,
                })
                .collect(),
            directives: vec![],
            location: Location::new("memory", 1),
        }
    }

    fn block(name: &str, stage: Stage) -> ShaderBlock {
        ShaderBlock {
            name: name.into(),
            stage,
            source: String::new(),
            location: Location::new("memory", 1),
        }
    }

    #[test]
    fn stage_keywords_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_keyword(stage.keyword()), Some(stage));
        }
        assert_eq!(Stage::from_keyword("pixel"), None);
    }

    #[test]
    fn stage_blocks_follow_pipeline_order() {
        let document = EffectDocument {
            blocks: vec![block("FS", Stage::Fragment), block("VS", Stage::Vertex)],
            ..Default::default()
        };
        let pass = pass_with(&[(Stage::Fragment, 0), (Stage::Vertex, 1)]);
        let order: Vec<_> = document
            .stage_blocks(&pass)
            .map(|(stage, block)| (stage, block.name.as_str()))
            .collect();
        assert_eq!(order, vec![(Stage::Vertex, "VS"), (Stage::Fragment, "FS")]);
    }

    #[test]
    fn serializes_for_tooling() {
        let document = crate::parse_str(
            "vertex VS { }\nfragment FS { uniform sampler2D albedo; }\ntechnique T { pass P { vertex = VS; fragment = FS; cull = back; } }",
            Some("tool.fx"),
            &crate::ParseOptions::default(),
        )
        .unwrap();
        let json = serde_json::to_value(&document).unwrap();
        assert_eq!(json["filename"], "tool.fx");
        assert_eq!(json["blocks"][1]["stage"], "fragment");
        assert_eq!(json["techniques"][0]["passes"][0]["directives"][0]["key"], "cull");
        assert_eq!(json["textures"][0]["name"], "albedo");
        assert_eq!(json["techniques"][0]["passes"][0]["location"]["line"], 3);
    }
}
