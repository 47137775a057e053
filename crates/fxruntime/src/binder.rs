//! Per-effect resource table: which texture, image, and sampler each named
//! shader resource is bound to. Slots come from the parsed document and are
//! the unit numbers pushed to the context, matching the bindings the
//! assembled program reads. Values are recorded by the caller and only
//! reach the context on apply.
use fxlang::{AddressMode, EffectDocument, FilterMode, ResourceDecl, SamplerStateDecl};
use serde::Serialize;
use tracing::debug;

use crate::context::{ContextError, GraphicsContext, SamplerId, TextureId};
use crate::error::{EffectError, ResourceKind};

/// Everything recorded by `set_texture` for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TextureBinding {
    pub texture: TextureId,
    /// 1, 2, or 3.
    pub dims: u8,
    pub depth: u32,
    /// Caller-defined format code, forwarded untouched.
    pub format: u32,
    /// Binds an image unit instead of a texture unit.
    pub write: bool,
    pub write_mip: u32,
    pub layered: bool,
    pub layer: u32,
    pub cubemap: bool,
}

impl TextureBinding {
    pub fn texture_2d(texture: TextureId) -> Self {
        Self {
            texture,
            dims: 2,
            ..Self::default()
        }
    }

    pub fn image_2d(texture: TextureId, format: u32) -> Self {
        Self {
            texture,
            dims: 2,
            format,
            write: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SamplerDesc {
    pub filter: FilterMode,
    pub mip_filter: FilterMode,
    pub address: AddressMode,
}

impl From<&SamplerStateDecl> for SamplerDesc {
    fn from(decl: &SamplerStateDecl) -> Self {
        Self {
            filter: decl.filter,
            mip_filter: decl.mip_filter,
            address: decl.address,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceSlot {
    pub decl: ResourceDecl,
    pub binding: Option<TextureBinding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplerSlot {
    pub decl: SamplerStateDecl,
    /// Set by `set_sampler_state`; wins over `created`.
    pub assigned: Option<SamplerId>,
    /// Created by the runtime from the declared attributes.
    pub created: Option<SamplerId>,
}

impl SamplerSlot {
    pub fn sampler(&self) -> Option<SamplerId> {
        self.assigned.or(self.created)
    }
}

/// Units pushed to the context by the last bind, so unapply can clear
/// exactly those.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundUnits {
    pub textures: Vec<usize>,
    pub images: Vec<usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResourceTable {
    textures: Vec<ResourceSlot>,
    images: Vec<ResourceSlot>,
    samplers: Vec<SamplerSlot>,
}

impl ResourceTable {
    pub fn from_document(document: &EffectDocument) -> Self {
        let slots = |decls: &[ResourceDecl]| {
            decls
                .iter()
                .map(|decl| ResourceSlot {
                    decl: decl.clone(),
                    binding: None,
                })
                .collect()
        };
        Self {
            textures: slots(&document.textures),
            images: slots(&document.images),
            samplers: document
                .sampler_states
                .iter()
                .map(|decl| SamplerSlot {
                    decl: decl.clone(),
                    assigned: None,
                    created: None,
                })
                .collect(),
        }
    }

    pub fn textures(&self) -> &[ResourceSlot] {
        &self.textures
    }

    pub fn images(&self) -> &[ResourceSlot] {
        &self.images
    }

    pub fn samplers(&self) -> &[SamplerSlot] {
        &self.samplers
    }

    pub fn texture_number(&self, name: &str) -> Option<usize> {
        slot_of(&self.textures, name)
    }

    pub fn image_number(&self, name: &str) -> Option<usize> {
        slot_of(&self.images, name)
    }

    pub fn set_texture(&mut self, slot: usize, binding: TextureBinding) -> Result<(), EffectError> {
        let (kind, slots) = if binding.write {
            (ResourceKind::Image, &mut self.images)
        } else {
            (ResourceKind::Texture, &mut self.textures)
        };
        let count = slots.len();
        let entry = slots
            .iter_mut()
            .find(|entry| entry.decl.slot == slot)
            .ok_or(EffectError::SlotOutOfRange { kind, slot, count })?;
        debug!(resource = %entry.decl.name, %kind, slot, texture = binding.texture.0, "recorded binding");
        entry.binding = Some(binding);
        Ok(())
    }

    pub fn set_sampler_state(&mut self, name: &str, sampler: SamplerId) -> Result<(), EffectError> {
        let slot = self
            .samplers
            .iter_mut()
            .find(|slot| slot.decl.name == name)
            .ok_or_else(|| EffectError::UnknownResource(name.to_string()))?;
        slot.assigned = Some(sampler);
        Ok(())
    }

    fn sampler_for(&self, texture: &str) -> Option<usize> {
        self.samplers
            .iter()
            .position(|slot| slot.decl.textures.iter().any(|name| name == texture))
    }

    /// Pushes every recorded binding to the context. Samplers without an
    /// assigned object are created from their declaration on first use.
    pub fn bind(&mut self, context: &mut dyn GraphicsContext) -> Result<BoundUnits, ContextError> {
        let mut bound = BoundUnits::default();

        for index in 0..self.textures.len() {
            let slot = &self.textures[index];
            let Some(binding) = slot.binding else {
                continue;
            };
            let unit = slot.decl.slot;
            let sampler = self.sampler_for(&slot.decl.name);
            context.bind_texture(unit, Some(&binding));
            if let Some(sampler) = sampler {
                let sampler = self.ensure_sampler(sampler, context)?;
                context.bind_sampler(unit, Some(sampler));
            }
            bound.textures.push(unit);
        }

        for slot in &self.images {
            if let Some(binding) = &slot.binding {
                context.bind_image(slot.decl.slot, Some(binding));
                bound.images.push(slot.decl.slot);
            }
        }

        Ok(bound)
    }

    fn ensure_sampler(
        &mut self,
        index: usize,
        context: &mut dyn GraphicsContext,
    ) -> Result<SamplerId, ContextError> {
        let slot = &mut self.samplers[index];
        if let Some(sampler) = slot.sampler() {
            return Ok(sampler);
        }
        let sampler = context.create_sampler(&SamplerDesc::from(&slot.decl))?;
        debug!(state = %slot.decl.name, sampler = sampler.0, "created sampler");
        slot.created = Some(sampler);
        Ok(sampler)
    }

    pub fn unbind(bound: &BoundUnits, context: &mut dyn GraphicsContext) {
        for &unit in &bound.textures {
            context.bind_texture(unit, None);
            context.bind_sampler(unit, None);
        }
        for &unit in &bound.images {
            context.bind_image(unit, None);
        }
    }

    /// Deletes samplers this table created. Assigned samplers belong to the
    /// caller and are left alone.
    pub fn release(&mut self, context: &mut dyn GraphicsContext) {
        for slot in &mut self.samplers {
            if let Some(sampler) = slot.created.take() {
                context.delete_sampler(sampler);
            }
        }
    }
}

fn slot_of(slots: &[ResourceSlot], name: &str) -> Option<usize> {
    slots
        .iter()
        .find(|slot| slot.decl.name == name)
        .map(|slot| slot.decl.slot)
}
