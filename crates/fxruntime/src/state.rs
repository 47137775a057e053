//! Fixed-function render state and the pass directives that modify it.
//!
//! Types:
//!
//! - `RenderState` is the full state a context tracks; defaults match a fresh
//!   GL context (blend off, depth test off, depth write on, `less`, no
//!   culling, counter-clockwise front faces, colour writes on, filled
//!   polygons).
//! - `StateOverrides` is what one pass sets. Keys a pass does not mention
//!   keep whatever the context had when the pass was applied.
//!
//! Functions:
//!
//! - `StateOverrides::from_directives` interprets `key = value;` lines from a
//!   pass and rejects unknown keys or values.
//! - `RenderState::blend_state`, `color_writes`, `depth_stencil_state`, and
//!   `primitive_state` translate the state for a wgpu pipeline builder.
use std::fmt;

use fxlang::{Directive, Location};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Off,
    Alpha,
    Additive,
    Premultiplied,
    Multiply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontFace {
    #[default]
    Ccw,
    Cw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenderState {
    pub blend: BlendMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: DepthFunc,
    pub cull: CullMode,
    pub front_face: FrontFace,
    pub color_write: bool,
    pub polygon: PolygonMode,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            blend: BlendMode::Off,
            depth_test: false,
            depth_write: true,
            depth_func: DepthFunc::Less,
            cull: CullMode::None,
            front_face: FrontFace::Ccw,
            color_write: true,
            polygon: PolygonMode::Fill,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{location}: {kind}")]
pub struct DirectiveError {
    pub location: Location,
    pub kind: DirectiveErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveErrorKind {
    #[error("unknown render state '{0}'")]
    UnknownKey(String),
    #[error("invalid value '{value}' for '{key}' (expected {expected})")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// The subset of `RenderState` a pass sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StateOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blend: Option<BlendMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_test: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_write: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_func: Option<DepthFunc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cull: Option<CullMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front_face: Option<FrontFace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_write: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polygon: Option<PolygonMode>,
}

impl StateOverrides {
    /// Later directives for the same key win.
    pub fn from_directives(directives: &[Directive]) -> Result<Self, DirectiveError> {
        let mut overrides = Self::default();
        for directive in directives {
            overrides
                .set(&directive.key, &directive.value)
                .map_err(|kind| DirectiveError {
                    location: directive.location.clone(),
                    kind,
                })?;
        }
        Ok(overrides)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), DirectiveErrorKind> {
        let invalid = |expected: &'static str| DirectiveErrorKind::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected,
        };
        match key {
            "blend" => {
                self.blend = Some(match value {
                    "off" | "none" => BlendMode::Off,
                    "alpha" => BlendMode::Alpha,
                    "additive" | "add" => BlendMode::Additive,
                    "premultiplied" => BlendMode::Premultiplied,
                    "multiply" => BlendMode::Multiply,
                    _ => return Err(invalid("off, alpha, additive, premultiplied, or multiply")),
                })
            }
            "depth_test" => self.depth_test = Some(parse_switch(value).ok_or_else(|| invalid(SWITCH))?),
            "depth_write" => self.depth_write = Some(parse_switch(value).ok_or_else(|| invalid(SWITCH))?),
            "color_write" => self.color_write = Some(parse_switch(value).ok_or_else(|| invalid(SWITCH))?),
            "depth_func" => {
                self.depth_func = Some(match value {
                    "never" => DepthFunc::Never,
                    "less" => DepthFunc::Less,
                    "equal" => DepthFunc::Equal,
                    "less_equal" | "lequal" => DepthFunc::LessEqual,
                    "greater" => DepthFunc::Greater,
                    "not_equal" | "notequal" => DepthFunc::NotEqual,
                    "greater_equal" | "gequal" => DepthFunc::GreaterEqual,
                    "always" => DepthFunc::Always,
                    _ => return Err(invalid("a comparison function")),
                })
            }
            "cull" => {
                self.cull = Some(match value {
                    "none" | "off" => CullMode::None,
                    "front" => CullMode::Front,
                    "back" => CullMode::Back,
                    _ => return Err(invalid("none, front, or back")),
                })
            }
            "front_face" => {
                self.front_face = Some(match value {
                    "ccw" => FrontFace::Ccw,
                    "cw" => FrontFace::Cw,
                    _ => return Err(invalid("ccw or cw")),
                })
            }
            "polygon" => {
                self.polygon = Some(match value {
                    "fill" => PolygonMode::Fill,
                    "line" => PolygonMode::Line,
                    "point" => PolygonMode::Point,
                    _ => return Err(invalid("fill, line, or point")),
                })
            }
            other => return Err(DirectiveErrorKind::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, base: RenderState) -> RenderState {
        RenderState {
            blend: self.blend.unwrap_or(base.blend),
            depth_test: self.depth_test.unwrap_or(base.depth_test),
            depth_write: self.depth_write.unwrap_or(base.depth_write),
            depth_func: self.depth_func.unwrap_or(base.depth_func),
            cull: self.cull.unwrap_or(base.cull),
            front_face: self.front_face.unwrap_or(base.front_face),
            color_write: self.color_write.unwrap_or(base.color_write),
            polygon: self.polygon.unwrap_or(base.polygon),
        }
    }
}

const SWITCH: &str = "on or off";

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "blend={:?} depth_test={} depth_write={} depth_func={:?} cull={:?} front_face={:?} color_write={} polygon={:?}",
            self.blend,
            self.depth_test,
            self.depth_write,
            self.depth_func,
            self.cull,
            self.front_face,
            self.color_write,
            self.polygon
        )
    }
}

impl RenderState {
    pub fn blend_state(&self) -> Option<wgpu::BlendState> {
        use wgpu::{BlendComponent, BlendFactor, BlendOperation, BlendState};

        let component = |src_factor, dst_factor| BlendComponent {
            src_factor,
            dst_factor,
            operation: BlendOperation::Add,
        };
        match self.blend {
            BlendMode::Off => None,
            BlendMode::Alpha => Some(BlendState::ALPHA_BLENDING),
            BlendMode::Premultiplied => Some(BlendState::PREMULTIPLIED_ALPHA_BLENDING),
            BlendMode::Additive => Some(BlendState {
                color: component(BlendFactor::SrcAlpha, BlendFactor::One),
                alpha: component(BlendFactor::One, BlendFactor::One),
            }),
            BlendMode::Multiply => Some(BlendState {
                color: component(BlendFactor::Dst, BlendFactor::Zero),
                alpha: component(BlendFactor::DstAlpha, BlendFactor::Zero),
            }),
        }
    }

    pub fn color_writes(&self) -> wgpu::ColorWrites {
        if self.color_write {
            wgpu::ColorWrites::ALL
        } else {
            wgpu::ColorWrites::empty()
        }
    }

    /// `None` when depth testing is off; wgpu has no separate depth-write
    /// switch without a depth attachment.
    pub fn depth_stencil_state(&self, format: wgpu::TextureFormat) -> Option<wgpu::DepthStencilState> {
        if !self.depth_test {
            return None;
        }
        let depth_compare = match self.depth_func {
            DepthFunc::Never => wgpu::CompareFunction::Never,
            DepthFunc::Less => wgpu::CompareFunction::Less,
            DepthFunc::Equal => wgpu::CompareFunction::Equal,
            DepthFunc::LessEqual => wgpu::CompareFunction::LessEqual,
            DepthFunc::Greater => wgpu::CompareFunction::Greater,
            DepthFunc::NotEqual => wgpu::CompareFunction::NotEqual,
            DepthFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            DepthFunc::Always => wgpu::CompareFunction::Always,
        };
        Some(wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.depth_write,
            depth_compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        })
    }

    pub fn primitive_state(&self) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: match self.front_face {
                FrontFace::Ccw => wgpu::FrontFace::Ccw,
                FrontFace::Cw => wgpu::FrontFace::Cw,
            },
            cull_mode: match self.cull {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            polygon_mode: match self.polygon {
                PolygonMode::Fill => wgpu::PolygonMode::Fill,
                PolygonMode::Line => wgpu::PolygonMode::Line,
                PolygonMode::Point => wgpu::PolygonMode::Point,
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive(key: &str, value: &str) -> Directive {
        Directive {
            key: key.into(),
            value: value.into(),
            location: Location::new("test.fx", 4),
        }
    }

    #[test]
    fn overrides_only_touch_named_keys() {
        let overrides = StateOverrides::from_directives(&[
            directive("blend", "alpha"),
            directive("depth_test", "true"),
            directive("cull", "back"),
        ])
        .unwrap();
        let base = RenderState {
            depth_write: false,
            polygon: PolygonMode::Line,
            ..RenderState::default()
        };
        let applied = overrides.apply_to(base);
        assert_eq!(applied.blend, BlendMode::Alpha);
        assert!(applied.depth_test);
        assert_eq!(applied.cull, CullMode::Back);
        assert!(!applied.depth_write);
        assert_eq!(applied.polygon, PolygonMode::Line);
    }

    #[test]
    fn later_directive_wins() {
        let overrides =
            StateOverrides::from_directives(&[directive("blend", "alpha"), directive("blend", "off")])
                .unwrap();
        assert_eq!(overrides.blend, Some(BlendMode::Off));
    }

    #[test]
    fn rejects_unknown_key_and_value_with_location() {
        let err = StateOverrides::from_directives(&[directive("stencil", "on")]).unwrap_err();
        assert_eq!(err.kind, DirectiveErrorKind::UnknownKey("stencil".into()));
        assert_eq!(err.to_string(), "test.fx:4: unknown render state 'stencil'");

        let err = StateOverrides::from_directives(&[directive("depth_test", "maybe")]).unwrap_err();
        assert!(matches!(err.kind, DirectiveErrorKind::InvalidValue { .. }));
    }

    #[test]
    fn translates_to_wgpu_state() {
        let state = StateOverrides::from_directives(&[
            directive("blend", "alpha"),
            directive("depth_test", "on"),
            directive("depth_write", "off"),
            directive("depth_func", "less_equal"),
            directive("color_write", "off"),
            directive("front_face", "cw"),
        ])
        .unwrap()
        .apply_to(RenderState::default());

        assert_eq!(state.blend_state(), Some(wgpu::BlendState::ALPHA_BLENDING));
        assert_eq!(state.color_writes(), wgpu::ColorWrites::empty());
        let depth = state
            .depth_stencil_state(wgpu::TextureFormat::Depth32Float)
            .unwrap();
        assert!(!depth.depth_write_enabled);
        assert_eq!(depth.depth_compare, wgpu::CompareFunction::LessEqual);
        assert_eq!(state.primitive_state().front_face, wgpu::FrontFace::Cw);
        assert!(RenderState::default()
            .depth_stencil_state(wgpu::TextureFormat::Depth32Float)
            .is_none());
    }
}
