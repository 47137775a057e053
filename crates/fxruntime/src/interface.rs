//! Location-qualified stage inputs and outputs, read from assembled GLSL.
//! The linker matches one stage's outputs against the next stage's inputs
//! with these, independently of which compiler produced the binaries.
use fxlang::glsl_tokens;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceVar {
    pub location: u32,
    pub glsl_type: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInterface {
    pub inputs: Vec<InterfaceVar>,
    pub outputs: Vec<InterfaceVar>,
}

const INTERPOLATION: &[&str] = &[
    "flat",
    "smooth",
    "noperspective",
    "centroid",
    "sample",
    "patch",
    "invariant",
    "highp",
    "mediump",
    "lowp",
];

impl StageInterface {
    /// Collects `layout(location = N) [qualifiers] in|out TYPE name;`.
    /// Interface blocks and variables without an explicit location are
    /// skipped.
    pub fn scan(source: &str) -> Self {
        let tokens = glsl_tokens(source);
        let mut interface = Self::default();
        let mut index = 0;

        while index < tokens.len() {
            if tokens[index] != "layout" || tokens.get(index + 1).map(String::as_str) != Some("(") {
                index += 1;
                continue;
            }
            index += 2;

            let mut location = None;
            while index < tokens.len() && tokens[index] != ")" {
                if tokens[index] == "location" && tokens.get(index + 1).map(String::as_str) == Some("=") {
                    location = tokens.get(index + 2).and_then(|value| parse_int(value));
                    index += 2;
                }
                index += 1;
            }
            index += 1;

            while index < tokens.len() && INTERPOLATION.contains(&tokens[index].as_str()) {
                index += 1;
            }
            let direction = tokens.get(index).map(String::as_str);
            let (Some(location), Some(direction @ ("in" | "out"))) = (location, direction) else {
                continue;
            };
            let (Some(glsl_type), Some(name)) = (tokens.get(index + 1), tokens.get(index + 2)) else {
                break;
            };
            if name == "{" {
                index += 1;
                continue;
            }

            let var = InterfaceVar {
                location,
                glsl_type: glsl_type.clone(),
                name: name.clone(),
            };
            if direction == "in" {
                interface.inputs.push(var);
            } else {
                interface.outputs.push(var);
            }
            index += 3;
        }

        interface
    }

    pub fn output(&self, location: u32) -> Option<&InterfaceVar> {
        self.outputs.iter().find(|var| var.location == location)
    }
}

fn parse_int(token: &str) -> Option<u32> {
    match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex.trim_end_matches(['u', 'U']), 16).ok(),
        None => token.trim_end_matches(['u', 'U']).parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_located_inputs_and_outputs() {
        let interface = StageInterface::scan(
            r"
            layout(location = 0) in vec3 position;
            layout(location=1) in vec2 uv;
            layout(location = 0) flat out int instance;
            layout(location = 1) out vec2 v_uv;
            layout(std140, binding = 0) uniform Globals { mat4 view; };
            in vec4 legacy;
            // layout(location = 5) out vec4 commented;
            ",
        );
        let inputs: Vec<_> = interface.inputs.iter().map(|v| (v.location, v.name.as_str())).collect();
        assert_eq!(inputs, vec![(0, "position"), (1, "uv")]);
        assert_eq!(interface.outputs.len(), 2);
        assert_eq!(interface.output(0).unwrap().glsl_type, "int");
        assert!(interface.output(5).is_none());
    }

    #[test]
    fn skips_interface_blocks() {
        let interface = StageInterface::scan(
            "layout(location = 0) out VertexData { vec2 uv; } vout;\nlayout(location = 2) out vec4 color;",
        );
        assert_eq!(interface.outputs.len(), 1);
        assert_eq!(interface.outputs[0].location, 2);
    }
}
