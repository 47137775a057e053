//! Finds opaque uniforms (`sampler*`, `image*`) in GLSL so the resource
//! binder can number them without asking the driver. The scan is lexical:
//! comments are blanked out, then every `uniform` declaration is read up to
//! its semicolon together with the `layout(...)` in front of it.
//!
//! Slots are descriptor bindings. Textures live in `TEXTURE_SET`, images in
//! `IMAGE_SET`, so the two numberings never collide. `bind_resources`
//! rewrites declarations so the compiled program reads exactly the slots
//! `assign_slots` handed out.
use std::collections::BTreeSet;
use std::ops::Range;

use crate::document::{ResourceDecl, ResourceKind};
use crate::error::ParseErrorKind;
use crate::preprocess::{is_ident_char, is_ident_start};

pub const TEXTURE_SET: u32 = 0;
pub const IMAGE_SET: u32 = 1;

const QUALIFIERS: &[&str] = &[
    "lowp",
    "mediump",
    "highp",
    "readonly",
    "writeonly",
    "coherent",
    "volatile",
    "restrict",
    "const",
];

/// One `uniform` statement declaring samplers or images.
#[derive(Debug)]
struct OpaqueUniform {
    /// From `layout` (or `uniform` without one) through the `;`.
    span: Range<usize>,
    /// `layout` items other than `set` and `binding`, e.g. `rgba16f`.
    layout: Vec<String>,
    binding: Option<u32>,
    /// Qualifiers and type.
    ty: String,
    glsl_type: String,
    kind: ResourceKind,
    /// Name and declarator text (`name` or `name[4]`).
    declarators: Vec<(String, String)>,
}

/// Appends declarations found in `source` that are not already present.
/// A `layout(binding = N)` is recorded on the first declarator only.
pub fn collect_resources(source: &str, textures: &mut Vec<ResourceDecl>, images: &mut Vec<ResourceDecl>) {
    let masked = mask_comments(source);
    for uniform in opaque_uniforms(&masked) {
        let list = match uniform.kind {
            ResourceKind::Texture => &mut *textures,
            ResourceKind::Image => &mut *images,
        };
        for (position, (name, _)) in uniform.declarators.iter().enumerate() {
            let binding = uniform.binding.filter(|_| position == 0);
            match list.iter_mut().find(|existing| existing.name == *name) {
                Some(existing) => {
                    if existing.binding.is_none() {
                        existing.binding = binding;
                    }
                }
                None => list.push(describe(name, &uniform.glsl_type, uniform.kind, binding)),
            }
        }
    }
}

/// Gives every declaration its slot: the explicit binding when there is
/// one, otherwise the lowest number nobody claims, in declaration order.
pub fn assign_slots(decls: &mut [ResourceDecl]) -> Result<(), ParseErrorKind> {
    let mut taken = BTreeSet::new();
    for (index, decl) in decls.iter().enumerate() {
        let Some(binding) = decl.binding else {
            continue;
        };
        if !taken.insert(binding) {
            let first = decls[..index]
                .iter()
                .find(|other| other.binding == Some(binding))
                .map(|other| other.name.clone())
                .unwrap_or_default();
            return Err(ParseErrorKind::BindingConflict {
                binding,
                first,
                second: decl.name.clone(),
            });
        }
    }

    let mut next = 0;
    for decl in decls.iter_mut() {
        let slot = match decl.binding {
            Some(binding) => binding,
            None => {
                while taken.contains(&next) {
                    next += 1;
                }
                taken.insert(next);
                next
            }
        };
        decl.slot = slot as usize;
    }
    Ok(())
}

/// Rewrites every opaque uniform declaration in `source` to carry the set
/// and binding of its slot, one declaration per name. Line breaks inside a
/// rewritten declaration are kept so compiler diagnostics keep their line
/// numbers. Declarations naming unknown resources are left as written.
pub fn bind_resources(source: &str, textures: &[ResourceDecl], images: &[ResourceDecl]) -> String {
    let masked = mask_comments(source);
    let uniforms = opaque_uniforms(&masked);
    if uniforms.is_empty() {
        return source.to_string();
    }

    let mut out = String::with_capacity(source.len() + 32 * uniforms.len());
    let mut cursor = 0;
    for uniform in &uniforms {
        let (set, decls) = match uniform.kind {
            ResourceKind::Texture => (TEXTURE_SET, textures),
            ResourceKind::Image => (IMAGE_SET, images),
        };
        let statements: Option<Vec<String>> = uniform
            .declarators
            .iter()
            .map(|(name, declarator)| {
                let decl = decls.iter().find(|decl| decl.name == *name)?;
                let mut layout = uniform.layout.clone();
                layout.push(format!("set = {set}"));
                layout.push(format!("binding = {}", decl.slot));
                Some(format!(
                    "layout({}) uniform {} {declarator};",
                    layout.join(", "),
                    uniform.ty
                ))
            })
            .collect();
        let Some(statements) = statements else {
            continue;
        };

        out.push_str(&source[cursor..uniform.span.start]);
        out.push_str(&statements.join(" "));
        let breaks = source[uniform.span.clone()].matches('\n').count();
        out.extend(std::iter::repeat('\n').take(breaks));
        cursor = uniform.span.end;
    }
    out.push_str(&source[cursor..]);
    out
}

fn opaque_uniforms(masked: &str) -> Vec<OpaqueUniform> {
    let spans = token_spans(masked);
    let text = |index: usize| &masked[spans[index].clone()];
    let mut found = Vec::new();
    let mut index = 0;

    while index < spans.len() {
        if text(index) != "uniform" {
            index += 1;
            continue;
        }
        let (start, items) = layout_before(masked, &spans, index);
        index += 1;

        let ty_start = index;
        while index < spans.len() && QUALIFIERS.contains(&text(index)) {
            index += 1;
        }
        if index >= spans.len() {
            break;
        }
        let glsl_type = text(index).to_string();
        let ty = (ty_start..=index).map(text).collect::<Vec<_>>().join(" ");
        index += 1;

        // Declarator list: `a, b[4], c;`
        let mut declarators = Vec::new();
        let mut current: Option<(String, String)> = None;
        while index < spans.len() && text(index) != ";" {
            let token = text(index);
            if token == "," {
                declarators.extend(current.take());
            } else if let Some((_, declarator)) = &mut current {
                declarator.push_str(token);
            } else if token.bytes().next().is_some_and(is_ident_start) {
                current = Some((token.to_string(), token.to_string()));
            }
            index += 1;
        }
        declarators.extend(current.take());

        let Some(kind) = resource_kind(&glsl_type) else {
            continue;
        };
        let Some(end) = spans.get(index).map(|span| span.end) else {
            break;
        };

        let mut layout = Vec::new();
        let mut binding = None;
        for item in items {
            match item.first().map(String::as_str) {
                Some("binding") => binding = item.get(2).and_then(|value| parse_uint(value)),
                Some("set") => {}
                Some(_) => layout.push(item.join(" ")),
                None => {}
            }
        }

        found.push(OpaqueUniform {
            span: start..end,
            layout,
            binding,
            ty,
            glsl_type,
            kind,
            declarators,
        });
    }
    found
}

/// Start of the statement and the comma-separated `layout` items when a
/// `layout(...)` directly precedes the `uniform` at `index`.
fn layout_before(masked: &str, spans: &[Range<usize>], index: usize) -> (usize, Vec<Vec<String>>) {
    let text = |index: usize| &masked[spans[index].clone()];
    let plain = (spans[index].start, Vec::new());
    if index < 3 || text(index - 1) != ")" {
        return plain;
    }

    let mut open = index - 1;
    let mut depth = 0usize;
    loop {
        match text(open) {
            ")" => depth += 1,
            "(" => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
        if open == 0 {
            return plain;
        }
        open -= 1;
    }
    if open == 0 || text(open - 1) != "layout" {
        return plain;
    }

    let mut items = vec![Vec::new()];
    for token in (open + 1..index - 1).map(text) {
        if token == "," {
            items.push(Vec::new());
        } else if let Some(item) = items.last_mut() {
            item.push(token.to_string());
        }
    }
    (spans[open - 1].start, items)
}

fn parse_uint(token: &str) -> Option<u32> {
    let token = token.trim_end_matches(['u', 'U']);
    match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

fn resource_kind(glsl_type: &str) -> Option<ResourceKind> {
    let base = glsl_type
        .strip_prefix(['i', 'u'])
        .filter(|rest| rest.starts_with("sampler") || rest.starts_with("image"))
        .unwrap_or(glsl_type);
    if base.starts_with("sampler") {
        Some(ResourceKind::Texture)
    } else if base.starts_with("image") {
        Some(ResourceKind::Image)
    } else {
        None
    }
}

fn describe(name: &str, glsl_type: &str, kind: ResourceKind, binding: Option<u32>) -> ResourceDecl {
    let cubemap = glsl_type.contains("Cube");
    let dims = if glsl_type.contains("3D") {
        3
    } else if glsl_type.contains("1D") || glsl_type.contains("Buffer") {
        1
    } else {
        2
    };
    ResourceDecl {
        name: name.to_string(),
        kind,
        glsl_type: glsl_type.to_string(),
        dims,
        cubemap,
        layered: glsl_type.contains("Array"),
        binding,
        slot: 0,
    }
}

/// Same text with every comment byte replaced by a space (newlines kept),
/// so offsets into the result are offsets into `source`.
fn mask_comments(source: &str) -> String {
    let mut bytes = source.as_bytes().to_vec();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                bytes[i] = b' ';
                i += 1;
            }
        } else if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            bytes[i] = b' ';
            bytes[i + 1] = b' ';
            i += 2;
            while i < bytes.len() {
                if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    bytes[i] = b' ';
                    bytes[i + 1] = b' ';
                    i += 2;
                    break;
                }
                if bytes[i] != b'\n' {
                    bytes[i] = b' ';
                }
                i += 1;
            }
        } else {
            i += 1;
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Comment-free GLSL split into identifiers, numbers, and single
/// punctuation characters.
pub fn glsl_tokens(source: &str) -> Vec<String> {
    let masked = mask_comments(source);
    token_spans(&masked)
        .into_iter()
        .map(|span| masked[span].to_string())
        .collect()
}

fn token_spans(source: &str) -> Vec<Range<usize>> {
    let bytes = source.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte.is_ascii_whitespace() {
            i += 1;
        } else if is_ident_char(byte) {
            let start = i;
            while i < bytes.len() && is_ident_char(bytes[i]) {
                i += 1;
            }
            spans.push(start..i);
        } else if byte.is_ascii() {
            spans.push(i..i + 1);
            i += 1;
        } else {
            i += 1;
        }
    }
    spans
}
