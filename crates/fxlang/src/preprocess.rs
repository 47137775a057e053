//! Text-level pass that runs before structural parsing: inlines includes,
//! evaluates the effect's own conditionals, and substitutes object-like
//! macros at identifier boundaries. Directives the GLSL compiler understands
//! better (`#version`, `#extension`, `#if` expressions, function-like
//! `#define`) are left in place so the stage compiler still sees them.
//!
//! Every emitted line remembers where it came from, which is how parser and
//! compiler diagnostics point at `file:line` in the author's sources rather
//! than at the flattened text.
use std::path::PathBuf;

use tracing::debug;

use crate::error::{Location, ParseError, ParseErrorKind};
use crate::source::{MacroSet, SourceFile, SourceLoader};

const MAX_INCLUDE_DEPTH: usize = 32;
const MAX_EXPANSION_DEPTH: usize = 32;

/// Flattened source plus a per-line origin table.
#[derive(Debug, Clone, Default)]
pub struct Preprocessed {
    pub text: String,
    pub lines: Vec<Location>,
    /// Macro table as it stood at the end of the root file.
    pub macros: MacroSet,
}

impl Preprocessed {
    /// Origin of the zero-based output line `index`.
    pub fn location(&self, index: usize) -> Location {
        self.lines
            .get(index)
            .or_else(|| self.lines.last())
            .cloned()
            .unwrap_or_else(|| Location::new("<empty>", 0))
    }

    fn emit(&mut self, line: &str, location: Location) {
        self.text.push_str(line);
        self.text.push('\n');
        self.lines.push(location);
    }
}

pub fn preprocess(
    root: &SourceFile,
    loader: &SourceLoader,
    macros: &MacroSet,
) -> Result<Preprocessed, ParseError> {
    let mut state = Preprocessor {
        loader,
        macros: macros.clone(),
        include_stack: Vec::new(),
        output: Preprocessed::default(),
    };
    state.process(root)?;
    let mut output = state.output;
    output.macros = state.macros;
    debug!(
        file = %root.name,
        lines = output.lines.len(),
        macros = output.macros.len(),
        "preprocessed effect source"
    );
    Ok(output)
}

enum Frame {
    /// `#ifdef` / `#ifndef` evaluated here.
    Local {
        parent_active: bool,
        taken: bool,
        active: bool,
        seen_else: bool,
    },
    /// `#if` left for the stage compiler; only tracked to pair `#endif`s.
    Passthrough,
}

fn frames_active(frames: &[Frame]) -> bool {
    frames.iter().all(|frame| match frame {
        Frame::Local { active, .. } => *active,
        Frame::Passthrough => true,
    })
}

struct Preprocessor<'a> {
    loader: &'a SourceLoader,
    macros: MacroSet,
    include_stack: Vec<PathBuf>,
    output: Preprocessed,
}

impl Preprocessor<'_> {
    fn process(&mut self, file: &SourceFile) -> Result<(), ParseError> {
        if let Some(path) = &file.path {
            self.include_stack.push(path.clone());
        }

        let mut frames: Vec<Frame> = Vec::new();
        let mut in_comment = false;
        let mut last_line = 0;

        for (index, line) in file.text.lines().enumerate() {
            last_line = index + 1;
            let location = Location::new(file.name.clone(), index + 1);
            let active = frames_active(&frames);

            let directive = if in_comment {
                None
            } else {
                split_directive(line)
            };
            let Some((name, rest)) = directive else {
                if active {
                    let expanded = self.expand(line, &mut in_comment);
                    self.output.emit(&expanded, location);
                } else {
                    scan_comments(line, &mut in_comment);
                }
                continue;
            };

            // A block comment opened on a directive line runs on into the
            // following lines.
            let mut opens_comment = false;
            scan_comments(line, &mut opens_comment);
            let comment_location = opens_comment.then(|| location.clone());

            match name {
                "ifdef" | "ifndef" => {
                    let ident = directive_ident(rest).ok_or_else(|| {
                        directive_error(&location, format!("#{name} needs a macro name"))
                    })?;
                    let defined = self.macros.contains(ident);
                    let condition = if name == "ifdef" { defined } else { !defined };
                    frames.push(Frame::Local {
                        parent_active: active,
                        taken: condition,
                        active: active && condition,
                        seen_else: false,
                    });
                }
                "if" => {
                    frames.push(Frame::Passthrough);
                    if active {
                        let expanded = self.expand_condition(line);
                        self.output.emit(&expanded, location);
                    }
                }
                "elif" | "else" | "endif" => match frames.last_mut() {
                    None => {
                        return Err(ParseError::new(
                            location,
                            ParseErrorKind::UnbalancedConditional(name.to_string()),
                        ));
                    }
                    Some(Frame::Passthrough) => {
                        if name == "endif" {
                            frames.pop();
                        }
                        if active {
                            let expanded = if name == "elif" {
                                self.expand_condition(line)
                            } else {
                                line.to_string()
                            };
                            self.output.emit(&expanded, location);
                        }
                    }
                    Some(Frame::Local {
                        parent_active,
                        taken,
                        active: frame_active,
                        seen_else,
                    }) => match name {
                        "elif" => {
                            return Err(directive_error(
                                &location,
                                "#elif cannot continue an #ifdef or #ifndef block".into(),
                            ));
                        }
                        "else" => {
                            if *seen_else {
                                return Err(directive_error(&location, "duplicate #else".into()));
                            }
                            *seen_else = true;
                            *frame_active = *parent_active && !*taken;
                            *taken = true;
                        }
                        _ => {
                            frames.pop();
                        }
                    },
                },
                _ if !active => {}
                "include" => {
                    let target = include_target(rest).ok_or_else(|| {
                        directive_error(&location, "#include expects \"file\" or <file>".into())
                    })?;
                    self.include(target, file, &location)?;
                }
                "define" => {
                    let ident = directive_ident(rest).ok_or_else(|| {
                        directive_error(&location, "#define needs a macro name".into())
                    })?;
                    match object_macro_value(rest, ident) {
                        Some(value) => self.macros.define(ident, value),
                        None => self.output.emit(line, location),
                    }
                }
                "undef" => {
                    let ident = directive_ident(rest).ok_or_else(|| {
                        directive_error(&location, "#undef needs a macro name".into())
                    })?;
                    if !self.macros.undefine(ident) {
                        self.output.emit(line, location);
                    }
                }
                _ => self.output.emit(line, location),
            }

            if let Some(location) = comment_location {
                in_comment = true;
                // Consumed directives drop their `/*`; reopen it for the
                // compiler. A second opener inside a comment is harmless.
                if frames_active(&frames) {
                    self.output.emit("/*", location);
                }
            }
        }

        if !frames.is_empty() {
            return Err(ParseError::new(
                Location::new(file.name.clone(), last_line),
                ParseErrorKind::UnterminatedConditional,
            ));
        }

        if file.path.is_some() {
            self.include_stack.pop();
        }
        Ok(())
    }

    fn include(
        &mut self,
        target: &str,
        from: &SourceFile,
        location: &Location,
    ) -> Result<(), ParseError> {
        if self.include_stack.len() >= MAX_INCLUDE_DEPTH {
            return Err(ParseError::new(
                location.clone(),
                ParseErrorKind::IncludeCycle(target.to_string()),
            ));
        }
        let file = self.loader.load_include(target, from.directory(), location)?;
        if let Some(path) = &file.path {
            if self.include_stack.contains(path) {
                return Err(ParseError::new(
                    location.clone(),
                    ParseErrorKind::IncludeCycle(target.to_string()),
                ));
            }
        }
        self.process(&file)
    }

    fn expand(&self, line: &str, in_comment: &mut bool) -> String {
        let mut blocked = Vec::new();
        self.substitute(line, in_comment, 0, &mut blocked)
    }

    /// Replaces macro identifiers outside comments and string literals.
    /// A macro is never expanded inside its own expansion.
    fn substitute(
        &self,
        line: &str,
        in_comment: &mut bool,
        depth: usize,
        blocked: &mut Vec<String>,
    ) -> String {
        let bytes = line.as_bytes();
        let len = bytes.len();
        let mut out = String::with_capacity(len);
        let mut plain = 0;
        let mut i = 0;

        while i < len {
            if *in_comment {
                match line[i..].find("*/") {
                    Some(offset) => {
                        i += offset + 2;
                        *in_comment = false;
                    }
                    None => i = len,
                }
                continue;
            }

            let byte = bytes[i];
            if byte == b'/' && bytes.get(i + 1) == Some(&b'/') {
                break;
            }
            if byte == b'/' && bytes.get(i + 1) == Some(&b'*') {
                *in_comment = true;
                i += 2;
                continue;
            }
            if byte == b'"' {
                i = skip_string(bytes, i);
                continue;
            }
            if byte.is_ascii_digit() {
                while i < len && (is_ident_char(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
                continue;
            }
            if is_ident_start(byte) {
                let start = i;
                while i < len && is_ident_char(bytes[i]) {
                    i += 1;
                }
                let ident = &line[start..i];
                if depth < MAX_EXPANSION_DEPTH && !blocked.iter().any(|name| name == ident) {
                    if let Some(value) = self.macros.get(ident) {
                        out.push_str(&line[plain..start]);
                        blocked.push(ident.to_string());
                        let mut nested_comment = false;
                        let expanded =
                            self.substitute(value, &mut nested_comment, depth + 1, blocked);
                        blocked.pop();
                        out.push_str(&expanded);
                        plain = i;
                    }
                }
                continue;
            }
            i += 1;
        }

        out.push_str(&line[plain..]);
        out
    }

    /// `#if` / `#elif` lines: `defined NAME` on a locally known macro turns
    /// into `1`, every other known macro is substituted.
    fn expand_condition(&self, line: &str) -> String {
        let bytes = line.as_bytes();
        let len = bytes.len();
        let mut out = String::with_capacity(len);
        let mut plain = 0;
        let mut i = 0;

        while i < len {
            if !is_ident_start(bytes[i]) {
                i += 1;
                continue;
            }
            let start = i;
            while i < len && is_ident_char(bytes[i]) {
                i += 1;
            }
            let ident = &line[start..i];
            if ident == "defined" {
                let mut j = skip_spaces(bytes, i);
                let parenthesised = bytes.get(j) == Some(&b'(');
                if parenthesised {
                    j = skip_spaces(bytes, j + 1);
                }
                let name_start = j;
                while j < len && is_ident_char(bytes[j]) {
                    j += 1;
                }
                let name = &line[name_start..j];
                if parenthesised {
                    j = skip_spaces(bytes, j);
                    if bytes.get(j) == Some(&b')') {
                        j += 1;
                    }
                }
                if !name.is_empty() && self.macros.contains(name) {
                    out.push_str(&line[plain..start]);
                    out.push('1');
                    plain = j;
                }
                i = j.max(i);
            } else if let Some(value) = self.macros.get(ident) {
                out.push_str(&line[plain..start]);
                let mut blocked = vec![ident.to_string()];
                let mut in_comment = false;
                out.push_str(&self.substitute(value, &mut in_comment, 1, &mut blocked));
                plain = i;
            }
        }

        out.push_str(&line[plain..]);
        out
    }
}

fn directive_error(location: &Location, message: String) -> ParseError {
    ParseError::new(location.clone(), ParseErrorKind::Directive(message))
}

/// `#  name rest` → `(name, rest)`.
fn split_directive(line: &str) -> Option<(&str, &str)> {
    let body = line.trim_start().strip_prefix('#')?;
    let body = body.trim_start_matches([' ', '\t']);
    let end = body
        .bytes()
        .position(|byte| !is_ident_char(byte))
        .unwrap_or(body.len());
    Some((&body[..end], &body[end..]))
}

fn directive_ident(rest: &str) -> Option<&str> {
    let rest = rest.trim_start();
    let end = rest
        .bytes()
        .position(|byte| !is_ident_char(byte))
        .unwrap_or(rest.len());
    let ident = &rest[..end];
    match ident.bytes().next() {
        Some(first) if is_ident_start(first) => Some(ident),
        _ => None,
    }
}

fn include_target(rest: &str) -> Option<&str> {
    let rest = rest.trim();
    let (open, close) = match rest.chars().next()? {
        '"' => ('"', '"'),
        '<' => ('<', '>'),
        _ => return None,
    };
    let inner = rest.strip_prefix(open)?;
    let end = inner.find(close)?;
    let target = inner[..end].trim();
    (!target.is_empty()).then_some(target)
}

/// Value of an object-like `#define`; `None` for function-like macros and
/// continued lines, which are left to the stage compiler.
fn object_macro_value(rest: &str, ident: &str) -> Option<String> {
    let after_name = rest.trim_start().strip_prefix(ident)?;
    if after_name.starts_with('(') || rest.trim_end().ends_with('\\') {
        return None;
    }
    let comment = [after_name.find("//"), after_name.find("/*")]
        .into_iter()
        .flatten()
        .min();
    let value = match comment {
        Some(comment) => &after_name[..comment],
        None => after_name,
    };
    Some(value.trim().to_string())
}

fn scan_comments(line: &str, in_comment: &mut bool) {
    let mut rest = line;
    loop {
        if *in_comment {
            match rest.find("*/") {
                Some(offset) => {
                    *in_comment = false;
                    rest = &rest[offset + 2..];
                }
                None => return,
            }
        } else {
            let block = rest.find("/*");
            let line_comment = rest.find("//");
            match (block, line_comment) {
                (Some(b), Some(l)) if l < b => return,
                (Some(b), _) => {
                    *in_comment = true;
                    rest = &rest[b + 2..];
                }
                _ => return,
            }
        }
    }
}

fn skip_string(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() && bytes[i] != b'"' {
        if bytes[i] == b'\\' {
            i += 1;
        }
        i += 1;
    }
    (i + 1).min(bytes.len())
}

fn skip_spaces(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
        i += 1;
    }
    i
}

pub(crate) fn is_ident_start(byte: u8) -> bool {
    byte == b'_' || byte.is_ascii_alphabetic()
}

pub(crate) fn is_ident_char(byte: u8) -> bool {
    byte == b'_' || byte.is_ascii_alphanumeric()
}
