//! Structural parser for preprocessed effect text.
//!
//! Top-level items are stage blocks (`vertex VS { ... }`), `common` blocks,
//! `sampler_state` declarations, `technique`s, and `group`s of techniques.
//! Shader bodies are captured verbatim by brace matching; everything else
//! goes through a small tokenizer. Pass → block references are resolved
//! after the whole file is read, so blocks may be declared after the passes
//! that use them.
use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::document::{
    AddressMode, CommonBlock, Directive, EffectDocument, FilterMode, Pass, SamplerStateDecl,
    ShaderBlock, Stage, StageRef, Technique, TechniqueGroup,
};
use crate::error::{Location, ParseError, ParseErrorKind};
use crate::preprocess::{is_ident_char, is_ident_start, preprocess, Preprocessed};
use crate::reflect::{assign_slots, collect_resources};
use crate::source::{ParseOptions, SourceFile, SourceLoader};

/// Name given to in-memory sources parsed without a virtual filename.
pub const MEMORY_FILENAME: &str = "<memory>";

pub fn parse_file(path: &Path, options: &ParseOptions) -> Result<EffectDocument, ParseError> {
    let loader = SourceLoader::new(options.include_paths.clone());
    let root = loader.load_file(path)?;
    parse_with(root, &loader, options)
}

pub fn parse_str(
    source: &str,
    filename: Option<&str>,
    options: &ParseOptions,
) -> Result<EffectDocument, ParseError> {
    let loader = SourceLoader::new(options.include_paths.clone());
    let root = SourceFile::from_memory(filename.unwrap_or(MEMORY_FILENAME), source);
    parse_with(root, &loader, options)
}

fn parse_with(
    root: SourceFile,
    loader: &SourceLoader,
    options: &ParseOptions,
) -> Result<EffectDocument, ParseError> {
    let preprocessed = preprocess(&root, loader, &options.macros)?;
    let mut parser = Parser::new(&preprocessed);
    parser.document.filename = root.name.clone();
    parser.document.macros = options.macros.clone();
    parser.parse_items()?;
    let document = parser.finish()?;
    debug!(
        file = %document.filename,
        blocks = document.blocks.len(),
        techniques = document.techniques.len(),
        groups = document.groups.len(),
        textures = document.textures.len(),
        images = document.images.len(),
        "parsed effect"
    );
    Ok(document)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Number(String),
    Str(String),
    Punct(char),
    /// A preprocessor line the effect preprocessor left in place.
    Directive(String),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(ident) => write!(f, "'{ident}'"),
            Token::Number(number) => write!(f, "number {number}"),
            Token::Str(text) => write!(f, "string \"{text}\""),
            Token::Punct(ch) => write!(f, "'{ch}'"),
            Token::Directive(line) => write!(f, "directive '{}'", line.trim()),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

struct Lexer<'a> {
    source: &'a Preprocessed,
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a Preprocessed) -> Self {
        Self {
            source,
            pos: 0,
            line: 0,
        }
    }

    fn text(&self) -> &'a str {
        &self.source.text
    }

    fn location(&self) -> Location {
        self.source.location(self.line)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        let bytes = self.text().as_bytes();
        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                byte if byte.is_ascii_whitespace() => self.pos += 1,
                b'/' if bytes.get(self.pos + 1) == Some(&b'/') => self.skip_line(),
                b'/' if bytes.get(self.pos + 1) == Some(&b'*') => self.skip_block_comment()?,
                _ => break,
            }
        }
        Ok(())
    }

    fn skip_line(&mut self) {
        let rest = &self.text()[self.pos..];
        self.pos += rest.find('\n').unwrap_or(rest.len());
    }

    fn skip_block_comment(&mut self) -> Result<(), ParseError> {
        let start = self.location();
        let rest = &self.text()[self.pos + 2..];
        match rest.find("*/") {
            Some(end) => {
                self.line += rest[..end].matches('\n').count();
                self.pos += 2 + end + 2;
                Ok(())
            }
            None => Err(ParseError::new(start, ParseErrorKind::Unterminated("comment".into()))),
        }
    }

    fn next(&mut self) -> Result<(Token, Location), ParseError> {
        self.skip_trivia()?;
        let location = self.location();
        let text = self.text();
        let bytes = text.as_bytes();
        let Some(&byte) = bytes.get(self.pos) else {
            return Ok((Token::Eof, location));
        };

        if byte == b'#' {
            let start = self.pos;
            self.skip_line();
            return Ok((Token::Directive(text[start..self.pos].to_string()), location));
        }
        if is_ident_start(byte) {
            let start = self.pos;
            while self.pos < bytes.len() && is_ident_char(bytes[self.pos]) {
                self.pos += 1;
            }
            return Ok((Token::Ident(text[start..self.pos].to_string()), location));
        }
        if byte.is_ascii_digit() || (byte == b'-' && bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit)) {
            let start = self.pos;
            self.pos += 1;
            while self.pos < bytes.len() && (is_ident_char(bytes[self.pos]) || bytes[self.pos] == b'.') {
                self.pos += 1;
            }
            return Ok((Token::Number(text[start..self.pos].to_string()), location));
        }
        if byte == b'"' {
            let start = self.pos + 1;
            let rest = &text[start..];
            let end = rest
                .find(['"', '\n'])
                .filter(|end| rest.as_bytes()[*end] == b'"')
                .ok_or_else(|| {
                    ParseError::new(location.clone(), ParseErrorKind::Unterminated("string".into()))
                })?;
            self.pos = start + end + 1;
            return Ok((Token::Str(rest[..end].to_string()), location));
        }

        let ch = text[self.pos..].chars().next().unwrap_or('\0');
        self.pos += ch.len_utf8();
        Ok((Token::Punct(ch), location))
    }

    fn peek(&mut self) -> Result<Token, ParseError> {
        let (pos, line) = (self.pos, self.line);
        let (token, _) = self.next()?;
        self.pos = pos;
        self.line = line;
        Ok(token)
    }

    /// Captures a shader body after its opening `{`, up to the matching `}`.
    fn raw_block(&mut self, open: &Location) -> Result<String, ParseError> {
        let text = self.text();
        let bytes = text.as_bytes();
        let start = self.pos;
        let mut depth = 1usize;

        while self.pos < bytes.len() {
            match bytes[self.pos] {
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                b'/' if bytes.get(self.pos + 1) == Some(&b'/') => self.skip_line(),
                b'/' if bytes.get(self.pos + 1) == Some(&b'*') => self.skip_block_comment()?,
                b'"' => {
                    self.pos += 1;
                    while self.pos < bytes.len() && !matches!(bytes[self.pos], b'"' | b'\n') {
                        self.pos += 1;
                    }
                    if bytes.get(self.pos) == Some(&b'"') {
                        self.pos += 1;
                    }
                }
                b'{' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let body = &text[start..self.pos];
                        self.pos += 1;
                        return Ok(body.to_string());
                    }
                    self.pos += 1;
                }
                _ => self.pos += 1,
            }
        }

        Err(ParseError::new(
            open.clone(),
            ParseErrorKind::Unterminated("shader block".into()),
        ))
    }
}

struct PendingPass {
    technique: usize,
    name: String,
    refs: Vec<(Stage, String, Location)>,
    directives: Vec<Directive>,
    location: Location,
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    document: EffectDocument,
    passes: Vec<PendingPass>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a Preprocessed) -> Self {
        Self {
            lexer: Lexer::new(source),
            document: EffectDocument::default(),
            passes: Vec::new(),
        }
    }

    fn unexpected(expected: &str, found: Token, location: Location) -> ParseError {
        ParseError::new(
            location,
            ParseErrorKind::Unexpected {
                expected: expected.to_string(),
                found: found.to_string(),
            },
        )
    }

    fn expect_punct(&mut self, punct: char) -> Result<Location, ParseError> {
        match self.lexer.next()? {
            (Token::Punct(ch), location) if ch == punct => Ok(location),
            (other, location) => Err(Self::unexpected(&format!("'{punct}'"), other, location)),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<(String, Location), ParseError> {
        match self.lexer.next()? {
            (Token::Ident(ident), location) => Ok((ident, location)),
            (other, location) => Err(Self::unexpected(what, other, location)),
        }
    }

    fn expect_value(&mut self) -> Result<String, ParseError> {
        match self.lexer.next()? {
            (Token::Ident(value) | Token::Number(value) | Token::Str(value), _) => Ok(value),
            (other, location) => Err(Self::unexpected("a value", other, location)),
        }
    }

    fn duplicate(what: &'static str, name: &str, location: Location) -> ParseError {
        ParseError::new(
            location,
            ParseErrorKind::Duplicate {
                what,
                name: name.to_string(),
            },
        )
    }

    fn parse_items(&mut self) -> Result<(), ParseError> {
        loop {
            let (token, location) = self.lexer.next()?;
            match token {
                Token::Eof => return Ok(()),
                Token::Punct(';') => {}
                Token::Directive(line) => self.document.common.push(CommonBlock {
                    name: None,
                    source: line,
                    location,
                }),
                Token::Ident(keyword) => match keyword.as_str() {
                    "common" => self.parse_common(location)?,
                    "sampler_state" => self.parse_sampler_state()?,
                    "technique" => self.parse_technique(None)?,
                    "group" => self.parse_group()?,
                    other => match Stage::from_keyword(other) {
                        Some(stage) => self.parse_stage_block(stage)?,
                        None => {
                            return Err(Self::unexpected(
                                "a declaration",
                                Token::Ident(keyword.clone()),
                                location,
                            ))
                        }
                    },
                },
                other => return Err(Self::unexpected("a declaration", other, location)),
            }
        }
    }

    fn parse_common(&mut self, location: Location) -> Result<(), ParseError> {
        let name = match self.lexer.peek()? {
            Token::Ident(_) => Some(self.expect_ident("a block name")?.0),
            _ => None,
        };
        let open = self.expect_punct('{')?;
        let source = self.lexer.raw_block(&open)?;
        self.reflect(&source, &open)?;
        self.document.common.push(CommonBlock {
            name,
            source,
            location,
        });
        Ok(())
    }

    /// Records the block's textures and images and renumbers all slots.
    fn reflect(&mut self, source: &str, location: &Location) -> Result<(), ParseError> {
        let document = &mut self.document;
        collect_resources(source, &mut document.textures, &mut document.images);
        assign_slots(&mut document.textures)
            .and_then(|()| assign_slots(&mut document.images))
            .map_err(|kind| ParseError::new(location.clone(), kind))
    }

    fn parse_stage_block(&mut self, stage: Stage) -> Result<(), ParseError> {
        let (name, location) = self.expect_ident("a block name")?;
        if self.document.block(&name).is_some() {
            return Err(Self::duplicate("shader block", &name, location));
        }
        let open = self.expect_punct('{')?;
        let source = self.lexer.raw_block(&open)?;
        self.reflect(&source, &open)?;
        self.document.blocks.push(ShaderBlock {
            name,
            stage,
            source,
            location: open,
        });
        Ok(())
    }

    fn parse_group(&mut self) -> Result<(), ParseError> {
        let (name, location) = self.expect_ident("a group name")?;
        if self.document.groups.iter().any(|group| group.name == name) {
            return Err(Self::duplicate("technique group", &name, location));
        }
        self.expect_punct('{')?;
        let index = self.document.groups.len();
        self.document.groups.push(TechniqueGroup {
            name,
            techniques: Vec::new(),
        });
        loop {
            match self.lexer.next()? {
                (Token::Punct('}'), _) => return Ok(()),
                (Token::Punct(';'), _) => {}
                (Token::Ident(keyword), _) if keyword == "technique" => {
                    self.parse_technique(Some(index))?
                }
                (other, location) => {
                    return Err(Self::unexpected("'technique' or '}'", other, location))
                }
            }
        }
    }

    fn parse_technique(&mut self, group: Option<usize>) -> Result<(), ParseError> {
        let (name, location) = self.expect_ident("a technique name")?;
        if self.document.technique_by_name(&name).is_some() {
            return Err(Self::duplicate("technique", &name, location));
        }
        self.expect_punct('{')?;
        let index = self.document.techniques.len();
        let mut pass_names: Vec<String> = Vec::new();
        loop {
            match self.lexer.next()? {
                (Token::Punct('}'), _) => break,
                (Token::Punct(';'), _) => {}
                (Token::Ident(keyword), _) if keyword == "pass" => {
                    let pass = self.parse_pass(index)?;
                    if pass_names.contains(&pass.name) {
                        return Err(Self::duplicate("pass", &pass.name, pass.location));
                    }
                    pass_names.push(pass.name.clone());
                    self.passes.push(pass);
                }
                (other, location) => return Err(Self::unexpected("'pass' or '}'", other, location)),
            }
        }
        if pass_names.is_empty() {
            return Err(ParseError::new(location, ParseErrorKind::EmptyTechnique(name)));
        }
        if let Some(group) = group {
            self.document.groups[group].techniques.push(index);
        }
        self.document.techniques.push(Technique {
            name,
            group,
            passes: Vec::new(),
            location,
        });
        Ok(())
    }

    fn parse_pass(&mut self, technique: usize) -> Result<PendingPass, ParseError> {
        let (name, location) = self.expect_ident("a pass name")?;
        self.expect_punct('{')?;
        let mut refs: Vec<(Stage, String, Location)> = Vec::new();
        let mut directives = Vec::new();
        loop {
            let (key, key_location) = match self.lexer.next()? {
                (Token::Punct('}'), _) => break,
                (Token::Punct(';'), _) => continue,
                (Token::Ident(key), key_location) => (key, key_location),
                (other, location) => {
                    return Err(Self::unexpected("a pass setting or '}'", other, location))
                }
            };
            self.expect_punct('=')?;
            let value = self.expect_value()?;
            self.expect_punct(';')?;

            match Stage::from_keyword(&key) {
                Some(stage) => {
                    if refs.iter().any(|(existing, _, _)| *existing == stage) {
                        return Err(Self::duplicate("stage", &key, key_location));
                    }
                    refs.push((stage, value, key_location));
                }
                None => directives.push(Directive {
                    key,
                    value,
                    location: key_location,
                }),
            }
        }
        Ok(PendingPass {
            technique,
            name,
            refs,
            directives,
            location,
        })
    }

    fn parse_sampler_state(&mut self) -> Result<(), ParseError> {
        let (name, location) = self.expect_ident("a sampler state name")?;
        if self.document.sampler_state(&name).is_some() {
            return Err(Self::duplicate("sampler state", &name, location));
        }
        self.expect_punct('{')?;
        let mut decl = SamplerStateDecl {
            name,
            textures: Vec::new(),
            filter: FilterMode::default(),
            mip_filter: FilterMode::default(),
            address: AddressMode::default(),
            location,
        };
        loop {
            let (key, key_location) = match self.lexer.next()? {
                (Token::Punct('}'), _) => break,
                (Token::Punct(';'), _) => continue,
                (Token::Ident(key), key_location) => (key, key_location),
                (other, location) => {
                    return Err(Self::unexpected("a sampler attribute or '}'", other, location))
                }
            };
            self.expect_punct('=')?;
            let mut values = vec![self.expect_value()?];
            loop {
                match self.lexer.next()? {
                    (Token::Punct(';'), _) => break,
                    (Token::Punct(','), _) => values.push(self.expect_value()?),
                    (other, location) => return Err(Self::unexpected("',' or ';'", other, location)),
                }
            }

            let invalid = |values: &[String]| {
                ParseError::new(
                    key_location.clone(),
                    ParseErrorKind::SamplerAttribute {
                        key: key.clone(),
                        value: values.join(", "),
                    },
                )
            };
            match (key.as_str(), values.as_slice()) {
                ("textures", _) => decl.textures.extend(values.iter().cloned()),
                ("filter", [value]) => decl.filter = parse_filter(value).ok_or_else(|| invalid(&values))?,
                ("mip_filter", [value]) => {
                    decl.mip_filter = parse_filter(value).ok_or_else(|| invalid(&values))?
                }
                ("address", [value]) => {
                    decl.address = parse_address(value).ok_or_else(|| invalid(&values))?
                }
                _ => return Err(invalid(&values)),
            }
        }
        self.document.sampler_states.push(decl);
        Ok(())
    }

    fn finish(mut self) -> Result<EffectDocument, ParseError> {
        for pending in std::mem::take(&mut self.passes) {
            if pending.refs.is_empty() {
                return Err(ParseError::new(
                    pending.location,
                    ParseErrorKind::EmptyPass(pending.name),
                ));
            }
            let mut stages = Vec::with_capacity(pending.refs.len());
            for (stage, block_name, location) in pending.refs {
                let Some(block) = self
                    .document
                    .blocks
                    .iter()
                    .position(|block| block.name == block_name)
                else {
                    return Err(ParseError::new(
                        location,
                        ParseErrorKind::UndeclaredBlock {
                            pass: pending.name,
                            stage,
                            block: block_name,
                        },
                    ));
                };
                let actual = self.document.blocks[block].stage;
                if actual != stage {
                    return Err(ParseError::new(
                        location,
                        ParseErrorKind::StageMismatch {
                            pass: pending.name,
                            block: block_name,
                            expected: stage,
                            actual,
                        },
                    ));
                }
                stages.push(StageRef { stage, block });
            }
            self.document.techniques[pending.technique].passes.push(Pass {
                name: pending.name,
                stages,
                directives: pending.directives,
                location: pending.location,
            });
        }

        for state in &self.document.sampler_states {
            if let Some(texture) = state
                .textures
                .iter()
                .find(|texture| self.document.texture_index(texture).is_none())
            {
                return Err(ParseError::new(
                    state.location.clone(),
                    ParseErrorKind::UnknownTexture {
                        state: state.name.clone(),
                        texture: texture.clone(),
                    },
                ));
            }
        }

        Ok(self.document)
    }
}

fn parse_filter(value: &str) -> Option<FilterMode> {
    match value {
        "nearest" | "point" => Some(FilterMode::Nearest),
        "linear" => Some(FilterMode::Linear),
        _ => None,
    }
}

fn parse_address(value: &str) -> Option<AddressMode> {
    match value {
        "repeat" | "wrap" => Some(AddressMode::Repeat),
        "clamp" => Some(AddressMode::Clamp),
        "mirror" => Some(AddressMode::Mirror),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ResourceKind;

    const BASIC: &str = r#"
vertex VS {
    #version 450
    layout(location = 0) in vec3 position;
    void main() { gl_Position = vec4(position, 1.0); }
}

fragment FS {
    layout(location = 0) out vec4 color;
    void main() { color = vec4(1.0); /* } */ }
}

technique Main {
    pass P0 {
        vertex = VS;
        fragment = FS;
        blend = alpha;
        depth_test = on;
    }
}
"#;

    fn parse(source: &str) -> Result<EffectDocument, ParseError> {
        parse_str(source, Some("test.fx"), &ParseOptions::default())
    }

    #[test]
    fn parses_single_technique_with_one_pass() {
        let document = parse(BASIC).unwrap();
        assert_eq!(document.technique_count(), 1);
        let technique = document.technique_by_name("Main").unwrap();
        assert_eq!(technique.passes.len(), 1);
        let pass = technique.pass("P0").unwrap();
        assert!(pass.uses_stage(Stage::Vertex));
        assert!(pass.uses_stage(Stage::Fragment));
        assert_eq!(pass.directives.len(), 2);
        assert_eq!(pass.directives[0].key, "blend");
        assert_eq!(pass.directives[0].value, "alpha");
        assert!(document.block("FS").unwrap().source.contains("/* } */"));
    }

    #[test]
    fn passes_and_techniques_keep_declaration_order() {
        let source = r"
vertex VS { void main() {} }
fragment FS { void main() {} }
technique Zeta { pass Second { vertex = VS; fragment = FS; } pass First { vertex = VS; fragment = FS; } }
technique Alpha { pass Only { vertex = VS; fragment = FS; } }
";
        let document = parse(source).unwrap();
        let names: Vec<_> = document.techniques.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
        let passes: Vec<_> = document.techniques[0]
            .passes
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(passes, vec!["Second", "First"]);
    }

    #[test]
    fn groups_collect_their_techniques() {
        let source = r"
vertex VS { void main() {} }
fragment FS { void main() {} }
group High { technique Fancy { pass P0 { vertex = VS; fragment = FS; } } }
group Low { technique Cheap { pass P0 { vertex = VS; fragment = FS; } } }
technique Loose { pass P0 { vertex = VS; fragment = FS; } }
";
        let document = parse(source).unwrap();
        assert_eq!(document.group_count(), 2);
        assert_eq!(document.group_name(1), Some("Low"));
        let low: Vec<_> = document
            .techniques_in_group(Some(1))
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(low, vec!["Cheap"]);
        let loose: Vec<_> = document
            .techniques_in_group(None)
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(loose, vec!["Loose"]);
        assert_eq!(document.technique_count(), 3);
    }

    #[test]
    fn rejects_undeclared_block_reference() {
        let source = "vertex VS { void main() {} }\ntechnique T {\n pass P { vertex = VS; fragment = Missing; }\n}";
        let err = parse(source).unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::UndeclaredBlock {
                pass: "P".into(),
                stage: Stage::Fragment,
                block: "Missing".into(),
            }
        );
        assert_eq!(err.location, Location::new("test.fx", 3));
    }

    #[test]
    fn rejects_stage_mismatch() {
        let source = "vertex VS { }\ntechnique T { pass P { fragment = VS; } }";
        let err = parse(source).unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::StageMismatch { .. }));
    }

    #[test]
    fn rejects_duplicate_names() {
        let dup_technique = "vertex VS { }\ntechnique T { pass P { vertex = VS; } }\ntechnique T { pass P { vertex = VS; } }";
        let err = parse(dup_technique).unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::Duplicate {
                what: "technique",
                name: "T".into()
            }
        );

        let dup_pass = "vertex VS { }\ntechnique T { pass P { vertex = VS; } pass P { vertex = VS; } }";
        let err = parse(dup_pass).unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::Duplicate {
                what: "pass",
                name: "P".into()
            }
        );

        let dup_block = "vertex VS { }\nfragment VS { }";
        assert!(matches!(
            parse(dup_block).unwrap_err().kind,
            ParseErrorKind::Duplicate { what: "shader block", .. }
        ));
    }

    #[test]
    fn rejects_unterminated_block() {
        let err = parse("vertex VS {\n void main() {\n").unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::Unterminated("shader block".into())
        );
        assert_eq!(err.location, Location::new("test.fx", 1));
    }

    #[test]
    fn rejects_empty_pass_and_technique() {
        assert!(matches!(
            parse("technique T { }").unwrap_err().kind,
            ParseErrorKind::EmptyTechnique(_)
        ));
        assert!(matches!(
            parse("technique T { pass P { blend = off; } }").unwrap_err().kind,
            ParseErrorKind::EmptyPass(_)
        ));
    }

    #[test]
    fn top_level_directives_become_common_code() {
        let document = parse("#version 430\ncommon { const float PI = 3.14; }\nvertex VS { }").unwrap();
        assert_eq!(document.common.len(), 2);
        assert_eq!(document.common[0].source, "#version 430");
        assert!(document.common[1].source.contains("PI"));
    }

    #[test]
    fn reflects_resources_and_sampler_states() {
        let source = r"
common { uniform sampler2D diffuse; }
fragment FS { uniform sampler2D normals; layout(rgba8) uniform image2D target; void main() {} }
sampler_state Linear { textures = diffuse, normals; filter = linear; address = clamp; }
";
        let document = parse(source).unwrap();
        assert_eq!(document.texture_index("diffuse"), Some(0));
        assert_eq!(document.texture_index("normals"), Some(1));
        assert_eq!(document.image_index("target"), Some(0));
        assert_eq!(document.images[0].kind, ResourceKind::Image);
        let state = document.sampler_state("Linear").unwrap();
        assert_eq!(state.textures, vec!["diffuse", "normals"]);
        assert_eq!(state.address, AddressMode::Clamp);
    }

    #[test]
    fn explicit_bindings_become_slots() {
        let document = parse(
            "fragment FS {\nlayout(binding = 5) uniform sampler2D detail;\nuniform sampler2D albedo;\n}",
        )
        .unwrap();
        assert_eq!(document.texture_index("detail"), Some(5));
        assert_eq!(document.texture_index("albedo"), Some(0));
    }

    #[test]
    fn conflicting_bindings_fail_at_the_block() {
        let err = parse(
            "common { layout(binding = 1) uniform sampler2D a; }\nfragment FS {\nlayout(binding = 1) uniform sampler2D b;\n}",
        )
        .unwrap_err();
        assert!(matches!(
            err.kind,
            ParseErrorKind::BindingConflict { binding: 1, .. }
        ));
        assert_eq!(err.location.line, 2);
    }

    #[test]
    fn sampler_state_must_name_known_textures() {
        let err = parse("sampler_state S { textures = ghost; }").unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::UnknownTexture {
                state: "S".into(),
                texture: "ghost".into()
            }
        );
        let err = parse("sampler_state S { filter = bicubic; }").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::SamplerAttribute { .. }));
    }

    #[test]
    fn macros_apply_before_structure() {
        let options = ParseOptions::default().with_macro("TECH", "Injected");
        let document = parse_str(
            "vertex VS { }\ntechnique TECH { pass P { vertex = VS; } }",
            None,
            &options,
        )
        .unwrap();
        assert_eq!(document.techniques[0].name, "Injected");
        assert_eq!(document.filename, MEMORY_FILENAME);
    }
}
