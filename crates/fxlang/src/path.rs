//! `$VAR`, `${VAR}`, and `~` expansion for user-supplied paths (include
//! directories, cache directories, effect files named on the command line).
//! Relative results are anchored to a base directory: the directory of the
//! config file that named them, or the working directory for CLI arguments.
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use directories_next::BaseDirs;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PathResolver {
    base: PathBuf,
}

impl PathResolver {
    /// Anchors relative paths at the current working directory.
    pub fn from_cwd() -> Result<Self> {
        let base = env::current_dir().context("failed to resolve current working directory")?;
        Ok(Self { base })
    }

    pub fn with_base<P: Into<PathBuf>>(base: P) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Expands variables and `~` without anchoring.
    pub fn expand(&self, input: &str) -> Result<PathBuf> {
        let substituted = substitute_vars(input)?;
        let expanded = PathBuf::from(expand_tilde(&substituted)?);
        if expanded.as_os_str() != input {
            debug!(input, expanded = %expanded.display(), "expanded path");
        }
        Ok(expanded)
    }

    /// Expands `input` and joins it onto the base when still relative.
    /// An empty input stays empty so callers can treat it as "unset".
    pub fn resolve(&self, input: &str) -> Result<PathBuf> {
        let expanded = self.expand(input)?;
        if expanded.as_os_str().is_empty() || expanded.is_absolute() {
            return Ok(expanded);
        }
        Ok(self.base.join(expanded))
    }

    pub fn resolve_all<S: AsRef<str>>(&self, inputs: &[S]) -> Result<Vec<PathBuf>> {
        inputs
            .iter()
            .map(|input| self.resolve(input.as_ref()))
            .collect()
    }
}

fn expand_tilde(input: &str) -> Result<String> {
    let rest = match input.strip_prefix('~') {
        Some(rest) => rest,
        None => return Ok(input.to_string()),
    };
    if !rest.is_empty() && !rest.starts_with('/') {
        bail!("'~user' paths are not supported: {input}");
    }
    let dirs = BaseDirs::new().ok_or_else(|| anyhow!("no home directory available for '~'"))?;
    let home = dirs.home_dir().to_string_lossy();
    Ok(format!("{home}{rest}"))
}

fn substitute_vars(input: &str) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(offset) = rest.find(['$', '\\']) {
        output.push_str(&rest[..offset]);
        let tail = &rest[offset..];

        if let Some(escaped) = tail.strip_prefix('\\') {
            let mut chars = escaped.chars();
            match chars.next() {
                Some(ch) => output.push(ch),
                None => output.push('\\'),
            }
            rest = chars.as_str();
            continue;
        }

        let after = &tail[1..];
        let (name, remaining) = if let Some(braced) = after.strip_prefix('{') {
            let end = braced
                .find('}')
                .ok_or_else(|| anyhow!("unclosed '${{' in path '{input}'"))?;
            if end == 0 {
                bail!("empty variable name in path '{input}'");
            }
            (&braced[..end], &braced[end + 1..])
        } else {
            let end = after
                .find(|ch: char| !(ch == '_' || ch.is_ascii_alphanumeric()))
                .unwrap_or(after.len());
            (&after[..end], &after[end..])
        };

        if name.is_empty() {
            output.push('$');
        } else {
            let value =
                env::var(name).with_context(|| format!("environment variable '{name}' is not set"))?;
            output.push_str(&value);
        }
        rest = remaining;
    }

    output.push_str(rest);
    Ok(output)
}
