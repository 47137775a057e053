use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use fxconfig::{CompilerChoice, FxConfig, ResolvedConfig};
use fxlang::{EffectDocument, ParseOptions, PathResolver};
use fxruntime::{
    CacheStats, EffectRegistry, HeadlessContext, NagaCompiler, RegistryConfig, ShaderCache,
    StageCompiler, StateOverrides,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::cli::{CacheAction, CompileArgs, InspectArgs, SourceArgs};
use crate::paths::AppPaths;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Configuration file merged with global command-line overrides.
pub struct Settings {
    pub config: ResolvedConfig,
    pub cache_dir: PathBuf,
    cwd: PathResolver,
}

impl Settings {
    pub fn load(config_path: Option<&Path>, cache_dir: Option<&Path>) -> Result<Self> {
        let paths = AppPaths::discover()?;
        let cwd = PathResolver::from_cwd()?;

        let config = match config_path {
            Some(path) => {
                let path = cwd.resolve(&path.to_string_lossy())?;
                load_config(&path)?
            }
            None => {
                let default = paths.config_file();
                if default.is_file() {
                    load_config(&default)?
                } else {
                    FxConfig::default()
                        .resolve(&cwd)
                        .context("failed to resolve default configuration")?
                }
            }
        };

        let cache_dir = match cache_dir {
            Some(dir) => cwd.resolve(&dir.to_string_lossy())?,
            None => config
                .cache_dir
                .clone()
                .unwrap_or_else(|| paths.program_cache_dir()),
        };
        tracing::debug!(
            config = %paths.config_dir().display(),
            cache = %cache_dir.display(),
            compiler = ?config.compiler,
            "resolved fxc settings"
        );

        Ok(Self {
            config,
            cache_dir,
            cwd,
        })
    }

    /// Command-line include paths first, then configured ones; `-D` wins
    /// over configured macros.
    fn parse_options(&self, args: &SourceArgs) -> Result<ParseOptions> {
        let mut options = ParseOptions::new();
        for dir in &args.include {
            options
                .include_paths
                .push(self.cwd.resolve(&dir.to_string_lossy())?);
        }
        options
            .include_paths
            .extend(self.config.include_paths.iter().cloned());
        options.macros = self.config.macros.clone();
        for (name, value) in &args.define {
            options.macros.define(name.as_str(), value.as_str());
        }
        Ok(options)
    }

    fn effect_path(&self, args: &SourceArgs) -> Result<PathBuf> {
        self.cwd.resolve(&args.file.to_string_lossy())
    }
}

fn load_config(path: &Path) -> Result<ResolvedConfig> {
    let config = FxConfig::load(path)
        .with_context(|| format!("failed to load configuration {}", path.display()))?;
    config
        .resolve_for(path)
        .with_context(|| format!("failed to resolve paths in {}", path.display()))
}

#[derive(Serialize)]
struct InspectReport<'a> {
    file: &'a str,
    groups: Vec<&'a str>,
    techniques: Vec<TechniqueReport<'a>>,
    textures: Vec<&'a str>,
    images: Vec<&'a str>,
    sampler_states: Vec<&'a str>,
}

#[derive(Serialize)]
struct TechniqueReport<'a> {
    name: &'a str,
    group: Option<&'a str>,
    passes: Vec<PassReport<'a>>,
}

#[derive(Serialize)]
struct PassReport<'a> {
    name: &'a str,
    stages: Vec<StageReport<'a>>,
    state: Option<StateOverrides>,
}

#[derive(Serialize)]
struct StageReport<'a> {
    stage: &'static str,
    block: &'a str,
}

fn inspect_report(document: &EffectDocument) -> InspectReport<'_> {
    let techniques = document
        .techniques
        .iter()
        .map(|technique| TechniqueReport {
            name: &technique.name,
            group: technique.group.and_then(|group| document.group_name(group)),
            passes: technique
                .passes
                .iter()
                .map(|pass| PassReport {
                    name: &pass.name,
                    stages: document
                        .stage_blocks(pass)
                        .map(|(stage, block)| StageReport {
                            stage: stage.keyword(),
                            block: &block.name,
                        })
                        .collect(),
                    state: StateOverrides::from_directives(&pass.directives).ok(),
                })
                .collect(),
        })
        .collect();

    InspectReport {
        file: &document.filename,
        groups: document.groups.iter().map(|group| group.name.as_str()).collect(),
        techniques,
        textures: document.textures.iter().map(|decl| decl.name.as_str()).collect(),
        images: document.images.iter().map(|decl| decl.name.as_str()).collect(),
        sampler_states: document
            .sampler_states
            .iter()
            .map(|state| state.name.as_str())
            .collect(),
    }
}

pub fn inspect(settings: &Settings, args: InspectArgs) -> Result<()> {
    let path = settings.effect_path(&args.source)?;
    let options = settings.parse_options(&args.source)?;
    let document = fxlang::parse_file(&path, &options)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    let report = inspect_report(&document);

    if args.source.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Effect: {}", report.file);
    for technique in &report.techniques {
        match technique.group {
            Some(group) => println!("  technique {} (group {group})", technique.name),
            None => println!("  technique {}", technique.name),
        }
        for pass in &technique.passes {
            let stages: Vec<String> = pass
                .stages
                .iter()
                .map(|stage| format!("{}={}", stage.stage, stage.block))
                .collect();
            println!("    pass {:<12} {}", pass.name, stages.join(" "));
        }
    }
    if !report.textures.is_empty() {
        println!("  textures: {}", report.textures.join(", "));
    }
    if !report.images.is_empty() {
        println!("  images:   {}", report.images.join(", "));
    }
    if !report.sampler_states.is_empty() {
        println!("  samplers: {}", report.sampler_states.join(", "));
    }
    Ok(())
}

#[derive(Serialize)]
struct CompileReport {
    file: String,
    compiler: String,
    cache_dir: Option<PathBuf>,
    passes: Vec<PassOutcome>,
    cache: CacheStats,
}

#[derive(Serialize)]
struct PassOutcome {
    technique: String,
    pass: String,
    program: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn build_compiler(choice: CompilerChoice, validation: bool) -> Result<Box<dyn StageCompiler>> {
    match choice {
        CompilerChoice::Naga => Ok(Box::new(NagaCompiler::with_validation(validation))),
        #[cfg(feature = "shaderc")]
        CompilerChoice::Shaderc => Ok(Box::new(fxruntime::ShadercCompiler::new()?)),
        #[cfg(not(feature = "shaderc"))]
        CompilerChoice::Shaderc => bail!("shaderc support is not enabled in this build"),
    }
}

pub fn compile(settings: &Settings, args: CompileArgs) -> Result<()> {
    let path = settings.effect_path(&args.source)?;
    let options = settings.parse_options(&args.source)?;
    let compiler = build_compiler(
        args.compiler.unwrap_or(settings.config.compiler),
        settings.config.validation,
    )?;
    let cache_dir = (!args.no_cache).then(|| settings.cache_dir.clone());

    let mut registry = EffectRegistry::new(
        RegistryConfig {
            cache_dir: cache_dir.clone(),
        },
        compiler,
        HeadlessContext::new(),
    );
    let id = registry.create();
    if let Err(err) = registry.parse_file(id, &path, &options) {
        eprint!("{}", registry.log(id).unwrap_or_default());
        return Err(err).with_context(|| format!("failed to parse {}", path.display()));
    }

    let mut selected = Vec::new();
    let technique_count = registry.technique_count(id)?;
    for technique_index in 0..technique_count {
        let technique = registry
            .technique_name(id, technique_index)?
            .unwrap_or_default()
            .to_string();
        if args.technique.as_deref().is_some_and(|name| name != technique) {
            continue;
        }
        for pass_index in 0..registry.pass_count(id, &technique)? {
            let pass = registry
                .pass_name(id, &technique, pass_index)?
                .unwrap_or_default()
                .to_string();
            if args.pass.as_deref().is_some_and(|name| name != pass) {
                continue;
            }
            selected.push((technique_index, pass_index, technique.clone(), pass));
        }
    }
    if selected.is_empty() {
        bail!("no passes in {} match the selection", path.display());
    }

    let mut passes = Vec::with_capacity(selected.len());
    for (technique_index, pass_index, technique, pass) in selected {
        let outcome = match registry.compile_pass(id, technique_index, pass_index) {
            Ok(program) => PassOutcome {
                technique,
                pass,
                program: Some(program.get()),
                error: None,
            },
            Err(err) => PassOutcome {
                technique,
                pass,
                program: None,
                error: Some(err.to_string()),
            },
        };
        passes.push(outcome);
    }

    let report = CompileReport {
        file: path.display().to_string(),
        compiler: registry.compiler().target().to_string(),
        cache_dir,
        passes,
        cache: registry.cache_stats(),
    };
    let failed = report.passes.iter().filter(|pass| pass.error.is_some()).count();

    if args.source.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for pass in &report.passes {
            match pass.program {
                Some(program) => {
                    println!("ok     {}/{} program #{program}", pass.technique, pass.pass)
                }
                None => println!("FAILED {}/{}", pass.technique, pass.pass),
            }
        }
        let stats = report.cache;
        println!(
            "cache: hits={} misses={} stores={} rejected={}",
            stats.hits, stats.misses, stats.stores, stats.rejected
        );
    }

    if failed > 0 {
        eprint!("{}", registry.log(id)?);
        bail!("{failed} of {} passes failed to compile", report.passes.len());
    }
    Ok(())
}

pub fn cache(settings: &Settings, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::Where => {
            println!("{}", settings.cache_dir.display());
            Ok(())
        }
        CacheAction::Clear => {
            let cache = ShaderCache::new(Some(settings.cache_dir.clone()));
            let removed = cache.clear().with_context(|| {
                format!("failed to clear cache {}", settings.cache_dir.display())
            })?;
            println!(
                "Removed {removed} cached program(s) from {}",
                settings.cache_dir.display()
            );
            Ok(())
        }
    }
}
