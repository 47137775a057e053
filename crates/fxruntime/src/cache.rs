//! Content-addressed program cache on disk.
//!
//! Each entry is a directory named after the 128-bit key in hex:
//!
//! ```text
//! <cache>/<32 hex digits>/program.json   manifest (format, target, driver, interfaces)
//! <cache>/<32 hex digits>/<stage>.spv    one SPIR-V module per stage
//! ```
//!
//! The manifest is written last, so an entry without one is incomplete and
//! reads as a miss. IO problems never fail a compile: the first is logged at
//! `warn`, later ones at `debug` until the directory is changed.
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fxlang::{MacroSet, Stage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_128;

use crate::compile::{ProgramBinary, StageBinary, StageSource};
use crate::interface::StageInterface;

pub const MANIFEST_FILE: &str = "program.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(u128);

impl CacheKey {
    /// Hashes the compiler target, every stage (name and assembled source)
    /// in the order given, and the macro set. Fields are NUL-separated so
    /// that moving text between fields changes the key.
    pub fn compute(target: &str, stages: &[StageSource], macros: &MacroSet) -> Self {
        let mut buffer = Vec::new();
        let mut field = |bytes: &[u8]| {
            buffer.extend_from_slice(bytes);
            buffer.push(0);
        };

        field(target.as_bytes());
        for stage in stages {
            field(stage.stage.keyword().as_bytes());
            field(stage.name.as_bytes());
            field(stage.source.as_bytes());
        }
        for (name, value) in macros.iter() {
            field(name.as_bytes());
            field(value.as_bytes());
        }
        Self(xxh3_128(&buffer))
    }

    pub fn value(self) -> u128 {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    /// Loaded entries the graphics context refused.
    pub rejected: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format: u32,
    target: String,
    driver: String,
    stages: Vec<ManifestStage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestStage {
    stage: Stage,
    file: String,
    interface: StageInterface,
}

#[derive(Debug, Default)]
pub struct ShaderCache {
    dir: Option<PathBuf>,
    stats: CacheStats,
    reported_io: bool,
}

impl ShaderCache {
    /// `None` or an empty path disables the cache.
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir: dir.filter(|dir| !dir.as_os_str().is_empty()),
            stats: CacheStats::default(),
            reported_io: false,
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn set_directory(&mut self, dir: Option<PathBuf>) {
        self.dir = dir.filter(|dir| !dir.as_os_str().is_empty());
        self.reported_io = false;
        debug!(dir = ?self.dir, "cache directory changed");
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn entry_dir(&self, key: CacheKey) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(key.to_string()))
    }

    /// A usable binary for `key`, produced by `target` under `driver`.
    /// Anything else (absent, incomplete, stale, unreadable) counts as a miss.
    pub fn load(&mut self, key: CacheKey, target: &str, driver: &str) -> Option<ProgramBinary> {
        let entry = self.entry_dir(key)?;
        match read_entry(&entry) {
            Ok(Some((manifest, stages))) => {
                if manifest.format != FORMAT_VERSION
                    || manifest.target != target
                    || manifest.driver != driver
                {
                    debug!(
                        %key,
                        cached_target = %manifest.target,
                        cached_driver = %manifest.driver,
                        "cached program built for another target or driver"
                    );
                    self.stats.misses += 1;
                    return None;
                }
                self.stats.hits += 1;
                debug!(%key, "program cache hit");
                Some(ProgramBinary {
                    target: manifest.target,
                    stages,
                })
            }
            Ok(None) => {
                self.stats.misses += 1;
                debug!(%key, "program cache miss");
                None
            }
            Err(err) => {
                self.stats.misses += 1;
                self.report_io("read", &entry, &err);
                None
            }
        }
    }

    pub fn store(&mut self, key: CacheKey, driver: &str, binary: &ProgramBinary) {
        let Some(entry) = self.entry_dir(key) else {
            return;
        };
        match write_entry(&entry, driver, binary) {
            Ok(()) => {
                self.stats.stores += 1;
                debug!(%key, dir = %entry.display(), "stored program binary");
            }
            Err(err) => self.report_io("write", &entry, &err),
        }
    }

    /// Called when the context refused a binary returned by `load`.
    pub fn mark_rejected(&mut self, key: CacheKey) {
        self.stats.rejected += 1;
        debug!(%key, "cached program rejected by context");
    }

    /// Removes every entry directory. Other files in the directory are left
    /// alone. Returns the number of entries removed.
    pub fn clear(&self) -> io::Result<usize> {
        let Some(dir) = &self.dir else {
            return Ok(0);
        };
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let is_key = name
                .to_str()
                .is_some_and(|name| name.len() == 32 && name.bytes().all(|b| b.is_ascii_hexdigit()));
            if is_key && entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn report_io(&mut self, action: &str, entry: &Path, err: &io::Error) {
        if self.reported_io {
            debug!(action, entry = %entry.display(), error = %err, "program cache unavailable");
        } else {
            self.reported_io = true;
            warn!(
                action,
                entry = %entry.display(),
                error = %err,
                "program cache unavailable; compiling without it"
            );
        }
    }
}

fn stage_file(stage: Stage) -> String {
    format!("{}.spv", stage.keyword())
}

fn read_entry(entry: &Path) -> io::Result<Option<(Manifest, Vec<StageBinary>)>> {
    let manifest_text = match fs::read(entry.join(MANIFEST_FILE)) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    let manifest: Manifest = serde_json::from_slice(&manifest_text)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

    let mut stages = Vec::with_capacity(manifest.stages.len());
    for stage in &manifest.stages {
        let bytes = fs::read(entry.join(&stage.file))?;
        if bytes.len() % 4 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a whole number of words", stage.file),
            ));
        }
        stages.push(StageBinary {
            stage: stage.stage,
            words: bytemuck::pod_collect_to_vec(&bytes),
            interface: stage.interface.clone(),
        });
    }
    Ok(Some((manifest, stages)))
}

fn write_entry(entry: &Path, driver: &str, binary: &ProgramBinary) -> io::Result<()> {
    fs::create_dir_all(entry)?;
    let mut manifest = Manifest {
        format: FORMAT_VERSION,
        target: binary.target.clone(),
        driver: driver.to_string(),
        stages: Vec::with_capacity(binary.stages.len()),
    };
    for stage in &binary.stages {
        let file = stage_file(stage.stage);
        fs::write(entry.join(&file), bytemuck::cast_slice::<u32, u8>(&stage.words))?;
        manifest.stages.push(ManifestStage {
            stage: stage.stage,
            file,
            interface: stage.interface.clone(),
        });
    }
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    fs::write(entry.join(MANIFEST_FILE), json)
}
