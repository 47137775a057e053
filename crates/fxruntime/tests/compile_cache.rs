use std::fs;
use std::path::Path;

use fxlang::ParseOptions;
use fxruntime::{
    EffectError, EffectRegistry, GraphicsContext, HeadlessContext, NagaCompiler, RegistryConfig,
    ShaderCache, MANIFEST_FILE,
};

const SHARED: &str = r"
common {
    const float TINT = TINT_VALUE;
}
";

const EFFECT: &str = r#"
#include "shared.fxh"

vertex FullscreenVS {
    layout(location = 0) out vec2 v_uv;
    void main() {
        vec2 uv = vec2(float((gl_VertexIndex << 1) & 2), float(gl_VertexIndex & 2));
        v_uv = uv;
        gl_Position = vec4(uv * 2.0 - 1.0, 0.0, 1.0);
    }
}

fragment TintFS {
    layout(location = 0) in vec2 v_uv;
    layout(location = 0) out vec4 color;
    void main() {
        color = vec4(v_uv * TINT, 0.0, 1.0);
    }
}

fragment TypoFS {
    layout(location = 0) out vec4 color;
    void main() {
        color = vec4(missing_value);
    }
}

technique Tint {
    pass Main { vertex = FullscreenVS; fragment = TintFS; blend = additive; }
}

technique Typo {
    pass Main { vertex = FullscreenVS; fragment = TypoFS; }
}
"#;

fn write_effect(dir: &Path) -> std::path::PathBuf {
    let include_dir = dir.join("include");
    fs::create_dir_all(&include_dir).unwrap();
    fs::write(include_dir.join("shared.fxh"), SHARED).unwrap();
    let path = dir.join("tint.fx");
    fs::write(&path, EFFECT).unwrap();
    path
}

fn options(dir: &Path, tint: &str) -> ParseOptions {
    ParseOptions::new()
        .with_include_path(dir.join("include"))
        .with_macro("TINT_VALUE", tint)
}

fn registry(cache: &Path) -> EffectRegistry<HeadlessContext, NagaCompiler> {
    EffectRegistry::new(
        RegistryConfig::with_cache_dir(cache),
        NagaCompiler::new(),
        HeadlessContext::new(),
    )
}

#[test]
fn second_registry_loads_program_from_cache() {
    let work = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let path = write_effect(work.path());

    let mut first = registry(cache.path());
    let id = first.create();
    first.parse_file(id, &path, &options(work.path(), "0.5")).unwrap();
    let program = first.compile_program(id, "Tint", "Main").unwrap();
    assert_eq!(first.cache_stats().misses, 1);
    assert_eq!(first.cache_stats().stores, 1);

    let entries: Vec<_> = fs::read_dir(cache.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
    let entry = entries[0].as_ref().unwrap().path();
    assert!(entry.join(MANIFEST_FILE).is_file());
    assert!(entry.join("vertex.spv").is_file());
    assert!(entry.join("fragment.spv").is_file());

    first.apply(id, program).unwrap();
    assert_eq!(first.context().current_program(), Some(program));
    first.unapply(id).unwrap();

    let mut second = registry(cache.path());
    let id = second.create();
    second.parse_file(id, &path, &options(work.path(), "0.5")).unwrap();
    second.compile_program(id, "Tint", "Main").unwrap();
    assert_eq!(second.cache_stats().hits, 1);
    assert_eq!(second.cache_stats().stores, 0);
}

#[test]
fn macro_values_change_the_cache_key() {
    let work = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let path = write_effect(work.path());

    let mut registry = registry(cache.path());
    for tint in ["0.5", "0.25"] {
        let id = registry.create();
        registry.parse_file(id, &path, &options(work.path(), tint)).unwrap();
        registry.compile_program(id, "Tint", "Main").unwrap();
    }
    assert_eq!(registry.cache_stats().hits, 0);
    assert_eq!(registry.cache_stats().stores, 2);

    assert_eq!(ShaderCache::new(Some(cache.path().to_path_buf())).clear().unwrap(), 2);
    assert_eq!(fs::read_dir(cache.path()).unwrap().count(), 0);
}

#[test]
fn compile_errors_land_in_the_effect_log() {
    let work = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let path = write_effect(work.path());

    let mut registry = registry(cache.path());
    let id = registry.create();
    registry.parse_file(id, &path, &options(work.path(), "1.0")).unwrap();

    let err = registry.compile_program(id, "Typo", "Main").unwrap_err();
    assert!(matches!(err, EffectError::Compile { .. }));
    let log = registry.log(id).unwrap();
    assert!(log.contains("Typo/Main"), "{log}");
    assert!(log.contains("TypoFS"), "{log}");
    assert_eq!(registry.cache_stats().stores, 0);

    registry.compile_program(id, "Tint", "Main").unwrap();
    assert_eq!(registry.context().render_state().blend, fxruntime::BlendMode::Off);
}

#[test]
fn missing_include_fails_the_parse() {
    let work = tempfile::tempdir().unwrap();
    let path = write_effect(work.path());

    let mut registry = registry(work.path());
    let id = registry.create();
    let err = registry
        .parse_file(id, &path, &ParseOptions::new().with_macro("TINT_VALUE", "1.0"))
        .unwrap_err();
    assert!(matches!(err, EffectError::Parse(_)));
    assert!(registry.log(id).unwrap().contains("shared.fxh"));
}
