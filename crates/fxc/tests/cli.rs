use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const EFFECT: &str = r#"
#include "palette.fxh"

vertex QuadVS {
    layout(location = 0) out vec2 v_uv;
    void main() {
        vec2 uv = vec2(float((gl_VertexIndex << 1) & 2), float(gl_VertexIndex & 2));
        v_uv = uv;
        gl_Position = vec4(uv * 2.0 - 1.0, 0.0, 1.0);
    }
}

fragment ShadeFS {
    layout(location = 0) in vec2 v_uv;
    layout(location = 0) out vec4 color;
    void main() {
        color = vec4(v_uv * BRIGHTNESS, 0.0, 1.0);
    }
}

group Quality {
    technique Shade {
        pass Base { vertex = QuadVS; fragment = ShadeFS; blend = alpha; }
    }
}
"#;

const PALETTE: &str = "common { const float BRIGHTNESS = LEVEL; }\n";

fn write_fixture(root: &Path) {
    fs::create_dir_all(root.join("include")).unwrap();
    fs::write(root.join("include/palette.fxh"), PALETTE).unwrap();
    fs::write(root.join("shade.fx"), EFFECT).unwrap();
}

fn fxc(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_fxc"))
        .current_dir(root)
        .env("FXC_CONFIG_DIR", root.join("config"))
        .env("FXC_CACHE_DIR", root.join("cache"))
        .args(args)
        .output()
        .expect("failed to run fxc")
}

fn json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "fxc failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("fxc printed invalid JSON")
}

#[test]
fn inspect_lists_techniques_and_passes() {
    let root = TempDir::new().unwrap();
    write_fixture(root.path());

    let report = json(&fxc(
        root.path(),
        &["inspect", "shade.fx", "-I", "include", "-D", "LEVEL=0.5", "--json"],
    ));
    assert_eq!(report["groups"][0], "Quality");
    assert_eq!(report["techniques"][0]["name"], "Shade");
    assert_eq!(report["techniques"][0]["group"], "Quality");
    let pass = &report["techniques"][0]["passes"][0];
    assert_eq!(pass["name"], "Base");
    assert_eq!(pass["stages"][0]["stage"], "vertex");
    assert_eq!(pass["stages"][1]["block"], "ShadeFS");
}

#[test]
fn second_compile_hits_the_cache() {
    let root = TempDir::new().unwrap();
    write_fixture(root.path());
    let args = [
        "compile", "shade.fx", "-I", "include", "-D", "LEVEL=0.5", "--cache-dir", "programs", "--json",
    ];

    let first = json(&fxc(root.path(), &args));
    assert_eq!(first["passes"][0]["technique"], "Shade");
    assert!(first["passes"][0]["program"].is_u64());
    assert_eq!(first["cache"]["stores"], 1);
    assert_eq!(first["cache"]["hits"], 0);

    let second = json(&fxc(root.path(), &args));
    assert_eq!(second["cache"]["hits"], 1);
    assert_eq!(second["cache"]["stores"], 0);

    let entries = fs::read_dir(root.path().join("programs")).unwrap().count();
    assert_eq!(entries, 1);
}

#[test]
fn missing_include_fails_with_location() {
    let root = TempDir::new().unwrap();
    write_fixture(root.path());

    let output = fxc(root.path(), &["compile", "shade.fx", "-D", "LEVEL=1.0"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("palette.fxh"), "{stderr}");
}

#[test]
fn unknown_pass_selection_is_an_error() {
    let root = TempDir::new().unwrap();
    write_fixture(root.path());

    let output = fxc(
        root.path(),
        &["compile", "shade.fx", "-I", "include", "-D", "LEVEL=1.0", "--pass", "Missing"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no passes"));
}

#[test]
fn cache_where_and_clear_use_the_configured_directory() {
    let root = TempDir::new().unwrap();
    write_fixture(root.path());
    fs::create_dir_all(root.path().join("config")).unwrap();
    fs::write(
        root.path().join("config/fx.toml"),
        "cache_dir = \"../shared-cache\"\ninclude_paths = [\"../include\"]\n\n[macros]\nLEVEL = \"0.75\"\n",
    )
    .unwrap();

    let output = fxc(root.path(), &["cache", "where"]);
    assert!(output.status.success());
    let printed = String::from_utf8_lossy(&output.stdout);
    assert!(printed.trim().ends_with("shared-cache"), "{printed}");

    let compiled = json(&fxc(root.path(), &["compile", "shade.fx", "--json"]));
    assert_eq!(compiled["cache"]["stores"], 1);

    let output = fxc(root.path(), &["cache", "clear"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Removed 1"));
    assert_eq!(
        fs::read_dir(root.path().join("shared-cache")).unwrap().count(),
        0
    );
}
