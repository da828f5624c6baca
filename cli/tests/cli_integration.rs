//! Integration tests: run the `ukpack` binary end to end.
//!
//! Each test points `UKPACK_CONFIG` at a path inside its own temp directory
//! so a user's settings file never leaks in.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn ukpack(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ukpack"))
        .args(args)
        .current_dir(dir)
        .env("UKPACK_CONFIG", dir.join("config.yaml"))
        .env_remove("UKPACK_REGISTRY_URL")
        .env_remove("UKPACK_REGISTRY_PROJECT")
        .env_remove("REGISTRY_USERNAME")
        .env_remove("REGISTRY_PASSWORD")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run ukpack")
}

fn write_inputs(dir: &Path) {
    std::fs::write(dir.join("hello_kvm-x86_64"), b"\x7fELF").unwrap();
    std::fs::write(dir.join(".config"), "CONFIG_UK_NAME=\"hello\"\n").unwrap();
}

#[test]
fn test_package_writes_default_output() {
    let tmp = TempDir::new().unwrap();
    write_inputs(tmp.path());

    let out = ukpack(
        tmp.path(),
        &["package", "hello_kvm-x86_64", "x86_64", "kvm", ".config"],
    );
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(tmp.path().join("package").join("hello_kvm-x86_64").is_file());

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("sha256:"));
    assert!(stdout.contains("application/vnd.oci.image.manifest.v1+json"));
}

#[test]
fn test_package_quiet_prints_digest() {
    let tmp = TempDir::new().unwrap();
    write_inputs(tmp.path());

    let out = ukpack(
        tmp.path(),
        &[
            "package",
            "hello_kvm-x86_64",
            "x86_64",
            "kvm",
            ".config",
            "--hash-type",
            "sha384",
            "--compression",
            "tar",
            "--output",
            "out.tar",
            "--quiet",
        ],
    );
    assert!(out.status.success());

    let stdout = String::from_utf8_lossy(&out.stdout);
    let digest = stdout.trim();
    assert!(digest.starts_with("sha384:"));
    assert_eq!(digest.len(), "sha384:".len() + 96);
    assert!(tmp.path().join("out.tar").is_file());
}

#[test]
fn test_package_missing_kernel_fails() {
    let tmp = TempDir::new().unwrap();
    write_inputs(tmp.path());

    let out = ukpack(tmp.path(), &["package", "missing", "x86_64", "kvm", ".config"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Error:"));
    assert!(!tmp.path().join("package").exists());
}

#[test]
fn test_push_without_server_fails() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("image"), b"").unwrap();

    let out = ukpack(tmp.path(), &["push", "--image", "image"]);
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Error: Configuration error"));
}

#[test]
fn test_push_not_a_tar_verbose() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("image"), "not a tar\n".repeat(100)).unwrap();

    let out = ukpack(
        tmp.path(),
        &[
            "push",
            "--image",
            "image",
            "--server",
            "http://127.0.0.1:9",
            "--verbose",
        ],
    );
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Not a tar archive"));
}

#[test]
fn test_settings_file_supplies_output_dir() {
    let tmp = TempDir::new().unwrap();
    write_inputs(tmp.path());
    std::fs::write(
        tmp.path().join("config.yaml"),
        "package:\n  output_dir: dist\n  compression: tar\n",
    )
    .unwrap();

    let out = ukpack(
        tmp.path(),
        &["package", "hello_kvm-x86_64", "x86_64", "kvm", ".config"],
    );
    assert!(out.status.success());
    assert!(tmp.path().join("dist").join("hello_kvm-x86_64").is_file());
}
