//! Command flows driven through parsed arguments
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use clap::Parser;
use pretty_assertions::assert_eq;
use qpk_cli::commands::{diff, inspect, pack, patch, verify};
use qpk_cli::{Cli, Commands, OutputFormat, handle};
use qpk_formats::{ContainerFormat, DiffOperation, INDEX_FILE, WORKSPACE_INDEX_FILE};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("qpk").chain(args.iter().copied()))
        .expect("Operation should succeed")
}

fn write(root: &Path, path: &str, data: &[u8]) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, data).unwrap();
}

fn pack_args(assets: &Path, out: &Path, extra: &[&str]) -> qpk_cli::PackArgs {
    let mut args = vec![
        "pack",
        assets.to_str().unwrap(),
        "--name",
        "main",
        "--output",
        out.to_str().unwrap(),
    ];
    args.extend_from_slice(extra);
    match parse(&args).command {
        Commands::Pack(args) => args,
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn pack_diff_patch_verify() {
    let assets = TempDir::new().expect("Operation should succeed");
    let out = TempDir::new().expect("Operation should succeed");
    write(assets.path(), "images/a.png", b"A");
    write(assets.path(), "images/b.png", b"B");

    let first = pack::build(&pack_args(assets.path(), out.path(), &[]))
        .expect("Operation should succeed");
    assert_eq!(first.version.bundle_version, 1);
    assert_eq!(first.manifest.total_files, 2);

    write(assets.path(), "images/b.png", b"B2");
    write(assets.path(), "audio/theme.ogg", b"C");
    fs::remove_file(assets.path().join("images/a.png")).unwrap();
    let second = pack::build(&pack_args(assets.path(), out.path(), &[]))
        .expect("Operation should succeed");
    assert_eq!(second.version.bundle_version, 2);

    let out_dir = out.path().to_str().unwrap();
    let Commands::Diff(diff_args) =
        parse(&["diff", "--output", out_dir, "--from", "1", "--to", "2"]).command
    else {
        panic!("expected diff");
    };
    let summary = diff::diff(&diff_args).expect("Operation should succeed");
    let ops: Vec<_> = summary
        .records()
        .into_iter()
        .map(|r| (r.path, r.operation))
        .collect();
    assert_eq!(
        ops,
        vec![
            ("audio/theme.ogg".to_string(), DiffOperation::Added),
            ("images/a.png".to_string(), DiffOperation::Deleted),
            ("images/b.png".to_string(), DiffOperation::Modified),
        ]
    );

    let Commands::Patch(patch_args) =
        parse(&["patch", "--output", out_dir, "--from", "1", "--to", "2"]).command
    else {
        panic!("expected patch");
    };
    let outcome = patch::package(&patch_args)
        .expect("Operation should succeed")
        .expect("builds differ");
    assert_eq!(outcome.descriptor.change_count, 3);
    assert!(out.path().join(INDEX_FILE).exists());

    let verified = verify::verify(&outcome.path, None).expect("Operation should succeed");
    assert!(verified.manifest.is_patch);
    assert_eq!(verified.entries, 2);

    let bundle = verify::verify(&second.container_path, None).expect("Operation should succeed");
    assert!(!bundle.manifest.is_patch);
    assert_eq!(bundle.entries, 2);
}

#[test]
fn patch_from_asset_directory() {
    let assets = TempDir::new().expect("Operation should succeed");
    let out = TempDir::new().expect("Operation should succeed");
    write(assets.path(), "data/table.json", b"{}");
    pack::build(&pack_args(assets.path(), out.path(), &[])).expect("Operation should succeed");
    write(assets.path(), "data/table.json", b"{\"a\":1}");
    pack::build(&pack_args(assets.path(), out.path(), &[])).expect("Operation should succeed");

    let Commands::Patch(args) = parse(&[
        "patch",
        "--output",
        out.path().to_str().unwrap(),
        "--from",
        "1",
        "--to",
        "2",
        "--assets",
        assets.path().to_str().unwrap(),
        "--container",
        "zip",
    ])
    .command
    else {
        panic!("expected patch");
    };
    let outcome = patch::package(&args)
        .expect("Operation should succeed")
        .expect("builds differ");
    assert_eq!(outcome.descriptor.file, "main-patch-v1-v2.zip");
    assert_eq!(outcome.diff.modified.len(), 1);
}

#[test]
fn identical_builds_report_no_patch() {
    let assets = TempDir::new().expect("Operation should succeed");
    let out = TempDir::new().expect("Operation should succeed");
    write(assets.path(), "images/a.png", b"A");
    pack::build(&pack_args(assets.path(), out.path(), &[])).expect("Operation should succeed");
    pack::build(&pack_args(assets.path(), out.path(), &[])).expect("Operation should succeed");

    let cli = parse(&[
        "patch",
        "--output",
        out.path().to_str().unwrap(),
        "--from",
        "1",
        "--to",
        "2",
    ]);
    let Commands::Patch(args) = &cli.command else {
        panic!("expected patch");
    };
    assert!(
        patch::package(args)
            .expect("Operation should succeed")
            .is_none()
    );
    handle(cli.command, OutputFormat::Json).expect("Operation should succeed");
}

#[test]
fn encrypted_pack_needs_key() {
    let assets = TempDir::new().expect("Operation should succeed");
    let out = TempDir::new().expect("Operation should succeed");
    write(assets.path(), "images/a.png", b"A");

    let err = pack::build(&pack_args(assets.path(), out.path(), &["--encrypt"]))
        .expect_err("missing key");
    assert!(err.to_string().contains("--encrypt requires"));

    let key = "11".repeat(32);
    let outcome = pack::build(&pack_args(
        assets.path(),
        out.path(),
        &["--encrypt", "--key", &key],
    ))
    .expect("Operation should succeed");

    assert!(verify::verify(&outcome.container_path, None).is_err());
    let verified =
        verify::verify(&outcome.container_path, Some(&key)).expect("Operation should succeed");
    assert_eq!(verified.entries, 1);

    let summary = inspect::inspect(&outcome.container_path).expect("Operation should succeed");
    assert!(summary.encrypted);
}

#[test]
fn inspect_zip_bundle() {
    let assets = TempDir::new().expect("Operation should succeed");
    let out = TempDir::new().expect("Operation should succeed");
    write(assets.path(), "images/a.png", b"A");
    write(assets.path(), "fonts/body.ttf", b"F");

    let outcome = pack::build(&pack_args(
        assets.path(),
        out.path(),
        &["--container", "zip", "--compression", "none"],
    ))
    .expect("Operation should succeed");
    assert_eq!(
        outcome.container_path.extension().unwrap().to_string_lossy(),
        "zip"
    );

    let summary = inspect::inspect(&outcome.container_path).expect("Operation should succeed");
    assert_eq!(summary.format, ContainerFormat::Zip);
    assert_eq!(summary.entry_count, 2);
    assert!(!summary.compressed);

    let cli = parse(&["inspect", outcome.container_path.to_str().unwrap(), "-o", "json"]);
    handle(cli.command, cli.format).expect("Operation should succeed");
}

#[test]
fn verify_rejects_tampered_container() {
    let assets = TempDir::new().expect("Operation should succeed");
    let out = TempDir::new().expect("Operation should succeed");
    write(assets.path(), "images/a.png", b"original payload");

    let outcome = pack::build(&pack_args(
        assets.path(),
        out.path(),
        &["--compression", "none"],
    ))
    .expect("Operation should succeed");

    let mut bytes = fs::read(&outcome.container_path).unwrap();
    let at = bytes
        .windows(b"original".len())
        .position(|w| w == b"original")
        .expect("payload stored uncompressed");
    bytes[at] ^= 0xFF;
    fs::write(&outcome.container_path, bytes).unwrap();

    assert!(verify::verify(&outcome.container_path, None).is_err());
}

#[test]
fn workspace_layout() {
    let assets = TempDir::new().expect("Operation should succeed");
    let out = TempDir::new().expect("Operation should succeed");
    write(assets.path(), "images/a.png", b"A");

    let outcome = pack::build(&pack_args(assets.path(), out.path(), &["--workspace"]))
        .expect("Operation should succeed");
    assert!(outcome.container_path.starts_with(out.path().join("main")));

    write(assets.path(), "images/a.png", b"A2");
    pack::build(&pack_args(assets.path(), out.path(), &["--workspace"]))
        .expect("Operation should succeed");

    let Commands::Patch(args) = parse(&[
        "patch",
        "--output",
        out.path().to_str().unwrap(),
        "--workspace",
        "--from",
        "1",
        "--to",
        "2",
    ])
    .command
    else {
        panic!("expected patch");
    };
    patch::package(&args)
        .expect("Operation should succeed")
        .expect("builds differ");
    assert!(out.path().join(WORKSPACE_INDEX_FILE).exists());
}

#[test]
fn empty_asset_directory_is_rejected() {
    let assets = TempDir::new().expect("Operation should succeed");
    let out = TempDir::new().expect("Operation should succeed");
    assert!(pack::build(&pack_args(assets.path(), out.path(), &[])).is_err());
}

#[test]
fn same_file_name_in_unrecognized_directories() {
    let assets = TempDir::new().expect("Operation should succeed");
    let out = TempDir::new().expect("Operation should succeed");
    write(assets.path(), "ui/button.png", b"ui");
    write(assets.path(), "icons/button.png", b"icon");

    let outcome = pack::build(&pack_args(assets.path(), out.path(), &[]))
        .expect("Operation should succeed");
    assert_eq!(outcome.manifest.total_files, 2);

    let verified = verify::verify(&outcome.container_path, None).expect("Operation should succeed");
    assert_eq!(verified.entries, 2);
}
