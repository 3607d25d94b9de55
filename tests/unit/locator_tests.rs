//! Unit tests for agent executable discovery.

use std::fs;
use std::path::Path;

use agent_conduit::agent::locator::{ExecutableKind, Locator};
use agent_conduit::config::AgentConfig;

fn touch(path: &Path) {
    fs::write(path, "#!/bin/sh\n").expect("write candidate");
}

#[test]
fn bundled_script_wins_over_install_dirs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("cli.js");
    let install = dir.path().join("bin");
    fs::create_dir(&install).expect("mkdir");
    touch(&script);
    touch(&install.join("claude"));

    let found = Locator::new("claude", Some(script.clone()), vec![install])
        .with_search_path(dir.path().as_os_str())
        .resolve()
        .expect("candidate exists");

    assert_eq!(found.path, script);
    assert_eq!(found.kind, ExecutableKind::BundledScript);
}

#[test]
fn missing_bundled_script_falls_through_to_install_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    fs::create_dir(&first).expect("mkdir");
    fs::create_dir(&second).expect("mkdir");
    touch(&second.join("claude"));

    let found = Locator::new(
        "claude",
        Some(dir.path().join("absent.js")),
        vec![first, second.clone()],
    )
    .with_search_path(dir.path().as_os_str())
    .resolve()
    .expect("candidate exists");

    assert_eq!(found.path, second.join("claude"));
    assert_eq!(found.kind, ExecutableKind::InstalledBinary);
}

#[test]
fn directory_named_like_binary_is_not_a_candidate() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir(dir.path().join("claude")).expect("mkdir");
    let empty = tempfile::tempdir().expect("tempdir");

    let found = Locator::new("claude", None, vec![dir.path().to_path_buf()])
        .with_search_path(empty.path().as_os_str())
        .resolve();

    assert!(found.is_none());
}

#[cfg(unix)]
#[test]
fn search_path_lookup_is_the_last_resort() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");
    let binary = dir.path().join("my-agent");
    touch(&binary);
    fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).expect("chmod");

    let found = Locator::new("my-agent", None, Vec::new())
        .with_search_path(dir.path().as_os_str())
        .resolve()
        .expect("found on search path");

    assert_eq!(found.path, binary);
    assert_eq!(found.kind, ExecutableKind::InstalledBinary);
}

/// Nothing at any known location and nothing on the search path.
#[test]
fn no_candidate_anywhere_resolves_to_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let empty = tempfile::tempdir().expect("tempdir");

    let found = Locator::new(
        "agent-conduit-test-missing",
        Some(dir.path().join("missing.js")),
        vec![dir.path().to_path_buf()],
    )
    .with_search_path(empty.path().as_os_str())
    .resolve();

    assert!(found.is_none());
}

#[test]
fn from_config_uses_configured_dirs() {
    let dir = tempfile::tempdir().expect("tempdir");
    touch(&dir.path().join("custom-agent"));

    let config = AgentConfig {
        binary_name: "custom-agent".to_owned(),
        install_dirs: vec![dir.path().to_path_buf()],
        ..AgentConfig::default()
    };

    let found = Locator::from_config(&config)
        .resolve()
        .expect("configured dir probed");
    assert_eq!(found.path, dir.path().join("custom-agent"));
}
