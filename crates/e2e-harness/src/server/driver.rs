// Playwright driver discovery
//
// The driver is a Node.js program (`cli.js run-driver`). It is looked up, in
// order, from:
// 1. PLAYWRIGHT_DRIVER_PATH: a directory holding `node` and `package/cli.js`
// 2. PLAYWRIGHT_NODE_EXE plus PLAYWRIGHT_CLI_JS
// 3. the global npm root, then the local one, with `node` from PATH

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Paths needed to start the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverPaths {
    pub node: PathBuf,
    pub cli_js: PathBuf,
}

/// Locates the driver.
///
/// # Errors
///
/// Returns `Error::DriverNotFound` if no search location has one.
pub fn find_driver() -> Result<DriverPaths> {
    let lookup = |name: &str| std::env::var(name).ok();
    if let Some(paths) = from_env(lookup) {
        return Ok(paths);
    }
    for args in [&["root", "-g"][..], &["root"][..]] {
        if let Some(paths) = npm_root(args).and_then(|root| in_node_modules(&root)) {
            return Ok(paths);
        }
    }
    Err(Error::DriverNotFound)
}

fn node_binary_in(dir: &Path) -> PathBuf {
    if cfg!(windows) {
        dir.join("node.exe")
    } else {
        dir.join("node")
    }
}

fn existing(node: PathBuf, cli_js: PathBuf) -> Option<DriverPaths> {
    (node.exists() && cli_js.exists()).then_some(DriverPaths { node, cli_js })
}

fn from_env<F>(lookup: F) -> Option<DriverPaths>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(dir) = lookup("PLAYWRIGHT_DRIVER_PATH") {
        let dir = PathBuf::from(dir);
        if let Some(paths) = existing(node_binary_in(&dir), dir.join("package").join("cli.js")) {
            return Some(paths);
        }
        tracing::warn!("PLAYWRIGHT_DRIVER_PATH={} has no driver", dir.display());
    }
    match (lookup("PLAYWRIGHT_NODE_EXE"), lookup("PLAYWRIGHT_CLI_JS")) {
        (Some(node), Some(cli)) => existing(PathBuf::from(node), PathBuf::from(cli)),
        _ => None,
    }
}

fn npm_root(args: &[&str]) -> Option<PathBuf> {
    let output = Command::new("npm").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let root = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    root.exists().then_some(root)
}

fn in_node_modules(node_modules: &Path) -> Option<DriverPaths> {
    let cli_js = [
        node_modules.join("playwright").join("cli.js"),
        node_modules.join("@playwright").join("test").join("cli.js"),
    ]
    .into_iter()
    .find(|p| p.exists())?;
    let node = find_node_executable()?;
    Some(DriverPaths { node, cli_js })
}

fn find_node_executable() -> Option<PathBuf> {
    let which = if cfg!(windows) { "where" } else { "which" };
    if let Ok(output) = Command::new(which).arg("node").output() {
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if let Some(path) = stdout.lines().next().map(|l| PathBuf::from(l.trim())) {
                if path.exists() {
                    return Some(path);
                }
            }
        }
    }

    let common: &[&str] = if cfg!(windows) {
        &[
            "C:\\Program Files\\nodejs\\node.exe",
            "C:\\Program Files (x86)\\nodejs\\node.exe",
        ]
    } else {
        &[
            "/usr/local/bin/node",
            "/usr/bin/node",
            "/opt/homebrew/bin/node",
        ]
    };
    common.iter().map(PathBuf::from).find(|p| p.exists())
}
