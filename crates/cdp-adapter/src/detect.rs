//! Locating a Chrome/Chromium binary.

use std::env;
use std::path::PathBuf;

const CHROME_ENV: &str = "FLOWPILOT_CHROME";
const SKIP_OS_PATHS_ENV: &str = "FLOWPILOT_SKIP_OS_PATHS";

#[cfg(target_os = "windows")]
const EXECUTABLE_NAMES: &[&str] = &["chrome.exe", "chromium.exe", "msedge.exe"];

#[cfg(not(target_os = "windows"))]
const EXECUTABLE_NAMES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
];

/// First existing browser binary: `$FLOWPILOT_CHROME`, then `PATH`, then well-known install
/// locations unless `$FLOWPILOT_SKIP_OS_PATHS` is set.
pub(crate) fn detect_chrome_executable() -> Option<PathBuf> {
    explicit_candidate()
        .into_iter()
        .chain(path_candidates())
        .chain(install_locations())
        .find(|candidate| candidate.is_file())
}

fn explicit_candidate() -> Option<PathBuf> {
    let raw = env::var(CHROME_ENV).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

fn path_candidates() -> impl Iterator<Item = PathBuf> {
    EXECUTABLE_NAMES
        .iter()
        .filter_map(|name| which::which(name).ok())
}

fn install_locations() -> Vec<PathBuf> {
    let skip = env::var(SKIP_OS_PATHS_ENV)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    if skip {
        Vec::new()
    } else {
        os_install_locations()
    }
}

#[cfg(target_os = "windows")]
fn os_install_locations() -> Vec<PathBuf> {
    const SUFFIXES: &[&str] = &[
        "Google/Chrome/Application/chrome.exe",
        "Chromium/Application/chrome.exe",
        "Microsoft/Edge/Application/msedge.exe",
    ];
    ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .flat_map(|root| {
            let root = PathBuf::from(root.trim());
            SUFFIXES.iter().map(move |suffix| root.join(suffix))
        })
        .collect()
}

#[cfg(target_os = "macos")]
fn os_install_locations() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
    ]
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn os_install_locations() -> Vec<PathBuf> {
    [
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium-browser",
        "/usr/bin/chromium",
        "/snap/bin/chromium",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}
