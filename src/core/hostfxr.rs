//! Hosting runtime location - Builds `RuntimeParameters` for a configuration

use std::path::{Path, PathBuf};

use tracing::debug;

use super::configuration::{Configuration, RuntimeParameters};
use super::error::{HostError, HostResult};

/// Environment variable naming the runtime installation root
pub const DOTNET_ROOT_ENV: &str = "DOTNET_ROOT";

/// Resolve the hosting runtime library and the arguments it is started with.
///
/// `hostfxr_name` is the platform file name of the runtime library.
pub fn runtime_parameters(
    configuration: &Configuration,
    hostfxr_name: &str,
) -> HostResult<RuntimeParameters> {
    let hostfxr_location = match &configuration.hostfxr_path {
        Some(path) => path.clone(),
        None => {
            let root = runtime_root(configuration).ok_or_else(|| {
                HostError::HostfxrUnavailable(format!(
                    "no runtime root for '{}'",
                    configuration.config_path
                ))
            })?;
            let fxr_dir = highest_version_dir(&root.join("host").join("fxr"))?;
            fxr_dir.join(hostfxr_name)
        }
    };

    if !hostfxr_location.is_file() {
        return Err(HostError::HostfxrUnavailable(format!(
            "{} does not exist",
            hostfxr_location.display()
        )));
    }

    let arguments = build_arguments(configuration);
    debug!(
        "Hosting runtime for '{}' at {:?} with {} arguments",
        configuration.config_path,
        hostfxr_location,
        arguments.len()
    );

    Ok(RuntimeParameters::new(hostfxr_location, arguments))
}

fn is_muxer(process_path: &Path) -> bool {
    process_path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case("dotnet"))
        .unwrap_or(false)
}

fn runtime_root(configuration: &Configuration) -> Option<PathBuf> {
    if let Some(root) = &configuration.dotnet_root {
        return Some(root.clone());
    }
    if is_muxer(&configuration.process_path) {
        if let Some(dir) = configuration
            .process_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            return Some(dir.to_path_buf());
        }
    }
    std::env::var_os(DOTNET_ROOT_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Pick the numerically highest version directory, e.g. `8.0.11` over `8.0.2`
fn highest_version_dir(fxr_root: &Path) -> HostResult<PathBuf> {
    let entries = std::fs::read_dir(fxr_root).map_err(|e| {
        HostError::HostfxrUnavailable(format!("cannot read {}: {}", fxr_root.display(), e))
    })?;

    entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            parse_version(&name).map(|version| (version, entry.path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
        .ok_or_else(|| {
            HostError::HostfxrUnavailable(format!("no versions under {}", fxr_root.display()))
        })
}

/// `8.0.11-preview.1` parses as `[8, 0, 11]`
fn parse_version(name: &str) -> Option<Vec<u64>> {
    let release = name.split(['-', '+']).next()?;
    release
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

fn build_arguments(configuration: &Configuration) -> Vec<String> {
    let mut arguments = Vec::with_capacity(configuration.arguments.len() + 1);
    arguments.push(configuration.process_path.to_string_lossy().into_owned());

    for (i, arg) in configuration.arguments.iter().enumerate() {
        let path = Path::new(arg);
        if i == 0 && arg.to_ascii_lowercase().ends_with(".dll") && path.is_relative() {
            arguments.push(
                configuration
                    .physical_path
                    .join(path)
                    .to_string_lossy()
                    .into_owned(),
            );
        } else {
            arguments.push(arg.clone());
        }
    }
    arguments
}
