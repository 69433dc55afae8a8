use std::path::{Path, PathBuf};

use minnow_common::error::DiskError;

use super::DiskResult;

/// Longest file name most filesystems accept, counted in bytes so multi-byte
/// names hit the limit earlier than their character count suggests.
pub const MAX_COMPONENT_BYTES: usize = 255;

const EXTENDED_PREFIX: &str = r"\\?\";
const EXTENDED_UNC_PREFIX: &str = r"\\?\UNC\";

/// How volume-relative paths become filesystem paths.
///
/// `WindowsExtended` emits `\\?\`-prefixed paths so the total length may run
/// past the legacy 260 character limit; only the per-component limit applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    Posix,
    WindowsExtended,
}

impl PathStyle {
    pub const fn native() -> Self {
        if cfg!(windows) {
            Self::WindowsExtended
        } else {
            Self::Posix
        }
    }

    pub fn check_component(component: &str) -> DiskResult<()> {
        if component.len() > MAX_COMPONENT_BYTES {
            return Err(DiskError::FileNameTooLong);
        }
        if component == "." || component == ".." {
            return Err(DiskError::AccessDenied);
        }
        Ok(())
    }

    /// Resolves `volume/path` under `root`, validating every component.
    pub fn resolve(&self, root: &Path, volume: &str, path: &str) -> DiskResult<PathBuf> {
        if volume.is_empty() || volume.contains('/') {
            return Err(DiskError::VolumeNotFound);
        }
        Self::check_component(volume)?;

        let components = path
            .split('/')
            .filter(|component| !component.is_empty())
            .collect::<Vec<_>>();
        for component in &components {
            Self::check_component(component)?;
        }

        match self {
            Self::Posix => {
                let mut full = root.join(volume);
                full.extend(components);
                Ok(full)
            }
            Self::WindowsExtended => {
                let mut full = extended_root(&root.to_string_lossy());
                for component in std::iter::once(volume).chain(components) {
                    full.push('\\');
                    full.push_str(component);
                }
                Ok(PathBuf::from(full))
            }
        }
    }
}

fn extended_root(root: &str) -> String {
    let root = root.replace('/', "\\");
    let root = root.trim_end_matches('\\');
    if root.starts_with(EXTENDED_PREFIX) {
        root.to_string()
    } else if let Some(share) = root.strip_prefix(r"\\") {
        format!("{EXTENDED_UNC_PREFIX}{share}")
    } else {
        format!("{EXTENDED_PREFIX}{root}")
    }
}
