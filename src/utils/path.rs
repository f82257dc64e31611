//! Path utilities for the file list in the D2V header

use std::path::{Component, Path, PathBuf};

use crate::error::D2vResult;

/// Path helpers for D2V header file names
pub struct PathUtils;

impl PathUtils {
    /// Absolute form of `path`, resolved against the working directory.
    ///
    /// Does not touch the filesystem beyond reading the working directory,
    /// so it works for outputs that do not exist yet.
    pub fn absolute<P: AsRef<Path>>(path: P) -> D2vResult<PathBuf> {
        let path = path.as_ref();
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Ok(Self::normalize(&joined))
    }

    /// Remove `.` components and fold `..` into their parent
    pub fn normalize(path: &Path) -> PathBuf {
        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        normalized.push("..");
                    }
                }
                other => normalized.push(other.as_os_str()),
            }
        }
        normalized
    }

    /// `path` expressed relative to directory `base`. Both must be absolute.
    ///
    /// Returns `None` when no relative form exists (different roots or
    /// prefixes).
    pub fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
        let path = Self::normalize(path);
        let base = Self::normalize(base);

        let mut path_components = path.components().peekable();
        let mut base_components = base.components().peekable();

        match (path_components.peek(), base_components.peek()) {
            (Some(a), Some(b)) if a != b => return None,
            _ => {}
        }

        while let (Some(a), Some(b)) = (path_components.peek(), base_components.peek()) {
            if a != b {
                break;
            }
            path_components.next();
            base_components.next();
        }

        let mut relative = PathBuf::new();
        for _ in base_components {
            relative.push("..");
        }
        for component in path_components {
            relative.push(component.as_os_str());
        }
        Some(relative)
    }

    /// Names written into the D2V header for `inputs`.
    ///
    /// Absolute by default. With `relative`, names are relative to the
    /// directory of `d2v_path`, falling back to absolute when impossible.
    pub fn header_names<P: AsRef<Path>>(
        inputs: &[P],
        d2v_path: Option<&Path>,
        relative: bool,
    ) -> D2vResult<Vec<String>> {
        let base = match (relative, d2v_path) {
            (true, Some(d2v)) => Self::absolute(d2v)?.parent().map(Path::to_path_buf),
            _ => None,
        };

        inputs
            .iter()
            .map(|input| {
                let absolute = Self::absolute(input)?;
                let name = base
                    .as_deref()
                    .and_then(|base| Self::relative_to(&absolute, base))
                    .unwrap_or(absolute);
                Ok(name.to_string_lossy().into_owned())
            })
            .collect()
    }
}
