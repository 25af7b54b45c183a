//! Framework detection from a working tree's marker files.

use std::cell::OnceCell;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{DetectionRule, FrameworkAdapter, known_ids, lookup, registry};

/// Why no adapter could be chosen for a job.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// An explicit framework identifier is not in the registry.
    #[error("Unknown framework '{0}' (expected one of: {1})")]
    UnknownFramework(String, String),

    /// No adapter's detection rules hold for the working tree.
    #[error("Could not detect a supported test framework in {0}")]
    NoMatch(PathBuf),

    /// A marker file exists but could not be inspected.
    #[error("Failed to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageManifest {
    #[serde(default)]
    dependencies: serde_json::Map<String, Value>,
    #[serde(default)]
    dev_dependencies: serde_json::Map<String, Value>,
}

impl PackageManifest {
    fn depends_on(&self, package: &str) -> bool {
        self.dependencies.contains_key(package) || self.dev_dependencies.contains_key(package)
    }
}

/// Lazily loaded view of the working tree used while evaluating rules.
struct Probe<'a> {
    root: &'a Path,
    manifest: OnceCell<Option<PackageManifest>>,
}

impl<'a> Probe<'a> {
    fn new(root: &'a Path) -> Self {
        Self {
            root,
            manifest: OnceCell::new(),
        }
    }

    fn file_exists(&self, name: &str) -> Result<bool, DetectionError> {
        let path = self.root.join(name);
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(DetectionError::Io { path, source }),
        }
    }

    fn manifest(&self) -> Result<Option<&PackageManifest>, DetectionError> {
        if let Some(cached) = self.manifest.get() {
            return Ok(cached.as_ref());
        }

        let path = self.root.join("package.json");
        let loaded = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<PackageManifest>(&content) {
                Ok(manifest) => Some(manifest),
                Err(e) => {
                    warn!("Ignoring unreadable {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(source) => return Err(DetectionError::Io { path, source }),
        };

        Ok(self.manifest.get_or_init(|| loaded).as_ref())
    }

    fn holds(&self, rule: &DetectionRule) -> Result<bool, DetectionError> {
        match rule {
            DetectionRule::FileExists(name) => self.file_exists(name),
            DetectionRule::AnyFileExists(names) => {
                for name in names.iter() {
                    if self.file_exists(name)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            DetectionRule::PackageDependency(package) => {
                Ok(self.manifest()?.is_some_and(|m| m.depends_on(package)))
            }
        }
    }
}

/// Chooses the adapter for a working tree.
///
/// An explicit identifier is looked up in the registry and never falls back
/// to detection. Without one, adapters are tried in registry order and the
/// first whose rules all hold wins. The tree is only read, never modified.
///
/// # Errors
///
/// - [`DetectionError::UnknownFramework`] if `explicit` names no adapter
/// - [`DetectionError::NoMatch`] if no adapter matches `root`
/// - [`DetectionError::Io`] if a marker file cannot be read
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use flaky_detector::framework::detect_framework;
///
/// let adapter = detect_framework(Path::new("."), None)?;
/// println!("Detected {}", adapter.id);
/// # Ok::<(), flaky_detector::framework::DetectionError>(())
/// ```
pub fn detect_framework(
    root: &Path,
    explicit: Option<&str>,
) -> Result<&'static FrameworkAdapter, DetectionError> {
    if let Some(id) = explicit {
        return lookup(id).ok_or_else(|| DetectionError::UnknownFramework(id.to_string(), known_ids()));
    }

    let probe = Probe::new(root);
    for adapter in registry() {
        let mut matched = true;
        for rule in adapter.detection {
            if !probe.holds(rule)? {
                matched = false;
                break;
            }
        }
        if matched {
            debug!("Detected framework {} in {}", adapter.id, root.display());
            return Ok(adapter);
        }
    }

    Err(DetectionError::NoMatch(root.to_path_buf()))
}
