use crate::error::{MatchError, Result};
use globset::{GlobBuilder, GlobMatcher};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// How an artifact's content is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Whole-file text.
    Text,
    /// XML test report, evaluated per failing test case.
    StructuredReport,
}

impl ArtifactKind {
    #[must_use]
    pub fn infer(name: &str) -> Self {
        if name.to_ascii_lowercase().ends_with(".xml") {
            Self::StructuredReport
        } else {
            Self::Text
        }
    }
}

/// A named piece of build output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub content: String,
}

/// Read access to the artifacts of a single build.
///
/// Content is fetched lazily: the matcher lists names first and only reads
/// files a rule actually targets.
pub trait ArtifactView {
    /// Every artifact name in the build, sorted.
    fn names(&self) -> Vec<String>;

    /// Content of `name`, or `None` when the build has no such artifact.
    fn read(&self, name: &str) -> Result<Option<String>>;

    fn exists(&self, name: &str) -> bool {
        self.names().iter().any(|candidate| candidate == name)
    }

    /// Resolves `pattern` (a literal name or glob) and reads every match.
    fn get(&self, pattern: &str) -> Result<Vec<Artifact>> {
        let matcher = compile_glob(pattern)?;
        let mut artifacts = Vec::new();
        for name in self.names() {
            if !matcher.is_match(&name) {
                continue;
            }
            if let Some(content) = self.read(&name)? {
                artifacts.push(Artifact {
                    kind: ArtifactKind::infer(&name),
                    name,
                    content,
                });
            }
        }
        Ok(artifacts)
    }
}

pub(crate) fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|err| MatchError::Other(format!("Invalid glob pattern '{pattern}': {err}")))
}

/// Artifacts held in memory, mostly for callers that already fetched them.
#[derive(Debug, Clone, Default)]
pub struct MemoryArtifacts {
    files: BTreeMap<String, String>,
}

impl MemoryArtifacts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.insert(name, content);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.files.insert(name.into(), content.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl ArtifactView for MemoryArtifacts {
    fn names(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    fn read(&self, name: &str) -> Result<Option<String>> {
        Ok(self.files.get(name).cloned())
    }

    fn exists(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }
}

/// Artifacts extracted under a local directory; names are paths relative
/// to the root with `/` separators.
#[derive(Debug, Clone)]
pub struct DirectoryArtifacts {
    root: PathBuf,
    names: Vec<String>,
    skip: Vec<String>,
}

impl DirectoryArtifacts {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_excluding(root, &[])
    }

    /// Like [`Self::open`], leaving out bookkeeping files such as `build.json`.
    pub fn open_excluding(root: impl Into<PathBuf>, skip: &[&str]) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(MatchError::IoError(std::io::Error::new(
                ErrorKind::NotFound,
                format!("artifact directory {} does not exist", root.display()),
            )));
        }

        let skip: Vec<String> = skip.iter().map(|s| (*s).to_string()).collect();
        let mut names = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = entry.map_err(|err| MatchError::Other(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = relative_name(&root, entry.path()) else {
                continue;
            };
            if skip.contains(&name) {
                continue;
            }
            names.push(name);
        }
        names.sort();

        log::debug!("{} artifacts under {}", names.len(), root.display());
        Ok(Self { root, names, skip })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

impl ArtifactView for DirectoryArtifacts {
    fn names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn read(&self, name: &str) -> Result<Option<String>> {
        if self.skip.iter().any(|s| s == name) {
            return Ok(None);
        }
        match std::fs::read(self.root.join(name)) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn exists(&self, name: &str) -> bool {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }
}
