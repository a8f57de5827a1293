//! Local build trees: `<root>/<pipeline_id>/<job>/` with artifacts inside and
//! an optional `build.json` manifest per job directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use triage_matcher::DirectoryArtifacts;
use triage_protocol::{BuildMetadata, BuildRef, BuildStatus};

pub const BUILD_MANIFEST: &str = "build.json";

#[derive(Debug, Clone, PartialEq)]
pub struct LocalBuild {
    pub build: BuildRef,
    pub status: BuildStatus,
    pub metadata: BuildMetadata,
    pub dir: PathBuf,
}

impl LocalBuild {
    /// Reads the manifest (if any) of the job directory `dir`.
    pub fn load(dir: &Path, pipeline_id: &str, job: &str) -> Result<Self> {
        let manifest_path = dir.join(BUILD_MANIFEST);
        let manifest = if manifest_path.is_file() {
            let bytes = std::fs::read(&manifest_path)
                .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
            serde_json::from_slice::<RawManifest>(&bytes)
                .with_context(|| format!("Invalid manifest {}", manifest_path.display()))?
        } else {
            RawManifest::default()
        };

        let mut build = BuildRef::new(pipeline_id, job, manifest.build_number());
        if let Some(link) = manifest.link {
            build = build.with_link(link);
        }
        Ok(Self {
            build,
            status: manifest.status.unwrap_or_default(),
            metadata: manifest.metadata,
            dir: dir.to_path_buf(),
        })
    }

    #[must_use]
    pub fn key(&self) -> String {
        build_key(&self.build.pipeline_id, &self.build.job)
    }

    /// Artifact view of the job directory, manifest excluded.
    pub fn artifacts(&self) -> Result<DirectoryArtifacts> {
        DirectoryArtifacts::open_excluding(&self.dir, &[BUILD_MANIFEST])
            .with_context(|| format!("Failed to open artifacts in {}", self.dir.display()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    #[serde(default)]
    build_number: Option<serde_json::Value>,
    #[serde(default)]
    status: Option<BuildStatus>,
    #[serde(default)]
    link: Option<String>,
    #[serde(flatten)]
    metadata: BuildMetadata,
}

impl RawManifest {
    fn build_number(&self) -> String {
        match &self.build_number {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }
}

/// A pipeline or job directory that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub pipeline_id: String,
    /// `None` when the pipeline directory itself could not be listed.
    pub job: Option<String>,
    pub reason: String,
}

impl LoadFailure {
    /// `<pipeline>/<job>`, or just the pipeline id.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.job {
            Some(job) => build_key(&self.pipeline_id, job),
            None => self.pipeline_id.clone(),
        }
    }
}

/// Builds found under a root, plus the directories that had to be skipped.
#[derive(Debug, Default)]
pub struct Discovery {
    pub builds: Vec<LocalBuild>,
    pub failures: Vec<LoadFailure>,
}

impl Discovery {
    /// Every pipeline id seen, loaded or not.
    #[must_use]
    pub fn pipeline_ids(&self) -> Vec<String> {
        self.builds
            .iter()
            .map(|b| b.build.pipeline_id.clone())
            .chain(self.failures.iter().map(|f| f.pipeline_id.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Diagnostics key of one build.
#[must_use]
pub fn build_key(pipeline_id: &str, job: &str) -> String {
    format!("{pipeline_id}/{job}")
}

/// Every `<pipeline>/<job>` directory under `root`, sorted by pipeline then
/// job. Only an unreadable `root` is an error; a broken pipeline or job
/// directory is logged and reported in [`Discovery::failures`].
pub fn discover(root: &Path) -> Result<Discovery> {
    let mut discovery = Discovery::default();
    for pipeline in sorted_dirs(root)? {
        let pipeline_id = dir_name(&pipeline);
        let job_dirs = match sorted_dirs(&pipeline) {
            Ok(dirs) => dirs,
            Err(err) => {
                log::warn!("Skipping pipeline {pipeline_id}: {err:#}");
                discovery.failures.push(LoadFailure {
                    pipeline_id,
                    job: None,
                    reason: format!("{err:#}"),
                });
                continue;
            }
        };
        for job_dir in job_dirs {
            let job = dir_name(&job_dir);
            match LocalBuild::load(&job_dir, &pipeline_id, &job) {
                Ok(build) => discovery.builds.push(build),
                Err(err) => {
                    log::warn!("Skipping build {}: {err:#}", build_key(&pipeline_id, &job));
                    discovery.failures.push(LoadFailure {
                        pipeline_id: pipeline_id.clone(),
                        job: Some(job),
                        reason: format!("{err:#}"),
                    });
                }
            }
        }
    }
    log::info!(
        "Discovered {} builds under {} ({} skipped)",
        discovery.builds.len(),
        root.display(),
        discovery.failures.len()
    );
    Ok(discovery)
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discovers_pipelines_and_jobs_with_manifests() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("p2/pipeline_deploy")).unwrap();
        fs::create_dir_all(root.join("p1/test_tempest")).unwrap();
        fs::create_dir_all(root.join("p1/pipeline_deploy")).unwrap();
        fs::write(root.join("p1/loose.txt"), "ignored").unwrap();
        fs::write(
            root.join("p1/pipeline_deploy/build.json"),
            r#"{"build_number": 42, "status": "failure", "link": "http://ci/42", "vendors": ["acme"]}"#,
        )
        .unwrap();

        let builds = discover(root).unwrap().builds;
        let refs: Vec<String> = builds.iter().map(|b| b.build.to_string()).collect();
        assert_eq!(refs, vec!["p1/pipeline_deploy#42", "p1/test_tempest", "p2/pipeline_deploy"]);

        let first = &builds[0];
        assert_eq!(first.status, BuildStatus::Failure);
        assert_eq!(first.build.link.as_deref(), Some("http://ci/42"));
        assert_eq!(first.metadata.vendors, vec!["acme"]);
        assert_eq!(builds[1].status, BuildStatus::Unknown);
    }

    #[test]
    fn manifest_is_not_an_artifact() {
        let dir = tempdir().unwrap();
        let job = dir.path().join("p1/deploy");
        fs::create_dir_all(&job).unwrap();
        fs::write(job.join("build.json"), r#"{"status": "FAILURE"}"#).unwrap();
        fs::write(job.join("console.txt"), "boom").unwrap();

        let build = LocalBuild::load(&job, "p1", "deploy").unwrap();
        let names = triage_matcher::ArtifactView::names(&build.artifacts().unwrap());
        assert_eq!(names, vec!["console.txt"]);
    }

    #[test]
    fn broken_manifest_skips_only_that_build() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("p1/deploy")).unwrap();
        fs::create_dir_all(root.join("p2/deploy")).unwrap();
        fs::write(root.join("p1/deploy/build.json"), r#"{"status": "FAILURE"}"#).unwrap();
        fs::write(root.join("p2/deploy/build.json"), "{not json").unwrap();

        let discovery = discover(root).unwrap();
        assert_eq!(discovery.builds.len(), 1);
        assert_eq!(discovery.builds[0].key(), "p1/deploy");
        assert_eq!(discovery.failures.len(), 1);
        assert_eq!(discovery.failures[0].key(), "p2/deploy");
        assert!(discovery.failures[0].reason.contains("Invalid manifest"));
        assert_eq!(discovery.pipeline_ids(), vec!["p1", "p2"]);
    }

    #[test]
    fn unreadable_root_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(discover(&dir.path().join("absent")).is_err());
    }
}
