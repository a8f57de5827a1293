use crate::config::DedupConfig;
use crate::error::Result;
use crate::fingerprint::{Fingerprint, FingerprintNormalizer};
use crate::similarity::similarity;
use std::collections::BTreeSet;
use triage_protocol::UnfiledDefect;

/// Unfiled defects believed to share a root cause.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub fingerprint: Fingerprint,
    /// Representative first, then members in arrival order.
    pub members: Vec<UnfiledDefect>,
}

impl Cluster {
    fn new(fingerprint: Fingerprint, representative: UnfiledDefect) -> Self {
        Self {
            fingerprint,
            members: vec![representative],
        }
    }

    /// Id of the representative, which names the cluster.
    #[must_use]
    pub fn id(&self) -> &str {
        self.representative().map_or("", |rep| rep.id.as_str())
    }

    #[must_use]
    pub fn representative(&self) -> Option<&UnfiledDefect> {
        self.members.first()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether the fingerprint carries any signal; signal-less defects never
    /// absorb others.
    #[must_use]
    pub fn has_signal(&self) -> bool {
        !self.fingerprint.is_empty()
    }

    /// Pipeline id of every member, representative first.
    #[must_use]
    pub fn pipelines(&self) -> Vec<String> {
        self.members.iter().map(|m| m.pipeline_id().to_string()).collect()
    }

    /// Distinct job types, in first-seen order.
    #[must_use]
    pub fn jobs(&self) -> Vec<String> {
        let mut jobs: Vec<String> = Vec::new();
        for member in &self.members {
            if !jobs.iter().any(|j| j == member.job()) {
                jobs.push(member.job().to_string());
            }
        }
        jobs
    }

    /// Members that ran as `job`.
    #[must_use]
    pub fn count_for_job(&self, job: &str) -> usize {
        self.members.iter().filter(|m| m.job() == job).count()
    }
}

/// Single-pass, first-fit grouping of unfiled defects by fingerprint
/// similarity. The result depends on input order.
#[derive(Debug, Clone)]
pub struct SimilarityClusterer {
    threshold: f64,
    max_comparable_length: usize,
    normalizer: FingerprintNormalizer,
}

impl SimilarityClusterer {
    pub fn new(config: &DedupConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            threshold: config.threshold,
            max_comparable_length: config.max_comparable_length,
            normalizer: FingerprintNormalizer::from_config(config)?,
        })
    }

    #[must_use]
    pub fn normalizer(&self) -> &FingerprintNormalizer {
        &self.normalizer
    }

    /// Groups `defects`, tagging each with its cluster id.
    ///
    /// Pipeline ids of the defects themselves are always masked; `extra`
    /// adds ids from the rest of the window (builds with no unfiled defects).
    #[must_use]
    pub fn cluster(&self, defects: Vec<UnfiledDefect>, extra_pipelines: &[String]) -> Vec<Cluster> {
        let known: Vec<String> = defects
            .iter()
            .map(|d| d.pipeline_id().to_string())
            .chain(extra_pipelines.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let total = defects.len();
        let mut clusters: Vec<Cluster> = Vec::new();
        for mut defect in defects {
            let fingerprint = self.normalizer.normalize(&defect.raw_text, &known);
            let home = if fingerprint.is_empty() {
                None
            } else {
                self.first_fit(&clusters, &fingerprint)
            };
            match home {
                Some(idx) => {
                    let cluster = &mut clusters[idx];
                    defect.cluster = Some(cluster.id().to_string());
                    cluster.members.push(defect);
                }
                None => {
                    defect.cluster = Some(defect.id.clone());
                    clusters.push(Cluster::new(fingerprint, defect));
                }
            }
        }

        log::info!(
            "Clustered {total} unfiled defects into {} clusters",
            clusters.len()
        );
        clusters
    }

    fn first_fit(&self, clusters: &[Cluster], fingerprint: &Fingerprint) -> Option<usize> {
        clusters.iter().position(|cluster| {
            cluster.has_signal()
                && similarity(
                    cluster.fingerprint.as_str(),
                    fingerprint.as_str(),
                    self.max_comparable_length,
                ) >= self.threshold
        })
    }
}
