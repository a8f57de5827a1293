use crate::cluster::Cluster;
use triage_protocol::{ClusterEntry, ClusterReport};

/// Cluster document keyed by representative id. Signal-less singletons are
/// included so every unfiled defect is accounted for.
#[must_use]
pub fn cluster_report(clusters: &[Cluster]) -> ClusterReport {
    clusters
        .iter()
        .filter_map(|cluster| {
            let rep = cluster.representative()?;
            Some((
                rep.id.clone(),
                ClusterEntry {
                    duplicates: cluster.pipelines(),
                    match_text: cluster.fingerprint.to_string(),
                    members: cluster.members.iter().map(|m| m.id.clone()).collect(),
                    jobs: cluster.jobs(),
                    status: rep.status,
                    link: rep.build.link.clone(),
                    metadata: rep.metadata.clone(),
                },
            ))
        })
        .collect()
}
