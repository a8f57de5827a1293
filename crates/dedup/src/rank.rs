use crate::cluster::Cluster;
use std::collections::{BTreeMap, BTreeSet};
use triage_protocol::{MatchResult, RankEntry, Ranking};

/// Orders defects by how widespread they are across the window.
///
/// A filed defect counts the distinct pipelines it matched in; a cluster
/// counts its members. Ties keep first-seen order, filed defects before
/// clusters.
#[derive(Debug, Clone, Default)]
pub struct PrevalenceRanker {
    catch_all: Option<String>,
}

/// Counter that remembers insertion order.
#[derive(Default)]
struct Tally {
    order: Vec<String>,
    counts: BTreeMap<String, usize>,
}

impl Tally {
    fn add(&mut self, id: &str, amount: usize) {
        match self.counts.get_mut(id) {
            Some(count) => *count += amount,
            None => {
                self.order.push(id.to_string());
                self.counts.insert(id.to_string(), amount);
            }
        }
    }

    fn ranked(self) -> Vec<RankEntry> {
        let mut entries: Vec<RankEntry> = self
            .order
            .into_iter()
            .map(|id| {
                let count = self.counts.get(&id).copied().unwrap_or(0);
                RankEntry(id, count)
            })
            .collect();
        // Stable: equal counts keep first-seen order.
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries
    }
}

impl PrevalenceRanker {
    #[must_use]
    pub fn new(catch_all: Option<String>) -> Self {
        Self { catch_all }
    }

    #[must_use]
    pub fn rank(&self, clusters: &[Cluster], matches: &[MatchResult]) -> Ranking {
        let mut by_job: BTreeMap<String, Tally> = BTreeMap::new();
        let mut all = Tally::default();
        let mut catch_all_pipelines: BTreeSet<&str> = BTreeSet::new();

        let mut job_pipelines: BTreeMap<(&str, &str), BTreeSet<&str>> = BTreeMap::new();
        let mut all_pipelines: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for result in matches {
            let id = result.defect_id.as_str();
            let pipeline = result.build.pipeline_id.as_str();
            if self.is_catch_all(id) {
                catch_all_pipelines.insert(pipeline);
                continue;
            }
            let job = result.build.job.as_str();
            if job_pipelines.entry((job, id)).or_default().insert(pipeline) {
                by_job.entry(job.to_string()).or_default().add(id, 1);
            }
            if all_pipelines.entry(id).or_default().insert(pipeline) {
                all.add(id, 1);
            }
        }

        for cluster in clusters {
            let id = cluster.id();
            for job in cluster.jobs() {
                let count = cluster.count_for_job(&job);
                by_job.entry(job).or_default().add(id, count);
            }
            all.add(id, cluster.len());
        }

        let catch_all = self.catch_all.as_ref().and_then(|id| {
            (!catch_all_pipelines.is_empty()).then(|| RankEntry(id.clone(), catch_all_pipelines.len()))
        });

        let mut ranking = Ranking {
            all: all.ranked(),
            catch_all,
            ..Ranking::default()
        };
        for (job, tally) in by_job {
            ranking.insert_job(&job, tally.ranked());
        }
        ranking
    }

    fn is_catch_all(&self, id: &str) -> bool {
        self.catch_all.as_deref() == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap as Map;
    use triage_protocol::{BuildMetadata, BuildRef, BuildStatus};

    fn hit(id: &str, pipeline: &str, job: &str) -> MatchResult {
        MatchResult {
            defect_id: id.to_string(),
            build: BuildRef::new(pipeline, job, "1"),
            status: BuildStatus::Failure,
            regexps: Map::new(),
            failure: None,
            metadata: BuildMetadata::default(),
        }
    }

    fn ids(entries: &[RankEntry]) -> Vec<(&str, usize)> {
        entries.iter().map(|e| (e.defect_id(), e.count())).collect()
    }

    fn spread(id: &str, pipelines: usize) -> Vec<MatchResult> {
        (0..pipelines)
            .map(|n| hit(id, &format!("{id}-p{n}"), "deploy"))
            .collect()
    }

    #[test]
    fn descending_with_stable_ties() {
        let mut matches = spread("bugA", 5);
        matches.extend(spread("bugB", 9));
        matches.extend(spread("bugC", 9));
        let ranking = PrevalenceRanker::default().rank(&[], &matches);
        assert_eq!(ids(&ranking.all), vec![("bugB", 9), ("bugC", 9), ("bugA", 5)]);

        let mut reversed = spread("bugC", 9);
        reversed.extend(spread("bugB", 9));
        reversed.extend(spread("bugA", 5));
        let ranking = PrevalenceRanker::default().rank(&[], &reversed);
        assert_eq!(ids(&ranking.all), vec![("bugC", 9), ("bugB", 9), ("bugA", 5)]);
    }

    #[test]
    fn filed_counts_distinct_pipelines_per_job_and_overall() {
        let matches = vec![
            hit("bug1", "p1", "deploy"),
            hit("bug1", "p1", "deploy"),
            hit("bug1", "p1", "test"),
            hit("bug1", "p2", "test"),
        ];
        let ranking = PrevalenceRanker::default().rank(&[], &matches);
        assert_eq!(ids(&ranking.by_job["deploy"]), vec![("bug1", 1)]);
        assert_eq!(ids(&ranking.by_job["test"]), vec![("bug1", 2)]);
        assert_eq!(ids(&ranking.all), vec![("bug1", 2)]);
    }

    #[test]
    fn catch_all_is_reported_apart() {
        let matches = vec![
            hit("missing", "p1", "deploy"),
            hit("missing", "p2", "deploy"),
            hit("bug1", "p3", "deploy"),
        ];
        let ranking = PrevalenceRanker::new(Some("missing".to_string())).rank(&[], &matches);
        assert_eq!(ids(&ranking.all), vec![("bug1", 1)]);
        assert_eq!(ids(&ranking.by_job["deploy"]), vec![("bug1", 1)]);
        assert_eq!(ranking.catch_all, Some(RankEntry("missing".to_string(), 2)));
    }

    #[test]
    fn job_named_all_keeps_its_own_list() {
        let matches = vec![hit("bug1", "p1", "all"), hit("bug2", "p2", "deploy")];
        let ranking = PrevalenceRanker::default().rank(&[], &matches);
        assert_eq!(ids(ranking.for_job("all").unwrap()), vec![("bug1", 1)]);
        assert_eq!(ids(&ranking.all), vec![("bug1", 1), ("bug2", 1)]);
        assert!(ranking.by_job.contains_key("job:all"));
    }
}
