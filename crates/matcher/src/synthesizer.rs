use crate::xml::FailureRecord;
use sha2::{Digest, Sha256};
use triage_protocol::{BuildMetadata, BuildRef, BuildStatus, UnfiledDefect, UnfiledOrigin};

pub const UNFILED_PREFIX: &str = "unfiled-";

/// A structured-report failure no rule clause accounted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFailure {
    pub record: FailureRecord,
    /// Position among records sharing the same classname+name in this build.
    pub ordinal: usize,
}

/// Builds placeholder defects. Stateless: two placeholders for the same
/// root cause stay separate here and are grouped later by clustering.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnfiledSynthesizer {
    console_excerpt_lines: Option<usize>,
}

impl UnfiledSynthesizer {
    #[must_use]
    pub const fn new(console_excerpt_lines: Option<usize>) -> Self {
        Self {
            console_excerpt_lines,
        }
    }

    #[must_use]
    pub fn for_failure(
        &self,
        build: &BuildRef,
        status: BuildStatus,
        metadata: &BuildMetadata,
        failure: &RawFailure,
    ) -> UnfiledDefect {
        let origin = UnfiledOrigin::TestCase {
            key: failure.record.key.clone(),
            ordinal: failure.ordinal,
        };
        Self::assemble(build, status, metadata, origin, failure.record.text())
    }

    #[must_use]
    pub fn for_build(
        &self,
        build: &BuildRef,
        status: BuildStatus,
        metadata: &BuildMetadata,
        console: &str,
    ) -> UnfiledDefect {
        let text = match self.console_excerpt_lines {
            Some(limit) => tail_lines(console, limit),
            None => console.to_string(),
        };
        Self::assemble(build, status, metadata, UnfiledOrigin::WholeBuild, text)
    }

    fn assemble(
        build: &BuildRef,
        status: BuildStatus,
        metadata: &BuildMetadata,
        origin: UnfiledOrigin,
        raw_text: String,
    ) -> UnfiledDefect {
        UnfiledDefect {
            id: unfiled_id(build, &origin),
            build: build.clone(),
            status,
            origin,
            raw_text,
            metadata: metadata.clone(),
            cluster: None,
        }
    }
}

/// Reproducible id, unique per (build, origin).
#[must_use]
pub fn unfiled_id(build: &BuildRef, origin: &UnfiledOrigin) -> String {
    let mut hasher = Sha256::new();
    for part in [&build.pipeline_id, &build.job, &build.build_number] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    match origin {
        UnfiledOrigin::WholeBuild => hasher.update(b"build"),
        UnfiledOrigin::TestCase { key, ordinal } => {
            hasher.update(b"case\0");
            hasher.update(key.classname.as_bytes());
            hasher.update([0u8]);
            hasher.update(key.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(ordinal.to_le_bytes());
        }
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{UNFILED_PREFIX}{}", &digest[..16])
}

#[must_use]
pub fn is_unfiled_id(id: &str) -> bool {
    id.starts_with(UNFILED_PREFIX)
}

fn tail_lines(text: &str, limit: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(limit);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::FailureKind;
    use triage_protocol::FailureKey;

    fn failure(name: &str, ordinal: usize) -> RawFailure {
        RawFailure {
            record: FailureRecord {
                report: "tempest_xunit.xml".to_string(),
                key: FailureKey::new("tempest.Servers", name),
                kind: FailureKind::Failure,
                message: "boom".to_string(),
                body: String::new(),
                context: None,
            },
            ordinal,
        }
    }

    #[test]
    fn ids_are_prefixed_unique_and_reproducible() {
        let build = BuildRef::new("p1", "test_tempest", "7");
        let synth = UnfiledSynthesizer::default();
        let meta = BuildMetadata::default();

        let a = synth.for_failure(&build, BuildStatus::Failure, &meta, &failure("test_a", 0));
        let a_again = synth.for_failure(&build, BuildStatus::Failure, &meta, &failure("test_a", 0));
        let a_second = synth.for_failure(&build, BuildStatus::Failure, &meta, &failure("test_a", 1));
        let b = synth.for_failure(&build, BuildStatus::Failure, &meta, &failure("test_b", 0));
        let whole = synth.for_build(&build, BuildStatus::Failure, &meta, "console");

        assert!(is_unfiled_id(&a.id));
        assert_eq!(a.id.len(), UNFILED_PREFIX.len() + 16);
        assert_eq!(a.id, a_again.id);
        assert_ne!(a.id, a_second.id);
        assert_ne!(a.id, b.id);
        assert_ne!(a.id, whole.id);

        let other_build = BuildRef::new("p2", "test_tempest", "7");
        let elsewhere = synth.for_build(&other_build, BuildStatus::Failure, &meta, "console");
        assert_ne!(whole.id, elsewhere.id);
    }

    #[test]
    fn failure_text_carries_test_identity() {
        let build = BuildRef::new("p1", "test_tempest", "7");
        let defect = UnfiledSynthesizer::default().for_failure(
            &build,
            BuildStatus::Failure,
            &BuildMetadata::default(),
            &failure("test_a", 0),
        );
        assert!(defect.raw_text.starts_with("tempest.Servers.test_a\nboom"));
        assert_eq!(defect.origin.failure_key(), Some(&FailureKey::new("tempest.Servers", "test_a")));
        assert_eq!(defect.cluster, None);
    }

    #[test]
    fn console_excerpt_keeps_tail() {
        let build = BuildRef::new("p1", "pipeline_deploy", "1");
        let defect = UnfiledSynthesizer::new(Some(2)).for_build(
            &build,
            BuildStatus::Failure,
            &BuildMetadata::default(),
            "one\ntwo\nthree\nfour",
        );
        assert_eq!(defect.raw_text, "three\nfour");
        assert_eq!(defect.origin, UnfiledOrigin::WholeBuild);
    }
}
