use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use triage_matcher::{
    BuildInput, Diagnostic, DirectoryArtifacts, MatcherConfig, RuleSet, TriageEngine,
};
use triage_protocol::{BuildRef, BuildStatus, FailureKey, UnfiledOrigin};

const RULES: &str = r#"{
  "bug1": {"pipeline_deploy": [{"console.txt": {"regexp": ["OOM killed"]}}]},
  "bug_and": {
    "pipeline_prepare": [
      {"console.txt": {"regexp": ["bootstrap failed"]}, "logs/juju.log": {"regexp": ["hook failed"]}}
    ]
  },
  "bug_tempest": {
    "test_tempest": [{"tempest_xunit.xml": {"regexp": ["Connection refused"]}}]
  },
  "bug_broken": {"pipeline_deploy": [{"console.txt": {"regexp": ["(unclosed"]}}]}
}"#;

fn write(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn engine(config: MatcherConfig) -> TriageEngine {
    TriageEngine::new(RuleSet::from_bytes(RULES.as_bytes()).unwrap(), config).unwrap()
}

fn tempest_config() -> MatcherConfig {
    MatcherConfig {
        multi_failure_jobs: vec!["test_tempest".to_string()],
        ..MatcherConfig::default()
    }
}

#[test]
fn oom_console_matches_filed_defect() {
    let dir = tempdir().unwrap();
    write(dir.path(), "pipeline_deploy_console.txt", "Process OOM killed at ts=123\n");

    let view = DirectoryArtifacts::open(dir.path()).unwrap();
    let input = BuildInput::new(
        BuildRef::new("p1", "pipeline_deploy", "12"),
        BuildStatus::Failure,
        &view,
    );
    let triage = engine(MatcherConfig::default()).triage_build(&input);

    let ids: Vec<&str> = triage.matches.iter().map(|m| m.defect_id.as_str()).collect();
    assert_eq!(ids, vec!["bug1"]);
    assert!(triage.unfiled.is_empty());

    let report = triage.report();
    let entry = &report.bugs["bug1"];
    assert_eq!(entry.regexps["console.txt"], vec!["OOM killed".to_string()]);
}

#[test]
fn failure_without_signature_becomes_unfiled() {
    let dir = tempdir().unwrap();
    write(dir.path(), "console.txt", "Traceback (most recent call last):\n  boom\n");

    let view = DirectoryArtifacts::open(dir.path()).unwrap();
    let input = BuildInput::new(
        BuildRef::new("p2", "pipeline_deploy", "13"),
        BuildStatus::Failure,
        &view,
    );
    let triage = engine(MatcherConfig::default()).triage_build(&input);

    assert!(triage.matches.is_empty());
    assert_eq!(triage.unfiled.len(), 1);
    assert_eq!(triage.unfiled[0].origin, UnfiledOrigin::WholeBuild);
    assert!(triage.unfiled[0].id.starts_with("unfiled-"));
    assert!(triage.report().bugs.contains_key(&triage.unfiled[0].id));
}

#[test]
fn and_clause_requires_both_files() {
    let dir = tempdir().unwrap();
    write(dir.path(), "console.txt", "bootstrap failed");
    let engine = engine(MatcherConfig::default());
    let build = BuildRef::new("p3", "pipeline_prepare", "1");

    let view = DirectoryArtifacts::open(dir.path()).unwrap();
    let triage = engine.triage_build(&BuildInput::new(build.clone(), BuildStatus::Failure, &view));
    assert!(triage.matches.is_empty());
    assert!(triage.diagnostics.contains(&Diagnostic::MissingArtifact {
        target: "logs/juju.log".to_string()
    }));

    write(dir.path(), "logs/juju.log", "install hook failed");
    let view = DirectoryArtifacts::open(dir.path()).unwrap();
    let triage = engine.triage_build(&BuildInput::new(build, BuildStatus::Failure, &view));
    let ids: Vec<&str> = triage.matches.iter().map(|m| m.defect_id.as_str()).collect();
    assert_eq!(ids, vec!["bug_and"]);
}

#[test]
fn tempest_report_splits_filed_and_unfiled_failures() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "tempest_xunit.xml",
        r#"<testsuite>
  <testcase classname="tempest.api.network.PortsTest" name="test_create_port">
    <error message="Connection refused">socket.error</error>
  </testcase>
  <testcase classname="tempest.api.compute.ServersTest" name="test_reboot">
    <failure message="Server did not become ACTIVE">TimeoutException</failure>
  </testcase>
</testsuite>"#,
    );
    write(dir.path(), "console.txt", "tempest run finished with failures");

    let view = DirectoryArtifacts::open(dir.path()).unwrap();
    let input = BuildInput::new(
        BuildRef::new("p4", "test_tempest", "3"),
        BuildStatus::Failure,
        &view,
    );
    let triage = engine(tempest_config()).triage_build(&input);

    assert_eq!(triage.matches.len(), 1);
    assert_eq!(
        triage.matches[0].failure,
        Some(FailureKey::new("tempest.api.network.PortsTest", "test_create_port"))
    );
    assert_eq!(triage.unfiled.len(), 1);
    assert_eq!(
        triage.unfiled[0].origin.failure_key(),
        Some(&FailureKey::new("tempest.api.compute.ServersTest", "test_reboot"))
    );
    assert!(triage.unfiled[0].raw_text.contains("TimeoutException"));
}

#[test]
fn malformed_report_does_not_abort_build() {
    let dir = tempdir().unwrap();
    write(dir.path(), "tempest_xunit.xml", "<testsuite><testcase name=\"x\">");
    write(dir.path(), "console.txt", "collapsed");

    let view = DirectoryArtifacts::open(dir.path()).unwrap();
    let input = BuildInput::new(
        BuildRef::new("p5", "test_tempest", "1"),
        BuildStatus::Failure,
        &view,
    );
    let triage = engine(tempest_config()).triage_build(&input);

    assert!(triage.matches.is_empty());
    assert_eq!(triage.unfiled.len(), 1);
    assert_eq!(triage.unfiled[0].origin, UnfiledOrigin::WholeBuild);
    assert!(triage
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::MalformedReport { .. })));
}

#[test]
fn invalid_rule_never_matches_but_others_load() {
    let rules = RuleSet::from_bytes(RULES.as_bytes()).unwrap();
    assert_eq!(rules.len(), 4);
    assert!(rules.get("bug_broken").unwrap().is_inert());
    assert_eq!(rules.diagnostics().len(), 1);
}

#[test]
fn repeated_failure_across_reports_is_claimed_everywhere() {
    let rules = RuleSet::from_bytes(
        br#"{
          "bug_a": {"test_multi": [{"*.xml": {"regexp": ["Timeout"]}}]},
          "bug_b": {"test_multi": [{"b_results.xml": {"regexp": ["disk full"]}}]}
        }"#,
    )
    .unwrap();
    let engine = TriageEngine::new(rules, MatcherConfig::default()).unwrap();

    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "a_results.xml",
        r#"<testsuite>
  <testcase classname="suite.Storage" name="test_write"><failure message="flaky teardown">a</failure></testcase>
  <testcase classname="suite.Storage" name="test_read"><failure message="unknown glitch">b</failure></testcase>
</testsuite>"#,
    );
    write(
        dir.path(),
        "b_results.xml",
        r#"<testsuite>
  <testcase classname="suite.Storage" name="test_write"><error message="disk full">c</error></testcase>
  <testcase classname="suite.Storage" name="test_read"><failure message="unknown glitch again">d</failure></testcase>
</testsuite>"#,
    );

    let view = DirectoryArtifacts::open(dir.path()).unwrap();
    let input = BuildInput::new(
        BuildRef::new("p6", "test_multi", "1"),
        BuildStatus::Failure,
        &view,
    );
    let triage = engine.triage_build(&input);

    let write_key = FailureKey::new("suite.Storage", "test_write");
    let read_key = FailureKey::new("suite.Storage", "test_read");
    let ids: Vec<&str> = triage.matches.iter().map(|m| m.defect_id.as_str()).collect();
    assert_eq!(ids, vec!["bug_b"]);
    assert_eq!(triage.matches[0].failure.as_ref(), Some(&write_key));

    // Both copies of the matched test are gone, even the one in the earlier report.
    assert!(triage
        .unfiled
        .iter()
        .all(|d| d.origin.failure_key() != Some(&write_key)));
    let origins: Vec<&UnfiledOrigin> = triage.unfiled.iter().map(|d| &d.origin).collect();
    assert_eq!(
        origins,
        vec![
            &UnfiledOrigin::TestCase { key: read_key.clone(), ordinal: 0 },
            &UnfiledOrigin::TestCase { key: read_key, ordinal: 1 },
        ]
    );
    assert_ne!(triage.unfiled[0].id, triage.unfiled[1].id);
}
