//! Integration tests for the proof-eval CLI and library.
//!
//! These tests verify end-to-end functionality including:
//! - CLI commands work correctly against a scripted shell kernel
//! - Library grading and aggregation through a stub verifier
//! - Report files round-trip through compare and summarize

// Allow less strict lints for test code
#![allow(clippy::needless_raw_string_hashes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::float_cmp)]
#![allow(clippy::unwrap_used)]

use proof_eval::{
    compare, summarize, AggregateReport, AxiomPolicy, BatchItem, BatchSettings, CandidateSets,
    EvalRunner, GradeConfig, ProblemSet, UnitState, VerificationOutcome, Verifier, VerifierError,
};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

const PROBLEMS: &str = r#"{"id": "alg_1", "lean_prop": "1 + 1 = 2", "split": "id", "domain": "alg", "style": "eq"}
{"id": "alg_2", "proposition": "2 + 2 = 4", "split": "id", "domain": "alg", "style": "eq"}

{"id": "geo_1", "goal": "True", "split": "ood_topic", "domain": "geo", "style": "lin"}
{"id": "geo_2", "statement": "False", "split": "ood_topic", "domain": "geo", "style": "lin"}
"#;

const CANDIDATES: &str = r#"{
  "alg_1": ["bad step", "good norm_num"],
  "alg_2": "good rfl",
  "geo_1": ["nope", "still nope"],
  "geo_2": null
}"#;

/// Shell kernel: rejects programs mentioning "bad" or "nope", otherwise
/// reports two axioms
const SCRIPTED_KERNEL: &str = r#"verifier:
  command: |-
    sh -c 'if grep -qE "bad|nope" "$0"; then echo "error: unsolved goals" >&2; exit 1; else echo "axioms candidate_goal : propext, Classical.choice"; fi'
  project_markers: [lakefile.toml]
timeout_secs: 30
stats:
  bootstrap_n: 200
"#;

fn write_fixtures(dir: &Path) {
    std::fs::write(dir.join("problems.jsonl"), PROBLEMS).unwrap();
    std::fs::write(dir.join("candidates.json"), CANDIDATES).unwrap();
    std::fs::write(dir.join("config.yaml"), SCRIPTED_KERNEL).unwrap();
    std::fs::create_dir_all(dir.join("lean")).unwrap();
    std::fs::write(dir.join("lean/lakefile.toml"), "").unwrap();
}

fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new("cargo")
        .args(["run", "--quiet", "--"])
        .args(args)
        .output()
        .expect("Failed to execute CLI")
}

fn p(path: &Path) -> &str {
    path.to_str().unwrap()
}

// ============================================================================
// CLI Integration Tests
// ============================================================================

#[test]
fn test_cli_help_command() {
    let output = run_cli(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("proof-eval"), "Help should mention binary name");
    for command in ["grade", "batch", "compare", "summarize", "render"] {
        assert!(stdout.contains(command), "Help should list {command}");
    }
}

#[cfg(unix)]
#[test]
fn test_cli_grade_with_scripted_kernel() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let out = dir.path().join("out/report.json");
    let md = dir.path().join("report.md");

    let output = run_cli(&[
        "grade",
        "--problems",
        p(&dir.path().join("problems.jsonl")),
        "--candidates",
        p(&dir.path().join("candidates.json")),
        "--config",
        p(&dir.path().join("config.yaml")),
        "--workdir",
        p(&dir.path().join("lean")),
        "--markdown",
        p(&md),
        "--out",
        p(&out),
    ]);
    assert!(
        output.status.success(),
        "grade failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report = AggregateReport::load(&out).unwrap();
    assert_eq!(report.items.len(), 4);
    assert_eq!(report.metrics.pass_at_k, 0.5);
    assert_eq!(report.items["alg_1"].winning_index, Some(1));
    assert_eq!(report.items["alg_1"].attempts, 2);
    assert!(report.items["alg_1"].axioms.contains("propext"));
    assert_eq!(report.items["alg_1"].axiom_penalty, 1.5);
    assert_eq!(report.items["geo_1"].state, UnitState::Failed);
    assert_eq!(report.items["geo_2"].attempts, 0);
    assert_eq!(report.metrics.buckets["split::id"].pass_at_k, 1.0);
    assert_eq!(report.metrics.buckets["ds::geo/lin"].pass_at_k, 0.0);
    assert!(std::fs::read_to_string(md).unwrap().contains("## Unsolved (2)"));
}

#[test]
fn test_cli_grade_fails_preflight_without_project() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    let output = run_cli(&[
        "grade",
        "--problems",
        p(&dir.path().join("problems.jsonl")),
        "--candidates",
        p(&dir.path().join("candidates.json")),
        "--workdir",
        p(dir.path()),
        "--out",
        p(&dir.path().join("report.json")),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("project markers"));
    assert!(!dir.path().join("report.json").exists());
}

#[cfg(unix)]
#[test]
fn test_cli_batch_halts_on_failed_chunk() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    let output = run_cli(&[
        "batch",
        "--problems",
        p(&dir.path().join("problems.jsonl")),
        "--candidates",
        p(&dir.path().join("candidates.json")),
        "--config",
        p(&dir.path().join("config.yaml")),
        "--workdir",
        p(&dir.path().join("lean")),
        "--batch-size",
        "2",
    ]);
    assert!(output.status.success());

    // chunk 1 holds alg_1 ("bad step") and alg_2; it fails and halts
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[chunk 1] FAILED"), "stdout: {stdout}");
    assert!(stdout.contains("--batch-size 1"));
    assert!(stdout.contains("success@1=0/3"));
    assert!(stdout.contains("(halted)"));
}

#[test]
fn test_cli_render_prints_program() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    let output = run_cli(&[
        "render",
        "--problems",
        p(&dir.path().join("problems.jsonl")),
        "--candidates",
        p(&dir.path().join("candidates.json")),
        "--id",
        "alg_1",
        "--index",
        "1",
    ]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("theorem candidate_goal : 1 + 1 = 2 := by"));
    assert!(stdout.contains("\n  good norm_num\n"));
}

// ============================================================================
// Library Integration Tests
// ============================================================================

/// Accepts programs containing "good"; each call takes 0.5s
struct StubVerifier;

impl Verifier for StubVerifier {
    fn render(&self, proposition: &str, proof: &str) -> String {
        format!("theorem t : {proposition} := by\n  {proof}\n")
    }

    fn execute(&self, program: &str) -> Result<VerificationOutcome, VerifierError> {
        let success = program.contains("good");
        Ok(VerificationOutcome {
            success,
            duration: Duration::from_millis(500),
            raw_diagnostic: if success {
                "'t' depends on axioms: [Classical.choice]".to_string()
            } else {
                "error".to_string()
            },
            exit_code: Some(i32::from(!success)),
        })
    }
}

fn library_inputs() -> (ProblemSet, CandidateSets) {
    (
        ProblemSet::from_jsonl(PROBLEMS).unwrap(),
        CandidateSets::from_json(CANDIDATES).unwrap(),
    )
}

#[test]
fn test_library_grade_all_with_stub() {
    let (problems, candidates) = library_inputs();
    let config = GradeConfig {
        axiom_policy: AxiomPolicy::Constructive,
        ..GradeConfig::default()
    };
    let report = EvalRunner::new(&StubVerifier, config).grade_all(&problems, &candidates);

    assert_eq!(report.items.len(), problems.len());
    assert_eq!(report.items["alg_1"].t_success, Some(1.0));
    assert_eq!(report.items["alg_2"].t_success, Some(0.5));
    assert_eq!(report.items["alg_1"].axiom_penalty, 2.0);
    assert_eq!(report.metrics.axiom_penalty_avg, 1.0);
    // (0.8 + 0.9 + 0 + 0) / 4
    assert!((report.metrics.auc_at_time - 0.425).abs() < 1e-12);
    assert_eq!(report.metadata.axiom_policy, AxiomPolicy::Constructive);
}

#[test]
fn test_library_report_compare_and_summarize() {
    let (problems, candidates) = library_inputs();
    let dir = tempfile::tempdir().unwrap();

    let base = EvalRunner::new(&StubVerifier, GradeConfig::default()).grade_all(&problems, &candidates);
    let narrow = EvalRunner::new(
        &StubVerifier,
        GradeConfig {
            k: 1,
            ..GradeConfig::default()
        },
    )
    .grade_all(&problems, &candidates);

    base.write(dir.path().join("k32.json")).unwrap();
    narrow.write(dir.path().join("k1.json")).unwrap();

    let cmp = compare(&base, &narrow, 0.05);
    assert_eq!(cmp.shared, 4);
    assert_eq!(cmp.solved_only_by_baseline, vec!["alg_1".to_string()]);
    assert!(cmp.solved_only_by_candidate.is_empty());

    let rows = summarize(&format!("{}/*.json", dir.path().display())).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].path.ends_with("k1.json"));
    assert_eq!(rows[0].pass_at_k, 0.25);
    assert_eq!(rows[1].pass_at_k, 0.5);
}

#[test]
fn test_library_batch_items_and_fail_fast() {
    let (problems, candidates) = library_inputs();
    let items = BatchItem::from_sources(&problems, &candidates, 0);
    let ids: Vec<&str> = items.iter().map(|i| i.problem_id.as_str()).collect();
    assert_eq!(ids, vec!["alg_1", "alg_2", "geo_1"]);

    let config = GradeConfig {
        batch: BatchSettings {
            batch_size: 1,
            fail_fast: false,
            ..BatchSettings::default()
        },
        ..GradeConfig::default()
    };
    let (chunks, summary) = EvalRunner::new(&StubVerifier, config).run_batch(&problems, &candidates);
    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks.iter().map(|c| c.success).collect::<Vec<_>>(),
        vec![false, true, false]
    );
    assert_eq!(summary.ok, 1);
    assert!(!summary.halted);
}
