//! End-to-end build scenarios against scripted collaborators.
//!
//! Every scenario runs in its own temporary directory with a simulated
//! clock, so backoff never sleeps for real.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use glupe_core::markers::wrap;
use glupe_core::{content_hash, ContentCache, FatalReason, LoopPolicy, OracleError, VerifyTarget};
use glupe_dst::{
    get_or_generate_seed, DstEnv, FaultConfig, ScriptedOracle, ScriptedVerifier, SimClock,
    STAND_IN_BINARY,
};
use glupe_generator::{BlueprintGenerator, BuildMode, BuildRequest, BuildStatus, GeneratorConfig};
use glupe_verifier::lookup;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

fn request(dir: &Path, input: PathBuf, output: &str, lang: &str) -> BuildRequest {
    let mut req = BuildRequest::new(vec![input], output, lookup(lang).unwrap());
    req.work_dir = dir.to_path_buf();
    req.model_id = "scripted".to_string();
    req
}

fn generator_with(
    oracle: &Arc<ScriptedOracle>,
    verifier: &Arc<ScriptedVerifier>,
    clock: &Arc<SimClock>,
    config: GeneratorConfig,
) -> BlueprintGenerator {
    BlueprintGenerator::new(oracle.clone(), verifier.clone(), config).with_sleeper(clock.clone())
}

fn generator(
    oracle: &Arc<ScriptedOracle>,
    verifier: &Arc<ScriptedVerifier>,
    clock: &Arc<SimClock>,
) -> BlueprintGenerator {
    generator_with(oracle, verifier, clock, GeneratorConfig::default())
}

fn greet_project() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "app.glp", "$$ greet { print_hello }$$\n");
    (dir, input)
}

#[tokio::test]
async fn test_greet_populates_cache() {
    let (dir, input) = greet_project();
    let oracle = Arc::new(ScriptedOracle::always(wrap("greet", "console_print(\"hello\")")));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.passes, 1);
    assert_eq!(oracle.calls_count(), 1);
    assert_eq!(outcome.stored, vec!["greet".to_string()]);

    let cached = fs::read_to_string(dir.path().join("glupe_cache").join("greet.txt")).unwrap();
    assert_eq!(cached, "console_print(\"hello\")");
    let cache = ContentCache::open(dir.path());
    assert_eq!(cache.state().containers["greet"].hash, content_hash("print_hello"));

    let output = fs::read_to_string(dir.path().join("app.py")).unwrap();
    assert!(output.contains("console_print(\"hello\")"));
    assert!(!output.contains("GLUPE_BLOCK"));
}

#[tokio::test]
async fn test_identical_rerun_makes_no_oracle_calls() {
    let (dir, input) = greet_project();
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let first = Arc::new(ScriptedOracle::always(wrap("greet", "console_print(\"hello\")")));
    generator(&first, &verifier, &clock)
        .build(&request(dir.path(), input.clone(), "app.py", "py"))
        .await
        .unwrap();
    let before = fs::read_to_string(dir.path().join("app.py")).unwrap();

    let second = Arc::new(ScriptedOracle::always("should not be called"));
    let outcome = generator(&second, &verifier, &clock)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::UpToDate);
    assert_eq!(second.calls_count(), 0);
    assert_eq!(fs::read_to_string(dir.path().join("app.py")).unwrap(), before);
}

#[tokio::test]
async fn test_changed_instructions_rebuild_with_cached_containers() {
    let (dir, input) = greet_project();
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let first = Arc::new(ScriptedOracle::always(wrap("greet", "console_print(\"hello\")")));
    generator(&first, &verifier, &clock)
        .build(&request(dir.path(), input.clone(), "app.py", "py"))
        .await
        .unwrap();

    let second = Arc::new(ScriptedOracle::always(wrap("greet", "console_print(\"hello\")")));
    let mut req = request(dir.path(), input, "app.py", "py");
    req.instructions = Some("add a docstring".to_string());
    let outcome = generator(&second, &verifier, &clock).build(&req).await.unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.cache_hits, 1);
    assert_eq!(second.calls_count(), 1);
    assert!(second.prompts()[0].contains("// GLUPE_BLOCK_START: greet\nconsole_print(\"hello\")"));
}

#[tokio::test]
async fn test_forward_parent_reference_warns_and_proceeds() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        dir.path(),
        "app.glp",
        "$$ child -> base { print child }$$\n$$ base { print base }$$\n",
    );
    let response = format!("{}{}", wrap("child", "child()"), wrap("base", "base()"));
    let oracle = Arc::new(ScriptedOracle::always(response));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert!(outcome
        .warnings
        .iter()
        .any(|w| w.contains("\"child\" inherits from undefined parent \"base\"")));
    assert_eq!(outcome.stored.len(), 2);
}

#[tokio::test]
async fn test_fatal_diagnostics_after_minimum_passes() {
    let (dir, input) = greet_project();
    let oracle = Arc::new(ScriptedOracle::always(wrap("greet", "puts(\"hello\");")));
    let verifier = Arc::new(
        ScriptedVerifier::passing()
            .then_fail("a.c:3:1: error: expected ';' before '}' token")
            .then_fail("a.c:3:1: error: expected ';' before '}' token")
            .then_fail("a.c:3:1: error: expected ';' before '}' token")
            .then_fail("a.c:1:10: config.h: file not found"),
    );
    let clock = Arc::new(SimClock::new());

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.c", "c"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Failed(FatalReason::FatalDiagnostics));
    assert_eq!(outcome.passes, 4);
    assert_eq!(oracle.calls_count(), 4);
    assert_eq!(verifier.runs_count(), 4);
    assert!(!dir.path().join("app.c").exists());
    assert!(outcome
        .last_diagnostics
        .as_deref()
        .unwrap()
        .contains("file not found"));
    assert!(oracle.prompts()[1].contains("--- Error Pass 1 ---"));
    assert!(outcome.format_summary().contains("unrecoverable verifier diagnostics"));
}

#[tokio::test]
async fn test_early_fatal_diagnostics_retry() {
    let (dir, input) = greet_project();
    let oracle = Arc::new(ScriptedOracle::always(wrap("greet", "puts(\"hello\");")));
    let verifier = Arc::new(
        ScriptedVerifier::passing()
            .then_fail("a.c:1:10: config.h: file not found")
            .then_pass(),
    );
    let clock = Arc::new(SimClock::new());

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.c", "c"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.passes, 2);
}

#[tokio::test]
async fn test_pass_budget_exhausted() {
    let (dir, input) = greet_project();
    let oracle = Arc::new(ScriptedOracle::always(wrap("greet", "puts(\"hello\");")));
    let verifier = Arc::new(ScriptedVerifier::failing("a.c:2: error: expected ';'"));
    let clock = Arc::new(SimClock::new());
    let mut config = GeneratorConfig::default();
    config.policy.passes_max = 3;

    let outcome = generator_with(&oracle, &verifier, &clock, config)
        .build(&request(dir.path(), input, "app.c", "c"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Failed(FatalReason::PassesExhausted));
    assert_eq!(outcome.passes, 3);
    assert_eq!(oracle.calls_count(), 3);
}

#[tokio::test]
async fn test_leakage_hint_replaces_diagnostics() {
    let (dir, input) = greet_project();
    let oracle = Arc::new(ScriptedOracle::always(wrap("greet", "puts(\"hello\");")));
    let verifier = Arc::new(
        ScriptedVerifier::passing()
            .then_fail("a.c:1:1: error: unknown type name 'import sys'")
            .then_pass(),
    );
    let clock = Arc::new(SimClock::new());

    generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.c", "c"))
        .await
        .unwrap();

    let prompts = oracle.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("It seems you wrote Python code instead of C"));
    assert!(!prompts[1].contains("unknown type name"));
}

#[tokio::test]
async fn test_rate_limit_backoff_uses_hint_then_linear() {
    let (dir, input) = greet_project();
    let oracle = Arc::new(
        ScriptedOracle::new()
            .fail(OracleError::RateLimited {
                retry_after: Some(Duration::from_secs(7)),
                message: "slow down".to_string(),
            })
            .fail(OracleError::Other("connection reset".to_string()))
            .respond(wrap("greet", "console_print(\"hello\")")),
    );
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.oracle_calls, 3);
    assert_eq!(clock.sleeps(), vec![Duration::from_secs(7), Duration::from_secs(10)]);
}

#[tokio::test]
async fn test_oracle_exhausted_is_fatal() {
    let (dir, input) = greet_project();
    let oracle = Arc::new(ScriptedOracle::new());
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());
    let config = GeneratorConfig {
        policy: LoopPolicy {
            oracle_attempts_max: 3,
            ..LoopPolicy::default()
        },
        ..GeneratorConfig::default()
    };

    let outcome = generator_with(&oracle, &verifier, &clock, config)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Failed(FatalReason::OracleExhausted));
    assert_eq!(oracle.calls_count(), 3);
    assert_eq!(clock.sleeps_count(), 2);
    assert_eq!(verifier.runs_count(), 0);
}

#[tokio::test]
async fn test_invalid_responses_consume_attempts() {
    let (dir, input) = greet_project();
    let oracle = Arc::new(
        ScriptedOracle::new()
            .respond("")
            .respond("$ broken { never closed\nnext line")
            .respond(wrap("greet", "console_print(\"hello\")")),
    );
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.passes, 1);
    assert!(oracle.calls_count() >= 2);
}

#[tokio::test]
async fn test_fast_path_verifies_unmodified_input() {
    let dir = tempfile::tempdir().unwrap();
    let source = "int main(void) { return 0; }\n";
    let input = write(dir.path(), "main.c", source);
    let oracle = Arc::new(ScriptedOracle::new());
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "main", "c"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.passes, 0);
    assert_eq!(oracle.calls_count(), 0);
    match &verifier.targets()[0] {
        VerifyTarget::Sources { sources, .. } => {
            assert_eq!(sources.len(), 1);
            assert!(sources[0].ends_with("main.c"));
        }
        other => panic!("unexpected target {:?}", other),
    }
    assert_eq!(fs::read_to_string(dir.path().join("main")).unwrap(), source);
}

#[tokio::test]
async fn test_fast_path_failure_preloads_history() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "main.c", "int main(void) { return 0 }\n");
    let oracle = Arc::new(ScriptedOracle::always("int main(void) { return 0; }\n"));
    let verifier = Arc::new(
        ScriptedVerifier::passing()
            .then_fail("main.c:1:29: error: expected ';' before '}' token")
            .then_pass(),
    );
    let clock = Arc::new(SimClock::new());

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "main", "c"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.passes, 1);
    assert_eq!(oracle.calls_count(), 1);
    assert!(oracle.prompts()[0].contains("PREVIOUS COMPILATION ATTEMPT FAILED:\nmain.c:1:29"));
}

#[tokio::test]
async fn test_cyclic_import_dry_run() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(dir.path(), "a.glp", "A-start\nIMPORT: \"b.glp\"\nA-end\n");
    write(dir.path(), "b.glp", "B-start\nIMPORT: \"a.glp\"\nB-end\n");
    let oracle = Arc::new(ScriptedOracle::new());
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let mut req = request(dir.path(), a, "a.py", "py");
    req.dry_run = true;
    let outcome = generator(&oracle, &verifier, &clock).build(&req).await.unwrap();

    assert_eq!(outcome.status, BuildStatus::DryRun);
    assert_eq!(oracle.calls_count(), 0);
    let preview = outcome.preview.unwrap();
    assert_eq!(preview.matches("A-start").count(), 1);
    assert_eq!(preview.matches("B-start").count(), 1);
    assert_eq!(preview.matches("CYCLIC IMPORT DETECTED: a.glp").count(), 1);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(!dir.path().join("a.py").exists());
}

#[tokio::test]
async fn test_scan_error_aborts_before_oracle() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "app.glp", "$$ open {\nnever closed\n");
    let oracle = Arc::new(ScriptedOracle::always("x"));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let result = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await;

    assert!(matches!(result, Err(glupe_generator::GeneratorError::Scan(_))));
    assert_eq!(oracle.calls_count(), 0);
}

#[tokio::test]
async fn test_fill_mode_generates_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        dir.path(),
        "main.py",
        "import sys\n$$ add { define add(a, b) }$$\nprint(add(1, 2))\n",
    );
    let oracle = Arc::new(ScriptedOracle::always("def add(a, b):\n    return a + b\n"));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let mut req = request(dir.path(), input, "filled.py", "py");
    req.mode = BuildMode::Fill;
    let outcome = generator(&oracle, &verifier, &clock).build(&req).await.unwrap();

    assert_eq!(outcome.status, BuildStatus::Filled);
    assert_eq!(oracle.calls_count(), 1);
    assert_eq!(verifier.runs_count(), 0);
    assert!(oracle.prompts()[0].contains("Implement the code for the container 'add'"));
    assert_eq!(
        fs::read_to_string(dir.path().join("filled.py")).unwrap(),
        "import sys\ndef add(a, b):\n    return a + b\nprint(add(1, 2))\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("glupe_cache").join("add.txt")).unwrap(),
        "def add(a, b):\n    return a + b"
    );
}

const SERIES_BLUEPRINT: &str = "\
EXPORT: \"util.py\"
square helper
EXPORT: END
EXPORT: \"main.py\"
print the square of 3 using util
EXPORT: END
";

#[tokio::test]
async fn test_series_mode_builds_each_file_with_context() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "project.glp", SERIES_BLUEPRINT);
    let oracle = Arc::new(
        ScriptedOracle::new()
            .respond("def sq(x):\n    return x * x\n")
            .respond("from util import sq\nprint(sq(3))\n"),
    );
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let mut req = request(dir.path(), input, "main.py", "py");
    req.mode = BuildMode::Series;
    let outcome = generator(&oracle, &verifier, &clock).build(&req).await.unwrap();

    assert_eq!(outcome.status, BuildStatus::Series);
    assert_eq!(oracle.calls_count(), 2);
    let prompts = oracle.prompts();
    assert!(prompts[0].contains("TASK: Implement the file 'util.py'."));
    assert!(prompts[1].contains("// --- FILE: util.py ---\ndef sq(x):"));
    assert!(fs::read_to_string(dir.path().join("util.py"))
        .unwrap()
        .starts_with("def sq(x):\n    return x * x\n"));
    assert!(fs::read_to_string(dir.path().join("main.py"))
        .unwrap()
        .starts_with("from util import sq\n"));
}

#[tokio::test]
async fn test_series_failure_cancels_remaining_entries() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "project.glp", SERIES_BLUEPRINT);
    let oracle = Arc::new(ScriptedOracle::new().respond("def sq(x):\n    return x * x\n"));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());
    let mut config = GeneratorConfig::default();
    config.policy.oracle_attempts_max = 2;

    let mut req = request(dir.path(), input, "main.py", "py");
    req.mode = BuildMode::Series;
    let outcome = generator_with(&oracle, &verifier, &clock, config)
        .build(&req)
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Failed(FatalReason::OracleExhausted));
    assert!(dir.path().join("util.py").exists());
    assert!(!dir.path().join("main.py").exists());
}

#[tokio::test]
async fn test_export_directives_switch_to_project_mode() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        dir.path(),
        "project.glp",
        "EXPORT: \"src/app.py\"\na script that prints 1\nEXPORT: END\n",
    );
    let oracle = Arc::new(ScriptedOracle::always(
        "```\nEXPORT: \"src/app.py\"\nprint(1)\nEXPORT: END\n```",
    ));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Exported);
    assert!(oracle.prompts()[0].starts_with("ROLE: Software Architect."));
    assert_eq!(outcome.written, vec![PathBuf::from("src/app.py")]);
    assert_eq!(
        fs::read_to_string(dir.path().join("src").join("app.py")).unwrap(),
        "print(1)\n"
    );
    assert!(matches!(verifier.targets()[0], VerifyTarget::Project { .. }));
}

#[tokio::test]
async fn test_update_mode_includes_old_code() {
    let (dir, input) = greet_project();
    write(dir.path(), "app.py", "print('old')\n");
    let oracle = Arc::new(ScriptedOracle::always(wrap("greet", "console_print(\"hello\")")));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let mut req = request(dir.path(), input, "app.py", "py");
    req.update = true;
    req.update_targets = vec!["greet".to_string()];
    let outcome = generator(&oracle, &verifier, &clock).build(&req).await.unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    let prompt = &oracle.prompts()[0];
    assert!(prompt.contains("TASK: UPDATE existing code."));
    assert!(prompt.contains("--- [OLD CODE] ---\nprint('old')"));
}

#[tokio::test]
async fn test_selective_update_keeps_lock_hash_of_edited_container() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "app.glp", "$$ keep { old_body }$$\n$$ redo { r1 }$$\n");
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let first = Arc::new(ScriptedOracle::always(format!(
        "{}{}",
        wrap("keep", "keep_v1()"),
        wrap("redo", "redo_v1()")
    )));
    generator(&first, &verifier, &clock)
        .build(&request(dir.path(), input.clone(), "app.py", "py"))
        .await
        .unwrap();

    // Both bodies change, only `redo` is targeted.
    write(dir.path(), "app.glp", "$$ keep { new_body }$$\n$$ redo { r2 }$$\n");
    let second = Arc::new(ScriptedOracle::always(format!(
        "{}{}",
        wrap("keep", "keep_stale()"),
        wrap("redo", "redo_v2()")
    )));
    let mut req = request(dir.path(), input.clone(), "app.py", "py");
    req.update = true;
    req.update_targets = vec!["redo".to_string()];
    let outcome = generator(&second, &verifier, &clock).build(&req).await.unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.cache_hits, 1);
    assert_eq!(outcome.stored, vec!["redo".to_string()]);
    assert!(second.prompts()[0].contains("keep_v1()"));
    let cache = ContentCache::open(dir.path());
    assert_eq!(cache.state().containers["keep"].hash, content_hash("old_body"));
    assert_eq!(cache.state().containers["redo"].hash, content_hash("r2"));
    assert_eq!(
        fs::read_to_string(dir.path().join("glupe_cache").join("keep.txt")).unwrap(),
        "keep_v1()"
    );

    // A later full build sees the stale hash and regenerates `keep`.
    let third = Arc::new(ScriptedOracle::always(format!(
        "{}{}",
        wrap("keep", "keep_v2()"),
        wrap("redo", "redo_v2()")
    )));
    let outcome = generator(&third, &verifier, &clock)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.cache_hits, 1);
    assert_eq!(outcome.stored, vec!["keep".to_string()]);
    assert!(third.prompts()[0].contains("new_body"));
    let cache = ContentCache::open(dir.path());
    assert_eq!(cache.state().containers["keep"].hash, content_hash("new_body"));
    assert_eq!(
        fs::read_to_string(dir.path().join("glupe_cache").join("keep.txt")).unwrap(),
        "keep_v2()"
    );
}

#[tokio::test]
async fn test_block_header_across_lines() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        dir.path(),
        "app.glp",
        "$$ base { be polite }$$\n$$ greet\n  -> base\n{\n  print_hello\n}$$\n",
    );
    let oracle = Arc::new(ScriptedOracle::always(format!(
        "{}{}",
        wrap("base", "# polite"),
        wrap("greet", "console_print(\"hello\")")
    )));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.stored, vec!["base".to_string(), "greet".to_string()]);
    let prompt = &oracle.prompts()[0];
    assert!(prompt.contains("print_hello"));
    assert!(prompt.contains("be polite"));
    assert!(!prompt.contains("-> base"));
    assert_eq!(
        fs::read_to_string(dir.path().join("glupe_cache").join("greet.txt")).unwrap(),
        "console_print(\"hello\")"
    );
}

#[tokio::test]
async fn test_input_exports_are_written_before_generation() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        dir.path(),
        "app.glp",
        "EXPORT: \"README.md\"\n# Greeter\nEXPORT: END\n$$ greet { print_hello }$$\n",
    );
    let oracle = Arc::new(ScriptedOracle::always(wrap("greet", "console_print(\"hello\")")));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let mut dry = request(dir.path(), input.clone(), "app.py", "py");
    dry.dry_run = true;
    generator(&oracle, &verifier, &clock).build(&dry).await.unwrap();
    assert!(!dir.path().join("README.md").exists());

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.written, vec![PathBuf::from("README.md")]);
    assert_eq!(
        fs::read_to_string(dir.path().join("README.md")).unwrap(),
        "# Greeter\n"
    );
    assert!(fs::read_to_string(dir.path().join("app.py"))
        .unwrap()
        .contains("console_print(\"hello\")"));
}

const C_SOURCE: &str = "int main(void) { return 0; }\n";

#[tokio::test]
async fn test_keep_saves_source_next_to_binary() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "app.glp", "a program that exits with 0\n");
    let oracle = Arc::new(ScriptedOracle::always(C_SOURCE));
    let verifier = Arc::new(ScriptedVerifier::passing().emitting_binary());
    let clock = Arc::new(SimClock::new());

    let mut req = request(dir.path(), input, "app", "c");
    req.keep_source = true;
    let outcome = generator(&oracle, &verifier, &clock).build(&req).await.unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(fs::read_to_string(dir.path().join("app")).unwrap(), STAND_IN_BINARY);
    assert_eq!(fs::read_to_string(dir.path().join("app.c")).unwrap(), C_SOURCE);
    assert!(!dir.path().join(".glupe_build").exists());
}

#[tokio::test]
async fn test_transpile_saves_source_instead_of_binary() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "app.glp", "a program that exits with 0\n");
    let oracle = Arc::new(ScriptedOracle::always(C_SOURCE));
    let verifier = Arc::new(ScriptedVerifier::passing().emitting_binary());
    let clock = Arc::new(SimClock::new());

    let mut req = request(dir.path(), input, "app", "c");
    req.transpile = true;
    req.run = true;
    let outcome = generator(&oracle, &verifier, &clock).build(&req).await.unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(fs::read_to_string(dir.path().join("app")).unwrap(), C_SOURCE);
    assert!(!dir.path().join("app.c").exists());
    assert_eq!(outcome.run_exit, None);
    assert_eq!(outcome.warnings, vec!["C source saved, nothing to run".to_string()]);
}

#[tokio::test]
async fn test_run_refused_in_blind_mode() {
    let (dir, input) = greet_project();
    let oracle = Arc::new(ScriptedOracle::always(wrap("greet", "console_print(\"hello\")")));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());
    let mut config = GeneratorConfig::default();
    config.verifier.blind = true;

    let mut req = request(dir.path(), input, "app.py", "py");
    req.run = true;
    let outcome = generator_with(&oracle, &verifier, &clock, config)
        .build(&req)
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.run_exit, None);
    assert_eq!(outcome.warnings, vec!["cannot run in blind mode".to_string()]);
}

#[tokio::test]
async fn test_tree_shake_pass() {
    let (dir, input) = greet_project();
    let generated = wrap("greet", "def unused():\n    pass\nconsole_print(\"hello\")");
    let oracle = Arc::new(
        ScriptedOracle::new()
            .respond(generated)
            .respond("```python\nconsole_print(\"hello\")\n```"),
    );
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let mut req = request(dir.path(), input, "app.py", "py");
    req.tree_shake = true;
    let outcome = generator(&oracle, &verifier, &clock).build(&req).await.unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.oracle_calls, 2);
    let prompts = oracle.prompts();
    assert!(prompts[1].starts_with("ROLE: Senior Code Optimizer."));
    assert!(prompts[1].contains("def unused():"));
    assert_eq!(
        fs::read_to_string(dir.path().join("app.py")).unwrap(),
        "console_print(\"hello\")\n"
    );
    // The cache keeps the container as generated.
    assert!(fs::read_to_string(dir.path().join("glupe_cache").join("greet.txt"))
        .unwrap()
        .contains("def unused():"));
}

#[tokio::test]
async fn test_tree_shake_error_keeps_code() {
    let (dir, input) = greet_project();
    let oracle = Arc::new(
        ScriptedOracle::new()
            .respond(wrap("greet", "console_print(\"hello\")"))
            .respond("ERROR: nothing to remove"),
    );
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());

    let mut req = request(dir.path(), input, "app.py", "py");
    req.tree_shake = true;
    let outcome = generator(&oracle, &verifier, &clock).build(&req).await.unwrap();

    assert_eq!(outcome.status, BuildStatus::Built);
    assert_eq!(outcome.oracle_calls, 2);
    let output = fs::read_to_string(dir.path().join("app.py")).unwrap();
    assert!(output.contains("console_print(\"hello\")"));
    assert!(!output.contains("ERROR:"));
}

#[tokio::test]
async fn test_no_cache_ignores_stored_containers() {
    let (dir, input) = greet_project();
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = Arc::new(SimClock::new());
    let oracle = Arc::new(ScriptedOracle::always(wrap("greet", "console_print(\"hello\")")));
    generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input.clone(), "app.py", "py"))
        .await
        .unwrap();

    let mut req = request(dir.path(), input, "app.py", "py");
    req.use_cache = false;
    req.instructions = Some("again".to_string());
    let outcome = generator(&oracle, &verifier, &clock).build(&req).await.unwrap();

    assert_eq!(outcome.cache_hits, 0);
    assert_eq!(oracle.calls_count(), 2);
}

#[tokio::test]
async fn test_seeded_oracle_faults() {
    let seed = get_or_generate_seed();
    let mut env = DstEnv::with_fault_config(seed, FaultConfig::aggressive());
    let (dir, input) = greet_project();
    let oracle = Arc::new(env.faulty_oracle(ScriptedOracle::always(wrap(
        "greet",
        "console_print(\"hello\")",
    ))));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = env.clock_handle();

    let outcome = generator(&oracle, &verifier, &clock)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    // Every failed call but the last is followed by exactly one backoff.
    assert!(
        matches!(
            outcome.status,
            BuildStatus::Built | BuildStatus::Failed(FatalReason::OracleExhausted)
        ),
        "{}: {:?}",
        env.format_seed(),
        outcome.status
    );
    assert_eq!(outcome.oracle_calls as usize, clock.sleeps_count() + 1, "{}", env.format_seed());
    assert!(outcome.oracle_calls <= LoopPolicy::default().oracle_attempts_max);
}

#[tokio::test]
async fn test_always_rate_limited_backs_off_linearly() {
    let mut env = DstEnv::with_fault_config(1, FaultConfig::always_rate_limited());
    let (dir, input) = greet_project();
    let oracle = Arc::new(env.faulty_oracle(ScriptedOracle::always("unused")));
    let verifier = Arc::new(ScriptedVerifier::passing());
    let clock = env.clock_handle();
    let config = GeneratorConfig {
        policy: LoopPolicy {
            oracle_attempts_max: 4,
            backoff_base: Duration::from_secs(5),
            ..LoopPolicy::default()
        },
        ..GeneratorConfig::default()
    };

    let outcome = generator_with(&oracle, &verifier, &clock, config)
        .build(&request(dir.path(), input, "app.py", "py"))
        .await
        .unwrap();

    assert_eq!(outcome.status, BuildStatus::Failed(FatalReason::OracleExhausted));
    assert_eq!(
        clock.sleeps(),
        vec![
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(15)
        ]
    );
}
