//! Blueprint build driver.
//!
//! Runs one build: load and import the inputs, resolve the blueprint against
//! the content cache, then carry out the effects the state machine asks for.
//! Every bound lives in [`LoopPolicy`]; this module performs the I/O.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use glupe_core::markers::absorb_generated;
use glupe_core::preprocess::{lift_commented_containers, strip_metadata};
use glupe_core::repair::repair_container_syntax;
use glupe_core::series::aggregate_inputs;
use glupe_core::{
    content_hash, parse_series_blueprint, resolve_blueprint, resolve_file, scan, transition,
    BlueprintFileEntry, CacheError, ContentCache, DispatchDecision, Effect, ErrorHistory, Event,
    ExportError, ExportSplitter, FatalReason, LoopState, MachineError, Oracle, OracleError,
    OracleOutcome, Piece, ResolutionContext, ResolvedBlueprint, ScanError, Sleeper, Verifier,
    VerifierReport, VerifyTarget,
};
use glupe_verifier::{
    extract_first_error, leakage_hint, mark_executable, run_attached, DiagnosticClassifier,
    KeywordClassifier, LangProfile,
};
use tracing::{debug, error, info, warn};

use crate::config::GeneratorConfig;
use crate::prompt::{extract_code_block, PromptBuilder, PromptInputs};

/// Scratch directory for verification builds, under the working directory.
pub const BUILD_DIR: &str = ".glupe_build";
const TEMP_STEM: &str = "temp_build";
const EXPORT_KEYWORD: &str = "EXPORT:";

/// How the blueprint is turned into output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// One output file through the generate/verify loop
    #[default]
    Standard,
    /// Generate each cache miss in place, no global loop
    Fill,
    /// One oracle call per `EXPORT:` entry
    Series,
    /// Multi-file project verified by its build script
    Make,
}

/// One build invocation.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub inputs: Vec<PathBuf>,
    /// Output path, relative to `work_dir` unless absolute
    pub output: PathBuf,
    /// Holds the cache, the lock file and exported files
    pub work_dir: PathBuf,
    pub lang: LangProfile,
    /// Target language was given on the command line
    pub explicit_lang: bool,
    pub mode: BuildMode,
    /// Include the existing output as OLD CODE
    pub update: bool,
    /// Selective update: only these containers may miss the cache
    pub update_targets: Vec<String>,
    pub instructions: Option<String>,
    pub use_cache: bool,
    /// Resolve and stop before any oracle call
    pub dry_run: bool,
    /// Oracle model, part of the build stamp
    pub model_id: String,
    /// Save generated source even for a compiled language
    pub transpile: bool,
    /// Save the source next to a compiled binary
    pub keep_source: bool,
    /// Run the output after a successful build
    pub run: bool,
    /// Ask the oracle to drop unused code before verification
    pub tree_shake: bool,
}

impl BuildRequest {
    pub fn new(inputs: Vec<PathBuf>, output: impl Into<PathBuf>, lang: LangProfile) -> Self {
        Self {
            inputs,
            output: output.into(),
            work_dir: PathBuf::from("."),
            lang,
            explicit_lang: false,
            mode: BuildMode::default(),
            update: false,
            update_targets: Vec::new(),
            instructions: None,
            use_cache: true,
            dry_run: false,
            model_id: String::new(),
            transpile: false,
            keep_source: false,
            run: false,
            tree_shake: false,
        }
    }

    /// Fingerprint of everything that determines the output.
    fn stamp(&self, text: &str) -> String {
        content_hash(&format!(
            "{}{}{}{}{}{}",
            text,
            self.lang.id,
            self.model_id,
            if self.update { "u" } else { "n" },
            if self.tree_shake { "s" } else { "" },
            self.instructions.as_deref().unwrap_or_default()
        ))
    }
}

/// How a build ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    /// Output written and verified
    Built,
    /// Build stamp matched; nothing to do
    UpToDate,
    DryRun,
    Filled,
    Series,
    /// Project files exported and verified
    Exported,
    Failed(FatalReason),
}

impl BuildStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, BuildStatus::Failed(_))
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Built => f.write_str("built"),
            BuildStatus::UpToDate => f.write_str("up to date"),
            BuildStatus::DryRun => f.write_str("dry run"),
            BuildStatus::Filled => f.write_str("filled"),
            BuildStatus::Series => f.write_str("series generated"),
            BuildStatus::Exported => f.write_str("project exported"),
            BuildStatus::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of a build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub status: BuildStatus,
    pub output: PathBuf,
    /// Generation passes run; 0 when only the fast path ran
    pub passes: u32,
    pub oracle_calls: u32,
    pub cache_hits: usize,
    /// Container ids written to the cache
    pub stored: Vec<String>,
    /// Files written by export splitting
    pub written: Vec<PathBuf>,
    pub warnings: Vec<String>,
    /// Resolved context of a dry run
    pub preview: Option<String>,
    /// Verifier output of the last failed run
    pub last_diagnostics: Option<String>,
    /// Exit code of the output when `run` was requested
    pub run_exit: Option<i32>,
    pub duration: Duration,
}

impl BuildOutcome {
    fn new(output: PathBuf) -> Self {
        Self {
            status: BuildStatus::DryRun,
            output,
            passes: 0,
            oracle_calls: 0,
            cache_hits: 0,
            stored: Vec::new(),
            written: Vec::new(),
            warnings: Vec::new(),
            preview: None,
            last_diagnostics: None,
            run_exit: None,
            duration: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.status.is_success()
    }

    /// Format as a summary string.
    pub fn format_summary(&self) -> String {
        let status = if self.success() { "SUCCESS" } else { "FAILED" };
        let mut summary = format!(
            "[{}] Build completed in {:.2}s\n",
            status,
            self.duration.as_secs_f64(),
        );

        summary.push_str(&format!("  Status: {}\n", self.status));
        summary.push_str(&format!("  Output: {}\n", self.output.display()));
        summary.push_str(&format!("  Passes: {}\n", self.passes));
        summary.push_str(&format!("  Oracle calls: {}\n", self.oracle_calls));
        summary.push_str(&format!("  Cache hits: {}\n", self.cache_hits));

        if !self.stored.is_empty() {
            summary.push_str(&format!("  Cached containers: {}\n", self.stored.join(", ")));
        }
        if !self.written.is_empty() {
            let files: Vec<String> = self.written.iter().map(|p| p.display().to_string()).collect();
            summary.push_str(&format!("  Exported files: {}\n", files.join(", ")));
        }
        if let Some(code) = self.run_exit {
            summary.push_str(&format!("  Run exit code: {}\n", code));
        }
        for warning in &self.warnings {
            summary.push_str(&format!("  Warning: {}\n", warning));
        }

        if let BuildStatus::Failed(reason) = self.status {
            summary.push_str(&format!("\nBuild failed: {}.\n", reason));
            if let Some(diagnostics) = &self.last_diagnostics {
                summary.push_str(&format!("  Last error: {}\n", extract_first_error(diagnostics)));
            }
        }

        summary
    }
}

/// Build errors that stop the run outright.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("no input files")]
    NoInputs,

    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("blueprint error: {0}")]
    Scan(#[from] ScanError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("export error: {0}")]
    Export(#[from] ExportError),

    #[error("state machine error: {0}")]
    Machine(#[from] MachineError),
}

/// Real-time sleeper.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Check oracle output before it is used.
///
/// Strips a markdown fence. Output whose container syntax no longer scans
/// is repaired and rescanned; empty or unrepairable output is invalid.
pub fn validate_response(raw: &str) -> Result<String, OracleError> {
    let code = extract_code_block(raw);
    if code.trim().is_empty() {
        return Err(OracleError::InvalidResponse("empty response".to_string()));
    }
    if scan(&code).is_ok() {
        return Ok(code);
    }
    let repaired = repair_container_syntax(&code);
    match scan(&repaired) {
        Ok(_) => {
            debug!("Repaired container syntax in oracle output");
            Ok(repaired)
        }
        Err(e) => Err(OracleError::InvalidResponse(format!(
            "unrepairable container syntax: {}",
            e
        ))),
    }
}

/// Inputs after import resolution and preprocessing.
struct LoadedInputs {
    /// Canonical input paths, verified directly on the fast path
    sources: Vec<PathBuf>,
    text: String,
}

/// Paths of one build.
struct BuildPaths {
    work_dir: PathBuf,
    output: PathBuf,
    temp_source: PathBuf,
    temp_binary: PathBuf,
}

impl BuildPaths {
    fn new(req: &BuildRequest) -> Self {
        let work_dir = fs::canonicalize(&req.work_dir).unwrap_or_else(|_| req.work_dir.clone());
        let output = if req.output.is_absolute() {
            req.output.clone()
        } else {
            work_dir.join(&req.output)
        };
        let build_dir = work_dir.join(BUILD_DIR);
        Self {
            temp_source: build_dir.join(format!("{}{}", TEMP_STEM, req.lang.extension)),
            temp_binary: build_dir.join(TEMP_STEM),
            work_dir,
            output,
        }
    }

    fn build_dir(&self) -> PathBuf {
        self.work_dir.join(BUILD_DIR)
    }
}

/// What a usable oracle response turned into.
enum Candidate {
    /// Single-file source to compile
    Source(String),
    /// Exported project verified by its build script
    Project,
}

/// Drives builds against an oracle and a verifier.
pub struct BlueprintGenerator {
    oracle: Arc<dyn Oracle>,
    verifier: Arc<dyn Verifier>,
    sleeper: Arc<dyn Sleeper>,
    classifier: Arc<dyn DiagnosticClassifier>,
    config: GeneratorConfig,
}

impl BlueprintGenerator {
    /// Generator with real-time backoff and the keyword classifier.
    pub fn new(oracle: Arc<dyn Oracle>, verifier: Arc<dyn Verifier>, config: GeneratorConfig) -> Self {
        Self {
            oracle,
            verifier,
            sleeper: Arc::new(TokioSleeper),
            classifier: Arc::new(KeywordClassifier::default()),
            config,
        }
    }

    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn DiagnosticClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Run one build.
    pub async fn build(&self, req: &BuildRequest) -> Result<BuildOutcome, GeneratorError> {
        let start = Instant::now();
        if req.inputs.is_empty() {
            return Err(GeneratorError::NoInputs);
        }

        let paths = BuildPaths::new(req);
        let mut outcome = BuildOutcome::new(paths.output.clone());
        let loaded = load_inputs(&req.inputs, &mut outcome.warnings)?;

        let mut cache = ContentCache::open(&paths.work_dir);
        if !req.use_cache {
            cache = cache.disabled();
        }
        if !req.update_targets.is_empty() {
            let targets: BTreeSet<String> = req.update_targets.iter().cloned().collect();
            cache = cache.with_update_targets(targets);
        }

        let stamp = req.stamp(&loaded.text);
        let unchanged = cache.read_build_stamp().as_deref() == Some(stamp.as_str());
        if unchanged && paths.output.exists() && !req.update && !req.dry_run {
            info!(output = %paths.output.display(), "Up to date, skipping build");
            outcome.status = BuildStatus::UpToDate;
            outcome.duration = start.elapsed();
            return Ok(outcome);
        }

        let mut ctx = ResolutionContext::new(cache);
        let mut resolved = resolve_blueprint(&mut ctx, &loaded.text)?;
        outcome.cache_hits = resolved.cached_count();
        outcome
            .warnings
            .extend(ctx.warnings.iter().map(|w| w.to_string()));
        info!(
            cached_count = resolved.cached_count(),
            pending_count = resolved.pending_count(),
            "Resolved blueprint"
        );

        if req.dry_run {
            outcome.preview = Some(resolved.render());
            outcome.status = BuildStatus::DryRun;
            outcome.duration = start.elapsed();
            return Ok(outcome);
        }

        if req.mode != BuildMode::Series {
            let report = ExportSplitter::new(&paths.work_dir).split(&loaded.text)?;
            if !report.written.is_empty() {
                info!(written_count = report.written.len(), "Exported files declared by the inputs");
            }
            record_exports(&mut outcome, &report.written, &report.refused);
        }

        let mut mode = req.mode;
        let mut series: Vec<BlueprintFileEntry> = Vec::new();
        match req.mode {
            BuildMode::Standard if resolved.render().contains(EXPORT_KEYWORD) => {
                info!("EXPORT directives found, switching to project mode");
                mode = BuildMode::Make;
            }
            BuildMode::Series => {
                series = parse_series_blueprint(&resolved.render());
                if series.is_empty() {
                    warn!("No EXPORT entries for series mode, building a single file");
                    mode = BuildMode::Standard;
                }
            }
            _ => {}
        }

        let result = match mode {
            BuildMode::Fill => {
                self.run_fill(req, &mut ctx, &mut resolved, &paths, &mut outcome)
                    .await
            }
            BuildMode::Series => {
                self.run_series(&series, &mut ctx, &resolved, &paths, &mut outcome)
                    .await
            }
            BuildMode::Standard | BuildMode::Make => {
                self.run_loop(req, mode, &mut ctx, &resolved, &loaded, &paths, &mut outcome)
                    .await
            }
        };

        // The lock file is written even when the build failed.
        let saved = ctx.cache.save();
        let status = result?;
        saved?;

        if status == BuildStatus::Built {
            ctx.cache.write_build_stamp(&stamp)?;
            if req.run {
                self.run_output(req, &paths, &mut outcome).await;
            }
        }

        outcome.status = status;
        outcome.duration = start.elapsed();
        Ok(outcome)
    }

    /// Call the oracle until a usable response or the attempt bound.
    async fn call_with_retries(
        &self,
        prompt: &str,
        outcome: &mut BuildOutcome,
    ) -> Result<String, OracleError> {
        let mut attempt = 1;
        loop {
            outcome.oracle_calls += 1;
            let err = match self.oracle.generate(prompt).await.and_then(|raw| validate_response(&raw)) {
                Ok(code) => return Ok(code),
                Err(e) => e,
            };
            match self.config.policy.dispatch_decision(attempt, &err.outcome()) {
                DispatchDecision::Retry(delay) => {
                    warn!(attempt, ?delay, "Oracle call failed, retrying: {}", err);
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
                DispatchDecision::GiveUp => {
                    error!(attempt, "Oracle attempts exhausted: {}", err);
                    return Err(err);
                }
            }
        }
    }

    async fn run_fill(
        &self,
        req: &BuildRequest,
        ctx: &mut ResolutionContext,
        resolved: &mut ResolvedBlueprint,
        paths: &BuildPaths,
        outcome: &mut BuildOutcome,
    ) -> Result<BuildStatus, GeneratorError> {
        let pending: Vec<(String, String, String)> = resolved
            .pending()
            .map(|(id, hash, prompt)| (id.to_string(), hash.to_string(), prompt.to_string()))
            .collect();

        for (id, hash, container_prompt) in pending {
            info!(id = %id, "Filling container");
            let prompt =
                PromptBuilder::build_fill_prompt(&id, &req.lang, &resolved.render(), &container_prompt);
            let code = match self.call_with_retries(&prompt, outcome).await {
                Ok(code) => code,
                Err(_) => return Ok(BuildStatus::Failed(FatalReason::OracleExhausted)),
            };
            let code = code.trim_end().to_string();
            ctx.cache.store(&id, &hash, &code)?;
            resolved.fill(&id, &code);
            outcome.stored.push(id);
        }

        write_file(&paths.output, &resolved.render_plain())?;
        Ok(BuildStatus::Filled)
    }

    async fn run_series(
        &self,
        entries: &[BlueprintFileEntry],
        ctx: &mut ResolutionContext,
        resolved: &ResolvedBlueprint,
        paths: &BuildPaths,
        outcome: &mut BuildOutcome,
    ) -> Result<BuildStatus, GeneratorError> {
        let hashes = resolved.hashes();
        let splitter = ExportSplitter::new(&paths.work_dir);
        let mut project_context = String::new();
        let entries_count = entries.len();

        for (index, entry) in entries.iter().enumerate() {
            info!(
                target_file = %entry.target_filename,
                "Series file {}/{}",
                index + 1,
                entries_count
            );
            let prompt = PromptBuilder::build_series_prompt(
                &entry.target_filename,
                &project_context,
                &entry.instruction_body,
            );
            let code = match self.call_with_retries(&prompt, outcome).await {
                Ok(code) => code,
                Err(_) => {
                    warn!(
                        skipped_count = entries_count - index - 1,
                        "Cancelling remaining series entries"
                    );
                    return Ok(BuildStatus::Failed(FatalReason::OracleExhausted));
                }
            };

            let absorbed = absorb_generated(&code, &hashes, &mut ctx.cache)?;
            outcome.stored.extend(absorbed.stored);
            let stream = format!(
                "{} \"{}\"\n{}\n{} END\n",
                EXPORT_KEYWORD, entry.target_filename, absorbed.clean, EXPORT_KEYWORD
            );
            let report = splitter.split(&stream)?;
            record_exports(outcome, &report.written, &report.refused);
            project_context.push_str(&format!(
                "\n// --- FILE: {} ---\n{}\n",
                entry.target_filename, absorbed.clean
            ));
        }

        Ok(BuildStatus::Series)
    }

    /// The generate/verify loop for single-file and project builds.
    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        req: &BuildRequest,
        mode: BuildMode,
        ctx: &mut ResolutionContext,
        resolved: &ResolvedBlueprint,
        loaded: &LoadedInputs,
        paths: &BuildPaths,
        outcome: &mut BuildOutcome,
    ) -> Result<BuildStatus, GeneratorError> {
        let policy = self.config.policy;
        let context = resolved.render();
        let hashes = resolved.hashes();
        let old_code = if req.update {
            read_old_code(&paths.output, &req.lang)
        } else {
            None
        };

        let all_literal = resolved
            .pieces
            .iter()
            .all(|p| matches!(p, Piece::Literal(_)));
        let fast_path = mode == BuildMode::Standard
            && req.lang.produces_binary
            && req.instructions.is_none()
            && !req.update
            && all_literal
            && !resolved.has_anonymous_templates
            && req.inputs.iter().all(|p| req.lang.matches_path(p));
        if fast_path {
            info!("Inputs are already {}, verifying them directly", req.lang.name);
        }

        let splitter = ExportSplitter::new(&paths.work_dir);
        let mut history = ErrorHistory::new(self.config.history_entries_max);
        let mut state = LoopState::initial(fast_path);
        let mut effect = if fast_path {
            Effect::RunVerifier
        } else {
            Effect::AssemblePrompt
        };
        let mut prompt = String::new();
        let mut candidate: Option<Candidate> = None;
        let mut report: Option<VerifierReport> = None;

        loop {
            let event = match effect {
                Effect::Halt => break,

                Effect::AssemblePrompt => {
                    let error_history = history.render();
                    let inputs = PromptInputs {
                        lang: &req.lang,
                        context: &context,
                        instructions: req.instructions.as_deref(),
                        old_code: old_code.as_deref(),
                        error_history: &error_history,
                        explicit_lang: req.explicit_lang,
                    };
                    prompt = match mode {
                        BuildMode::Make => PromptBuilder::build_architect_prompt(&inputs),
                        _ => PromptBuilder::build_generation_prompt(&inputs),
                    };
                    info!(
                        pass = state.pass(),
                        passes_max = policy.passes_max,
                        "Generating with {}",
                        self.oracle.name()
                    );
                    Event::PromptAssembled
                }

                Effect::CallOracle | Effect::Backoff(_) => {
                    if let Effect::Backoff(delay) = effect {
                        warn!(?delay, "Backing off before the next oracle call");
                        self.sleeper.sleep(delay).await;
                    }
                    outcome.oracle_calls += 1;
                    let response = self
                        .oracle
                        .generate(&prompt)
                        .await
                        .and_then(|raw| validate_response(&raw));
                    match response {
                        Ok(code) => {
                            let absorbed = absorb_generated(&code, &hashes, &mut ctx.cache)?;
                            outcome.stored.extend(absorbed.stored);
                            let clean = if req.tree_shake {
                                self.tree_shake(absorbed.clean, &req.lang, outcome).await
                            } else {
                                absorbed.clean
                            };
                            let split = splitter.split(&clean)?;
                            record_exports(outcome, &split.written, &split.refused);
                            candidate = Some(if split.leftover_is_blank() && !split.written.is_empty() {
                                Candidate::Project
                            } else {
                                if mode == BuildMode::Make {
                                    warn!("Content outside EXPORT blocks, verifying it as a single file");
                                }
                                Candidate::Source(split.leftover)
                            });
                            Event::OracleReturned(OracleOutcome::Usable)
                        }
                        Err(e) => {
                            warn!(pass = state.pass(), "Oracle call failed: {}", e);
                            Event::OracleReturned(e.outcome())
                        }
                    }
                }

                Effect::RunVerifier => {
                    let target = match &candidate {
                        None => VerifyTarget::Sources {
                            sources: loaded.sources.clone(),
                            output: paths.temp_binary.clone(),
                        },
                        Some(Candidate::Project) => VerifyTarget::Project {
                            dir: paths.work_dir.clone(),
                        },
                        Some(Candidate::Source(code)) => {
                            write_file(&paths.temp_source, code)?;
                            VerifyTarget::Sources {
                                sources: vec![paths.temp_source.clone()],
                                output: paths.temp_binary.clone(),
                            }
                        }
                    };
                    let verified = self.verifier.verify(&target).await;
                    let verdict = self.classifier.classify(&verified);
                    if verified.passed {
                        info!(pass = state.pass(), "Verification passed");
                    } else {
                        warn!(
                            pass = state.pass(),
                            ?verdict,
                            "Verification failed: {}",
                            extract_first_error(&verified.diagnostics)
                        );
                    }
                    report = Some(verified);
                    Event::VerifierReturned(verdict)
                }

                Effect::RecordDiagnostics => {
                    let diagnostics = report.as_ref().map(|r| r.diagnostics.as_str()).unwrap_or_default();
                    let pass = state.pass();
                    if pass == 0 {
                        history.record_fast_path(diagnostics);
                    } else if let Some(hint) = leakage_hint(diagnostics, &req.lang.id, &req.lang.name) {
                        debug!(pass, "Recording language leakage hint");
                        history.record_hint(pass, &hint);
                    } else {
                        history.record(pass, diagnostics);
                    }
                    Event::DiagnosticsRecorded
                }
            };

            let (next_state, next_effect) = transition(&policy, &state, event)?;
            debug!(from = ?state, to = ?next_state, effect = ?next_effect, "Transition");
            state = next_state;
            effect = next_effect;
        }

        outcome.passes = state.pass();
        outcome.last_diagnostics = report.filter(|r| !r.passed).map(|r| r.diagnostics);

        match state {
            LoopState::Success { .. } => {
                outcome.last_diagnostics = None;
                match candidate {
                    Some(Candidate::Project) => Ok(BuildStatus::Exported),
                    Some(Candidate::Source(code)) => {
                        self.save_output(req, paths, Some(&code))?;
                        Ok(BuildStatus::Built)
                    }
                    None => {
                        self.save_output(req, paths, None)?;
                        Ok(BuildStatus::Built)
                    }
                }
            }
            LoopState::Fatal { pass, reason } => {
                error!(pass, "Build halted: {}", reason);
                Ok(BuildStatus::Failed(reason))
            }
            other => {
                debug_assert!(other.is_terminal(), "Loop halted in {:?}", other);
                Ok(BuildStatus::Failed(FatalReason::PassesExhausted))
            }
        }
    }

    /// Write the verified result to the output path.
    ///
    /// `code` is `None` when the unmodified inputs passed on the fast path.
    fn save_output(
        &self,
        req: &BuildRequest,
        paths: &BuildPaths,
        code: Option<&str>,
    ) -> Result<(), GeneratorError> {
        let as_source = req.transpile
            || req.lang.matches_path(&paths.output)
            || !req.lang.produces_binary
            || self.config.verifier.blind
            || !paths.temp_binary.exists();

        let source_text = || match code {
            Some(code) => Ok(code.to_string()),
            None => read_sources(&req.inputs),
        };

        if as_source {
            write_file(&paths.output, &source_text()?)?;
        } else {
            fs::copy(&paths.temp_binary, &paths.output).map_err(|source| GeneratorError::Write {
                path: paths.output.clone(),
                source,
            })?;
            if req.keep_source {
                let kept = paths.output.with_extension(req.lang.extension.trim_start_matches('.'));
                write_file(&kept, &source_text()?)?;
                info!(source = %kept.display(), "Kept generated source");
            }
        }
        info!(output = %paths.output.display(), "Saved output");

        if let Err(e) = fs::remove_dir_all(paths.build_dir()) {
            debug!("Build directory not removed: {}", e);
        }
        Ok(())
    }

    /// One oracle pass that drops unused code.
    ///
    /// Keeps `code` when the call fails, the answer is blank or starts with
    /// `ERROR:`, or `EXPORT:` directives were lost.
    async fn tree_shake(&self, code: String, lang: &LangProfile, outcome: &mut BuildOutcome) -> String {
        info!("Tree shaking generated code");
        outcome.oracle_calls += 1;
        let prompt = PromptBuilder::build_tree_shake_prompt(&code, lang);
        let shaken = match self.oracle.generate(&prompt).await {
            Ok(raw) => extract_code_block(&raw),
            Err(e) => {
                warn!("Tree shaking skipped: {}", e);
                return code;
            }
        };

        let lost_exports = code.contains(EXPORT_KEYWORD) && !shaken.contains(EXPORT_KEYWORD);
        if shaken.trim().is_empty() || shaken.trim_start().starts_with("ERROR:") || lost_exports {
            warn!(lost_exports, "Tree shaking result rejected, keeping the original code");
            return code;
        }
        debug!(
            before_len = code.len(),
            after_len = shaken.len(),
            "Tree shaking applied"
        );
        shaken
    }

    /// Execute the saved output in the working directory.
    async fn run_output(&self, req: &BuildRequest, paths: &BuildPaths, outcome: &mut BuildOutcome) {
        if self.config.verifier.blind {
            warn!("Cannot run in blind mode");
            outcome.warnings.push("cannot run in blind mode".to_string());
            return;
        }

        if req.lang.produces_binary && (req.transpile || req.lang.matches_path(&paths.output)) {
            outcome
                .warnings
                .push(format!("{} source saved, nothing to run", req.lang.name));
            return;
        }
        let Some(argv) = req.lang.run_command(&paths.output) else {
            outcome
                .warnings
                .push(format!("no run command for {}", req.lang.name));
            return;
        };
        if req.lang.produces_binary {
            if let Err(e) = mark_executable(&paths.output) {
                warn!(output = %paths.output.display(), "Cannot mark output executable: {}", e);
            }
        }

        info!(command = %argv.join(" "), "Running output");
        match run_attached(&argv, &paths.work_dir).await {
            Ok(status) => {
                outcome.run_exit = status.code();
                if !status.success() {
                    warn!(?status, "Output exited unsuccessfully");
                }
            }
            Err(e) => {
                warn!("Cannot run output: {}", e);
                outcome.warnings.push(format!("cannot run output: {}", e));
            }
        }
    }
}

fn load_inputs(inputs: &[PathBuf], warnings: &mut Vec<String>) -> Result<LoadedInputs, GeneratorError> {
    let mut sources = Vec::with_capacity(inputs.len());
    let mut named: Vec<(String, String)> = Vec::with_capacity(inputs.len());

    for path in inputs {
        let imported = resolve_file(path).map_err(|source| GeneratorError::Read {
            path: path.clone(),
            source,
        })?;
        for diagnostic in &imported.diagnostics {
            warn!(input = %path.display(), "{}", diagnostic);
            warnings.push(diagnostic.to_string());
        }
        let text = strip_metadata(&lift_commented_containers(&imported.text));
        sources.push(fs::canonicalize(path).unwrap_or_else(|_| path.clone()));
        named.push((path.display().to_string(), text));
    }

    let text = if named.len() == 1 {
        named.remove(0).1
    } else {
        aggregate_inputs(named.iter().map(|(name, text)| (name.as_str(), text.as_str())))
    };
    Ok(LoadedInputs { sources, text })
}

/// Existing output source for update mode.
fn read_old_code(output: &Path, lang: &LangProfile) -> Option<String> {
    let source = output.with_extension(lang.extension.trim_start_matches('.'));
    match fs::read_to_string(&source) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(path = %source.display(), "No existing code to update: {}", e);
            None
        }
    }
}

fn read_sources(inputs: &[PathBuf]) -> Result<String, GeneratorError> {
    let mut text = String::new();
    for path in inputs {
        let content = fs::read_to_string(path).map_err(|source| GeneratorError::Read {
            path: path.clone(),
            source,
        })?;
        text.push_str(&content);
    }
    Ok(text)
}

fn write_file(path: &Path, text: &str) -> Result<(), GeneratorError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| GeneratorError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, text).map_err(|source| GeneratorError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn record_exports(outcome: &mut BuildOutcome, written: &[PathBuf], refused: &[(String, String)]) {
    for path in written {
        if !outcome.written.contains(path) {
            outcome.written.push(path.clone());
        }
    }
    outcome
        .warnings
        .extend(refused.iter().map(|(name, reason)| format!("export {} refused: {}", name, reason)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use glupe_verifier::lookup;

    #[test]
    fn test_validate_strips_fence() {
        let code = validate_response("```python\nprint(1)\n```").unwrap();
        assert_eq!(code, "print(1)\n");
    }

    #[test]
    fn test_validate_rejects_empty() {
        assert!(matches!(
            validate_response("```\n\n```"),
            Err(OracleError::InvalidResponse(_))
        ));
        assert!(matches!(validate_response("   "), Err(OracleError::InvalidResponse(_))));
    }

    #[test]
    fn test_validate_keeps_shell_variables() {
        let code = "echo $HOME and costs $5\n";
        assert_eq!(validate_response(code).unwrap(), code);
    }

    #[test]
    fn test_stamp_depends_on_inputs() {
        let py = lookup("py").unwrap();
        let mut req = BuildRequest::new(vec![PathBuf::from("a.glp")], "a.py", py);
        let base = req.stamp("text");
        assert_eq!(base, req.stamp("text"));
        assert_ne!(base, req.stamp("other"));
        req.instructions = Some("faster".into());
        assert_ne!(base, req.stamp("text"));
        req.instructions = None;
        req.update = true;
        assert_ne!(base, req.stamp("text"));
        req.update = false;
        req.tree_shake = true;
        assert_ne!(base, req.stamp("text"));
    }

    #[test]
    fn test_format_summary() {
        let mut outcome = BuildOutcome::new(PathBuf::from("app.py"));
        outcome.status = BuildStatus::Failed(FatalReason::FatalDiagnostics);
        outcome.passes = 4;
        outcome.oracle_calls = 4;
        outcome.last_diagnostics = Some("main.c:1: fatal error: foo.h: file not found".into());
        let summary = outcome.format_summary();
        assert!(summary.starts_with("[FAILED]"));
        assert!(summary.contains("Passes: 4"));
        assert!(summary.contains("Build failed: unrecoverable verifier diagnostics."));
        assert!(summary.contains("Last error: main.c:1: fatal error: foo.h: file not found"));

        outcome.status = BuildStatus::Built;
        outcome.stored = vec!["greet".into()];
        let summary = outcome.format_summary();
        assert!(summary.starts_with("[SUCCESS]"));
        assert!(summary.contains("Cached containers: greet"));
        assert!(!summary.contains("Run exit code"));

        outcome.run_exit = Some(3);
        assert!(outcome.format_summary().contains("  Run exit code: 3\n"));
    }

    #[test]
    fn test_build_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = BuildRequest::new(vec![PathBuf::from("a.glp")], "out/app", lookup("cpp").unwrap());
        req.work_dir = dir.path().to_path_buf();
        let paths = BuildPaths::new(&req);
        assert!(paths.output.ends_with("out/app"));
        assert!(paths.temp_source.ends_with(".glupe_build/temp_build.cpp"));
        assert!(paths.temp_binary.ends_with(".glupe_build/temp_build"));
    }
}
