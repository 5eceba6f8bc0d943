//! CLI for building blueprints.
//!
//! # Usage
//!
//! ```bash
//! # Build a C++ binary from a blueprint
//! glupe build app.glp -o app --lang cpp
//!
//! # Regenerate only the `parser` container, keeping the rest cached
//! glupe build app.glp -o app -u parser
//!
//! # Fill containers in place inside an existing source file
//! glupe build main.py -o main.py --fill
//!
//! # Build, keep the generated C next to the binary, then run it
//! glupe build app.glp --lang c -k --run
//!
//! # Drop the container cache, the lock file and the build stamp
//! glupe clean cache
//!
//! # Configure the cloud provider
//! glupe config set cloud-protocol openai
//! glupe config show
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use glupe_core::clean_cache;
use glupe_generator::{
    BlueprintGenerator, BuildMode, BuildRequest, GeneratorConfig, GlupeConfig, OracleClient,
    ProviderMode, API_KEY_ENV, CONFIG_FILE,
};
use glupe_verifier::{lookup, profile_for_path, CommandVerifier, LangProfile, VerifierError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "glupe", version, about = "Turn annotated blueprints into verified code")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build one or more blueprint files
    Build(BuildArgs),
    /// Inspect or edit config.json
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Remove build state from the current directory
    #[command(subcommand)]
    Clean(CleanCommand),
}

#[derive(Subcommand)]
enum CleanCommand {
    /// Remove glupe_cache/, .glupe.lock and .glupe_build.cache
    Cache,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the configuration with the API key masked
    Show,
    /// Set one key: api-key, model-cloud, model-local, url-cloud, url-local, cloud-protocol, max-retries
    Set { key: String, value: String },
}

#[derive(Args)]
struct BuildArgs {
    /// Blueprint or source files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output file (default: first input stem, plus the target extension
    /// unless the language compiles to a binary)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Target language name or extension (default: from the output)
    #[arg(long)]
    lang: Option<String>,

    /// Use the local provider (default)
    #[arg(long, conflicts_with = "cloud")]
    local: bool,

    /// Use the cloud provider
    #[arg(long)]
    cloud: bool,

    /// Update the existing output; optional comma-separated container ids to regenerate
    #[arg(short = 'u', long = "update", num_args = 0.., value_delimiter = ',')]
    update: Option<Vec<String>>,

    /// Generate each missing container in place
    #[arg(long, conflicts_with_all = ["series", "make"])]
    fill: bool,

    /// Generate one file per EXPORT entry
    #[arg(long, conflicts_with = "make")]
    series: bool,

    /// Multi-file project verified by its build script
    #[arg(long)]
    make: bool,

    /// Never reuse cached container output (fresh results are still stored)
    #[arg(long)]
    no_cache: bool,

    /// Save generated source instead of the compiled binary
    #[arg(short = 't', long)]
    transpile: bool,

    /// Also save the generated source next to the binary
    #[arg(short = 'k', long = "keep")]
    keep: bool,

    /// Run the output after a successful build
    #[arg(long)]
    run: bool,

    /// Ask the oracle to remove unused code before verification
    #[arg(long)]
    shake: bool,

    /// Print the resolved context and stop before calling the oracle
    #[arg(long)]
    dry_run: bool,

    /// Extra instructions for the oracle
    #[arg(short, long)]
    instructions: Option<String>,

    /// Generation pass budget
    #[arg(long)]
    max_passes: Option<u32>,

    /// Build command with %FILE% and %OUT% placeholders
    #[arg(long)]
    build_cmd: Option<String>,

    /// Skip verification
    #[arg(long)]
    blind: bool,

    /// Quick mode (smaller budgets, short timeouts)
    #[arg(long, conflicts_with = "thorough")]
    quick: bool,

    /// Thorough mode (larger budgets, long timeouts)
    #[arg(long)]
    thorough: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "glupe=debug" } else { "glupe=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let config_path = PathBuf::from(CONFIG_FILE);
    let config = match GlupeConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Config(cmd) => run_config(cmd, config, &config_path),
        Command::Build(args) => run_build(args, config).await,
        Command::Clean(CleanCommand::Cache) => run_clean_cache(),
    }
}

fn run_clean_cache() -> ExitCode {
    match clean_cache(Path::new(".")) {
        Ok(removed) if removed.is_empty() => {
            println!("Nothing to clean");
            ExitCode::SUCCESS
        }
        Ok(removed) => {
            for path in removed {
                println!("Removed {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_config(cmd: ConfigCommand, mut config: GlupeConfig, path: &Path) -> ExitCode {
    match cmd {
        ConfigCommand::Show => {
            print!("{}", config.show());
            ExitCode::SUCCESS
        }
        ConfigCommand::Set { key, value } => {
            if let Err(e) = config.set(&key, &value).and_then(|_| config.save(path)) {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
            println!("Updated {} in {}", key, path.display());
            ExitCode::SUCCESS
        }
    }
}

/// Target language: `--lang`, else the output's extension, else the first input's.
/// A `.glp` extension names a blueprint, never a target.
fn resolve_lang(args: &BuildArgs) -> Option<LangProfile> {
    if let Some(name) = &args.lang {
        return lookup(name);
    }
    let concrete = |path: &Path| profile_for_path(path).filter(|p| p.id != "glp");
    args.output
        .as_deref()
        .and_then(concrete)
        .or_else(|| args.inputs.first().and_then(|p| concrete(p)))
}

async fn run_build(args: BuildArgs, config: GlupeConfig) -> ExitCode {
    let Some(lang) = resolve_lang(&args) else {
        eprintln!("Error: cannot determine the target language; use --lang");
        return ExitCode::FAILURE;
    };
    let lang = config.apply_toolchain(lang);

    let mut gen_config = if args.quick {
        GeneratorConfig::quick()
    } else if args.thorough {
        GeneratorConfig::thorough()
    } else {
        GeneratorConfig::default()
    };
    if let Some(passes) = args.max_passes {
        gen_config.policy.passes_max = passes.max(1);
    }
    if let Some(attempts) = config.oracle_attempts_max() {
        gen_config.policy.oracle_attempts_max = attempts;
    }
    gen_config.verifier.blind = args.blind;
    gen_config.verifier.custom_build_cmd = args.build_cmd.clone();

    let verifier = CommandVerifier::new(lang.clone(), gen_config.verifier.clone());
    if !args.blind && !args.dry_run && args.build_cmd.is_none() {
        match verifier.probe_toolchain().await {
            Ok(version) => tracing::info!(lang = %lang.name, "Toolchain: {}", version),
            Err(VerifierError::NoVersionCommand { .. }) => {}
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Install the toolchain, set one with 'glupe config', or pass --blind.");
                return ExitCode::FAILURE;
            }
        }
    }

    let mode = if args.cloud {
        ProviderMode::Cloud
    } else {
        ProviderMode::Local
    };
    let endpoint = config.endpoint(mode, std::env::var(API_KEY_ENV).ok());
    if mode == ProviderMode::Cloud && endpoint.api_key.is_none() && !args.dry_run {
        eprintln!("Error: no API key for the cloud provider");
        eprintln!("  export {}=...  or  glupe config set api-key ...", API_KEY_ENV);
        return ExitCode::FAILURE;
    }
    let model_id = endpoint.model_id.clone();
    let oracle = OracleClient::new(endpoint, gen_config.oracle_timeout);

    let output = args.output.clone().unwrap_or_else(|| {
        let first = args.inputs.first().cloned().unwrap_or_default();
        if lang.produces_binary && !args.transpile {
            first.with_extension("")
        } else {
            first.with_extension(lang.extension.trim_start_matches('.'))
        }
    });

    let mut request = BuildRequest::new(args.inputs.clone(), output, lang);
    request.explicit_lang = args.lang.is_some();
    request.mode = if args.fill {
        BuildMode::Fill
    } else if args.series {
        BuildMode::Series
    } else if args.make {
        BuildMode::Make
    } else {
        BuildMode::Standard
    };
    request.update = args.update.is_some();
    request.update_targets = args.update.unwrap_or_default();
    request.instructions = args.instructions;
    request.use_cache = !args.no_cache;
    request.dry_run = args.dry_run;
    request.model_id = model_id;
    request.transpile = args.transpile;
    request.keep_source = args.keep;
    request.run = args.run;
    request.tree_shake = args.shake;

    let generator = BlueprintGenerator::new(Arc::new(oracle), Arc::new(verifier), gen_config);

    match generator.build(&request).await {
        Ok(outcome) => {
            if let Some(preview) = &outcome.preview {
                println!("{}", preview);
            }
            println!("{}", outcome.format_summary());
            if outcome.success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
