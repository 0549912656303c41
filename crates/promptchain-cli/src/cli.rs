use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use promptchain_error::ExitCode;
use promptchain_runner::{RunFlags, RunRequest};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Parser, Debug)]
#[command(name = "promptchain", about = "Local-first orchestrator for multi-stage LLM prompt workflows")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a pipeline, in full or over a bounded subset of stages.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the pipeline YAML file.
    #[arg(long)]
    pipeline: Utf8PathBuf,

    /// Resume an existing run directory instead of starting a new one.
    #[arg(long = "run-dir")]
    run_dir: Option<Utf8PathBuf>,

    /// Run exactly one stage.
    #[arg(long)]
    stage: Option<String>,

    /// Run starting from this stage through the end of the pipeline.
    #[arg(long = "from-stage")]
    from_stage: Option<String>,

    /// Run up to and including this stage.
    #[arg(long = "stop-after")]
    stop_after: Option<String>,

    /// Override the directory that holds run directories.
    #[arg(long = "runs-root")]
    runs_root: Option<Utf8PathBuf>,

    /// Override the local provider's base URL.
    #[arg(long = "local-provider-base-url")]
    local_provider_base_url: Option<String>,
}

const KNOWN_RUN_FLAGS: &[&str] = &[
    "--pipeline",
    "--run-dir",
    "--stage",
    "--from-stage",
    "--stop-after",
    "--runs-root",
    "--local-provider-base-url",
];

/// Run the CLI end to end and return the process exit code. Mirrors a
/// sync `main` handing off to a library `run`: argument parsing and
/// runtime construction stay here, errors are printed once, and the
/// exit code is the only thing that crosses back to `main`.
pub fn run() -> ExitCode {
    promptchain_config::load_dotenv();

    let argv: Vec<String> = std::env::args().collect();
    let (known_args, parameters) = split_dynamic_parameters(&argv);

    let cli = match Cli::try_parse_from(&known_args) {
        Ok(cli) => cli,
        Err(err) => {
            err.print().ok();
            return ExitCode::CONFIG_ERROR;
        }
    };

    init_tracing();

    let Command::Run(args) = cli.command;
    run_pipeline(args, parameters)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("PROMPTCHAIN_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn run_pipeline(args: RunArgs, parameters: BTreeMap<String, Value>) -> ExitCode {
    let engine_config = promptchain_config::EngineConfig::resolve(promptchain_config::CliOverrides {
        runs_root: args.runs_root,
        log_level: None,
        local_provider_base_url: args.local_provider_base_url,
    });

    let pipeline = match promptchain_config::load_pipeline(&args.pipeline) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(&err);
        }
    };

    let base_dir = args
        .pipeline
        .parent()
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| Utf8PathBuf::from("."));

    let request = RunRequest {
        pipeline,
        base_dir,
        runs_root: engine_config.runs_root,
        resume_run_dir: args.run_dir,
        parameters,
        flags: RunFlags {
            stage: args.stage,
            from_stage: args.from_stage,
            stop_after: args.stop_after,
        },
        local_provider_base_url: engine_config.local_provider_base_url,
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start async runtime: {err}");
            return ExitCode::STAGE_FAILURE;
        }
    };

    match runtime.block_on(promptchain_runner::run(request)) {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(&err)
        }
    }
}

/// Split raw argv into the subset clap recognizes and a map of any other
/// `--name value` pairs, which are bound into the pipeline as user
/// parameters (spec.md §6: "unknown flags become parameters").
fn split_dynamic_parameters(argv: &[String]) -> (Vec<String>, BTreeMap<String, Value>) {
    let mut known = Vec::with_capacity(argv.len());
    let mut parameters = BTreeMap::new();

    if let Some(program) = argv.first() {
        known.push(program.clone());
    }

    let mut i = 1;
    while i < argv.len() {
        let arg = &argv[i];
        if arg == "run" {
            known.push(arg.clone());
            i += 1;
            continue;
        }
        if KNOWN_RUN_FLAGS.contains(&arg.as_str()) {
            known.push(arg.clone());
            if let Some(value) = argv.get(i + 1) {
                known.push(value.clone());
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }
        if let Some(name) = arg.strip_prefix("--") {
            if let Some(value) = argv.get(i + 1) {
                parameters.insert(name.to_string(), Value::String(value.clone()));
                i += 2;
                continue;
            }
        }
        i += 1;
    }

    (known, parameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_flags_pass_through_and_unknown_ones_become_parameters() {
        let argv: Vec<String> = [
            "promptchain",
            "run",
            "--pipeline",
            "pipeline.yaml",
            "--topic",
            "chess openings",
            "--stage",
            "draft",
            "--audience",
            "beginners",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();

        let (known, parameters) = split_dynamic_parameters(&argv);

        assert_eq!(
            known,
            vec!["promptchain", "run", "--pipeline", "pipeline.yaml", "--stage", "draft"]
        );
        assert_eq!(parameters.get("topic"), Some(&Value::String("chess openings".to_string())));
        assert_eq!(parameters.get("audience"), Some(&Value::String("beginners".to_string())));
    }

    #[test]
    fn a_trailing_flag_with_no_value_is_dropped() {
        let argv: Vec<String> =
            ["promptchain", "run", "--pipeline", "pipeline.yaml", "--dangling"].into_iter().map(str::to_string).collect();

        let (_, parameters) = split_dynamic_parameters(&argv);
        assert!(parameters.is_empty());
    }
}
