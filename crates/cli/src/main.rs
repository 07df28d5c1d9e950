//! isoenv CLI - run scripts inside per-source isolated environments

mod logging;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

use isoenv_core::application::{Dispatcher, RetryPolicy};
use isoenv_core::domain::ExecutionRequest;
use isoenv_infra_config::LoadedConfig;
use isoenv_infra_system::{build_dispatcher, ProvisionCommands, SystemSettings};

use logging::LogFormat;

#[derive(Parser)]
#[command(name = "isoenv")]
#[command(about = "Environment-isolated task dispatcher", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ./isoenv.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSON logs to daily-rolling files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// stderr log format
    #[arg(long, global = true, env = "ISOENV_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Show per-source environment health
    Status {
        /// Print the status map as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a script in a source's environment
    Dispatch {
        /// Source id (e.g. benzinga, polygon)
        source: String,

        /// Script to run
        script: PathBuf,

        /// Extra child environment variable (repeatable)
        #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        env: Vec<(String, String)>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        /// Arguments passed to the script
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Create or repair a source's environment
    Provision {
        source: String,

        /// Remove and recreate the environment from scratch
        #[arg(long)]
        force: bool,
    },

    /// Remove the dispatcher's temp directory
    Cleanup,

    /// List registered sources
    Sources {
        /// Print the source specs as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn system_settings(config: &LoadedConfig) -> SystemSettings {
    let dispatcher = &config.settings.dispatcher;
    let provisioner = &config.settings.provisioner;
    let defaults = ProvisionCommands::default();

    SystemSettings {
        project_root: config.project_root(),
        temp_dir: config.temp_dir(),
        transcript_dir: config.transcript_dir(),
        output_cap_bytes: dispatcher.output_cap_bytes,
        kill_grace: config.kill_grace(),
        retry_policy: RetryPolicy::new(config.retry_base_delay(), config.retry_max_delay()),
        env_passthrough: dispatcher.env_passthrough.clone(),
        provision_commands: ProvisionCommands {
            create: provisioner.create_command.clone().unwrap_or(defaults.create),
            install: provisioner.install_command.clone().unwrap_or(defaults.install),
        },
        provision_step_timeout: config.provision_step_timeout(),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // 1. Environment: ./.env first, then the configured dotenv file
    //    (logged to stderr only; the log dir comes from the config)
    dotenvy::dotenv().ok();
    let (config, dotenv) =
        tracing::subscriber::with_default(logging::startup(cli.log_format)?, || -> Result<_> {
            let config = isoenv_infra_config::load(cli.config.as_deref())
                .context("Failed to load configuration")?;
            let dotenv = config.load_dotenv()?;
            Ok((config, dotenv))
        })?;

    // 2. Logging
    let log_dir = cli.log_dir.clone().or_else(|| config.log_dir());
    let _log_guard = logging::init(cli.log_format, log_dir.as_deref())?;

    info!(
        version = isoenv_core::VERSION,
        config = ?config.path(),
        dotenv = ?dotenv,
        "isoenv starting"
    );

    // 3. Registry + adapters
    let registry = Arc::new(config.registry().context("Invalid source configuration")?);
    let dispatcher = build_dispatcher(registry, system_settings(&config));

    run(cli.command, &dispatcher).await
}

async fn run(command: Commands, dispatcher: &Dispatcher) -> Result<ExitCode> {
    match command {
        Commands::Status { json } => {
            let status = dispatcher.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                render::status_table(&status);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Dispatch {
            source,
            script,
            env,
            json,
            args,
        } => {
            let mut request = ExecutionRequest::new(source, script).with_args(args);
            for (key, value) in env {
                request = request.with_env(key, value);
            }

            let result = dispatcher.dispatch_request(&request).await;
            debug!(success = result.success, attempts = result.attempt_count, "Dispatch returned");

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                render::execution_result(&result);
            }

            Ok(if result.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Commands::Provision { source, force } => {
            println!(
                "{}",
                format!("Provisioning {source}...").cyan().bold()
            );

            match dispatcher.provision(&source, force).await {
                Ok(outcome) => {
                    println!("  {} {} ({})", "✓".green(), source, outcome);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    println!("  {} {}", "✗".red(), e);
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Commands::Cleanup => {
            match dispatcher.teardown() {
                Ok(()) => println!("{}", "✓ Temporary files removed".green().bold()),
                Err(e) => println!("  {} {}", "✗".red(), e),
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Sources { json } => {
            let registry = dispatcher.registry();
            if json {
                let specs: Vec<_> = registry.iter().collect();
                println!("{}", serde_json::to_string_pretty(&specs)?);
            } else {
                render::sources_table(registry.iter());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("API_KEY=abc=def").unwrap(),
            ("API_KEY".to_string(), "abc=def".to_string())
        );
        assert_eq!(
            parse_key_val("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_key_val("=value").is_err());
        assert!(parse_key_val("novalue").is_err());
    }

    #[test]
    fn test_dispatch_args_pass_through() {
        let cli = Cli::try_parse_from([
            "isoenv",
            "dispatch",
            "-e",
            "LOG_LEVEL=debug",
            "polygon",
            "scripts/news.py",
            "--symbol",
            "AAPL",
        ])
        .unwrap();

        match cli.command {
            Commands::Dispatch {
                source,
                script,
                env,
                args,
                json,
            } => {
                assert_eq!(source, "polygon");
                assert_eq!(script, PathBuf::from("scripts/news.py"));
                assert_eq!(env, vec![("LOG_LEVEL".to_string(), "debug".to_string())]);
                assert_eq!(args, vec!["--symbol", "AAPL"]);
                assert!(!json);
            }
            _ => panic!("expected dispatch"),
        }
    }

    #[test]
    fn test_settings_fall_back_to_default_commands() {
        let config = isoenv_infra_config::load_from_str(
            "[provisioner]\ncreate_command = [\"uv\", \"venv\", \"{env_root}\"]\n\
             [sources.fmp]\nenv_root = \"venv_fmp\"\n",
            "/srv/app",
        )
        .unwrap();

        let settings = system_settings(&config);

        assert_eq!(settings.provision_commands.create, vec!["uv", "venv", "{env_root}"]);
        assert_eq!(
            settings.provision_commands.install,
            ProvisionCommands::default().install
        );
        assert_eq!(settings.project_root, PathBuf::from("/srv/app/."));
    }
}
