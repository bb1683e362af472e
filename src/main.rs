#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use praetor::config::{ApprovalMode, PraetorConfig};
use praetor::error::{PipelineError, PraetorError};
use praetor::pipeline::{PipelineController, RunStatus};
use praetor::policy::GuardrailPolicy;
use praetor::scenario::{self, SCENARIO_NAMES};
use praetor::scheduler::WatchScheduler;

#[derive(Parser)]
#[command(name = "praetor", version, about = "Guarded security-operations pipeline")]
struct Cli {
    /// Explicit config file (defaults to ~/.praetor/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one pipeline run.
    Run {
        /// Named threat scenario to simulate; omit for a live run.
        #[arg(long)]
        scenario: Option<String>,

        /// Guardrail rule file overriding the configured one.
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Approval mode override: cli, allow, or deny.
        #[arg(long)]
        approver: Option<String>,
    },

    /// Run the pipeline repeatedly and track posture over time.
    Watch {
        #[arg(long)]
        scenario: Option<String>,

        /// Seconds between cycles.
        #[arg(long)]
        interval_secs: Option<u64>,

        /// Stop after this many cycles.
        #[arg(long)]
        max_cycles: Option<u32>,
    },

    /// List the built-in threat scenarios.
    Scenarios {
        /// Show signals and expected outcomes per scenario.
        #[arg(long)]
        detail: bool,
    },

    /// Guardrail policy tooling.
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },
}

#[derive(Subcommand)]
enum PolicyCommand {
    /// Parse and validate a rule file.
    Check {
        /// Rule file to check; defaults to the configured one.
        #[arg(long)]
        rules: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: logging already initialized");
    }

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let mut config = PraetorConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            scenario,
            rules,
            approver,
        } => {
            if let Some(rules) = rules {
                config.policy.rules_path = Some(rules);
            }
            if let Some(mode) = approver {
                config.approval.mode = parse_approval_mode(&mode)?;
            }
            let scenario = scenario
                .map(|name| scenario::lookup(&name))
                .transpose()?;

            let cancel = cancel_on_ctrl_c();
            let controller =
                PipelineController::new(config, scenario).with_cancel(cancel);
            match controller.run().await {
                Ok(report) => {
                    println!("{}", report.render()?);
                    Ok(exit_for(report.status))
                }
                Err(PraetorError::Pipeline(PipelineError::Fatal { reason, partial })) => {
                    eprintln!("{} {reason}", style("fatal:").red().bold());
                    println!("{}", partial.render()?);
                    Ok(ExitCode::FAILURE)
                }
                Err(e) => Err(e.into()),
            }
        }

        Command::Watch {
            scenario,
            interval_secs,
            max_cycles,
        } => {
            if let Some(secs) = interval_secs {
                config.watch.interval_secs = secs;
            }
            if let Some(max) = max_cycles {
                config.watch.max_cycles = Some(max);
            }
            let scenario = scenario
                .map(|name| scenario::lookup(&name))
                .transpose()?;

            let cancel = cancel_on_ctrl_c();
            let cycles = WatchScheduler::new(config, scenario)
                .with_cancel(cancel)
                .run()
                .await?;
            println!("watch finished after {cycles} cycle(s)");
            Ok(ExitCode::SUCCESS)
        }

        Command::Scenarios { detail } => {
            list_scenarios(detail)?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Policy { command } => match command {
            PolicyCommand::Check { rules } => {
                let path = rules.or(config.policy.rules_path);
                let policy = match &path {
                    Some(path) => GuardrailPolicy::load(path)?,
                    None => GuardrailPolicy::builtin(),
                };
                let source = path
                    .as_ref()
                    .map_or_else(|| "builtin".to_string(), |p| p.display().to_string());
                println!(
                    "{} {} ({} rules, {} injection patterns)",
                    style("ok:").green().bold(),
                    source,
                    policy.rules.len(),
                    policy.injection_patterns.len()
                );
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}

fn parse_approval_mode(value: &str) -> Result<ApprovalMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "cli" => Ok(ApprovalMode::Cli),
        "allow" => Ok(ApprovalMode::Allow),
        "deny" => Ok(ApprovalMode::Deny),
        other => anyhow::bail!("unknown approval mode '{other}' (expected cli, allow, or deny)"),
    }
}

fn exit_for(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Degraded => ExitCode::from(2),
        RunStatus::Cancelled => ExitCode::from(130),
        RunStatus::Fatal => ExitCode::FAILURE,
    }
}

fn list_scenarios(detail: bool) -> Result<()> {
    for name in SCENARIO_NAMES {
        let scenario = scenario::lookup(name)?;
        println!(
            "{}  {}",
            style(format!("{name:<18}")).cyan().bold(),
            scenario.description
        );
        if detail {
            println!(
                "  expected: severity={} attack={}",
                scenario.expected_severity, scenario.expected_attack_type
            );
            for signal in &scenario.signals {
                println!("  [{}] {}: {}", signal.source, signal.kind, signal.description);
            }
            if !scenario.expected_actions.is_empty() {
                println!("  actions: {}", scenario.expected_actions.join(", "));
            }
            println!();
        }
    }
    Ok(())
}

/// First Ctrl-C requests a graceful stop; a second one kills the process.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing current stage");
            handle.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::error!("second interrupt, exiting immediately");
            std::process::exit(130);
        }
    });
    cancel
}
