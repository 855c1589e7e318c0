// src/main.rs
//! meta - CLI entry point

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use std::io;
use std::process::ExitCode;

mod cli;
mod commands;

use cli::{Cli, Commands};
use meta::{ConfigOverrides, Context};

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    cli.log_level.clone().unwrap_or_else(|| "info".to_string()),
                )
            }),
        )
        .with_writer(io::stderr)
        .init();

    // Completions need no workspace at all
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        generate(*shell, &mut command, "meta", &mut io::stdout());
        return ExitCode::SUCCESS;
    }

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<meta::Error>()
                .map(|err| {
                    eprintln!("kind: {}", err.kind_name());
                    err.exit_code()
                })
                .unwrap_or(1);
            ExitCode::from(code.clamp(0, 255) as u8)
        }
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    let overrides = ConfigOverrides {
        manifests_dir: cli.manifests_dir.clone(),
        log_level: cli.log_level.clone(),
        show_progress: cli.no_progress.then_some(false),
        ..Default::default()
    };
    let ctx = Context::from_cwd(&overrides)?;

    match cli.command {
        Commands::Validate { env } => commands::cmd_validate(&ctx, env.as_deref()),

        Commands::Plan { env, component, locked } => {
            commands::cmd_plan(&ctx, env.as_deref(), component.as_deref(), locked)
        }

        Commands::Apply {
            env,
            locked,
            jobs,
            continue_on_error,
            retry,
            skip_packages,
            timeout,
            component_timeout,
            wait,
        } => commands::cmd_apply(
            &ctx,
            env.as_deref(),
            locked,
            jobs,
            continue_on_error,
            retry,
            skip_packages,
            timeout,
            component_timeout,
            wait,
        ),

        Commands::Status { env } => commands::cmd_status(&ctx, env.as_deref()),

        Commands::Lock { env, changeset, validate, command } => match command {
            Some(cli::LockCommands::Promote { src, dst }) => {
                commands::cmd_lock_promote(&ctx, &src, &dst)
            }
            Some(cli::LockCommands::Compare { left, right }) => {
                commands::cmd_lock_compare(&ctx, &left, &right)
            }
            None => commands::cmd_lock(&ctx, env.as_deref(), changeset.as_deref(), validate),
        },

        Commands::Rollback { command } => commands::cmd_rollback(&ctx, command),

        Commands::Changeset { command } => commands::cmd_changeset(&ctx, command),

        Commands::Vendor { command } => commands::cmd_vendor(&ctx, command),

        Commands::Cache { command } => commands::cmd_cache(&ctx, command),

        Commands::Store { command } => commands::cmd_store(&ctx, command),

        Commands::Gc { dry_run, cache_ttl_days } => commands::cmd_gc(&ctx, dry_run, cache_ttl_days),

        Commands::Health { env, component, all, build, tests } => {
            // --all is the default when no component is named
            let component = if all { None } else { component };
            commands::cmd_health(&ctx, env.as_deref(), component.as_deref(), build, tests)
        }

        Commands::Config { command } => commands::cmd_config(&ctx, command),

        Commands::Snapshot { command } => commands::cmd_snapshot(&ctx, command),

        Commands::Completions { .. } => unreachable!("handled before dispatch"),
    }
}
