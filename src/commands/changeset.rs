// src/commands/changeset.rs

//! `meta changeset` - atomic commit groups across component repos

use anyhow::{bail, Result};

use crate::cli::ChangesetCommands;
use meta::changeset::{self, bisect, ChangesetLog, ChangesetStatus, RepoCommit};
use meta::git::GitDriver;
use meta::manifest::Manifest;
use meta::subprocess::{self, CommandSpec};
use meta::Context;

fn parse_status(s: &str) -> Result<ChangesetStatus> {
    match s {
        "in-progress" => Ok(ChangesetStatus::InProgress),
        "committed" => Ok(ChangesetStatus::Committed),
        "failed" => Ok(ChangesetStatus::Failed),
        "rolled-back" => Ok(ChangesetStatus::RolledBack),
        other => bail!("unknown changeset status '{other}'"),
    }
}

pub fn cmd_changeset(ctx: &Context, command: ChangesetCommands) -> Result<()> {
    let log = ChangesetLog::open(ctx)?;

    match command {
        ChangesetCommands::Create { description, author } => {
            let author = author.or_else(|| std::env::var("USER").ok());
            let changeset = log.create(&description, author.as_deref())?;
            println!("created changeset {}", changeset.id);
            println!("stamp commits with trailer: {}", changeset.trailer());
        }

        ChangesetCommands::Show { id } => {
            let changeset = log.load(&id)?;
            println!("changeset {}", changeset.id);
            println!("  status: {}", changeset.status);
            println!("  author: {}", changeset.author);
            println!("  created: {}", changeset.timestamp);
            println!("  description: {}", changeset.description);
            println!("  commits ({}):", changeset.repos.len());
            for repo in &changeset.repos {
                println!(
                    "    {} {} [{}] {}",
                    repo.name,
                    &repo.commit[..8.min(repo.commit.len())],
                    repo.branch,
                    repo.message.lines().next().unwrap_or("")
                );
            }
        }

        ChangesetCommands::List { status, limit } => {
            let filter = status.as_deref().map(parse_status).transpose()?;
            let changesets = log.list(filter)?;
            let shown = limit.unwrap_or(changesets.len());
            for changeset in changesets.iter().take(shown) {
                println!(
                    "  {} {:<12} {} ({} commits)",
                    changeset.id,
                    changeset.status.to_string(),
                    changeset.description,
                    changeset.repos.len()
                );
            }
        }

        ChangesetCommands::Current => match log.current()? {
            Some(changeset) => {
                println!("{} {}", changeset.id, changeset.description);
            }
            None => println!("no changeset in progress"),
        },

        ChangesetCommands::Record { component } => {
            let current = log
                .current()?
                .ok_or_else(|| anyhow::anyhow!("no changeset in progress"))?;
            let commit = head_commit(ctx, &component)?;
            log.record_commit(&current.id, commit)?;
            println!("recorded {component} HEAD in changeset {}", current.id);
        }

        ChangesetCommands::Finalize { id } => {
            collect_trailer_commits(ctx, &log, &id)?;
            let changeset = log.finalize(&id)?;
            println!(
                "finalized changeset {} with {} commit(s)",
                changeset.id,
                changeset.repos.len()
            );
        }

        ChangesetCommands::Rollback { id } => {
            let manifest = Manifest::load(&ctx.workspace)?;
            let git = GitDriver::new(ctx.cancel.clone());
            let changeset = log.rollback(ctx, &manifest, &git, &id)?;
            println!("changeset {} is now {}", changeset.id, changeset.status);
        }

        ChangesetCommands::Bisect { start, end, test_command } => {
            let candidates = log.committed_between(&start, &end)?;
            if candidates.is_empty() {
                bail!("no committed changesets between {start} and {end}");
            }
            println!("bisecting {} candidate(s)", candidates.len());

            let git = GitDriver::new(ctx.cancel.clone());
            let outcome = bisect(
                &candidates,
                |candidate| {
                    // Materialize the candidate state: each recorded repo at
                    // its recorded commit
                    for repo in &candidate.repos {
                        let dir = ctx.workspace.component_dir(&repo.name);
                        git.fetch(&dir).ok();
                        git.checkout(&dir, &repo.commit)?;
                    }
                    Ok(())
                },
                || {
                    let spec = CommandSpec::new("sh", &["-c", &test_command])
                        .current_dir(ctx.workspace.root());
                    let output = subprocess::run(&spec, &ctx.cancel)?;
                    Ok(output.success())
                },
            )?;

            match outcome {
                Some(outcome) => {
                    println!(
                        "culprit: changeset {} (found in {} step(s))",
                        outcome.culprit, outcome.steps
                    );
                }
                None => println!("test passes at every candidate; culprit not in range"),
            }
        }
    }
    Ok(())
}

/// The HEAD commit of a component repo as a changeset record
fn head_commit(ctx: &Context, component: &str) -> Result<RepoCommit> {
    let manifest = Manifest::load(&ctx.workspace)?;
    let declared = manifest.component(component)?;
    let dir = ctx.workspace.component_dir(component);
    let git = GitDriver::new(ctx.cancel.clone());

    Ok(RepoCommit {
        name: component.to_string(),
        repo: declared.repo.clone(),
        commit: git.commit_sha(&dir)?,
        branch: git.current_branch(&dir)?.unwrap_or_else(|| "HEAD".to_string()),
        message: git.head_message(&dir)?,
    })
}

/// Sweep component repos for HEAD commits stamped with the changeset
/// trailer and record any not yet attached
fn collect_trailer_commits(ctx: &Context, log: &ChangesetLog, id: &str) -> Result<()> {
    let changeset = log.load(id)?;
    let manifest = Manifest::load(&ctx.workspace)?;
    let git = GitDriver::new(ctx.cancel.clone());

    for name in manifest.component_names() {
        let dir = ctx.workspace.component_dir(&name);
        if !dir.join(".git").exists() {
            continue;
        }
        let message = match git.head_message(&dir) {
            Ok(message) => message,
            Err(_) => continue,
        };
        if changeset::extract_changeset_id(&message).as_deref() != Some(id) {
            continue;
        }
        let sha = git.commit_sha(&dir)?;
        if changeset.repos.iter().any(|r| r.commit == sha) {
            continue;
        }
        log.record_commit(id, head_commit(ctx, &name)?)?;
    }
    Ok(())
}
