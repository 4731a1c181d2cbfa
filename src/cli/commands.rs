//! Command handlers: resolve the `Target`/`Plan`, build an `Engine`, and
//! print human-readable (or `--json`) output.

use std::path::Path;

use colored::Colorize;

use crate::config;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::query::{Direction, EventFilter};

use super::{Cli, Commands};

/// Entry point called by `main` (spec.md §2 control flow: CLI → select
/// Target → factory(C12) → ...).
pub fn run(cli: &Cli) -> Result<()> {
    let target_uri = cli
        .target
        .clone()
        .ok_or_else(|| Error::validation("no target given: pass --target or set DBDEPLOY_TARGET"))?;

    let top_dir = cli
        .plan_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let planner = config::resolve_planner_identity()?;
    let plan = super::planfile::load(&cli.plan_file, top_dir, &planner)?;
    let target = config::resolve_target(&cli.target_name, &target_uri, top_dir)?;
    let engine = Engine::new(target, plan)?;

    match &cli.command {
        Commands::Deploy { to, mode } => deploy(&engine, to.as_deref(), (*mode).into()),
        Commands::Revert { to } => revert(&engine, to.as_deref()),
        Commands::Verify { change } => verify(&engine, change.as_deref()),
        Commands::Status => status(&engine),
        Commands::Log { events, change, project, direction, limit, offset } => {
            log(&engine, events, change.as_deref(), project.as_deref(), direction, *limit, *offset)
        }
        Commands::Show { change } => show(&engine, change),
        Commands::Tag { name, change } => tag(&engine, name, change.as_deref()),
        Commands::InitRegistry => {
            engine.ensure_registry()?;
            println!("registry ready for target {}", engine.target().name);
            Ok(())
        }
        Commands::Completions { shell } => {
            emit_completions(*shell);
            Ok(())
        }
    }
}

fn deploy(engine: &Engine, to: Option<&str>, mode: crate::reconciler::Mode) -> Result<()> {
    let deployed = engine.deploy_plan(to, mode)?;
    if deployed.is_empty() {
        println!("{}", "nothing to deploy".dimmed());
    }
    for name in deployed {
        println!("{} {}", "deploy".green().bold(), name);
    }
    Ok(())
}

fn revert(engine: &Engine, to: Option<&str>) -> Result<()> {
    let reverted = engine.revert_plan(to)?;
    if reverted.is_empty() {
        println!("{}", "nothing to revert".dimmed());
    }
    for name in reverted {
        println!("{} {}", "revert".yellow().bold(), name);
    }
    Ok(())
}

fn verify(engine: &Engine, change: Option<&str>) -> Result<()> {
    match change {
        Some(name) => {
            let change = engine
                .plan()
                .by_name(name)
                .ok_or_else(|| Error::plan(format!("unknown change: {name}")))?;
            let ok = engine.verify_change(change);
            println!("{name}: {}", if ok { "ok".green() } else { "not ok".red().bold() });
            if ok {
                Ok(())
            } else {
                Err(Error::deployment("verify", Some(name.to_string()), None, engine.target().engine_tag, "verify failed"))
            }
        }
        None => {
            let failed = engine.verify_all()?;
            if failed.is_empty() {
                println!("{}", "all changes verified ok".green());
                Ok(())
            } else {
                for name in &failed {
                    println!("{name}: {}", "not ok".red().bold());
                }
                Err(Error::validation(format!("{} change(s) failed verification", failed.len())))
            }
        }
    }
}

fn status(engine: &Engine) -> Result<()> {
    match engine.current_state()? {
        Some(state) => {
            println!("{}", "Current state".bold().underline());
            println!("project: {}", state.project);
            println!("change:  {}", state.change.cyan());
            println!("by:      {} <{}>", state.committer_name, state.committer_email);
            println!("at:      {}", state.committed_at.to_rfc3339());
            if !state.tags.is_empty() {
                println!("tags:    {}", state.tags.join(", ").dimmed());
            }
        }
        None => println!("{}", "no changes deployed".dimmed()),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn log(
    engine: &Engine,
    events: &[String],
    change: Option<&str>,
    project: Option<&str>,
    direction: &str,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<()> {
    let filter = EventFilter {
        event_kinds: events.to_vec(),
        change_regex: change.map(str::to_string),
        project_regex: project.map(str::to_string),
        committer_regex: None,
        planner_regex: None,
        limit,
        offset,
        direction: Direction::parse(direction)?,
    };
    for record in engine.search_events(&filter)? {
        println!(
            "{} {} {} by {} at {}",
            record.event,
            record.project,
            record.change,
            record.committer_name,
            record.committed_at.to_rfc3339()
        );
    }
    Ok(())
}

fn tag(engine: &Engine, tag_name: &str, change_name: Option<&str>) -> Result<()> {
    let target_name = match change_name {
        Some(name) => name.to_string(),
        None => {
            let state = engine
                .current_state()?
                .ok_or_else(|| Error::plan("no changes deployed to tag"))?;
            state.change
        }
    };
    let change = engine
        .plan()
        .by_name(&target_name)
        .ok_or_else(|| Error::plan(format!("unknown change: {target_name}")))?;
    engine.tag_change(change, tag_name)?;
    println!("tagged {target_name} as @{tag_name}");
    Ok(())
}

fn show(engine: &Engine, change_name: &str) -> Result<()> {
    let current = engine
        .current_changes()?
        .into_iter()
        .find(|c| c.change == change_name)
        .ok_or_else(|| Error::plan(format!("change not deployed: {change_name}")))?;
    println!("change:  {}", current.change);
    println!("id:      {}", current.change_id);
    println!("by:      {} <{}>", current.committer_name, current.committer_email);
    println!("at:      {}", current.committed_at.to_rfc3339());
    Ok(())
}

fn emit_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
}
