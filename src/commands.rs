use anyhow::{Context, Result};
use colored::Colorize;
use converge::{Graph, Stack, StateStore};
use drydock::config::Config;
use drydock::plan::{PlanMode, plan as dry_run};
use drydock::report;
use drydock::stack::{HostPaths, STACK_NAME, media_stack, retained};
use drydock::state::FileStateStore;
use std::collections::HashSet;

/// Build the built-in stack for the configured stage
fn load_stack(config: &Config) -> Result<(Stack, Graph)> {
    if config.stack.name != STACK_NAME {
        log::warn!(
            "Config names stack '{}', the built-in stack is '{STACK_NAME}'",
            config.stack.name
        );
    }

    let paths = HostPaths::current_dir().context("Could not determine current directory")?;
    let stack = media_stack(&config.stack.stage, &paths);
    let graph = converge::build(&stack).context("Stack definition is invalid")?;
    Ok((stack, graph))
}

/// Print the provisioning order of the built-in stack
pub fn graph(config: &Config) -> Result<()> {
    let (stack, graph) = load_stack(config)?;
    let kept: HashSet<&str> = retained(&stack).into_iter().collect();

    println!();
    println!(
        "  {} {} ({} resources, stage {})",
        "Stack".bold(),
        graph.metadata().name,
        graph.len(),
        graph.metadata().stage
    );
    println!();

    for (i, node) in graph.nodes().enumerate() {
        let mut line = format!(
            "  {:>2}. {} {}",
            i + 1,
            node.name().bold(),
            node.descriptor.kind.to_string().dimmed()
        );
        if !node.predecessors.is_empty() {
            let deps: Vec<&str> = node.predecessors.iter().map(String::as_str).collect();
            line.push_str(&format!(" ← {}", deps.join(", ")));
        }
        if kept.contains(node.name()) {
            line.push_str(&format!(" {}", "(retain)".cyan()));
        }
        println!("{line}");
    }

    if !kept.is_empty() {
        println!();
        println!(
            "  {} {} of {} resources survive a teardown",
            "⚓".cyan(),
            kept.len(),
            graph.len()
        );
    }
    Ok(())
}

/// Preview an apply or destroy against the configured state file
pub fn plan(config: &Config, destroy: bool) -> Result<()> {
    let (_, graph) = load_stack(config)?;
    let path = config.state_path()?;
    let store = FileStateStore::open(&path, &config.stack.name)?;
    let records = store.list()?;

    let mode = if destroy {
        PlanMode::Destroy
    } else {
        PlanMode::Apply
    };
    let report = dry_run(&graph, records, &config.apply_options(), mode)
        .context("Could not plan the stack")?;
    report::print(&report, true);
    Ok(())
}

/// Print the records of the configured state file
pub fn state(config: &Config, show_outputs: bool) -> Result<()> {
    let path = config.state_path()?;
    let store = FileStateStore::open(&path, &config.stack.name)?;
    let records = store.list()?;

    println!();
    if records.is_empty() {
        println!("  No resources recorded in {}", path.display());
        return Ok(());
    }

    println!(
        "  {} ({} records, updated {})",
        path.display().to_string().bold(),
        records.len(),
        store.last_updated().format("%Y-%m-%d %H:%M:%S UTC")
    );
    for record in records {
        println!(
            "    {} {} {} {}",
            record.name.bold(),
            record.kind.to_string().dimmed(),
            record.provider_id,
            record.policy.to_string().dimmed()
        );
        if !show_outputs {
            continue;
        }
        for (key, value) in &record.outputs {
            let shown = if record.kind.is_sensitive() {
                "(sensitive)".dimmed().to_string()
            } else {
                value
                    .as_str()
                    .map_or_else(|| value.to_string(), str::to_string)
            };
            println!("      {key} = {shown}");
        }
    }
    Ok(())
}
