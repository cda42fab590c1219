//! `ultraplan validate <plan.toml>` -- parse and check a plan file's
//! invariants without touching git or spawning anything.

use std::path::Path;

use anyhow::{Context, Result};

use ultraplan_core::plan::load_plan_from_toml;

pub fn run_validate(path: &Path) -> Result<()> {
    let plan = load_plan_from_toml(path)
        .with_context(|| format!("failed to load plan file: {}", path.display()))?;

    println!("Plan is valid.");
    println!();
    println!("  ID:            {}", plan.id);
    println!("  Objective:     {}", plan.objective);
    println!("  Base branch:   {}", plan.base_branch);
    println!("  Branch prefix: {}", plan.branch_prefix);
    println!("  Groups:        {}", plan.total_groups());
    println!("  Tasks:         {}", plan.total_tasks());
    println!();

    for (gi, group) in plan.groups.iter().enumerate() {
        println!("  Group {}: {} task(s)", gi + 1, group.tasks.len());
        for task in &group.tasks {
            let marker = if task.no_code { " (no-code)" } else { "" };
            println!("    [{}] {}{}", task.id, task.title, marker);
        }
    }

    Ok(())
}
