use crate::display;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(
    file: PathBuf,
    name: Option<String>,
    from: Option<String>,
    color: Option<String>,
) -> Result<()> {
    let mut session = super::open_existing(&file)?;

    let Some(name) = name else {
        println!("{}", "Branches".bold().cyan());
        for branch in &session.tree().branches {
            display::print_branch(session.tree(), branch);
        }
        return Ok(());
    };

    let from = match from {
        Some(prefix) => Some(session.resolve_commit(&prefix)?.id.clone()),
        None => None,
    };
    let branch = session.create_branch(&name, from.as_deref(), color.as_deref())?;
    session.close()?;

    println!(
        "{} {}",
        "✓ Created branch".green().bold(),
        display::branch_label(&branch)
    );
    if let Some(origin) = &branch.origin_commit_id {
        println!("  {}: {}", "From".bold(), display::short_id(origin));
    }
    println!(
        "Run {} to work on it",
        format!("modelsnap switch {} {}", file.display(), branch.name).cyan()
    );

    Ok(())
}
