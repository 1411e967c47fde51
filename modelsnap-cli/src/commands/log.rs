use crate::display;
use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(file: PathBuf, limit: Option<usize>, branch: Option<String>) -> Result<()> {
    let session = super::open_existing(&file)?;
    let tree = session.tree();

    let commits = match &branch {
        Some(name) => {
            let branch = session.resolve_branch(name)?;
            println!(
                "{} {}",
                "History of".bold().cyan(),
                display::branch_label(branch)
            );
            tree.branch_history(&branch.id)?
        }
        None => {
            println!("{}", "Commit History".bold().cyan());
            session.list_commits()
        }
    };
    println!();

    if commits.is_empty() {
        println!("{}", "No commits yet".yellow());
        return Ok(());
    }

    let to_show = limit.unwrap_or(commits.len()).min(commits.len());
    for commit in commits.iter().take(to_show) {
        display::print_commit(tree, commit);
    }

    if commits.len() > to_show {
        println!();
        println!(
            "{}",
            format!("... and {} more commits", commits.len() - to_show).dimmed()
        );
        println!("Use {} to see more", "--limit N".cyan());
    }

    Ok(())
}
