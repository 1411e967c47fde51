use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(file: PathBuf, commit_id: String, unset: bool) -> Result<()> {
    let mut session = super::open_existing(&file)?;
    let id = session.resolve_commit(&commit_id)?.id.clone();

    session.star(&id, !unset)?;
    session.close()?;

    if unset {
        println!("{} {}", "Unstarred".bold(), id);
    } else {
        println!("{} {}", "★ Starred".yellow().bold(), id);
    }
    Ok(())
}
