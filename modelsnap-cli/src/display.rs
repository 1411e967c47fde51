use colored::{ColoredString, Colorize};
use modelsnap_core::{Branch, Commit, SyncStatus, Tree};

const SHORT_ID_LEN: usize = 8;

/// The random suffix of a commit id. The leading timestamp digits are shared
/// by commits made close together, so they make a poor handle.
pub fn short_id(id: &str) -> &str {
    id.get(id.len().saturating_sub(SHORT_ID_LEN)..).unwrap_or(id)
}

/// Branch name painted in the branch's own color when it parses as `#rrggbb`.
pub fn branch_label(branch: &Branch) -> ColoredString {
    match parse_hex(&branch.color) {
        Some((r, g, b)) => branch.name.truecolor(r, g, b).bold(),
        None => branch.name.bold(),
    }
}

fn parse_hex(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

pub fn print_commit(tree: &Tree, commit: &Commit) {
    let is_current = tree.current_commit_id.as_deref() == Some(commit.id.as_str());
    let marker = if is_current { "*".green().bold() } else { " ".normal() };
    let star = if commit.starred { "★".yellow() } else { "".normal() };
    let branch = tree
        .branch(&commit.branch_id)
        .map(branch_label)
        .unwrap_or_else(|| commit.branch_id.dimmed());

    println!(
        "{} {} {} {}",
        marker,
        short_id(&commit.id).yellow(),
        branch,
        star
    );
    println!(
        "    {}  {}",
        commit
            .timestamp
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed(),
        commit.message
    );
}

pub fn print_branch(tree: &Tree, branch: &Branch) {
    let active = if branch.id == tree.active_branch_id {
        "*".green().bold()
    } else {
        " ".normal()
    };
    let head = branch
        .head_commit_id
        .as_deref()
        .map(|id| short_id(id).yellow().to_string())
        .unwrap_or_else(|| "(no commits)".dimmed().to_string());

    println!("{} {} {} {}", active, branch_label(branch), head, branch.color.dimmed());
}

pub fn print_sync_status(status: &SyncStatus) {
    if status.is_up_to_date() {
        println!("  {}", "Up to date with remote".green());
        println!("  {}: {}", "Synced".bold(), status.synced.len());
        return;
    }

    let rows = [
        ("Not pushed", &status.local_only, "push"),
        ("Not pulled", &status.remote_only, "pull"),
        ("Missing on remote", &status.lost, "push"),
    ];
    for (label, ids, hint) in rows {
        if ids.is_empty() {
            continue;
        }
        println!(
            "  {}: {} {}",
            label.bold(),
            ids.len().to_string().yellow(),
            format!("(run modelsnap {})", hint).dimmed()
        );
        for id in ids.iter().take(5) {
            println!("      • {}", short_id(id).dimmed());
        }
        if ids.len() > 5 {
            println!("      {} and {} more...", "...".dimmed(), ids.len() - 5);
        }
    }
    println!("  {}: {}", "Synced".bold(), status.synced.len());
}
