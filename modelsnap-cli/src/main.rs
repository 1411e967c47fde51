use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;

use commands::{branch, commit, log, pull, push, restore, serve, star, status, switch, watch};

#[derive(Parser)]
#[command(name = "modelsnap")]
#[command(version, about = "Snapshot version control for 3D model files", long_about = None)]
struct Cli {
    /// Config file (defaults to $MODELSNAP_CONFIG, then ./modelsnap.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot the current contents of a tracked file
    Commit {
        /// Tracked model file
        file: PathBuf,

        /// Commit message
        #[arg(short, long)]
        message: String,
    },

    /// Show commit history
    Log {
        /// Tracked model file
        file: PathBuf,

        /// Number of commits to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only the history of this branch (name or id)
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// List branches, or create one when a name is given
    Branch {
        /// Tracked model file
        file: PathBuf,

        /// Name of the new branch
        name: Option<String>,

        /// Commit to fork from (defaults to the current commit)
        #[arg(long)]
        from: Option<String>,

        /// Display color as #rrggbb (defaults to the next palette color)
        #[arg(long)]
        color: Option<String>,
    },

    /// Make a branch active and load its head into the working file
    Switch {
        /// Tracked model file
        file: PathBuf,

        /// Branch name or id
        branch: String,

        /// Overwrite uncommitted changes without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Restore the working file to a commit
    Restore {
        /// Tracked model file
        file: PathBuf,

        /// Commit id, unique prefix, or short id
        commit_id: String,

        /// Actually overwrite the working file (without this, just shows preview)
        #[arg(long)]
        execute: bool,

        /// Overwrite uncommitted changes without asking
        #[arg(short, long)]
        yes: bool,
    },

    /// Star or unstar a commit
    Star {
        /// Tracked model file
        file: PathBuf,

        /// Commit id, unique prefix, or short id
        commit_id: String,

        /// Remove the star instead
        #[arg(long)]
        unset: bool,
    },

    /// Show branch, working-copy and sync state
    Status {
        /// Tracked model file
        file: PathBuf,
    },

    /// Report external changes to a tracked file until interrupted
    Watch {
        /// Tracked model file
        file: PathBuf,
    },

    /// Upload unsynced commits and the history record
    Push {
        /// Tracked model file
        file: PathBuf,
    },

    /// Merge remote history, or bootstrap the file when there is none locally
    Pull {
        /// Tracked model file
        file: PathBuf,
    },

    /// Run the reference cloud store
    Serve {
        /// Port for the API server
        #[arg(short, long, default_value = "3040")]
        port: u16,

        /// Directory holding uploaded objects
        #[arg(short, long, default_value = ".modelsnap-store")]
        data_dir: PathBuf,

        /// Access token clients must present (falls back to $MODELSNAP_TOKEN)
        #[arg(long)]
        token: Option<String>,

        /// Seconds a transfer grant stays valid
        #[arg(long, default_value = "300")]
        grant_ttl: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = commands::load_config(cli.config)?;

    match cli.command {
        Commands::Commit { file, message } => {
            commit::run(file, message)?;
        }
        Commands::Log {
            file,
            limit,
            branch,
        } => {
            log::run(file, limit, branch)?;
        }
        Commands::Branch {
            file,
            name,
            from,
            color,
        } => {
            branch::run(file, name, from, color)?;
        }
        Commands::Switch { file, branch, yes } => {
            switch::run(file, branch, yes, &config).await?;
        }
        Commands::Restore {
            file,
            commit_id,
            execute,
            yes,
        } => {
            restore::run(file, commit_id, execute, yes, &config).await?;
        }
        Commands::Star {
            file,
            commit_id,
            unset,
        } => {
            star::run(file, commit_id, unset)?;
        }
        Commands::Status { file } => {
            status::run(file, &config).await?;
        }
        Commands::Watch { file } => {
            watch::run(file, &config).await?;
        }
        Commands::Push { file } => {
            push::run(file, &config).await?;
        }
        Commands::Pull { file } => {
            pull::run(file, &config).await?;
        }
        Commands::Serve {
            port,
            data_dir,
            token,
            grant_ttl,
        } => {
            serve::run(port, data_dir, token, grant_ttl, &config).await?;
        }
    }

    Ok(())
}
