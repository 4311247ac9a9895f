//! scmbridge command-line tool.
//!
//! Detects the Subversion or Git checkout around a directory and exposes
//! the backend operations and the patch engine as subcommands.

mod style;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scmbridge_core::config::ScmConfig;
use scmbridge_core::scm::home_directory;
use scmbridge_core::{
    find_checkout, Backend, Checkout, Detector, LocalCommits, Patch, PatchError, Revision,
    ScmError,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Uniform Subversion / Git checkout tool.
#[derive(Parser, Debug)]
#[command(
    name = "scmbridge",
    version,
    about = "Inspect and patch Subversion and Git checkouts through one interface"
)]
struct Cli {
    /// Directory inside the checkout to operate on.
    #[arg(short = 'C', long = "directory", global = true, default_value = ".")]
    directory: PathBuf,

    /// Configuration file (defaults to <checkout>/.scmbridge.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print list and report output as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show which backend manages the checkout and where its root is.
    Detect,

    /// List changed files.
    ChangedFiles {
        /// Only files scheduled for addition.
        #[arg(long, conflicts_with = "revision")]
        added: bool,

        /// Files touched by this revision instead of the working tree.
        #[arg(short, long)]
        revision: Option<Revision>,
    },

    /// Print a file as it was at a revision.
    Contents { path: String, revision: Revision },

    /// Print a diff of local changes, or of one revision.
    Diff {
        #[arg(short, long)]
        revision: Option<Revision>,
    },

    /// Apply a patch file to the checkout.
    ApplyPatch {
        file: PathBuf,

        /// Treat already-applied hunks as conflicts.
        #[arg(long)]
        force: bool,

        /// Reviewer name substituted into new ChangeLog entries.
        #[arg(long)]
        reviewer: Option<String>,

        #[arg(long)]
        bug_id: Option<String>,
    },

    /// Undo a committed revision in the working tree.
    ReverseDiff { revision: Revision },

    /// Restore files to their committed state.
    Revert {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Drop every local change, including added files.
    Clean,

    /// Commit local changes.
    Commit {
        #[arg(short, long)]
        message: String,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Print the commit message built from modified ChangeLogs.
    CommitMessage,

    /// Print the bug number linked from a revision's commit log.
    BugId { revision: Revision },

    /// Resolve commitish arguments to commit ids (git only).
    CommitIds { commitish: Vec<String> },

    /// List local commits not yet pushed upstream (git only).
    LocalCommits,

    /// Check for stored credentials for the configured server realm.
    HasAuth {
        /// Home directory to search (defaults to the current user's).
        #[arg(long)]
        home: Option<PathBuf>,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./.scmbridge.toml")]
        output: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            if needs_update(&e) {
                eprintln!(
                    "{}",
                    style::warn("the checkout is out of date; update it and retry")
                );
                return ExitCode::from(2);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn needs_update(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(scm) = cause.downcast_ref::<ScmError>() {
            return scm.is_needs_update();
        }
        matches!(
            cause.downcast_ref::<PatchError>(),
            Some(PatchError::Scm(scm)) if scm.is_needs_update()
        )
    })
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { output } = &cli.command {
        return cmd_init(output);
    }

    let backend = open_backend(&cli.directory, cli.config.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Detect => cmd_detect(&backend, json),
        Commands::ChangedFiles { added, revision } => {
            let files = match (added, revision) {
                (true, _) => backend.added_files()?,
                (false, Some(rev)) => backend.changed_files_for_revision(&rev)?,
                (false, None) => backend.changed_files()?,
            };
            print_list(&files, json)
        }
        Commands::Contents { path, revision } => {
            let bytes = backend
                .contents_at_revision(&path, &revision)
                .with_context(|| format!("failed to read {} at {}", path, revision))?;
            std::io::stdout()
                .write_all(&bytes)
                .context("failed to write to stdout")?;
            Ok(())
        }
        Commands::Diff { revision } => {
            let diff = match revision {
                Some(rev) => backend.diff_for_revision(&rev)?,
                None => backend.create_patch()?,
            };
            print!("{}", diff);
            Ok(())
        }
        Commands::ApplyPatch {
            file,
            force,
            reviewer,
            bug_id,
        } => cmd_apply_patch(backend, &file, force, reviewer, bug_id, json),
        Commands::ReverseDiff { revision } => {
            Checkout::new(backend)
                .apply_reverse_diff(&revision)
                .with_context(|| format!("failed to reverse revision {}", revision))?;
            println!("{}", style::success(&format!("reversed {}", revision)));
            Ok(())
        }
        Commands::Revert { paths } => {
            let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
            backend.revert_files(&refs)?;
            println!("{}", style::success(&format!("reverted {} path(s)", refs.len())));
            Ok(())
        }
        Commands::Clean => {
            backend.clean_working_directory()?;
            println!("{}", style::success("working directory is clean"));
            Ok(())
        }
        Commands::Commit {
            message,
            username,
            dry_run,
        } => cmd_commit(&backend, &message, username.as_deref(), dry_run),
        Commands::CommitMessage => {
            let message = Checkout::new(backend).commit_message_for_this_commit()?;
            print!("{}", message);
            Ok(())
        }
        Commands::BugId { revision } => {
            match Checkout::new(backend).bug_id_for_revision(&revision)? {
                Some(id) => println!("{}", id),
                None => anyhow::bail!("no bug link in the commit log of {}", revision),
            }
            Ok(())
        }
        Commands::CommitIds { commitish } => {
            let args: Vec<&str> = commitish.iter().map(String::as_str).collect();
            let ids = local_commits(&backend)?.commit_ids_from_commitish_arguments(&args)?;
            print_list(&ids, json)
        }
        Commands::LocalCommits => {
            let commits = local_commits(&backend)?.local_commits()?;
            print_list(&commits, json)
        }
        Commands::HasAuth { home } => {
            let home = match home {
                Some(home) => home,
                None => home_directory()?,
            };
            let realm = &backend.config().svn.server_realm;
            if backend.has_authorization_for_realm(&home)? {
                println!("{}", style::success(&format!("credentials stored for {}", realm)));
                Ok(())
            } else {
                anyhow::bail!("no stored credentials for {} under {}", realm, home.display())
            }
        }
        Commands::Init { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open_backend(directory: &Path, config_path: Option<&Path>) -> Result<Backend> {
    let found = find_checkout(directory)
        .with_context(|| format!("cannot use {}", directory.display()))?;
    let config = match config_path {
        Some(path) => ScmConfig::load_and_resolve(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => ScmConfig::discover(&found.root).context("failed to load checkout configuration")?,
    };
    let backend = Detector::default().detect(&found.root, config)?;
    Ok(backend)
}

fn local_commits(backend: &Backend) -> Result<&dyn LocalCommits> {
    backend.as_local_commits().ok_or_else(|| {
        anyhow!(ScmError::Unsupported {
            backend: backend.display_name(),
            operation: "local commits",
        })
    })
}

fn print_list(items: &[String], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
    } else {
        for item in items {
            println!("{}", item);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_detect(backend: &Backend, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "backend": backend.kind(),
            "root": backend.root(),
            "supports_local_commits": backend.supports_local_commits(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!(
            "{} checkout at {}",
            style::backend(backend.kind()),
            backend.root().display()
        );
    }
    Ok(())
}

fn cmd_apply_patch(
    backend: Backend,
    file: &Path,
    force: bool,
    reviewer: Option<String>,
    bug_id: Option<String>,
    json: bool,
) -> Result<()> {
    let mut patch = Patch::from_file(file)
        .with_context(|| format!("failed to read patch {}", file.display()))?;
    patch.reviewer = reviewer;
    patch.bug_id = bug_id;

    let report = Checkout::new(backend)
        .apply_patch(&patch, force)
        .with_context(|| format!("failed to apply {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for path in &report.applied {
        println!("{}", style::success(&format!("patched {}", path)));
    }
    for path in &report.added {
        println!("{}", style::success(&format!("added   {}", path)));
    }
    for path in &report.deleted {
        println!("{}", style::success(&format!("deleted {}", path)));
    }
    for path in &report.skipped {
        println!("{}", style::warn(&format!("skipped {} (already applied)", path)));
    }
    if report.applied.is_empty()
        && report.added.is_empty()
        && report.deleted.is_empty()
        && report.skipped.is_empty()
    {
        println!("{}", style::dim("patch contained no changes"));
    }
    Ok(())
}

fn cmd_commit(
    backend: &Backend,
    message: &str,
    username: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    let text = backend
        .commit_with_message(message, username, dry_run)
        .context("commit failed")?;
    print!("{}", text);
    if !text.ends_with('\n') {
        println!();
    }
    match backend.revision_from_commit_text(&text) {
        Some(revision) => println!("{}", style::success(&format!("revision {}", revision))),
        None => println!("{}", style::dim("no revision number in commit output")),
    }
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, ScmConfig::default_template()).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Adjust tool paths and ChangeLog names for your checkout");
    println!("  2. Check detection with: scmbridge detect");
    Ok(())
}
