//! Terramate CLI: selects stacks from a project tree and runs commands
//! across them in dependency order.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "terramate")]
#[command(about = "Orchestrate command execution across IaC stacks", long_about = None)]
struct Cli {
    /// Run as if invoked from this directory instead of the current one.
    #[arg(long, global = true)]
    chdir: Option<PathBuf>,

    /// Restrict to stacks in the Change Set.
    #[arg(short = 'c', long, global = true)]
    changed: bool,

    /// Baseline revision override for change detection.
    #[arg(short = 'B', long = "git-change-base", global = true)]
    git_change_base: Option<String>,

    /// Tag filter expression (`a:b,c` = `(a AND b) OR c`); may repeat, ORed together.
    #[arg(long, global = true)]
    tags: Vec<String>,

    /// Exclude stacks carrying any of these tags.
    #[arg(long, global = true)]
    no_tags: Vec<String>,

    /// Restrict to stacks with this cloud status (`ok`, `drifted`, `failed`, `canceled`, `unknown`).
    #[arg(long, global = true)]
    status: Option<String>,

    /// Select only the stack at the working directory, not its descendants.
    #[arg(long, global = true)]
    no_recursive: bool,

    /// Cloud API base URL, used when `--status` or `run --sync-*` need it.
    #[arg(long, global = true, env = "TMC_API_URL", default_value = "https://api.terramate.io")]
    cloud_api_url: String,

    /// Cloud organization override; otherwise auto-selected if unambiguous.
    #[arg(long, global = true, env = "TM_CLOUD_ORGANIZATION")]
    cloud_organization: Option<String>,

    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress informational output (errors and warnings only).
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command across the selected stacks in dependency order.
    Run {
        #[arg(long)]
        continue_on_error: bool,
        #[arg(long)]
        dry_run: bool,
        /// Run in reverse dependency order.
        #[arg(long)]
        reverse: bool,
        /// Expand `${STACK_PATH}`/`${STACK_NAME}`/`${STACK_ID}` tokens in argv.
        #[arg(long)]
        eval: bool,
        /// Absent = serial; present with no value = default parallelism; with a value = N.
        #[arg(short = 'j', long = "parallel", num_args = 0..=1, default_missing_value = "0")]
        parallel: Option<usize>,
        #[arg(long)]
        sync_deployment: bool,
        #[arg(long)]
        sync_drift_status: bool,
        #[arg(long)]
        sync_preview: bool,
        #[arg(long, value_name = "PATH")]
        sync_plan_file: Option<PathBuf>,
        /// Wrap the command with `terragrunt`.
        #[arg(long)]
        terragrunt: bool,
        /// Comma-separated safeguard names to disable, or `all`/`none`.
        #[arg(long, value_delimiter = ',')]
        disable_safeguards: Vec<String>,
        /// The command to run, after `--`.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        argv: Vec<String>,
    },
    /// List the selected stacks.
    List {
        /// Explain why each stack was selected (requires `--changed`).
        #[arg(long)]
        why: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "terramate=warn"
    } else {
        match cli.verbose {
            0 => "terramate=info",
            1 => "terramate=debug",
            _ => "terramate=trace",
        }
    };
    // Automation environments (GitHub Actions, GitLab CI, ...) set `CI`;
    // drop ANSI color codes so logs stay plain in a non-interactive terminal.
    let is_ci = std::env::var_os("CI").is_some();
    tracing_subscriber::fmt()
        .with_ansi(!is_ci)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let common = commands::CommonFlags {
        chdir: cli.chdir.clone(),
        changed: cli.changed,
        git_change_base: cli.git_change_base.clone(),
        tags: cli.tags.clone(),
        no_tags: cli.no_tags.clone(),
        status: cli.status.clone(),
        no_recursive: cli.no_recursive,
        cloud_api_url: cli.cloud_api_url.clone(),
        cloud_organization: cli.cloud_organization.clone(),
    };

    match cli.command {
        Commands::Run {
            continue_on_error,
            dry_run,
            reverse,
            eval,
            parallel,
            sync_deployment,
            sync_drift_status,
            sync_preview,
            sync_plan_file,
            terragrunt,
            disable_safeguards,
            argv,
        } => {
            let argv = strip_leading_separator(argv);
            commands::run::execute(
                &common,
                commands::run::RunFlags {
                    continue_on_error,
                    dry_run,
                    reverse,
                    eval,
                    parallel,
                    sync_deployment,
                    sync_drift_status,
                    sync_preview,
                    sync_plan_file,
                    terragrunt,
                    disable_safeguards,
                    argv,
                },
            )
            .await?;
        }
        Commands::List { why } => {
            commands::list::execute(&common, why).await?;
        }
    }

    Ok(())
}

/// `clap`'s `trailing_var_arg` keeps a literal leading `--` in `argv` when
/// the user wrote `terramate run -- cmd args`; drop it if present.
fn strip_leading_separator(mut argv: Vec<String>) -> Vec<String> {
    if argv.first().is_some_and(|s| s == "--") {
        argv.remove(0);
    }
    argv
}
