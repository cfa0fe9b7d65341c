//! `run`: select stacks, build their DAG, and execute a command across them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use terramate_core::{ProjectPath, RunTask, Stack, StackRun};
use terramate_engine::safeguards::{check_safeguards, SafeguardContext};
use terramate_engine::scheduler::{RunObserver, RunOptions};
use terramate_engine::{build_dag, select, sorted_order, CloudSync, ProjectIndex};
use terramate_vcs::VersionControl;

use super::{load_project, resolve_status_filter, selector_flags, CommonFlags};

pub struct RunFlags {
    pub continue_on_error: bool,
    pub dry_run: bool,
    pub reverse: bool,
    pub eval: bool,
    /// `None` = serial, `Some(0)` = scheduler default, `Some(n)` = n.
    pub parallel: Option<usize>,
    pub sync_deployment: bool,
    pub sync_drift_status: bool,
    pub sync_preview: bool,
    pub sync_plan_file: Option<PathBuf>,
    pub terragrunt: bool,
    pub disable_safeguards: Vec<String>,
    pub argv: Vec<String>,
}

pub async fn execute(common: &CommonFlags, flags: RunFlags) -> Result<()> {
    let status_allowed_ids = resolve_status_filter(common).await?;
    let ctx = load_project(common).await?;
    let index = ProjectIndex::new(&ctx.tree);

    let mut toggles = ctx.tree.options().safeguards;
    let mut disable_list = flags.disable_safeguards.clone();
    if let Ok(env_list) = std::env::var("TM_DISABLE_SAFEGUARDS") {
        disable_list.extend(env_list.split(',').map(str::to_string));
    }
    if !disable_list.is_empty() {
        toggles
            .apply_disable_list(&disable_list)
            .context("invalid --disable-safeguards value")?;
    }

    check_safeguards(
        ctx.vcs.as_ref().map(|v| v as &dyn VersionControl),
        &toggles,
        ctx.tree.options().default_remote.as_deref(),
        &ctx.tree.options().default_branch,
        SafeguardContext::Run,
    )
    .await
    .context("a pre-run safeguard was triggered")?;

    let flags_for_select = selector_flags(common, status_allowed_ids);
    let candidates = select(
        &index,
        &ctx.workdir,
        &flags_for_select,
        ctx.change_set.as_ref(),
        ctx.vcs.as_ref().map(|v| v as &dyn VersionControl),
    )
    .await
    .context("stack selection failed")?;

    if candidates.is_empty() {
        println!("no stacks selected");
        return Ok(());
    }

    if toggles.outdated_code {
        for stack in &candidates {
            let stack_dir = stack.path.to_host_path(&ctx.rootdir);
            terramate_engine::safeguards::check_outdated_code_for_stack(&stack_dir, &stack.path)
                .context("a pre-run safeguard was triggered")?;
        }
    }

    let dag = build_dag(&index, &candidates).context("failed to build the stack DAG")?;
    let order = sorted_order(&dag, flags.reverse).context("failed to compute a run order")?;

    let stack_runs = build_stack_runs(&candidates, &flags)?;

    let run_options = RunOptions {
        parallel: match flags.parallel {
            None => 1,
            Some(n) => n,
        },
        continue_on_error: flags.continue_on_error,
        dry_run: flags.dry_run,
        reverse: flags.reverse,
        eval: flags.eval,
        extra_env: BTreeMap::new(),
        ..RunOptions::default()
    };

    let wants_sync = flags.sync_deployment || flags.sync_drift_status || flags.sync_preview;
    let observer: Option<Arc<dyn RunObserver>> = if wants_sync && !flags.dry_run {
        connect_cloud_sync(common, &stack_runs).await
    } else {
        None
    };

    let summary = terramate_engine::run_scheduled(&dag, &order, &stack_runs, &run_options, observer)
        .await
        .context("run failed")?;

    println!("succeeded: {}", summary.succeeded.len());
    if !summary.failed.is_empty() {
        for (stack, message) in &summary.failed {
            eprintln!("  {stack} failed: {message}");
        }
    }
    if !summary.skipped.is_empty() {
        for (stack, reason) in &summary.skipped {
            eprintln!("  {stack} skipped: {reason}");
        }
    }
    Ok(())
}

fn build_stack_runs(
    candidates: &[&Stack],
    flags: &RunFlags,
) -> Result<BTreeMap<ProjectPath, StackRun>> {
    let mut stack_runs = BTreeMap::new();
    for stack in candidates {
        let mut task = RunTask::new(flags.argv.clone());
        task.sync_deployment = flags.sync_deployment;
        task.sync_drift = flags.sync_drift_status;
        task.sync_preview = flags.sync_preview;
        task.plan_file = flags.sync_plan_file.clone();
        task.use_terragrunt = flags.terragrunt;

        let stack_run = StackRun::new((*stack).clone(), vec![task])
            .with_context(|| format!("failed to build a run for stack {}", stack.path))?;
        stack_runs.insert(stack.path.clone(), stack_run);
    }
    Ok(stack_runs)
}

async fn connect_cloud_sync(
    common: &CommonFlags,
    stack_runs: &BTreeMap<ProjectPath, StackRun>,
) -> Option<Arc<dyn RunObserver>> {
    let base_url = common.cloud_api_url.parse().ok()?;
    let client: Arc<dyn terramate_cloud::CloudClient> = Arc::new(terramate_cloud::HttpCloudClient::new(base_url));
    let repository = repository_metadata();

    CloudSync::connect(client, common.cloud_organization.as_deref(), repository, stack_runs)
        .await
        .map(|sync| Arc::new(sync) as Arc<dyn RunObserver>)
}

/// Metadata the cloud associates a deployment/preview batch with. Review
/// request detection (pull request number/URL/title) is left unpopulated
/// here; it is sourced from CI-specific environment variables the original
/// discovers per-provider, which is out of scope for this port.
fn repository_metadata() -> terramate_cloud::types::RepositoryMetadata {
    terramate_cloud::types::RepositoryMetadata {
        url: std::env::var("GITHUB_SERVER_URL").unwrap_or_default(),
        default_branch: "main".to_string(),
        head_commit: std::env::var("GITHUB_SHA").unwrap_or_default(),
        review_request: None,
    }
}
