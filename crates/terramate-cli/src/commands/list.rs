//! `list`: print the selected stacks, optionally explaining why each was
//! picked when combined with `--changed`.

use anyhow::{Context, Result};
use terramate_engine::safeguards::{check_safeguards, SafeguardContext};
use terramate_engine::{select, ProjectIndex};
use terramate_vcs::VersionControl;

use super::{load_project, resolve_status_filter, selector_flags, CommonFlags};

pub async fn execute(common: &CommonFlags, why: bool) -> Result<()> {
    let status_allowed_ids = resolve_status_filter(common).await?;
    let ctx = load_project(common).await?;
    let index = ProjectIndex::new(&ctx.tree);

    let report = check_safeguards(
        ctx.vcs.as_ref().map(|v| v as &dyn VersionControl),
        &ctx.tree.options().safeguards,
        ctx.tree.options().default_remote.as_deref(),
        &ctx.tree.options().default_branch,
        SafeguardContext::List,
    )
    .await
    .context("failed to evaluate safeguards")?;
    for warning in &report.warnings {
        eprintln!("warning: safeguard `{}` triggered: {}", warning.name, warning.message);
    }

    let flags = selector_flags(common, status_allowed_ids);
    let candidates = select(
        &index,
        &ctx.workdir,
        &flags,
        ctx.change_set.as_ref(),
        ctx.vcs.as_ref().map(|v| v as &dyn VersionControl),
    )
    .await
    .context("stack selection failed")?;

    for stack in candidates {
        if why && common.changed {
            let reason = ctx
                .change_set
                .as_ref()
                .and_then(|set| set.reason(&stack.path))
                .map(|r| r.0)
                .unwrap_or("wanted by a changed stack");
            println!("{} ({reason})", stack.path);
        } else {
            println!("{}", stack.path);
        }
    }

    Ok(())
}
