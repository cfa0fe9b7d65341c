//! CLI command implementations: shared project-loading/selection setup,
//! then the `run` and `list` entry points.

pub mod list;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use terramate_config::ConfigurationTree;
use terramate_core::ProjectPath;
use terramate_engine::change_detector::ChangeSet;
use terramate_engine::{compute_change_set, select_baseline, parse_status, ProjectIndex, SelectorFlags};
use terramate_vcs::{GitVcs, VersionControl};

/// Flags shared by every subcommand (selection scope, filters, cloud
/// connection details).
pub struct CommonFlags {
    pub chdir: Option<PathBuf>,
    pub changed: bool,
    pub git_change_base: Option<String>,
    pub tags: Vec<String>,
    pub no_tags: Vec<String>,
    pub status: Option<String>,
    pub no_recursive: bool,
    pub cloud_api_url: String,
    pub cloud_organization: Option<String>,
}

/// Everything a subcommand needs once the project is loaded and the
/// working directory resolved: the tree, a VCS handle (if inside a repo),
/// the project path of the working directory, and a precomputed change set
/// (only when `--changed` was requested).
pub struct ProjectContext {
    pub tree: ConfigurationTree,
    pub vcs: Option<GitVcs>,
    pub workdir: ProjectPath,
    pub change_set: Option<ChangeSet>,
    pub rootdir: PathBuf,
}

pub async fn load_project(common: &CommonFlags) -> Result<ProjectContext> {
    let cwd = match &common.chdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let cwd = cwd.canonicalize().with_context(|| format!("failed to resolve {}", cwd.display()))?;

    let rootdir = find_project_root(&cwd);
    let tree = terramate_config::load_root(&rootdir)
        .with_context(|| format!("failed to load project at {}", rootdir.display()))?;

    let workdir_rel = cwd.strip_prefix(&rootdir).unwrap_or(&cwd);
    let workdir_str = format!("/{}", workdir_rel.to_string_lossy());
    let workdir = ProjectPath::try_new(&workdir_str)
        .with_context(|| format!("working directory {} is not inside the project", cwd.display()))?;

    let vcs = GitVcs::new(rootdir.clone());
    let vcs: Option<GitVcs> = if vcs.rootdir().join(".git").is_dir() {
        Some(vcs)
    } else {
        None
    };

    let change_set = if common.changed {
        let index = ProjectIndex::new(&tree);
        let options = tree.options();
        let vcs_ref = vcs.as_ref().context("`--changed` requires a git repository")?;
        let baseline = select_baseline(
            vcs_ref,
            options.default_remote.as_deref(),
            &options.default_branch,
            common.git_change_base.as_deref(),
        )
        .await
        .context("failed to select a change-detection baseline")?;
        Some(
            compute_change_set(vcs_ref, &index, &baseline)
                .await
                .context("failed to compute the change set")?,
        )
    } else {
        None
    };

    Ok(ProjectContext {
        tree,
        vcs,
        workdir,
        change_set,
        rootdir,
    })
}

/// Walk upward from `start` looking for a `.git` directory; fall back to
/// `start` itself when none is found (a plain, VCS-less project tree).
fn find_project_root(start: &std::path::Path) -> PathBuf {
    let mut candidate = start;
    loop {
        if candidate.join(".git").exists() {
            return candidate.to_path_buf();
        }
        match candidate.parent() {
            Some(parent) => candidate = parent,
            None => return start.to_path_buf(),
        }
    }
}

pub fn selector_flags(common: &CommonFlags, status_allowed_ids: Option<std::collections::BTreeSet<String>>) -> SelectorFlags {
    use terramate_engine::TagExpr;

    SelectorFlags {
        changed: common.changed,
        no_recursive: common.no_recursive,
        tags: TagExpr::parse_all(common.tags.iter().map(String::as_str)),
        no_tags: common.no_tags.clone(),
        status_allowed_ids,
        ensure_clean_repo: false,
    }
}

/// Resolve `--status` against the cloud's stacks-by-status endpoint, when
/// given. Requires the same credential chain the Cloud Sync Lifecycle uses;
/// a failure here is fatal (unlike cloud sync's graceful degradation)
/// because the user explicitly asked to filter by cloud state.
pub async fn resolve_status_filter(
    common: &CommonFlags,
) -> Result<Option<std::collections::BTreeSet<String>>> {
    let Some(status_value) = &common.status else {
        return Ok(None);
    };
    let status = parse_status(status_value)
        .with_context(|| format!("unrecognized --status value `{status_value}`"))?;

    let mut provider = terramate_cloud::CredentialChain::resolve()
        .await
        .context("`--status` requires cloud credentials, but none were found")?;
    if provider.is_expired() {
        provider.refresh().await.context("failed to refresh cloud credentials")?;
    }
    let token = provider.token().to_string();

    let base_url: url::Url = common.cloud_api_url.parse().context("invalid --cloud-api-url")?;
    let client: Arc<dyn terramate_cloud::CloudClient> = Arc::new(terramate_cloud::HttpCloudClient::new(base_url));
    let organizations = provider
        .organizations(&*client)
        .await
        .context("failed to list cloud organizations")?;

    let org = match &common.cloud_organization {
        Some(wanted) => organizations
            .iter()
            .find(|o| &o.name == wanted)
            .filter(|o| o.status.is_usable())
            .map(|o| o.name.clone())
            .with_context(|| format!("unknown or unusable cloud organization `{wanted}`"))?,
        None => {
            let usable: Vec<_> = organizations.iter().filter(|o| o.status.is_usable()).collect();
            match usable.as_slice() {
                [one] => one.name.clone(),
                _ => anyhow::bail!("ambiguous cloud organization membership; pass --cloud-organization"),
            }
        }
    };

    let ids = client
        .stacks_by_status(&token, &org, status)
        .await
        .context("failed to query stacks by status")?;
    Ok(Some(ids.into_iter().collect()))
}
