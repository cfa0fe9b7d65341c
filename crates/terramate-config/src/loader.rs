//! `load_root`: walks a project tree and builds its configuration tree.

use std::fs;
use std::path::Path;

use kdl::KdlDocument;
use terramate_core::ProjectPath;

use crate::error::{ConfigError, ConfigResult};
use crate::options::ProjectOptions;
use crate::stack_kdl::parse_stack;
use crate::tree::ConfigurationTree;

const STACK_MARKER: &str = "stack.tm.kdl";
const ROOT_OPTIONS_FILE: &str = "terramate.tm.kdl";

const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".terraform",
    ".terragrunt-cache",
    "node_modules",
    "vendor",
];

/// Load the project tree rooted at `rootdir`: walk the directory tree,
/// registering every directory as a node and every directory carrying a
/// `stack.tm.kdl` marker as a stack.
pub fn load_root(rootdir: &Path) -> ConfigResult<ConfigurationTree> {
    let options = load_root_options(rootdir)?;
    let mut tree = ConfigurationTree::new(options);
    walk(rootdir, rootdir, &ProjectPath::root(), &mut tree)?;
    Ok(tree)
}

fn walk(
    rootdir: &Path,
    dir: &Path,
    project_path: &ProjectPath,
    tree: &mut ConfigurationTree,
) -> ConfigResult<()> {
    tree.insert_directory(project_path.clone());

    let marker = dir.join(STACK_MARKER);
    if marker.is_file() {
        let text = read_to_string(&marker)?;
        let relative = marker
            .strip_prefix(rootdir)
            .unwrap_or(&marker)
            .to_string_lossy()
            .to_string();
        let stack = parse_stack(project_path, &text, &relative)?;
        tree.insert_stack(stack);
    }

    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|source| ConfigError::Io {
            path: dir.to_string_lossy().to_string(),
            source,
        })?
        .filter_map(|e| e.ok())
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref()) {
            continue;
        }
        let child_path = project_path
            .join(&name)
            .map_err(ConfigError::Core)?;
        walk(rootdir, &path, &child_path, tree)?;
    }

    Ok(())
}

fn load_root_options(rootdir: &Path) -> ConfigResult<ProjectOptions> {
    let path = rootdir.join(ROOT_OPTIONS_FILE);
    if !path.is_file() {
        return Ok(ProjectOptions {
            default_branch: "main".to_string(),
            ..ProjectOptions::default()
        });
    }

    let text = read_to_string(&path)?;
    let doc: KdlDocument = text.parse().map_err(|source| ConfigError::Parse {
        path: ROOT_OPTIONS_FILE.to_string(),
        source,
    })?;

    let mut options = ProjectOptions {
        default_branch: "main".to_string(),
        ..ProjectOptions::default()
    };

    for node in doc.nodes() {
        match node.name().value() {
            "default_remote" => {
                options.default_remote = node
                    .entries()
                    .first()
                    .and_then(|e| e.value().as_string())
                    .map(str::to_string);
            }
            "default_branch" => {
                if let Some(value) = node.entries().first().and_then(|e| e.value().as_string()) {
                    options.default_branch = value.to_string();
                }
            }
            "disable_safeguards" => {
                let values: Vec<String> = node
                    .entries()
                    .iter()
                    .filter_map(|e| e.value().as_string())
                    .map(str::to_string)
                    .collect();
                options.safeguards.apply_disable_list(&values)?;
            }
            "experiments" => {
                options.experiments = node
                    .entries()
                    .iter()
                    .filter_map(|e| e.value().as_string())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }

    Ok(options)
}

fn read_to_string(path: &Path) -> ConfigResult<String> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_nested_stacks() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("network")).unwrap();
        fs::write(
            dir.path().join("network/stack.tm.kdl"),
            "name \"network\"\ntags \"net\"\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("network/subnets")).unwrap();
        fs::write(
            dir.path().join("network/subnets/stack.tm.kdl"),
            "name \"subnets\"\nafter \"..\"\n",
        )
        .unwrap();

        let tree = load_root(dir.path()).unwrap();
        let stacks: Vec<_> = tree.stacks().map(|s| s.path.as_str().to_string()).collect();
        assert_eq!(stacks, vec!["/network".to_string(), "/network/subnets".to_string()]);
    }

    #[test]
    fn skips_vcs_and_vendor_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/stack.tm.kdl"), "name \"nope\"\n").unwrap();

        let tree = load_root(dir.path()).unwrap();
        assert_eq!(tree.stacks().count(), 0);
    }
}
