//! Parsing of a single stack's `stack.tm.kdl` marker file.
//!
//! Parsing the full HCL configuration language is out of scope here; this
//! is the narrow seam a real loader fills. KDL gives us a small,
//! well-formed stand-in while keeping `terramate-config`'s output contract
//! (a populated `Stack`) identical to what the real loader would produce.

use kdl::{KdlDocument, KdlNode};
use terramate_core::{ProjectPath, Stack};

use crate::error::{ConfigError, ConfigResult};

pub fn parse_stack(path: &ProjectPath, text: &str, source_path: &str) -> ConfigResult<Stack> {
    let doc: KdlDocument = text.parse().map_err(|source| ConfigError::Parse {
        path: source_path.to_string(),
        source,
    })?;

    let mut stack = Stack::new(path.clone());
    stack.id = first_string_arg(&doc, "id");
    stack.name = first_string_arg(&doc, "name");
    stack.description = first_string_arg(&doc, "description");
    stack.tags = string_args(&doc, "tags");
    stack.before = string_args(&doc, "before");
    stack.after = string_args(&doc, "after");
    stack.wanted_by = string_args(&doc, "wanted_by");
    stack.watch = string_args(&doc, "watch");

    if stack.before.iter().any(|t| stack.after.contains(t)) {
        return Err(ConfigError::InvalidReference(format!(
            "stack {path} lists the same target in both `before` and `after`"
        )));
    }

    Ok(stack)
}

fn node_by_name<'a>(doc: &'a KdlDocument, name: &str) -> impl Iterator<Item = &'a KdlNode> {
    doc.nodes().iter().filter(move |n| n.name().value() == name)
}

fn first_string_arg(doc: &KdlDocument, name: &str) -> Option<String> {
    node_by_name(doc, name)
        .next()
        .and_then(|node| node.entries().first())
        .and_then(|entry| entry.value().as_string())
        .map(str::to_string)
}

fn string_args(doc: &KdlDocument, name: &str) -> Vec<String> {
    node_by_name(doc, name)
        .flat_map(|node| node.entries())
        .filter_map(|entry| entry.value().as_string())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tags_and_edges() {
        let text = r#"
            name "networking"
            description "shared network stack"
            tags "network" "prod"
            after "../base"
            wanted_by "/apps"
        "#;
        let path = ProjectPath::try_new("/network").unwrap();
        let stack = parse_stack(&path, text, "network/stack.tm.kdl").unwrap();
        assert_eq!(stack.name.as_deref(), Some("networking"));
        assert_eq!(stack.tags, vec!["network", "prod"]);
        assert_eq!(stack.after, vec!["../base"]);
        assert_eq!(stack.wanted_by, vec!["/apps"]);
    }

    #[test]
    fn rejects_target_in_both_before_and_after() {
        let text = r#"
            before "/other"
            after "/other"
        "#;
        let path = ProjectPath::try_new("/a").unwrap();
        assert!(parse_stack(&path, text, "a/stack.tm.kdl").is_err());
    }
}
