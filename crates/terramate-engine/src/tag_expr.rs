//! Boolean tag filter expressions: AND (`:`), OR (`,`).
//!
//! A `tags` expression is a disjunction of conjunctions: `"a:b,c"` means
//! `(a AND b) OR c`. Multiple `--tags` arguments are themselves OR'd
//! together, so parsing each and concatenating their clause lists is
//! sufficient to get the right outer-OR semantics.

use terramate_core::Stack;

/// A parsed expression: a list of AND-clauses, OR'd together.
#[derive(Debug, Clone, Default)]
pub struct TagExpr {
    clauses: Vec<Vec<String>>,
}

impl TagExpr {
    pub fn parse(expr: &str) -> Self {
        let clauses = expr
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|clause| {
                clause
                    .split(':')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .collect();
        Self { clauses }
    }

    /// Parse and OR multiple `--tags` arguments together.
    pub fn parse_all<'a>(exprs: impl IntoIterator<Item = &'a str>) -> Self {
        let mut clauses = Vec::new();
        for expr in exprs {
            clauses.extend(Self::parse(expr).clauses);
        }
        Self { clauses }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, stack: &Stack) -> bool {
        if self.clauses.is_empty() {
            return true;
        }
        self.clauses
            .iter()
            .any(|clause| clause.iter().all(|tag| stack.has_tag(tag)))
    }
}

/// `no_tags`: an AND of negations — the stack must carry none of these tags.
pub fn matches_no_tags(stack: &Stack, no_tags: &[String]) -> bool {
    no_tags.iter().all(|tag| !stack.has_tag(tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use terramate_core::ProjectPath;

    fn stack_with_tags(tags: &[&str]) -> Stack {
        let mut s = Stack::new(ProjectPath::try_new("/a").unwrap());
        s.tags = tags.iter().map(|t| t.to_string()).collect();
        s
    }

    #[test]
    fn and_within_clause() {
        let expr = TagExpr::parse("prod:network");
        assert!(expr.matches(&stack_with_tags(&["prod", "network"])));
        assert!(!expr.matches(&stack_with_tags(&["prod"])));
    }

    #[test]
    fn or_across_clauses() {
        let expr = TagExpr::parse("prod:network,staging");
        assert!(expr.matches(&stack_with_tags(&["staging"])));
        assert!(expr.matches(&stack_with_tags(&["prod", "network"])));
        assert!(!expr.matches(&stack_with_tags(&["dev"])));
    }

    #[test]
    fn multiple_tags_arguments_or_together() {
        let expr = TagExpr::parse_all(["a", "b"]);
        assert!(expr.matches(&stack_with_tags(&["a"])));
        assert!(expr.matches(&stack_with_tags(&["b"])));
        assert!(!expr.matches(&stack_with_tags(&["c"])));
    }

    #[test]
    fn no_tags_is_and_of_negations() {
        let no_tags = vec!["deprecated".to_string(), "legacy".to_string()];
        assert!(matches_no_tags(&stack_with_tags(&["prod"]), &no_tags));
        assert!(!matches_no_tags(&stack_with_tags(&["prod", "legacy"]), &no_tags));
    }
}
