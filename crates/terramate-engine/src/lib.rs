//! Stack orchestration engine: turns a loaded configuration tree into an
//! ordered, executed set of stack runs.
//!
//! The pipeline a caller wires together is: load a `ConfigurationTree`
//! (`terramate-config`), wrap it in a [`ProjectIndex`], run the
//! [`change_detector`] and [`selector`] to pick candidate stacks, hand
//! those to [`dag_builder`] for ordering, then [`scheduler::run`] to
//! execute them — with [`cloud_sync::CloudSync`] attached as a
//! [`scheduler::RunObserver`] when cloud features are requested.

pub mod change_detector;
pub mod cloud_sync;
pub mod dag_builder;
pub mod project_index;
pub mod safeguards;
pub mod scheduler;
pub mod selector;
pub mod tag_expr;

pub use change_detector::{compute_change_set, select_baseline, ChangeReason, ChangeSet};
pub use cloud_sync::CloudSync;
pub use dag_builder::{build_dag, sorted_order};
pub use project_index::{EdgeKind, ProjectIndex};
pub use safeguards::{check_outdated_code, check_safeguards, SafeguardContext, SafeguardReport, SafeguardWarning};
pub use scheduler::{run as run_scheduled, RunObserver, RunOptions, RunSummary, TaskOutcome};
pub use selector::{parse_status, select, SelectorFlags};
pub use tag_expr::{matches_no_tags, TagExpr};
