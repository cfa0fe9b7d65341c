//! Run-time task types: one command invocation bound to one stack.

use std::path::PathBuf;

use crate::stack::Stack;

/// One command invocation bound to one stack.
#[derive(Debug, Clone)]
pub struct RunTask {
    /// argv, always non-empty.
    pub argv: Vec<String>,
    pub target: Option<String>,
    pub sync_deployment: bool,
    pub sync_drift: bool,
    pub sync_preview: bool,
    pub plan_file: Option<PathBuf>,
    pub provisioner_tag: Option<String>,
    pub use_terragrunt: bool,
}

impl RunTask {
    pub fn new(argv: Vec<String>) -> Self {
        assert!(!argv.is_empty(), "a task's argv must have at least one element");
        Self {
            argv,
            target: None,
            sync_deployment: false,
            sync_drift: false,
            sync_preview: false,
            plan_file: None,
            provisioner_tag: None,
            use_terragrunt: false,
        }
    }

    pub fn wants_sync(&self) -> bool {
        self.sync_deployment || self.sync_drift || self.sync_preview
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

/// Pairing of a Stack and its ordered task list — the scheduler's
/// scheduling unit.
#[derive(Debug, Clone)]
pub struct StackRun {
    pub stack: Stack,
    pub tasks: Vec<RunTask>,
}

impl StackRun {
    /// Construct a stack run, rejecting empty task lists: a stack run
    /// always has at least one task.
    pub fn new(stack: Stack, tasks: Vec<RunTask>) -> Result<Self, crate::error::Error> {
        if tasks.is_empty() {
            return Err(crate::error::Error::Config(format!(
                "stack {} has no tasks to run",
                stack.path
            )));
        }
        Ok(Self { stack, tasks })
    }

    pub fn wants_sync(&self) -> bool {
        self.tasks.iter().any(RunTask::wants_sync)
    }
}
