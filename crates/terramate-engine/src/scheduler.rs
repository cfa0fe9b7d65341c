//! Run Scheduler: executes an ordered, dependency-respecting set of stack
//! runs with bounded parallelism, signal-driven cancellation, and an
//! observer seam the cloud sync lifecycle hooks into.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use terramate_core::{Dag, Error, ProjectPath, Result, Stack, StackRun};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Used when `--parallel`/`-j` is given with no explicit count.
const DEFAULT_PARALLELISM: usize = 4;

#[derive(Clone)]
pub struct RunOptions {
    /// 0 = `DEFAULT_PARALLELISM`, 1 = serial, N = bounded concurrency.
    pub parallel: usize,
    pub continue_on_error: bool,
    pub dry_run: bool,
    pub reverse: bool,
    /// Expand `${STACK_PATH}`/`${STACK_NAME}`/`${STACK_ID}` tokens in argv
    /// before spawning each task.
    pub eval: bool,
    pub extra_env: BTreeMap<String, String>,
    /// Classifies a task's exit code as success; anything else is `failed`
    /// unless the process was signal-terminated, which is always `canceled`.
    /// Defaults to "exit code is 0".
    pub success_predicate: Arc<dyn Fn(i32) -> bool + Send + Sync>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("parallel", &self.parallel)
            .field("continue_on_error", &self.continue_on_error)
            .field("dry_run", &self.dry_run)
            .field("reverse", &self.reverse)
            .field("eval", &self.eval)
            .field("extra_env", &self.extra_env)
            .field("success_predicate", &"<fn(i32) -> bool>")
            .finish()
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            parallel: 0,
            continue_on_error: false,
            dry_run: false,
            reverse: false,
            eval: false,
            extra_env: BTreeMap::new(),
            success_predicate: Arc::new(|code| code == 0),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success { exit_code: Option<i32> },
    Failed { message: String, exit_code: Option<i32> },
    Canceled,
}

impl TaskOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            TaskOutcome::Success { exit_code } | TaskOutcome::Failed { exit_code, .. } => *exit_code,
            TaskOutcome::Canceled => None,
        }
    }
}

#[derive(Debug, Clone)]
enum StackOutcome {
    Succeeded,
    Failed(String),
    Canceled,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub succeeded: Vec<ProjectPath>,
    pub failed: Vec<(ProjectPath, String)>,
    pub skipped: Vec<(ProjectPath, String)>,
    pub canceled: Vec<ProjectPath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Canceled,
}

/// Hooks the scheduler calls around the run. Every method defaults to a
/// no-op so implementers only override what they need; the cloud sync
/// lifecycle is the main implementer.
#[async_trait]
pub trait RunObserver: Send + Sync {
    async fn before_all(&self, _order: &[ProjectPath]) -> Result<()> {
        Ok(())
    }
    async fn before_task(&self, _stack: &ProjectPath, _task_index: usize) -> Result<()> {
        Ok(())
    }
    async fn after_task(
        &self,
        _stack: &ProjectPath,
        _task_index: usize,
        _outcome: &TaskOutcome,
    ) -> Result<()> {
        Ok(())
    }
    async fn after_all(&self, _summary: &RunSummary) -> Result<()> {
        Ok(())
    }
}

/// Run every stack in `stack_runs`, admitting a stack only once its
/// dependencies (ancestors, or descendants when `reverse`) have reached a
/// terminal state. A stack whose dependency failed, was skipped, or was
/// canceled is itself recorded as skipped rather than attempted.
///
/// `dry_run` short-circuits entirely: it reports `order` as the intended
/// sequence and calls no observer hook.
pub async fn run(
    dag: &Dag,
    order: &[ProjectPath],
    stack_runs: &BTreeMap<ProjectPath, StackRun>,
    options: &RunOptions,
    observer: Option<Arc<dyn RunObserver>>,
) -> Result<RunSummary> {
    if options.dry_run {
        for path in order {
            tracing::info!(stack = %path, "would run (dry run)");
        }
        return Ok(RunSummary {
            succeeded: order.to_vec(),
            ..RunSummary::default()
        });
    }

    if let Some(observer) = &observer {
        observer.before_all(order).await?;
    }

    let effective_parallelism = match options.parallel {
        0 => DEFAULT_PARALLELISM,
        n => n,
    };
    let semaphore = Arc::new(Semaphore::new(effective_parallelism));
    let interrupt_level = Arc::new(AtomicU8::new(0));
    let live_pids: Arc<StdMutex<BTreeSet<u32>>> = Arc::new(StdMutex::new(BTreeSet::new()));
    let watcher = tokio::spawn(watch_interrupts(interrupt_level.clone(), live_pids.clone()));

    let mut state: BTreeMap<ProjectPath, NodeState> =
        order.iter().map(|p| (p.clone(), NodeState::Pending)).collect();
    let mut join_set: JoinSet<(ProjectPath, StackOutcome)> = JoinSet::new();
    let mut summary = RunSummary::default();
    let mut halted = false;

    loop {
        if interrupt_level.load(Ordering::SeqCst) == 0 && !halted {
            let pending: Vec<ProjectPath> = state
                .iter()
                .filter(|(_, s)| **s == NodeState::Pending)
                .map(|(p, _)| p.clone())
                .collect();

            for path in pending {
                let blockers = if options.reverse {
                    dag.descendants(&path)
                } else {
                    dag.ancestors(&path)
                };

                let mut unfinished = false;
                let mut upstream_bad = false;
                for blocker in &blockers {
                    match state.get(blocker) {
                        Some(NodeState::Succeeded) => {}
                        Some(NodeState::Failed) | Some(NodeState::Skipped) | Some(NodeState::Canceled) => {
                            upstream_bad = true;
                        }
                        _ => unfinished = true,
                    }
                }
                if unfinished {
                    continue;
                }
                // A non-success ancestor is still "terminal" under
                // `continue_on_error`, so the stack becomes ready and runs
                // rather than being force-skipped.
                if upstream_bad && !options.continue_on_error {
                    state.insert(path.clone(), NodeState::Skipped);
                    summary
                        .skipped
                        .push((path, "an upstream stack did not succeed".to_string()));
                    continue;
                }

                let Some(stack_run) = stack_runs.get(&path) else {
                    state.insert(path.clone(), NodeState::Failed);
                    summary.failed.push((path, "no run plan for this stack".to_string()));
                    continue;
                };

                state.insert(path.clone(), NodeState::Running);
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("scheduler semaphore is never closed");
                let observer = observer.clone();
                let stack_run = stack_run.clone();
                let extra_env = options.extra_env.clone();
                let eval = options.eval;
                let live_pids = live_pids.clone();
                let success_predicate = options.success_predicate.clone();

                join_set.spawn(async move {
                    let _permit = permit;
                    let outcome = execute_stack_run(
                        &stack_run,
                        observer.as_deref(),
                        &extra_env,
                        eval,
                        &live_pids,
                        &success_predicate,
                    )
                    .await;
                    (stack_run.stack.path.clone(), outcome)
                });
            }
        }

        if join_set.is_empty() {
            break;
        }

        if let Some(joined) = join_set.join_next().await {
            let (path, outcome) = joined.expect("stack run task panicked");
            match outcome {
                StackOutcome::Succeeded => {
                    state.insert(path.clone(), NodeState::Succeeded);
                    summary.succeeded.push(path);
                }
                StackOutcome::Failed(message) => {
                    state.insert(path.clone(), NodeState::Failed);
                    summary.failed.push((path, message));
                    if !options.continue_on_error {
                        halted = true;
                    }
                }
                StackOutcome::Canceled => {
                    state.insert(path.clone(), NodeState::Canceled);
                    summary.canceled.push(path);
                }
            }
        }
    }

    watcher.abort();

    for (path, node_state) in &state {
        if *node_state == NodeState::Pending {
            summary.canceled.push(path.clone());
        }
    }

    if let Some(observer) = &observer {
        observer.after_all(&summary).await?;
    }

    if interrupt_level.load(Ordering::SeqCst) > 0 {
        return Err(Error::RunCanceled);
    }
    if let Some((stack, message)) = summary.failed.first() {
        return Err(Error::RunFailed {
            stack: stack.clone(),
            message: message.clone(),
        });
    }
    Ok(summary)
}

async fn execute_stack_run(
    stack_run: &StackRun,
    observer: Option<&dyn RunObserver>,
    extra_env: &BTreeMap<String, String>,
    eval: bool,
    live_pids: &Arc<StdMutex<BTreeSet<u32>>>,
    success_predicate: &Arc<dyn Fn(i32) -> bool + Send + Sync>,
) -> StackOutcome {
    for (index, task) in stack_run.tasks.iter().enumerate() {
        if let Some(observer) = observer {
            if let Err(e) = observer.before_task(&stack_run.stack.path, index).await {
                return StackOutcome::Failed(format!("before_task hook failed: {e}"));
            }
        }

        let outcome = execute_task(&stack_run.stack, task, extra_env, eval, live_pids, success_predicate).await;

        if let Some(observer) = observer {
            if let Err(e) = observer.after_task(&stack_run.stack.path, index, &outcome).await {
                return StackOutcome::Failed(format!("after_task hook failed: {e}"));
            }
        }

        match outcome {
            TaskOutcome::Success { .. } => continue,
            TaskOutcome::Failed { message, .. } => return StackOutcome::Failed(message),
            TaskOutcome::Canceled => return StackOutcome::Canceled,
        }
    }
    StackOutcome::Succeeded
}

async fn execute_task(
    stack: &Stack,
    task: &terramate_core::RunTask,
    extra_env: &BTreeMap<String, String>,
    eval: bool,
    live_pids: &Arc<StdMutex<BTreeSet<u32>>>,
    success_predicate: &Arc<dyn Fn(i32) -> bool + Send + Sync>,
) -> TaskOutcome {
    // Terragrunt wraps the provisioner invocation rather than replacing it:
    // `terragrunt <original argv>`. `target`/`provisioner_tag` shape argv at
    // the point a `RunTask` is built, not here.
    let mut argv: Vec<String> = if task.use_terragrunt {
        std::iter::once("terragrunt".to_string())
            .chain(task.argv.iter().cloned())
            .collect()
    } else {
        task.argv.clone()
    };
    if eval {
        argv = argv.iter().map(|token| eval_argv_token(token, stack)).collect();
    }

    let program = match which::which(&argv[0]) {
        Ok(path) => path,
        Err(_) => {
            return TaskOutcome::Failed {
                message: Error::CommandNotFound {
                    program: argv[0].clone(),
                }
                .to_string(),
                exit_code: None,
            };
        }
    };

    let mut command = Command::new(program);
    command.args(&argv[1..]);
    command.current_dir(stack.path.to_host_path(Path::new("/")));
    for (key, value) in extra_env {
        command.env(key, value);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return TaskOutcome::Failed {
                message: format!("failed to spawn {}: {e}", argv[0]),
                exit_code: None,
            }
        }
    };

    let pid = child.id();
    if let Some(pid) = pid {
        live_pids.lock().unwrap().insert(pid);
    }

    let wait_result = child.wait().await;

    if let Some(pid) = pid {
        live_pids.lock().unwrap().remove(&pid);
    }

    match wait_result {
        Ok(status) => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if status.signal().is_some() {
                    return TaskOutcome::Canceled;
                }
            }
            let exit_code = status.code();
            let success = exit_code.map(|code| success_predicate(code)).unwrap_or_else(|| status.success());
            if success {
                TaskOutcome::Success { exit_code }
            } else {
                TaskOutcome::Failed {
                    message: format!("{} exited with {status}", argv[0]),
                    exit_code,
                }
            }
        }
        Err(e) => TaskOutcome::Failed {
            message: format!("failed waiting on {}: {e}", argv[0]),
            exit_code: None,
        },
    }
}

fn eval_argv_token(token: &str, stack: &Stack) -> String {
    token
        .replace("${STACK_PATH}", stack.path.as_str())
        .replace("${STACK_NAME}", stack.name.as_deref().unwrap_or_default())
        .replace("${STACK_ID}", stack.id.as_deref().unwrap_or_default())
}

enum Signal {
    Interrupt,
    Kill,
}

/// Escalate on repeated Ctrl-C: 1st stops admission (checked by `run`'s
/// loop), 2nd forwards SIGINT to every live child, 3rd force-kills them.
/// `tokio::process::Child` exposes no send-arbitrary-signal API, so this
/// tracks pids directly and signals by pid instead of holding `Child`
/// handles here.
async fn watch_interrupts(interrupt_level: Arc<AtomicU8>, live_pids: Arc<StdMutex<BTreeSet<u32>>>) {
    loop {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        let level = interrupt_level.fetch_add(1, Ordering::SeqCst) + 1;
        match level {
            1 => tracing::warn!("interrupt received, no longer starting new stack runs"),
            2 => {
                tracing::warn!("second interrupt received, forwarding SIGINT to running tasks");
                forward_signal(&live_pids, Signal::Interrupt);
            }
            _ => {
                tracing::warn!("third interrupt received, killing running tasks");
                forward_signal(&live_pids, Signal::Kill);
                return;
            }
        }
    }
}

#[cfg(unix)]
fn forward_signal(live_pids: &Arc<StdMutex<BTreeSet<u32>>>, signal: Signal) {
    let raw = match signal {
        Signal::Interrupt => libc::SIGINT,
        Signal::Kill => libc::SIGKILL,
    };
    for pid in live_pids.lock().unwrap().iter() {
        unsafe {
            libc::kill(*pid as libc::pid_t, raw);
        }
    }
}

#[cfg(not(unix))]
fn forward_signal(_live_pids: &Arc<StdMutex<BTreeSet<u32>>>, _signal: Signal) {}

#[cfg(test)]
mod tests {
    use super::*;
    use terramate_core::RunTask;

    fn stack_run(path: &str, argv: &[&str]) -> (ProjectPath, StackRun) {
        let p = ProjectPath::try_new(path).unwrap();
        let stack = Stack::new(p.clone());
        let task = RunTask::new(argv.iter().map(|s| s.to_string()).collect());
        (p, StackRun::new(stack, vec![task]).unwrap())
    }

    #[tokio::test]
    async fn dry_run_reports_order_without_executing() {
        let mut dag = Dag::new();
        let a = ProjectPath::try_new("/a").unwrap();
        dag.add_node(a.clone());
        let order = vec![a.clone()];
        let runs = BTreeMap::new();
        let options = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        let summary = run(&dag, &order, &runs, &options, None).await.unwrap();
        assert_eq!(summary.succeeded, order);
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn independent_stacks_all_succeed() {
        let mut dag = Dag::new();
        let (pa, ra) = stack_run("/a", &["true"]);
        let (pb, rb) = stack_run("/b", &["true"]);
        dag.add_node(pa.clone());
        dag.add_node(pb.clone());
        let order = vec![pa.clone(), pb.clone()];
        let mut runs = BTreeMap::new();
        runs.insert(pa.clone(), ra);
        runs.insert(pb.clone(), rb);

        let summary = run(&dag, &order, &runs, &RunOptions::default(), None).await.unwrap();
        assert_eq!(summary.succeeded.len(), 2);
        assert!(summary.failed.is_empty());
    }

    #[derive(Default)]
    struct RecordingObserver {
        started: StdMutex<Vec<ProjectPath>>,
    }

    #[async_trait]
    impl RunObserver for RecordingObserver {
        async fn before_task(&self, stack: &ProjectPath, _task_index: usize) -> Result<()> {
            self.started.lock().unwrap().push(stack.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn dependent_is_skipped_when_ancestor_fails_without_continue_on_error() {
        let mut dag = Dag::new();
        let (pa, ra) = stack_run("/a", &["false"]);
        let (pb, rb) = stack_run("/b", &["true"]);
        dag.add_edge(pa.clone(), pb.clone()).unwrap();
        let order = vec![pa.clone(), pb.clone()];
        let mut runs = BTreeMap::new();
        runs.insert(pa.clone(), ra);
        runs.insert(pb.clone(), rb);

        let observer = Arc::new(RecordingObserver::default());
        let err = run(&dag, &order, &runs, &RunOptions::default(), Some(observer.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RunFailed { .. }));
        assert!(!observer.started.lock().unwrap().contains(&pb));
    }

    #[tokio::test]
    async fn continue_on_error_admits_downstream_of_failed_ancestor() {
        let mut dag = Dag::new();
        let (pa, ra) = stack_run("/a", &["false"]);
        let (pb, rb) = stack_run("/b", &["true"]);
        dag.add_edge(pa.clone(), pb.clone()).unwrap();
        let order = vec![pa.clone(), pb.clone()];
        let mut runs = BTreeMap::new();
        runs.insert(pa.clone(), ra);
        runs.insert(pb.clone(), rb);

        let observer = Arc::new(RecordingObserver::default());
        let options = RunOptions {
            continue_on_error: true,
            ..Default::default()
        };
        let err = run(&dag, &order, &runs, &options, Some(observer.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RunFailed { .. }));
        assert!(observer.started.lock().unwrap().contains(&pb));
    }

    #[tokio::test]
    async fn success_predicate_classifies_nonzero_exit_as_success() {
        let mut dag = Dag::new();
        let (pa, ra) = stack_run("/a", &["sh", "-c", "exit 2"]);
        dag.add_node(pa.clone());
        let order = vec![pa.clone()];
        let mut runs = BTreeMap::new();
        runs.insert(pa.clone(), ra);

        let options = RunOptions {
            success_predicate: Arc::new(|code| code == 0 || code == 2),
            ..Default::default()
        };
        let summary = run(&dag, &order, &runs, &options, None).await.unwrap();
        assert_eq!(summary.succeeded, vec![pa]);
    }

    #[tokio::test]
    async fn missing_program_is_reported_as_command_not_found() {
        let mut dag = Dag::new();
        let (pa, ra) = stack_run("/a", &["this-program-does-not-exist-anywhere"]);
        dag.add_node(pa.clone());
        let order = vec![pa.clone()];
        let mut runs = BTreeMap::new();
        runs.insert(pa.clone(), ra);

        let err = run(&dag, &order, &runs, &RunOptions::default(), None)
            .await
            .unwrap_err();
        match err {
            Error::RunFailed { message, .. } => assert!(message.contains("not found")),
            other => panic!("expected RunFailed, got {other:?}"),
        }
    }

    #[test]
    fn eval_substitutes_stack_tokens() {
        let mut stack = Stack::new(ProjectPath::try_new("/net/vpc").unwrap());
        stack.name = Some("vpc".to_string());
        let out = eval_argv_token("deploy ${STACK_NAME} at ${STACK_PATH}", &stack);
        assert_eq!(out, "deploy vpc at /net/vpc");
    }
}
