//! Bounded-concurrency task runner
//!
//! [`run_tasks`] fans a batch of tasks out over a disposable pool of tokio
//! workers pulling from one shared queue. Every task runs exactly once and
//! every failure is collected; the batch only reports back after all
//! workers are done (or the user interrupted the wait).

use futures_util::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// How often the collector wakes up to look at the interrupt flag
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Worker count for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workers {
    /// One worker per task
    PerTask,
    /// At most this many workers
    Max(usize),
}

impl Workers {
    /// Map a user setting: `-1` (or any negative value) means one worker
    /// per task
    pub fn from_setting(value: i64) -> Self {
        if value < 0 {
            Workers::PerTask
        } else {
            Workers::Max(value as usize)
        }
    }

    fn resolve(self, tasks: usize) -> usize {
        match self {
            Workers::PerTask => tasks,
            Workers::Max(n) => n.min(tasks),
        }
    }
}

/// Identity of a task in error reports
pub trait Named {
    fn task_name(&self) -> String;
}

impl Named for String {
    fn task_name(&self) -> String {
        self.clone()
    }
}

/// Cooperative interruption flag shared between the CLI and the engine
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Set the flag on Ctrl-C
    pub fn install_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, waiting for running operations is abandoned");
                flag.trigger();
            }
        });
    }
}

/// Failures of a batch with two or more failed tasks
#[derive(Debug)]
pub struct MultipleErrors<E> {
    errors: BTreeMap<String, E>,
}

impl<E> MultipleErrors<E> {
    pub fn new(errors: BTreeMap<String, E>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &BTreeMap<String, E> {
        &self.errors
    }

    pub fn into_errors(self) -> BTreeMap<String, E> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }
}

impl<E: std::error::Error + 'static> MultipleErrors<E> {
    /// Every failed task with its full error chain
    pub fn report(&self) -> String {
        let mut out = String::new();
        for (name, error) in &self.errors {
            out.push_str(&format!("{name}: {error}\n"));
            let mut source = error.source();
            while let Some(cause) = source {
                out.push_str(&format!("    caused by: {cause}\n"));
                source = cause.source();
            }
        }
        out
    }

    pub fn print_all_backtraces(&self) {
        eprint!("{}", self.report());
    }
}

impl<E: fmt::Display> fmt::Display for MultipleErrors<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multiple errors occurred:")?;
        for (name, error) in &self.errors {
            write!(f, "\n  {name}: {error}")?;
        }
        Ok(())
    }
}

impl<E: std::error::Error + 'static> std::error::Error for MultipleErrors<E> {}

/// Failure of a batch
#[derive(Debug)]
pub enum ParallelError<E> {
    /// The worker count resolved to zero
    NoWorkers,
    /// Two tasks share a name, so their failures could not be told apart
    DuplicateTask(String),
    /// Exactly one task failed; its error is handed back unchanged
    Single { task: String, error: E },
    /// Two or more tasks failed
    Multiple(MultipleErrors<E>),
    /// The wait was interrupted; running workers were left to finish
    Interrupted,
}

impl<E> ParallelError<E> {
    /// Names of the tasks that failed
    pub fn failed_tasks(&self) -> Vec<&str> {
        match self {
            ParallelError::Single { task, .. } => vec![task.as_str()],
            ParallelError::Multiple(errors) => errors.task_names().collect(),
            ParallelError::NoWorkers
            | ParallelError::DuplicateTask(_)
            | ParallelError::Interrupted => Vec::new(),
        }
    }

    /// The original error of a single failure
    pub fn into_error(self) -> Option<E> {
        match self {
            ParallelError::Single { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for ParallelError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParallelError::NoWorkers => write!(f, "At least one worker is required"),
            ParallelError::DuplicateTask(name) => write!(f, "Task '{name}' was queued twice"),
            ParallelError::Single { error, .. } => error.fmt(f),
            ParallelError::Multiple(errors) => errors.fmt(f),
            ParallelError::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ParallelError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ParallelError::Single { error, .. } => error.source(),
            _ => None,
        }
    }
}

enum Outcome<R, E> {
    Done(String, Result<R, E>),
    Panicked(Box<dyn Any + Send>),
}

/// Run `f` over every task with at most `workers` running at once
///
/// Results are returned in completion order.
pub async fn run_tasks<T, R, E, F, Fut>(
    workers: Workers,
    tasks: Vec<T>,
    interrupt: &Interrupt,
    f: F,
) -> Result<Vec<R>, ParallelError<E>>
where
    T: Named + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    let worker_count = workers.resolve(tasks.len());
    if worker_count == 0 {
        return Err(ParallelError::NoWorkers);
    }

    let mut seen = BTreeSet::new();
    for task in &tasks {
        let name = task.task_name();
        if seen.contains(&name) {
            return Err(ParallelError::DuplicateTask(name));
        }
        seen.insert(name);
    }

    let total = tasks.len();
    let queue = Arc::new(Mutex::new(tasks.into_iter().collect::<VecDeque<T>>()));
    let f = Arc::new(f);
    let (tx, mut rx) = mpsc::unbounded_channel::<Outcome<R, E>>();

    tracing::debug!(tasks = total, workers = worker_count, "Starting task batch");

    for _ in 0..worker_count {
        let queue = queue.clone();
        let f = f.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                let Some(task) = next else { break };
                let name = task.task_name();
                let outcome = match AssertUnwindSafe(f(task)).catch_unwind().await {
                    Ok(result) => Outcome::Done(name, result),
                    Err(payload) => Outcome::Panicked(payload),
                };
                if tx.send(outcome).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut results = Vec::with_capacity(total);
    let mut failures = BTreeMap::new();
    let mut panic = None;

    loop {
        if interrupt.is_set() {
            return Err(ParallelError::Interrupted);
        }
        match tokio::time::timeout(POLL_INTERVAL, rx.recv()).await {
            Ok(Some(Outcome::Done(_, Ok(result)))) => results.push(result),
            Ok(Some(Outcome::Done(name, Err(error)))) => {
                tracing::debug!(task = %name, "Task failed");
                failures.insert(name, error);
            }
            Ok(Some(Outcome::Panicked(payload))) => {
                panic.get_or_insert(payload);
            }
            Ok(None) => break,
            Err(_) => {}
        }
    }

    if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
    }

    if failures.len() > 1 {
        return Err(ParallelError::Multiple(MultipleErrors::new(failures)));
    }
    match failures.pop_first() {
        Some((task, error)) => Err(ParallelError::Single { task, error }),
        None => Ok(results),
    }
}
