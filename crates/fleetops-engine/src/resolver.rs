//! Dependency ordering of per-resource operations
//!
//! Every resource in a phase gets a one-shot [`Completion`]. Dependents wait
//! on the completions of their dependencies before running and give up
//! without running when one of them failed.

use crate::error::{DeployError, Result};
use crate::parallel::{Interrupt, Named, ParallelError, Workers, run_tasks};
use crate::resource::Resource;
use fleetops_core::Definition;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// One-shot completion signal with a success flag
#[derive(Debug, Clone)]
pub struct Completion {
    tx: Arc<watch::Sender<Option<bool>>>,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Record the outcome. Only the first call has an effect.
    pub fn complete(&self, ok: bool) -> bool {
        self.tx.send_if_modified(|value| {
            if value.is_none() {
                *value = Some(ok);
                true
            } else {
                false
            }
        })
    }

    pub fn outcome(&self) -> Option<bool> {
        *self.tx.borrow()
    }

    /// Wait until the outcome is known and return it
    pub async fn wait(&self) -> bool {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).unwrap_or(false),
            Err(_) => false,
        }
    }
}

/// Marks its completion failed unless [`CompletionGuard::succeed`] ran
pub struct CompletionGuard {
    completion: Completion,
}

impl CompletionGuard {
    pub fn new(completion: Completion) -> Self {
        Self { completion }
    }

    pub fn succeed(self) {
        self.completion.complete(true);
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        // no-op after succeed()
        self.completion.complete(false);
    }
}

/// For each resource, the resources it has to wait for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    waits_on: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Creation order: a resource waits for everything in its `create_after`
    pub fn for_create(
        resources: &[Arc<dyn Resource>],
        definitions: &BTreeMap<String, Definition>,
    ) -> Self {
        let names = names_of(resources);
        let mut waits_on = BTreeMap::new();
        for resource in resources {
            let deps = match definitions.get(resource.name()) {
                Some(definition) => resource
                    .create_after(&names, definition)
                    .into_iter()
                    .filter(|dep| dep != resource.name() && names.contains(dep))
                    .collect(),
                None => BTreeSet::new(),
            };
            waits_on.insert(resource.name().to_string(), deps);
        }
        Self { waits_on }
    }

    /// Destruction order: when R lists D in `destroy_before`, D waits for R
    pub fn for_destroy(resources: &[Arc<dyn Resource>]) -> Self {
        let names = names_of(resources);
        let mut waits_on: BTreeMap<String, BTreeSet<String>> = names
            .iter()
            .map(|name| (name.clone(), BTreeSet::new()))
            .collect();
        for resource in resources {
            for later in resource.destroy_before(&names) {
                if later != resource.name()
                    && let Some(deps) = waits_on.get_mut(&later)
                {
                    deps.insert(resource.name().to_string());
                }
            }
        }
        Self { waits_on }
    }

    pub fn waits_on(&self, name: &str) -> BTreeSet<String> {
        self.waits_on.get(name).cloned().unwrap_or_default()
    }

    /// A dependency cycle, if there is one. Resources on a cycle would wait
    /// on each other forever.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            graph: &BTreeMap<String, BTreeSet<String>>,
            node: &str,
            marks: &mut BTreeMap<String, Mark>,
            path: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            match marks.get(node) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| n == node).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(node.to_string());
                    return Some(cycle);
                }
                None => {}
            }
            marks.insert(node.to_string(), Mark::Visiting);
            path.push(node.to_string());
            for dep in graph.get(node).into_iter().flatten() {
                if let Some(cycle) = visit(graph, dep, marks, path) {
                    return Some(cycle);
                }
            }
            path.pop();
            marks.insert(node.to_string(), Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        for node in self.waits_on.keys() {
            let mut path = Vec::new();
            if let Some(cycle) = visit(&self.waits_on, node, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
        None
    }
}

fn names_of(resources: &[Arc<dyn Resource>]) -> BTreeSet<String> {
    resources.iter().map(|r| r.name().to_string()).collect()
}

struct OrderedTask {
    resource: Arc<dyn Resource>,
    completion: Completion,
    dependencies: Vec<(String, Completion)>,
}

impl Named for OrderedTask {
    fn task_name(&self) -> String {
        self.resource.name().to_string()
    }
}

/// Run `f` on every resource with one worker each, honouring `graph`
///
/// A resource whose dependency failed is reported as
/// [`DeployError::DependencyFailed`] and `f` is never called for it.
pub async fn run_ordered<R, F, Fut>(
    resources: Vec<Arc<dyn Resource>>,
    graph: &DependencyGraph,
    interrupt: &Interrupt,
    f: F,
) -> std::result::Result<Vec<R>, ParallelError<DeployError>>
where
    R: Send + 'static,
    F: Fn(Arc<dyn Resource>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    if let Some(cycle) = graph.find_cycle() {
        tracing::warn!(
            "Dependency cycle detected ({}); the resources involved will never start",
            cycle.join(" -> ")
        );
    }

    let completions: BTreeMap<String, Completion> = resources
        .iter()
        .map(|r| (r.name().to_string(), Completion::new()))
        .collect();

    let tasks: Vec<OrderedTask> = resources
        .into_iter()
        .map(|resource| {
            let dependencies = graph
                .waits_on(resource.name())
                .into_iter()
                .filter_map(|dep| completions.get(&dep).map(|c| (dep, c.clone())))
                .collect();
            OrderedTask {
                completion: completions[resource.name()].clone(),
                resource,
                dependencies,
            }
        })
        .collect();

    let f = Arc::new(f);
    run_tasks(
        Workers::PerTask,
        tasks,
        interrupt,
        move |task: OrderedTask| {
            let f = f.clone();
            async move {
                let guard = CompletionGuard::new(task.completion);
                for (dependency, completion) in task.dependencies {
                    if !completion.wait().await {
                        return Err(DeployError::DependencyFailed {
                            resource: task.resource.name().to_string(),
                            dependency,
                        });
                    }
                }
                let result = f(task.resource).await?;
                guard.succeed();
                Ok(result)
            }
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completion_is_set_once() {
        let completion = Completion::new();
        assert_eq!(completion.outcome(), None);
        assert!(completion.complete(false));
        assert!(!completion.complete(true));
        assert_eq!(completion.outcome(), Some(false));
        assert!(!completion.wait().await);
    }

    #[tokio::test]
    async fn test_waiters_are_released() {
        let completion = Completion::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let c = completion.clone();
                tokio::spawn(async move { c.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        completion.complete(true);
        for waiter in waiters {
            assert!(waiter.await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_guard_marks_failure_on_drop() {
        let completion = Completion::new();
        {
            let _guard = CompletionGuard::new(completion.clone());
        }
        assert_eq!(completion.outcome(), Some(false));

        let completion = Completion::new();
        CompletionGuard::new(completion.clone()).succeed();
        assert_eq!(completion.outcome(), Some(true));
    }

    #[test]
    fn test_find_cycle() {
        let graph = DependencyGraph {
            waits_on: BTreeMap::from([
                ("a".to_string(), BTreeSet::from(["b".to_string()])),
                ("b".to_string(), BTreeSet::from(["c".to_string()])),
                ("c".to_string(), BTreeSet::from(["a".to_string()])),
                ("d".to_string(), BTreeSet::new()),
            ]),
        };
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);

        let acyclic = DependencyGraph {
            waits_on: BTreeMap::from([
                ("web".to_string(), BTreeSet::from(["key".to_string()])),
                ("key".to_string(), BTreeSet::new()),
            ]),
        };
        assert!(acyclic.find_cycle().is_none());
    }
}
