use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;
use threadpool::ThreadPool;

use super::Result;

const MAX_CONCURRENT_TASKS: usize = 8;

/// Untyped bag carrying incremental results between tasks.
///
/// Values are stored as JSON so tasks exchange plain data, not live
/// references. Concurrent siblings must not write the same field.
#[derive(Default)]
pub struct Context {
    bag: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl Context {
    pub fn new() -> Arc<Context> {
        Arc::new(Context::default())
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_value(value)?;
        self.bag.lock().unwrap().insert(key.to_string(), encoded);
        Ok(())
    }

    /// Read a required field; absence is a task programming error.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        match self.try_get(key)? {
            Some(v) => Ok(v),
            None => bail!("context field '{}' is not set", key),
        }
    }

    /// Read an optional field, e.g. one written by a skippable predecessor.
    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let bag = self.bag.lock().unwrap();
        match bag.get(key) {
            None => Ok(None),
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.bag.lock().unwrap().contains_key(key)
    }
}

/// What a task body produced: completion, or a nested graph to run under the
/// same context.
pub enum Outcome {
    Done,
    Nested(TaskList),
}

type RunFn = Box<dyn Fn(&Context) -> Result<Outcome> + Send + Sync>;
type SkipFn = Box<dyn Fn(&Context) -> bool + Send + Sync>;

/// A titled unit of work with an optional skip predicate.
pub struct Task {
    title: String,
    skip: Option<SkipFn>,
    run: RunFn,
}

impl Task {
    pub fn new<F>(title: &str, run: F) -> Task
    where
        F: Fn(&Context) -> Result<Outcome> + Send + Sync + 'static,
    {
        Task {
            title: title.to_string(),
            skip: None,
            run: Box::new(run),
        }
    }

    /// Plain task body without sub-tasks.
    pub fn step<F>(title: &str, run: F) -> Task
    where
        F: Fn(&Context) -> Result<()> + Send + Sync + 'static,
    {
        Task::new(title, move |ctx| {
            run(ctx)?;
            Ok(Outcome::Done)
        })
    }

    pub fn skip_when<F>(mut self, skip: F) -> Task
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(skip));
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

/// An ordered or concurrent list of tasks.
pub struct TaskList {
    tasks: Vec<Task>,
    concurrent: bool,
}

impl TaskList {
    pub fn sequential(tasks: Vec<Task>) -> TaskList {
        TaskList {
            tasks,
            concurrent: false,
        }
    }

    pub fn concurrent(tasks: Vec<Task>) -> TaskList {
        TaskList {
            tasks,
            concurrent: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run the whole graph under the given context.
    pub fn run(self, ctx: &Arc<Context>) -> Result<()> {
        run_list(self, ctx, &[])
    }
}

fn titled_path(path: &[String], title: &str) -> String {
    if path.is_empty() {
        title.to_string()
    } else {
        format!("{} > {}", path.join(" > "), title)
    }
}

fn run_task(task: Task, ctx: &Arc<Context>, path: &[String]) -> Result<()> {
    let full = titled_path(path, &task.title);
    if let Some(skip) = &task.skip {
        if skip(ctx) {
            info!("{} [skipped]", full);
            return Ok(());
        }
    }
    debug!("{} ...", full);
    let outcome = (task.run)(ctx)
        .map_err(|e| failure::Error::from(e.context(format!("task '{}' failed", full))))?;
    match outcome {
        Outcome::Done => {
            info!("{} ✔", full);
            Ok(())
        }
        Outcome::Nested(list) => {
            let mut nested_path = path.to_vec();
            nested_path.push(task.title.clone());
            run_list(list, ctx, &nested_path)
        }
    }
}

fn run_list(list: TaskList, ctx: &Arc<Context>, path: &[String]) -> Result<()> {
    if !list.concurrent {
        // task N observes every mutation of task N-1
        for task in list.tasks {
            run_task(task, ctx, path)?;
        }
        return Ok(());
    }

    // concurrent group: a failure cancels queued siblings; running siblings
    // complete and their results are discarded after the first error
    let workers = list.tasks.len().min(MAX_CONCURRENT_TASKS).max(1);
    let pool = ThreadPool::new(workers);
    let aborted = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel::<Result<()>>();
    let total = list.tasks.len();
    for task in list.tasks {
        let tx = tx.clone();
        let ctx = ctx.clone();
        let aborted = aborted.clone();
        let path = path.to_vec();
        pool.execute(move || {
            if aborted.load(Ordering::SeqCst) {
                debug!("{} [cancelled]", titled_path(&path, task.title()));
                let _ = tx.send(Ok(()));
                return;
            }
            let outcome = run_task(task, &ctx, &path);
            if outcome.is_err() {
                aborted.store(true, Ordering::SeqCst);
            }
            let _ = tx.send(outcome);
        });
    }
    drop(tx);

    let mut first_error = None;
    let mut seen = 0;
    for outcome in rx.iter() {
        seen += 1;
        if let Err(e) = outcome {
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }
    if seen != total {
        bail!("lost {} concurrent task result(s)", total - seen);
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn record(ctx: &Context, marker: &str) {
        let mut seen: Vec<String> = ctx.try_get("order").unwrap().unwrap_or_default();
        seen.push(marker.to_string());
        ctx.set("order", &seen).unwrap();
    }

    #[test]
    fn sequential_tasks_observe_predecessors() {
        let ctx = Context::new();
        let list = TaskList::sequential(vec![
            Task::step("first", |ctx| {
                record(ctx, "first");
                ctx.set("config", &"loaded")
            }),
            Task::step("second", |ctx| {
                let config: String = ctx.get("config")?;
                assert_eq!(config, "loaded");
                record(ctx, "second");
                Ok(())
            }),
        ]);
        list.run(&ctx).unwrap();
        let order: Vec<String> = ctx.get("order").unwrap();
        assert_eq!(order, vec!["first", "second"]);
    }

    #[test]
    fn failure_aborts_remaining_sequential_tasks() {
        let ctx = Context::new();
        let list = TaskList::sequential(vec![
            Task::step("boom", |_| bail!("exploded")),
            Task::step("after", |ctx| {
                record(ctx, "after");
                Ok(())
            }),
        ]);
        let err = list.run(&ctx).unwrap_err();
        assert!(err.to_string().contains("task 'boom' failed"));
        assert!(!ctx.has("order"));
    }

    #[test]
    fn errors_carry_the_title_path() {
        let ctx = Context::new();
        let list = TaskList::sequential(vec![Task::new("outer", |_| {
            Ok(Outcome::Nested(TaskList::sequential(vec![Task::step(
                "inner",
                |_| bail!("deep failure"),
            )])))
        })]);
        let err = list.run(&ctx).unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("outer > inner"), "got: {}", rendered);
        // original cause is preserved in the chain
        let chain: Vec<String> = err.iter_chain().map(|c| c.to_string()).collect();
        assert!(chain.iter().any(|c| c.contains("deep failure")));
    }

    #[test]
    fn skipped_tasks_leave_context_untouched() {
        let ctx = Context::new();
        ctx.set("have-keys", &true).unwrap();
        let list = TaskList::sequential(vec![
            Task::step("generate keys", |ctx| ctx.set("generated", &true))
                .skip_when(|ctx| ctx.try_get::<bool>("have-keys").unwrap() == Some(true)),
        ]);
        list.run(&ctx).unwrap();
        assert!(!ctx.has("generated"));
    }

    #[test]
    fn concurrent_tasks_all_run() {
        let ctx = Context::new();
        let list = TaskList::concurrent(
            (0..5)
                .map(|i| {
                    let key = format!("slot{}", i);
                    Task::new(&format!("worker {}", i), move |ctx: &Context| {
                        ctx.set(&key, &i)?;
                        Ok(Outcome::Done)
                    })
                })
                .collect(),
        );
        list.run(&ctx).unwrap();
        for i in 0..5 {
            assert_eq!(ctx.get::<i32>(&format!("slot{}", i)).unwrap(), i);
        }
    }

    #[test]
    fn concurrent_failure_cancels_queued_siblings() {
        let ctx = Context::new();
        let mut tasks = vec![Task::step("fails fast", |_| bail!("first error"))];
        // more tasks than workers so some stay queued behind the failure
        for i in 0..20 {
            tasks.push(Task::new(
                &format!("slow {}", i),
                move |_ctx: &Context| {
                    thread::sleep(Duration::from_millis(20));
                    Ok(Outcome::Done)
                },
            ));
        }
        let err = TaskList::concurrent(tasks).run(&ctx).unwrap_err();
        assert!(err.to_string().contains("fails fast"));
    }

    #[test]
    fn nested_graphs_can_be_concurrent() {
        let ctx = Context::new();
        let list = TaskList::sequential(vec![Task::new("deploy nodes", |_| {
            Ok(Outcome::Nested(TaskList::concurrent(
                (1..=3)
                    .map(|i| {
                        let key = format!("node{}", i);
                        Task::new(&format!("node{}", i), move |ctx: &Context| {
                            ctx.set(&key, &"deployed")?;
                            Ok(Outcome::Done)
                        })
                    })
                    .collect(),
            )))
        })]);
        list.run(&ctx).unwrap();
        for i in 1..=3 {
            assert!(ctx.has(&format!("node{}", i)));
        }
    }
}
