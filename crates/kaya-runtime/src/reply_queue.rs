//! Serialized reply tasks. Every accepted inbound message becomes one task
//! here; a single worker runs them to completion in enqueue order, so a
//! turn's side effects all land before the next turn begins.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};

type ReplyTask = Pin<Box<dyn Future<Output = ()> + Send>>;

struct QueuedTask {
    task: ReplyTask,
    done: oneshot::Sender<()>,
}

/// Handle to the single-consumer worker. Cheap to clone.
#[derive(Clone)]
pub struct ReplyQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
}

impl ReplyQueue {
    /// Spawns the worker. Tasks own their errors; the worker only sequences
    /// them.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedTask>();
        tokio::spawn(async move {
            while let Some(queued) = rx.recv().await {
                queued.task.await;
                // Enqueuer may have given up waiting; that is fine.
                let _ = queued.done.send(());
            }
        });
        Self { tx }
    }

    /// Claims the next slot immediately. The task runs once every task
    /// enqueued before it has finished; await the returned receiver for
    /// completion.
    pub fn enqueue(
        &self,
        task: impl Future<Output = ()> + Send + 'static,
    ) -> oneshot::Receiver<()> {
        let (done, wait) = oneshot::channel();
        let queued = QueuedTask {
            task: Box::pin(task),
            done,
        };
        if self.tx.send(queued).is_err() {
            eprintln!("reply queue worker is gone; task dropped");
        }
        wait
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::ReplyQueue;

    fn record(log: &Arc<Mutex<Vec<String>>>, event: &str) {
        log.lock().expect("lock").push(event.to_string());
    }

    #[tokio::test]
    async fn tasks_run_one_at_a_time_in_enqueue_order() {
        let queue = ReplyQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        // The first task sleeps; interleaved execution would put the second
        // task's start before the first task's end.
        let slow = {
            let log = log.clone();
            async move {
                record(&log, "one:start");
                tokio::time::sleep(Duration::from_millis(30)).await;
                record(&log, "one:end");
            }
        };
        let fast = {
            let log = log.clone();
            async move {
                record(&log, "two:start");
                record(&log, "two:end");
            }
        };

        let first = queue.enqueue(slow);
        let second = queue.enqueue(fast);
        first.await.expect("worker");
        second.await.expect("worker");

        assert_eq!(
            *log.lock().expect("lock"),
            vec!["one:start", "one:end", "two:start", "two:end"]
        );
    }

    #[tokio::test]
    async fn completion_fires_only_after_the_task_finished() {
        let queue = ReplyQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let log = log.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                record(&log, "task");
            }
        };
        queue.enqueue(task).await.expect("worker");
        assert_eq!(*log.lock().expect("lock"), vec!["task"]);
    }
}
