#![forbid(unsafe_code)]

//! Background fetch execution.
//!
//! Each blocking fetch runs on its own named thread and reports back over
//! an mpsc channel. The pool only spawns and reaps; ordering and dedup live
//! in the caches, which hand out at most one fetch per stream at a time.

use std::any::Any;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Spawns one-shot jobs whose results land on a shared channel.
#[derive(Debug)]
pub(crate) struct TaskPool<M: Send + 'static> {
    sender: mpsc::Sender<M>,
    handles: Vec<JoinHandle<()>>,
}

impl<M: Send + 'static> TaskPool<M> {
    pub(crate) fn new(sender: mpsc::Sender<M>) -> Self {
        Self {
            sender,
            handles: Vec::new(),
        }
    }

    /// Run `job` on a background thread. If the OS refuses a thread the job
    /// runs inline, so its result is still delivered.
    pub(crate) fn spawn<F>(&mut self, name: &str, job: F)
    where
        F: FnOnce() -> M + Send + 'static,
    {
        self.reap();
        let sender = self.sender.clone();
        let (job_tx, job_rx) = mpsc::channel::<F>();
        let spawned = thread::Builder::new()
            .name(format!("feedsync-{name}"))
            .spawn(move || {
                if let Ok(job) = job_rx.recv() {
                    let _ = sender.send(job());
                }
            });
        match spawned {
            Ok(handle) => {
                let _ = job_tx.send(job);
                self.handles.push(handle);
            }
            Err(err) => {
                tracing::warn!(error = %err, "thread spawn failed, running fetch inline");
                let _ = self.sender.send(job());
            }
        }
    }

    /// Number of jobs whose threads have not been joined yet.
    pub(crate) fn outstanding(&self) -> usize {
        self.handles.len()
    }

    /// Join finished threads, logging any that panicked.
    pub(crate) fn reap(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let mut remaining = Vec::with_capacity(self.handles.len());
        for handle in self.handles.drain(..) {
            if handle.is_finished() {
                join_logged(handle);
            } else {
                remaining.push(handle);
            }
        }
        self.handles = remaining;
    }
}

impl<M: Send + 'static> Drop for TaskPool<M> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            join_logged(handle);
        }
    }
}

/// Text of a panic payload, for logs and error messages.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn join_logged(handle: JoinHandle<()>) {
    if let Err(payload) = handle.join() {
        let msg = panic_message(payload.as_ref());
        tracing::error!("fetch task panicked: {msg}");
    }
}
