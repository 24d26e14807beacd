//! Character-by-character reveal of an already-known reply.
//!
//! One job at a time: starting a new job cancels the previous one, and a
//! cancelled job never delivers another callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Progress of one reveal.
#[derive(Debug)]
pub struct RevealJob {
    full_text: String,
    revealed: String,
    revealed_count: usize,
    tick_interval: Duration,
}

impl RevealJob {
    pub fn new(full_text: impl Into<String>, tick_interval: Duration) -> Self {
        let full_text = full_text.into();
        Self {
            revealed: String::with_capacity(full_text.len()),
            full_text,
            revealed_count: 0,
            tick_interval,
        }
    }

    /// Reveal one more character and return the new partial text, or
    /// `None` once everything is shown.
    pub fn advance(&mut self) -> Option<&str> {
        let next = self.full_text[self.revealed.len()..].chars().next()?;
        self.revealed.push(next);
        self.revealed_count += 1;
        Some(&self.revealed)
    }

    pub fn is_complete(&self) -> bool {
        self.revealed.len() == self.full_text.len()
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed_count
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }
}

pub struct RevealScheduler {
    tick_interval: Duration,
    task: Option<JoinHandle<()>>,
    generation: Arc<AtomicU64>,
}

impl RevealScheduler {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            task: None,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start revealing `full_text`, cancelling any job already running.
    ///
    /// `on_tick` receives each partial text in order; `on_complete` fires
    /// exactly once after the last tick. An empty text completes
    /// immediately without ticking. Returns the job id.
    pub fn start<T, C>(&mut self, full_text: &str, mut on_tick: T, on_complete: C) -> u64
    where
        T: FnMut(String) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        self.cancel();
        let job_id = self.generation.load(Ordering::SeqCst);

        if full_text.is_empty() {
            debug!("Reveal job {job_id}: empty reply, completing immediately");
            on_complete();
            return job_id;
        }

        let mut job = RevealJob::new(full_text, self.tick_interval);
        let generation = self.generation.clone();
        debug!(
            "Reveal job {job_id}: {} chars at {:?}/tick",
            full_text.chars().count(),
            job.tick_interval()
        );

        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(job.tick_interval()).await;
                if generation.load(Ordering::SeqCst) != job_id {
                    return;
                }
                match job.advance() {
                    Some(partial) => on_tick(partial.to_string()),
                    None => break,
                }
                if job.is_complete() {
                    break;
                }
            }
            if generation.load(Ordering::SeqCst) == job_id {
                debug!("Reveal job {job_id}: complete after {} ticks", job.revealed_count());
                on_complete();
            }
        }));

        job_id
    }

    /// Stop the running job, if any. Idempotent.
    pub fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.task.take() {
            if !handle.is_finished() {
                debug!("Reveal cancelled");
            }
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RevealScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
