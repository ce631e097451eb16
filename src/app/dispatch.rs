//! Delivery of record-created events to the ingestion handler.
//!
//! Events arrive over a channel and each one runs on its own thread, with at
//! most `max_threads` in flight. A panicking handler is logged and does not
//! take the queue down.

use std::{
    sync::{
        atomic::{AtomicU16, Ordering},
        mpsc, Arc,
    },
    thread::{sleep, JoinHandle},
    time::Duration,
};

use crate::semantic::{IngestOutcome, RecordCreated, VectorIngestionHandler};

#[derive(Debug)]
pub enum Task {
    Ingest(RecordCreated),
    Shutdown,
}

pub struct Dispatcher {
    task_tx: mpsc::Sender<Task>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn start(handler: Arc<VectorIngestionHandler>, max_threads: u16) -> Self {
        let (task_tx, task_rx) = mpsc::channel::<Task>();

        let handle = std::thread::spawn(move || start_queue(task_rx, handler, max_threads.max(1)));

        Self {
            task_tx,
            handle: Some(handle),
        }
    }

    /// Queue an event. Fire-and-forget: the outcome is only logged.
    pub fn dispatch(&self, event: RecordCreated) {
        let id = event.id.clone();
        if self.task_tx.send(Task::Ingest(event)).is_err() {
            log::error!("ingestion queue is closed, dropping event for animal {id}");
        }
    }

    /// Stop accepting events and wait for in-flight ones to finish.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if self.task_tx.send(Task::Shutdown).is_err() {
            log::warn!("ingestion queue already stopped");
        }

        log::warn!("waiting for ingestion queue to stop");
        if let Err(err) = handle.join() {
            log::error!("ingestion queue panicked: {err:?}");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn throttle(counter: &AtomicU16, max_threads: u16) {
    while counter.load(Ordering::Relaxed) >= max_threads {
        sleep(Duration::from_millis(20));
    }
}

fn start_queue(
    task_rx: mpsc::Receiver<Task>,
    handler: Arc<VectorIngestionHandler>,
    max_threads: u16,
) {
    let thread_ctr = Arc::new(AtomicU16::new(0));

    log::debug!("waiting for events");
    while let Ok(task) = task_rx.recv() {
        let event = match task {
            Task::Ingest(event) => event,
            // graceful shutdown
            Task::Shutdown => break,
        };

        throttle(&thread_ctr, max_threads);
        thread_ctr.fetch_add(1, Ordering::Relaxed);

        let id = event.id.clone();
        let task_handle = std::thread::spawn({
            let handler = handler.clone();
            move || handler.handle(&event)
        });

        // handle thread panics
        let thread_counter = thread_ctr.clone();
        std::thread::spawn(move || {
            match task_handle.join() {
                Ok(IngestOutcome::Failed(_)) => {
                    log::debug!("animal {id} left without a vector")
                }
                Ok(_) => {}
                Err(err) => log::error!("ingestion of animal {id} panicked: {err:?}"),
            }

            thread_counter.fetch_sub(1, Ordering::Relaxed);
        });
    }

    while thread_ctr.load(Ordering::Relaxed) > 0 {
        sleep(Duration::from_millis(20));
    }
    log::info!("ingestion queue stopped");
}
