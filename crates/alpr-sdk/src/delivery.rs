//! Result delivery.
//!
//! Without an observer every `process` call recognizes on the caller's thread
//! and returns the real result. With an observer, frames are copied into a
//! bounded queue drained by one worker thread that hands each result to the
//! observer in submission order. A full queue blocks the submitter, except
//! on the worker thread itself, where a full queue is an error.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::{debug, error, info};

use crate::error::{AlprError, Result};
use crate::image::Frame;
use crate::logging::prefix;
use crate::pipeline::FramePipeline;
use crate::result::AlprResult;

thread_local! {
    static ON_DELIVERY_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// True on a delivery worker thread, i.e. inside an observer call.
pub(crate) fn on_delivery_thread() -> bool {
    ON_DELIVERY_THREAD.with(Cell::get)
}

/// Receives results produced in parallel mode.
///
/// Called from the delivery worker thread, one result at a time, in
/// submission order. The result is only borrowed for the duration of the
/// call; clone it to keep it.
///
/// An observer may call `process` and `warm_up`. Calls to `init` and
/// `deinit` from an observer fail with `IllegalState`.
pub trait DeliveryCallback: Send + Sync {
    fn on_new_result(&self, result: &AlprResult);
}

impl<F> DeliveryCallback for F
where
    F: Fn(&AlprResult) + Send + Sync,
{
    fn on_new_result(&self, result: &AlprResult) {
        self(result)
    }
}

/// A frame waiting for the worker.
pub(crate) struct Submission {
    pub frame_id: u64,
    pub frame: Frame,
    pub submitted_at: Instant,
}

pub(crate) enum Delivery {
    Sequential,
    Parallel(ParallelDelivery),
}

impl Delivery {
    pub(crate) fn is_parallel(&self) -> bool {
        matches!(self, Delivery::Parallel(_))
    }

    /// Stop accepting frames and wait for queued ones to be delivered.
    pub(crate) fn shutdown(&mut self) {
        if let Delivery::Parallel(parallel) = self {
            parallel.shutdown();
        }
    }
}

pub(crate) struct ParallelDelivery {
    sender: Option<Sender<Submission>>,
    worker: Option<JoinHandle<()>>,
}

impl ParallelDelivery {
    pub(crate) fn spawn(
        pipeline: Arc<FramePipeline>,
        observer: Arc<dyn DeliveryCallback>,
        queue_depth: usize,
    ) -> Result<Self> {
        let (sender, receiver) = bounded::<Submission>(queue_depth);

        let worker = thread::Builder::new()
            .name("alpr-delivery".to_string())
            .spawn(move || {
                ON_DELIVERY_THREAD.with(|flag| flag.set(true));
                debug!("{} Delivery worker started", prefix::DELIVERY);
                // Ends once every sender is dropped and the queue is drained
                for submission in receiver.iter() {
                    let result = pipeline.run(
                        submission.frame_id,
                        &submission.frame.view(),
                        submission.submitted_at,
                    );
                    let delivered =
                        panic::catch_unwind(AssertUnwindSafe(|| observer.on_new_result(&result)));
                    if delivered.is_err() {
                        error!(
                            frame_id = submission.frame_id,
                            "{} Observer panicked; continuing with next frame",
                            prefix::DELIVERY
                        );
                    }
                }
                debug!("{} Delivery worker stopped", prefix::DELIVERY);
            })
            .map_err(|e| AlprError::Backend(format!("failed to spawn delivery worker: {}", e)))?;

        info!(
            "{} Parallel delivery enabled (queue depth {})",
            prefix::DELIVERY,
            queue_depth
        );
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queue a frame, blocking while the queue is full.
    ///
    /// On the worker thread the frame is queued only if there is room, since
    /// nothing else would ever make room.
    pub(crate) fn submit(&self, submission: Submission) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| AlprError::IllegalState("delivery is shutting down".to_string()))?;
        if on_delivery_thread() {
            return sender.try_send(submission).map_err(|e| match e {
                TrySendError::Full(_) => AlprError::IllegalState(
                    "delivery queue is full; an observer cannot wait for its own worker".to_string(),
                ),
                TrySendError::Disconnected(_) => {
                    AlprError::Backend("delivery worker is gone".to_string())
                }
            });
        }
        sender
            .send(submission)
            .map_err(|_| AlprError::Backend("delivery worker is gone".to_string()))
    }

    pub(crate) fn shutdown(&mut self) {
        // Dropping the sender lets the worker drain the queue and exit
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("{} Delivery worker panicked", prefix::DELIVERY);
            }
        }
    }
}

impl Drop for ParallelDelivery {
    fn drop(&mut self) {
        self.shutdown();
    }
}
