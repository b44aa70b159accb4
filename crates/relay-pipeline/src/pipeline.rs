use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relay_messages::{Message, MessageDraft};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::processor::MessageProcessor;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Intake is closed (shutdown); the caller should retry with
    /// backoff against another instance.
    #[error("pipeline overloaded or shut down")]
    Overloaded,

    #[error("message store error: {0}")]
    Store(#[from] relay_messages::MessageError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// One queued unit of work: the draft plus an optional reply slot for
/// producers that need the persisted message back (the REST endpoint).
#[derive(Debug)]
pub struct Submission {
    draft: MessageDraft,
    reply: Option<oneshot::Sender<std::result::Result<Message, relay_messages::MessageError>>>,
}

/// Producer handle plus the single consumer worker.
///
/// Both producers — the realtime gateway's dispatch and the REST message
/// endpoint — enqueue drafts here; the worker drains them FIFO, which is
/// the whole per-instance ordering guarantee. There is exactly one worker
/// per process.
pub struct MessagePipeline {
    tx: mpsc::Sender<Submission>,
    processor: Arc<MessageProcessor>,
    fallback_count: AtomicU64,
}

impl MessagePipeline {
    /// Build the pipeline and spawn its worker task. The worker runs until
    /// `shutdown` flips to true, then drains the queue within
    /// `drain_deadline` and exits.
    pub fn spawn(
        capacity: usize,
        processor: Arc<MessageProcessor>,
        shutdown: watch::Receiver<bool>,
        drain_deadline: Duration,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let pipeline = Arc::new(Self {
            tx,
            processor: processor.clone(),
            fallback_count: AtomicU64::new(0),
        });
        let worker = tokio::spawn(run_worker(rx, processor, shutdown, drain_deadline));
        (pipeline, worker)
    }

    /// Test/embedding constructor without a worker; drafts queue up until
    /// `submit` overflows into the synchronous path.
    #[doc(hidden)]
    pub fn without_worker(
        capacity: usize,
        processor: Arc<MessageProcessor>,
    ) -> (Self, mpsc::Receiver<Submission>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                processor,
                fallback_count: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Submit a draft for processing.
    ///
    /// Fast path: enqueue and return. Full queue: process synchronously;
    /// the call then returns only after persistence and fanout were
    /// attempted. Closed intake (shutdown): `Overloaded`.
    pub async fn submit(&self, draft: MessageDraft) -> Result<()> {
        match self.tx.try_send(Submission { draft, reply: None }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(submission)) => {
                self.note_fallback(&submission.draft.conversation_id);
                self.processor.process(submission.draft).await?;
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PipelineError::Overloaded),
        }
    }

    /// Submit a draft and wait for the persisted message.
    ///
    /// Same queue and same fallback rules as `submit`; the draft rides
    /// with a reply slot the worker answers once the message is stored,
    /// so producers that must return the assigned id still enqueue on the
    /// happy path.
    pub async fn submit_and_wait(&self, draft: MessageDraft) -> Result<Message> {
        let (reply_tx, reply_rx) = oneshot::channel();
        match self.tx.try_send(Submission {
            draft,
            reply: Some(reply_tx),
        }) {
            Ok(()) => match reply_rx.await {
                Ok(result) => Ok(result?),
                // worker dropped the reply slot mid-shutdown
                Err(_) => Err(PipelineError::Overloaded),
            },
            Err(mpsc::error::TrySendError::Full(submission)) => {
                self.note_fallback(&submission.draft.conversation_id);
                Ok(self.processor.process(submission.draft).await?)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PipelineError::Overloaded),
        }
    }

    /// Times the queue was full and a producer took the synchronous path.
    pub fn fallback_count(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    fn note_fallback(&self, conversation_id: &str) {
        self.fallback_count.fetch_add(1, Ordering::Relaxed);
        warn!(conversation_id, "pipeline queue full, processing synchronously");
    }
}

/// The single consumer. FIFO over the queue; a failed message is logged
/// and never halts the worker.
async fn run_worker(
    mut rx: mpsc::Receiver<Submission>,
    processor: Arc<MessageProcessor>,
    mut shutdown: watch::Receiver<bool>,
    drain_deadline: Duration,
) {
    info!("pipeline worker started");
    loop {
        tokio::select! {
            submission = rx.recv() => {
                match submission {
                    Some(submission) => process_submission(submission, &processor).await,
                    None => break, // all producers gone
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    drain(&mut rx, &processor, drain_deadline).await;
                    break;
                }
            }
        }
    }
    info!("pipeline worker stopped");
}

/// Process one queued submission and answer its reply slot, if any.
async fn process_submission(submission: Submission, processor: &MessageProcessor) {
    let result = processor.process(submission.draft).await;
    match submission.reply {
        Some(reply) => {
            // a gone receiver means the producer stopped waiting
            let _ = reply.send(result);
        }
        None => {
            if let Err(e) = result {
                warn!(error = %e, "message processing failed");
            }
        }
    }
}

/// Drain whatever is already queued, bounded by the deadline. New
/// enqueues racing the drain are best-effort; producers are expected to
/// have been stopped first.
async fn drain(
    rx: &mut mpsc::Receiver<Submission>,
    processor: &MessageProcessor,
    deadline: Duration,
) {
    let result = tokio::time::timeout(deadline, async {
        let mut drained = 0u64;
        while let Ok(submission) = rx.try_recv() {
            process_submission(submission, processor).await;
            drained += 1;
        }
        drained
    })
    .await;

    match result {
        Ok(drained) => info!(drained, "pipeline drained"),
        Err(_) => warn!("pipeline drain deadline exceeded, queued messages dropped"),
    }
}
