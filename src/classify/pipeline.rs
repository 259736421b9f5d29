use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use super::{ReadEntry, ReadSource};
use crate::error::{ClassifyError, Error, Result};

/// Trait for types that process reads handed out by [`run_pipeline`]
///
/// Each consumer thread works on its own clone of the processor.
pub trait ReadProcessor: Send + Clone {
    /// Process a single read
    fn process_read(&mut self, entry: &ReadEntry) -> Result<()>;

    /// Called once when a consumer has drained the queue
    /// Default implementation does nothing
    fn on_batch_complete(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Shared failure state of one pipeline run
///
/// The first error is kept and flips the abort flag. Later errors are logged
/// and dropped.
#[derive(Default)]
struct Failure {
    abort: AtomicBool,
    first: Mutex<Option<Error>>,
}
impl Failure {
    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    fn record(&self, error: Error) {
        let mut first = self.first.lock();
        if first.is_none() {
            *first = Some(error);
        } else if !matches!(error, Error::ClassifyError(ClassifyError::Aborted)) {
            tracing::error!(%error, "additional failure while classifying");
        }
        self.abort.store(true, Ordering::Release);
    }

    fn take(&self) -> Option<Error> {
        self.first.lock().take()
    }
}

/// Sets the abort flag if the owning thread unwinds
struct AbortOnPanic<'a>(&'a Failure);
impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort.store(true, Ordering::Release);
        }
    }
}

/// Feeds every read of `source` to clones of `processor`
///
/// The calling thread is the producer. It fills pooled [`ReadEntry`] buffers
/// and sends them on a queue of `queue_capacity` reads, blocking while the
/// queue is full. `consumers` scoped threads receive, process and return the
/// buffers to the pool. With `consumers == 0` every read is processed inline
/// on the calling thread, in input order.
///
/// The first failure of any thread stops the producer and the other
/// consumers; queued reads are discarded and that failure is returned.
///
/// Returns the number of reads produced.
pub fn run_pipeline<S, P>(
    source: &mut S,
    processor: P,
    consumers: usize,
    queue_capacity: usize,
) -> Result<u64>
where
    S: ReadSource + ?Sized,
    P: ReadProcessor,
{
    if consumers == 0 {
        return run_inline(source, processor);
    }

    let (work_tx, work_rx) = bounded::<ReadEntry>(queue_capacity.max(1));
    let (pool_tx, pool_rx) = bounded::<ReadEntry>(queue_capacity.max(1) + consumers);
    let failure = Failure::default();

    let produced = thread::scope(|s| {
        let handles: Vec<_> = (0..consumers)
            .map(|tid| {
                let work_rx = work_rx.clone();
                let pool_tx = pool_tx.clone();
                let mut processor = processor.clone();
                let failure = &failure;
                s.spawn(move || {
                    let _span = tracing::debug_span!("consumer", tid).entered();
                    let _guard = AbortOnPanic(failure);
                    if let Err(error) = consume(&mut processor, &work_rx, &pool_tx, failure) {
                        tracing::debug!(%error, "consumer failed");
                        failure.record(error);
                    }
                })
            })
            .collect();

        // consumers hold the only receivers so a full abort unblocks the producer
        drop(work_rx);
        drop(pool_tx);

        let produced = produce(source, &work_tx, &pool_rx, &failure);
        drop(work_tx);

        for (tid, handle) in handles.into_iter().enumerate() {
            if handle.join().is_err() {
                failure.record(ClassifyError::ConsumerPanicked(tid).into());
            }
        }
        produced
    });

    if let Some(error) = failure.take() {
        return Err(error);
    }
    produced
}

fn run_inline<S, P>(source: &mut S, mut processor: P) -> Result<u64>
where
    S: ReadSource + ?Sized,
    P: ReadProcessor,
{
    let mut entry = ReadEntry::default();
    let mut read_no = 0;
    while source.next_read(&mut entry)? {
        entry.read_no = read_no;
        read_no += 1;
        processor.process_read(&entry)?;
    }
    processor.on_batch_complete()?;
    Ok(read_no)
}

fn produce<S: ReadSource + ?Sized>(
    source: &mut S,
    work_tx: &Sender<ReadEntry>,
    pool_rx: &Receiver<ReadEntry>,
    failure: &Failure,
) -> Result<u64> {
    let mut read_no = 0;
    loop {
        if failure.is_aborted() {
            return Err(ClassifyError::Aborted.into());
        }
        let mut entry = pool_rx.try_recv().unwrap_or_default();
        match source.next_read(&mut entry) {
            Ok(true) => {}
            Ok(false) => return Ok(read_no),
            Err(error) => {
                failure.record(error);
                return Err(ClassifyError::Aborted.into());
            }
        }
        entry.read_no = read_no;
        read_no += 1;
        if work_tx.send(entry).is_err() {
            // every consumer is gone
            if failure.is_aborted() {
                return Err(ClassifyError::Aborted.into());
            }
            return Err(ClassifyError::QueueClosed.into());
        }
    }
}

fn consume<P: ReadProcessor>(
    processor: &mut P,
    work_rx: &Receiver<ReadEntry>,
    pool_tx: &Sender<ReadEntry>,
    failure: &Failure,
) -> Result<()> {
    for entry in work_rx {
        if failure.is_aborted() {
            return Ok(());
        }
        processor.process_read(&entry)?;
        // a full pool drops the buffer
        let _ = pool_tx.try_send(entry);
    }
    processor.on_batch_complete()
}
