//! src/pipeline/async_manager.rs
//!
//! Double-buffered handoff between a background fill thread and the
//! consuming thread.
//!
//! Every stage of the pipeline (block loader, block cache, batch iterator,
//! decoder) is an `AsyncManager` around its own [`Fill`] implementation. The
//! manager owns exactly two buffers: the *ready* one, lent to the consumer
//! by `next()`, and the *pending* one, which the background thread is
//! filling. `next()` waits for the pending fill, hands that buffer out and
//! immediately sends the previously consumed one back for filling, so the
//! producer works on item `n + 1` while the consumer works on item `n`.
//!
//! # Key features
//! - One dedicated, named thread per stage
//! - Buffers are moved through bounded channels, never shared
//! - Fill errors are carried back with the buffer and returned by `next()`
//! - Drop waits for the in-flight fill, then joins the thread
//!
//! ```ignore
//! let mut stage = AsyncManager::new("blocks", filler)?;
//! while let Some(block) = stage.next()? {
//!     consume(block);
//! }
//! stage.reset()?; // next pass
//! ```

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread;
use tracing::{debug, trace};

/// The producer side of a pipeline stage.
///
/// `fill` runs on the stage's background thread, one call at a time.
pub trait Fill: Send + 'static {
    type Buffer: Default + Send + 'static;

    /// Fills `buffer` with the next item.
    ///
    /// Returns `Ok(false)` when there is no more data for this pass. The
    /// buffer keeps its previous allocation, so implementations should
    /// overwrite or clear it.
    fn fill(&mut self, buffer: &mut Self::Buffer) -> Result<bool>;

    /// Rewinds the producer for a new pass.
    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

enum Command<B> {
    Fill(B),
    Reset,
}

enum Reply<B> {
    Filled { buffer: B, outcome: Result<bool> },
    Reset(Result<()>),
}

/// A generic two-buffer producer/consumer stage.
///
/// The two buffers are moved between this struct and the fill thread; at any
/// time each one is owned by exactly one side.
pub struct AsyncManager<F: Fill> {
    name: String,
    command_tx: Option<Sender<Command<F::Buffer>>>,
    reply_rx: Receiver<Reply<F::Buffer>>,
    worker: Option<thread::JoinHandle<()>>,
    /// Buffer currently lent to the consumer.
    ready: Option<F::Buffer>,
    /// Buffers owned by neither the consumer nor the fill thread.
    spare: Vec<F::Buffer>,
    in_flight: bool,
    exhausted: bool,
}

impl<F: Fill> AsyncManager<F> {
    /// Spawns the fill thread and starts filling the first buffer.
    ///
    /// # Arguments
    /// * `name` - stage name, used for the thread name and in errors
    /// * `filler` - producer moved onto the background thread
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn new(name: impl Into<String>, filler: F) -> Result<Self> {
        let name = name.into();

        // Capacity 1 is enough: at most one command and one reply are ever
        // outstanding.
        let (command_tx, command_rx) = bounded::<Command<F::Buffer>>(1);
        let (reply_tx, reply_rx) = bounded::<Reply<F::Buffer>>(1);

        let worker = thread::Builder::new()
            .name(format!("{}-fill", name))
            .spawn(move || run_fill_loop(filler, command_rx, reply_tx))
            .with_context(|| format!("Failed to spawn fill thread for stage '{}'", name))?;

        debug!(stage = %name, "fill thread started");

        let mut manager = Self {
            name,
            command_tx: Some(command_tx),
            reply_rx,
            worker: Some(worker),
            ready: None,
            spare: vec![F::Buffer::default(), F::Buffer::default()],
            in_flight: false,
            exhausted: false,
        };
        manager.dispatch()?;
        Ok(manager)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once a fill reported the end of the current pass.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Waits for the pending buffer and returns it.
    ///
    /// The buffer returned by the previous call goes back to the fill
    /// thread before this one is returned. Returns `Ok(None)` at the end of
    /// the pass, and keeps doing so until `reset()`.
    ///
    /// # Errors
    ///
    /// Returns the error of a failed fill (the stage stays usable and the
    /// next call moves on) or an error if the fill thread died.
    pub fn next(&mut self) -> Result<Option<&mut F::Buffer>> {
        if self.exhausted {
            return Ok(None);
        }
        if let Some(consumed) = self.ready.take() {
            self.spare.push(consumed);
        }
        if !self.in_flight {
            self.dispatch()?;
        }

        let (buffer, outcome) = self.wait_filled()?;
        match outcome {
            Ok(true) => {
                self.ready = Some(buffer);
                self.dispatch()?;
                Ok(self.ready.as_mut())
            }
            Ok(false) => {
                self.spare.push(buffer);
                self.exhausted = true;
                trace!(stage = %self.name, "end of pass");
                Ok(None)
            }
            Err(e) => {
                self.spare.push(buffer);
                Err(e.context(format!("stage '{}' failed to fill a buffer", self.name)))
            }
        }
    }

    /// Abandons the rest of the current pass and rewinds the producer.
    ///
    /// A fill that is still running is waited for and its result dropped.
    /// Filling for the new pass starts on the next call to `next()`.
    pub fn reset(&mut self) -> Result<()> {
        if let Some(consumed) = self.ready.take() {
            self.spare.push(consumed);
        }
        if self.in_flight {
            let (buffer, _) = self.wait_filled()?;
            self.spare.push(buffer);
        }

        self.send(Command::Reset)?;
        match self.reply_rx.recv() {
            Ok(Reply::Reset(result)) => {
                result.with_context(|| format!("stage '{}' failed to reset", self.name))?
            }
            Ok(Reply::Filled { .. }) => {
                bail!("stage '{}': fill reply received while resetting", self.name)
            }
            Err(_) => return Err(self.worker_gone()),
        }

        self.exhausted = false;
        Ok(())
    }

    fn dispatch(&mut self) -> Result<()> {
        let buffer = self.spare.pop().unwrap_or_default();
        self.send(Command::Fill(buffer))?;
        self.in_flight = true;
        Ok(())
    }

    fn send(&self, command: Command<F::Buffer>) -> Result<()> {
        let tx = self
            .command_tx
            .as_ref()
            .ok_or_else(|| anyhow!("stage '{}' is shut down", self.name))?;
        tx.send(command).map_err(|_| self.worker_gone())
    }

    fn wait_filled(&mut self) -> Result<(F::Buffer, Result<bool>)> {
        match self.reply_rx.recv() {
            Ok(Reply::Filled { buffer, outcome }) => {
                self.in_flight = false;
                Ok((buffer, outcome))
            }
            Ok(Reply::Reset(_)) => {
                bail!("stage '{}': reset reply received while filling", self.name)
            }
            Err(_) => {
                self.in_flight = false;
                Err(self.worker_gone())
            }
        }
    }

    fn worker_gone(&self) -> anyhow::Error {
        anyhow!("fill worker for stage '{}' terminated", self.name)
    }
}

impl<F: Fill> Drop for AsyncManager<F> {
    fn drop(&mut self) {
        // Closing the command channel ends the loop once the in-flight fill
        // (if any) has replied.
        self.command_tx.take();

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        debug!(stage = %self.name, "fill thread stopped");
    }
}

fn run_fill_loop<F: Fill>(
    mut filler: F,
    commands: Receiver<Command<F::Buffer>>,
    replies: Sender<Reply<F::Buffer>>,
) {
    while let Ok(command) = commands.recv() {
        let reply = match command {
            Command::Fill(mut buffer) => {
                let outcome = filler.fill(&mut buffer);
                Reply::Filled { buffer, outcome }
            }
            Command::Reset => Reply::Reset(filler.reset()),
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default, Debug)]
    struct Slot {
        id: Option<usize>,
        value: usize,
    }

    /// Produces 0..limit, tagging every buffer it sees with an id.
    struct Counter {
        next: usize,
        limit: usize,
        fills: Arc<AtomicUsize>,
        buffers_seen: usize,
        fail_at: Option<usize>,
    }

    impl Counter {
        fn new(limit: usize) -> Self {
            Self {
                next: 0,
                limit,
                fills: Arc::new(AtomicUsize::new(0)),
                buffers_seen: 0,
                fail_at: None,
            }
        }
    }

    impl Fill for Counter {
        type Buffer = Slot;

        fn fill(&mut self, buffer: &mut Slot) -> Result<bool> {
            self.fills.fetch_add(1, Ordering::SeqCst);
            if buffer.id.is_none() {
                buffer.id = Some(self.buffers_seen);
                self.buffers_seen += 1;
            }
            if self.next >= self.limit {
                return Ok(false);
            }
            let value = self.next;
            self.next += 1;
            if self.fail_at == Some(value) {
                bail!("value {} is cursed", value);
            }
            buffer.value = value;
            Ok(true)
        }

        fn reset(&mut self) -> Result<()> {
            self.next = 0;
            Ok(())
        }
    }

    fn drain(manager: &mut AsyncManager<Counter>) -> Result<Vec<usize>> {
        let mut values = Vec::new();
        while let Some(slot) = manager.next()? {
            values.push(slot.value);
        }
        Ok(values)
    }

    mod basic {
        use super::*;

        #[test]
        fn test_yields_in_order_then_none() -> Result<()> {
            let mut manager = AsyncManager::new("counter", Counter::new(5))?;
            assert_eq!(drain(&mut manager)?, vec![0, 1, 2, 3, 4]);
            assert!(manager.is_exhausted());
            assert!(manager.next()?.is_none());
            Ok(())
        }

        #[test]
        fn test_empty_source() -> Result<()> {
            let mut manager = AsyncManager::new("empty", Counter::new(0))?;
            assert!(manager.next()?.is_none());
            Ok(())
        }

        #[test]
        fn test_reset_starts_new_pass() -> Result<()> {
            let mut manager = AsyncManager::new("counter", Counter::new(3))?;
            assert_eq!(drain(&mut manager)?, vec![0, 1, 2]);
            manager.reset()?;
            assert_eq!(drain(&mut manager)?, vec![0, 1, 2]);
            Ok(())
        }

        #[test]
        fn test_reset_mid_pass() -> Result<()> {
            let mut manager = AsyncManager::new("counter", Counter::new(10))?;
            assert_eq!(manager.next()?.map(|s| s.value), Some(0));
            manager.reset()?;
            assert_eq!(drain(&mut manager)?, (0..10).collect::<Vec<_>>());
            Ok(())
        }
    }

    mod buffering {
        use super::*;

        #[test]
        fn test_only_two_buffers_circulate() -> Result<()> {
            let mut manager = AsyncManager::new("counter", Counter::new(50))?;
            while let Some(slot) = manager.next()? {
                assert!(matches!(slot.id, Some(0) | Some(1)));
            }
            Ok(())
        }

        #[test]
        fn test_next_fill_is_dispatched_before_return() -> Result<()> {
            let counter = Counter::new(10);
            let fills = counter.fills.clone();
            let mut manager = AsyncManager::new("counter", counter)?;

            assert_eq!(manager.next()?.map(|s| s.value), Some(0));
            // Dropping waits for the prefetch of item 1.
            drop(manager);
            assert_eq!(fills.load(Ordering::SeqCst), 2);
            Ok(())
        }
    }

    mod failures {
        use super::*;

        #[test]
        fn test_fill_error_is_returned_and_stage_continues() -> Result<()> {
            let mut counter = Counter::new(4);
            counter.fail_at = Some(1);
            let mut manager = AsyncManager::new("counter", counter)?;

            assert_eq!(manager.next()?.map(|s| s.value), Some(0));
            let err = manager.next().unwrap_err();
            let message = format!("{:#}", err);
            assert!(message.contains("cursed"), "{}", message);
            assert!(message.contains("counter"), "{}", message);

            assert_eq!(drain(&mut manager)?, vec![2, 3]);
            Ok(())
        }

        struct Panicking;

        impl Fill for Panicking {
            type Buffer = Vec<u8>;

            fn fill(&mut self, _buffer: &mut Vec<u8>) -> Result<bool> {
                panic!("fill exploded");
            }
        }

        #[test]
        fn test_dead_worker_is_an_error() -> Result<()> {
            let mut manager = AsyncManager::new("panicky", Panicking)?;
            let err = manager.next().unwrap_err();
            assert!(err.to_string().contains("terminated"));
            assert!(manager.next().is_err());
            Ok(())
        }
    }

    mod shutdown {
        use super::*;

        struct Slow;

        impl Fill for Slow {
            type Buffer = usize;

            fn fill(&mut self, buffer: &mut usize) -> Result<bool> {
                thread::sleep(Duration::from_millis(20));
                *buffer += 1;
                Ok(true)
            }
        }

        #[test]
        fn test_drop_with_fill_in_flight() -> Result<()> {
            let mut manager = AsyncManager::new("slow", Slow)?;
            assert!(manager.next()?.is_some());
            drop(manager);
            Ok(())
        }

        #[test]
        fn test_drop_before_first_next() -> Result<()> {
            let manager = AsyncManager::new("slow", Slow)?;
            drop(manager);
            Ok(())
        }
    }
}
