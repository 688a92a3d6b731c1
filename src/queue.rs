//! Async result queue
//!
//! Background walks push finished items through a [`QueueProducer`]; the
//! owning context pops them on its own thread. While items are pending the
//! readiness descriptor (Unix) is readable, so the queue can sit in a
//! caller's `poll`/`select` loop next to its other descriptors.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::models::ScanEvent;

#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};
#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Readable-when-pending descriptor backed by a socket pair
#[cfg(unix)]
#[derive(Debug)]
struct Signal {
    pair: Option<(UnixStream, UnixStream)>,
}

#[cfg(unix)]
impl Signal {
    fn new() -> Self {
        let pair = UnixStream::pair().and_then(|(reader, writer)| {
            reader.set_nonblocking(true)?;
            writer.set_nonblocking(true)?;
            Ok((reader, writer))
        });
        match pair {
            Ok(pair) => Self { pair: Some(pair) },
            Err(e) => {
                warn!("Readiness descriptor unavailable, use wait_ready instead: {}", e);
                Self { pair: None }
            }
        }
    }

    fn raise(&self) {
        use std::io::Write;
        if let Some((_, writer)) = &self.pair {
            // A full buffer already reads as ready.
            let _ = (&*writer).write(&[1u8]);
        }
    }

    fn clear(&self) {
        use std::io::Read;
        if let Some((reader, _)) = &self.pair {
            let mut buf = [0u8; 64];
            while let Ok(n) = (&*reader).read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
        }
    }

    fn fd(&self) -> Option<RawFd> {
        self.pair.as_ref().map(|(reader, _)| reader.as_raw_fd())
    }
}

#[cfg(not(unix))]
#[derive(Debug)]
struct Signal;

#[cfg(not(unix))]
impl Signal {
    fn new() -> Self {
        Signal
    }

    fn raise(&self) {}

    fn clear(&self) {}
}

/// Sending half handed to background workers
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: Sender<ScanEvent>,
    signal: Arc<Signal>,
    cancelled: Arc<AtomicBool>,
}

impl QueueProducer {
    /// Enqueue an item; returns false once the queue has been cancelled
    pub fn push(&self, event: ScanEvent) -> bool {
        if self.is_cancelled() {
            return false;
        }
        if self.tx.send(event).is_err() {
            return false;
        }
        self.signal.raise();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Flag shared by everything feeding this queue
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }
}

/// Single-consumer queue of completed items
#[derive(Debug)]
pub struct AsyncQueue {
    tx: Sender<ScanEvent>,
    rx: Receiver<ScanEvent>,
    peeked: Option<ScanEvent>,
    signal: Arc<Signal>,
    cancelled: Arc<AtomicBool>,
}

impl Default for AsyncQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            peeked: None,
            signal: Arc::new(Signal::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn producer(&self) -> QueueProducer {
        QueueProducer {
            tx: self.tx.clone(),
            signal: Arc::clone(&self.signal),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Number of pending items
    pub fn len(&self) -> usize {
        self.rx.len() + usize::from(self.peeked.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when at least one item is pending
    pub fn is_ready(&self) -> bool {
        !self.is_empty()
    }

    /// Remove the oldest item
    pub fn pop(&mut self) -> Option<ScanEvent> {
        self.signal.clear();
        let item = self.peeked.take().or_else(|| self.rx.try_recv().ok());
        if !self.rx.is_empty() {
            self.signal.raise();
        }
        item
    }

    /// Block until an item is pending or `timeout` passes
    pub fn wait_ready(&mut self, timeout: Duration) -> bool {
        if self.is_ready() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                self.peeked = Some(event);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Stop accepting items and discard everything pending
    pub fn cancel(&mut self) -> usize {
        self.cancelled.store(true, Ordering::SeqCst);
        let mut discarded = usize::from(self.peeked.take().is_some());
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        self.signal.clear();
        discarded
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Descriptor that polls readable while items are pending
    #[cfg(unix)]
    pub fn readiness_fd(&self) -> Option<RawFd> {
        self.signal.fd()
    }
}

/// Counts background jobs so teardown can wait for them
#[derive(Debug, Clone, Default)]
pub struct WorkTracker {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

/// Decrements the tracker when dropped
#[derive(Debug)]
pub struct WorkGuard {
    inner: Arc<(Mutex<usize>, Condvar)>,
}

impl WorkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one job
    pub fn enter(&self) -> WorkGuard {
        let (count, _) = &*self.inner;
        *count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        WorkGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn active(&self) -> usize {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until no job is running; `None` waits forever
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let (count, cvar) = &*self.inner;
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut active = count.lock().unwrap_or_else(PoisonError::into_inner);
        while *active > 0 {
            match deadline {
                None => {
                    active = cvar.wait(active).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    active = cvar
                        .wait_timeout(active, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        true
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        let (count, cvar) = &*self.inner;
        let mut active = count.lock().unwrap_or_else(PoisonError::into_inner);
        *active = active.saturating_sub(1);
        cvar.notify_all();
    }
}
