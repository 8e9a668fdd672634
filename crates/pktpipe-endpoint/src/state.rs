//! State shared between an endpoint's handles and its threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use pktpipe_packet::Splitter;
use pktpipe_transport::{CancellationToken, IpcStream};
use tracing::debug;

use crate::config::{AtomicRunState, EndpointConfig, Role, RunState};
use crate::error::Result;
use crate::handshake::PipePair;

/// The live connection, as seen by the writer and by `stop()`.
#[derive(Debug, Default)]
struct LinkSlot {
    /// Bumped every time a new connection is published.
    generation: u64,
    outbound: Option<IpcStream>,
    inbound: Option<IpcStream>,
}

impl LinkSlot {
    fn close(&mut self) {
        for stream in [self.outbound.take(), self.inbound.take()].into_iter().flatten() {
            let _ = stream.shutdown();
        }
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) id: String,
    pub(crate) role: Role,
    pub(crate) config: EndpointConfig,
    pub(crate) state: AtomicRunState,
    pub(crate) cancel: CancellationToken,
    pub(crate) pending: AtomicUsize,
    pub(crate) splitter: Splitter,
    link: Mutex<LinkSlot>,
    link_changed: Condvar,
}

impl Shared {
    pub(crate) fn new(id: String, role: Role, config: EndpointConfig) -> Self {
        Self {
            id,
            role,
            config,
            state: AtomicRunState::new(RunState::Starting),
            cancel: CancellationToken::new(),
            pending: AtomicUsize::new(0),
            splitter: Splitter::new(),
            link: Mutex::new(LinkSlot::default()),
            link_changed: Condvar::new(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, LinkSlot> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand clones of a fresh connection to the writer. Returns its generation.
    pub(crate) fn publish_link(&self, pair: &PipePair) -> Result<u64> {
        let outbound = pair.outbound.try_clone()?;
        let inbound = pair.inbound.try_clone()?;

        let mut slot = self.slot();
        slot.close();
        slot.generation += 1;
        slot.outbound = Some(outbound);
        slot.inbound = Some(inbound);
        let generation = slot.generation;
        drop(slot);

        self.link_changed.notify_all();
        Ok(generation)
    }

    /// Shut the current connection down. Safe to call repeatedly.
    pub(crate) fn close_link(&self) {
        self.slot().close();
        self.link_changed.notify_all();
    }

    pub(crate) fn is_current_link(&self, generation: u64) -> bool {
        let slot = self.slot();
        slot.generation == generation && slot.outbound.is_some()
    }

    /// Block until a connection newer than `after` is up.
    ///
    /// Returns `None` once the endpoint is stopping.
    pub(crate) fn wait_for_link(&self, after: u64) -> Option<(u64, IpcStream)> {
        let mut slot = self.slot();
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            if slot.generation > after {
                if let Some(outbound) = &slot.outbound {
                    match outbound.try_clone() {
                        Ok(stream) => return Some((slot.generation, stream)),
                        Err(err) => debug!(%err, "could not clone outbound stream"),
                    }
                }
            }
            slot = self
                .link_changed
                .wait_timeout(slot, self.config.poll_interval)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Count `n` queued packets as done. Saturates at zero, since the writer
    /// resets the count on exit while a late `send` may still be backing out.
    pub(crate) fn release_pending(&self, n: usize) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(n))
            });
    }

    /// Request shutdown and unblock every thread waiting on the connection.
    pub(crate) fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!(id = %self.id, role = %self.role, "stop requested");
        }
        self.cancel.cancel();
        self.close_link();
    }

    /// Sleep for `total` unless shutdown comes first. Returns false if cancelled.
    pub(crate) fn pause(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(self.config.poll_interval.min(deadline - now));
        }
    }
}
