//! Cook Scheduling
//!
//! Each node owns a [`CookScheduler`] that decides, per request, whether to
//! serve the cached container, join a cook that is already running, or start
//! a new one.
//!
//! # Single flight
//!
//! A running cook is stored as a [`Shared`] future. Every request that
//! arrives while it is pending receives a clone and observes the same
//! result; the node logic runs once.
//!
//! # States
//!
//! The state is derived rather than stored:
//!
//! ```text
//! pending cook          -> Cooking
//! last cook failed      -> Errored
//! graph entity dirty    -> Dirty
//! otherwise             -> Clean
//! ```
//!
//! The dirty flag itself lives in the dependency graph. Whether a cook that
//! finished leaves the node clean is decided there (see
//! [`DependencyGraph::settle`](crate::graph::DependencyGraph::settle)).

use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::trace;

use super::container::Container;
use crate::error::CookError;

/// Result of a cook, shared by every caller that asked for it.
pub type CookResult = Result<Arc<Container>, CookError>;

type PendingCook = Shared<BoxFuture<'static, CookResult>>;

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookState {
    /// The cached container is up to date.
    Clean,
    /// Some input changed since the last successful cook.
    Dirty,
    /// A cook is running.
    Cooking,
    /// The last cook failed. The previous container, if any, is kept.
    Errored,
}

#[derive(Default)]
struct CookSlot {
    container: Option<Arc<Container>>,
    error: Option<CookError>,
    pending: Option<PendingCook>,
    cook_count: u64,
}

/// Per-node cook bookkeeping.
#[derive(Default)]
pub struct CookScheduler {
    slot: Mutex<CookSlot>,
}

impl CookScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, given the node's dirty flag.
    pub fn state(&self, dirty: bool) -> CookState {
        let slot = self.slot.lock();
        if slot.pending.is_some() {
            CookState::Cooking
        } else if slot.error.is_some() {
            CookState::Errored
        } else if dirty || slot.container.is_none() {
            CookState::Dirty
        } else {
            CookState::Clean
        }
    }

    /// Get the node's output.
    ///
    /// `start` is only called when a new cook is needed. The future it
    /// returns runs the node logic; the scheduler records its outcome before
    /// any caller observes it.
    pub fn request<F>(self: &Arc<Self>, dirty: bool, start: F) -> BoxFuture<'static, CookResult>
    where
        F: FnOnce() -> BoxFuture<'static, CookResult>,
    {
        let mut slot = self.slot.lock();

        if let Some(pending) = &slot.pending {
            trace!("joining running cook");
            return pending.clone().boxed();
        }

        if !dirty && slot.error.is_none() {
            if let Some(container) = &slot.container {
                return future::ready(Ok(Arc::clone(container))).boxed();
            }
        }

        let cook = start();
        let scheduler = Arc::clone(self);
        let pending = async move {
            let result = cook.await;
            scheduler.finish(&result);
            result
        }
        .boxed()
        .shared();

        slot.pending = Some(pending.clone());
        slot.cook_count += 1;
        pending.boxed()
    }

    fn finish(&self, result: &CookResult) {
        let mut slot = self.slot.lock();
        slot.pending = None;
        match result {
            Ok(container) => {
                slot.container = Some(Arc::clone(container));
                slot.error = None;
            }
            Err(err) => slot.error = Some(err.clone()),
        }
    }

    /// Forget the last error. Returns whether there was one.
    pub fn clear_error(&self) -> bool {
        self.slot.lock().error.take().is_some()
    }

    /// The last successfully cooked container.
    pub fn container(&self) -> Option<Arc<Container>> {
        self.slot.lock().container.clone()
    }

    pub fn error(&self) -> Option<CookError> {
        self.slot.lock().error.clone()
    }

    /// Number of cooks started so far.
    pub fn cook_count(&self) -> u64 {
        self.slot.lock().cook_count
    }
}
