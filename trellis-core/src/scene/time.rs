//! Time Controller
//!
//! The scene's clock. It owns one graph entity; expressions that use `$F` or
//! `$T` get an edge from it, so changing the frame dirties exactly the
//! time-dependent parameters and whatever reads them.

use parking_lot::Mutex;

use crate::graph::GraphId;

#[derive(Debug)]
pub(crate) struct TimeController {
    entity: GraphId,
    frames_per_second: f64,
    frame: Mutex<f64>,
}

impl TimeController {
    pub(crate) fn new(entity: GraphId, frames_per_second: f64) -> Self {
        Self {
            entity,
            frames_per_second,
            frame: Mutex::new(0.0),
        }
    }

    pub(crate) fn entity(&self) -> GraphId {
        self.entity
    }

    pub(crate) fn frame(&self) -> f64 {
        *self.frame.lock()
    }

    /// Current time in seconds.
    pub(crate) fn seconds(&self) -> f64 {
        self.frame() / self.frames_per_second
    }

    /// Store a new frame. Returns whether it differs from the current one.
    pub(crate) fn set_frame(&self, frame: f64) -> bool {
        let mut current = self.frame.lock();
        if *current == frame {
            return false;
        }
        *current = frame;
        true
    }
}
