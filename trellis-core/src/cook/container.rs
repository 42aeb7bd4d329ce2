//! Containers
//!
//! A [`Container`] is the immutable result of one cook. Derived properties
//! such as bounds are computed on first access and memoized for the
//! container's lifetime. A new cook produces a new container; nobody mutates
//! an existing one.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// The payload of a container: whatever a node produces.
pub trait Payload: Send + Sync + fmt::Debug + 'static {
    /// Number of elements (points, instances, entries...).
    fn element_count(&self) -> usize;

    /// Element positions, if the payload is spatial.
    fn positions(&self) -> &[[f64; 3]] {
        &[]
    }

    fn as_any(&self) -> &dyn Any;
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Bounds {
    /// Smallest box containing all positions, or `None` when empty.
    pub fn from_positions(positions: &[[f64; 3]]) -> Option<Self> {
        let (first, rest) = positions.split_first()?;
        let mut bounds = Bounds {
            min: *first,
            max: *first,
        };
        for p in rest {
            for axis in 0..3 {
                bounds.min[axis] = bounds.min[axis].min(p[axis]);
                bounds.max[axis] = bounds.max[axis].max(p[axis]);
            }
        }
        Some(bounds)
    }

    pub fn size(&self) -> [f64; 3] {
        [0, 1, 2].map(|axis| self.max[axis] - self.min[axis])
    }

    pub fn center(&self) -> [f64; 3] {
        [0, 1, 2].map(|axis| (self.max[axis] + self.min[axis]) * 0.5)
    }

    /// Look up a component by name, e.g. `min_x`, `size_y`, `center_z`.
    pub fn component(&self, name: &str) -> Option<f64> {
        let (vector, axis) = name.split_once('_')?;
        let axis = match axis {
            "x" => 0,
            "y" => 1,
            "z" => 2,
            _ => return None,
        };
        let vector = match vector {
            "min" => self.min,
            "max" => self.max,
            "size" => self.size(),
            "center" => self.center(),
            _ => return None,
        };
        Some(vector[axis])
    }
}

/// Immutable snapshot of a node's output.
pub struct Container {
    payload: Arc<dyn Payload>,
    bounds: OnceLock<Option<Bounds>>,
}

impl Container {
    pub fn new<P: Payload>(payload: P) -> Self {
        Self::from_arc(Arc::new(payload))
    }

    /// Wrap a payload shared with another container.
    pub fn from_arc(payload: Arc<dyn Payload>) -> Self {
        Self {
            payload,
            bounds: OnceLock::new(),
        }
    }

    pub fn payload(&self) -> &Arc<dyn Payload> {
        &self.payload
    }

    /// Downcast the payload to a concrete type.
    pub fn downcast_ref<T: Payload>(&self) -> Option<&T> {
        self.payload.as_any().downcast_ref::<T>()
    }

    pub fn element_count(&self) -> usize {
        self.payload.element_count()
    }

    /// Bounds of the payload's positions, memoized.
    pub fn bounds(&self) -> Option<Bounds> {
        *self
            .bounds
            .get_or_init(|| Bounds::from_positions(self.payload.positions()))
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("payload", &self.payload)
            .field("bounds_cached", &self.bounds.get().is_some())
            .finish()
    }
}

/// A plain point cloud.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Points {
    positions: Vec<[f64; 3]>,
}

impl Points {
    pub fn new(positions: Vec<[f64; 3]>) -> Self {
        Self { positions }
    }

    pub fn into_positions(self) -> Vec<[f64; 3]> {
        self.positions
    }
}

impl Payload for Points {
    fn element_count(&self) -> usize {
        self.positions.len()
    }

    fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
