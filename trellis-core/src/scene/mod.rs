//! Scene
//!
//! A [`Scene`] is the explicit context every engine operation runs against.
//! It owns:
//!
//! - the [`DependencyGraph`] holding dirty flags and edges,
//! - the node and parameter registries,
//! - the path index expressions resolve against,
//! - the time controller.
//!
//! Scenes are cheap to clone; clones share the same state. Nothing is
//! global, so independent scenes never observe each other.
//!
//! # Example
//!
//! ```rust,ignore
//! let scene = Scene::new(EngineConfig::default());
//! let grid = scene.add_node("grid", Grid)?;
//! let copy = scene.add_node("copy", Copy)?;
//! scene.connect(copy, 0, grid)?;
//! scene.set_expression(copy, "count", "count(0) * 2")?;
//!
//! let container = scene.compute(copy).await?;
//! ```

mod cook;
mod param;
pub(crate) mod path;
mod time;
mod wiring;

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{self, BoxFuture, FutureExt};
use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::debug;

use crate::config::EngineConfig;
use crate::cook::{
    Capability, Container, CookResult, CookScheduler, CookState, InputSpec, Operator, ParamSlot,
};
use crate::error::{CookError, EvalError, ParamError, ResolveError, SceneError};
use crate::expr::SymbolTable;
use crate::graph::{DependencyGraph, EntityKind, GraphId, NodeId, ParamId};
use crate::value::Value;

pub use param::ParamInput;
pub use path::{is_valid_name, resolve_path};

use param::ParamCore;
use path::{child_path, PathIndex};
use time::TimeController;

/// Name and position of a node in the hierarchy.
#[derive(Debug, Clone)]
struct Placement {
    name: String,
    parent: Option<NodeId>,
}

/// Everything the scene knows about one node.
pub(crate) struct NodeCore {
    id: NodeId,
    placement: RwLock<Placement>,
    operator: Arc<dyn Operator>,
    capabilities: Vec<Arc<dyn Capability>>,
    input_spec: InputSpec,
    /// Upstream node per input slot; always `input_spec.max` long.
    inputs: Mutex<SmallVec<[Option<NodeId>; 4]>>,
    params: IndexMap<String, ParamId>,
    children: Mutex<IndexSet<NodeId>>,
    scheduler: Arc<CookScheduler>,
}

pub(crate) struct SceneInner {
    config: EngineConfig,
    graph: Mutex<DependencyGraph>,
    nodes: DashMap<NodeId, Arc<NodeCore>>,
    params: DashMap<ParamId, Arc<ParamCore>>,
    paths: RwLock<PathIndex>,
    time: TimeController,
}

/// A procedural scene: nodes, their parameters and the dependencies between
/// them.
#[derive(Clone)]
pub struct Scene {
    inner: Arc<SceneInner>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Scene {
    pub fn new(config: EngineConfig) -> Self {
        let mut graph = DependencyGraph::new(config.propagation);
        let time = TimeController::new(graph.add_entity(EntityKind::Time), config.frames_per_second);

        Self {
            inner: Arc::new(SceneInner {
                config,
                graph: Mutex::new(graph),
                nodes: DashMap::new(),
                params: DashMap::new(),
                paths: RwLock::new(PathIndex::new()),
                time,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Add a top-level node.
    pub fn add_node(&self, name: &str, operator: impl Operator) -> Result<NodeId, SceneError> {
        self.builder(name, operator).build()
    }

    /// Add a node inside `parent`'s sub-network.
    pub fn add_child(
        &self,
        parent: NodeId,
        name: &str,
        operator: impl Operator,
    ) -> Result<NodeId, SceneError> {
        self.builder(name, operator).parent(parent).build()
    }

    /// Start building a node with capabilities or a parent.
    pub fn builder(&self, name: &str, operator: impl Operator) -> NodeBuilder<'_> {
        NodeBuilder {
            scene: self,
            name: name.to_owned(),
            parent: None,
            operator: Arc::new(operator),
            capabilities: Vec::new(),
        }
    }

    fn insert(&self, builder: NodeBuilder<'_>) -> Result<NodeId, SceneError> {
        let inner = &self.inner;
        let NodeBuilder {
            name,
            parent,
            operator,
            capabilities,
            ..
        } = builder;

        if !is_valid_name(&name) {
            return Err(SceneError::InvalidName(name));
        }
        let parent_path = match parent {
            Some(parent) => Some(
                inner
                    .paths
                    .read()
                    .path_of(parent)
                    .map(str::to_owned)
                    .ok_or(SceneError::UnknownNode(parent))?,
            ),
            None => None,
        };
        let path = child_path(parent_path.as_deref(), &name);
        if inner.paths.read().find(&path).is_some() {
            return Err(SceneError::DuplicateName(path));
        }

        let mut specs = operator.params();
        for capability in &capabilities {
            specs.extend(capability.params());
        }
        let mut seen = IndexSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(SceneError::DuplicateParam(spec.name.clone()));
            }
        }

        let (id, param_ids) = {
            let mut graph = inner.graph.lock();
            let id = NodeId::new(graph.add_entity(EntityKind::Node));
            let mut param_ids = Vec::with_capacity(specs.len());
            for _ in &specs {
                let param = ParamId::new(graph.add_entity(EntityKind::Param));
                graph.add_edge(param.graph_id(), id.graph_id())?;
                param_ids.push(param);
            }
            (id, param_ids)
        };

        let mut params = IndexMap::with_capacity(specs.len());
        for (spec, param) in specs.into_iter().zip(param_ids) {
            params.insert(spec.name.clone(), param);
            inner
                .params
                .insert(param, Arc::new(ParamCore::new(param, id, spec)));
        }

        let input_spec = operator.inputs();
        let core = NodeCore {
            id,
            placement: RwLock::new(Placement {
                name,
                parent,
            }),
            input_spec,
            inputs: Mutex::new(SmallVec::from_elem(None, input_spec.max)),
            operator,
            capabilities,
            params,
            children: Mutex::new(IndexSet::new()),
            scheduler: Arc::new(CookScheduler::new()),
        };

        debug!(node = %id, path = %path, operator = core.operator.type_name(), "node added");
        inner.nodes.insert(id, Arc::new(core));
        inner.paths.write().insert(path, id);
        if let Some(parent) = parent.and_then(|p| inner.node(p)) {
            parent.children.lock().insert(id);
        }

        inner.refresh_expressions();
        Ok(id)
    }

    /// Remove a node, its sub-network and all of their edges.
    ///
    /// Downstream input slots pointing at the node are disconnected and
    /// everything that depended on it is dirtied. A cook of the node that is
    /// still running completes, but its result is dropped.
    pub fn remove_node(&self, id: NodeId) -> Result<(), SceneError> {
        let inner = &self.inner;
        let core = inner.node(id).ok_or(SceneError::UnknownNode(id))?;

        let mut doomed = Vec::new();
        inner.collect_subtree(&core, &mut doomed);

        let reached = {
            let mut graph = inner.graph.lock();
            let mut reached = Vec::new();
            for node in &doomed {
                reached.extend(graph.set_dirty(node.id.graph_id()));
            }
            for node in &doomed {
                for param in node.params.values() {
                    graph.remove_entity(param.graph_id());
                }
                graph.remove_entity(node.id.graph_id());
            }
            reached
        };

        for node in &doomed {
            for param in node.params.values() {
                inner.params.remove(param);
            }
            inner.nodes.remove(&node.id);
            inner.paths.write().remove(node.id);
        }

        let removed: IndexSet<NodeId> = doomed.iter().map(|n| n.id).collect();
        for entry in inner.nodes.iter() {
            let mut inputs = entry.value().inputs.lock();
            for slot in inputs.iter_mut() {
                if slot.is_some_and(|up| removed.contains(&up)) {
                    *slot = None;
                }
            }
        }
        if let Some(parent) = core.placement.read().parent.and_then(|p| inner.node(p)) {
            parent.children.lock().shift_remove(&id);
        }

        debug!(node = %id, removed = doomed.len(), "node removed");
        inner.apply_reached(reached);
        inner.refresh_expressions();
        Ok(())
    }

    /// Rename a node. Every expression is resolved again, since relative
    /// and absolute paths may now point somewhere else.
    pub fn rename_node(&self, id: NodeId, name: &str) -> Result<(), SceneError> {
        let inner = &self.inner;
        let core = inner.node(id).ok_or(SceneError::UnknownNode(id))?;
        if !is_valid_name(name) {
            return Err(SceneError::InvalidName(name.to_owned()));
        }

        let parent = core.placement.read().parent;
        let parent_path = parent.and_then(|p| inner.paths.read().path_of(p).map(str::to_owned));
        let path = child_path(parent_path.as_deref(), name);
        match inner.paths.read().find(&path) {
            Some(existing) if existing == id => return Ok(()),
            Some(_) => return Err(SceneError::DuplicateName(path)),
            None => {}
        }

        core.placement.write().name = name.to_owned();
        inner.rebuild_paths();
        debug!(node = %id, path = %path, "node renamed");
        inner.refresh_expressions();
        Ok(())
    }

    /// Connect `upstream`'s output to input slot `index` of `downstream`.
    ///
    /// Replaces whatever was connected to the slot before.
    pub fn connect(
        &self,
        downstream: NodeId,
        index: usize,
        upstream: NodeId,
    ) -> Result<(), SceneError> {
        let inner = &self.inner;
        let down = inner.node(downstream).ok_or(SceneError::UnknownNode(downstream))?;
        inner.node(upstream).ok_or(SceneError::UnknownNode(upstream))?;
        if index >= down.input_spec.max {
            return Err(SceneError::InputOutOfRange {
                index,
                max: down.input_spec.max,
            });
        }

        let previous = down.inputs.lock()[index];
        if previous == Some(upstream) {
            return Ok(());
        }

        let reached = {
            let mut graph = inner.graph.lock();
            graph.add_edge(upstream.graph_id(), downstream.graph_id())?;
            let mut inputs = down.inputs.lock();
            inputs[index] = Some(upstream);
            if let Some(old) = previous {
                if !inputs.contains(&Some(old)) {
                    graph.remove_edge(old.graph_id(), downstream.graph_id());
                }
            }
            drop(inputs);
            graph.set_dirty(downstream.graph_id())
        };

        debug!(%downstream, index, %upstream, "input connected");
        inner.apply_reached(reached);
        inner.refresh_expressions();
        Ok(())
    }

    /// Clear input slot `index` of `downstream`.
    pub fn disconnect(&self, downstream: NodeId, index: usize) -> Result<(), SceneError> {
        let inner = &self.inner;
        let down = inner.node(downstream).ok_or(SceneError::UnknownNode(downstream))?;
        if index >= down.input_spec.max {
            return Err(SceneError::InputOutOfRange {
                index,
                max: down.input_spec.max,
            });
        }

        let reached = {
            let mut graph = inner.graph.lock();
            let mut inputs = down.inputs.lock();
            let Some(old) = inputs[index].take() else {
                return Ok(());
            };
            if !inputs.contains(&Some(old)) {
                graph.remove_edge(old.graph_id(), downstream.graph_id());
            }
            drop(inputs);
            graph.set_dirty(downstream.graph_id())
        };

        debug!(%downstream, index, "input disconnected");
        inner.apply_reached(reached);
        inner.refresh_expressions();
        Ok(())
    }

    /// Upstream node connected to an input slot.
    pub fn input(&self, node: NodeId, index: usize) -> Option<NodeId> {
        self.inner.input(node, index)
    }

    pub fn node_path(&self, id: NodeId) -> Option<String> {
        self.inner.node_path(id)
    }

    pub fn find_node(&self, path: &str) -> Option<NodeId> {
        self.inner.find_node(path)
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    // ------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------

    /// Set a parameter to a literal value.
    ///
    /// The value is converted to the parameter's kind; a value that cannot
    /// be converted is rejected.
    pub fn set_param(
        &self,
        node: NodeId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), SceneError> {
        let param = self.inner.param(node, name)?;
        let value = param
            .kind()
            .coerce(value.into())
            .map_err(|source| SceneError::InvalidLiteral {
                name: name.to_owned(),
                source,
            })?;

        if param.set_literal(value) {
            self.inner.rewire(&param);
            self.inner.dirty_param(&param);
        }
        Ok(())
    }

    /// Set a parameter to an expression.
    ///
    /// Parse and resolution failures are not returned; they are recorded in
    /// the parameter's error slot (see [`Scene::param_error`]) and surface
    /// again when the parameter is evaluated.
    pub fn set_expression(&self, node: NodeId, name: &str, text: &str) -> Result<(), SceneError> {
        let param = self.inner.param(node, name)?;
        if param.set_expression(text) {
            self.inner.rewire(&param);
            self.inner.dirty_param(&param);
        }
        Ok(())
    }

    /// Set a parameter from raw text, deciding between literal and
    /// expression from the parameter's kind.
    ///
    /// Numeric kinds take anything that parses as a number as a literal;
    /// booleans take `true`, `false`, `1` and `0`; text is a literal unless
    /// it contains a backtick.
    pub fn set_raw(&self, node: NodeId, name: &str, text: &str) -> Result<(), SceneError> {
        let param = self.inner.param(node, name)?;
        match param.kind().parse_literal(text) {
            Some(value) => self.set_param(node, name, value),
            None => self.set_expression(node, name, text),
        }
    }

    pub fn param_input(&self, node: NodeId, name: &str) -> Result<ParamInput, SceneError> {
        Ok(self.inner.param(node, name)?.state.lock().input.clone())
    }

    pub fn has_expression(&self, node: NodeId, name: &str) -> Result<bool, SceneError> {
        Ok(self.inner.param(node, name)?.has_expression())
    }

    /// Last successfully computed value of a parameter.
    ///
    /// This does not evaluate anything; see [`Scene::evaluate_param`].
    pub fn param_value(&self, node: NodeId, name: &str) -> Result<Value, SceneError> {
        Ok(self.inner.param(node, name)?.state.lock().value.clone())
    }

    pub fn param_error(&self, node: NodeId, name: &str) -> Result<Option<ParamError>, SceneError> {
        Ok(self.inner.param(node, name)?.state.lock().error.clone())
    }

    /// Evaluate a parameter against the current scene, cooking referenced
    /// nodes as needed.
    pub fn evaluate_param(
        &self,
        node: NodeId,
        name: &str,
    ) -> BoxFuture<'static, Result<Value, ParamError>> {
        let param = match self.inner.param(node, name) {
            Ok(param) => param,
            Err(_) => {
                let err = ResolveError::ParamNotFound(name.to_owned());
                return future::ready(Err(err.into())).boxed();
            }
        };
        let evaluation = Arc::clone(&self.inner).evaluate_param(param.id, 0);
        async move {
            match evaluation.await? {
                ParamSlot::Value(value) => Ok(value),
                ParamSlot::PerElement(_) => Err(EvalError::ElementContext.into()),
            }
        }
        .boxed()
    }

    // ------------------------------------------------------------------
    // Cooking
    // ------------------------------------------------------------------

    /// Mark a node dirty, along with everything downstream of it.
    pub fn set_dirty(&self, node: NodeId) -> Result<(), SceneError> {
        self.inner.node(node).ok_or(SceneError::UnknownNode(node))?;
        let reached = self.inner.graph.lock().set_dirty(node.graph_id());
        self.inner.apply_reached(reached);
        Ok(())
    }

    /// Get the node's output, cooking it and its dirty predecessors first if
    /// needed.
    ///
    /// Concurrent calls while a cook is running share that cook.
    pub fn compute(&self, node: NodeId) -> BoxFuture<'static, CookResult> {
        Arc::clone(&self.inner).compute(node)
    }

    pub fn cook_state(&self, node: NodeId) -> Result<CookState, SceneError> {
        let core = self.inner.node(node).ok_or(SceneError::UnknownNode(node))?;
        let dirty = self.inner.graph.lock().is_dirty(node.graph_id());
        Ok(core.scheduler.state(dirty))
    }

    /// Last good container, kept even while the node is errored.
    pub fn container(&self, node: NodeId) -> Result<Option<Arc<Container>>, SceneError> {
        let core = self.inner.node(node).ok_or(SceneError::UnknownNode(node))?;
        Ok(core.scheduler.container())
    }

    pub fn error(&self, node: NodeId) -> Result<Option<CookError>, SceneError> {
        let core = self.inner.node(node).ok_or(SceneError::UnknownNode(node))?;
        Ok(core.scheduler.error())
    }

    /// How many times the node's logic has been started.
    pub fn cook_count(&self, node: NodeId) -> Result<u64, SceneError> {
        let core = self.inner.node(node).ok_or(SceneError::UnknownNode(node))?;
        Ok(core.scheduler.cook_count())
    }

    // ------------------------------------------------------------------
    // Batching and time
    // ------------------------------------------------------------------

    /// Suspend propagation. Dirty flags are still set, but successors are
    /// only walked at the matching outermost [`Scene::unblock`].
    pub fn block(&self) {
        self.inner.graph.lock().block();
    }

    pub fn unblock(&self) {
        let reached = self.inner.graph.lock().unblock();
        self.inner.apply_reached(reached);
    }

    /// Block propagation until the returned guard is dropped.
    pub fn batch(&self) -> BlockGuard {
        self.block();
        BlockGuard {
            scene: self.clone(),
        }
    }

    pub fn frame(&self) -> f64 {
        self.inner.time.frame()
    }

    /// Current time in seconds, derived from the frame rate.
    pub fn seconds(&self) -> f64 {
        self.inner.time.seconds()
    }

    /// Move the clock.
    ///
    /// Every time-dependent parameter and everything downstream of it is
    /// dirtied in one propagation pass.
    pub fn set_frame(&self, frame: f64) {
        if !self.inner.time.set_frame(frame) {
            return;
        }
        let entity = self.inner.time.entity();
        {
            let _batch = self.batch();
            self.inner.graph.lock().set_dirty(entity);
        }
        self.inner.graph.lock().remove_dirty_state(entity);
        debug!(frame, "frame changed");
    }
}

/// Keeps a scene blocked; unblocks when dropped.
#[must_use = "propagation resumes as soon as the guard is dropped"]
pub struct BlockGuard {
    scene: Scene,
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        self.scene.unblock();
    }
}

/// Builder for nodes that need a parent or capabilities.
#[must_use = "call build() to add the node"]
pub struct NodeBuilder<'a> {
    scene: &'a Scene,
    name: String,
    parent: Option<NodeId>,
    operator: Arc<dyn Operator>,
    capabilities: Vec<Arc<dyn Capability>>,
}

impl NodeBuilder<'_> {
    pub fn parent(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Attach a capability. Capabilities run in the order they are added.
    pub fn capability(mut self, capability: impl Capability) -> Self {
        self.capabilities.push(Arc::new(capability));
        self
    }

    pub fn build(self) -> Result<NodeId, SceneError> {
        self.scene.insert(self)
    }
}

impl SceneInner {
    fn node(&self, id: NodeId) -> Option<Arc<NodeCore>> {
        self.nodes.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn param(&self, node: NodeId, name: &str) -> Result<Arc<ParamCore>, SceneError> {
        let core = self.node(node).ok_or(SceneError::UnknownNode(node))?;
        core.params
            .get(name)
            .and_then(|id| self.params.get(id).map(|entry| Arc::clone(entry.value())))
            .ok_or_else(|| SceneError::UnknownParam {
                node,
                name: name.to_owned(),
            })
    }

    /// Dirty a parameter after its input changed.
    fn dirty_param(&self, param: &ParamCore) {
        let reached = self.graph.lock().set_dirty(param.id.graph_id());
        self.apply_reached(reached);
    }

    /// Bookkeeping for entities reached by a dirtying pass: a dirtied node
    /// leaves the errored state.
    fn apply_reached(&self, reached: Vec<GraphId>) {
        for id in reached {
            if let Some(node) = self.node(NodeId::new(id)) {
                node.scheduler.clear_error();
            }
        }
    }

    fn collect_subtree(&self, core: &Arc<NodeCore>, out: &mut Vec<Arc<NodeCore>>) {
        let children: Vec<NodeId> = core.children.lock().iter().copied().collect();
        for child in children.into_iter().filter_map(|c| self.node(c)) {
            self.collect_subtree(&child, out);
        }
        out.push(Arc::clone(core));
    }

    /// Absolute path of a node, computed from its placement chain.
    fn placement_path(&self, id: NodeId) -> Option<String> {
        let placement = self.node(id)?.placement.read().clone();
        let parent = match placement.parent {
            Some(parent) => Some(self.placement_path(parent)?),
            None => None,
        };
        Some(child_path(parent.as_deref(), &placement.name))
    }

    fn rebuild_paths(&self) {
        let ids: Vec<NodeId> = self.nodes.iter().map(|entry| *entry.key()).collect();
        let entries: Vec<(String, NodeId)> = ids
            .into_iter()
            .filter_map(|id| self.placement_path(id).map(|path| (path, id)))
            .collect();
        self.paths.write().rebuild(entries);
    }
}

impl SymbolTable for SceneInner {
    fn node_path(&self, node: NodeId) -> Option<String> {
        self.paths.read().path_of(node).map(str::to_owned)
    }

    fn find_node(&self, path: &str) -> Option<NodeId> {
        self.paths.read().find(path)
    }

    fn find_param(&self, node: NodeId, name: &str) -> Option<ParamId> {
        self.node(node)?.params.get(name).copied()
    }

    fn input_slots(&self, node: NodeId) -> usize {
        self.node(node).map_or(0, |core| core.input_spec.max)
    }

    fn input(&self, node: NodeId, index: usize) -> Option<NodeId> {
        self.node(node)?.inputs.lock().get(index).copied().flatten()
    }
}
