//! Cooking and Parameter Evaluation
//!
//! The asynchronous half of the scene. A cook computes every connected
//! input, evaluates every parameter (which in turn may cook nodes that
//! expressions reference), runs the operator and then its capabilities.
//!
//! Locks are only taken between suspension points; nothing is held across an
//! `.await`.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, warn};

use super::param::{ParamCore, ParamInput};
use super::{NodeCore, SceneInner};
use crate::cook::{CookContext, CookResult, InputState, ParamSlot};
use crate::error::{CookError, EvalError, ParamError, ResolveError};
use crate::expr::{self, Env, Program, RefValue, Resolved, SymbolTable};
use crate::graph::{NodeId, ParamId, Snapshot};

impl SceneInner {
    /// Get a node's output through its scheduler.
    pub(super) fn compute(self: Arc<Self>, id: NodeId) -> BoxFuture<'static, CookResult> {
        let Some(core) = self.node(id) else {
            return future::ready(Err(CookError::NodeRemoved)).boxed();
        };

        let dirty = self.graph.lock().is_dirty(id.graph_id());

        let scheduler = Arc::clone(&core.scheduler);
        scheduler.request(dirty, move || {
            let started = self.graph.lock().snapshot(id.graph_id());
            self.cook(core, started).boxed()
        })
    }

    async fn cook(self: Arc<Self>, core: Arc<NodeCore>, started: Snapshot) -> CookResult {
        let path = self
            .node_path(core.id)
            .unwrap_or_else(|| core.id.to_string());
        debug!(node = %path, operator = core.operator.type_name(), "cook started");

        let result = self.run_cook(&core, &path).await;
        match &result {
            Ok(container) => {
                let clean = self.graph.lock().settle(core.id.graph_id(), &started);
                debug!(
                    node = %path,
                    elements = container.element_count(),
                    clean,
                    "cook finished"
                );
            }
            Err(err) => warn!(node = %path, error = %err, "cook failed"),
        }
        result
    }

    async fn run_cook(self: &Arc<Self>, core: &NodeCore, path: &str) -> CookResult {
        let upstream = core.inputs.lock().clone();
        let mut inputs = SmallVec::with_capacity(upstream.len());
        for slot in upstream {
            inputs.push(match slot {
                None => InputState::Disconnected,
                Some(node) => match Arc::clone(self).compute(node).await {
                    Ok(container) => InputState::Ready(container),
                    Err(err) => InputState::Failed(err),
                },
            });
        }

        let missing = (0..core.input_spec.required)
            .find(|index| matches!(inputs.get(*index), None | Some(InputState::Disconnected)));
        if let Some(index) = missing {
            return Err(CookError::MissingInput { index });
        }

        let mut params = IndexMap::with_capacity(core.params.len());
        for (name, id) in &core.params {
            let slot = Arc::clone(self)
                .evaluate_param(*id, 0)
                .await
                .map_err(|source| CookError::Param {
                    name: name.clone(),
                    source,
                })?;
            params.insert(name.clone(), slot);
        }

        let ctx = CookContext::new(path, inputs, params);
        let mut container = core.operator.cook(ctx.clone()).await?;
        for capability in &core.capabilities {
            container = capability.apply(container, &ctx)?;
        }
        Ok(Arc::new(container))
    }

    /// Evaluate a parameter, serving the cached result while it is clean.
    ///
    /// `depth` counts parameter-to-parameter hops from the outermost
    /// evaluation.
    pub(super) fn evaluate_param(
        self: Arc<Self>,
        id: ParamId,
        depth: usize,
    ) -> BoxFuture<'static, Result<ParamSlot, ParamError>> {
        async move {
            let limit = self.config.max_reference_depth;
            if depth > limit {
                return Err(EvalError::DepthExceeded(limit).into());
            }

            let param = self
                .params
                .get(&id)
                .map(|entry| Arc::clone(entry.value()))
                .ok_or_else(|| ResolveError::ParamNotFound(id.to_string()))?;

            let entity = id.graph_id();
            let dirty = self.graph.lock().is_dirty(entity);
            let cached = if dirty {
                None
            } else {
                param.state.lock().cached.clone()
            };
            if let Some(cached) = cached {
                return Ok(cached);
            }

            let started = self.graph.lock().snapshot(entity);
            let result = self.compute_param(&param, depth).await;
            match &result {
                Ok(slot) => {
                    self.graph.lock().settle(entity, &started);
                    let mut state = param.state.lock();
                    if let ParamSlot::Value(value) = slot {
                        state.value = value.clone();
                    }
                    state.cached = Some(slot.clone());
                    state.error = None;
                }
                Err(err) => {
                    warn!(
                        param = param.name(),
                        node = %param.node,
                        error = %err,
                        "parameter evaluation failed"
                    );
                    let mut state = param.state.lock();
                    state.cached = None;
                    state.error = Some(err.clone());
                }
            }
            result
        }
        .boxed()
    }

    async fn compute_param(
        self: &Arc<Self>,
        param: &ParamCore,
        depth: usize,
    ) -> Result<ParamSlot, ParamError> {
        let (input, parsed, resolution) = {
            let state = param.state.lock();
            (
                state.input.clone(),
                state.expression.clone(),
                state.resolution.clone(),
            )
        };

        let text = match input {
            ParamInput::Literal(value) => return Ok(ParamSlot::Value(value)),
            ParamInput::Expression(text) => text,
        };
        let expression = match parsed {
            Some(parsed) => parsed?,
            None => Arc::new(param.parse(&text)?),
        };
        let resolved = match resolution {
            Some(resolution) => resolution?,
            None => expr::resolve(&expression, param.node, param.id, &**self)?,
        };

        let mut refs = Vec::with_capacity(resolved.len());
        for target in resolved {
            let value = match target {
                Resolved::Param { param: other, .. } => {
                    match Arc::clone(self).evaluate_param(other, depth + 1).await? {
                        ParamSlot::Value(value) => RefValue::Value(value),
                        ParamSlot::PerElement(_) => return Err(EvalError::ElementContext.into()),
                    }
                }
                Resolved::Node(node) | Resolved::Input { node, .. } => {
                    match Arc::clone(self).compute(node).await {
                        Ok(container) => RefValue::Container(container),
                        Err(source) => {
                            return Err(ParamError::Upstream {
                                path: self.node_path(node).unwrap_or_else(|| node.to_string()),
                                source: Box::new(source),
                            })
                        }
                    }
                }
            };
            refs.push(value);
        }

        let env = Env {
            frame: self.time.frame(),
            seconds: self.time.seconds(),
            refs,
        };
        if expression.is_per_element() {
            return Ok(ParamSlot::PerElement(Program::new(expression, env)));
        }

        let value = expr::evaluate(&expression, &env, None)?;
        Ok(ParamSlot::Value(param.kind().coerce(value)?))
    }
}
