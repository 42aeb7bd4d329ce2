//! Expression Wiring
//!
//! Turns a parameter's resolved references into graph edges. Each resolution
//! tears down the edges of the previous one before adding the new ones, so
//! stale edges never linger after a rename, a removal or a new expression.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::param::ParamCore;
use super::SceneInner;
use crate::error::{GraphError, ParamError, ResolveError};
use crate::expr::{self, Expression, NodeTarget, Reference, Resolved};
use crate::graph::GraphId;

impl SceneInner {
    /// Resolve a parameter's expression and rebuild its incoming edges.
    ///
    /// Returns whether the resolution differs from the previous one.
    pub(super) fn rewire(&self, param: &ParamCore) -> bool {
        let expression = param.expression();
        let mut resolution =
            expression
                .as_deref()
                .map(|expression| expr::resolve(expression, param.node, param.id, self));

        let wanted = match (&expression, &resolution) {
            (Some(expression), Some(Ok(resolved))) => self.sources(expression, resolved),
            _ => IndexMap::new(),
        };

        let stale = std::mem::take(&mut param.state.lock().sources);
        let target = param.id.graph_id();
        let sources = {
            let mut graph = self.graph.lock();
            for source in stale {
                graph.remove_edge(source, target);
            }

            let mut wired = Vec::with_capacity(wanted.len());
            let mut cycle = None;
            for (source, Source { label, wire }) in wanted {
                // Unwired node references are still cooked during
                // evaluation, so they must not depend on the parameter.
                let result = if wire {
                    graph.add_edge(source, target).map(|_| wired.push(source))
                } else if graph.reaches(target, source) {
                    Err(GraphError::Cycle {
                        from: source,
                        to: target,
                    })
                } else {
                    Ok(())
                };
                if result.is_err() {
                    cycle = Some(label);
                    break;
                }
            }

            if let Some(label) = cycle {
                for source in wired.drain(..) {
                    graph.remove_edge(source, target);
                }
                resolution = Some(Err(ResolveError::Cycle(label)));
            }
            wired
        };

        let mut state = param.state.lock();
        state.sources = sources;
        if state.resolution == resolution {
            return false;
        }

        match &resolution {
            Some(Err(err)) => state.error = Some(ParamError::from(err.clone())),
            Some(Ok(_)) if matches!(state.error, Some(ParamError::Resolve(_))) => {
                state.error = None
            }
            _ => {}
        }
        debug!(
            param = param.name(),
            node = %param.node,
            resolved = matches!(resolution, Some(Ok(_))),
            "expression resolved"
        );
        state.resolution = resolution;
        state.cached = None;
        true
    }

    /// Graph entities a resolved expression reads from.
    fn sources(&self, expression: &Expression, resolved: &[Resolved]) -> IndexMap<GraphId, Source> {
        let mut sources = IndexMap::new();
        if expression.uses_time() {
            sources.insert(
                self.time.entity(),
                Source {
                    label: "time".to_owned(),
                    wire: true,
                },
            );
        }

        for (reference, target) in expression.references().iter().zip(resolved) {
            let (entity, wire) = match *target {
                Resolved::Param { param, .. } => (param.graph_id(), true),
                Resolved::Input { node, .. } => (node.graph_id(), true),
                Resolved::Node(node) => (node.graph_id(), self.config.dependent_on_found_node),
            };
            sources.entry(entity).or_insert_with(|| Source {
                label: describe(reference),
                wire,
            });
        }
        sources
    }

    /// Resolve every expression again after a structural change.
    ///
    /// Parameters whose resolution changed are dirtied in one batch.
    pub(super) fn refresh_expressions(&self) {
        let mut params: Vec<_> = self
            .params
            .iter()
            .filter(|entry| entry.value().has_expression())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        params.sort_by_key(|param| param.id);

        let mut reached = Vec::new();
        self.graph.lock().block();
        for param in params {
            if self.rewire(&param) {
                reached.extend(self.graph.lock().set_dirty(param.id.graph_id()));
            }
        }
        reached.extend(self.graph.lock().unblock());
        self.apply_reached(reached);
    }
}

/// A predecessor of an expression parameter.
struct Source {
    /// How the expression named it, for error messages.
    label: String,
    /// Whether to add a dirtying edge.
    wire: bool,
}

fn describe(reference: &Reference) -> String {
    match reference {
        Reference::Param(path) => path.clone(),
        Reference::Node(NodeTarget::Path(path)) => path.clone(),
        Reference::Node(NodeTarget::Input(index)) => format!("input {index}"),
    }
}
