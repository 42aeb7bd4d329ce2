//! Integration Tests for the Cook Engine
//!
//! These tests drive a whole scene: dirty propagation, cooking, caching and
//! expressions working together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::Notify;

use trellis_core::{
    Capability, Container, CookContext, CookError, CookState, EngineConfig, EvalError, GraphError,
    InputSpec, Operator, ParamError, ParamInput, ParamSpec, Points, ResolveError, Scene, SceneError,
    Value,
};

/// Shared record of which operators cooked, in order.
#[derive(Clone, Default)]
struct Recorder {
    log: Arc<Mutex<Vec<&'static str>>>,
    cooks: Arc<AtomicUsize>,
}

impl Recorder {
    fn record(&self, name: &'static str) {
        self.cooks.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(name);
    }

    fn cooks(&self) -> usize {
        self.cooks.load(Ordering::SeqCst)
    }

    fn log(&self) -> Vec<&'static str> {
        self.log.lock().clone()
    }
}

/// A row of `count` points along x at `height`.
struct Grid {
    name: &'static str,
    recorder: Recorder,
    gate: Option<Arc<Notify>>,
}

impl Grid {
    fn new(name: &'static str, recorder: &Recorder) -> Self {
        Self {
            name,
            recorder: recorder.clone(),
            gate: None,
        }
    }

    fn gated(name: &'static str, recorder: &Recorder, gate: &Arc<Notify>) -> Self {
        Self {
            gate: Some(Arc::clone(gate)),
            ..Self::new(name, recorder)
        }
    }
}

impl Operator for Grid {
    fn type_name(&self) -> &str {
        "grid"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::integer("count", 1),
            ParamSpec::float("height", 0.0),
            ParamSpec::text("label", ""),
        ]
    }

    fn cook(&self, ctx: CookContext) -> BoxFuture<'static, Result<Container, CookError>> {
        self.recorder.record(self.name);
        let gate = self.gate.clone();
        async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            let count = ctx.integer("count")?.max(0) as usize;
            let height = ctx.float("height")?;
            let positions = (0..count).map(|i| [i as f64, height, 0.0]).collect();
            Ok(Container::new(Points::new(positions)))
        }
        .boxed()
    }
}

/// Repeats its input `copies` times, stacking copies along z.
struct Copy {
    name: &'static str,
    recorder: Recorder,
}

impl Copy {
    fn new(name: &'static str, recorder: &Recorder) -> Self {
        Self {
            name,
            recorder: recorder.clone(),
        }
    }
}

impl Operator for Copy {
    fn type_name(&self) -> &str {
        "copy"
    }

    fn inputs(&self) -> InputSpec {
        InputSpec::exactly(1)
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::integer("copies", 1)]
    }

    fn cook(&self, ctx: CookContext) -> BoxFuture<'static, Result<Container, CookError>> {
        self.recorder.record(self.name);
        async move {
            let input = ctx.input(0)?;
            let copies = ctx.integer("copies")?.max(0);
            let mut positions = Vec::new();
            for copy in 0..copies {
                for p in input.payload().positions() {
                    positions.push([p[0], p[1], p[2] + copy as f64]);
                }
            }
            Ok(Container::new(Points::new(positions)))
        }
        .boxed()
    }
}

/// Concatenates whatever inputs cooked, skipping failed ones.
struct Merge;

impl Operator for Merge {
    fn type_name(&self) -> &str {
        "merge"
    }

    fn inputs(&self) -> InputSpec {
        InputSpec::range(0, 2)
    }

    fn cook(&self, ctx: CookContext) -> BoxFuture<'static, Result<Container, CookError>> {
        async move {
            let positions = ctx
                .ready_inputs()
                .flat_map(|input| input.payload().positions().to_vec())
                .collect();
            Ok(Container::new(Points::new(positions)))
        }
        .boxed()
    }
}

/// Fails while its `fail` toggle is on.
struct Fallible;

impl Operator for Fallible {
    fn type_name(&self) -> &str {
        "fallible"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::boolean("fail", false)]
    }

    fn cook(&self, ctx: CookContext) -> BoxFuture<'static, Result<Container, CookError>> {
        async move {
            if ctx.boolean("fail")? {
                return Err(CookError::failed("asked to fail"));
            }
            Ok(Container::new(Points::new(vec![[0.0; 3]])))
        }
        .boxed()
    }
}

/// Moves every point of its input to `offset` on y, per point.
struct Displace;

impl Operator for Displace {
    fn type_name(&self) -> &str {
        "displace"
    }

    fn inputs(&self) -> InputSpec {
        InputSpec::exactly(1)
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::float("offset", 0.0)]
    }

    fn cook(&self, ctx: CookContext) -> BoxFuture<'static, Result<Container, CookError>> {
        async move {
            let input = ctx.input(0)?;
            let offsets = ctx.param_per_element("offset", &input)?;
            let positions = input
                .payload()
                .positions()
                .iter()
                .zip(offsets)
                .map(|(p, offset)| {
                    offset
                        .as_number()
                        .map(|y| [p[0], y, p[2]])
                        .map_err(|err| CookError::failed(err.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Container::new(Points::new(positions)))
        }
        .boxed()
    }
}

/// Raises every point by `lift`.
struct Lift;

impl Capability for Lift {
    fn name(&self) -> &str {
        "lift"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::float("lift", 0.0)]
    }

    fn apply(&self, container: Container, ctx: &CookContext) -> Result<Container, CookError> {
        let lift = ctx.float("lift")?;
        let positions = container
            .payload()
            .positions()
            .iter()
            .map(|p| [p[0], p[1] + lift, p[2]])
            .collect();
        Ok(Container::new(Points::new(positions)))
    }
}

/// A capability that collides with the grid's own parameter.
struct Recount;

impl Capability for Recount {
    fn name(&self) -> &str {
        "recount"
    }

    fn params(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::integer("count", 0)]
    }

    fn apply(&self, container: Container, _ctx: &CookContext) -> Result<Container, CookError> {
        Ok(container)
    }
}

fn ys(container: &Container) -> Vec<f64> {
    container.payload().positions().iter().map(|p| p[1]).collect()
}

/// a (grid) -> b (copy) -> c (copy)
fn chain(scene: &Scene, recorder: &Recorder) -> [trellis_core::NodeId; 3] {
    let a = scene.add_node("a", Grid::new("a", recorder)).unwrap();
    let b = scene.add_node("b", Copy::new("b", recorder)).unwrap();
    let c = scene.add_node("c", Copy::new("c", recorder)).unwrap();
    scene.connect(b, 0, a).unwrap();
    scene.connect(c, 0, b).unwrap();
    [a, b, c]
}

/// Test that a clean node returns its cached container without cooking again.
#[tokio::test]
async fn clean_node_serves_cached_container() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let grid = scene.add_node("grid", Grid::new("grid", &recorder)).unwrap();

    assert_eq!(scene.cook_state(grid).unwrap(), CookState::Dirty);
    let first = scene.compute(grid).await.unwrap();
    assert_eq!(scene.cook_state(grid).unwrap(), CookState::Clean);

    let second = scene.compute(grid).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(recorder.cooks(), 1);
    assert_eq!(scene.cook_count(grid).unwrap(), 1);
}

/// Test that computes issued while a cook is running join it instead of starting another.
#[tokio::test]
async fn concurrent_computes_share_one_cook() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let gate = Arc::new(Notify::new());
    let grid = scene
        .add_node("grid", Grid::gated("grid", &recorder, &gate))
        .unwrap();

    let first = scene.compute(grid);
    let second = scene.compute(grid);
    assert_eq!(scene.cook_state(grid).unwrap(), CookState::Cooking);

    gate.notify_one();
    let (first, second) = tokio::join!(first, second);
    assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    assert_eq!(recorder.cooks(), 1);
    assert_eq!(scene.cook_state(grid).unwrap(), CookState::Clean);
}

/// Test that a node dirtied mid-cook publishes the stale result but stays dirty.
#[tokio::test]
async fn dirtied_while_cooking_ends_dirty() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let gate = Arc::new(Notify::new());
    let grid = scene
        .add_node("grid", Grid::gated("grid", &recorder, &gate))
        .unwrap();

    let cook = scene.compute(grid);
    let poke = async {
        tokio::task::yield_now().await;
        assert_eq!(scene.cook_state(grid).unwrap(), CookState::Cooking);
        scene.set_dirty(grid).unwrap();
        gate.notify_one();
    };
    let (result, ()) = tokio::join!(cook, poke);

    // The stale result is still published for callers and for display.
    assert_eq!(result.unwrap().element_count(), 1);
    assert!(scene.container(grid).unwrap().is_some());
    assert_eq!(scene.cook_state(grid).unwrap(), CookState::Dirty);

    gate.notify_one();
    scene.compute(grid).await.unwrap();
    assert_eq!(recorder.cooks(), 2);
    assert_eq!(scene.cook_state(grid).unwrap(), CookState::Clean);
}

/// Test that blocked dirtying only marks roots and the outermost unblock flushes them.
#[tokio::test]
async fn blocking_defers_propagation_until_unblock() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let [a, b, c] = chain(&scene, &recorder);
    scene.compute(c).await.unwrap();

    scene.block();
    scene.set_dirty(a).unwrap();
    assert_eq!(scene.cook_state(a).unwrap(), CookState::Dirty);
    assert_eq!(scene.cook_state(b).unwrap(), CookState::Clean);
    scene.unblock();
    assert_eq!(scene.cook_state(b).unwrap(), CookState::Dirty);
    assert_eq!(scene.cook_state(c).unwrap(), CookState::Dirty);

    scene.compute(c).await.unwrap();
    {
        let _batch = scene.batch();
        scene.set_param(a, "count", 2).unwrap();
        scene.set_param(a, "height", 1.0).unwrap();
        assert_eq!(scene.cook_state(a).unwrap(), CookState::Clean);
    }
    assert_eq!(scene.cook_state(c).unwrap(), CookState::Dirty);
}

/// Test that a cook runs upstream nodes first and leaves the whole chain clean.
#[tokio::test]
async fn cook_order_follows_dependencies() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let [a, b, c] = chain(&scene, &recorder);
    scene.set_expression(b, "copies", "count(0)").unwrap();

    let first = scene.compute(c).await.unwrap();
    assert_eq!(recorder.log(), vec!["a", "b", "c"]);
    assert_eq!(first.element_count(), 1);
    for node in [a, b, c] {
        assert_eq!(scene.cook_state(node).unwrap(), CookState::Clean);
    }

    scene.set_param(a, "count", 3).unwrap();
    for node in [a, b, c] {
        assert_eq!(scene.cook_state(node).unwrap(), CookState::Dirty);
    }

    let second = scene.compute(c).await.unwrap();
    assert_eq!(recorder.log(), vec!["a", "b", "c", "a", "b", "c"]);
    // Three points, copied three times.
    assert_eq!(second.element_count(), 9);
    assert_eq!(scene.param_value(b, "copies").unwrap(), Value::Number(3.0));
    for node in [a, b, c] {
        assert_eq!(scene.cook_state(node).unwrap(), CookState::Clean);
    }
}

/// Test that setting a parameter to its current literal leaves dependents clean.
#[tokio::test]
async fn unchanged_literal_does_not_dirty() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let [a, _, c] = chain(&scene, &recorder);
    scene.compute(c).await.unwrap();

    scene.set_param(a, "count", 1).unwrap();
    assert_eq!(scene.cook_state(c).unwrap(), CookState::Clean);
}

/// Test that a parameter reading itself records a resolve error and fails the cook.
#[tokio::test]
async fn self_reference_is_reported_on_the_parameter() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let grid = scene.add_node("grid", Grid::new("grid", &recorder)).unwrap();
    scene.set_param(grid, "count", 3).unwrap();
    scene.compute(grid).await.unwrap();

    scene
        .set_expression(grid, "count", r#"ch("count") + 1"#)
        .unwrap();
    assert_eq!(scene.param_value(grid, "count").unwrap(), Value::Number(3.0));
    assert_eq!(
        scene.param_error(grid, "count").unwrap(),
        Some(ParamError::Resolve(ResolveError::SelfReference("count".into())))
    );

    let err = scene.compute(grid).await.unwrap_err();
    assert!(matches!(err, CookError::Param { ref name, .. } if name == "count"));
    assert_eq!(scene.cook_state(grid).unwrap(), CookState::Errored);
    assert_eq!(
        scene.container(grid).unwrap().unwrap().element_count(),
        3
    );
}

/// Test that an errored node keeps its last good container and recovers once dirtied.
#[tokio::test]
async fn errored_node_keeps_last_container_until_fixed() {
    let scene = Scene::default();
    let node = scene.add_node("maybe", Fallible).unwrap();
    let good = scene.compute(node).await.unwrap();

    scene.set_param(node, "fail", true).unwrap();
    let err = scene.compute(node).await.unwrap_err();
    assert_eq!(err, CookError::failed("asked to fail"));
    assert_eq!(scene.cook_state(node).unwrap(), CookState::Errored);
    assert_eq!(scene.error(node).unwrap(), Some(err));
    assert!(Arc::ptr_eq(&scene.container(node).unwrap().unwrap(), &good));

    scene.set_param(node, "fail", false).unwrap();
    assert_eq!(scene.cook_state(node).unwrap(), CookState::Dirty);
    assert_eq!(scene.error(node).unwrap(), None);

    scene.compute(node).await.unwrap();
    assert_eq!(scene.cook_state(node).unwrap(), CookState::Clean);
}

/// Test that a failed input is handed to the downstream operator instead of aborting it.
#[tokio::test]
async fn failed_inputs_reach_dependents_as_values() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let broken = scene.add_node("broken", Fallible).unwrap();
    scene.set_param(broken, "fail", true).unwrap();
    let grid = scene.add_node("grid", Grid::new("grid", &recorder)).unwrap();
    scene.set_param(grid, "count", 2).unwrap();

    let copy = scene.add_node("copy", Copy::new("copy", &recorder)).unwrap();
    scene.connect(copy, 0, broken).unwrap();
    let err = scene.compute(copy).await.unwrap_err();
    assert!(matches!(err, CookError::Input { index: 0, .. }));

    let merge = scene.add_node("merge", Merge).unwrap();
    scene.connect(merge, 0, broken).unwrap();
    scene.connect(merge, 1, grid).unwrap();
    let merged = scene.compute(merge).await.unwrap();
    assert_eq!(merged.element_count(), 2);
    assert_eq!(scene.cook_state(broken).unwrap(), CookState::Errored);
}

/// Test that a node that cooked around a failed input is cached, and that fixing
/// the input dirties it again.
#[tokio::test]
async fn fallback_over_failed_input_is_cached() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let broken = scene.add_node("broken", Fallible).unwrap();
    scene.set_param(broken, "fail", true).unwrap();
    let grid = scene.add_node("grid", Grid::new("grid", &recorder)).unwrap();
    scene.set_param(grid, "count", 2).unwrap();
    let merge = scene.add_node("merge", Merge).unwrap();
    scene.connect(merge, 0, broken).unwrap();
    scene.connect(merge, 1, grid).unwrap();

    let first = scene.compute(merge).await.unwrap();
    assert_eq!(first.element_count(), 2);
    assert_eq!(scene.cook_state(merge).unwrap(), CookState::Clean);
    assert_eq!(scene.cook_state(broken).unwrap(), CookState::Errored);

    let second = scene.compute(merge).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(scene.cook_count(merge).unwrap(), 1);
    assert_eq!(scene.cook_count(broken).unwrap(), 1);

    // Fixing the failed input still reaches the node that cached around it.
    scene.set_param(broken, "fail", false).unwrap();
    assert_eq!(scene.cook_state(merge).unwrap(), CookState::Dirty);
    assert_eq!(scene.compute(merge).await.unwrap().element_count(), 3);
    assert_eq!(scene.cook_state(merge).unwrap(), CookState::Clean);
}

/// Test that an unconnected required input fails before the operator runs.
#[tokio::test]
async fn missing_required_input_fails_the_cook() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let copy = scene.add_node("copy", Copy::new("copy", &recorder)).unwrap();

    let err = scene.compute(copy).await.unwrap_err();
    assert_eq!(err, CookError::MissingInput { index: 0 });
    assert_eq!(recorder.cooks(), 0);
}

/// Test that wiring that would close a loop is refused and leaves the inputs untouched.
#[test]
fn connections_reject_cycles() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let x = scene.add_node("x", Copy::new("x", &recorder)).unwrap();
    let y = scene.add_node("y", Copy::new("y", &recorder)).unwrap();
    scene.connect(y, 0, x).unwrap();

    assert!(matches!(
        scene.connect(x, 0, y),
        Err(SceneError::Graph(GraphError::Cycle { .. }))
    ));
    assert!(matches!(
        scene.connect(x, 0, x),
        Err(SceneError::Graph(GraphError::SelfReference(_)))
    ));
    assert_eq!(
        scene.connect(y, 3, x),
        Err(SceneError::InputOutOfRange { index: 3, max: 1 })
    );
    assert_eq!(scene.input(x, 0), None);
    assert_eq!(scene.input(y, 0), Some(x));
}

/// Test that an expression reading a downstream node or its owner reports a cycle.
#[test]
fn expressions_reject_cycles() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let x = scene.add_node("x", Copy::new("x", &recorder)).unwrap();
    let y = scene.add_node("y", Copy::new("y", &recorder)).unwrap();
    scene.connect(y, 0, x).unwrap();

    scene.set_expression(x, "copies", r#"count("../y")"#).unwrap();
    assert_eq!(
        scene.param_error(x, "copies").unwrap(),
        Some(ParamError::Resolve(ResolveError::Cycle("../y".into())))
    );

    // Reading the owner's own output is a cycle too.
    scene.set_expression(y, "copies", r#"count(".")"#).unwrap();
    assert!(matches!(
        scene.param_error(y, "copies").unwrap(),
        Some(ParamError::Resolve(ResolveError::Cycle(_)))
    ));
}

/// Test that renaming a node re-resolves path expressions that name it.
#[tokio::test]
async fn rename_re_resolves_expressions() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let source = scene.add_node("source", Grid::new("source", &recorder)).unwrap();
    let a = scene.add_node("a", Grid::new("a", &recorder)).unwrap();
    scene.set_param(a, "count", 2).unwrap();
    let b = scene.add_node("b", Copy::new("b", &recorder)).unwrap();
    scene.connect(b, 0, source).unwrap();
    scene.set_expression(b, "copies", r#"count("../a")"#).unwrap();

    assert_eq!(scene.compute(b).await.unwrap().element_count(), 2);

    scene.rename_node(a, "renamed").unwrap();
    assert_eq!(scene.node_path(a).as_deref(), Some("/renamed"));
    assert_eq!(scene.find_node("/a"), None);
    assert_eq!(
        scene.param_error(b, "copies").unwrap(),
        Some(ParamError::Resolve(ResolveError::NodeNotFound("../a".into())))
    );
    assert!(matches!(
        scene.compute(b).await,
        Err(CookError::Param { .. })
    ));

    scene.rename_node(a, "a").unwrap();
    assert_eq!(scene.param_error(b, "copies").unwrap(), None);
    assert_eq!(scene.compute(b).await.unwrap().element_count(), 2);

    // The found node is a dependency: changing it dirties the reader.
    scene.set_param(a, "count", 4).unwrap();
    assert_eq!(scene.cook_state(b).unwrap(), CookState::Dirty);
    assert_eq!(scene.compute(b).await.unwrap().element_count(), 4);
}

/// Test that found nodes are not dependencies when the config turns that off.
#[tokio::test]
async fn found_nodes_can_be_read_without_dependency() {
    let config = EngineConfig {
        dependent_on_found_node: false,
        ..EngineConfig::default()
    };
    let scene = Scene::new(config);
    let recorder = Recorder::default();
    let source = scene.add_node("source", Grid::new("source", &recorder)).unwrap();
    let a = scene.add_node("a", Grid::new("a", &recorder)).unwrap();
    scene.set_param(a, "count", 2).unwrap();
    let b = scene.add_node("b", Copy::new("b", &recorder)).unwrap();
    scene.connect(b, 0, source).unwrap();
    scene.set_expression(b, "copies", r#"count("/a")"#).unwrap();

    assert_eq!(scene.compute(b).await.unwrap().element_count(), 2);

    scene.set_param(a, "count", 5).unwrap();
    assert_eq!(scene.cook_state(b).unwrap(), CookState::Clean);
    assert_eq!(scene.compute(b).await.unwrap().element_count(), 2);
}

/// Test that changing the frame dirties only parameters that read time.
#[tokio::test]
async fn frame_changes_dirty_only_time_dependents() {
    let config = EngineConfig {
        frames_per_second: 24.0,
        ..EngineConfig::default()
    };
    let scene = Scene::new(config);
    let recorder = Recorder::default();
    let animated = scene.add_node("animated", Grid::new("animated", &recorder)).unwrap();
    let still = scene.add_node("still", Grid::new("still", &recorder)).unwrap();
    scene.set_expression(animated, "count", "$F + 1").unwrap();
    scene
        .set_expression(animated, "label", "frame_`$T`")
        .unwrap();

    assert_eq!(scene.compute(animated).await.unwrap().element_count(), 1);
    scene.compute(still).await.unwrap();

    scene.set_frame(12.0);
    assert_eq!(scene.frame(), 12.0);
    assert_eq!(scene.seconds(), 0.5);
    assert_eq!(scene.cook_state(animated).unwrap(), CookState::Dirty);
    assert_eq!(scene.cook_state(still).unwrap(), CookState::Clean);

    assert_eq!(scene.compute(animated).await.unwrap().element_count(), 13);
    assert_eq!(
        scene.evaluate_param(animated, "label").await,
        Ok(Value::Text("frame_0.5".into()))
    );
}

/// Test that element expressions evaluate once per point of the input.
#[tokio::test]
async fn per_element_expressions_vary_per_point() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let grid = scene.add_node("grid", Grid::new("grid", &recorder)).unwrap();
    scene.set_param(grid, "count", 3).unwrap();
    let displace = scene.add_node("displace", Displace).unwrap();
    scene.connect(displace, 0, grid).unwrap();

    scene
        .set_expression(displace, "offset", "@P.x * 2 + @ptnum")
        .unwrap();
    let varying = scene.compute(displace).await.unwrap();
    assert_eq!(ys(&varying), vec![0.0, 3.0, 6.0]);
    assert_eq!(
        scene.evaluate_param(displace, "offset").await,
        Err(ParamError::Eval(EvalError::ElementContext))
    );

    scene.set_raw(displace, "offset", "1.5").unwrap();
    let uniform = scene.compute(displace).await.unwrap();
    assert_eq!(ys(&uniform), vec![1.5; 3]);
}

/// Test that capabilities add parameters and post-process the operator output.
#[tokio::test]
async fn capabilities_contribute_params_and_post_process() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let grid = scene
        .builder("grid", Grid::new("grid", &recorder))
        .capability(Lift)
        .build()
        .unwrap();
    scene.set_param(grid, "count", 2).unwrap();
    scene.set_param(grid, "lift", 2.0).unwrap();

    let lifted = scene.compute(grid).await.unwrap();
    assert_eq!(ys(&lifted), vec![2.0, 2.0]);
    assert_eq!(lifted.bounds().unwrap().component("min_y"), Some(2.0));

    let clash = scene
        .builder("clash", Grid::new("clash", &recorder))
        .capability(Recount)
        .build();
    assert_eq!(clash, Err(SceneError::DuplicateParam("count".into())));
}

/// Test that raw text becomes a literal or an expression depending on the parameter kind.
#[tokio::test]
async fn raw_input_picks_literal_or_expression_by_kind() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let grid = scene.add_node("grid", Grid::new("grid", &recorder)).unwrap();

    scene.set_raw(grid, "label", "#ff0000").unwrap();
    assert_eq!(
        scene.param_input(grid, "label").unwrap(),
        ParamInput::Literal(Value::Text("#ff0000".into()))
    );

    scene.set_raw(grid, "count", "7").unwrap();
    assert!(!scene.has_expression(grid, "count").unwrap());
    assert_eq!(scene.param_value(grid, "count").unwrap(), Value::Number(7.0));

    scene.set_raw(grid, "count", "#ff0000").unwrap();
    assert!(scene.has_expression(grid, "count").unwrap());
    assert!(matches!(
        scene.param_error(grid, "count").unwrap(),
        Some(ParamError::Parse(_))
    ));

    assert!(matches!(
        scene.set_param(grid, "count", "seven"),
        Err(SceneError::InvalidLiteral { .. })
    ));
}

/// Test that removing a node clears the inputs and expressions that used it.
#[tokio::test]
async fn removing_a_node_disconnects_and_dirties_dependents() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let [a, b, _] = chain(&scene, &recorder);
    let reader = scene.add_node("reader", Grid::new("reader", &recorder)).unwrap();
    scene.set_expression(reader, "count", r#"count("/a")"#).unwrap();
    scene.compute(b).await.unwrap();
    scene.compute(reader).await.unwrap();

    scene.remove_node(a).unwrap();
    assert_eq!(scene.input(b, 0), None);
    assert_eq!(scene.find_node("/a"), None);
    assert_eq!(scene.cook_state(b).unwrap(), CookState::Dirty);
    assert_eq!(
        scene.compute(b).await.unwrap_err(),
        CookError::MissingInput { index: 0 }
    );
    assert_eq!(
        scene.param_error(reader, "count").unwrap(),
        Some(ParamError::Resolve(ResolveError::NodeNotFound("/a".into())))
    );
    assert_eq!(scene.compute(a).await.unwrap_err(), CookError::NodeRemoved);
    assert_eq!(scene.cook_state(a), Err(SceneError::UnknownNode(a)));
}

/// Test that a parameter reference is read through and dirtied by its source.
#[tokio::test]
async fn parameters_follow_parameter_references() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let a = scene.add_node("a", Grid::new("a", &recorder)).unwrap();
    let b = scene.add_node("b", Grid::new("b", &recorder)).unwrap();
    scene.set_param(a, "height", 1.5).unwrap();
    scene
        .set_expression(b, "height", r#"ch("../a/height") * 2"#)
        .unwrap();

    assert_eq!(scene.evaluate_param(b, "height").await, Ok(Value::Number(3.0)));
    assert_eq!(scene.param_value(b, "height").unwrap(), Value::Number(3.0));

    scene.set_param(a, "height", 2.0).unwrap();
    assert_eq!(scene.cook_state(b).unwrap(), CookState::Dirty);
    assert_eq!(scene.evaluate_param(b, "height").await, Ok(Value::Number(4.0)));
}

/// Test that chains of parameter references stop at the configured depth.
#[tokio::test]
async fn reference_chains_are_depth_limited() {
    let config = EngineConfig {
        max_reference_depth: 1,
        ..EngineConfig::default()
    };
    let scene = Scene::new(config);
    let recorder = Recorder::default();
    let n0 = scene.add_node("n0", Grid::new("n0", &recorder)).unwrap();
    let n1 = scene.add_node("n1", Grid::new("n1", &recorder)).unwrap();
    let n2 = scene.add_node("n2", Grid::new("n2", &recorder)).unwrap();
    scene.set_param(n0, "height", 1.0).unwrap();
    scene.set_expression(n1, "height", r#"ch("/n0/height")"#).unwrap();
    scene.set_expression(n2, "height", r#"ch("/n1/height")"#).unwrap();

    assert_eq!(
        scene.evaluate_param(n2, "height").await,
        Err(ParamError::Eval(EvalError::DepthExceeded(1)))
    );
    assert_eq!(scene.evaluate_param(n1, "height").await, Ok(Value::Number(1.0)));
}

/// Test that child nodes resolve paths relative to their parent network.
#[tokio::test]
async fn sub_networks_resolve_relative_paths() {
    let scene = Scene::default();
    let recorder = Recorder::default();
    let geo = scene.add_node("geo", Grid::new("geo", &recorder)).unwrap();
    let inner = scene
        .add_child(geo, "scatter", Grid::new("scatter", &recorder))
        .unwrap();
    assert_eq!(scene.node_path(inner).as_deref(), Some("/geo/scatter"));
    assert_eq!(scene.find_node("/geo/scatter"), Some(inner));

    scene.set_param(geo, "height", 2.4).unwrap();
    scene.set_expression(inner, "count", r#"ch("../height")"#).unwrap();
    assert_eq!(scene.compute(inner).await.unwrap().element_count(), 2);

    assert_eq!(
        scene.add_child(geo, "scatter", Grid::new("dup", &recorder)),
        Err(SceneError::DuplicateName("/geo/scatter".into()))
    );

    scene.remove_node(geo).unwrap();
    assert_eq!(scene.find_node("/geo/scatter"), None);
    assert_eq!(scene.node_count(), 0);
}
