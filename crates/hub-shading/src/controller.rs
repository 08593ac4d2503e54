//! The shading control loop
//!
//! The controller reacts to state changes on shading nodes by scheduling a
//! debounced run: at most one run token is outstanding at any time, so any
//! burst of qualifying events within the debounce window collapses into a
//! single run. A fixed-interval tick schedules a run unconditionally as a
//! safety net against missed events. Manual position writes arm a timed
//! override flag per shading node. Every write the controller issues is
//! tagged with its own source id, and events carrying that id are dropped
//! before they can schedule anything, which keeps the loop from feeding
//! itself.

use dashmap::DashMap;
use hub_core::events::{StateValueChangedData, STATE_VALUE_CHANGED};
use hub_core::{Event, NodeId, Source, StateType};
use hub_event_bus::{EventBus, HandlerResult, Subscription};
use hub_state_tree::{NodeOptions, StateNode, StateTree, StateTreeError, StateTreeResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::calculator::{
    CalculatorError, CloudCoverCalculator, PositionCalculator, WantedHeatGainCalculator,
};
use crate::domain::{Shading, Site};

/// Source id the controller tags its own writes with
pub const CONTROLLER_SOURCE: &str = "shading_controller";

/// Node type marking a controllable shading
pub const SHADING_STATE_TYPE: &str = "shading";

const POSITION: &str = "position";
const MINIMUM_POSITION: &str = "minimum_position";
const MAXIMUM_POSITION: &str = "maximum_position";
const CONTROLLER_OVERRIDE: &str = "controller_override";

/// Errors surfaced by a controller run
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("calculator failure: {0}")]
    Calculator(#[from] CalculatorError),

    #[error(transparent)]
    StateTree(#[from] StateTreeError),
}

/// Controller timing configuration, all durations in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Fixed-interval safety tick between runs
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Delay between a qualifying event and the run it schedules
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,

    /// How long a manual override stays armed
    #[serde(default = "default_override_duration_secs")]
    pub override_duration_secs: u64,

    /// Ceiling on a single run; overdue runs are abandoned
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Event sources treated as manual control channels
    #[serde(default = "default_manual_sources")]
    pub manual_sources: Vec<String>,
}

fn default_interval_secs() -> u64 {
    1800
}

fn default_debounce_secs() -> u64 {
    5
}

fn default_override_duration_secs() -> u64 {
    4 * 3600
}

fn default_run_timeout_secs() -> u64 {
    3600
}

fn default_manual_sources() -> Vec<String> {
    vec!["manual".to_string(), "websocket".to_string()]
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            debounce_secs: default_debounce_secs(),
            override_duration_secs: default_override_duration_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            manual_sources: default_manual_sources(),
        }
    }
}

/// The shading controller
///
/// Construct with [`ShadingController::new`], wrap in an `Arc` and call
/// [`start`](ShadingController::start). The controller owns the
/// `/settings/shading/{wanted_heat_gain,cloud_cover}` and
/// `/settings/location/{longitude,latitude,elevation}` nodes, creating
/// them if absent.
pub struct ShadingController {
    tree: Arc<StateTree>,
    bus: Arc<EventBus>,
    heat_gain_calculator: Arc<dyn WantedHeatGainCalculator>,
    cloud_cover_calculator: Arc<dyn CloudCoverCalculator>,
    position_calculator: Arc<dyn PositionCalculator>,
    config: ControllerConfig,
    source: Source,

    wanted_heat_gain_node: NodeId,
    cloud_cover_node: NodeId,
    longitude_node: NodeId,
    latitude_node: NodeId,
    elevation_node: NodeId,

    /// Outstanding debounce token, at most one for the whole controller
    pending_run: Mutex<Option<AbortHandle>>,
    /// Live override-reset timers keyed by override-node path
    reset_timers: DashMap<String, AbortHandle>,
    /// Bus subscription held while running
    subscription: Mutex<Option<Subscription>>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl ShadingController {
    /// Create a controller, ensuring its well-known nodes exist
    pub fn new(
        tree: Arc<StateTree>,
        bus: Arc<EventBus>,
        heat_gain_calculator: Arc<dyn WantedHeatGainCalculator>,
        cloud_cover_calculator: Arc<dyn CloudCoverCalculator>,
        position_calculator: Arc<dyn PositionCalculator>,
        config: ControllerConfig,
    ) -> StateTreeResult<Self> {
        let source = Source::new(CONTROLLER_SOURCE);

        let settings = ensure_node(&tree, None, "settings", NodeOptions::of_kind("group"), &source)?;
        let location = ensure_node(
            &tree,
            Some(settings.id),
            "location",
            NodeOptions::of_kind("group"),
            &source,
        )?;
        let longitude = ensure_node(
            &tree,
            Some(location.id),
            "longitude",
            NodeOptions::default().with_quantity("Angle").with_unit("deg"),
            &source,
        )?;
        let latitude = ensure_node(
            &tree,
            Some(location.id),
            "latitude",
            NodeOptions::default().with_quantity("Angle").with_unit("deg"),
            &source,
        )?;
        let elevation = ensure_node(
            &tree,
            Some(location.id),
            "elevation",
            NodeOptions::default().with_quantity("Length").with_unit("m"),
            &source,
        )?;

        let shading = ensure_node(
            &tree,
            Some(settings.id),
            "shading",
            NodeOptions::of_kind("group"),
            &source,
        )?;
        let wanted_heat_gain = ensure_node(
            &tree,
            Some(shading.id),
            "wanted_heat_gain",
            NodeOptions::default().with_quantity("Power").with_unit("W"),
            &source,
        )?;
        let cloud_cover = ensure_node(
            &tree,
            Some(shading.id),
            "cloud_cover",
            NodeOptions::default().with_unit("-"),
            &source,
        )?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            tree,
            bus,
            heat_gain_calculator,
            cloud_cover_calculator,
            position_calculator,
            config,
            source,
            wanted_heat_gain_node: wanted_heat_gain.id,
            cloud_cover_node: cloud_cover.id,
            longitude_node: longitude.id,
            latitude_node: latitude.id,
            elevation_node: elevation.id,
            pending_run: Mutex::new(None),
            reset_timers: DashMap::new(),
            subscription: Mutex::new(None),
            running: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    /// The controller's own source id
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Start listening for state changes and schedule the first run
    pub fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Shading controller already running");
            return;
        }

        let controller = self.clone();
        let subscription = self.bus.subscribe_handler(
            self.source.clone(),
            STATE_VALUE_CHANGED,
            move |event| controller.clone().on_state_value_changed(event),
        );
        *self.subscription.lock().unwrap() = Some(subscription);

        // Safety-net tick: schedule a run every interval regardless of events
        let controller = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut timer =
                tokio::time::interval(Duration::from_secs(controller.config.interval_secs));
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => controller.clone().schedule_run(),
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        info!("Started shading controller");
        self.schedule_run();
    }

    /// Stop the controller, cancelling the pending run and all timers
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(());

        if let Some(subscription) = self.subscription.lock().unwrap().take() {
            subscription.cancel();
        }
        if let Some(pending) = self.pending_run.lock().unwrap().take() {
            pending.abort();
        }
        for entry in self.reset_timers.iter() {
            entry.value().abort();
        }
        self.reset_timers.clear();
        info!("Stopped shading controller");
    }

    /// Number of live override-reset timers
    pub fn live_override_timers(&self) -> usize {
        self.reset_timers.len()
    }

    /// Schedule a debounced run unless one is already outstanding
    pub fn schedule_run(self: Arc<Self>) {
        let mut pending = self.pending_run.lock().unwrap();
        if pending.is_some() {
            debug!("Controller run already scheduled");
            return;
        }

        debug!(delay_secs = self.config.debounce_secs, "Scheduled controller run");
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(controller.config.debounce_secs)).await;

            let budget = Duration::from_secs(controller.config.run_timeout_secs);
            match tokio::time::timeout(budget, controller.run()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Shading controller run failed"),
                Err(_) => error!(
                    budget_secs = controller.config.run_timeout_secs,
                    "Shading controller run overdue, abandoning"
                ),
            }

            // Back to idle: an event arriving from here on schedules anew
            *controller.pending_run.lock().unwrap() = None;
        });
        *pending = Some(handle.abort_handle());
    }

    /// One control run over all shading nodes
    ///
    /// Failures abort the run; writes already issued are not rolled back.
    pub async fn run(&self) -> Result<(), ControllerError> {
        debug!("Running shading controller");

        let mut shadings = Vec::new();
        let mut position_nodes = Vec::new();
        for node in self.tree.all() {
            if node.kind.as_str() == SHADING_STATE_TYPE {
                let (shading, position_node) = self.shading_from_node(&node)?;
                shadings.push(shading);
                position_nodes.push(position_node);
            }
        }

        let calculator = self.heat_gain_calculator.clone();
        let wanted_heat_gain = run_calculator(move || calculator.calculate_wanted_heat_gain()).await?;
        debug!(wanted_heat_gain, "Calculated wanted heat gain");
        self.tree
            .set_value(self.wanted_heat_gain_node, json!(wanted_heat_gain), &self.source)?;

        let calculator = self.cloud_cover_calculator.clone();
        let cloud_cover = run_calculator(move || calculator.calculate_cloud_cover()).await?;
        debug!(cloud_cover, "Calculated cloud cover");
        self.tree
            .set_value(self.cloud_cover_node, json!(cloud_cover), &self.source)?;

        let calculator = self.position_calculator.clone();
        let calculator_input = shadings.clone();
        let positions = run_calculator(move || {
            calculator.get_positions(&calculator_input, wanted_heat_gain, cloud_cover)
        })
        .await?;
        if positions.len() != shadings.len() {
            return Err(CalculatorError::PositionCountMismatch {
                expected: shadings.len(),
                got: positions.len(),
            }
            .into());
        }
        debug!(?positions, "Calculated positions");

        for (position_node, position) in position_nodes.iter().zip(positions) {
            self.tree.set_value(*position_node, json!(position), &self.source)?;
        }
        Ok(())
    }

    /// Materialize the transient shading object for a shading node
    ///
    /// Missing child nodes are created with their documented defaults:
    /// position 0.0, minimum 0.0, maximum 1.0, override off.
    fn shading_from_node(&self, node: &StateNode) -> StateTreeResult<(Shading, NodeId)> {
        let position = self.ensure_child(
            node,
            POSITION,
            NodeOptions::default()
                .with_quantity("Position")
                .with_unit("-")
                .with_value(json!(0.0)),
        )?;
        let minimum = self.ensure_child(
            node,
            MINIMUM_POSITION,
            NodeOptions::default()
                .with_quantity("Position")
                .with_unit("-")
                .with_value(json!(0.0)),
        )?;
        let maximum = self.ensure_child(
            node,
            MAXIMUM_POSITION,
            NodeOptions::default()
                .with_quantity("Position")
                .with_unit("-")
                .with_value(json!(1.0)),
        )?;
        let override_node = self.ensure_child(
            node,
            CONTROLLER_OVERRIDE,
            NodeOptions::of_kind(StateType::bool()).with_value(json!(false)),
        )?;

        let site = Site {
            longitude: self.node_f64(self.longitude_node),
            latitude: self.node_f64(self.latitude_node),
            elevation: self.node_f64(self.elevation_node),
        };

        let shading = Shading {
            name: node.path.clone(),
            current_position: position.value_f64().unwrap_or(0.0),
            min_position: minimum.value_f64().unwrap_or(0.0),
            max_position: maximum.value_f64().unwrap_or(1.0),
            override_active: override_node.value_bool().unwrap_or(false),
            area: node.config_f64("area", 1.0),
            transparency: node.config_f64("transparency", 0.0),
            azimuth: node.config_f64("azimuth", 0.0),
            tilt: node.config_f64("tilt", 90.0),
            site,
        };
        Ok((shading, position.id))
    }

    fn node_f64(&self, id: NodeId) -> f64 {
        self.tree.get(id).and_then(|n| n.value_f64()).unwrap_or(0.0)
    }

    fn find_child(&self, parent: &StateNode, name: &str) -> Option<StateNode> {
        parent
            .children
            .iter()
            .filter_map(|id| self.tree.get(*id))
            .find(|child| child.name == name)
    }

    fn ensure_child(
        &self,
        parent: &StateNode,
        name: &str,
        options: NodeOptions,
    ) -> StateTreeResult<StateNode> {
        match self.find_child(parent, name) {
            Some(child) => Ok(child),
            None => self.tree.add(name, Some(parent.id), options, &self.source),
        }
    }

    /// Handler for `state_value_changed` events
    ///
    /// Events carrying the controller's own source id must never reach
    /// `schedule_run`, otherwise the controller would reschedule itself
    /// forever after its own writes.
    fn on_state_value_changed(self: Arc<Self>, event: Event<serde_json::Value>) -> HandlerResult {
        if event.source == self.source {
            return Ok(());
        }

        let data: StateValueChangedData = serde_json::from_value(event.data)?;
        let Some(node) = self.tree.get(data.id) else {
            return Ok(());
        };
        let Some(parent) = node.parent.and_then(|id| self.tree.get(id)) else {
            return Ok(());
        };
        if parent.kind.as_str() != SHADING_STATE_TYPE {
            return Ok(());
        }

        if node.name == POSITION && self.is_manual_source(&event.source) {
            self.clone().set_override(&parent)?;
        }

        self.schedule_run();
        Ok(())
    }

    fn is_manual_source(&self, source: &Source) -> bool {
        self.config
            .manual_sources
            .iter()
            .any(|s| s == source.as_str())
    }

    /// Flag a shading as manually overridden and arm the reset timer
    ///
    /// Arming replaces any previously armed timer for the same node, so a
    /// second manual adjustment restarts the countdown.
    fn set_override(self: Arc<Self>, shading_node: &StateNode) -> StateTreeResult<()> {
        let override_node = self.ensure_child(
            shading_node,
            CONTROLLER_OVERRIDE,
            NodeOptions::of_kind(StateType::bool()).with_value(json!(false)),
        )?;
        debug!(path = %override_node.path, "Setting controller override");
        self.tree.set_value(override_node.id, json!(true), &self.source)?;

        let controller = self.clone();
        let node_id = override_node.id;
        let path = override_node.path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(controller.config.override_duration_secs)).await;
            controller.reset_override(node_id, &path);
        });

        if let Some(old) = self.reset_timers.insert(override_node.path, handle.abort_handle()) {
            old.abort();
        }
        Ok(())
    }

    fn reset_override(&self, node_id: NodeId, path: &str) {
        debug!(%path, "Resetting controller override");
        if let Err(e) = self.tree.set_value(node_id, json!(false), &self.source) {
            warn!(%path, error = %e, "Failed to reset controller override");
        }
        self.reset_timers.remove(path);
    }
}

/// Get a node by path or create it under the given parent
fn ensure_node(
    tree: &StateTree,
    parent: Option<NodeId>,
    name: &str,
    options: NodeOptions,
    source: &Source,
) -> StateTreeResult<StateNode> {
    let parent_path = parent
        .and_then(|id| tree.get(id))
        .map(|n| n.path)
        .unwrap_or_default();
    match tree.get_path(&format!("{parent_path}/{name}")) {
        Some(node) => Ok(node),
        None => tree.add(name, parent, options, source),
    }
}

/// Run a synchronous calculator off the async workers
///
/// Calculators may block on their own network calls; running them on the
/// blocking pool keeps the scheduler responsive, and the caller's timeout
/// can abandon an overdue run.
async fn run_calculator<T, F>(f: F) -> Result<T, CalculatorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CalculatorError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CalculatorError::Failed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::{CloudCoverPositionCalculator, FixedCloudCoverCalculator};
    use hub_state_tree::MemoryStore;
    use std::sync::atomic::AtomicUsize;

    struct CountingHeatGain {
        calls: Arc<AtomicUsize>,
        value: f64,
    }

    impl WantedHeatGainCalculator for CountingHeatGain {
        fn calculate_wanted_heat_gain(&self) -> Result<f64, CalculatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.value)
        }
    }

    struct MismatchedPositions;

    impl PositionCalculator for MismatchedPositions {
        fn get_positions(
            &self,
            _shadings: &[Shading],
            _wanted_heat_gain: f64,
            _cloud_cover: f64,
        ) -> Result<Vec<f64>, CalculatorError> {
            Ok(vec![0.5])
        }
    }

    struct Fixture {
        bus: Arc<EventBus>,
        tree: Arc<StateTree>,
        controller: Arc<ShadingController>,
        runs: Arc<AtomicUsize>,
        blind: StateNode,
    }

    fn fixture_with(
        config: ControllerConfig,
        position_calculator: Arc<dyn PositionCalculator>,
        wanted_heat_gain: f64,
    ) -> Fixture {
        let bus = Arc::new(EventBus::new());
        let tree = Arc::new(StateTree::new(bus.clone(), Arc::new(MemoryStore::new())));
        let src = Source::new("test");

        let roof = tree
            .add("roof", None, NodeOptions::of_kind("group"), &src)
            .unwrap();
        let blind = tree
            .add("blind1", Some(roof.id), NodeOptions::of_kind(SHADING_STATE_TYPE), &src)
            .unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let controller = Arc::new(
            ShadingController::new(
                tree.clone(),
                bus.clone(),
                Arc::new(CountingHeatGain {
                    calls: runs.clone(),
                    value: wanted_heat_gain,
                }),
                Arc::new(FixedCloudCoverCalculator::new(0.0)),
                position_calculator,
                config,
            )
            .unwrap(),
        );

        Fixture {
            bus,
            tree,
            controller,
            runs,
            blind,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            ControllerConfig::default(),
            Arc::new(CloudCoverPositionCalculator::new()),
            -500.0,
        )
    }

    #[tokio::test]
    async fn test_new_creates_settings_nodes() {
        let f = fixture();
        let _ = &f.controller;
        assert!(f.tree.get_path("/settings/location/longitude").is_some());
        assert!(f.tree.get_path("/settings/location/latitude").is_some());
        assert!(f.tree.get_path("/settings/location/elevation").is_some());
        assert!(f.tree.get_path("/settings/shading/wanted_heat_gain").is_some());
        assert!(f.tree.get_path("/settings/shading/cloud_cover").is_some());
    }

    #[tokio::test]
    async fn test_run_auto_creates_shading_children() {
        let f = fixture();
        f.controller.run().await.unwrap();

        let position = f.tree.get_path("/roof/blind1/position").unwrap();
        let minimum = f.tree.get_path("/roof/blind1/minimum_position").unwrap();
        let maximum = f.tree.get_path("/roof/blind1/maximum_position").unwrap();
        let override_node = f.tree.get_path("/roof/blind1/controller_override").unwrap();

        assert_eq!(minimum.value, Some(json!(0.0)));
        assert_eq!(maximum.value, Some(json!(1.0)));
        assert_eq!(override_node.value_bool(), Some(false));
        // Shade wanted under a clear sky: the run drove the blind closed
        assert_eq!(position.value, Some(json!(1.0)));
    }

    #[tokio::test]
    async fn test_run_writes_calculator_outputs_with_own_source() {
        let f = fixture();
        let mut rx = f.bus.subscribe(STATE_VALUE_CHANGED);
        f.controller.run().await.unwrap();

        let gain = f.tree.get_path("/settings/shading/wanted_heat_gain").unwrap();
        assert_eq!(gain.value, Some(json!(-500.0)));
        let cover = f.tree.get_path("/settings/shading/cloud_cover").unwrap();
        assert_eq!(cover.value, Some(json!(0.0)));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source.as_str(), CONTROLLER_SOURCE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_within_debounce_window_coalesce_into_one_run() {
        let f = fixture();
        f.controller.clone().start();

        // Initial run scheduled by start()
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(f.runs.load(Ordering::SeqCst), 1);

        let position = f.tree.get_path("/roof/blind1/position").unwrap();
        let manual = Source::new("websocket");
        for n in 0..5 {
            f.tree
                .set_value(position.id, json!(0.1 * n as f64), &manual)
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(f.runs.load(Ordering::SeqCst), 2);

        f.controller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_events_never_schedule_a_run() {
        let f = fixture();
        f.controller.clone().start();
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(f.runs.load(Ordering::SeqCst), 1);

        let position = f.tree.get_path("/roof/blind1/position").unwrap();
        f.tree
            .set_value(position.id, json!(0.3), &Source::new(CONTROLLER_SOURCE))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.runs.load(Ordering::SeqCst), 1);

        f.controller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_outside_shading_nodes_do_not_schedule() {
        let f = fixture();
        f.controller.clone().start();
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(f.runs.load(Ordering::SeqCst), 1);

        let src = Source::new("test");
        let lights = f
            .tree
            .add("lights", None, NodeOptions::of_kind("group"), &src)
            .unwrap();
        let bulb = f
            .tree
            .add("bulb", Some(lights.id), NodeOptions::of_kind(StateType::bool()), &src)
            .unwrap();
        f.tree.set_value(bulb.id, json!(true), &src).unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(f.runs.load(Ordering::SeqCst), 1);

        f.controller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_position_write_arms_override_and_timer_resets_it() {
        let f = fixture();
        f.controller.clone().start();
        tokio::time::sleep(Duration::from_secs(7)).await;

        let position = f.tree.get_path("/roof/blind1/position").unwrap();
        f.tree
            .set_value(position.id, json!(0.4), &Source::new("websocket"))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let override_node = f.tree.get_path("/roof/blind1/controller_override").unwrap();
        assert_eq!(override_node.value_bool(), Some(true));
        assert_eq!(f.controller.live_override_timers(), 1);

        tokio::time::sleep(Duration::from_secs(4 * 3600 + 1)).await;

        let override_node = f.tree.get_path("/roof/blind1/controller_override").unwrap();
        assert_eq!(override_node.value_bool(), Some(false));
        assert_eq!(f.controller.live_override_timers(), 0);

        f.controller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_manual_write_restarts_override_countdown() {
        let f = fixture();
        f.controller.clone().start();
        tokio::time::sleep(Duration::from_secs(7)).await;

        let position = f.tree.get_path("/roof/blind1/position").unwrap();
        let manual = Source::new("manual");

        f.tree.set_value(position.id, json!(0.4), &manual).unwrap();
        tokio::time::sleep(Duration::from_secs(2 * 3600)).await;

        f.tree.set_value(position.id, json!(0.6), &manual).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.controller.live_override_timers(), 1);

        // 4 h after the first write but only 2 h after the second
        tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
        let override_node = f.tree.get_path("/roof/blind1/controller_override").unwrap();
        assert_eq!(override_node.value_bool(), Some(true));

        tokio::time::sleep(Duration::from_secs(2 * 3600 + 1)).await;
        let override_node = f.tree.get_path("/roof/blind1/controller_override").unwrap();
        assert_eq!(override_node.value_bool(), Some(false));
        assert_eq!(f.controller.live_override_timers(), 0);

        f.controller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_writes_do_not_arm_override() {
        let f = fixture();
        f.controller.clone().start();
        tokio::time::sleep(Duration::from_secs(7)).await;

        // The initial run wrote positions with the controller's source
        let override_node = f.tree.get_path("/roof/blind1/controller_override").unwrap();
        assert_eq!(override_node.value_bool(), Some(false));
        assert_eq!(f.controller.live_override_timers(), 0);

        f.controller.stop();
    }

    #[tokio::test]
    async fn test_position_count_mismatch_aborts_without_position_writes() {
        let f = fixture_with(
            ControllerConfig::default(),
            Arc::new(MismatchedPositions),
            -500.0,
        );

        // Two shadings, but the calculator always returns one position
        let src = Source::new("test");
        let roof = f.tree.get_path("/roof").unwrap();
        f.tree
            .add("blind2", Some(roof.id), NodeOptions::of_kind(SHADING_STATE_TYPE), &src)
            .unwrap();

        let err = f.controller.run().await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Calculator(CalculatorError::PositionCountMismatch { expected: 2, got: 1 })
        ));

        // Earlier writes stay (no rollback), position writes never happened
        let gain = f.tree.get_path("/settings/shading/wanted_heat_gain").unwrap();
        assert_eq!(gain.value, Some(json!(-500.0)));
        let position = f.tree.get_path("/roof/blind1/position").unwrap();
        assert_eq!(position.value, Some(json!(0.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_run_and_timers() {
        let f = fixture();
        f.controller.clone().start();
        tokio::time::sleep(Duration::from_secs(7)).await;

        let position = f.tree.get_path("/roof/blind1/position").unwrap();
        f.tree
            .set_value(position.id, json!(0.4), &Source::new("websocket"))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.controller.live_override_timers(), 1);

        let runs_before = f.runs.load(Ordering::SeqCst);
        f.controller.stop();
        assert_eq!(f.controller.live_override_timers(), 0);

        tokio::time::sleep(Duration::from_secs(5 * 3600)).await;
        assert_eq!(f.runs.load(Ordering::SeqCst), runs_before);
    }
}
