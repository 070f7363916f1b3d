//! Per-frame driver of the streaming state machine.
//!
//! Each [`DrainLoop::tick`] first absorbs background results, then does
//! exactly one of:
//! - recenter: the observer entered a new cluster, so dispose what left the
//!   neighborhood and dispatch generation for what entered it;
//! - drain: the observer stayed put, so build the reserved payload once its
//!   delay has passed and reserve the next queue head when the slot is free.
//!
//! A due build waits in its slot through recenter ticks.
//!
//! Nothing in a tick waits on a background unit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cosmos_common::{ClusterCoord, StreamConfig, WorkerSpec};
use glam::Vec3;

use crate::budget::{StreamStats, TickTimer};
use crate::distributor::WorkerDistributor;
use crate::error::StreamError;
use crate::grid::{ClusterGrid, EnqueueSummary};
use crate::matter::MatterFactory;
use crate::worker::Generator;

const TICK_HISTORY: usize = 120;

/// Explicit streaming context shared by the grid, the distributor and the
/// loop. Only the loop mutates it.
#[derive(Debug, Clone)]
pub struct StreamContext {
    config: Arc<StreamConfig>,
    universe: u32,
    epoch: u64,
    active: bool,
}

impl StreamContext {
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            universe: 0,
            epoch: 0,
            active: true,
        })
    }

    pub fn config(&self) -> &Arc<StreamConfig> {
        &self.config
    }

    pub fn universe(&self) -> u32 {
        self.universe
    }

    /// Incremented on every universe switch; tags generation requests.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// What the tick's exclusive branch did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// The loop is inactive; nothing ran.
    Inactive,
    Recentered {
        center: ClusterCoord,
        dispatched: usize,
        disposed: usize,
    },
    DrainScheduled(ClusterCoord),
    /// A drain is already in flight or nothing is pending.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub action: TickAction,
    /// Cluster whose delayed build ran during this tick.
    pub built: Option<ClusterCoord>,
    pub enqueued: EnqueueSummary,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledDrain {
    coord: ClusterCoord,
    due: Instant,
}

/// Streaming driver: owns the grid, the distributor and the matter factory.
pub struct DrainLoop<F: MatterFactory> {
    context: StreamContext,
    grid: ClusterGrid,
    distributor: WorkerDistributor,
    factory: F,
    last_coord: Option<ClusterCoord>,
    /// The single drain slot.
    scheduled: Option<ScheduledDrain>,
    drain_delay: Duration,
    stats: StreamStats,
    timer: TickTimer,
}

impl<F: MatterFactory> DrainLoop<F> {
    /// Validate `config`, spawn the worker pool and build the loop.
    pub fn new<P>(config: StreamConfig, provide: P, factory: F) -> Result<Self, StreamError>
    where
        P: FnMut(&WorkerSpec) -> Option<Box<dyn Generator>>,
    {
        let context = StreamContext::new(config)?;
        let distributor = WorkerDistributor::spawn(context.config(), provide)?;
        Self::from_parts(context, distributor, factory)
    }

    pub fn from_parts(
        context: StreamContext,
        distributor: WorkerDistributor,
        factory: F,
    ) -> Result<Self, StreamError> {
        let grid = ClusterGrid::new(context.config())?;
        let drain_delay = context.config().drain_delay();
        Ok(Self {
            context,
            grid,
            distributor,
            factory,
            last_coord: None,
            scheduled: None,
            drain_delay,
            stats: StreamStats::default(),
            timer: TickTimer::new(TICK_HISTORY),
        })
    }

    /// Advance the streaming state machine by one frame.
    pub fn tick(&mut self, observer: Vec3, now: Instant) -> TickReport {
        if !self.context.active {
            return TickReport {
                action: TickAction::Inactive,
                built: None,
                enqueued: EnqueueSummary::default(),
            };
        }

        let _span = tracing::info_span!("stream_tick", tick = self.stats.ticks).entered();
        let started = Instant::now();

        let enqueued = self.poll_results();

        let coord = self.grid.cluster_coordinate(observer);
        if self.last_coord != Some(coord) {
            // A due drain stays in its slot until the next unchanged tick.
            self.last_coord = Some(coord);
            let action = self.recenter(coord);
            return self.finish_tick(started, action, None, enqueued);
        }

        let built = self.complete_due_drain(now);
        let action = if self.scheduled.is_none() {
            match self.grid.next_pending() {
                Some(head) => {
                    self.scheduled = Some(ScheduledDrain {
                        coord: head,
                        due: now + self.drain_delay,
                    });
                    tracing::trace!(%head, "drain scheduled");
                    TickAction::DrainScheduled(head)
                }
                None => TickAction::Idle,
            }
        } else {
            TickAction::Idle
        };
        self.finish_tick(started, action, built, enqueued)
    }

    fn finish_tick(
        &mut self,
        started: Instant,
        action: TickAction,
        built: Option<ClusterCoord>,
        enqueued: EnqueueSummary,
    ) -> TickReport {
        self.stats.ticks += 1;
        self.stats.last_tick_time = started.elapsed();
        self.stats.sync(&self.grid, self.distributor.stats());
        self.timer.record(self.stats.last_tick_time);

        TickReport {
            action,
            built,
            enqueued,
        }
    }

    /// Move every result that has already arrived into the pending queue.
    pub fn poll_results(&mut self) -> EnqueueSummary {
        let summary = self
            .distributor
            .receive_into(&mut self.grid, self.context.epoch);
        self.stats.record_enqueue(summary);
        summary
    }

    fn complete_due_drain(&mut self, now: Instant) -> Option<ClusterCoord> {
        let scheduled = self.scheduled?;
        if now < scheduled.due {
            return None;
        }
        self.scheduled = None;

        let Some(pending) = self.grid.take_pending(scheduled.coord) else {
            tracing::debug!(coord = %scheduled.coord, "scheduled cluster no longer pending");
            return None;
        };

        let mut matter = self.factory.create(pending.kind);
        matter.generate(pending.data, scheduled.coord, pending.subkind);
        matter.show();
        self.grid.activate(scheduled.coord, matter);
        self.stats.drained += 1;

        tracing::debug!(
            coord = %scheduled.coord,
            kind = %pending.kind,
            subkind = %pending.subkind,
            "cluster activated"
        );
        Some(scheduled.coord)
    }

    fn recenter(&mut self, center: ClusterCoord) -> TickAction {
        let _span = tracing::debug_span!("recenter", %center).entered();
        self.stats.recenters += 1;

        let status = self.grid.recenter(center);
        let disposed = self.grid.dispose_clusters(&status.to_dispose);

        let mut dispatched = 0;
        for coord in status.to_populate {
            if !self.grid.mark_requested(coord) {
                continue;
            }
            match self
                .distributor
                .dispatch(coord, self.context.epoch, self.context.universe)
            {
                Ok(_) => dispatched += 1,
                Err(e) => {
                    self.grid.unmark_requested(coord);
                    tracing::error!(%coord, error = %e, "dispatch failed");
                }
            }
        }

        tracing::debug!(dispatched, disposed, "recentered");
        TickAction::Recentered {
            center,
            dispatched,
            disposed,
        }
    }

    /// Gate the loop. While inactive, ticks do nothing at all.
    pub fn set_active(&mut self, active: bool) {
        self.context.active = active;
    }

    /// Tear down the current universe and stream the next one.
    ///
    /// Every active cluster is disposed, queued and pending work is
    /// forgotten and results still in flight become stale.
    pub fn switch_universe(&mut self, universe: u32) {
        let disposed = self.grid.reset();
        self.scheduled = None;
        self.last_coord = None;
        self.context.universe = universe;
        self.context.epoch += 1;
        self.stats.sync(&self.grid, self.distributor.stats());
        tracing::info!(universe, epoch = self.context.epoch, disposed, "switched universe");
    }

    pub fn is_draining(&self) -> bool {
        self.scheduled.is_some()
    }

    pub fn context(&self) -> &StreamContext {
        &self.context
    }

    pub fn grid(&self) -> &ClusterGrid {
        &self.grid
    }

    pub fn distributor(&self) -> &WorkerDistributor {
        &self.distributor
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn timer(&self) -> &TickTimer {
        &self.timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matter::Matter;
    use crate::worker::GenerationRequest;
    use cosmos_common::{AttributeBatch, AttributeLayer, ContentKind, ContentSubkind, WorkerRef};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Generated(ClusterCoord, ContentKind, ContentSubkind),
        Shown(ClusterCoord),
        Disposed(ClusterCoord),
    }

    #[derive(Default)]
    struct RecordingFactory {
        events: Rc<RefCell<Vec<Event>>>,
    }

    struct RecordingMatter {
        kind: ContentKind,
        coord: Option<ClusterCoord>,
        events: Rc<RefCell<Vec<Event>>>,
    }

    impl Matter for RecordingMatter {
        fn generate(&mut self, _: AttributeBatch, position: ClusterCoord, subkind: ContentSubkind) {
            self.coord = Some(position);
            self.events
                .borrow_mut()
                .push(Event::Generated(position, self.kind, subkind));
        }

        fn show(&mut self) {
            if let Some(c) = self.coord {
                self.events.borrow_mut().push(Event::Shown(c));
            }
        }

        fn dispose(&mut self) {
            if let Some(c) = self.coord {
                self.events.borrow_mut().push(Event::Disposed(c));
            }
        }
    }

    impl MatterFactory for RecordingFactory {
        fn create(&mut self, kind: ContentKind) -> Box<dyn Matter> {
            Box::new(RecordingMatter {
                kind,
                coord: None,
                events: Rc::clone(&self.events),
            })
        }
    }

    impl RecordingFactory {
        fn disposals_of(&self, coord: ClusterCoord) -> usize {
            self.events
                .borrow()
                .iter()
                .filter(|e| **e == Event::Disposed(coord))
                .count()
        }

        fn generated(&self) -> Vec<(ClusterCoord, ContentKind)> {
            self.events
                .borrow()
                .iter()
                .filter_map(|e| match e {
                    Event::Generated(c, k, _) => Some((*c, *k)),
                    _ => None,
                })
                .collect()
        }
    }

    fn single_point(_coord: ClusterCoord, _request: &GenerationRequest) -> AttributeBatch {
        let mut layer = AttributeLayer::with_capacity("marker", 1);
        layer.push(Vec3::ZERO, [1.0; 3]);
        AttributeBatch::new(vec![layer])
    }

    fn config() -> StreamConfig {
        StreamConfig {
            cluster_size: 2000.0,
            drain_delay_ms: 10,
            neighborhood_radius: 1,
            workers: vec![
                WorkerSpec::new(ContentKind::Starfield, ContentSubkind::Open, 90),
                WorkerSpec::new(ContentKind::Nebula, ContentSubkind::Emission, 10),
            ],
            origin_worker: WorkerRef {
                kind: ContentKind::Nebula,
                subkind: ContentSubkind::Emission,
            },
            ..StreamConfig::default()
        }
    }

    fn drain_loop() -> DrainLoop<RecordingFactory> {
        DrainLoop::new(
            config(),
            |_| Some(Box::new(single_point) as Box<dyn Generator>),
            RecordingFactory::default(),
        )
        .unwrap()
    }

    /// Wait for background results without ticking.
    fn pump_until_pending(dl: &mut DrainLoop<RecordingFactory>, pending: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while dl.grid().pending_len() < pending && Instant::now() < deadline {
            dl.poll_results();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(dl.grid().pending_len(), pending);
    }

    fn assert_exclusive(dl: &DrainLoop<RecordingFactory>) {
        for coord in dl.grid().active_coords() {
            assert!(!dl.grid().is_pending(coord), "{coord} active and pending");
        }
    }

    /// Tick at a fixed position, advancing the clock past the drain delay
    /// every other tick, until nothing is pending.
    fn drain_all(
        dl: &mut DrainLoop<RecordingFactory>,
        position: Vec3,
        mut now: Instant,
    ) -> (Vec<ClusterCoord>, Instant) {
        let mut built = Vec::new();
        for _ in 0..1000 {
            if dl.grid().pending_len() == 0 && !dl.is_draining() {
                break;
            }
            let report = dl.tick(position, now);
            built.extend(report.built);
            assert_exclusive(dl);
            now += Duration::from_millis(11);
        }
        (built, now)
    }

    #[test]
    fn first_tick_dispatches_full_neighborhood() {
        let mut dl = drain_loop();
        let report = dl.tick(Vec3::ZERO, Instant::now());
        assert_eq!(
            report.action,
            TickAction::Recentered {
                center: ClusterCoord::ORIGIN,
                dispatched: 9,
                disposed: 0,
            }
        );
        assert_eq!(dl.stats().dispatched, 9);
        pump_until_pending(&mut dl, 9);
        assert_eq!(dl.grid().requested_len(), 0);
    }

    #[test]
    fn only_one_drain_in_flight() {
        let mut dl = drain_loop();
        let t0 = Instant::now();
        dl.tick(Vec3::ZERO, t0);
        pump_until_pending(&mut dl, 9);

        let head = dl.grid().next_pending().unwrap();
        let report = dl.tick(Vec3::ZERO, t0);
        assert_eq!(report.action, TickAction::DrainScheduled(head));

        // Ticks before the delay elapses neither build nor start a second drain.
        for ms in [1, 5, 9] {
            let report = dl.tick(Vec3::ZERO, t0 + Duration::from_millis(ms));
            assert_eq!(report.action, TickAction::Idle);
            assert_eq!(report.built, None);
        }
        assert_eq!(dl.grid().pending_len(), 9);
        assert!(dl.grid().is_pending(head));

        let report = dl.tick(Vec3::ZERO, t0 + Duration::from_millis(10));
        assert_eq!(report.built, Some(head));
        assert!(dl.grid().is_active(head));
        assert_eq!(dl.grid().pending_len(), 8);
        // The slot freed by the build, so this same tick schedules the next head.
        assert!(matches!(report.action, TickAction::DrainScheduled(next) if next != head));
    }

    #[test]
    fn drains_follow_arrival_order() {
        let mut dl = drain_loop();
        let t0 = Instant::now();
        dl.tick(Vec3::ZERO, t0);
        pump_until_pending(&mut dl, 9);

        let arrival: Vec<ClusterCoord> = dl.grid().pending_order().collect();
        let (built, _) = drain_all(&mut dl, Vec3::ZERO, t0);
        assert_eq!(built, arrival);
        assert_eq!(dl.grid().active_len(), 9);
        assert_eq!(dl.stats().drained, 9);
    }

    #[test]
    fn built_matter_is_generated_then_shown() {
        let mut dl = drain_loop();
        let t0 = Instant::now();
        dl.tick(Vec3::ZERO, t0);
        pump_until_pending(&mut dl, 9);
        drain_all(&mut dl, Vec3::ZERO, t0);

        let events = dl.factory().events.borrow();
        for pair in events.chunks(2) {
            match pair {
                [Event::Generated(a, ..), Event::Shown(b)] => assert_eq!(a, b),
                other => panic!("unexpected event order {other:?}"),
            }
        }
    }

    #[test]
    fn origin_is_built_by_origin_worker() {
        let mut dl = drain_loop();
        let t0 = Instant::now();
        dl.tick(Vec3::ZERO, t0);
        pump_until_pending(&mut dl, 9);
        drain_all(&mut dl, Vec3::ZERO, t0);

        let origin_kind = dl
            .factory()
            .generated()
            .into_iter()
            .find(|(c, _)| c.is_origin())
            .map(|(_, k)| k);
        assert_eq!(origin_kind, Some(ContentKind::Nebula));
    }

    #[test]
    fn recenter_tick_does_not_start_a_drain() {
        let mut dl = drain_loop();
        let t0 = Instant::now();
        dl.tick(Vec3::ZERO, t0);
        pump_until_pending(&mut dl, 9);

        let report = dl.tick(Vec3::new(2000.0, 0.0, 0.0), t0);
        assert!(matches!(
            report.action,
            TickAction::Recentered { dispatched: 3, .. }
        ));
        assert!(!dl.is_draining());

        let report = dl.tick(Vec3::new(2000.0, 0.0, 0.0), t0);
        assert!(matches!(report.action, TickAction::DrainScheduled(_)));
    }

    #[test]
    fn recenter_tick_defers_a_due_build() {
        let mut dl = drain_loop();
        let t0 = Instant::now();
        dl.tick(Vec3::ZERO, t0);
        pump_until_pending(&mut dl, 9);

        let report = dl.tick(Vec3::ZERO, t0);
        let TickAction::DrainScheduled(head) = report.action else {
            panic!("expected a scheduled drain, got {:?}", report.action);
        };

        // Deadline passed, but the observer changed cluster: only the recenter runs.
        let east = Vec3::new(2000.0, 0.0, 0.0);
        let report = dl.tick(east, t0 + Duration::from_millis(10));
        assert!(matches!(report.action, TickAction::Recentered { .. }));
        assert_eq!(report.built, None);
        assert!(dl.factory().generated().is_empty());
        assert!(dl.is_draining());
        assert!(dl.grid().is_pending(head));

        let report = dl.tick(east, t0 + Duration::from_millis(11));
        assert_eq!(report.built, Some(head));
        assert!(dl.grid().is_active(head));
        assert_eq!(dl.factory().generated().len(), 1);
    }

    #[test]
    fn moving_away_disposes_left_behind_clusters_once() {
        let mut dl = drain_loop();
        let t0 = Instant::now();
        dl.tick(Vec3::ZERO, t0);
        pump_until_pending(&mut dl, 9);
        let (_, t1) = drain_all(&mut dl, Vec3::ZERO, t0);

        let east = Vec3::new(2000.0, 0.0, 0.0);
        let report = dl.tick(east, t1);
        assert_eq!(
            report.action,
            TickAction::Recentered {
                center: ClusterCoord::planar(1, 0),
                dispatched: 3,
                disposed: 3,
            }
        );
        for z in -1..=1 {
            let left = ClusterCoord::planar(-1, z);
            assert!(!dl.grid().is_active(left));
            assert_eq!(dl.factory().disposals_of(left), 1);
        }

        // Going back and forth never disposes anything twice.
        dl.tick(Vec3::ZERO, t1);
        dl.tick(east, t1);
        for z in -1..=1 {
            assert_eq!(dl.factory().disposals_of(ClusterCoord::planar(-1, z)), 1);
        }
        assert_eq!(dl.stats().disposed, 3);
    }

    #[test]
    fn origin_survives_long_journeys() {
        let mut dl = drain_loop();
        let t0 = Instant::now();
        dl.tick(Vec3::ZERO, t0);
        pump_until_pending(&mut dl, 9);
        let (_, t1) = drain_all(&mut dl, Vec3::ZERO, t0);

        dl.tick(Vec3::new(0.0, 0.0, -20_000.0), t1);
        assert!(dl.grid().is_active(ClusterCoord::ORIGIN));
        assert_eq!(dl.factory().disposals_of(ClusterCoord::ORIGIN), 0);
    }

    #[test]
    fn inactive_loop_does_nothing() {
        let mut dl = drain_loop();
        dl.set_active(false);
        let report = dl.tick(Vec3::ZERO, Instant::now());
        assert_eq!(report.action, TickAction::Inactive);
        assert_eq!(dl.stats().ticks, 0);
        assert_eq!(dl.stats().dispatched, 0);

        dl.set_active(true);
        assert!(matches!(
            dl.tick(Vec3::ZERO, Instant::now()).action,
            TickAction::Recentered { .. }
        ));
    }

    #[test]
    fn switching_universe_restarts_streaming() {
        let mut dl = drain_loop();
        let t0 = Instant::now();
        dl.tick(Vec3::ZERO, t0);
        pump_until_pending(&mut dl, 9);
        let (_, t1) = drain_all(&mut dl, Vec3::ZERO, t0);

        dl.switch_universe(2);
        assert_eq!(dl.context().universe(), 2);
        assert_eq!(dl.context().epoch(), 1);
        assert_eq!(dl.grid().active_len(), 0);
        assert_eq!(dl.factory().disposals_of(ClusterCoord::ORIGIN), 1);

        let report = dl.tick(Vec3::ZERO, t1);
        assert!(matches!(
            report.action,
            TickAction::Recentered { dispatched: 9, .. }
        ));
        pump_until_pending(&mut dl, 9);
    }

    #[test]
    fn in_flight_results_are_stale_after_switch() {
        let mut dl = drain_loop();
        dl.tick(Vec3::ZERO, Instant::now());
        dl.switch_universe(1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while dl.distributor().stats().results_received < 9 && Instant::now() < deadline {
            dl.poll_results();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(dl.distributor().stats().stale_epoch_results, 9);
        assert_eq!(dl.grid().pending_len(), 0);
    }
}
