use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::AddAssign;

use cosmos_common::{
    AttributeBatch, ClusterCoord, ConfigError, ContentKind, ContentSubkind, StreamConfig,
};

use crate::matter::Matter;

/// Lifecycle state of a single cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Unloaded,
    /// Generation requested, no payload yet.
    Queued,
    /// Payload received, waiting for the drain loop.
    Pending,
    /// Matter built and shown.
    Active,
}

/// Population and disposal decisions for a neighborhood center.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterStatus {
    pub to_populate: Vec<ClusterCoord>,
    pub to_dispose: Vec<ClusterCoord>,
}

/// A received payload waiting to be turned into matter.
#[derive(Debug, Clone)]
pub struct PendingCluster {
    pub data: AttributeBatch,
    pub kind: ContentKind,
    pub subkind: ContentSubkind,
}

/// What happened to each batch handed to [`ClusterGrid::enqueue_payload`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueSummary {
    pub accepted: usize,
    /// Outside the current neighborhood.
    pub stale: usize,
    /// Already active or pending.
    pub duplicate: usize,
    /// Missing or inconsistent attribute data.
    pub malformed: usize,
}

impl AddAssign for EnqueueSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.accepted += rhs.accepted;
        self.stale += rhs.stale;
        self.duplicate += rhs.duplicate;
        self.malformed += rhs.malformed;
    }
}

/// Spatial index and state machine for streamed clusters.
///
/// Owns the active matter and the FIFO of pending payloads. A coordinate is
/// in at most one of the requested set, the pending queue and the active
/// set at any time. All mutation happens on the control loop's thread.
pub struct ClusterGrid {
    cluster_size: f32,
    radius: i32,
    center: Option<ClusterCoord>,
    active: HashMap<ClusterCoord, Box<dyn Matter>>,
    pending: HashMap<ClusterCoord, PendingCluster>,
    /// Arrival order of `pending` keys.
    arrivals: VecDeque<ClusterCoord>,
    requested: HashSet<ClusterCoord>,
    disposed_total: u64,
}

impl ClusterGrid {
    pub fn new(config: &StreamConfig) -> Result<Self, ConfigError> {
        Self::with_geometry(config.cluster_size, config.neighborhood_radius)
    }

    pub fn with_geometry(cluster_size: f32, radius: i32) -> Result<Self, ConfigError> {
        if !(cluster_size.is_finite() && cluster_size > 0.0) {
            return Err(ConfigError::InvalidClusterSize(cluster_size));
        }
        if radius < 0 {
            return Err(ConfigError::NegativeRadius(radius));
        }
        Ok(Self {
            cluster_size,
            radius,
            center: None,
            active: HashMap::new(),
            pending: HashMap::new(),
            arrivals: VecDeque::new(),
            requested: HashSet::new(),
            disposed_total: 0,
        })
    }

    pub fn cluster_size(&self) -> f32 {
        self.cluster_size
    }

    pub fn radius(&self) -> i32 {
        self.radius
    }

    /// Center of the most recent [`recenter`](Self::recenter).
    pub fn center(&self) -> Option<ClusterCoord> {
        self.center
    }

    /// Map a world position to the nearest cluster on the streaming plane.
    pub fn cluster_coordinate(&self, position: glam::Vec3) -> ClusterCoord {
        ClusterCoord::planar(
            (position.x / self.cluster_size).round() as i32,
            (position.z / self.cluster_size).round() as i32,
        )
    }

    /// Square neighborhood around `center`, x-major.
    pub fn neighborhood(&self, center: ClusterCoord) -> Vec<ClusterCoord> {
        let r = self.radius;
        let mut coords = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
        for dx in -r..=r {
            for dz in -r..=r {
                coords.push(ClusterCoord::planar(center.x + dx, center.z + dz));
            }
        }
        coords
    }

    fn in_neighborhood(&self, center: ClusterCoord, coord: ClusterCoord) -> bool {
        coord.y == 0 && center.planar_distance(coord) <= self.radius
    }

    /// Which clusters must be requested and which must go, for `center`.
    ///
    /// Pure query: nothing is recorded.
    pub fn clusters_status(&self, center: ClusterCoord) -> ClusterStatus {
        let to_populate = self
            .neighborhood(center)
            .into_iter()
            .filter(|c| self.state(*c) == ClusterState::Unloaded)
            .collect();

        let mut to_dispose: Vec<ClusterCoord> = self
            .active
            .keys()
            .filter(|c| !c.is_origin() && !self.in_neighborhood(center, **c))
            .copied()
            .collect();
        to_dispose.sort();

        ClusterStatus {
            to_populate,
            to_dispose,
        }
    }

    /// Record `center` as the observer's cluster and compute its status.
    pub fn recenter(&mut self, center: ClusterCoord) -> ClusterStatus {
        self.center = Some(center);
        self.clusters_status(center)
    }

    /// Whether a payload for `coord` is still of interest.
    pub fn is_wanted(&self, coord: ClusterCoord) -> bool {
        self.center.is_none_or(|center| self.in_neighborhood(center, coord))
    }

    pub fn state(&self, coord: ClusterCoord) -> ClusterState {
        if self.active.contains_key(&coord) {
            ClusterState::Active
        } else if self.pending.contains_key(&coord) {
            ClusterState::Pending
        } else if self.requested.contains(&coord) {
            ClusterState::Queued
        } else {
            ClusterState::Unloaded
        }
    }

    /// Dispose the matter of every listed active cluster.
    ///
    /// Coordinates that are not active, and the origin, are skipped.
    /// Returns the number of matters disposed.
    pub fn dispose_clusters(&mut self, coords: &[ClusterCoord]) -> usize {
        let mut disposed = 0;
        for coord in coords {
            if coord.is_origin() {
                tracing::debug!("refusing to dispose origin cluster");
                continue;
            }
            if let Some(mut matter) = self.active.remove(coord) {
                matter.dispose();
                disposed += 1;
                tracing::debug!(%coord, "disposed cluster");
            }
        }
        self.disposed_total += disposed as u64;
        disposed
    }

    /// Dispose everything and forget all pending and requested clusters,
    /// the origin included.
    pub fn reset(&mut self) -> usize {
        let disposed = self.active.len();
        for (coord, mut matter) in self.active.drain() {
            matter.dispose();
            tracing::trace!(%coord, "disposed cluster on reset");
        }
        self.disposed_total += disposed as u64;
        self.pending.clear();
        self.arrivals.clear();
        self.requested.clear();
        self.center = None;
        disposed
    }

    pub fn mark_requested(&mut self, coord: ClusterCoord) -> bool {
        if self.state(coord) != ClusterState::Unloaded {
            return false;
        }
        self.requested.insert(coord)
    }

    pub fn unmark_requested(&mut self, coord: ClusterCoord) -> bool {
        self.requested.remove(&coord)
    }

    /// Queue received payloads for draining.
    ///
    /// Each batch is inserted only if its coordinate is neither active nor
    /// pending, is still wanted, and carries well-formed data. Everything
    /// else is dropped without error.
    pub fn enqueue_payload(
        &mut self,
        batches: Vec<(ClusterCoord, AttributeBatch)>,
        kind: ContentKind,
        subkind: ContentSubkind,
    ) -> EnqueueSummary {
        let mut summary = EnqueueSummary::default();
        for (coord, data) in batches {
            self.requested.remove(&coord);

            if !data.is_well_formed() {
                summary.malformed += 1;
                tracing::warn!(%coord, %kind, %subkind, "discarding malformed payload");
                continue;
            }
            if self.active.contains_key(&coord) || self.pending.contains_key(&coord) {
                summary.duplicate += 1;
                tracing::debug!(%coord, "discarding duplicate payload");
                continue;
            }
            if !self.is_wanted(coord) {
                summary.stale += 1;
                tracing::trace!(%coord, "discarding stale payload");
                continue;
            }

            self.pending.insert(
                coord,
                PendingCluster {
                    data,
                    kind,
                    subkind,
                },
            );
            self.arrivals.push_back(coord);
            summary.accepted += 1;
        }
        summary
    }

    /// Oldest pending coordinate, without removing it.
    pub fn next_pending(&self) -> Option<ClusterCoord> {
        self.arrivals.front().copied()
    }

    /// Remove a pending payload so it can be built.
    pub fn take_pending(&mut self, coord: ClusterCoord) -> Option<PendingCluster> {
        let pending = self.pending.remove(&coord)?;
        if self.arrivals.front() == Some(&coord) {
            self.arrivals.pop_front();
        } else {
            self.arrivals.retain(|c| *c != coord);
        }
        Some(pending)
    }

    /// Hand ownership of a shown matter to the grid.
    pub fn activate(&mut self, coord: ClusterCoord, matter: Box<dyn Matter>) {
        debug_assert!(!self.pending.contains_key(&coord));
        if let Some(mut previous) = self.active.insert(coord, matter) {
            tracing::warn!(%coord, "replacing active matter");
            previous.dispose();
            self.disposed_total += 1;
        }
    }

    /// Pending coordinates in drain order.
    pub fn pending_order(&self) -> impl Iterator<Item = ClusterCoord> + '_ {
        self.arrivals.iter().copied()
    }

    pub fn active_coords(&self) -> impl Iterator<Item = ClusterCoord> + '_ {
        self.active.keys().copied()
    }

    pub fn is_active(&self, coord: ClusterCoord) -> bool {
        self.active.contains_key(&coord)
    }

    pub fn is_pending(&self, coord: ClusterCoord) -> bool {
        self.pending.contains_key(&coord)
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn requested_len(&self) -> usize {
        self.requested.len()
    }

    pub fn disposed_total(&self) -> u64 {
        self.disposed_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosmos_common::AttributeLayer;
    use glam::Vec3;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct TrackedMatter {
        disposals: Rc<RefCell<Vec<ClusterCoord>>>,
        coord: ClusterCoord,
    }

    impl Matter for TrackedMatter {
        fn generate(&mut self, _: AttributeBatch, position: ClusterCoord, _: ContentSubkind) {
            self.coord = position;
        }
        fn show(&mut self) {}
        fn dispose(&mut self) {
            self.disposals.borrow_mut().push(self.coord);
        }
    }

    fn batch() -> AttributeBatch {
        let mut layer = AttributeLayer::with_capacity("marker", 1);
        layer.push(Vec3::ZERO, [1.0; 3]);
        AttributeBatch::new(vec![layer])
    }

    fn tracked(coord: ClusterCoord, log: &Rc<RefCell<Vec<ClusterCoord>>>) -> Box<dyn Matter> {
        Box::new(TrackedMatter {
            disposals: Rc::clone(log),
            coord,
        })
    }

    fn enqueue(grid: &mut ClusterGrid, coords: &[ClusterCoord]) -> EnqueueSummary {
        grid.enqueue_payload(
            coords.iter().map(|c| (*c, batch())).collect(),
            ContentKind::Starfield,
            ContentSubkind::Open,
        )
    }

    fn planar_square(xs: std::ops::RangeInclusive<i32>) -> Vec<ClusterCoord> {
        let mut out = Vec::new();
        for x in xs {
            for z in -1..=1 {
                out.push(ClusterCoord::planar(x, z));
            }
        }
        out
    }

    #[test]
    fn invalid_geometry_is_an_error() {
        assert!(matches!(
            ClusterGrid::with_geometry(0.0, 1),
            Err(ConfigError::InvalidClusterSize(_))
        ));
        assert!(matches!(
            ClusterGrid::with_geometry(f32::NAN, 1),
            Err(ConfigError::InvalidClusterSize(_))
        ));
        assert!(matches!(
            ClusterGrid::with_geometry(10.0, -2),
            Err(ConfigError::NegativeRadius(-2))
        ));
        assert!(ClusterGrid::with_geometry(10.0, 0).is_ok());
    }

    #[test]
    fn position_rounds_to_nearest_cluster() {
        let grid = ClusterGrid::with_geometry(2000.0, 1).unwrap();
        assert_eq!(grid.cluster_coordinate(Vec3::ZERO), ClusterCoord::ORIGIN);
        assert_eq!(
            grid.cluster_coordinate(Vec3::new(999.0, 0.0, -999.0)),
            ClusterCoord::ORIGIN
        );
        assert_eq!(
            grid.cluster_coordinate(Vec3::new(1001.0, 5000.0, -1001.0)),
            ClusterCoord::planar(1, -1)
        );
        assert_eq!(
            grid.cluster_coordinate(Vec3::new(-4200.0, 0.0, 6100.0)),
            ClusterCoord::planar(-2, 3)
        );
    }

    #[test]
    fn origin_status_populates_full_neighborhood() {
        let grid = ClusterGrid::with_geometry(2000.0, 1).unwrap();
        let status = grid.clusters_status(ClusterCoord::ORIGIN);
        assert_eq!(status.to_populate, planar_square(-1..=1));
        assert!(status.to_dispose.is_empty());
    }

    #[test]
    fn active_origin_is_not_repopulated() {
        let log = Rc::default();
        let mut grid = ClusterGrid::with_geometry(2000.0, 1).unwrap();
        grid.activate(ClusterCoord::ORIGIN, tracked(ClusterCoord::ORIGIN, &log));
        let status = grid.clusters_status(ClusterCoord::ORIGIN);
        assert_eq!(status.to_populate.len(), 8);
        assert!(!status.to_populate.contains(&ClusterCoord::ORIGIN));
    }

    #[test]
    fn moving_one_cluster_shifts_the_border() {
        let log = Rc::default();
        let mut grid = ClusterGrid::with_geometry(2000.0, 1).unwrap();
        for c in planar_square(-1..=1) {
            grid.activate(c, tracked(c, &log));
        }

        let status = grid.recenter(ClusterCoord::planar(1, 0));
        assert_eq!(status.to_dispose, planar_square(-1..=-1));
        assert_eq!(status.to_populate, planar_square(2..=2));
    }

    #[test]
    fn origin_is_never_scheduled_for_disposal() {
        let log = Rc::default();
        let mut grid = ClusterGrid::with_geometry(10.0, 1).unwrap();
        grid.activate(ClusterCoord::ORIGIN, tracked(ClusterCoord::ORIGIN, &log));
        let status = grid.recenter(ClusterCoord::planar(50, 50));
        assert!(status.to_dispose.is_empty());
        assert_eq!(grid.dispose_clusters(&[ClusterCoord::ORIGIN]), 0);
        assert!(grid.is_active(ClusterCoord::ORIGIN));
    }

    #[test]
    fn pending_and_requested_are_not_repopulated() {
        let mut grid = ClusterGrid::with_geometry(10.0, 1).unwrap();
        grid.recenter(ClusterCoord::ORIGIN);
        enqueue(&mut grid, &[ClusterCoord::planar(1, 1)]);
        assert!(grid.mark_requested(ClusterCoord::planar(-1, -1)));

        let status = grid.clusters_status(ClusterCoord::ORIGIN);
        assert_eq!(status.to_populate.len(), 7);
        assert_eq!(grid.state(ClusterCoord::planar(1, 1)), ClusterState::Pending);
        assert_eq!(grid.state(ClusterCoord::planar(-1, -1)), ClusterState::Queued);
        assert!(!grid.mark_requested(ClusterCoord::planar(1, 1)));
    }

    #[test]
    fn dispose_is_idempotent() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut grid = ClusterGrid::with_geometry(10.0, 1).unwrap();
        let c = ClusterCoord::planar(2, 0);
        grid.activate(c, tracked(c, &log));

        assert_eq!(grid.dispose_clusters(&[c]), 1);
        assert_eq!(grid.dispose_clusters(&[c]), 0);
        assert_eq!(*log.borrow(), vec![c]);
        assert_eq!(grid.state(c), ClusterState::Unloaded);
        assert_eq!(grid.disposed_total(), 1);
    }

    #[test]
    fn disposing_unknown_coordinates_is_a_no_op() {
        let mut grid = ClusterGrid::with_geometry(10.0, 1).unwrap();
        grid.recenter(ClusterCoord::ORIGIN);
        enqueue(&mut grid, &[ClusterCoord::planar(0, 1)]);
        assert_eq!(
            grid.dispose_clusters(&[ClusterCoord::planar(0, 1), ClusterCoord::planar(9, 9)]),
            0
        );
        assert!(grid.is_pending(ClusterCoord::planar(0, 1)));
    }

    #[test]
    fn enqueue_drops_duplicates_stale_and_malformed() {
        let log = Rc::default();
        let mut grid = ClusterGrid::with_geometry(10.0, 1).unwrap();
        grid.recenter(ClusterCoord::ORIGIN);
        let active = ClusterCoord::planar(1, 0);
        grid.activate(active, tracked(active, &log));

        let summary = grid.enqueue_payload(
            vec![
                (ClusterCoord::planar(0, 1), batch()),
                (ClusterCoord::planar(0, 1), batch()),
                (active, batch()),
                (ClusterCoord::planar(5, 5), batch()),
                (ClusterCoord::planar(-1, 0), AttributeBatch::default()),
            ],
            ContentKind::Nebula,
            ContentSubkind::Emission,
        );
        assert_eq!(
            summary,
            EnqueueSummary {
                accepted: 1,
                stale: 1,
                duplicate: 2,
                malformed: 1,
            }
        );
        assert_eq!(grid.pending_len(), 1);
    }

    #[test]
    fn enqueue_clears_request_marks() {
        let mut grid = ClusterGrid::with_geometry(10.0, 1).unwrap();
        grid.recenter(ClusterCoord::ORIGIN);
        let far = ClusterCoord::planar(1, 1);
        grid.mark_requested(far);
        grid.recenter(ClusterCoord::planar(10, 0));

        let summary = enqueue(&mut grid, &[far]);
        assert_eq!(summary.stale, 1);
        assert_eq!(grid.state(far), ClusterState::Unloaded);
    }

    #[test]
    fn pending_queue_is_fifo() {
        let mut grid = ClusterGrid::with_geometry(10.0, 1).unwrap();
        grid.recenter(ClusterCoord::ORIGIN);
        let a = ClusterCoord::planar(1, 0);
        let b = ClusterCoord::planar(-1, 0);
        let c = ClusterCoord::planar(0, 1);
        enqueue(&mut grid, &[a]);
        enqueue(&mut grid, &[b, c]);

        assert_eq!(grid.pending_order().collect::<Vec<_>>(), vec![a, b, c]);
        let mut drained = Vec::new();
        while let Some(next) = grid.next_pending() {
            grid.take_pending(next).unwrap();
            drained.push(next);
        }
        assert_eq!(drained, vec![a, b, c]);
    }

    #[test]
    fn take_pending_out_of_order_keeps_arrivals_consistent() {
        let mut grid = ClusterGrid::with_geometry(10.0, 1).unwrap();
        grid.recenter(ClusterCoord::ORIGIN);
        let a = ClusterCoord::planar(1, 0);
        let b = ClusterCoord::planar(-1, 0);
        enqueue(&mut grid, &[a, b]);

        assert!(grid.take_pending(b).is_some());
        assert!(grid.take_pending(b).is_none());
        assert_eq!(grid.next_pending(), Some(a));
    }

    #[test]
    fn reset_disposes_everything() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut grid = ClusterGrid::with_geometry(10.0, 1).unwrap();
        grid.recenter(ClusterCoord::ORIGIN);
        grid.activate(ClusterCoord::ORIGIN, tracked(ClusterCoord::ORIGIN, &log));
        enqueue(&mut grid, &[ClusterCoord::planar(1, 0)]);
        grid.mark_requested(ClusterCoord::planar(0, 1));

        assert_eq!(grid.reset(), 1);
        assert_eq!(*log.borrow(), vec![ClusterCoord::ORIGIN]);
        assert_eq!(grid.active_len() + grid.pending_len() + grid.requested_len(), 0);
        assert_eq!(grid.center(), None);
    }
}
