//! Headless scene: point clouds placed in world space, one per shown cluster.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use cosmos_common::{AttributeBatch, AttributeLayer, ClusterCoord, ContentKind, ContentSubkind};
use cosmos_stream::{Matter, MatterFactory};
use glam::Vec3;

pub type SharedScene = Rc<RefCell<Scene>>;

/// Identifier of an object inserted into a [`Scene`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(u64);

/// Axis-aligned bounds of a point cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    fn of<'a>(points: impl Iterator<Item = &'a Vec3>) -> Option<Self> {
        points.fold(None, |acc: Option<Bounds>, p| {
            Some(match acc {
                None => Bounds { min: *p, max: *p },
                Some(b) => Bounds {
                    min: b.min.min(*p),
                    max: b.max.max(*p),
                },
            })
        })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

/// A generated point cloud in world space.
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub kind: ContentKind,
    pub subkind: ContentSubkind,
    pub coord: ClusterCoord,
    pub layers: Vec<AttributeLayer>,
    /// `None` for an object without points.
    pub bounds: Option<Bounds>,
}

impl SceneObject {
    pub fn point_count(&self) -> usize {
        self.layers.iter().map(AttributeLayer::len).sum()
    }
}

#[derive(Debug, Default)]
pub struct Scene {
    objects: BTreeMap<ObjectId, SceneObject>,
    next_id: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedScene {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn insert(&mut self, object: SceneObject) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        self.objects.insert(id, object);
        id
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<SceneObject> {
        self.objects.remove(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.get(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn objects(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects.values()
    }

    pub fn find(&self, coord: ClusterCoord) -> Option<&SceneObject> {
        self.objects.values().find(|o| o.coord == coord)
    }

    /// Coordinates of every object, sorted.
    pub fn coords(&self) -> Vec<ClusterCoord> {
        let mut coords: Vec<ClusterCoord> = self.objects.values().map(|o| o.coord).collect();
        coords.sort();
        coords
    }

    pub fn point_count(&self) -> usize {
        self.objects.values().map(SceneObject::point_count).sum()
    }
}

/// Matter backed by a [`Scene`] point cloud.
pub struct PointCloudMatter {
    scene: SharedScene,
    kind: ContentKind,
    cluster_size: f32,
    built: Option<SceneObject>,
    shown: Option<ObjectId>,
}

impl PointCloudMatter {
    pub fn new(scene: SharedScene, kind: ContentKind, cluster_size: f32) -> Self {
        Self {
            scene,
            kind,
            cluster_size,
            built: None,
            shown: None,
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn is_shown(&self) -> bool {
        self.shown.is_some()
    }
}

impl Matter for PointCloudMatter {
    fn generate(&mut self, data: AttributeBatch, position: ClusterCoord, subkind: ContentSubkind) {
        let offset = position.world_center(self.cluster_size);
        let mut layers = data.layers;
        for layer in &mut layers {
            for p in &mut layer.positions {
                *p += offset;
            }
        }
        let bounds = Bounds::of(layers.iter().flat_map(|l| l.positions.iter()));
        self.built = Some(SceneObject {
            kind: self.kind,
            subkind,
            coord: position,
            layers,
            bounds,
        });
    }

    fn show(&mut self) {
        if self.shown.is_some() {
            return;
        }
        match self.built.take() {
            Some(object) => self.shown = Some(self.scene.borrow_mut().insert(object)),
            None => {
                tracing::warn!(kind = %self.kind, "cannot show matter that was never generated")
            }
        }
    }

    fn dispose(&mut self) {
        let built = self.built.take();
        match self.shown.take() {
            Some(id) => {
                self.scene.borrow_mut().remove(id);
            }
            // Generated but never shown: nothing in the scene to remove.
            None if built.is_some() => {}
            None => tracing::warn!(kind = %self.kind, "cannot dispose empty matter"),
        }
    }
}

/// Builds [`PointCloudMatter`] into one shared scene.
pub struct SceneFactory {
    scene: SharedScene,
    cluster_size: f32,
    created: u64,
}

impl SceneFactory {
    pub fn new(scene: SharedScene, cluster_size: f32) -> Self {
        Self {
            scene,
            cluster_size,
            created: 0,
        }
    }

    pub fn scene(&self) -> &SharedScene {
        &self.scene
    }

    pub fn created(&self) -> u64 {
        self.created
    }
}

impl MatterFactory for SceneFactory {
    fn create(&mut self, kind: ContentKind) -> Box<dyn Matter> {
        self.created += 1;
        Box::new(PointCloudMatter::new(Rc::clone(&self.scene), kind, self.cluster_size))
    }
}
