//! The boundary to whatever actually puts content on screen.
//!
//! The streaming core only ever constructs matter through a
//! [`MatterFactory`] and drives it through the three [`Matter`] calls.

use cosmos_common::{AttributeBatch, ClusterCoord, ContentKind, ContentSubkind};

/// A visible world object populating one cluster.
///
/// Once shown, a matter is owned by the cluster grid and destroyed only
/// through [`Matter::dispose`].
pub trait Matter {
    /// Build renderable state from a background unit's attribute buffers.
    fn generate(&mut self, data: AttributeBatch, position: ClusterCoord, subkind: ContentSubkind);

    /// Make the matter visible in the scene.
    fn show(&mut self);

    /// Remove the matter from the scene and release its resources.
    fn dispose(&mut self);
}

/// Polymorphic constructor for [`Matter`] by content kind.
pub trait MatterFactory {
    fn create(&mut self, kind: ContentKind) -> Box<dyn Matter>;
}
