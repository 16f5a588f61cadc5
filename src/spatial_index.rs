use geo::{BoundingRect, Coord, Rect};
use log::info;
use rstar::{AABB, RTree, RTreeObject};

use crate::catalog::RoadSegment;

// Slot plus bounding box of one segment, the unit stored in the RTree
#[derive(Debug, Clone)]
struct IndexedSegment {
    slot: usize,
    bbox: Rect<f64>,
}

impl RTreeObject for IndexedSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min().x, self.bbox.min().y],
            [self.bbox.max().x, self.bbox.max().y],
        )
    }
}

/// Read-only candidate lookup over segment extents.
///
/// Slots are positions in the slice the index was built from, so the owner of that
/// slice resolves them back to segments. There is no incremental update, a changed
/// road set means a new index.
#[derive(Debug)]
pub struct SpatialIndex {
    tree: RTree<IndexedSegment>,
}

impl SpatialIndex {
    /// Bulk-load every segment's bounding box
    pub fn build(segments: &[RoadSegment]) -> Self {
        let entries: Vec<IndexedSegment> = segments
            .iter()
            .enumerate()
            .filter_map(|(slot, segment)| {
                segment
                    .line
                    .bounding_rect()
                    .map(|bbox| IndexedSegment { slot, bbox })
            })
            .collect();

        let tree = RTree::bulk_load(entries);
        info!("Built spatial index with {} road segments", tree.size());

        Self { tree }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Slots of all segments whose extent intersects `area`, in ascending order.
    ///
    /// These are candidates only; the caller measures the true distance.
    pub fn query(&self, area: Rect<f64>) -> Vec<usize> {
        let envelope = AABB::from_corners(
            [area.min().x, area.min().y],
            [area.max().x, area.max().y],
        );
        let mut slots: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.slot)
            .collect();
        slots.sort_unstable();
        slots
    }

    /// Candidates within a square buffer of `buffer_deg` degrees around a point
    pub fn query_around(&self, lon: f64, lat: f64, buffer_deg: f64) -> Vec<usize> {
        self.query(Rect::new(
            Coord {
                x: lon - buffer_deg,
                y: lat - buffer_deg,
            },
            Coord {
                x: lon + buffer_deg,
                y: lat + buffer_deg,
            },
        ))
    }
}
