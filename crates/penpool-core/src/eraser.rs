//! Erase target resolution.

use crate::config::Settings;
use crate::stroke::{StrokePool, StrokeSeq};
use glam::Vec3;

/// An overlap between a tool's erase volume and a scene object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    /// Collision layer of the erase volume that reported the overlap.
    pub volume_layer: u32,
    /// Collision layer of the touched object.
    pub layer: u32,
    /// Name of the stroke the touched collider belongs to.
    pub stroke_name: String,
    /// Name of the pool that stroke lives in.
    pub pool_name: String,
}

/// Decides which overlaps delete ink.
#[derive(Debug, Clone)]
pub struct EraseDetector {
    eraser_layer: u32,
    ink_layer: u32,
    ink_prefix: String,
}

impl EraseDetector {
    pub fn new(settings: &Settings) -> Self {
        Self {
            eraser_layer: settings.eraser_layer,
            ink_layer: settings.ink_layer,
            ink_prefix: settings.ink_prefix.clone(),
        }
    }

    /// Resolve an overlap against one pool.
    ///
    /// Returns the seq of the stroke to delete, if an erase volume touched an
    /// ink collider of this exact pool and erasing is active.
    pub fn resolve(&self, erasing: bool, overlap: &Overlap, pool: &StrokePool) -> Option<StrokeSeq> {
        if !erasing
            || overlap.volume_layer != self.eraser_layer
            || overlap.layer != self.ink_layer
            || !overlap.stroke_name.starts_with(&self.ink_prefix)
            || overlap.pool_name != pool.name()
        {
            return None;
        }
        pool.find_by_name(&overlap.stroke_name).map(|stroke| stroke.seq())
    }

    /// Overlaps of a sphere with the strokes of a pool, computed from their
    /// collision meshes.
    pub fn overlaps_at(&self, center: Vec3, radius: f32, pool: &StrokePool) -> Vec<Overlap> {
        pool.iter()
            .filter(|stroke| stroke.geometry().collider.intersects_sphere(center, radius))
            .map(|stroke| Overlap {
                volume_layer: self.eraser_layer,
                layer: self.ink_layer,
                stroke_name: stroke.name().to_string(),
                pool_name: pool.name().to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (EraseDetector, StrokePool) {
        let settings = Settings {
            ink_pool_name: "obj_session".to_string(),
            ..Settings::default()
        };
        let detector = EraseDetector::new(&settings);
        let mut pool = StrokePool::new(settings.pool_name(0), &settings.ink_prefix, 0.1);
        pool.append(vec![Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0)]);
        pool.append(vec![Vec3::new(5.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 1.0)]);
        (detector, pool)
    }

    fn overlap(stroke: &str, pool: &str) -> Overlap {
        Overlap {
            volume_layer: 8,
            layer: 9,
            stroke_name: stroke.to_string(),
            pool_name: pool.to_string(),
        }
    }

    #[test]
    fn test_accepts_matching_ink() {
        let (detector, pool) = setup();
        assert_eq!(detector.resolve(true, &overlap("Ink (1)", "obj_session#0"), &pool), Some(1));
    }

    #[test]
    fn test_requires_erasing() {
        let (detector, pool) = setup();
        assert_eq!(detector.resolve(false, &overlap("Ink (1)", "obj_session#0"), &pool), None);
    }

    #[test]
    fn test_rejects_other_layer() {
        let (detector, pool) = setup();
        let mut o = overlap("Ink (1)", "obj_session#0");
        o.layer = 8;
        assert_eq!(detector.resolve(true, &o, &pool), None);
    }

    #[test]
    fn test_rejects_volume_off_the_eraser_layer() {
        let (detector, pool) = setup();
        let mut o = overlap("Ink (1)", "obj_session#0");
        o.volume_layer = 9;
        assert_eq!(detector.resolve(true, &o, &pool), None);
    }

    #[test]
    fn test_rejects_foreign_pool_and_names() {
        let (detector, pool) = setup();
        assert_eq!(detector.resolve(true, &overlap("Ink (1)", "obj_other#0"), &pool), None);
        assert_eq!(detector.resolve(true, &overlap("Ink (1)", "obj_session#1"), &pool), None);
        assert_eq!(detector.resolve(true, &overlap("Button", "obj_session#0"), &pool), None);
        assert_eq!(detector.resolve(true, &overlap("Ink (9)", "obj_session#0"), &pool), None);
    }

    #[test]
    fn test_overlaps_at_hits_only_touched_strokes() {
        let (detector, pool) = setup();
        let hits = detector.overlaps_at(Vec3::new(0.0, 0.0, 0.5), 0.01, &pool);
        assert_eq!(hits, vec![overlap("Ink (0)", "obj_session#0")]);
        assert!(detector.overlaps_at(Vec3::new(2.5, 0.0, 0.5), 0.01, &pool).is_empty());
    }
}
