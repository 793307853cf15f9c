//! Committed strokes and the per-tool stroke pool.

use crate::geometry::{InkGeometry, build_ink};
use glam::Vec3;
use std::collections::BTreeMap;

/// Sequence number of a stroke, unique within its tool for the session.
pub type StrokeSeq = u64;

/// A committed ink stroke.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    seq: StrokeSeq,
    name: String,
    points: Vec<Vec3>,
    geometry: InkGeometry,
}

impl Stroke {
    pub fn seq(&self) -> StrokeSeq {
        self.seq
    }

    /// Scene name, `"{prefix} ({seq})"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Points in committed order (oldest first).
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn geometry(&self) -> &InkGeometry {
        &self.geometry
    }
}

/// The committed strokes of one tool.
#[derive(Debug, Clone)]
pub struct StrokePool {
    name: String,
    prefix: String,
    width: f32,
    strokes: BTreeMap<StrokeSeq, Stroke>,
    next_seq: StrokeSeq,
    /// Target of the next undo. Cleared once undone.
    last_committed: Option<StrokeSeq>,
}

impl StrokePool {
    /// Create an empty pool. `width` is the ink width strokes are built with.
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, width: f32) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            width,
            strokes: BTreeMap::new(),
            next_seq: 0,
            last_committed: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    /// Sequence number the next appended stroke will get.
    pub fn next_seq(&self) -> StrokeSeq {
        self.next_seq
    }

    pub fn get(&self, seq: StrokeSeq) -> Option<&Stroke> {
        self.strokes.get(&seq)
    }

    /// Strokes in commit order.
    pub fn iter(&self) -> impl Iterator<Item = &Stroke> {
        self.strokes.values()
    }

    /// Most recently committed stroke still in the pool.
    pub fn last(&self) -> Option<&Stroke> {
        self.strokes.values().next_back()
    }

    /// Find a stroke by its scene name.
    pub fn find_by_name(&self, name: &str) -> Option<&Stroke> {
        self.strokes.values().find(|s| s.name == name)
    }

    /// Commit a new stroke under the next sequence number.
    pub fn append(&mut self, points: Vec<Vec3>) -> StrokeSeq {
        let seq = self.next_seq;
        self.insert(seq, points);
        seq
    }

    /// Sequence number of the stroke the next undo removes.
    pub fn last_committed(&self) -> Option<StrokeSeq> {
        self.last_committed
    }

    /// Commit a stroke under an explicit sequence number, replacing any
    /// stroke already stored there.
    pub fn insert(&mut self, seq: StrokeSeq, points: Vec<Vec3>) {
        let geometry = build_ink(&points, self.width);
        let stroke = Stroke {
            seq,
            name: format!("{} ({})", self.prefix, seq),
            points,
            geometry,
        };
        if self.strokes.insert(seq, stroke).is_some() {
            log::debug!("Stroke {} in {} replaced", seq, self.name);
        }
        self.next_seq = self.next_seq.max(seq.saturating_add(1));
        self.last_committed = Some(seq);
    }

    /// Undo the most recent commit.
    ///
    /// Only one undo per commit: repeating it, or undoing a stroke that was
    /// already erased, removes nothing.
    pub fn remove_last(&mut self) -> Option<Stroke> {
        let seq = self.last_committed.take()?;
        self.strokes.remove(&seq)
    }

    pub fn remove(&mut self, seq: StrokeSeq) -> Option<Stroke> {
        self.strokes.remove(&seq)
    }

    /// Remove every stroke. Sequence numbers keep counting up.
    pub fn clear(&mut self) {
        self.strokes.clear();
        self.last_committed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> StrokePool {
        StrokePool::new("obj_test#0", "Ink", 0.005)
    }

    fn line(len: usize) -> Vec<Vec3> {
        (0..len).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect()
    }

    #[test]
    fn test_append_assigns_increasing_seq() {
        let mut pool = pool();
        assert_eq!(pool.append(line(2)), 0);
        assert_eq!(pool.append(line(3)), 1);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(1).unwrap().name(), "Ink (1)");
        assert_eq!(pool.get(1).unwrap().geometry().ribbon.triangle_count(), 2);
    }

    #[test]
    fn test_seq_not_reused_after_remove_last() {
        let mut pool = pool();
        pool.append(line(2));
        pool.append(line(2));
        let removed = pool.remove_last().unwrap();
        assert_eq!(removed.seq(), 1);
        assert_eq!(pool.append(line(2)), 2);
        assert!(pool.get(0).is_some());
    }

    #[test]
    fn test_seq_not_reused_after_clear() {
        let mut pool = pool();
        pool.append(line(2));
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.append(line(2)), 1);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut pool = pool();
        pool.insert(4, line(2));
        pool.insert(4, line(2));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.next_seq(), 5);
    }

    #[test]
    fn test_remove_by_seq() {
        let mut pool = pool();
        pool.append(line(2));
        pool.append(line(2));
        assert!(pool.remove(0).is_some());
        assert!(pool.remove(0).is_none());
        assert_eq!(pool.last().map(Stroke::seq), Some(1));
    }

    #[test]
    fn test_find_by_name() {
        let mut pool = pool();
        pool.append(line(2));
        let seq = pool.append(line(2));
        assert_eq!(pool.find_by_name("Ink (1)").map(Stroke::seq), Some(seq));
        assert!(pool.find_by_name("Ink (7)").is_none());
    }

    #[test]
    fn test_remove_last_only_once_per_commit() {
        let mut pool = pool();
        pool.append(line(2));
        pool.append(line(2));
        pool.append(line(2));
        assert_eq!(pool.remove_last().map(|s| s.seq()), Some(2));
        assert!(pool.remove_last().is_none());
        assert_eq!(pool.iter().map(Stroke::seq).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_remove_last_after_erasing_newest_removes_nothing() {
        let mut pool = pool();
        pool.append(line(2));
        pool.append(line(2));
        pool.remove(1);
        assert!(pool.remove_last().is_none());
        assert_eq!(pool.len(), 1);
        assert!(pool.get(0).is_some());
    }

    #[test]
    fn test_insert_at_max_seq_saturates() {
        let mut pool = pool();
        pool.insert(StrokeSeq::MAX, line(2));
        assert_eq!(pool.next_seq(), StrokeSeq::MAX);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_last_on_empty_pool() {
        let mut pool = pool();
        assert!(pool.remove_last().is_none());
    }
}
