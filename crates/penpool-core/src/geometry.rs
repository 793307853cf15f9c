//! Ribbon geometry for committed strokes.
//!
//! A stroke polyline is turned into one triangle per segment: the segment's
//! start point is pushed sideways by half the ink width in both directions and
//! joined with the segment's end point. The collision mesh reuses the same
//! positions so erase tests match what is drawn.

use glam::Vec3;

/// Axis the lateral offset is derived from.
const PRIMARY_AXIS: Vec3 = Vec3::Y;

/// Fallback axis when a segment runs parallel to [`PRIMARY_AXIS`].
const SECONDARY_AXIS: Vec3 = Vec3::X;

/// Axis used to spread a single sample into a segment.
const SINGLE_POINT_AXIS: Vec3 = Vec3::X;

/// Squared length below which a projected axis counts as degenerate.
const DEGENERATE_EPSILON: f32 = 1e-12;

/// Triangle mesh with per-vertex normals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Iterate over the triangles as position triples.
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).map(|tri| {
            [
                self.positions[tri[0] as usize],
                self.positions[tri[1] as usize],
                self.positions[tri[2] as usize],
            ]
        })
    }

    /// Recompute per-vertex normals from the triangle faces.
    pub fn recompute_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            // Unnormalized cross product weights each face by its area.
            let face = (self.positions[b] - self.positions[a])
                .cross(self.positions[c] - self.positions[a]);
            normals[a] += face;
            normals[b] += face;
            normals[c] += face;
        }
        self.normals = normals.into_iter().map(Vec3::normalize_or_zero).collect();
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn containing(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::empty(), |b, p| Self {
            min: b.min.min(p),
            max: b.max.max(p),
        })
    }

    /// Whether a sphere touches this box.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        if self.is_empty() {
            return false;
        }
        let closest = center.clamp(self.min, self.max);
        closest.distance_squared(center) <= radius * radius
    }
}

/// Collision volume of a stroke.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionMesh {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub bounds: Aabb,
}

impl CollisionMesh {
    fn from_mesh(mesh: &Mesh) -> Self {
        Self {
            positions: mesh.positions.clone(),
            indices: mesh.indices.clone(),
            bounds: Aabb::containing(mesh.positions.iter().copied()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Whether a sphere touches any triangle of the collider.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        if !self.bounds.intersects_sphere(center, radius) {
            return false;
        }
        let radius_sq = radius * radius;
        self.indices.chunks_exact(3).any(|tri| {
            let a = self.positions[tri[0] as usize];
            let b = self.positions[tri[1] as usize];
            let c = self.positions[tri[2] as usize];
            closest_point_on_triangle(center, a, b, c).distance_squared(center) <= radius_sq
        })
    }
}

/// Render and collision geometry of one stroke.
#[derive(Debug, Clone, PartialEq)]
pub struct InkGeometry {
    pub ribbon: Mesh,
    pub collider: CollisionMesh,
}

impl InkGeometry {
    pub fn empty() -> Self {
        let ribbon = Mesh::default();
        let collider = CollisionMesh::from_mesh(&ribbon);
        Self { ribbon, collider }
    }

    pub fn is_empty(&self) -> bool {
        self.ribbon.is_empty()
    }
}

/// Build the ribbon and collider for a committed point sequence.
///
/// `width` is the full ink width; each side vertex sits `width / 2` away from
/// the polyline. Fewer than two points are handled without failing: no points
/// give empty geometry, a single point is spread into a short segment along
/// the x axis.
pub fn build_ink(points: &[Vec3], width: f32) -> InkGeometry {
    let half = width * 0.5;

    let synthesized;
    let points = match points {
        [] => return InkGeometry::empty(),
        [p] => {
            synthesized = [*p - SINGLE_POINT_AXIS * half, *p + SINGLE_POINT_AXIS * half];
            &synthesized[..]
        }
        _ => points,
    };

    let segments = points.len() - 1;
    let mut ribbon = Mesh {
        positions: Vec::with_capacity(segments * 3),
        normals: Vec::new(),
        indices: Vec::with_capacity(segments * 3),
    };

    for (i, pair) in points.windows(2).enumerate() {
        let (p0, p1) = (pair[0], pair[1]);
        let x = lateral_offset(p1 - p0) * half;

        ribbon.positions.extend([p0 + x, p1, p0 - x]);

        let base = (i * 3) as u32;
        ribbon.indices.extend([base, base + 1, base + 2]);
    }

    ribbon.recompute_normals();
    let collider = CollisionMesh::from_mesh(&ribbon);
    InkGeometry { ribbon, collider }
}

/// Unit vector perpendicular to `direction`, derived from the fixed axes.
fn lateral_offset(direction: Vec3) -> Vec3 {
    let len_sq = direction.length_squared();
    if len_sq <= DEGENERATE_EPSILON {
        return PRIMARY_AXIS;
    }

    let project = |axis: Vec3| axis - direction * (axis.dot(direction) / len_sq);

    let projected = project(PRIMARY_AXIS);
    if projected.length_squared() > DEGENERATE_EPSILON {
        return projected.normalize();
    }
    project(SECONDARY_AXIS).normalize_or_zero()
}

/// Closest point to `p` on triangle `abc` (Ericson, Real-Time Collision Detection 5.1.5).
fn closest_point_on_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = va + vb + vc;
    if denom.abs() <= f32::EPSILON {
        // Zero-area triangle; its vertices are all that is left to test.
        return [a, b, c]
            .into_iter()
            .min_by(|x, y| x.distance_squared(p).total_cmp(&y.distance_squared(p)))
            .unwrap_or(a);
    }
    let v = vb / denom;
    let w = vc / denom;
    a + ab * v + ac * w
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: f32 = 0.005;

    fn approx(a: Vec3, b: Vec3) -> bool {
        a.distance(b) < 1e-5
    }

    #[test]
    fn test_empty_input_builds_nothing() {
        let geometry = build_ink(&[], W);
        assert!(geometry.is_empty());
        assert!(geometry.collider.is_empty());
    }

    #[test]
    fn test_single_point_synthesizes_segment() {
        let p = Vec3::new(1.0, 2.0, 3.0);
        let geometry = build_ink(&[p], W);
        assert_eq!(geometry.ribbon.vertex_count(), 3);
        assert_eq!(geometry.ribbon.triangle_count(), 1);
        // Second vertex is the synthesized end point.
        assert!(approx(geometry.ribbon.positions[1], p + Vec3::X * W * 0.5));
    }

    #[test]
    fn test_triangle_and_vertex_counts() {
        for n in 1..6usize {
            let points: Vec<Vec3> = (0..=n).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
            let geometry = build_ink(&points, W);
            assert_eq!(geometry.ribbon.triangle_count(), n);
            assert_eq!(geometry.ribbon.vertex_count(), 3 * n);
            assert_eq!(geometry.ribbon.normals.len(), 3 * n);
            assert_eq!(geometry.collider.positions, geometry.ribbon.positions);
        }
    }

    #[test]
    fn test_offset_uses_primary_axis() {
        let geometry = build_ink(&[Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0)], W);
        let positions = &geometry.ribbon.positions;
        assert!(approx(positions[0], Vec3::Y * W * 0.5));
        assert!(approx(positions[1], Vec3::new(0.0, 0.0, 1.0)));
        assert!(approx(positions[2], -Vec3::Y * W * 0.5));
    }

    #[test]
    fn test_offset_falls_back_for_vertical_segment() {
        let geometry = build_ink(&[Vec3::ZERO, Vec3::Y], W);
        let positions = &geometry.ribbon.positions;
        assert!(approx(positions[0], Vec3::X * W * 0.5));
        assert!(approx(positions[2], -Vec3::X * W * 0.5));
    }

    #[test]
    fn test_offset_is_perpendicular_to_segment() {
        let p0 = Vec3::new(0.0, 0.0, 0.0);
        let p1 = Vec3::new(1.0, 1.0, 0.5);
        let geometry = build_ink(&[p0, p1], W);
        let x = geometry.ribbon.positions[0] - p0;
        assert!(x.dot(p1 - p0).abs() < 1e-6);
        assert!((x.length() - W * 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_duplicate_points_stay_finite() {
        let p = Vec3::new(0.5, 0.5, 0.5);
        let geometry = build_ink(&[p, p, p], W);
        assert_eq!(geometry.ribbon.triangle_count(), 2);
        assert!(geometry.ribbon.positions.iter().all(|v| v.is_finite()));
        assert!(geometry.ribbon.normals.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_normals_are_unit_length() {
        let points = [Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 1.0)];
        let geometry = build_ink(&points, W);
        for n in &geometry.ribbon.normals {
            assert!((n.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_collider_sphere_hit() {
        let geometry = build_ink(&[Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0)], 0.1);
        assert!(geometry.collider.intersects_sphere(Vec3::new(0.0, 0.0, 0.5), 0.01));
        assert!(geometry.collider.intersects_sphere(Vec3::new(0.0, 0.05, 0.0), 0.01));
        assert!(!geometry.collider.intersects_sphere(Vec3::new(0.0, 0.0, 2.0), 0.01));
        assert!(!geometry.collider.intersects_sphere(Vec3::new(1.0, 0.0, 0.5), 0.2));
    }

    #[test]
    fn test_closest_point_regions() {
        let (a, b, c) = (Vec3::ZERO, Vec3::X, Vec3::Y);
        assert_eq!(closest_point_on_triangle(Vec3::new(-1.0, -1.0, 0.0), a, b, c), a);
        assert_eq!(closest_point_on_triangle(Vec3::new(2.0, 0.0, 0.0), a, b, c), b);
        assert!(approx(
            closest_point_on_triangle(Vec3::new(0.25, 0.25, 1.0), a, b, c),
            Vec3::new(0.25, 0.25, 0.0)
        ));
    }
}
