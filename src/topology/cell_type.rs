//! Cell shape metadata.
//!
//! The shape is fixed when the partition is loaded and only drives the
//! structural checks below and whatever the per-cell solver wants to do
//! with it.

/// Closed set of cell shapes a sweep can visit.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum CellShape {
    /// 1D slab: two point faces.
    Slab,
    /// 2D polygon: segment faces.
    Polygon,
    /// 3D polyhedron: polygonal faces.
    Polyhedron,
}

impl CellShape {
    /// Topological dimension.
    pub fn dimension(self) -> u8 {
        match self {
            CellShape::Slab => 1,
            CellShape::Polygon => 2,
            CellShape::Polyhedron => 3,
        }
    }

    /// Vertices expected on every face, `None` when it varies.
    pub fn face_vertex_count(self) -> Option<usize> {
        match self {
            CellShape::Slab => Some(1),
            CellShape::Polygon => Some(2),
            CellShape::Polyhedron => None,
        }
    }

    /// Minimum number of faces bounding a cell of this shape.
    pub fn min_faces(self) -> usize {
        match self {
            CellShape::Slab => 2,
            CellShape::Polygon => 3,
            CellShape::Polyhedron => 4,
        }
    }

    /// Check a face with `n_vertices` vertices is admissible for this shape.
    pub fn accepts_face(self, n_vertices: usize) -> bool {
        match self.face_vertex_count() {
            Some(n) => n == n_vertices,
            None => n_vertices >= 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_rules() {
        assert!(CellShape::Slab.accepts_face(1));
        assert!(!CellShape::Slab.accepts_face(2));
        assert!(CellShape::Polygon.accepts_face(2));
        assert!(CellShape::Polyhedron.accepts_face(4));
        assert!(!CellShape::Polyhedron.accepts_face(2));
        assert_eq!(CellShape::Polyhedron.dimension(), 3);
    }
}
