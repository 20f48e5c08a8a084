//! Sweep direction.

use std::fmt;

/// Direction vector of a sweep (an ordinate, or the representative of a
/// direction-group). Only the signs of its dot products with face normals
/// matter, so it need not be normalized.
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Direction {
    pub omega: [f64; 3],
}

impl Direction {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { omega: [x, y, z] }
    }

    /// `omega . n`.
    #[inline]
    pub fn dot(&self, n: &[f64; 3]) -> f64 {
        self.omega[0] * n[0] + self.omega[1] * n[1] + self.omega[2] * n[2]
    }

    pub fn is_zero(&self) -> bool {
        self.omega.iter().all(|&c| c == 0.0)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.omega[0], self.omega[1], self.omega[2]
        )
    }
}

/// Which way flux crosses a face for a given direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaceOrientation {
    /// Flux leaves the cell: the neighbor depends on it.
    Outgoing,
    /// Flux enters the cell from the neighbor.
    Incoming,
    /// Face parallel to the direction; carries nothing.
    Parallel,
}

impl FaceOrientation {
    pub fn classify(direction: &Direction, normal: &[f64; 3]) -> Self {
        let mu = direction.dot(normal);
        if mu > 0.0 {
            FaceOrientation::Outgoing
        } else if mu < 0.0 {
            FaceOrientation::Incoming
        } else {
            FaceOrientation::Parallel
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_antisymmetric() {
        let d = Direction::new(0.3, -0.7, 0.1);
        let n = [0.2, 0.5, -0.9];
        let m = [-0.2, -0.5, 0.9];
        assert_eq!(FaceOrientation::classify(&d, &n), FaceOrientation::Incoming);
        assert_eq!(FaceOrientation::classify(&d, &m), FaceOrientation::Outgoing);
        assert_eq!(
            FaceOrientation::classify(&Direction::new(1.0, 0.0, 0.0), &[0.0, 1.0, 0.0]),
            FaceOrientation::Parallel
        );
    }

    #[test]
    fn display() {
        assert_eq!(Direction::new(1.0, 0.5, 0.0).to_string(), "(1, 0.5, 0)");
    }
}
