use std::hash::Hash;

use crate::rtree::{SpatialError, SpatialResult};

/// An n-dimensional axis-aligned bounding box.
///
/// `BoundingBox` stores one `(min, max)` pair per dimension. It is the key
/// type of the R-Tree: every entry is indexed by a box, and every internal
/// node entry carries the tight box enclosing its child subtree.
///
/// # Examples
///
/// ```rust
/// use nitrite_rtree::BoundingBox;
///
/// let a = BoundingBox::rect(0.0, 0.0, 10.0, 10.0);
/// let b = BoundingBox::rect(5.0, 5.0, 15.0, 15.0);
///
/// assert!(a.intersects(&b));
/// assert_eq!(a.enlargement(&b).unwrap(), 125.0);
/// ```
#[derive(Clone, PartialEq, Debug, serde::Deserialize, serde::Serialize)]
pub struct BoundingBox {
    min: Vec<f64>,
    max: Vec<f64>,
}

impl Eq for BoundingBox {}

impl Hash for BoundingBox {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        for value in self.min.iter().chain(self.max.iter()) {
            value.to_bits().hash(state);
        }
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoundingBox(")?;
        for (i, (lo, hi)) in self.min.iter().zip(self.max.iter()).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}..{}", lo, hi)?;
        }
        write!(f, ")")
    }
}

impl BoundingBox {
    /// Creates a bounding box from per-dimension minimum and maximum corners.
    ///
    /// # Errors
    ///
    /// * `DimensionMismatch` if `min` and `max` have different lengths
    /// * `InvalidBoundingBox` if the box has no dimension, a coordinate is
    ///   NaN, or `min[i] > max[i]` for some dimension
    pub fn new(min: Vec<f64>, max: Vec<f64>) -> SpatialResult<BoundingBox> {
        let bbox = BoundingBox { min, max };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Checks the invariants `new` enforces. Boxes built with [`rect`]
    /// skip them, so the tree re-checks every box it is given.
    ///
    /// [`rect`]: BoundingBox::rect
    pub fn validate(&self) -> SpatialResult<()> {
        let (min, max) = (&self.min, &self.max);
        if min.len() != max.len() {
            return Err(SpatialError::DimensionMismatch {
                expected: min.len(),
                found: max.len(),
            });
        }
        if min.is_empty() {
            return Err(SpatialError::InvalidBoundingBox(
                "bounding box needs at least one dimension".into(),
            ));
        }
        for (i, (lo, hi)) in min.iter().zip(max.iter()).enumerate() {
            if lo.is_nan() || hi.is_nan() {
                return Err(SpatialError::InvalidBoundingBox(format!(
                    "NaN coordinate in dimension {}",
                    i
                )));
            }
            if lo > hi {
                return Err(SpatialError::InvalidBoundingBox(format!(
                    "min {} exceeds max {} in dimension {}",
                    lo, hi, i
                )));
            }
        }
        Ok(())
    }

    /// Creates a 2D box, normalising the corners so that min <= max.
    ///
    /// Coordinates are not checked: a NaN pair stays NaN. Such a box fails
    /// [`validate`](BoundingBox::validate) and every tree operation.
    pub fn rect(x1: f64, y1: f64, x2: f64, y2: f64) -> BoundingBox {
        BoundingBox {
            min: vec![x1.min(x2), y1.min(y2)],
            max: vec![x1.max(x2), y1.max(y2)],
        }
    }

    /// Creates a degenerate box covering a single point.
    pub fn point(coordinates: &[f64]) -> SpatialResult<BoundingBox> {
        BoundingBox::new(coordinates.to_vec(), coordinates.to_vec())
    }

    /// Returns the smallest box enclosing every box of the iterator, or `None`
    /// when the iterator is empty.
    ///
    /// All boxes are expected to share the same dimensionality.
    pub fn enclosing<'a, I>(boxes: I) -> Option<BoundingBox>
    where
        I: IntoIterator<Item = &'a BoundingBox>,
    {
        let mut iter = boxes.into_iter();
        let mut result = iter.next()?.clone();
        for b in iter {
            result.expand(b);
        }
        Some(result)
    }

    pub fn dimensions(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self) -> &[f64] {
        &self.min
    }

    pub fn max(&self) -> &[f64] {
        &self.max
    }

    /// Product of the extents over all dimensions.
    pub fn area(&self) -> f64 {
        self.min
            .iter()
            .zip(self.max.iter())
            .map(|(lo, hi)| hi - lo)
            .product()
    }

    /// Returns true if the boxes share at least one point (touching edges count).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.dimensions() == other.dimensions()
            && self
                .min
                .iter()
                .zip(self.max.iter())
                .zip(other.min.iter().zip(other.max.iter()))
                .all(|((lo, hi), (olo, ohi))| lo <= ohi && olo <= hi)
    }

    /// Returns true if `other` lies fully inside this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.dimensions() == other.dimensions()
            && self
                .min
                .iter()
                .zip(self.max.iter())
                .zip(other.min.iter().zip(other.max.iter()))
                .all(|((lo, hi), (olo, ohi))| lo <= olo && ohi <= hi)
    }

    /// Returns the smallest box enclosing both boxes.
    pub fn union(&self, other: &BoundingBox) -> SpatialResult<BoundingBox> {
        self.check_dimensions(other)?;
        let mut merged = self.clone();
        merged.expand(other);
        Ok(merged)
    }

    /// Area increase needed for this box to also cover `other`.
    pub fn enlargement(&self, other: &BoundingBox) -> SpatialResult<f64> {
        Ok(self.union(other)?.area() - self.area())
    }

    /// Minimum euclidean distance from a point to this box; zero when the
    /// point lies inside.
    pub fn distance_to_point(&self, point: &[f64]) -> SpatialResult<f64> {
        if point.len() != self.dimensions() {
            return Err(SpatialError::DimensionMismatch {
                expected: self.dimensions(),
                found: point.len(),
            });
        }
        let squared: f64 = point
            .iter()
            .zip(self.min.iter().zip(self.max.iter()))
            .map(|(p, (lo, hi))| {
                let d = p - p.clamp(*lo, *hi);
                d * d
            })
            .sum();
        Ok(squared.sqrt())
    }

    pub(crate) fn check_dimensions(&self, other: &BoundingBox) -> SpatialResult<()> {
        if self.dimensions() != other.dimensions() {
            return Err(SpatialError::DimensionMismatch {
                expected: self.dimensions(),
                found: other.dimensions(),
            });
        }
        Ok(())
    }

    fn expand(&mut self, other: &BoundingBox) {
        for (lo, olo) in self.min.iter_mut().zip(other.min.iter()) {
            *lo = lo.min(*olo);
        }
        for (hi, ohi) in self.max.iter_mut().zip(other.max.iter()) {
            *hi = hi.max(*ohi);
        }
    }
}
