use core::ops::Range;




/**
 * Identifier for a Cartesian axis
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}




// ============================================================================
impl Axis {

    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}




/// A point in a discrete, three-dimensional index space.
pub type Index = [i64; 3];




#[derive(Clone, Debug, PartialEq, Eq)]


/**
 * Represents a rectangular region in a discrete index space
 */
pub struct IndexSpace {
    di: Range<i64>,
    dj: Range<i64>,
    dk: Range<i64>,
}




/**
 * Describes a rectangular index space. The index type is signed 64-bit
 * integer. Traversal is x-fastest, which is also the order in which cell ids
 * are assigned on each refinement level.
 */
impl IndexSpace {


    pub fn new(di: Range<i64>, dj: Range<i64>, dk: Range<i64>) -> Self {

        assert!(
            di.start <= di.end && dj.start <= dj.end && dk.start <= dk.end,
            "index space has negative volume");

        Self { di, dj, dk }
    }


    /**
     * Return the index space starting at the origin with the given number of
     * elements on each axis.
     */
    pub fn with_shape(shape: [u64; 3]) -> Self {
        Self::new(0..shape[0] as i64, 0..shape[1] as i64, 0..shape[2] as i64)
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn dim(&self) -> [usize; 3] {
        [(self.di.end - self.di.start) as usize,
         (self.dj.end - self.dj.start) as usize,
         (self.dk.end - self.dk.start) as usize]
    }


    /**
     * Return the number of elements in this index space.
     */
    pub fn len(&self) -> usize {
        self.dim().iter().product()
    }


    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    /**
     * Return the minimum index (inclusive).
     */
    pub fn start(&self) -> Index {
        [self.di.start, self.dj.start, self.dk.start]
    }


    /**
     * Return the maximum index (exclusive).
     */
    pub fn end(&self) -> Index {
        [self.di.end, self.dj.end, self.dk.end]
    }


    /**
     * Return the index range along one axis.
     */
    pub fn range(&self, axis: Axis) -> &Range<i64> {
        match axis {
            Axis::X => &self.di,
            Axis::Y => &self.dj,
            Axis::Z => &self.dk,
        }
    }


    /**
     * Determine whether this index space contains the given index.
     */
    pub fn contains(&self, index: Index) -> bool {
        self.di.contains(&index[0]) && self.dj.contains(&index[1]) && self.dk.contains(&index[2])
    }


    /**
     * Determine whether another index space is a subset of this one.
     */
    pub fn contains_space(&self, other: &Self) -> bool {
        other.di.start >= self.di.start && other.di.end <= self.di.end &&
        other.dj.start >= self.dj.start && other.dj.end <= self.dj.end &&
        other.dk.start >= self.dk.start && other.dk.end <= self.dk.end
    }


    /**
     * Expand this index space by the given number of elements on each axis,
     * in both directions.
     */
    pub fn extend(&self, delta: [i64; 3]) -> Self {
        Self::new(
            self.di.start - delta[0] .. self.di.end + delta[0],
            self.dj.start - delta[1] .. self.dj.end + delta[1],
            self.dk.start - delta[2] .. self.dk.end + delta[2])
    }


    /**
     * Expand this index space by the same number of elements on every axis.
     */
    pub fn extend_all(&self, delta: i64) -> Self {
        self.extend([delta; 3])
    }


    /**
     * Increase the size of this index space by a per-axis factor. Scaling a
     * single-index space by two on an axis yields the indexes of its children
     * on the next refinement level.
     */
    pub fn scale(&self, factor: [i64; 3]) -> Self {
        Self::new(
            self.di.start * factor[0] .. self.di.end * factor[0],
            self.dj.start * factor[1] .. self.dj.end * factor[1],
            self.dk.start * factor[2] .. self.dk.end * factor[2])
    }


    /**
     * Return the linear offset for the given index, in an x-fastest memory
     * buffer aligned with the start of this index space.
     */
    pub fn linear_offset(&self, index: Index) -> u64 {
        let [l, m, _] = self.dim();
        let i = (index[0] - self.di.start) as u64;
        let j = (index[1] - self.dj.start) as u64;
        let k = (index[2] - self.dk.start) as u64;
        i + (j + k * m as u64) * l as u64
    }


    /**
     * Inverse of `linear_offset`.
     */
    pub fn index_at(&self, offset: u64) -> Index {
        let [l, m, _] = self.dim();
        let (l, m) = (l as u64, m as u64);
        [self.di.start + (offset % l) as i64,
         self.dj.start + (offset / l % m) as i64,
         self.dk.start + (offset / l / m) as i64]
    }


    /**
     * Return an iterator which traverses the index space with the x index
     * increasing fastest.
     */
    pub fn iter(&self) -> impl Iterator<Item = Index> + '_ {
        self.dk.clone().flat_map(move |k| {
            self.dj.clone().flat_map(move |j| self.di.clone().map(move |i| [i, j, k]))
        })
    }
}




// ============================================================================
impl From<[Range<i64>; 3]> for IndexSpace {
    fn from(range: [Range<i64>; 3]) -> Self {
        let [di, dj, dk] = range;
        Self::new(di, dj, dk)
    }
}

impl From<IndexSpace> for [Range<i64>; 3] {
    fn from(space: IndexSpace) -> Self {
        [space.di, space.dj, space.dk]
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::IndexSpace;

    #[test]
    fn traversal_is_x_fastest_and_matches_linear_offset() {
        let space = IndexSpace::with_shape([3, 2, 2]);
        let indexes: Vec<_> = space.iter().collect();
        assert_eq!(indexes.len(), 12);
        assert_eq!(indexes[0], [0, 0, 0]);
        assert_eq!(indexes[1], [1, 0, 0]);
        assert_eq!(indexes[3], [0, 1, 0]);
        assert_eq!(indexes[6], [0, 0, 1]);

        for (n, index) in indexes.iter().enumerate() {
            assert_eq!(space.linear_offset(*index), n as u64);
            assert_eq!(space.index_at(n as u64), *index);
        }
    }

    #[test]
    fn extending_and_scaling_works() {
        let space = IndexSpace::new(2..3, 4..5, 0..1);
        let extended = space.extend([1, 1, 0]);
        assert_eq!(extended.len(), 9);
        assert!(extended.contains_space(&space));
        assert!(!space.contains_space(&extended));

        let children = space.scale([2, 2, 1]);
        assert_eq!(children.start(), [4, 8, 0]);
        assert_eq!(children.end(), [6, 10, 1]);
        assert_eq!(children.len(), 4);
    }

    #[test]
    #[should_panic]
    fn negative_volume_panics() {
        IndexSpace::new(0..1, 2..1, 0..1);
    }
}
