//! Sorted row-index sets and their algebra.
//!
//! Tables address rows by a monotonic [`RowIndex`]; the change manager
//! represents pending created/updated/deleted rows as sorted index vectors
//! and combines them with the linear-merge operations below. [`ranges`]
//! collapses runs of consecutive indices into closed ranges so consumers can
//! process contiguous chunks cheaply, and [`IndexSpan`] carries either a
//! contiguous slice or an explicit index list to let callers avoid copies.

/// Index of a row inside a table. Strictly increasing within a table's index
/// sequence, but not necessarily contiguous: deletions leave holes.
pub type RowIndex = u64;

/// Merges two sorted, duplicate-free index sequences into their sorted union.
pub fn union(a: &[RowIndex], b: &[RowIndex]) -> Vec<RowIndex> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Elements of `a` that are not in `b`; both inputs sorted and duplicate-free.
pub fn difference(a: &[RowIndex], b: &[RowIndex]) -> Vec<RowIndex> {
    let mut out = Vec::new();
    let mut j = 0;
    for &x in a {
        while j < b.len() && b[j] < x {
            j += 1;
        }
        if j >= b.len() || b[j] != x {
            out.push(x);
        }
    }
    out
}

/// Elements present in both `a` and `b`; both inputs sorted and
/// duplicate-free.
pub fn intersection(a: &[RowIndex], b: &[RowIndex]) -> Vec<RowIndex> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Membership test on a sorted index sequence.
pub fn contains(a: &[RowIndex], x: RowIndex) -> bool {
    a.binary_search(&x).is_ok()
}

/// Collapses a sorted index sequence into closed `(lo, hi)` ranges of
/// consecutive integers. The round-trip law holds: for every sorted `s`,
/// `expand(&ranges(s)) == s`.
pub fn ranges(sorted: &[RowIndex]) -> Vec<(RowIndex, RowIndex)> {
    let mut out = Vec::new();
    let mut iter = sorted.iter().copied();
    let Some(first) = iter.next() else {
        return out;
    };
    let (mut lo, mut hi) = (first, first);
    for x in iter {
        if x == hi + 1 {
            hi = x;
        } else {
            out.push((lo, hi));
            lo = x;
            hi = x;
        }
    }
    out.push((lo, hi));
    out
}

/// Expands closed ranges back into the explicit index sequence.
pub fn expand(ranges: &[(RowIndex, RowIndex)]) -> Vec<RowIndex> {
    let mut out = Vec::new();
    for &(lo, hi) in ranges {
        out.extend(lo..=hi);
    }
    out
}

/// A batch of row indices handed to a consumer: either a contiguous
/// half-open slice of the index space, or an explicit list. Consumers that
/// can process contiguous runs cheaply match on [`IndexSpan::Slice`];
/// everyone else iterates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexSpan {
    /// A contiguous run `start..end` of indices.
    Slice(std::ops::Range<RowIndex>),
    /// An explicit, sorted index list with at least one hole.
    Indices(Vec<RowIndex>),
}

impl IndexSpan {
    /// The empty span.
    pub fn empty() -> Self {
        IndexSpan::Slice(0..0)
    }

    /// Wraps a sorted index vector, preferring the contiguous form when the
    /// indices form a run without holes.
    pub fn from_indices(indices: Vec<RowIndex>) -> Self {
        let (Some(&lo), Some(&hi)) = (indices.first(), indices.last()) else {
            return IndexSpan::empty();
        };
        if hi - lo + 1 == indices.len() as u64 {
            IndexSpan::Slice(lo..hi + 1)
        } else {
            IndexSpan::Indices(indices)
        }
    }

    /// Number of indices in the span.
    pub fn len(&self) -> usize {
        match self {
            IndexSpan::Slice(r) => (r.end - r.start) as usize,
            IndexSpan::Indices(v) => v.len(),
        }
    }

    /// Whether the span holds no indices.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = RowIndex> + '_ {
        match self {
            IndexSpan::Slice(r) => SpanIter::Slice(r.clone()),
            IndexSpan::Indices(v) => SpanIter::Indices(v.iter()),
        }
    }

    /// Membership test.
    pub fn contains(&self, x: RowIndex) -> bool {
        match self {
            IndexSpan::Slice(r) => r.contains(&x),
            IndexSpan::Indices(v) => contains(v, x),
        }
    }

    /// Materialises the span as an explicit index vector.
    pub fn to_vec(&self) -> Vec<RowIndex> {
        self.iter().collect()
    }
}

enum SpanIter<'a> {
    Slice(std::ops::Range<RowIndex>),
    Indices(std::slice::Iter<'a, RowIndex>),
}

impl Iterator for SpanIter<'_> {
    type Item = RowIndex;

    fn next(&mut self) -> Option<RowIndex> {
        match self {
            SpanIter::Slice(r) => r.next(),
            SpanIter::Indices(it) => it.next().copied(),
        }
    }
}

pub(crate) fn has_duplicates(sorted: &[RowIndex]) -> bool {
    sorted.windows(2).any(|w| w[0] >= w[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_algebra() {
        let a = [1, 3, 5, 7, 9];
        let b = [3, 4, 5, 10];
        assert_eq!(union(&a, &b), vec![1, 3, 4, 5, 7, 9, 10]);
        assert_eq!(difference(&a, &b), vec![1, 7, 9]);
        assert_eq!(difference(&b, &a), vec![4, 10]);
        assert_eq!(intersection(&a, &b), vec![3, 5]);
        assert_eq!(union(&a, &[]), a.to_vec());
        assert_eq!(difference(&[], &b), Vec::<RowIndex>::new());
        assert!(contains(&a, 7));
        assert!(!contains(&a, 8));
    }

    #[test]
    fn ranges_round_trip() {
        let cases: &[&[RowIndex]] = &[
            &[],
            &[0],
            &[0, 1, 2, 3],
            &[1, 3, 5],
            &[0, 1, 2, 7, 8, 20],
            &[5, 6, 7, 9, 10, 12],
        ];
        for s in cases {
            assert_eq!(expand(&ranges(s)), s.to_vec(), "round trip of {:?}", s);
        }
        assert_eq!(ranges(&[0, 1, 2, 7, 8, 20]), vec![(0, 2), (7, 8), (20, 20)]);
    }

    #[test]
    fn span_prefers_slices() {
        assert_eq!(IndexSpan::from_indices(vec![4, 5, 6]), IndexSpan::Slice(4..7));
        assert_eq!(
            IndexSpan::from_indices(vec![4, 6]),
            IndexSpan::Indices(vec![4, 6])
        );
        assert!(IndexSpan::from_indices(vec![]).is_empty());
        let span = IndexSpan::from_indices(vec![2, 3, 4]);
        assert_eq!(span.len(), 3);
        assert!(span.contains(3));
        assert_eq!(span.to_vec(), vec![2, 3, 4]);
    }
}
