// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The flat trapezoid encoding shared with the tessellator.

use crate::kurbo::{Affine, Rect, Stroke};

/// A 16.16 fixed-point coordinate.
pub type Fixed = i32;

/// The fixed-point representation of `1.0`.
pub const FIXED_ONE: Fixed = 1 << 16;

/// Convert a float to 16.16 fixed point, rounding to the nearest representable value.
#[inline]
pub fn fixed_from_f64(v: f64) -> Fixed {
    clamp_fixed((v * f64::from(FIXED_ONE)).round() as i64)
}

/// Convert a 16.16 fixed-point value back to a float.
#[inline]
pub fn fixed_to_f64(v: Fixed) -> f64 {
    f64::from(v) / f64::from(FIXED_ONE)
}

/// The largest integer pixel coordinate that is `<= v`.
#[inline]
pub(crate) fn floor_px(v: Fixed) -> i32 {
    v >> 16
}

/// The smallest integer pixel coordinate that is `>= v`.
#[inline]
pub(crate) fn ceil_px(v: Fixed) -> i32 {
    ((i64::from(v) + i64::from(FIXED_ONE) - 1) >> 16) as i32
}

#[inline]
fn clamp_fixed(v: i64) -> Fixed {
    v.clamp(i64::from(Fixed::MIN), i64::from(Fixed::MAX)) as Fixed
}

/// `a * b / c`, truncated towards zero, without intermediate overflow.
#[inline]
fn mul_div(a: i64, b: i64, c: i64) -> i64 {
    (i128::from(a) * i128::from(b) / i128::from(c)) as i64
}

/// A point in 16.16 fixed-point coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedPoint {
    /// The x coordinate.
    pub x: Fixed,
    /// The y coordinate.
    pub y: Fixed,
}

impl FixedPoint {
    /// Create a new point.
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a new point from float coordinates.
    pub fn from_f64(x: f64, y: f64) -> Self {
        Self::new(fixed_from_f64(x), fixed_from_f64(y))
    }
}

/// One side of a trapezoid, given as the line through two points.
///
/// The points don't have to coincide with the top and bottom of the trapezoid, the edge is
/// extended or clipped to the trapezoid's y range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Edge {
    /// The first point on the edge.
    pub p1: FixedPoint,
    /// The second point on the edge.
    pub p2: FixedPoint,
}

impl Edge {
    /// Create a new edge.
    pub const fn new(p1: FixedPoint, p2: FixedPoint) -> Self {
        Self { p1, p2 }
    }

    /// The x coordinate of the edge at `y`.
    ///
    /// Horizontal edges report the x coordinate of their first point. The result is monotonic in
    /// `y`, so the value at any `y` between two others lies between the values at those two.
    #[inline]
    pub fn x_at(&self, y: Fixed) -> Fixed {
        let dy = i64::from(self.p2.y) - i64::from(self.p1.y);
        if dy == 0 {
            return self.p1.x;
        }

        let dx = i64::from(self.p2.x) - i64::from(self.p1.x);
        let t = i64::from(y) - i64::from(self.p1.y);

        clamp_fixed(i64::from(self.p1.x) + mul_div(dx, t, dy))
    }
}

/// A y-monotonic quadrilateral bounded by two horizontal lines and two edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trapezoid {
    /// The top y coordinate.
    pub top: Fixed,
    /// The bottom y coordinate.
    pub bottom: Fixed,
    /// The left edge.
    pub left: Edge,
    /// The right edge.
    pub right: Edge,
}

impl Trapezoid {
    /// Create an axis-aligned rectangle spanning `x0..x1` and `y0..y1`.
    pub fn from_rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            top: fixed_from_f64(y0),
            bottom: fixed_from_f64(y1),
            left: Edge::new(FixedPoint::from_f64(x0, y0), FixedPoint::from_f64(x0, y1)),
            right: Edge::new(FixedPoint::from_f64(x1, y0), FixedPoint::from_f64(x1, y1)),
        }
    }

    /// The x coordinates of the four corners, in the order
    /// top left, bottom left, top right, bottom right.
    #[inline]
    pub fn corners_x(&self) -> [Fixed; 4] {
        [
            self.left.x_at(self.top),
            self.left.x_at(self.bottom),
            self.right.x_at(self.top),
            self.right.x_at(self.bottom),
        ]
    }

    /// The smallest x coordinate covered by the trapezoid.
    pub fn min_x(&self) -> Fixed {
        self.corners_x().into_iter().min().unwrap_or_default()
    }

    /// The largest x coordinate covered by the trapezoid.
    pub fn max_x(&self) -> Fixed {
        self.corners_x().into_iter().max().unwrap_or_default()
    }

    /// The rightmost x coordinate of the left edge inside the trapezoid.
    pub(crate) fn left_x_max(&self) -> Fixed {
        let [top_left, bottom_left, ..] = self.corners_x();
        top_left.max(bottom_left)
    }

    /// The leftmost x coordinate of the right edge inside the trapezoid.
    pub(crate) fn right_x_min(&self) -> Fixed {
        let [.., top_right, bottom_right] = self.corners_x();
        top_right.min(bottom_right)
    }
}

/// A read-only, flat encoding of y-sorted trapezoids and their pixel bounding box.
///
/// The layout is:
/// - **Slot 0:** The number of active trapezoids.
/// - **Slots 1-4:** The bounding box (left, top, right, bottom) in integer pixels.
/// - **Slots 5..:** One record of [`TrapezoidList::RECORD_LEN`] values per trapezoid: top, bottom,
///   then the two points of the left edge and the two points of the right edge, all in 16.16
///   fixed point.
///
/// The list is expected to be sorted by increasing top coordinate. This isn't checked, unsorted
/// lists silently produce a wrong tile classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapezoidList {
    data: Vec<i32>,
}

impl TrapezoidList {
    /// The number of slots before the first trapezoid record.
    pub const HEADER_LEN: usize = 5;
    /// The number of slots per trapezoid record.
    pub const RECORD_LEN: usize = 10;

    /// An empty list.
    pub fn empty() -> Self {
        Self {
            data: vec![0; Self::HEADER_LEN],
        }
    }

    /// Wrap a flat buffer as produced by a tessellator.
    ///
    /// A buffer shorter than the header is padded with zeros. Otherwise the contents are taken
    /// as-is; accessing a trapezoid beyond the end of `data` panics.
    pub fn from_raw(mut data: Vec<i32>) -> Self {
        if data.len() < Self::HEADER_LEN {
            data.resize(Self::HEADER_LEN, 0);
        }

        Self { data }
    }

    /// Encode a set of trapezoids, sorting them by their top coordinate and computing the
    /// bounding box.
    pub fn from_trapezoids(traps: &[Trapezoid]) -> Self {
        let mut sorted = traps.to_vec();
        sorted.sort_by_key(|t| t.top);

        let mut data = Vec::with_capacity(Self::HEADER_LEN + sorted.len() * Self::RECORD_LEN);
        data.extend_from_slice(&[sorted.len() as i32, 0, 0, 0, 0]);

        let mut bounds: Option<[i32; 4]> = None;
        for trap in &sorted {
            data.extend_from_slice(&[
                trap.top,
                trap.bottom,
                trap.left.p1.x,
                trap.left.p1.y,
                trap.left.p2.x,
                trap.left.p2.y,
                trap.right.p1.x,
                trap.right.p1.y,
                trap.right.p2.x,
                trap.right.p2.y,
            ]);

            let trap_bounds = [
                floor_px(trap.min_x()),
                floor_px(trap.top.min(trap.bottom)),
                ceil_px(trap.max_x()),
                ceil_px(trap.top.max(trap.bottom)),
            ];
            bounds = Some(match bounds {
                None => trap_bounds,
                Some(b) => [
                    b[0].min(trap_bounds[0]),
                    b[1].min(trap_bounds[1]),
                    b[2].max(trap_bounds[2]),
                    b[3].max(trap_bounds[3]),
                ],
            });
        }

        data[1..Self::HEADER_LEN].copy_from_slice(&bounds.unwrap_or_default());

        Self { data }
    }

    /// The number of active trapezoids.
    #[inline]
    pub fn size(&self) -> usize {
        usize::try_from(self.data[0]).unwrap_or(0)
    }

    /// Returns `true` if there are no active trapezoids.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drop all trapezoids from the list so nothing gets rendered.
    ///
    /// The bounding box is kept.
    pub fn set_size_zero(&mut self) {
        self.data[0] = 0;
    }

    /// The left edge of the bounding box, in pixels.
    pub fn left(&self) -> i32 {
        self.data[1]
    }

    /// The top edge of the bounding box, in pixels.
    pub fn top(&self) -> i32 {
        self.data[2]
    }

    /// The right edge of the bounding box, in pixels.
    pub fn right(&self) -> i32 {
        self.data[3]
    }

    /// The bottom edge of the bounding box, in pixels.
    pub fn bottom(&self) -> i32 {
        self.data[4]
    }

    /// The bounding box as `[left, top, right, bottom]`.
    pub fn bounds(&self) -> [i32; 4] {
        [self.left(), self.top(), self.right(), self.bottom()]
    }

    #[inline]
    fn record(&self, idx: usize) -> &[i32] {
        let start = Self::HEADER_LEN + idx * Self::RECORD_LEN;
        &self.data[start..start + Self::RECORD_LEN]
    }

    /// The top y coordinate of trapezoid `idx`.
    #[inline]
    pub fn trap_top(&self, idx: usize) -> Fixed {
        self.record(idx)[0]
    }

    /// The bottom y coordinate of trapezoid `idx`.
    #[inline]
    pub fn trap_bottom(&self, idx: usize) -> Fixed {
        self.record(idx)[1]
    }

    /// The left edge of trapezoid `idx`.
    #[inline]
    pub fn left_edge(&self, idx: usize) -> Edge {
        let r = self.record(idx);
        Edge::new(FixedPoint::new(r[2], r[3]), FixedPoint::new(r[4], r[5]))
    }

    /// The right edge of trapezoid `idx`.
    #[inline]
    pub fn right_edge(&self, idx: usize) -> Edge {
        let r = self.record(idx);
        Edge::new(FixedPoint::new(r[6], r[7]), FixedPoint::new(r[8], r[9]))
    }

    /// Decode trapezoid `idx`.
    #[inline]
    pub fn get(&self, idx: usize) -> Trapezoid {
        let r = self.record(idx);
        Trapezoid {
            top: r[0],
            bottom: r[1],
            left: Edge::new(FixedPoint::new(r[2], r[3]), FixedPoint::new(r[4], r[5])),
            right: Edge::new(FixedPoint::new(r[6], r[7]), FixedPoint::new(r[8], r[9])),
        }
    }

    /// Iterate over the active trapezoids in order.
    pub fn iter(&self) -> impl Iterator<Item = Trapezoid> + '_ {
        (0..self.size()).map(|idx| self.get(idx))
    }

    /// The raw encoded buffer.
    pub fn as_raw(&self) -> &[i32] {
        &self.data
    }
}

impl Default for TrapezoidList {
    fn default() -> Self {
        Self::empty()
    }
}

/// Decomposes a shape into sorted trapezoids.
///
/// Path flattening and trapezoidation live outside this crate, this trait is the seam through
/// which [`TileGenerator::from_shape`](crate::TileGenerator::from_shape) reaches them.
pub trait Tessellator {
    /// The shape type this tessellator understands.
    type Shape: ?Sized;

    /// Decompose `shape`, transformed by `transform` and clipped to `clip`, into trapezoids.
    ///
    /// If `stroke` is given the outline of the stroked shape is decomposed, otherwise its fill.
    fn tessellate(
        &self,
        shape: &Self::Shape,
        transform: Affine,
        clip: Option<Rect>,
        stroke: Option<&Stroke>,
    ) -> TrapezoidList;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slanted() -> Trapezoid {
        // Left edge leans right by 4px, right edge leans left by 2px over a height of 8px.
        Trapezoid {
            top: 2 * FIXED_ONE,
            bottom: 10 * FIXED_ONE,
            left: Edge::new(
                FixedPoint::new(FIXED_ONE, 2 * FIXED_ONE),
                FixedPoint::new(5 * FIXED_ONE, 10 * FIXED_ONE),
            ),
            right: Edge::new(
                FixedPoint::new(20 * FIXED_ONE, 2 * FIXED_ONE),
                FixedPoint::new(18 * FIXED_ONE, 10 * FIXED_ONE),
            ),
        }
    }

    #[test]
    fn fixed_rounding() {
        assert_eq!(fixed_from_f64(1.5), FIXED_ONE + FIXED_ONE / 2);
        assert_eq!(floor_px(-1), -1);
        assert_eq!(ceil_px(1), 1);
        assert_eq!(ceil_px(3 * FIXED_ONE), 3);
        assert_eq!(floor_px(3 * FIXED_ONE + 1), 3);
        assert_eq!(fixed_to_f64(FIXED_ONE / 4), 0.25);
    }

    #[test]
    fn edge_interpolation() {
        let trap = slanted();
        assert_eq!(trap.left.x_at(6 * FIXED_ONE), 3 * FIXED_ONE);
        assert_eq!(trap.right.x_at(6 * FIXED_ONE), 19 * FIXED_ONE);
        // Extrapolated beyond the defining points.
        assert_eq!(trap.left.x_at(12 * FIXED_ONE), 6 * FIXED_ONE);

        let flat = Edge::new(FixedPoint::new(7, 3), FixedPoint::new(9, 3));
        assert_eq!(flat.x_at(100), 7);
    }

    #[test]
    fn corner_extents() {
        let trap = slanted();
        assert_eq!(trap.min_x(), FIXED_ONE);
        assert_eq!(trap.max_x(), 20 * FIXED_ONE);
        assert_eq!(trap.left_x_max(), 5 * FIXED_ONE);
        assert_eq!(trap.right_x_min(), 18 * FIXED_ONE);
    }

    #[test]
    fn encode_sorts_and_bounds() {
        let lower = Trapezoid::from_rect(3.5, 20.0, 9.25, 30.5);
        let upper = slanted();
        let list = TrapezoidList::from_trapezoids(&[lower, upper]);

        assert_eq!(list.size(), 2);
        assert_eq!(list.bounds(), [1, 2, 20, 31]);
        assert_eq!(list.get(0), upper);
        assert_eq!(list.get(1), lower);
        assert_eq!(list.trap_top(1), 20 * FIXED_ONE);
        assert_eq!(list.trap_bottom(1), fixed_from_f64(30.5));
        assert_eq!(list.left_edge(0), upper.left);
        assert_eq!(list.right_edge(0), upper.right);
        assert_eq!(
            list.as_raw().len(),
            TrapezoidList::HEADER_LEN + 2 * TrapezoidList::RECORD_LEN
        );
    }

    #[test]
    fn set_size_zero_keeps_bounds() {
        let mut list = TrapezoidList::from_trapezoids(&[slanted()]);
        list.set_size_zero();

        assert!(list.is_empty());
        assert_eq!(list.iter().count(), 0);
        assert_eq!(list.bounds(), [1, 2, 20, 10]);
    }

    #[test]
    fn raw_header_is_padded() {
        let list = TrapezoidList::from_raw(vec![0, 4]);
        assert_eq!(list.size(), 0);
        assert_eq!(list.bounds(), [4, 0, 0, 0]);

        let negative = TrapezoidList::from_raw(vec![-3, 0, 0, 0, 0]);
        assert_eq!(negative.size(), 0);
    }
}
