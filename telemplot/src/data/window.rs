//! Channel window
//!
//! Fixed capacity circular buffer holding the most recent rows of a
//! channel. Each row has `width` samples and is stamped with the running
//! sample index, which drives the x axis.
//!
//! The buffer is drawn in slot order, so a plain line plot would connect
//! the newest row (just before the cursor) with the oldest one (at the
//! cursor) across the whole x range. `render_with` avoids that by
//! blanking the cursor slot with NaN for the duration of the draw call
//! only (loose tail) and putting the real values back afterwards (fix
//! tail). `append` needs `&mut self`, so it can never observe the gap.

/// Lifecycle of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Nothing appended since construction.
    Uninitialized,
    /// Receiving rows.
    Active,
}

/// `append` was given the wrong number of samples.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("expected {expected} samples, got {actual}")]
pub struct ShapeMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Chronological copy of a window's content.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Sample index of each row, oldest first.
    pub xs: Vec<f64>,
    /// Rows of `width` samples, oldest first.
    pub rows: Vec<Vec<f64>>,
    pub y_min: f64,
    pub y_max: f64,
}

impl Snapshot {
    /// Values of field `j` across all rows.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.rows.iter().map(|row| row[j]).collect()
    }
}

/// Raw, slot ordered view handed to a draw call by `render_with`.
/// The cursor slot holds NaN for as long as the view exists.
pub struct RenderView<'a> {
    pub xs: &'a [f64],
    rows: &'a [f64],
    pub width: usize,
    pub cursor: usize,
    /// Number of slots written since the last reset.
    pub len: usize,
    /// X axis range, `[newest - capacity, newest]`.
    pub x_range: (f64, f64),
    /// Y axis range, the observed extrema padded by 10%.
    pub y_range: (f64, f64),
}

impl<'a> RenderView<'a> {
    pub fn slots(&self) -> usize {
        self.xs.len()
    }

    /// Samples stored in slot `i`.
    pub fn row(&self, i: usize) -> &'a [f64] {
        &self.rows[i * self.width..(i + 1) * self.width]
    }

    /// Whether slot `i` has been written since the last reset.
    pub fn is_written(&self, i: usize) -> bool {
        self.len == self.slots() || i < self.len
    }
}

pub struct ChannelWindow {
    capacity: usize,
    width: usize,
    /// `capacity` rows of `width` samples, row major.
    rows: Vec<f64>,
    /// Sample index of the row in each slot.
    xs: Vec<f64>,
    /// Next slot to write.
    cursor: usize,
    /// Rows written since the last reset.
    sample_index: u64,
    observed_min: f64,
    observed_max: f64,
    state: WindowState,
}

impl ChannelWindow {
    /// Creates a zeroed window of `capacity` rows. A zero capacity is
    /// bumped to one.
    pub fn new(capacity: usize, width: usize) -> ChannelWindow {
        let capacity = capacity.max(1);
        ChannelWindow {
            capacity,
            width,
            rows: vec![0.0; capacity * width],
            xs: vec![0.0; capacity],
            cursor: 0,
            sample_index: 0,
            observed_min: f64::INFINITY,
            observed_max: f64::NEG_INFINITY,
            state: WindowState::Uninitialized,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn sample_index(&self) -> u64 {
        self.sample_index
    }

    pub fn observed_min(&self) -> f64 {
        self.observed_min
    }

    pub fn observed_max(&self) -> f64 {
        self.observed_max
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    /// Number of rows retrievable through `snapshot_for_render`.
    pub fn len(&self) -> usize {
        std::cmp::min(self.sample_index, self.capacity as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, i: usize) -> &[f64] {
        &self.rows[i * self.width..(i + 1) * self.width]
    }

    fn slot_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.rows[i * self.width..(i + 1) * self.width]
    }

    fn newest_slot(&self) -> usize {
        (self.cursor + self.capacity - 1) % self.capacity
    }

    /// Most recently written row, if any since the last reset.
    pub fn head(&self) -> Option<&[f64]> {
        if self.is_empty() {
            None
        } else {
            Some(self.slot(self.newest_slot()))
        }
    }

    /// Writes one row at the cursor and advances it.
    pub fn append(&mut self, samples: &[f64]) -> Result<(), ShapeMismatch> {
        if samples.len() != self.width {
            return Err(ShapeMismatch {
                expected: self.width,
                actual: samples.len(),
            });
        }
        let cursor = self.cursor;
        self.slot_mut(cursor).copy_from_slice(samples);
        self.xs[cursor] = self.sample_index as f64;
        for &v in samples {
            if v < self.observed_min {
                self.observed_min = v;
            }
            if v > self.observed_max {
                self.observed_max = v;
            }
        }
        self.cursor = (cursor + 1) % self.capacity;
        self.sample_index += 1;
        self.state = WindowState::Active;
        Ok(())
    }

    /// Display range for the y axis: observed extrema padded by 10%.
    pub fn y_range(&self) -> (f64, f64) {
        if self.observed_min > self.observed_max {
            return (-2.0, 2.0);
        }
        // Keep a collapsed range drawable.
        let delta = ((self.observed_max - self.observed_min) * 0.1).max(1e-4);
        (self.observed_min - delta, self.observed_max + delta)
    }

    /// Display range for the x axis, trailing the newest sample index.
    pub fn x_range(&self) -> (f64, f64) {
        let newest = if self.is_empty() {
            0.0
        } else {
            self.xs[self.newest_slot()]
        };
        (newest - self.capacity as f64, newest)
    }

    /// Returns the retained rows oldest first. Never contains the gap marker.
    pub fn snapshot_for_render(&self) -> Snapshot {
        let len = self.len();
        let start = if len == self.capacity { self.cursor } else { 0 };
        let mut xs = Vec::with_capacity(len);
        let mut rows = Vec::with_capacity(len);
        for k in 0..len {
            let i = (start + k) % self.capacity;
            xs.push(self.xs[i]);
            rows.push(self.slot(i).to_vec());
        }
        Snapshot {
            xs,
            rows,
            y_min: self.observed_min,
            y_max: self.observed_max,
        }
    }

    /// Runs `draw` over the raw slot ordered buffer with the cursor slot
    /// blanked out, then restores it.
    pub fn render_with<R, F: FnOnce(RenderView<'_>) -> R>(&mut self, draw: F) -> R {
        let tail = LooseTail::new(self);
        let out = draw(tail.view());
        drop(tail);
        out
    }

    /// Starts over from sample index zero. Every row takes the last known
    /// head value so the trace does not snap to zero, and the observed
    /// range is cleared so the next sample redefines it.
    pub fn reset(&mut self) {
        let head = match self.state {
            WindowState::Uninitialized => vec![0.0; self.width],
            WindowState::Active => self.slot(self.newest_slot()).to_vec(),
        };
        for i in 0..self.capacity {
            self.slot_mut(i).copy_from_slice(&head);
        }
        self.xs.iter_mut().for_each(|x| *x = 0.0);
        self.cursor = 0;
        self.sample_index = 0;
        self.observed_min = f64::INFINITY;
        self.observed_max = f64::NEG_INFINITY;
    }
}

/// Holds the cursor slot blanked while alive; dropping it fixes the tail,
/// even if the draw call unwinds.
struct LooseTail<'a> {
    window: &'a mut ChannelWindow,
    saved: Vec<f64>,
}

impl<'a> LooseTail<'a> {
    fn new(window: &'a mut ChannelWindow) -> LooseTail<'a> {
        let cursor = window.cursor;
        let slot = window.slot_mut(cursor);
        let saved = slot.to_vec();
        slot.fill(f64::NAN);
        LooseTail { window, saved }
    }

    fn view(&self) -> RenderView<'_> {
        let w = &*self.window;
        RenderView {
            xs: &w.xs,
            rows: &w.rows,
            width: w.width,
            cursor: w.cursor,
            len: w.len(),
            x_range: w.x_range(),
            y_range: w.y_range(),
        }
    }
}

impl Drop for LooseTail<'_> {
    fn drop(&mut self) {
        let cursor = self.window.cursor;
        self.window.slot_mut(cursor).copy_from_slice(&self.saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, count: usize) -> ChannelWindow {
        let mut w = ChannelWindow::new(capacity, 2);
        for i in 0..count {
            let v = i as f64;
            w.append(&[v, -v]).unwrap();
        }
        w
    }

    #[test]
    fn first_append_activates() {
        let mut w = ChannelWindow::new(4, 1);
        assert_eq!(w.state(), WindowState::Uninitialized);
        assert!(w.head().is_none());
        w.append(&[3.0]).unwrap();
        assert_eq!(w.state(), WindowState::Active);
        assert_eq!(w.head(), Some(&[3.0][..]));
        assert_eq!(w.cursor(), 1);
        assert_eq!(w.sample_index(), 1);
    }

    #[test]
    fn keeps_most_recent_rows_oldest_first() {
        let n = 5;
        for k in 0..n {
            let w = filled(n, n + k);
            let snap = w.snapshot_for_render();
            assert_eq!(snap.rows.len(), n);
            let expected: Vec<f64> = (k..n + k).map(|i| i as f64).collect();
            assert_eq!(snap.xs, expected);
            assert_eq!(snap.column(0), expected);
            assert_eq!(
                snap.column(1),
                expected.iter().map(|v| -v).collect::<Vec<_>>()
            );
        }
    }

    #[test]
    fn partial_window_only_returns_written_rows() {
        let w = filled(8, 3);
        let snap = w.snapshot_for_render();
        assert_eq!(snap.xs, vec![0.0, 1.0, 2.0]);
        assert_eq!(snap.rows, vec![vec![0.0, -0.0], vec![1.0, -1.0], vec![2.0, -2.0]]);
    }

    #[test]
    fn extrema_survive_wraparound() {
        let mut w = ChannelWindow::new(3, 1);
        for v in [5.0, -7.5, 2.0, 1.0, 0.5, 0.25] {
            w.append(&[v]).unwrap();
        }
        // -7.5 and 5.0 were evicted long ago but still define the range.
        assert_eq!(w.observed_min(), -7.5);
        assert_eq!(w.observed_max(), 5.0);
        assert_eq!(w.snapshot_for_render().column(0), vec![1.0, 0.5, 0.25]);
    }

    #[test]
    fn shape_mismatch_changes_nothing() {
        let mut w = filled(4, 6);
        let before = w.snapshot_for_render();
        let (cursor, index) = (w.cursor(), w.sample_index());
        assert_eq!(
            w.append(&[1.0, 2.0, 3.0]),
            Err(ShapeMismatch {
                expected: 2,
                actual: 3
            })
        );
        assert!(w.append(&[]).is_err());
        assert_eq!(w.cursor(), cursor);
        assert_eq!(w.sample_index(), index);
        assert_eq!(w.snapshot_for_render(), before);
    }

    #[test]
    fn gap_exists_only_during_draw() {
        let mut w = filled(4, 6);
        let cursor = w.cursor();
        let stored = w.snapshot_for_render();
        let seen = w.render_with(|view| {
            assert_eq!(view.cursor, cursor);
            assert!(view.row(cursor).iter().all(|v| v.is_nan()));
            (0..view.slots())
                .filter(|&i| i != cursor)
                .all(|i| view.row(i).iter().all(|v| v.is_finite()))
        });
        assert!(seen);
        let after = w.snapshot_for_render();
        assert_eq!(after, stored);
        assert!(after.rows.iter().flatten().all(|v| !v.is_nan()));

        // The next append rotates the retained range by one row.
        w.append(&[6.0, -6.0]).unwrap();
        let next = w.snapshot_for_render();
        assert_eq!(next.rows[..3], stored.rows[1..]);
        assert_eq!(next.xs, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn tail_is_fixed_when_draw_panics() {
        let mut w = filled(3, 2);
        let before = w.snapshot_for_render();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            w.render_with(|_| panic!("renderer fell over"))
        }));
        assert!(res.is_err());
        assert_eq!(w.snapshot_for_render(), before);
        w.render_with(|view| assert!(view.row(view.cursor)[0].is_nan()));
        assert!(!w.rows.iter().any(|v| v.is_nan()));
    }

    #[test]
    fn render_ranges() {
        let mut w = ChannelWindow::new(10, 1);
        assert_eq!(w.y_range(), (-2.0, 2.0));
        for v in [0.0, 10.0] {
            w.append(&[v]).unwrap();
        }
        w.render_with(|view| {
            assert_eq!(view.y_range, (-1.0, 11.0));
            assert_eq!(view.x_range, (-9.0, 1.0));
            assert_eq!(view.len, 2);
            assert!(view.is_written(1));
            assert!(!view.is_written(2));
        });
    }

    #[test]
    fn reset_broadcasts_head() {
        let mut w = filled(4, 6);
        w.reset();
        assert_eq!(w.cursor(), 0);
        assert_eq!(w.sample_index(), 0);
        assert_eq!(w.observed_min(), f64::INFINITY);
        assert_eq!(w.observed_max(), f64::NEG_INFINITY);
        assert!(w.is_empty());
        w.render_with(|view| {
            for i in 1..view.slots() {
                assert_eq!(view.row(i), &[5.0, -5.0]);
            }
        });

        w.append(&[1.0, 2.0]).unwrap();
        assert_eq!(w.observed_min(), 1.0);
        assert_eq!(w.observed_max(), 2.0);
        assert_eq!(w.snapshot_for_render().xs, vec![0.0]);
        assert_eq!(w.state(), WindowState::Active);
    }

    #[test]
    fn reset_twice_keeps_head() {
        let mut w = filled(3, 2);
        w.reset();
        w.reset();
        w.render_with(|view| assert_eq!(view.row(1), &[1.0, -1.0]));
    }

    #[test]
    fn reset_before_any_data_is_zero() {
        let mut w = ChannelWindow::new(3, 2);
        w.reset();
        assert_eq!(w.state(), WindowState::Uninitialized);
        w.render_with(|view| assert_eq!(view.row(2), &[0.0, 0.0]));
    }
}
