//! Scroll-segment plan.

/// Where the controller will scroll, and the arithmetic behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollPlan {
    pub overlap: u32,
    pub step: u32,
    /// Clamped page offsets, non-decreasing, first is 0
    pub positions: Vec<u32>,
}

impl ScrollPlan {
    /// Plan the offsets for a page of `total_height` seen through a
    /// viewport of `viewport_height` (both CSS pixels).
    ///
    /// Offsets are generated every `step = viewport_height - overlap` while
    /// below `total_height`. The bottom offset `max(0, total_height -
    /// viewport_height)` is appended only when the generated list is empty
    /// or ends below it; every offset is then clamped to that bottom, and
    /// repeats produced by the clamp are dropped.
    pub fn new(total_height: u32, viewport_height: u32, overlap_ratio: f64) -> Self {
        let overlap = (f64::from(viewport_height) * overlap_ratio).floor() as u32;
        let step = viewport_height.saturating_sub(overlap).max(1);

        let mut generated = Vec::new();
        let mut y = 0u32;
        while y < total_height {
            generated.push(y);
            y = match y.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }

        let bottom = total_height.saturating_sub(viewport_height);
        if generated.last().map_or(true, |&last| last < bottom) {
            generated.push(bottom);
        }

        let mut positions: Vec<u32> = generated.into_iter().map(|y| y.min(bottom)).collect();
        positions.dedup();

        Self {
            overlap,
            step,
            positions,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousand_over_four_hundred() {
        let plan = ScrollPlan::new(1000, 400, 0.1);
        assert_eq!(plan.overlap, 40);
        assert_eq!(plan.step, 360);
        assert_eq!(plan.positions, vec![0, 360, 600]);
    }

    #[test]
    fn short_page_is_one_segment() {
        assert_eq!(ScrollPlan::new(300, 400, 0.1).positions, vec![0]);
        assert_eq!(ScrollPlan::new(400, 400, 0.1).positions, vec![0]);
    }

    #[test]
    fn empty_page_still_gets_the_bottom_offset() {
        assert_eq!(ScrollPlan::new(0, 400, 0.1).positions, vec![0]);
    }

    #[test]
    fn exact_multiple_ends_on_the_bottom() {
        // 0, 360, 720, 1080 generated; bottom is 760
        let plan = ScrollPlan::new(1160, 400, 0.1);
        assert_eq!(plan.positions, vec![0, 360, 720, 760]);
    }

    #[test]
    fn overlap_is_floored() {
        let plan = ScrollPlan::new(2000, 719, 0.1);
        assert_eq!(plan.overlap, 71);
        assert_eq!(plan.step, 648);
        assert_eq!(plan.positions, vec![0, 648, 1281]);
    }

    #[test]
    fn zero_viewport_does_not_loop_forever() {
        let plan = ScrollPlan::new(3, 0, 0.1);
        assert_eq!(plan.step, 1);
        assert_eq!(plan.positions, vec![0, 1, 2, 3]);
    }
}
