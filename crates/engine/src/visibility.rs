use tracing::debug;

/// Axis-aligned rectangle in layout units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// Fraction of `target`'s area that lies inside `viewport`, in `0.0..=1.0`.
pub fn intersection_ratio(target: Rect, viewport: Rect) -> f64 {
    let area = target.area();
    if area <= 0.0 {
        return 0.0;
    }
    let left = target.x.max(viewport.x);
    let right = (target.x + target.width).min(viewport.x + viewport.width);
    let top = target.y.max(viewport.y);
    let bottom = (target.y + target.height).min(viewport.y + viewport.height);
    let overlap = (right - left).max(0.0) * (bottom - top).max(0.0);
    (overlap / area).clamp(0.0, 1.0)
}

/// Turns intersection ratios into an "is this the active item" signal.
///
/// Emits only on change. Nothing is emitted while not observing.
#[derive(Debug, Clone)]
pub struct VisibilitySensor {
    threshold: f64,
    observing: bool,
    visible: Option<bool>,
}

impl VisibilitySensor {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(f64::EPSILON, 1.0),
            observing: false,
            visible: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn observe(&mut self) {
        self.observing = true;
    }

    /// Stops observing; the next `observe` starts from an unknown state.
    pub fn unobserve(&mut self) {
        self.observing = false;
        self.visible = None;
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    pub fn is_visible(&self) -> bool {
        self.visible.unwrap_or(false)
    }

    /// Feeds one intersection ratio; returns the new visibility on change.
    pub fn update(&mut self, ratio: f64) -> Option<bool> {
        if !self.observing {
            return None;
        }
        let visible = ratio > 0.0 && ratio >= self.threshold;
        if self.visible == Some(visible) {
            return None;
        }
        debug!(ratio, visible, "visibility changed");
        self.visible = Some(visible);
        Some(visible)
    }
}

/// Vertical snap feed: every item is exactly one viewport tall.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedLayout {
    pub viewport_width: f64,
    pub viewport_height: f64,
}

impl FeedLayout {
    pub fn new(viewport_width: f64, viewport_height: f64) -> Self {
        Self {
            viewport_width,
            viewport_height,
        }
    }

    pub fn item_rect(&self, index: usize) -> Rect {
        Rect {
            x: 0.0,
            y: index as f64 * self.viewport_height,
            width: self.viewport_width,
            height: self.viewport_height,
        }
    }

    pub fn viewport_at(&self, scroll_offset: f64) -> Rect {
        Rect {
            x: 0.0,
            y: scroll_offset,
            width: self.viewport_width,
            height: self.viewport_height,
        }
    }

    /// Intersection ratio of item `index` when scrolled to `scroll_offset`.
    pub fn ratio(&self, index: usize, scroll_offset: f64) -> f64 {
        intersection_ratio(self.item_rect(index), self.viewport_at(scroll_offset))
    }

    /// Scroll offset that snaps item `index` into full view.
    pub fn offset_of(&self, index: usize) -> f64 {
        index as f64 * self.viewport_height
    }
}

#[cfg(test)]
mod tests {
    use super::{FeedLayout, VisibilitySensor};

    #[test]
    fn sensor_reports_only_transitions() {
        let mut sensor = VisibilitySensor::new(0.6);
        sensor.observe();

        assert_eq!(sensor.update(0.0), Some(false));
        assert_eq!(sensor.update(0.3), None);
        assert_eq!(sensor.update(0.6), Some(true));
        assert_eq!(sensor.update(1.0), None);
        assert_eq!(sensor.update(0.59), Some(false));
    }

    #[test]
    fn unobserved_sensor_stays_silent() {
        let mut sensor = VisibilitySensor::new(0.6);
        assert_eq!(sensor.update(1.0), None);

        sensor.observe();
        assert_eq!(sensor.update(1.0), Some(true));
        sensor.unobserve();
        assert_eq!(sensor.update(0.0), None);
    }

    #[test]
    fn at_most_one_snap_item_crosses_the_default_threshold() {
        let layout = FeedLayout::new(390.0, 844.0);
        for step in 0..=40 {
            let offset = step as f64 * 844.0 * 3.0 / 40.0;
            let active = (0..4)
                .filter(|index| layout.ratio(*index, offset) >= 0.6)
                .count();
            assert!(active <= 1, "offset {offset} activated {active} items");
        }
    }

    #[test]
    fn half_scrolled_items_split_the_viewport() {
        let layout = FeedLayout::new(390.0, 800.0);
        assert!((layout.ratio(0, 400.0) - 0.5).abs() < 1e-9);
        assert!((layout.ratio(1, 400.0) - 0.5).abs() < 1e-9);
        assert_eq!(layout.ratio(2, 400.0), 0.0);
    }
}
