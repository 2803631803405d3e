//! Temporal smoothing for drawn regions and rate statistics.

use std::collections::VecDeque;

use crate::detect::Region;

/// Window for per-corner region smoothing, in frames.
pub const REGION_SMOOTHING_WINDOW: usize = 30;
/// Centre distance below which a new region continues an existing track.
pub const REGION_MATCH_DISTANCE: f64 = 10.0;

/// Mean of the last `window` values pushed.
#[derive(Clone, Debug)]
pub struct MovingAverage {
    window: usize,
    values: VecDeque<f64>,
    sum: f64,
}

impl MovingAverage {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            values: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push_back(value);
        self.sum += value;
        if self.values.len() > self.window {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
    }

    /// `None` until the first value arrives.
    pub fn average(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.sum / self.values.len() as f64)
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A region whose corners are each averaged over recent observations.
#[derive(Clone, Debug)]
pub struct SmoothRect {
    x1: MovingAverage,
    y1: MovingAverage,
    x2: MovingAverage,
    y2: MovingAverage,
}

impl SmoothRect {
    pub fn new(region: Region, window: usize) -> Self {
        let mut rect = Self {
            x1: MovingAverage::new(window),
            y1: MovingAverage::new(window),
            x2: MovingAverage::new(window),
            y2: MovingAverage::new(window),
        };
        rect.update(region);
        rect
    }

    pub fn update(&mut self, region: Region) {
        self.x1.push(region.x1 as f64);
        self.y1.push(region.y1 as f64);
        self.x2.push(region.x2 as f64);
        self.y2.push(region.y2 as f64);
    }

    pub fn region(&self) -> Region {
        let corner = |avg: &MovingAverage| avg.average().unwrap_or(0.0).round().max(0.0) as u32;
        Region::new(
            corner(&self.x1),
            corner(&self.y1),
            corner(&self.x2),
            corner(&self.y2),
        )
    }
}

/// Tracks regions across frames and smooths the coordinates of each track.
///
/// Each new region continues the first existing track whose smoothed centre lies
/// within `max_distance`; otherwise it starts a new track. Tracks that match
/// nothing in a frame are dropped.
#[derive(Clone, Debug)]
pub struct RectMatcher {
    tracks: Vec<SmoothRect>,
    max_distance: f64,
    window: usize,
}

impl Default for RectMatcher {
    fn default() -> Self {
        Self::new(REGION_MATCH_DISTANCE, REGION_SMOOTHING_WINDOW)
    }
}

impl RectMatcher {
    pub fn new(max_distance: f64, window: usize) -> Self {
        Self {
            tracks: Vec::new(),
            max_distance,
            window,
        }
    }

    pub fn update(&mut self, regions: &[Region]) {
        let mut previous = std::mem::take(&mut self.tracks);
        for region in regions {
            let matched = previous
                .iter()
                .position(|track| track.region().center_distance(region) < self.max_distance);
            match matched {
                Some(index) => {
                    let mut track = previous.swap_remove(index);
                    track.update(*region);
                    self.tracks.push(track);
                }
                None => self.tracks.push(SmoothRect::new(*region, self.window)),
            }
        }
    }

    pub fn regions(&self) -> Vec<Region> {
        self.tracks.iter().map(SmoothRect::region).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_average_keeps_window() {
        let mut avg = MovingAverage::new(3);
        assert_eq!(avg.average(), None);
        for v in [1.0, 2.0, 3.0, 10.0] {
            avg.push(v);
        }
        assert_eq!(avg.len(), 3);
        assert_eq!(avg.average(), Some(5.0));
    }

    #[test]
    fn matched_region_is_smoothed() {
        let mut matcher = RectMatcher::default();
        matcher.update(&[Region::new(0, 0, 10, 10)]);
        matcher.update(&[Region::new(2, 2, 12, 12)]);
        assert_eq!(matcher.regions(), vec![Region::new(1, 1, 11, 11)]);
    }

    #[test]
    fn distant_region_starts_new_track() {
        let mut matcher = RectMatcher::default();
        matcher.update(&[Region::new(0, 0, 10, 10)]);
        matcher.update(&[Region::new(100, 100, 110, 110)]);
        assert_eq!(matcher.regions(), vec![Region::new(100, 100, 110, 110)]);
    }

    #[test]
    fn unmatched_tracks_are_dropped() {
        let mut matcher = RectMatcher::default();
        matcher.update(&[Region::new(0, 0, 10, 10), Region::new(50, 50, 60, 60)]);
        matcher.update(&[]);
        assert!(matcher.regions().is_empty());
    }
}
