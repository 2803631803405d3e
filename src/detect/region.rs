use serde::Serialize;

/// Axis-aligned region in pixel coordinates: `(x1, y1)` inclusive top-left,
/// `(x2, y2)` exclusive bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// Build from an `(x, y, width, height)` box at detection scale, mapped back to
    /// source coordinates by `scale`.
    pub fn from_scaled_box(x: u32, y: u32, width: u32, height: u32, scale: f64) -> Self {
        let map = |v: u32| (v as f64 * scale).round().max(0.0) as u32;
        Self::new(map(x), map(y), map(x + width), map(y + height))
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x1 as f64 + self.x2 as f64) / 2.0,
            (self.y1 as f64 + self.y2 as f64) / 2.0,
        )
    }

    pub fn diagonal(&self) -> f64 {
        (self.width() as f64).hypot(self.height() as f64)
    }

    /// Euclidean distance between the two centres.
    pub fn center_distance(&self, other: &Region) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).hypot(ay - by)
    }

    /// Smallest region containing both.
    pub fn union(&self, other: &Region) -> Region {
        Region {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    pub fn contains(&self, other: &Region) -> bool {
        self.x1 <= other.x1 && self.y1 <= other.y1 && self.x2 >= other.x2 && self.y2 >= other.y2
    }

    pub fn intersects(&self, other: &Region) -> bool {
        self.x1 < other.x2 && other.x1 < self.x2 && self.y1 < other.y2 && other.y1 < self.y2
    }

    /// Clamp to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Region {
        Region::new(
            self.x1.min(width),
            self.y1.min(height),
            self.x2.min(width),
            self.y2.min(height),
        )
    }
}

/// Merge regions that describe the same moving object.
///
/// Regions are ordered by centre (top to bottom, then left to right). Neighbouring
/// regions whose centres are closer than the larger of their diagonals are replaced by
/// their union. Repeats until a full pass makes no merge.
pub fn merge_nearby(mut regions: Vec<Region>) -> Vec<Region> {
    sort_by_center(&mut regions);
    loop {
        let mut merged = false;
        let mut i = 0;
        while i + 1 < regions.len() {
            let a = regions[i];
            let b = regions[i + 1];
            if a.center_distance(&b) < a.diagonal().max(b.diagonal()) {
                regions[i] = a.union(&b);
                regions.remove(i + 1);
                merged = true;
            } else {
                i += 1;
            }
        }
        if !merged {
            break;
        }
        sort_by_center(&mut regions);
    }
    regions
}

fn sort_by_center(regions: &mut [Region]) {
    regions.sort_by(|a, b| {
        let (ax, ay) = a.center();
        let (bx, by) = b.center();
        ay.total_cmp(&by).then(ax.total_cmp(&bx))
    });
}
