//! Sweep-and-prune broad phase over agent spheres
//!
//! Each update projects every sphere onto one horizontal axis, sorts the
//! intervals by their lower end and sweeps forward from each interval until
//! the next one starts past its upper end. Candidate pairs are confirmed with
//! the real 3D distance. The axis for the next update is whichever of X and Z
//! had the larger spread this time.

use glam::Vec3;

/// Axis the intervals are projected onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SapAxis {
    #[default]
    X,
    Z,
}

impl SapAxis {
    #[inline]
    fn project(self, p: Vec3) -> f32 {
        match self {
            SapAxis::X => p.x,
            SapAxis::Z => p.z,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SapItem<K> {
    key: K,
    pos: Vec3,
    radius: f32,
    min: f32,
    max: f32,
}

/// A pair of overlapping spheres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection<K> {
    pub a: K,
    pub b: K,
    /// Distance between the two centers
    pub distance: f32,
    /// `b` center minus `a` center
    pub offset: Vec3,
}

#[derive(Debug, Clone)]
pub struct Sap<K> {
    items: Vec<SapItem<K>>,
    intersections: Vec<Intersection<K>>,
    axis: SapAxis,
}

impl<K> Default for Sap<K> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            intersections: Vec::new(),
            axis: SapAxis::X,
        }
    }
}

impl<K: Copy> Sap<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Axis the next update will sweep along
    #[inline]
    pub fn axis(&self) -> SapAxis {
        self.axis
    }

    /// Intersections found by the last update
    #[inline]
    pub fn intersections(&self) -> &[Intersection<K>] {
        &self.intersections
    }

    /// Rebuilds the intervals from `(key, center, radius)` entries and returns
    /// every overlapping pair
    pub fn update<I>(&mut self, entries: I) -> &[Intersection<K>]
    where
        I: IntoIterator<Item = (K, Vec3, f32)>,
    {
        let axis = self.axis;
        self.items.clear();
        self.intersections.clear();

        let mut lo = Vec3::splat(f32::MAX);
        let mut hi = Vec3::splat(f32::MIN);
        for (key, pos, radius) in entries {
            let center = axis.project(pos);
            self.items.push(SapItem {
                key,
                pos,
                radius,
                min: center - radius,
                max: center + radius,
            });
            lo = lo.min(pos);
            hi = hi.max(pos);
        }

        self.items.sort_by(|a, b| a.min.total_cmp(&b.min));

        for (i, a) in self.items.iter().enumerate() {
            for b in &self.items[i + 1..] {
                if b.min >= a.max {
                    break;
                }
                let offset = b.pos - a.pos;
                let reach = a.radius + b.radius;
                let dist_sq = offset.length_squared();
                if dist_sq < reach * reach {
                    self.intersections.push(Intersection {
                        a: a.key,
                        b: b.key,
                        distance: dist_sq.sqrt(),
                        offset,
                    });
                }
            }
        }

        if !self.items.is_empty() {
            let spread = hi - lo;
            self.axis = if spread.x > spread.z {
                SapAxis::X
            } else {
                SapAxis::Z
            };
        }

        &self.intersections
    }
}
