use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::record::BranchPoint;
use crate::time::FireWindow;

/// Branch points of one record, in authoring order.
///
/// Order is not sorted by time; callers must not assume it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchSchedule {
    points: Vec<BranchPoint>,
}

impl BranchSchedule {
    pub fn new(points: Vec<BranchPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BranchPoint> {
        self.points.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BranchPoint> {
        self.points.iter()
    }

    pub(crate) fn into_points(self) -> Vec<BranchPoint> {
        self.points
    }

    /// Indices whose firing window contains `position_us` and that are not in
    /// `fired`, in schedule order.
    pub fn eligible_at(
        &self,
        position_us: i64,
        window: FireWindow,
        fired: &BTreeSet<usize>,
    ) -> Vec<usize> {
        self.points
            .iter()
            .enumerate()
            .filter(|(index, point)| {
                !fired.contains(index) && window.contains(point.appear_at_us(), position_us)
            })
            .map(|(index, _)| index)
            .collect()
    }
}
