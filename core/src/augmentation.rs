//! Bookkeeping for dynamically augmented contact landmarks.
//!
//! When a foot makes contact its world position is appended to the state as a
//! landmark column; when contact breaks the column is marginalised away. This
//! manager owns the mapping from leg id to group column (and therefore to the
//! covariance offset) and performs both resizes through [`RobotState`], so X
//! and P can never disagree about their dimensions.
//!
//! The leg table is a small arena with stable slot indices: removing a leg
//! leaves a tombstone that the next augmentation reclaims, and surviving
//! column indices are renumbered in place when a column below them is
//! marginalised.

use nalgebra::{Matrix3, Vector3};

use crate::state::RobotState;

#[derive(Clone, Copy, Debug)]
struct Landmark {
    leg: usize,
    column: usize,
}

/// Maps leg ids to landmark columns and keeps X/P resizes consistent.
#[derive(Clone, Debug, Default)]
pub struct AugmentationManager {
    slots: Vec<Option<Landmark>>,
}

impl AugmentationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group column currently holding this leg's landmark, if augmented.
    pub fn column_of(&self, leg: usize) -> Option<usize> {
        self.slots
            .iter()
            .flatten()
            .find(|landmark| landmark.leg == leg)
            .map(|landmark| landmark.column)
    }

    /// Number of legs currently augmented.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a landmark for `leg` at world position `d` with covariance
    /// block `cov`. Returns the group column. A leg that is already
    /// augmented keeps its existing column and is left untouched.
    pub fn augment(
        &mut self,
        state: &mut RobotState,
        leg: usize,
        d: &Vector3<f64>,
        cov: &Matrix3<f64>,
    ) -> usize {
        if let Some(column) = self.column_of(leg) {
            return column;
        }
        let column = state.augment(d, cov);
        let landmark = Some(Landmark { leg, column });
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = landmark,
            None => self.slots.push(landmark),
        }
        column
    }

    /// Marginalise `leg`'s landmark out of the state. Returns `false` if the
    /// leg was not augmented.
    pub fn unaugment(&mut self, state: &mut RobotState, leg: usize) -> bool {
        let Some(slot_index) = self
            .slots
            .iter()
            .position(|slot| slot.map(|landmark| landmark.leg == leg).unwrap_or(false))
        else {
            return false;
        };
        let column = self.slots[slot_index].map(|landmark| landmark.column).unwrap_or(0);
        if !state.unaugment(column) {
            return false;
        }
        self.slots[slot_index] = None;
        for slot in self.slots.iter_mut().flatten() {
            if slot.column > column {
                slot.column -= 1;
            }
        }
        true
    }

    /// Drop the whole table. Does not touch the state; callers pair this with
    /// a state reset.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}
