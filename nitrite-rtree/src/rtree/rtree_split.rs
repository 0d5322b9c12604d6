//! Node split heuristics.
//!
//! Both strategies are pure functions over an overflowing entry set. They
//! pick two seed entries, grow one group around each seed and hand every
//! remaining entry to the group that needs the least enlargement. When a
//! group can only reach the minimum fill by taking every unassigned entry,
//! the remainder is assigned to it without further comparison.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::rtree_types::{Entry, SpatialError, SpatialResult};
use crate::bounding_box::BoundingBox;

/// Algorithm used to partition an overflowing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitStrategy {
    /// Seeds by greatest normalized separation, then assigns in input order.
    Linear,
    /// Seeds by greatest dead space, then assigns the most decided entry first.
    Quadratic,
}

impl SplitStrategy {
    /// Numeric id used by persisted and external configurations.
    pub fn id(&self) -> u8 {
        match self {
            SplitStrategy::Linear => 0,
            SplitStrategy::Quadratic => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SplitStrategy::Linear => "linear",
            SplitStrategy::Quadratic => "quadratic",
        }
    }

    /// Partitions `entries` into two groups holding at least `min_entries`
    /// each. Every input entry ends up in exactly one group.
    ///
    /// # Errors
    ///
    /// `InvalidSplitInput` when fewer than `2 * min_entries` entries (or
    /// fewer than two) are given.
    pub fn split(
        &self,
        entries: Vec<Entry>,
        min_entries: usize,
    ) -> SpatialResult<(Vec<Entry>, Vec<Entry>)> {
        let required = (2 * min_entries).max(2);
        if entries.len() < required {
            return Err(SpatialError::InvalidSplitInput {
                entries: entries.len(),
                required,
            });
        }

        let (first, second) = match self {
            SplitStrategy::Linear => linear_seeds(&entries),
            SplitStrategy::Quadratic => quadratic_seeds(&entries)?,
        };
        let (mut first, mut second, remaining) = seed_groups(entries, first, second);

        match self {
            SplitStrategy::Linear => {
                distribute_linear(&mut first, &mut second, remaining, min_entries)?
            }
            SplitStrategy::Quadratic => {
                distribute_quadratic(&mut first, &mut second, remaining, min_entries)?
            }
        }

        log::trace!(
            "{} split produced groups of {} and {} entries",
            self,
            first.entries.len(),
            second.entries.len()
        );
        Ok((first.entries, second.entries))
    }
}

impl Display for SplitStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<u8> for SplitStrategy {
    type Error = SpatialError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SplitStrategy::Linear),
            1 => Ok(SplitStrategy::Quadratic),
            other => Err(SpatialError::TreeConfiguration(format!(
                "unsupported split strategy id {}",
                other
            ))),
        }
    }
}

impl FromStr for SplitStrategy {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(SplitStrategy::Linear),
            "quadratic" => Ok(SplitStrategy::Quadratic),
            other => Err(SpatialError::TreeConfiguration(format!(
                "unsupported split strategy '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// Groups
// ============================================================================

/// A group under construction and its running bounding box.
struct Group {
    entries: Vec<Entry>,
    bbox: BoundingBox,
}

impl Group {
    fn seeded(entry: Entry) -> Self {
        Self {
            bbox: entry.bbox.clone(),
            entries: vec![entry],
        }
    }

    fn push(&mut self, entry: Entry) -> SpatialResult<()> {
        self.bbox = self.bbox.union(&entry.bbox)?;
        self.entries.push(entry);
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

enum Side {
    First,
    Second,
}

/// Takes the seeds out of the entry list; `first < second` is required.
fn seed_groups(mut entries: Vec<Entry>, first: usize, second: usize) -> (Group, Group, Vec<Entry>) {
    let second_seed = entries.remove(second);
    let first_seed = entries.remove(first);
    (Group::seeded(first_seed), Group::seeded(second_seed), entries)
}

/// Prefers the smaller enlargement, then the smaller group box, then the
/// group with fewer entries.
fn select_group(first: &Group, second: &Group, first_cost: f64, second_cost: f64) -> Side {
    if first_cost < second_cost {
        Side::First
    } else if second_cost < first_cost {
        Side::Second
    } else if first.bbox.area() < second.bbox.area() {
        Side::First
    } else if second.bbox.area() < first.bbox.area() {
        Side::Second
    } else if second.len() < first.len() {
        Side::Second
    } else {
        Side::First
    }
}

fn assign(first: &mut Group, second: &mut Group, entry: Entry) -> SpatialResult<()> {
    let first_cost = first.bbox.enlargement(&entry.bbox)?;
    let second_cost = second.bbox.enlargement(&entry.bbox)?;
    match select_group(first, second, first_cost, second_cost) {
        Side::First => first.push(entry),
        Side::Second => second.push(entry),
    }
}

/// The group that needs every unassigned entry to reach `min_entries`,
/// if any.
fn forced_side(
    first: &Group,
    second: &Group,
    unassigned: usize,
    min_entries: usize,
) -> Option<Side> {
    if first.len() + unassigned <= min_entries {
        Some(Side::First)
    } else if second.len() + unassigned <= min_entries {
        Some(Side::Second)
    } else {
        None
    }
}

fn push_all<I>(group: &mut Group, entries: I) -> SpatialResult<()>
where
    I: IntoIterator<Item = Entry>,
{
    for entry in entries {
        group.push(entry)?;
    }
    Ok(())
}

// ============================================================================
// Quadratic
// ============================================================================

/// The pair wasting the most area when boxed together.
fn quadratic_seeds(entries: &[Entry]) -> SpatialResult<(usize, usize)> {
    let mut seeds = (0, 1);
    let mut max_dead_space = f64::NEG_INFINITY;

    for (i, a) in entries.iter().enumerate() {
        for (j, b) in entries.iter().enumerate().skip(i + 1) {
            let dead_space = a.bbox.union(&b.bbox)?.area() - a.bbox.area() - b.bbox.area();
            if dead_space > max_dead_space {
                max_dead_space = dead_space;
                seeds = (i, j);
            }
        }
    }
    Ok(seeds)
}

fn distribute_quadratic(
    first: &mut Group,
    second: &mut Group,
    mut remaining: Vec<Entry>,
    min_entries: usize,
) -> SpatialResult<()> {
    while !remaining.is_empty() {
        match forced_side(first, second, remaining.len(), min_entries) {
            Some(Side::First) => return push_all(first, remaining),
            Some(Side::Second) => return push_all(second, remaining),
            None => {}
        }

        let next = pick_next(first, second, &remaining)?;
        let entry = remaining.remove(next);
        assign(first, second, entry)?;
    }
    Ok(())
}

/// The unassigned entry with the strongest preference for one group.
fn pick_next(first: &Group, second: &Group, remaining: &[Entry]) -> SpatialResult<usize> {
    let mut best = 0;
    let mut max_difference = f64::NEG_INFINITY;

    for (i, entry) in remaining.iter().enumerate() {
        let first_cost = first.bbox.enlargement(&entry.bbox)?;
        let second_cost = second.bbox.enlargement(&entry.bbox)?;
        let difference = (first_cost - second_cost).abs();
        if difference > max_difference {
            max_difference = difference;
            best = i;
        }
    }
    Ok(best)
}

// ============================================================================
// Linear
// ============================================================================

/// The pair farthest apart along the dimension with the greatest
/// separation normalized by that dimension's extent.
fn linear_seeds(entries: &[Entry]) -> (usize, usize) {
    let dimensions = entries[0].bbox.dimensions();
    let mut seeds = (0, 1);
    let mut best_separation = f64::NEG_INFINITY;

    for d in 0..dimensions {
        let mut highest_low = 0;
        for (i, entry) in entries.iter().enumerate() {
            if entry.bbox.min()[d] > entries[highest_low].bbox.min()[d] {
                highest_low = i;
            }
        }

        let mut lowest_high: Option<usize> = None;
        for (i, entry) in entries.iter().enumerate() {
            if i == highest_low {
                continue;
            }
            match lowest_high {
                Some(j) if entries[j].bbox.max()[d] <= entry.bbox.max()[d] => {}
                _ => lowest_high = Some(i),
            }
        }
        let Some(lowest_high) = lowest_high else {
            continue;
        };

        let low = entries
            .iter()
            .map(|e| e.bbox.min()[d])
            .fold(f64::INFINITY, f64::min);
        let high = entries
            .iter()
            .map(|e| e.bbox.max()[d])
            .fold(f64::NEG_INFINITY, f64::max);
        let extent = high - low;

        let separation = entries[highest_low].bbox.min()[d] - entries[lowest_high].bbox.max()[d];
        let normalized = if extent > 0.0 { separation / extent } else { 0.0 };

        if normalized > best_separation {
            best_separation = normalized;
            seeds = (
                highest_low.min(lowest_high),
                highest_low.max(lowest_high),
            );
        }
    }
    seeds
}

fn distribute_linear(
    first: &mut Group,
    second: &mut Group,
    remaining: Vec<Entry>,
    min_entries: usize,
) -> SpatialResult<()> {
    let mut remaining = remaining.into_iter();
    while let Some(entry) = remaining.next() {
        let target = match forced_side(first, second, remaining.len() + 1, min_entries) {
            Some(Side::First) => &mut *first,
            Some(Side::Second) => &mut *second,
            None => {
                assign(first, second, entry)?;
                continue;
            }
        };
        target.push(entry)?;
        return push_all(target, remaining);
    }
    Ok(())
}
