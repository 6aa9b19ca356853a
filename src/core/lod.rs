//! Distance-based level of detail table.
//!
//! The table is built once from the per-LOD index ranges of the loaded mesh,
//! ordered finest to coarsest, and is read-only afterwards.

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_LOD_BASE_DISTANCE, DEFAULT_LOD_DISTANCE_STEP, MAX_LOD_LEVELS};
use crate::core::types::LodDescriptor;
use crate::{CullError, Result};

/// Index range of one LOD inside the shared index pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LodRange {
    pub first_index: u32,
    pub index_count: u32,
}

impl LodRange {
    pub fn new(first_index: u32, index_count: u32) -> Self {
        Self {
            first_index,
            index_count,
        }
    }
}

/// Validated, ordered list of LOD descriptors.
///
/// Serialized as the bare descriptor list; deserializing runs the same
/// checks as [`LodTable::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<LodDescriptor>", into = "Vec<LodDescriptor>")]
pub struct LodTable {
    levels: Vec<LodDescriptor>,
}

impl LodTable {
    /// Builds a table from explicit descriptors.
    pub fn new(levels: Vec<LodDescriptor>) -> Result<Self> {
        Self::with_limit(levels, MAX_LOD_LEVELS)
    }

    /// Builds a table accepting at most `max_levels` descriptors.
    pub fn with_limit(levels: Vec<LodDescriptor>, max_levels: usize) -> Result<Self> {
        if levels.is_empty() {
            return Err(CullError::EmptyLodTable);
        }
        let max = max_levels.min(MAX_LOD_LEVELS);
        if levels.len() > max {
            return Err(CullError::TooManyLods {
                count: levels.len(),
                max,
            });
        }
        for (index, pair) in levels.windows(2).enumerate() {
            if pair[1].distance <= pair[0].distance {
                return Err(CullError::UnorderedLodThresholds { index: index + 1 });
            }
        }
        Ok(Self { levels })
    }

    /// Assigns thresholds `base + step * n` to mesh ranges ordered finest to coarsest.
    pub fn from_ranges(ranges: &[LodRange], base_distance: f32, step: f32) -> Result<Self> {
        let levels = ranges
            .iter()
            .enumerate()
            .map(|(n, range)| {
                LodDescriptor::new(
                    range.first_index,
                    range.index_count,
                    base_distance + n as f32 * step,
                )
            })
            .collect();
        Self::new(levels)
    }

    /// Same as [`LodTable::from_ranges`] with the default 5-unit spacing.
    pub fn with_default_distances(ranges: &[LodRange]) -> Result<Self> {
        Self::from_ranges(ranges, DEFAULT_LOD_BASE_DISTANCE, DEFAULT_LOD_DISTANCE_STEP)
    }

    /// Picks the finest LOD whose threshold `distance` has not exceeded, else the coarsest.
    #[inline]
    pub fn select(&self, distance: f32) -> usize {
        self.levels
            .iter()
            .position(|lod| distance <= lod.distance)
            .unwrap_or(self.levels.len() - 1)
    }

    #[inline]
    pub fn level(&self, index: usize) -> &LodDescriptor {
        &self.levels[index]
    }

    pub fn finest(&self) -> &LodDescriptor {
        &self.levels[0]
    }

    pub fn coarsest_index(&self) -> usize {
        self.levels.len() - 1
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn as_slice(&self) -> &[LodDescriptor] {
        &self.levels
    }
}

impl TryFrom<Vec<LodDescriptor>> for LodTable {
    type Error = CullError;

    fn try_from(levels: Vec<LodDescriptor>) -> Result<Self> {
        Self::new(levels)
    }
}

impl From<LodTable> for Vec<LodDescriptor> {
    fn from(table: LodTable) -> Self {
        table.levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges() -> Vec<LodRange> {
        vec![
            LodRange::new(0, 3000),
            LodRange::new(3000, 1500),
            LodRange::new(4500, 600),
            LodRange::new(5100, 90),
        ]
    }

    #[test]
    fn test_default_distances() {
        let table = LodTable::with_default_distances(&ranges()).unwrap();
        let distances: Vec<f32> = table.as_slice().iter().map(|l| l.distance).collect();
        assert_eq!(distances, vec![5.0, 10.0, 15.0, 20.0]);
    }

    #[test]
    fn test_select() {
        let table = LodTable::with_default_distances(&ranges()).unwrap();
        assert_eq!(table.select(0.0), 0);
        assert_eq!(table.select(5.0), 0);
        assert_eq!(table.select(5.01), 1);
        assert_eq!(table.select(19.0), 3);
        assert_eq!(table.select(1000.0), 3);
    }

    #[test]
    fn test_rejects_invalid_tables() {
        assert!(matches!(LodTable::new(vec![]), Err(CullError::EmptyLodTable)));

        let unordered = vec![
            LodDescriptor::new(0, 30, 10.0),
            LodDescriptor::new(30, 9, 10.0),
        ];
        assert!(matches!(
            LodTable::new(unordered),
            Err(CullError::UnorderedLodThresholds { index: 1 })
        ));

        let too_many: Vec<LodRange> = (0..MAX_LOD_LEVELS as u32 + 1)
            .map(|i| LodRange::new(i * 3, 3))
            .collect();
        assert!(matches!(
            LodTable::with_default_distances(&too_many),
            Err(CullError::TooManyLods { .. })
        ));
    }

    #[test]
    fn test_deserialize_rejects_empty_table() {
        use serde::de::value::{Error as ValueError, SeqDeserializer};

        let empty = SeqDeserializer::<_, ValueError>::new(Vec::<u32>::new().into_iter());
        let err = LodTable::deserialize(empty).unwrap_err();
        assert!(err.to_string().contains("LOD table is empty"));
    }

    #[test]
    fn test_try_from_checks_descriptors() {
        let levels = vec![
            LodDescriptor::new(0, 30, 10.0),
            LodDescriptor::new(30, 9, 20.0),
        ];
        let table = LodTable::try_from(levels.clone()).unwrap();
        assert_eq!(table.coarsest_index(), 1);
        assert_eq!(Vec::<LodDescriptor>::from(table), levels);

        let too_many = vec![LodDescriptor::default(); MAX_LOD_LEVELS + 1];
        assert!(matches!(
            LodTable::try_from(too_many),
            Err(CullError::TooManyLods { .. })
        ));
    }
}
