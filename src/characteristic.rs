use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{
    error::{BedError, Result},
    BED_SERVICE_UUID,
};

/// Lower vibration motor
pub const LOWER_VIB: &str = "lower vib";
/// Upper vibration motor
pub const UPPER_VIB: &str = "upper vib";
/// Lower (leg) lift axis
pub const LOWER_LIFT: &str = "lower lift";
/// Upper (head) lift axis
pub const UPPER_LIFT: &str = "upper lift";
/// Under-bed light
pub const LIGHT: &str = "light";
/// Zero-gravity pair: upper lift then lower lift
pub const ZERO_G: &str = "zero g";
/// Anti-snore preset, addresses the upper lift
pub const NO_SNORE: &str = "no snore";

/// Characteristic UUID in the bed's vendor range, `db80XXXX-f324-...`
#[must_use]
pub const fn bed_characteristic_uuid(short: u16) -> Uuid {
    const MASK: u128 = 0xffff << 96;
    let base = BED_SERVICE_UUID.as_u128() & !MASK;
    Uuid::from_u128(base | ((short as u128) << 96))
}

/// Where a named characteristic lives in the service's characteristic list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Slot {
    /// A plain actuator or sensor
    Single(usize),
    /// A compound actuator addressed by sub-index
    List(Vec<usize>),
}

/// One index entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicEntry {
    /// Position(s) in the characteristic list
    pub slot: Slot,
    /// Whether writes physically move an actuator and need a hold
    #[serde(default)]
    pub movement: bool,
    /// UUID expected at each position, in slot order; empty skips the check
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uuids: Vec<Uuid>,
}

impl CharacteristicEntry {
    /// Entry for an actuator whose effect is immediate
    #[must_use]
    pub const fn immediate(position: usize) -> Self {
        Self {
            slot: Slot::Single(position),
            movement: false,
            uuids: Vec::new(),
        }
    }

    /// Entry for an actuator with physical travel time
    #[must_use]
    pub const fn movement(position: usize) -> Self {
        Self {
            slot: Slot::Single(position),
            movement: true,
            uuids: Vec::new(),
        }
    }

    /// Compound entry for actuators with physical travel time
    #[must_use]
    pub const fn movement_list(positions: Vec<usize>) -> Self {
        Self {
            slot: Slot::List(positions),
            movement: true,
            uuids: Vec::new(),
        }
    }

    /// Pin the UUIDs expected at this entry's positions
    #[must_use]
    pub fn with_uuids(mut self, uuids: impl IntoIterator<Item = Uuid>) -> Self {
        self.uuids = uuids.into_iter().collect();
        self
    }

    fn positions(&self) -> &[usize] {
        match &self.slot {
            Slot::Single(position) => std::slice::from_ref(position),
            Slot::List(positions) => positions,
        }
    }
}

/// Immutable mapping from logical name to characteristic position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacteristicIndex {
    entries: BTreeMap<String, CharacteristicEntry>,
}

impl CharacteristicIndex {
    /// Build an index from explicit entries
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, CharacteristicEntry)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, entry)| (name.into(), entry))
                .collect(),
        }
    }

    /// Resolve a name and optional sub-index to a single position
    ///
    /// A sub-index is required for compound entries and rejected for
    /// plain ones.
    ///
    /// # Errors
    ///
    /// Returns [`BedError::UnknownCharacteristic`] if `name` is absent and
    /// [`BedError::IndexOutOfRange`] if the sub-index does not fit the entry.
    pub fn resolve(&self, name: &str, sub_index: Option<usize>) -> Result<usize> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| BedError::UnknownCharacteristic(name.to_string()))?;

        let out_of_range = || BedError::IndexOutOfRange {
            characteristic: name.to_string(),
            index: sub_index,
        };

        match (&entry.slot, sub_index) {
            (Slot::Single(position), None) => Ok(*position),
            (Slot::List(positions), Some(i)) => positions.get(i).copied().ok_or_else(out_of_range),
            (Slot::Single(_), Some(_)) | (Slot::List(_), None) => Err(out_of_range()),
        }
    }

    /// Whether writes to `name` need a movement hold; unknown names do not
    #[must_use]
    pub fn is_movement(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|entry| entry.movement)
    }

    /// Positions with a pinned UUID, checked against each new connection
    #[must_use]
    pub fn layout(&self) -> BTreeMap<usize, Uuid> {
        self.entries
            .values()
            .flat_map(|entry| entry.positions().iter().copied().zip(entry.uuids.iter().copied()))
            .collect()
    }

    /// Check if a name is configured
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

impl Default for CharacteristicIndex {
    fn default() -> Self {
        let upper_lift = bed_characteristic_uuid(0x1041);
        let lower_lift = bed_characteristic_uuid(0x1042);

        Self::new([
            (
                LOWER_VIB,
                CharacteristicEntry::immediate(8).with_uuids([bed_characteristic_uuid(0x1060)]),
            ),
            (
                UPPER_VIB,
                CharacteristicEntry::immediate(9).with_uuids([bed_characteristic_uuid(0x1061)]),
            ),
            (
                LOWER_LIFT,
                CharacteristicEntry::movement(6).with_uuids([lower_lift]),
            ),
            (
                UPPER_LIFT,
                CharacteristicEntry::movement(5).with_uuids([upper_lift]),
            ),
            (
                LIGHT,
                CharacteristicEntry::immediate(14).with_uuids([bed_characteristic_uuid(0x10a0)]),
            ),
            (
                ZERO_G,
                CharacteristicEntry::movement_list(vec![5, 6]).with_uuids([upper_lift, lower_lift]),
            ),
            (
                NO_SNORE,
                CharacteristicEntry::movement(5).with_uuids([upper_lift]),
            ),
        ])
    }
}
