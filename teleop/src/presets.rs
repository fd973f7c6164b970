//! Grid of named motion presets.
//!
//! Every slot of the 15 x 4 grid always exists; an unassigned slot is named `-` and carries no
//! frame. The grid is written back to the store after each change.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::CommandFrame;

pub const ROWS: u8 = 15;
pub const COLS: u8 = 4;
pub const UNASSIGNED: &str = "-";

const NAMESPACE: &str = "kinematic";
const ENTRY: &str = "button_motions";

/// Grid position, persisted as `"{row:02}_{col:02}"`
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub row: u8,
    pub col: u8,
}

impl SlotKey {
    pub fn new(row: u8, col: u8) -> Result<Self> {
        if row < ROWS && col < COLS {
            Ok(Self {
                row,
                col,
            })
        } else {
            Err(Error::InvalidSlot(format!("{:02}_{:02}", row, col)))
        }
    }

    pub fn all() -> impl Iterator<Item = SlotKey> {
        (0..ROWS).flat_map(|row| {
            (0..COLS).map(move |col| SlotKey {
                row,
                col,
            })
        })
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}_{:02}", self.row, self.col)
    }
}

impl FromStr for SlotKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidSlot(s.to_owned());
        let (row, col) = s.split_once('_').ok_or_else(invalid)?;
        let row = row.parse().map_err(|_| invalid())?;
        let col = col.parse().map_err(|_| invalid())?;
        SlotKey::new(row, col).map_err(|_| invalid())
    }
}

/// On disk shape of a slot
#[derive(Serialize, Deserialize, Clone, Debug)]
struct PresetRecord {
    name: String,
    #[serde(default)]
    data: Vec<u8>,
    #[serde(default)]
    shortcut: Option<String>,
}

/// A named command frame bound to a grid slot
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "PresetRecord", into = "PresetRecord")]
pub struct Preset {
    pub name: String,
    pub frame: Option<CommandFrame>,
    pub shortcut: Option<String>,
}

impl Preset {
    pub fn unassigned() -> Self {
        Self {
            name: UNASSIGNED.into(),
            frame: None,
            shortcut: None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.frame.is_some()
    }
}

impl From<PresetRecord> for Preset {
    fn from(record: PresetRecord) -> Self {
        if record.name == UNASSIGNED {
            return Preset::unassigned();
        }
        match CommandFrame::try_from(record.data) {
            Ok(frame) => Preset {
                name: record.name,
                frame: Some(frame),
                shortcut: record.shortcut,
            },
            Err(e) => {
                warn!("Dropping preset {:?}: {}", record.name, e);
                Preset::unassigned()
            },
        }
    }
}

impl From<Preset> for PresetRecord {
    fn from(preset: Preset) -> Self {
        PresetRecord {
            name: preset.name,
            data: preset.frame.map(Vec::from).unwrap_or_default(),
            shortcut: preset.shortcut,
        }
    }
}

/// How a click on a slot is interpreted
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Normal,
    /// Next click on an unassigned slot stores the current frame under this name
    SaveArmed(String),
    /// Next click on an assigned slot clears it
    DeleteArmed,
}

/// What a click on an assigned slot does in [`Mode::Normal`]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ClickAction {
    #[default]
    Load,
    Send,
    LoadAndSend,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClickOutcome {
    Saved(SlotKey),
    Deleted(SlotKey),
    Load(CommandFrame),
    Send(CommandFrame),
    LoadAndSend(CommandFrame),
    /// The slot is not actionable in the current mode
    Ignored,
}

pub struct PresetStore {
    slots: BTreeMap<SlotKey, Preset>,
    mode: Mode,
    action: ClickAction,
    store: Store,
}

impl PresetStore {
    /// Loads the grid, fills in missing slots and writes the normalised grid back.
    pub fn open(store: Store) -> Self {
        let stored: BTreeMap<String, Preset> = store.load_or_default(NAMESPACE, ENTRY, BTreeMap::new());
        let mut slots: BTreeMap<SlotKey, Preset> =
            SlotKey::all().map(|key| (key, Preset::unassigned())).collect();
        for (key, preset) in stored {
            match key.parse::<SlotKey>() {
                Ok(key) => {
                    slots.insert(key, preset);
                },
                Err(e) => warn!("Ignoring stored preset: {}", e),
            }
        }
        let presets = Self {
            slots,
            mode: Mode::Normal,
            action: ClickAction::default(),
            store,
        };
        // Reported by the store, the grid stays usable in memory
        let _ = presets.persist();
        presets
    }

    fn persist(&self) -> Result<()> {
        let document: BTreeMap<String, &Preset> =
            self.slots.iter().map(|(key, preset)| (key.to_string(), preset)).collect();
        self.store.save_value(NAMESPACE, ENTRY, &document)
    }

    pub fn get(&self, key: SlotKey) -> &Preset {
        // Every key is populated at open
        &self.slots[&key]
    }

    pub fn find(&self, name: &str) -> Option<&Preset> {
        self.slots.values().find(|preset| preset.is_assigned() && preset.name == name)
    }

    /// Names of the assigned presets in grid order.
    pub fn motion_names(&self) -> Vec<&str> {
        self.slots.values().filter(|p| p.is_assigned()).map(|p| p.name.as_str()).collect()
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn click_action(&self) -> ClickAction {
        self.action
    }

    pub fn set_click_action(&mut self, action: ClickAction) {
        self.action = action;
    }

    /// Arms saving under `name`, or cancels when saving is already armed.
    pub fn arm_save(&mut self, name: &str) -> Result<()> {
        match self.mode {
            Mode::Normal => {
                if name.is_empty() {
                    warn!("Please input kinematic name");
                    return Err(Error::EmptyName);
                }
                if name == UNASSIGNED {
                    warn!("{:?} marks a free slot and cannot name a kinematic", name);
                    return Err(Error::ReservedName(name.to_owned()));
                }
                self.mode = Mode::SaveArmed(name.to_owned());
            },
            Mode::SaveArmed(_) => self.mode = Mode::Normal,
            Mode::DeleteArmed => warn!("Cannot save while deleting"),
        }
        Ok(())
    }

    /// Arms deletion, or cancels when deletion is already armed.
    pub fn arm_delete(&mut self) {
        match self.mode {
            Mode::Normal => self.mode = Mode::DeleteArmed,
            Mode::DeleteArmed => self.mode = Mode::Normal,
            Mode::SaveArmed(_) => warn!("Cannot delete while saving"),
        }
    }

    pub fn cancel(&mut self) {
        self.mode = Mode::Normal;
    }

    /// Whether a click on `key` would do anything in the current mode.
    pub fn is_actionable(&self, key: SlotKey) -> bool {
        match self.mode {
            Mode::SaveArmed(_) => !self.get(key).is_assigned(),
            Mode::Normal | Mode::DeleteArmed => self.get(key).is_assigned(),
        }
    }

    /// Applies a click on `key`; `current` is the frame in the command editor.
    ///
    /// A persistence failure is returned after the in memory grid has changed.
    pub fn click(&mut self, key: SlotKey, current: &CommandFrame) -> Result<ClickOutcome> {
        if !self.is_actionable(key) {
            return Ok(ClickOutcome::Ignored);
        }
        match std::mem::replace(&mut self.mode, Mode::Normal) {
            Mode::SaveArmed(name) => {
                info!("Save preset {} at {}", name, key);
                self.slots.insert(
                    key,
                    Preset {
                        name,
                        frame: Some(*current),
                        shortcut: None,
                    },
                );
                self.persist()?;
                Ok(ClickOutcome::Saved(key))
            },
            Mode::DeleteArmed => {
                info!("Delete preset {} at {}", self.get(key).name, key);
                self.slots.insert(key, Preset::unassigned());
                self.persist()?;
                Ok(ClickOutcome::Deleted(key))
            },
            Mode::Normal => {
                // is_actionable guarantees a frame here
                let frame = self.get(key).frame.unwrap_or_default();
                Ok(match self.action {
                    ClickAction::Load => ClickOutcome::Load(frame),
                    ClickAction::Send => ClickOutcome::Send(frame),
                    ClickAction::LoadAndSend => ClickOutcome::LoadAndSend(frame),
                })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_command;
    use crate::types::FIELD_COUNT;

    fn walk_frame() -> CommandFrame {
        encode_command([1, 10, 10, 50, 5, 5, 20, 20, 0, 0, 0, 0, 90, 90])
    }

    fn open(dir: &tempfile::TempDir) -> PresetStore {
        PresetStore::open(Store::new(dir.path()))
    }

    #[test]
    fn test_slot_key_format() {
        let key = SlotKey::new(3, 2).unwrap();
        assert_eq!(key.to_string(), "03_02");
        assert_eq!("14_03".parse::<SlotKey>().unwrap(), SlotKey::new(14, 3).unwrap());
        assert!("15_00".parse::<SlotKey>().is_err());
        assert!("00_04".parse::<SlotKey>().is_err());
        assert!("0003".parse::<SlotKey>().is_err());
        assert_eq!(SlotKey::all().count(), 60);
    }

    #[test]
    fn test_open_populates_grid() {
        let dir = tempfile::tempdir().unwrap();
        let presets = open(&dir);
        assert!(SlotKey::all().all(|key| *presets.get(key) == Preset::unassigned()));
        let stored: BTreeMap<String, serde_json::Value> =
            Store::new(dir.path()).get(NAMESPACE, ENTRY).unwrap().unwrap();
        assert_eq!(stored.len(), 60);
        assert_eq!(stored["00_00"], serde_json::json!({"name": "-", "data": [], "shortcut": null}));
    }

    #[test]
    fn test_save_into_unassigned_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut presets = open(&dir);
        let key = SlotKey::new(0, 0).unwrap();

        presets.arm_save("Walk").unwrap();
        assert_eq!(presets.mode(), &Mode::SaveArmed("Walk".into()));
        assert!(presets.is_actionable(key));

        let outcome = presets.click(key, &walk_frame()).unwrap();
        assert_eq!(outcome, ClickOutcome::Saved(key));
        assert_eq!(presets.mode(), &Mode::Normal);
        assert_eq!(presets.get(key).name, "Walk");
        assert_eq!(presets.get(key).frame, Some(walk_frame()));

        // An assigned slot is no longer a save target
        presets.arm_save("Run").unwrap();
        assert!(!presets.is_actionable(key));
        assert_eq!(presets.click(key, &CommandFrame::default()).unwrap(), ClickOutcome::Ignored);
        assert_eq!(presets.get(key).name, "Walk");
        assert_eq!(presets.mode(), &Mode::SaveArmed("Run".into()));

        // Persisted
        let reopened = open(&dir);
        assert_eq!(reopened.get(key).frame, Some(walk_frame()));
        assert_eq!(reopened.motion_names(), vec!["Walk"]);
    }

    #[test]
    fn test_save_requires_name_and_toggles() {
        let dir = tempfile::tempdir().unwrap();
        let mut presets = open(&dir);
        assert!(matches!(presets.arm_save(""), Err(Error::EmptyName)));
        assert_eq!(presets.mode(), &Mode::Normal);
        presets.arm_save("Walk").unwrap();
        presets.arm_save("Walk").unwrap();
        assert_eq!(presets.mode(), &Mode::Normal);
    }

    #[test]
    fn test_free_slot_marker_is_not_a_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut presets = open(&dir);
        assert!(matches!(presets.arm_save(UNASSIGNED), Err(Error::ReservedName(_))));
        assert_eq!(presets.mode(), &Mode::Normal);

        let key = SlotKey::new(0, 0).unwrap();
        assert_eq!(presets.click(key, &walk_frame()).unwrap(), ClickOutcome::Ignored);
        assert_eq!(*presets.get(key), Preset::unassigned());
        assert!(presets.motion_names().is_empty());
        assert_eq!(*open(&dir).get(key), Preset::unassigned());
    }

    #[test]
    fn test_delete_assigned_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut presets = open(&dir);
        let key = SlotKey::new(2, 1).unwrap();
        let empty = SlotKey::new(2, 2).unwrap();
        presets.arm_save("Turn").unwrap();
        presets.click(key, &walk_frame()).unwrap();

        presets.arm_delete();
        assert!(!presets.is_actionable(empty));
        assert_eq!(presets.click(empty, &walk_frame()).unwrap(), ClickOutcome::Ignored);
        assert_eq!(presets.mode(), &Mode::DeleteArmed);

        assert_eq!(presets.click(key, &walk_frame()).unwrap(), ClickOutcome::Deleted(key));
        assert_eq!(presets.mode(), &Mode::Normal);
        assert_eq!(*presets.get(key), Preset::unassigned());
        assert_eq!(*open(&dir).get(key), Preset::unassigned());
    }

    #[test]
    fn test_modes_do_not_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let mut presets = open(&dir);
        presets.arm_delete();
        presets.arm_save("Walk").unwrap();
        assert_eq!(presets.mode(), &Mode::DeleteArmed);
        presets.cancel();
        presets.arm_save("Walk").unwrap();
        presets.arm_delete();
        assert_eq!(presets.mode(), &Mode::SaveArmed("Walk".into()));
    }

    #[test]
    fn test_normal_click_follows_standing_action() {
        let dir = tempfile::tempdir().unwrap();
        let mut presets = open(&dir);
        let key = SlotKey::new(5, 3).unwrap();
        presets.arm_save("Bow").unwrap();
        presets.click(key, &walk_frame()).unwrap();

        let editor = CommandFrame::default();
        assert_eq!(presets.click(key, &editor).unwrap(), ClickOutcome::Load(walk_frame()));
        presets.set_click_action(ClickAction::Send);
        assert_eq!(presets.click(key, &editor).unwrap(), ClickOutcome::Send(walk_frame()));
        presets.set_click_action(ClickAction::LoadAndSend);
        assert_eq!(presets.click(key, &editor).unwrap(), ClickOutcome::LoadAndSend(walk_frame()));

        let unassigned = SlotKey::new(0, 0).unwrap();
        assert_eq!(presets.click(unassigned, &editor).unwrap(), ClickOutcome::Ignored);
    }

    #[test]
    fn test_stored_grid_is_normalised() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let mut data = vec![255u8];
        data.extend([7u8; FIELD_COUNT]);
        data.extend([254, 254]);
        store
            .save_value(
                NAMESPACE,
                ENTRY,
                &serde_json::json!({
                    "00_01": {"name": "Sit", "data": data, "shortcut": null},
                    "00_02": {"name": "-", "data": data, "shortcut": null},
                    "00_03": {"name": "Broken", "data": [1, 2, 3], "shortcut": null},
                    "99_99": {"name": "Lost", "data": data, "shortcut": null},
                }),
            )
            .unwrap();

        let presets = PresetStore::open(store);
        assert_eq!(presets.motion_names(), vec!["Sit"]);
        assert_eq!(presets.find("Sit").unwrap().frame.unwrap().fields(), [7u8; FIELD_COUNT]);
        assert!(presets.find("Broken").is_none());
        assert!(presets.find("-").is_none());
    }

    #[test]
    fn test_persistence_failure_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let mut presets = PresetStore::open(Store::new(blocker.join("data")));
        let key = SlotKey::new(1, 1).unwrap();
        presets.arm_save("Walk").unwrap();
        assert!(matches!(presets.click(key, &walk_frame()), Err(Error::Persistence { .. })));
        assert_eq!(presets.get(key).name, "Walk");
        assert_eq!(presets.mode(), &Mode::Normal);
    }
}
