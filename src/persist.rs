use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::loot::{applied_now, AppliedUpgrade, PersistentPlayerState, PersistentState};

const STORE_VERSION: u8 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct UpgradeStoreFile {
    version: u8,
    #[serde(flatten)]
    state: PersistentState,
}

#[derive(Clone, Debug, Deserialize)]
struct UpgradeStoreFileRaw {
    version: u8,
    player: Option<serde_json::Value>,
    towers: Option<serde_json::Value>,
}

/// File-backed copy of the locally persisted upgrade state. Loading tolerates
/// missing or damaged files (it degrades to an empty store); saving reports
/// errors to the caller and never panics.
pub struct UpgradeStore {
    file_path: PathBuf,
    state: PersistentState,
}

impl UpgradeStore {
    pub fn new(file_path: PathBuf) -> Self {
        let state = load_state(&file_path);
        Self { file_path, state }
    }

    pub fn state(&self) -> &PersistentState {
        &self.state
    }

    pub fn record_player_upgrade(&mut self, upgrade_id: &str) {
        self.state.player.upgrades.push(applied_now(upgrade_id));
    }

    pub fn add_gold_bonus(&mut self, amount: i64) {
        self.state.player.gold_bonus += amount.max(0);
    }

    pub fn record_tower_upgrade(&mut self, tower_id: &str, upgrade_id: &str) {
        self.state
            .towers
            .entry(tower_id.to_string())
            .or_default()
            .push(applied_now(upgrade_id));
    }

    /// Adopts a full state, e.g. the engine's copy at shutdown.
    pub fn replace(&mut self, state: PersistentState) {
        self.state = state;
    }

    pub fn clear(&mut self) {
        self.state = PersistentState::default();
    }

    pub fn save(&self) -> io::Result<()> {
        let file = UpgradeStoreFile {
            version: STORE_VERSION,
            state: self.state.clone(),
        };
        let text = serde_json::to_string_pretty(&file)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
        fs::write(&self.file_path, text)
    }
}

fn load_state(path: &Path) -> PersistentState {
    let Ok(raw_text) = fs::read_to_string(path) else {
        return PersistentState::default();
    };
    let Ok(raw) = serde_json::from_str::<UpgradeStoreFileRaw>(&raw_text) else {
        return PersistentState::default();
    };
    if raw.version != STORE_VERSION {
        return PersistentState::default();
    }

    let player = raw
        .player
        .and_then(|value| serde_json::from_value::<PersistentPlayerState>(value).ok())
        .unwrap_or_default();

    let mut state = PersistentState {
        player,
        ..PersistentState::default()
    };

    // Tower entries are parsed one by one; a damaged entry loses only itself.
    if let Some(serde_json::Value::Object(towers)) = raw.towers {
        for (tower_id, value) in towers {
            if let Ok(upgrades) = serde_json::from_value::<Vec<AppliedUpgrade>>(value) {
                state.towers.insert(tower_id, upgrades);
            }
        }
    }
    state
}
