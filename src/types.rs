use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TowerKind {
    Healer,
    Mage,
    Archer,
}

impl TowerKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Healer" => Some(Self::Healer),
            "Mage" => Some(Self::Mage),
            "Archer" => Some(Self::Archer),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    Build,
    Combat,
}

impl CameraMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "build" => Some(Self::Build),
            "combat" => Some(Self::Combat),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Idle,
    Active,
    Ending,
    GameOver,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    CastleDestroyed,
}

impl GameOverReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CastleDestroyed => "castle destroyed",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PathCoord {
    pub x: i32,
    pub y: i32,
}

#[derive(Clone, Debug, Serialize)]
pub struct WorldInit {
    pub size: i32,
    /// Row strings, `'.'` buildable and `'#'` path.
    pub cells: Vec<String>,
    pub path: Vec<PathCoord>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlayerView {
    pub id: String,
    pub color: u32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub health: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct TowerView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TowerKind,
    pub position: Vec3,
    #[serde(rename = "placedBy")]
    pub placed_by: String,
    pub upgrades: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct EnemyView {
    pub id: String,
    pub position: Vec3,
    pub health: f32,
    #[serde(rename = "maxHealth")]
    pub max_health: f32,
}

#[derive(Clone, Debug, Serialize)]
pub struct SpawnPlanEntry {
    #[serde(rename = "enemyId")]
    pub enemy_id: String,
    #[serde(rename = "spawnDelayMs")]
    pub spawn_delay_ms: u64,
    pub health: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loot: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StateSnapshot {
    pub gold: i64,
    #[serde(rename = "castleHealth")]
    pub castle_health: i32,
    #[serde(rename = "castleMaxHealth")]
    pub castle_max_health: i32,
    pub wave: u32,
    #[serde(rename = "roundStatus")]
    pub round_status: RoundStatus,
    pub towers: Vec<TowerView>,
    pub enemies: Vec<EnemyView>,
}

/// Server-to-client deltas as the client engine consumes them, after the
/// transport layer has decoded the JSON frame.
#[derive(Clone, Debug)]
pub enum ServerEvent {
    PlayerJoined {
        player_id: String,
        color: u32,
    },
    PlayerLeft {
        player_id: String,
    },
    PlayerMoved {
        player_id: String,
        position: Vec3,
        rotation: Vec3,
    },
    TowerPlaced {
        tower: TowerView,
        gold: i64,
    },
    TowerPlaceFailed {
        reason: String,
    },
    TowerUpgraded {
        tower_id: String,
        upgrade_type: String,
    },
    GoldUpdate {
        gold: i64,
    },
    RoundStarted {
        wave: u32,
        plan: Vec<SpawnPlanEntry>,
    },
    RoundEnded {
        wave: u32,
        castle_health: i32,
    },
    EnemyUpdate {
        enemy_id: String,
        position: Vec3,
        health: f32,
    },
    EnemyDied {
        enemy_id: String,
        gold: i64,
        gold_earned: i64,
    },
    CastleHealthUpdate {
        health: i32,
    },
    PlayerAttacked {
        player_id: String,
        target_id: String,
        damage: f32,
    },
    LootCollected {
        loot_id: String,
        player_id: String,
        loot_type: String,
    },
    PlayerCameraMode {
        player_id: String,
        mode: CameraMode,
    },
    GameOver {
        reason: GameOverReason,
    },
    GameReset {
        snapshot: StateSnapshot,
    },
    ChatMessage {
        player_id: String,
        message: String,
        timestamp_ms: u64,
    },
}
