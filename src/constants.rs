use crate::types::TowerKind;

pub const TICK_RATE: u32 = 20;
pub const TICK_MS: u64 = 1000 / TICK_RATE as u64;

pub const GRID_SIZE: i32 = 50;
pub const MIN_GRID_SIZE: i32 = 10;
pub const TILE_SIZE: f32 = 1.0;

pub const STARTING_GOLD: i64 = 100;
pub const CASTLE_MAX_HEALTH: i32 = 10;
pub const CASTLE_LEAK_DAMAGE: i32 = 1;

pub const ENEMY_BASE_HEALTH: f32 = 10.0;
pub const ENEMY_HEALTH_PER_WAVE: f32 = 1.5;
// Path segments per second; 0.03 progress per frame at 60fps in the original.
pub const ENEMY_BASE_SPEED: f32 = 1.8;
pub const ENEMY_GOLD_MIN: i32 = 5;
pub const ENEMY_GOLD_MAX: i32 = 15;
pub const SPAWN_STAGGER_MS: u64 = 900;

pub const WAVE_COUNT_SCALE: u32 = 3;
pub const WAVE_COUNT_BASE: u32 = 2;
pub const SECONDARY_CARRIER_WAVE_INTERVAL: u32 = 5;
pub const SECONDARY_CARRIER_CHANCE: f32 = 0.5;

pub const PLAYER_MAX_HEALTH: f32 = 100.0;
pub const PLAYER_MELEE_DAMAGE: f32 = 5.0;
pub const PLAYER_MELEE_RANGE: f32 = 3.0;
pub const PLAYER_MELEE_COOLDOWN_MS: u64 = 600;
pub const PLAYER_PICKUP_RANGE: f32 = 1.5;
pub const PLAYER_MOVE_SPEED: f32 = 0.2;

pub const TOWER_MIN_SPACING: f32 = 2.0;
pub const TOWERS_PER_ACTIVE_ROUND: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TowerStats {
    pub cost: i64,
    pub range: f32,
    /// Damage per hit, or heal amount for the healer.
    pub power: f32,
    pub cooldown_ms: u64,
}

pub fn get_tower_stats(kind: TowerKind) -> TowerStats {
    match kind {
        TowerKind::Healer => TowerStats {
            cost: 30,
            range: 10.0,
            power: 5.0,
            cooldown_ms: 2_000,
        },
        TowerKind::Mage => TowerStats {
            cost: 40,
            range: 8.0,
            power: 12.0,
            cooldown_ms: 1_500,
        },
        TowerKind::Archer => TowerStats {
            cost: 25,
            range: 20.0,
            power: 7.0,
            cooldown_ms: 800,
        },
    }
}

pub fn get_wave_enemy_count(wave: u32) -> u32 {
    wave * WAVE_COUNT_SCALE + WAVE_COUNT_BASE
}

pub fn get_wave_enemy_health(wave: u32) -> f32 {
    ENEMY_BASE_HEALTH + wave.saturating_sub(1) as f32 * ENEMY_HEALTH_PER_WAVE
}
