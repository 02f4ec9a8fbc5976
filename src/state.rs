use std::collections::BTreeMap;

use crate::constants::{
    get_tower_stats, ENEMY_GOLD_MAX, ENEMY_GOLD_MIN, GRID_SIZE, TOWER_MIN_SPACING,
};
use crate::economy::EconomyLedger;
use crate::loot::{can_stack, find_loot, AppliedUpgrade, LootEffect, LootScope};
use crate::rng::Rng;
use crate::round::RoundLifecycle;
use crate::server_utils::ColorPool;
use crate::types::{
    EnemyView, GameOverReason, PlayerView, SpawnPlanEntry, StateSnapshot, TowerKind, TowerView,
    Vec3, WorldInit,
};
use crate::waves::plan_wave;
use crate::world::{generate_world, tile_center, to_world_init, world_to_tile, GeneratedWorld};

pub const REASON_TOO_CLOSE: &str = "Too close to another tower";
pub const REASON_ON_PATH: &str = "Cannot build on the path";
pub const REASON_OUTSIDE_ARENA: &str = "Cannot build outside the arena";
pub const REASON_TOWER_NOT_FOUND: &str = "Tower not found";
pub const REASON_UNKNOWN_UPGRADE: &str = "Unknown upgrade";
pub const REASON_GAME_NOT_OVER: &str = "Game is not over";

#[derive(Clone, Debug)]
struct PlayerRecord {
    color: u32,
    position: Vec3,
    rotation: Vec3,
    health: f32,
}

#[derive(Clone, Debug)]
struct TowerRecord {
    kind: TowerKind,
    position: Vec3,
    placed_by: String,
    upgrades: Vec<AppliedUpgrade>,
}

#[derive(Clone, Debug)]
struct EnemyRecord {
    position: Vec3,
    health: f32,
    max_health: f32,
}

#[derive(Clone, Debug)]
pub struct RoundStartInfo {
    pub wave: u32,
    pub enemies_count: u32,
    pub plan: Vec<SpawnPlanEntry>,
}

#[derive(Clone, Debug)]
pub struct EnemyDeathOutcome {
    pub gold_earned: i64,
    pub gold: i64,
    /// Next wave number when this death drained the round.
    pub round_ended: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct CastleDamageOutcome {
    pub health: i32,
    /// Set on the first transition into the terminal state only.
    pub game_over: Option<GameOverReason>,
    pub round_ended: Option<u32>,
}

/// Ground truth for one game instance: the shared ledger, the tower registry,
/// the round machine, and the enemy accounting that decides when a wave is
/// done. Everything the server arbitrates lives here; enemy poses are only
/// mirrored from client reports.
pub struct GameState {
    seed: u32,
    world: GeneratedWorld,
    rng: Rng,
    players: BTreeMap<String, PlayerRecord>,
    colors: ColorPool,
    towers: BTreeMap<String, TowerRecord>,
    ledger: EconomyLedger,
    round: RoundLifecycle,
    enemies: BTreeMap<String, EnemyRecord>,
    tower_seq: u64,
}

impl GameState {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            world: generate_world(GRID_SIZE, seed),
            rng: Rng::new(seed),
            players: BTreeMap::new(),
            colors: ColorPool::new(),
            towers: BTreeMap::new(),
            ledger: EconomyLedger::default(),
            round: RoundLifecycle::new(),
            enemies: BTreeMap::new(),
            tower_seq: 0,
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn world(&self) -> &GeneratedWorld {
        &self.world
    }

    pub fn world_init(&self) -> WorldInit {
        to_world_init(&self.world)
    }

    pub fn add_player(&mut self, player_id: &str) -> u32 {
        let color = self.colors.allocate();
        self.players.insert(
            player_id.to_string(),
            PlayerRecord {
                color,
                position: Vec3::ZERO,
                rotation: Vec3::ZERO,
                health: 100.0,
            },
        );
        color
    }

    /// Idempotent: removing an unknown player changes nothing.
    pub fn remove_player(&mut self, player_id: &str) {
        if let Some(record) = self.players.remove(player_id) {
            self.colors.release(record.color);
        }
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.players.contains_key(player_id)
    }

    pub fn update_player_pose(&mut self, player_id: &str, position: Vec3, rotation: Vec3) {
        if let Some(record) = self.players.get_mut(player_id) {
            record.position = position;
            record.rotation = rotation;
        }
    }

    pub fn players_view(&self) -> Vec<PlayerView> {
        self.players
            .iter()
            .map(|(id, record)| PlayerView {
                id: id.clone(),
                color: record.color,
                position: record.position,
                rotation: record.rotation,
                health: record.health,
            })
            .collect()
    }

    pub fn place_tower(
        &mut self,
        kind: TowerKind,
        position: Vec3,
        placed_by: &str,
    ) -> Result<(TowerView, i64), &'static str> {
        let Some((tile_x, tile_y)) = world_to_tile(self.world.size, position.x, position.z)
        else {
            return Err(REASON_OUTSIDE_ARENA);
        };

        // Gold first: the most common rejection and the one the UI leads with.
        let cost = get_tower_stats(kind).cost;
        if cost > self.ledger.gold() {
            return Err(crate::economy::REASON_NOT_ENOUGH_GOLD);
        }

        for tower in self.towers.values() {
            let dx = tower.position.x - position.x;
            let dz = tower.position.z - position.z;
            if (dx * dx + dz * dz).sqrt() < TOWER_MIN_SPACING {
                return Err(REASON_TOO_CLOSE);
            }
        }

        if self.world.is_path_cell(tile_x, tile_y) {
            return Err(REASON_ON_PATH);
        }

        self.round.note_tower_placed()?;
        self.ledger.try_spend(cost)?;

        self.tower_seq += 1;
        let tower_id = format!("tower_{}", self.tower_seq);
        self.towers.insert(
            tower_id.clone(),
            TowerRecord {
                kind,
                position,
                placed_by: placed_by.to_string(),
                upgrades: Vec::new(),
            },
        );

        Ok((self.tower_view(&tower_id), self.ledger.gold()))
    }

    /// Ok(true): applied, broadcast it. Ok(false): at the stacking cap, a
    /// silent no-op. Err: reject to the requester.
    pub fn upgrade_tower(
        &mut self,
        tower_id: &str,
        upgrade_type: &str,
    ) -> Result<bool, &'static str> {
        let Some(def) = find_loot(upgrade_type) else {
            return Err(REASON_UNKNOWN_UPGRADE);
        };
        if def.scope != LootScope::Tower {
            return Err(REASON_UNKNOWN_UPGRADE);
        }
        let Some(tower) = self.towers.get_mut(tower_id) else {
            return Err(REASON_TOWER_NOT_FOUND);
        };
        if !can_stack(&tower.upgrades, def) {
            return Ok(false);
        }
        tower.upgrades.push(crate::loot::applied_now(def.id));
        Ok(true)
    }

    pub fn start_round(&mut self) -> Result<RoundStartInfo, &'static str> {
        let wave = self.round.wave();
        let plan = plan_wave(wave, &mut self.rng);
        self.round.begin_round(plan.len() as u32)?;

        // The registry is seeded from the server's own plan so termination is
        // server-accounted even if a client never reports a spawn.
        self.enemies.clear();
        let spawn = tile_center(self.world.size, self.world.entrance());
        for entry in &plan {
            self.enemies.insert(
                entry.enemy_id.clone(),
                EnemyRecord {
                    position: spawn,
                    health: entry.health,
                    max_health: entry.health,
                },
            );
        }

        Ok(RoundStartInfo {
            wave,
            enemies_count: plan.len() as u32,
            plan,
        })
    }

    pub fn report_enemy_spawned(&mut self, enemy_id: &str, position: Vec3, health: f32) {
        if let Some(record) = self.enemies.get_mut(enemy_id) {
            record.position = position;
            record.health = health.clamp(0.0, record.max_health);
        }
    }

    pub fn report_enemy_update(&mut self, enemy_id: &str, position: Vec3, health: f32) {
        if let Some(record) = self.enemies.get_mut(enemy_id) {
            record.position = position;
            record.health = health.clamp(0.0, record.max_health);
        }
    }

    /// First report wins; duplicates for an already-settled enemy are `None`.
    pub fn report_enemy_died(&mut self, enemy_id: &str) -> Option<EnemyDeathOutcome> {
        self.enemies.remove(enemy_id)?;
        let gold_earned = self.rng.int(ENEMY_GOLD_MIN, ENEMY_GOLD_MAX) as i64;
        self.ledger.add_gold(gold_earned);
        let round_ended = self.finish_enemy();
        Some(EnemyDeathOutcome {
            gold_earned,
            gold: self.ledger.gold(),
            round_ended,
        })
    }

    /// A leak report retires the enemy record, so castle damage is applied at
    /// most once per enemy no matter how many clients report it.
    pub fn report_castle_damaged(
        &mut self,
        enemy_id: &str,
        damage: i32,
    ) -> Option<CastleDamageOutcome> {
        self.enemies.remove(enemy_id)?;
        let health = self.ledger.damage_castle(damage);
        let game_over = if self.ledger.is_castle_destroyed() && self.round.enter_game_over() {
            Some(GameOverReason::CastleDestroyed)
        } else {
            None
        };
        let round_ended = if self.round.is_game_over() {
            None
        } else {
            self.finish_enemy()
        };
        Some(CastleDamageOutcome {
            health,
            game_over,
            round_ended,
        })
    }

    fn finish_enemy(&mut self) -> Option<u32> {
        if self.round.note_enemy_resolved() {
            Some(self.round.complete_round())
        } else {
            None
        }
    }

    /// Server-side grant for player-scope pickups that carry gold; other
    /// pickups are relay-only. Returns the new balance when gold changed.
    pub fn loot_pickup(&mut self, loot_type: &str) -> Option<i64> {
        let def = find_loot(loot_type)?;
        if def.scope != LootScope::Player {
            return None;
        }
        match def.effect {
            LootEffect::GoldBonus(amount) => {
                self.ledger.add_gold(amount);
                Some(self.ledger.gold())
            }
            _ => None,
        }
    }

    pub fn is_game_over(&self) -> bool {
        self.round.is_game_over()
    }

    /// The explicit post-game-over reset: towers, enemies, economy, and the
    /// round machine all return to their session-start values. Connected
    /// players and their colors survive.
    pub fn reset(&mut self) -> Result<StateSnapshot, &'static str> {
        if !self.round.is_game_over() {
            return Err(REASON_GAME_NOT_OVER);
        }
        self.towers.clear();
        self.enemies.clear();
        self.ledger.reset();
        self.round.reset();
        self.tower_seq = 0;
        Ok(self.snapshot())
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            gold: self.ledger.gold(),
            castle_health: self.ledger.castle_health(),
            castle_max_health: self.ledger.castle_max_health(),
            wave: self.round.wave(),
            round_status: self.round.status(),
            towers: self
                .towers
                .keys()
                .map(|tower_id| self.tower_view(tower_id))
                .collect(),
            enemies: self
                .enemies
                .iter()
                .map(|(id, record)| EnemyView {
                    id: id.clone(),
                    position: record.position,
                    health: record.health,
                    max_health: record.max_health,
                })
                .collect(),
        }
    }

    pub fn gold(&self) -> i64 {
        self.ledger.gold()
    }

    pub fn castle_health(&self) -> i32 {
        self.ledger.castle_health()
    }

    pub fn wave(&self) -> u32 {
        self.round.wave()
    }

    pub fn round_status(&self) -> crate::types::RoundStatus {
        self.round.status()
    }

    pub fn live_enemy_count(&self) -> usize {
        self.enemies.len()
    }

    fn tower_view(&self, tower_id: &str) -> TowerView {
        let record = &self.towers[tower_id];
        TowerView {
            id: tower_id.to_string(),
            kind: record.kind,
            position: record.position,
            placed_by: record.placed_by.clone(),
            upgrades: record
                .upgrades
                .iter()
                .map(|upgrade| upgrade.id.clone())
                .collect(),
        }
    }
}
