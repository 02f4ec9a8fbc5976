use std::collections::BTreeMap;

use crate::constants::{
    get_tower_stats, CASTLE_LEAK_DAMAGE, ENEMY_BASE_SPEED, PLAYER_MAX_HEALTH,
    PLAYER_PICKUP_RANGE, TowerStats,
};
use crate::loot::{
    applied_now, can_stack, find_loot, LootEffect, LootScope, ModifierSet, PersistentState,
};
use crate::round::RoundLifecycle;
use crate::types::{
    CameraMode, EnemyView, GameOverReason, PathCoord, PlayerView, RoundStatus, ServerEvent,
    StateSnapshot, TowerKind, TowerView, Vec3,
};
use crate::world::{clamp_to_bounds, tile_center, world_to_tile, GeneratedWorld};

mod combat;
mod utils;

use self::utils::{distance_2d, lerp_pos};

/// How often locally simulated enemy state is relayed to the server.
const ENEMY_RELAY_TICKS: u64 = 5;

pub const REASON_CAMERA_LOCKED: &str = "Cannot enter build mode during an active round";
pub const REASON_OUTSIDE_ARENA: &str = "Cannot build outside the arena";
pub const REASON_ON_PATH: &str = "Cannot build on the path";

/// The one capability all combat routes through: bounded health with
/// exactly-once death detection and clamped healing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Health {
    current: f32,
    max: f32,
}

impl Health {
    pub fn new(max: f32) -> Self {
        Self { current: max, max }
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn is_dead(&self) -> bool {
        self.current <= 0.0
    }

    /// Returns true exactly when this call brings health from above zero to
    /// zero. Damaging an already-dead target is a no-op.
    pub fn apply_damage(&mut self, amount: f32) -> bool {
        if self.is_dead() {
            return false;
        }
        self.current = (self.current - amount.max(0.0)).max(0.0);
        self.current <= 0.0
    }

    pub fn heal(&mut self, amount: f32) {
        if self.is_dead() {
            return;
        }
        self.current = (self.current + amount.max(0.0)).min(self.max);
    }

    /// Adopts a relayed health value, clamped into the valid range.
    pub fn sync(&mut self, value: f32) {
        self.current = value.clamp(0.0, self.max);
    }
}

#[derive(Clone, Debug)]
struct EnemyInternal {
    id: String,
    position: Vec3,
    health: Health,
    path_index: usize,
    /// Negative while the spawn stagger runs; active in [0, 1).
    progress: f32,
    speed: f32,
    carried_loot: Option<String>,
    death_processed: bool,
    resolved: bool,
    announced: bool,
}

impl EnemyInternal {
    fn is_active(&self) -> bool {
        !self.resolved && !self.health.is_dead() && self.progress >= 0.0
    }

    fn view(&self) -> EnemyView {
        EnemyView {
            id: self.id.clone(),
            position: self.position,
            health: self.health.current(),
            max_health: self.health.max(),
        }
    }
}

#[derive(Clone, Debug)]
struct TowerInternal {
    id: String,
    kind: TowerKind,
    position: Vec3,
    placed_by: String,
    upgrades: Vec<String>,
    stats: TowerStats,
    modifiers: ModifierSet,
    last_attack_ms: u64,
}

impl TowerInternal {
    fn from_view(view: &TowerView) -> Self {
        Self {
            id: view.id.clone(),
            kind: view.kind,
            position: view.position,
            placed_by: view.placed_by.clone(),
            upgrades: view.upgrades.clone(),
            stats: get_tower_stats(view.kind),
            modifiers: ModifierSet::from_upgrades(&view.upgrades),
            last_attack_ms: 0,
        }
    }

    fn effective_damage(&self) -> f32 {
        self.stats.power * self.modifiers.damage
    }

    fn effective_cooldown_ms(&self) -> u64 {
        (self.stats.cooldown_ms as f32 / self.modifiers.fire_rate).round() as u64
    }

    fn can_attack(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_attack_ms) >= self.effective_cooldown_ms()
    }

    fn record_attack(&mut self, now_ms: u64) {
        self.last_attack_ms = now_ms;
    }

    fn view(&self) -> TowerView {
        TowerView {
            id: self.id.clone(),
            kind: self.kind,
            position: self.position,
            placed_by: self.placed_by.clone(),
            upgrades: self.upgrades.clone(),
        }
    }
}

#[derive(Clone, Debug)]
struct RemotePlayer {
    color: u32,
    position: Vec3,
    rotation: Vec3,
}

#[derive(Clone, Debug)]
pub struct LootDrop {
    pub id: String,
    pub loot_type: String,
    pub position: Vec3,
}

/// Outbound messages the engine wants sent to the server. The transport (or
/// the headless simulator) drains these each frame.
#[derive(Clone, Debug)]
pub enum ClientIntent {
    PlayerMove {
        position: Vec3,
        rotation: Vec3,
    },
    PlaceTower {
        kind: TowerKind,
        position: Vec3,
    },
    UpgradeTower {
        tower_id: String,
        upgrade_type: String,
    },
    StartRound,
    EnemySpawned {
        enemy_id: String,
        position: Vec3,
        health: f32,
    },
    EnemyUpdate {
        enemy_id: String,
        position: Vec3,
        health: f32,
    },
    EnemyDied {
        enemy_id: String,
    },
    CastleDamaged {
        enemy_id: String,
        damage: i32,
    },
    PlayerAttack {
        target_id: String,
        damage: f32,
    },
    LootPickup {
        loot_id: String,
        loot_type: String,
    },
    CameraMode {
        mode: CameraMode,
    },
    ResetGame,
    ChatMessage {
        message: String,
    },
}

/// Local notifications for the view layer (toasts, HUD updates).
#[derive(Clone, Debug)]
pub enum EngineEvent {
    PlacementRejected { reason: String },
    LootDropped { loot_id: String, loot_type: String, position: Vec3 },
    LootApplied { loot_type: String, scope: LootScope },
    GoldChanged { gold: i64 },
    CastleChanged { health: i32 },
    RoundStarted { wave: u32, enemy_count: u32 },
    RoundEnded { wave: u32 },
    GameOver { reason: GameOverReason },
    Chat { player_id: String, message: String },
    Toast { message: String },
}

/// Per-client optimistic simulation. Owns the local enemy set, mirrors the
/// server-arbitrated economy, and talks to the server exclusively through
/// drained intents and applied [`ServerEvent`]s.
#[derive(Clone, Debug)]
pub struct ClientEngine {
    player_id: String,
    world: GeneratedWorld,
    started_at_ms: u64,
    elapsed_ms: u64,
    tick_counter: u64,

    player_position: Vec3,
    player_rotation: Vec3,
    player_health: Health,
    melee_bonus: f32,
    last_melee_ms: u64,
    camera_mode: CameraMode,

    remote_players: BTreeMap<String, RemotePlayer>,
    towers: BTreeMap<String, TowerInternal>,
    enemies: Vec<EnemyInternal>,
    loot_drops: Vec<LootDrop>,
    pending_tower_loot: Vec<String>,

    round: RoundLifecycle,
    gold: i64,
    castle_health: i32,
    castle_max_health: i32,
    loot_dropped_this_wave: bool,
    next_loot_seq: u64,
    game_over: bool,

    persistent: PersistentState,
    intents: Vec<ClientIntent>,
    events: Vec<EngineEvent>,
}

impl ClientEngine {
    pub fn new(
        player_id: &str,
        world: GeneratedWorld,
        snapshot: &StateSnapshot,
        players: &[PlayerView],
        started_at_ms: u64,
        persisted: PersistentState,
    ) -> Self {
        let mut round = RoundLifecycle::new();
        match snapshot.round_status {
            RoundStatus::Active | RoundStatus::Ending => {
                round.sync_started(snapshot.wave, snapshot.enemies.len() as u32);
            }
            RoundStatus::Idle => round.sync_ended(snapshot.wave),
            RoundStatus::GameOver => {
                round.sync_ended(snapshot.wave);
                round.enter_game_over();
            }
        }

        let mut engine = Self {
            player_id: player_id.to_string(),
            started_at_ms,
            elapsed_ms: 0,
            tick_counter: 0,
            player_position: Vec3::ZERO,
            player_rotation: Vec3::ZERO,
            player_health: Health::new(PLAYER_MAX_HEALTH),
            melee_bonus: melee_bonus_from(&persisted),
            last_melee_ms: 0,
            camera_mode: CameraMode::Build,
            remote_players: BTreeMap::new(),
            towers: BTreeMap::new(),
            enemies: Vec::new(),
            loot_drops: Vec::new(),
            pending_tower_loot: Vec::new(),
            round,
            gold: snapshot.gold,
            castle_health: snapshot.castle_health,
            castle_max_health: snapshot.castle_max_health,
            loot_dropped_this_wave: false,
            next_loot_seq: 0,
            game_over: snapshot.round_status == RoundStatus::GameOver,
            persistent: persisted,
            intents: Vec::new(),
            events: Vec::new(),
            world,
        };

        for player in players {
            if player.id != engine.player_id {
                engine.remote_players.insert(
                    player.id.clone(),
                    RemotePlayer {
                        color: player.color,
                        position: player.position,
                        rotation: player.rotation,
                    },
                );
            }
        }

        for view in &snapshot.towers {
            engine
                .towers
                .insert(view.id.clone(), TowerInternal::from_view(view));
        }
        engine.request_missing_persisted_upgrades();

        for view in &snapshot.enemies {
            let path_index = engine.nearest_path_index(view.position);
            engine.enemies.push(EnemyInternal {
                id: view.id.clone(),
                position: view.position,
                health: {
                    let mut health = Health::new(view.max_health);
                    health.sync(view.health);
                    health
                },
                path_index,
                progress: 0.0,
                speed: ENEMY_BASE_SPEED,
                carried_loot: None,
                death_processed: false,
                resolved: false,
                announced: true,
            });
        }

        engine
    }

    /// Re-requests persisted tower upgrades the server snapshot does not show
    /// yet; the server stays authoritative for the actual application.
    fn request_missing_persisted_upgrades(&mut self) {
        let mut requests = Vec::new();
        for (tower_id, tower) in &self.towers {
            for upgrade in self.persistent.tower_upgrades(tower_id) {
                let persisted = self
                    .persistent
                    .tower_upgrades(tower_id)
                    .iter()
                    .filter(|u| u.id == upgrade.id)
                    .count();
                let live = tower.upgrades.iter().filter(|id| **id == upgrade.id).count();
                if persisted > live {
                    requests.push((tower_id.clone(), upgrade.id.clone(), persisted - live));
                }
            }
        }
        requests.sort();
        requests.dedup();
        for (tower_id, upgrade_type, missing) in requests {
            for _ in 0..missing {
                self.intents.push(ClientIntent::UpgradeTower {
                    tower_id: tower_id.clone(),
                    upgrade_type: upgrade_type.clone(),
                });
            }
        }
    }

    pub fn step(&mut self, dt_ms: u64) {
        if self.game_over {
            return;
        }
        self.tick_counter += 1;
        self.elapsed_ms = self.elapsed_ms.saturating_add(dt_ms);
        let now_ms = self.started_at_ms.saturating_add(self.elapsed_ms);

        self.update_enemies(dt_ms);
        self.resolve_combat(now_ms);
        self.update_loot_pickup();
        self.enemies.retain(|enemy| !enemy.resolved);

        if self.tick_counter.is_multiple_of(ENEMY_RELAY_TICKS) {
            let updates: Vec<ClientIntent> = self
                .enemies
                .iter()
                .filter(|enemy| enemy.is_active())
                .map(|enemy| ClientIntent::EnemyUpdate {
                    enemy_id: enemy.id.clone(),
                    position: enemy.position,
                    health: enemy.health.current(),
                })
                .collect();
            self.intents.extend(updates);
        }
    }

    fn update_enemies(&mut self, dt_ms: u64) {
        let dt_sec = dt_ms as f32 / 1000.0;
        let path = self.world.path.clone();
        let size = self.world.size;
        let last_segment = path.len() - 1;

        for idx in 0..self.enemies.len() {
            if self.enemies[idx].resolved || self.enemies[idx].health.is_dead() {
                continue;
            }
            self.enemies[idx].progress += self.enemies[idx].speed * dt_sec;
            if self.enemies[idx].progress < 0.0 {
                continue;
            }

            if !self.enemies[idx].announced {
                self.enemies[idx].announced = true;
                self.intents.push(ClientIntent::EnemySpawned {
                    enemy_id: self.enemies[idx].id.clone(),
                    position: self.enemies[idx].position,
                    health: self.enemies[idx].health.current(),
                });
            }

            // Progress resets to zero when the segment index advances.
            if self.enemies[idx].progress >= 1.0 {
                self.enemies[idx].progress = 0.0;
                self.enemies[idx].path_index += 1;
                if self.enemies[idx].path_index >= last_segment {
                    self.leak_enemy(idx);
                    continue;
                }
            }

            let segment = self.enemies[idx].path_index;
            let start = tile_center(size, path[segment]);
            let end = tile_center(size, path[segment + 1]);
            let mut position =
                lerp_pos(start, end, self.enemies[idx].progress.clamp(0.0, 1.0));
            position.y = 0.5;
            self.enemies[idx].position = position;
        }
    }

    fn leak_enemy(&mut self, idx: usize) {
        self.enemies[idx].resolved = true;
        self.intents.push(ClientIntent::CastleDamaged {
            enemy_id: self.enemies[idx].id.clone(),
            damage: CASTLE_LEAK_DAMAGE,
        });
        self.round.note_enemy_resolved();
    }

    fn update_loot_pickup(&mut self) {
        let player_position = self.player_position;
        let mut picked = Vec::new();
        self.loot_drops.retain(|drop| {
            if distance_2d(drop.position, player_position) <= PLAYER_PICKUP_RANGE {
                picked.push(drop.clone());
                false
            } else {
                true
            }
        });
        for drop in picked {
            self.collect_loot(drop);
        }
    }

    fn collect_loot(&mut self, drop: LootDrop) {
        self.intents.push(ClientIntent::LootPickup {
            loot_id: drop.id.clone(),
            loot_type: drop.loot_type.clone(),
        });
        let Some(def) = find_loot(&drop.loot_type) else {
            return;
        };
        match def.scope {
            LootScope::Player => {
                if !can_stack(&self.persistent.player.upgrades, def) {
                    return;
                }
                self.persistent.player.upgrades.push(applied_now(def.id));
                match def.effect {
                    LootEffect::MeleeDamageBonus(amount) => self.melee_bonus += amount,
                    LootEffect::GoldBonus(amount) => {
                        self.persistent.player.gold_bonus += amount;
                    }
                    _ => {}
                }
                self.events.push(EngineEvent::LootApplied {
                    loot_type: def.id.to_string(),
                    scope: LootScope::Player,
                });
            }
            LootScope::Tower => {
                self.pending_tower_loot.push(def.id.to_string());
            }
        }
    }

    /// Assigns the oldest pending tower-scope loot to `tower_id`. The upgrade
    /// only takes effect when the server echoes `towerUpgraded`.
    pub fn apply_tower_loot(&mut self, tower_id: &str) -> bool {
        if self.pending_tower_loot.is_empty() {
            return false;
        }
        let Some(tower) = self.towers.get(tower_id) else {
            return false;
        };
        let upgrade_type = self.pending_tower_loot.remove(0);
        let fits_cap = find_loot(&upgrade_type)
            .map(|def| {
                tower.upgrades.iter().filter(|id| **id == def.id).count() < def.stack_cap
            })
            .unwrap_or(false);
        if !fits_cap {
            return false;
        }
        self.intents.push(ClientIntent::UpgradeTower {
            tower_id: tower_id.to_string(),
            upgrade_type,
        });
        true
    }

    pub fn request_place_tower(&mut self, kind: TowerKind, position: Vec3) {
        let Some((tile_x, tile_y)) = world_to_tile(self.world.size, position.x, position.z)
        else {
            self.events.push(EngineEvent::PlacementRejected {
                reason: REASON_OUTSIDE_ARENA.to_string(),
            });
            return;
        };
        if self.world.is_path_cell(tile_x, tile_y) {
            self.events.push(EngineEvent::PlacementRejected {
                reason: REASON_ON_PATH.to_string(),
            });
            return;
        }
        self.intents.push(ClientIntent::PlaceTower { kind, position });
    }

    pub fn request_start_round(&mut self) {
        if self.game_over {
            return;
        }
        if self.round.status() == RoundStatus::Active {
            self.events.push(EngineEvent::Toast {
                message: crate::round::REASON_ROUND_ACTIVE.to_string(),
            });
            return;
        }
        self.intents.push(ClientIntent::StartRound);
    }

    pub fn request_camera_mode(&mut self, mode: CameraMode) -> Result<(), &'static str> {
        if mode == CameraMode::Build && !self.round.can_enter_build_mode() {
            return Err(REASON_CAMERA_LOCKED);
        }
        if self.camera_mode != mode {
            self.camera_mode = mode;
            self.intents.push(ClientIntent::CameraMode { mode });
        }
        Ok(())
    }

    pub fn request_reset(&mut self) {
        if self.game_over {
            self.intents.push(ClientIntent::ResetGame);
        }
    }

    pub fn set_player_pose(&mut self, position: Vec3, rotation: Vec3) {
        self.player_position = clamp_to_bounds(self.world.size, position);
        self.player_rotation = rotation;
        self.intents.push(ClientIntent::PlayerMove {
            position: self.player_position,
            rotation: self.player_rotation,
        });
    }

    pub fn send_chat(&mut self, message: &str) {
        if !message.trim().is_empty() {
            self.intents.push(ClientIntent::ChatMessage {
                message: message.to_string(),
            });
        }
    }

    pub fn apply_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::PlayerJoined { player_id, color } => {
                if player_id != self.player_id {
                    self.remote_players.insert(
                        player_id,
                        RemotePlayer {
                            color,
                            position: Vec3::ZERO,
                            rotation: Vec3::ZERO,
                        },
                    );
                }
            }
            ServerEvent::PlayerLeft { player_id } => {
                self.remote_players.remove(&player_id);
            }
            ServerEvent::PlayerMoved {
                player_id,
                position,
                rotation,
            } => {
                if let Some(remote) = self.remote_players.get_mut(&player_id) {
                    remote.position = position;
                    remote.rotation = rotation;
                }
            }
            ServerEvent::TowerPlaced { tower, gold } => {
                self.towers
                    .insert(tower.id.clone(), TowerInternal::from_view(&tower));
                self.gold = gold;
                self.events.push(EngineEvent::GoldChanged { gold });
            }
            ServerEvent::TowerPlaceFailed { reason } => {
                self.events.push(EngineEvent::PlacementRejected { reason });
            }
            ServerEvent::TowerUpgraded {
                tower_id,
                upgrade_type,
            } => self.apply_tower_upgrade(&tower_id, &upgrade_type),
            ServerEvent::GoldUpdate { gold } => {
                self.gold = gold;
                self.events.push(EngineEvent::GoldChanged { gold });
            }
            ServerEvent::RoundStarted { wave, plan } => {
                self.round.sync_started(wave, plan.len() as u32);
                self.loot_dropped_this_wave = false;
                self.enemies.clear();
                let entrance = self.world.entrance();
                let mut spawn = tile_center(self.world.size, entrance);
                spawn.y = 0.5;
                for entry in &plan {
                    let progress =
                        -(entry.spawn_delay_ms as f32 / 1000.0) * ENEMY_BASE_SPEED;
                    self.enemies.push(EnemyInternal {
                        id: entry.enemy_id.clone(),
                        position: spawn,
                        health: Health::new(entry.health),
                        path_index: 0,
                        progress,
                        speed: ENEMY_BASE_SPEED,
                        carried_loot: entry.loot.clone(),
                        death_processed: false,
                        resolved: false,
                        announced: false,
                    });
                }
                self.events.push(EngineEvent::RoundStarted {
                    wave,
                    enemy_count: plan.len() as u32,
                });
            }
            ServerEvent::RoundEnded {
                wave,
                castle_health,
            } => {
                self.round.sync_ended(wave);
                self.enemies.clear();
                self.castle_health = castle_health;
                self.events.push(EngineEvent::RoundEnded { wave });
            }
            ServerEvent::EnemyUpdate {
                enemy_id,
                position,
                health,
            } => {
                if let Some(enemy) = self
                    .enemies
                    .iter_mut()
                    .find(|enemy| enemy.id == enemy_id && !enemy.resolved)
                {
                    enemy.position = position;
                    enemy.health.sync(health);
                }
            }
            ServerEvent::EnemyDied {
                enemy_id,
                gold,
                gold_earned: _,
            } => {
                self.settle_enemy_death(&enemy_id);
                self.gold = gold;
                self.events.push(EngineEvent::GoldChanged { gold });
            }
            ServerEvent::CastleHealthUpdate { health } => {
                self.castle_health = health;
                self.events.push(EngineEvent::CastleChanged { health });
            }
            ServerEvent::PlayerAttacked {
                player_id: _,
                target_id,
                damage,
            } => {
                self.damage_enemy_by_id(&target_id, damage);
            }
            ServerEvent::LootCollected {
                loot_id,
                player_id,
                loot_type: _,
            } => {
                if player_id != self.player_id {
                    self.loot_drops.retain(|drop| drop.id != loot_id);
                }
            }
            ServerEvent::PlayerCameraMode { .. } => {}
            ServerEvent::GameOver { reason } => {
                self.game_over = true;
                self.round.enter_game_over();
                self.events.push(EngineEvent::GameOver { reason });
            }
            ServerEvent::GameReset { snapshot } => self.apply_reset(&snapshot),
            ServerEvent::ChatMessage {
                player_id,
                message,
                timestamp_ms: _,
            } => {
                self.events.push(EngineEvent::Chat { player_id, message });
            }
        }
    }

    fn apply_tower_upgrade(&mut self, tower_id: &str, upgrade_type: &str) {
        let Some(def) = find_loot(upgrade_type) else {
            return;
        };
        let Some(tower) = self.towers.get_mut(tower_id) else {
            return;
        };
        let stacks = tower.upgrades.iter().filter(|id| **id == def.id).count();
        if stacks >= def.stack_cap {
            return;
        }
        tower.upgrades.push(def.id.to_string());
        tower.modifiers.apply(def.effect);
        self.persistent
            .towers
            .entry(tower_id.to_string())
            .or_default()
            .push(applied_now(def.id));
        self.events.push(EngineEvent::LootApplied {
            loot_type: def.id.to_string(),
            scope: LootScope::Tower,
        });
    }

    /// Authoritative death settlement; also runs for remotely killed enemies
    /// so the loot drop appears on every client.
    fn settle_enemy_death(&mut self, enemy_id: &str) {
        let Some(idx) = self
            .enemies
            .iter()
            .position(|enemy| enemy.id == enemy_id)
        else {
            return;
        };
        if !self.enemies[idx].death_processed {
            self.enemies[idx].death_processed = true;
            self.spawn_loot_drop_if_carrier(idx);
            self.round.note_enemy_resolved();
        }
        self.enemies[idx].resolved = true;
    }

    fn apply_reset(&mut self, snapshot: &StateSnapshot) {
        self.towers.clear();
        for view in &snapshot.towers {
            self.towers
                .insert(view.id.clone(), TowerInternal::from_view(view));
        }
        self.enemies.clear();
        self.loot_drops.clear();
        self.pending_tower_loot.clear();
        self.gold = snapshot.gold;
        self.castle_health = snapshot.castle_health;
        self.castle_max_health = snapshot.castle_max_health;
        self.round.reset();
        self.loot_dropped_this_wave = false;
        self.game_over = false;
        self.player_health = Health::new(PLAYER_MAX_HEALTH);
        self.melee_bonus = 0.0;
        self.persistent = PersistentState::default();
        self.events.push(EngineEvent::Toast {
            message: "game reset".to_string(),
        });
    }

    fn nearest_path_index(&self, position: Vec3) -> usize {
        let mut best_index = 0;
        let mut best_distance = f32::MAX;
        for (index, coord) in self.world.path.iter().enumerate() {
            let center = tile_center(self.world.size, *coord);
            let distance = distance_2d(center, position);
            if distance < best_distance {
                best_distance = distance;
                best_index = index;
            }
        }
        best_index.min(self.world.path.len().saturating_sub(2))
    }

    pub fn drain_intents(&mut self) -> Vec<ClientIntent> {
        std::mem::take(&mut self.intents)
    }

    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn build_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            gold: self.gold,
            castle_health: self.castle_health,
            castle_max_health: self.castle_max_health,
            wave: self.round.wave(),
            round_status: self.round.status(),
            towers: self.towers.values().map(TowerInternal::view).collect(),
            enemies: self
                .enemies
                .iter()
                .filter(|enemy| enemy.is_active())
                .map(EnemyInternal::view)
                .collect(),
        }
    }

    pub fn gold(&self) -> i64 {
        self.gold
    }

    pub fn castle_health(&self) -> i32 {
        self.castle_health
    }

    pub fn wave(&self) -> u32 {
        self.round.wave()
    }

    pub fn round_status(&self) -> RoundStatus {
        self.round.status()
    }

    pub fn active_enemy_count(&self) -> usize {
        self.enemies.iter().filter(|enemy| enemy.is_active()).count()
    }

    pub fn pending_enemy_count(&self) -> usize {
        self.enemies.iter().filter(|enemy| !enemy.resolved).count()
    }

    pub fn loot_drops(&self) -> &[LootDrop] {
        &self.loot_drops
    }

    pub fn pending_tower_loot(&self) -> &[String] {
        &self.pending_tower_loot
    }

    pub fn tower_ids(&self) -> Vec<String> {
        self.towers.keys().cloned().collect()
    }

    pub fn player_position(&self) -> Vec3 {
        self.player_position
    }

    pub fn player_health(&self) -> &Health {
        &self.player_health
    }

    pub fn melee_damage(&self) -> f32 {
        crate::constants::PLAYER_MELEE_DAMAGE + self.melee_bonus
    }

    pub fn camera_mode(&self) -> CameraMode {
        self.camera_mode
    }

    pub fn remote_player_count(&self) -> usize {
        self.remote_players.len()
    }

    pub fn persistent_state(&self) -> &PersistentState {
        &self.persistent
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    /// Entrance tile center; where staggered enemies wait to become active.
    pub fn spawn_position(&self) -> Vec3 {
        let mut position = tile_center(self.world.size, self.world.entrance());
        position.y = 0.5;
        position
    }

    pub fn path_tile(&self, index: usize) -> Option<PathCoord> {
        self.world.path.get(index).copied()
    }
}

fn melee_bonus_from(persisted: &PersistentState) -> f32 {
    let mut bonus = 0.0;
    for upgrade in &persisted.player.upgrades {
        if let Some(def) = find_loot(&upgrade.id) {
            if let LootEffect::MeleeDamageBonus(amount) = def.effect {
                bonus += amount;
            }
        }
    }
    bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{
        CASTLE_MAX_HEALTH, PLAYER_MELEE_DAMAGE, STARTING_GOLD, TICK_MS,
    };
    use crate::loot::{AppliedUpgrade, PersistentPlayerState};
    use crate::types::SpawnPlanEntry;
    use crate::world::generate_world;

    fn empty_snapshot() -> StateSnapshot {
        StateSnapshot {
            gold: STARTING_GOLD,
            castle_health: CASTLE_MAX_HEALTH,
            castle_max_health: CASTLE_MAX_HEALTH,
            wave: 1,
            round_status: RoundStatus::Idle,
            towers: Vec::new(),
            enemies: Vec::new(),
        }
    }

    fn make_engine(size: i32) -> ClientEngine {
        ClientEngine::new(
            "player_1",
            generate_world(size, 4242),
            &empty_snapshot(),
            &[],
            0,
            PersistentState::default(),
        )
    }

    fn make_enemy(id: &str, position: Vec3, health: f32) -> EnemyInternal {
        EnemyInternal {
            id: id.to_string(),
            position,
            health: Health::new(health),
            path_index: 0,
            progress: 0.0,
            speed: ENEMY_BASE_SPEED,
            carried_loot: None,
            death_processed: false,
            resolved: false,
            announced: true,
        }
    }

    fn make_archer(id: &str, position: Vec3) -> TowerInternal {
        TowerInternal {
            id: id.to_string(),
            kind: TowerKind::Archer,
            position,
            placed_by: "player_1".to_string(),
            upgrades: Vec::new(),
            stats: get_tower_stats(TowerKind::Archer),
            modifiers: ModifierSet::default(),
            last_attack_ms: 0,
        }
    }

    fn plan_entry(id: &str, delay_ms: u64, loot: Option<&str>) -> SpawnPlanEntry {
        SpawnPlanEntry {
            enemy_id: id.to_string(),
            spawn_delay_ms: delay_ms,
            health: 10.0,
            loot: loot.map(str::to_string),
        }
    }

    #[test]
    fn staggered_enemy_stays_invisible_until_progress_reaches_zero() {
        let mut engine = make_engine(50);
        let delay_ms = (1000.0 / ENEMY_BASE_SPEED) as u64;
        engine.apply_server_event(ServerEvent::RoundStarted {
            wave: 1,
            plan: vec![plan_entry("enemy_1_0", delay_ms, None)],
        });
        assert!((engine.enemies[0].progress + 1.0).abs() < 0.01);

        let mut elapsed = 0;
        while elapsed + TICK_MS < delay_ms {
            engine.step(TICK_MS);
            elapsed += TICK_MS;
            assert_eq!(engine.build_snapshot().enemies.len(), 0);
            assert!(!engine
                .drain_intents()
                .iter()
                .any(|i| matches!(i, ClientIntent::EnemySpawned { .. })));
        }

        engine.step(TICK_MS * 2);
        assert_eq!(engine.build_snapshot().enemies.len(), 1);
        assert!(engine
            .drain_intents()
            .iter()
            .any(|i| matches!(i, ClientIntent::EnemySpawned { .. })));
    }

    #[test]
    fn archer_hits_only_the_nearest_enemy() {
        let mut engine = make_engine(50);
        let origin = Vec3::new(0.0, 0.0, 0.0);
        engine
            .towers
            .insert("tower_1".to_string(), make_archer("tower_1", origin));
        engine
            .enemies
            .push(make_enemy("near", Vec3::new(5.0, 0.5, 0.0), 10.0));
        engine
            .enemies
            .push(make_enemy("mid", Vec3::new(0.0, 0.5, 12.0), 10.0));
        engine
            .enemies
            .push(make_enemy("far", Vec3::new(25.0, 0.5, 0.0), 10.0));

        engine.resolve_combat(1_000);

        assert_eq!(engine.enemies[0].health.current(), 3.0);
        assert_eq!(engine.enemies[1].health.current(), 10.0);
        assert_eq!(engine.enemies[2].health.current(), 10.0);
    }

    #[test]
    fn no_attacker_fires_twice_within_its_cooldown_window() {
        let mut engine = make_engine(50);
        let origin = Vec3::new(0.0, 0.0, 0.0);
        engine
            .towers
            .insert("tower_1".to_string(), make_archer("tower_1", origin));
        engine
            .enemies
            .push(make_enemy("tank", Vec3::new(5.0, 0.5, 0.0), 1_000.0));

        let cooldown = engine.towers["tower_1"].effective_cooldown_ms();
        let mut last_hit_at: Option<u64> = None;
        let mut previous_health = engine.enemies[0].health.current();
        let mut now = 1_000;
        while now <= 6_000 {
            engine.resolve_combat(now);
            let health = engine.enemies[0].health.current();
            if health < previous_health {
                if let Some(last) = last_hit_at {
                    assert!(
                        now - last >= cooldown,
                        "two hits {}ms apart, cooldown {}ms",
                        now - last,
                        cooldown
                    );
                }
                last_hit_at = Some(now);
                previous_health = health;
            }
            now += TICK_MS;
        }
        assert!(last_hit_at.is_some());
    }

    #[test]
    fn a_miss_does_not_consume_the_cooldown() {
        let mut engine = make_engine(50);
        let origin = Vec3::new(0.0, 0.0, 0.0);
        engine
            .towers
            .insert("tower_1".to_string(), make_archer("tower_1", origin));

        // Empty range: nothing happens and the attack clock stays put.
        engine.resolve_combat(5_000);
        assert_eq!(engine.towers["tower_1"].last_attack_ms, 0);

        // A target appearing right after is hit immediately.
        engine
            .enemies
            .push(make_enemy("late", Vec3::new(5.0, 0.5, 0.0), 10.0));
        engine.resolve_combat(5_050);
        assert_eq!(engine.enemies[0].health.current(), 3.0);
        assert_eq!(engine.towers["tower_1"].last_attack_ms, 5_050);
    }

    #[test]
    fn healer_heals_the_player_and_clamps_at_max() {
        let mut engine = make_engine(50);
        let healer = TowerInternal {
            id: "tower_1".to_string(),
            kind: TowerKind::Healer,
            position: Vec3::ZERO,
            placed_by: "player_1".to_string(),
            upgrades: Vec::new(),
            stats: get_tower_stats(TowerKind::Healer),
            modifiers: ModifierSet::default(),
            last_attack_ms: 0,
        };
        engine.towers.insert("tower_1".to_string(), healer);
        engine.player_position = Vec3::ZERO;
        engine.player_health.apply_damage(8.0);

        engine.resolve_combat(2_000);
        assert_eq!(engine.player_health.current(), PLAYER_MAX_HEALTH - 3.0);
        // Within the cooldown the healer stays quiet.
        engine.resolve_combat(2_050);
        assert_eq!(engine.player_health.current(), PLAYER_MAX_HEALTH - 3.0);
        // The next pulse clamps at max health.
        engine.resolve_combat(4_000);
        assert_eq!(engine.player_health.current(), PLAYER_MAX_HEALTH);
    }

    #[test]
    fn melee_strikes_the_nearest_enemy_in_radius() {
        let mut engine = make_engine(50);
        engine.player_position = Vec3::ZERO;
        engine
            .enemies
            .push(make_enemy("close", Vec3::new(1.0, 0.5, 0.0), 20.0));
        engine
            .enemies
            .push(make_enemy("outside", Vec3::new(10.0, 0.5, 0.0), 20.0));

        engine.resolve_combat(1_000);
        assert_eq!(
            engine.enemies[0].health.current(),
            20.0 - PLAYER_MELEE_DAMAGE
        );
        assert_eq!(engine.enemies[1].health.current(), 20.0);
        assert!(engine
            .drain_intents()
            .iter()
            .any(|i| matches!(i, ClientIntent::PlayerAttack { .. })));
    }

    #[test]
    fn leaked_enemy_reports_castle_damage_once() {
        let mut engine = make_engine(10);
        engine.apply_server_event(ServerEvent::RoundStarted {
            wave: 1,
            plan: vec![plan_entry("enemy_1_0", 0, None)],
        });
        // Keep the player out of the fight.
        engine.player_position = Vec3::new(-5.0, 0.0, -5.0);

        let mut leak_reports = 0;
        for _ in 0..1_200 {
            engine.step(TICK_MS);
            for intent in engine.drain_intents() {
                if let ClientIntent::CastleDamaged { damage, .. } = intent {
                    assert_eq!(damage, CASTLE_LEAK_DAMAGE);
                    leak_reports += 1;
                }
            }
            if engine.pending_enemy_count() == 0 {
                break;
            }
        }
        assert_eq!(leak_reports, 1);
        assert_eq!(engine.pending_enemy_count(), 0);
    }

    #[test]
    fn at_most_one_loot_drop_per_wave() {
        let mut engine = make_engine(50);
        engine.apply_server_event(ServerEvent::RoundStarted {
            wave: 1,
            plan: vec![
                plan_entry("enemy_1_0", 0, Some("sharpened_arrows")),
                plan_entry("enemy_1_1", 0, Some("sharpened_arrows")),
            ],
        });
        engine.enemies[0].progress = 0.0;
        engine.enemies[1].progress = 0.0;
        engine.damage_enemy(0, 999.0);
        engine.damage_enemy(1, 999.0);

        let drops = engine
            .drain_events()
            .iter()
            .filter(|e| matches!(e, EngineEvent::LootDropped { .. }))
            .count();
        assert_eq!(drops, 1);

        // The guard resets with the next wave.
        engine.apply_server_event(ServerEvent::RoundEnded {
            wave: 2,
            castle_health: CASTLE_MAX_HEALTH,
        });
        engine.apply_server_event(ServerEvent::RoundStarted {
            wave: 2,
            plan: vec![plan_entry("enemy_2_0", 0, Some("warriors_edge"))],
        });
        engine.damage_enemy(0, 999.0);
        let drops = engine
            .drain_events()
            .iter()
            .filter(|e| matches!(e, EngineEvent::LootDropped { .. }))
            .count();
        assert_eq!(drops, 1);
    }

    #[test]
    fn remote_kill_still_drops_loot_locally() {
        let mut engine = make_engine(50);
        engine.apply_server_event(ServerEvent::RoundStarted {
            wave: 1,
            plan: vec![plan_entry("enemy_1_0", 0, Some("clockwork_gears"))],
        });
        engine.apply_server_event(ServerEvent::EnemyDied {
            enemy_id: "enemy_1_0".to_string(),
            gold: 110,
            gold_earned: 10,
        });
        assert_eq!(engine.gold(), 110);
        assert_eq!(engine.loot_drops().len(), 1);
        // No local kill report for a death the server already settled.
        assert!(!engine
            .drain_intents()
            .iter()
            .any(|i| matches!(i, ClientIntent::EnemyDied { .. })));
    }

    #[test]
    fn pickup_applies_player_loot_and_persists_it() {
        let mut engine = make_engine(50);
        engine.player_position = Vec3::ZERO;
        engine.loot_drops.push(LootDrop {
            id: "loot_1_1".to_string(),
            loot_type: "warriors_edge".to_string(),
            position: Vec3::ZERO,
        });
        engine.update_loot_pickup();

        assert!(engine.loot_drops().is_empty());
        assert_eq!(engine.melee_damage(), PLAYER_MELEE_DAMAGE + 3.0);
        assert_eq!(engine.persistent_state().player.upgrades.len(), 1);
        assert!(engine
            .drain_intents()
            .iter()
            .any(|i| matches!(i, ClientIntent::LootPickup { .. })));
    }

    #[test]
    fn player_loot_stops_stacking_at_the_cap() {
        let mut engine = make_engine(50);
        let cap = find_loot("warriors_edge").expect("definition exists").stack_cap;
        for n in 0..cap + 2 {
            engine.loot_drops.push(LootDrop {
                id: format!("loot_1_{n}"),
                loot_type: "warriors_edge".to_string(),
                position: Vec3::ZERO,
            });
            engine.update_loot_pickup();
        }
        assert_eq!(engine.persistent_state().player.upgrades.len(), cap);
        assert_eq!(
            engine.melee_damage(),
            PLAYER_MELEE_DAMAGE + 3.0 * cap as f32
        );
    }

    #[test]
    fn tower_upgrade_caps_are_idempotent() {
        let mut engine = make_engine(50);
        engine
            .towers
            .insert("tower_1".to_string(), make_archer("tower_1", Vec3::ZERO));
        let cap = find_loot("sharpened_arrows")
            .expect("definition exists")
            .stack_cap;
        for _ in 0..cap + 3 {
            engine.apply_server_event(ServerEvent::TowerUpgraded {
                tower_id: "tower_1".to_string(),
                upgrade_type: "sharpened_arrows".to_string(),
            });
        }
        let tower = &engine.towers["tower_1"];
        assert_eq!(tower.upgrades.len(), cap);
        let expected = 1.25f32.powi(cap as i32);
        assert!((tower.modifiers.damage - expected).abs() < 1e-5);
        assert_eq!(
            engine.persistent_state().tower_upgrades("tower_1").len(),
            cap
        );
    }

    #[test]
    fn persisted_upgrades_are_rerequested_on_join() {
        let applied = AppliedUpgrade {
            id: "sharpened_arrows".to_string(),
            applied_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let mut persisted = PersistentState {
            player: PersistentPlayerState::default(),
            towers: Default::default(),
        };
        persisted
            .towers
            .insert("tower_1".to_string(), vec![applied.clone(), applied]);

        let mut snapshot = empty_snapshot();
        snapshot.towers.push(TowerView {
            id: "tower_1".to_string(),
            kind: TowerKind::Archer,
            position: Vec3::ZERO,
            placed_by: "player_1".to_string(),
            upgrades: Vec::new(),
        });

        let mut engine = ClientEngine::new(
            "player_1",
            generate_world(50, 4242),
            &snapshot,
            &[],
            0,
            persisted,
        );
        let requests = engine
            .drain_intents()
            .iter()
            .filter(|i| matches!(i, ClientIntent::UpgradeTower { .. }))
            .count();
        assert_eq!(requests, 2);
    }

    #[test]
    fn build_camera_is_locked_while_the_round_runs() {
        let mut engine = make_engine(50);
        engine
            .request_camera_mode(CameraMode::Combat)
            .expect("combat camera is always allowed");
        engine.apply_server_event(ServerEvent::RoundStarted {
            wave: 1,
            plan: vec![plan_entry("enemy_1_0", 0, None)],
        });
        assert_eq!(
            engine.request_camera_mode(CameraMode::Build),
            Err(REASON_CAMERA_LOCKED)
        );
        engine.apply_server_event(ServerEvent::RoundEnded {
            wave: 2,
            castle_health: CASTLE_MAX_HEALTH,
        });
        assert!(engine.request_camera_mode(CameraMode::Build).is_ok());
    }

    #[test]
    fn placement_prechecks_reject_path_and_out_of_bounds() {
        let mut engine = make_engine(50);
        let entrance = engine.world.entrance();
        let on_path = tile_center(engine.world.size, entrance);
        engine.request_place_tower(TowerKind::Archer, on_path);
        engine.request_place_tower(TowerKind::Archer, Vec3::new(500.0, 0.0, 0.0));

        let events = engine.drain_events();
        let reasons: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::PlacementRejected { reason } => Some(reason.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(reasons, vec![REASON_ON_PATH, REASON_OUTSIDE_ARENA]);
        assert!(engine.drain_intents().is_empty());
    }

    #[test]
    fn game_over_freezes_the_simulation_until_reset() {
        let mut engine = make_engine(50);
        engine.apply_server_event(ServerEvent::GameOver {
            reason: GameOverReason::CastleDestroyed,
        });
        assert!(engine.is_game_over());
        engine.request_start_round();
        assert!(engine.drain_intents().is_empty());
        engine.step(TICK_MS);
        assert_eq!(engine.tick_counter, 0);

        engine.request_reset();
        assert!(matches!(
            engine.drain_intents().as_slice(),
            [ClientIntent::ResetGame]
        ));
        engine.apply_server_event(ServerEvent::GameReset {
            snapshot: empty_snapshot(),
        });
        assert!(!engine.is_game_over());
        assert_eq!(engine.wave(), 1);
        assert_eq!(engine.gold(), STARTING_GOLD);
        assert!(engine.persistent_state().player.upgrades.is_empty());
    }
}
