use super::*;
use crate::constants::{PLAYER_MELEE_COOLDOWN_MS, PLAYER_MELEE_DAMAGE, PLAYER_MELEE_RANGE};

impl ClientEngine {
    /// One combat pass: every ready attacker resolves against candidates in
    /// range. A miss (nothing in range) does not consume the cooldown; the
    /// attack clock only advances on a resolved hit.
    pub(super) fn resolve_combat(&mut self, now_ms: u64) {
        let tower_ids: Vec<String> = self.towers.keys().cloned().collect();
        for tower_id in tower_ids {
            self.resolve_tower_attack(&tower_id, now_ms);
        }
        self.resolve_player_melee(now_ms);
    }

    /// Single dispatch point for all tower kinds.
    fn resolve_tower_attack(&mut self, tower_id: &str, now_ms: u64) {
        let Some(tower) = self.towers.get(tower_id) else {
            return;
        };
        if !tower.can_attack(now_ms) {
            return;
        }
        let kind = tower.kind;
        let position = tower.position;
        let range = tower.stats.range;
        let power = tower.effective_damage();

        match kind {
            TowerKind::Healer => {
                if self.player_health.is_dead()
                    || distance_2d(position, self.player_position) > range
                {
                    return;
                }
                self.player_health.heal(power);
            }
            TowerKind::Mage | TowerKind::Archer => {
                let Some(target_idx) = self.nearest_enemy_within(position, range) else {
                    return;
                };
                self.damage_enemy(target_idx, power);
            }
        }
        if let Some(tower) = self.towers.get_mut(tower_id) {
            tower.record_attack(now_ms);
        }
    }

    fn resolve_player_melee(&mut self, now_ms: u64) {
        if self.player_health.is_dead()
            || now_ms.saturating_sub(self.last_melee_ms) < PLAYER_MELEE_COOLDOWN_MS
        {
            return;
        }
        let Some(target_idx) =
            self.nearest_enemy_within(self.player_position, PLAYER_MELEE_RANGE)
        else {
            return;
        };
        let damage = PLAYER_MELEE_DAMAGE + self.melee_bonus;
        let target_id = self.enemies[target_idx].id.clone();
        self.damage_enemy(target_idx, damage);
        self.intents.push(ClientIntent::PlayerAttack { target_id, damage });
        self.last_melee_ms = now_ms;
    }

    /// Nearest living, active enemy by ground distance; ties break to the
    /// first one found in iteration order.
    fn nearest_enemy_within(&self, origin: Vec3, range: f32) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, enemy) in self.enemies.iter().enumerate() {
            if !enemy.is_active() {
                continue;
            }
            let distance = distance_2d(origin, enemy.position);
            if distance > range {
                continue;
            }
            if best.map(|(_, closest)| distance < closest).unwrap_or(true) {
                best = Some((idx, distance));
            }
        }
        best.map(|(idx, _)| idx)
    }

    pub(super) fn damage_enemy(&mut self, idx: usize, amount: f32) {
        if self.enemies[idx].resolved {
            return;
        }
        if self.enemies[idx].health.apply_damage(amount) {
            self.process_enemy_death(idx);
        }
    }

    pub(super) fn damage_enemy_by_id(&mut self, enemy_id: &str, amount: f32) {
        if let Some(idx) = self
            .enemies
            .iter()
            .position(|enemy| enemy.id == enemy_id)
        {
            self.damage_enemy(idx, amount);
        }
    }

    /// Death side effects run at most once per enemy: the kill report to the
    /// server and, for a carrier, the one loot drop this wave allows.
    fn process_enemy_death(&mut self, idx: usize) {
        if self.enemies[idx].death_processed {
            return;
        }
        self.enemies[idx].death_processed = true;
        self.enemies[idx].resolved = true;
        self.intents.push(ClientIntent::EnemyDied {
            enemy_id: self.enemies[idx].id.clone(),
        });
        self.spawn_loot_drop_if_carrier(idx);
        self.round.note_enemy_resolved();
    }

    pub(super) fn spawn_loot_drop_if_carrier(&mut self, idx: usize) {
        let Some(loot_type) = self.enemies[idx].carried_loot.clone() else {
            return;
        };
        if self.loot_dropped_this_wave {
            return;
        }
        self.loot_dropped_this_wave = true;
        self.next_loot_seq += 1;
        let drop = LootDrop {
            id: format!("loot_{}_{}", self.round.wave(), self.next_loot_seq),
            loot_type: loot_type.clone(),
            position: self.enemies[idx].position,
        };
        self.events.push(EngineEvent::LootDropped {
            loot_id: drop.id.clone(),
            loot_type,
            position: drop.position,
        });
        self.loot_drops.push(drop);
    }
}
