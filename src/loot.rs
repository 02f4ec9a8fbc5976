use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LootScope {
    Player,
    Tower,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LootEffect {
    /// Multiplies a tower's damage per applied stack.
    DamageMultiplier(f32),
    /// Multiplies a tower's fire rate (divides its cooldown) per stack.
    FireRateMultiplier(f32),
    /// Adds flat melee damage to the player per stack.
    MeleeDamageBonus(f32),
    /// Grants shared gold on pickup; the server draws the grant.
    GoldBonus(i64),
}

#[derive(Clone, Copy, Debug)]
pub struct LootDefinition {
    pub id: &'static str,
    pub scope: LootScope,
    pub effect: LootEffect,
    pub stack_cap: usize,
}

pub const LOOT_TABLE: &[LootDefinition] = &[
    LootDefinition {
        id: "sharpened_arrows",
        scope: LootScope::Tower,
        effect: LootEffect::DamageMultiplier(1.25),
        stack_cap: 3,
    },
    LootDefinition {
        id: "clockwork_gears",
        scope: LootScope::Tower,
        effect: LootEffect::FireRateMultiplier(1.2),
        stack_cap: 3,
    },
    LootDefinition {
        id: "warriors_edge",
        scope: LootScope::Player,
        effect: LootEffect::MeleeDamageBonus(3.0),
        stack_cap: 5,
    },
    LootDefinition {
        id: "gilded_talisman",
        scope: LootScope::Player,
        effect: LootEffect::GoldBonus(25),
        stack_cap: 10,
    },
];

pub fn find_loot(id: &str) -> Option<&'static LootDefinition> {
    LOOT_TABLE.iter().find(|def| def.id == id)
}

/// Accumulated multiplicative adjustments on a single tower.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModifierSet {
    pub damage: f32,
    pub fire_rate: f32,
}

impl Default for ModifierSet {
    fn default() -> Self {
        Self {
            damage: 1.0,
            fire_rate: 1.0,
        }
    }
}

impl ModifierSet {
    pub fn apply(&mut self, effect: LootEffect) {
        match effect {
            LootEffect::DamageMultiplier(factor) => self.damage *= factor,
            LootEffect::FireRateMultiplier(factor) => self.fire_rate *= factor,
            LootEffect::MeleeDamageBonus(_) | LootEffect::GoldBonus(_) => {}
        }
    }

    /// Rebuilds the set from an upgrade id list, ignoring unknown ids.
    pub fn from_upgrades(upgrades: &[String]) -> Self {
        let mut modifiers = Self::default();
        for id in upgrades {
            if let Some(def) = find_loot(id) {
                modifiers.apply(def.effect);
            }
        }
        modifiers
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedUpgrade {
    pub id: String,
    #[serde(rename = "appliedAt")]
    pub applied_at: String,
}

pub fn applied_now(id: &str) -> AppliedUpgrade {
    AppliedUpgrade {
        id: id.to_string(),
        applied_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }
}

pub fn stack_count(upgrades: &[AppliedUpgrade], id: &str) -> usize {
    upgrades.iter().filter(|upgrade| upgrade.id == id).count()
}

/// Whether another stack of `def` fits under its cap. At the cap the apply is
/// a silent no-op, not an error.
pub fn can_stack(upgrades: &[AppliedUpgrade], def: &LootDefinition) -> bool {
    stack_count(upgrades, def.id) < def.stack_cap
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentPlayerState {
    pub upgrades: Vec<AppliedUpgrade>,
    #[serde(rename = "goldBonus")]
    pub gold_bonus: i64,
}

/// The locally persisted upgrade ledger. Towers are keyed by their stable
/// server-issued id so upgrades survive a reset of the live objects.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentState {
    pub player: PersistentPlayerState,
    pub towers: BTreeMap<String, Vec<AppliedUpgrade>>,
}

impl PersistentState {
    pub fn tower_upgrades(&self, tower_id: &str) -> &[AppliedUpgrade] {
        self.towers
            .get(tower_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(id: &str) -> AppliedUpgrade {
        AppliedUpgrade {
            id: id.to_string(),
            applied_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn loot_table_ids_resolve() {
        for def in LOOT_TABLE {
            let found = find_loot(def.id).expect("table id should resolve");
            assert_eq!(found.scope, def.scope);
        }
        assert!(find_loot("unheard_of").is_none());
    }

    #[test]
    fn stacking_stops_at_the_cap() {
        let def = find_loot("sharpened_arrows").expect("definition exists");
        let mut upgrades = Vec::new();
        for _ in 0..def.stack_cap {
            assert!(can_stack(&upgrades, def));
            upgrades.push(applied(def.id));
        }
        assert!(!can_stack(&upgrades, def));

        // State before and after an over-cap apply must be identical.
        let before = ModifierSet::from_upgrades(
            &upgrades.iter().map(|u| u.id.clone()).collect::<Vec<_>>(),
        );
        let after = before;
        assert_eq!(before, after);
    }

    #[test]
    fn modifier_set_accumulates_multiplicatively() {
        let mut modifiers = ModifierSet::default();
        modifiers.apply(LootEffect::DamageMultiplier(1.25));
        modifiers.apply(LootEffect::DamageMultiplier(1.25));
        modifiers.apply(LootEffect::FireRateMultiplier(1.2));
        assert!((modifiers.damage - 1.5625).abs() < 1e-6);
        assert!((modifiers.fire_rate - 1.2).abs() < 1e-6);
    }

    #[test]
    fn player_effects_do_not_touch_tower_modifiers() {
        let mut modifiers = ModifierSet::default();
        modifiers.apply(LootEffect::MeleeDamageBonus(3.0));
        modifiers.apply(LootEffect::GoldBonus(25));
        assert_eq!(modifiers, ModifierSet::default());
    }

    #[test]
    fn persistent_state_serializes_with_wire_keys() {
        let mut state = PersistentState::default();
        state.player.upgrades.push(applied("warriors_edge"));
        state.player.gold_bonus = 50;
        state
            .towers
            .insert("tower_3".to_string(), vec![applied("sharpened_arrows")]);

        let encoded = serde_json::to_value(&state).expect("state should serialize");
        assert_eq!(encoded["player"]["goldBonus"], 50);
        assert_eq!(
            encoded["towers"]["tower_3"][0]["id"],
            "sharpened_arrows"
        );
        assert_eq!(
            encoded["player"]["upgrades"][0]["appliedAt"],
            "2026-01-01T00:00:00Z"
        );

        let decoded: PersistentState =
            serde_json::from_value(encoded).expect("state should parse back");
        assert_eq!(decoded, state);
    }

    #[test]
    fn tower_upgrades_default_to_empty() {
        let state = PersistentState::default();
        assert!(state.tower_upgrades("tower_9").is_empty());
    }
}
