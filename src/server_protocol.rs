use serde_json::Value;

use crate::types::{CameraMode, TowerKind, Vec3};

#[derive(Debug)]
pub enum ParsedClientMessage {
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

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "playerMove" => {
            let position = parse_vec3(object.get("position"))?;
            let rotation = parse_vec3(object.get("rotation"))?;
            Some(ParsedClientMessage::PlayerMove { position, rotation })
        }
        "placeTower" => {
            let kind = TowerKind::parse(object.get("towerType")?.as_str()?)?;
            let position = parse_vec3(object.get("position"))?;
            Some(ParsedClientMessage::PlaceTower { kind, position })
        }
        "upgradeTower" => {
            let tower_id = object.get("towerId")?.as_str()?.to_string();
            let upgrade_type = object.get("upgradeType")?.as_str()?.to_string();
            Some(ParsedClientMessage::UpgradeTower {
                tower_id,
                upgrade_type,
            })
        }
        "startRound" => Some(ParsedClientMessage::StartRound),
        "enemySpawned" => {
            let enemy_id = object.get("enemyId")?.as_str()?.to_string();
            let position = parse_vec3(object.get("position"))?;
            let health = parse_finite_f32(object.get("health"))?;
            Some(ParsedClientMessage::EnemySpawned {
                enemy_id,
                position,
                health,
            })
        }
        "enemyUpdate" => {
            let enemy_id = object.get("enemyId")?.as_str()?.to_string();
            let position = parse_vec3(object.get("position"))?;
            let health = parse_finite_f32(object.get("health"))?;
            Some(ParsedClientMessage::EnemyUpdate {
                enemy_id,
                position,
                health,
            })
        }
        "enemyDied" => {
            let enemy_id = object.get("enemyId")?.as_str()?.to_string();
            Some(ParsedClientMessage::EnemyDied { enemy_id })
        }
        "castleDamaged" => {
            let enemy_id = object.get("enemyId")?.as_str()?.to_string();
            let damage = parse_damage(object.get("damage"))?;
            Some(ParsedClientMessage::CastleDamaged { enemy_id, damage })
        }
        "playerAttack" => {
            let target_id = object.get("targetId")?.as_str()?.to_string();
            let damage = parse_finite_f32(object.get("damage"))?;
            Some(ParsedClientMessage::PlayerAttack { target_id, damage })
        }
        "lootPickup" => {
            let loot_id = object.get("lootId")?.as_str()?.to_string();
            let loot_type = object.get("lootType")?.as_str()?.to_string();
            Some(ParsedClientMessage::LootPickup { loot_id, loot_type })
        }
        "cameraMode" => {
            let mode = CameraMode::parse(object.get("mode")?.as_str()?)?;
            Some(ParsedClientMessage::CameraMode { mode })
        }
        "resetGame" => Some(ParsedClientMessage::ResetGame),
        "chatMessage" => {
            let message = object.get("message")?.as_str()?.to_string();
            Some(ParsedClientMessage::ChatMessage { message })
        }
        _ => None,
    }
}

fn parse_vec3(value: Option<&Value>) -> Option<Vec3> {
    let object = value?.as_object()?;
    let x = parse_finite_f32(object.get("x"))?;
    let y = parse_finite_f32(object.get("y"))?;
    let z = parse_finite_f32(object.get("z"))?;
    Some(Vec3 { x, y, z })
}

fn parse_finite_f32(value: Option<&Value>) -> Option<f32> {
    let number = value?.as_f64()?;
    if !number.is_finite() {
        return None;
    }
    Some(number as f32)
}

fn parse_damage(value: Option<&Value>) -> Option<i32> {
    let number = value?.as_f64()?;
    if !number.is_finite() || number < 0.0 {
        return None;
    }
    Some(number.floor().min(i32::MAX as f64) as i32)
}
