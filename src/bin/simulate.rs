use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use castle_siege_rust_server::constants::{
    CASTLE_MAX_HEALTH, PLAYER_MOVE_SPEED, TICK_MS,
};
use castle_siege_rust_server::engine::{ClientEngine, ClientIntent, EngineEvent};
use castle_siege_rust_server::loot::PersistentState;
use castle_siege_rust_server::persist::UpgradeStore;
use castle_siege_rust_server::state::GameState;
use castle_siege_rust_server::types::{
    PathCoord, RoundStatus, ServerEvent, TowerKind, Vec3,
};
use castle_siege_rust_server::world::{tile_center, GeneratedWorld};
use clap::Parser;
use serde::Serialize;
use serde_json::{json, Value};

/// Headless full-pipeline run: one authoritative state and one client engine
/// wired back to back, playing waves with a simple build strategy.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long)]
    single: bool,
    #[arg(long)]
    waves: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    match_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
    #[arg(long)]
    upgrades_file: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
struct Scenario {
    name: String,
    #[serde(rename = "wavesTarget")]
    waves_target: u32,
    seed: u32,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioResultLine {
    scenario: String,
    seed: u32,
    #[serde(rename = "wavesTarget")]
    waves_target: u32,
    #[serde(rename = "wavesCompleted")]
    waves_completed: u32,
    reason: String,
    #[serde(rename = "durationMs")]
    duration_ms: u64,
    #[serde(rename = "towersPlaced")]
    towers_placed: u32,
    #[serde(rename = "enemiesKilled")]
    enemies_killed: u32,
    #[serde(rename = "enemiesLeaked")]
    enemies_leaked: u32,
    #[serde(rename = "goldEarned")]
    gold_earned: i64,
    #[serde(rename = "lootDrops")]
    loot_drops: u32,
    #[serde(rename = "lootPickups")]
    loot_pickups: u32,
    #[serde(rename = "placementRejections")]
    placement_rejections: u32,
    #[serde(rename = "finalCastleHealth")]
    final_castle_health: i32,
    #[serde(rename = "finalGold")]
    final_gold: i64,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
struct AnomalyRecord {
    tick: u64,
    message: String,
}

#[derive(Clone, Debug, Serialize)]
struct ScenarioRunResult {
    #[serde(flatten)]
    result: ScenarioResultLine,
    #[serde(rename = "anomalyRecords")]
    anomaly_records: Vec<AnomalyRecord>,
    finished_tick: u64,
}

#[derive(Clone, Debug, Serialize)]
struct RunSummary {
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(rename = "startedAtMs")]
    started_at_ms: u64,
    #[serde(rename = "finishedAtMs")]
    finished_at_ms: u64,
    #[serde(rename = "scenarioCount")]
    scenario_count: usize,
    #[serde(rename = "anomalyCount")]
    anomaly_count: usize,
    #[serde(rename = "averageDurationMs")]
    average_duration_ms: u64,
    #[serde(rename = "reasonCounts")]
    reason_counts: BTreeMap<String, usize>,
    scenarios: Vec<ScenarioResultLine>,
}

#[derive(Clone, Debug, Serialize)]
struct StructuredLogLine {
    #[serde(rename = "timestampMs")]
    timestamp_ms: u64,
    level: String,
    event: String,
    #[serde(rename = "matchId")]
    match_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
    details: Value,
}

#[derive(Default)]
struct RunStats {
    towers_placed: u32,
    enemies_killed: u32,
    enemies_leaked: u32,
    gold_earned: i64,
    loot_drops: u32,
    loot_pickups: u32,
    placement_rejections: u32,
}

const SIM_PLAYER_ID: &str = "sim_1";
const WAVE_TICK_SAFETY: u64 = 20 * 60 * 5;
const LOOT_WALK_TICKS: u64 = 20 * 30;
const BUILD_KIND_ROTATION: [TowerKind; 4] = [
    TowerKind::Archer,
    TowerKind::Archer,
    TowerKind::Mage,
    TowerKind::Healer,
];

fn main() {
    let cli = Cli::parse();
    let scenarios = resolve_scenarios(&cli);
    let run_started_at_ms = now_ms();
    let seed_hint = scenarios.first().map(|scenario| scenario.seed).unwrap_or(0);
    let match_id = cli
        .match_id
        .clone()
        .unwrap_or_else(|| default_match_id(seed_hint, run_started_at_ms));

    let mut has_anomaly = false;
    let mut scenario_results = Vec::new();
    let mut reason_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_duration_ms = 0u64;
    let mut total_anomalies = 0usize;

    for scenario in scenarios {
        emit_log(
            "info",
            "scenario_started",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            None,
            json!({
                "wavesTarget": scenario.waves_target,
            }),
        );
        let scenario_run = run_scenario(&scenario, cli.upgrades_file.as_deref());

        for anomaly in &scenario_run.anomaly_records {
            emit_log(
                "warn",
                "anomaly_detected",
                &match_id,
                Some(&scenario.name),
                Some(scenario.seed),
                Some(anomaly.tick),
                json!({
                    "message": anomaly.message,
                }),
            );
        }

        if !scenario_run.result.anomalies.is_empty() {
            has_anomaly = true;
        }
        total_anomalies += scenario_run.anomaly_records.len();
        total_duration_ms += scenario_run.result.duration_ms;
        *reason_counts
            .entry(scenario_run.result.reason.clone())
            .or_insert(0) += 1;

        emit_log(
            "info",
            "scenario_finished",
            &match_id,
            Some(&scenario.name),
            Some(scenario.seed),
            Some(scenario_run.finished_tick),
            json!({
                "reason": scenario_run.result.reason,
                "wavesCompleted": scenario_run.result.waves_completed,
                "durationMs": scenario_run.result.duration_ms,
                "anomalyCount": scenario_run.anomaly_records.len(),
            }),
        );

        println!(
            "{}",
            serde_json::to_string(&scenario_run.result).expect("scenario result should serialize")
        );
        scenario_results.push(scenario_run.result);
    }

    let run_finished_at_ms = now_ms();
    let summary = build_run_summary(
        match_id.clone(),
        run_started_at_ms,
        run_finished_at_ms,
        scenario_results,
        reason_counts,
        total_anomalies,
        total_duration_ms,
    );

    let mut summary_out_written: Option<String> = None;
    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(error) = write_summary(path, &summary) {
            emit_log(
                "error",
                "summary_write_failed",
                &match_id,
                None,
                None,
                None,
                json!({
                    "path": path.to_string_lossy(),
                    "error": error.to_string(),
                }),
            );
            std::process::exit(2);
        }
        summary_out_written = Some(path.to_string_lossy().to_string());
    }

    emit_log(
        "info",
        "run_finished",
        &match_id,
        None,
        None,
        None,
        json!({
            "scenarioCount": summary.scenario_count,
            "anomalyCount": summary.anomaly_count,
            "averageDurationMs": summary.average_duration_ms,
            "reasonCounts": summary.reason_counts,
            "summaryOut": summary_out_written,
        }),
    );

    if has_anomaly {
        std::process::exit(1);
    }
}

fn run_scenario(scenario: &Scenario, upgrades_file: Option<&Path>) -> ScenarioRunResult {
    let mut state = GameState::new(scenario.seed);
    state.add_player(SIM_PLAYER_ID);

    let mut store = upgrades_file.map(|path| UpgradeStore::new(path.to_path_buf()));
    let persisted = store
        .as_ref()
        .map(|store| store.state().clone())
        .unwrap_or_else(PersistentState::default);

    let mut engine = ClientEngine::new(
        SIM_PLAYER_ID,
        state.world().clone(),
        &state.snapshot(),
        &state.players_view(),
        0,
        persisted,
    );

    let build_spots = compute_build_spots(state.world());
    let mut spot_cursor = 0usize;
    let mut stats = RunStats::default();
    let mut anomalies = Vec::new();
    let mut anomaly_records = Vec::new();
    let mut anomaly_seen = HashSet::new();
    let mut sim_time_ms = 0u64;
    let mut tick = 0u64;
    let mut waves_completed = 0u32;
    let mut reason = "completed".to_string();

    pump(&mut state, &mut engine, &mut stats);

    'waves: while waves_completed < scenario.waves_target {
        place_towers(
            &mut state,
            &mut engine,
            &mut stats,
            &build_spots,
            &mut spot_cursor,
        );

        engine.request_start_round();
        pump(&mut state, &mut engine, &mut stats);
        if engine.round_status() != RoundStatus::Active {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                tick,
                "round failed to start".to_string(),
            );
            break;
        }

        let mut wave_ticks = 0u64;
        while engine.round_status() == RoundStatus::Active {
            engine.step(TICK_MS);
            steer_player(&mut engine);
            pump(&mut state, &mut engine, &mut stats);
            sim_time_ms += TICK_MS;
            tick += 1;
            wave_ticks += 1;

            for message in collect_consistency_anomalies(&state, &engine) {
                push_anomaly(
                    &mut anomalies,
                    &mut anomaly_records,
                    &mut anomaly_seen,
                    tick,
                    message,
                );
            }

            if engine.is_game_over() {
                reason = "castle destroyed".to_string();
                break 'waves;
            }
            if wave_ticks > WAVE_TICK_SAFETY {
                push_anomaly(
                    &mut anomalies,
                    &mut anomaly_records,
                    &mut anomaly_seen,
                    tick,
                    "wave tick safety limit exceeded".to_string(),
                );
                reason = "stalled".to_string();
                break 'waves;
            }
        }
        waves_completed += 1;

        // Build-phase cleanup: walk to leftover drops, then assign banked
        // tower loot to the oldest tower.
        let mut walk_ticks = 0u64;
        while !engine.loot_drops().is_empty() && walk_ticks < LOOT_WALK_TICKS {
            engine.step(TICK_MS);
            steer_player(&mut engine);
            pump(&mut state, &mut engine, &mut stats);
            sim_time_ms += TICK_MS;
            tick += 1;
            walk_ticks += 1;
        }
        let tower_ids = engine.tower_ids();
        if let Some(target) = tower_ids.first() {
            while !engine.pending_tower_loot().is_empty() {
                let _ = engine.apply_tower_loot(target);
                pump(&mut state, &mut engine, &mut stats);
            }
        }
    }

    if let Some(store) = store.as_mut() {
        store.replace(engine.persistent_state().clone());
        if let Err(error) = store.save() {
            push_anomaly(
                &mut anomalies,
                &mut anomaly_records,
                &mut anomaly_seen,
                tick,
                format!("upgrade store save failed: {error}"),
            );
        }
    }

    ScenarioRunResult {
        result: ScenarioResultLine {
            scenario: scenario.name.clone(),
            seed: scenario.seed,
            waves_target: scenario.waves_target,
            waves_completed,
            reason,
            duration_ms: sim_time_ms,
            towers_placed: stats.towers_placed,
            enemies_killed: stats.enemies_killed,
            enemies_leaked: stats.enemies_leaked,
            gold_earned: stats.gold_earned,
            loot_drops: stats.loot_drops,
            loot_pickups: stats.loot_pickups,
            placement_rejections: stats.placement_rejections,
            final_castle_health: state.castle_health(),
            final_gold: state.gold(),
            anomalies,
        },
        anomaly_records,
        finished_tick: tick,
    }
}

/// Relays engine intents into the authoritative state and feeds the resulting
/// deltas straight back, standing in for the socket layer.
fn pump(state: &mut GameState, engine: &mut ClientEngine, stats: &mut RunStats) {
    for intent in engine.drain_intents() {
        match intent {
            ClientIntent::PlayerMove { position, rotation } => {
                state.update_player_pose(SIM_PLAYER_ID, position, rotation);
            }
            ClientIntent::PlaceTower { kind, position } => {
                match state.place_tower(kind, position, SIM_PLAYER_ID) {
                    Ok((tower, gold)) => {
                        engine.apply_server_event(ServerEvent::TowerPlaced { tower, gold });
                    }
                    Err(reason) => {
                        engine.apply_server_event(ServerEvent::TowerPlaceFailed {
                            reason: reason.to_string(),
                        });
                    }
                }
            }
            ClientIntent::UpgradeTower {
                tower_id,
                upgrade_type,
            } => {
                if let Ok(true) = state.upgrade_tower(&tower_id, &upgrade_type) {
                    engine.apply_server_event(ServerEvent::TowerUpgraded {
                        tower_id,
                        upgrade_type,
                    });
                }
            }
            ClientIntent::StartRound => {
                if let Ok(info) = state.start_round() {
                    engine.apply_server_event(ServerEvent::RoundStarted {
                        wave: info.wave,
                        plan: info.plan,
                    });
                }
            }
            ClientIntent::EnemySpawned {
                enemy_id,
                position,
                health,
            } => {
                state.report_enemy_spawned(&enemy_id, position, health);
            }
            ClientIntent::EnemyUpdate {
                enemy_id,
                position,
                health,
            } => {
                state.report_enemy_update(&enemy_id, position, health);
            }
            ClientIntent::EnemyDied { enemy_id } => {
                if let Some(outcome) = state.report_enemy_died(&enemy_id) {
                    stats.enemies_killed += 1;
                    stats.gold_earned += outcome.gold_earned;
                    engine.apply_server_event(ServerEvent::EnemyDied {
                        enemy_id,
                        gold: outcome.gold,
                        gold_earned: outcome.gold_earned,
                    });
                    if let Some(next_wave) = outcome.round_ended {
                        engine.apply_server_event(ServerEvent::RoundEnded {
                            wave: next_wave,
                            castle_health: state.castle_health(),
                        });
                    }
                }
            }
            ClientIntent::CastleDamaged { enemy_id, damage } => {
                if let Some(outcome) = state.report_castle_damaged(&enemy_id, damage) {
                    stats.enemies_leaked += 1;
                    engine.apply_server_event(ServerEvent::CastleHealthUpdate {
                        health: outcome.health,
                    });
                    if let Some(game_over_reason) = outcome.game_over {
                        engine.apply_server_event(ServerEvent::GameOver {
                            reason: game_over_reason,
                        });
                    } else if let Some(next_wave) = outcome.round_ended {
                        engine.apply_server_event(ServerEvent::RoundEnded {
                            wave: next_wave,
                            castle_health: state.castle_health(),
                        });
                    }
                }
            }
            ClientIntent::LootPickup { loot_id, loot_type } => {
                stats.loot_pickups += 1;
                let gold = state.loot_pickup(&loot_type);
                engine.apply_server_event(ServerEvent::LootCollected {
                    loot_id,
                    player_id: SIM_PLAYER_ID.to_string(),
                    loot_type,
                });
                if let Some(gold) = gold {
                    engine.apply_server_event(ServerEvent::GoldUpdate { gold });
                }
            }
            ClientIntent::ResetGame => {
                if let Ok(snapshot) = state.reset() {
                    engine.apply_server_event(ServerEvent::GameReset { snapshot });
                }
            }
            // Relay-only traffic with no second client to receive it.
            ClientIntent::PlayerAttack { .. }
            | ClientIntent::CameraMode { .. }
            | ClientIntent::ChatMessage { .. } => {}
        }
    }

    for event in engine.drain_events() {
        match event {
            EngineEvent::LootDropped { .. } => stats.loot_drops += 1,
            EngineEvent::PlacementRejected { .. } => stats.placement_rejections += 1,
            _ => {}
        }
    }
}

fn place_towers(
    state: &mut GameState,
    engine: &mut ClientEngine,
    stats: &mut RunStats,
    build_spots: &[Vec3],
    spot_cursor: &mut usize,
) {
    while *spot_cursor < build_spots.len() {
        let kind = BUILD_KIND_ROTATION[stats.towers_placed as usize % BUILD_KIND_ROTATION.len()];
        let cost = castle_siege_rust_server::constants::get_tower_stats(kind).cost;
        if engine.gold() < cost {
            break;
        }
        let before = engine.tower_ids().len();
        engine.request_place_tower(kind, build_spots[*spot_cursor]);
        pump(state, engine, stats);
        *spot_cursor += 1;
        if engine.tower_ids().len() > before {
            stats.towers_placed += 1;
        }
    }
}

/// Buildable cells adjacent to the path, walking from the entrance toward the
/// exit, spaced out so the tower spacing rule does not trip.
fn compute_build_spots(world: &GeneratedWorld) -> Vec<Vec3> {
    let mut spots = Vec::new();
    let mut seen = HashSet::new();
    for (index, coord) in world.path.iter().enumerate() {
        if index % 3 != 0 {
            continue;
        }
        for (dx, dy) in [(2, 0), (-2, 0), (0, 2), (0, -2)] {
            let x = coord.x + dx;
            let y = coord.y + dy;
            if !world.in_bounds(x, y) || world.is_path_cell(x, y) {
                continue;
            }
            if !seen.insert((x, y)) {
                continue;
            }
            let near_existing = spots.iter().any(|spot: &Vec3| {
                let center = tile_center(world.size, PathCoord { x, y });
                let dx = spot.x - center.x;
                let dz = spot.z - center.z;
                (dx * dx + dz * dz).sqrt() < 3.0
            });
            if near_existing {
                continue;
            }
            spots.push(tile_center(world.size, PathCoord { x, y }));
        }
    }
    spots
}

fn steer_player(engine: &mut ClientEngine) {
    let current = engine.player_position();
    let target = engine
        .loot_drops()
        .first()
        .map(|drop| drop.position)
        .unwrap_or(Vec3::new(0.5, 0.0, 0.5));
    let dx = target.x - current.x;
    let dz = target.z - current.z;
    let distance = (dx * dx + dz * dz).sqrt();
    if distance < 0.05 {
        return;
    }
    let step = PLAYER_MOVE_SPEED.min(distance);
    engine.set_player_pose(
        Vec3::new(
            current.x + dx / distance * step,
            current.y,
            current.z + dz / distance * step,
        ),
        Vec3::ZERO,
    );
}

fn collect_consistency_anomalies(state: &GameState, engine: &ClientEngine) -> Vec<String> {
    let mut out = Vec::new();
    if engine.gold() != state.gold() {
        out.push(format!(
            "gold divergence: client {} vs server {}",
            engine.gold(),
            state.gold()
        ));
    }
    if engine.castle_health() != state.castle_health() {
        out.push(format!(
            "castle divergence: client {} vs server {}",
            engine.castle_health(),
            state.castle_health()
        ));
    }
    if state.castle_health() < 0 || state.castle_health() > CASTLE_MAX_HEALTH {
        out.push(format!("castle health out of range: {}", state.castle_health()));
    }
    if state.gold() < 0 {
        out.push(format!("negative gold: {}", state.gold()));
    }
    for enemy in engine.build_snapshot().enemies {
        if enemy.health < 0.0 || enemy.health > enemy.max_health {
            out.push(format!(
                "enemy health out of range: {} {}/{}",
                enemy.id, enemy.health, enemy.max_health
            ));
        }
    }
    out
}

fn resolve_scenarios(cli: &Cli) -> Vec<Scenario> {
    let seed = normalize_seed(cli.seed.unwrap_or_else(now_ms));
    if cli.single || cli.waves.is_some() {
        let waves = cli.waves.unwrap_or(3).clamp(1, 50);
        return vec![Scenario {
            name: format!("custom-w{waves}"),
            waves_target: waves,
            seed,
        }];
    }

    vec![
        Scenario {
            name: "quick-defence-w3".to_string(),
            waves_target: 3,
            seed,
        },
        Scenario {
            name: "long-defence-w6".to_string(),
            waves_target: 6,
            seed: normalize_seed(seed as u64 + 1),
        },
    ]
}

fn normalize_seed(seed: u64) -> u32 {
    seed as u32
}

fn push_anomaly(
    anomalies: &mut Vec<String>,
    anomaly_records: &mut Vec<AnomalyRecord>,
    anomaly_seen: &mut HashSet<String>,
    tick: u64,
    message: String,
) {
    anomaly_records.push(AnomalyRecord {
        tick,
        message: message.clone(),
    });
    if anomaly_seen.insert(message.clone()) {
        anomalies.push(message);
    }
}

fn default_match_id(seed: u32, timestamp_ms: u64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    match_id: String,
    started_at_ms: u64,
    finished_at_ms: u64,
    scenarios: Vec<ScenarioResultLine>,
    reason_counts: BTreeMap<String, usize>,
    anomaly_count: usize,
    total_duration_ms: u64,
) -> RunSummary {
    let scenario_count = scenarios.len();
    let average_duration_ms = if scenario_count == 0 {
        0
    } else {
        total_duration_ms / scenario_count as u64
    };
    RunSummary {
        match_id,
        started_at_ms,
        finished_at_ms,
        scenario_count,
        anomaly_count,
        average_duration_ms,
        reason_counts,
        scenarios,
    }
}

fn emit_log(
    level: &str,
    event: &str,
    match_id: &str,
    scenario: Option<&str>,
    seed: Option<u32>,
    tick: Option<u64>,
    details: Value,
) {
    let log_line = StructuredLogLine {
        timestamp_ms: now_ms(),
        level: level.to_string(),
        event: event.to_string(),
        match_id: match_id.to_string(),
        scenario: scenario.map(|value| value.to_string()),
        seed,
        tick,
        details,
    };
    eprintln!(
        "{}",
        serde_json::to_string(&log_line).expect("structured log should serialize")
    );
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let summary_text = serde_json::to_string_pretty(summary).expect("run summary should serialize");
    std::fs::write(path, summary_text)
}
