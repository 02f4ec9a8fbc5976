use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use castle_siege_rust_server::chat::{ChatLog, ChatOptions};
use castle_siege_rust_server::server_protocol::{parse_client_message, ParsedClientMessage};
use castle_siege_rust_server::state::GameState;
use castle_siege_rust_server::types::{TowerKind, Vec3};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    clients: HashMap<String, ClientContext>,
    game: GameState,
    chat: ChatLog,
}

impl ServerState {
    fn new(seed: u32) -> Self {
        Self {
            clients: HashMap::new(),
            game: GameState::new(seed),
            chat: ChatLog::new(ChatOptions::default()),
        }
    }
}

#[tokio::main]
async fn main() {
    let port = parse_port(std::env::var("PORT").ok().as_deref());
    let seed = parse_seed(std::env::var("GAME_SEED").ok().as_deref())
        .unwrap_or_else(|| now_ms() as u32);

    println!("[server] game seed: {seed}");
    let state = Arc::new(Mutex::new(ServerState::new(seed)));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        println!(
            "[server] static file root: {}",
            static_dir.to_string_lossy()
        );
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        eprintln!("[server] static file root not found. client assets will not be served.");
        app
    };

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind server socket");

    println!("[server] listening on :{port}");
    axum::serve(listener, app)
        .await
        .expect("server runtime failed");
}

fn parse_port(raw: Option<&str>) -> u16 {
    raw.and_then(|value| value.parse::<u16>().ok()).unwrap_or(3000)
}

fn parse_seed(raw: Option<&str>) -> Option<u32> {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
}

fn resolve_static_dir() -> Option<PathBuf> {
    if let Ok(raw) = std::env::var("STATIC_DIR") {
        let path = PathBuf::from(raw);
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }

    let candidates = [PathBuf::from("dist/client"), PathBuf::from("../../dist/client")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let player_id = make_id("player");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut guard = state.lock().await;
        let color = guard.game.add_player(&player_id);
        guard
            .clients
            .insert(player_id.clone(), ClientContext { tx: tx.clone() });

        println!("[server] player connected: {player_id}");
        let init = json!({
            "type": "init",
            "playerId": player_id,
            "color": color,
            "seed": guard.game.seed(),
            "world": guard.game.world_init(),
            "state": guard.game.snapshot(),
            "players": guard.game.players_view(),
            "chatHistory": guard.chat.history(),
        });
        send_to_client(&mut guard, &player_id, &init, QueuePolicy::DisconnectOnFull);
        broadcast_others(
            &mut guard,
            &player_id,
            &json!({
                "type": "playerJoined",
                "playerId": player_id,
                "color": color,
            }),
            QueuePolicy::DisconnectOnFull,
        );
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(state.clone(), &player_id, raw.to_string()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(state.clone(), &player_id, text).await;
                } else {
                    send_error_to_client(&state, &player_id, "invalid utf8 message").await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle_disconnect(state, &player_id).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: SharedState, player_id: &str, raw: String) {
    let Some(message) = parse_client_message(&raw) else {
        send_error_to_client(&state, player_id, "invalid message").await;
        return;
    };

    let mut guard = state.lock().await;
    if !guard.game.has_player(player_id) {
        // State-side disconnect already happened (e.g. queue overflow);
        // close the lingering socket.
        if let Some(client) = guard.clients.get(player_id) {
            let _ = client.tx.try_send(OutboundMessage::Close {
                code: 4000,
                reason: "not joined".to_string(),
            });
        }
        return;
    }

    match message {
        ParsedClientMessage::PlayerMove { position, rotation } => {
            guard.game.update_player_pose(player_id, position, rotation);
            broadcast_others(
                &mut guard,
                player_id,
                &json!({
                    "type": "playerMoved",
                    "playerId": player_id,
                    "position": position,
                    "rotation": rotation,
                }),
                QueuePolicy::DropOnFull,
            );
        }
        ParsedClientMessage::PlaceTower { kind, position } => {
            handle_place_tower(&mut guard, player_id, kind, position);
        }
        ParsedClientMessage::UpgradeTower {
            tower_id,
            upgrade_type,
        } => match guard.game.upgrade_tower(&tower_id, &upgrade_type) {
            Ok(true) => {
                broadcast(
                    &mut guard,
                    &json!({
                        "type": "towerUpgraded",
                        "towerId": tower_id,
                        "upgradeType": upgrade_type,
                    }),
                    QueuePolicy::DisconnectOnFull,
                );
            }
            // At the stacking cap the request is a silent no-op.
            Ok(false) => {}
            Err(reason) => {
                eprintln!(
                    "[server] upgrade rejected for {player_id}: {tower_id}/{upgrade_type}: {reason}"
                );
                send_to_client(
                    &mut guard,
                    player_id,
                    &json!({
                        "type": "error",
                        "message": reason,
                    }),
                    QueuePolicy::DisconnectOnFull,
                );
            }
        },
        ParsedClientMessage::StartRound => match guard.game.start_round() {
            Ok(info) => {
                broadcast(
                    &mut guard,
                    &json!({
                        "type": "roundStarted",
                        "wave": info.wave,
                        "enemiesCount": info.enemies_count,
                        "spawnPlan": info.plan,
                    }),
                    QueuePolicy::DisconnectOnFull,
                );
            }
            Err(reason) => {
                send_to_client(
                    &mut guard,
                    player_id,
                    &json!({
                        "type": "error",
                        "message": reason,
                    }),
                    QueuePolicy::DisconnectOnFull,
                );
            }
        },
        ParsedClientMessage::EnemySpawned {
            enemy_id,
            position,
            health,
        } => {
            guard.game.report_enemy_spawned(&enemy_id, position, health);
            broadcast_others(
                &mut guard,
                player_id,
                &json!({
                    "type": "enemySpawned",
                    "enemyId": enemy_id,
                    "position": position,
                    "health": health,
                }),
                QueuePolicy::DropOnFull,
            );
        }
        ParsedClientMessage::EnemyUpdate {
            enemy_id,
            position,
            health,
        } => {
            guard.game.report_enemy_update(&enemy_id, position, health);
            broadcast_others(
                &mut guard,
                player_id,
                &json!({
                    "type": "enemyUpdate",
                    "enemyId": enemy_id,
                    "position": position,
                    "health": health,
                }),
                QueuePolicy::DropOnFull,
            );
        }
        ParsedClientMessage::EnemyDied { enemy_id } => {
            if let Some(outcome) = guard.game.report_enemy_died(&enemy_id) {
                broadcast(
                    &mut guard,
                    &json!({
                        "type": "enemyDied",
                        "enemyId": enemy_id,
                        "gold": outcome.gold,
                        "goldEarned": outcome.gold_earned,
                    }),
                    QueuePolicy::DisconnectOnFull,
                );
                if let Some(next_wave) = outcome.round_ended {
                    broadcast_round_ended(&mut guard, next_wave);
                }
            }
        }
        ParsedClientMessage::CastleDamaged { enemy_id, damage } => {
            if let Some(outcome) = guard.game.report_castle_damaged(&enemy_id, damage) {
                broadcast(
                    &mut guard,
                    &json!({
                        "type": "castleHealthUpdate",
                        "health": outcome.health,
                    }),
                    QueuePolicy::DisconnectOnFull,
                );
                if let Some(reason) = outcome.game_over {
                    broadcast(
                        &mut guard,
                        &json!({
                            "type": "gameOver",
                            "reason": reason.as_str(),
                        }),
                        QueuePolicy::DisconnectOnFull,
                    );
                } else if let Some(next_wave) = outcome.round_ended {
                    broadcast_round_ended(&mut guard, next_wave);
                }
            }
        }
        ParsedClientMessage::PlayerAttack { target_id, damage } => {
            broadcast_others(
                &mut guard,
                player_id,
                &json!({
                    "type": "playerAttacked",
                    "playerId": player_id,
                    "targetId": target_id,
                    "damage": damage,
                }),
                QueuePolicy::DropOnFull,
            );
        }
        ParsedClientMessage::LootPickup { loot_id, loot_type } => {
            let gold = guard.game.loot_pickup(&loot_type);
            broadcast(
                &mut guard,
                &json!({
                    "type": "lootCollected",
                    "lootId": loot_id,
                    "playerId": player_id,
                    "lootType": loot_type,
                }),
                QueuePolicy::DisconnectOnFull,
            );
            if let Some(gold) = gold {
                broadcast(
                    &mut guard,
                    &json!({
                        "type": "goldUpdate",
                        "gold": gold,
                    }),
                    QueuePolicy::DisconnectOnFull,
                );
            }
        }
        ParsedClientMessage::CameraMode { mode } => {
            broadcast_others(
                &mut guard,
                player_id,
                &json!({
                    "type": "playerCameraMode",
                    "playerId": player_id,
                    "mode": mode,
                }),
                QueuePolicy::DropOnFull,
            );
        }
        ParsedClientMessage::ResetGame => match guard.game.reset() {
            Ok(snapshot) => {
                println!("[server] game reset by {player_id}");
                guard.chat.clear();
                broadcast(
                    &mut guard,
                    &json!({
                        "type": "gameReset",
                        "state": snapshot,
                    }),
                    QueuePolicy::DisconnectOnFull,
                );
            }
            Err(reason) => {
                send_to_client(
                    &mut guard,
                    player_id,
                    &json!({
                        "type": "error",
                        "message": reason,
                    }),
                    QueuePolicy::DisconnectOnFull,
                );
            }
        },
        ParsedClientMessage::ChatMessage { message } => {
            match guard.chat.submit(player_id, &message, now_ms()) {
                Ok(view) => {
                    let mut payload =
                        serde_json::to_value(&view).unwrap_or_else(|_| json!({}));
                    if let Value::Object(object) = &mut payload {
                        object.insert("type".to_string(), Value::String("chatMessage".into()));
                    }
                    broadcast(&mut guard, &payload, QueuePolicy::DisconnectOnFull);
                }
                Err(reason) => {
                    send_to_client(
                        &mut guard,
                        player_id,
                        &json!({
                            "type": "error",
                            "message": reason,
                        }),
                        QueuePolicy::DisconnectOnFull,
                    );
                }
            }
        }
    }
}

fn handle_place_tower(
    state: &mut ServerState,
    player_id: &str,
    kind: TowerKind,
    position: Vec3,
) {
    match state.game.place_tower(kind, position, player_id) {
        Ok((tower, gold)) => {
            broadcast(
                state,
                &json!({
                    "type": "towerPlaced",
                    "tower": tower,
                    "gold": gold,
                }),
                QueuePolicy::DisconnectOnFull,
            );
            broadcast(
                state,
                &json!({
                    "type": "goldUpdate",
                    "gold": gold,
                }),
                QueuePolicy::DisconnectOnFull,
            );
        }
        Err(reason) => {
            send_to_client(
                state,
                player_id,
                &json!({
                    "type": "towerPlaceFailed",
                    "reason": reason,
                }),
                QueuePolicy::DisconnectOnFull,
            );
        }
    }
}

fn broadcast_round_ended(state: &mut ServerState, next_wave: u32) {
    let castle_health = state.game.castle_health();
    broadcast(
        state,
        &json!({
            "type": "roundEnded",
            "wave": next_wave,
            "castleHealth": castle_health,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

async fn handle_disconnect(state: SharedState, player_id: &str) {
    let mut guard = state.lock().await;
    disconnect_client_internal(&mut guard, player_id, true);
}

fn disconnect_client_internal(state: &mut ServerState, player_id: &str, notify_others: bool) {
    if state.clients.remove(player_id).is_none() {
        return;
    }
    state.game.remove_player(player_id);
    state.chat.forget_player(player_id);
    println!("[server] player disconnected: {player_id}");

    if notify_others {
        broadcast(
            state,
            &json!({
                "type": "playerLeft",
                "playerId": player_id,
            }),
            QueuePolicy::DisconnectOnFull,
        );
    }
}

fn send_to_client(state: &mut ServerState, player_id: &str, message: &Value, policy: QueuePolicy) {
    let send_failed = if let Some(client) = state.clients.get(player_id) {
        client
            .tx
            .try_send(OutboundMessage::Text(message.to_string()))
            .is_err()
    } else {
        false
    };
    if send_failed && policy == QueuePolicy::DisconnectOnFull {
        disconnect_client_internal(state, player_id, true);
    }
}

fn broadcast(state: &mut ServerState, message: &Value, policy: QueuePolicy) {
    let payload = message.to_string();
    let player_ids: Vec<String> = state.clients.keys().cloned().collect();
    let mut failed = Vec::new();
    for id in player_ids {
        let Some(client) = state.clients.get(&id) else {
            continue;
        };
        if client
            .tx
            .try_send(OutboundMessage::Text(payload.clone()))
            .is_err()
            && policy == QueuePolicy::DisconnectOnFull
        {
            failed.push(id);
        }
    }
    for id in failed {
        disconnect_client_internal(state, &id, true);
    }
}

fn broadcast_others(
    state: &mut ServerState,
    exclude_player_id: &str,
    message: &Value,
    policy: QueuePolicy,
) {
    let payload = message.to_string();
    let player_ids: Vec<String> = state.clients.keys().cloned().collect();
    let mut failed = Vec::new();
    for id in player_ids {
        if id == exclude_player_id {
            continue;
        }
        let Some(client) = state.clients.get(&id) else {
            continue;
        };
        if client
            .tx
            .try_send(OutboundMessage::Text(payload.clone()))
            .is_err()
            && policy == QueuePolicy::DisconnectOnFull
        {
            failed.push(id);
        }
    }
    for id in failed {
        disconnect_client_internal(state, &id, true);
    }
}

async fn send_error_to_client(state: &SharedState, player_id: &str, message: &str) {
    let mut guard = state.lock().await;
    send_to_client(
        &mut guard,
        player_id,
        &json!({
            "type": "error",
            "message": message,
        }),
        QueuePolicy::DisconnectOnFull,
    );
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
