use std::collections::HashMap;

use serde::Serialize;

#[derive(Clone, Copy, Debug)]
pub struct ChatOptions {
    pub max_message_len: usize,
    pub rate_window_ms: u64,
    pub max_per_window: usize,
    pub history_cap: usize,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_message_len: 200,
            rate_window_ms: 4_000,
            max_per_window: 5,
            history_cap: 50,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatMessageView {
    #[serde(rename = "playerId")]
    pub player_id: String,
    pub message: String,
    pub timestamp: u64,
}

/// Relay bookkeeping for free-text chat: sanitizes, rate-limits per player,
/// and keeps a bounded history for late joiners.
pub struct ChatLog {
    options: ChatOptions,
    history: Vec<ChatMessageView>,
    sends_by_player: HashMap<String, Vec<u64>>,
}

impl ChatLog {
    pub fn new(options: ChatOptions) -> Self {
        Self {
            options,
            history: Vec::new(),
            sends_by_player: HashMap::new(),
        }
    }

    pub fn submit(
        &mut self,
        player_id: &str,
        raw: &str,
        now_ms: u64,
    ) -> Result<ChatMessageView, &'static str> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("empty message");
        }

        let window_start = now_ms.saturating_sub(self.options.rate_window_ms);
        let sends = self.sends_by_player.entry(player_id.to_string()).or_default();
        sends.retain(|&at| at >= window_start);
        if sends.len() >= self.options.max_per_window {
            return Err("too many messages");
        }
        sends.push(now_ms);

        let message: String = trimmed.chars().take(self.options.max_message_len).collect();
        let view = ChatMessageView {
            player_id: player_id.to_string(),
            message,
            timestamp: now_ms,
        };
        self.history.push(view.clone());
        if self.history.len() > self.options.history_cap {
            let overflow = self.history.len() - self.options.history_cap;
            self.history.drain(..overflow);
        }
        Ok(view)
    }

    pub fn history(&self) -> &[ChatMessageView] {
        &self.history
    }

    pub fn forget_player(&mut self, player_id: &str) {
        self.sends_by_player.remove(player_id);
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.sends_by_player.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_trimmed_and_truncated() {
        let mut log = ChatLog::new(ChatOptions {
            max_message_len: 8,
            ..ChatOptions::default()
        });
        let view = log
            .submit("player_1", "  hello towers  ", 1_000)
            .expect("message should pass");
        assert_eq!(view.message, "hello to");
        assert_eq!(view.timestamp, 1_000);
    }

    #[test]
    fn empty_messages_are_rejected() {
        let mut log = ChatLog::new(ChatOptions::default());
        assert_eq!(log.submit("player_1", "   ", 0).unwrap_err(), "empty message");
        assert!(log.history().is_empty());
    }

    #[test]
    fn rate_limit_applies_per_player_within_the_window() {
        let options = ChatOptions {
            rate_window_ms: 1_000,
            max_per_window: 2,
            ..ChatOptions::default()
        };
        let mut log = ChatLog::new(options);
        assert!(log.submit("player_1", "one", 0).is_ok());
        assert!(log.submit("player_1", "two", 100).is_ok());
        assert_eq!(
            log.submit("player_1", "three", 200).unwrap_err(),
            "too many messages"
        );
        // Another player is unaffected.
        assert!(log.submit("player_2", "hi", 200).is_ok());
        // The window slides.
        assert!(log.submit("player_1", "later", 1_200).is_ok());
    }

    #[test]
    fn history_is_bounded() {
        let mut log = ChatLog::new(ChatOptions {
            history_cap: 3,
            max_per_window: 100,
            ..ChatOptions::default()
        });
        for n in 0..6 {
            log.submit("player_1", &format!("m{n}"), n).expect("ok");
        }
        let messages: Vec<&str> = log.history().iter().map(|m| m.message.as_str()).collect();
        assert_eq!(messages, vec!["m3", "m4", "m5"]);
    }
}
