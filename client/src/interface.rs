//! Hooks into whatever presents the connection to the player.

use log::{info, warn};
use shared::constants::{FAILURE_CODE_CONNECT, FAILURE_CODE_LOST_CONNECTION};
use shared::ShardDirectory;
use std::sync::{Arc, Mutex};

/// Player-facing text for a connection failure.
pub fn failure_message(code: u16, reason: &str) -> String {
    match code {
        FAILURE_CODE_CONNECT => "Could not connect to the game server.".to_string(),
        FAILURE_CODE_LOST_CONNECTION => "The connection to the game server was lost.".to_string(),
        _ => format!(
            "You have been disconnected from the game server (code {}): {}",
            code, reason
        ),
    }
}

pub trait ClientInterface: Send {
    fn show_message(&mut self, title: &str, message: &str);

    fn show_connection_failure(&mut self, code: u16, reason: &str) {
        self.show_message("Connection Failure", &failure_message(code, reason));
    }

    fn shard_list_updated(&mut self, _shards: &ShardDirectory) {}

    fn enter_character_selection(&mut self, _shards: &ShardDirectory) {}
}

/// Writes everything to the log. Used by the headless client.
#[derive(Debug, Default)]
pub struct LogInterface;

impl ClientInterface for LogInterface {
    fn show_message(&mut self, title: &str, message: &str) {
        warn!("{}: {}", title, message);
    }

    fn shard_list_updated(&mut self, shards: &ShardDirectory) {
        for shard in shards.shards() {
            info!(
                "Shard {} ({}): {}",
                shard.name,
                shard.do_id,
                if shard.available { "available" } else { "unavailable" }
            );
        }
    }

    fn enter_character_selection(&mut self, shards: &ShardDirectory) {
        info!(
            "Ready for character selection ({} shards known)",
            shards.len()
        );
    }
}

/// Keeps every message shown; clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct RecordingInterface {
    messages: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingInterface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

impl ClientInterface for RecordingInterface {
    fn show_message(&mut self, title: &str, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((title.to_string(), message.to_string()));
        }
    }
}
