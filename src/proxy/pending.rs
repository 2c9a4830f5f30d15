//! Per-user "pending song" slot
//!
//! Tracks the most recent song seen on a `stream` request whose disposition
//! (played vs skipped) is not yet known. A single-entry slot per user, not a
//! queue: only the most recent stream is ever pending (spec design note
//! "Skip detection").

use std::collections::HashMap;
use std::sync::Mutex;

pub struct PendingSongs {
    slots: Mutex<HashMap<String, String>>,
}

impl PendingSongs {
    pub fn new() -> Self {
        Self { slots: Mutex::new(HashMap::new()) }
    }

    /// Replace the pending song for a user, returning whatever was pending before.
    pub fn swap(&self, user: &str, song_id: &str) -> Option<String> {
        self.slots.lock().unwrap().insert(user.to_string(), song_id.to_string())
    }

    /// Take and clear the pending song for a user, if one matches `song_id`.
    pub fn take_if(&self, user: &str, song_id: &str) -> Option<String> {
        let mut slots = self.slots.lock().unwrap();
        if slots.get(user).map(|s| s.as_str()) == Some(song_id) {
            slots.remove(user)
        } else {
            None
        }
    }

    /// Clear the pending song for a user unconditionally, returning it if present.
    pub fn clear(&self, user: &str) -> Option<String> {
        self.slots.lock().unwrap().remove(user)
    }
}

impl Default for PendingSongs {
    fn default() -> Self {
        Self::new()
    }
}
