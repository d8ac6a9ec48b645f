//! Record id generation.
//!
//! Generic inputs get `input_<16 hex random>_<unix seconds>`. Conversation turns get
//! `<role>_<conversation id>_<unix seconds>_<sequence>`, where the sequence is a
//! process-wide counter so two turns of one role in the same second stay distinct.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

static TURN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn unix_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Id for a generic ingested input.
pub fn input_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("input_{}_{}", &random[..16], unix_seconds())
}

/// Id for a conversation turn, `prefix` being the role (`user` / `assistant`).
pub fn turn_id(prefix: &str, conversation_id: &str) -> String {
    let seq = TURN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{conversation_id}_{}_{seq}", unix_seconds())
}

/// Fresh random conversation id.
pub fn new_conversation_id() -> String {
    Uuid::new_v4().to_string()
}
