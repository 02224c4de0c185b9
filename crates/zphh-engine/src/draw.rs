use std::io::{BufRead, BufReader};
use std::sync::Mutex;

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use zphh_contracts::stream::{DrawAccumulator, DrawOutcome};

use crate::client::ChatGlmClient;
use crate::gateway::ApiError;
use crate::session::Session;

pub const DRAW_ASSISTANT_ID: &str = "65a232c082ff90a2ad2f15e2";

pub fn draw_payload(prompt: &str, conversation_id: &str) -> Value {
    json!({
        "assistant_id": DRAW_ASSISTANT_ID,
        "conversation_id": conversation_id,
        "meta_data": {
            "cogview": {
                "aspect_ratio": "1:1",
                "style": "none",
                "scene": "none",
            },
            "if_plus_model": false,
            "is_test": false,
            "input_question_type": "xxxx",
            "channel": "",
            "platform": "pc",
        },
        "messages": [{
            "role": "user",
            "content": [{"type": "text", "text": prompt}],
        }],
    })
}

/// Runs one draw turn against the assistant stream.
///
/// Every conversation id seen on the stream is written to `session` as soon
/// as it arrives, so a reset issued mid-stream is overwritten by the
/// provider's latest id.
pub fn run_draw(
    client: &ChatGlmClient,
    session: &Mutex<Session>,
    prompt: &str,
) -> Result<DrawOutcome, ApiError> {
    let conversation_id = session
        .lock()
        .map(|session| session.conversation_id().to_string())
        .unwrap_or_default();
    debug!(conversation_id = %conversation_id, "opening draw stream");
    let response = client.open_draw_stream(draw_payload(prompt, &conversation_id))?;

    let mut reader = BufReader::new(response.into_reader());
    let mut accumulator = DrawAccumulator::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        if let Some(id) = accumulator.push_line(&text) {
            match session.lock() {
                Ok(mut session) => session.set_conversation_id(id),
                Err(_) => warn!("session lock poisoned; dropping conversation id"),
            }
        }
    }

    info!(
        frames = accumulator.frames(),
        text_updates = accumulator.text_updates(),
        malformed = accumulator.malformed_frames(),
        "draw stream finished"
    );
    Ok(accumulator.finish())
}
