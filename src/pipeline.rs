// Copyright 2021 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-event decryption pipeline and the batch entry points that apply it
//! to sync and messages response bodies.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    error::EncryptionError,
    events::{EncryptedEvent, ENCRYPTED_EVENT_TYPE, MESSAGE_EVENT_TYPE},
    handler::CryptoHandler,
};

fn is_encrypted(event: &Value) -> bool {
    event.get("type").and_then(Value::as_str) == Some(ENCRYPTED_EVENT_TYPE)
}

/// Try to decrypt a single raw event.
///
/// # Arguments
///
/// * `event` - The raw event that should be decrypted.
///
/// * `room_id` - A fallback room id, used only if the event itself doesn't
///     carry one.
///
/// Returns the rewritten plaintext event if decryption succeeded, `None` if
/// the event should be passed on unmodified. Unsupported encryption schemes
/// and per-event decryption failures are tolerated, they are logged and never
/// abort the enclosing batch.
pub async fn decrypt_event(
    handler: &dyn CryptoHandler,
    event: &Value,
    room_id: Option<&str>,
) -> Option<Value> {
    let encrypted = match EncryptedEvent::parse(event, room_id) {
        Ok(e) => e,
        Err(e) => {
            warn!("Received an encrypted event that can't be handled: {}", e);
            return None;
        }
    };

    let decrypted = match handler.decrypt(&encrypted).await {
        Ok(d) => d,
        Err(e) => {
            warn!(
                "Error decrypting an event of sender {}: {}",
                encrypted.sender, e
            );
            return None;
        }
    };

    debug!("Successfully decrypted an event of sender {}", encrypted.sender);

    let verified = decrypted.verified;

    let mut rewritten = event.clone();
    let object = rewritten.as_object_mut()?;

    object.insert("type".to_owned(), json!(MESSAGE_EVENT_TYPE));
    object.insert("content".to_owned(), decrypted.into_content());
    object.insert("decrypted".to_owned(), json!(true));
    object.insert("verified".to_owned(), json!(verified));

    Some(rewritten)
}

/// Go through a sync response body and decrypt all megolm encrypted events.
///
/// Only events of joined, encrypted rooms are touched. Rooms the crypto
/// handler doesn't know about are skipped. Events are replaced in place when
/// decryption succeeds and stay byte-for-byte unchanged otherwise, they are
/// never dropped or reordered.
///
/// Returns the body with the decrypted events.
pub async fn decrypt_sync_body(handler: &dyn CryptoHandler, mut body: Value) -> Value {
    debug!("Decrypting sync");

    let joined_rooms = match body
        .pointer_mut("/rooms/join")
        .and_then(Value::as_object_mut)
    {
        Some(r) => r,
        None => return body,
    };

    for (room_id, room) in joined_rooms.iter_mut() {
        let room_info = match handler.get_room(room_id) {
            Some(r) => r,
            None => {
                info!("Unknown room {}, skipping", room_id);
                continue;
            }
        };

        if !room_info.encrypted {
            info!("Room {} is not encrypted, skipping", room_info.name());
            continue;
        }

        let events = match room
            .pointer_mut("/timeline/events")
            .and_then(Value::as_array_mut)
        {
            Some(e) => e,
            None => continue,
        };

        for event in events.iter_mut() {
            if !is_encrypted(event) {
                continue;
            }

            if let Some(decrypted) = decrypt_event(handler, event, Some(room_id)).await {
                *event = decrypted;
            }
        }
    }

    body
}

/// Go through a messages response body and decrypt all megolm encrypted
/// events.
///
/// Events missing a type field or not carrying the encrypted event tag are
/// skipped. No room id fallback is available in this shape, events are
/// decrypted with whatever room id they carry themselves.
///
/// Returns the body with the decrypted events.
pub async fn decrypt_messages_body(handler: &dyn CryptoHandler, mut body: Value) -> Value {
    let chunk = match body.get_mut("chunk").and_then(Value::as_array_mut) {
        Some(c) => c,
        None => return body,
    };

    debug!("Decrypting room messages");

    for event in chunk.iter_mut() {
        if !is_encrypted(event) {
            debug!("Event is not encrypted, skipping");
            continue;
        }

        if let Some(decrypted) = decrypt_event(handler, event, None).await {
            *event = decrypted;
        }
    }

    body
}

/// Encrypt the given content for the given room, sharing a new group session
/// if none exists yet.
///
/// If the first encryption attempt fails because the outbound group session
/// is missing, a new session is shared with the room and encryption is
/// retried exactly once. Any failure of the second attempt propagates to the
/// caller unmodified.
pub async fn encrypt_for_room(
    handler: &dyn CryptoHandler,
    room_id: &str,
    msgtype: &str,
    content: &Value,
) -> Result<Value, EncryptionError> {
    match handler.encrypt(room_id, msgtype, content).await {
        Ok(encrypted) => Ok(encrypted),
        Err(EncryptionError::MissingSession) => {
            info!("Sharing a new group session for room {}", room_id);
            handler.share_group_session(room_id).await?;
            handler.encrypt(room_id, msgtype, content).await
        }
        Err(e) => Err(e),
    }
}
