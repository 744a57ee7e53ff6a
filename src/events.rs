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

//! Typed views over the raw JSON events that flow through the decryption
//! pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{EventError, ParseResult};

/// The event type tag of an encrypted room event.
pub const ENCRYPTED_EVENT_TYPE: &str = "m.room.encrypted";

/// The event type tag an event gets after it has been decrypted.
pub const MESSAGE_EVENT_TYPE: &str = "m.room.message";

/// The only encryption algorithm the decryption pipeline supports.
pub const MEGOLM_ALGORITHM: &str = "m.megolm.v1.aes-sha2";

/// A typed representation of a megolm encrypted room event.
#[derive(Clone, Debug, PartialEq)]
pub struct EncryptedEvent {
    /// The id of the user that sent the event.
    pub sender: String,
    /// The id of the room the event was sent in, if it is known.
    ///
    /// Events coming out of a messages response don't carry a room id
    /// themselves, the caller may supply one as a fallback.
    pub room_id: Option<String>,
    /// The curve25519 key of the device that sent us the event.
    pub sender_key: String,
    /// The id of the device that sent us the event.
    pub device_id: Option<String>,
    /// The id of the megolm session that was used to encrypt the event.
    pub session_id: String,
    /// The base64 encoded ciphertext of the event.
    pub ciphertext: String,
}

fn content_field<'a>(content: &'a Map<String, Value>, field: &str) -> ParseResult<&'a str> {
    content
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| EventError::MissingField(field.to_owned()))
}

impl EncryptedEvent {
    /// Parse a raw JSON event into a typed encrypted event.
    ///
    /// # Arguments
    ///
    /// * `event` - The raw event that should be parsed.
    ///
    /// * `room_id` - A fallback room id that will be used if the event itself
    ///     doesn't carry one.
    ///
    /// Returns an error if the event isn't a megolm encrypted event or if a
    /// field that is required for decryption is missing.
    pub fn parse(event: &Value, room_id: Option<&str>) -> ParseResult<Self> {
        let event = event.as_object().ok_or(EventError::NotAnObject)?;

        if event.get("type").and_then(Value::as_str) != Some(ENCRYPTED_EVENT_TYPE) {
            return Err(EventError::NotEncrypted);
        }

        let content = event
            .get("content")
            .and_then(Value::as_object)
            .ok_or_else(|| EventError::MissingField("content".to_owned()))?;

        if content_field(content, "algorithm")? != MEGOLM_ALGORITHM {
            return Err(EventError::UnsupportedAlgorithm);
        }

        let sender = event
            .get("sender")
            .and_then(Value::as_str)
            .ok_or_else(|| EventError::MissingField("sender".to_owned()))?;

        let room_id = event
            .get("room_id")
            .and_then(Value::as_str)
            .or(room_id)
            .map(ToOwned::to_owned);

        Ok(Self {
            sender: sender.to_owned(),
            room_id,
            sender_key: content_field(content, "sender_key")?.to_owned(),
            device_id: content
                .get("device_id")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            session_id: content_field(content, "session_id")?.to_owned(),
            ciphertext: content_field(content, "ciphertext")?.to_owned(),
        })
    }
}

/// The plaintext payload a successful decryption produces.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DecryptedEvent {
    /// The plaintext body of the message.
    pub body: String,
    /// The formatted version of the body, if any.
    pub formatted_body: Option<String>,
    /// The format of the formatted body, if any.
    pub format: Option<String>,
    /// Was the event sent from a verified device.
    pub verified: bool,
}

impl DecryptedEvent {
    /// Turn the payload into the content of a plaintext message event.
    ///
    /// The formatted body and format fields are only added if the decrypted
    /// payload carried a formatted body.
    pub fn into_content(self) -> Value {
        let mut content = json!({
            "msgtype": "m.text",
            "body": self.body,
        });

        if let Some(formatted_body) = self.formatted_body {
            let object = content.as_object_mut().expect("content is always an object");
            object.insert("formatted_body".to_owned(), json!(formatted_body));

            if let Some(format) = self.format {
                object.insert("format".to_owned(), json!(format));
            }
        }

        content
    }
}
