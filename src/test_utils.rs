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

//! A scriptable crypto handler and static response bodies for the tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::sleep;

use crate::{
    error::{EncryptionError, HandlerError, MegolmError},
    events::{DecryptedEvent, EncryptedEvent},
    handler::{CryptoHandler, KeysQueryResult, SyncOutcome},
    models::{Device, Room},
};

/// The plaintext every successful mock decryption produces.
pub(crate) const PLAINTEXT_BODY: &str = "It's a secret to everybody";

pub(crate) mod test_json {
    use lazy_static::lazy_static;
    use serde_json::{json, Value};

    use crate::events::MEGOLM_ALGORITHM;

    pub(crate) const ROOM_ID: &str = "!SVkFJHzfwvuaIEawgC:localhost";

    lazy_static! {
        pub(crate) static ref ENCRYPTED_EVENT: Value = json!({
            "event_id": "$15163622445EBvZJ:localhost",
            "origin_server_ts": 1516362244026u64,
            "sender": "@example2:localhost",
            "type": "m.room.encrypted",
            "content": {
                "algorithm": MEGOLM_ALGORITHM,
                "ciphertext": "AwgAEnACgAkLmt6qF84IK++J7UDH2Za1YVchHyprqTqsg2yyOwAtHaZTwyNg37afzg8f3r9IsN9r",
                "device_id": "RJYKSTBOIE",
                "sender_key": "IlRMeOPX2e0MurIyfWEucYBRVOEEUMrOHqn/8mLqMjA",
                "session_id": "X3lUlvLELLYxeTx4yOVu6UDpasGEVO0Jbu+QFnm0cKQ"
            }
        });
    }

    pub(crate) fn sync_body() -> Value {
        json!({
            "next_batch": "s526_47314_0_7_1_1_1_11444_1",
            "device_one_time_keys_count": {},
            "rooms": {
                "invite": {},
                "join": {
                    ROOM_ID: {
                        "state": { "events": [] },
                        "timeline": {
                            "events": [ENCRYPTED_EVENT.clone()],
                            "limited": false,
                            "prev_batch": "t392-516_47314_0_7_1_1_1_11444_1"
                        }
                    }
                },
                "leave": {}
            }
        })
    }

    pub(crate) fn messages_body() -> Value {
        json!({
            "start": "t47429-4392820_219380_26003_2265",
            "end": "t47409-4357353_219380_26003_2265",
            "chunk": [
                {
                    "content": { "membership": "join" },
                    "sender": "@example:localhost"
                },
                {
                    "event_id": "$15163622445AAaAA:localhost",
                    "origin_server_ts": 1516362244000u64,
                    "sender": "@example:localhost",
                    "type": "m.room.message",
                    "content": { "msgtype": "m.text", "body": "hello world" }
                },
                ENCRYPTED_EVENT.clone()
            ]
        })
    }
}

/// The changed device set a mock key query returns, one live and one deleted
/// device.
pub(crate) fn changed_devices() -> HashMap<String, HashMap<String, Device>> {
    let mut devices = HashMap::new();

    devices.insert(
        "RJYKSTBOIE".to_owned(),
        Device {
            user_id: "@example2:localhost".to_owned(),
            device_id: "RJYKSTBOIE".to_owned(),
            display_name: Some("Client 1".to_owned()),
            deleted: false,
        },
    );
    devices.insert(
        "GONEDEVICE".to_owned(),
        Device {
            user_id: "@example2:localhost".to_owned(),
            device_id: "GONEDEVICE".to_owned(),
            display_name: None,
            deleted: true,
        },
    );

    let mut changed = HashMap::new();
    changed.insert("@example2:localhost".to_owned(), devices);

    changed
}

/// A crypto handler whose behavior the tests script up front.
///
/// Protocol operations are recorded in a call trace, state lookups
/// (`logged_in`, `should_*`, `get_room`, `list_users`) are not.
pub(crate) struct MockHandler {
    calls: Mutex<Vec<String>>,
    logged_in: AtomicBool,
    upload_due: AtomicBool,
    query_due: AtomicBool,
    rooms: Mutex<HashMap<String, Room>>,
    sync_outcomes: Mutex<VecDeque<SyncOutcome>>,
    sync_fails_forever: AtomicBool,
    decryption_fails: AtomicBool,
    encrypt_always_fails: AtomicBool,
    missing_sessions: Mutex<HashSet<String>>,
    verified: Mutex<HashSet<(String, String)>>,
}

impl MockHandler {
    pub fn new() -> Self {
        let mut rooms = HashMap::new();
        rooms.insert(
            test_json::ROOM_ID.to_owned(),
            Room {
                room_id: test_json::ROOM_ID.to_owned(),
                display_name: Some("Example room".to_owned()),
                encrypted: true,
            },
        );

        Self {
            calls: Mutex::new(Vec::new()),
            logged_in: AtomicBool::new(true),
            upload_due: AtomicBool::new(false),
            query_due: AtomicBool::new(false),
            rooms: Mutex::new(rooms),
            sync_outcomes: Mutex::new(VecDeque::new()),
            sync_fails_forever: AtomicBool::new(false),
            decryption_fails: AtomicBool::new(false),
            encrypt_always_fails: AtomicBool::new(false),
            missing_sessions: Mutex::new(HashSet::new()),
            verified: Mutex::new(HashSet::new()),
        }
    }

    pub fn logged_out(self) -> Self {
        self.logged_in.store(false, Ordering::SeqCst);
        self
    }

    pub fn keys_due(self) -> Self {
        self.upload_due.store(true, Ordering::SeqCst);
        self.query_due.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_decryption(self) -> Self {
        self.decryption_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_unencrypted_room(self) -> Self {
        self.rooms
            .lock()
            .unwrap()
            .get_mut(test_json::ROOM_ID)
            .unwrap()
            .encrypted = false;
        self
    }

    pub fn without_rooms(self) -> Self {
        self.rooms.lock().unwrap().clear();
        self
    }

    pub fn without_outbound_session(self) -> Self {
        self.missing_sessions.lock().unwrap().insert(test_json::ROOM_ID.to_owned());
        self
    }

    pub fn always_missing_session(self) -> Self {
        self.encrypt_always_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_sync_body(self, body: Value) -> Self {
        self.queue_sync_body(body);
        self
    }

    pub fn with_sync_failure(self, error: &str) -> Self {
        self.sync_outcomes
            .lock()
            .unwrap()
            .push_back(SyncOutcome::Failure(error.to_owned()));
        self
    }

    pub fn failing_sync_forever(self) -> Self {
        self.sync_fails_forever.store(true, Ordering::SeqCst);
        self
    }

    pub fn queue_sync_body(&self, body: Value) {
        self.sync_outcomes.lock().unwrap().push_back(SyncOutcome::Success(body));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn verified_devices(&self) -> Vec<(String, String)> {
        self.verified.lock().unwrap().iter().cloned().collect()
    }

    pub fn is_verified(&self, user_id: &str, device_id: &str) -> bool {
        self.verified
            .lock()
            .unwrap()
            .contains(&(user_id.to_owned(), device_id.to_owned()))
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_owned());
    }
}

#[async_trait]
impl CryptoHandler for MockHandler {
    fn logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    async fn sync(&self, _timeout: Duration) -> SyncOutcome {
        self.record("sync");

        let outcome = self.sync_outcomes.lock().unwrap().pop_front();

        match outcome {
            Some(outcome) => outcome,
            None if self.sync_fails_forever.load(Ordering::SeqCst) => {
                SyncOutcome::Failure("invalid sync response".to_owned())
            }
            None => {
                // Simulate an idle long-poll, the engine is expected to
                // cancel this on shutdown.
                sleep(Duration::from_secs(3600)).await;
                SyncOutcome::Failure("timed out".to_owned())
            }
        }
    }

    fn should_upload_keys(&self) -> bool {
        self.upload_due.load(Ordering::SeqCst)
    }

    async fn keys_upload(&self) -> Result<(), HandlerError> {
        self.record("keys_upload");
        self.upload_due.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn should_query_keys(&self) -> bool {
        self.query_due.load(Ordering::SeqCst)
    }

    async fn keys_query(&self) -> Result<KeysQueryResult, HandlerError> {
        self.record("keys_query");
        self.query_due.store(false, Ordering::SeqCst);
        Ok(KeysQueryResult { changed: changed_devices() })
    }

    async fn decrypt(&self, _event: &EncryptedEvent) -> Result<DecryptedEvent, MegolmError> {
        self.record("decrypt");

        if self.decryption_fails.load(Ordering::SeqCst) {
            Err(MegolmError::MissingSession)
        } else {
            Ok(DecryptedEvent {
                body: PLAINTEXT_BODY.to_owned(),
                ..Default::default()
            })
        }
    }

    async fn encrypt(
        &self,
        room_id: &str,
        _msgtype: &str,
        _content: &Value,
    ) -> Result<Value, EncryptionError> {
        self.record("encrypt");

        if self.encrypt_always_fails.load(Ordering::SeqCst)
            || self.missing_sessions.lock().unwrap().contains(room_id)
        {
            Err(EncryptionError::MissingSession)
        } else {
            Ok(serde_json::json!({
                "algorithm": crate::events::MEGOLM_ALGORITHM,
                "ciphertext": "AwgAEnACgAkLmt6qF84IK",
                "session_id": "X3lUlvLELLYxeTx4yOVu6UDpasGEVO0Jbu+QFnm0cKQ"
            }))
        }
    }

    async fn share_group_session(&self, room_id: &str) -> Result<(), EncryptionError> {
        self.record("share_group_session");
        self.missing_sessions.lock().unwrap().remove(room_id);
        Ok(())
    }

    async fn verify_device(&self, device: &Device) -> bool {
        self.record("verify_device");
        self.verified
            .lock()
            .unwrap()
            .insert((device.user_id.clone(), device.device_id.clone()))
    }

    fn get_room(&self, room_id: &str) -> Option<Room> {
        self.rooms.lock().unwrap().get(room_id).cloned()
    }

    fn list_users(&self) -> Vec<(String, usize)> {
        vec![("@example:localhost".to_owned(), 2)]
    }

    async fn import_keys(
        &self,
        _user_id: &str,
        _path: &Path,
        _passphrase: &str,
    ) -> Result<usize, HandlerError> {
        self.record("import_keys");
        Ok(3)
    }

    async fn export_keys(
        &self,
        _user_id: &str,
        _path: &Path,
        _passphrase: &str,
    ) -> Result<(), HandlerError> {
        self.record("export_keys");
        Ok(())
    }
}
