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

use std::{collections::HashMap, path::Path, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{EncryptionError, HandlerError, MegolmError},
    events::{DecryptedEvent, EncryptedEvent},
    models::{Device, Room},
};

/// The result of a single sync operation.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    /// The sync succeeded, carrying the raw response body.
    Success(Value),
    /// The sync failed, carrying a description of the failure.
    ///
    /// Failures are treated as transient by the sync loop, it will retry
    /// with backoff until its retry limit is reached.
    Failure(String),
}

/// The devices that a key query found to have changed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KeysQueryResult {
    /// The changed devices, grouped per user.
    pub changed: HashMap<String, HashMap<String, Device>>,
}

/// Abstraction over the stateful cryptographic engine and its transport.
///
/// The sync engine, the decryption pipeline and the control channel only talk
/// to this trait, they never own any cryptographic state themselves. This
/// keeps the loop's state machine decoupled from the engine's internal
/// representation and makes the engine mockable for tests.
///
/// Implementations are expected to persist their session and device state
/// durably, the operations here assume nothing is lost across process
/// restarts.
#[async_trait]
pub trait CryptoHandler: Send + Sync {
    /// Is the client logged in to the homeserver.
    fn logged_in(&self) -> bool;

    /// Perform a long-polling sync, waiting up to `timeout` on the server
    /// side for new events to arrive.
    ///
    /// The returned future must be safe to drop, the sync loop races it
    /// against its shutdown signal.
    async fn sync(&self, timeout: Duration) -> SyncOutcome;

    /// Do the encryption keys of the local device need to be uploaded.
    fn should_upload_keys(&self) -> bool;

    /// Upload the local device's encryption keys to the homeserver.
    async fn keys_upload(&self) -> Result<(), HandlerError>;

    /// Do the device keys of other users need to be queried.
    fn should_query_keys(&self) -> bool;

    /// Query the homeserver for the device keys of other users.
    async fn keys_query(&self) -> Result<KeysQueryResult, HandlerError>;

    /// Decrypt a megolm encrypted room event.
    async fn decrypt(&self, event: &EncryptedEvent) -> Result<DecryptedEvent, MegolmError>;

    /// Encrypt the given content for the given room.
    ///
    /// Fails with [`EncryptionError::MissingSession`] if no outbound group
    /// session exists for the room.
    async fn encrypt(
        &self,
        room_id: &str,
        msgtype: &str,
        content: &Value,
    ) -> Result<Value, EncryptionError>;

    /// Share a new outbound group session with the members of the given room.
    async fn share_group_session(&self, room_id: &str) -> Result<(), EncryptionError>;

    /// Mark the given device as verified.
    ///
    /// Returns `true` if the trust state of the device changed, `false` if
    /// the device was already verified.
    async fn verify_device(&self, device: &Device) -> bool;

    /// Look up a room by its id, returns `None` for unknown rooms.
    fn get_room(&self, room_id: &str) -> Option<Room>;

    /// List the users the daemon is running for, together with the number of
    /// devices each of them has.
    fn list_users(&self) -> Vec<(String, usize)>;

    /// Import megolm session keys for the given user from a file.
    ///
    /// Returns the number of sessions that were imported.
    async fn import_keys(
        &self,
        user_id: &str,
        path: &Path,
        passphrase: &str,
    ) -> Result<usize, HandlerError>;

    /// Export the megolm session keys of the given user into a passphrase
    /// protected file.
    async fn export_keys(
        &self,
        user_id: &str,
        path: &Path,
        passphrase: &str,
    ) -> Result<(), HandlerError>;
}
