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

use serde::{Deserialize, Serialize};

/// A read-only view over a room the crypto handler knows about.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Room {
    /// The unique id of the room.
    pub room_id: String,
    /// The calculated display name of the room.
    pub display_name: Option<String>,
    /// Is the room end-to-end encrypted.
    pub encrypted: bool,
}

impl Room {
    /// Get a human readable name for the room, falling back to the room id if
    /// no display name was calculated.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.room_id)
    }
}

/// A device represents an E2EE capable client of an user.
///
/// Devices are produced by a key query and are never persisted here, the
/// crypto handler owns the canonical device list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// The id of the user that the device belongs to.
    pub user_id: String,
    /// The unique id of the device.
    pub device_id: String,
    /// The user chosen display name of the device.
    pub display_name: Option<String>,
    /// Was the device deleted on the server.
    pub deleted: bool,
}
