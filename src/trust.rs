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

use std::{collections::HashMap, fmt, sync::Arc};

use tracing::{debug, info};

use crate::{handler::CryptoHandler, models::Device};

/// The policy deciding which newly-seen devices get verified.
///
/// **Note**: the default policy marks every device as verified without any
/// user interaction. This means that the security the encryption provides is
/// reduced to transport security against a passive observer, an active
/// attacker can insert its own device into a room undetected. Use the
/// [`TrustPolicy::Approval`] variant if devices should be vetted before they
/// are trusted.
#[derive(Clone)]
pub enum TrustPolicy {
    /// Verify every non-deleted device automatically and unconditionally.
    AutoVerify,
    /// Ask the given callback for every non-deleted device, verifying only
    /// the devices the callback approves.
    Approval(Arc<dyn Fn(&Device) -> bool + Send + Sync>),
}

impl Default for TrustPolicy {
    fn default() -> Self {
        TrustPolicy::AutoVerify
    }
}

impl fmt::Debug for TrustPolicy {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustPolicy::AutoVerify => write!(fmt, "TrustPolicy::AutoVerify"),
            TrustPolicy::Approval(_) => write!(fmt, "TrustPolicy::Approval(..)"),
        }
    }
}

impl TrustPolicy {
    fn approves(&self, device: &Device) -> bool {
        match self {
            TrustPolicy::AutoVerify => true,
            TrustPolicy::Approval(callback) => callback(device),
        }
    }
}

/// Apply the trust policy to the changed devices of a key query result.
///
/// Deleted devices are always skipped. Verification is idempotent, applying
/// the same device set twice doesn't change any state the second time around.
pub async fn verify_devices(
    handler: &dyn CryptoHandler,
    policy: &TrustPolicy,
    changed: &HashMap<String, HashMap<String, Device>>,
) {
    for (user_id, devices) in changed {
        for device in devices.values() {
            if device.deleted {
                continue;
            }

            if !policy.approves(device) {
                debug!(
                    "The trust policy rejected device {} of user {}, leaving it unverified",
                    device.device_id, user_id
                );
                continue;
            }

            if handler.verify_device(device).await {
                info!(
                    "Automatically verifying device {} of user {}",
                    device.device_id, user_id
                );
            }
        }
    }
}
