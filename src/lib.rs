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

//! This crate implements the core of a daemon that makes end-to-end
//! encrypted Matrix rooms transparent to clients that don't implement
//! encryption themselves.
//!
//! The [`SyncEngine`] continuously long-polls the homeserver for new events,
//! keeps the key exchange of the local device up to date, applies a
//! [`TrustPolicy`] to newly-seen devices and rewrites every megolm encrypted
//! event of a sync batch into its plaintext form. The same decryption
//! pipeline is reusable outside of the live loop to rewrite historical
//! messages responses, see [`decrypt_messages_body`].
//!
//! The cryptographic engine itself, the HTTP transport and the durable
//! session stores live behind the [`CryptoHandler`] trait; this crate owns
//! no cryptographic state of its own.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use palisade::{CryptoHandler, SyncEngine};
//! # async fn example(handler: Arc<dyn CryptoHandler>) {
//! let engine = SyncEngine::new(handler);
//! let mut synced = engine.synced();
//!
//! engine.start().unwrap();
//! synced.synced().await;
//!
//! engine.stop().await.unwrap();
//! # }
//! ```
//!
//! # Enabling logging
//!
//! This crate uses the [tracing](https://docs.rs/tracing) crate for log
//! output. Users can enable log output by depending on the
//! `tracing-subscriber` crate and including the following line in their
//! application:
//!
//! ```rust
//! tracing_subscriber::fmt::init();
//! ```

#![deny(
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

mod control;
mod engine;
mod error;
mod events;
mod handler;
mod models;
mod pipeline;
mod trust;

#[cfg(test)]
mod test_utils;

pub use control::{handle_command, ControlCommand, ControlReply};
pub use engine::{EngineConfig, SyncEngine, SyncedSignal};
pub use error::{
    ControlError, EncryptionError, EngineError, Error, EventError, HandlerError, MegolmError,
    ParseResult, Result,
};
pub use events::{
    DecryptedEvent, EncryptedEvent, ENCRYPTED_EVENT_TYPE, MEGOLM_ALGORITHM, MESSAGE_EVENT_TYPE,
};
pub use handler::{CryptoHandler, KeysQueryResult, SyncOutcome};
pub use models::{Device, Room};
pub use pipeline::{decrypt_event, decrypt_messages_body, decrypt_sync_body, encrypt_for_room};
pub use trust::{verify_devices, TrustPolicy};
