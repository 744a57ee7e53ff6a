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

//! Error conditions.

use thiserror::Error;

/// Result type of the whole crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for events that couldn't be turned into their typed
/// representation.
pub type ParseResult<T> = std::result::Result<T, EventError>;

/// Error that can occur when an event is parsed into its typed encrypted
/// representation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    /// The provided JSON value wasn't a JSON object.
    #[error("the provided JSON value isn't an object")]
    NotAnObject,
    /// The event type doesn't carry the encrypted event tag.
    #[error("the event is not an encrypted event")]
    NotEncrypted,
    /// The event was encrypted with an algorithm the pipeline doesn't
    /// understand.
    #[error("the event has been encrypted with an unsupported algorithm")]
    UnsupportedAlgorithm,
    /// A field that is required for decryption was missing.
    #[error("the encrypted event is missing the field {0}")]
    MissingField(String),
}

/// Error signaling that the decryption of a megolm encrypted event failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MegolmError {
    /// The session that was used to encrypt the message isn't known to us.
    #[error("decryption failed because the session to decrypt the message is missing")]
    MissingSession,
    /// The crypto handler reported a decryption failure.
    #[error("decryption failed: {0}")]
    Decryption(String),
    /// The event couldn't be parsed into an encrypted event.
    #[error(transparent)]
    Event(#[from] EventError),
}

/// Error that can occur when a message is encrypted for a room.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncryptionError {
    /// No outbound group session exists for the room, one needs to be shared
    /// before encryption can succeed.
    #[error("no outbound group session exists for the room")]
    MissingSession,
    /// The crypto handler reported an encryption failure.
    #[error("encryption failed: {0}")]
    Encryption(String),
}

/// Error a crypto handler operation can signal, e.g. if a key upload or key
/// query couldn't be carried out.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("the crypto handler signaled a failure: {0}")]
pub struct HandlerError(pub String);

/// Error conditions that terminate or refuse to start the sync loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// `start()` was called while the loop was already running.
    #[error("the sync loop is already running")]
    AlreadyRunning,
    /// The crypto handler reports that we aren't logged in, syncing can't
    /// continue.
    #[error("the client is not logged in, the sync loop can't continue")]
    NotLoggedIn,
    /// Syncing failed repeatedly and the retry limit was reached.
    #[error("syncing failed {retries} times in a row, giving up: {error}")]
    SyncFailed {
        /// How often syncing was attempted before giving up.
        retries: u32,
        /// The last failure the sync operation returned.
        error: String,
    },
    /// The sync task couldn't be joined, it either panicked or was aborted
    /// from the outside.
    #[error("the sync task didn't shut down cleanly: {0}")]
    Shutdown(String),
}

/// Error that is sent back over the control channel when a command couldn't
/// be understood.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    /// The command line was empty.
    #[error("no command given")]
    Empty,
    /// The command isn't one the control channel knows about.
    #[error("unknown command {0}")]
    UnknownCommand(String),
    /// The command was given the wrong number of arguments.
    #[error("invalid arguments for command {command}: expected {expected} arguments, got {got}")]
    WrongArgumentCount {
        /// The command that was given the wrong number of arguments.
        command: String,
        /// How many arguments the command expects.
        expected: usize,
        /// How many arguments were given.
        got: usize,
    },
}

/// Error type for the whole crate, collecting the failure modes of the
/// individual components.
#[derive(Error, Debug)]
pub enum Error {
    /// An event couldn't be decrypted.
    #[error(transparent)]
    Megolm(#[from] MegolmError),
    /// A message couldn't be encrypted for a room.
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    /// A crypto handler operation failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// The sync loop couldn't be started or was terminated.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// A control channel command was malformed.
    #[error(transparent)]
    Control(#[from] ControlError),
}
