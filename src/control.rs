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

//! The message contract of the operator control channel.
//!
//! The interactive console and its transport live outside of this crate,
//! here we only parse command lines into typed commands and answer them
//! against the crypto handler. Malformed input is answered with an error
//! message, it never brings the channel down.

use std::{fmt, path::PathBuf};

use tracing::info;
use zeroize::Zeroizing;

use crate::{error::ControlError, handler::CryptoHandler};

const LIST_USERS: &str = "list-users";
const IMPORT_KEYS: &str = "import-keys";
const EXPORT_KEYS: &str = "export-keys";

/// A command received over the control channel.
#[derive(Clone)]
pub enum ControlCommand {
    /// List the users the daemon is running for.
    ListUsers,
    /// Import megolm session keys from a passphrase protected file.
    ImportKeys {
        /// The user the keys should be imported for.
        user_id: String,
        /// The file holding the exported keys.
        path: PathBuf,
        /// The passphrase the file was protected with.
        passphrase: Zeroizing<String>,
    },
    /// Export megolm session keys into a passphrase protected file.
    ExportKeys {
        /// The user whose keys should be exported.
        user_id: String,
        /// The file the keys should be written to.
        path: PathBuf,
        /// The passphrase to protect the file with.
        passphrase: Zeroizing<String>,
    },
}

impl fmt::Debug for ControlCommand {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::ListUsers => write!(fmt, "ListUsers"),
            ControlCommand::ImportKeys { user_id, path, .. } => fmt
                .debug_struct("ImportKeys")
                .field("user_id", user_id)
                .field("path", path)
                .field("passphrase", &"<redacted>")
                .finish(),
            ControlCommand::ExportKeys { user_id, path, .. } => fmt
                .debug_struct("ExportKeys")
                .field("user_id", user_id)
                .field("path", path)
                .field("passphrase", &"<redacted>")
                .finish(),
        }
    }
}

fn expect_args(command: &str, args: &[&str], expected: usize) -> Result<(), ControlError> {
    if args.len() != expected {
        Err(ControlError::WrongArgumentCount {
            command: command.to_owned(),
            expected,
            got: args.len(),
        })
    } else {
        Ok(())
    }
}

impl ControlCommand {
    /// Parse a whitespace separated command line into a typed command.
    ///
    /// Unknown commands and wrong argument counts are rejected with an error
    /// carrying a user-visible message.
    pub fn parse(line: &str) -> Result<Self, ControlError> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(ControlError::Empty)?;
        let args: Vec<&str> = words.collect();

        match command {
            LIST_USERS => {
                expect_args(command, &args, 0)?;
                Ok(ControlCommand::ListUsers)
            }
            IMPORT_KEYS => {
                expect_args(command, &args, 3)?;
                Ok(ControlCommand::ImportKeys {
                    user_id: args[0].to_owned(),
                    path: args[1].into(),
                    passphrase: Zeroizing::new(args[2].to_owned()),
                })
            }
            EXPORT_KEYS => {
                expect_args(command, &args, 3)?;
                Ok(ControlCommand::ExportKeys {
                    user_id: args[0].to_owned(),
                    path: args[1].into(),
                    passphrase: Zeroizing::new(args[2].to_owned()),
                })
            }
            command => Err(ControlError::UnknownCommand(command.to_owned())),
        }
    }
}

/// The answer the control channel sends back for a command.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlReply {
    /// The list of users the daemon runs for, together with their device
    /// counts.
    Users(Vec<(String, usize)>),
    /// Keys were imported, carrying the number of imported sessions.
    Imported(usize),
    /// The command completed without a result value.
    Ok,
    /// The command failed, carrying a user-visible message.
    Error(String),
}

/// Answer a single control command against the crypto handler.
///
/// Failures of the underlying operations are turned into
/// [`ControlReply::Error`] messages, the channel stays usable afterwards.
pub async fn handle_command(handler: &dyn CryptoHandler, command: ControlCommand) -> ControlReply {
    match command {
        ControlCommand::ListUsers => ControlReply::Users(handler.list_users()),
        ControlCommand::ImportKeys { user_id, path, passphrase } => {
            info!("Importing keys for user {} from {:?}", user_id, path);

            match handler.import_keys(&user_id, &path, &passphrase).await {
                Ok(count) => ControlReply::Imported(count),
                Err(e) => ControlReply::Error(e.to_string()),
            }
        }
        ControlCommand::ExportKeys { user_id, path, passphrase } => {
            info!("Exporting keys of user {} to {:?}", user_id, path);

            match handler.export_keys(&user_id, &path, &passphrase).await {
                Ok(()) => ControlReply::Ok,
                Err(e) => ControlReply::Error(e.to_string()),
            }
        }
    }
}
