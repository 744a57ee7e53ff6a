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

//! The sync engine, a long-running loop that keeps the local state in sync
//! with the homeserver and decrypts every encrypted event addressed to us.

use std::{
    fmt,
    result::Result as StdResult,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use serde_json::Value;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{error, info, warn};

use crate::{
    error::{EngineError, Result},
    handler::{CryptoHandler, SyncOutcome},
    pipeline::decrypt_sync_body,
    trust::{verify_devices, TrustPolicy},
};

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_INITIAL_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(5 * 60);
const DEFAULT_RETRY_LIMIT: u32 = 10;
const DEFAULT_QUEUE_SIZE: usize = 8;

/// Don't hammer out requests if the server doesn't respect the sync timeout.
const SYNC_THROTTLE: Duration = Duration::from_secs(1);

/// Cap for the backoff exponent so the delay calculation can't overflow.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Settings for the sync engine.
///
/// # Example
///
/// ```
/// # use std::time::Duration;
/// # use palisade::EngineConfig;
/// let config = EngineConfig::new()
///     .sync_timeout(Duration::from_secs(10))
///     .retry_limit(5);
/// ```
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub(crate) sync_timeout: Duration,
    pub(crate) retry_initial_delay: Duration,
    pub(crate) retry_max_delay: Duration,
    pub(crate) retry_limit: u32,
    pub(crate) trust_policy: TrustPolicy,
    pub(crate) queue_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            retry_initial_delay: DEFAULT_RETRY_INITIAL_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            retry_limit: DEFAULT_RETRY_LIMIT,
            trust_policy: TrustPolicy::default(),
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Create a new default `EngineConfig`.
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the time the server is allowed to wait before responding to a
    /// sync request.
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Set the delay before the first retry after a failed sync.
    ///
    /// The delay doubles with every consecutive failure until it reaches the
    /// maximum delay.
    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.retry_initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries after failed syncs.
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = delay;
        self
    }

    /// Set how many times in a row syncing may fail before the loop gives up
    /// and terminates with an error.
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit.max(1);
        self
    }

    /// Set the policy deciding which newly-seen devices get verified.
    pub fn trust_policy(mut self, policy: TrustPolicy) -> Self {
        self.trust_policy = policy;
        self
    }

    /// Set how many decrypted sync bodies are buffered for subscribers that
    /// don't keep up with the loop.
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size.max(1);
        self
    }
}

/// A signal that fires every time the sync loop completes a cycle.
///
/// The signal carries a monotonically increasing cycle counter instead of an
/// edge-triggered flag, so a waiter can never race a clear-before-observe and
/// can tell exactly which cycle it saw.
#[derive(Clone, Debug)]
pub struct SyncedSignal {
    inner: watch::Receiver<u64>,
}

impl SyncedSignal {
    /// The number of sync cycles the loop has completed so far.
    pub fn cycle(&self) -> u64 {
        *self.inner.borrow()
    }

    /// Wait until the next sync cycle completes.
    ///
    /// Returns the number of the completed cycle or `None` if the engine was
    /// dropped.
    pub async fn synced(&mut self) -> Option<u64> {
        self.inner.changed().await.ok()?;
        Some(*self.inner.borrow())
    }
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<StdResult<(), EngineError>>,
}

/// The engine that drives the sync protocol.
///
/// Once started, a single background task repeatedly long-polls the
/// homeserver through the crypto handler, uploads and queries encryption
/// keys when the handler signals that either is due, applies the configured
/// trust policy to changed devices and decrypts every megolm encrypted event
/// of the returned batch. Decrypted sync bodies are published to
/// subscribers, a completed cycle is announced on the [`SyncedSignal`].
///
/// The loop is the only writer of the engine state. Stopping is cooperative,
/// [`stop`](#method.stop) interrupts the long-poll instead of waiting it
/// out and only returns once the loop has observably terminated.
pub struct SyncEngine {
    handler: Arc<dyn CryptoHandler>,
    config: EngineConfig,
    running: Arc<AtomicBool>,
    task: Mutex<Option<RunningLoop>>,
    synced_tx: Arc<watch::Sender<u64>>,
    synced_rx: watch::Receiver<u64>,
    bodies: broadcast::Sender<Value>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("SyncEngine")
            .field("running", &self.is_running())
            .field("config", &self.config)
            .finish()
    }
}

impl SyncEngine {
    /// Create a new sync engine with default settings.
    ///
    /// # Arguments
    ///
    /// * `handler` - The crypto handler that performs the actual protocol
    ///     operations for the engine.
    pub fn new(handler: Arc<dyn CryptoHandler>) -> Self {
        Self::with_config(handler, EngineConfig::default())
    }

    /// Create a new sync engine with the given settings.
    pub fn with_config(handler: Arc<dyn CryptoHandler>, config: EngineConfig) -> Self {
        let (synced_tx, synced_rx) = watch::channel(0);
        let (bodies, _) = broadcast::channel(config.queue_size);

        Self {
            handler,
            config,
            running: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
            synced_tx: Arc::new(synced_tx),
            synced_rx,
            bodies,
        }
    }

    /// Is the sync loop currently running.
    ///
    /// This reflects the true loop state, a loop that terminated with an
    /// error on its own stops being reported as running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get a signal that fires every time a sync cycle completes.
    pub fn synced(&self) -> SyncedSignal {
        SyncedSignal { inner: self.synced_rx.clone() }
    }

    /// Subscribe to the decrypted sync bodies the loop produces.
    ///
    /// Every successful sync cycle publishes one body with all megolm
    /// encrypted events rewritten to plaintext. Slow subscribers miss the
    /// oldest bodies once the queue configured with
    /// [`EngineConfig::queue_size`] overflows.
    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.bodies.subscribe()
    }

    /// Start the sync loop as a background task.
    ///
    /// The loop runs until [`stop`](#method.stop) is called or an
    /// unrecoverable error is hit. Calling `start()` while the loop is
    /// already running is an error.
    ///
    /// This method must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut task = self.task.lock().unwrap();

        if self.is_running() {
            return Err(EngineError::AlreadyRunning.into());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handler = self.handler.clone();
        let config = self.config.clone();
        let synced = self.synced_tx.clone();
        let bodies = self.bodies.clone();
        let cycle = *self.synced_rx.borrow();

        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let result = sync_loop(handler, config, shutdown_rx, synced, bodies, cycle).await;

            if let Err(e) = &result {
                error!("The sync loop terminated: {}", e);
            }

            running.store(false, Ordering::SeqCst);
            result
        });

        *task = Some(RunningLoop { shutdown: shutdown_tx, handle });

        Ok(())
    }

    /// Stop the sync loop.
    ///
    /// Cancellation is cooperative, a sync call that is currently
    /// long-polling is interrupted instead of waited out. The method only
    /// returns once the loop has reached its stopped state.
    ///
    /// Returns the terminal result of the loop: `Ok(())` for a clean
    /// shutdown, the loop's error if it already terminated on its own.
    pub async fn stop(&self) -> Result<()> {
        let running_loop = self.task.lock().unwrap().take();

        let running_loop = match running_loop {
            Some(r) => r,
            None => return Ok(()),
        };

        let _ = running_loop.shutdown.send(true);

        match running_loop.handle.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(EngineError::Shutdown(e.to_string()).into()),
        }
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        // A dropped sender counts as a shutdown as well.
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn retry_delay(config: &EngineConfig, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    let delay = config.retry_initial_delay * 2u32.saturating_pow(exponent);

    delay.min(config.retry_max_delay)
}

async fn sync_loop(
    handler: Arc<dyn CryptoHandler>,
    config: EngineConfig,
    mut shutdown: watch::Receiver<bool>,
    synced: Arc<watch::Sender<u64>>,
    bodies: broadcast::Sender<Value>,
    mut cycle: u64,
) -> StdResult<(), EngineError> {
    info!("Starting the sync loop");

    let mut failures = 0;
    let mut last_sync_time: Option<Instant> = None;

    loop {
        if *shutdown.borrow() {
            info!("Stopping the sync loop");
            return Ok(());
        }

        if !handler.logged_in() {
            return Err(EngineError::NotLoggedIn);
        }

        // If the last sync happened less than a second ago, sleep for a
        // while to not hammer out requests if the server doesn't respect
        // the sync timeout.
        if let Some(t) = last_sync_time {
            let elapsed = t.elapsed();

            if elapsed < SYNC_THROTTLE {
                tokio::select! {
                    _ = sleep(SYNC_THROTTLE - elapsed) => {}
                    _ = wait_for_shutdown(&mut shutdown) => {
                        info!("Stopping the sync loop");
                        return Ok(());
                    }
                }
            }
        }

        let outcome = tokio::select! {
            outcome = handler.sync(config.sync_timeout) => outcome,
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("Stopping the sync loop");
                return Ok(());
            }
        };

        last_sync_time = Some(Instant::now());

        let body = match outcome {
            SyncOutcome::Success(body) => body,
            SyncOutcome::Failure(error) => {
                failures += 1;

                if failures >= config.retry_limit {
                    return Err(EngineError::SyncFailed { retries: failures, error });
                }

                let delay = retry_delay(&config, failures);
                warn!(
                    "Received an invalid sync response ({}), retrying in {:?}",
                    error, delay
                );

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = wait_for_shutdown(&mut shutdown) => {
                        info!("Stopping the sync loop");
                        return Ok(());
                    }
                }

                continue;
            }
        };

        failures = 0;

        if handler.should_upload_keys() {
            if let Err(e) = handler.keys_upload().await {
                warn!("Error while uploading the encryption keys: {}", e);
            }
        }

        if handler.should_query_keys() {
            match handler.keys_query().await {
                Ok(response) => {
                    verify_devices(handler.as_ref(), &config.trust_policy, &response.changed)
                        .await
                }
                Err(e) => warn!("Error while querying the device keys: {}", e),
            }
        }

        let body = decrypt_sync_body(handler.as_ref(), body).await;

        // No subscribers is fine, the bodies are informational.
        let _ = bodies.send(body);

        cycle += 1;
        let _ = synced.send(cycle);
    }
}
