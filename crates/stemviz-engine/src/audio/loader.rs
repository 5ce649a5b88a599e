//! Parallel stem loading with bounded retries.
//!
//! Each stem decodes on its own thread. A failed or timed-out attempt
//! is retried up to the configured count; after that the slot settles
//! on whatever it has (usually nothing) and the show goes on without
//! that stem. Waiting is always capped, never indefinite.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::decode::{decode_stem, StemBuffer};
use crate::config::StemDesc;
use crate::error::StemLoadError;

/// Poll interval while waiting on in-flight decodes.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

struct LoadSlot {
    name: String,
    path: PathBuf,
    /// Attempts started so far (first attempt counts).
    attempts: u32,
    attempt_started: Instant,
    rx: Option<Receiver<Result<StemBuffer, StemLoadError>>>,
    /// `Some` once the slot has settled; `Some(None)` means given up.
    outcome: Option<Option<StemBuffer>>,
    /// Set after the transport has consumed the settled buffer.
    delivered: bool,
}

impl LoadSlot {
    fn spawn_attempt(&mut self) {
        let (tx, rx) = mpsc::channel();
        let path = self.path.clone();
        let name = self.name.clone();
        self.attempts += 1;
        self.attempt_started = Instant::now();
        self.rx = Some(rx);
        let attempt = self.attempts;
        thread::spawn(move || {
            log::debug!("loading stem '{name}' (attempt {attempt})");
            // Receiver may be gone if the loader gave up while we decoded
            let _ = tx.send(decode_stem(&path));
        });
    }
}

/// Shared loader state. The transport polls it from `play`/`when_ready`
/// and the analysis thread polls it every tick so stems that finish
/// late still join the session.
pub struct StemLoader {
    slots: Mutex<Vec<LoadSlot>>,
    attempt_timeout: Duration,
    retries: u32,
}

impl StemLoader {
    pub fn spawn(stems: &[StemDesc], attempt_timeout: Duration, retries: u32) -> Self {
        let slots = stems
            .iter()
            .map(|desc| {
                let mut slot = LoadSlot {
                    name: desc.name.clone(),
                    path: desc.path.clone(),
                    attempts: 0,
                    attempt_started: Instant::now(),
                    rx: None,
                    outcome: None,
                    delivered: false,
                };
                slot.spawn_attempt();
                slot
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            attempt_timeout,
            retries,
        }
    }

    /// Total time the loader is allowed to keep a caller waiting.
    pub fn budget(&self) -> Duration {
        self.attempt_timeout * (self.retries + 1)
    }

    /// Advance every unsettled slot: collect finished decodes, retry
    /// failures, give up past the retry budget. Returns true once all
    /// slots have settled.
    pub fn poll(&self) -> bool {
        let mut slots = match self.slots.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut all_settled = true;
        for slot in slots.iter_mut() {
            if slot.outcome.is_some() {
                continue;
            }

            let result = match &slot.rx {
                Some(rx) => match rx.try_recv() {
                    Ok(r) => Some(r),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => Some(Err(StemLoadError::Decode {
                        path: slot.path.display().to_string(),
                        reason: "decode thread terminated".into(),
                    })),
                },
                None => None,
            };

            match result {
                Some(Ok(buffer)) => {
                    log::info!("stem '{}' ready ({:.1}s)", slot.name, buffer.duration_secs());
                    slot.outcome = Some(Some(buffer));
                }
                Some(Err(err)) => {
                    if slot.attempts <= self.retries {
                        log::warn!("stem '{}' failed ({err}), retrying", slot.name);
                        slot.spawn_attempt();
                        all_settled = false;
                    } else {
                        log::error!("stem '{}' gave up after {} attempts: {err}", slot.name, slot.attempts);
                        slot.outcome = Some(None);
                    }
                }
                None => {
                    if slot.attempt_started.elapsed() >= self.attempt_timeout {
                        if slot.attempts <= self.retries {
                            log::warn!("stem '{}' timed out, retrying", slot.name);
                            slot.spawn_attempt();
                        } else {
                            let err = StemLoadError::TimedOut {
                                attempts: slot.attempts,
                            };
                            log::error!("stem '{}': {err}", slot.name);
                            slot.outcome = Some(None);
                        }
                    }
                    all_settled = false;
                }
            }
        }
        all_settled
    }

    /// Block until every slot settles or `cap` elapses, whichever is
    /// first. The cap never exceeds [`Self::budget`].
    pub fn wait(&self, cap: Duration) {
        let deadline = Instant::now() + cap.min(self.budget());
        while !self.poll() {
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Drain buffers that settled since the last call. Each stem is
    /// handed out exactly once.
    pub fn take_ready(&self) -> Vec<(String, StemBuffer)> {
        let mut slots = match self.slots.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut out = Vec::new();
        for slot in slots.iter_mut() {
            if slot.delivered {
                continue;
            }
            if let Some(Some(buffer)) = &slot.outcome {
                out.push((slot.name.clone(), buffer.clone()));
                slot.delivered = true;
            }
        }
        out
    }
}
