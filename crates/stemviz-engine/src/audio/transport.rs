//! Synchronized multi-stem transport.
//!
//! The main stem (manifest index 0) is the clock authority: when output
//! is audible its device cursor leads, otherwise its timer clock does.
//! Every other stem runs silent on its own timer and gets hard-seeked
//! back whenever it drifts past tolerance. A dedicated analysis thread
//! ticks all stems at ~60Hz and publishes snapshots for the render side.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::fft::FftContext;
use crate::audio::loader::StemLoader;
use crate::audio::output::{MainTap, Output};
use crate::audio::stem::{StemAnalysis, StemPlayer};
use crate::config::{EngineConfig, UserConfig};
use crate::error::EngineError;

/// Analysis tick rate, ~60Hz.
const ANALYSIS_INTERVAL: Duration = Duration::from_millis(16);
/// How often stems are checked against the main playhead.
const DRIFT_CHECK_INTERVAL: Duration = Duration::from_millis(100);
/// Drift past this triggers a hard seek back to the main playhead.
const DRIFT_TOLERANCE: f64 = 0.05;
/// `play` never waits on stragglers longer than this.
const PLAY_WAIT_CAP: Duration = Duration::from_secs(8);

struct Shared {
    players: Mutex<Vec<StemPlayer>>,
    tap: Arc<MainTap>,
    loader: StemLoader,
    snapshots: Mutex<HashMap<String, StemAnalysis>>,
    playing: AtomicBool,
    stop: AtomicBool,
    audible: bool,
}

impl Shared {
    fn lock_players(&self) -> MutexGuard<'_, Vec<StemPlayer>> {
        match self.players.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Main playhead in seconds: device cursor when audible, timer
    /// clock otherwise.
    fn main_position(&self, players: &[StemPlayer]) -> f64 {
        if self.audible {
            if let Some(pos) = self.tap.position_secs() {
                return pos;
            }
        }
        players.first().map_or(0.0, |p| p.position())
    }

    /// Hand buffers that finished loading to their players. Stems that
    /// arrive mid-playback join at the current main position.
    fn install_loaded(&self) {
        for (name, buffer) in self.loader.take_ready() {
            let mut players = self.lock_players();
            let main_pos = self.main_position(&players);
            let is_main = players.first().map(|p| p.name == name).unwrap_or(false);
            if is_main {
                self.tap.install(buffer.clone());
                self.tap.seek_secs(main_pos);
            }
            if let Some(player) = players.iter_mut().find(|p| p.name == name) {
                player.install(buffer);
                if self.playing.load(Ordering::Relaxed) && !player.clock.playing() {
                    player.clock.seek(main_pos);
                    player.clock.play();
                    log::info!("stem '{name}' joined at {main_pos:.2}s");
                }
            }
        }
    }
}

pub struct MultiTrackTransport {
    shared: Arc<Shared>,
    _output: Option<Output>,
    analysis_thread: Option<JoinHandle<()>>,
    disposed: bool,
}

impl MultiTrackTransport {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        if config.stems.is_empty() {
            return Err(EngineError::EmptyManifest);
        }

        let user = UserConfig::load();
        let players: Vec<StemPlayer> = config
            .stems
            .iter()
            .map(|desc| StemPlayer::pending_tuned(&desc.name, &user))
            .collect();

        let tap = Arc::new(MainTap::new());
        let output = if config.audible {
            Some(Output::open(tap.clone())?)
        } else {
            None
        };

        let loader = StemLoader::spawn(&config.stems, config.load_timeout, config.load_retries);

        let shared = Arc::new(Shared {
            players: Mutex::new(players),
            tap,
            loader,
            snapshots: Mutex::new(HashMap::new()),
            playing: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            audible: config.audible,
        });

        let analysis_thread = Some(spawn_analysis_thread(shared.clone()));

        Ok(Self {
            shared,
            _output: output,
            analysis_thread,
            disposed: false,
        })
    }

    /// Transport over pre-built players, silent. Used for synthetic
    /// sessions and tests.
    pub fn from_players(players: Vec<StemPlayer>) -> Self {
        let shared = Arc::new(Shared {
            players: Mutex::new(players),
            tap: Arc::new(MainTap::new()),
            loader: StemLoader::spawn(&[], Duration::from_secs(1), 0),
            snapshots: Mutex::new(HashMap::new()),
            playing: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            audible: false,
        });
        let analysis_thread = Some(spawn_analysis_thread(shared.clone()));
        Self {
            shared,
            _output: None,
            analysis_thread,
            disposed: false,
        }
    }

    /// Block until every stem has settled (loaded or given up). Bounded
    /// by the loader's retry budget.
    pub fn when_ready(&self) {
        if self.disposed {
            return;
        }
        self.shared.loader.wait(self.shared.loader.budget());
        self.shared.install_loaded();
    }

    /// Start playback. Waits (capped) for outstanding loads, then
    /// aligns every stem to the main playhead and starts all clocks.
    pub fn play(&mut self) {
        if self.disposed {
            return;
        }
        self.shared.loader.wait(PLAY_WAIT_CAP);
        self.shared.install_loaded();

        let mut players = self.shared.lock_players();
        let main_pos = self.shared.main_position(&players);
        for player in players.iter_mut() {
            player.clock.seek(main_pos);
            if player.ready() {
                player.clock.play();
            }
        }
        drop(players);

        self.shared.tap.set_playing(true);
        self.shared.playing.store(true, Ordering::Relaxed);
        log::info!("playback started at {main_pos:.2}s");
    }

    /// Pause all stems. Returns the position playback stopped at.
    pub fn pause(&mut self) -> f64 {
        if self.disposed {
            return 0.0;
        }
        self.shared.tap.set_playing(false);
        self.shared.playing.store(false, Ordering::Relaxed);

        let mut players = self.shared.lock_players();
        let main_pos = self.shared.main_position(&players);
        for player in players.iter_mut() {
            player.clock.pause();
            player.clock.seek(main_pos);
        }
        main_pos
    }

    /// Jump every stem to `secs`, preserving play/pause state.
    pub fn seek(&mut self, secs: f64) {
        if self.disposed {
            return;
        }
        let secs = secs.max(0.0);
        self.shared.tap.seek_secs(secs);
        let mut players = self.shared.lock_players();
        for player in players.iter_mut() {
            player.clock.seek(secs);
        }
    }

    pub fn is_playing(&self) -> bool {
        !self.disposed && self.shared.playing.load(Ordering::Relaxed)
    }

    /// Current main playhead in seconds.
    pub fn current_time(&self) -> f64 {
        if self.disposed {
            return 0.0;
        }
        let players = self.shared.lock_players();
        self.shared.main_position(&players)
    }

    /// Main stem duration; zero until it has loaded.
    pub fn duration(&self) -> f64 {
        if self.disposed {
            return 0.0;
        }
        self.shared
            .lock_players()
            .first()
            .map_or(0.0, |p| p.duration_secs())
    }

    /// Latest analysis snapshot for one stem.
    pub fn snapshot(&self, name: &str) -> Option<StemAnalysis> {
        if self.disposed {
            return None;
        }
        match self.shared.snapshots.lock() {
            Ok(g) => g.get(name).cloned(),
            Err(_) => None,
        }
    }

    /// Latest snapshots for all stems.
    pub fn snapshots(&self) -> HashMap<String, StemAnalysis> {
        if self.disposed {
            return HashMap::new();
        }
        match self.shared.snapshots.lock() {
            Ok(g) => g.clone(),
            Err(_) => HashMap::new(),
        }
    }

    /// Stop the analysis thread and the output stream. Idempotent;
    /// every call after the first (and every other method) is a no-op.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.shared.tap.set_playing(false);
        self.shared.playing.store(false, Ordering::Relaxed);
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.analysis_thread.take() {
            let _ = handle.join();
        }
        self._output = None;
        log::debug!("transport disposed");
    }
}

impl Drop for MultiTrackTransport {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn spawn_analysis_thread(shared: Arc<Shared>) -> JoinHandle<()> {
    thread::Builder::new()
        .name("stem-analysis".into())
        .spawn(move || analysis_loop(shared))
        .unwrap_or_else(|e| panic!("failed to spawn analysis thread: {e}"))
}

fn analysis_loop(shared: Arc<Shared>) {
    let mut fft = FftContext::new();
    let mut last_drift_check = Instant::now();

    while !shared.stop.load(Ordering::Relaxed) {
        shared.install_loaded();
        shared.loader.poll();

        {
            let mut players = shared.lock_players();

            if shared.playing.load(Ordering::Relaxed)
                && last_drift_check.elapsed() >= DRIFT_CHECK_INTERVAL
            {
                correct_drift(&shared, &mut players);
                last_drift_check = Instant::now();
            }

            for player in players.iter_mut() {
                player.refresh_analysis(&mut fft);
            }

            if let Ok(mut snapshots) = shared.snapshots.lock() {
                for player in players.iter() {
                    snapshots.insert(player.name.clone(), player.analysis().clone());
                }
            }
        }

        thread::sleep(ANALYSIS_INTERVAL);
    }
}

/// Hard-seek any stem whose timer clock has wandered past tolerance
/// from the main playhead. The main stem's own timer is included so it
/// tracks the device cursor when output is audible.
fn correct_drift(shared: &Shared, players: &mut [StemPlayer]) {
    let main_pos = shared.main_position(players);
    for player in players.iter_mut() {
        if !player.ready() || !player.clock.playing() {
            continue;
        }
        let drift = (player.clock.position() - main_pos).abs();
        if drift > DRIFT_TOLERANCE {
            log::debug!("stem '{}' drifted {:.0}ms, realigning", player.name, drift * 1000.0);
            player.clock.seek(main_pos);
        }
    }
}
