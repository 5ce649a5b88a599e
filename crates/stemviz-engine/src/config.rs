//! Engine configuration.
//!
//! Two layers: `EngineConfig` is what the host passes to
//! [`crate::VisualEngine::new`] (stem manifest, role mapping, output
//! policy), and `UserConfig` is the optional `~/.stemviz.toml` with
//! detector tuning overrides. Every user field is optional; accessors
//! supply the defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_TEMPLATE: &str = r#"# stemviz configuration file

# =============================================================================
# Percussion detection tuning
# =============================================================================

# Spectral-flux threshold per detector (higher = less sensitive)
# kick_flux_threshold = 0.025
# snare_flux_threshold = 0.02
# hihat_flux_threshold = 0.015

# Energy-above-rolling-average ratio required to fire
# energy_ratio = 1.4

# =============================================================================
# Stem loading
# =============================================================================

# Per-attempt load timeout in seconds (default: 10)
# load_timeout_secs = 10

# Extra attempts after the first failure (default: 2)
# load_retries = 2
"#;

/// One named audio track. Index 0 of the manifest is the audible main stem.
#[derive(Clone, Debug)]
pub struct StemDesc {
    pub name: String,
    pub path: PathBuf,
}

/// Which stem drives which visual subsystem.
///
/// Names refer to entries in the stem manifest; a name that matches no
/// loaded stem simply contributes zero energy.
#[derive(Clone, Debug)]
pub struct StemRoles {
    /// Drives particle count, orbit radius and size factor.
    pub drive: String,
    /// Drives the core body pulse and the vocal overlay window.
    pub pulse: String,
    /// Drives vertical particle jitter.
    pub jitter: String,
    /// Drives the smoke impulse/recolor on the core body.
    pub modifier: String,
    /// Bass reference for camera shake and particle color.
    pub bass: String,
    /// The four stems compared for the "loudest stem" camera heuristics.
    pub candidates: [String; 4],
}

impl StemRoles {
    /// Derive a sensible mapping from a manifest: main pulses the core,
    /// later stems take the remaining roles in order.
    pub fn from_manifest(stems: &[StemDesc]) -> Self {
        let name = |i: usize| -> String {
            stems
                .get(i.min(stems.len().saturating_sub(1)))
                .map(|s| s.name.clone())
                .unwrap_or_default()
        };
        Self {
            pulse: name(0),
            bass: name(1),
            drive: name(2),
            jitter: name(3),
            modifier: name(4),
            candidates: [name(0), name(1), name(2), name(3)],
        }
    }
}

/// Host-supplied engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Stem manifest; index 0 is the audible main stem.
    pub stems: Vec<StemDesc>,
    /// Role mapping for the scene subsystems.
    pub roles: StemRoles,
    /// Optional replacement mesh for the core body.
    pub model_path: Option<PathBuf>,
    /// When false the transport never opens an output device and runs
    /// purely on its timer clock (headless / test mode).
    pub audible: bool,
    /// Per-attempt stem load timeout.
    pub load_timeout: Duration,
    /// Extra attempts after the first failure.
    pub load_retries: u32,
}

impl EngineConfig {
    pub fn new(stems: Vec<StemDesc>) -> Self {
        let roles = StemRoles::from_manifest(&stems);
        let user = UserConfig::load();
        Self {
            stems,
            roles,
            model_path: None,
            audible: true,
            load_timeout: Duration::from_secs(user.load_timeout_secs()),
            load_retries: user.load_retries(),
        }
    }

    /// Headless variant: no output device, same pipeline otherwise.
    pub fn silent(stems: Vec<StemDesc>) -> Self {
        Self {
            audible: false,
            ..Self::new(stems)
        }
    }
}

/// User preferences from `~/.stemviz.toml`.
#[derive(Serialize, Deserialize, Default)]
pub struct UserConfig {
    pub kick_flux_threshold: Option<f32>,
    pub snare_flux_threshold: Option<f32>,
    pub hihat_flux_threshold: Option<f32>,
    pub energy_ratio: Option<f32>,
    pub load_timeout_secs: Option<u64>,
    pub load_retries: Option<u32>,
}

impl UserConfig {
    fn path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".stemviz.toml"))
    }

    pub fn load() -> Self {
        let path = match Self::path() {
            Some(p) => p,
            None => return Self::default(),
        };

        // Write a commented template on first run
        if !path.exists() {
            let _ = fs::write(&path, CONFIG_TEMPLATE);
        }

        fs::read_to_string(&path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn kick_flux_threshold(&self) -> f32 {
        self.kick_flux_threshold.unwrap_or(0.025)
    }
    pub fn snare_flux_threshold(&self) -> f32 {
        self.snare_flux_threshold.unwrap_or(0.02)
    }
    pub fn hihat_flux_threshold(&self) -> f32 {
        self.hihat_flux_threshold.unwrap_or(0.015)
    }
    pub fn energy_ratio(&self) -> f32 {
        self.energy_ratio.unwrap_or(1.4)
    }
    pub fn load_timeout_secs(&self) -> u64 {
        self.load_timeout_secs.unwrap_or(10)
    }
    pub fn load_retries(&self) -> u32 {
        self.load_retries.unwrap_or(2)
    }
}
