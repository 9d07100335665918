//! Actuator descriptors and the registry that loads and validates them.
//!
//! Grounded on `evo_control_unit::config::load_config` / `validate_machine_config`:
//! a TOML list of descriptors is parsed, each entry validated in turn, and the
//! whole load fails fast on the first invalid entry with a named id and
//! field — the same shape as `evo_common::config::ConfigError::AxisIdMismatch`.

use std::collections::HashMap;

use serde::Deserialize;

use crate::config::ConfigError;

/// An actuator's physical kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    /// Motor-time-proportional actuator (windows, curtains).
    Duration,
    /// Pure binary actuator (solenoid irrigation valves).
    Onoff,
}

/// Immutable, startup-loaded description of one actuator.
#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorDescriptor {
    /// Short symbolic name, e.g. `VenSdWin`, `Irri`.
    pub id: String,

    /// Physical kind.
    pub kind: ActuatorKind,

    /// Seconds to fully open from 0% (duration actuators only).
    #[serde(default)]
    pub full_open_sec: f64,

    /// Seconds to fully close from 100% (duration actuators only).
    #[serde(default)]
    pub full_close_sec: f64,

    /// Hard cap on a single MOVING interval; mandatory when `has_limit` is
    /// false (e.g. irrigation valves with no physical travel limit).
    #[serde(default)]
    pub max_duration_sec: Option<f64>,

    /// Whether the actuator has a physical travel limit.
    #[serde(default = "default_true")]
    pub has_limit: bool,

    /// Minimum idle interval after same-direction motion [s].
    #[serde(default)]
    pub cooling_sec: f64,

    /// Minimum idle interval after a direction reversal [s]. Must be
    /// `>= cooling_sec`.
    #[serde(default)]
    pub reversal_cooling_sec: f64,
}

fn default_true() -> bool {
    true
}

impl ActuatorDescriptor {
    /// `max(full_open_sec, full_close_sec) * 1.2`, the bound enforced by the
    /// per-actuator max-continuous watchdog.
    pub fn max_continuous_sec(&self) -> f64 {
        self.full_open_sec.max(self.full_close_sec) * 1.2
    }

    /// Validate this descriptor in isolation.
    fn validate(&self) -> Result<(), ConfigError> {
        let fail = |reason: &str| ConfigError::InvalidActuator {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.is_empty() {
            return Err(fail("id must not be empty"));
        }

        match self.kind {
            ActuatorKind::Duration => {
                if !self.full_open_sec.is_finite() || self.full_open_sec <= 0.0 {
                    return Err(fail("full_open_sec must be positive and finite"));
                }
                if !self.full_close_sec.is_finite() || self.full_close_sec <= 0.0 {
                    return Err(fail("full_close_sec must be positive and finite"));
                }
                if !self.has_limit {
                    match self.max_duration_sec {
                        Some(d) if d.is_finite() && d > 0.0 => {}
                        _ => {
                            return Err(fail(
                                "max_duration_sec is mandatory for actuators with no physical limit",
                            ));
                        }
                    }
                }
                if let Some(d) = self.max_duration_sec {
                    if !d.is_finite() || d <= 0.0 {
                        return Err(fail("max_duration_sec must be positive and finite"));
                    }
                }
                if !self.cooling_sec.is_finite() || self.cooling_sec < 0.0 {
                    return Err(fail("cooling_sec must be non-negative and finite"));
                }
                if !self.reversal_cooling_sec.is_finite() || self.reversal_cooling_sec < 0.0 {
                    return Err(fail("reversal_cooling_sec must be non-negative and finite"));
                }
                if self.reversal_cooling_sec < self.cooling_sec {
                    return Err(fail("reversal_cooling_sec must be >= cooling_sec"));
                }
            }
            ActuatorKind::Onoff => {
                if !self.cooling_sec.is_finite() || self.cooling_sec < 0.0 {
                    return Err(fail("cooling_sec must be non-negative and finite"));
                }
            }
        }

        Ok(())
    }
}

/// On-disk shape of the actuator descriptor list (a TOML array-of-tables
/// under `[[actuator]]`).
#[derive(Debug, Deserialize)]
struct ActuatorListFile {
    #[serde(rename = "actuator", default)]
    actuators: Vec<ActuatorDescriptor>,
}

/// Loaded, validated, and indexed set of actuator descriptors.
///
/// Built once at startup; descriptors live for process lifetime.
#[derive(Debug, Clone)]
pub struct ActuatorRegistry {
    by_id: HashMap<String, ActuatorDescriptor>,
}

impl ActuatorRegistry {
    /// Parse and validate a TOML document containing `[[actuator]]` entries.
    ///
    /// Fails fast on the first invalid entry or on a duplicate id. Failures
    /// here are always fatal at startup, never at runtime.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: ActuatorListFile =
            toml::from_str(source).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if file.actuators.is_empty() {
            return Err(ConfigError::NoActuatorsDefined);
        }

        let mut by_id = HashMap::with_capacity(file.actuators.len());
        for descriptor in file.actuators {
            descriptor.validate()?;
            if by_id.contains_key(&descriptor.id) {
                return Err(ConfigError::DuplicateActuatorId(descriptor.id));
            }
            by_id.insert(descriptor.id.clone(), descriptor);
        }

        Ok(Self { by_id })
    }

    /// Look up an actuator descriptor by id.
    pub fn describe(&self, id: &str) -> Option<&ActuatorDescriptor> {
        self.by_id.get(id)
    }

    /// Iterate over every registered descriptor.
    pub fn iter(&self) -> impl Iterator<Item = &ActuatorDescriptor> {
        self.by_id.values()
    }

    /// Number of registered actuators.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the registry holds no actuators.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
