//! Inlining configuration
//!
//! The knobs are read once per compilation, either built in code or
//! loaded from a TOML file:
//!
//! ```toml
//! MaxNodesInTrivialLeafMethod = 40
//! MaxInvokesInTrivialMethod = 1
//! MaxNodesInTrivialMethod = 20
//! MaxNodesAfterTrivialInlining = 10000
//!
//! t1 = 5.0
//! t2 = 1.0
//! size_fallback_ceiling = 50000
//! threads = 8
//! ```
//!
//! Missing keys take their default. [`InliningConfig::validate`] must pass
//! before any scheduling starts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Configuration failure, reported before scheduling starts.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The TOML is malformed or has wrongly typed keys
    Toml(toml::de::Error),
    /// A single knob is out of range
    Invalid { knob: &'static str, reason: String },
    /// Two knobs contradict each other
    Conflict {
        knob: &'static str,
        other: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Cannot read config {}: {}", path.display(), source)
            }
            Self::Toml(e) => write!(f, "Invalid config TOML: {}", e),
            Self::Invalid { knob, reason } => write!(f, "Invalid value for {}: {}", knob, reason),
            Self::Conflict {
                knob,
                other,
                reason,
            } => write!(f, "Conflicting thresholds {} and {}: {}", knob, other, reason),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Toml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Toml(e)
    }
}

/// Thresholds and limits for both inlining phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InliningConfig {
    /// Largest weighted cost of a call-free method that still counts as trivial.
    #[serde(rename = "MaxNodesInTrivialLeafMethod")]
    pub max_nodes_in_trivial_leaf_method: u64,

    /// Most calls a non-leaf method may contain and still be trivial.
    #[serde(rename = "MaxInvokesInTrivialMethod")]
    pub max_invokes_in_trivial_method: usize,

    /// Largest weighted cost of a non-leaf trivial method.
    #[serde(rename = "MaxNodesInTrivialMethod")]
    pub max_nodes_in_trivial_method: u64,

    /// Live node count above which a unit stops trivial inlining.
    #[serde(rename = "MaxNodesAfterTrivialInlining")]
    pub max_nodes_after_trivial_inlining: usize,

    /// Run the trivial phase at all (always-inline callees are spliced either way).
    pub aot_trivial_inline: bool,

    /// Constant added to the benefit numerator.
    pub offset: f64,

    /// Base of the acceptance threshold.
    pub t1: f64,

    /// Scale of the exponential cost term in the threshold.
    pub t2: f64,

    /// Divisor applied to the cost of callees without calls.
    pub leaf_cost_divisor: f64,

    /// Graph cost after which a unit stops non-trivial inlining for good.
    pub size_fallback_ceiling: u64,

    /// Upper bound on trivial rounds.
    pub max_trivial_rounds: u32,

    /// Upper bound on non-trivial rounds; exceeding it is an error.
    pub max_non_trivial_rounds: u32,

    /// Worker threads; 0 means one per CPU.
    pub threads: usize,
}

impl Default for InliningConfig {
    fn default() -> Self {
        Self {
            max_nodes_in_trivial_leaf_method: 40,
            max_invokes_in_trivial_method: 1,
            max_nodes_in_trivial_method: 20,
            max_nodes_after_trivial_inlining: 10_000,
            aot_trivial_inline: true,
            offset: 1.0,
            t1: 5.0,
            t2: 1.0,
            leaf_cost_divisor: 4.0,
            size_fallback_ceiling: 50_000,
            max_trivial_rounds: 64,
            max_non_trivial_rounds: 10_000,
            threads: 0,
        }
    }
}

impl InliningConfig {
    /// Small trivial thresholds and a steep threshold curve.
    pub fn conservative() -> Self {
        Self {
            max_nodes_in_trivial_leaf_method: 20,
            max_invokes_in_trivial_method: 0,
            max_nodes_in_trivial_method: 10,
            t1: 10.0,
            size_fallback_ceiling: 20_000,
            ..Default::default()
        }
    }

    /// Larger trivial thresholds and a flat threshold curve.
    pub fn aggressive() -> Self {
        Self {
            max_nodes_in_trivial_leaf_method: 80,
            max_invokes_in_trivial_method: 2,
            max_nodes_in_trivial_method: 40,
            t1: 2.0,
            t2: 4.0,
            size_fallback_ceiling: 100_000,
            ..Default::default()
        }
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Worker count with 0 resolved to the CPU count.
    pub fn worker_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(knob: &'static str, value: f64) -> Result<(), ConfigError> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    knob,
                    reason: format!("must be a positive number, got {}", value),
                })
            }
        }

        positive("t1", self.t1)?;
        positive("t2", self.t2)?;
        if !(self.offset.is_finite() && self.offset >= 0.0) {
            return Err(ConfigError::Invalid {
                knob: "offset",
                reason: format!("must be non-negative, got {}", self.offset),
            });
        }
        if !(self.leaf_cost_divisor.is_finite() && self.leaf_cost_divisor >= 1.0) {
            return Err(ConfigError::Invalid {
                knob: "leaf_cost_divisor",
                reason: format!("must be at least 1, got {}", self.leaf_cost_divisor),
            });
        }
        if self.size_fallback_ceiling == 0 {
            return Err(ConfigError::Invalid {
                knob: "size_fallback_ceiling",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.max_trivial_rounds == 0 || self.max_non_trivial_rounds == 0 {
            return Err(ConfigError::Invalid {
                knob: "max_*_rounds",
                reason: "round limits must be non-zero".to_string(),
            });
        }
        if self.max_nodes_in_trivial_method > self.max_nodes_in_trivial_leaf_method {
            return Err(ConfigError::Conflict {
                knob: "MaxNodesInTrivialMethod",
                other: "MaxNodesInTrivialLeafMethod",
                reason: format!(
                    "a method with calls may not be allowed more nodes ({}) than a leaf ({})",
                    self.max_nodes_in_trivial_method, self.max_nodes_in_trivial_leaf_method
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = InliningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.t1, 5.0);
        assert_eq!(config.t2, 1.0);
        assert_eq!(config.offset, 1.0);
        assert_eq!(config.size_fallback_ceiling, 50_000);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(InliningConfig::conservative().validate().is_ok());
        assert!(InliningConfig::aggressive().validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = InliningConfig::parse(
            r#"
            MaxNodesInTrivialLeafMethod = 50
            t1 = 3.5
            threads = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.max_nodes_in_trivial_leaf_method, 50);
        assert_eq!(config.t1, 3.5);
        assert_eq!(config.threads, 2);
        assert_eq!(config.worker_threads(), 2);
        assert_eq!(config.max_invokes_in_trivial_method, 1);
    }

    #[test]
    fn test_parse_unknown_key_rejected() {
        let err = InliningConfig::parse("MaxNodes = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_conflicting_thresholds() {
        let config = InliningConfig {
            max_nodes_in_trivial_leaf_method: 10,
            max_nodes_in_trivial_method: 30,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Conflict { .. }));
        assert!(err.to_string().contains("MaxNodesInTrivialMethod"));
    }

    #[test]
    fn test_non_positive_t2_rejected() {
        let config = InliningConfig {
            t2: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { knob: "t2", .. })
        ));
    }

    #[test]
    fn test_zero_threads_uses_cpu_count() {
        let config = InliningConfig::default();
        assert_eq!(config.worker_threads(), num_cpus::get());
    }

    #[test]
    fn test_load_missing_file() {
        let err = InliningConfig::load(Path::new("/nonexistent/aotinline.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
