use std::{fs, path::Path};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    engine::{CtcBatch, CtcEngine, CtcOptions, CtcOutput, ReferenceCtc},
    error::CtcError,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Reference,
    WarpCtc,
}

#[derive(Serialize, Deserialize, Debug)]
struct CtcYaml {
    #[serde(default)]
    blank_label: i32,
    #[serde(default = "default_num_threads")]
    num_threads: u32,
    #[serde(default)]
    engine: EngineKind,
}

fn default_num_threads() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "UPPERCASE")]
struct CtcConfigYaml {
    ctc: CtcYaml,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtcConfig {
    pub blank_label: i32,
    pub num_threads: u32,
    pub engine: EngineKind,
}

impl Default for CtcConfig {
    fn default() -> Self {
        Self {
            blank_label: 0,
            num_threads: default_num_threads(),
            engine: EngineKind::Reference,
        }
    }
}

impl CtcConfig {
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, CtcError> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml_str(&raw)?;
        info!("ctc config loaded from {}: {:?}", path.as_ref().display(), config);

        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, CtcError> {
        let yaml: CtcConfigYaml = serde_yaml::from_str(raw)?;

        if yaml.ctc.num_threads == 0 {
            return Err(CtcError::Config(String::from(
                "num_threads must be at least 1",
            )));
        }

        Ok(Self {
            blank_label: yaml.ctc.blank_label,
            num_threads: yaml.ctc.num_threads,
            engine: yaml.ctc.engine,
        })
    }

    pub fn options(&self) -> CtcOptions {
        CtcOptions {
            blank_label: self.blank_label,
            num_threads: self.num_threads,
        }
    }

    /// Instantiates the configured engine.
    pub fn engine(&self) -> Result<ConfiguredEngine, CtcError> {
        match self.engine {
            EngineKind::Reference => Ok(ConfiguredEngine::Reference(ReferenceCtc::new(
                self.options(),
            ))),
            #[cfg(feature = "warpctc")]
            EngineKind::WarpCtc => Ok(ConfiguredEngine::WarpCtc(crate::engine::WarpCtc::new(
                self.options(),
            ))),
            #[cfg(not(feature = "warpctc"))]
            EngineKind::WarpCtc => Err(CtcError::Config(String::from(
                "engine `warpctc` needs the crate built with the `warpctc` feature",
            ))),
        }
    }
}

/// An engine picked at runtime from a [`CtcConfig`].
#[derive(Clone, Copy, Debug)]
pub enum ConfiguredEngine {
    Reference(ReferenceCtc),
    #[cfg(feature = "warpctc")]
    WarpCtc(crate::engine::WarpCtc),
}

impl CtcEngine for ConfiguredEngine {
    fn options(&self) -> CtcOptions {
        match self {
            ConfiguredEngine::Reference(engine) => engine.options(),
            #[cfg(feature = "warpctc")]
            ConfiguredEngine::WarpCtc(engine) => engine.options(),
        }
    }

    fn compute(&self, batch: &CtcBatch<'_>, want_gradients: bool) -> Result<CtcOutput, CtcError> {
        match self {
            ConfiguredEngine::Reference(engine) => engine.compute(batch, want_gradients),
            #[cfg(feature = "warpctc")]
            ConfiguredEngine::WarpCtc(engine) => engine.compute(batch, want_gradients),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_yaml_str() {
        let config = CtcConfig::from_yaml_str(
            "CTC:\n  blank_label: 3\n  num_threads: 4\n  engine: reference\n",
        )
        .unwrap();

        assert_eq!(
            config,
            CtcConfig {
                blank_label: 3,
                num_threads: 4,
                engine: EngineKind::Reference,
            }
        );
        assert_eq!(
            config.options(),
            CtcOptions {
                blank_label: 3,
                num_threads: 4,
            }
        );
        assert_eq!(config.engine().unwrap().options().blank_label, 3);
    }

    #[test]
    fn test_defaults() {
        let config = CtcConfig::from_yaml_str("CTC: {}\n").unwrap();

        assert_eq!(config, CtcConfig::default());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            CtcConfig::from_yaml_str("CTC:\n  num_threads: 0\n"),
            Err(CtcError::Config(_))
        ));
        assert!(matches!(
            CtcConfig::from_yaml_str("CTC:\n  engine: cudnn\n"),
            Err(CtcError::Yaml(_))
        ));
        assert!(matches!(
            CtcConfig::from_yaml("./does-not-exist.yaml"),
            Err(CtcError::Io(_))
        ));
    }

    #[cfg(not(feature = "warpctc"))]
    #[test]
    fn test_warpctc_needs_feature() {
        let config = CtcConfig::from_yaml_str("CTC:\n  engine: warpctc\n").unwrap();

        assert!(matches!(config.engine(), Err(CtcError::Config(_))));
    }
}
