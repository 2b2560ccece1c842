//! Deployment configuration for script execution units.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration handed to a verticle when it is deployed.
///
/// `main` is the script entry point; `config` is an arbitrary JSON document
/// the script can read back through the facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub main: PathBuf,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default = "default_instances")]
    pub instances: usize,
}

fn default_instances() -> usize {
    1
}

impl DeploymentConfig {
    pub fn new(main: impl Into<PathBuf>) -> Self {
        Self {
            main: main.into(),
            config: serde_json::Value::Null,
            instances: 1,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_instances(mut self, instances: usize) -> Self {
        self.instances = instances.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_fields_missing() {
        let cfg: DeploymentConfig = serde_json::from_str(r#"{"main": "app.php"}"#).unwrap();
        assert_eq!(cfg.main, PathBuf::from("app.php"));
        assert!(cfg.config.is_null());
        assert_eq!(cfg.instances, 1);
    }

    #[test]
    fn instances_are_clamped_to_one() {
        let cfg = DeploymentConfig::new("app.php").with_instances(0);
        assert_eq!(cfg.instances, 1);
    }
}
