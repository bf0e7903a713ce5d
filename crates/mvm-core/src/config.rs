//! Engine configuration, loadable from TOML.
//!
//! Every tunable of the pipeline in one place: screening bounds, the
//! import allow-list, the gas schedule, and the toolchain binaries.
//! Absent keys keep their defaults, so a config file only names what
//! it changes.

use serde::{Deserialize, Serialize};

use crate::gas::GasSchedule;
use crate::{CORE_IMPORT_PATH, DEFAULT_GAS_LIMIT, MAX_SOURCE_SIZE};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Screening: maximum accepted source size in bytes.
    pub max_source_size: usize,
    /// Screening: import allow-list, matched by prefix.
    pub allowed_imports: Vec<String>,
    /// Gas limit applied when a caller passes none.
    pub default_gas_limit: u64,
    pub gas: GasSchedule,
    pub toolchain: ToolchainSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSection {
    /// Dependency resolver binary.
    pub go: String,
    /// WASM build binary.
    pub build_tool: String,
    /// Local directory substituted for the SDK module; empty disables
    /// the replacement (production resolves from the network).
    pub sdk_replace: String,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_source_size: MAX_SOURCE_SIZE,
            allowed_imports: vec![CORE_IMPORT_PATH.to_string()],
            default_gas_limit: DEFAULT_GAS_LIMIT,
            gas: GasSchedule::default(),
            toolchain: ToolchainSection::default(),
        }
    }
}

impl Default for ToolchainSection {
    fn default() -> Self {
        Self {
            go: "go".to_string(),
            build_tool: "tinygo".to_string(),
            sdk_replace: String::new(),
        }
    }
}

impl VmConfig {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_the_default() {
        let config = VmConfig::from_toml("").unwrap();
        assert_eq!(config, VmConfig::default());
        assert_eq!(config.allowed_imports, vec![CORE_IMPORT_PATH.to_string()]);
    }

    #[test]
    fn partial_config_overrides_named_keys_only() {
        let config = VmConfig::from_toml(
            r#"
max_source_size = 4096

[gas]
field_write = 2000

[toolchain]
build_tool = "tinygo-dev"
"#,
        )
        .unwrap();
        assert_eq!(config.max_source_size, 4096);
        assert_eq!(config.gas.field_write, 2000);
        assert_eq!(config.gas.scalar_read, 10);
        assert_eq!(config.toolchain.build_tool, "tinygo-dev");
        assert_eq!(config.toolchain.go, "go");
        assert_eq!(config.default_gas_limit, DEFAULT_GAS_LIMIT);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(VmConfig::from_toml("max_source_size = \"lots\"").is_err());
    }
}
