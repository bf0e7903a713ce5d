//! Toolchain-backed compile probe.
//!
//! Final rule of the screening policy: the submitted source, staged
//! alone with a synthesized manifest, must build against the allowed
//! dependencies. Runs the resolver's plain build (not the WASM target)
//! because the probe only answers "does this compile".

use mvm_lang::CompileProbe;
use tempfile::TempDir;
use tracing::debug;

use crate::driver::{CompilerDriver, ToolchainConfig};

pub struct ToolchainProbe {
    driver: CompilerDriver,
}

impl ToolchainProbe {
    pub fn new(config: ToolchainConfig) -> Self {
        Self {
            driver: CompilerDriver::new(config),
        }
    }
}

impl CompileProbe for ToolchainProbe {
    fn probe(&self, source: &str) -> Result<(), String> {
        let workspace = TempDir::new().map_err(|e| format!("staging probe workspace: {e}"))?;
        let dir = workspace.path();

        std::fs::write(dir.join("contract.go"), source)
            .map_err(|e| format!("staging probe source: {e}"))?;
        self.driver
            .write_manifest(dir)
            .map_err(|e| e.to_string())?;

        let go = self.driver.config().go.clone();
        self.driver
            .run_tool(&go, &["mod", "tidy"], dir)
            .map_err(|e| e.to_string())?;
        self.driver
            .run_tool(&go, &["build", "./..."], dir)
            .map_err(|e| e.to_string())?;

        debug!("compile probe passed");
        Ok(())
    }
}
