//! Toolchain driver.

use std::path::{Path, PathBuf};
use std::process::Command;

use mvm_core::{CompileError, MAX_WASM_SIZE};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::BRIDGE_TEMPLATE;

/// Module path of the guest SDK; the bridge and contracts import
/// `<module>/core`.
pub const SDK_MODULE: &str = "github.com/meridian-net/vm";

/// How to reach the external toolchain.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    /// Dependency resolver binary.
    pub go: String,
    /// WASM build binary.
    pub build_tool: String,
    /// Local directory substituted for the SDK module. Development
    /// builds point this at the repository's `sdk/`; production
    /// resolves the module from the network and leaves it unset.
    pub sdk_replace: Option<PathBuf>,
    /// Keep the scratch workspace for inspection instead of deleting
    /// it with the TempDir.
    pub keep_workspace: bool,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            go: "go".to_string(),
            build_tool: "tinygo".to_string(),
            sdk_replace: None,
            keep_workspace: false,
        }
    }
}

/// Seam between the engine and the toolchain. The production
/// implementation is [`CompilerDriver`]; tests substitute a stub that
/// returns a prebuilt module.
pub trait ContractCompiler {
    /// Compile screened source + generated dispatch into WASM bytes.
    fn compile(&self, source: &str, dispatch: &str) -> Result<Vec<u8>, CompileError>;
}

pub struct CompilerDriver {
    config: ToolchainConfig,
}

impl CompilerDriver {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// Write the module manifest for a staged workspace.
    pub(crate) fn write_manifest(&self, dir: &Path) -> Result<(), CompileError> {
        let mut manifest = format!(
            "module contract\n\ngo 1.21\n\nrequire {SDK_MODULE} v0.0.0\n"
        );
        if let Some(replace) = &self.config.sdk_replace {
            manifest.push_str(&format!(
                "\nreplace {SDK_MODULE} => {}\n",
                replace.display()
            ));
        }
        std::fs::write(dir.join("go.mod"), manifest)?;
        Ok(())
    }

    pub(crate) fn run_tool(
        &self,
        tool: &str,
        args: &[&str],
        dir: &Path,
    ) -> Result<(), CompileError> {
        debug!(tool, ?args, dir = %dir.display(), "invoking toolchain");
        let output = Command::new(tool)
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|source| CompileError::ToolMissing {
                tool: tool.to_string(),
                source,
            })?;
        if output.status.success() {
            return Ok(());
        }
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(CompileError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.code().unwrap_or(-1),
            output: combined,
        })
    }

    fn stage(&self) -> Result<TempDir, CompileError> {
        let dir = TempDir::new()?;
        Ok(dir)
    }
}

impl ContractCompiler for CompilerDriver {
    fn compile(&self, source: &str, dispatch: &str) -> Result<Vec<u8>, CompileError> {
        let workspace = self.stage()?;
        let dir = workspace.path();

        std::fs::write(dir.join("contract.go"), rewrite_package(source, "main"))?;
        std::fs::write(dir.join("dispatch.go"), rewrite_package(dispatch, "main"))?;
        std::fs::write(dir.join("bridge.go"), BRIDGE_TEMPLATE)?;
        self.write_manifest(dir)?;

        self.run_tool(&self.config.go, &["mod", "tidy"], dir)?;
        self.run_tool(
            &self.config.build_tool,
            &[
                "build",
                "-o",
                "contract.wasm",
                "-target",
                "wasi",
                "-opt",
                "z",
                "-no-debug",
                ".",
            ],
            dir,
        )?;

        let artifact = std::fs::read(dir.join("contract.wasm"))?;
        if artifact.len() < 4 || &artifact[..4] != b"\0asm" {
            return Err(CompileError::BadArtifact);
        }
        if artifact.len() > MAX_WASM_SIZE {
            return Err(CompileError::ArtifactTooLarge {
                size: artifact.len(),
                max: MAX_WASM_SIZE,
            });
        }

        if self.config.keep_workspace {
            let kept = workspace.into_path();
            warn!(dir = %kept.display(), "keeping scratch workspace");
        }
        Ok(artifact)
    }
}

/// Rewrite the package clause to `name`, leaving everything else
/// byte-identical. Comment-aware: the clause is the first code line of
/// a screened file, so the scan only has to skip leading comments.
pub fn rewrite_package(source: &str, name: &str) -> String {
    let mut out = String::with_capacity(source.len() + 8);
    let mut in_block_comment = false;
    let mut rewritten = false;

    for line in source.split_inclusive('\n') {
        if rewritten {
            out.push_str(line);
            continue;
        }
        let trimmed = line.trim_start();
        if in_block_comment {
            out.push_str(line);
            if trimmed.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }
        if trimmed.starts_with("//") || trimmed.is_empty() {
            out.push_str(line);
            continue;
        }
        if trimmed.starts_with("/*") && !trimmed.contains("*/") {
            in_block_comment = true;
            out.push_str(line);
            continue;
        }
        if trimmed.strip_prefix("package ").is_some() {
            let newline = if line.ends_with('\n') { "\n" } else { "" };
            out.push_str(&format!("package {name}{newline}"));
            rewritten = true;
            continue;
        }
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_package_clause_only() {
        let src = "// counter contract\npackage counter\n\nfunc F() {}\n";
        let out = rewrite_package(src, "main");
        assert!(out.starts_with("// counter contract\npackage main\n"));
        assert!(out.contains("func F() {}"));
        // only one package clause remains
        assert_eq!(out.matches("package ").count(), 1);
    }

    #[test]
    fn rewrite_skips_block_comments() {
        let src = "/*\n package note in prose\n*/\npackage counter\nfunc F() {}\n";
        let out = rewrite_package(src, "main");
        assert!(out.contains(" package note in prose"));
        assert!(out.contains("\npackage main\n"));
        assert!(!out.contains("package counter"));
    }

    #[test]
    fn rewrite_preserves_body_mentions_of_package() {
        let src = "package p\nvar s = \"package p\"\n";
        let out = rewrite_package(src, "main");
        assert!(out.contains("var s = \"package p\""));
    }

    #[test]
    fn manifest_includes_replace_only_when_configured() {
        let driver = CompilerDriver::new(ToolchainConfig::default());
        let dir = tempfile::tempdir().unwrap();
        driver.write_manifest(dir.path()).unwrap();
        let manifest = std::fs::read_to_string(dir.path().join("go.mod")).unwrap();
        assert!(manifest.contains("module contract"));
        assert!(manifest.contains("require github.com/meridian-net/vm v0.0.0"));
        assert!(!manifest.contains("replace"));

        let driver = CompilerDriver::new(ToolchainConfig {
            sdk_replace: Some(PathBuf::from("../sdk")),
            ..Default::default()
        });
        driver.write_manifest(dir.path()).unwrap();
        let manifest = std::fs::read_to_string(dir.path().join("go.mod")).unwrap();
        assert!(manifest.contains("replace github.com/meridian-net/vm => ../sdk"));
    }

    #[test]
    fn missing_tool_is_reported_as_such() {
        let driver = CompilerDriver::new(ToolchainConfig {
            go: "definitely-not-a-real-binary-mvm".to_string(),
            ..Default::default()
        });
        let err = driver
            .compile("package p\nfunc F() {}\n", "package p\n")
            .unwrap_err();
        assert!(matches!(err, CompileError::ToolMissing { .. }));
    }

    #[test]
    fn bridge_template_is_embedded_and_shaped() {
        assert!(BRIDGE_TEMPLATE.contains("package main"));
        assert!(BRIDGE_TEMPLATE.contains("handle_contract_call"));
        assert!(BRIDGE_TEMPLATE.contains("get_buffer_address"));
        assert!(BRIDGE_TEMPLATE.contains("call_host_set"));
        assert!(BRIDGE_TEMPLATE.contains("call_host_get_buffer"));
        assert!(BRIDGE_TEMPLATE.contains("registerHandler"));
    }
}
