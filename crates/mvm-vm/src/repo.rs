//! Code repository: persisted contract artifacts.
//!
//! One directory, three files per contract, lowercase-hex addresses:
//!
//! ```text
//! <addr>.source   screened source
//! <addr>.wasm     compiled module
//! <addr>.abi      extracted ABI as JSON
//! ```
//!
//! Artifacts are read-only after deploy; a redeploy of identical
//! source is a no-op because addresses are content-derived.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use mvm_core::{Abi, Address, Hash, RepoError, MAX_WASM_SIZE};
use tracing::debug;

pub struct CodeRepository {
    root: PathBuf,
}

impl CodeRepository {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RepoError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, address: &Address, ext: &str) -> PathBuf {
        self.root.join(format!("{address}.{ext}"))
    }

    pub fn has_contract(&self, address: &Address) -> bool {
        self.path(address, "source").exists()
    }

    /// Persist a full contract record. Cleans up partial writes on
    /// failure so a broken deploy leaves nothing behind.
    pub fn store(
        &self,
        address: &Address,
        source: &[u8],
        wasm: Option<&[u8]>,
        abi: &Abi,
    ) -> Result<(), RepoError> {
        let result = self.store_inner(address, source, wasm, abi);
        if result.is_err() {
            self.remove(address);
        }
        result
    }

    fn store_inner(
        &self,
        address: &Address,
        source: &[u8],
        wasm: Option<&[u8]>,
        abi: &Abi,
    ) -> Result<(), RepoError> {
        std::fs::write(self.path(address, "source"), source)?;
        if let Some(wasm) = wasm {
            std::fs::write(self.path(address, "wasm"), wasm)?;
        }
        let abi_json = serde_json::to_vec_pretty(abi).map_err(|e| RepoError::Corrupt {
            address: *address,
            reason: format!("abi encode: {e}"),
        })?;
        std::fs::write(self.path(address, "abi"), abi_json)?;
        debug!(%address, wasm = wasm.is_some(), "contract persisted");
        Ok(())
    }

    /// Best-effort removal of every artifact of one contract.
    pub fn remove(&self, address: &Address) {
        for ext in ["source", "wasm", "abi"] {
            let _ = std::fs::remove_file(self.path(address, ext));
        }
    }

    pub fn load_source(&self, address: &Address) -> Result<Vec<u8>, RepoError> {
        self.read(address, "source")
    }

    pub fn load_wasm(&self, address: &Address) -> Result<Vec<u8>, RepoError> {
        let wasm = self.read(address, "wasm")?;
        if wasm.len() < 4 || &wasm[..4] != b"\0asm" {
            return Err(RepoError::Corrupt {
                address: *address,
                reason: "missing WASM magic header".into(),
            });
        }
        if wasm.len() > MAX_WASM_SIZE {
            return Err(RepoError::Corrupt {
                address: *address,
                reason: format!("artifact too large: {} bytes", wasm.len()),
            });
        }
        Ok(wasm)
    }

    pub fn load_abi(&self, address: &Address) -> Result<Abi, RepoError> {
        let bytes = self.read(address, "abi")?;
        serde_json::from_slice(&bytes).map_err(|e| RepoError::Corrupt {
            address: *address,
            reason: format!("abi decode: {e}"),
        })
    }

    /// blake3 of the compiled module.
    pub fn code_hash(&self, address: &Address) -> Result<Hash, RepoError> {
        let wasm = self.load_wasm(address)?;
        Ok(Hash::from_bytes(*blake3::hash(&wasm).as_bytes()))
    }

    /// Addresses of every deployed contract, in name order.
    pub fn list(&self) -> Result<Vec<Address>, RepoError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".source") {
                if let Ok(address) = Address::from_str(stem) {
                    out.push(address);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn read(&self, address: &Address, ext: &str) -> Result<Vec<u8>, RepoError> {
        let path = self.path(address, ext);
        if !path.exists() {
            return Err(RepoError::NotFound { address: *address });
        }
        Ok(std::fs::read(path)?)
    }
}
