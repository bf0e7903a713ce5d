//! Extracted contract ABI.
//!
//! The ABI is the language-neutral description of a contract's callable
//! surface: package name, exported functions with their typed inputs and
//! outputs, the import list, and the events inferred from log calls. It
//! is produced once at deploy time and persisted as JSON next to the
//! compiled module.

use serde::{Deserialize, Serialize};

/// One named, typed parameter or result. Unnamed positions carry an
/// empty `name`. `type_name` is the deterministic textual form produced
/// by the extractor's type printer (`*T`, `[]T`, `[4]T`, `pkg.T`,
/// `map[K]V`, `interface{}`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

impl AbiParam {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// An exported top-level function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiFunction {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default)]
    pub outputs: Vec<AbiParam>,
}

impl AbiFunction {
    /// True when the first declared input is the ambient context. The
    /// dispatch shim supplies that argument itself and excludes it from
    /// the parameter record.
    pub fn takes_context(&self) -> bool {
        self.inputs
            .first()
            .map(|p| p.type_name == "Context" || p.type_name.ends_with(".Context"))
            .unwrap_or(false)
    }

    /// Inputs the caller actually provides (context excluded).
    pub fn caller_inputs(&self) -> &[AbiParam] {
        if self.takes_context() {
            &self.inputs[1..]
        } else {
            &self.inputs
        }
    }
}

/// A top-level import: path plus the local alias, empty when the
/// package's own name is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiImport {
    pub path: String,
    #[serde(default)]
    pub alias: String,
}

/// An event inferred from a `Log` call. Parameter types are blank:
/// events are dynamically typed at emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiEvent {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
}

/// The full extracted ABI of one contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abi {
    pub package: String,
    #[serde(default)]
    pub functions: Vec<AbiFunction>,
    #[serde(default)]
    pub imports: Vec<AbiImport>,
    #[serde(default)]
    pub events: Vec<AbiEvent>,
}

impl Abi {
    pub fn function(&self, name: &str) -> Option<&AbiFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn has_exports(&self) -> bool {
        !self.functions.is_empty()
    }
}
