//! Error taxonomy for the whole pipeline.
//!
//! Each stage has its own enum with one variant per user-routable
//! failure kind; `VmError` is the umbrella the engine returns. The
//! bridge maps a subset of these onto the negative i32 categories that
//! cross the host/guest boundary (see [`FaultCategory`]).

use thiserror::Error;

use crate::types::{Address, ObjectId};

/// Negative status categories of the bridge wire. Stable across
/// versions: the guest hard-codes these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCategory {
    FunctionNotFound,
    InvalidParams,
    ExecutionError,
    Panic,
    OutOfGas,
    DepthExceeded,
    BufferOverflow,
}

impl FaultCategory {
    pub const fn code(self) -> i32 {
        match self {
            FaultCategory::FunctionNotFound => -1,
            FaultCategory::InvalidParams => -2,
            FaultCategory::ExecutionError => -3,
            FaultCategory::Panic => -4,
            FaultCategory::OutOfGas => -5,
            FaultCategory::DepthExceeded => -6,
            FaultCategory::BufferOverflow => -7,
        }
    }

    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(FaultCategory::FunctionNotFound),
            -2 => Some(FaultCategory::InvalidParams),
            -3 => Some(FaultCategory::ExecutionError),
            -4 => Some(FaultCategory::Panic),
            -5 => Some(FaultCategory::OutOfGas),
            -6 => Some(FaultCategory::DepthExceeded),
            -7 => Some(FaultCategory::BufferOverflow),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            FaultCategory::FunctionNotFound => "function not found",
            FaultCategory::InvalidParams => "invalid params",
            FaultCategory::ExecutionError => "execution error",
            FaultCategory::Panic => "guest panic",
            FaultCategory::OutOfGas => "out of gas",
            FaultCategory::DepthExceeded => "call depth exceeded",
            FaultCategory::BufferOverflow => "shared buffer overflow",
        }
    }
}

/// Rejections produced by the source screener. Deploy fails with no
/// side effects when any of these surface.
#[derive(Debug, Error)]
pub enum ScreeningError {
    #[error("source too large: {size} bytes (max {max})")]
    SizeExceeded { size: usize, max: usize },

    #[error("parse failed at line {line}: {message}")]
    ParseFailed { line: u32, message: String },

    #[error("disallowed import {path:?}")]
    DisallowedImport { path: String },

    #[error("restricted construct at line {line}: {construct}")]
    RestrictedConstruct { line: u32, construct: &'static str },

    #[error("restricted comment directive at line {line}: {directive:?}")]
    RestrictedCommentDirective { line: u32, directive: String },

    #[error("no exported function in contract")]
    NoExportedFunction,

    #[error("compile probe failed:\n{output}")]
    CompileProbeFailed { output: String },
}

/// Source parsed but an ABI could not be produced from it.
#[derive(Debug, Error)]
#[error("ABI extraction failed: {0}")]
pub struct AbiError(pub String);

/// External toolchain failure, with combined captured output.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("toolchain {tool:?} not invocable: {source}")]
    ToolMissing {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}:\n{output}")]
    ToolFailed {
        tool: String,
        status: i32,
        output: String,
    },

    #[error("staging workspace: {0}")]
    Staging(#[from] std::io::Error),

    #[error("artifact is not a WASM module")]
    BadArtifact,

    #[error("artifact too large: {size} bytes (max {max})")]
    ArtifactTooLarge { size: usize, max: usize },
}

/// I/O against persisted artifacts.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("contract {address} not found in repository")]
    NotFound { address: Address },

    #[error("repository io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt artifact for {address}: {reason}")]
    Corrupt { address: Address, reason: String },
}

/// Failures inside one WASM invocation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("module load failed: {0}")]
    ModuleLoadFailed(String),

    #[error("instantiation failed: {0}")]
    InstantiationFailed(String),

    #[error("missing export {name:?}")]
    MissingExport { name: String },

    #[error("invalid guest pointer: offset {offset}, len {len}, memory {memory}")]
    InvalidPointer { offset: u64, len: u64, memory: u64 },

    #[error("gas exhausted (limit {limit})")]
    GasExhausted { limit: u64 },

    #[error("call depth exceeded (max {max})")]
    CallDepthExceeded { max: u32 },

    #[error("guest panic: {message}")]
    GuestPanic { message: String },

    #[error("guest returned {}", .0.as_str())]
    GuestFault(FaultCategory),
}

/// State-service failures surfaced through the bridge as negative
/// statuses, or through the engine directly.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("insufficient funds: {from} has {balance}, needs {amount}")]
    InsufficientFunds {
        from: Address,
        balance: u64,
        amount: u64,
    },

    #[error("object {id} not found")]
    ObjectNotFound { id: ObjectId },

    #[error("permission denied on object {id}")]
    PermissionDenied { id: ObjectId },

    #[error("cross-contract target {address} missing")]
    TargetMissing { address: Address },

    #[error("state backing: {0}")]
    Backing(String),
}

/// Invocation-level rejections before any guest code runs.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("unknown function {name:?}")]
    UnknownFunction { name: String },

    #[error("params unmarshal failed: {0}")]
    BadParams(String),
}

/// Umbrella error returned by the engine's public surface.
#[derive(Debug, Error)]
pub enum VmError {
    #[error("screening rejected: {0}")]
    Screening(#[from] ScreeningError),

    #[error(transparent)]
    Abi(#[from] AbiError),

    #[error("compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("repository: {0}")]
    Repo(#[from] RepoError),

    #[error("runtime: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("context: {0}")]
    Context(#[from] ContextError),

    #[error("invocation: {0}")]
    Invocation(#[from] InvocationError),
}
