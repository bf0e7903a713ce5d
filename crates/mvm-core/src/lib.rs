// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MERIDIAN VM - CORE MODULE
//
// Shared primitives for the contract pipeline: fixed-width identifiers
// (Address, ObjectId, Hash), the extracted ABI model, the error taxonomy,
// and the tunable gas schedule. Everything that crosses a crate boundary
// lives here so the front end, compiler, state model, and runtime agree
// on one vocabulary.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod abi;
pub mod config;
pub mod error;
pub mod gas;
pub mod types;

pub use abi::{Abi, AbiEvent, AbiFunction, AbiImport, AbiParam};
pub use config::{ToolchainSection, VmConfig};
pub use error::{
    AbiError, CompileError, ContextError, FaultCategory, InvocationError, RepoError,
    RuntimeError, ScreeningError, VmError,
};
pub use gas::GasSchedule;
pub use types::{Address, Hash, ObjectId};

/// Size of the shared buffer the guest allocates at init (8 KiB).
/// No payload crossing the bridge may exceed this length.
pub const SHARED_BUFFER_SIZE: usize = 8 * 1024;

/// Maximum nested cross-contract call depth. Exceeding it is fatal.
pub const MAX_CALL_DEPTH: u32 = 8;

/// Maximum accepted contract source size (1 MiB).
pub const MAX_SOURCE_SIZE: usize = 1_048_576;

/// Maximum accepted compiled WASM artifact size (4 MiB).
pub const MAX_WASM_SIZE: usize = 4 * 1_048_576;

/// Default gas limit for a contract invocation when the caller does not
/// specify one.
pub const DEFAULT_GAS_LIMIT: u64 = 1_000_000;

/// Import path of the guest-side core API. The screener's default
/// allow-list contains exactly this prefix (subpaths included).
pub const CORE_IMPORT_PATH: &str = "github.com/meridian-net/vm/core";
