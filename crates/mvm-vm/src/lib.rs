// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MERIDIAN VM - EXECUTION ENGINE
//
// WASM-based smart contract execution.
// - Wasmer runtime with Cranelift compiler
// - Deterministic gas metering (Metering middleware + host-op debits)
// - Host bridge over a fixed shared buffer, JSON payloads
// - One fresh instance per invocation, nothing survives in the guest
// - Engine orchestrating deploy and execute against the code
//   repository and the blockchain context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// Provide __rust_probestack stub for wasmer-vm 4.x compatibility with
// Rust 1.85+ where this symbol was removed from compiler_builtins.
// Safe: the kernel provides guard pages for stack overflow on modern
// systems.
#[cfg(all(
    any(target_arch = "x86_64", target_arch = "aarch64"),
    any(target_os = "linux", target_os = "macos")
))]
#[no_mangle]
pub extern "C" fn __rust_probestack() {}

pub mod bridge;
pub mod engine;
pub mod host;
pub mod repo;
pub mod runtime;

pub use bridge::{CallArgs, CallReply, ExecutionResult, HostFn, InvocationRecord};
pub use engine::{Engine, EngineConfig};
pub use host::{Frame, HostState, SharedContext};
pub use repo::CodeRepository;
pub use runtime::{CrossCall, ExecutionOutcome, Invocation, NoCrossCall, WasmRuntime};
