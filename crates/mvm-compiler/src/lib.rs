// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MERIDIAN VM - COMPILER DRIVER
//
// Turns screened contract source plus generated dispatch code into a
// WASM artifact. Stages a scratch workspace, rewrites both files into
// the WASM entry package, appends the fixed bridge template, resolves
// dependencies, and shells out to the external toolchain targeting
// WASI. Also hosts the toolchain-backed compile probe of the screening
// policy.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod driver;
mod probe;

pub use driver::{rewrite_package, CompilerDriver, ContractCompiler, ToolchainConfig, SDK_MODULE};
pub use probe::ToolchainProbe;

/// Guest bridge template appended to every compiled contract.
pub const BRIDGE_TEMPLATE: &str = include_str!("../templates/bridge.go");
