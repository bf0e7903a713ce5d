// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MERIDIAN VM - CONTRACT LANGUAGE FRONT END
//
// Contracts are written in a statically screened Go subset. This crate
// tokenizes and parses submitted source, enforces the screening policy,
// extracts the typed ABI, and generates the dispatch shim that the
// compiler driver merges into the WASM entry package.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod ast;
pub mod dispatch;
pub mod extract;
pub mod lexer;
pub mod parser;
pub mod screen;
pub mod token;

pub use dispatch::generate_dispatch;
pub use extract::extract_abi;
pub use parser::parse_source;
pub use screen::{CompileProbe, NoProbe, Screener, ScreenerConfig};
