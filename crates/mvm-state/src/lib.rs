// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MERIDIAN VM - STATE MODEL
//
// The blockchain context the bridge services host calls against:
// balances, ownable field-keyed state objects with an owner index, and
// a persistent event log. Two backings share one trait: in-memory
// maps for tests and embedding, and a sled-backed store for durable
// state. Both give the engine snapshot/commit/rollback so a failed
// invocation leaves no partial writes.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod context;
pub mod kv;
pub mod memory;
pub mod object;
pub mod persistent;

pub use context::{BlockInfo, BlockchainContext, MutationAuth};
pub use kv::{KeyValueStore, MemKv, SledKv};
pub use memory::MemoryContext;
pub use object::{authorize_mutation, EventRecord, StateObject};
pub use persistent::PersistentContext;
