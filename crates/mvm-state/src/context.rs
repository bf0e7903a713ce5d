//! The blockchain context trait the bridge services host calls
//! against.
//!
//! Frame-scoped values (sender, executing contract, remaining gas)
//! live in the runtime's call frame, not here; the context carries the
//! chain-scoped state: block metadata, balances, objects, and the
//! event log. Every object operation receives the executing contract
//! explicitly.

use mvm_core::{Address, ContextError, Hash, ObjectId};

use crate::object::{EventRecord, StateObject};

/// Block and transaction metadata for the invocation being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockInfo {
    pub height: u64,
    pub time: i64,
    pub tx_hash: Hash,
}

/// Sender pair for the mutation rule: the frame's sender and the
/// sender the request names explicitly (they differ in delegated
/// cross-contract flows).
#[derive(Debug, Clone, Copy)]
pub struct MutationAuth {
    pub frame_sender: Address,
    pub request_sender: Address,
}

impl MutationAuth {
    pub fn direct(sender: Address) -> Self {
        Self {
            frame_sender: sender,
            request_sender: sender,
        }
    }
}

pub trait BlockchainContext: Send {
    fn block(&self) -> BlockInfo;

    /// Balance lookup; missing accounts read as zero.
    fn balance(&self, addr: &Address) -> Result<u64, ContextError>;

    /// Atomic debit/credit. Fails without side effects when `from`
    /// cannot cover `amount`.
    fn transfer(&mut self, from: &Address, to: &Address, amount: u64)
        -> Result<(), ContextError>;

    /// Mint directly into an account. Deployment seeding and tests;
    /// not reachable from guests.
    fn credit(&mut self, addr: &Address, amount: u64) -> Result<(), ContextError>;

    /// Create a fresh object under `contract`, owned by `owner`.
    fn create_object(
        &mut self,
        contract: &Address,
        owner: &Address,
    ) -> Result<ObjectId, ContextError>;

    /// Look up an object in `contract`'s namespace. The zero id
    /// resolves to the contract's default object, which is created on
    /// first access (owned by the contract itself).
    fn get_object(
        &mut self,
        contract: &Address,
        id: &ObjectId,
    ) -> Result<Option<StateObject>, ContextError>;

    /// Any live object in `contract`'s namespace whose current owner
    /// is `owner`.
    fn get_object_with_owner(
        &self,
        contract: &Address,
        owner: &Address,
    ) -> Result<Option<ObjectId>, ContextError>;

    /// Look up an object by id alone, across namespaces. Serves the
    /// owner/contract getters of the bridge.
    fn find_object(&self, id: &ObjectId) -> Result<Option<StateObject>, ContextError>;

    /// Delete an object, its fields, and its index entry. Subject to
    /// the mutation rule.
    fn delete_object(
        &mut self,
        contract: &Address,
        auth: &MutationAuth,
        id: &ObjectId,
    ) -> Result<(), ContextError>;

    fn set_object_owner(
        &mut self,
        contract: &Address,
        auth: &MutationAuth,
        id: &ObjectId,
        new_owner: &Address,
    ) -> Result<(), ContextError>;

    fn get_field(
        &mut self,
        contract: &Address,
        id: &ObjectId,
        field: &str,
    ) -> Result<Option<Vec<u8>>, ContextError>;

    fn set_field(
        &mut self,
        contract: &Address,
        auth: &MutationAuth,
        id: &ObjectId,
        field: &str,
        value: Vec<u8>,
    ) -> Result<(), ContextError>;

    /// Append to the event log.
    fn log(
        &mut self,
        contract: &Address,
        event: &str,
        key_values: Vec<serde_json::Value>,
    ) -> Result<(), ContextError>;

    /// Events for one contract, in append order.
    fn events(&self, contract: &Address) -> Result<Vec<EventRecord>, ContextError>;

    /// Begin an invocation: subsequent writes become revocable.
    fn begin(&mut self) -> Result<(), ContextError>;

    /// Make the writes since `begin` durable.
    fn commit(&mut self) -> Result<(), ContextError>;

    /// Discard the writes since `begin`.
    fn rollback(&mut self) -> Result<(), ContextError>;
}
