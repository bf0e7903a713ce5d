//! State objects and the mutation rule.

use std::collections::BTreeMap;

use mvm_core::{Address, ObjectId};
use serde::{Deserialize, Serialize};

/// An ownable, field-keyed record persisted on behalf of a contract.
/// The identifier and the owning contract never change; the owner and
/// the field map do. Field values are opaque byte payloads, JSON at
/// the bridge boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateObject {
    pub id: ObjectId,
    pub contract: Address,
    pub owner: Address,
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<u8>>,
}

impl StateObject {
    pub fn new(id: ObjectId, contract: Address, owner: Address) -> Self {
        Self {
            id,
            contract,
            owner,
            fields: BTreeMap::new(),
        }
    }
}

/// One appended log entry. `key_values` stay opaque to the state
/// layer; they are whatever the contract emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub contract: Address,
    pub event: String,
    #[serde(default)]
    pub key_values: Vec<serde_json::Value>,
    pub block_height: u64,
}

/// The mutation rule for objects: the object must live in the
/// executing contract's namespace, and its owner must be the frame
/// sender, the executing contract itself, or the sender the request
/// names explicitly.
pub fn authorize_mutation(
    object: &StateObject,
    executing_contract: &Address,
    frame_sender: &Address,
    request_sender: &Address,
) -> bool {
    if object.contract != *executing_contract {
        return false;
    }
    object.owner == *frame_sender
        || object.owner == *executing_contract
        || object.owner == *request_sender
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    fn obj(contract: Address, owner: Address) -> StateObject {
        StateObject::new(ObjectId::from_bytes([9; 32]), contract, owner)
    }

    #[test]
    fn owner_may_mutate() {
        let contract = addr(1);
        let owner = addr(2);
        let o = obj(contract, owner);
        assert!(authorize_mutation(&o, &contract, &owner, &owner));
    }

    #[test]
    fn contract_owned_objects_accept_any_sender() {
        let contract = addr(1);
        let o = obj(contract, contract);
        assert!(authorize_mutation(&o, &contract, &addr(7), &addr(7)));
    }

    #[test]
    fn foreign_sender_is_denied() {
        let contract = addr(1);
        let o = obj(contract, addr(2));
        // sender Y, request sender Y, owner X: denied
        assert!(!authorize_mutation(&o, &contract, &addr(3), &addr(3)));
    }

    #[test]
    fn explicitly_named_owner_is_accepted() {
        let contract = addr(1);
        let owner = addr(2);
        let o = obj(contract, owner);
        // frame sender is another contract, but the request names the
        // owner it acts for
        assert!(authorize_mutation(&o, &contract, &addr(9), &owner));
    }

    #[test]
    fn wrong_namespace_is_always_denied() {
        let contract = addr(1);
        let owner = addr(2);
        let o = obj(addr(8), owner);
        assert!(!authorize_mutation(&o, &contract, &owner, &owner));
    }

    #[test]
    fn object_serializes_with_fields() {
        let mut o = obj(addr(1), addr(2));
        o.fields.insert("k".into(), b"\"v\"".to_vec());
        let json = serde_json::to_string(&o).unwrap();
        let back: StateObject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, o);
    }
}
