//! In-memory context backing.
//!
//! Ordinary maps; the backing for tests and embedded use. Snapshots
//! are deep clones, which is exactly as expensive as it sounds and
//! exactly as correct as the engine needs.

use std::collections::{BTreeMap, BTreeSet};

use mvm_core::{Address, ContextError, ObjectId};
use tracing::trace;

use crate::context::{BlockInfo, BlockchainContext, MutationAuth};
use crate::object::{authorize_mutation, EventRecord, StateObject};

#[derive(Default)]
pub struct MemoryContext {
    block: BlockInfo,
    balances: BTreeMap<Address, u64>,
    objects: BTreeMap<ObjectId, StateObject>,
    /// (contract, owner, id) — kept consistent with object metadata.
    owner_index: BTreeSet<(Address, Address, ObjectId)>,
    logs: Vec<EventRecord>,
    object_counter: u64,
    snapshot: Option<Box<Snapshot>>,
}

struct Snapshot {
    balances: BTreeMap<Address, u64>,
    objects: BTreeMap<ObjectId, StateObject>,
    owner_index: BTreeSet<(Address, Address, ObjectId)>,
    log_len: usize,
    object_counter: u64,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_block(&mut self, block: BlockInfo) {
        self.block = block;
    }

    /// Resolve the zero id to the contract's default object id.
    fn resolve_id(contract: &Address, id: &ObjectId) -> ObjectId {
        if id.is_zero() {
            ObjectId::default_for(contract)
        } else {
            *id
        }
    }

    /// Default objects exist from first touch, owned by the contract
    /// itself so the contract's own code can always mutate them.
    fn ensure_default(&mut self, contract: &Address, id: &ObjectId) {
        if !self.objects.contains_key(id) && *id == ObjectId::default_for(contract) {
            self.objects
                .insert(*id, StateObject::new(*id, *contract, *contract));
            self.owner_index.insert((*contract, *contract, *id));
        }
    }

    fn fresh_object_id(&mut self, contract: &Address) -> ObjectId {
        self.object_counter += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(contract.as_bytes());
        hasher.update(&self.object_counter.to_le_bytes());
        hasher.update(self.block.tx_hash.as_bytes());
        let digest = hasher.finalize();
        ObjectId::from_bytes(*digest.as_bytes())
    }

    fn authorized_object(
        &mut self,
        contract: &Address,
        auth: &MutationAuth,
        id: &ObjectId,
    ) -> Result<ObjectId, ContextError> {
        let resolved = Self::resolve_id(contract, id);
        self.ensure_default(contract, &resolved);
        let object = self
            .objects
            .get(&resolved)
            .ok_or(ContextError::ObjectNotFound { id: resolved })?;
        if !authorize_mutation(object, contract, &auth.frame_sender, &auth.request_sender) {
            return Err(ContextError::PermissionDenied { id: resolved });
        }
        Ok(resolved)
    }
}

impl BlockchainContext for MemoryContext {
    fn block(&self) -> BlockInfo {
        self.block
    }

    fn balance(&self, addr: &Address) -> Result<u64, ContextError> {
        Ok(self.balances.get(addr).copied().unwrap_or(0))
    }

    fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        amount: u64,
    ) -> Result<(), ContextError> {
        let from_balance = self.balance(from)?;
        if from_balance < amount {
            return Err(ContextError::InsufficientFunds {
                from: *from,
                balance: from_balance,
                amount,
            });
        }
        self.balances.insert(*from, from_balance - amount);
        let to_balance = self.balance(to)?;
        self.balances.insert(*to, to_balance.saturating_add(amount));
        trace!(%from, %to, amount, "transfer applied");
        Ok(())
    }

    fn credit(&mut self, addr: &Address, amount: u64) -> Result<(), ContextError> {
        let balance = self.balance(addr)?;
        self.balances.insert(*addr, balance.saturating_add(amount));
        Ok(())
    }

    fn create_object(
        &mut self,
        contract: &Address,
        owner: &Address,
    ) -> Result<ObjectId, ContextError> {
        let id = self.fresh_object_id(contract);
        self.objects
            .insert(id, StateObject::new(id, *contract, *owner));
        self.owner_index.insert((*contract, *owner, id));
        Ok(id)
    }

    fn get_object(
        &mut self,
        contract: &Address,
        id: &ObjectId,
    ) -> Result<Option<StateObject>, ContextError> {
        let resolved = Self::resolve_id(contract, id);
        self.ensure_default(contract, &resolved);
        match self.objects.get(&resolved) {
            Some(object) if object.contract == *contract => Ok(Some(object.clone())),
            _ => Ok(None),
        }
    }

    fn get_object_with_owner(
        &self,
        contract: &Address,
        owner: &Address,
    ) -> Result<Option<ObjectId>, ContextError> {
        let low = (*contract, *owner, ObjectId::ZERO);
        let high = (*contract, *owner, ObjectId::from_bytes([0xff; 32]));
        Ok(self
            .owner_index
            .range(low..=high)
            .map(|(_, _, id)| *id)
            .next())
    }

    fn find_object(&self, id: &ObjectId) -> Result<Option<StateObject>, ContextError> {
        Ok(self.objects.get(id).cloned())
    }

    fn delete_object(
        &mut self,
        contract: &Address,
        auth: &MutationAuth,
        id: &ObjectId,
    ) -> Result<(), ContextError> {
        let resolved = self.authorized_object(contract, auth, id)?;
        if let Some(object) = self.objects.remove(&resolved) {
            self.owner_index
                .remove(&(object.contract, object.owner, resolved));
        }
        Ok(())
    }

    fn set_object_owner(
        &mut self,
        contract: &Address,
        auth: &MutationAuth,
        id: &ObjectId,
        new_owner: &Address,
    ) -> Result<(), ContextError> {
        let resolved = self.authorized_object(contract, auth, id)?;
        let object = self
            .objects
            .get_mut(&resolved)
            .ok_or(ContextError::ObjectNotFound { id: resolved })?;
        let old_owner = object.owner;
        object.owner = *new_owner;
        self.owner_index.remove(&(*contract, old_owner, resolved));
        self.owner_index.insert((*contract, *new_owner, resolved));
        Ok(())
    }

    fn get_field(
        &mut self,
        contract: &Address,
        id: &ObjectId,
        field: &str,
    ) -> Result<Option<Vec<u8>>, ContextError> {
        let resolved = Self::resolve_id(contract, id);
        self.ensure_default(contract, &resolved);
        match self.objects.get(&resolved) {
            Some(object) if object.contract == *contract => {
                Ok(object.fields.get(field).cloned())
            }
            _ => Err(ContextError::ObjectNotFound { id: resolved }),
        }
    }

    fn set_field(
        &mut self,
        contract: &Address,
        auth: &MutationAuth,
        id: &ObjectId,
        field: &str,
        value: Vec<u8>,
    ) -> Result<(), ContextError> {
        let resolved = self.authorized_object(contract, auth, id)?;
        let object = self
            .objects
            .get_mut(&resolved)
            .ok_or(ContextError::ObjectNotFound { id: resolved })?;
        object.fields.insert(field.to_string(), value);
        Ok(())
    }

    fn log(
        &mut self,
        contract: &Address,
        event: &str,
        key_values: Vec<serde_json::Value>,
    ) -> Result<(), ContextError> {
        self.logs.push(EventRecord {
            contract: *contract,
            event: event.to_string(),
            key_values,
            block_height: self.block.height,
        });
        Ok(())
    }

    fn events(&self, contract: &Address) -> Result<Vec<EventRecord>, ContextError> {
        Ok(self
            .logs
            .iter()
            .filter(|record| record.contract == *contract)
            .cloned()
            .collect())
    }

    fn begin(&mut self) -> Result<(), ContextError> {
        self.snapshot = Some(Box::new(Snapshot {
            balances: self.balances.clone(),
            objects: self.objects.clone(),
            owner_index: self.owner_index.clone(),
            log_len: self.logs.len(),
            object_counter: self.object_counter,
        }));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ContextError> {
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ContextError> {
        let snapshot = self
            .snapshot
            .take()
            .ok_or_else(|| ContextError::Backing("rollback without begin".into()))?;
        self.balances = snapshot.balances;
        self.objects = snapshot.objects;
        self.owner_index = snapshot.owner_index;
        self.logs.truncate(snapshot.log_len);
        self.object_counter = snapshot.object_counter;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn missing_balances_read_zero() {
        let ctx = MemoryContext::new();
        assert_eq!(ctx.balance(&addr(1)).unwrap(), 0);
    }

    #[test]
    fn transfer_moves_exact_amounts() {
        let mut ctx = MemoryContext::new();
        ctx.credit(&addr(1), 100).unwrap();
        ctx.transfer(&addr(1), &addr(2), 60).unwrap();
        assert_eq!(ctx.balance(&addr(1)).unwrap(), 40);
        assert_eq!(ctx.balance(&addr(2)).unwrap(), 60);
    }

    #[test]
    fn failed_transfer_changes_nothing() {
        let mut ctx = MemoryContext::new();
        ctx.credit(&addr(1), 100).unwrap();
        let err = ctx.transfer(&addr(1), &addr(2), 500).unwrap_err();
        assert!(matches!(err, ContextError::InsufficientFunds { .. }));
        assert_eq!(ctx.balance(&addr(1)).unwrap(), 100);
        assert_eq!(ctx.balance(&addr(2)).unwrap(), 0);
    }

    #[test]
    fn created_objects_are_indexed_by_owner() {
        let mut ctx = MemoryContext::new();
        let contract = addr(1);
        let owner = addr(2);
        let id = ctx.create_object(&contract, &owner).unwrap();
        let found = ctx.get_object_with_owner(&contract, &owner).unwrap();
        assert_eq!(found, Some(id));
    }

    #[test]
    fn owner_index_follows_owner_changes() {
        let mut ctx = MemoryContext::new();
        let contract = addr(1);
        let alice = addr(2);
        let bob = addr(3);
        let id = ctx.create_object(&contract, &alice).unwrap();

        ctx.set_object_owner(&contract, &MutationAuth::direct(alice), &id, &bob)
            .unwrap();

        assert_eq!(ctx.get_object_with_owner(&contract, &alice).unwrap(), None);
        assert_eq!(
            ctx.get_object_with_owner(&contract, &bob).unwrap(),
            Some(id)
        );
    }

    #[test]
    fn zero_id_resolves_to_default_object() {
        let mut ctx = MemoryContext::new();
        let contract = addr(1);
        let object = ctx.get_object(&contract, &ObjectId::ZERO).unwrap().unwrap();
        assert_eq!(object.id, ObjectId::default_for(&contract));
        assert_eq!(object.owner, contract);
    }

    #[test]
    fn default_object_accepts_any_sender() {
        let mut ctx = MemoryContext::new();
        let contract = addr(1);
        ctx.set_field(
            &contract,
            &MutationAuth::direct(addr(9)),
            &ObjectId::ZERO,
            "v",
            b"1".to_vec(),
        )
        .unwrap();
        let value = ctx
            .get_field(&contract, &ObjectId::ZERO, "v")
            .unwrap()
            .unwrap();
        assert_eq!(value, b"1");
    }

    #[test]
    fn foreign_sender_cannot_write_owned_object() {
        let mut ctx = MemoryContext::new();
        let contract = addr(1);
        let alice = addr(2);
        let mallory = addr(3);
        let id = ctx.create_object(&contract, &alice).unwrap();

        let err = ctx
            .set_field(
                &contract,
                &MutationAuth::direct(mallory),
                &id,
                "k",
                b"1".to_vec(),
            )
            .unwrap_err();
        assert!(matches!(err, ContextError::PermissionDenied { .. }));
        assert_eq!(ctx.get_field(&contract, &id, "k").unwrap(), None);
    }

    #[test]
    fn delete_removes_object_fields_and_index() {
        let mut ctx = MemoryContext::new();
        let contract = addr(1);
        let owner = addr(2);
        let id = ctx.create_object(&contract, &owner).unwrap();
        ctx.set_field(
            &contract,
            &MutationAuth::direct(owner),
            &id,
            "k",
            b"1".to_vec(),
        )
        .unwrap();

        ctx.delete_object(&contract, &MutationAuth::direct(owner), &id)
            .unwrap();

        assert_eq!(ctx.find_object(&id).unwrap(), None);
        assert_eq!(ctx.get_object_with_owner(&contract, &owner).unwrap(), None);
        assert!(ctx.get_field(&contract, &id, "k").is_err());
    }

    #[test]
    fn object_lookup_checks_namespace() {
        let mut ctx = MemoryContext::new();
        let id = ctx.create_object(&addr(1), &addr(2)).unwrap();
        // present under its own contract
        assert!(ctx.get_object(&addr(1), &id).unwrap().is_some());
        // invisible from another contract's namespace
        assert!(ctx.get_object(&addr(5), &id).unwrap().is_none());
    }

    #[test]
    fn rollback_restores_everything() {
        let mut ctx = MemoryContext::new();
        let contract = addr(1);
        ctx.credit(&addr(2), 50).unwrap();

        ctx.begin().unwrap();
        ctx.credit(&addr(2), 100).unwrap();
        let id = ctx.create_object(&contract, &addr(2)).unwrap();
        ctx.log(&contract, "Created", vec![]).unwrap();
        ctx.rollback().unwrap();

        assert_eq!(ctx.balance(&addr(2)).unwrap(), 50);
        assert_eq!(ctx.find_object(&id).unwrap(), None);
        assert!(ctx.events(&contract).unwrap().is_empty());
    }

    #[test]
    fn commit_keeps_writes() {
        let mut ctx = MemoryContext::new();
        ctx.begin().unwrap();
        ctx.credit(&addr(2), 100).unwrap();
        ctx.commit().unwrap();
        assert_eq!(ctx.balance(&addr(2)).unwrap(), 100);
    }

    #[test]
    fn object_ids_are_deterministic_per_counter_and_tx() {
        let mut a = MemoryContext::new();
        let mut b = MemoryContext::new();
        let contract = addr(1);
        let id_a = a.create_object(&contract, &addr(2)).unwrap();
        let id_b = b.create_object(&contract, &addr(2)).unwrap();
        assert_eq!(id_a, id_b);
        let id_a2 = a.create_object(&contract, &addr(2)).unwrap();
        assert_ne!(id_a, id_a2);
    }

    #[test]
    fn events_filter_by_contract() {
        let mut ctx = MemoryContext::new();
        ctx.log(&addr(1), "A", vec![serde_json::json!("x")]).unwrap();
        ctx.log(&addr(2), "B", vec![]).unwrap();
        let events = ctx.events(&addr(1)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "A");
    }
}
