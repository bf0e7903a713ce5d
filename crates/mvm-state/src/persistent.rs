//! Persistent context backing.
//!
//! Layered over a [`KeyValueStore`] with the key schema
//!
//! ```text
//! o || contract || id            object metadata (JSON)
//! f || contract || id || field   field value (JSON payload)
//! i || contract || owner || id   owner index (empty)
//! b || address                   balance (JSON u64)
//! l || seq8be                    event log append (JSON)
//! m:objseq / m:logseq            monotonic counters
//! ```
//!
//! During an invocation every write lands in an overlay of dirty keys;
//! `commit` applies the overlay as one atomic batch, `rollback` drops
//! it. Reads merge the overlay over the store, so a contract observes
//! its own writes mid-invocation.

use std::collections::BTreeMap;

use mvm_core::{Address, ContextError, ObjectId};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::context::{BlockInfo, BlockchainContext, MutationAuth};
use crate::kv::KeyValueStore;
use crate::object::{authorize_mutation, EventRecord, StateObject};

const OBJSEQ_KEY: &[u8] = b"m:objseq";
const LOGSEQ_KEY: &[u8] = b"m:logseq";

/// Object metadata row; fields live under their own keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ObjectMeta {
    id: ObjectId,
    contract: Address,
    owner: Address,
}

pub struct PersistentContext<S: KeyValueStore> {
    store: S,
    block: BlockInfo,
    /// Dirty keys of the running invocation. `None` marks deletion.
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    in_tx: bool,
}

fn key_object(contract: &Address, id: &ObjectId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 20 + 32);
    key.push(b'o');
    key.extend_from_slice(contract.as_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

fn key_field(contract: &Address, id: &ObjectId, field: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 20 + 32 + field.len());
    key.push(b'f');
    key.extend_from_slice(contract.as_bytes());
    key.extend_from_slice(id.as_bytes());
    key.extend_from_slice(field.as_bytes());
    key
}

fn key_index(contract: &Address, owner: &Address, id: &ObjectId) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 20 + 20 + 32);
    key.push(b'i');
    key.extend_from_slice(contract.as_bytes());
    key.extend_from_slice(owner.as_bytes());
    key.extend_from_slice(id.as_bytes());
    key
}

fn key_balance(addr: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(21);
    key.push(b'b');
    key.extend_from_slice(addr.as_bytes());
    key
}

fn key_log(seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'l');
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn corrupt(err: impl std::fmt::Display) -> ContextError {
    ContextError::Backing(format!("corrupt row: {err}"))
}

impl<S: KeyValueStore> PersistentContext<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            block: BlockInfo::default(),
            overlay: BTreeMap::new(),
            in_tx: false,
        }
    }

    pub fn set_block(&mut self, block: BlockInfo) {
        self.block = block;
    }

    // ── overlay plumbing ─────────────────────────────────────────

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ContextError> {
        if let Some(entry) = self.overlay.get(key) {
            return Ok(entry.clone());
        }
        self.store.get(key)
    }

    fn write(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<(), ContextError> {
        if self.in_tx {
            self.overlay.insert(key, value);
            Ok(())
        } else {
            self.store.apply(vec![(key, value)])
        }
    }

    /// Store scan merged with overlay changes under the same prefix.
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, ContextError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .store
            .scan_prefix(prefix)?
            .into_iter()
            .collect();
        for (key, value) in self.overlay.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    fn next_seq(&mut self, counter_key: &[u8]) -> Result<u64, ContextError> {
        let current = match self.read(counter_key)? {
            Some(bytes) => serde_json::from_slice::<u64>(&bytes).map_err(corrupt)?,
            None => 0,
        };
        let next = current + 1;
        let encoded = serde_json::to_vec(&next).map_err(corrupt)?;
        self.write(counter_key.to_vec(), Some(encoded))?;
        Ok(next)
    }

    // ── object helpers ───────────────────────────────────────────

    fn resolve_id(contract: &Address, id: &ObjectId) -> ObjectId {
        if id.is_zero() {
            ObjectId::default_for(contract)
        } else {
            *id
        }
    }

    fn read_meta(
        &self,
        contract: &Address,
        id: &ObjectId,
    ) -> Result<Option<ObjectMeta>, ContextError> {
        match self.read(&key_object(contract, id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(corrupt)?)),
            None => Ok(None),
        }
    }

    fn write_meta(&mut self, meta: &ObjectMeta) -> Result<(), ContextError> {
        let encoded = serde_json::to_vec(meta).map_err(corrupt)?;
        self.write(key_object(&meta.contract, &meta.id), Some(encoded))
    }

    /// Default objects exist from first touch, owned by the contract.
    fn ensure_default(
        &mut self,
        contract: &Address,
        id: &ObjectId,
    ) -> Result<(), ContextError> {
        if *id != ObjectId::default_for(contract) {
            return Ok(());
        }
        if self.read_meta(contract, id)?.is_some() {
            return Ok(());
        }
        let meta = ObjectMeta {
            id: *id,
            contract: *contract,
            owner: *contract,
        };
        self.write_meta(&meta)?;
        self.write(key_index(contract, contract, id), Some(Vec::new()))
    }

    fn authorized_meta(
        &mut self,
        contract: &Address,
        auth: &MutationAuth,
        id: &ObjectId,
    ) -> Result<ObjectMeta, ContextError> {
        let resolved = Self::resolve_id(contract, id);
        self.ensure_default(contract, &resolved)?;
        let meta = self
            .read_meta(contract, &resolved)?
            .ok_or(ContextError::ObjectNotFound { id: resolved })?;
        let probe = StateObject::new(meta.id, meta.contract, meta.owner);
        if !authorize_mutation(&probe, contract, &auth.frame_sender, &auth.request_sender) {
            return Err(ContextError::PermissionDenied { id: resolved });
        }
        Ok(meta)
    }

    fn load_fields(
        &self,
        contract: &Address,
        id: &ObjectId,
    ) -> Result<BTreeMap<String, Vec<u8>>, ContextError> {
        let prefix = {
            let mut p = Vec::with_capacity(1 + 20 + 32);
            p.push(b'f');
            p.extend_from_slice(contract.as_bytes());
            p.extend_from_slice(id.as_bytes());
            p
        };
        let mut fields = BTreeMap::new();
        for (key, value) in self.scan(&prefix)? {
            let name = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            fields.insert(name, value);
        }
        Ok(fields)
    }
}

impl<S: KeyValueStore> BlockchainContext for PersistentContext<S> {
    fn block(&self) -> BlockInfo {
        self.block
    }

    fn balance(&self, addr: &Address) -> Result<u64, ContextError> {
        match self.read(&key_balance(addr))? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(corrupt),
            None => Ok(0),
        }
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
        let to_balance = self.balance(to)?;
        let debited = serde_json::to_vec(&(from_balance - amount)).map_err(corrupt)?;
        let credited =
            serde_json::to_vec(&to_balance.saturating_add(amount)).map_err(corrupt)?;
        self.write(key_balance(from), Some(debited))?;
        self.write(key_balance(to), Some(credited))?;
        trace!(%from, %to, amount, "transfer applied");
        Ok(())
    }

    fn credit(&mut self, addr: &Address, amount: u64) -> Result<(), ContextError> {
        let balance = self.balance(addr)?.saturating_add(amount);
        let encoded = serde_json::to_vec(&balance).map_err(corrupt)?;
        self.write(key_balance(addr), Some(encoded))
    }

    fn create_object(
        &mut self,
        contract: &Address,
        owner: &Address,
    ) -> Result<ObjectId, ContextError> {
        let seq = self.next_seq(OBJSEQ_KEY)?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(contract.as_bytes());
        hasher.update(&seq.to_le_bytes());
        hasher.update(self.block.tx_hash.as_bytes());
        let id = ObjectId::from_bytes(*hasher.finalize().as_bytes());

        let meta = ObjectMeta {
            id,
            contract: *contract,
            owner: *owner,
        };
        self.write_meta(&meta)?;
        self.write(key_index(contract, owner, &id), Some(Vec::new()))?;
        Ok(id)
    }

    fn get_object(
        &mut self,
        contract: &Address,
        id: &ObjectId,
    ) -> Result<Option<StateObject>, ContextError> {
        let resolved = Self::resolve_id(contract, id);
        self.ensure_default(contract, &resolved)?;
        let Some(meta) = self.read_meta(contract, &resolved)? else {
            return Ok(None);
        };
        let fields = self.load_fields(contract, &resolved)?;
        Ok(Some(StateObject {
            id: meta.id,
            contract: meta.contract,
            owner: meta.owner,
            fields,
        }))
    }

    fn get_object_with_owner(
        &self,
        contract: &Address,
        owner: &Address,
    ) -> Result<Option<ObjectId>, ContextError> {
        let mut prefix = Vec::with_capacity(1 + 20 + 20);
        prefix.push(b'i');
        prefix.extend_from_slice(contract.as_bytes());
        prefix.extend_from_slice(owner.as_bytes());
        for (key, _) in self.scan(&prefix)? {
            let id_bytes = &key[prefix.len()..];
            if id_bytes.len() == ObjectId::LEN {
                return Ok(Some(
                    ObjectId::from_slice(id_bytes).map_err(corrupt)?,
                ));
            }
        }
        Ok(None)
    }

    fn find_object(&self, id: &ObjectId) -> Result<Option<StateObject>, ContextError> {
        for (key, value) in self.scan(b"o")? {
            if key.len() == 1 + 20 + 32 && &key[21..] == id.as_bytes() {
                let meta: ObjectMeta = serde_json::from_slice(&value).map_err(corrupt)?;
                let fields = self.load_fields(&meta.contract, id)?;
                return Ok(Some(StateObject {
                    id: meta.id,
                    contract: meta.contract,
                    owner: meta.owner,
                    fields,
                }));
            }
        }
        Ok(None)
    }

    fn delete_object(
        &mut self,
        contract: &Address,
        auth: &MutationAuth,
        id: &ObjectId,
    ) -> Result<(), ContextError> {
        let meta = self.authorized_meta(contract, auth, id)?;
        let fields = self.load_fields(contract, &meta.id)?;
        for name in fields.keys() {
            self.write(key_field(contract, &meta.id, name), None)?;
        }
        self.write(key_index(contract, &meta.owner, &meta.id), None)?;
        self.write(key_object(contract, &meta.id), None)?;
        Ok(())
    }

    fn set_object_owner(
        &mut self,
        contract: &Address,
        auth: &MutationAuth,
        id: &ObjectId,
        new_owner: &Address,
    ) -> Result<(), ContextError> {
        let mut meta = self.authorized_meta(contract, auth, id)?;
        let old_owner = meta.owner;
        meta.owner = *new_owner;
        self.write_meta(&meta)?;
        self.write(key_index(contract, &old_owner, &meta.id), None)?;
        self.write(key_index(contract, new_owner, &meta.id), Some(Vec::new()))
    }

    fn get_field(
        &mut self,
        contract: &Address,
        id: &ObjectId,
        field: &str,
    ) -> Result<Option<Vec<u8>>, ContextError> {
        let resolved = Self::resolve_id(contract, id);
        self.ensure_default(contract, &resolved)?;
        if self.read_meta(contract, &resolved)?.is_none() {
            return Err(ContextError::ObjectNotFound { id: resolved });
        }
        self.read(&key_field(contract, &resolved, field))
    }

    fn set_field(
        &mut self,
        contract: &Address,
        auth: &MutationAuth,
        id: &ObjectId,
        field: &str,
        value: Vec<u8>,
    ) -> Result<(), ContextError> {
        let meta = self.authorized_meta(contract, auth, id)?;
        self.write(key_field(contract, &meta.id, field), Some(value))
    }

    fn log(
        &mut self,
        contract: &Address,
        event: &str,
        key_values: Vec<serde_json::Value>,
    ) -> Result<(), ContextError> {
        let seq = self.next_seq(LOGSEQ_KEY)?;
        let record = EventRecord {
            contract: *contract,
            event: event.to_string(),
            key_values,
            block_height: self.block.height,
        };
        let encoded = serde_json::to_vec(&record).map_err(corrupt)?;
        self.write(key_log(seq), Some(encoded))
    }

    fn events(&self, contract: &Address) -> Result<Vec<EventRecord>, ContextError> {
        let mut out = Vec::new();
        for (_, value) in self.scan(b"l")? {
            let record: EventRecord = serde_json::from_slice(&value).map_err(corrupt)?;
            if record.contract == *contract {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn begin(&mut self) -> Result<(), ContextError> {
        self.overlay.clear();
        self.in_tx = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ContextError> {
        self.in_tx = false;
        if self.overlay.is_empty() {
            return Ok(());
        }
        let batch: Vec<(Vec<u8>, Option<Vec<u8>>)> =
            std::mem::take(&mut self.overlay).into_iter().collect();
        self.store.apply(batch)
    }

    fn rollback(&mut self) -> Result<(), ContextError> {
        self.in_tx = false;
        self.overlay.clear();
        Ok(())
    }
}
