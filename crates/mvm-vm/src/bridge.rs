//! Wire types of the host–guest bridge.
//!
//! Function IDs, negative status categories, and the JSON argument and
//! result records. These mirror the guest bridge template byte for
//! byte: addresses and object ids cross as lowercase hex strings, all
//! structured payloads as UTF-8 JSON through the shared buffer.

use mvm_core::{Address, FaultCategory, ObjectId};
use serde::{Deserialize, Serialize};

/// Host function IDs. Stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum HostFn {
    GetSender = 1,
    GetContractAddress = 2,
    Transfer = 3,
    CreateObject = 4,
    Call = 5,
    GetObject = 6,
    GetObjectWithOwner = 7,
    DeleteObject = 8,
    Log = 9,
    GetObjectOwner = 10,
    SetObjectOwner = 11,
    GetObjectField = 12,
    SetObjectField = 13,
    GetObjectContract = 14,
}

impl HostFn {
    pub fn from_id(id: i32) -> Option<Self> {
        Some(match id {
            1 => HostFn::GetSender,
            2 => HostFn::GetContractAddress,
            3 => HostFn::Transfer,
            4 => HostFn::CreateObject,
            5 => HostFn::Call,
            6 => HostFn::GetObject,
            7 => HostFn::GetObjectWithOwner,
            8 => HostFn::DeleteObject,
            9 => HostFn::Log,
            10 => HostFn::GetObjectOwner,
            11 => HostFn::SetObjectOwner,
            12 => HostFn::GetObjectField,
            13 => HostFn::SetObjectField,
            14 => HostFn::GetObjectContract,
            _ => None?,
        })
    }
}

/// Status returned to the guest: zero or a payload length on success,
/// a [`FaultCategory`] code on failure.
pub fn status(category: FaultCategory) -> i32 {
    category.code()
}

/// Input record for `handle_contract_call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub contract: Address,
    pub sender: Address,
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    pub gas_limit: u64,
}

/// Result record the guest serializes into the shared buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

// ── host-call argument records ───────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferArgs {
    pub contract: Address,
    pub from: Address,
    pub to: Address,
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRef {
    pub contract: Address,
    pub id: ObjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerQuery {
    pub contract: Address,
    pub owner: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOwnerArgs {
    pub contract: Address,
    pub sender: Address,
    pub id: ObjectId,
    pub owner: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldQuery {
    pub contract: Address,
    pub id: ObjectId,
    pub field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetFieldArgs {
    pub contract: Address,
    pub sender: Address,
    pub id: ObjectId,
    pub field: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogArgs {
    pub contract: Address,
    pub event: String,
    #[serde(default)]
    pub key_values: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallArgs {
    pub contract: Address,
    pub function: String,
    #[serde(default)]
    pub args: Option<serde_json::Value>,
    pub caller: Address,
    #[serde(default)]
    pub gas_limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallReply {
    #[serde(default)]
    pub data: serde_json::Value,
    pub gas_used: u64,
}
