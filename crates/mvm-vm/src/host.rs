//! Host functions: the bridge between WASM guest contracts and the
//! blockchain context.
//!
//! Guests import these through module `env`. Two generic entry points
//! carry everything with a variable-sized payload through the shared
//! buffer; three scalar imports fast-path block metadata and balances.
//!
//! | Function               | Signature (WASM types)        |
//! |------------------------|-------------------------------|
//! | `call_host_set`        | `(i32, i32, i32, i32) -> i32` |
//! | `call_host_get_buffer` | `(i32, i32, i32, i32) -> i32` |
//! | `get_block_height`     | `() -> i64`                   |
//! | `get_block_time`       | `() -> i64`                   |
//! | `get_balance`          | `(i32) -> i64`                |
//!
//! Every guest memory access is bounds-checked against the actual
//! memory length; a violation records a fatal invalid-pointer error
//! that aborts the invocation when the guest returns.

use std::sync::{Arc, Mutex};

use mvm_core::{
    Address, ContextError, FaultCategory, GasSchedule, ObjectId, RuntimeError,
    SHARED_BUFFER_SIZE,
};
use mvm_state::{BlockchainContext, MutationAuth};
use serde::de::DeserializeOwned;
use tracing::trace;
use wasmer::{
    imports, Function, FunctionEnv, FunctionEnvMut, Global, Imports, Memory, Store, Value,
};

use crate::bridge::{
    CallArgs, FieldQuery, HostFn, LogArgs, ObjectRef, OwnerQuery, SetFieldArgs, SetOwnerArgs,
    TransferArgs,
};
use crate::runtime::CrossCall;

/// Shared mutable context of all host calls within one invocation.
pub type SharedContext = Arc<Mutex<dyn BlockchainContext>>;

/// Per-invocation call frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub contract: Address,
    pub sender: Address,
    pub gas_limit: u64,
    pub depth: u32,
}

/// Host environment stored in wasmer's `FunctionEnv`. The memory and
/// metering globals are filled in after instantiation.
pub struct HostState {
    pub memory: Option<Memory>,
    pub gas_remaining: Option<Global>,
    pub gas_exhausted: Option<Global>,
    pub inner: Arc<Mutex<HostInner>>,
}

pub struct HostInner {
    pub frame: Frame,
    pub context: SharedContext,
    pub dispatcher: Arc<dyn CrossCall>,
    pub schedule: GasSchedule,
    /// First fatal error of the invocation; checked by the runtime
    /// after the guest returns, and takes precedence over whatever the
    /// guest produced.
    pub fatal: Option<RuntimeError>,
}

impl HostInner {
    fn record_fatal(&mut self, err: RuntimeError) {
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Memory helpers
// ─────────────────────────────────────────────────────────────────

fn read_guest(
    env: &FunctionEnvMut<HostState>,
    memory: &Memory,
    ptr: u32,
    len: u32,
) -> Result<Vec<u8>, RuntimeError> {
    let view = memory.view(env);
    let size = view.data_size();
    let end = ptr as u64 + len as u64;
    if end > size {
        return Err(RuntimeError::InvalidPointer {
            offset: ptr as u64,
            len: len as u64,
            memory: size,
        });
    }
    let mut buf = vec![0u8; len as usize];
    view.read(ptr as u64, &mut buf)
        .map_err(|_| RuntimeError::InvalidPointer {
            offset: ptr as u64,
            len: len as u64,
            memory: size,
        })?;
    Ok(buf)
}

fn write_guest(
    env: &FunctionEnvMut<HostState>,
    memory: &Memory,
    ptr: u32,
    data: &[u8],
) -> Result<(), RuntimeError> {
    let view = memory.view(env);
    let size = view.data_size();
    let end = ptr as u64 + data.len() as u64;
    if end > size {
        return Err(RuntimeError::InvalidPointer {
            offset: ptr as u64,
            len: data.len() as u64,
            memory: size,
        });
    }
    view.write(ptr as u64, data)
        .map_err(|_| RuntimeError::InvalidPointer {
            offset: ptr as u64,
            len: data.len() as u64,
            memory: size,
        })
}

// ─────────────────────────────────────────────────────────────────
// Gas accounting against the metering globals
// ─────────────────────────────────────────────────────────────────

fn remaining_gas(env: &mut FunctionEnvMut<HostState>) -> u64 {
    let Some(global) = env.data().gas_remaining.clone() else {
        return u64::MAX;
    };
    match global.get(env) {
        Value::I64(v) => v as u64,
        _ => 0,
    }
}

/// Debit `cost` from the invocation budget. On exhaustion the metering
/// globals are flipped so the next WASM instruction traps, and a fatal
/// out-of-gas error is recorded.
fn debit_gas(env: &mut FunctionEnvMut<HostState>, cost: u64) -> Result<(), i32> {
    let Some(global) = env.data().gas_remaining.clone() else {
        return Ok(());
    };
    let remaining = match global.get(env) {
        Value::I64(v) => v as u64,
        _ => 0,
    };
    if remaining < cost {
        let _ = global.set(env, Value::I64(0));
        if let Some(exhausted) = env.data().gas_exhausted.clone() {
            let _ = exhausted.set(env, Value::I32(1));
        }
        let inner = env.data().inner.clone();
        if let Ok(mut inner) = inner.lock() {
            let limit = inner.frame.gas_limit;
            inner.record_fatal(RuntimeError::GasExhausted { limit });
        }
        return Err(FaultCategory::OutOfGas.code());
    }
    let _ = global.set(env, Value::I64((remaining - cost) as i64));
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Status mapping
// ─────────────────────────────────────────────────────────────────

fn context_status(err: &ContextError) -> i32 {
    match err {
        ContextError::InsufficientFunds { .. }
        | ContextError::PermissionDenied { .. }
        | ContextError::TargetMissing { .. }
        | ContextError::Backing(_) => FaultCategory::ExecutionError.code(),
        ContextError::ObjectNotFound { .. } => FaultCategory::ExecutionError.code(),
    }
}

fn parse_args<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, i32> {
    serde_json::from_slice(bytes).map_err(|_| FaultCategory::InvalidParams.code())
}

// ─────────────────────────────────────────────────────────────────
// The two generic entry points
// ─────────────────────────────────────────────────────────────────

fn call_host_set_fn(
    mut env: FunctionEnvMut<HostState>,
    func_id: i32,
    arg_ptr: i32,
    arg_len: i32,
    buffer_ptr: i32,
) -> i32 {
    match host_call(&mut env, func_id, arg_ptr, arg_len, buffer_ptr) {
        Ok(_) => 0,
        Err(status) => status,
    }
}

fn call_host_get_buffer_fn(
    mut env: FunctionEnvMut<HostState>,
    func_id: i32,
    arg_ptr: i32,
    arg_len: i32,
    buffer_ptr: i32,
) -> i32 {
    match host_call(&mut env, func_id, arg_ptr, arg_len, buffer_ptr) {
        Ok(len) => len,
        Err(status) => status,
    }
}

/// Unified host-call path. Returns the result length written to the
/// shared buffer (0 for status-only and empty results) or a negative
/// status.
fn host_call(
    env: &mut FunctionEnvMut<HostState>,
    func_id: i32,
    arg_ptr: i32,
    arg_len: i32,
    buffer_ptr: i32,
) -> Result<i32, i32> {
    let Some(func) = HostFn::from_id(func_id) else {
        return Err(FaultCategory::FunctionNotFound.code());
    };

    if arg_len < 0 {
        return Err(fatal_pointer(env, arg_ptr, arg_len));
    }
    if arg_len as usize > SHARED_BUFFER_SIZE {
        // Payload over the buffer bound fails before any state effect.
        return Err(FaultCategory::BufferOverflow.code());
    }

    let Some(memory) = env.data().memory.clone() else {
        return Err(FaultCategory::ExecutionError.code());
    };
    let arg = match read_guest(env, &memory, arg_ptr as u32, arg_len as u32) {
        Ok(bytes) => bytes,
        Err(err) => return Err(record_fatal(env, err)),
    };

    let inner = env.data().inner.clone();
    let (frame, context, dispatcher, schedule) = {
        let inner = inner.lock().map_err(|_| FaultCategory::ExecutionError.code())?;
        (
            inner.frame.clone(),
            inner.context.clone(),
            inner.dispatcher.clone(),
            inner.schedule.clone(),
        )
    };

    debit_gas(env, op_cost(&schedule, func) + schedule.payload_cost(arg.len()))?;
    trace!(func = ?func, arg_len, depth = frame.depth, "host call");

    let reply: Vec<u8> = match func {
        HostFn::GetSender => frame.sender.as_bytes().to_vec(),
        HostFn::GetContractAddress => frame.contract.as_bytes().to_vec(),

        HostFn::Transfer => {
            let args: TransferArgs = parse_args(&arg)?;
            let mut ctx = lock_context(&context)?;
            ctx.transfer(&args.from, &args.to, args.amount)
                .map_err(|e| context_status(&e))?;
            Vec::new()
        }

        HostFn::CreateObject => {
            let contract = Address::from_slice(&arg)
                .map_err(|_| FaultCategory::InvalidParams.code())?;
            let owner = if frame.sender.is_zero() {
                frame.contract
            } else {
                frame.sender
            };
            let mut ctx = lock_context(&context)?;
            let id = ctx
                .create_object(&contract, &owner)
                .map_err(|e| context_status(&e))?;
            id.as_bytes().to_vec()
        }

        HostFn::Call => {
            let args: CallArgs = parse_args(&arg)?;
            let remaining = remaining_gas(env);
            let available = remaining.saturating_sub(schedule.cross_call_reserve);
            let grant = if args.gas_limit == 0 {
                available
            } else {
                args.gas_limit.min(available)
            };

            let reply = dispatcher
                .call(&args, frame.depth + 1, grant)
                .map_err(|e| crate::runtime::call_status(&e))?;

            debit_gas(env, reply.gas_used)?;
            serde_json::to_vec(&reply).map_err(|_| FaultCategory::ExecutionError.code())?
        }

        HostFn::GetObject => {
            let args: ObjectRef = parse_args(&arg)?;
            let mut ctx = lock_context(&context)?;
            match ctx
                .get_object(&args.contract, &args.id)
                .map_err(|e| context_status(&e))?
            {
                Some(object) => object.id.as_bytes().to_vec(),
                None => Vec::new(),
            }
        }

        HostFn::GetObjectWithOwner => {
            let args: OwnerQuery = parse_args(&arg)?;
            let ctx = lock_context(&context)?;
            match ctx
                .get_object_with_owner(&args.contract, &args.owner)
                .map_err(|e| context_status(&e))?
            {
                Some(id) => id.as_bytes().to_vec(),
                None => Vec::new(),
            }
        }

        HostFn::DeleteObject => {
            let args: ObjectRef = parse_args(&arg)?;
            require_own_namespace(&frame, &args.contract)?;
            let auth = MutationAuth::direct(frame.sender);
            let mut ctx = lock_context(&context)?;
            ctx.delete_object(&args.contract, &auth, &args.id)
                .map_err(|e| context_status(&e))?;
            Vec::new()
        }

        HostFn::Log => {
            let args: LogArgs = parse_args(&arg)?;
            let mut ctx = lock_context(&context)?;
            ctx.log(&frame.contract, &args.event, args.key_values)
                .map_err(|e| context_status(&e))?;
            Vec::new()
        }

        HostFn::GetObjectOwner => {
            let id = ObjectId::from_slice(&arg)
                .map_err(|_| FaultCategory::InvalidParams.code())?;
            let ctx = lock_context(&context)?;
            match ctx.find_object(&id).map_err(|e| context_status(&e))? {
                Some(object) => object.owner.as_bytes().to_vec(),
                None => Vec::new(),
            }
        }

        HostFn::SetObjectOwner => {
            let args: SetOwnerArgs = parse_args(&arg)?;
            require_own_namespace(&frame, &args.contract)?;
            let auth = MutationAuth {
                frame_sender: frame.sender,
                request_sender: args.sender,
            };
            let mut ctx = lock_context(&context)?;
            ctx.set_object_owner(&args.contract, &auth, &args.id, &args.owner)
                .map_err(|e| context_status(&e))?;
            Vec::new()
        }

        HostFn::GetObjectField => {
            let args: FieldQuery = parse_args(&arg)?;
            let mut ctx = lock_context(&context)?;
            match ctx
                .get_field(&args.contract, &args.id, &args.field)
                .map_err(|e| context_status(&e))?
            {
                Some(value) => value,
                None => Vec::new(),
            }
        }

        HostFn::SetObjectField => {
            let args: SetFieldArgs = parse_args(&arg)?;
            require_own_namespace(&frame, &args.contract)?;
            let auth = MutationAuth {
                frame_sender: frame.sender,
                request_sender: args.sender,
            };
            let value = serde_json::to_vec(&args.value)
                .map_err(|_| FaultCategory::InvalidParams.code())?;
            let mut ctx = lock_context(&context)?;
            ctx.set_field(&args.contract, &auth, &args.id, &args.field, value)
                .map_err(|e| context_status(&e))?;
            Vec::new()
        }

        HostFn::GetObjectContract => {
            let id = ObjectId::from_slice(&arg)
                .map_err(|_| FaultCategory::InvalidParams.code())?;
            let ctx = lock_context(&context)?;
            match ctx.find_object(&id).map_err(|e| context_status(&e))? {
                Some(object) => object.contract.as_bytes().to_vec(),
                None => Vec::new(),
            }
        }
    };

    if reply.is_empty() {
        return Ok(0);
    }
    if reply.len() > SHARED_BUFFER_SIZE {
        return Err(FaultCategory::BufferOverflow.code());
    }
    debit_gas(env, schedule.payload_cost(reply.len()))?;
    if let Err(err) = write_guest(env, &memory, buffer_ptr as u32, &reply) {
        return Err(record_fatal(env, err));
    }
    Ok(reply.len() as i32)
}

fn lock_context(
    context: &SharedContext,
) -> Result<std::sync::MutexGuard<'_, dyn BlockchainContext + 'static>, i32> {
    context
        .lock()
        .map_err(|_| FaultCategory::ExecutionError.code())
}

/// Object mutations must name the executing contract's own namespace;
/// the authorization rule is anchored to the frame, not to whatever
/// the guest claims.
fn require_own_namespace(frame: &Frame, claimed: &Address) -> Result<(), i32> {
    if claimed == &frame.contract {
        Ok(())
    } else {
        Err(FaultCategory::InvalidParams.code())
    }
}

fn op_cost(schedule: &GasSchedule, func: HostFn) -> u64 {
    match func {
        HostFn::GetSender | HostFn::GetContractAddress => schedule.scalar_read,
        HostFn::Transfer => schedule.transfer,
        HostFn::CreateObject | HostFn::DeleteObject | HostFn::SetObjectOwner => {
            schedule.object_write
        }
        HostFn::Call => schedule.cross_call_base,
        HostFn::GetObject
        | HostFn::GetObjectWithOwner
        | HostFn::GetObjectOwner
        | HostFn::GetObjectContract => schedule.object_lookup,
        HostFn::Log => schedule.log,
        HostFn::GetObjectField => schedule.field_read,
        HostFn::SetObjectField => schedule.field_write,
    }
}

fn record_fatal(env: &mut FunctionEnvMut<HostState>, err: RuntimeError) -> i32 {
    let inner = env.data().inner.clone();
    if let Ok(mut inner) = inner.lock() {
        inner.record_fatal(err);
    }
    FaultCategory::ExecutionError.code()
}

fn fatal_pointer(env: &mut FunctionEnvMut<HostState>, ptr: i32, len: i32) -> i32 {
    record_fatal(
        env,
        RuntimeError::InvalidPointer {
            offset: ptr as u64,
            len: len as u64,
            memory: 0,
        },
    )
}

// ─────────────────────────────────────────────────────────────────
// Scalar fast paths
// ─────────────────────────────────────────────────────────────────

fn get_block_height_fn(mut env: FunctionEnvMut<HostState>) -> i64 {
    let inner = env.data().inner.clone();
    let (context, schedule) = match inner.lock() {
        Ok(inner) => (inner.context.clone(), inner.schedule.clone()),
        Err(_) => return 0,
    };
    if debit_gas(&mut env, schedule.scalar_read).is_err() {
        return 0;
    }
    let result = match context.lock() {
        Ok(ctx) => ctx.block().height as i64,
        Err(_) => 0,
    };
    result
}

fn get_block_time_fn(mut env: FunctionEnvMut<HostState>) -> i64 {
    let inner = env.data().inner.clone();
    let (context, schedule) = match inner.lock() {
        Ok(inner) => (inner.context.clone(), inner.schedule.clone()),
        Err(_) => return 0,
    };
    if debit_gas(&mut env, schedule.scalar_read).is_err() {
        return 0;
    }
    let result = match context.lock() {
        Ok(ctx) => ctx.block().time,
        Err(_) => 0,
    };
    result
}

fn get_balance_fn(mut env: FunctionEnvMut<HostState>, addr_ptr: i32) -> i64 {
    let Some(memory) = env.data().memory.clone() else {
        return 0;
    };
    let bytes = match read_guest(&env, &memory, addr_ptr as u32, Address::LEN as u32) {
        Ok(bytes) => bytes,
        Err(err) => {
            record_fatal(&mut env, err);
            return 0;
        }
    };
    let Ok(addr) = Address::from_slice(&bytes) else {
        return 0;
    };
    let inner = env.data().inner.clone();
    let (context, schedule) = match inner.lock() {
        Ok(inner) => (inner.context.clone(), inner.schedule.clone()),
        Err(_) => return 0,
    };
    if debit_gas(&mut env, schedule.scalar_read).is_err() {
        return 0;
    }
    let result = match context.lock() {
        Ok(ctx) => ctx.balance(&addr).unwrap_or(0) as i64,
        Err(_) => 0,
    };
    result
}

// ─────────────────────────────────────────────────────────────────
// Import object construction
// ─────────────────────────────────────────────────────────────────

/// Create the `env` import module with all bridge host functions.
/// Called on the thread that owns the `Store`.
pub fn create_host_imports(store: &mut Store, env: &FunctionEnv<HostState>) -> Imports {
    let f_set = Function::new_typed_with_env(store, env, call_host_set_fn);
    let f_get = Function::new_typed_with_env(store, env, call_host_get_buffer_fn);
    let f_height = Function::new_typed_with_env(store, env, get_block_height_fn);
    let f_time = Function::new_typed_with_env(store, env, get_block_time_fn);
    let f_balance = Function::new_typed_with_env(store, env, get_balance_fn);

    imports! {
        "env" => {
            "call_host_set" => f_set,
            "call_host_get_buffer" => f_get,
            "get_block_height" => f_height,
            "get_block_time" => f_time,
            "get_balance" => f_balance,
        }
    }
}
