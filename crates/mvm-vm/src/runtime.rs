//! WASM runtime: one instance per invocation.
//!
//! Compiles the module with Cranelift plus deterministic instruction
//! metering (1 gas per instruction), instantiates it with the bridge
//! imports, drives `handle_contract_call`, interprets the returned
//! status, and tears the instance down. Nothing survives in the guest
//! between invocations.

use std::sync::{Arc, Mutex};

use mvm_core::{
    Address, FaultCategory, GasSchedule, RuntimeError, VmError, MAX_CALL_DEPTH,
    SHARED_BUFFER_SIZE,
};
use tracing::{debug, trace};
use wasmer::{CompilerConfig, FunctionEnv, Instance, Module, Store, TypedFunction};
use wasmer_compiler_cranelift::Cranelift;
use wasmer_middlewares::metering::{get_remaining_points, MeteringPoints};
use wasmer_middlewares::Metering;

use crate::bridge::{CallArgs, CallReply, ExecutionResult, InvocationRecord};
use crate::host::{create_host_imports, Frame, HostInner, HostState, SharedContext};

/// One requested contract invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub contract: Address,
    pub sender: Address,
    pub function: String,
    pub args: Option<serde_json::Value>,
    pub gas_limit: u64,
    /// Nested call chain length; top-level executions are depth 1.
    pub depth: u32,
}

/// Result of one invocation plus its gas bill.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub result: ExecutionResult,
    pub gas_used: u64,
}

/// Cross-contract dispatch seam: host function 5 re-enters the engine
/// through this trait.
pub trait CrossCall: Send + Sync {
    fn call(&self, args: &CallArgs, depth: u32, gas_limit: u64) -> Result<CallReply, VmError>;
}

/// Dispatcher for standalone runtime use: every cross-contract call
/// fails with a missing-target error.
pub struct NoCrossCall;

impl CrossCall for NoCrossCall {
    fn call(&self, args: &CallArgs, _depth: u32, _gas: u64) -> Result<CallReply, VmError> {
        Err(mvm_core::ContextError::TargetMissing {
            address: args.contract,
        }
        .into())
    }
}

/// Status code a failed nested call surfaces to the calling guest.
pub fn call_status(err: &VmError) -> i32 {
    match err {
        VmError::Runtime(RuntimeError::CallDepthExceeded { .. }) => {
            FaultCategory::DepthExceeded.code()
        }
        VmError::Runtime(RuntimeError::GasExhausted { .. }) => FaultCategory::OutOfGas.code(),
        VmError::Runtime(RuntimeError::GuestPanic { .. }) => FaultCategory::Panic.code(),
        VmError::Runtime(RuntimeError::GuestFault(category)) => category.code(),
        VmError::Invocation(mvm_core::InvocationError::UnknownFunction { .. }) => {
            FaultCategory::FunctionNotFound.code()
        }
        VmError::Invocation(mvm_core::InvocationError::BadParams(_)) => {
            FaultCategory::InvalidParams.code()
        }
        _ => FaultCategory::ExecutionError.code(),
    }
}

pub struct WasmRuntime {
    schedule: GasSchedule,
}

impl WasmRuntime {
    pub fn new(schedule: GasSchedule) -> Self {
        Self { schedule }
    }

    /// Run one invocation against a fresh instance.
    pub fn execute(
        &self,
        wasm: &[u8],
        invocation: &Invocation,
        context: SharedContext,
        dispatcher: Arc<dyn CrossCall>,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        if invocation.depth > MAX_CALL_DEPTH {
            return Err(RuntimeError::CallDepthExceeded {
                max: MAX_CALL_DEPTH,
            });
        }
        if wasm.len() < 4 || &wasm[..4] != b"\0asm" {
            return Err(RuntimeError::ModuleLoadFailed(
                "missing WASM magic header".into(),
            ));
        }

        // Compilation precharge, the rest becomes the metering budget.
        let compile_gas = self.schedule.compile_cost(wasm.len());
        if compile_gas > invocation.gas_limit {
            return Err(RuntimeError::GasExhausted {
                limit: invocation.gas_limit,
            });
        }
        let budget = invocation.gas_limit - compile_gas;

        // Deterministic metering: every WASM instruction costs 1 gas.
        let cost_fn = |_operator: &wasmer::wasmparser::Operator| -> u64 { 1 };
        let metering = Arc::new(Metering::new(budget, cost_fn));
        let mut compiler = Cranelift::default();
        compiler.push_middleware(metering);
        let mut store = Store::new(compiler);

        let module = Module::new(&store, wasm)
            .map_err(|e| RuntimeError::ModuleLoadFailed(e.to_string()))?;

        let inner = Arc::new(Mutex::new(HostInner {
            frame: Frame {
                contract: invocation.contract,
                sender: invocation.sender,
                gas_limit: invocation.gas_limit,
                depth: invocation.depth,
            },
            context,
            dispatcher,
            schedule: self.schedule.clone(),
            fatal: None,
        }));
        let env = FunctionEnv::new(
            &mut store,
            HostState {
                memory: None,
                gas_remaining: None,
                gas_exhausted: None,
                inner: Arc::clone(&inner),
            },
        );

        let imports = create_host_imports(&mut store, &env);
        let instance = Instance::new(&mut store, &module, &imports)
            .map_err(|e| RuntimeError::InstantiationFailed(e.to_string()))?;

        let memory = instance
            .exports
            .get_memory("memory")
            .map_err(|_| RuntimeError::MissingExport {
                name: "memory".into(),
            })?
            .clone();
        {
            let state = env.as_mut(&mut store);
            state.memory = Some(memory.clone());
        }
        let gas_remaining = instance
            .exports
            .get_global("wasmer_metering_remaining_points")
            .ok()
            .cloned();
        let gas_exhausted = instance
            .exports
            .get_global("wasmer_metering_points_exhausted")
            .ok()
            .cloned();
        {
            let state = env.as_mut(&mut store);
            state.gas_remaining = gas_remaining;
            state.gas_exhausted = gas_exhausted;
        }

        // Shared buffer base, read once per invocation.
        let get_buffer: TypedFunction<(), i32> = instance
            .exports
            .get_typed_function(&store, "get_buffer_address")
            .map_err(|_| RuntimeError::MissingExport {
                name: "get_buffer_address".into(),
            })?;
        let buffer_base = get_buffer
            .call(&mut store)
            .map_err(|e| RuntimeError::GuestPanic {
                message: format!("get_buffer_address trapped: {e}"),
            })? as u32;

        let memory_size = memory.view(&store).data_size();
        if buffer_base as u64 + SHARED_BUFFER_SIZE as u64 > memory_size {
            return Err(RuntimeError::InvalidPointer {
                offset: buffer_base as u64,
                len: SHARED_BUFFER_SIZE as u64,
                memory: memory_size,
            });
        }

        // Serialize the invocation record into guest memory.
        let record = InvocationRecord {
            contract: invocation.contract,
            sender: invocation.sender,
            function: invocation.function.clone(),
            args: invocation.args.clone(),
            gas_limit: invocation.gas_limit,
        };
        let input = serde_json::to_vec(&record)
            .map_err(|e| RuntimeError::ModuleLoadFailed(format!("input record: {e}")))?;

        let allocate: TypedFunction<i32, i32> = instance
            .exports
            .get_typed_function(&store, "allocate")
            .map_err(|_| RuntimeError::MissingExport {
                name: "allocate".into(),
            })?;
        let input_ptr = allocate
            .call(&mut store, input.len() as i32)
            .map_err(|e| RuntimeError::GuestPanic {
                message: format!("allocate trapped: {e}"),
            })? as u32;

        let view = memory.view(&store);
        if input_ptr as u64 + input.len() as u64 > view.data_size() {
            return Err(RuntimeError::InvalidPointer {
                offset: input_ptr as u64,
                len: input.len() as u64,
                memory: view.data_size(),
            });
        }
        view.write(input_ptr as u64, &input)
            .map_err(|_| RuntimeError::InvalidPointer {
                offset: input_ptr as u64,
                len: input.len() as u64,
                memory: memory_size,
            })?;

        trace!(
            contract = %invocation.contract,
            function = %invocation.function,
            depth = invocation.depth,
            "invoking guest"
        );

        let entry: TypedFunction<(i32, i32), i32> = instance
            .exports
            .get_typed_function(&store, "handle_contract_call")
            .map_err(|_| RuntimeError::MissingExport {
                name: "handle_contract_call".into(),
            })?;
        let call_result = entry.call(&mut store, input_ptr as i32, input.len() as i32);

        // Gas accounting before interpreting the outcome.
        let (exec_gas, exhausted) = match get_remaining_points(&mut store, &instance) {
            MeteringPoints::Remaining(remaining) => (budget - remaining, false),
            MeteringPoints::Exhausted => (budget, true),
        };
        let gas_used = compile_gas + exec_gas;

        // A fatal error recorded by a host call outranks whatever the
        // guest returned afterwards.
        if let Some(fatal) = inner
            .lock()
            .map_err(|_| RuntimeError::InstantiationFailed("host state poisoned".into()))?
            .fatal
            .take()
        {
            return Err(fatal);
        }

        let ret = match call_result {
            Ok(ret) => ret,
            Err(trap) => {
                if exhausted {
                    return Err(RuntimeError::GasExhausted {
                        limit: invocation.gas_limit,
                    });
                }
                return Err(RuntimeError::GuestPanic {
                    message: trap.to_string(),
                });
            }
        };

        let result = if ret == 0 {
            ExecutionResult::ok(serde_json::Value::Null)
        } else if ret < 0 {
            return Err(match FaultCategory::from_code(ret) {
                Some(FaultCategory::Panic) => RuntimeError::GuestPanic {
                    message: "guest fault barrier".into(),
                },
                Some(FaultCategory::OutOfGas) => RuntimeError::GasExhausted {
                    limit: invocation.gas_limit,
                },
                Some(FaultCategory::DepthExceeded) => RuntimeError::CallDepthExceeded {
                    max: MAX_CALL_DEPTH,
                },
                Some(category) => RuntimeError::GuestFault(category),
                None => RuntimeError::GuestFault(FaultCategory::ExecutionError),
            });
        } else {
            let len = ret as usize;
            if len > SHARED_BUFFER_SIZE {
                return Err(RuntimeError::GuestFault(FaultCategory::BufferOverflow));
            }
            let view = memory.view(&store);
            let mut payload = vec![0u8; len];
            view.read(buffer_base as u64, &mut payload).map_err(|_| {
                RuntimeError::InvalidPointer {
                    offset: buffer_base as u64,
                    len: len as u64,
                    memory: memory_size,
                }
            })?;
            serde_json::from_slice(&payload).map_err(|e| RuntimeError::GuestPanic {
                message: format!("malformed execution result: {e}"),
            })?
        };

        debug!(
            contract = %invocation.contract,
            function = %invocation.function,
            gas_used,
            success = result.success,
            "invocation finished"
        );

        Ok(ExecutionOutcome { result, gas_used })
    }
}
