//! Engine: deploy and execute orchestration.
//!
//! Deploy: screen → extract ABI → derive the content address →
//! generate dispatch → compile → persist artifacts, with nothing
//! persisted on failure. Execute: resolve the function against the
//! ABI, serialize same-contract top-level invocations, snapshot the
//! context, run the module, commit on success and roll back otherwise.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use mvm_core::{
    Address, ContextError, GasSchedule, InvocationError, RuntimeError, VmError,
    DEFAULT_GAS_LIMIT, MAX_CALL_DEPTH,
};
use mvm_compiler::ContractCompiler;
use mvm_lang::{extract_abi, generate_dispatch, CompileProbe, Screener, ScreenerConfig};
use tracing::{debug, info, warn};

use crate::bridge::{CallArgs, CallReply};
use crate::host::SharedContext;
use crate::repo::CodeRepository;
use crate::runtime::{CrossCall, ExecutionOutcome, Invocation, WasmRuntime};

pub struct EngineConfig {
    pub screener: ScreenerConfig,
    pub gas_schedule: GasSchedule,
    pub default_gas_limit: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            screener: ScreenerConfig::default(),
            gas_schedule: GasSchedule::default(),
            default_gas_limit: DEFAULT_GAS_LIMIT,
        }
    }
}

pub struct Engine {
    repo: CodeRepository,
    context: SharedContext,
    compiler: Box<dyn ContractCompiler + Send + Sync>,
    probe: Box<dyn CompileProbe + Send + Sync>,
    screener: Screener,
    runtime: WasmRuntime,
    default_gas_limit: u64,
    /// Top-level executions on the same contract serialize here.
    /// Nested frames reenter without relocking.
    locks: Mutex<BTreeMap<Address, Arc<Mutex<()>>>>,
    self_ref: Weak<Engine>,
}

impl Engine {
    pub fn new(
        repo: CodeRepository,
        context: SharedContext,
        compiler: Box<dyn ContractCompiler + Send + Sync>,
        probe: Box<dyn CompileProbe + Send + Sync>,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Engine {
            repo,
            context,
            compiler,
            probe,
            screener: Screener::new(config.screener),
            runtime: WasmRuntime::new(config.gas_schedule),
            default_gas_limit: config.default_gas_limit,
            locks: Mutex::new(BTreeMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn repo(&self) -> &CodeRepository {
        &self.repo
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// The ABI of a deployed contract.
    pub fn abi(&self, contract: &Address) -> Result<mvm_core::Abi, VmError> {
        Ok(self.repo.load_abi(contract)?)
    }

    // ── deploy ───────────────────────────────────────────────────

    /// Screen, compile, and persist a contract. Returns its
    /// content-derived address. Deploying the same source twice is a
    /// no-op with the same address.
    pub fn deploy(&self, source: &[u8]) -> Result<Address, VmError> {
        let file = self.screener.screen(source, self.probe.as_ref())?;
        let abi = extract_abi(&file)?;
        let address = Address::for_source(source);

        if self.repo.has_contract(&address) {
            debug!(%address, "redeploy of identical source, keeping artifacts");
            return Ok(address);
        }

        if !abi.has_exports() {
            // Pure library module: retain source, nothing to run.
            self.repo.store(&address, source, None, &abi)?;
            info!(%address, package = %abi.package, "library module deployed");
            return Ok(address);
        }

        let text = std::str::from_utf8(source).map_err(|e| {
            mvm_core::AbiError(format!("source is not valid UTF-8: {e}"))
        })?;
        let dispatch = generate_dispatch(&abi);
        let wasm = self.compiler.compile(text, &dispatch)?;
        self.repo.store(&address, source, Some(&wasm), &abi)?;
        info!(
            %address,
            package = %abi.package,
            functions = abi.functions.len(),
            wasm_bytes = wasm.len(),
            "contract deployed"
        );
        Ok(address)
    }

    // ── execute ──────────────────────────────────────────────────

    /// Run a named function with a JSON-object argument payload
    /// (empty slice for none). Returns the execution result record
    /// and the gas bill.
    pub fn execute(
        &self,
        contract: &Address,
        function: &str,
        args_json: &[u8],
        sender: &Address,
        gas_limit: u64,
    ) -> Result<ExecutionOutcome, VmError> {
        let abi = self.repo.load_abi(contract)?;
        if abi.function(function).is_none() {
            return Err(InvocationError::UnknownFunction {
                name: function.to_string(),
            }
            .into());
        }

        let args = if args_json.is_empty() {
            None
        } else {
            Some(
                serde_json::from_slice(args_json)
                    .map_err(|e| InvocationError::BadParams(e.to_string()))?,
            )
        };

        let gas_limit = if gas_limit == 0 {
            self.default_gas_limit
        } else {
            gas_limit
        };

        let invocation = Invocation {
            contract: *contract,
            sender: *sender,
            function: function.to_string(),
            args,
            gas_limit,
            depth: 1,
        };

        let lock = self.contract_lock(contract);
        let _guard = lock
            .lock()
            .map_err(|_| ContextError::Backing("contract lock poisoned".into()))?;

        let wasm = self.repo.load_wasm(contract)?;
        let dispatcher = self.dispatcher();

        self.with_context(|ctx| ctx.begin())?;
        let run = self
            .runtime
            .execute(&wasm, &invocation, self.context.clone(), dispatcher);

        match run {
            Ok(outcome) if outcome.result.success => {
                self.with_context(|ctx| ctx.commit())?;
                Ok(outcome)
            }
            Ok(outcome) => {
                // Contract-level failure: the invocation applies no
                // state changes.
                self.with_context(|ctx| ctx.rollback())?;
                Ok(outcome)
            }
            Err(err) => {
                warn!(%contract, function, error = %err, "invocation aborted, rolling back");
                self.with_context(|ctx| ctx.rollback())?;
                Err(err.into())
            }
        }
    }

    /// Convenience entry: positional args are packed into the
    /// parameter record by ABI name and order.
    pub fn execute_contract(
        &self,
        contract: &Address,
        function: &str,
        args: &[serde_json::Value],
        sender: &Address,
        gas_limit: u64,
    ) -> Result<ExecutionOutcome, VmError> {
        let abi = self.repo.load_abi(contract)?;
        let func = abi
            .function(function)
            .ok_or_else(|| InvocationError::UnknownFunction {
                name: function.to_string(),
            })?;

        let inputs = func.caller_inputs();
        if args.len() > inputs.len() {
            return Err(InvocationError::BadParams(format!(
                "{} takes {} argument(s), got {}",
                function,
                inputs.len(),
                args.len()
            ))
            .into());
        }

        let mut record = serde_json::Map::new();
        for (input, value) in inputs.iter().zip(args) {
            if input.name.is_empty() {
                return Err(InvocationError::BadParams(format!(
                    "{function} has unnamed parameters, use execute with a JSON object"
                ))
                .into());
            }
            record.insert(input.name.clone(), value.clone());
        }
        let payload = if record.is_empty() {
            Vec::new()
        } else {
            serde_json::to_vec(&serde_json::Value::Object(record))
                .map_err(|e| InvocationError::BadParams(e.to_string()))?
        };

        self.execute(contract, function, &payload, sender, gas_limit)
    }

    // ── internals ────────────────────────────────────────────────

    fn dispatcher(&self) -> Arc<dyn CrossCall> {
        self.self_ref
            .upgrade()
            .expect("engine dispatcher outlived engine")
    }

    fn contract_lock(&self, contract: &Address) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(*contract)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn with_context<T>(
        &self,
        f: impl FnOnce(&mut dyn mvm_state::BlockchainContext) -> Result<T, ContextError>,
    ) -> Result<T, VmError> {
        let mut guard = self
            .context
            .lock()
            .map_err(|_| ContextError::Backing("context poisoned".into()))?;
        Ok(f(&mut *guard)?)
    }
}

impl CrossCall for Engine {
    /// Nested invocation: its own frame, bumped depth, no re-locking
    /// (the top-level frame already owns the contract serialization),
    /// no separate snapshot (the outer invocation's transaction covers
    /// it).
    fn call(&self, args: &CallArgs, depth: u32, gas_limit: u64) -> Result<CallReply, VmError> {
        if depth > MAX_CALL_DEPTH {
            return Err(RuntimeError::CallDepthExceeded {
                max: MAX_CALL_DEPTH,
            }
            .into());
        }

        let abi = self
            .repo
            .load_abi(&args.contract)
            .map_err(|_| ContextError::TargetMissing {
                address: args.contract,
            })?;
        if abi.function(&args.function).is_none() {
            return Err(InvocationError::UnknownFunction {
                name: args.function.clone(),
            }
            .into());
        }
        let wasm = self
            .repo
            .load_wasm(&args.contract)
            .map_err(|_| ContextError::TargetMissing {
                address: args.contract,
            })?;

        let invocation = Invocation {
            contract: args.contract,
            sender: args.caller,
            function: args.function.clone(),
            args: args.args.clone(),
            gas_limit,
            depth,
        };

        let outcome = self.runtime.execute(
            &wasm,
            &invocation,
            self.context.clone(),
            self.dispatcher(),
        )?;

        if !outcome.result.success {
            return Err(
                RuntimeError::GuestFault(mvm_core::FaultCategory::ExecutionError).into(),
            );
        }

        Ok(CallReply {
            data: outcome.result.data,
            gas_used: outcome.gas_used,
        })
    }
}
