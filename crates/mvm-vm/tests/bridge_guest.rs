//! Bridge tests against real WASM guests.
//!
//! The guests are authored as WAT and implement the guest surface of
//! the bridge: exported memory, `allocate`, `get_buffer_address`, and
//! `handle_contract_call`. Host-visible effects (balances, objects,
//! logs) are asserted on the context; result payloads are static JSON
//! copied into the shared buffer.

use std::sync::{Arc, Mutex};

use mvm_core::{
    Abi, AbiFunction, Address, FaultCategory, GasSchedule, ObjectId, RuntimeError,
};
use mvm_state::{BlockInfo, BlockchainContext, MemoryContext};
use mvm_vm::{
    CodeRepository, Engine, EngineConfig, ExecutionOutcome, Invocation, NoCrossCall,
    SharedContext, WasmRuntime,
};

// Shared buffer lives at 1024; static payloads above it; heap above
// those.
const BUFFER: u32 = 1024;
const ARG_A: u32 = 10240;
const ARG_B: u32 = 11264;
const RESULT: u32 = 12288;

const OK_RESULT: &str = r#"{"success":true,"data":null}"#;

fn wat_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Common module scaffolding: imports, memory, allocator, buffer, a
/// byte-copy helper, and up to two data segments.
fn guest_module(data_a: &str, data_b: &str, handle_body: &str) -> Vec<u8> {
    let wat = format!(
        r#"(module
  (import "env" "call_host_set" (func $hset (param i32 i32 i32 i32) (result i32)))
  (import "env" "call_host_get_buffer" (func $hget (param i32 i32 i32 i32) (result i32)))
  (import "env" "get_block_height" (func $height (result i64)))
  (import "env" "get_block_time" (func $btime (result i64)))
  (import "env" "get_balance" (func $balance (param i32) (result i64)))
  (memory (export "memory") 2)
  (global $heap (mut i32) (i32.const 16384))
  (func (export "allocate") (param $size i32) (result i32)
    (local $ptr i32)
    global.get $heap
    local.set $ptr
    global.get $heap
    local.get $size
    i32.add
    global.set $heap
    local.get $ptr)
  (func (export "deallocate") (param i32 i32))
  (func (export "get_buffer_address") (result i32) (i32.const {BUFFER}))
  (func $copy (param $dst i32) (param $src i32) (param $n i32)
    (local $i i32)
    (block $done
      (loop $next
        local.get $i
        local.get $n
        i32.ge_u
        br_if $done
        local.get $dst
        local.get $i
        i32.add
        local.get $src
        local.get $i
        i32.add
        i32.load8_u
        i32.store8
        local.get $i
        i32.const 1
        i32.add
        local.set $i
        br $next)))
  (data (i32.const {ARG_A}) "{data_a}")
  (data (i32.const {ARG_B}) "{data_b}")
  (data (i32.const {RESULT}) "{result}")
  (func (export "handle_contract_call") (param $ptr i32) (param $len i32) (result i32)
    (local $status i32)
{handle_body})
)"#,
        result = wat_escape(OK_RESULT),
        data_a = wat_escape(data_a),
        data_b = wat_escape(data_b),
    );
    wat::parse_str(&wat).expect("valid wat")
}

/// Handler body: copy the static success record into the buffer and
/// return its length.
fn ret_ok() -> String {
    format!(
        "    i32.const {BUFFER}\n    i32.const {RESULT}\n    i32.const {len}\n    call $copy\n    i32.const {len}",
        len = OK_RESULT.len()
    )
}

/// Handler body: run one status-only host call on data segment A,
/// propagate a negative status, otherwise return the success record.
fn set_op_then_ok(func_id: i32, arg_len: usize) -> String {
    format!(
        r#"    i32.const {func_id}
    i32.const {ARG_A}
    i32.const {arg_len}
    i32.const {BUFFER}
    call $hset
    local.set $status
    local.get $status
    i32.const 0
    i32.lt_s
    if (result i32)
      local.get $status
    else
{ok}
    end"#,
        ok = ret_ok()
            .lines()
            .map(|l| format!("  {l}"))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

fn addr(byte: u8) -> Address {
    Address::from_bytes([byte; 20])
}

fn shared(ctx: MemoryContext) -> SharedContext {
    Arc::new(Mutex::new(ctx))
}

fn run(
    wasm: &[u8],
    context: &SharedContext,
    contract: Address,
    sender: Address,
    gas: u64,
) -> Result<ExecutionOutcome, RuntimeError> {
    let runtime = WasmRuntime::new(GasSchedule::default());
    let invocation = Invocation {
        contract,
        sender,
        function: "Run".into(),
        args: None,
        gas_limit: gas,
        depth: 1,
    };
    runtime.execute(wasm, &invocation, context.clone(), Arc::new(NoCrossCall))
}

// ─────────────────────────────────────────────────────────────────
// Protocol basics
// ─────────────────────────────────────────────────────────────────

#[test]
fn static_result_crosses_the_buffer() {
    let wasm = guest_module("", "", &ret_ok());
    let context = shared(MemoryContext::new());
    let outcome = run(&wasm, &context, addr(1), addr(2), 1_000_000).unwrap();
    assert!(outcome.result.success);
    assert!(outcome.result.data.is_null());
    assert!(outcome.gas_used > 0);
    assert!(outcome.gas_used < 1_000_000);
}

#[test]
fn zero_return_is_empty_success() {
    let wasm = guest_module("", "", "    i32.const 0");
    let context = shared(MemoryContext::new());
    let outcome = run(&wasm, &context, addr(1), addr(2), 1_000_000).unwrap();
    assert!(outcome.result.success);
    assert!(outcome.result.data.is_null());
}

#[test]
fn negative_returns_map_to_error_kinds() {
    let context = shared(MemoryContext::new());

    let wasm = guest_module("", "", "    i32.const -4");
    let err = run(&wasm, &context, addr(1), addr(2), 1_000_000).unwrap_err();
    assert!(matches!(err, RuntimeError::GuestPanic { .. }));

    let wasm = guest_module("", "", "    i32.const -5");
    let err = run(&wasm, &context, addr(1), addr(2), 1_000_000).unwrap_err();
    assert!(matches!(err, RuntimeError::GasExhausted { .. }));

    let wasm = guest_module("", "", "    i32.const -1");
    let err = run(&wasm, &context, addr(1), addr(2), 1_000_000).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::GuestFault(FaultCategory::FunctionNotFound)
    ));
}

#[test]
fn guest_trap_is_contained_as_panic() {
    let wasm = guest_module("", "", "    unreachable");
    let context = shared(MemoryContext::new());
    let err = run(&wasm, &context, addr(1), addr(2), 1_000_000).unwrap_err();
    assert!(matches!(err, RuntimeError::GuestPanic { .. }));
}

#[test]
fn tiny_gas_limit_exhausts() {
    let wasm = guest_module("", "", &ret_ok());
    let context = shared(MemoryContext::new());
    let err = run(&wasm, &context, addr(1), addr(2), 10).unwrap_err();
    assert!(matches!(err, RuntimeError::GasExhausted { .. }));
}

#[test]
fn missing_exports_are_reported() {
    let wasm = wat::parse_str(r#"(module (memory (export "memory") 1))"#).unwrap();
    let context = shared(MemoryContext::new());
    let err = run(&wasm, &context, addr(1), addr(2), 1_000_000).unwrap_err();
    assert!(matches!(err, RuntimeError::MissingExport { .. }));
}

// ─────────────────────────────────────────────────────────────────
// Transfer semantics
// ─────────────────────────────────────────────────────────────────

fn transfer_args(contract: Address, from: Address, to: Address, amount: u64) -> String {
    format!(
        r#"{{"contract":"{contract}","from":"{from}","to":"{to}","amount":{amount}}}"#
    )
}

#[test]
fn successful_transfer_moves_balances() {
    let contract = addr(1);
    let args = transfer_args(contract, addr(0xA), addr(0xB), 60);
    let wasm = guest_module(&args, "", &set_op_then_ok(3, args.len()));

    let mut ctx = MemoryContext::new();
    ctx.credit(&addr(0xA), 100).unwrap();
    let context = shared(ctx);

    let outcome = run(&wasm, &context, contract, addr(0xA), 1_000_000).unwrap();
    assert!(outcome.result.success);

    let ctx = context.lock().unwrap();
    assert_eq!(ctx.balance(&addr(0xA)).unwrap(), 40);
    assert_eq!(ctx.balance(&addr(0xB)).unwrap(), 60);
}

#[test]
fn insufficient_funds_fails_and_preserves_balances() {
    let contract = addr(1);
    let args = transfer_args(contract, addr(0xA), addr(0xB), 500);
    let wasm = guest_module(&args, "", &set_op_then_ok(3, args.len()));

    let mut ctx = MemoryContext::new();
    ctx.credit(&addr(0xA), 100).unwrap();
    let context = shared(ctx);

    let err = run(&wasm, &context, contract, addr(0xA), 1_000_000).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::GuestFault(FaultCategory::ExecutionError)
    ));

    let ctx = context.lock().unwrap();
    assert_eq!(ctx.balance(&addr(0xA)).unwrap(), 100);
    assert_eq!(ctx.balance(&addr(0xB)).unwrap(), 0);
}

// ─────────────────────────────────────────────────────────────────
// Logs and object fields
// ─────────────────────────────────────────────────────────────────

#[test]
fn log_appends_event() {
    let contract = addr(1);
    let args = format!(
        r#"{{"contract":"{contract}","event":"Ping","key_values":["k",1]}}"#
    );
    let wasm = guest_module(&args, "", &set_op_then_ok(9, args.len()));
    let context = shared(MemoryContext::new());

    run(&wasm, &context, contract, addr(2), 1_000_000).unwrap();

    let ctx = context.lock().unwrap();
    let events = ctx.events(&contract).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "Ping");
    assert_eq!(events[0].key_values.len(), 2);
}

#[test]
fn set_field_on_default_object_succeeds_for_any_sender() {
    let contract = addr(1);
    let zero_id = ObjectId::ZERO;
    let args = format!(
        r#"{{"contract":"{contract}","sender":"{sender}","id":"{zero_id}","field":"counter","value":8}}"#,
        sender = addr(9),
    );
    let wasm = guest_module(&args, "", &set_op_then_ok(13, args.len()));
    let context = shared(MemoryContext::new());

    run(&wasm, &context, contract, addr(9), 1_000_000).unwrap();

    let mut ctx = context.lock().unwrap();
    let value = ctx
        .get_field(&contract, &ObjectId::ZERO, "counter")
        .unwrap()
        .unwrap();
    assert_eq!(value, b"8");
}

#[test]
fn foreign_sender_write_is_denied_and_field_unchanged() {
    let contract = addr(1);
    let owner = addr(0xAA); // X
    let intruder = addr(0xBB); // Y

    let mut ctx = MemoryContext::new();
    let object = ctx.create_object(&contract, &owner).unwrap();
    let context = shared(ctx);

    let args = format!(
        r#"{{"contract":"{contract}","sender":"{intruder}","id":"{object}","field":"k","value":"v"}}"#
    );
    let wasm = guest_module(&args, "", &set_op_then_ok(13, args.len()));

    let err = run(&wasm, &context, contract, intruder, 1_000_000).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::GuestFault(FaultCategory::ExecutionError)
    ));

    let mut ctx = context.lock().unwrap();
    assert_eq!(ctx.get_field(&contract, &object, "k").unwrap(), None);
}

#[test]
fn mutations_must_name_own_namespace() {
    let contract = addr(1);
    let foreign = addr(2);
    // claims another contract's namespace in the argument record
    let args = format!(
        r#"{{"contract":"{foreign}","sender":"{s}","id":"{id}","field":"k","value":1}}"#,
        s = addr(3),
        id = ObjectId::ZERO,
    );
    let wasm = guest_module(&args, "", &set_op_then_ok(13, args.len()));
    let context = shared(MemoryContext::new());

    let err = run(&wasm, &context, contract, addr(3), 1_000_000).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::GuestFault(FaultCategory::InvalidParams)
    ));
}

// ─────────────────────────────────────────────────────────────────
// Buffer and memory bounds
// ─────────────────────────────────────────────────────────────────

#[test]
fn oversized_payload_fails_without_state_changes() {
    let contract = addr(1);
    // arg_len 9000 exceeds the 8 KiB shared buffer
    let body = format!(
        r#"    i32.const 9
    i32.const {ARG_A}
    i32.const 9000
    i32.const {BUFFER}
    call $hset"#
    );
    let wasm = guest_module("x", "", &body);
    let context = shared(MemoryContext::new());

    let err = run(&wasm, &context, contract, addr(2), 1_000_000).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::GuestFault(FaultCategory::BufferOverflow)
    ));
    assert!(context.lock().unwrap().events(&contract).unwrap().is_empty());
}

#[test]
fn out_of_range_pointer_aborts_with_invalid_pointer() {
    let body = format!(
        r#"    i32.const 9
    i32.const 2000000000
    i32.const 100
    i32.const {BUFFER}
    call $hset"#
    );
    let wasm = guest_module("", "", &body);
    let context = shared(MemoryContext::new());

    let err = run(&wasm, &context, addr(1), addr(2), 1_000_000).unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidPointer { .. }));
}

// ─────────────────────────────────────────────────────────────────
// Scalar imports
// ─────────────────────────────────────────────────────────────────

#[test]
fn block_metadata_reaches_the_guest() {
    // succeeds only when get_block_height() == 7 and get_block_time()
    // == 1700000000
    let body = format!(
        r#"    call $height
    i64.const 7
    i64.ne
    if (result i32)
      i32.const -3
    else
      call $btime
      i64.const 1700000000
      i64.ne
      if (result i32)
        i32.const -3
      else
{ok}
      end
    end"#,
        ok = ret_ok()
            .lines()
            .map(|l| format!("    {l}"))
            .collect::<Vec<_>>()
            .join("\n"),
    );
    let wasm = guest_module("", "", &body);

    let mut ctx = MemoryContext::new();
    ctx.set_block(BlockInfo {
        height: 7,
        time: 1_700_000_000,
        tx_hash: mvm_core::Hash::ZERO,
    });
    let context = shared(ctx);

    let outcome = run(&wasm, &context, addr(1), addr(2), 1_000_000).unwrap();
    assert!(outcome.result.success);
}

// ─────────────────────────────────────────────────────────────────
// Cross-contract recursion and the depth bound
// ─────────────────────────────────────────────────────────────────

#[test]
fn recursion_stops_at_the_depth_bound_keeping_prior_logs() {
    let contract = addr(0xCC);

    let log_args = format!(
        r#"{{"contract":"{contract}","event":"Depth","key_values":[]}}"#
    );
    let call_args = format!(
        r#"{{"contract":"{contract}","function":"Spin","args":null,"caller":"{contract}","gas_limit":0}}"#
    );

    // log, then recurse (dropping the nested status), then succeed
    let body = format!(
        r#"    i32.const 9
    i32.const {ARG_A}
    i32.const {log_len}
    i32.const {BUFFER}
    call $hset
    drop
    i32.const 5
    i32.const {ARG_B}
    i32.const {call_len}
    i32.const {BUFFER}
    call $hget
    drop
{ok}"#,
        log_len = log_args.len(),
        call_len = call_args.len(),
        ok = ret_ok(),
    );
    let wasm = guest_module(&log_args, &call_args, &body);

    let dir = tempfile::tempdir().unwrap();
    let repo = CodeRepository::open(dir.path()).unwrap();
    let abi = Abi {
        package: "spin".into(),
        functions: vec![AbiFunction {
            name: "Spin".into(),
            inputs: vec![],
            outputs: vec![],
        }],
        imports: vec![],
        events: vec![],
    };
    repo.store(&contract, b"package spin", Some(&wasm), &abi).unwrap();

    let context: SharedContext = shared(MemoryContext::new());
    let engine = Engine::new(
        repo,
        context.clone(),
        Box::new(FailCompiler),
        Box::new(mvm_lang::NoProbe),
        EngineConfig::default(),
    );

    let outcome = engine
        .execute(&contract, "Spin", b"", &contract, 4_000_000)
        .unwrap();
    assert!(outcome.result.success);

    let ctx = context.lock().unwrap();
    let events = ctx.events(&contract).unwrap();
    // depths 1..=8 each logged once; the ninth entry was refused
    assert_eq!(events.len(), 8);
}

/// Compiler stand-in for engine tests that never deploy.
struct FailCompiler;

impl mvm_compiler::ContractCompiler for FailCompiler {
    fn compile(
        &self,
        _source: &str,
        _dispatch: &str,
    ) -> Result<Vec<u8>, mvm_core::CompileError> {
        Err(mvm_core::CompileError::BadArtifact)
    }
}
