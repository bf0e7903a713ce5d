// ========================================
// INTEGRATION TESTS FOR MERIDIAN VM
// ========================================
//
// Deploy pipeline and engine behavior over the demo contracts, with a
// stub compiler standing in for the external toolchain (the Go
// sources still pass the full screener and ABI extractor; only the
// final WASM build is substituted).
//
// Usage:
//   cargo test --test integration_test
//
// ========================================

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use mvm_compiler::ContractCompiler;
use mvm_core::{Address, CompileError, ScreeningError, VmError};
use mvm_lang::{generate_dispatch, NoProbe, ScreenerConfig};
use mvm_state::MemoryContext;
use mvm_vm::{CodeRepository, Engine, EngineConfig, SharedContext};

fn fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("demos/contracts")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("fixture {}: {e}", path.display()))
}

/// Stands in for the toolchain: a minimal guest returning a fixed
/// result record, shaped like a three-output dispatch reply.
struct StubCompiler;

const STUB_RESULT: &str = r#"{"success":true,"data":["u1",7,null]}"#;

impl ContractCompiler for StubCompiler {
    fn compile(&self, _source: &str, _dispatch: &str) -> Result<Vec<u8>, CompileError> {
        let wat = format!(
            r#"(module
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
  (func (export "get_buffer_address") (result i32) (i32.const 1024))
  (data (i32.const 1024) "{data}")
  (func (export "handle_contract_call") (param i32 i32) (result i32)
    (i32.const {len}))
)"#,
            data = STUB_RESULT.replace('"', "\\\""),
            len = STUB_RESULT.len(),
        );
        Ok(wat::parse_str(&wat).expect("stub guest wat"))
    }
}

fn engine(dir: &std::path::Path) -> (Arc<Engine>, SharedContext) {
    engine_with_config(dir, EngineConfig::default())
}

fn engine_with_config(
    dir: &std::path::Path,
    config: EngineConfig,
) -> (Arc<Engine>, SharedContext) {
    let repo = CodeRepository::open(dir).unwrap();
    let context: SharedContext = Arc::new(Mutex::new(MemoryContext::new()));
    let engine = Engine::new(
        repo,
        context.clone(),
        Box::new(StubCompiler),
        Box::new(NoProbe),
        config,
    );
    (engine, context)
}

// ========================================
// DEPLOY PIPELINE
// ========================================

#[test]
fn deploy_persists_all_three_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine(dir.path());

    let address = engine.deploy(&fixture("counter.go")).unwrap();

    for ext in ["source", "wasm", "abi"] {
        assert!(
            dir.path().join(format!("{address}.{ext}")).exists(),
            "missing {ext}"
        );
    }

    let abi = engine.abi(&address).unwrap();
    let names: Vec<&str> = abi.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["Initialize", "Increment", "GetCounter", "Reset"]);
    assert_eq!(abi.package, "counter");
    assert_eq!(abi.events.len(), 1);
    assert_eq!(abi.events[0].name, "Incremented");
    assert_eq!(abi.events[0].params, vec!["by", "total"]);
}

#[test]
fn deploy_address_is_deterministic_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine(dir.path());
    let source = fixture("counter.go");

    let first = engine.deploy(&source).unwrap();
    let wasm_before = std::fs::read(dir.path().join(format!("{first}.wasm"))).unwrap();

    let second = engine.deploy(&source).unwrap();
    let wasm_after = std::fs::read(dir.path().join(format!("{first}.wasm"))).unwrap();

    assert_eq!(first, second);
    assert_eq!(wasm_before, wasm_after);
    assert_eq!(first, Address::for_source(&source));

    // different source, different address
    let other = engine.deploy(&fixture("bank.go")).unwrap();
    assert_ne!(first, other);
}

#[test]
fn failed_deploy_persists_nothing() {
    struct Refuse;
    impl ContractCompiler for Refuse {
        fn compile(&self, _: &str, _: &str) -> Result<Vec<u8>, CompileError> {
            Err(CompileError::ToolFailed {
                tool: "tinygo".into(),
                status: 1,
                output: "undefined symbol".into(),
            })
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let repo = CodeRepository::open(dir.path()).unwrap();
    let context: SharedContext = Arc::new(Mutex::new(MemoryContext::new()));
    let engine = Engine::new(
        repo,
        context,
        Box::new(Refuse),
        Box::new(NoProbe),
        EngineConfig::default(),
    );

    let err = engine.deploy(&fixture("counter.go")).unwrap_err();
    assert!(matches!(err, VmError::Compile(_)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

// ========================================
// SCREENING REJECTS (deploy surface)
// ========================================

fn deploy_err(source: &str) -> ScreeningError {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine(dir.path());
    match engine.deploy(source.as_bytes()).unwrap_err() {
        VmError::Screening(err) => err,
        other => panic!("expected screening rejection, got {other}"),
    }
}

#[test]
fn deploy_rejects_disallowed_import() {
    let err = deploy_err("package p\nimport \"os/exec\"\nfunc F() {}\n");
    assert!(matches!(err, ScreeningError::DisallowedImport { .. }));
}

#[test]
fn deploy_rejects_concurrent_spawn() {
    let err = deploy_err("package p\nfunc F() {\ngo leak()\n}\n");
    assert!(matches!(err, ScreeningError::RestrictedConstruct { .. }));
}

#[test]
fn deploy_rejects_toolchain_directive_comment() {
    let err = deploy_err("package p\n/*\n   go build -o x\n*/\nfunc F() {}\n");
    assert!(matches!(
        err,
        ScreeningError::RestrictedCommentDirective { .. }
    ));
}

#[test]
fn deploy_rejects_unexported_only_contract() {
    let err = deploy_err("package p\nfunc quiet() {}\n");
    assert!(matches!(err, ScreeningError::NoExportedFunction));
}

#[test]
fn deploy_rejects_oversized_source() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        screener: ScreenerConfig {
            max_source_size: 64,
            ..Default::default()
        },
        ..Default::default()
    };
    let (engine, _) = engine_with_config(dir.path(), config);
    let err = engine.deploy(&fixture("counter.go")).unwrap_err();
    assert!(matches!(
        err,
        VmError::Screening(ScreeningError::SizeExceeded { .. })
    ));
}

// ========================================
// EXECUTE SURFACE
// ========================================

#[test]
fn execute_validates_function_against_abi() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine(dir.path());
    let address = engine.deploy(&fixture("counter.go")).unwrap();

    let err = engine
        .execute(&address, "NoSuchFn", b"", &Address::ZERO, 0)
        .unwrap_err();
    assert!(matches!(err, VmError::Invocation(_)));
}

#[test]
fn execute_rejects_malformed_args_json() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine(dir.path());
    let address = engine.deploy(&fixture("counter.go")).unwrap();

    let err = engine
        .execute(&address, "Increment", b"{not json", &Address::ZERO, 0)
        .unwrap_err();
    assert!(matches!(err, VmError::Invocation(_)));
}

#[test]
fn execute_returns_result_record_and_gas() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine(dir.path());
    let address = engine.deploy(&fixture("registry.go")).unwrap();

    let outcome = engine
        .execute(
            &address,
            "GetUserInfo",
            br#"{"id":"u1"}"#,
            &Address::ZERO,
            0,
        )
        .unwrap();

    assert!(outcome.result.success);
    assert!(outcome.gas_used > 0);

    // multi-output shape: ordered array, error slot null
    let data = outcome.result.data.as_array().expect("array data");
    assert_eq!(data.len(), 3);
    assert!(data[0].is_string());
    assert!(data[1].is_number());
    assert!(data[2].is_null());
}

#[test]
fn execute_contract_packs_positional_args_by_abi_order() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine(dir.path());
    let address = engine.deploy(&fixture("registry.go")).unwrap();

    let outcome = engine
        .execute_contract(
            &address,
            "GetUserInfo",
            &[serde_json::json!("u1")],
            &Address::ZERO,
            0,
        )
        .unwrap();
    assert!(outcome.result.success);

    // too many positional args
    let err = engine
        .execute_contract(
            &address,
            "GetUserInfo",
            &[serde_json::json!("u1"), serde_json::json!(2)],
            &Address::ZERO,
            0,
        )
        .unwrap_err();
    assert!(matches!(err, VmError::Invocation(_)));
}

#[test]
fn execute_on_unknown_contract_is_a_repo_error() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = engine(dir.path());
    let err = engine
        .execute(&Address::from_bytes([9; 20]), "F", b"", &Address::ZERO, 0)
        .unwrap_err();
    assert!(matches!(err, VmError::Repo(_)));
}

// ========================================
// DISPATCH SHAPE (generated source)
// ========================================

#[test]
fn generated_dispatch_covers_every_export_of_the_fixture() {
    let source = String::from_utf8(fixture("counter.go")).unwrap();
    let abi = mvm_lang::extract::extract_abi_from_source(&source).unwrap();
    let dispatch = generate_dispatch(&abi);

    for name in ["Initialize", "Increment", "GetCounter", "Reset"] {
        assert!(dispatch.contains(&format!("registerHandler(\"{name}\", handle{name})")));
    }
    assert!(dispatch.contains("type IncrementParams struct {"));
    assert!(dispatch.contains("`json:\"value,omitempty\"`"));
    assert!(dispatch.contains("Increment(ambientContext(), args.Value)"));
}
