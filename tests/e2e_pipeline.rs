// ========================================
// END-TO-END PIPELINE TESTS
// ========================================
//
// Drives the real compiler driver against fake toolchain binaries
// (shell scripts) so the staging, manifest, and invocation behavior
// are exercised without Go or TinyGo installed, and runs the engine
// over a sled-backed state directory.
//
// Usage:
//   cargo test --test e2e_pipeline
//
// ========================================

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use mvm_compiler::{rewrite_package, CompilerDriver, ContractCompiler, ToolchainConfig};
use mvm_core::Address;
use mvm_lang::NoProbe;
use mvm_state::{BlockchainContext, MemoryContext, PersistentContext, SledKv};
use mvm_vm::{CodeRepository, Engine, EngineConfig, SharedContext};

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("demos/contracts")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("fixture {}: {e}", path.display()))
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

/// A minimal but valid WASM module for the fake build tool to emit.
fn tiny_wasm() -> Vec<u8> {
    wat::parse_str("(module)").unwrap()
}

#[test]
fn driver_stages_workspace_and_collects_artifact() {
    let tools = tempfile::tempdir().unwrap();
    let capture = tempfile::tempdir().unwrap();

    let wasm_path = tools.path().join("prebuilt.wasm");
    std::fs::write(&wasm_path, tiny_wasm()).unwrap();

    // fake resolver: records nothing, succeeds
    let go = tools.path().join("fake-go");
    write_script(&go, "#!/bin/sh\nexit 0\n");

    // fake build tool: captures the staged workspace, emits the
    // prebuilt artifact under the requested output name
    let build = tools.path().join("fake-tinygo");
    write_script(
        &build,
        &format!(
            "#!/bin/sh\ncp contract.go dispatch.go bridge.go go.mod {capture}/\ncp {wasm} \"$3\"\n",
            capture = capture.path().display(),
            wasm = wasm_path.display(),
        ),
    );

    let driver = CompilerDriver::new(ToolchainConfig {
        go: go.display().to_string(),
        build_tool: build.display().to_string(),
        sdk_replace: Some("../sdk".into()),
        keep_workspace: false,
    });

    let source = String::from_utf8(fixture("counter.go")).unwrap();
    let dispatch = "package counter\n\nfunc init() {}\n";
    let artifact = driver.compile(&source, dispatch).unwrap();
    assert_eq!(artifact, tiny_wasm());

    // staged contract had its package rewritten to the entry package
    let staged_contract =
        std::fs::read_to_string(capture.path().join("contract.go")).unwrap();
    assert!(staged_contract.contains("package main"));
    assert!(!staged_contract.contains("package counter"));
    assert!(staged_contract.contains("func Increment"));

    let staged_dispatch =
        std::fs::read_to_string(capture.path().join("dispatch.go")).unwrap();
    assert!(staged_dispatch.starts_with("package main"));

    // bridge template appended verbatim
    let staged_bridge = std::fs::read_to_string(capture.path().join("bridge.go")).unwrap();
    assert!(staged_bridge.contains("handle_contract_call"));
    assert!(staged_bridge.contains("call_host_set"));

    // manifest declares the module and the local SDK replacement
    let manifest = std::fs::read_to_string(capture.path().join("go.mod")).unwrap();
    assert!(manifest.contains("module contract"));
    assert!(manifest.contains("require github.com/meridian-net/vm v0.0.0"));
    assert!(manifest.contains("replace github.com/meridian-net/vm => ../sdk"));
}

#[test]
fn driver_surfaces_build_failures_with_output() {
    let tools = tempfile::tempdir().unwrap();

    let go = tools.path().join("fake-go");
    write_script(&go, "#!/bin/sh\nexit 0\n");
    let build = tools.path().join("fake-tinygo");
    write_script(&build, "#!/bin/sh\necho 'undefined: frobnicate' >&2\nexit 2\n");

    let driver = CompilerDriver::new(ToolchainConfig {
        go: go.display().to_string(),
        build_tool: build.display().to_string(),
        sdk_replace: None,
        keep_workspace: false,
    });

    let err = driver
        .compile("package p\nfunc F() {}\n", "package p\n")
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("frobnicate"), "got: {message}");
}

#[test]
fn rewrite_package_keeps_fixture_body_intact() {
    let source = String::from_utf8(fixture("registry.go")).unwrap();
    let rewritten = rewrite_package(&source, "main");
    assert!(rewritten.starts_with("package main"));
    assert!(rewritten.contains("func GetUserInfo"));
    assert_eq!(
        source.lines().count(),
        rewritten.lines().count(),
        "rewrite must only touch the package clause"
    );
}

// ========================================
// SLED-BACKED ENGINE RUN
// ========================================

/// Guest that logs one event and succeeds; used to observe durable
/// state across engine lifetimes.
struct LoggingGuestCompiler {
    contract_hex: String,
}

impl ContractCompiler for LoggingGuestCompiler {
    fn compile(&self, _: &str, _: &str) -> Result<Vec<u8>, mvm_core::CompileError> {
        let log_args = format!(
            r#"{{"contract":"{}","event":"Ran","key_values":[]}}"#,
            self.contract_hex
        );
        let ok = r#"{"success":true,"data":null}"#;
        let wat = format!(
            r#"(module
  (import "env" "call_host_set" (func $hset (param i32 i32 i32 i32) (result i32)))
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
  (data (i32.const 1024) "{ok_escaped}")
  (data (i32.const 10240) "{log_escaped}")
  (func (export "handle_contract_call") (param i32 i32) (result i32)
    i32.const 9
    i32.const 10240
    i32.const {log_len}
    i32.const 1024
    call $hset
    drop
    i32.const {ok_len})
)"#,
            ok_escaped = ok.replace('"', "\\\""),
            log_escaped = log_args.replace('"', "\\\""),
            log_len = log_args.len(),
            ok_len = ok.len(),
        );
        Ok(wat::parse_str(&wat).expect("logging guest wat"))
    }
}

#[test]
fn sled_backed_state_survives_engine_restart() {
    let repo_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();
    let source = fixture("counter.go");
    let address = Address::for_source(&source);

    {
        let repo = CodeRepository::open(repo_dir.path()).unwrap();
        let context: SharedContext = Arc::new(Mutex::new(PersistentContext::new(
            SledKv::open(state_dir.path()).unwrap(),
        )));
        let engine = Engine::new(
            repo,
            context.clone(),
            Box::new(LoggingGuestCompiler {
                contract_hex: address.to_hex(),
            }),
            Box::new(NoProbe),
            EngineConfig::default(),
        );

        let deployed = engine.deploy(&source).unwrap();
        assert_eq!(deployed, address);

        let outcome = engine
            .execute(&address, "GetCounter", b"", &Address::ZERO, 0)
            .unwrap();
        assert!(outcome.result.success);
    }

    // the log written through the bridge is durable
    let context = PersistentContext::new(SledKv::open(state_dir.path()).unwrap());
    let events = context.events(&address).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "Ran");

    // and the repository can be reopened independently
    let repo = CodeRepository::open(repo_dir.path()).unwrap();
    assert!(repo.has_contract(&address));
    assert_eq!(repo.load_abi(&address).unwrap().package, "counter");
}

#[test]
fn rolled_back_invocation_leaves_sled_state_untouched() {
    let repo_dir = tempfile::tempdir().unwrap();
    let state_dir = tempfile::tempdir().unwrap();

    // guest immediately reports a panic category
    struct FailGuest;
    impl ContractCompiler for FailGuest {
        fn compile(&self, _: &str, _: &str) -> Result<Vec<u8>, mvm_core::CompileError> {
            let wat = r#"(module
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
  (func (export "handle_contract_call") (param i32 i32) (result i32)
    (i32.const -4))
)"#;
            Ok(wat::parse_str(wat).unwrap())
        }
    }

    let source = fixture("counter.go");
    let repo = CodeRepository::open(repo_dir.path()).unwrap();
    let context: SharedContext = Arc::new(Mutex::new(PersistentContext::new(
        SledKv::open(state_dir.path()).unwrap(),
    )));
    let engine = Engine::new(
        repo,
        context.clone(),
        Box::new(FailGuest),
        Box::new(NoProbe),
        EngineConfig::default(),
    );

    let address = engine.deploy(&source).unwrap();
    let err = engine
        .execute(&address, "Initialize", b"", &Address::ZERO, 0)
        .unwrap_err();
    assert!(matches!(
        err,
        mvm_core::VmError::Runtime(mvm_core::RuntimeError::GuestPanic { .. })
    ));

    // nothing from the aborted invocation reached the store
    let ctx = context.lock().unwrap();
    assert!(ctx.events(&address).unwrap().is_empty());
}

#[test]
fn in_memory_and_sled_contexts_agree_on_rollback_semantics() {
    // the same failed-transfer sequence leaves both backings unchanged
    let alice = Address::from_bytes([1; 20]);
    let bob = Address::from_bytes([2; 20]);

    let mut mem = MemoryContext::new();
    mem.credit(&alice, 100).unwrap();
    mem.begin().unwrap();
    assert!(mem.transfer(&alice, &bob, 500).is_err());
    mem.rollback().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut sled_ctx = PersistentContext::new(SledKv::open(dir.path()).unwrap());
    sled_ctx.credit(&alice, 100).unwrap();
    sled_ctx.begin().unwrap();
    assert!(sled_ctx.transfer(&alice, &bob, 500).is_err());
    sled_ctx.rollback().unwrap();

    assert_eq!(
        mem.balance(&alice).unwrap(),
        sled_ctx.balance(&alice).unwrap()
    );
    assert_eq!(mem.balance(&bob).unwrap(), sled_ctx.balance(&bob).unwrap());
}
