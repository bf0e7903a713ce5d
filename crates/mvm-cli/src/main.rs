// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MERIDIAN VM CLI - deploy and execute contracts against a local
// repository and state directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use colored::*;

use mvm_compiler::{CompilerDriver, ToolchainConfig, ToolchainProbe};
use mvm_core::Address;
use mvm_lang::NoProbe;
use mvm_state::{MemoryContext, PersistentContext, SledKv};
use mvm_vm::{CodeRepository, Engine, EngineConfig, SharedContext};

#[derive(Parser)]
#[command(name = "mvm")]
#[command(about = "Meridian VM - sandboxed WASM smart contracts", long_about = None)]
#[command(version)]
struct Cli {
    /// Contract repository directory
    #[arg(short, long, env = "MVM_REPO", default_value = "./repo")]
    repo: PathBuf,

    /// State directory (sled). In-memory state when omitted.
    #[arg(short, long, env = "MVM_STATE")]
    state: Option<PathBuf>,

    /// TOML config with screening bounds, gas schedule, and toolchain
    /// binaries
    #[arg(short, long, env = "MVM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Screen, compile, and persist a contract
    Deploy {
        /// Contract source file
        #[arg(short, long)]
        source: PathBuf,

        /// Local SDK directory substituted for the core module
        #[arg(long, default_value = "./sdk")]
        sdk: PathBuf,

        /// Dependency resolver binary (config/toolchain default: go)
        #[arg(long)]
        go: Option<String>,

        /// WASM build binary (config/toolchain default: tinygo)
        #[arg(long)]
        build_tool: Option<String>,

        /// Skip the toolchain compile probe during screening
        #[arg(long)]
        no_probe: bool,
    },

    /// Execute a function on a deployed contract
    Execute {
        /// Contract address (lowercase hex)
        #[arg(short, long)]
        contract: String,

        /// Function name as exported by the contract
        #[arg(short, long)]
        function: String,

        /// JSON object with the function's named arguments
        #[arg(short, long, default_value = "")]
        args: String,

        /// Sender address (zero when omitted)
        #[arg(long)]
        sender: Option<String>,

        /// Gas limit (engine default when omitted)
        #[arg(short, long, default_value_t = 0)]
        gas: u64,
    },

    /// Print the persisted ABI of a contract
    Show {
        #[arg(short, long)]
        contract: String,
    },

    /// List deployed contract addresses
    List,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let vm_config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            mvm_core::VmConfig::from_toml(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => mvm_core::VmConfig::default(),
    };
    let engine_config = || EngineConfig {
        screener: mvm_lang::ScreenerConfig {
            max_source_size: vm_config.max_source_size,
            allowed_imports: vm_config.allowed_imports.clone(),
        },
        gas_schedule: vm_config.gas.clone(),
        default_gas_limit: vm_config.default_gas_limit,
    };

    let repo = CodeRepository::open(&cli.repo)
        .with_context(|| format!("opening repository {}", cli.repo.display()))?;
    let context: SharedContext = match &cli.state {
        Some(dir) => Arc::new(Mutex::new(PersistentContext::new(
            SledKv::open(dir).with_context(|| format!("opening state {}", dir.display()))?,
        ))),
        None => Arc::new(Mutex::new(MemoryContext::new())),
    };

    match cli.command {
        Commands::Deploy {
            source,
            sdk,
            go,
            build_tool,
            no_probe,
        } => {
            let bytes = std::fs::read(&source)
                .with_context(|| format!("reading {}", source.display()))?;

            let toolchain = ToolchainConfig {
                go: go.unwrap_or_else(|| vm_config.toolchain.go.clone()),
                build_tool: build_tool
                    .unwrap_or_else(|| vm_config.toolchain.build_tool.clone()),
                sdk_replace: Some(sdk),
                keep_workspace: false,
            };
            let probe: Box<dyn mvm_lang::CompileProbe + Send + Sync> = if no_probe {
                Box::new(NoProbe)
            } else {
                Box::new(ToolchainProbe::new(toolchain.clone()))
            };
            let engine = Engine::new(
                repo,
                context,
                Box::new(CompilerDriver::new(toolchain)),
                probe,
                engine_config(),
            );

            let address = engine.deploy(&bytes)?;
            println!("{} {}", "deployed".green().bold(), address);
        }

        Commands::Execute {
            contract,
            function,
            args,
            sender,
            gas,
        } => {
            let contract = parse_address(&contract)?;
            let sender = match sender {
                Some(s) => parse_address(&s)?,
                None => Address::ZERO,
            };
            let engine = stub_engine(repo, context, engine_config());

            let outcome = engine.execute(&contract, &function, args.as_bytes(), &sender, gas)?;
            let rendered = serde_json::to_string_pretty(&outcome.result)?;
            if outcome.result.success {
                println!("{rendered}");
                eprintln!("{} {}", "gas used:".dimmed(), outcome.gas_used);
            } else {
                println!("{rendered}");
                bail!("execution failed");
            }
        }

        Commands::Show { contract } => {
            let contract = parse_address(&contract)?;
            let abi = repo.load_abi(&contract)?;
            println!("{}", serde_json::to_string_pretty(&abi)?);
        }

        Commands::List => {
            for address in repo.list()? {
                println!("{address}");
            }
        }
    }
    Ok(())
}

fn parse_address(s: &str) -> anyhow::Result<Address> {
    Address::from_str(s).with_context(|| format!("invalid address {s:?}"))
}

/// Execute/show paths never compile; the engine still wants a
/// compiler, so give it one that refuses.
fn stub_engine(repo: CodeRepository, context: SharedContext, config: EngineConfig) -> Arc<Engine> {
    struct RefuseCompiler;
    impl mvm_compiler::ContractCompiler for RefuseCompiler {
        fn compile(&self, _: &str, _: &str) -> Result<Vec<u8>, mvm_core::CompileError> {
            Err(mvm_core::CompileError::BadArtifact)
        }
    }
    Engine::new(
        repo,
        context,
        Box::new(RefuseCompiler),
        Box::new(NoProbe),
        config,
    )
}
