use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use eyre::{eyre, Result, WrapErr};
use serde::Serialize;
use tracing_chrome::ChromeLayerBuilder;
use tracing_subscriber::{self, fmt::format::FmtSpan, prelude::*, EnvFilter};

use pickles_core::keys::{FileSystemStore, KeyStore};
use pickles_core::r1cs::builder::Boolean;
use pickles_core::{
    compile, CompileConfig, Compiled, InductiveRule, KeyCache, KeyId, Predecessor, ProveRequest,
    RuleOutput, Serializable, StatementShape, StepField, Tag,
};

/// Compile, prove and verify the sample counter system.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[clap(flatten)]
    trace: TraceArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile the counter system and print its key ids
    Compile(CacheArgs),
    /// Prove `steps` increments of the counter and verify the chain
    Prove(ProveArgs),
    /// Inspect or clear the key cache directory
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Args, Debug, Clone)]
struct CacheArgs {
    /// Key cache directory; defaults to the user cache dir
    #[clap(long)]
    cache_dir: Option<PathBuf>,

    /// Never read or write cached keys
    #[clap(long)]
    no_cache: bool,

    /// Fail unless compilation derives exactly these key ids
    #[clap(long, value_delimiter = ',')]
    expect: Vec<String>,
}

#[derive(Args, Debug)]
struct ProveArgs {
    #[clap(flatten)]
    cache: CacheArgs,

    #[clap(short, long, default_value_t = 2)]
    steps: u64,

    /// Write the last proof here, hex encoded
    #[clap(short, long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Print the cache directory
    Path(CacheArgs),
    /// List cached keys
    List(CacheArgs),
    /// Delete every cached key
    Clear(CacheArgs),
}

#[derive(Args, Debug)]
struct TraceArgs {
    /// Output formats
    #[clap(short, long, value_enum)]
    format: Option<Vec<Format>>,
}

#[derive(Debug, Clone, ValueEnum, PartialEq)]
enum Format {
    Default,
    Chrome,
}

#[derive(Serialize)]
struct CompileSummary {
    system: String,
    key_ids: Vec<String>,
    dirty: String,
    branches: Vec<BranchSummary>,
}

#[derive(Serialize)]
struct BranchSummary {
    rule: String,
    proofs_verified: u8,
    domain_log2: u8,
}

#[derive(Serialize)]
struct ProveSummary {
    compile: CompileSummary,
    steps: u64,
    proof_bytes: usize,
    verified: bool,
}

fn init_tracing(args: &TraceArgs) -> Vec<Box<dyn Any>> {
    let mut layers = Vec::new();

    let log_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_filter(log_filter)
        .boxed();
    layers.push(log_layer);

    let mut guards: Vec<Box<dyn Any>> = vec![];
    if let Some(format) = &args.format {
        if format.contains(&Format::Default) {
            let collector_layer = tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr)
                .boxed();
            layers.push(collector_layer);
        }
        if format.contains(&Format::Chrome) {
            let (chrome_layer, guard) = ChromeLayerBuilder::new().include_args(true).build();
            layers.push(chrome_layer.boxed());
            guards.push(Box::new(guard));
            tracing::info!("Running tracing-chrome. Files will be saved as trace-<some timestamp>.json and can be viewed in https://ui.perfetto.dev/");
        }
    }

    tracing_subscriber::registry().with(layers).init();
    guards
}

fn cache_dir(args: &CacheArgs) -> Result<PathBuf> {
    args.cache_dir
        .clone()
        .or_else(FileSystemStore::default_root)
        .ok_or_else(|| eyre!("no cache directory on this platform, pass --cache-dir"))
}

fn compile_config(args: &CacheArgs) -> Result<CompileConfig> {
    let cache = if args.no_cache {
        Default::default()
    } else {
        let store = FileSystemStore::new(cache_dir(args)?);
        KeyCache::new(vec![Arc::new(store) as Arc<dyn KeyStore>])
    };
    let mut config = CompileConfig::new(cache);
    if !args.expect.is_empty() {
        let ids = args
            .expect
            .iter()
            .map(|id| id.parse::<KeyId>())
            .collect::<Result<Vec<_>, _>>()
            .wrap_err("invalid --expect key id")?;
        config = config.with_expected_key_ids(ids);
    }
    Ok(config)
}

/// Statement `n`: `n` increments were applied starting from zero.
fn counter_rules(tag: &Tag) -> Vec<InductiveRule> {
    let base = InductiveRule::new("base", vec![], |ctx, input| {
        let zero = ctx.constant(StepField::from(0u64));
        ctx.constrain_eq(&input[0], &zero);
        Ok(RuleOutput::new(vec![]))
    });
    let step = InductiveRule::new("step", vec![Predecessor::from(tag)], |ctx, input| {
        let previous = ctx.previous_statement(0)?;
        let one = ctx.constant(StepField::from(1u64));
        let next = ctx.add(&previous.input[0], &one);
        ctx.constrain_eq(&input[0], &next);
        Ok(RuleOutput::new(vec![]).with_previous(previous, Boolean::constant(true)))
    });
    vec![base, step]
}

async fn compile_counter(args: &CacheArgs) -> Result<(Compiled, CompileSummary)> {
    let tag = Tag::create("counter", StatementShape::new(1, 0), 1, 2);
    let rules = counter_rules(&tag);
    let compiled = compile(&tag, compile_config(args)?, rules).await?;
    let key = compiled.verifier.key();
    let summary = CompileSummary {
        system: tag.to_string(),
        key_ids: compiled
            .cache_handle
            .key_ids()
            .iter()
            .map(|id| id.to_string())
            .collect(),
        dirty: format!("{:?}", compiled.cache_handle.dirty()),
        branches: compiled
            .provers
            .iter()
            .zip(key.branches())
            .map(|(prover, branch)| BranchSummary {
                rule: prover.identifier().to_string(),
                proofs_verified: branch.proofs_verified,
                domain_log2: branch.domain_log2,
            })
            .collect(),
    };
    Ok((compiled, summary))
}

async fn prove_counter(args: ProveArgs) -> Result<ProveSummary> {
    let (compiled, summary) = compile_counter(&args.cache).await?;
    let base = compiled
        .prover("base")
        .ok_or_else(|| eyre!("counter has no base rule"))?;
    let step = compiled
        .prover("step")
        .ok_or_else(|| eyre!("counter has no step rule"))?;

    let mut current = base
        .prove(ProveRequest::new(vec![StepField::from(0u64)]))
        .await?;
    for n in 1..=args.steps {
        let request = ProveRequest::new(vec![StepField::from(n)])
            .with_previous(current.statement, current.proof);
        current = step.prove(request).await?;
        tracing::info!(n, "step proved");
    }

    let proof_bytes = current.proof.size();
    if let Some(out) = &args.out {
        std::fs::write(out, current.proof.to_hex()?)
            .wrap_err_with(|| format!("writing {}", out.display()))?;
    }
    let verified = compiled
        .verifier
        .verify(vec![(current.statement, current.proof)])
        .await?;
    Ok(ProveSummary {
        compile: summary,
        steps: args.steps,
        proof_bytes,
        verified,
    })
}

async fn run_cache(command: CacheCommand) -> Result<()> {
    match command {
        CacheCommand::Path(args) => println!("{}", cache_dir(&args)?.display()),
        CacheCommand::List(args) => {
            let dir = cache_dir(&args)?;
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e).wrap_err_with(|| format!("reading {}", dir.display())),
            };
            while let Some(entry) = entries.next_entry().await? {
                let size = entry.metadata().await?.len();
                println!("{}\t{size}", entry.file_name().to_string_lossy());
            }
        }
        CacheCommand::Clear(args) => {
            let dir = cache_dir(&args)?;
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e).wrap_err_with(|| format!("reading {}", dir.display())),
            };
            let mut removed = 0usize;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let is_file = entry.file_type().await?.is_file();
                if !is_file || !name.to_str().is_some_and(is_key_file) {
                    continue;
                }
                let path = entry.path();
                tokio::fs::remove_file(&path)
                    .await
                    .wrap_err_with(|| format!("removing {}", path.display()))?;
                removed += 1;
            }
            tracing::info!(dir = %dir.display(), removed, "cache cleared");
        }
    }
    Ok(())
}

/// Files written by `FileSystemStore`: `<kind>-<digest>.key`, or an
/// interrupted write's `<kind>-<digest>.tmp-<pid>`.
fn is_key_file(name: &str) -> bool {
    let Some((kind, rest)) = name.split_once('-') else {
        return false;
    };
    let Some((digest, extension)) = rest.split_once('.') else {
        return false;
    };
    let extension_ok = extension == "key"
        || extension
            .strip_prefix("tmp-")
            .is_some_and(|pid| !pid.is_empty() && pid.bytes().all(|b| b.is_ascii_digit()));
    matches!(kind, "step" | "wrap")
        && digest.len() == 64
        && digest.bytes().all(|b| b.is_ascii_hexdigit())
        && extension_ok
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guards = init_tracing(&cli.trace);

    match cli.command {
        Commands::Compile(args) => {
            let (_, summary) = compile_counter(&args).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Prove(args) => {
            let summary = prove_counter(args).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.verified {
                return Err(eyre!("proof chain did not verify"));
            }
        }
        Commands::Cache(command) => run_cache(command).await?,
    }
    Ok(())
}
