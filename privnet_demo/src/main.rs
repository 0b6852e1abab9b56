use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{LevelFilter, debug, info};
use privnet_core::{
    CodecConfig, SecureSession, SecurityLevel, Tensor, decapsulate, decode, demo_roundtrip_with_rng,
    encapsulate_with_rng, encode, keygen_with_rng, linear_only,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "privnet",
    author,
    version,
    about = "PrivNet privacy core CLI (experimental)"
)]
struct Cli {
    #[arg(long, global = true)]
    debug: bool,
    /// TOML file with `scale`, `seed` and `security_level`.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_enum)]
    security_level: Option<SecurityLevelArg>,
    #[arg(long, global = true)]
    scale: Option<f64>,
    /// Deterministic randomness for reproducible runs. Never use for real data.
    #[arg(long, global = true)]
    seed: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SecurityLevelArg {
    Standard,
    High,
    Paranoid,
}

impl From<SecurityLevelArg> for SecurityLevel {
    fn from(arg: SecurityLevelArg) -> Self {
        match arg {
            SecurityLevelArg::Standard => SecurityLevel::Standard,
            SecurityLevelArg::High => SecurityLevel::High,
            SecurityLevelArg::Paranoid => SecurityLevel::Paranoid,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Seal a message under a fresh KEM key and open it again; prints the JSON body.
    Demo {
        #[arg(long, default_value = "privnetai-demo")]
        message: String,
    },
    /// Run one encapsulation/decapsulation and report sizes and agreement.
    Kem,
    /// Push a tensor through the masked pipeline and print the decoded result.
    Tensor {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Weight matrices, applied in order.
        #[arg(long = "weights", value_name = "FILE", required = true)]
        weights: Vec<PathBuf>,
        /// Use the unmasked codec, which also accepts fractional weights.
        #[arg(long)]
        plain: bool,
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Print the effective configuration after all layers are applied.
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let config = resolve_config(&cli)?;
    debug!(
        "config scale={} level={} seeded={}",
        config.scale,
        config.security_level,
        config.seed.is_some()
    );
    match cli.command {
        Commands::Demo { message } => cmd_demo(&config, &message),
        Commands::Kem => cmd_kem(&config),
        Commands::Tensor {
            input,
            weights,
            plain,
            out,
        } => cmd_tensor(&config, &input, &weights, plain, out.as_deref()),
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(default));
    builder.format_timestamp(None);
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

/// File and environment layers come from the core; flags override both.
fn resolve_config(cli: &Cli) -> Result<CodecConfig> {
    let mut config = CodecConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(level) = cli.security_level {
        config.security_level = level.into();
    }
    if let Some(scale) = cli.scale {
        config.scale = scale;
    }
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    config.validate().context("validating configuration")?;
    Ok(config)
}

fn cmd_demo(config: &CodecConfig, message: &str) -> Result<()> {
    let mut rng = config.rng();
    let response = demo_roundtrip_with_rng(message, config.security_level, &mut rng)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn cmd_kem(config: &CodecConfig) -> Result<()> {
    let mut rng = config.rng();
    let level = config.security_level;
    let params = level.params();
    let pair = keygen_with_rng(level, &mut rng)?;
    let (ciphertext, sent) = encapsulate_with_rng(&pair.public_key, &mut rng)?;
    let received = decapsulate(&pair.private_key, &ciphertext)?;
    if sent.as_bytes() != received.as_bytes() {
        bail!("decapsulated secret differs from the encapsulated one");
    }
    println!("Security level: {} ({})", level, params.name);
    println!(
        "Public key: {} bytes, private key: {} bytes, ciphertext: {} bytes",
        pair.public_key.as_bytes().len(),
        pair.private_key.as_bytes().len(),
        ciphertext.as_bytes().len()
    );
    println!(
        "Shared secret agreed (fingerprint {})",
        &blake3_fingerprint(sent.as_bytes())
    );
    Ok(())
}

fn cmd_tensor(
    config: &CodecConfig,
    input: &Path,
    weights: &[PathBuf],
    plain: bool,
    out: Option<&Path>,
) -> Result<()> {
    let x = load_tensor(input)?;
    let layers = weights
        .iter()
        .map(|path| load_tensor(path))
        .collect::<Result<Vec<_>>>()?;
    let result = if plain {
        run_plain(config, &x, &layers)?
    } else {
        run_masked(config, &x, &layers)?
    };
    let rendered = serde_json::to_string_pretty(&result.rows())?;
    match out {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("writing result to {}", path.display()))?;
            println!("Wrote {:?} result to {}", result.shape(), path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Full two-party flow in one process: encapsulate, mask, apply each layer
/// without the key, then decapsulate and decode.
fn run_masked(config: &CodecConfig, x: &Tensor, layers: &[Tensor]) -> Result<Tensor> {
    let mut rng = config.rng();
    let pair = keygen_with_rng(config.security_level, &mut rng)?;
    let (sender, ciphertext) = SecureSession::initiate(&pair.public_key, config.scale, &mut rng)?;
    let mut masked = sender.secure_encode(x, &mut rng)?;
    for (idx, w) in layers.iter().enumerate() {
        masked = SecureSession::secure_linear(&masked, w)
            .with_context(|| format!("applying weight matrix #{idx}"))?;
    }
    let receiver = SecureSession::accept(&pair.private_key, &ciphertext, config.scale)?;
    let result = receiver.secure_decode(&masked)?;
    info!("masked pipeline finished: {} layer(s)", layers.len());
    Ok(result)
}

fn run_plain(config: &CodecConfig, x: &Tensor, layers: &[Tensor]) -> Result<Tensor> {
    let mut encoded = encode(x, config.scale)?;
    for (idx, w) in layers.iter().enumerate() {
        encoded = linear_only(&encoded, w)
            .with_context(|| format!("applying weight matrix #{idx}"))?;
    }
    Ok(decode(&encoded))
}

/// Accepts either `{"shape": [..], "data": [..]}` or a plain array of rows.
#[derive(Deserialize)]
#[serde(untagged)]
enum TensorFile {
    Rows(Vec<Vec<f64>>),
    Tensor(Tensor),
}

fn load_tensor(path: &Path) -> Result<Tensor> {
    match load_json::<TensorFile>(path, "tensor")? {
        TensorFile::Rows(rows) => Tensor::from_rows(rows)
            .with_context(|| format!("building tensor from {}", path.display())),
        TensorFile::Tensor(tensor) => Ok(tensor),
    }
}

fn load_json<T: DeserializeOwned>(path: &Path, label: &str) -> Result<T> {
    let data =
        fs::read(path).with_context(|| format!("reading {} from {}", label, path.display()))?;
    let value = serde_json::from_slice(&data)
        .with_context(|| format!("parsing {} from {}", label, path.display()))?;
    Ok(value)
}

fn blake3_fingerprint(bytes: &[u8]) -> String {
    hex::encode(&blake3::hash(bytes).as_bytes()[..8])
}
