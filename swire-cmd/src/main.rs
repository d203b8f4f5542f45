mod decode;
mod info;

use std::fs::File;
use std::io::{stderr, stdin, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use swire::{AddressWidth, Collector, Config, Row};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a capture and print annotations.
    ///
    /// Annotations are written one per line as <start>-<end> <row> <class>: <text> with
    /// start and end given as sample indexes.
    Decode {
        #[command(flatten)]
        opts: DecodeOpts,

        /// Only show these rows.
        #[arg(short, long, value_delimiter = ',', value_name = "csv")]
        rows: Vec<RowArg>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,
    },
    /// Summarize the transactions in a capture.
    Info {
        #[command(flatten)]
        opts: DecodeOpts,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: Format,
    },
}

#[derive(Args)]
struct DecodeOpts {
    /// Capture sample rate in Hz. Accepts k, M and G suffixes, e.g., 24M.
    #[arg(short, long, value_parser = parse_rate, value_name = "rate")]
    samplerate: u64,

    /// Bus bit rate in bits/s.
    #[arg(short, long, default_value_t = Config::DEFAULT_BIT_RATE)]
    bitrate: u32,

    /// Number of address bytes, 2 or 3.
    #[arg(short, long, default_value_t = 3)]
    addr_bytes: u8,

    /// Bit of each capture byte carrying the SWire line.
    #[arg(short, long, default_value_t = 0)]
    channel: u8,

    /// Bit periods to wait for a read trigger.
    #[arg(long, default_value_t = 10, value_name = "bits")]
    trigger_timeout: u32,

    /// Raw capture file, one byte per sample. Use - to read stdin.
    input: PathBuf,
}

impl DecodeOpts {
    fn config(&self) -> Result<Config> {
        let address_width =
            AddressWidth::try_from(self.addr_bytes).context("invalid --addr-bytes")?;
        let config = Config::builder()
            .sample_rate(self.samplerate)
            .bit_rate(self.bitrate)
            .address_width(address_width)
            .trigger_timeout_bits(self.trigger_timeout)
            .build();
        config.validate().context("invalid decoder options")?;
        Ok(config)
    }

    fn decode(&self) -> Result<Collector> {
        let config = self.config()?;
        if self.channel > 7 {
            bail!("--channel must be 0-7");
        }
        debug!("decoding {:?} with {config:?}", self.input);
        let zult = if self.input == Path::new("-") {
            swire::decode_reader(config, stdin().lock(), self.channel)
        } else {
            let file = File::open(&self.input)
                .with_context(|| format!("opening input {:?}", self.input))?;
            swire::decode_reader(config, BufReader::new(file), self.channel)
        };
        let zult = zult.context("decoding capture")?;
        info!(
            annotations = zult.annotations.len(),
            transactions = zult.transactions.len(),
            "decoded {:?}",
            self.input
        );
        Ok(zult)
    }
}

#[derive(Debug, Clone)]
pub enum Format {
    Json,
    Text,
}

impl clap::ValueEnum for Format {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Json, Self::Text]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            Self::Json => Some(clap::builder::PossibleValue::new("json")),
            Self::Text => Some(clap::builder::PossibleValue::new("text")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RowArg(Row);

impl clap::ValueEnum for RowArg {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            Self(Row::Bits),
            Self(Row::Bytes),
            Self(Row::Master),
            Self(Row::Slave),
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(clap::builder::PossibleValue::new(self.0.id()))
    }
}

/// Parse a rate in Hz with an optional k, M or G suffix.
fn parse_rate(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let s = s
        .strip_suffix("Hz")
        .or_else(|| s.strip_suffix("hz"))
        .unwrap_or(s);
    let (num, mult) = match s.char_indices().last() {
        Some((idx, 'k' | 'K')) => (&s[..idx], 1e3),
        Some((idx, 'M')) => (&s[..idx], 1e6),
        Some((idx, 'G' | 'g')) => (&s[..idx], 1e9),
        _ => (s, 1.0),
    };
    let value: f64 = num
        .parse()
        .map_err(|_| format!("invalid rate {s:?}"))?;
    let hz = value * mult;
    if !hz.is_finite() || hz < 1.0 {
        return Err(format!("rate must be at least 1Hz, got {s:?}"));
    }
    Ok(hz.round() as u64)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("SWIRE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Decode { opts, rows, format } => {
            let zult = opts.decode()?;
            let rows: Vec<Row> = rows.iter().map(|r| r.0).collect();
            decode::decode(&zult, &rows, format)
        }
        Commands::Info { opts, format } => {
            let zult = opts.decode()?;
            info::info(&opts.input, opts.samplerate, &zult, format)
        }
    }
}
