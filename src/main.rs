//! Thin command-line driver speaking the protocol over stdin/stdout.
//!
//! Everything protocol-shaped lives in the library; this binary only maps
//! flags to a configuration and paths to the `store` helpers.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use xymodem::{new_modem, store, ModemConfig, ModemFeatures, ReceivedFile};

#[derive(Parser)]
#[command(name = "xymodem")]
#[command(about = "XMODEM/YMODEM file transfer over stdin/stdout", long_about = None)]
struct Cli {
    /// Receive file(s)
    #[arg(short = 'r')]
    recv: bool,

    /// Send file(s)
    #[arg(short = 's')]
    send: bool,

    /// Use the XMODEM dialect
    #[arg(short = 'x')]
    xmodem: bool,

    /// Use the YMODEM dialect
    #[arg(short = 'y')]
    ymodem: bool,

    /// 1K data packets
    #[arg(short = 'k')]
    one_k: bool,

    /// CRC-16 framing
    #[arg(short = 'c')]
    crc: bool,

    /// Abort with a double CAN
    #[arg(short = 'd')]
    double_can: bool,

    /// Streaming mode (no per-packet acknowledgments)
    #[arg(short = 'g')]
    streaming: bool,

    /// Files to send, or the save name for XMODEM receive
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is the transport; diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.recv == cli.send {
        bail!("pass exactly one of -r / -s");
    }
    if cli.xmodem == cli.ymodem {
        bail!("pass exactly one of -x / -y");
    }
    if cli.send && cli.files.is_empty() {
        bail!("need at least one file to send");
    }

    let mut features = ModemFeatures::empty();
    if cli.one_k {
        features |= ModemFeatures::ONE_K;
    }
    if cli.crc {
        features |= ModemFeatures::CRC;
    }
    if cli.double_can {
        features |= ModemFeatures::DOUBLE_CAN;
    }
    if cli.streaming {
        features |= ModemFeatures::STREAMING;
    }

    let config = if cli.xmodem {
        if cli.send && cli.files.len() > 1 {
            bail!("XMODEM sends a single file");
        }
        if cli.recv && cli.files.is_empty() {
            bail!("XMODEM receive needs a save name");
        }
        ModemConfig::xmodem(features)
    } else {
        ModemConfig::ymodem(features)
    };

    let (mut modem, mut terminal_reader, _terminal_writer) =
        new_modem(config, tokio::io::stdin(), tokio::io::stdout());
    // Nothing useful to do with terminal traffic here; keep the pump drained.
    tokio::spawn(async move {
        let _ = tokio::io::copy(&mut terminal_reader, &mut tokio::io::sink()).await;
    });

    if cli.recv {
        let save_as = cli.files.first().cloned();
        let xmodem = cli.xmodem;
        modem
            .receive(move |file| {
                let save_as = save_as.clone();
                tokio::spawn(async move {
                    if let Err(e) = place_received(file, xmodem, save_as).await {
                        tracing::error!("failed to store received file: {e:#}");
                    }
                });
            })
            .await?;
    } else {
        let mut jobs = Vec::with_capacity(cli.files.len());
        for path in &cli.files {
            jobs.push(store::job_from_path(path).await?);
        }
        if cli.xmodem {
            let job = jobs.remove(0);
            modem.send_bytes(job.body).await?;
        } else {
            modem.send_list(jobs).await?;
        }
    }

    Ok(())
}

async fn place_received(file: ReceivedFile, xmodem: bool, save_as: Option<PathBuf>) -> Result<()> {
    let dest = if xmodem {
        save_as.context("no save name for XMODEM receive")?
    } else {
        store::sanitized_path(Path::new("."), &file.path)?
    };
    // XMODEM carries no metadata worth applying.
    store::store_received(file, &dest, !xmodem).await
}
