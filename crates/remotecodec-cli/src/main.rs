//! `remotecodec` demo binary
//!
//! Starts an in-process session host with the loopback decoder, connects to
//! it through the connection supervisor, and streams synthetic samples
//! through a session proxy. `--kill-after` kills the host connection midway
//! to show peer-death recovery.

mod driver;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use remotecodec_core::tracing_init::init_tracing;
use remotecodec_core::{FormatDescriptor, OutputTarget, load_config};
use remotecodec_host::{CapabilityRegistry, LocalConnector, MediaHost};
use remotecodec_proxy::{ConnectionSupervisor, RetryPolicy};

use driver::{Driver, StreamPlan};

#[derive(Parser, Debug)]
#[command(name = "remotecodec")]
#[command(version, about = "Stream synthetic samples through a remote decoding session")]
struct Args {
    /// MIME type of the stream; `audio/*` selects an audio format
    #[arg(long, default_value = "video/avc", env = "REMOTECODEC_MIME")]
    mime: String,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,

    #[arg(long, default_value_t = 2)]
    channels: u32,

    /// Number of samples before end of stream
    #[arg(long, default_value_t = 30)]
    samples: u32,

    /// Presentation time between samples, in microseconds
    #[arg(long, default_value_t = 33_333)]
    frame_interval_us: i64,

    /// Payload bytes per sample
    #[arg(long, default_value_t = 4096)]
    payload_size: usize,

    /// Kill the host connection once this many samples were consumed
    #[arg(long)]
    kill_after: Option<u32>,

    /// Render decoded output to a named target instead of discarding it
    #[arg(long)]
    output: Option<String>,

    /// Log level filter (e.g. "info", "debug", "warn")
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long, env = "REMOTECODEC_LOG_JSON")]
    log_json: bool,

    /// Directory holding `.remotecodec/settings.json`
    #[arg(long)]
    project_dir: Option<PathBuf>,
}

impl Args {
    fn format(&self) -> FormatDescriptor {
        if self.mime.starts_with("audio/") {
            FormatDescriptor::audio(&self.mime, self.sample_rate, self.channels)
        } else {
            FormatDescriptor::video(&self.mime, self.width, self.height)
        }
    }

    fn target(&self) -> OutputTarget {
        self.output
            .as_ref()
            .map_or_else(OutputTarget::none, OutputTarget::named)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.project_dir.as_deref())?;
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    config.logging.json |= args.log_json;
    init_tracing(&config.logging)?;

    let format = args.format();
    format.validate()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        %format,
        samples = args.samples,
        kill_after = ?args.kill_after,
        "Starting remotecodec"
    );

    let host = Arc::new(MediaHost::new(
        CapabilityRegistry::with_loopback(&config.loopback),
        config.host.clone(),
        config.connection.channel_capacity,
    ));
    let connector = Arc::new(LocalConnector::new(host));
    let supervisor = ConnectionSupervisor::new(
        connector.clone(),
        RetryPolicy::from_config(&config.connection),
    );

    let plan = StreamPlan {
        format,
        target: args.target(),
        samples: args.samples,
        frame_interval_us: args.frame_interval_us,
        payload_size: args.payload_size,
        kill_after: args.kill_after,
    };
    let tally = Driver::new(supervisor, connector, plan).run().await?;

    info!(
        sent = tally.sent,
        consumed = tally.consumed,
        outputs = tally.outputs,
        errors = tally.errors,
        recoveries = tally.recoveries,
        "Stream finished"
    );
    Ok(())
}
