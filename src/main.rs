//! campush: stream camera frames to a collector

use std::future::Future;
use std::path::PathBuf;

use campush::capture::V4l2Probe;
use campush::{
    Config, DeviceAcquirer, FrameTransformer, Identity, JpegEncoder, Pipeline, PushChannel,
    RetryPolicy, SenderError, StopFlag,
};
use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status when a second interrupt abandons a stuck pipeline (128 + SIGINT).
const EXIT_ABANDONED: i32 = 130;

/// Send camera images to a server
#[derive(Parser, Debug)]
#[command(name = "campush", version)]
struct Cli {
    /// Server address (host:port)
    #[arg(short = 's', long = "server-addr", value_name = "ADDR")]
    server_addr: Option<String>,

    /// Sender's identity
    #[arg(short, long)]
    identity: Option<String>,

    /// Resolution for sending video [default: 640 480]
    #[arg(short, long, num_args = 2, value_names = ["HRES", "VRES"])]
    resolution: Option<Vec<u32>>,

    /// Flip image; useful for debugging
    #[arg(short, long)]
    flip: bool,

    /// Verbose message logs
    #[arg(short, long)]
    verbose: bool,

    /// TOML configuration file
    #[arg(short, long, env = "CAMPUSH_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Command-line flags override file and environment settings.
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = &self.server_addr {
            config.transport.server_address = addr.clone();
        }
        if let Some(identity) = &self.identity {
            config.transport.identity = identity.clone();
        }
        if let Some(&[width, height]) = self.resolution.as_deref() {
            config.output.width = width;
            config.output.height = height;
        }
        config.output.flip |= self.flip;
        config.verbose |= self.verbose;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).wrap_err("loading configuration")?;
    cli.apply(&mut config);

    init_tracing(config.verbose);
    config.validate().wrap_err("invalid configuration")?;

    run(config).await
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "campush=debug" } else { "campush=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

async fn run(config: Config) -> Result<()> {
    info!("campush launching...");

    let identity = Identity::new(config.transport.identity.clone().into_bytes())?;

    // Connect first; the channel lives until the process exits.
    let channel = PushChannel::connect(&config.transport, &tokio::runtime::Handle::current())?;
    let closer = channel.closer();

    let acquirer = DeviceAcquirer::new(config.capture.max_probe_attempts);
    let mut probe = V4l2Probe {
        buffer_count: config.capture.buffer_count,
        read_timeout: config.capture.read_timeout(),
    };
    let camera = acquirer.acquire(&mut probe)?;

    debug!(
        "Sending video from {} to {} at resolution {:?}",
        identity,
        channel.endpoint(),
        (config.output.width, config.output.height)
    );

    let stop = StopFlag::default();
    let mut pipeline = Pipeline::new(
        identity,
        FrameTransformer::from_config(&config.output),
        JpegEncoder::new(config.output.jpeg_quality),
        channel,
    )
    .with_retry(RetryPolicy::from_config(&config.capture))
    .with_stop_flag(stop.clone());

    let worker = tokio::task::spawn_blocking(move || pipeline.run(camera));
    let mut interrupts = interrupts();

    let on_interrupt = || {
        info!("Interrupt received, stopping (interrupt again to abort)");
        stop.raise();
        closer.close();
    };
    match supervise(worker, &mut interrupts, on_interrupt).await {
        Supervised::Finished(joined) => joined.wrap_err("pipeline thread panicked")??,
        Supervised::Abandoned => {
            // The runtime would wait on the blocking thread forever.
            error!("Second interrupt, abandoning the pipeline thread");
            std::process::exit(EXIT_ABANDONED);
        }
    }

    info!("campush shutting down");
    Ok(())
}

type Joined = std::result::Result<std::result::Result<(), SenderError>, JoinError>;

enum Supervised {
    Finished(Joined),
    Abandoned,
}

/// Forward each Ctrl-C as one message. The channel closes if signals
/// cannot be watched.
fn interrupts() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    if tx.send(()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Cannot listen for interrupts: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Wait for the pipeline. The first interrupt runs `on_interrupt` and keeps
/// waiting; a second one gives up on the pipeline.
async fn supervise<W>(
    worker: W,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
    on_interrupt: impl FnOnce(),
) -> Supervised
where
    W: Future<Output = Joined>,
{
    tokio::pin!(worker);

    tokio::select! {
        joined = &mut worker => return Supervised::Finished(joined),
        Some(()) = interrupts.recv() => on_interrupt(),
    }

    tokio::select! {
        joined = &mut worker => Supervised::Finished(joined),
        Some(()) = interrupts.recv() => Supervised::Abandoned,
    }
}
