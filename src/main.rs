//! Isochronous Pipeline CLI
//!
//! Drives a synthetic isochronous stream through the full capture and
//! decode pipeline and reports what came out.

use clap::Parser;
use isoc_pipeline::{
    analysis::AgcMode,
    capture::{
        Camera, CameraControls, FileConfig, SoftwareControls, SyntheticConfig, SyntheticStream,
    },
    decode::Encoding,
    GenericCamera, StreamError,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(version, about = "Run a synthetic USB isochronous stream through the pipeline")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of transfers to feed (ignored with --continuous).
    #[arg(short, long, default_value_t = 500)]
    transfers: u64,

    /// Probability of a corrupt micro-frame before each good one.
    #[arg(short, long, default_value_t = 0.02)]
    error_rate: f64,

    /// Seed for the synthetic stream; random if omitted.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Bytes per micro-frame slot.
    #[arg(long, default_value_t = 1023)]
    frame_size: usize,

    /// Micro-frames per transfer.
    #[arg(long, default_value_t = 10)]
    frames_per_transfer: usize,

    /// Pause between transfers, in milliseconds.
    #[arg(long, default_value_t = 10)]
    interval_ms: u64,

    /// Enable histogram auto gain control.
    #[arg(long)]
    agc: bool,

    /// Run until Ctrl-C.
    #[arg(long)]
    continuous: bool,

    /// Serve Prometheus metrics on this port.
    #[cfg(feature = "metrics")]
    #[arg(long)]
    metrics_port: Option<u16>,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("Isochronous pipeline v{}", isoc_pipeline::VERSION);

    let mut config = match &args.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => FileConfig::default(),
    };
    if args.agc && config.agc.mode == AgcMode::None {
        config.agc.mode = AgcMode::Histogram;
    }

    let (width, height) = (config.pipeline.format.width, config.pipeline.format.height);
    if !matches!(config.pipeline.format.encoding, Encoding::Bayer { .. }) {
        warn!("Synthetic stream only produces Bayer images, overriding configured format");
    }
    let synthetic = SyntheticConfig {
        width,
        height,
        bytes_per_frame: args.frame_size,
        frames_per_transfer: args.frames_per_transfer,
        error_rate: args.error_rate,
        ..Default::default()
    };

    let controls: Arc<dyn CameraControls> = Arc::new(SoftwareControls::new());
    let mut stream = match args.seed {
        Some(seed) => SyntheticStream::new(synthetic, seed, Arc::clone(&controls)),
        None => SyntheticStream::from_entropy(synthetic, Arc::clone(&controls)),
    };
    config.pipeline.format = stream.format();
    info!(
        width,
        height,
        frames_per_image = stream.frames_per_image(),
        error_rate = args.error_rate,
        "Synthetic stream ready"
    );

    let mut camera = GenericCamera::new(config, Arc::new(stream.scanner()), Arc::clone(&controls));
    let mut assembler = match camera.start_stream() {
        Ok(assembler) => assembler,
        Err(e) => {
            eprintln!("Failed to start stream: {}", e);
            std::process::exit(1);
        }
    };

    #[cfg(feature = "metrics")]
    let metrics = args.metrics_port.and_then(start_metrics);

    let running = Arc::new(AtomicBool::new(true));
    if args.continuous {
        let running = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl-C handler: {}", e);
        }
        info!("Streaming until Ctrl-C");
    }

    let interval = Duration::from_millis(args.interval_ms);
    let mut received = 0u64;
    let mut last_report = Instant::now();
    let mut transfers = 0u64;
    let mut errors = ErrorLog::default();

    while running.load(Ordering::SeqCst) && (args.continuous || transfers < args.transfers) {
        assembler.process_batch(&stream.next_batch());
        transfers += 1;

        while camera.get_frame(Duration::ZERO).is_some() {
            received += 1;
        }
        errors.poll(&mut camera);

        if last_report.elapsed() >= Duration::from_secs(1) {
            if let Some(counters) = camera.counters() {
                info!(
                    chunks = counters.chunks_completed,
                    decoded = counters.images_delivered,
                    receive_fps = counters.receive_fps,
                    decode_fps = counters.decode_fps,
                    gain = controls.gain(),
                    "Progress"
                );
            }
            let reported = errors.take_pending();
            #[cfg(feature = "metrics")]
            publish_metrics(metrics.as_ref(), &camera, &*controls, reported);
            #[cfg(not(feature = "metrics"))]
            let _ = reported;
            last_report = Instant::now();
        }

        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }

    // Let the decode thread finish what is already queued.
    let deadline = Instant::now() + Duration::from_millis(500);
    while Instant::now() < deadline {
        match camera.get_frame(Duration::from_millis(50)) {
            Some(_) => received += 1,
            None => {
                if camera.pipeline().map_or(0, |p| p.pool_counts().full) == 0 {
                    break;
                }
            }
        }
    }

    let counters = camera.counters().unwrap_or_default();
    drop(assembler);
    camera.stop_stream();

    let produced = stream.stats();
    println!("Transfers:        {}", transfers);
    println!(
        "Micro-frames:     {} ({} corrupt)",
        produced.frames, produced.error_frames
    );
    println!("Images sent:      {}", produced.images);
    println!("Chunks completed: {}", counters.chunks_completed);
    println!("Chunks discarded: {}", counters.chunks_discarded);
    println!("Frames dropped:   {}", counters.frames_dropped);
    println!("Decode failures:  {}", counters.decode_failures);
    println!("Stream errors:    {}", errors.total);
    println!("Images received:  {}", received);
    println!("Final gain:       {:.3}", controls.gain());
}

/// Stream errors taken from the camera.
///
/// Taking an error clears it in the pipeline, so the one raised during the
/// current reporting interval is kept here for `/health`.
#[derive(Debug, Default)]
struct ErrorLog {
    total: u64,
    pending: Option<StreamError>,
}

impl ErrorLog {
    fn poll(&mut self, camera: &mut impl Camera) {
        if let Some(error) = camera.take_stream_error() {
            warn!(%error, "Stream error");
            self.total += 1;
            self.pending = Some(error);
        }
    }

    fn take_pending(&mut self) -> Option<StreamError> {
        self.pending.take()
    }
}

#[cfg(feature = "metrics")]
type SharedMetrics = Arc<tokio::sync::RwLock<isoc_pipeline::metrics::MetricsState>>;

#[cfg(feature = "metrics")]
fn start_metrics(port: u16) -> Option<SharedMetrics> {
    use isoc_pipeline::metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig};

    let registry = match MetricsRegistry::new() {
        Ok(registry) => registry,
        Err(e) => {
            warn!("Failed to create metrics registry: {}", e);
            return None;
        }
    };
    let server = MetricsServer::new(MetricsServerConfig::with_port(port), registry);
    let state = server.state();
    match server.spawn() {
        Ok(_) => Some(state),
        Err(e) => {
            warn!("Failed to start metrics server: {}", e);
            None
        }
    }
}

#[cfg(feature = "metrics")]
fn publish_metrics(
    metrics: Option<&SharedMetrics>,
    camera: &GenericCamera,
    controls: &dyn CameraControls,
    stream_error: Option<StreamError>,
) {
    use isoc_pipeline::metrics::MetricsSnapshot;

    let (Some(metrics), Some(pipeline)) = (metrics, camera.pipeline()) else {
        return;
    };
    let snapshot =
        MetricsSnapshot::from_parts(pipeline.counters(), pipeline.pool_counts(), controls);
    let mut state = metrics.blocking_write();
    state.update(&snapshot);
    state.set_stream_error(stream_error);
}
