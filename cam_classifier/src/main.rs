use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use cam_classifier::{
    inference::FrameClock,
    locator::{Bindings, LocatorConfig},
    meter::spawn_meter_logger,
    onnx::{default_model_file, expose_onnx_library, LibraryShape, ModelSource, TensorLayout},
    orchestrator::Orchestrator,
    sensors::V4lDevices,
    status::{spawn_terminal_renderer, StatusLine},
    utils::ensure_local_file,
};
use clap::Parser;
use common::config::Config;
use env_logger::TimestampPrecision;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// ONNX model file, defaults to `model.onnx` in the user cache directory
    #[clap(long)]
    model: Option<PathBuf>,

    /// URL to download the model from if the file is missing
    #[clap(long)]
    model_url: Option<String>,

    /// Labels file with one label per line, defaults to `labels.txt` next to the model
    #[clap(long)]
    labels: Option<PathBuf>,

    /// URL to download the labels from if the file is missing
    #[clap(long)]
    labels_url: Option<String>,

    /// Memory layout of the model input
    #[clap(long, value_enum, default_value_t = TensorLayout::Nhwc)]
    layout: TensorLayout,

    /// Shape under which the model library is exposed to the locator
    #[clap(long, value_enum, default_value_t = LibraryShape::Factory)]
    library_shape: LibraryShape,

    /// Optional TOML config file
    #[clap(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let config = Config::load_or_default(args.config.as_deref())?;

    // Resolve model files, downloading them if needed
    let client = reqwest::Client::new();
    let model_path = args
        .model
        .unwrap_or_else(|| default_model_file("model.onnx"));
    let labels_path = args
        .labels
        .unwrap_or_else(|| model_path.with_file_name("labels.txt"));
    let model_path = ensure_local_file(&client, model_path, args.model_url.as_deref()).await?;
    let labels_path = ensure_local_file(&client, labels_path, args.labels_url.as_deref()).await?;

    let source = ModelSource {
        model_path,
        labels_path,
        width: config.model.width,
        height: config.model.height,
        layout: args.layout,
    };

    // The library exposes itself while the locator is already polling
    let bindings = Arc::new(Bindings::new());
    {
        let bindings = Arc::clone(&bindings);
        let shape = args.library_shape;
        tokio::spawn(async move {
            if let Err(err) = expose_onnx_library(&bindings, source, shape).await {
                log::error!("Failed to expose classifier library: {err}");
            }
        });
    }

    let status = StatusLine::new();
    spawn_terminal_renderer(&status);
    spawn_meter_logger(Duration::from_secs(2));

    let orchestrator = Orchestrator {
        bindings,
        locator: LocatorConfig::default(),
        devices: Arc::new(V4lDevices::new(args.device)),
        model_size: (config.model.width, config.model.height),
        clock: FrameClock::new(config.model.refresh_hz)?,
        status,
    };

    let cancel = CancellationToken::new();
    let mut inference = orchestrator.start(cancel.clone()).await?;

    tokio::select! {
        res = &mut inference => res??,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down");
            cancel.cancel();
            inference.await??;
        }
    }

    Ok(())
}
