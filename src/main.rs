//! Barscope interactive scanner: live camera or still image, with overlay

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use barscope::capture::{CaptureBackend, V4l2Backend};
use barscope::display::{Renderer, Sdl2Display};
use barscope::{utils, Config, DecoderKind, Mode, ModeController};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "barscope", version, about = "Real-time barcode scanner")]
struct Args {
    /// Start in file mode instead of opening the camera
    #[arg(long)]
    file: bool,

    /// Image to load at startup (implies --file)
    #[arg(long, value_name = "PATH")]
    image: Option<PathBuf>,

    /// Capture device index
    #[arg(long, value_name = "INDEX")]
    camera: Option<usize>,

    /// Decoder backend
    #[arg(long, value_enum)]
    decoder: Option<DecoderKind>,

    /// Config file (default: ./barscope.toml if present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print capture devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    utils::init_tracing();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(index) = args.camera {
        config.capture.device_index = index;
    }
    if let Some(decoder) = args.decoder {
        config.detect.decoder = decoder;
    }

    let backend: Arc<dyn CaptureBackend> = Arc::new(V4l2Backend::new(&config.capture));
    if args.list_devices {
        for device in backend.list_devices() {
            println!("{}: {} ({})", device.index, device.name, device.path);
        }
        return Ok(());
    }

    let decoder = config.detect.decoder.build(&config.detect);
    let mut controller = ModeController::new(backend, decoder, &config.capture)?;
    info!(decoder = controller.decoder_name(), "Barscope launching...");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    // Print each payload the first time it is seen
    let entries = controller.log().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(entry) = entries.recv_async().await {
            println!(
                "[{}] {} ({})",
                utils::clock_time(entry.first_seen),
                entry.text,
                entry.format
            );
        }
    });

    if let Some(path) = &args.image {
        match controller.load_image(path) {
            Ok(snapshot) => info!("{} barcode(s) in {}", snapshot.len(), path.display()),
            Err(e) => error!("{}", e),
        }
    } else if !args.file {
        if let Err(e) = controller.switch_to(Mode::Camera) {
            error!("{}; continuing in file mode", e);
        }
    }

    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let mut display = Sdl2Display::new(&sdl_context, &config.display)?;
    let mut renderer = Renderer::new(
        controller.frame_feed(),
        controller.store(),
        controller.log(),
        &config.display,
    );

    let result = display.run(
        &sdl_context,
        &mut controller,
        &mut renderer,
        &config.detect,
        config.display.fps,
        &shutdown,
    );

    controller.shutdown();
    printer.abort();
    info!("Barscope shutting down");
    result
}
