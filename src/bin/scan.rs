//! Barscope batch scanner: decode one image and print what was found

use std::path::PathBuf;

use barscope::{utils, Config, DecoderKind};
use clap::Parser;
use color_eyre::Result;
use tracing::{error, warn};

#[derive(Debug, Parser)]
#[command(name = "barscope-scan", version, about = "Decode barcodes in an image file")]
struct Args {
    /// Image to decode
    image: PathBuf,

    /// Decoder backend
    #[arg(long, value_enum, conflicts_with = "all")]
    decoder: Option<DecoderKind>,

    /// Run every decoder backend in turn
    #[arg(long)]
    all: bool,

    /// Config file (default: ./barscope.toml if present)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

const SEPARATOR: &str = "------------------------------------------------------";

fn main() -> Result<()> {
    color_eyre::install()?;
    utils::init_tracing();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(decoder) = args.decoder {
        config.detect.decoder = decoder;
    }

    // An unreadable file is reported, not a failure of the run
    let frame = match barscope::capture::load_image_file(&args.image) {
        Ok(frame) => frame,
        Err(e) => {
            error!("{}", e);
            println!("{}", e);
            return Ok(());
        }
    };

    let kinds: Vec<DecoderKind> = if args.all {
        DecoderKind::ALL.to_vec()
    } else {
        vec![config.detect.decoder]
    };

    for (i, kind) in kinds.iter().enumerate() {
        let decoder = kind.build(&config.detect);
        if i > 0 {
            println!("{}", SEPARATOR);
        }
        match decoder.detect(&frame) {
            Ok(detections) => {
                println!("{} result count: {}", decoder.name(), detections.len());
                for det in &detections {
                    println!("Format: {}", det.format);
                    println!("Text: {}", det.text);
                    println!();
                }
            }
            Err(e) => warn!(decoder = decoder.name(), "Decode failed: {}", e),
        }
    }

    Ok(())
}
