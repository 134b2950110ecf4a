//! Throughput benchmark: a mix of images with and without plates.
//!
//! ```text
//! cargo run --release --features onnx --example benchmark -- \
//!     --positive assets/images/plate_1280x720.jpg \
//!     --negative assets/images/traffic.jpg \
//!     --assets assets --loops 100 --rate 0.2 --parallel
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use alpr_sdk::{AlprResult, DeliveryCallback, Engine, ImageDescriptor, ImageType};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Measure recognition throughput")]
struct Args {
    /// Image (JPEG/PNG/BMP) with a license plate
    #[arg(long)]
    positive: PathBuf,

    /// Image (JPEG/PNG/BMP) without a license plate
    #[arg(long)]
    negative: PathBuf,

    /// Folder with the models
    #[arg(long, default_value = ".")]
    assets: String,

    /// Number of images to process
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
    loops: u32,

    /// Share of positive images, within [0, 1]
    #[arg(long, default_value_t = 0.2)]
    rate: f64,

    /// Deliver results on the worker thread
    #[arg(long)]
    parallel: bool,

    /// Enable the rectification layer
    #[arg(long)]
    rectify: bool,

    #[arg(long)]
    tokenfile: Option<String>,

    #[arg(long)]
    tokendata: Option<String>,
}

struct Decoded {
    pixels: Vec<u8>,
    width: usize,
    height: usize,
    orientation: i32,
}

impl Decoded {
    fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let image = image::load_from_memory(&raw)
            .map_err(|e| format!("{}: {}", path.display(), e))?
            .to_rgb8();
        Ok(Self {
            width: image.width() as usize,
            height: image.height() as usize,
            pixels: image.into_raw(),
            orientation: Engine::exif_orientation(&raw),
        })
    }

    fn descriptor(&self) -> ImageDescriptor<'_> {
        ImageDescriptor::packed(ImageType::Rgb24, &self.pixels, self.width, self.height)
            .with_exif_orientation(self.orientation)
    }
}

struct Counter {
    delivered: AtomicUsize,
}

impl DeliveryCallback for Counter {
    fn on_new_result(&self, result: &AlprResult) {
        let n = self.delivered.fetch_add(1, Ordering::Relaxed) + 1;
        if !result.is_ok() {
            eprintln!("frame {} failed: {}", n, result.phrase());
        }
    }
}

fn main() {
    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.rate) {
        eprintln!("--rate must be within [0.0, 1.0]");
        std::process::exit(1);
    }

    let (positive, negative) = match (Decoded::load(&args.positive), Decoded::load(&args.negative)) {
        (Ok(p), Ok(n)) => (p, n),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("Failed to read image: {}", e);
            std::process::exit(1);
        }
    };

    let config = serde_json::json!({
        "debug_level": "info",
        "detect_minscore": 0.1,
        "pyramidal_search_enabled": false,
        "recogn_minscore": 0.3,
        "recogn_score_type": "min",
        "recogn_rectify_enabled": args.rectify,
        "assets_folder": args.assets,
        "license_token_file": args.tokenfile,
        "license_token_data": args.tokendata,
    });

    // Positives spread evenly over the run, at least one
    let loops = args.loops as usize;
    let num_positives = ((loops as f64 * args.rate) as usize).clamp(1, loops);
    let is_positive = |i: usize| (i * num_positives) % loops < num_positives;

    let engine = match Engine::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Failed to create engine: {}", e);
            std::process::exit(1);
        }
    };
    let counter = Arc::new(Counter {
        delivered: AtomicUsize::new(0),
    });
    let observer = args
        .parallel
        .then(|| counter.clone() as Arc<dyn DeliveryCallback>);

    let result = engine.init(Some(&config.to_string()), observer);
    if !result.is_ok() {
        eprintln!("Failed to initialize engine: {}", result.phrase());
        std::process::exit(1);
    }

    if loops > 1 {
        println!("Running warmup pass...");
        let warm = engine.warm_up(ImageType::Rgb24);
        if !warm.is_ok() {
            eprintln!("Warm-up failed: {}", warm.phrase());
        }
    }

    println!(
        "Benchmarking {} frames ({} positive, {} delivery)...",
        loops,
        num_positives,
        if args.parallel { "parallel" } else { "sequential" }
    );
    let start = Instant::now();
    let mut last = AlprResult::default();
    for i in 0..loops {
        let image = if is_positive(i) { &positive } else { &negative };
        last = engine.process(&image.descriptor());
        if !last.is_ok() {
            eprintln!("Frame {} failed: {}", i, last.phrase());
        }
    }
    // In parallel mode deinit waits for the queue to drain
    engine.deinit();
    let elapsed = start.elapsed();

    println!("\n=== Results ===");
    if !last.json().is_empty() {
        println!("Last result: {}", last.json());
    }
    if args.parallel {
        println!("Delivered: {}", counter.delivered.load(Ordering::Relaxed));
    }
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    println!("Elapsed: {:.2} ms", elapsed_ms);
    println!("Throughput: {:.1} FPS", 1000.0 / (elapsed_ms / loops as f64));
}
