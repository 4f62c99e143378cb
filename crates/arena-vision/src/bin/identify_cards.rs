//! Run the card identification pipeline on a saved draft screenshot.
//! Usage: cargo run -p arena-vision --features cli --bin identify_cards -- <screenshot.png> <data_dir> [region_template.png]
//!        cargo run -p arena-vision --features cli --bin identify_cards -- hash <card_image.png>...

use anyhow::{Context, Result};
use arena_capture::crop_region;
use arena_vision::hash_matcher::reference_hash;
use arena_vision::{CardIdentifier, LocatorConfig, RegionLocator, TesseractReader, TextRecognizer};
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() >= 3 && args[1] == "hash" {
        return print_hashes(&args[2..]);
    }
    if args.len() < 3 {
        eprintln!(
            "Usage: {} <screenshot.png> <data_dir> [region_template.png]\n       {} hash <card_image.png>...",
            args[0], args[0]
        );
        std::process::exit(1);
    }

    let input_path = PathBuf::from(&args[1]);
    let data_dir = PathBuf::from(&args[2]);

    println!("Loading image: {}", input_path.display());
    let frame = image::open(&input_path)
        .with_context(|| format!("Failed to open {}", input_path.display()))?
        .to_rgba8();
    let (w, h) = frame.dimensions();
    println!("Image size: {}x{}", w, h);

    let locator = match args.get(3) {
        Some(path) => {
            let template = image::open(path)
                .with_context(|| format!("Failed to open template {}", path))?
                .to_rgba8();
            RegionLocator::new(template, LocatorConfig::default())
        }
        None => RegionLocator::without_template(),
    };

    println!("\n=== Regions ===");
    let located = locator.locate(&frame, 0);
    println!("Source: {:?}", located.source);
    for region in &located.regions {
        let r = region.pixel_rect(w, h);
        println!(
            "  {}: x={} y={} w={} h={}",
            region.name, r.x, r.y, r.width, r.height
        );
    }

    let reader = TesseractReader::new();
    if !reader.is_available() {
        println!("Tesseract not available, name matching disabled");
    }
    let recognizer: Arc<dyn TextRecognizer> = Arc::new(reader);
    let identifier = CardIdentifier::load(&data_dir, Some(recognizer))?;
    println!("\nMatchers ready: {:?}", identifier.readiness());

    println!("\n=== Identification ===");
    for region in &located.regions {
        let crop = crop_region(&frame, &region.pixel_rect(w, h));
        let result = identifier.identify(&crop, region.index);
        let id = &result.identification;
        let name = id
            .card_id
            .as_deref()
            .and_then(|cid| identifier.store().card(cid))
            .map(|c| c.name.as_str())
            .unwrap_or("?");
        println!(
            "{}: {} {:?} ({:.2}, {:?})",
            region.name, name, id.card_id, id.confidence, id.rule
        );
        for c in &result.candidates {
            println!("    {:<8} {:?} ({:.2})", c.source.to_string(), c.card_id, c.confidence);
        }
    }
    Ok(())
}

/// Print reference hashes as a JSON object suitable for hashes.json.
fn print_hashes(paths: &[String]) -> Result<()> {
    let mut table = serde_json::Map::new();
    for path in paths {
        let img = image::open(path)
            .with_context(|| format!("Failed to open {}", path))?
            .to_rgba8();
        let id = PathBuf::from(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path.as_str())
            .to_string();
        table.insert(id, serde_json::Value::String(reference_hash(&img)));
    }
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}
