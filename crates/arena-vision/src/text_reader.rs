use image::{imageops, GrayImage, Luma, RgbaImage};
use serde::{Deserialize, Serialize};
use std::process::Command;
use tracing::{debug, warn};

/// Name banners are light text on a dark ribbon.
const TEXT_THRESHOLD: u8 = 140;
const UPSCALE: u32 = 2;

/// Text read from a name banner, with the recognizer's confidence in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: f64,
}

/// Reads a single line of card-name text from an image.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &RgbaImage) -> Option<RecognizedText>;

    fn is_available(&self) -> bool;
}

/// Tesseract OCR run as a subprocess. Unavailable when the binary is not installed.
pub struct TesseractReader {
    tesseract_available: bool,
}

impl TesseractReader {
    pub fn new() -> Self {
        let tesseract_available = check_tesseract();
        if tesseract_available {
            debug!("Tesseract OCR available");
        } else {
            warn!("Tesseract not found, card name OCR disabled");
        }
        Self {
            tesseract_available,
        }
    }

    fn run_tesseract(&self, image: &GrayImage) -> Option<RecognizedText> {
        // Regions are read in parallel, so every call gets its own file
        let file = tempfile::Builder::new()
            .prefix("arena_ocr_")
            .suffix(".png")
            .tempfile()
            .ok()?;
        image.save(file.path()).ok()?;

        let output = Command::new("tesseract")
            .arg(file.path())
            .arg("stdout")
            .arg("--psm")
            .arg("7")
            .arg("tsv")
            .output()
            .ok()?;

        if !output.status.success() {
            debug!("tesseract exited with {}", output.status);
            return None;
        }

        let tsv = String::from_utf8(output.stdout).ok()?;
        let result = parse_tsv(&tsv)?;
        debug!("OCR result: '{}' ({:.2})", result.text, result.confidence);
        Some(result)
    }
}

impl Default for TesseractReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRecognizer for TesseractReader {
    fn recognize(&self, image: &RgbaImage) -> Option<RecognizedText> {
        if !self.tesseract_available || image.width() == 0 || image.height() == 0 {
            return None;
        }
        self.run_tesseract(&preprocess_for_ocr(image))
    }

    fn is_available(&self) -> bool {
        self.tesseract_available
    }
}

/// Threshold bright text to black on white, then upscale.
pub fn preprocess_for_ocr(image: &RgbaImage) -> GrayImage {
    let gray = imageops::grayscale(image);
    let (w, h) = gray.dimensions();
    let binary = GrayImage::from_fn(w, h, |x, y| {
        if gray.get_pixel(x, y)[0] > TEXT_THRESHOLD {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });
    imageops::resize(
        &binary,
        w * UPSCALE,
        h * UPSCALE,
        imageops::FilterType::Nearest,
    )
}

/// Join word rows of Tesseract TSV output and average their confidence.
///
/// Columns: level, page, block, par, line, word, left, top, width, height, conf, text.
pub fn parse_tsv(tsv: &str) -> Option<RecognizedText> {
    let mut words = Vec::new();
    let mut total_conf = 0.0;

    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let Ok(conf) = cols[10].trim().parse::<f64>() else {
            continue;
        };
        let word = cols[11].trim();
        if conf < 0.0 || word.is_empty() {
            continue;
        }
        words.push(word);
        total_conf += conf;
    }

    if words.is_empty() {
        return None;
    }
    Some(RecognizedText {
        text: words.join(" "),
        confidence: (total_conf / words.len() as f64 / 100.0).clamp(0.0, 1.0),
    })
}

fn check_tesseract() -> bool {
    Command::new("tesseract")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
