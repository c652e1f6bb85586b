pub mod overlay;

pub use overlay::{hit_test, OverlayRenderer, RenderOutput, TextAlign};

use cosmic_text::{
    fontdb, Attrs, Buffer, Color as CosmicColor, Family, FontSystem, Metrics, Shaping, SwashCache,
    Wrap,
};
use image::{Rgba, RgbaImage};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::types::PixelRect;

/// Detect if text contains CJK (Chinese, Japanese, Korean) characters.
/// CJK glyphs are roughly square, Latin glyphs about half as wide.
pub fn is_cjk_text(text: &str) -> bool {
    text.chars().any(is_cjk_char)
}

fn is_cjk_char(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}' |  // CJK Unified Ideographs
        '\u{3040}'..='\u{309F}' |  // Hiragana
        '\u{30A0}'..='\u{30FF}' |  // Katakana
        '\u{AC00}'..='\u{D7AF}' |  // Hangul
        '\u{FF00}'..='\u{FFEF}'    // Fullwidth forms
    )
}

/// Text shaping and drawing backed by cosmic-text.
///
/// When no font could be loaded the renderer keeps working with
/// estimated metrics and skips glyph drawing, so overlays still get
/// their background boxes.
pub struct CosmicTextRenderer {
    fonts: Option<FontState>,
}

struct FontState {
    font_system: Mutex<FontSystem>,
    swash_cache: Mutex<SwashCache>,
}

impl CosmicTextRenderer {
    pub fn new(font_dir: Option<&str>, load_system_fonts: bool) -> Self {
        let mut db = fontdb::Database::new();

        if load_system_fonts {
            db.load_system_fonts();
        }
        if let Some(dir) = font_dir {
            if Path::new(dir).is_dir() {
                db.load_fonts_dir(dir);
                debug!("Loaded fonts from {}", dir);
            } else {
                warn!("Font directory {} does not exist", dir);
            }
        }

        if db.is_empty() {
            warn!("No fonts available, overlays will be drawn without glyphs");
            return Self { fonts: None };
        }

        info!("Text renderer initialized with {} font faces", db.len());
        Self {
            fonts: Some(FontState {
                font_system: Mutex::new(FontSystem::new_with_locale_and_db("en-US".to_string(), db)),
                swash_cache: Mutex::new(SwashCache::new()),
            }),
        }
    }

    /// Renderer that never draws glyphs
    pub fn without_fonts() -> Self {
        Self { fonts: None }
    }

    pub fn has_fonts(&self) -> bool {
        self.fonts.is_some()
    }

    fn line_height(text: &str, font_size: f32) -> f32 {
        let ratio = if is_cjk_text(text) { 1.40 } else { 1.35 };
        font_size * ratio
    }

    /// Rendered `(width, height)` of `text` wrapped at `max_width`
    pub async fn measure_text(&self, text: &str, font_size: f32, max_width: Option<f32>) -> (f32, f32) {
        if text.trim().is_empty() {
            return (0.0, 0.0);
        }

        let Some(fonts) = &self.fonts else {
            return Self::estimate_text(text, font_size, max_width);
        };

        let line_height = Self::line_height(text, font_size);
        let metrics = Metrics::new(font_size, line_height);
        let mut font_system = fonts.font_system.lock().await;
        let buffer = Self::shape(&mut font_system, text, metrics, max_width);

        let mut width = 0.0f32;
        let mut lines = 0usize;
        for run in buffer.layout_runs() {
            lines += 1;
            let run_right = run
                .glyphs
                .iter()
                .map(|g| g.x + g.w)
                .fold(run.line_w, f32::max);
            width = width.max(run_right);
        }

        (width.ceil(), lines as f32 * line_height)
    }

    /// Metrics without a font: fixed advance per glyph, greedy wrap at `max_width`
    fn estimate_text(text: &str, font_size: f32, max_width: Option<f32>) -> (f32, f32) {
        let line_height = Self::line_height(text, font_size);
        let mut widest = 0.0f32;
        let mut lines = 0usize;

        for paragraph in text.lines() {
            let advance: f32 = paragraph
                .chars()
                .map(|c| if is_cjk_char(c) { font_size } else { font_size * 0.55 })
                .sum();
            match max_width {
                Some(limit) if limit > 0.0 && advance > limit => {
                    lines += (advance / limit).ceil() as usize;
                    widest = widest.max(limit);
                }
                _ => {
                    lines += 1;
                    widest = widest.max(advance);
                }
            }
        }

        (widest.ceil(), lines.max(1) as f32 * line_height)
    }

    fn shape(font_system: &mut FontSystem, text: &str, metrics: Metrics, max_width: Option<f32>) -> Buffer {
        let mut buffer = Buffer::new(font_system, metrics);
        buffer.set_size(font_system, max_width, None);
        buffer.set_wrap(font_system, Wrap::WordOrGlyph);
        let attrs = Attrs::new().family(Family::SansSerif);
        buffer.set_text(font_system, text, &attrs, Shaping::Advanced);
        buffer.shape_until_scroll(font_system, false);
        buffer
    }

    /// Draw `text` with its top-left at `(x, y)`, alpha-blended and clipped to `clip`.
    /// Returns false when glyphs could not be drawn for lack of fonts.
    #[allow(clippy::too_many_arguments)]
    pub async fn draw_text(
        &self,
        img: &mut RgbaImage,
        text: &str,
        font_size: f32,
        color: Rgba<u8>,
        x: i32,
        y: i32,
        max_width: Option<f32>,
        clip: PixelRect,
    ) -> bool {
        let Some(fonts) = &self.fonts else {
            return false;
        };

        let metrics = Metrics::new(font_size, Self::line_height(text, font_size));
        let mut font_system = fonts.font_system.lock().await;
        let mut swash_cache = fonts.swash_cache.lock().await;
        let buffer = Self::shape(&mut font_system, text, metrics, max_width);

        let (min_x, min_y) = (clip.x.floor() as i32, clip.y.floor() as i32);
        let (max_x, max_y) = (clip.max_x().ceil() as i32, clip.max_y().ceil() as i32);
        let (width, height) = (img.width() as i32, img.height() as i32);
        let cosmic_color = CosmicColor::rgba(color[0], color[1], color[2], color[3]);

        buffer.draw(&mut font_system, &mut swash_cache, cosmic_color, |px, py, _w, _h, pixel| {
            let img_x = x + px;
            let img_y = y + py;

            let visible = img_x >= min_x.max(0)
                && img_x < max_x.min(width)
                && img_y >= min_y.max(0)
                && img_y < max_y.min(height);
            if !visible || pixel.a() == 0 {
                return;
            }

            let existing = img.get_pixel(img_x as u32, img_y as u32);
            let alpha = pixel.a() as f32 / 255.0;
            let inv_alpha = 1.0 - alpha;
            let blended = Rgba([
                ((pixel.r() as f32 * alpha) + (existing[0] as f32 * inv_alpha)) as u8,
                ((pixel.g() as f32 * alpha) + (existing[1] as f32 * inv_alpha)) as u8,
                ((pixel.b() as f32 * alpha) + (existing[2] as f32 * inv_alpha)) as u8,
                existing[3].max(pixel.a()),
            ]);
            img.put_pixel(img_x as u32, img_y as u32, blended);
        });

        true
    }
}

impl Default for CosmicTextRenderer {
    fn default() -> Self {
        Self::new(None, true)
    }
}
