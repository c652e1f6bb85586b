// Bilingual overlay compositing
//
// Each segment is drawn in place of its original text: the box is filled
// with the sampled local background and the translation is drawn on top
// in a contrasting color.

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::core::config::RenderingConfig;
use crate::core::errors::{RenderingError, RenderingResult};
use crate::core::types::{BilingualSegment, PixelRect};
use crate::services::rendering::CosmicTextRenderer;

/// Background used when the source bitmap cannot be sampled
pub const NEUTRAL_BACKGROUND: Rgba<u8> = Rgba([128, 128, 128, 255]);

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Boxes whose horizontal center is this close (as a fraction of width)
/// to the bitmap's center line are drawn centered
const CENTER_TOLERANCE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
}

/// Composited bitmap plus the pixel boxes that were filled
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub image: RgbaImage,
    pub boxes: Vec<PixelRect>,
}

/// Per-segment styling, computed from the source bitmap alone
#[derive(Debug, Clone, Copy)]
struct SegmentStyle {
    pixel_box: PixelRect,
    background: Rgba<u8>,
    foreground: Rgba<u8>,
    font_size: f32,
    align: TextAlign,
}

/// Average RGB of four points just outside the box edges, clamped to the bitmap.
/// None for an empty bitmap.
pub fn sample_background(image: &RgbaImage, rect: &PixelRect, offset: f64) -> Option<Rgba<u8>> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return None;
    }

    let (cx, cy) = rect.center();
    let points = [
        (rect.x - offset, cy),
        (rect.max_x() + offset, cy),
        (cx, rect.y - offset),
        (cx, rect.max_y() + offset),
    ];

    let mut sum = [0u32; 3];
    for (px, py) in points {
        let x = px.round().clamp(0.0, (width - 1) as f64) as u32;
        let y = py.round().clamp(0.0, (height - 1) as f64) as u32;
        let pixel = image.get_pixel(x, y);
        for (acc, channel) in sum.iter_mut().zip(pixel.0.iter()) {
            *acc += *channel as u32;
        }
    }

    let n = points.len() as u32;
    Some(Rgba([
        (sum[0] / n) as u8,
        (sum[1] / n) as u8,
        (sum[2] / n) as u8,
        255,
    ]))
}

/// Perceived luminance in 0..1
pub fn luminance(color: Rgba<u8>) -> f64 {
    let r = color[0] as f64 / 255.0;
    let g = color[1] as f64 / 255.0;
    let b = color[2] as f64 / 255.0;
    0.299 * r + 0.587 * g + 0.114 * b
}

/// White on dark backgrounds (L <= 0.5), black otherwise
pub fn text_color_for(background: Rgba<u8>) -> Rgba<u8> {
    if luminance(background) <= 0.5 {
        WHITE
    } else {
        BLACK
    }
}

/// Box height scaled by `font_scale`, bounded by the configured sizes.
/// `max_font_size` wins when the bounds are inverted.
pub fn font_size_for(box_height: f64, config: &RenderingConfig) -> f32 {
    (box_height as f32 * config.font_scale)
        .max(config.min_font_size)
        .min(config.max_font_size)
}

/// Only the horizontal axis picks an alignment. Text is always centered
/// vertically inside its fill.
pub fn alignment_for(rect: &PixelRect, image_width: u32) -> TextAlign {
    let width = image_width as f64;
    let (cx, _) = rect.center();
    if width > 0.0 && (cx - width / 2.0).abs() <= width * CENTER_TOLERANCE {
        TextAlign::Center
    } else {
        TextAlign::Left
    }
}

/// Index of the first rendered box containing `point`, each box grown by `margin`
pub fn hit_test(point: (f64, f64), boxes: &[PixelRect], margin: f64) -> Option<usize> {
    boxes
        .iter()
        .position(|b| b.expanded(margin).contains(point.0, point.1))
}

fn fill_rect(image: &mut RgbaImage, rect: &PixelRect, color: Rgba<u8>) {
    let x0 = rect.x.floor().max(0.0) as u32;
    let y0 = rect.y.floor().max(0.0) as u32;
    let x1 = (rect.max_x().ceil() as u32).min(image.width());
    let y1 = (rect.max_y().ceil() as u32).min(image.height());
    for y in y0..y1 {
        for x in x0..x1 {
            image.put_pixel(x, y, color);
        }
    }
}

/// Draws translated text over the original bitmap
pub struct OverlayRenderer {
    text: Arc<CosmicTextRenderer>,
    config: RenderingConfig,
}

impl OverlayRenderer {
    pub fn new(config: RenderingConfig) -> Self {
        let text = CosmicTextRenderer::new(config.font_dir.as_deref(), config.load_system_fonts);
        Self::with_text_renderer(config, Arc::new(text))
    }

    pub fn with_text_renderer(config: RenderingConfig, text: Arc<CosmicTextRenderer>) -> Self {
        Self { text, config }
    }

    pub fn config(&self) -> &RenderingConfig {
        &self.config
    }

    /// Report whether a point falls on one of the rendered boxes
    pub fn hit_test(&self, point: (f64, f64), boxes: &[PixelRect]) -> bool {
        hit_test(point, boxes, self.config.hit_margin).is_some()
    }

    #[instrument(skip(self, source, segments), fields(segments = segments.len()))]
    pub async fn render(
        &self,
        source: &RgbaImage,
        segments: &[BilingualSegment],
    ) -> RenderingResult<RenderOutput> {
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Err(RenderingError::InvalidDimensions { width, height });
        }

        if segments.is_empty() {
            return Ok(RenderOutput {
                image: source.clone(),
                boxes: Vec::new(),
            });
        }

        // Styling only reads the source bitmap
        let styles: Vec<SegmentStyle> = segments
            .par_iter()
            .map(|segment| self.style_for(source, segment))
            .collect();

        let mut image = source.clone();
        let mut boxes = Vec::with_capacity(segments.len());
        let padding = self.config.text_padding as f64;

        for (segment, style) in segments.iter().zip(styles) {
            let text = segment.translated_text.as_str();
            let mut wrap_width = self
                .config
                .max_text_width
                .map(|w| w.max(style.pixel_box.width as f32))
                .unwrap_or(style.pixel_box.width as f32)
                .max(1.0);

            let (mut text_w, mut text_h) = self
                .text
                .measure_text(text, style.font_size, Some(wrap_width))
                .await;

            // Wrapped text taller than the room below the box gets the full width
            let room_below = height as f64 - style.pixel_box.y;
            let full_width = (width as f64 - padding * 2.0) as f32;
            if text_h as f64 + padding * 2.0 > room_below && wrap_width < full_width {
                wrap_width = full_width;
                (text_w, text_h) = self
                    .text
                    .measure_text(text, style.font_size, Some(wrap_width))
                    .await;
            }

            let fill_w = style.pixel_box.width.max(text_w as f64 + padding * 2.0);
            let fill_h = style.pixel_box.height.max(text_h as f64 + padding * 2.0);
            let fill_x = match style.align {
                TextAlign::Left => style.pixel_box.x,
                TextAlign::Center => style.pixel_box.center().0 - fill_w / 2.0,
            };
            // Pull fills crossing the right or bottom edge back inside the bitmap
            let fill_x = fill_x.min(width as f64 - fill_w).max(0.0);
            let fill_y = style.pixel_box.y.min(height as f64 - fill_h).max(0.0);
            let fill = PixelRect::new(fill_x, fill_y, fill_w, fill_h).clamped(width, height);

            fill_rect(&mut image, &fill, style.background);

            let text_x = match style.align {
                TextAlign::Left => fill.x + padding,
                TextAlign::Center => fill.x + (fill.width - text_w as f64) / 2.0,
            };
            let text_y = fill.y + (fill.height - text_h as f64) / 2.0;

            self.text
                .draw_text(
                    &mut image,
                    text,
                    style.font_size,
                    style.foreground,
                    text_x.round() as i32,
                    text_y.round() as i32,
                    Some(wrap_width),
                    fill,
                )
                .await;

            debug!(
                "Segment {} at ({:.0},{:.0}) {:.0}x{:.0}, font {:.1}px, {:?}",
                segment.id, fill.x, fill.y, fill.width, fill.height, style.font_size, style.align
            );
            boxes.push(fill);
        }

        Ok(RenderOutput { image, boxes })
    }

    fn style_for(&self, source: &RgbaImage, segment: &BilingualSegment) -> SegmentStyle {
        let (width, height) = source.dimensions();
        let pixel_box = segment.original.bounding_box.to_pixels(width, height);
        let background = sample_background(source, &pixel_box, self.config.sample_offset)
            .unwrap_or(NEUTRAL_BACKGROUND);

        SegmentStyle {
            pixel_box,
            background,
            foreground: text_color_for(background),
            font_size: font_size_for(pixel_box.height, &self.config),
            align: alignment_for(&pixel_box, width),
        }
    }
}
