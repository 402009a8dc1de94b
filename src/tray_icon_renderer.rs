//! Tray icon composer: a glyph above two stacked usage bars.
//!
//! ```text
//!  +----------------+
//!  |      C / 73    |  glyph area
//!  |                |
//!  |################|  session bar (9 px)
//!  |                |  3 px gap
//!  |#########.......|  weekly bar (9 px)
//!  +----------------+
//! ```

use tiny_skia::{
    LineCap, Paint, PathBuilder, Pixmap, PixmapPaint, PremultipliedColorU8, Rect, Stroke,
    Transform,
};

use crate::derive::{ThresholdClass, ViewModel};
use crate::error::PollError;
use crate::snapshot::BucketKind;
use crate::theme::IconPalette;

pub const ICON_SIZE: u32 = 64;

const BAR_HEIGHT: f32 = 9.0;
const BAR_GAP: f32 = 3.0;
/// Space between the glyph area and the top bar.
const GLYPH_MARGIN: f32 = 3.0;
const GLYPH_PADDING: f32 = 2.0;
/// Fontdue needs a size to measure with before fitting the glyph to its box.
const MEASURE_PX: f32 = 100.0;
const CROSS_STROKE: f32 = 7.0;
/// Percentages are shown only above this session level.
const PERCENT_GLYPH_ABOVE: f64 = 50.0;

#[derive(Clone, Debug)]
pub struct TrayImage {
    rgba: Vec<u8>,
    width: u32,
    height: u32,
}

impl TrayImage {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgba(&self) -> &[u8] {
        &self.rgba
    }

    /// Straight-alpha RGBA of one pixel.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.rgba[i], self.rgba[i + 1], self.rgba[i + 2], self.rgba[i + 3]]
    }

    pub fn into_tauri_image(self) -> tauri::image::Image<'static> {
        tauri::image::Image::new_owned(self.rgba, self.width, self.height)
    }
}

/// What the top of the icon shows, highest priority first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconGlyph {
    /// Credential missing or the session expired.
    LoginRequired,
    Error,
    /// Session quota exhausted; drawn as a cross.
    Depleted,
    Percent(u32),
    Default,
}

impl IconGlyph {
    pub fn select(view: Option<&ViewModel>, error: Option<&PollError>) -> Self {
        match error {
            Some(err) if err.needs_login() => return IconGlyph::LoginRequired,
            Some(_) => return IconGlyph::Error,
            None => {}
        }

        let Some(session) = view.and_then(|v| v.bucket(BucketKind::Session)) else {
            return IconGlyph::Default;
        };
        if session.threshold == ThresholdClass::Depleted {
            IconGlyph::Depleted
        } else if session.used_percent > PERCENT_GLYPH_ABOVE {
            IconGlyph::Percent((session.used_percent.round() as u32).min(99))
        } else {
            IconGlyph::Default
        }
    }

    fn text(&self) -> Option<String> {
        match self {
            IconGlyph::LoginRequired => Some("C!".to_string()),
            IconGlyph::Error => Some("!".to_string()),
            IconGlyph::Depleted => None,
            IconGlyph::Percent(percent) => Some(percent.to_string()),
            IconGlyph::Default => Some("C".to_string()),
        }
    }
}

/// Everything the composer needs; equal specs render identical bitmaps.
#[derive(Debug, Clone, PartialEq)]
pub struct IconSpec {
    pub glyph: IconGlyph,
    /// Session and weekly fill fractions. `None` before the first snapshot;
    /// an inner `None` leaves that bar out.
    pub bars: Option<[Option<f64>; 2]>,
}

impl IconSpec {
    pub fn from_state(view: Option<&ViewModel>, error: Option<&PollError>) -> Self {
        let bars = view.map(|view| {
            [BucketKind::Session, BucketKind::Weekly]
                .map(|kind| view.bucket(kind).map(|b| b.bar_fraction))
        });
        Self {
            glyph: IconGlyph::select(view, error),
            bars,
        }
    }
}

/// Palette in use and the spec currently shown in the tray.
#[derive(Debug, Clone)]
pub struct IconCache {
    palette: IconPalette,
    drawn: Option<IconSpec>,
}

impl IconCache {
    pub fn new(palette: IconPalette) -> Self {
        Self { palette, drawn: None }
    }

    pub fn palette(&self) -> IconPalette {
        self.palette
    }

    /// Switch palettes. A changed palette forces the next draw.
    pub fn set_palette(&mut self, palette: IconPalette) -> bool {
        if palette == self.palette {
            return false;
        }
        self.palette = palette;
        self.drawn = None;
        true
    }

    pub fn is_current(&self, spec: &IconSpec) -> bool {
        self.drawn.as_ref() == Some(spec)
    }

    pub fn mark_drawn(&mut self, spec: IconSpec) {
        self.drawn = Some(spec);
    }
}

#[derive(Debug, Clone, Copy)]
struct Area {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

pub struct TrayIconRenderer {
    font: fontdue::Font,
}

impl TrayIconRenderer {
    pub fn from_font_bytes(font_bytes: &[u8]) -> Result<Self, String> {
        let settings = fontdue::FontSettings {
            scale: MEASURE_PX,
            ..fontdue::FontSettings::default()
        };
        let font = fontdue::Font::from_bytes(font_bytes, settings).map_err(|err| err.to_string())?;
        Ok(Self { font })
    }

    pub fn render(&self, spec: &IconSpec, palette: &IconPalette) -> Result<TrayImage, String> {
        let mut pixmap =
            Pixmap::new(ICON_SIZE, ICON_SIZE).ok_or_else(|| "Failed to allocate icon pixmap".to_string())?;
        let size = ICON_SIZE as f32;

        let (glyph_area, glyph_alpha) = match spec.bars {
            Some(bars) => {
                let weekly_y = size - BAR_HEIGHT;
                let session_y = weekly_y - BAR_GAP - BAR_HEIGHT;
                for (fraction, y) in bars.iter().zip([session_y, weekly_y]) {
                    if let Some(fraction) = fraction {
                        draw_bar(&mut pixmap, y, *fraction, palette);
                    }
                }
                let area = Area {
                    x: 0.0,
                    y: 0.0,
                    w: size,
                    h: session_y - GLYPH_MARGIN,
                };
                (area, 255)
            }
            None => {
                let area = Area {
                    x: 0.0,
                    y: 0.0,
                    w: size,
                    h: size,
                };
                // Loading state is dimmed; error glyphs stay fully visible.
                let alpha = if spec.glyph == IconGlyph::Default {
                    palette.dim_alpha
                } else {
                    255
                };
                (area, alpha)
            }
        };

        match spec.glyph.text() {
            Some(text) => self.draw_text(&mut pixmap, &text, glyph_area, palette, glyph_alpha),
            None => draw_cross(&mut pixmap, glyph_area, palette, glyph_alpha),
        }

        Ok(demultiply(&pixmap))
    }

    fn draw_text(&self, pixmap: &mut Pixmap, text: &str, area: Area, palette: &IconPalette, alpha: u8) {
        let avail_w = area.w - 2.0 * GLYPH_PADDING;
        let avail_h = area.h - 2.0 * GLYPH_PADDING;

        let Some((ink_w, ink_h)) = self.ink_size(text, MEASURE_PX) else {
            return;
        };
        let px = MEASURE_PX * (avail_w / ink_w).min(avail_h / ink_h);

        let glyphs: Vec<_> = text.chars().map(|ch| self.font.rasterize(ch, px)).collect();
        let Some(bounds) = ink_bounds(&glyphs) else {
            return;
        };

        // Pen origin that centers the ink box inside the area.
        let origin_x = area.x + (area.w - (bounds.right - bounds.left)) / 2.0 - bounds.left;
        let baseline = area.y + (area.h - (bounds.bottom - bounds.top)) / 2.0 - bounds.top;

        let (r, g, b) = palette.foreground;
        let mut pen_x = origin_x;
        for (metrics, coverage) in &glyphs {
            if metrics.width > 0 && metrics.height > 0 {
                if let Some(mut glyph) = Pixmap::new(metrics.width as u32, metrics.height as u32) {
                    for (dst, cov) in glyph.pixels_mut().iter_mut().zip(coverage) {
                        let a = mul_alpha(*cov, alpha);
                        *dst = PremultipliedColorU8::from_rgba(
                            mul_alpha(r, a),
                            mul_alpha(g, a),
                            mul_alpha(b, a),
                            a,
                        )
                        .unwrap_or(PremultipliedColorU8::TRANSPARENT);
                    }
                    let x = (pen_x + metrics.xmin as f32).round() as i32;
                    let y = (baseline - metrics.ymin as f32 - metrics.height as f32).round() as i32;
                    pixmap.draw_pixmap(
                        x,
                        y,
                        glyph.as_ref(),
                        &PixmapPaint::default(),
                        Transform::identity(),
                        None,
                    );
                }
            }
            pen_x += metrics.advance_width;
        }
    }

    fn ink_size(&self, text: &str, px: f32) -> Option<(f32, f32)> {
        let glyphs: Vec<_> = text.chars().map(|ch| self.font.rasterize(ch, px)).collect();
        let bounds = ink_bounds(&glyphs)?;
        let w = bounds.right - bounds.left;
        let h = bounds.bottom - bounds.top;
        (w > 0.0 && h > 0.0).then_some((w, h))
    }
}

/// Ink extents relative to the pen origin on the baseline (y grows down).
struct InkBounds {
    left: f32,
    right: f32,
    top: f32,
    bottom: f32,
}

fn ink_bounds(glyphs: &[(fontdue::Metrics, Vec<u8>)]) -> Option<InkBounds> {
    let mut bounds: Option<InkBounds> = None;
    let mut pen_x = 0.0;
    for (metrics, _) in glyphs {
        if metrics.width > 0 && metrics.height > 0 {
            let left = pen_x + metrics.xmin as f32;
            let right = left + metrics.width as f32;
            let bottom = -(metrics.ymin as f32);
            let top = bottom - metrics.height as f32;
            bounds = Some(match bounds {
                None => InkBounds {
                    left,
                    right,
                    top,
                    bottom,
                },
                Some(b) => InkBounds {
                    left: b.left.min(left),
                    right: b.right.max(right),
                    top: b.top.min(top),
                    bottom: b.bottom.max(bottom),
                },
            });
        }
        pen_x += metrics.advance_width;
    }
    bounds
}

fn draw_bar(pixmap: &mut Pixmap, y: f32, fraction: f64, palette: &IconPalette) {
    let size = ICON_SIZE as f32;
    let (r, g, b) = palette.foreground;

    let mut paint = Paint::default();
    paint.anti_alias = false;

    if let Some(track) = Rect::from_xywh(0.0, y, size, BAR_HEIGHT) {
        paint.set_color_rgba8(r, g, b, palette.track_alpha);
        pixmap.fill_rect(track, &paint, Transform::identity(), None);
    }

    let fill_w = (fraction.clamp(0.0, 1.0) as f32 * size).round();
    if fill_w >= 1.0 {
        if let Some(fill) = Rect::from_xywh(0.0, y, fill_w, BAR_HEIGHT) {
            // Opaque fill over the track, not blended with it.
            paint.blend_mode = tiny_skia::BlendMode::Source;
            paint.set_color_rgba8(r, g, b, 255);
            pixmap.fill_rect(fill, &paint, Transform::identity(), None);
        }
    }
}

fn draw_cross(pixmap: &mut Pixmap, area: Area, palette: &IconPalette, alpha: u8) {
    let side = area.w.min(area.h) - 2.0 * GLYPH_PADDING - CROSS_STROKE;
    let cx = area.x + area.w / 2.0;
    let cy = area.y + area.h / 2.0;
    let half = side / 2.0;

    let mut pb = PathBuilder::new();
    pb.move_to(cx - half, cy - half);
    pb.line_to(cx + half, cy + half);
    pb.move_to(cx + half, cy - half);
    pb.line_to(cx - half, cy + half);
    let Some(path) = pb.finish() else {
        return;
    };

    let (r, g, b) = palette.foreground;
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, alpha);
    paint.anti_alias = true;

    let stroke = Stroke {
        width: CROSS_STROKE,
        line_cap: LineCap::Round,
        ..Stroke::default()
    };
    pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
}

fn mul_alpha(value: u8, alpha: u8) -> u8 {
    ((value as u16 * alpha as u16 + 127) / 255) as u8
}

/// Tiny-skia stores premultiplied pixels; tray images want straight alpha.
fn demultiply(pixmap: &Pixmap) -> TrayImage {
    let rgba = pixmap
        .pixels()
        .iter()
        .flat_map(|px| {
            let c = px.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();
    TrayImage::new(rgba, pixmap.width(), pixmap.height())
}
