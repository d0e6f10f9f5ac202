use kurbo::{Point, Rect};

use crate::blend::{self, Px};
use crate::blender::TileReplacer;
use crate::layer::LayerPath;
use crate::picture::{Picture, Selection};
use crate::tiled::{TILE_SIZE, TileKey, TiledTexture};
use crate::undo::{ChangeLayerImageCommand, UndoStack};

use super::waypoint::Waypoint;
use super::{BrushEngine, BrushPreset};

// ============================================================================
// DAB RENDERER
// ============================================================================

/// GLSL-style smoothstep; `edge0 > edge1` flips the ramp.
fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Soft-disc coverage at distance `r` from the dab center.
fn disc_coverage(radius: f64, softness: f64, r: f64) -> f64 {
    smoothstep(radius, radius - (radius * softness).max(1.0), r)
}

struct StrokeState {
    path: LayerPath,
    /// Working copy of every touched tile; the live layer is untouched
    /// until commit.
    scratch: TiledTexture,
    edited_rect: Option<Rect>,
}

/// Renders batches of dab centers into a per-stroke scratch texture and
/// turns the finished stroke into one undo command.
///
/// Lifecycle: idle, `start`, any number of `next_waypoints`, then either
/// `end_stroke` (commit) or `cancel` (discard).  Starting on a different
/// layer while active commits the in-flight stroke first.
pub struct DabRenderer {
    preset: BrushPreset,
    stroke: Option<StrokeState>,
}

impl DabRenderer {
    pub fn new(preset: BrushPreset) -> Self {
        Self {
            preset,
            stroke: None,
        }
    }

    pub fn preset(&self) -> &BrushPreset {
        &self.preset
    }

    pub fn preset_mut(&mut self) -> &mut BrushPreset {
        &mut self.preset
    }

    pub fn is_active(&self) -> bool {
        self.stroke.is_some()
    }

    /// Substitute the scratch tiles for the target layer's while previewing.
    pub fn tile_replacer(&self) -> Option<TileReplacer<'_>> {
        self.stroke.as_ref().map(|s| TileReplacer {
            path: &s.path,
            tiles: &s.scratch,
        })
    }

    pub fn start(&mut self, picture: &mut Picture, undo: &mut UndoStack, path: LayerPath) {
        match &self.stroke {
            Some(stroke) if stroke.path == path => {}
            Some(_) => {
                // Active on another layer: commit before switching.
                self.end_stroke(picture, undo);
                self.begin(path);
            }
            None => self.begin(path),
        }
    }

    fn begin(&mut self, path: LayerPath) {
        self.stroke = Some(StrokeState {
            path,
            scratch: TiledTexture::new(),
            edited_rect: None,
        });
    }

    /// Render one batch of resampled dab centers into the scratch tiles.
    pub fn next_waypoints(&mut self, picture: &mut Picture, waypoints: &[Waypoint]) {
        let Some(stroke) = &mut self.stroke else {
            return;
        };
        let Some(rect) = rect_for_waypoints(self.preset.width, waypoints) else {
            return;
        };
        let Some(layer) = crate::layer::layer_for_path(&picture.layers, &stroke.path) else {
            tracing::warn!(path = ?stroke.path, "stroke against a stale layer path");
            return;
        };
        let Some(layer_tiles) = layer.tiles() else {
            tracing::warn!(path = ?stroke.path, "stroke against a group layer");
            return;
        };
        let preserve_opacity = layer.props.preserve_opacity;

        match self.preset.engine {
            BrushEngine::Pen { eraser } => render_pen(
                &self.preset,
                eraser,
                preserve_opacity,
                &mut stroke.scratch,
                layer_tiles,
                &picture.selection,
                waypoints,
            ),
            BrushEngine::Watercolor {
                blending,
                thickness,
            } => render_watercolor(
                &self.preset,
                blending,
                thickness,
                &mut stroke.scratch,
                layer_tiles,
                &picture.selection,
                waypoints,
            ),
        }

        stroke.edited_rect = Some(match stroke.edited_rect {
            Some(existing) => existing.union(rect),
            None => rect,
        });
        picture.mark_dirty(Some(rect));
    }

    /// Commit the stroke as one undo command.  Returns the edited canvas
    /// rectangle, or `None` when no dab was ever rendered.
    pub fn end_stroke(&mut self, picture: &mut Picture, undo: &mut UndoStack) -> Option<Rect> {
        let stroke = self.stroke.take()?;
        let rect = stroke.edited_rect?;
        let command = ChangeLayerImageCommand::new(
            self.preset.title.clone(),
            stroke.path,
            rect,
            &stroke.scratch,
        );
        undo.push(picture, Box::new(command));
        Some(rect)
    }

    /// Abandon the stroke: the scratch tiles are dropped, no undo command
    /// is recorded, and the previewed region is repainted from the layer.
    pub fn cancel(&mut self, picture: &mut Picture) {
        if let Some(stroke) = self.stroke.take() {
            if let Some(rect) = stroke.edited_rect {
                picture.mark_dirty(Some(rect));
            }
        }
    }
}

/// Integer bounding box of the dab quads: each dab covers a square of side
/// `width + 2` centered on the waypoint.
fn rect_for_waypoints(width: f64, waypoints: &[Waypoint]) -> Option<Rect> {
    let half = (width + 2.0) * 0.5;
    let mut rect: Option<Rect> = None;
    for wp in waypoints {
        let r = Rect::new(
            wp.pos.x - half,
            wp.pos.y - half,
            wp.pos.x + half,
            wp.pos.y + half,
        );
        rect = Some(match rect {
            Some(existing) => existing.union(r),
            None => r,
        });
    }
    rect.map(|r| r.expand())
}

/// On first touch, seed the scratch tile from the layer so dabs accumulate
/// onto a consistent working copy.
fn prepare_tile<'a>(
    scratch: &'a mut TiledTexture,
    layer_tiles: &TiledTexture,
    key: TileKey,
) -> &'a mut crate::tiled::Tile {
    if !scratch.has(key) {
        if let Some(tile) = layer_tiles.get(key) {
            scratch.set(key, tile.clone());
        }
    }
    scratch.ensure(key)
}

// ============================================================================
// DIRECT (PEN / ERASER) MODEL
// ============================================================================

fn render_pen(
    preset: &BrushPreset,
    eraser: bool,
    preserve_opacity: bool,
    scratch: &mut TiledTexture,
    layer_tiles: &TiledTexture,
    selection: &Selection,
    waypoints: &[Waypoint],
) {
    for wp in waypoints {
        let brush_size = preset.brush_size(wp);
        if brush_size <= 0.0 {
            continue;
        }
        let radius = brush_size * 0.5;
        let spacing = preset.brush_spacing(wp);
        // Overlap-corrected per-dab opacity: repeated dabs along the stroke
        // converge to the configured opacity instead of over-darkening.
        let dab_alpha =
            1.0 - (1.0 - f64::from(preset.opacity).min(0.998)).powf(spacing / brush_size);

        let Some(rect) = rect_for_waypoints(preset.width, std::slice::from_ref(wp)) else {
            continue;
        };
        for key in TiledTexture::keys_for_rect(rect) {
            let ox = i64::from(key.0) * i64::from(TILE_SIZE);
            let oy = i64::from(key.1) * i64::from(TILE_SIZE);
            let tile = prepare_tile(scratch, layer_tiles, key);
            for ty in 0..TILE_SIZE {
                for tx in 0..TILE_SIZE {
                    let cx = ox + i64::from(tx);
                    let cy = oy + i64::from(ty);
                    if (cx as f64) < rect.x0
                        || (cx as f64) >= rect.x1
                        || (cy as f64) < rect.y0
                        || (cy as f64) >= rect.y1
                    {
                        continue;
                    }
                    let center = Point::new(cx as f64 + 0.5, cy as f64 + 0.5);
                    let coverage =
                        disc_coverage(radius, preset.softness, (center - wp.pos).length());
                    if coverage <= 0.0 {
                        continue;
                    }
                    let alpha = (coverage * dab_alpha) as f32
                        * selection.coverage(cx as i32, cy as i32);
                    if alpha <= 0.0 {
                        continue;
                    }
                    let src = blend::scale(preset.color, alpha);
                    let dst = tile.get(tx, ty);
                    let out = if eraser {
                        blend::dst_out(src, dst)
                    } else if preserve_opacity {
                        blend::src_atop(src, dst)
                    } else {
                        blend::src_over(src, dst)
                    };
                    tile.put(tx, ty, out);
                }
            }
        }
    }
}

// ============================================================================
// WET-MIX (WATERCOLOR) MODEL
// ============================================================================

/// Current stroke-local content: scratch if the tile was touched, the live
/// layer otherwise.
fn current_pixel(scratch: &TiledTexture, layer_tiles: &TiledTexture, x: i64, y: i64) -> Px {
    let key = (
        x.div_euclid(i64::from(TILE_SIZE)) as i32,
        y.div_euclid(i64::from(TILE_SIZE)) as i32,
    );
    if scratch.has(key) {
        scratch.get_pixel(x as i32, y as i32)
    } else {
        layer_tiles.get_pixel(x as i32, y as i32)
    }
}

fn render_watercolor(
    preset: &BrushPreset,
    blending: f32,
    thickness: f32,
    scratch: &mut TiledTexture,
    layer_tiles: &TiledTexture,
    selection: &Selection,
    waypoints: &[Waypoint],
) {
    // Power-of-two square comfortably covering one dab.
    let sample_size = 2i64.pow((preset.width + 2.0).log2().ceil().max(0.0) as u32);

    for wp in waypoints {
        let radius = preset.brush_size(wp) * 0.5;
        if radius <= 0.0 {
            continue;
        }
        let left = wp.pos.x.floor() as i64 - sample_size / 2;
        let top = wp.pos.y.floor() as i64 - sample_size / 2;

        // Area-average the dab shape and the shape-clipped color over the
        // sample square; their ratio is the color the dab is passing over.
        // Dabs are sequential: each one reads the previous dabs' output.
        let mut shape_sum = 0.0f64;
        let mut color_sum = [0.0f64; 4];
        for y in top..top + sample_size {
            for x in left..left + sample_size {
                let center = Point::new(x as f64 + 0.5, y as f64 + 0.5);
                let coverage = disc_coverage(radius, preset.softness, (center - wp.pos).length());
                if coverage <= 0.0 {
                    continue;
                }
                shape_sum += coverage;
                let px = current_pixel(scratch, layer_tiles, x, y);
                for c in 0..4 {
                    color_sum[c] += f64::from(px[c]) * coverage;
                }
            }
        }
        let mix_color: Px = if shape_sum > 1e-6 {
            [
                (color_sum[0] / shape_sum) as f32,
                (color_sum[1] / shape_sum) as f32,
                (color_sum[2] / shape_sum) as f32,
                (color_sum[3] / shape_sum) as f32,
            ]
        } else {
            blend::TRANSPARENT
        };

        let base_opacity = preset.opacity * wp.pressure as f32;
        let Some(rect) = rect_for_waypoints(preset.width, std::slice::from_ref(wp)) else {
            continue;
        };
        for key in TiledTexture::keys_for_rect(rect) {
            let ox = i64::from(key.0) * i64::from(TILE_SIZE);
            let oy = i64::from(key.1) * i64::from(TILE_SIZE);
            let tile = prepare_tile(scratch, layer_tiles, key);
            for ty in 0..TILE_SIZE {
                for tx in 0..TILE_SIZE {
                    let cx = ox + i64::from(tx);
                    let cy = oy + i64::from(ty);
                    if (cx as f64) < rect.x0
                        || (cx as f64) >= rect.x1
                        || (cy as f64) < rect.y0
                        || (cy as f64) >= rect.y1
                    {
                        continue;
                    }
                    let center = Point::new(cx as f64 + 0.5, cy as f64 + 0.5);
                    let coverage =
                        disc_coverage(radius, preset.softness, (center - wp.pos).length());
                    if coverage <= 0.0 {
                        continue;
                    }
                    let opacity = coverage as f32
                        * base_opacity
                        * selection.coverage(cx as i32, cy as i32);
                    if opacity <= 0.0 {
                        continue;
                    }
                    let orig = tile.get(tx, ty);
                    // Pull the underlying color toward the local average,
                    // then deposit pigment on top.
                    let mix_rate = opacity * blending;
                    let mixed = blend::add(
                        blend::scale(orig, 1.0 - mix_rate),
                        blend::scale(mix_color, mix_rate),
                    );
                    let add_color = blend::scale(preset.color, thickness * opacity);
                    let out = blend::add(add_color, blend::scale(mixed, 1.0 - add_color[3]));
                    tile.put(tx, ty, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;

    fn pen_renderer() -> DabRenderer {
        let mut preset = BrushPreset::pen();
        preset.color = [1.0, 0.0, 0.0, 1.0];
        DabRenderer::new(preset)
    }

    fn dab_at(x: f64, y: f64) -> Waypoint {
        Waypoint::new(Point::new(x, y), 1.0)
    }

    #[test]
    fn stroke_only_touches_the_scratch_until_commit() {
        let mut picture = Picture::new(256, 256);
        let mut undo = UndoStack::new();
        let mut renderer = pen_renderer();
        let path = LayerPath::new(vec![0]);
        renderer.start(&mut picture, &mut undo, path.clone());
        renderer.next_waypoints(&mut picture, &[dab_at(100.0, 100.0)]);

        assert_eq!(picture.layers[0].tiles().unwrap().tile_count(), 0);
        // A lone dab deposits the overlap-corrected fraction, not full alpha.
        let replacer = renderer.tile_replacer().unwrap();
        assert!(replacer.tiles.get_pixel(100, 100)[3] > 0.4);

        renderer.end_stroke(&mut picture, &mut undo);
        assert!(picture.layers[0].tiles().unwrap().get_pixel(100, 100)[3] > 0.4);
        assert!(undo.is_undoable());
    }

    #[test]
    fn cancel_discards_the_stroke() {
        let mut picture = Picture::new(256, 256);
        let mut undo = UndoStack::new();
        let mut renderer = pen_renderer();
        renderer.start(&mut picture, &mut undo, LayerPath::new(vec![0]));
        renderer.next_waypoints(&mut picture, &[dab_at(50.0, 50.0)]);
        renderer.cancel(&mut picture);
        assert!(!renderer.is_active());
        assert!(!undo.is_undoable());
        assert_eq!(picture.layers[0].tiles().unwrap().tile_count(), 0);
    }

    #[test]
    fn starting_on_another_layer_commits_first() {
        let mut picture = Picture::new(256, 256);
        picture.layers.push(Layer::new_image("second"));
        let mut undo = UndoStack::new();
        let mut renderer = pen_renderer();
        renderer.start(&mut picture, &mut undo, LayerPath::new(vec![0]));
        renderer.next_waypoints(&mut picture, &[dab_at(30.0, 30.0)]);
        renderer.start(&mut picture, &mut undo, LayerPath::new(vec![1]));
        assert!(undo.is_undoable());
        assert!(picture.layers[0].tiles().unwrap().get_pixel(30, 30)[3] > 0.4);
    }

    #[test]
    fn eraser_removes_existing_alpha() {
        let mut picture = Picture::new(256, 256);
        picture.layers[0]
            .tiles_mut()
            .unwrap()
            .fill(
                [0.0, 0.0, 1.0, 1.0],
                Rect::new(0.0, 0.0, 256.0, 256.0),
                None,
                crate::tiled::DrawBlend::Src,
            );
        let mut undo = UndoStack::new();
        let mut preset = BrushPreset::pen();
        preset.engine = BrushEngine::Pen { eraser: true };
        let mut renderer = DabRenderer::new(preset);
        renderer.start(&mut picture, &mut undo, LayerPath::new(vec![0]));
        for i in 0..20 {
            renderer.next_waypoints(&mut picture, &[dab_at(128.0, 128.0 + i as f64 * 0.1)]);
        }
        renderer.end_stroke(&mut picture, &mut undo);
        let tiles = picture.layers[0].tiles().unwrap();
        assert!(tiles.get_pixel(128, 128)[3] < 0.2);
        assert_eq!(tiles.get_pixel(10, 10)[3], 1.0);
    }

    #[test]
    fn preserve_opacity_leaves_transparent_pixels_untouched() {
        let mut picture = Picture::new(256, 256);
        picture.layers[0].props.preserve_opacity = true;
        picture.layers[0]
            .tiles_mut()
            .unwrap()
            .put_pixel(100, 100, [0.0, 0.0, 1.0, 1.0]);
        let mut undo = UndoStack::new();
        let mut renderer = pen_renderer();
        renderer.start(&mut picture, &mut undo, LayerPath::new(vec![0]));
        renderer.next_waypoints(&mut picture, &[dab_at(100.5, 100.5)]);
        renderer.end_stroke(&mut picture, &mut undo);
        let tiles = picture.layers[0].tiles().unwrap();
        // Painted pixel keeps full alpha, neighbors with zero alpha stay empty.
        assert_eq!(tiles.get_pixel(100, 100)[3], 1.0);
        assert_eq!(tiles.get_pixel(97, 100)[3], 0.0);
    }

    #[test]
    fn selection_masks_the_dab() {
        let mut picture = Picture::new(256, 256);
        let mut mask = image::GrayImage::new(256, 256);
        mask.put_pixel(100, 100, image::Luma([255]));
        picture.selection.set_mask(Some(mask));
        let mut undo = UndoStack::new();
        let mut renderer = pen_renderer();
        renderer.start(&mut picture, &mut undo, LayerPath::new(vec![0]));
        renderer.next_waypoints(&mut picture, &[dab_at(100.5, 100.5)]);
        renderer.end_stroke(&mut picture, &mut undo);
        let tiles = picture.layers[0].tiles().unwrap();
        assert!(tiles.get_pixel(100, 100)[3] > 0.0);
        assert_eq!(tiles.get_pixel(99, 100)[3], 0.0);
    }

    #[test]
    fn watercolor_mixes_underlying_color_into_the_stroke() {
        let mut picture = Picture::new(256, 256);
        picture.layers[0].tiles_mut().unwrap().fill(
            [0.0, 0.0, 1.0, 1.0],
            Rect::new(0.0, 0.0, 256.0, 256.0),
            None,
            crate::tiled::DrawBlend::Src,
        );
        let mut undo = UndoStack::new();
        let mut preset = BrushPreset::watercolor();
        preset.color = [1.0, 0.0, 0.0, 1.0];
        let mut renderer = DabRenderer::new(preset);
        renderer.start(&mut picture, &mut undo, LayerPath::new(vec![0]));
        renderer.next_waypoints(&mut picture, &[dab_at(128.0, 128.0)]);
        renderer.end_stroke(&mut picture, &mut undo);
        let px = picture.layers[0].tiles().unwrap().get_pixel(128, 128);
        // Red pigment deposited, but the blue underlayer still shows through.
        assert!(px[0] > 0.1);
        assert!(px[2] > 0.1);
    }
}
