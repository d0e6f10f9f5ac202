use image::{GrayImage, Rgba, RgbaImage};
use kurbo::Rect;

use crate::blender::{LayerBlender, TileReplacer};
use crate::layer::{self, Layer, LayerPath};
use crate::tiled::{TILE_SIZE, TiledTexture};

// ============================================================================
// DIRTINESS — the region known to need recompositing
// ============================================================================

/// Whole-canvas or bounding-rectangle dirty state.  Producers union rects in;
/// the single consumer (`PictureBlender::render_now`) drains it.
#[derive(Clone, Debug, Default)]
pub struct Dirtiness {
    whole: bool,
    rect: Option<Rect>,
}

impl Dirtiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.whole || self.rect.is_some()
    }

    pub fn whole(&self) -> bool {
        self.whole
    }

    /// The dirty bounding rectangle, or `None` when whole-canvas (or clean).
    pub fn rect(&self) -> Option<Rect> {
        if self.whole { None } else { self.rect }
    }

    pub fn add_whole(&mut self) {
        self.whole = true;
        self.rect = None;
    }

    pub fn add_rect(&mut self, rect: Rect) {
        if self.whole {
            return;
        }
        self.rect = Some(match self.rect {
            Some(existing) => existing.union(rect),
            None => rect,
        });
    }

    pub fn clear(&mut self) {
        self.whole = false;
        self.rect = None;
    }
}

// ============================================================================
// SELECTION — 8-bit coverage mask consulted by brushes and fills
// ============================================================================

#[derive(Clone, Default)]
pub struct Selection {
    mask: Option<GrayImage>,
}

impl Selection {
    pub fn has_selection(&self) -> bool {
        self.mask.is_some()
    }

    pub fn mask(&self) -> Option<&GrayImage> {
        self.mask.as_ref()
    }

    /// Replace the mask (None deselects everything).
    pub fn set_mask(&mut self, mask: Option<GrayImage>) {
        self.mask = mask;
    }

    /// Coverage in [0, 1] at a canvas pixel.  With no selection, everything
    /// is selected.
    pub fn coverage(&self, x: i32, y: i32) -> f32 {
        match &self.mask {
            None => 1.0,
            Some(mask) => {
                if x < 0 || y < 0 || x as u32 >= mask.width() || y as u32 >= mask.height() {
                    0.0
                } else {
                    f32::from(mask.get_pixel(x as u32, y as u32).0[0]) / 255.0
                }
            }
        }
    }
}

// ============================================================================
// PICTURE — the canvas: size, layer tree, selection, dirty state
// ============================================================================

/// Canvas dimensions above ~256 megapixels are rejected at construction.
const MAX_PICTURE_PIXELS: u64 = 256_000_000;

pub struct Picture {
    width: u32,
    height: u32,
    pub layers: Vec<Layer>,
    pub selection: Selection,
    pub dirtiness: Dirtiness,
}

impl Picture {
    /// A new picture with one empty image layer.  Out-of-range dimensions
    /// are clamped to 1×1 with a warning, matching the tile store's policy
    /// of never treating malformed sizes as fatal.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = {
            let total = u64::from(width) * u64::from(height);
            if total > MAX_PICTURE_PIXELS || width == 0 || height == 0 {
                tracing::warn!(width, height, "picture dimensions out of range, clamped to 1x1");
                (1, 1)
            } else {
                (width, height)
            }
        };
        let mut picture = Self {
            width,
            height,
            layers: vec![Layer::new_image("Layer")],
            selection: Selection::default(),
            dirtiness: Dirtiness::new(),
        };
        picture.dirtiness.add_whole();
        picture
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rect(&self) -> Rect {
        Rect::new(0.0, 0.0, f64::from(self.width), f64::from(self.height))
    }

    /// Mark a region as needing recompositing; `None` means whole-canvas.
    pub fn mark_dirty(&mut self, rect: Option<Rect>) {
        match rect {
            Some(rect) => self.dirtiness.add_rect(rect),
            None => self.dirtiness.add_whole(),
        }
    }

    pub fn layer_for_path(&self, path: &LayerPath) -> Option<&Layer> {
        layer::layer_for_path(&self.layers, path)
    }

    pub fn layer_for_path_mut(&mut self, path: &LayerPath) -> Option<&mut Layer> {
        layer::layer_for_path_mut(&mut self.layers, path)
    }

    /// Structural splice; always dirties the whole canvas.
    pub fn splice_layers(
        &mut self,
        path: &LayerPath,
        remove_count: usize,
        insert: Vec<Layer>,
    ) -> Vec<Layer> {
        let removed = layer::splice_layers(&mut self.layers, path, remove_count, insert);
        self.dirtiness.add_whole();
        removed
    }

    /// Replace an image layer's tiles wholesale (transform/resize/import).
    /// Returns the old tiles; dirties the whole canvas.  `None` if the path
    /// is stale or names a group.
    pub fn replace_layer_tiles(
        &mut self,
        path: &LayerPath,
        tiles: TiledTexture,
    ) -> Option<TiledTexture> {
        let layer = self.layer_for_path_mut(path)?;
        let slot = layer.tiles_mut()?;
        let old = std::mem::replace(slot, tiles);
        self.dirtiness.add_whole();
        Some(old)
    }

    /// Flatten the visible layer stack to a straight-alpha 8-bit image
    /// (thumbnails, exports).
    pub fn flatten(&self) -> RgbaImage {
        let mut blender = LayerBlender::new();
        let mut out = RgbaImage::new(self.width, self.height);
        for key in TiledTexture::keys_for_rect(self.rect()) {
            if !blender.blend_tile(&self.layers, key, None, None) {
                continue;
            }
            let tile = blender.blended_tile();
            let ox = i64::from(key.0) * i64::from(TILE_SIZE);
            let oy = i64::from(key.1) * i64::from(TILE_SIZE);
            for ty in 0..TILE_SIZE {
                for tx in 0..TILE_SIZE {
                    let cx = ox + i64::from(tx);
                    let cy = oy + i64::from(ty);
                    if cx < 0 || cy < 0 || cx >= i64::from(self.width) || cy >= i64::from(self.height)
                    {
                        continue;
                    }
                    let p = tile.get(tx, ty);
                    let a = p[3].clamp(0.0, 1.0);
                    let un = |c: f32| {
                        if a < 1e-4 {
                            0
                        } else {
                            ((c / a).clamp(0.0, 1.0) * 255.0).round() as u8
                        }
                    };
                    out.put_pixel(
                        cx as u32,
                        cy as u32,
                        Rgba([un(p[0]), un(p[1]), un(p[2]), (a * 255.0).round() as u8]),
                    );
                }
            }
        }
        out
    }
}

// ============================================================================
// PICTURE BLENDER — owns the display surface, drains the dirty region
// ============================================================================

/// Composites dirty tiles into a display surface on demand.  `render_now`
/// is pull-based and idempotent: with no new writes it is a no-op after the
/// first call.
pub struct PictureBlender {
    surface: RgbaImage,
    blender: LayerBlender,
}

impl PictureBlender {
    pub fn new(picture: &Picture) -> Self {
        Self {
            surface: white_surface(picture.width(), picture.height()),
            blender: LayerBlender::new(),
        }
    }

    /// The finished composited surface (opaque, white background).
    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    /// Reallocate the surface after a canvas resize.
    pub fn resize_to(&mut self, picture: &mut Picture) {
        self.surface = white_surface(picture.width(), picture.height());
        picture.dirtiness.add_whole();
    }

    /// Recomposite the tiles intersecting the dirty region and clear it.
    pub fn render_now(&mut self, picture: &mut Picture, replacer: Option<&TileReplacer<'_>>) {
        if !picture.dirtiness.is_dirty() {
            return;
        }
        let canvas = picture.rect();
        let scope = match picture.dirtiness.rect() {
            Some(rect) => rect.intersect(canvas),
            None => canvas,
        };
        if scope.width() <= 0.0 || scope.height() <= 0.0 {
            picture.dirtiness.clear();
            return;
        }
        let scope = scope.expand();
        let partial = picture.dirtiness.rect().is_some();

        let keys = TiledTexture::keys_for_rect(scope);
        tracing::debug!(tiles = keys.len(), ?scope, partial, "recomposite");

        for key in keys {
            let ox = f64::from(key.0) * f64::from(TILE_SIZE);
            let oy = f64::from(key.1) * f64::from(TILE_SIZE);
            let tile_scissor = if partial {
                Some(Rect::new(
                    scope.x0 - ox,
                    scope.y0 - oy,
                    scope.x1 - ox,
                    scope.y1 - oy,
                ))
            } else {
                None
            };
            let rendered = self
                .blender
                .blend_tile(&picture.layers, key, tile_scissor, replacer);
            let tile = self.blender.blended_tile();

            // Write the tile's scoped pixels onto the white surface.
            let x0 = (scope.x0 - ox).max(0.0) as u32;
            let y0 = (scope.y0 - oy).max(0.0) as u32;
            let x1 = (scope.x1 - ox).min(f64::from(TILE_SIZE)) as u32;
            let y1 = (scope.y1 - oy).min(f64::from(TILE_SIZE)) as u32;
            for ty in y0..y1 {
                for tx in x0..x1 {
                    let cx = ox + f64::from(tx);
                    let cy = oy + f64::from(ty);
                    if cx < 0.0
                        || cy < 0.0
                        || cx >= f64::from(picture.width())
                        || cy >= f64::from(picture.height())
                    {
                        continue;
                    }
                    let out = if rendered {
                        let p = tile.get(tx, ty);
                        let a = p[3].clamp(0.0, 1.0);
                        // src-over onto the white background.
                        [
                            p[0].clamp(0.0, 1.0) + (1.0 - a),
                            p[1].clamp(0.0, 1.0) + (1.0 - a),
                            p[2].clamp(0.0, 1.0) + (1.0 - a),
                        ]
                    } else {
                        [1.0, 1.0, 1.0]
                    };
                    self.surface.put_pixel(
                        cx as u32,
                        cy as u32,
                        Rgba([
                            (out[0].clamp(0.0, 1.0) * 255.0).round() as u8,
                            (out[1].clamp(0.0, 1.0) * 255.0).round() as u8,
                            (out[2].clamp(0.0, 1.0) * 255.0).round() as u8,
                            255,
                        ]),
                    );
                }
            }
        }
        picture.dirtiness.clear();
    }
}

fn white_surface(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]))
}
