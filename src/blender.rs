use kurbo::Rect;

use crate::blend::{self, BlendMode, ClipOp, blend_pixel};
use crate::layer::{Layer, LayerPath};
use crate::tiled::{TILE_SIZE, Tile, TileKey, TiledTexture};

// ============================================================================
// TILE BLENDER — per-depth accumulator with clip-group state
// ============================================================================

/// Pixel region of a tile addressed by an optional tile-local scissor.
fn scissor_region(scissor: Option<Rect>) -> (u32, u32, u32, u32) {
    match scissor {
        Some(rect) => {
            let x0 = rect.x0.floor().clamp(0.0, f64::from(TILE_SIZE)) as u32;
            let y0 = rect.y0.floor().clamp(0.0, f64::from(TILE_SIZE)) as u32;
            let x1 = rect.x1.ceil().clamp(0.0, f64::from(TILE_SIZE)) as u32;
            let y1 = rect.y1.ceil().clamp(0.0, f64::from(TILE_SIZE)) as u32;
            (x0, y0, x1, y1)
        }
        None => (0, 0, TILE_SIZE, TILE_SIZE),
    }
}

/// Composites one tile's worth of pixels from a stack of layers into an
/// accumulator.  The accumulator is a ping-pong tile pair so blend-mode
/// operators can read the previous result while writing the next; one
/// instance is reused for every tile at a given recursion depth.
struct TileBlender {
    tiles: [Tile; 2],
    clip_base: Tile,
    clipping: bool,
    current: usize,
    scissor: Option<Rect>,
}

impl TileBlender {
    fn new() -> Self {
        Self {
            tiles: [Tile::new(), Tile::new()],
            clip_base: Tile::new(),
            clipping: false,
            current: 0,
            scissor: None,
        }
    }

    fn current_tile(&self) -> &Tile {
        &self.tiles[self.current]
    }

    fn set_scissor(&mut self, scissor: Option<Rect>) {
        self.scissor = scissor;
    }

    fn clear(&mut self) {
        self.clipping = false;
        let (x0, y0, x1, y1) = scissor_region(self.scissor);
        let tile = &mut self.tiles[self.current];
        for y in y0..y1 {
            for x in x0..x1 {
                tile.put(x, y, blend::TRANSPARENT);
            }
        }
    }

    /// Blend one layer's tile (or `None` when the layer contributes nothing)
    /// into the accumulator.  `next_clipping` is the `clipping_group` flag of
    /// the layer above, which decides where a clip run starts and ends.
    fn blend(&mut self, tile: Option<&Tile>, layer: &Layer, next_clipping: Option<bool>) {
        let opacity = layer.props.opacity.clamp(0.0, 1.0);
        let mode = layer.props.blend_mode;
        let start_clipping = !layer.props.clipping_group && next_clipping == Some(true);
        let end_clipping = layer.props.clipping_group && next_clipping != Some(true);
        let (x0, y0, x1, y1) = scissor_region(self.scissor);

        if start_clipping {
            // Snapshot the accumulator: it becomes the backdrop restored when
            // the clip run above this base layer ends.
            self.clipping = true;
            self.clip_base = self.tiles[self.current].clone();
        }

        let clip_op = if start_clipping {
            ClipOp::StartClip
        } else if self.clipping {
            ClipOp::Clip
        } else {
            ClipOp::None
        };

        match tile {
            Some(tile) if mode != BlendMode::Normal => {
                // Ping-pong: read the previous accumulator, write the next.
                let previous = self.current;
                self.current = 1 - self.current;
                let [a, b] = &mut self.tiles;
                let (prev, cur) = if previous == 0 { (&*a, b) } else { (&*b, a) };
                for y in y0..y1 {
                    for x in x0..x1 {
                        let src = blend::scale(tile.get(x, y), opacity);
                        cur.put(x, y, blend_pixel(mode, src, prev.get(x, y), clip_op));
                    }
                }
            }
            Some(tile) => {
                // Normal blending composites in place.
                let cur = &mut self.tiles[self.current];
                for y in y0..y1 {
                    for x in x0..x1 {
                        let src = blend::scale(tile.get(x, y), opacity);
                        cur.put(x, y, blend_pixel(BlendMode::Normal, src, cur.get(x, y), clip_op));
                    }
                }
            }
            None => {
                if start_clipping {
                    // Invisible clip base: the run above it draws onto nothing.
                    let cur = &mut self.tiles[self.current];
                    for y in y0..y1 {
                        for x in x0..x1 {
                            cur.put(x, y, blend::TRANSPARENT);
                        }
                    }
                }
            }
        }

        if end_clipping {
            self.clipping = false;
            let cur = &mut self.tiles[self.current];
            for y in y0..y1 {
                for x in x0..x1 {
                    let dst = cur.get(x, y);
                    cur.put(x, y, blend::dst_over(self.clip_base.get(x, y), dst));
                }
            }
        }
    }
}

// ============================================================================
// LAYER BLENDER
// ============================================================================

/// Substitutes an in-progress stroke's scratch tiles for one layer's own
/// while compositing, so the live layer stays untouched until commit.
pub struct TileReplacer<'a> {
    pub path: &'a LayerPath,
    pub tiles: &'a TiledTexture,
}

/// Walks the layer tree back-to-front per tile coordinate, blending each
/// layer (or recursively, each group) through the [`TileBlender`] arena.
/// One accumulator pair per recursion depth, lazily grown, never shrunk.
pub struct LayerBlender {
    blenders: Vec<TileBlender>,
}

impl Default for LayerBlender {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerBlender {
    pub fn new() -> Self {
        Self {
            blenders: vec![TileBlender::new()],
        }
    }

    /// The finished tile from the last [`blend_tile`](Self::blend_tile) call.
    pub fn blended_tile(&self) -> &Tile {
        self.blenders[0].current_tile()
    }

    /// Blend the full layer stack for one tile coordinate.  Returns false
    /// when nothing rendered (the output tile is meaningless in that case).
    pub fn blend_tile(
        &mut self,
        layers: &[Layer],
        key: TileKey,
        scissor: Option<Rect>,
        replacer: Option<&TileReplacer<'_>>,
    ) -> bool {
        let mut path = Vec::new();
        self.blend_layers(layers, key, scissor, 0, &mut path, replacer)
    }

    /// Flatten a layer list into a new tiled texture (layer merge).
    pub fn blend_to_tiled_texture(&mut self, layers: &[Layer]) -> TiledTexture {
        let mut key_sets: Vec<Vec<TileKey>> = Vec::new();
        for layer in layers {
            layer.for_each_descendant(&mut |l| {
                if let Some(tiles) = l.tiles() {
                    key_sets.push(tiles.keys().collect());
                }
            });
        }
        let mut out = TiledTexture::new();
        for key in TiledTexture::union_keys(key_sets) {
            if self.blend_tile(layers, key, None, None) {
                out.set(key, self.blended_tile().clone());
            }
        }
        out.shrink();
        out
    }

    fn blend_layers(
        &mut self,
        layers: &[Layer],
        key: TileKey,
        scissor: Option<Rect>,
        depth: usize,
        path: &mut Vec<usize>,
        replacer: Option<&TileReplacer<'_>>,
    ) -> bool {
        while self.blenders.len() <= depth {
            self.blenders.push(TileBlender::new());
        }
        self.blenders[depth].set_scissor(scissor);
        self.blenders[depth].clear();

        let mut rendered = false;
        // Bottom of the stack is the end of the list; the "next" layer is the
        // one visually above, whose clipping flag delimits clip runs.
        for i in (0..layers.len()).rev() {
            let layer = &layers[i];
            let next_clipping = if i > 0 {
                Some(layers[i - 1].props.clipping_group)
            } else {
                None
            };
            path.push(i);
            let child_rendered =
                self.blend_layer(layer, next_clipping, key, scissor, depth, path, replacer);
            path.pop();
            rendered |= child_rendered;
        }
        rendered
    }

    fn blend_layer(
        &mut self,
        layer: &Layer,
        next_clipping: Option<bool>,
        key: TileKey,
        scissor: Option<Rect>,
        depth: usize,
        path: &mut Vec<usize>,
        replacer: Option<&TileReplacer<'_>>,
    ) -> bool {
        // Resolve the layer's contribution first; group layers recurse into
        // the next accumulator depth.
        let mut group_rendered = false;
        if layer.props.visible
            && let Some(children) = layer.children()
        {
            group_rendered = self.blend_layers(children, key, scissor, depth + 1, path, replacer);
        }

        let replaced = replacer.filter(|r| r.path.0 == *path);
        let (head, tail) = self.blenders.split_at_mut(depth + 1);
        let blender = &mut head[depth];

        let tile: Option<&Tile> = if !layer.props.visible {
            // Invisible layers contribute nothing but still advance the
            // clip-group state.
            None
        } else if let Some(r) = replaced {
            r.tiles.get(key).or_else(|| layer.tiles().and_then(|t| t.get(key)))
        } else if layer.is_group() {
            group_rendered.then(|| tail[0].current_tile())
        } else {
            layer.tiles().and_then(|t| t.get(key))
        };

        let rendered = tile.is_some();
        blender.blend(tile, layer, next_clipping);
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::Px;
    use crate::layer::LayerContent;

    fn solid_layer(name: &str, color: Px) -> Layer {
        let mut layer = Layer::new_image(name);
        let mut tile = Tile::new();
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                tile.put(x, y, color);
            }
        }
        layer.tiles_mut().unwrap().set((0, 0), tile);
        layer
    }

    fn close(a: Px, b: Px) {
        for i in 0..4 {
            assert!((a[i] - b[i]).abs() < 2e-3, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn multiply_over_opaque_bottom_is_componentwise_product() {
        let c1 = [0.8, 0.4, 0.2, 1.0];
        let c2 = [0.5, 0.5, 1.0, 1.0];
        let mut top = solid_layer("top", c2);
        top.props.blend_mode = BlendMode::Multiply;
        let layers = vec![top, solid_layer("bottom", c1)];

        let mut blender = LayerBlender::new();
        assert!(blender.blend_tile(&layers, (0, 0), None, None));
        close(
            blender.blended_tile().get(128, 128),
            [0.4, 0.2, 0.2, 1.0],
        );
    }

    #[test]
    fn empty_stack_renders_nothing() {
        let mut blender = LayerBlender::new();
        let layers = vec![Layer::new_image("empty")];
        assert!(!blender.blend_tile(&layers, (0, 0), None, None));
    }

    #[test]
    fn clipped_layer_is_confined_to_the_base_alpha_footprint() {
        // Base covers only the left half of the tile; the clipping layer
        // above covers everything.
        let mut base = Layer::new_image("base");
        let mut tile = Tile::new();
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE / 2 {
                tile.put(x, y, [0.0, 0.0, 1.0, 1.0]);
            }
        }
        base.tiles_mut().unwrap().set((0, 0), tile);

        let mut clipped = solid_layer("clipped", [1.0, 0.0, 0.0, 1.0]);
        clipped.props.clipping_group = true;

        let layers = vec![clipped, base];
        let mut blender = LayerBlender::new();
        assert!(blender.blend_tile(&layers, (0, 0), None, None));
        let out = blender.blended_tile();
        close(out.get(10, 10), [1.0, 0.0, 0.0, 1.0]);
        close(out.get(200, 10), blend::TRANSPARENT);
    }

    #[test]
    fn backdrop_is_restored_after_a_clip_run() {
        let backdrop = solid_layer("backdrop", [0.0, 1.0, 0.0, 1.0]);
        let mut base = Layer::new_image("base");
        let mut tile = Tile::new();
        tile.put(0, 0, [0.0, 0.0, 1.0, 1.0]);
        base.tiles_mut().unwrap().set((0, 0), tile);
        let mut clipped = solid_layer("clipped", [1.0, 0.0, 0.0, 1.0]);
        clipped.props.clipping_group = true;

        let layers = vec![clipped, base, backdrop];
        let mut blender = LayerBlender::new();
        blender.blend_tile(&layers, (0, 0), None, None);
        let out = blender.blended_tile();
        // Inside the base footprint: the clipped red; outside: the backdrop.
        close(out.get(0, 0), [1.0, 0.0, 0.0, 1.0]);
        close(out.get(100, 100), [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn invisible_clip_base_hides_the_whole_run() {
        let backdrop = solid_layer("backdrop", [0.0, 1.0, 0.0, 1.0]);
        let mut base = solid_layer("base", [0.0, 0.0, 1.0, 1.0]);
        base.props.visible = false;
        let mut clipped = solid_layer("clipped", [1.0, 0.0, 0.0, 1.0]);
        clipped.props.clipping_group = true;

        let layers = vec![clipped, base, backdrop];
        let mut blender = LayerBlender::new();
        blender.blend_tile(&layers, (0, 0), None, None);
        close(blender.blended_tile().get(50, 50), [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn group_opacity_applies_to_the_flattened_group() {
        let inner = solid_layer("inner", [1.0, 0.0, 0.0, 1.0]);
        let mut group = Layer::new_group("group", vec![inner]);
        group.props.opacity = 0.5;
        let layers = vec![group, solid_layer("bottom", [1.0, 1.0, 1.0, 1.0])];

        let mut blender = LayerBlender::new();
        blender.blend_tile(&layers, (0, 0), None, None);
        close(blender.blended_tile().get(0, 0), [1.0, 0.5, 0.5, 1.0]);
    }

    #[test]
    fn merge_flattens_to_a_tiled_texture() {
        let top = solid_layer("top", [1.0, 0.0, 0.0, 0.5]);
        let bottom = solid_layer("bottom", [0.0, 0.0, 1.0, 1.0]);
        let mut blender = LayerBlender::new();
        let merged = blender.blend_to_tiled_texture(&[top, bottom]);
        assert!(merged.has((0, 0)));
        close(merged.get_pixel(5, 5), [1.0, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn replacer_substitutes_scratch_tiles_for_one_layer() {
        let layers = vec![solid_layer("painting", [0.0, 0.0, 1.0, 1.0])];
        let mut scratch = TiledTexture::new();
        let mut tile = Tile::new();
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                tile.put(x, y, [1.0, 0.0, 0.0, 1.0]);
            }
        }
        scratch.set((0, 0), tile);

        let path = LayerPath::new(vec![0]);
        let replacer = TileReplacer {
            path: &path,
            tiles: &scratch,
        };
        let mut blender = LayerBlender::new();
        blender.blend_tile(&layers, (0, 0), None, Some(&replacer));
        close(blender.blended_tile().get(7, 7), [1.0, 0.0, 0.0, 1.0]);

        // Keys the scratch doesn't cover fall back to the layer's own tiles.
        match &layers[0].content {
            LayerContent::Image { tiles } => assert!(tiles.has((0, 0))),
            LayerContent::Group { .. } => unreachable!(),
        }
    }
}
