use image::GrayImage;
use kurbo::{Affine, Rect};

use crate::blend::Px;
use crate::blender::LayerBlender;
use crate::layer::{Layer, LayerPath, LayerProps};
use crate::picture::Picture;
use crate::tiled::{DrawBlend, TILE_SIZE, Tile, TileKey, TiledTexture};

// ============================================================================
// COMMAND TRAIT + UNDO STACK
// ============================================================================

/// A reversible edit to a [`Picture`].  `redo` is also the initial apply:
/// [`UndoStack::push`] executes the command once when it is recorded.
pub trait Command {
    fn redo(&mut self, picture: &mut Picture);
    fn undo(&mut self, picture: &mut Picture);
    fn title(&self) -> &str;
    /// Rough retained byte count, used for history trimming.
    fn memory_size(&self) -> usize {
        0
    }
}

const TILE_BYTES: usize = (TILE_SIZE as usize) * (TILE_SIZE as usize) * 4 * 2;

fn tiled_texture_bytes(tiles: &TiledTexture) -> usize {
    tiles.tile_count() * TILE_BYTES
}

fn layer_bytes(layer: &Layer) -> usize {
    let mut total = 0;
    layer.for_each_descendant(&mut |l| {
        if let Some(tiles) = l.tiles() {
            total += tiled_texture_bytes(tiles);
        }
    });
    total
}

/// Linear history with a cursor.  Everything before `done_count` is applied;
/// pushing while undone truncates the redo tail.
pub struct UndoStack {
    commands: Vec<Box<dyn Command>>,
    done_count: usize,
    /// Oldest entries are dropped once retained bytes exceed this.
    memory_budget: Option<usize>,
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoStack {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            done_count: 0,
            memory_budget: None,
        }
    }

    pub fn with_memory_budget(budget: usize) -> Self {
        Self {
            memory_budget: Some(budget),
            ..Self::new()
        }
    }

    pub fn is_undoable(&self) -> bool {
        self.done_count > 0
    }

    pub fn is_redoable(&self) -> bool {
        self.done_count < self.commands.len()
    }

    pub fn undo_title(&self) -> Option<&str> {
        self.is_undoable()
            .then(|| self.commands[self.done_count - 1].title())
    }

    pub fn redo_title(&self) -> Option<&str> {
        self.is_redoable()
            .then(|| self.commands[self.done_count].title())
    }

    /// Apply `command` and record it, discarding any redoable tail.
    pub fn push(&mut self, picture: &mut Picture, mut command: Box<dyn Command>) {
        self.commands.truncate(self.done_count);
        command.redo(picture);
        self.commands.push(command);
        self.done_count += 1;
        self.trim();
    }

    pub fn undo(&mut self, picture: &mut Picture) -> bool {
        if !self.is_undoable() {
            return false;
        }
        self.done_count -= 1;
        self.commands[self.done_count].undo(picture);
        true
    }

    pub fn redo(&mut self, picture: &mut Picture) -> bool {
        if !self.is_redoable() {
            return false;
        }
        self.commands[self.done_count].redo(picture);
        self.done_count += 1;
        true
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.done_count = 0;
    }

    fn trim(&mut self) {
        let Some(budget) = self.memory_budget else {
            return;
        };
        let mut total: usize = self.commands.iter().map(|c| c.memory_size()).sum();
        // Never trim away the only undoable step.
        while total > budget && self.done_count > 1 {
            total -= self.commands[0].memory_size();
            self.commands.remove(0);
            self.done_count -= 1;
        }
    }
}

// ============================================================================
// IMAGE EDITS
// ============================================================================

/// Tile-swap edit of one image layer.  Holds the counterpart state for every
/// tile coordinate the edit touched: the first `redo` installs the new tiles,
/// each subsequent undo/redo swaps the stored set with the layer's.
pub struct ChangeLayerImageCommand {
    title: String,
    path: LayerPath,
    rect: Rect,
    tiles: Vec<(TileKey, Option<Tile>)>,
}

impl ChangeLayerImageCommand {
    /// `new_tiles` holds the post-edit contents of every tile the edit
    /// touched.  Only those keys take part in the swap; tiles that merely
    /// fall inside `rect` are left alone.
    pub fn new(
        title: impl Into<String>,
        path: LayerPath,
        rect: Rect,
        new_tiles: &TiledTexture,
    ) -> Self {
        let tiles = new_tiles
            .keys()
            .map(|key| (key, new_tiles.get(key).cloned()))
            .collect();
        Self {
            title: title.into(),
            path,
            rect,
            tiles,
        }
    }

    fn swap(&mut self, picture: &mut Picture) {
        let Some(tiles) = picture
            .layer_for_path_mut(&self.path)
            .and_then(Layer::tiles_mut)
        else {
            tracing::warn!(path = ?self.path, "image edit against a stale layer path");
            return;
        };
        for (key, stored) in &mut self.tiles {
            let current = tiles.take(*key);
            if let Some(tile) = stored.take() {
                tiles.set(*key, tile);
            }
            *stored = current;
        }
        tiles.shrink();
        picture.mark_dirty(Some(self.rect));
    }
}

impl Command for ChangeLayerImageCommand {
    fn redo(&mut self, picture: &mut Picture) {
        self.swap(picture);
    }

    fn undo(&mut self, picture: &mut Picture) {
        self.swap(picture);
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn memory_size(&self) -> usize {
        self.tiles.iter().filter(|(_, t)| t.is_some()).count() * TILE_BYTES
    }
}

/// Fill `rect` on an image layer, honoring the active selection mask.
pub struct FillLayerCommand {
    path: LayerPath,
    rect: Rect,
    color: Px,
    old_tiles: Vec<(TileKey, Option<Tile>)>,
}

impl FillLayerCommand {
    pub fn new(path: LayerPath, rect: Rect, color: Px) -> Self {
        Self {
            path,
            rect,
            color,
            old_tiles: Vec::new(),
        }
    }
}

impl Command for FillLayerCommand {
    fn redo(&mut self, picture: &mut Picture) {
        let mask = picture.selection.mask().cloned();
        let Some(tiles) = picture
            .layer_for_path_mut(&self.path)
            .and_then(Layer::tiles_mut)
        else {
            tracing::warn!(path = ?self.path, "fill against a stale layer path");
            return;
        };
        self.old_tiles = TiledTexture::keys_for_rect(self.rect.expand())
            .into_iter()
            .map(|key| (key, tiles.get(key).cloned()))
            .collect();
        tiles.fill(self.color, self.rect, mask.as_ref(), DrawBlend::SrcOver);
        picture.mark_dirty(Some(self.rect));
    }

    fn undo(&mut self, picture: &mut Picture) {
        let Some(tiles) = picture
            .layer_for_path_mut(&self.path)
            .and_then(Layer::tiles_mut)
        else {
            tracing::warn!(path = ?self.path, "fill undo against a stale layer path");
            return;
        };
        for (key, old) in self.old_tiles.drain(..) {
            match old {
                Some(tile) => tiles.set(key, tile),
                None => {
                    tiles.take(key);
                }
            }
        }
        tiles.shrink();
        picture.mark_dirty(Some(self.rect));
    }

    fn title(&self) -> &str {
        "Fill Layer"
    }

    fn memory_size(&self) -> usize {
        self.old_tiles.iter().filter(|(_, t)| t.is_some()).count() * TILE_BYTES
    }
}

/// Clear an image layer.  With a selection active only the selected region
/// is cleared, otherwise the layer's tiles are dropped wholesale.
pub struct ClearLayerCommand {
    path: LayerPath,
    old_tiles: Option<TiledTexture>,
}

impl ClearLayerCommand {
    pub fn new(path: LayerPath) -> Self {
        Self {
            path,
            old_tiles: None,
        }
    }
}

impl Command for ClearLayerCommand {
    fn redo(&mut self, picture: &mut Picture) {
        let canvas = picture.rect();
        let mask = picture.selection.mask().cloned();
        let Some(tiles) = picture
            .layer_for_path_mut(&self.path)
            .and_then(Layer::tiles_mut)
        else {
            tracing::warn!(path = ?self.path, "clear against a stale layer path");
            return;
        };
        let old = std::mem::take(tiles);
        if let Some(mask) = mask {
            // Punch out only the selected region.
            *tiles = old.clone();
            tiles.fill(crate::blend::TRANSPARENT, canvas, Some(&mask), DrawBlend::Src);
            tiles.shrink();
        }
        self.old_tiles = Some(old);
        picture.mark_dirty(None);
    }

    fn undo(&mut self, picture: &mut Picture) {
        let Some(old) = self.old_tiles.take() else {
            return;
        };
        let Some(tiles) = picture
            .layer_for_path_mut(&self.path)
            .and_then(Layer::tiles_mut)
        else {
            tracing::warn!(path = ?self.path, "clear undo against a stale layer path");
            return;
        };
        *tiles = old;
        picture.mark_dirty(None);
    }

    fn title(&self) -> &str {
        "Clear Layer"
    }

    fn memory_size(&self) -> usize {
        self.old_tiles.as_ref().map_or(0, tiled_texture_bytes)
    }
}

/// Replace an image layer's tiles with an affine-transformed copy.
pub struct TransformLayerCommand {
    path: LayerPath,
    transform: Affine,
    old_tiles: Option<TiledTexture>,
}

impl TransformLayerCommand {
    pub fn new(path: LayerPath, transform: Affine) -> Self {
        Self {
            path,
            transform,
            old_tiles: None,
        }
    }
}

impl Command for TransformLayerCommand {
    fn redo(&mut self, picture: &mut Picture) {
        let Some(tiles) = picture
            .layer_for_path_mut(&self.path)
            .and_then(Layer::tiles_mut)
        else {
            tracing::warn!(path = ?self.path, "transform against a stale layer path");
            return;
        };
        let transformed = tiles.transform(self.transform);
        self.old_tiles = Some(std::mem::replace(tiles, transformed));
        picture.mark_dirty(None);
    }

    fn undo(&mut self, picture: &mut Picture) {
        let Some(old) = self.old_tiles.take() else {
            return;
        };
        let Some(tiles) = picture
            .layer_for_path_mut(&self.path)
            .and_then(Layer::tiles_mut)
        else {
            tracing::warn!(path = ?self.path, "transform undo against a stale layer path");
            return;
        };
        *tiles = old;
        picture.mark_dirty(None);
    }

    fn title(&self) -> &str {
        "Transform Layer"
    }

    fn memory_size(&self) -> usize {
        self.old_tiles.as_ref().map_or(0, tiled_texture_bytes)
    }
}

// ============================================================================
// STRUCTURAL EDITS
// ============================================================================

pub struct AddLayerCommand {
    path: LayerPath,
    layer: Option<Layer>,
}

impl AddLayerCommand {
    pub fn new(path: LayerPath, layer: Layer) -> Self {
        Self {
            path,
            layer: Some(layer),
        }
    }
}

impl Command for AddLayerCommand {
    fn redo(&mut self, picture: &mut Picture) {
        if let Some(layer) = self.layer.take() {
            picture.splice_layers(&self.path, 0, vec![layer]);
        }
    }

    fn undo(&mut self, picture: &mut Picture) {
        let mut removed = picture.splice_layers(&self.path, 1, Vec::new());
        self.layer = removed.pop();
    }

    fn title(&self) -> &str {
        "Add Layer"
    }

    fn memory_size(&self) -> usize {
        self.layer.as_ref().map_or(0, layer_bytes)
    }
}

pub struct RemoveLayerCommand {
    path: LayerPath,
    removed: Option<Layer>,
}

impl RemoveLayerCommand {
    pub fn new(path: LayerPath) -> Self {
        Self {
            path,
            removed: None,
        }
    }
}

impl Command for RemoveLayerCommand {
    fn redo(&mut self, picture: &mut Picture) {
        let mut removed = picture.splice_layers(&self.path, 1, Vec::new());
        self.removed = removed.pop();
    }

    fn undo(&mut self, picture: &mut Picture) {
        if let Some(layer) = self.removed.take() {
            picture.splice_layers(&self.path, 0, vec![layer]);
        }
    }

    fn title(&self) -> &str {
        "Remove Layer"
    }

    fn memory_size(&self) -> usize {
        self.removed.as_ref().map_or(0, layer_bytes)
    }
}

/// Move a layer to a new position.  The destination path is interpreted in
/// the tree as it stands before removal, then adjusted.
pub struct MoveLayerCommand {
    from: LayerPath,
    to: LayerPath,
    /// Where the layer actually landed, filled in by `redo`.
    landed: Option<LayerPath>,
}

impl MoveLayerCommand {
    pub fn new(from: LayerPath, to: LayerPath) -> Self {
        Self {
            from,
            to,
            landed: None,
        }
    }
}

impl Command for MoveLayerCommand {
    fn redo(&mut self, picture: &mut Picture) {
        let mut removed = picture.splice_layers(&self.from, 1, Vec::new());
        let Some(layer) = removed.pop() else {
            tracing::warn!(from = ?self.from, "move against a stale layer path");
            return;
        };
        let landed = self.to.after_remove(&self.from);
        picture.splice_layers(&landed, 0, vec![layer]);
        self.landed = Some(landed);
    }

    fn undo(&mut self, picture: &mut Picture) {
        let Some(landed) = self.landed.take() else {
            return;
        };
        let mut removed = picture.splice_layers(&landed, 1, Vec::new());
        let Some(layer) = removed.pop() else {
            return;
        };
        // With the moved layer pulled back out, the tree is the pre-move
        // tree minus that layer, so the original source path is valid as is.
        picture.splice_layers(&self.from, 0, vec![layer]);
    }

    fn title(&self) -> &str {
        "Move Layer"
    }
}

/// Merge the layer at `path` with the sibling directly below it (the next
/// index) into a single image layer carrying the lower sibling's name.
pub struct MergeLayerCommand {
    path: LayerPath,
    originals: Vec<Layer>,
}

impl MergeLayerCommand {
    pub fn new(path: LayerPath) -> Self {
        Self {
            path,
            originals: Vec::new(),
        }
    }
}

impl Command for MergeLayerCommand {
    fn redo(&mut self, picture: &mut Picture) {
        let originals = picture.splice_layers(&self.path, 2, Vec::new());
        if originals.len() != 2 {
            tracing::warn!(path = ?self.path, "merge needs two consecutive siblings");
            picture.splice_layers(&self.path, 0, originals);
            return;
        }
        let mut blender = LayerBlender::new();
        let tiles = blender.blend_to_tiled_texture(&originals);
        let name = originals[1].props.name.clone();
        picture.splice_layers(&self.path, 0, vec![Layer::new_image_with_tiles(name, tiles)]);
        self.originals = originals;
    }

    fn undo(&mut self, picture: &mut Picture) {
        if self.originals.is_empty() {
            return;
        }
        picture.splice_layers(&self.path, 1, std::mem::take(&mut self.originals));
    }

    fn title(&self) -> &str {
        "Merge Layers"
    }

    fn memory_size(&self) -> usize {
        self.originals.iter().map(layer_bytes).sum()
    }
}

pub struct ChangeLayerPropsCommand {
    path: LayerPath,
    props: LayerProps,
}

impl ChangeLayerPropsCommand {
    pub fn new(path: LayerPath, props: LayerProps) -> Self {
        Self { path, props }
    }

    fn swap(&mut self, picture: &mut Picture) {
        let Some(layer) = picture.layer_for_path_mut(&self.path) else {
            tracing::warn!(path = ?self.path, "props edit against a stale layer path");
            return;
        };
        std::mem::swap(&mut layer.props, &mut self.props);
        picture.mark_dirty(None);
    }
}

impl Command for ChangeLayerPropsCommand {
    fn redo(&mut self, picture: &mut Picture) {
        self.swap(picture);
    }

    fn undo(&mut self, picture: &mut Picture) {
        self.swap(picture);
    }

    fn title(&self) -> &str {
        "Change Layer Properties"
    }
}

// ============================================================================
// SELECTION
// ============================================================================

pub struct SelectionChangeCommand {
    mask: Option<GrayImage>,
}

impl SelectionChangeCommand {
    pub fn new(mask: Option<GrayImage>) -> Self {
        Self { mask }
    }

    fn swap(&mut self, picture: &mut Picture) {
        let current = picture.selection.mask().cloned();
        picture.selection.set_mask(self.mask.take());
        self.mask = current;
    }
}

impl Command for SelectionChangeCommand {
    fn redo(&mut self, picture: &mut Picture) {
        self.swap(picture);
    }

    fn undo(&mut self, picture: &mut Picture) {
        self.swap(picture);
    }

    fn title(&self) -> &str {
        "Change Selection"
    }

    fn memory_size(&self) -> usize {
        self.mask
            .as_ref()
            .map_or(0, |m| m.width() as usize * m.height() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer_names(picture: &Picture) -> Vec<String> {
        picture
            .layers
            .iter()
            .map(|l| l.props.name.clone())
            .collect()
    }

    #[test]
    fn image_edit_swaps_tiles_both_ways() {
        let mut picture = Picture::new(300, 300);
        let mut stack = UndoStack::new();

        let mut edited = picture.layers[0].tiles().unwrap().clone();
        edited.put_pixel(5, 5, [0.0, 1.0, 0.0, 1.0]);
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        let path = LayerPath::new(vec![0]);
        stack.push(
            &mut picture,
            Box::new(ChangeLayerImageCommand::new("Stroke", path.clone(), rect, &edited)),
        );
        let layer_tiles = picture.layer_for_path(&path).unwrap().tiles().unwrap();
        assert_eq!(layer_tiles.get_pixel(5, 5), [0.0, 1.0, 0.0, 1.0]);

        assert!(stack.undo(&mut picture));
        let layer_tiles = picture.layer_for_path(&path).unwrap().tiles().unwrap();
        assert_eq!(layer_tiles.get_pixel(5, 5), [0.0, 0.0, 0.0, 0.0]);
        assert_eq!(layer_tiles.tile_count(), 0);

        assert!(stack.redo(&mut picture));
        let layer_tiles = picture.layer_for_path(&path).unwrap().tiles().unwrap();
        assert_eq!(layer_tiles.get_pixel(5, 5), [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn push_truncates_the_redo_tail() {
        let mut picture = Picture::new(64, 64);
        let mut stack = UndoStack::new();
        stack.push(
            &mut picture,
            Box::new(AddLayerCommand::new(
                LayerPath::new(vec![0]),
                Layer::new_image("a"),
            )),
        );
        stack.push(
            &mut picture,
            Box::new(AddLayerCommand::new(
                LayerPath::new(vec![0]),
                Layer::new_image("b"),
            )),
        );
        stack.undo(&mut picture);
        assert_eq!(layer_names(&picture), ["a", "Layer"]);

        stack.push(
            &mut picture,
            Box::new(AddLayerCommand::new(
                LayerPath::new(vec![0]),
                Layer::new_image("c"),
            )),
        );
        assert!(!stack.is_redoable());
        assert_eq!(layer_names(&picture), ["c", "a", "Layer"]);
    }

    #[test]
    fn move_layer_round_trips() {
        let mut picture = Picture::new(64, 64);
        picture.layers = vec![
            Layer::new_image("a"),
            Layer::new_image("b"),
            Layer::new_image("c"),
        ];
        let mut stack = UndoStack::new();
        stack.push(
            &mut picture,
            Box::new(MoveLayerCommand::new(
                LayerPath::new(vec![0]),
                LayerPath::new(vec![3]),
            )),
        );
        assert_eq!(layer_names(&picture), ["b", "c", "a"]);
        stack.undo(&mut picture);
        assert_eq!(layer_names(&picture), ["a", "b", "c"]);

        // Upward move: the destination precedes the source, so the landed
        // path needs no removal adjustment but the undo reinsertion point
        // is the original source index.
        stack.push(
            &mut picture,
            Box::new(MoveLayerCommand::new(
                LayerPath::new(vec![2]),
                LayerPath::new(vec![0]),
            )),
        );
        assert_eq!(layer_names(&picture), ["c", "a", "b"]);
        stack.undo(&mut picture);
        assert_eq!(layer_names(&picture), ["a", "b", "c"]);
        stack.redo(&mut picture);
        assert_eq!(layer_names(&picture), ["c", "a", "b"]);
    }

    #[test]
    fn image_edit_leaves_untouched_tiles_in_its_rect_alone() {
        // An edit whose bounding rect spans tiles it never wrote must not
        // swap those tiles away.
        let mut picture = Picture::new(1024, 1024);
        picture.layers[0]
            .tiles_mut()
            .unwrap()
            .put_pixel(100, 800, [0.0, 1.0, 0.0, 1.0]);

        let mut edited = TiledTexture::new();
        edited.put_pixel(60, 60, [1.0, 0.0, 0.0, 1.0]);
        edited.put_pixel(900, 860, [1.0, 0.0, 0.0, 1.0]);
        let rect = Rect::new(50.0, 50.0, 910.0, 870.0);

        let mut stack = UndoStack::new();
        stack.push(
            &mut picture,
            Box::new(ChangeLayerImageCommand::new(
                "Stroke",
                LayerPath::new(vec![0]),
                rect,
                &edited,
            )),
        );
        let tiles = picture.layers[0].tiles().unwrap();
        assert_eq!(tiles.get_pixel(100, 800), [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(tiles.get_pixel(60, 60), [1.0, 0.0, 0.0, 1.0]);

        stack.undo(&mut picture);
        let tiles = picture.layers[0].tiles().unwrap();
        assert_eq!(tiles.get_pixel(100, 800), [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(tiles.get_pixel(60, 60), [0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn merge_flattens_and_restores() {
        let mut picture = Picture::new(300, 300);
        let mut top = TiledTexture::new();
        top.put_pixel(0, 0, [1.0, 0.0, 0.0, 1.0]);
        let mut bottom = TiledTexture::new();
        bottom.put_pixel(1, 0, [0.0, 0.0, 1.0, 1.0]);
        picture.layers = vec![
            Layer::new_image_with_tiles("top", top),
            Layer::new_image_with_tiles("bottom", bottom),
        ];
        let mut stack = UndoStack::new();
        stack.push(
            &mut picture,
            Box::new(MergeLayerCommand::new(LayerPath::new(vec![0]))),
        );
        assert_eq!(layer_names(&picture), ["bottom"]);
        let tiles = picture.layers[0].tiles().unwrap();
        assert_eq!(tiles.get_pixel(0, 0), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(tiles.get_pixel(1, 0), [0.0, 0.0, 1.0, 1.0]);

        stack.undo(&mut picture);
        assert_eq!(layer_names(&picture), ["top", "bottom"]);
    }

    #[test]
    fn props_change_swaps_in_place() {
        let mut picture = Picture::new(64, 64);
        let mut stack = UndoStack::new();
        let mut props = picture.layers[0].props.clone();
        props.opacity = 0.25;
        stack.push(
            &mut picture,
            Box::new(ChangeLayerPropsCommand::new(LayerPath::new(vec![0]), props)),
        );
        assert_eq!(picture.layers[0].props.opacity, 0.25);
        stack.undo(&mut picture);
        assert_eq!(picture.layers[0].props.opacity, 1.0);
    }

    #[test]
    fn selection_change_round_trips() {
        let mut picture = Picture::new(16, 16);
        let mut stack = UndoStack::new();
        let mask = GrayImage::from_pixel(16, 16, image::Luma([255]));
        stack.push(
            &mut picture,
            Box::new(SelectionChangeCommand::new(Some(mask))),
        );
        assert!(picture.selection.has_selection());
        stack.undo(&mut picture);
        assert!(!picture.selection.has_selection());
    }

    #[test]
    fn memory_budget_drops_oldest_entries() {
        let mut picture = Picture::new(300, 300);
        let mut stack = UndoStack::with_memory_budget(TILE_BYTES * 2);
        for i in 0..4 {
            let mut edited = picture.layers[0].tiles().unwrap().clone();
            edited.put_pixel(i, 0, [1.0, 1.0, 1.0, 1.0]);
            stack.push(
                &mut picture,
                Box::new(ChangeLayerImageCommand::new(
                    "Stroke",
                    LayerPath::new(vec![0]),
                    Rect::new(0.0, 0.0, 8.0, 1.0),
                    &edited,
                )),
            );
        }
        let mut undone = 0;
        while stack.undo(&mut picture) {
            undone += 1;
        }
        assert!(undone < 4);
        assert!(undone >= 1);
    }

    #[test]
    fn fill_honors_the_selection_mask() {
        let mut picture = Picture::new(16, 16);
        let mut mask = GrayImage::new(16, 16);
        mask.put_pixel(2, 2, image::Luma([255]));
        picture.selection.set_mask(Some(mask));
        let mut stack = UndoStack::new();
        stack.push(
            &mut picture,
            Box::new(FillLayerCommand::new(
                LayerPath::new(vec![0]),
                Rect::new(0.0, 0.0, 16.0, 16.0),
                [1.0, 0.0, 0.0, 1.0],
            )),
        );
        let tiles = picture.layers[0].tiles().unwrap();
        assert_eq!(tiles.get_pixel(2, 2), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(tiles.get_pixel(3, 3), [0.0, 0.0, 0.0, 0.0]);

        stack.undo(&mut picture);
        assert_eq!(picture.layers[0].tiles().unwrap().tile_count(), 0);
    }
}
