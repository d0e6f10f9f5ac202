use serde::{Deserialize, Serialize};

use crate::blend::BlendMode;
use crate::tiled::TiledTexture;

// ============================================================================
// LAYER TREE — image and group layers, addressed by index-path from the root
// ============================================================================

/// The per-layer attributes shared by image and group layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerProps {
    pub name: String,
    pub visible: bool,
    /// Layer opacity in [0, 1].
    pub opacity: f32,
    pub blend_mode: BlendMode,
    /// Locks alpha: strokes composite `src-atop` instead of `src-over`.
    pub preserve_opacity: bool,
    /// Clips this layer to the alpha of the nearest non-clipping layer below.
    pub clipping_group: bool,
}

impl LayerProps {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            preserve_opacity: false,
            clipping_group: false,
        }
    }
}

/// What a layer holds: its own pixels, or an ordered list of children.
#[derive(Clone)]
pub enum LayerContent {
    Image { tiles: TiledTexture },
    Group { children: Vec<Layer> },
}

#[derive(Clone)]
pub struct Layer {
    pub props: LayerProps,
    pub content: LayerContent,
}

impl Layer {
    pub fn new_image(name: impl Into<String>) -> Self {
        Self {
            props: LayerProps::new(name),
            content: LayerContent::Image {
                tiles: TiledTexture::new(),
            },
        }
    }

    pub fn new_image_with_tiles(name: impl Into<String>, tiles: TiledTexture) -> Self {
        Self {
            props: LayerProps::new(name),
            content: LayerContent::Image { tiles },
        }
    }

    pub fn new_group(name: impl Into<String>, children: Vec<Layer>) -> Self {
        Self {
            props: LayerProps::new(name),
            content: LayerContent::Group { children },
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.content, LayerContent::Group { .. })
    }

    /// This layer's tiles, if it is an image layer.
    pub fn tiles(&self) -> Option<&TiledTexture> {
        match &self.content {
            LayerContent::Image { tiles } => Some(tiles),
            LayerContent::Group { .. } => None,
        }
    }

    pub fn tiles_mut(&mut self) -> Option<&mut TiledTexture> {
        match &mut self.content {
            LayerContent::Image { tiles } => Some(tiles),
            LayerContent::Group { .. } => None,
        }
    }

    pub fn children(&self) -> Option<&[Layer]> {
        match &self.content {
            LayerContent::Group { children } => Some(children),
            LayerContent::Image { .. } => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Layer>> {
        match &mut self.content {
            LayerContent::Group { children } => Some(children),
            LayerContent::Image { .. } => None,
        }
    }

    /// Visit this layer and all descendants, depth first.
    pub fn for_each_descendant(&self, f: &mut impl FnMut(&Layer)) {
        f(self);
        if let Some(children) = self.children() {
            for child in children {
                child.for_each_descendant(f);
            }
        }
    }
}

// ============================================================================
// INDEX PATHS
// ============================================================================

/// Index-path of a layer from the canvas root.  Paths are positional, so any
/// structural edit invalidates paths at or after the edit point — commands
/// recompute them via [`LayerPath::after_remove`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerPath(pub Vec<usize>);

impl LayerPath {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<usize> {
        self.0.last().copied()
    }

    pub fn parent(&self) -> Option<LayerPath> {
        if self.0.is_empty() {
            None
        } else {
            Some(LayerPath(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn child(&self, index: usize) -> LayerPath {
        let mut indices = self.0.clone();
        indices.push(index);
        LayerPath(indices)
    }

    fn prefix(&self, len: usize) -> LayerPath {
        LayerPath(self.0[..len].to_vec())
    }

    pub fn is_sibling(&self, other: &LayerPath) -> bool {
        match (self.parent(), other.parent()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// The path this position moves to once the layer at `removed` has been
    /// spliced out.
    pub fn after_remove(&self, removed: &LayerPath) -> LayerPath {
        let mut out = self.clone();
        for len in (1..=self.len()).rev() {
            let sub = self.prefix(len);
            if removed.is_sibling(&sub)
                && removed.last().unwrap_or(usize::MAX) < sub.last().unwrap_or(0)
            {
                out.0[len - 1] -= 1;
            }
        }
        out
    }
}

/// Resolve a path against a root layer list.  A stale path resolves to
/// `None` rather than panicking.
pub fn layer_for_path<'a>(layers: &'a [Layer], path: &LayerPath) -> Option<&'a Layer> {
    let (&first, rest) = path.0.split_first()?;
    let layer = layers.get(first)?;
    if rest.is_empty() {
        Some(layer)
    } else {
        layer_for_path(layer.children()?, &LayerPath(rest.to_vec()))
    }
}

pub fn layer_for_path_mut<'a>(layers: &'a mut Vec<Layer>, path: &LayerPath) -> Option<&'a mut Layer> {
    let (&first, rest) = path.0.split_first()?;
    let layer = layers.get_mut(first)?;
    if rest.is_empty() {
        Some(layer)
    } else {
        layer_for_path_mut(layer.children_mut()?, &LayerPath(rest.to_vec()))
    }
}

/// Remove `remove_count` layers at `path` and insert `insert` in their place,
/// returning the removed layers.  A stale path is a no-op returning the
/// insert list's leftovers (empty).
pub fn splice_layers(
    layers: &mut Vec<Layer>,
    path: &LayerPath,
    remove_count: usize,
    insert: Vec<Layer>,
) -> Vec<Layer> {
    let Some(index) = path.last() else {
        tracing::warn!("splice_layers called with the root path");
        return Vec::new();
    };
    let list = match path.parent() {
        Some(parent) if !parent.is_empty() => {
            match layer_for_path_mut(layers, &parent).and_then(Layer::children_mut) {
                Some(children) => children,
                None => {
                    tracing::warn!(?path, "splice_layers: stale parent path");
                    return Vec::new();
                }
            }
        }
        _ => layers,
    };
    let index = index.min(list.len());
    let end = (index + remove_count).min(list.len());
    list.splice(index..end, insert).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> Vec<Layer> {
        vec![
            Layer::new_image("top"),
            Layer::new_group(
                "group",
                vec![Layer::new_image("inner a"), Layer::new_image("inner b")],
            ),
            Layer::new_image("bottom"),
        ]
    }

    #[test]
    fn path_resolution_descends_groups() {
        let layers = sample_tree();
        let inner = layer_for_path(&layers, &LayerPath::new(vec![1, 1])).unwrap();
        assert_eq!(inner.props.name, "inner b");
        assert!(layer_for_path(&layers, &LayerPath::new(vec![3])).is_none());
        assert!(layer_for_path(&layers, &LayerPath::new(vec![0, 0])).is_none());
    }

    #[test]
    fn splice_removes_and_inserts_in_place() {
        let mut layers = sample_tree();
        let removed = splice_layers(&mut layers, &LayerPath::new(vec![1, 0]), 1, Vec::new());
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].props.name, "inner a");
        assert_eq!(layers[1].children().unwrap().len(), 1);

        splice_layers(&mut layers, &LayerPath::new(vec![0]), 0, removed);
        assert_eq!(layers[0].props.name, "inner a");
        assert_eq!(layers.len(), 4);
    }

    #[test]
    fn after_remove_shifts_following_siblings() {
        let path = LayerPath::new(vec![2]);
        let shifted = path.after_remove(&LayerPath::new(vec![0]));
        assert_eq!(shifted, LayerPath::new(vec![1]));

        // Removal below a deeper prefix shifts the prefix component.
        let path = LayerPath::new(vec![2, 1]);
        let shifted = path.after_remove(&LayerPath::new(vec![1]));
        assert_eq!(shifted, LayerPath::new(vec![1, 1]));

        // Removal after the position is irrelevant.
        let path = LayerPath::new(vec![1]);
        assert_eq!(path.after_remove(&LayerPath::new(vec![2])), path);
    }
}
