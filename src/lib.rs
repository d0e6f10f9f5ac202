//! Raster painting core: a sparse tiled canvas with a blendable layer tree,
//! dirty-rectangle incremental recompositing, a stabilized brush-stroke
//! pipeline, and command-based undo.
//!
//! Pixels are premultiplied RGBA, stored as half floats in fixed-size tiles
//! and blended in f32.  The compositor ([`picture::PictureBlender`]) pulls
//! only the tiles inside the dirty region; strokes render into a scratch
//! texture previewed through [`blender::TileReplacer`] and commit as a
//! single [`undo::Command`].

pub mod blend;
pub mod blender;
pub mod brush;
pub mod error;
pub mod layer;
pub mod picture;
pub mod tiled;
pub mod undo;

pub use blend::{BlendMode, Px};
pub use blender::{LayerBlender, TileReplacer};
pub use brush::{BrushEngine, BrushPreset, BrushTool};
pub use brush::waypoint::Waypoint;
pub use error::Error;
pub use layer::{Layer, LayerContent, LayerPath, LayerProps};
pub use picture::{Dirtiness, Picture, PictureBlender, Selection};
pub use tiled::{TILE_SIZE, Tile, TileKey, TiledTexture, TiledTextureData};
pub use undo::{Command, UndoStack};
