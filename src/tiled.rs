use std::collections::HashMap;

use half::f16;
use image::RgbaImage;
use kurbo::{Affine, Point, Rect};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::blend::{self, Px, TRANSPARENT};
use crate::error::Error;

// ============================================================================
// TILE — fixed 256×256 block of premultiplied half-float RGBA
// ============================================================================

/// Edge length of a tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Integer grid coordinate of a tile.  Tile `(kx, ky)` covers canvas pixels
/// `[kx*256, (kx+1)*256) × [ky*256, (ky+1)*256)`.
pub type TileKey = (i32, i32);

/// Tile keys further out than this are rejected as malformed — they can only
/// arise from floating-point garbage, not from any representable canvas.
const MAX_TILE_COORD: i32 = 1 << 20;

/// One tile's worth of premultiplied half-float RGBA pixels.
#[derive(Clone)]
pub struct Tile {
    pixels: Vec<[f16; 4]>,
}

impl Tile {
    /// A fully transparent tile.
    pub fn new() -> Self {
        Self {
            pixels: vec![[f16::ZERO; 4]; (TILE_SIZE * TILE_SIZE) as usize],
        }
    }

    /// Reconstruct from raw half-float bit patterns (`TILE_SIZE²*4` values).
    pub fn from_data(data: &[u16]) -> Result<Self, Error> {
        let expected = (TILE_SIZE * TILE_SIZE * 4) as usize;
        if data.len() != expected {
            return Err(Error::TileDataSize {
                expected,
                found: data.len(),
            });
        }
        let pixels = data
            .chunks_exact(4)
            .map(|c| {
                [
                    f16::from_bits(c[0]),
                    f16::from_bits(c[1]),
                    f16::from_bits(c[2]),
                    f16::from_bits(c[3]),
                ]
            })
            .collect();
        Ok(Self { pixels })
    }

    /// Export as raw half-float bit patterns — the only pixel format contract
    /// exposed to serializers.
    pub fn to_data(&self) -> Vec<u16> {
        let mut data = Vec::with_capacity(self.pixels.len() * 4);
        for p in &self.pixels {
            data.extend_from_slice(&[
                p[0].to_bits(),
                p[1].to_bits(),
                p[2].to_bits(),
                p[3].to_bits(),
            ]);
        }
        data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Px {
        debug_assert!(x < TILE_SIZE && y < TILE_SIZE);
        let p = self.pixels[(y * TILE_SIZE + x) as usize];
        [
            p[0].to_f32(),
            p[1].to_f32(),
            p[2].to_f32(),
            p[3].to_f32(),
        ]
    }

    #[inline]
    pub fn put(&mut self, x: u32, y: u32, px: Px) {
        debug_assert!(x < TILE_SIZE && y < TILE_SIZE);
        self.pixels[(y * TILE_SIZE + x) as usize] = [
            f16::from_f32(px[0]),
            f16::from_f32(px[1]),
            f16::from_f32(px[2]),
            f16::from_f32(px[3]),
        ];
    }

    /// True if every pixel is fully transparent.
    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|p| p[3] == f16::ZERO)
    }

    /// Tile-local bounding rectangle of non-transparent pixels, or `None`
    /// for a blank tile.
    pub fn bounding_rect(&self) -> Option<Rect> {
        let mut min_x = TILE_SIZE;
        let mut min_y = TILE_SIZE;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut any = false;
        for y in 0..TILE_SIZE {
            for x in 0..TILE_SIZE {
                if self.pixels[(y * TILE_SIZE + x) as usize][3] != f16::ZERO {
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                    any = true;
                }
            }
        }
        if any {
            Some(Rect::new(
                f64::from(min_x),
                f64::from(min_y),
                f64::from(max_x + 1),
                f64::from(max_y + 1),
            ))
        } else {
            None
        }
    }
}

impl Default for Tile {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TEXTURE — flat (non-tiled) pixel buffer for crops, imports and undo diffs
// ============================================================================

/// Maximum pixel count for a single flat texture (~256 megapixels), matching
/// the canvas size limit enforced above the tile store.
const MAX_TEXTURE_PIXELS: u64 = 256_000_000;

/// A plain rectangular buffer of premultiplied half-float RGBA, used where a
/// contiguous region is needed: cropping out of a [`TiledTexture`], drawing
/// into one, and bulk image import.
#[derive(Clone)]
pub struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<[f16; 4]>,
}

impl Texture {
    pub fn new(width: u32, height: u32) -> Result<Self, Error> {
        if width == 0 || height == 0 || u64::from(width) * u64::from(height) > MAX_TEXTURE_PIXELS
        {
            return Err(Error::TextureTooLarge { width, height });
        }
        Ok(Self {
            width,
            height,
            pixels: vec![[f16::ZERO; 4]; (width * height) as usize],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Px {
        if x >= self.width || y >= self.height {
            return TRANSPARENT;
        }
        let p = self.pixels[(y * self.width + x) as usize];
        [
            p[0].to_f32(),
            p[1].to_f32(),
            p[2].to_f32(),
            p[3].to_f32(),
        ]
    }

    #[inline]
    pub fn put(&mut self, x: u32, y: u32, px: Px) {
        if x >= self.width || y >= self.height {
            return;
        }
        self.pixels[(y * self.width + x) as usize] = [
            f16::from_f32(px[0]),
            f16::from_f32(px[1]),
            f16::from_f32(px[2]),
            f16::from_f32(px[3]),
        ];
    }

    /// Bilinear sample at a sub-pixel position.  Positions outside the
    /// texture read as transparent.
    pub fn sample(&self, pos: Point) -> Px {
        let x = pos.x - 0.5;
        let y = pos.y - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = (x - x0) as f32;
        let fy = (y - y0) as f32;

        let fetch = |ix: f64, iy: f64| -> Px {
            if ix < 0.0 || iy < 0.0 {
                return TRANSPARENT;
            }
            self.get(ix as u32, iy as u32)
        };

        let p00 = fetch(x0, y0);
        let p10 = fetch(x0 + 1.0, y0);
        let p01 = fetch(x0, y0 + 1.0);
        let p11 = fetch(x0 + 1.0, y0 + 1.0);

        let mut out = TRANSPARENT;
        for i in 0..4 {
            let top = p00[i] * (1.0 - fx) + p10[i] * fx;
            let bottom = p01[i] * (1.0 - fx) + p11[i] * fx;
            out[i] = top * (1.0 - fy) + bottom * fy;
        }
        out
    }

    /// Import from an 8-bit straight-alpha image, premultiplying.  Rows are
    /// converted in parallel.
    pub fn from_rgba_image(src: &RgbaImage) -> Result<Self, Error> {
        let mut tex = Self::new(src.width(), src.height())?;
        let width = tex.width as usize;
        tex.pixels
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    let p = src.get_pixel(x as u32, y as u32).0;
                    let a = f32::from(p[3]) / 255.0;
                    *out = [
                        f16::from_f32(f32::from(p[0]) / 255.0 * a),
                        f16::from_f32(f32::from(p[1]) / 255.0 * a),
                        f16::from_f32(f32::from(p[2]) / 255.0 * a),
                        f16::from_f32(a),
                    ];
                }
            });
        Ok(tex)
    }

    /// Export to an 8-bit straight-alpha image.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut img = RgbaImage::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let p = self.get(x, y);
                let a = p[3].clamp(0.0, 1.0);
                let un = |c: f32| {
                    if a < 1e-4 {
                        0
                    } else {
                        ((c / a).clamp(0.0, 1.0) * 255.0).round() as u8
                    }
                };
                img.put_pixel(x, y, image::Rgba([un(p[0]), un(p[1]), un(p[2]), (a * 255.0).round() as u8]));
            }
        }
        img
    }
}

/// How a texture draw combines with existing tile content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawBlend {
    /// Overwrite destination pixels inside the mapped source rectangle.
    Src,
    /// Alpha-composite the source over the destination.
    SrcOver,
}

// ============================================================================
// TILED TEXTURE — sparse tile map owned by one image layer
// ============================================================================

/// Serialized form of a [`TiledTexture`]: `(key, half-float bits)` pairs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TiledTextureData {
    pub tile_size: u32,
    pub tiles: Vec<(TileKey, Vec<u16>)>,
}

/// Sparse map of tile key → [`Tile`].  At most one tile per key; lookup is
/// O(1) amortized.  Absent and fully transparent are equivalent for
/// compositing.
#[derive(Clone, Default)]
pub struct TiledTexture {
    tiles: HashMap<TileKey, Tile>,
}

impl TiledTexture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, key: TileKey) -> bool {
        self.tiles.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.tiles.keys().copied()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn get(&self, key: TileKey) -> Option<&Tile> {
        self.tiles.get(&key)
    }

    /// The tile at `key`, allocating a blank one on first access.  Malformed
    /// keys (far outside any representable canvas) are clamped into range
    /// rather than treated as fatal.
    pub fn ensure(&mut self, key: TileKey) -> &mut Tile {
        let key = clamp_key(key);
        self.tiles.entry(key).or_default()
    }

    pub fn set(&mut self, key: TileKey, tile: Tile) {
        self.tiles.insert(clamp_key(key), tile);
    }

    /// Remove and return the tile at `key`.
    pub fn take(&mut self, key: TileKey) -> Option<Tile> {
        self.tiles.remove(&key)
    }

    pub fn clear(&mut self) {
        self.tiles.clear();
    }

    /// Read one canvas-space pixel; absent tiles read as transparent.
    pub fn get_pixel(&self, x: i32, y: i32) -> Px {
        let key = key_for_pixel(x, y);
        match self.tiles.get(&key) {
            Some(tile) => tile.get(
                x.rem_euclid(TILE_SIZE as i32) as u32,
                y.rem_euclid(TILE_SIZE as i32) as u32,
            ),
            None => TRANSPARENT,
        }
    }

    /// Write one canvas-space pixel, allocating the tile if needed.
    pub fn put_pixel(&mut self, x: i32, y: i32, px: Px) {
        let tile = self.ensure(key_for_pixel(x, y));
        tile.put(
            x.rem_euclid(TILE_SIZE as i32) as u32,
            y.rem_euclid(TILE_SIZE as i32) as u32,
            px,
        );
    }

    /// Bilinear sample in canvas space, crossing tile boundaries.
    pub fn sample(&self, pos: Point) -> Px {
        let x = pos.x - 0.5;
        let y = pos.y - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = (x - x0) as f32;
        let fy = (y - y0) as f32;
        let x0 = x0 as i32;
        let y0 = y0 as i32;

        let p00 = self.get_pixel(x0, y0);
        let p10 = self.get_pixel(x0 + 1, y0);
        let p01 = self.get_pixel(x0, y0 + 1);
        let p11 = self.get_pixel(x0 + 1, y0 + 1);

        let mut out = TRANSPARENT;
        for i in 0..4 {
            let top = p00[i] * (1.0 - fx) + p10[i] * fx;
            let bottom = p01[i] * (1.0 - fx) + p11[i] * fx;
            out[i] = top * (1.0 - fy) + bottom * fy;
        }
        out
    }

    /// Canvas-space bounding rectangle of all non-transparent content.
    pub fn bounding_rect(&self) -> Option<Rect> {
        let mut union: Option<Rect> = None;
        for (&(kx, ky), tile) in &self.tiles {
            if let Some(local) = tile.bounding_rect() {
                let offset = (
                    f64::from(kx) * f64::from(TILE_SIZE),
                    f64::from(ky) * f64::from(TILE_SIZE),
                );
                let rect = Rect::new(
                    local.x0 + offset.0,
                    local.y0 + offset.1,
                    local.x1 + offset.0,
                    local.y1 + offset.1,
                );
                union = Some(match union {
                    Some(u) => u.union(rect),
                    None => rect,
                });
            }
        }
        union
    }

    /// Drop tiles that have become fully transparent.
    pub fn shrink(&mut self) {
        self.tiles.retain(|_, tile| !tile.is_blank());
    }

    /// Fill `rect` with `color`, optionally clipped by an 8-bit coverage
    /// mask anchored at the canvas origin.
    pub fn fill(
        &mut self,
        color: Px,
        rect: Rect,
        clip: Option<&image::GrayImage>,
        blend: DrawBlend,
    ) {
        let rect = rect.expand();
        for key in Self::keys_for_rect(rect) {
            let tile = self.ensure(key);
            let ox = i64::from(key.0) * i64::from(TILE_SIZE);
            let oy = i64::from(key.1) * i64::from(TILE_SIZE);
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
                    let coverage = match clip {
                        Some(mask) => {
                            if cx < 0
                                || cy < 0
                                || cx >= i64::from(mask.width())
                                || cy >= i64::from(mask.height())
                            {
                                0.0
                            } else {
                                f32::from(mask.get_pixel(cx as u32, cy as u32).0[0]) / 255.0
                            }
                        }
                        None => 1.0,
                    };
                    if coverage == 0.0 {
                        continue;
                    }
                    let src = blend::scale(color, coverage);
                    let out = match blend {
                        DrawBlend::Src => src,
                        DrawBlend::SrcOver => blend::src_over(src, tile.get(tx, ty)),
                    };
                    tile.put(tx, ty, out);
                }
            }
        }
        self.shrink();
    }

    /// Rasterize `src` into the affected tiles under a 2D affine transform.
    /// The source rectangle is split correctly across destination tiles when
    /// the transform is not tile-aligned; sampling is bilinear.
    pub fn draw_texture(&mut self, src: &Texture, transform: Affine, blend: DrawBlend) {
        let src_rect = Rect::new(0.0, 0.0, f64::from(src.width()), f64::from(src.height()));
        let dst_rect = transform.transform_rect_bbox(src_rect).expand();
        if dst_rect.width() <= 0.0 || dst_rect.height() <= 0.0 {
            return;
        }
        let inverse = transform.inverse();
        for key in Self::keys_for_rect(dst_rect) {
            let tile = self.ensure(key);
            let ox = f64::from(key.0) * f64::from(TILE_SIZE);
            let oy = f64::from(key.1) * f64::from(TILE_SIZE);
            for ty in 0..TILE_SIZE {
                for tx in 0..TILE_SIZE {
                    let cx = ox + f64::from(tx) + 0.5;
                    let cy = oy + f64::from(ty) + 0.5;
                    if cx < dst_rect.x0 || cx >= dst_rect.x1 || cy < dst_rect.y0 || cy >= dst_rect.y1
                    {
                        continue;
                    }
                    let src_pos = inverse * Point::new(cx, cy);
                    if src_pos.x < 0.0
                        || src_pos.y < 0.0
                        || src_pos.x > f64::from(src.width())
                        || src_pos.y > f64::from(src.height())
                    {
                        continue;
                    }
                    let sampled = src.sample(src_pos);
                    let out = match blend {
                        DrawBlend::Src => sampled,
                        DrawBlend::SrcOver => blend::src_over(sampled, tile.get(tx, ty)),
                    };
                    tile.put(tx, ty, out);
                }
            }
        }
        self.shrink();
    }

    /// Copy `rect` (integer canvas coordinates) out into a flat texture.
    pub fn crop_to_texture(&self, rect: Rect) -> Result<Texture, Error> {
        let rect = rect.expand();
        let width = rect.width().max(1.0) as u32;
        let height = rect.height().max(1.0) as u32;
        let mut tex = Texture::new(width, height)?;
        let x0 = rect.x0 as i64;
        let y0 = rect.y0 as i64;
        for y in 0..height {
            for x in 0..width {
                let cx = x0 + i64::from(x);
                let cy = y0 + i64::from(y);
                if cx >= i64::from(i32::MIN) && cx <= i64::from(i32::MAX) {
                    tex.put(x, y, self.get_pixel(cx as i32, cy as i32));
                }
            }
        }
        Ok(tex)
    }

    /// A resampled copy under an affine map.  The identity transform is a
    /// plain deep copy.
    pub fn transform(&self, transform: Affine) -> TiledTexture {
        if transform == Affine::IDENTITY {
            return self.clone();
        }
        let mut result = TiledTexture::new();
        let Some(rect) = self.bounding_rect() else {
            return result;
        };
        let new_rect = transform.transform_rect_bbox(rect).expand();
        let inverse = transform.inverse();
        for key in Self::keys_for_rect(new_rect) {
            let mut tile = Tile::new();
            let ox = f64::from(key.0) * f64::from(TILE_SIZE);
            let oy = f64::from(key.1) * f64::from(TILE_SIZE);
            for ty in 0..TILE_SIZE {
                for tx in 0..TILE_SIZE {
                    let pos = inverse * Point::new(ox + f64::from(tx) + 0.5, oy + f64::from(ty) + 0.5);
                    tile.put(tx, ty, self.sample(pos));
                }
            }
            result.set(key, tile);
        }
        result.shrink();
        result
    }

    /// Import an 8-bit image with its top-left corner at `offset`,
    /// premultiplying.  Tiles are converted in parallel; fully transparent
    /// tiles are not stored.
    pub fn from_image(src: &RgbaImage, offset: (i32, i32)) -> TiledTexture {
        let rect = Rect::new(
            f64::from(offset.0),
            f64::from(offset.1),
            f64::from(offset.0) + f64::from(src.width()),
            f64::from(offset.1) + f64::from(src.height()),
        );
        let keys = Self::keys_for_rect(rect);
        let converted: Vec<(TileKey, Option<Tile>)> = keys
            .par_iter()
            .map(|&key| {
                let ox = i64::from(key.0) * i64::from(TILE_SIZE) - i64::from(offset.0);
                let oy = i64::from(key.1) * i64::from(TILE_SIZE) - i64::from(offset.1);
                let mut tile = Tile::new();
                let mut has_content = false;
                for ty in 0..TILE_SIZE {
                    for tx in 0..TILE_SIZE {
                        let sx = ox + i64::from(tx);
                        let sy = oy + i64::from(ty);
                        if sx < 0
                            || sy < 0
                            || sx >= i64::from(src.width())
                            || sy >= i64::from(src.height())
                        {
                            continue;
                        }
                        let p = src.get_pixel(sx as u32, sy as u32).0;
                        if p[3] == 0 {
                            continue;
                        }
                        has_content = true;
                        let a = f32::from(p[3]) / 255.0;
                        tile.put(
                            tx,
                            ty,
                            [
                                f32::from(p[0]) / 255.0 * a,
                                f32::from(p[1]) / 255.0 * a,
                                f32::from(p[2]) / 255.0 * a,
                                a,
                            ],
                        );
                    }
                }
                (key, has_content.then_some(tile))
            })
            .collect();

        let mut out = TiledTexture::new();
        for (key, tile) in converted {
            if let Some(tile) = tile {
                out.set(key, tile);
            }
        }
        out
    }

    /// Export the sparse tile set as `(key, pixel-buffer)` pairs.
    pub fn to_data(&self) -> TiledTextureData {
        let mut tiles: Vec<(TileKey, Vec<u16>)> = self
            .tiles
            .iter()
            .map(|(&key, tile)| (key, tile.to_data()))
            .collect();
        tiles.sort_by_key(|&(key, _)| (key.1, key.0));
        TiledTextureData {
            tile_size: TILE_SIZE,
            tiles,
        }
    }

    /// Rebuild from serialized tile data.  Fails if the tile size does not
    /// match this build's tile size.
    pub fn from_data(data: &TiledTextureData) -> Result<TiledTexture, Error> {
        if data.tile_size != TILE_SIZE {
            return Err(Error::TileSizeIncompatible {
                expected: TILE_SIZE,
                found: data.tile_size,
            });
        }
        let mut out = TiledTexture::new();
        for (key, bits) in &data.tiles {
            out.set(*key, Tile::from_data(bits)?);
        }
        Ok(out)
    }

    /// Exactly the tile keys whose extent intersects `rect`, no duplicates.
    pub fn keys_for_rect(rect: Rect) -> Vec<TileKey> {
        if rect.width() <= 0.0 || rect.height() <= 0.0 {
            return Vec::new();
        }
        let size = i64::from(TILE_SIZE);
        let left = (rect.x0.floor() as i64).div_euclid(size);
        let right = ((rect.x1.ceil() as i64) - 1).div_euclid(size);
        let top = (rect.y0.floor() as i64).div_euclid(size);
        let bottom = ((rect.y1.ceil() as i64) - 1).div_euclid(size);

        let clamp = |v: i64| v.clamp(-i64::from(MAX_TILE_COORD), i64::from(MAX_TILE_COORD)) as i32;
        let (left, right) = (clamp(left), clamp(right));
        let (top, bottom) = (clamp(top), clamp(bottom));

        let mut keys = Vec::with_capacity(
            ((right - left + 1) as usize).saturating_mul((bottom - top + 1) as usize),
        );
        for y in top..=bottom {
            for x in left..=right {
                keys.push((x, y));
            }
        }
        keys
    }

    /// Union of several key sets, deduplicated.
    pub fn union_keys<I>(sets: I) -> Vec<TileKey>
    where
        I: IntoIterator,
        I::Item: IntoIterator<Item = TileKey>,
    {
        let mut keys: Vec<TileKey> = sets.into_iter().flatten().collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }
}

fn key_for_pixel(x: i32, y: i32) -> TileKey {
    (
        x.div_euclid(TILE_SIZE as i32),
        y.div_euclid(TILE_SIZE as i32),
    )
}

fn clamp_key(key: TileKey) -> TileKey {
    if key.0.abs() > MAX_TILE_COORD || key.1.abs() > MAX_TILE_COORD {
        tracing::warn!(?key, "tile key out of range, clamped");
        (
            key.0.clamp(-MAX_TILE_COORD, MAX_TILE_COORD),
            key.1.clamp(-MAX_TILE_COORD, MAX_TILE_COORD),
        )
    } else {
        key
    }
}
