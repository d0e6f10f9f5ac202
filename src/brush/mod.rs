//! Stroke pipeline: raw pointer samples are stabilized, resampled along a
//! centripetal Catmull-Rom curve into evenly spaced dab centers, and
//! rendered into a per-stroke scratch texture that commits as one undo step.

pub mod curve;
pub mod dab;
pub mod stabilize;
pub mod waypoint;

use kurbo::Rect;
use serde::{Deserialize, Serialize};

use crate::blend::Px;
use crate::blender::TileReplacer;
use crate::layer::LayerPath;
use crate::picture::Picture;
use crate::undo::UndoStack;

use curve::CurveFilter;
use dab::DabRenderer;
use stabilize::StabilizeFilter;
use waypoint::Waypoint;

// ============================================================================
// BRUSH PRESETS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum BrushEngine {
    /// Direct deposit: soft disc composited src-over (dst-out when erasing).
    Pen { eraser: bool },
    /// Wet mix: reads back the color under the dab and drags it along.
    Watercolor { blending: f32, thickness: f32 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrushPreset {
    pub title: String,
    /// Brush diameter in canvas units.
    pub width: f64,
    pub opacity: f32,
    /// Fraction of the radius used for the soft edge.
    pub softness: f64,
    /// Diameter at pressure 0, as a fraction of `width`.
    pub min_width_ratio: f64,
    pub stabilizing_level: usize,
    /// Dab spacing as a fraction of the pressure-adjusted diameter.
    pub spacing_ratio: f64,
    /// Premultiplied stroke color.
    pub color: Px,
    pub engine: BrushEngine,
}

impl BrushPreset {
    pub fn pen() -> Self {
        Self {
            title: "Pen".into(),
            width: 10.0,
            opacity: 1.0,
            softness: 0.5,
            min_width_ratio: 0.5,
            stabilizing_level: 2,
            spacing_ratio: 0.1,
            color: [0.0, 0.0, 0.0, 1.0],
            engine: BrushEngine::Pen { eraser: false },
        }
    }

    pub fn eraser() -> Self {
        Self {
            title: "Eraser".into(),
            engine: BrushEngine::Pen { eraser: true },
            ..Self::pen()
        }
    }

    pub fn watercolor() -> Self {
        Self {
            title: "Watercolor".into(),
            min_width_ratio: 1.0,
            engine: BrushEngine::Watercolor {
                blending: 0.5,
                thickness: 0.5,
            },
            ..Self::pen()
        }
    }

    /// Pressure-adjusted diameter.
    pub fn brush_size(&self, wp: &Waypoint) -> f64 {
        self.width * (self.min_width_ratio + (1.0 - self.min_width_ratio) * wp.pressure)
    }

    /// Arc-length between dab centers, never below one canvas unit.
    pub fn brush_spacing(&self, wp: &Waypoint) -> f64 {
        (self.brush_size(wp) * self.spacing_ratio).max(1.0)
    }
}

// ============================================================================
// BRUSH TOOL — the assembled pipeline
// ============================================================================

/// Stabilize → curve-resample → render, driven one pointer sample at a time.
pub struct BrushTool {
    stabilize: StabilizeFilter,
    curve: CurveFilter,
    renderer: DabRenderer,
}

impl BrushTool {
    pub fn new(preset: BrushPreset) -> Self {
        let level = preset.stabilizing_level;
        Self {
            stabilize: StabilizeFilter::new(level),
            curve: CurveFilter::new(),
            renderer: DabRenderer::new(preset),
        }
    }

    pub fn preset(&self) -> &BrushPreset {
        self.renderer.preset()
    }

    pub fn preset_mut(&mut self) -> &mut BrushPreset {
        self.renderer.preset_mut()
    }

    pub fn is_active(&self) -> bool {
        self.renderer.is_active()
    }

    pub fn tile_replacer(&self) -> Option<TileReplacer<'_>> {
        self.renderer.tile_replacer()
    }

    pub fn begin_stroke(&mut self, picture: &mut Picture, undo: &mut UndoStack, path: LayerPath) {
        self.stabilize = StabilizeFilter::new(self.renderer.preset().stabilizing_level);
        self.curve = CurveFilter::new();
        self.renderer.start(picture, undo, path);
    }

    // The closure captures only copied preset fields, so opt out of
    // capturing `self`'s lifetime.
    fn spacing_fn(&self) -> impl Fn(&Waypoint) -> f64 + use<> {
        let preset = self.renderer.preset();
        let width = preset.width;
        let min_width_ratio = preset.min_width_ratio;
        let spacing_ratio = preset.spacing_ratio;
        move |wp: &Waypoint| {
            (width * (min_width_ratio + (1.0 - min_width_ratio) * wp.pressure) * spacing_ratio)
                .max(1.0)
        }
    }

    /// Feed one raw pointer sample through the pipeline.
    pub fn next_waypoint(&mut self, picture: &mut Picture, waypoint: Waypoint) {
        let spacing = self.spacing_fn();
        let mut stabilized = Vec::new();
        self.stabilize.next(waypoint, &mut stabilized);
        let mut dabs = Vec::new();
        for wp in stabilized {
            self.curve.next(wp, &spacing, &mut dabs);
        }
        if !dabs.is_empty() {
            self.renderer.next_waypoints(picture, &dabs);
        }
    }

    /// Flush the filters and commit the stroke.  Returns the edited canvas
    /// rectangle recorded on the undo command, if anything was drawn.
    pub fn end_stroke(&mut self, picture: &mut Picture, undo: &mut UndoStack) -> Option<Rect> {
        let spacing = self.spacing_fn();
        let mut stabilized = Vec::new();
        self.stabilize.finish(&mut stabilized);
        let mut dabs = Vec::new();
        for wp in stabilized {
            self.curve.next(wp, &spacing, &mut dabs);
        }
        self.curve.finish(&spacing, &mut dabs);
        if !dabs.is_empty() {
            self.renderer.next_waypoints(picture, &dabs);
        }
        self.renderer.end_stroke(picture, undo)
    }

    pub fn cancel(&mut self, picture: &mut Picture) {
        self.stabilize = StabilizeFilter::new(self.renderer.preset().stabilizing_level);
        self.curve = CurveFilter::new();
        self.renderer.cancel(picture);
    }
}
