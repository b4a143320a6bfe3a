//! Keeps the user's focal point fixed while the page raster changes size.
//!
//! Every zoom, rotation or inversion change produces a new buffer with new
//! pixel dimensions. Before the buffer is replaced, each surface records where
//! the center of its viewport sits as a fraction of the content on each axis;
//! afterwards the scroll offset is recomputed so the same fraction is centered
//! again. The Normal and Fullscreen surfaces are handled independently by the
//! same code, so switching between them never jumps.

use std::sync::Arc;

use tracing::debug;

use crate::error::ViewerError;
use crate::view::{Surface, ViewState};
use crate::{DocumentBackend, RenderImage, RenderRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollOffset {
    pub x: i64,
    pub y: i64,
}

impl ScrollOffset {
    pub const fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

/// Viewport center as a fraction of the content extent, per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocalPoint {
    pub x: f64,
    pub y: f64,
}

pub fn focal_fraction(offset: i64, viewport: u32, content: u32) -> f64 {
    if content > viewport {
        (offset as f64 + f64::from(viewport) / 2.0) / f64::from(content)
    } else {
        0.5
    }
}

/// Offset that puts `fraction` of `content` at the viewport center. Not
/// clamped; `SurfaceViewport::scroll_to` applies the scroll range.
pub fn recentered_offset(fraction: f64, viewport: u32, content: u32) -> i64 {
    if content > viewport {
        (fraction * f64::from(content) - f64::from(viewport) / 2.0).round() as i64
    } else {
        0
    }
}

fn max_offset(content: u32, viewport: u32) -> i64 {
    i64::from(content.saturating_sub(viewport))
}

/// Scroll state of one presentation surface.
#[derive(Debug, Clone, Default)]
pub struct SurfaceViewport {
    scroll: ScrollOffset,
    viewport: Size,
    content: Size,
}

impl SurfaceViewport {
    pub fn new(viewport: Size) -> Self {
        Self {
            viewport,
            ..Self::default()
        }
    }

    pub fn scroll_offset(&self) -> ScrollOffset {
        self.scroll
    }

    pub fn viewport_size(&self) -> Size {
        self.viewport
    }

    pub fn content_size(&self) -> Size {
        self.content
    }

    pub fn scroll_to(&mut self, x: i64, y: i64) {
        self.scroll = ScrollOffset {
            x: x.clamp(0, max_offset(self.content.width, self.viewport.width)),
            y: y.clamp(0, max_offset(self.content.height, self.viewport.height)),
        };
    }

    pub fn scroll_by(&mut self, delta_x: i64, delta_y: i64) {
        self.scroll_to(
            self.scroll.x.saturating_add(delta_x),
            self.scroll.y.saturating_add(delta_y),
        );
    }

    pub fn set_viewport_size(&mut self, viewport: Size) {
        self.viewport = viewport;
        self.scroll_to(self.scroll.x, self.scroll.y);
    }

    pub fn focal_point(&self) -> FocalPoint {
        FocalPoint {
            x: focal_fraction(self.scroll.x, self.viewport.width, self.content.width),
            y: focal_fraction(self.scroll.y, self.viewport.height, self.content.height),
        }
    }

    /// Adopts new content dimensions and centers `focal` again.
    pub fn recenter(&mut self, focal: FocalPoint, content: Size) {
        self.content = content;
        let x = recentered_offset(focal.x, self.viewport.width, content.width);
        let y = recentered_offset(focal.y, self.viewport.height, content.height);
        self.scroll_to(x, y);
    }

    fn reset(&mut self, content: Size) {
        self.content = content;
        self.scroll = ScrollOffset::default();
    }
}

/// Owns the displayed buffer and the scroll state of both surfaces.
#[derive(Debug, Default)]
pub struct ReconciliationEngine {
    buffer: Option<Arc<RenderImage>>,
    normal: SurfaceViewport,
    fullscreen: SurfaceViewport,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> Option<Arc<RenderImage>> {
        self.buffer.clone()
    }

    pub fn surface(&self, surface: Surface) -> &SurfaceViewport {
        match surface {
            Surface::Normal => &self.normal,
            Surface::Fullscreen => &self.fullscreen,
        }
    }

    fn surface_mut(&mut self, surface: Surface) -> &mut SurfaceViewport {
        match surface {
            Surface::Normal => &mut self.normal,
            Surface::Fullscreen => &mut self.fullscreen,
        }
    }

    pub fn resize(&mut self, surface: Surface, viewport: Size) {
        self.surface_mut(surface).set_viewport_size(viewport);
    }

    /// Direct manipulation: moves the content opposite to the pointer motion.
    pub fn pan(&mut self, surface: Surface, pointer_dx: i64, pointer_dy: i64) {
        self.surface_mut(surface)
            .scroll_by(pointer_dx.saturating_neg(), pointer_dy.saturating_neg());
    }

    /// Re-renders `page_index` for `view` and restores every surface's focal
    /// point. On error nothing is changed.
    pub fn reconcile(
        &mut self,
        backend: &dyn DocumentBackend,
        page_index: usize,
        view: &ViewState,
    ) -> Result<(), ViewerError> {
        let focal: Vec<(Surface, FocalPoint)> = Surface::ALL
            .iter()
            .map(|&surface| (surface, self.surface(surface).focal_point()))
            .collect();

        let image = rasterize(backend, page_index, view)?;
        let content = Size::new(image.width, image.height);

        for (surface, point) in focal {
            let viewport = self.surface_mut(surface);
            let before = viewport.scroll_offset();
            viewport.recenter(point, content);
            debug!(
                ?surface,
                ?before,
                after = ?viewport.scroll_offset(),
                width = content.width,
                height = content.height,
                "recentered surface"
            );
        }
        self.buffer = Some(Arc::new(image));
        Ok(())
    }

    /// Renders the first view of a newly opened document. Scroll state
    /// starts over because the old offsets describe different content.
    pub fn load(
        &mut self,
        backend: &dyn DocumentBackend,
        page_index: usize,
        view: &ViewState,
    ) -> Result<(), ViewerError> {
        let image = rasterize(backend, page_index, view)?;
        let content = Size::new(image.width, image.height);
        self.normal.reset(content);
        self.fullscreen.reset(content);
        self.buffer = Some(Arc::new(image));
        Ok(())
    }
}

fn rasterize(
    backend: &dyn DocumentBackend,
    page_index: usize,
    view: &ViewState,
) -> Result<RenderImage, ViewerError> {
    let request = RenderRequest {
        page_index,
        scale: view.zoom(),
        rotation: view.rotation(),
    };
    let mut image = backend
        .render_page(request)
        .map_err(|err| ViewerError::Render {
            page: page_index,
            reason: format!("{err:#}"),
        })?;

    if !image.is_well_formed() {
        return Err(ViewerError::Render {
            page: page_index,
            reason: format!(
                "rasterizer returned a malformed {}x{} buffer (stride {}, {} bytes)",
                image.width,
                image.height,
                image.stride,
                image.pixels.len()
            ),
        });
    }

    if view.inverted() {
        invert_pixels(&mut image);
    }
    Ok(image)
}

pub fn invert_pixels(image: &mut RenderImage) {
    let row_bytes = image.row_bytes();
    if image.stride == 0 {
        return;
    }
    for row in image.pixels.chunks_mut(image.stride) {
        let end = row_bytes.min(row.len());
        for sample in &mut row[..end] {
            *sample = 255 - *sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DocumentInfo, DocumentMetadata};
    use anyhow::{anyhow, Result};
    use proptest::prelude::*;
    use std::path::PathBuf;

    /// Renders a page of `base` pixels at scale 1, rotated like pdfium does.
    struct SizedBackend {
        info: DocumentInfo,
        base: Size,
        fail: bool,
    }

    impl SizedBackend {
        fn new(width: u32, height: u32) -> Self {
            Self {
                info: DocumentInfo {
                    id: crate::document_id_for_path(&PathBuf::from("/tmp/sized.pdf")),
                    path: PathBuf::from("/tmp/sized.pdf"),
                    page_count: 1,
                    metadata: DocumentMetadata::default(),
                },
                base: Size::new(width, height),
                fail: false,
            }
        }
    }

    impl DocumentBackend for SizedBackend {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
            if self.fail {
                return Err(anyhow!("corrupt content stream"));
            }
            let width = (f64::from(self.base.width) * request.scale).round() as u32;
            let height = (f64::from(self.base.height) * request.scale).round() as u32;
            let (width, height) = if request.rotation.is_sideways() {
                (height, width)
            } else {
                (width, height)
            };
            Ok(RenderImage::filled(width, height, [10, 20, 30]))
        }
    }

    fn engine_with(content: Size, viewport: Size, offset: ScrollOffset) -> ReconciliationEngine {
        let mut engine = ReconciliationEngine::new();
        for surface in Surface::ALL {
            let view = engine.surface_mut(surface);
            view.reset(content);
            view.set_viewport_size(viewport);
            view.scroll_to(offset.x, offset.y);
        }
        engine
    }

    #[test]
    fn half_scale_round_trip_preserves_focal_fraction() {
        let mut viewport = SurfaceViewport::new(Size::new(500, 600));
        viewport.reset(Size::new(2000, 3000));
        viewport.scroll_to(300, 400);

        let focal = viewport.focal_point();
        assert!((focal.x - 0.275).abs() < 1e-12);
        assert!((focal.y - 700.0 / 3000.0).abs() < 1e-12);

        viewport.recenter(focal, Size::new(1000, 1500));
        assert_eq!(viewport.scroll_offset(), ScrollOffset::new(25, 50));

        let after = viewport.focal_point();
        assert!((after.x - focal.x).abs() * 1000.0 <= 1.0);
        assert!((after.y - focal.y).abs() * 1500.0 <= 1.0);
    }

    #[test]
    fn content_smaller_than_viewport_has_centered_fraction_and_zero_offset() {
        let mut viewport = SurfaceViewport::new(Size::new(800, 800));
        viewport.reset(Size::new(400, 300));
        viewport.scroll_to(50, 50);
        assert_eq!(viewport.scroll_offset(), ScrollOffset::default());
        assert_eq!(viewport.focal_point(), FocalPoint { x: 0.5, y: 0.5 });

        viewport.recenter(FocalPoint { x: 0.5, y: 0.5 }, Size::new(700, 600));
        assert_eq!(viewport.scroll_offset(), ScrollOffset::default());
    }

    #[test]
    fn content_growing_past_viewport_is_centered() {
        let mut viewport = SurfaceViewport::new(Size::new(500, 500));
        viewport.reset(Size::new(400, 400));
        let focal = viewport.focal_point();
        viewport.recenter(focal, Size::new(1000, 2000));
        assert_eq!(viewport.scroll_offset(), ScrollOffset::new(250, 750));
    }

    #[test]
    fn scroll_to_clamps_to_scrollable_range() {
        let mut viewport = SurfaceViewport::new(Size::new(100, 100));
        viewport.reset(Size::new(300, 150));
        viewport.scroll_to(-20, 500);
        assert_eq!(viewport.scroll_offset(), ScrollOffset::new(0, 50));
        viewport.scroll_to(1000, -1);
        assert_eq!(viewport.scroll_offset(), ScrollOffset::new(200, 0));
    }

    #[test]
    fn shrinking_content_clamps_recentered_offset() {
        let mut viewport = SurfaceViewport::new(Size::new(500, 500));
        viewport.reset(Size::new(2000, 2000));
        viewport.scroll_to(0, 1500);
        let focal = viewport.focal_point();
        viewport.recenter(focal, Size::new(600, 600));
        assert_eq!(viewport.scroll_offset(), ScrollOffset::new(0, 100));
    }

    #[test]
    fn reconcile_recenters_both_surfaces_independently() {
        let backend = SizedBackend::new(1000, 1500);
        let mut engine = ReconciliationEngine::new();
        let mut view = ViewState::default();
        engine.resize(Surface::Normal, Size::new(500, 600));
        engine.resize(Surface::Fullscreen, Size::new(800, 1000));
        view.set_zoom(2.0).unwrap();
        engine.load(&backend, 0, &view).unwrap();

        engine.surface_mut(Surface::Normal).scroll_to(300, 400);
        engine.surface_mut(Surface::Fullscreen).scroll_to(1000, 100);
        let normal_before = engine.surface(Surface::Normal).focal_point();

        view.set_zoom(1.0).unwrap();
        engine.reconcile(&backend, 0, &view).unwrap();

        let normal = engine.surface(Surface::Normal);
        let full = engine.surface(Surface::Fullscreen);
        assert_eq!(normal.content_size(), Size::new(1000, 1500));
        assert_eq!(full.content_size(), Size::new(1000, 1500));
        assert_eq!(normal.scroll_offset(), ScrollOffset::new(25, 50));
        assert_eq!(full.scroll_offset(), ScrollOffset::new(200, 0));

        let normal_after = normal.focal_point();
        assert!((normal_after.x - normal_before.x).abs() * 1000.0 <= 1.0);
        assert!((normal_after.y - normal_before.y).abs() * 1500.0 <= 1.0);
    }

    #[test]
    fn reconcile_swaps_axes_on_quarter_turn() {
        let backend = SizedBackend::new(600, 800);
        let mut engine = engine_with(
            Size::new(600, 800),
            Size::new(300, 300),
            ScrollOffset::new(0, 0),
        );
        let mut view = ViewState::default();
        view.rotate(crate::RotateDirection::Clockwise);
        engine.reconcile(&backend, 0, &view).unwrap();
        assert_eq!(
            engine.surface(Surface::Normal).content_size(),
            Size::new(800, 600)
        );
        assert_eq!(
            engine.buffer().map(|b| (b.width, b.height)),
            Some((800, 600))
        );
    }

    #[test]
    fn failed_render_leaves_buffer_and_offsets_untouched() {
        let mut backend = SizedBackend::new(1000, 1000);
        let mut engine = ReconciliationEngine::new();
        engine.resize(Surface::Normal, Size::new(200, 200));
        engine.load(&backend, 0, &ViewState::default()).unwrap();
        engine.surface_mut(Surface::Normal).scroll_to(120, 340);
        let before = engine.buffer();

        backend.fail = true;
        let mut view = ViewState::default();
        view.set_zoom(2.0).unwrap();
        let err = engine.reconcile(&backend, 0, &view).unwrap_err();
        assert!(matches!(err, ViewerError::Render { page: 0, .. }));

        assert!(Arc::ptr_eq(&before.unwrap(), &engine.buffer().unwrap()));
        assert_eq!(
            engine.surface(Surface::Normal).scroll_offset(),
            ScrollOffset::new(120, 340)
        );
        assert_eq!(
            engine.surface(Surface::Normal).content_size(),
            Size::new(1000, 1000)
        );
    }

    #[test]
    fn inverted_view_flips_every_sample() {
        let backend = SizedBackend::new(2, 2);
        let mut engine = ReconciliationEngine::new();
        let mut view = ViewState::default();
        view.toggle_invert();
        engine.load(&backend, 0, &view).unwrap();
        let buffer = engine.buffer().unwrap();
        assert!(buffer
            .pixels
            .chunks_exact(3)
            .all(|px| px == [245, 235, 225]));
    }

    #[test]
    fn invert_skips_row_padding() {
        let mut image = RenderImage {
            width: 1,
            height: 2,
            stride: 4,
            pixels: vec![0, 10, 20, 99, 30, 40, 50, 99],
        };
        invert_pixels(&mut image);
        assert_eq!(image.pixels, vec![255, 245, 235, 99, 225, 215, 205, 99]);
    }

    #[test]
    fn pan_moves_against_pointer_and_clamps() {
        let mut engine = engine_with(
            Size::new(1000, 1000),
            Size::new(400, 400),
            ScrollOffset::new(100, 100),
        );
        engine.pan(Surface::Normal, 30, -50);
        assert_eq!(
            engine.surface(Surface::Normal).scroll_offset(),
            ScrollOffset::new(70, 150)
        );
        assert_eq!(
            engine.surface(Surface::Fullscreen).scroll_offset(),
            ScrollOffset::new(100, 100)
        );
        engine.pan(Surface::Normal, 500, -5000);
        assert_eq!(
            engine.surface(Surface::Normal).scroll_offset(),
            ScrollOffset::new(0, 600)
        );
    }

    #[test]
    fn resize_reclamps_without_rerendering() {
        let mut engine = engine_with(
            Size::new(1000, 1000),
            Size::new(400, 400),
            ScrollOffset::new(600, 600),
        );
        let before = engine.buffer();
        engine.resize(Surface::Normal, Size::new(900, 900));
        assert_eq!(
            engine.surface(Surface::Normal).scroll_offset(),
            ScrollOffset::new(100, 100)
        );
        assert_eq!(before.is_none(), engine.buffer().is_none());
    }

    proptest! {
        #[test]
        fn zooming_in_keeps_focal_point_within_a_pixel(
            content in 100u32..4000,
            viewport in 10u32..2000,
            offset_ratio in 0.0f64..=1.0,
            growth in 1.0f64..8.0,
        ) {
            prop_assume!(content > viewport);
            let mut surface = SurfaceViewport::new(Size::new(viewport, viewport));
            surface.reset(Size::new(content, content));
            let offset = (offset_ratio * f64::from(content - viewport)).round() as i64;
            surface.scroll_to(offset, offset);
            let focal = surface.focal_point();

            let grown = (f64::from(content) * growth).round() as u32;
            surface.recenter(focal, Size::new(grown, grown));

            let center = surface.scroll_offset().x as f64 + f64::from(viewport) / 2.0;
            prop_assert!((center - focal.x * f64::from(grown)).abs() <= 1.0);
        }

        #[test]
        fn focal_fraction_is_within_unit_interval(
            content in 1u32..10_000,
            viewport in 0u32..10_000,
            offset in 0i64..10_000,
        ) {
            let offset = offset.min(max_offset(content, viewport));
            let fraction = focal_fraction(offset, viewport, content);
            prop_assert!((0.0..=1.0).contains(&fraction));
        }
    }
}
