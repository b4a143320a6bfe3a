use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod history;
pub mod reconcile;
pub mod view;

pub use config::{ViewDefaults, ViewerConfig};
pub use error::ViewerError;
pub use history::{
    FileSettingsStore, MemorySettingsStore, PersistedSettings, SettingsStore, ZoomHistory,
    ZOOM_HISTORY_LIMIT,
};
pub use reconcile::{
    focal_fraction, invert_pixels, recentered_offset, FocalPoint, ReconciliationEngine,
    ScrollOffset, Size, SurfaceViewport,
};
pub use view::{RotateDirection, Rotation, Surface, ViewState, MAX_ZOOM, MIN_ZOOM, ZOOM_STEP};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0c1f7e-5a44-5d2b-9c61-8e1b2d7a4c90").expect("valid namespace UUID")
});

pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&DOCUMENT_NAMESPACE, rendered.as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub path: PathBuf,
    pub page_count: usize,
    pub metadata: DocumentMetadata,
}

/// Uniform scale, then a quarter-turn rotation about the page origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page_index: usize,
    pub scale: f64,
    pub rotation: Rotation,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            page_index: 0,
            scale: 1.0,
            rotation: Rotation::Deg0,
        }
    }
}

/// Packed RGB8 raster. `stride` is the byte length of one row and may
/// include padding past `width * 3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub pixels: Vec<u8>,
}

impl RenderImage {
    pub const CHANNELS: usize = 3;

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let stride = width as usize * Self::CHANNELS;
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(stride * height as usize)
            .collect();
        Self {
            width,
            height,
            stride,
            pixels,
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * Self::CHANNELS
    }

    pub fn is_well_formed(&self) -> bool {
        self.stride >= self.row_bytes() && self.pixels.len() >= self.stride * self.height as usize
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.pixels[start..start + self.row_bytes()]
    }
}

pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>>;
}

#[derive(Debug, Clone)]
pub enum Command {
    ZoomIn,
    ZoomOut,
    SetZoom { value: f64 },
    SubmitZoom { text: String },
    Rotate { direction: RotateDirection },
    ToggleInvert,
    ToggleFullscreen,
    ExitFullscreen,
    /// Pointer motion while dragging, in content pixels.
    Drag { delta_x: i64, delta_y: i64 },
    ResizeSurface { surface: Surface, size: Size },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    DocumentOpened(DocumentId),
    SurfaceChanged(Surface),
    ZoomHistoryChanged,
    RedrawNeeded,
}

/// Parses free-form zoom entry.
pub fn parse_zoom_input(text: &str) -> Result<f64, ViewerError> {
    let trimmed = text.trim();
    let value: f64 = trimmed.parse().map_err(|_| ViewerError::InvalidInput {
        input: trimmed.to_string(),
    })?;
    ViewState::default().set_zoom(value)?;
    Ok(value)
}

struct OpenDocument {
    info: DocumentInfo,
    backend: Arc<dyn DocumentBackend>,
    page_index: usize,
}

pub struct Session {
    document: Option<OpenDocument>,
    view: ViewState,
    engine: ReconciliationEngine,
    history: ZoomHistory,
    events: Mutex<Vec<SessionEvent>>,
}

impl Session {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self::with_view(store, ViewState::default())
    }

    pub fn with_view(store: Arc<dyn SettingsStore>, view: ViewState) -> Self {
        Self {
            document: None,
            view,
            engine: ReconciliationEngine::new(),
            history: ZoomHistory::load(store),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn take_events(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn document(&self) -> Option<&DocumentInfo> {
        self.document.as_ref().map(|doc| &doc.info)
    }

    pub fn page_index(&self) -> Option<usize> {
        self.document.as_ref().map(|doc| doc.page_index)
    }

    pub fn buffer(&self) -> Option<Arc<RenderImage>> {
        self.engine.buffer()
    }

    pub fn surface(&self, surface: Surface) -> &SurfaceViewport {
        self.engine.surface(surface)
    }

    pub fn active_surface(&self) -> &SurfaceViewport {
        self.engine.surface(self.view.active_surface())
    }

    pub fn zoom_history(&self) -> &[f64] {
        self.history.all()
    }

    /// Initial text of the zoom-entry dialog.
    pub fn zoom_prompt(&self) -> String {
        format!("{:.3}", self.view.zoom())
    }

    pub fn zoom_suggestions(&self) -> Vec<String> {
        self.history
            .all()
            .iter()
            .map(|zoom| format!("{:.3}", zoom))
            .collect()
    }

    /// Opens `path` and shows `page_index`. On failure the previous document,
    /// if any, stays active.
    #[instrument(skip(self, provider))]
    pub async fn open_with<P: DocumentProvider + ?Sized>(
        &mut self,
        provider: &P,
        path: PathBuf,
        page_index: usize,
    ) -> Result<DocumentId, ViewerError> {
        let open_error = |reason: String| ViewerError::Open {
            path: path.clone(),
            reason,
        };
        let backend = provider
            .open(&path)
            .await
            .map_err(|err| open_error(format!("{err:#}")))?;
        let info = backend.info().clone();
        if page_index >= info.page_count {
            return Err(open_error(format!(
                "page {} out of range (document has {} pages)",
                page_index, info.page_count
            )));
        }

        self.engine
            .load(backend.as_ref(), page_index, &self.view)
            .map_err(|err| open_error(err.to_string()))?;

        info!(
            id = %info.id,
            path = %info.path.display(),
            page = page_index,
            pages = info.page_count,
            "opened document"
        );
        let id = info.id;
        self.document = Some(OpenDocument {
            info,
            backend,
            page_index,
        });
        let mut events = self.events.lock();
        events.push(SessionEvent::DocumentOpened(id));
        events.push(SessionEvent::RedrawNeeded);
        Ok(id)
    }

    pub fn apply(&mut self, command: Command) -> Result<(), ViewerError> {
        match command {
            Command::ZoomIn => self.transform(|view| {
                view.zoom_in();
                Ok(())
            }),
            Command::ZoomOut => self.transform(|view| {
                view.zoom_out();
                Ok(())
            }),
            Command::SetZoom { value } => self.transform(|view| view.set_zoom(value)),
            Command::SubmitZoom { text } => self.submit_zoom(&text),
            Command::Rotate { direction } => self.transform(|view| {
                view.rotate(direction);
                Ok(())
            }),
            Command::ToggleInvert => self.transform(|view| {
                view.toggle_invert();
                Ok(())
            }),
            Command::ToggleFullscreen => {
                self.view.toggle_fullscreen();
                self.surface_changed();
                Ok(())
            }
            Command::ExitFullscreen => {
                if self.view.is_fullscreen() {
                    self.view.exit_fullscreen();
                    self.surface_changed();
                }
                Ok(())
            }
            Command::Drag { delta_x, delta_y } => {
                let surface = self.view.active_surface();
                let before = self.engine.surface(surface).scroll_offset();
                self.engine.pan(surface, delta_x, delta_y);
                if self.engine.surface(surface).scroll_offset() != before {
                    self.events.lock().push(SessionEvent::RedrawNeeded);
                }
                Ok(())
            }
            Command::ResizeSurface { surface, size } => {
                if self.engine.surface(surface).viewport_size() != size {
                    self.engine.resize(surface, size);
                    if surface == self.view.active_surface() {
                        self.events.lock().push(SessionEvent::RedrawNeeded);
                    }
                }
                Ok(())
            }
        }
    }

    fn surface_changed(&mut self) {
        let surface = self.view.active_surface();
        info!(?surface, "switched surface");
        let mut events = self.events.lock();
        events.push(SessionEvent::SurfaceChanged(surface));
        events.push(SessionEvent::RedrawNeeded);
    }

    /// Applies a view change to a candidate, reconciles the raster against
    /// it and only then commits.
    fn transform<F>(&mut self, change: F) -> Result<(), ViewerError>
    where
        F: FnOnce(&mut ViewState) -> Result<(), ViewerError>,
    {
        let mut candidate = self.view;
        change(&mut candidate)?;
        if !self.view.transform_differs(&candidate) {
            return Ok(());
        }

        if let Some(doc) = &self.document {
            self.engine
                .reconcile(doc.backend.as_ref(), doc.page_index, &candidate)?;
            self.events.lock().push(SessionEvent::RedrawNeeded);
        }
        self.view = candidate;
        Ok(())
    }

    fn submit_zoom(&mut self, text: &str) -> Result<(), ViewerError> {
        let value = match parse_zoom_input(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(input = text, %err, "rejected zoom entry");
                return Err(err);
            }
        };
        self.transform(|view| view.set_zoom(value))?;
        match self.history.record(value) {
            Ok(true) => self.events.lock().push(SessionEvent::ZoomHistoryChanged),
            Ok(false) => {}
            Err(err) => {
                warn!(?err, zoom = value, "failed to persist zoom history");
                self.events.lock().push(SessionEvent::ZoomHistoryChanged);
            }
        }
        Ok(())
    }
}
