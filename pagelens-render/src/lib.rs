use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pagelens_core::{
    document_id_for_path, DocumentBackend, DocumentInfo, DocumentMetadata, DocumentProvider,
    RenderImage, RenderRequest, Rotation,
};
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

pub const PDFIUM_LIBRARY_ENV: &str = "PAGELENS_PDFIUM_LIBRARY_PATH";

pub struct PdfiumRenderFactory {
    pdfium: Arc<Pdfium>,
}

impl PdfiumRenderFactory {
    /// Binds pdfium from `library` if given, then from
    /// `PAGELENS_PDFIUM_LIBRARY_PATH`, then the working directory, then the
    /// system library path.
    pub fn new(library: Option<&Path>) -> Result<Self> {
        let pdfium = match library {
            Some(path) => bind_pdfium_at(path)?,
            None => match bind_pdfium_from_env() {
                Some(pdfium) => pdfium,
                None => bind_pdfium_default()?,
            },
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumRenderFactory {
    async fn open(&self, path: &Path) -> Result<Arc<dyn DocumentBackend>> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let info = build_document_info(&self.pdfium, &absolute)?;
        Ok(Arc::new(PdfiumDocument::new(
            Arc::clone(&self.pdfium),
            absolute,
            info,
        )))
    }
}

struct PdfiumDocument {
    // Declared before `pdfium` so it is dropped first.
    document: Mutex<Option<PdfDocument<'static>>>,
    cache: Mutex<Option<RenderCacheEntry>>,
    pdfium: Arc<Pdfium>,
    path: PathBuf,
    info: DocumentInfo,
}

struct RenderCacheEntry {
    request: RenderRequest,
    image: RenderImage,
}

impl PdfiumDocument {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf, info: DocumentInfo) -> Self {
        Self {
            document: Mutex::new(None),
            cache: Mutex::new(None),
            pdfium,
            path,
            info,
        }
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        // SAFETY: the document borrows the bindings owned by `self.pdfium`. It is
        // stored in `self.document`, which is declared before `self.pdfium` and
        // therefore dropped before it, so the borrow never outlives the bindings.
        let document =
            unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.open_document()?);
        }
        match guard.as_ref() {
            Some(document) => f(document),
            None => Err(anyhow!("document {:?} is not loaded", self.path)),
        }
    }

    fn render_internal(
        &self,
        document: &PdfDocument<'_>,
        request: &RenderRequest,
    ) -> Result<RenderImage> {
        let page_index: PdfPageIndex = request
            .page_index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", request.page_index))?;
        let page = document
            .pages()
            .get(page_index)
            .with_context(|| format!("page {} out of range", request.page_index))?;

        let scale = effective_scale(request.scale, page.width().value, page.height().value);
        let config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .rotate(pdfium_rotation(request.rotation), true);
        let bitmap = page
            .render_with_config(&config)
            .with_context(|| format!("failed to render page {}", request.page_index))?;
        let image = bitmap.as_image().to_rgb8();
        let (width, height) = image.dimensions();

        Ok(RenderImage {
            width,
            height,
            stride: width as usize * RenderImage::CHANNELS,
            pixels: image.into_raw(),
        })
    }
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.request == request {
                    return Ok(entry.image.clone());
                }
            }
        }

        let image = self.with_document(|document| self.render_internal(document, &request))?;
        debug!(width = image.width, height = image.height, "rendered page");

        let mut cache = self.cache.lock();
        *cache = Some(RenderCacheEntry {
            request,
            image: image.clone(),
        });

        Ok(image)
    }
}

/// Pdfium convention: scale in unrotated page space, then rotate the
/// output, swapping the target dimensions for quarter turns.
fn pdfium_rotation(rotation: Rotation) -> PdfPageRenderRotation {
    match rotation {
        Rotation::Deg0 => PdfPageRenderRotation::None,
        Rotation::Deg90 => PdfPageRenderRotation::Degrees90,
        Rotation::Deg180 => PdfPageRenderRotation::Degrees180,
        Rotation::Deg270 => PdfPageRenderRotation::Degrees270,
    }
}

/// Scale factor for pdfium. Pages are never rendered below one pixel on
/// their short side, so tiny zoom levels still produce a buffer.
fn effective_scale(zoom: f64, page_width: f32, page_height: f32) -> f32 {
    let zoom = zoom as f32;
    let short_side = page_width.min(page_height);
    if !short_side.is_finite() || short_side <= 0.0 {
        return zoom;
    }
    zoom.max(1.0 / short_side)
}

fn build_document_info(pdfium: &Pdfium, path: &Path) -> Result<DocumentInfo> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("failed to open {:?}", path))?;
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());

    Ok(DocumentInfo {
        id: document_id_for_path(path),
        path: path.to_path_buf(),
        page_count,
        metadata: DocumentMetadata { title, author },
    })
}

fn bind_pdfium_at(path: &Path) -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_library(path)
        .map_err(|err| anyhow!("failed to load pdfium from {}: {}", path.display(), err))?;
    Ok(Pdfium::new(bindings))
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    let path = std::env::var_os(PDFIUM_LIBRARY_ENV)?;
    if path.is_empty() {
        return None;
    }
    match bind_pdfium_at(Path::new(&path)) {
        Ok(pdfium) => Some(pdfium),
        Err(err) => {
            warn!(?err, "ignoring {}", PDFIUM_LIBRARY_ENV);
            None
        }
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; install it or set {} ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}
