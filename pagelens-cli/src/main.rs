use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event::{self, DisableMouseCapture, EnableMouseCapture};
use crossterm::terminal;
use directories::ProjectDirs;
use pagelens_core::{
    Command, DocumentProvider, FileSettingsStore, Session, SessionEvent, SettingsStore, Surface,
    ViewerConfig, ViewerError,
};
use pagelens_render::PdfiumRenderFactory;
use pagelens_tty::{
    present_surface, write_status_line, EventMapper, InputMode, KittyRenderer, TerminalGeometry,
    Toolbar, UiEvent,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pagelens",
    version,
    about = "Single-page document viewer for kitty-compatible terminals"
)]
struct Args {
    /// Document to open at startup
    file: Option<PathBuf>,

    /// Page to display (0-based)
    #[arg(short = 'p', long = "page", default_value_t = 0)]
    page: usize,

    /// Configuration file to use instead of the platform default
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Directory for the zoom history and logs
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,

    /// Start on the Fullscreen surface
    #[arg(long)]
    fullscreen: bool,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut stdout = io::stdout();
        crossterm::execute!(stdout, EnableMouseCapture, cursor::Hide)?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, DisableMouseCapture, cursor::Show);
        let _ = terminal::disable_raw_mode();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pagelens", "pagelens")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| project_dirs.data_local_dir().to_path_buf());
    let _log_guard = init_logging(&data_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join(ViewerConfig::FILE_NAME));
    let config = ViewerConfig::load(&config_path)?;
    let mut view = config.initial_view()?;
    if args.fullscreen && !view.is_fullscreen() {
        view.toggle_fullscreen();
    }

    let store: Arc<dyn SettingsStore> =
        Arc::new(FileSettingsStore::new(data_dir.join("settings"))?);
    let mut session = Session::with_view(store, view);
    let provider = PdfiumRenderFactory::new(config.pdfium_library.as_deref())?;

    let mut geometry = TerminalGeometry::query()?;
    resize_surfaces(&mut session, &geometry)?;

    let mut notice = None;
    if let Some(path) = args.file.clone() {
        if let Err(err) = session.open_with(&provider, path, args.page).await {
            report(&mut notice, err);
        }
    }

    let _raw = RawModeGuard::new()?;
    let mut renderer = KittyRenderer::new(io::stdout());
    let mut mapper = EventMapper::new();
    mapper.set_surface(session.view().active_surface());
    session.take_events();
    let mut dirty = Redraw::Full;

    loop {
        match dirty {
            Redraw::Full => redraw(
                &mut renderer,
                &session,
                &geometry,
                &mapper,
                notice.as_deref(),
            )?,
            Redraw::Status => draw_status(
                &mut renderer,
                &session,
                &geometry,
                &mapper,
                notice.as_deref(),
            )?,
            Redraw::Nothing => {}
        }
        dirty = Redraw::Nothing;

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let ui_event = mapper.map_event(event::read()?);
        let mut context = EventContext {
            session: &mut session,
            mapper: &mut mapper,
            geometry: &mut geometry,
            notice: &mut notice,
        };
        match handle_event(ui_event, &mut context, &provider).await? {
            LoopAction::Continue(redraw) => dirty = redraw,
            LoopAction::Quit => break,
        }

        for event in session.take_events() {
            match event {
                SessionEvent::SurfaceChanged(surface) => {
                    mapper.set_surface(surface);
                    dirty = Redraw::Full;
                }
                SessionEvent::DocumentOpened(_) | SessionEvent::RedrawNeeded => {
                    dirty = Redraw::Full;
                }
                SessionEvent::ZoomHistoryChanged => {}
            }
        }
    }

    renderer.delete_images()?;
    renderer.clear_all()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redraw {
    Nothing,
    Status,
    Full,
}

enum LoopAction {
    Continue(Redraw),
    Quit,
}

struct EventContext<'a> {
    session: &'a mut Session,
    mapper: &'a mut EventMapper,
    geometry: &'a mut TerminalGeometry,
    notice: &'a mut Option<String>,
}

async fn handle_event<P: DocumentProvider>(
    event: UiEvent,
    ctx: &mut EventContext<'_>,
    provider: &P,
) -> Result<LoopAction> {
    match event {
        UiEvent::Command(cmd) => {
            *ctx.notice = None;
            if let Err(err) = ctx.session.apply(cmd) {
                report(ctx.notice, err);
            }
            Ok(LoopAction::Continue(Redraw::Status))
        }
        UiEvent::BeginZoomEntry => {
            ctx.mapper
                .begin_zoom_entry(ctx.session.zoom_prompt(), ctx.session.zoom_suggestions());
            Ok(LoopAction::Continue(Redraw::Status))
        }
        UiEvent::BeginOpenPath => {
            ctx.mapper.begin_open_path();
            Ok(LoopAction::Continue(Redraw::Status))
        }
        UiEvent::InputChanged { .. } | UiEvent::Cancel => {
            Ok(LoopAction::Continue(Redraw::Status))
        }
        UiEvent::ZoomSubmit { text } => {
            *ctx.notice = None;
            if let Err(err) = ctx.session.apply(Command::SubmitZoom { text: text.clone() }) {
                if matches!(
                    err,
                    ViewerError::InvalidInput { .. } | ViewerError::OutOfRange { .. }
                ) {
                    ctx.mapper.begin_zoom_entry(text, ctx.session.zoom_suggestions());
                }
                report(ctx.notice, err);
            }
            Ok(LoopAction::Continue(Redraw::Status))
        }
        UiEvent::OpenPathSubmit { path } => {
            let path = path.trim();
            if path.is_empty() {
                return Ok(LoopAction::Continue(Redraw::Status));
            }
            *ctx.notice = None;
            if let Err(err) = ctx
                .session
                .open_with(provider, PathBuf::from(path), 0)
                .await
            {
                report(ctx.notice, err);
            }
            Ok(LoopAction::Continue(Redraw::Status))
        }
        UiEvent::Drag {
            delta_columns,
            delta_rows,
        } => {
            let (delta_x, delta_y) = ctx.geometry.cell.cells_to_pixels(delta_columns, delta_rows);
            ctx.session.apply(Command::Drag { delta_x, delta_y })?;
            Ok(LoopAction::Continue(Redraw::Nothing))
        }
        UiEvent::Resize => {
            *ctx.geometry = TerminalGeometry::query()?;
            resize_surfaces(ctx.session, ctx.geometry)?;
            Ok(LoopAction::Continue(Redraw::Full))
        }
        UiEvent::Quit => Ok(LoopAction::Quit),
        UiEvent::None => Ok(LoopAction::Continue(Redraw::Nothing)),
    }
}

fn report(notice: &mut Option<String>, err: ViewerError) {
    warn!(%err, "{}", err.title());
    *notice = Some(format!("{}: {}", err.title(), err));
}

fn resize_surfaces(session: &mut Session, geometry: &TerminalGeometry) -> Result<()> {
    for surface in Surface::ALL {
        session.apply(Command::ResizeSurface {
            surface,
            size: geometry.viewport_pixels(surface),
        })?;
    }
    Ok(())
}

fn redraw(
    renderer: &mut KittyRenderer<io::Stdout>,
    session: &Session,
    geometry: &TerminalGeometry,
    mapper: &EventMapper,
    notice: Option<&str>,
) -> Result<()> {
    renderer.begin_sync_update()?;
    renderer.clear_all()?;

    let surface = session.view().active_surface();
    if surface == Surface::Normal {
        Toolbar::new().write(renderer.writer(), geometry.columns)?;
    }

    match session.buffer() {
        Some(buffer) => present_surface(
            renderer,
            &buffer,
            session.surface(surface),
            geometry.page_area(surface),
            geometry.cell,
        )?,
        None => renderer.delete_images()?,
    }

    draw_status(renderer, session, geometry, mapper, notice)?;
    renderer.end_sync_update()?;
    Ok(())
}

/// On the Fullscreen surface the last row only carries dialogs and errors.
fn draw_status(
    renderer: &mut KittyRenderer<io::Stdout>,
    session: &Session,
    geometry: &TerminalGeometry,
    mapper: &EventMapper,
    notice: Option<&str>,
) -> Result<()> {
    let pending = mapper.pending_input();
    let base = if mapper.mode() == InputMode::Normal && !session.view().is_fullscreen() {
        Some(format_status(session))
    } else {
        None
    };
    let status = combine_status(combine_status(base, pending.as_deref()), notice);
    write_status_line(
        renderer.writer(),
        geometry,
        status.as_deref().unwrap_or(""),
    )?;
    Ok(())
}

fn format_status(session: &Session) -> String {
    let view = session.view();
    let mut status = match (session.document(), session.page_index()) {
        (Some(doc), Some(page)) => format!(
            "{} | page {}/{}",
            doc.metadata.title.as_deref().unwrap_or_else(|| {
                doc.path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("<unknown>")
            }),
            page + 1,
            doc.page_count
        ),
        _ => "no document (o to open)".to_string(),
    };
    status.push_str(&format!(
        " | zoom {:.3} | {}\u{b0}",
        view.zoom(),
        view.rotation().degrees()
    ));
    if view.inverted() {
        status.push_str(" | inverted");
    }
    status
}

fn combine_status(base: Option<String>, extra: Option<&str>) -> Option<String> {
    match (base, extra.filter(|s| !s.is_empty())) {
        (Some(mut base), Some(extra)) => {
            base.push_str(" | ");
            base.push_str(extra);
            Some(base)
        }
        (Some(base), None) => Some(base),
        (None, Some(extra)) => Some(extra.to_string()),
        (None, None) => None,
    }
}

fn init_logging(data_dir: &Path) -> Result<WorkerGuard> {
    let log_dir = data_dir.join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pagelens.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the graphics stream, so there is no console layer.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    info!(data_dir = %data_dir.display(), "logging initialised");
    Ok(guard)
}
