use std::borrow::Cow;
use std::io::{self, Write};

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{
        Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent,
        MouseEventKind,
    },
    terminal::{self, Clear, ClearType},
};
use pagelens_core::{
    Command, RenderImage, RotateDirection, ScrollOffset, Size, Surface, SurfaceViewport,
};
use png::{BitDepth, ColorType, Encoder};
use tracing::debug;

pub struct KittyRenderer<W: Write> {
    writer: W,
    image_id: u32,
    placement_id: u32,
}

/// Terminal cell where the top-left corner of the image is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawParams {
    pub column: u16,
    pub row: u16,
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            image_id: 1,
            placement_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn draw(&mut self, image: &RenderImage, params: DrawParams) -> Result<()> {
        if image.width == 0 || image.height == 0 {
            return self.delete_images();
        }

        let mut buffer = Vec::new();
        let mut encoder = Encoder::new(&mut buffer, image.width, image.height);
        encoder.set_color(ColorType::Rgb);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&packed_pixels(image))?;
        writer.finish()?;

        crossterm::queue!(&mut self.writer, cursor::MoveTo(params.column, params.row))?;

        let encoded = BASE64.encode(&buffer);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},p={},s={},v={},z=-1,m={}",
                    self.image_id,
                    self.placement_id,
                    image.width,
                    image.height,
                    if more { 1 } else { 0 }
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", if more { 1 } else { 0 })?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Removes every placement this renderer created.
    pub fn delete_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=A,q=2\u{1b}\\")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Clears the entire screen.
    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

fn packed_pixels(image: &RenderImage) -> Cow<'_, [u8]> {
    let row_bytes = image.row_bytes();
    if image.stride == row_bytes {
        return Cow::Borrowed(&image.pixels[..row_bytes * image.height as usize]);
    }
    let mut packed = Vec::with_capacity(row_bytes * image.height as usize);
    for y in 0..image.height {
        packed.extend_from_slice(image.row(y));
    }
    Cow::Owned(packed)
}

/// Copies the part of `image` visible through a viewport scrolled to
/// `offset`.
pub fn crop_visible(image: &RenderImage, offset: ScrollOffset, viewport: Size) -> RenderImage {
    let x = offset.x.clamp(0, i64::from(image.width)) as u32;
    let y = offset.y.clamp(0, i64::from(image.height)) as u32;
    let width = viewport.width.min(image.width - x);
    let height = viewport.height.min(image.height - y);

    let start = x as usize * RenderImage::CHANNELS;
    let row_bytes = width as usize * RenderImage::CHANNELS;
    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in y..y + height {
        pixels.extend_from_slice(&image.row(row)[start..start + row_bytes]);
    }

    RenderImage {
        width,
        height,
        stride: row_bytes,
        pixels,
    }
}

/// Pixel size of one terminal cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSize {
    pub width: u32,
    pub height: u32,
}

impl CellSize {
    /// Used when the terminal does not report its pixel size.
    pub const FALLBACK: CellSize = CellSize {
        width: 8,
        height: 16,
    };

    pub fn cells_to_pixels(self, columns: i32, rows: i32) -> (i64, i64) {
        (
            i64::from(columns) * i64::from(self.width),
            i64::from(rows) * i64::from(self.height),
        )
    }
}

/// A block of terminal cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRect {
    pub column: u16,
    pub row: u16,
    pub columns: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalGeometry {
    pub columns: u16,
    pub rows: u16,
    pub cell: CellSize,
}

impl TerminalGeometry {
    /// Falls back to the cell count alone when the terminal does not
    /// report its pixel size.
    pub fn query() -> Result<Self> {
        match terminal::window_size() {
            Ok(window) => Ok(Self::from_window(
                window.columns,
                window.rows,
                window.width,
                window.height,
            )),
            Err(err) => {
                debug!(?err, "window pixel size unavailable");
                let (columns, rows) = terminal::size()?;
                Ok(Self::from_window(columns, rows, 0, 0))
            }
        }
    }

    pub fn from_window(columns: u16, rows: u16, width_px: u16, height_px: u16) -> Self {
        let cell = if columns == 0 || rows == 0 || width_px == 0 || height_px == 0 {
            CellSize::FALLBACK
        } else {
            CellSize {
                width: (u32::from(width_px) / u32::from(columns)).max(1),
                height: (u32::from(height_px) / u32::from(rows)).max(1),
            }
        };
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
            cell,
        }
    }

    /// The Normal surface gives up the first row to the toolbar and the
    /// last to the status line; Fullscreen uses the whole terminal.
    pub fn page_area(&self, surface: Surface) -> CellRect {
        match surface {
            Surface::Normal => CellRect {
                column: 0,
                row: 1u16.min(self.rows - 1),
                columns: self.columns,
                rows: self.rows.saturating_sub(2).max(1),
            },
            Surface::Fullscreen => CellRect {
                column: 0,
                row: 0,
                columns: self.columns,
                rows: self.rows,
            },
        }
    }

    pub fn viewport_pixels(&self, surface: Surface) -> Size {
        let area = self.page_area(surface);
        Size::new(
            u32::from(area.columns) * self.cell.width,
            u32::from(area.rows) * self.cell.height,
        )
    }

    pub fn status_row(&self) -> u16 {
        self.rows - 1
    }
}

/// Where to place the visible crop so content smaller than the viewport
/// sits in the middle of the page area.
pub fn centered_placement(
    area: CellRect,
    cell: CellSize,
    viewport: Size,
    visible: Size,
) -> DrawParams {
    let pad_x = viewport.width.saturating_sub(visible.width) / 2 / cell.width.max(1);
    let pad_y = viewport.height.saturating_sub(visible.height) / 2 / cell.height.max(1);
    DrawParams {
        column: area.column.saturating_add(pad_x.min(u32::from(u16::MAX)) as u16),
        row: area.row.saturating_add(pad_y.min(u32::from(u16::MAX)) as u16),
    }
}

/// Draws the slice of `buffer` that `surface` currently shows.
pub fn present_surface<W: Write>(
    renderer: &mut KittyRenderer<W>,
    buffer: &RenderImage,
    surface: &SurfaceViewport,
    area: CellRect,
    cell: CellSize,
) -> Result<()> {
    let visible = crop_visible(buffer, surface.scroll_offset(), surface.viewport_size());
    let params = centered_placement(
        area,
        cell,
        surface.viewport_size(),
        Size::new(visible.width, visible.height),
    );
    debug!(
        width = visible.width,
        height = visible.height,
        column = params.column,
        row = params.row,
        "presenting surface"
    );
    renderer.draw(&visible, params)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolbarButton {
    Open,
    ZoomIn,
    ZoomOut,
    RotateClockwise,
    RotateCounterClockwise,
    FullScreen,
}

impl ToolbarButton {
    pub const ALL: [ToolbarButton; 6] = [
        ToolbarButton::Open,
        ToolbarButton::ZoomIn,
        ToolbarButton::ZoomOut,
        ToolbarButton::RotateClockwise,
        ToolbarButton::RotateCounterClockwise,
        ToolbarButton::FullScreen,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ToolbarButton::Open => "Open",
            ToolbarButton::ZoomIn => "Zoom In",
            ToolbarButton::ZoomOut => "Zoom Out",
            ToolbarButton::RotateClockwise => "Rotate +90",
            ToolbarButton::RotateCounterClockwise => "Rotate -90",
            ToolbarButton::FullScreen => "Full Screen",
        }
    }

    pub fn action(self) -> UiEvent {
        match self {
            ToolbarButton::Open => UiEvent::BeginOpenPath,
            ToolbarButton::ZoomIn => UiEvent::Command(Command::ZoomIn),
            ToolbarButton::ZoomOut => UiEvent::Command(Command::ZoomOut),
            ToolbarButton::RotateClockwise => UiEvent::Command(Command::Rotate {
                direction: RotateDirection::Clockwise,
            }),
            ToolbarButton::RotateCounterClockwise => UiEvent::Command(Command::Rotate {
                direction: RotateDirection::CounterClockwise,
            }),
            ToolbarButton::FullScreen => UiEvent::Command(Command::ToggleFullscreen),
        }
    }
}

/// Button row drawn at the top of the Normal surface as `[Label] [Label] ...`.
#[derive(Debug, Clone)]
pub struct Toolbar {
    spans: Vec<(ToolbarButton, u16, u16)>,
}

impl Default for Toolbar {
    fn default() -> Self {
        let mut spans = Vec::with_capacity(ToolbarButton::ALL.len());
        let mut column: u16 = 0;
        for button in ToolbarButton::ALL {
            let width = button.label().len() as u16 + 2;
            spans.push((button, column, column + width));
            column += width + 1;
        }
        Self { spans }
    }
}

impl Toolbar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit_test(&self, column: u16) -> Option<ToolbarButton> {
        self.spans
            .iter()
            .find(|(_, start, end)| (*start..*end).contains(&column))
            .map(|(button, _, _)| *button)
    }

    pub fn text(&self) -> String {
        ToolbarButton::ALL
            .iter()
            .map(|button| format!("[{}]", button.label()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn write<W: Write>(&self, writer: &mut W, columns: u16) -> io::Result<()> {
        crossterm::queue!(writer, cursor::MoveTo(0, 0), Clear(ClearType::CurrentLine))?;
        let text = self.text();
        write!(writer, "{}", truncate(&text, columns))?;
        writer.flush()
    }
}

fn truncate(text: &str, columns: u16) -> &str {
    match text.char_indices().nth(usize::from(columns)) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    Command(Command),
    BeginZoomEntry,
    BeginOpenPath,
    InputChanged { text: String },
    ZoomSubmit { text: String },
    OpenPathSubmit { path: String },
    Cancel,
    /// Pointer motion in terminal cells while the left button is held.
    Drag { delta_columns: i32, delta_rows: i32 },
    Resize,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    ZoomEntry,
    OpenPath,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    mode: InputMode,
    surface: Surface,
    toolbar: Toolbar,
    input_buffer: String,
    suggestions: Vec<String>,
    suggestion_cursor: Option<usize>,
    drag_origin: Option<(u16, u16)>,
}

impl EventMapper {
    /// Keyboard panning moves the page as if it were dragged this many cells.
    pub const PAN_STEP_COLUMNS: i32 = 4;
    pub const PAN_STEP_ROWS: i32 = 2;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    /// Tracks the visible surface; toolbar clicks only exist on Normal.
    pub fn set_surface(&mut self, surface: Surface) {
        self.surface = surface;
    }

    /// Opens the zoom dialog with `text` in the entry and `suggestions`
    /// (oldest first) reachable with Up / Down.
    pub fn begin_zoom_entry(&mut self, text: impl Into<String>, suggestions: Vec<String>) {
        self.mode = InputMode::ZoomEntry;
        self.input_buffer = text.into();
        self.suggestions = suggestions;
        self.suggestion_cursor = None;
        self.drag_origin = None;
    }

    pub fn begin_open_path(&mut self) {
        self.mode = InputMode::OpenPath;
        self.input_buffer.clear();
        self.suggestions.clear();
        self.suggestion_cursor = None;
        self.drag_origin = None;
    }

    fn close_dialog(&mut self) {
        self.mode = InputMode::Normal;
        self.input_buffer.clear();
        self.suggestions.clear();
        self.suggestion_cursor = None;
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Resize(..) => UiEvent::Resize,
            Event::Key(key) if key.kind == KeyEventKind::Release => UiEvent::None,
            Event::Key(key) => match self.mode {
                InputMode::Normal => self.map_key_normal(key),
                InputMode::ZoomEntry | InputMode::OpenPath => self.map_key_dialog(key),
            },
            Event::Mouse(mouse) if self.mode == InputMode::Normal => self.map_mouse(mouse),
            _ => UiEvent::None,
        }
    }

    fn map_key_normal(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        let ctrl = modifiers.contains(KeyModifiers::CONTROL);
        let shift = modifiers.contains(KeyModifiers::SHIFT);

        match code {
            KeyCode::Char('c') if ctrl => UiEvent::Quit,
            KeyCode::Char('q') if !ctrl => UiEvent::Quit,
            KeyCode::Char('+') | KeyCode::Char('=') => UiEvent::Command(Command::ZoomIn),
            KeyCode::Char('-') => UiEvent::Command(Command::ZoomOut),
            KeyCode::Char('z') => UiEvent::BeginZoomEntry,
            KeyCode::Char('Z') if ctrl => UiEvent::BeginZoomEntry,
            KeyCode::Char('R') => UiEvent::Command(Command::Rotate {
                direction: RotateDirection::CounterClockwise,
            }),
            KeyCode::Char('r') if ctrl && shift => UiEvent::Command(Command::Rotate {
                direction: RotateDirection::CounterClockwise,
            }),
            KeyCode::Char('r') => UiEvent::Command(Command::Rotate {
                direction: RotateDirection::Clockwise,
            }),
            KeyCode::Char('i') | KeyCode::Tab => UiEvent::Command(Command::ToggleInvert),
            KeyCode::Char('f') => UiEvent::Command(Command::ToggleFullscreen),
            KeyCode::Esc => UiEvent::Command(Command::ExitFullscreen),
            KeyCode::Char('o') => UiEvent::BeginOpenPath,
            KeyCode::Left | KeyCode::Char('h') => self.pan(1, 0),
            KeyCode::Right | KeyCode::Char('l') => self.pan(-1, 0),
            KeyCode::Up | KeyCode::Char('k') => self.pan(0, 1),
            KeyCode::Down | KeyCode::Char('j') => self.pan(0, -1),
            _ => UiEvent::None,
        }
    }

    fn pan(&self, columns: i32, rows: i32) -> UiEvent {
        UiEvent::Drag {
            delta_columns: columns * Self::PAN_STEP_COLUMNS,
            delta_rows: rows * Self::PAN_STEP_ROWS,
        }
    }

    fn map_mouse(&mut self, mouse: MouseEvent) -> UiEvent {
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                if self.surface == Surface::Normal && mouse.row == 0 {
                    self.drag_origin = None;
                    return self
                        .toolbar
                        .hit_test(mouse.column)
                        .map(ToolbarButton::action)
                        .unwrap_or(UiEvent::None);
                }
                self.drag_origin = Some((mouse.column, mouse.row));
                UiEvent::None
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                let Some((column, row)) = self.drag_origin else {
                    return UiEvent::None;
                };
                self.drag_origin = Some((mouse.column, mouse.row));
                let delta_columns = i32::from(mouse.column) - i32::from(column);
                let delta_rows = i32::from(mouse.row) - i32::from(row);
                if delta_columns == 0 && delta_rows == 0 {
                    UiEvent::None
                } else {
                    UiEvent::Drag {
                        delta_columns,
                        delta_rows,
                    }
                }
            }
            MouseEventKind::Up(MouseButton::Left) => {
                self.drag_origin = None;
                UiEvent::None
            }
            _ => UiEvent::None,
        }
    }

    fn map_key_dialog(&mut self, key: KeyEvent) -> UiEvent {
        let KeyEvent {
            code, modifiers, ..
        } = key;
        match code {
            KeyCode::Esc => {
                self.close_dialog();
                UiEvent::Cancel
            }
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                self.close_dialog();
                UiEvent::Cancel
            }
            KeyCode::Enter => {
                let text = std::mem::take(&mut self.input_buffer);
                let mode = self.mode;
                self.close_dialog();
                match mode {
                    InputMode::ZoomEntry => UiEvent::ZoomSubmit { text },
                    _ => UiEvent::OpenPathSubmit { path: text },
                }
            }
            KeyCode::Backspace => {
                self.input_buffer.pop();
                self.input_changed()
            }
            KeyCode::Up => self.cycle_suggestion(-1),
            KeyCode::Down => self.cycle_suggestion(1),
            KeyCode::Char(c) if modifiers.is_empty() || modifiers == KeyModifiers::SHIFT => {
                self.input_buffer.push(c);
                self.input_changed()
            }
            _ => UiEvent::None,
        }
    }

    /// Up starts at the newest suggestion and walks back; Down walks
    /// forward. Both wrap.
    fn cycle_suggestion(&mut self, step: isize) -> UiEvent {
        if self.mode != InputMode::ZoomEntry || self.suggestions.is_empty() {
            return UiEvent::None;
        }
        let len = self.suggestions.len() as isize;
        let next = match self.suggestion_cursor {
            None if step < 0 => len - 1,
            None => 0,
            Some(current) => (current as isize + step).rem_euclid(len),
        };
        self.suggestion_cursor = Some(next as usize);
        self.input_buffer = self.suggestions[next as usize].clone();
        self.input_changed()
    }

    fn input_changed(&self) -> UiEvent {
        UiEvent::InputChanged {
            text: self.input_buffer.clone(),
        }
    }

    pub fn pending_input(&self) -> Option<String> {
        match self.mode {
            InputMode::Normal => None,
            InputMode::ZoomEntry => Some(format!("Zoom: {}", self.input_buffer)),
            InputMode::OpenPath => Some(format!("Open: {}", self.input_buffer)),
        }
    }
}

pub fn write_status_line<W: Write>(
    writer: &mut W,
    geometry: &TerminalGeometry,
    label: &str,
) -> io::Result<()> {
    crossterm::queue!(
        writer,
        cursor::MoveTo(0, geometry.status_row()),
        Clear(ClearType::CurrentLine)
    )?;
    write!(writer, "{}", truncate(label, geometry.columns))?;
    writer.flush()
}
