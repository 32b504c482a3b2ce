use std::{cell::RefCell, io::Result, rc::Rc, time::Duration};

use chrono::{DateTime, Utc};
use emotion_stream::{
    bus::{BusEvent, EventBus, Topic},
    config::ClientConfig,
    connection::{ConnectionManager, ConnectionState, DEFAULT_URL},
    event::Emotion,
    state::{Snapshot, StateStore, StoreEntry},
    transport::{Connector, PendingTimer, Scheduler, Transport, TransportEvents},
};
use gloo_timers::callback::{Interval, Timeout};
use tracing::{debug, info, warn, Level};
use ratzilla::event::KeyCode;
use ratzilla::ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Terminal,
};
use ratzilla::{DomBackend, WebRenderer};
use wasm_bindgen::prelude::*;
use web_sys::{window, CloseEvent, Event, MessageEvent, WebSocket};

// ─── Browser transport ──────────────────────────────────────────────────────

/// Opens `web_sys::WebSocket`s and forwards their callbacks to the manager
struct WebConnector;

struct Handlers {
    _open: Closure<dyn FnMut(Event)>,
    _message: Closure<dyn FnMut(MessageEvent)>,
    _error: Closure<dyn FnMut(Event)>,
    _close: Closure<dyn FnMut(CloseEvent)>,
}

/// Keeps the socket's closures alive for exactly as long as the socket is in use
struct WebTransport {
    ws: WebSocket,
    _handlers: Handlers,
}

impl WebTransport {
    fn detach(&self) {
        self.ws.set_onopen(None);
        self.ws.set_onmessage(None);
        self.ws.set_onerror(None);
        self.ws.set_onclose(None);
    }
}

impl Connector for WebConnector {
    fn open(&self, url: &str, events: TransportEvents) -> anyhow::Result<Box<dyn Transport>> {
        let ws = WebSocket::new(url)
            .map_err(|e| anyhow::anyhow!("cannot open WebSocket to {}: {:?}", url, e))?;

        let open_events = events.clone();
        let on_open = Closure::wrap(Box::new(move |_e: Event| {
            open_events.opened();
        }) as Box<dyn FnMut(_)>);

        let message_events = events.clone();
        let on_message = Closure::wrap(Box::new(move |e: MessageEvent| {
            match e.data().dyn_into::<js_sys::JsString>() {
                Ok(text) => message_events.frame(&String::from(text)),
                Err(_) => debug!("Ignoring non-text WebSocket frame"),
            }
        }) as Box<dyn FnMut(_)>);

        let error_events = events.clone();
        let on_error = Closure::wrap(Box::new(move |_e: Event| {
            error_events.error("WebSocket error");
        }) as Box<dyn FnMut(_)>);

        let close_events = events;
        let on_close = Closure::wrap(Box::new(move |e: CloseEvent| {
            info!(code = e.code(), reason = %e.reason(), "WebSocket closed");
            close_events.closed();
        }) as Box<dyn FnMut(_)>);

        ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));
        ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
        ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));

        Ok(Box::new(WebTransport {
            ws,
            _handlers: Handlers {
                _open: on_open,
                _message: on_message,
                _error: on_error,
                _close: on_close,
            },
        }))
    }
}

impl Transport for WebTransport {
    fn send_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.ws
            .send_with_str(text)
            .map_err(|e| anyhow::anyhow!("WebSocket send failed: {:?}", e))
    }

    fn close(&mut self) {
        self.detach();
        if let Err(e) = self.ws.close() {
            warn!(error = ?e, "WebSocket close failed");
        }
    }
}

impl Drop for WebTransport {
    fn drop(&mut self) {
        // Closures are about to be freed; the socket must not call them
        self.detach();
    }
}

/// One-shot timers on `setTimeout`; dropping or cancelling clears them
struct WebScheduler;

struct WebTimer(Timeout);

impl Scheduler for WebScheduler {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> Box<dyn PendingTimer> {
        let millis = delay.as_millis().min(u32::MAX as u128) as u32;
        Box::new(WebTimer(Timeout::new(millis, task)))
    }
}

impl PendingTimer for WebTimer {
    fn cancel(self: Box<Self>) {
        self.0.cancel();
    }
}

// ─── View State ─────────────────────────────────────────────────────────────

struct View {
    snapshot: Snapshot,
    connection: ConnectionState,
    last_error: Option<String>,
    selected: usize,
    table_state: TableState,
    now_ms: f64,
}

impl View {
    fn new() -> Self {
        Self {
            snapshot: Snapshot::default(),
            connection: ConnectionState::Disconnected,
            last_error: None,
            selected: 0,
            table_state: TableState::default().with_selected(Some(0)),
            now_ms: js_sys::Date::now(),
        }
    }

    /// Newest first for display; the snapshot itself is oldest first
    fn rows(&self) -> impl Iterator<Item = &StoreEntry> {
        self.snapshot.iter().rev()
    }

    fn selected_entry(&self) -> Option<&StoreEntry> {
        self.rows().nth(self.selected)
    }

    fn clamp_selection(&mut self) {
        let count = self.snapshot.len();
        if self.selected >= count && count > 0 {
            self.selected = count - 1;
        }
        self.table_state.select(Some(self.selected));
    }
}

// ─── Formatting helpers ─────────────────────────────────────────────────────

fn emotion_color(label: &str) -> Color {
    let hex = Emotion::parse_lossy(label).color_hex().trim_start_matches('#');
    let channel = |i: usize| {
        hex.get(i..i + 2)
            .and_then(|c| u8::from_str_radix(c, 16).ok())
            .unwrap_or(128)
    };
    Color::Rgb(channel(0), channel(2), channel(4))
}

fn age_label(received_at: &DateTime<Utc>, now_ms: f64) -> String {
    let age = (now_ms - received_at.timestamp_millis() as f64) / 1000.0;
    if age < 5.0 {
        "now".to_string()
    } else if age < 60.0 {
        format!("{:.0}s", age)
    } else if age < 3600.0 {
        format!("{:.0}m", age / 60.0)
    } else {
        format!("{:.0}h", age / 3600.0)
    }
}

fn place(entry: &StoreEntry) -> String {
    match (&entry.event.city, &entry.event.country) {
        (Some(city), Some(country)) => format!("{}, {}", city, country),
        (Some(city), None) => city.clone(),
        (None, Some(country)) => country.clone(),
        (None, None) => "-".to_string(),
    }
}

fn status_span(state: ConnectionState) -> Span<'static> {
    let (label, color) = match state {
        ConnectionState::Connected => ("● LIVE", Color::Green),
        ConnectionState::Connecting => ("● CONNECTING", Color::Yellow),
        ConnectionState::Reconnecting => ("● RECONNECTING", Color::Yellow),
        ConnectionState::Disconnected => ("● DISCONNECTED", Color::DarkGray),
        ConnectionState::Failed => ("● OFFLINE (r to retry)", Color::Red),
    };
    Span::styled(label, Style::default().fg(color).add_modifier(Modifier::BOLD))
}

fn ws_url() -> String {
    if let Some(url) = option_env!("EMOTION_WS_URL") {
        return url.to_string();
    }

    // ?ws=<url> overrides the default for ad-hoc deployments
    window()
        .and_then(|w| w.location().search().ok())
        .and_then(|query| {
            query
                .trim_start_matches('?')
                .split('&')
                .find_map(|pair| pair.strip_prefix("ws=").map(str::to_string))
        })
        .and_then(|raw| js_sys::decode_uri_component(&raw).ok())
        .map(String::from)
        .unwrap_or_else(|| DEFAULT_URL.to_string())
}

// ─── UI Rendering ───────────────────────────────────────────────────────────

fn render_header(f: &mut ratzilla::ratatui::Frame, area: Rect, view: &View) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(20), Constraint::Length(30)])
        .split(area);

    let title = Paragraph::new(Line::from(vec![
        Span::styled("◉ ", Style::default().fg(Color::Yellow)),
        Span::styled("Emotion", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Span::styled(" Map", Style::default().fg(Color::DarkGray)),
    ]))
    .block(Block::default().borders(Borders::BOTTOM).border_style(Color::DarkGray));

    let status = Paragraph::new(Line::from(vec![status_span(view.connection)]))
        .alignment(ratzilla::ratatui::layout::Alignment::Right)
        .block(Block::default().borders(Borders::BOTTOM).border_style(Color::DarkGray));

    f.render_widget(title, chunks[0]);
    f.render_widget(status, chunks[1]);
}

fn render_markers(f: &mut ratzilla::ratatui::Frame, area: Rect, view: &mut View) {
    let now_ms = view.now_ms;
    let rows: Vec<Row> = view
        .rows()
        .map(|entry| {
            let event = &entry.event;
            let color = emotion_color(&event.emotion);
            Row::new(vec![
                Cell::from(Span::styled("●", Style::default().fg(color))),
                Cell::from(Span::styled(event.emotion.clone(), Style::default().fg(color))),
                Cell::from(place(entry)),
                Cell::from(format!("{:.4}, {:.4}", event.latitude, event.longitude)),
                Cell::from(format!("{:.0}%", event.intensity * 100.0)),
                Cell::from(Span::styled(
                    age_label(&entry.received_at, now_ms),
                    Style::default().fg(Color::DarkGray),
                )),
            ])
        })
        .collect();

    let header = Row::new(
        ["", "Emotion", "Place", "Lat, Lng", "Int.", "Age"]
            .into_iter()
            .map(|h| Cell::from(Span::styled(h, Style::default().fg(Color::White).add_modifier(Modifier::BOLD)))),
    )
    .style(Style::default().bg(Color::DarkGray));

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Length(10),
            Constraint::Min(16),
            Constraint::Length(20),
            Constraint::Length(5),
            Constraint::Length(5),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .title(format!(" Markers ({}) ", view.snapshot.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow)),
    )
    .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));

    f.render_stateful_widget(table, area, &mut view.table_state);
}

fn render_detail(f: &mut ratzilla::ratatui::Frame, area: Rect, view: &View) {
    let mut lines = Vec::new();

    if let Some(entry) = view.selected_entry() {
        let event = &entry.event;
        let kind = event.kind();
        lines.push(Line::from(Span::styled(
            kind.as_str().to_uppercase(),
            Style::default().fg(emotion_color(&event.emotion)).add_modifier(Modifier::BOLD),
        )));
        lines.push(Line::from(format!("Intensity: {:.0}%", event.intensity * 100.0)));
        lines.push(Line::from(format!("Radius: {:.0}px", event.marker_radius())));
        lines.push(Line::from(format!("{:.4}, {:.4}", event.latitude, event.longitude)));
        lines.push(Line::from(place(entry)));
        if let Some(text) = &event.text {
            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(format!("\"{}\"", text), Style::default().fg(Color::White))));
        }
    } else {
        lines.push(Line::from(Span::styled(
            "Waiting for emotions…",
            Style::default().fg(Color::DarkGray),
        )));
    }

    if let Some(error) = &view.last_error {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(error.clone(), Style::default().fg(Color::Red))));
    }

    let detail = Paragraph::new(lines)
        .block(Block::default().title(" Detail ").borders(Borders::ALL).border_style(Style::default().fg(Color::DarkGray)))
        .wrap(Wrap { trim: false });
    f.render_widget(detail, area);
}

fn render_help(f: &mut ratzilla::ratatui::Frame, area: Rect) {
    let help = Paragraph::new(Line::from(vec![
        Span::styled(" ↑↓", Style::default().fg(Color::Yellow)),
        Span::styled(" navigate  ", Style::default().fg(Color::DarkGray)),
        Span::styled("r", Style::default().fg(Color::Yellow)),
        Span::styled(" reconnect  ", Style::default().fg(Color::DarkGray)),
        Span::styled("d", Style::default().fg(Color::Yellow)),
        Span::styled(" disconnect", Style::default().fg(Color::DarkGray)),
    ]));
    f.render_widget(help, area);
}

// ─── Main ───────────────────────────────────────────────────────────────────

enum Action {
    Reconnect,
    Disconnect,
}

fn main() -> Result<()> {
    console_error_panic_hook::set_once();
    tracing_wasm::set_as_global_default_with_config(
        tracing_wasm::WASMLayerConfigBuilder::new()
            .set_max_level(Level::INFO)
            .build(),
    );

    let mut config = ClientConfig::default();
    config.connection.url = ws_url();
    let url = config.connection.url.clone();

    let view = Rc::new(RefCell::new(View::new()));
    let bus = Rc::new(EventBus::new());

    let store = Rc::new(StateStore::new(config.store.clone()));
    store.attach(&bus);
    {
        let view = view.clone();
        store.on_change(move |snapshot| {
            let mut v = view.borrow_mut();
            v.snapshot = snapshot.clone();
            v.clamp_selection();
            Ok(())
        });
    }

    {
        let view = view.clone();
        bus.subscribe(Topic::StateChanged, move |event| {
            if let BusEvent::StateChanged { to, .. } = event {
                let mut v = view.borrow_mut();
                v.connection = *to;
                if *to == ConnectionState::Connected {
                    v.last_error = None;
                }
            }
            Ok(())
        });
    }
    {
        let view = view.clone();
        bus.subscribe(Topic::Error, move |event| {
            if let BusEvent::Error(e) = event {
                view.borrow_mut().last_error = Some(e.to_string());
            }
            Ok(())
        });
    }

    let manager = ConnectionManager::new(
        bus.clone(),
        Rc::new(WebConnector),
        Rc::new(WebScheduler),
        config.connection.policy(),
    );
    info!(url = %url, "Starting emotion map");
    manager.connect(&url);

    let backend = DomBackend::new()?;
    let terminal = Terminal::new(backend)?;

    // ── Keep now_ms updated and apply retention (every 1s) ──────────────
    {
        let view = view.clone();
        let store = store.clone();
        let interval = Interval::new(1_000, move || {
            view.borrow_mut().now_ms = js_sys::Date::now();
            store.prune_expired();
        });
        // Lives for the whole page
        interval.forget();
    }

    // ── Key events ──────────────────────────────────────────────────────
    terminal.on_key_event({
        let view = view.clone();
        let manager = manager.clone();
        move |key_event| {
            let action = {
                let mut v = view.borrow_mut();
                let count = v.snapshot.len();
                match key_event.code {
                    KeyCode::Up | KeyCode::Char('k') => {
                        if v.selected > 0 {
                            v.selected -= 1;
                            let selected = v.selected;
                            v.table_state.select(Some(selected));
                        }
                        None
                    }
                    KeyCode::Down | KeyCode::Char('j') => {
                        if count > 0 && v.selected < count - 1 {
                            v.selected += 1;
                            let selected = v.selected;
                            v.table_state.select(Some(selected));
                        }
                        None
                    }
                    KeyCode::Char('r') => Some(Action::Reconnect),
                    KeyCode::Char('d') => Some(Action::Disconnect),
                    _ => None,
                }
            };

            // The view borrow is released: manager calls publish state changes
            match action {
                Some(Action::Reconnect) => manager.connect(&url),
                Some(Action::Disconnect) => manager.disconnect(),
                None => {}
            }
        }
    });

    // ── Draw loop (runs on rAF) ─────────────────────────────────────────
    terminal.draw_web({
        let view = view.clone();
        move |f| {
            let v = &mut *view.borrow_mut();

            let outer = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(2), // header
                    Constraint::Min(10),   // main content
                    Constraint::Length(1), // help
                ])
                .split(f.area());

            render_header(f, outer[0], v);

            let main_chunks = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
                .split(outer[1]);

            render_markers(f, main_chunks[0], v);
            render_detail(f, main_chunks[1], v);
            render_help(f, outer[2]);
        }
    });

    Ok(())
}
