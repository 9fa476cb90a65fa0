// telem-plot
//
// Live terminal plot of line framed numeric telemetry, one panel per label.
//
// Keys: x reset, p pause, r rediscover, g save csv, enter send a command,
//       q / Ctrl-C quit

use clap::Parser;
use crossbeam::channel;
use crossterm::event::{KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::{cursor, event, style, terminal, ExecutableCommand, QueueableCommand};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use telemplot::control::{Action, Console, Key};
use telemplot::data::{Ingest, RenderView};
use telemplot::link::{LinkItem, DEFAULT_CHANNEL_SIZE};
use telemplot::record::DiscoveryPolicy;
use telemplot::source::SourceError;
use telemplot::{Link, Record, Session};
use telemplot_tools::config::{DiscoveryConfig, PlotConfig};
use telemplot_tools::LinkOpts;

#[derive(Parser, Debug)]
#[command(
    name = "telem-plot",
    version,
    about = "Live terminal plot of line framed telemetry"
)]
struct Cli {
    #[command(flatten)]
    link: LinkOpts,

    /// Rows kept per channel (default 300)
    #[arg(short = 'n', long = "window")]
    window: Option<usize>,

    /// Comma separated labels to plot, skipping label discovery
    #[arg(short = 'l', long = "labels", value_delimiter = ',')]
    labels: Option<Vec<String>>,

    /// Records observed during discovery (default 100)
    #[arg(long)]
    observations: Option<usize>,

    /// Expected upper bound on channels (default 10)
    #[arg(long = "max-channels")]
    max_channels: Option<usize>,

    /// UI refresh rate (default 20)
    #[arg(long)]
    fps: Option<u64>,

    /// YAML file with plot settings. Command line values take precedence.
    #[arg(long = "config", value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    fn plot_config(&self) -> PlotConfig {
        PlotConfig {
            window: self.window,
            labels: self.labels.clone(),
            checksum: None,
            fps: self.fps,
            discovery: DiscoveryConfig {
                observations: self.observations,
                max_channels: self.max_channels,
                deadline_s: None,
            },
        }
    }
}

/// Lines kept in the message pane.
const MESSAGE_LINES: usize = 6;

/// Width of the y axis labels left of each plot.
const GUTTER: usize = 11;

const PALETTE: [Color; 6] = [
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::Red,
    Color::Blue,
];

/// Glyph used for field `j` of a channel.
fn glyph(j: usize) -> char {
    char::from(b'a' + (j % 26) as u8)
}

fn glyph_color(c: char) -> Color {
    let j = (c as usize).saturating_sub('a' as usize);
    PALETTE[j % PALETTE.len()]
}

/// Rasterizes the written slots of `view` into `h` lines of `w` cells.
/// Blanked (NaN) samples are skipped, so the tail slot never shows.
fn plot(view: &RenderView<'_>, w: usize, h: usize) -> Vec<String> {
    let mut grid = vec![vec![' '; w]; h];
    let (x0, x1) = view.x_range;
    let (y0, y1) = view.y_range;
    let (wmax, hmax) = ((w - 1) as f64, (h - 1) as f64);
    for i in 0..view.slots() {
        if !view.is_written(i) {
            continue;
        }
        let col = ((view.xs[i] - x0) / (x1 - x0) * wmax).round();
        if !(0.0..=wmax).contains(&col) {
            continue;
        }
        for (j, &v) in view.row(i).iter().enumerate() {
            if !v.is_finite() {
                continue;
            }
            let row = ((y1 - v) / (y1 - y0) * hmax).round();
            if (0.0..=hmax).contains(&row) {
                grid[row as usize][col as usize] = glyph(j);
            }
        }
    }
    grid.into_iter().map(|r| r.into_iter().collect()).collect()
}

/// Writes every window to `<unix-seconds>.csv`, oldest row first.
fn save_csv(session: &Session) -> io::Result<PathBuf> {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = PathBuf::from(format!("{}.csv", secs));
    let mut out = BufWriter::new(File::create(&path)?);
    let widest = session.specs().iter().map(|s| s.width).max().unwrap_or(0);
    write!(out, "label,index")?;
    for j in 0..widest {
        write!(out, ",{}", glyph(j))?;
    }
    writeln!(out)?;
    for (label, window) in session.windows() {
        let snap = window.snapshot_for_render();
        for (x, row) in snap.xs.iter().zip(&snap.rows) {
            write!(out, "{},{}", label, x)?;
            for v in row {
                write!(out, ",{}", v)?;
            }
            writeln!(out)?;
        }
    }
    out.flush()?;
    Ok(path)
}

fn key_of(k: &event::KeyEvent) -> Option<Key> {
    match k.code {
        KeyCode::Char(c) => Some(Key::Char(c)),
        KeyCode::Enter => Some(Key::Enter),
        KeyCode::Backspace => Some(Key::Named("backspace".into())),
        KeyCode::Esc => Some(Key::Named("esc".into())),
        _ => None,
    }
}

/// State owned by the render loop, built once after discovery.
struct RenderContext {
    url: String,
    session: Session,
    link: Link,
    console: Console,
    policy: DiscoveryPolicy,
    labels: Option<Vec<String>>,
    capacity: usize,
    messages: VecDeque<String>,
    paused: bool,
    closed: bool,
    rates: Vec<(String, f64)>,
    last_rates: Instant,
}

impl RenderContext {
    fn message(&mut self, msg: &str) {
        for line in msg.lines() {
            self.messages.push_back(line.to_string());
        }
        while self.messages.len() > MESSAGE_LINES {
            self.messages.pop_front();
        }
    }

    /// Handles one item from the link. Returns true to quit.
    fn receive(&mut self, item: LinkItem) -> bool {
        let record = match item {
            Ok(record) => record,
            Err(SourceError::Closed) => {
                self.closed = true;
                self.message("source closed");
                return false;
            }
            Err(e) => {
                self.message(&format!("source error: {}", e));
                return false;
            }
        };
        match self.session.ingest(record) {
            Ingest::Appended { .. } | Ingest::Idle => false,
            Ingest::Command { payload } => {
                if payload.is_empty() {
                    return false;
                }
                self.message(&format!("Received command in data stream: {}", payload));
                let action = self.console.command(&payload);
                self.act(action)
            }
            Ingest::Rejected { record, error } => {
                self.message(&format!("{}  ({})", record, error));
                false
            }
            Ingest::Passthrough(record) => {
                match &record {
                    Record::Malformed { reason, .. } => {
                        self.message(&format!("{}  ({})", record, reason))
                    }
                    _ => self.message(&record.to_string()),
                }
                false
            }
        }
    }

    /// Carries out `action`. Returns true to quit.
    fn act(&mut self, action: Action) -> bool {
        match action {
            Action::ResetWindows => {
                self.session.reset_windows();
                self.message("windows reset");
            }
            Action::TogglePause => self.paused = !self.paused,
            Action::Rediscover => self.rediscover(),
            Action::SaveSnapshot => match save_csv(&self.session) {
                Ok(path) => self.message(&format!("saved {}", path.display())),
                Err(e) => self.message(&format!("cannot save snapshot: {}", e)),
            },
            Action::BeginCompose => {
                self.message("listening for message until next enter key press:")
            }
            Action::Send(text) => match self.link.write(&text) {
                Ok(()) => self.message(&format!("Sending '{}'", text.trim_end())),
                Err(e) => self.message(&format!("cannot send '{}': {}", text.trim_end(), e)),
            },
            Action::CancelCompose => self.message("message discarded"),
            Action::Quit => return true,
            Action::Composing | Action::Ignored => {}
        }
        false
    }

    fn rediscover(&mut self) {
        if self.closed {
            self.message("source closed, nothing to rediscover");
            return;
        }
        self.message("rediscovering channels");
        match Session::discover(
            &mut self.link,
            &self.policy,
            self.capacity,
            self.labels.as_deref(),
        ) {
            Ok(session) => {
                self.session = session;
                let labels: Vec<&str> = self.session.labels().collect();
                let found = format!("channels: {}", labels.join(", "));
                self.message(&found);
            }
            Err(e) => self.message(&format!("rediscovery failed: {}", e)),
        }
    }

    fn update_rates(&mut self) {
        let elapsed = self.last_rates.elapsed();
        if elapsed < Duration::from_secs(1) {
            return;
        }
        let secs = elapsed.as_secs_f64();
        self.rates = self
            .session
            .take_rates()
            .into_iter()
            .map(|(label, n)| (label, n as f64 / secs))
            .collect();
        self.last_rates = Instant::now();
    }
}

struct Tui {
    stdout: io::Stdout,
}

impl Tui {
    fn setup() -> io::Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        stdout.execute(terminal::EnterAlternateScreen)?;
        stdout.execute(cursor::Hide)?;
        Ok(Self { stdout })
    }

    fn teardown(&mut self) {
        let _ = self.stdout.execute(cursor::Show);
        let _ = self.stdout.execute(terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
        let _ = self.stdout.flush();
    }

    fn status(&mut self, text: &str) -> io::Result<()> {
        self.stdout.queue(terminal::Clear(terminal::ClearType::All))?;
        self.stdout.queue(cursor::MoveTo(0, 0))?;
        self.stdout.queue(style::Print(text))?;
        self.stdout.flush()
    }

    /// Clears line `y` and prints `text` cut to the terminal width.
    fn put(&mut self, y: usize, cols: usize, text: &str) -> io::Result<()> {
        let text: String = text.chars().take(cols).collect();
        self.stdout.queue(cursor::MoveTo(0, y as u16))?;
        self.stdout
            .queue(terminal::Clear(terminal::ClearType::CurrentLine))?;
        self.stdout.queue(style::Print(text))?;
        Ok(())
    }

    fn put_plot(&mut self, y: usize, gutter: &str, line: &str) -> io::Result<()> {
        self.stdout.queue(cursor::MoveTo(0, y as u16))?;
        self.stdout
            .queue(terminal::Clear(terminal::ClearType::CurrentLine))?;
        self.stdout.queue(SetForegroundColor(Color::DarkGrey))?;
        self.stdout
            .queue(style::Print(format!("{:>w$}|", gutter, w = GUTTER - 1)))?;
        for c in line.chars() {
            if c == ' ' {
                self.stdout.queue(style::Print(' '))?;
            } else {
                self.stdout.queue(SetForegroundColor(glyph_color(c)))?;
                self.stdout.queue(style::Print(c))?;
            }
        }
        self.stdout.queue(ResetColor)?;
        Ok(())
    }

    /// Redraws the screen. Plot panels are left alone while paused.
    fn draw(&mut self, ctx: &mut RenderContext) -> io::Result<()> {
        let (cols, rows) = terminal::size()?;
        let (cols, rows) = (cols as usize, rows as usize);
        let panel_area = rows.saturating_sub(MESSAGE_LINES + 3);
        let channels = ctx.session.specs().len().max(1);
        let panel_h = panel_area / channels;
        let plot_w = cols.saturating_sub(GUTTER).max(10);

        let mut flags = String::new();
        if ctx.paused {
            flags.push_str("  [paused]");
        }
        if ctx.closed {
            flags.push_str("  [closed]");
        }
        let header = format!(
            "telem-plot  {}  window={}  dropped={}{}",
            ctx.url,
            ctx.capacity,
            ctx.link.dropped(),
            flags
        );
        self.stdout.queue(SetAttribute(Attribute::Bold))?;
        self.put(0, cols, &header)?;
        self.stdout.queue(SetAttribute(Attribute::Reset))?;

        if !ctx.paused && panel_h >= 3 {
            let mut y = 1;
            for (label, window) in ctx.session.windows_mut() {
                let rate = ctx
                    .rates
                    .iter()
                    .find(|(l, _)| l == label)
                    .map(|(_, r)| *r)
                    .unwrap_or(0.0);
                let fields: Vec<String> =
                    (0..window.width()).map(|j| glyph(j).to_string()).collect();
                let title = format!(
                    "{}  [{}]  n={}  {:.1}/s",
                    label,
                    fields.join(" "),
                    window.sample_index(),
                    rate
                );
                let (y_lo, y_hi) = window.y_range();
                let lines = window.render_with(|view| plot(&view, plot_w, panel_h - 1));

                self.stdout.queue(SetAttribute(Attribute::Bold))?;
                self.put(y, cols, &title)?;
                self.stdout.queue(SetAttribute(Attribute::Reset))?;
                y += 1;
                let last = lines.len().saturating_sub(1);
                for (k, line) in lines.iter().enumerate() {
                    let gutter = if k == 0 {
                        format!("{:.4}", y_hi)
                    } else if k == last {
                        format!("{:.4}", y_lo)
                    } else {
                        String::new()
                    };
                    self.put_plot(y, &gutter, line)?;
                    y += 1;
                }
            }
            while y <= panel_area {
                self.put(y, cols, "")?;
                y += 1;
            }
        } else if panel_h < 3 {
            self.put(1, cols, "terminal too small")?;
        }

        let sep = panel_area + 1;
        self.put(sep, cols, &"-".repeat(cols))?;
        for k in 0..MESSAGE_LINES {
            let text = ctx.messages.get(k).cloned().unwrap_or_default();
            self.put(sep + 1 + k, cols, &text)?;
        }
        let footer = match ctx.console.pending() {
            Some(text) => format!("send> {}_", text),
            None => "x reset  p pause  r rediscover  g save  enter send  q quit".to_string(),
        };
        self.put(sep + 1 + MESSAGE_LINES, cols, &footer)?;
        self.stdout.flush()
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    macro_rules! die{
        ($f:expr,$($a:tt)*)=>{
        {
            die!(format!($f, $($a)*));
        }
        };
        ($msg:expr)=>{
        {
            eprintln!("ERROR: {}", $msg);
            return ExitCode::FAILURE;
        }
        };
    }

    let mut config = cli.plot_config();
    if let Some(path) = &cli.config {
        match PlotConfig::load(path) {
            Ok(file) => config = config.or(file),
            Err(e) => die!(e),
        }
    }
    let integrity = match cli.link.checksum {
        Some(integrity) => integrity,
        None => match config.integrity() {
            Ok(integrity) => integrity,
            Err(e) => die!(e),
        },
    };
    let policy = match config.discovery_policy() {
        Ok(policy) => policy,
        Err(e) => die!(e),
    };

    // The terminal belongs to the plot, log lines go to the message pane.
    let (log_tx, log_rx) = channel::unbounded::<String>();
    telemplot_tools::init_logging_to(cli.link.log_level(), &cli.link.timestamp_format, log_tx);
    let dump_log = |rx: &channel::Receiver<String>| {
        for line in rx.try_iter() {
            eprintln!("{}", line);
        }
    };

    let reader = match cli.link.open(integrity) {
        Ok(reader) => reader,
        Err(e) => {
            dump_log(&log_rx);
            die!("cannot open '{}': {}", cli.link.url, e);
        }
    };
    let mut link = match Link::spawn(reader, DEFAULT_CHANNEL_SIZE) {
        Ok(link) => link,
        Err(e) => die!("cannot start link thread: {}", e),
    };

    let mut tui = match Tui::setup() {
        Ok(tui) => tui,
        Err(e) => die!("terminal setup failed: {}", e),
    };
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let mut t = Tui {
            stdout: io::stdout(),
        };
        t.teardown();
        original_hook(panic_info);
    }));

    let _ = tui.status(&format!(
        "Discovering channels on {} (q after discovery to quit)",
        cli.link.url
    ));
    let labels = config.labels().map(|l| l.to_vec());
    let capacity = config.window();
    let session = match Session::discover(&mut link, &policy, capacity, labels.as_deref()) {
        Ok(session) => session,
        Err(e) => {
            tui.teardown();
            dump_log(&log_rx);
            die!(e);
        }
    };

    let mut ctx = RenderContext {
        url: cli.link.url.clone(),
        session,
        link,
        console: Console::new(),
        policy,
        labels,
        capacity,
        messages: VecDeque::new(),
        paused: false,
        closed: false,
        rates: vec![],
        last_rates: Instant::now(),
    };

    // Keyboard handler
    let (key_tx, key_rx) = channel::unbounded();
    std::thread::spawn(move || loop {
        match event::read() {
            Ok(ev) => {
                if key_tx.send(ev).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });

    let frame = Duration::from_millis(1000 / config.fps());
    let tick = channel::tick(frame);
    let mut records = ctx.link.receiver().clone();

    'main: loop {
        crossbeam::select! {
            recv(key_rx) -> ev => {
                if let Ok(event::Event::Key(k)) = ev {
                    let ctrl_c = k.code == KeyCode::Char('c')
                        && k.modifiers.contains(KeyModifiers::CONTROL);
                    if ctrl_c {
                        break 'main;
                    }
                    if k.kind == KeyEventKind::Press {
                        if let Some(key) = key_of(&k) {
                            let action = ctx.console.press(key);
                            if ctx.act(action) {
                                break 'main;
                            }
                        }
                    }
                }
            }

            recv(records) -> item => {
                let quit = match item {
                    Ok(item) => ctx.receive(item),
                    Err(_) => {
                        ctx.closed = true;
                        false
                    }
                };
                if quit {
                    break 'main;
                }
            }

            recv(log_rx) -> line => {
                if let Ok(line) = line {
                    ctx.message(&line);
                }
            }

            recv(tick) -> _ => {
                ctx.update_rates();
                if tui.draw(&mut ctx).is_err() {
                    break 'main;
                }
            }
        }
        if ctx.closed {
            records = channel::never();
        }
    }

    tui.teardown();
    ExitCode::SUCCESS
}
