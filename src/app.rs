use crate::bands::Band;
use crate::capture::{MonitorSource, list_monitor_sources};
use crate::config::{Config, DEFAULT_BLOCK_SIZE, next_block_size};
use crate::engine::{EngineStatus, FrameSnapshot, ReactiveEngine};
use crate::group::{GROUP_COUNT, Param};
use crate::prefs::{AppPrefs, prefs_storage_path};
use crate::preset::PresetBank;
use crate::terminal::MeterScreen;
use anyhow::Context;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use log::{info, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Runtime selection state shared by the terminal and headless front-ends.
struct Session {
    cfg: Config,
    engine: ReactiveEngine,
    bank: PresetBank,
    active_preset: usize,
    monitors: Vec<MonitorSource>,
    device: String,
    block_size: u32,
    /// User intent; survives a device that failed to open.
    reactive: bool,
}

impl Session {
    fn new(mut cfg: Config, prefs: &AppPrefs) -> anyhow::Result<Self> {
        let block_size = cfg
            .block_size
            .or(prefs.block_size)
            .unwrap_or(DEFAULT_BLOCK_SIZE);
        cfg.block_size = Some(block_size);

        let bank = load_bank(&cfg)?;
        let monitors = list_monitor_sources().unwrap_or_else(|err| {
            warn!("could not enumerate monitor sources: {err:#}");
            Vec::new()
        });
        let device = cfg
            .device
            .clone()
            .or_else(|| prefs.device.clone())
            .or_else(|| monitors.first().map(|m| m.id.clone()))
            .unwrap_or_default();

        let active_preset = cfg
            .preset
            .as_deref()
            .or(prefs.preset.as_deref())
            .and_then(|q| {
                let found = bank.find(q);
                if found.is_none() {
                    warn!("no preset matching '{q}', using '{}'", bank.presets()[0].name);
                }
                found
            })
            .and_then(|p| bank.presets().iter().position(|x| x.name == p.name))
            .unwrap_or(0);

        let mut engine = ReactiveEngine::new(cfg.engine_config(&device));
        engine.apply_preset(&bank.presets()[active_preset]);

        Ok(Self {
            cfg,
            engine,
            bank,
            active_preset,
            monitors,
            device,
            block_size,
            reactive: false,
        })
    }

    fn device_label(&self) -> &str {
        if self.device.is_empty() {
            return "<default input>";
        }
        self.monitors
            .iter()
            .find(|m| m.id == self.device)
            .map(|m| m.label.as_str())
            .unwrap_or(self.device.as_str())
    }

    fn preset_name(&self) -> &str {
        &self.bank.presets()[self.active_preset].name
    }

    fn toggle_enabled(&mut self) {
        if self.engine.is_enabled() {
            self.reactive = false;
            self.engine.disable();
        } else {
            self.reactive = true;
            // Failure is logged by the engine and shown in the status line.
            let _ = self.engine.enable();
        }
    }

    fn rebuild(&mut self) {
        let mut cfg = self.cfg.clone();
        cfg.block_size = Some(self.block_size);
        let engine_cfg = cfg.engine_config(&self.device);
        if self.engine.is_enabled() || self.engine.status() == EngineStatus::Failed {
            let _ = self.engine.reconfigure(engine_cfg);
        } else {
            self.engine.set_config(engine_cfg);
        }
    }

    fn next_device(&mut self) {
        if self.monitors.is_empty() {
            warn!("no monitor sources to switch to");
            return;
        }
        let idx = self
            .monitors
            .iter()
            .position(|m| m.id == self.device)
            .map(|i| (i + 1) % self.monitors.len())
            .unwrap_or(0);
        self.device = self.monitors[idx].id.clone();
        info!("switching to monitor source '{}'", self.device);
        self.rebuild();
    }

    fn next_block_size(&mut self) {
        self.block_size = next_block_size(self.block_size);
        info!("block size -> {}", self.block_size);
        self.rebuild();
    }

    fn next_preset(&mut self) {
        self.active_preset = (self.active_preset + 1) % self.bank.presets().len();
        let preset = self.bank.presets()[self.active_preset].clone();
        self.engine.apply_preset(&preset);
    }

    fn retry(&mut self) {
        self.reactive = true;
        let _ = self.engine.reconfigure(self.engine.config().clone());
    }

    fn prefs(&self) -> AppPrefs {
        AppPrefs {
            device: (!self.device.is_empty()).then(|| self.device.clone()),
            preset: Some(self.preset_name().to_string()),
            block_size: Some(self.block_size),
            reactive: Some(self.reactive),
        }
    }
}

pub fn run(cfg: Config) -> anyhow::Result<()> {
    let prefs_path = prefs_storage_path();
    let prefs = AppPrefs::load(prefs_path.as_deref()).unwrap_or_else(|err| {
        warn!("ignoring unreadable prefs: {err}");
        AppPrefs::default()
    });

    let mut session = Session::new(cfg, &prefs)?;
    session.reactive = !session.cfg.start_disabled && prefs.reactive != Some(false);
    if session.reactive {
        if let Err(err) = session.engine.enable() {
            warn!("starting without audio: {err}");
        }
    }

    let result = if session.cfg.headless {
        run_headless(&mut session)
    } else {
        run_terminal(&mut session)
    };

    let last = session.prefs();
    session.engine.disable();
    if let Err(err) = last.save(prefs_path.as_deref()) {
        warn!("could not save prefs: {err}");
    }
    result
}

fn load_bank(cfg: &Config) -> anyhow::Result<PresetBank> {
    let Some(path) = cfg.preset_file.as_deref() else {
        return Ok(PresetBank::builtin());
    };
    let mut bank = PresetBank::load(path)
        .with_context(|| format!("load preset file {}", path.display()))?;
    bank.merge_builtins();
    info!("loaded {} preset(s) from {}", bank.presets().len(), path.display());
    Ok(bank)
}

fn run_headless(session: &mut Session) -> anyhow::Result<()> {
    let target = frame_duration(session.cfg.fps);
    let mut last_frame = Instant::now();
    let mut last_status = session.engine.status();
    let mut frame = 0u64;

    loop {
        let now = Instant::now();
        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        let snap = *session.engine.tick(dt);
        frame += 1;

        let status = session.engine.status();
        if status != last_status {
            info!("capture status: {status:?}");
            last_status = status;
        }
        if session.cfg.report_every > 0 && frame % session.cfg.report_every == 0 {
            info!("{}", snapshot_line(&snap));
        }
        if session.cfg.frames > 0 && frame >= session.cfg.frames {
            return Ok(());
        }

        let elapsed = now.elapsed();
        if elapsed < target {
            std::thread::sleep(target - elapsed);
        }
    }
}

fn run_terminal(session: &mut Session) -> anyhow::Result<()> {
    let mut screen = MeterScreen::open()?;

    let target = frame_duration(session.cfg.fps);
    let mut last_frame = Instant::now();
    let mut timer = FrameTimer::new(FRAME_TIMER_WINDOW);
    let mut frame = 0u64;

    loop {
        let now = Instant::now();

        while event::poll(Duration::from_millis(0))? {
            if let Event::Key(k) = event::read()? {
                if k.kind != KeyEventKind::Release && handle_key(k.code, k.modifiers, session) {
                    return Ok(());
                }
            }
        }

        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        let tick_start = Instant::now();
        let snap = *session.engine.tick(dt);
        timer.record(now, tick_start.elapsed().as_secs_f32() * 1000.0);
        frame += 1;

        let lines = build_view(session, &snap, timer.fps(), timer.cost());
        screen.draw(&lines)?;

        if session.cfg.frames > 0 && frame >= session.cfg.frames {
            return Ok(());
        }

        let elapsed = now.elapsed();
        if elapsed < target {
            std::thread::sleep(target - elapsed);
        }
    }
}

fn frame_duration(fps: u32) -> Duration {
    Duration::from_secs_f32(1.0 / fps.max(1) as f32)
}

fn handle_key(code: KeyCode, mods: KeyModifiers, session: &mut Session) -> bool {
    if mods.contains(KeyModifiers::CONTROL) && matches!(code, KeyCode::Char('c')) {
        return true;
    }

    match code {
        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => return true,
        KeyCode::Char(' ') => session.toggle_enabled(),
        KeyCode::Char('n') | KeyCode::Char('N') => session.next_device(),
        KeyCode::Char('p') | KeyCode::Char('P') => session.next_preset(),
        KeyCode::Char('b') | KeyCode::Char('B') => session.next_block_size(),
        KeyCode::Char('r') | KeyCode::Char('R') => session.retry(),
        _ => {}
    }
    false
}

fn snapshot_line(snap: &FrameSnapshot) -> String {
    let a = &snap.analysis;
    let mut line = format!(
        "bass={:.3} low_mid={:.3} mid={:.3} high_mid={:.3} treble={:.3} overall={:.3} peak={:.3} rms={:.3}",
        a.bass, a.low_mid, a.mid, a.high_mid, a.treble, a.overall, a.peak, a.rms
    );
    for (i, g) in snap.groups.iter().enumerate() {
        let active = Param::ALL
            .iter()
            .filter_map(|&p| g.param(p).map(|v| format!("{}={v:.2}", p.as_str())))
            .collect::<Vec<_>>();
        if !active.is_empty() {
            line.push_str(&format!(" | g{} {}", i + 1, active.join(" ")));
        }
    }
    line
}

fn build_view(session: &Session, snap: &FrameSnapshot, fps: f32, tick: TickCost) -> Vec<String> {
    let engine = &session.engine;
    let status = match engine.status() {
        EngineStatus::Disabled => "off".to_string(),
        EngineStatus::Running => "running".to_string(),
        EngineStatus::Failed => "FAILED (r to retry)".to_string(),
    };
    let stream = &engine.config().stream;

    let mut lines = vec![
        format!(
            "reactive-visuals  fps {:.1}  tick {:.2}ms avg {:.2} p95 {:.2}",
            fps, tick.latest, tick.mean, tick.p95
        ),
        format!("source: {}  [{}]", session.device_label(), status),
        format!(
            "{} Hz  {} ch  block {}  fft {}  queued {}  blocks {} (skipped {})",
            stream.sample_rate,
            stream.channels,
            stream.block_size,
            engine.config().fft_size,
            engine.queued_samples(),
            engine.blocks_analyzed(),
            engine.blocks_skipped()
        ),
        format!("preset: {}", session.preset_name()),
    ];
    if let Some(err) = engine.last_error() {
        lines.push(format!("error: {err}"));
    }
    lines.push(String::new());

    let a = &snap.analysis;
    for band in Band::ALL {
        lines.push(meter_line(band.as_str(), a.band(band)));
    }
    lines.push(meter_line("overall", a.overall));
    lines.push(meter_line("peak", a.peak));
    lines.push(meter_line("rms", a.rms));
    lines.push(String::new());

    for (i, g) in snap.groups.iter().enumerate().take(GROUP_COUNT) {
        let parts = Param::ALL
            .iter()
            .map(|&p| match g.param(p) {
                Some(v) => format!("{} {v:.2}", p.as_str()),
                None => format!("{} --", p.as_str()),
            })
            .collect::<Vec<_>>();
        lines.push(format!("group {}: {}", i + 1, parts.join("  ")));
    }
    lines.push(String::new());
    lines.push("space on/off  n next source  p next preset  b block size  r retry  q quit".to_string());
    lines
}

const METER_WIDTH: usize = 40;
const FRAME_TIMER_WINDOW: Duration = Duration::from_secs(2);

fn meter_line(label: &str, v: f32) -> String {
    // Magnitudes are unbounded; squash into [0, 1) for display.
    let v = v.max(0.0);
    let norm = v / (v + 1.0);
    let filled = ((norm * METER_WIDTH as f32).round() as usize).min(METER_WIDTH);
    format!(
        "{:<9}[{}{}] {:.3}",
        label,
        "#".repeat(filled),
        "-".repeat(METER_WIDTH - filled),
        v
    )
}

/// Frame timestamps and engine tick costs over a sliding time window.
struct FrameTimer {
    window: Duration,
    frames: VecDeque<(Instant, f32)>,
}

/// Engine tick cost in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct TickCost {
    latest: f32,
    mean: f32,
    p95: f32,
}

impl FrameTimer {
    fn new(window: Duration) -> Self {
        Self {
            window,
            frames: VecDeque::new(),
        }
    }

    fn record(&mut self, at: Instant, cost_ms: f32) {
        let cost = if cost_ms.is_finite() { cost_ms.max(0.0) } else { 0.0 };
        self.frames.push_back((at, cost));
        while let Some(&(first, _)) = self.frames.front() {
            if at.saturating_duration_since(first) <= self.window {
                break;
            }
            self.frames.pop_front();
        }
    }

    fn fps(&self) -> f32 {
        let (Some(first), Some(last)) = (self.frames.front(), self.frames.back()) else {
            return 0.0;
        };
        let span = last.0.saturating_duration_since(first.0).as_secs_f32();
        if span > 0.0 {
            (self.frames.len() - 1) as f32 / span
        } else {
            0.0
        }
    }

    fn cost(&self) -> TickCost {
        let Some(&(_, latest)) = self.frames.back() else {
            return TickCost::default();
        };
        let mut costs = self.frames.iter().map(|&(_, c)| c).collect::<Vec<_>>();
        let mean = costs.iter().sum::<f32>() / costs.len() as f32;
        costs.sort_by(f32::total_cmp);
        let rank = ((costs.len() - 1) as f32 * 0.95).round() as usize;
        TickCost {
            latest,
            mean,
            p95: costs[rank.min(costs.len() - 1)],
        }
    }
}
