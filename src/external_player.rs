//! Playback sink that drives an external player process
//!
//! ffplay, mpv and VLC get tuned arguments; anything else just receives
//! the URL. The process cannot be controlled once running, so pause stops
//! it and play/seek respawn it at the remembered position, which is
//! tracked from wall-clock time.

use crate::config::PlayerConfig;
use crate::engine::sink::{PlayRejected, PlaybackSink, SinkEvent};
use crate::error::SinkError;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const TIME_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerKind {
    Ffplay,
    Mpv,
    Vlc,
    Generic,
}

impl PlayerKind {
    pub fn from_command(command: &str) -> Self {
        let lower = command.to_lowercase();
        if lower.contains("ffplay") {
            PlayerKind::Ffplay
        } else if lower.contains("mpv") {
            PlayerKind::Mpv
        } else if lower.contains("vlc") {
            PlayerKind::Vlc
        } else {
            PlayerKind::Generic
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerOptions {
    pub command: String,
    pub buffer_secs: u32,
    pub slow: bool,
    pub hw_accel: bool,
    pub user_agent: Option<String>,
}

impl PlayerOptions {
    pub fn from_config(config: &PlayerConfig) -> Self {
        let command = if config.external_player.is_empty() {
            "ffplay".to_string()
        } else {
            config.external_player.clone()
        };
        Self {
            command,
            buffer_secs: config.effective_buffer(),
            slow: config.connection_quality.is_slow(),
            hw_accel: config.hw_accel,
            user_agent: Some(config.user_agent.clone()),
        }
    }
}

/// Command-line arguments for one launch
pub fn build_args(
    kind: PlayerKind,
    url: &str,
    title: &str,
    start_secs: f64,
    volume: f32,
    options: &PlayerOptions,
) -> Vec<String> {
    let buffer_secs = options.buffer_secs;
    let buffer_ms = (buffer_secs * 1000) as i64;
    let buffer_bytes_large = (buffer_secs as i64) * 1024 * 1024 * 4;
    let stream_name = url.rsplit('/').next().unwrap_or("stream");
    let title = format!("{} - {}", title, stream_name);
    let volume_pct = (volume.clamp(0.0, 1.0) * 100.0).round() as i32;

    match kind {
        PlayerKind::Ffplay => {
            // ffplay takes input directly, not with -i
            let mut args = Vec::new();
            if options.hw_accel && cfg!(target_os = "linux") {
                args.extend(["-hwaccel".to_string(), "auto".to_string()]);
            }
            args.extend([
                url.to_string(),
                "-autoexit".to_string(),
                "-probesize".to_string(),
                buffer_bytes_large.to_string(),
                "-analyzeduration".to_string(),
                (buffer_ms * 2000).to_string(),
                "-sync".to_string(),
                "audio".to_string(),
                "-framedrop".to_string(),
                "-window_title".to_string(),
                title,
                "-volume".to_string(),
                volume_pct.to_string(),
            ]);
            if url.starts_with("http") {
                args.extend([
                    "-reconnect".to_string(),
                    "1".to_string(),
                    "-reconnect_streamed".to_string(),
                    "1".to_string(),
                    "-reconnect_delay_max".to_string(),
                    if options.slow { "30" } else { "10" }.to_string(),
                ]);
            }
            if options.slow {
                args.push("-infbuf".to_string());
            }
            if let Some(ua) = &options.user_agent {
                args.extend(["-user_agent".to_string(), ua.clone()]);
            }
            if start_secs > 0.0 {
                args.extend(["-ss".to_string(), format!("{:.0}", start_secs)]);
            }
            args
        }
        PlayerKind::Mpv => {
            let cache_secs = buffer_secs * 2;
            let cache_mb = buffer_secs * 4;
            let mut args = vec![
                url.to_string(),
                format!("--title={}", title),
                "--cache=yes".to_string(),
                format!("--cache-secs={}", cache_secs),
                format!("--demuxer-max-bytes={}M", cache_mb),
                format!("--network-timeout={}", if options.slow { 120 } else { 60 }),
                "--stream-lavf-o=reconnect=1".to_string(),
                "--stream-lavf-o=reconnect_streamed=1".to_string(),
                format!("--volume={}", volume_pct),
                "--ytdl=no".to_string(),
            ];
            args.push(if options.hw_accel {
                "--hwdec=auto-safe".to_string()
            } else {
                "--hwdec=no".to_string()
            });
            if let Some(ua) = &options.user_agent {
                args.push(format!("--user-agent={}", ua));
            }
            if start_secs > 0.0 {
                args.push(format!("--start={:.0}", start_secs));
            }
            args
        }
        PlayerKind::Vlc => {
            let cache_ms = buffer_ms * 2;
            let mut args = vec![
                url.to_string(),
                format!("--meta-title={}", title),
                format!("--network-caching={}", cache_ms),
                format!("--live-caching={}", cache_ms),
                "--http-reconnect".to_string(),
                "--play-and-exit".to_string(),
            ];
            if options.hw_accel {
                args.push("--avcodec-hw=any".to_string());
            }
            if let Some(ua) = &options.user_agent {
                args.push(format!("--http-user-agent={}", ua));
            }
            if start_secs > 0.0 {
                args.push(format!("--start-time={:.0}", start_secs));
            }
            args
        }
        PlayerKind::Generic => vec![url.to_string()],
    }
}

/// Map a player stderr line to a sink error, if it reports one
pub fn classify_stderr(line: &str) -> Option<SinkError> {
    let lower = line.to_lowercase();
    let network = [
        "connection refused",
        "connection timed out",
        "server returned 4",
        "server returned 5",
        "network is unreachable",
        "failed to resolve hostname",
    ];
    let unsupported = [
        "invalid data found when processing input",
        "decoder not found",
        "unsupported codec",
        "no decoder could be found",
    ];
    if network.iter().any(|p| lower.contains(p)) {
        Some(SinkError::Network(line.trim().to_string()))
    } else if unsupported.iter().any(|p| lower.contains(p)) {
        Some(SinkError::Unsupported(line.trim().to_string()))
    } else {
        None
    }
}

/// Wall-clock position of a process that cannot report one
#[derive(Debug, Clone, Copy)]
struct PlaybackClock {
    base: f64,
    started_at: Option<Instant>,
}

impl PlaybackClock {
    fn new() -> Self {
        Self {
            base: 0.0,
            started_at: None,
        }
    }

    fn position(&self, now: Instant) -> f64 {
        match self.started_at {
            Some(at) => self.base + now.saturating_duration_since(at).as_secs_f64(),
            None => self.base,
        }
    }

    fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
    }

    fn stop(&mut self, now: Instant) {
        self.base = self.position(now);
        self.started_at = None;
    }

    fn set(&mut self, position: f64, now: Instant) {
        self.base = position.max(0.0);
        if self.started_at.is_some() {
            self.started_at = Some(now);
        }
    }
}

pub struct ExternalPlayerSink {
    options: PlayerOptions,
    kind: PlayerKind,
    title: String,
    url: Option<String>,
    child: Option<Child>,
    clock: PlaybackClock,
    volume: f32,
    muted: bool,
    pending: Vec<SinkEvent>,
    errors: Option<Receiver<SinkError>>,
    last_update: Option<Instant>,
}

impl ExternalPlayerSink {
    pub fn new(options: PlayerOptions) -> Self {
        let kind = PlayerKind::from_command(&options.command);
        Self {
            options,
            kind,
            title: "Xtreme IPTV".to_string(),
            url: None,
            child: None,
            clock: PlaybackClock::new(),
            volume: 1.0,
            muted: false,
            pending: Vec::new(),
            errors: None,
            last_update: None,
        }
    }

    /// Window title for the next launch
    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    fn spawn(&mut self) -> bool {
        let Some(url) = self.url.clone() else {
            return false;
        };
        let now = Instant::now();
        let start = self.clock.position(now);
        let volume = if self.muted { 0.0 } else { self.volume };
        let args = build_args(self.kind, &url, &self.title, start, volume, &self.options);

        let mut cmd = Command::new(&self.options.command);
        cmd.args(&args);
        if let Some(ua) = &self.options.user_agent {
            cmd.env("USER_AGENT", ua);
        }
        cmd.stderr(Stdio::piped());
        cmd.stdout(Stdio::null());

        match cmd.spawn() {
            Ok(mut child) => {
                info!(pid = child.id(), player = %self.options.command, start, "[PLAY] Player launched");
                if let Some(stderr) = child.stderr.take() {
                    let (sender, receiver) = channel();
                    self.errors = Some(receiver);
                    spawn_stderr_reader(stderr, sender);
                }
                self.child = Some(child);
                self.clock.start(now);
                self.last_update = Some(now);
                true
            }
            Err(e) => {
                warn!(player = %self.options.command, error = %e, "[PLAY] Failed to launch player");
                self.pending.push(SinkEvent::Error(SinkError::Other(format!(
                    "Failed to launch player '{}': {}",
                    self.options.command, e
                ))));
                false
            }
        }
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait(); // Reap the process
            debug!("[PLAY] Player stopped");
        }
        self.errors = None;
        self.clock.stop(Instant::now());
    }

    fn respawn(&mut self) {
        if self.child.is_some() {
            self.kill();
            self.spawn();
        }
    }
}

fn spawn_stderr_reader(stderr: std::process::ChildStderr, sender: Sender<SinkError>) {
    thread::spawn(move || {
        let reader = BufReader::new(stderr);
        for line in reader.lines().map_while(Result::ok) {
            if line.trim().is_empty() {
                continue;
            }
            debug!(line = %line, "[PLAYER]");
            if let Some(error) = classify_stderr(&line) {
                if sender.send(error).is_err() {
                    break;
                }
            }
        }
    });
}

impl PlaybackSink for ExternalPlayerSink {
    fn supports_native_segmented(&self) -> bool {
        // Every supported player opens HLS itself
        self.kind != PlayerKind::Generic
    }

    fn load_source(&mut self, url: &str) {
        self.kill();
        self.url = Some(url.to_string());
        self.clock = PlaybackClock::new();
        self.pending.push(SinkEvent::MetadataLoaded { duration: None });
        self.pending.push(SinkEvent::CanPlay);
    }

    fn clear_source(&mut self) {
        self.kill();
        self.url = None;
        self.pending.clear();
    }

    fn play(&mut self) -> Result<(), PlayRejected> {
        if self.url.is_none() {
            return Err(PlayRejected);
        }
        if self.child.is_none() {
            if !self.spawn() {
                return Err(PlayRejected);
            }
            self.pending.push(SinkEvent::Playing);
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.child.is_some() {
            self.kill();
            self.pending.push(SinkEvent::Paused);
        }
    }

    fn seek(&mut self, position_secs: f64) {
        self.clock.set(position_secs, Instant::now());
        self.respawn();
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        self.pending.push(SinkEvent::VolumeChanged {
            volume: self.volume,
            muted: self.muted,
        });
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.pending.push(SinkEvent::VolumeChanged {
            volume: self.volume,
            muted,
        });
    }

    fn poll_events(&mut self) -> Vec<SinkEvent> {
        let mut events = std::mem::take(&mut self.pending);
        let now = Instant::now();

        if let Some(errors) = &self.errors {
            if let Ok(error) = errors.try_recv() {
                events.push(SinkEvent::Error(error));
            }
        }

        let exited = match self.child.as_mut().map(Child::try_wait) {
            Some(Ok(Some(status))) => Some(status),
            Some(Ok(None)) | None => None,
            Some(Err(e)) => {
                warn!(error = %e, "[PLAY] Failed to wait for player");
                None
            }
        };

        match exited {
            Some(status) => {
                self.child = None;
                self.errors = None;
                self.clock.stop(now);
                if status.success() {
                    info!("[PLAY] Player exited");
                    events.push(SinkEvent::Ended);
                } else {
                    events.push(SinkEvent::Error(SinkError::Other(format!(
                        "Player exited with code {:?}",
                        status.code()
                    ))));
                }
            }
            None if self.child.is_some() => {
                let due = match self.last_update {
                    Some(last) => now.saturating_duration_since(last) >= TIME_UPDATE_INTERVAL,
                    None => true,
                };
                if due {
                    self.last_update = Some(now);
                    events.push(SinkEvent::TimeUpdate {
                        current: self.clock.position(now),
                        duration: None,
                    });
                }
            }
            None => {}
        }
        events
    }
}

impl Drop for ExternalPlayerSink {
    fn drop(&mut self) {
        self.kill();
    }
}
