// Internal playback sink using ffmpeg-next
// Requires FFmpeg libraries: libavcodec, libavformat, libavutil, libswscale
//
// To install FFmpeg development libraries:
// - Ubuntu/Debian: sudo apt install libavcodec-dev libavformat-dev libavutil-dev libswscale-dev libavdevice-dev
// - Fedora: sudo dnf install ffmpeg-devel
// - macOS: brew install ffmpeg
// - Windows: Download from https://ffmpeg.org and set FFMPEG_DIR environment variable

use crate::engine::sink::{PlayRejected, PlaybackSink, SinkEvent};
use crate::error::SinkError;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

extern crate ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;

/// libav timestamps are in microseconds
const AV_TIME_BASE: f64 = 1_000_000.0;

/// Read errors in a row before the stream counts as dropped
const MAX_READ_ERRORS: u32 = 50;

/// Decoded video frame for rendering
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    /// RGB24, rows packed without padding
    pub data: Vec<u8>,
    pub position: f64,
}

/// Commands to the decode thread
enum DecoderCommand {
    Stop,
    Pause,
    Resume,
    Seek(f64),
}

/// Playback sink that decodes video with libav on a worker thread
///
/// Opens HLS manifests directly. The host renders frames taken with
/// [`FfmpegSink::take_frame`]; audio is not decoded.
pub struct FfmpegSink {
    user_agent: String,
    command_sender: Option<Sender<DecoderCommand>>,
    event_sender: Sender<SinkEvent>,
    event_receiver: Receiver<SinkEvent>,
    current_frame: Arc<Mutex<Option<DecodedFrame>>>,
    volume: f32,
    muted: bool,
}

impl FfmpegSink {
    pub fn new(user_agent: &str) -> Self {
        if let Err(e) = ffmpeg::init() {
            warn!(error = %e, "[PLAY] FFmpeg init failed");
        }
        let (event_sender, event_receiver) = channel();
        Self {
            user_agent: user_agent.to_string(),
            command_sender: None,
            event_sender,
            event_receiver,
            current_frame: Arc::new(Mutex::new(None)),
            volume: 1.0,
            muted: false,
        }
    }

    /// Latest decoded frame, if one arrived since the last call
    pub fn take_frame(&self) -> Option<DecodedFrame> {
        self.current_frame.lock().ok().and_then(|mut slot| slot.take())
    }

    fn send(&self, command: DecoderCommand) {
        if let Some(sender) = &self.command_sender {
            let _ = sender.send(command);
        }
    }

    fn stop(&mut self) {
        if let Some(sender) = self.command_sender.take() {
            let _ = sender.send(DecoderCommand::Stop);
        }
        if let Ok(mut slot) = self.current_frame.lock() {
            *slot = None;
        }
        // Events from the old stream are moot
        while self.event_receiver.try_recv().is_ok() {}
    }
}

impl PlaybackSink for FfmpegSink {
    fn supports_native_segmented(&self) -> bool {
        true
    }

    fn load_source(&mut self, url: &str) {
        self.stop();

        let (cmd_tx, cmd_rx) = channel();
        self.command_sender = Some(cmd_tx);

        let url = url.to_string();
        let user_agent = self.user_agent.clone();
        let events = self.event_sender.clone();
        let current_frame = Arc::clone(&self.current_frame);

        info!(url = %url, "[PLAY] Opening with FFmpeg");
        thread::spawn(move || {
            decode_thread(url, user_agent, current_frame, cmd_rx, events);
        });
    }

    fn clear_source(&mut self) {
        self.stop();
    }

    fn play(&mut self) -> Result<(), PlayRejected> {
        if self.command_sender.is_none() {
            return Err(PlayRejected);
        }
        self.send(DecoderCommand::Resume);
        Ok(())
    }

    fn pause(&mut self) {
        self.send(DecoderCommand::Pause);
    }

    fn seek(&mut self, position_secs: f64) {
        self.send(DecoderCommand::Seek(position_secs));
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        let _ = self.event_sender.send(SinkEvent::VolumeChanged {
            volume: self.volume,
            muted: self.muted,
        });
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        let _ = self.event_sender.send(SinkEvent::VolumeChanged {
            volume: self.volume,
            muted,
        });
    }

    fn poll_events(&mut self) -> Vec<SinkEvent> {
        let mut events = Vec::new();
        loop {
            match self.event_receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn decode_thread(
    url: String,
    user_agent: String,
    current_frame: Arc<Mutex<Option<DecodedFrame>>>,
    cmd_rx: Receiver<DecoderCommand>,
    events: Sender<SinkEvent>,
) {
    // Set options for network streams
    let mut options = ffmpeg::Dictionary::new();
    options.set("user_agent", &user_agent);
    options.set("reconnect", "1");
    options.set("reconnect_streamed", "1");
    options.set("reconnect_delay_max", "5");
    options.set("timeout", "5000000"); // 5 second timeout

    let mut ictx = match ffmpeg::format::input_with_dictionary(&url, options) {
        Ok(ctx) => ctx,
        Err(e) => {
            let _ = events.send(SinkEvent::Error(SinkError::Network(format!(
                "Failed to open stream: {}",
                e
            ))));
            return;
        }
    };

    let Some(video_stream) = ictx.streams().best(Type::Video) else {
        let _ = events.send(SinkEvent::Error(SinkError::Unsupported(
            "No video stream found".to_string(),
        )));
        return;
    };
    let video_stream_index = video_stream.index();
    let time_base = f64::from(video_stream.time_base());

    let mut decoder = match ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
        .and_then(|c| c.decoder().video())
    {
        Ok(d) => d,
        Err(e) => {
            let _ = events.send(SinkEvent::Error(SinkError::Unsupported(format!(
                "Failed to create decoder: {}",
                e
            ))));
            return;
        }
    };

    let width = decoder.width();
    let height = decoder.height();

    // Scale to reasonable size if too large
    let (target_width, target_height) = if width > 1280 || height > 720 {
        let scale = f64::min(1280.0 / width as f64, 720.0 / height as f64);
        ((width as f64 * scale) as u32, (height as f64 * scale) as u32)
    } else {
        (width, height)
    };

    let mut scaler = match ScalingContext::get(
        decoder.format(),
        width,
        height,
        Pixel::RGB24,
        target_width,
        target_height,
        Flags::BILINEAR,
    ) {
        Ok(s) => s,
        Err(e) => {
            let _ = events.send(SinkEvent::Error(SinkError::Unsupported(format!(
                "Failed to create scaler: {}",
                e
            ))));
            return;
        }
    };

    // Live streams report no duration
    let duration = (ictx.duration() > 0).then(|| ictx.duration() as f64 / AV_TIME_BASE);
    debug!(width, height, duration = ?duration, "[PLAY] FFmpeg stream opened");
    let _ = events.send(SinkEvent::MetadataLoaded { duration });
    let _ = events.send(SinkEvent::CanPlay);

    // Wait for play() like a media element would
    let mut paused = true;
    let frame_duration = Duration::from_secs_f64(1.0 / 30.0); // Target 30fps display
    let mut last_frame_time = Instant::now();
    let mut last_report = Instant::now();
    let mut read_errors = 0u32;

    loop {
        match cmd_rx.try_recv() {
            Ok(DecoderCommand::Stop) | Err(TryRecvError::Disconnected) => return,
            Ok(DecoderCommand::Pause) => {
                if !paused {
                    paused = true;
                    let _ = events.send(SinkEvent::Paused);
                }
            }
            Ok(DecoderCommand::Resume) => {
                if paused {
                    paused = false;
                    let _ = events.send(SinkEvent::Playing);
                }
            }
            Ok(DecoderCommand::Seek(position)) => {
                let target = (position.max(0.0) * AV_TIME_BASE) as i64;
                match ictx.seek(target, ..target) {
                    Ok(()) => {
                        decoder.flush();
                        let _ = events.send(SinkEvent::TimeUpdate {
                            current: position,
                            duration,
                        });
                    }
                    Err(e) => debug!(error = %e, "[PLAY] Seek not supported"),
                }
            }
            Err(TryRecvError::Empty) => {}
        }

        if paused {
            thread::sleep(Duration::from_millis(50));
            continue;
        }

        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut ictx) {
            Ok(()) => read_errors = 0,
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => {
                read_errors += 1;
                if read_errors >= MAX_READ_ERRORS {
                    let _ = events.send(SinkEvent::Error(SinkError::Network(e.to_string())));
                    return;
                }
                continue;
            }
        }

        if packet.stream() != video_stream_index {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue;
        }

        let mut decoded = VideoFrame::empty();
        while decoder.receive_frame(&mut decoded).is_ok() {
            let position = decoded.pts().unwrap_or(0) as f64 * time_base;

            let mut rgb_frame = VideoFrame::empty();
            if scaler.run(&decoded, &mut rgb_frame).is_ok() {
                let data = rgb_frame.data(0);
                let stride = rgb_frame.stride(0);

                // Copy frame data (handling stride)
                let row_len = target_width as usize * 3;
                let mut frame_data = Vec::with_capacity(row_len * target_height as usize);
                for y in 0..target_height as usize {
                    let row_start = y * stride;
                    frame_data.extend_from_slice(&data[row_start..row_start + row_len]);
                }

                if let Ok(mut slot) = current_frame.lock() {
                    *slot = Some(DecodedFrame {
                        width: target_width,
                        height: target_height,
                        data: frame_data,
                        position,
                    });
                }
            }

            if last_report.elapsed() >= Duration::from_millis(250) {
                last_report = Instant::now();
                let _ = events.send(SinkEvent::TimeUpdate {
                    current: position,
                    duration,
                });
            }

            // Rate limiting to avoid overwhelming the UI
            let elapsed = last_frame_time.elapsed();
            if elapsed < frame_duration {
                thread::sleep(frame_duration - elapsed);
            }
            last_frame_time = Instant::now();
        }
    }

    let _ = events.send(SinkEvent::Ended);
}
