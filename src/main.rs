//! xtreme-play - play one Xtream Codes item from the command line

// Use mimalloc for faster memory allocation (Linux, macOS)
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::{Parser, ValueEnum};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use xtreme_playback::api::XtreamClient;
use xtreme_playback::engine::segmented::HlsBackend;
use xtreme_playback::epg::{format_time, DownloadConfig, XmltvSchedule};
use xtreme_playback::external_player::{ExternalPlayerSink, PlayerOptions};
use xtreme_playback::models::{ContentPayload, EpisodePayload, LiveStreamPayload, MoviePayload};
use xtreme_playback::resume::JsonFileStorage;
use xtreme_playback::session::PlaybackControllerBuilder;
use xtreme_playback::transition::TransitionState;
use xtreme_playback::{
    ContentReference, EngineState, PlaybackController, PlayerConfig, SessionNotice,
};

const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Live,
    Movie,
    Episode,
    /// Playlist entry with a direct URL
    Url,
}

#[derive(Parser, Debug)]
#[command(version, about = "Play Xtream Codes live channels, movies and episodes")]
struct Cli {
    /// What to play
    #[arg(value_enum)]
    kind: Kind,

    /// Stream id, or the URL for `url`
    target: String,

    #[arg(long, env = "XTREAM_SERVER")]
    server: String,

    #[arg(long, env = "XTREAM_USERNAME")]
    username: String,

    #[arg(long, env = "XTREAM_PASSWORD", hide_env_values = true)]
    password: String,

    /// Profile that owns the resume positions
    #[arg(long, default_value = "default")]
    profile: String,

    /// ffplay, mpv, vlc, any player command, or `internal`
    #[arg(long)]
    player: Option<String>,

    /// Name shown while playing
    #[arg(long)]
    name: Option<String>,

    /// Container extension from the catalogue (mp4, mkv, ...)
    #[arg(long)]
    container: Option<String>,

    /// XMLTV channel id of a live channel
    #[arg(long)]
    epg_channel: Option<String>,

    /// Read the guide from this XMLTV file instead of the panel
    #[arg(long)]
    epg_url: Option<String>,

    #[arg(long)]
    series_id: Option<i64>,

    #[arg(long, default_value_t = 1)]
    season: i32,

    #[arg(long, default_value_t = 1)]
    episode_num: i32,

    /// Ignore the saved position and start from the beginning
    #[arg(long)]
    restart: bool,

    /// Send credentials with POST
    #[arg(long)]
    post: bool,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "xtreme_playback=debug"
    } else {
        "xtreme_playback=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli) {
        error!(error = %e, "Playback failed");
        return Err(e);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => PlayerConfig::load_from(path)?,
        None => PlayerConfig::load(),
    };
    if let Some(player) = &cli.player {
        config.external_player = player.clone();
    }

    let reference = build_reference(&cli)?;
    let client = Arc::new(
        XtreamClient::new(&cli.server, &cli.username, &cli.password)
            .with_user_agent(&config.user_agent)
            .with_post_method(cli.post),
    );
    let storage = JsonFileStorage::open(&JsonFileStorage::default_path())?;

    let builder = PlaybackController::builder(&cli.profile)
        .config(config.clone())
        .stream_source(Arc::clone(&client))
        .episode_source(Arc::clone(&client))
        .storage(storage)
        .segmented_backend(HlsBackend::new(&config.user_agent, config.connection_quality));

    let builder = match &cli.epg_url {
        Some(url) => {
            let download = DownloadConfig {
                user_agent: config.user_agent.clone(),
                ..Default::default()
            };
            let schedule = XmltvSchedule::download(url, &download)?
                .with_time_offset(config.epg_offset_secs());
            builder.schedule_source(Arc::new(schedule))
        }
        None => builder.schedule_source(Arc::clone(&client)),
    };

    let mut controller = with_sink(builder, &config)?.build()?;
    controller.select_content(reference);
    play_until_done(&mut controller, cli.restart)
}

fn with_sink(
    builder: PlaybackControllerBuilder,
    config: &PlayerConfig,
) -> Result<PlaybackControllerBuilder, Box<dyn Error>> {
    if config.external_player.eq_ignore_ascii_case("internal") {
        #[cfg(feature = "internal-player")]
        {
            return Ok(builder.sink(xtreme_playback::ffmpeg_player::FfmpegSink::new(
                &config.user_agent,
            )));
        }
        #[cfg(not(feature = "internal-player"))]
        {
            return Err("Internal player not enabled. Build with --features internal-player".into());
        }
    }
    Ok(builder.sink(ExternalPlayerSink::new(PlayerOptions::from_config(config))))
}

fn build_reference(cli: &Cli) -> Result<ContentReference, Box<dyn Error>> {
    let name = cli.name.clone().unwrap_or_else(|| cli.target.clone());

    let reference = match cli.kind {
        Kind::Url => ContentReference::channel(&name, &cli.target),
        Kind::Live => ContentReference::from_payload(ContentPayload::LiveChannel(LiveStreamPayload {
            stream_id: cli.target.parse()?,
            name,
            epg_channel_id: cli.epg_channel.clone(),
            stream_icon: None,
        })),
        Kind::Movie => ContentReference::from_payload(ContentPayload::Movie(MoviePayload {
            stream_id: cli.target.parse()?,
            name,
            container_extension: cli.container.clone(),
        })),
        Kind::Episode => {
            let series_id = cli.series_id.ok_or("--series-id is required for episodes")?;
            ContentReference::episode(EpisodePayload {
                episode_id: Some(cli.target.parse()?),
                series_id,
                season: cli.season,
                episode_num: cli.episode_num,
                title: name,
                container_extension: cli.container.clone(),
                next_episode: None,
            })
        }
    };
    Ok(reference)
}

fn play_until_done(controller: &mut PlaybackController, restart: bool) -> Result<(), Box<dyn Error>> {
    let mut ended = false;

    loop {
        controller.poll();

        for notice in controller.drain_notices() {
            match notice {
                SessionNotice::ResumePrompt { position } => {
                    if restart {
                        info!("[RESUME] Starting from the beginning");
                        controller.restart_from_beginning();
                    } else {
                        println!("Resuming at {}", format_position(position));
                        controller.confirm_resume();
                    }
                }
                SessionNotice::NowPlaying(now) => match &now.program {
                    Some(program) => println!(
                        "Now playing: {} | {} ({} - {})",
                        now.title,
                        program.title,
                        format_time(program.start_epoch),
                        format_time(program.stop_epoch)
                    ),
                    None => println!("Now playing: {}", now.title),
                },
                SessionNotice::StreamUnavailable(reason) => {
                    return Err(format!("Stream unavailable: {}", reason).into());
                }
                SessionNotice::CompatibilityWarning(details) => {
                    warn!(details = %details, "[PLAY] Playback problem");
                }
                SessionNotice::AutoplayBlocked => {
                    warn!("[PLAY] Player refused to start");
                }
                SessionNotice::CountdownStarted { seconds } => {
                    println!("Next episode in {}s", seconds);
                }
                SessionNotice::NextEpisode { title } => {
                    println!("Up next: {}", title);
                    ended = false;
                }
                SessionNotice::PositionSaved { position } => {
                    debug!(position, "[RESUME] Position saved");
                }
                SessionNotice::PlaybackEnded => ended = true,
            }
        }

        let snapshot = controller.snapshot();
        if snapshot.engine_state == EngineState::Failed {
            return Err("Playback failed, the stream could not be played".into());
        }
        let rolling_over = matches!(
            snapshot.transition,
            TransitionState::CountdownActive | TransitionState::Committed
        );
        if ended && !rolling_over {
            info!("[PLAY] Finished");
            return Ok(());
        }

        thread::sleep(TICK);
    }
}

fn format_position(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
