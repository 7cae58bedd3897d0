mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use cli::Cli;
use tapvis::audio::capture::{list_sources, CpalSource};
use tapvis::audio::decode::FileSource;
use tapvis::audio::AudioSource;
use tapvis::config;
use tapvis::display::{FrameSink, NullSink};
use tapvis::encode::ffmpeg::{EncoderOptions, FfmpegEncoder};
use tapvis::encode::wav::WavRecorder;
use tapvis::pacing::StopSignal;
use tapvis::render::create_synthesizer;
use tapvis::render::text::FpsOverlay;
use tapvis::{ProducerMode, Session, SessionOptions, SessionParts};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    if let Some(path) = cli.config.clone().or_else(config::find_config) {
        match config::load_config(&path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cli.merge(cfg);
            }
            Err(e) => log::warn!("Ignoring config: {}", e),
        }
    }

    if cli.list_sources {
        println!("Available sources:");
        for source in list_sources() {
            println!("  {:<40} {}", source.id, source.name);
        }
        return Ok(());
    }

    let render = cli.render_config();
    render.validate().context("Invalid render settings")?;

    log::info!("tapvis - real-time audio visualizer");
    log::info!(
        "Output: {}x{} @ {}fps, {}-bit, synthesizer={:?}",
        render.output_width,
        render.output_height,
        render.target_fps,
        render.bit_depth,
        cli.synthesizer
    );

    let source: Box<dyn AudioSource> = match cli.file {
        Some(ref path) => {
            if !path.exists() {
                anyhow::bail!("Input file not found: {}", path.display());
            }
            Box::new(FileSource::new(path, cli.block_frames).looping(cli.looping))
        }
        None => Box::new(CpalSource::new(&cli.source)),
    };

    let synthesizer = create_synthesizer(cli.synthesizer)
        .with_context(|| format!("Failed to create {:?} synthesizer", cli.synthesizer))?;

    let overlay = if render.show_fps {
        match FpsOverlay::new(cli.font.as_deref(), render.render_height()) {
            Ok(overlay) => Some(overlay),
            Err(e) => {
                log::warn!("FPS overlay disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let sink: Box<dyn FrameSink> = match cli.output {
        Some(ref output) => Box::new(FfmpegEncoder::new(&EncoderOptions {
            output: output.clone(),
            audio: cli.file.clone(),
            render_width: render.render_width(),
            render_height: render.render_height(),
            output_width: render.output_width,
            output_height: render.output_height,
            fps: render.target_fps,
            codec: cli.codec.clone(),
            pix_fmt: cli.pix_fmt.clone(),
            crf: cli.crf,
            bitrate: cli.bitrate.clone(),
        })?),
        None => Box::new(NullSink::new()),
    };
    if render.fullscreen {
        log::info!("Fullscreen requested, frames go to the {} sink", sink.name());
    }

    let producer = match cli.decoupled_interval_ms {
        Some(ms) => ProducerMode::Decoupled {
            interval: Duration::from_millis(ms.max(1)),
        },
        None => ProducerMode::CaptureDriven,
    };

    let options = SessionOptions {
        render,
        max_transform_size: cli.max_transform_size,
        producer,
        ..SessionOptions::default()
    };
    let parts = SessionParts {
        source,
        synthesizer,
        sink,
        recorder: cli.record.as_ref().map(WavRecorder::new),
        overlay,
    };
    let mut session = Session::start(options, parts).context("Failed to start session")?;

    let user_stop = StopSignal::new();
    {
        let user_stop = user_stop.clone();
        std::thread::Builder::new()
            .name("stdin-stop".to_string())
            .spawn(move || {
                let mut line = String::new();
                if std::io::stdin().read_line(&mut line).is_ok() {
                    user_stop.stop();
                }
            })
            .context("Failed to spawn stdin thread")?;
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));
    log::info!("Press Enter to stop");

    let limit = cli.duration.map(Duration::from_secs_f64);
    while !user_stop.wait_timeout(Duration::from_millis(250)) {
        let stats = session.stats();
        pb.set_message(format!(
            "{} blocks ({} dropped), {} frames, {} presented",
            stats.blocks_processed,
            stats.blocks_dropped,
            stats.frames_synthesized,
            stats.frames_presented
        ));
        if limit.is_some_and(|limit| session.elapsed() >= limit) {
            break;
        }
        if session.source_end().is_some() {
            break;
        }
    }

    let report = session.stop();
    pb.finish_with_message("Stopped");

    let stats = report.stats;
    log::info!(
        "Blocks: {} delivered, {} dropped, {} collapsed, {} without spectrum",
        stats.blocks_delivered,
        stats.blocks_dropped,
        stats.blocks_collapsed,
        stats.spectra_skipped
    );
    log::info!(
        "Frames: {} ticks, {} synthesized, {} failed, {} presented",
        stats.ticks,
        stats.frames_synthesized,
        stats.synthesis_failures,
        stats.frames_presented
    );
    if let Some(frames) = report.recorded_frames {
        log::info!("Recorded {} audio frames", frames);
    }
    if let Some(tapvis::audio::SourceEnd::Invalidated(reason)) = report.source_end {
        log::warn!("Capture ended early: {}", reason);
    }
    Ok(())
}
