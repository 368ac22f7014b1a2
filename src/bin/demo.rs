// Bundled demo: loads an AudioCollection from disk, plays one sound by
// key, and pumps PCM to the default output device via cpal. Exercises
// the same `FakeHostMixer` the library's own tests use - it's real
// enough to drive a speaker, just without a production host's mixing
// graph around it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::tick;

use genesis_audio_core::collection::Package;
use genesis_audio_core::{AudioCollection, AudioPlayer, AudioSourceManager, AudioSystemConfig, FakeHostMixer};

static SHOULD_STOP: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_signal(_: libc::c_int) {
    SHOULD_STOP.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

fn parse_args() -> (PathBuf, String, String) {
    let mut args = std::env::args().skip(1);
    let collection_dir = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let collection_file = args.next().unwrap_or_else(|| "sounds.json".to_string());
    let key = args.next().unwrap_or_else(|| "01".to_string());
    (collection_dir, collection_file, key)
}

fn main() -> Result<()> {
    env_logger::init();
    install_signal_handlers();

    let config = AudioSystemConfig::load();
    let (collection_dir, collection_file, key) = parse_args();

    let mut collection = AudioCollection::new();
    if config.collection_base_paths.is_empty() {
        collection
            .load_from_json(&collection_dir, &collection_file, Package::Original)
            .with_context(|| format!("loading {collection_file} from {}", collection_dir.display()))?;
    } else {
        for base_path in &config.collection_base_paths {
            collection.load_all_packages(base_path, &collection_file);
        }
    }
    collection.determine_active_source_registrations(config.prefer_original_soundtrack);

    const OUTPUT_BUFFER_FRAMES: usize = 1024;

    let host = cpal::default_host();
    let device = host.default_output_device().context("no default output device")?;
    let supported_config = device.default_output_config().context("no default output config")?;
    let sample_rate = supported_config.sample_rate().0;
    let stream_config: cpal::StreamConfig = supported_config.config();

    let sources = AudioSourceManager::new(sample_rate, config.frame_rate);
    let mixer = FakeHostMixer::new(sample_rate, OUTPUT_BUFFER_FRAMES);
    let mut player = AudioPlayer::new(collection, sources, mixer, config.prefer_original_soundtrack);

    let key_id = genesis_audio_core::hash::resolve_key_id(&key);
    if !player.play_audio(key_id, 0) {
        log::warn!("could not start playback for key '{key}'");
    }

    let player = Arc::new(std::sync::Mutex::new(player));
    let stream = build_output_stream(&device, &stream_config, player.clone())?;
    stream.play().context("starting output stream")?;

    let ticker = tick(Duration::from_secs_f64(1.0 / config.frame_rate));
    while !SHOULD_STOP.load(Ordering::SeqCst) {
        ticker.recv().ok();
        let mut guard = player.lock().unwrap();
        if guard.num_playing_sounds() == 0 {
            break;
        }
        guard.update_playback(1.0 / config.frame_rate);
    }

    Ok(())
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    player: Arc<std::sync::Mutex<AudioPlayer<FakeHostMixer>>>,
) -> Result<cpal::Stream> {
    let channels = config.channels as usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [i16], _| {
            let guard = player.lock().unwrap();
            let frames = data.len() / channels.max(1);
            let mut stereo = vec![0i16; frames * 2];
            guard.mixer().pull(&mut stereo, frames);
            for (frame, out) in stereo.chunks(2).zip(data.chunks_mut(channels.max(2))) {
                out[0] = frame[0];
                if out.len() > 1 {
                    out[1] = frame[1];
                }
            }
        },
        |err| log::error!("output stream error: {err}"),
        None,
    )?;
    Ok(stream)
}
