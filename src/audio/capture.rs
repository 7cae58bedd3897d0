//! Live capture through cpal on a dedicated thread

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::thread::{self, JoinHandle};

use super::block::AudioBlock;
use super::source::{AudioSource, CaptureError, CaptureHandler, StreamInfo};

/// Which device a source id refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelector {
    /// Loopback of the default output device
    SystemAudio,
    /// Loopback of a named output device
    Output(String),
    /// Default input device
    DefaultInput,
    /// Named input device
    Input(String),
    /// An id that matches no known form; starting it fails
    Unknown(String),
}

impl SourceSelector {
    pub fn parse(id: &str) -> Self {
        match id {
            "" | "system_audio" => Self::SystemAudio,
            "input" => Self::DefaultInput,
            _ => {
                if let Some(name) = id.strip_prefix("output:") {
                    Self::Output(name.to_string())
                } else if let Some(name) = id.strip_prefix("input:") {
                    Self::Input(name.to_string())
                } else {
                    log::warn!("Unknown source id '{}'", id);
                    Self::Unknown(id.to_string())
                }
            }
        }
    }

    fn is_loopback(&self) -> bool {
        matches!(self, Self::SystemAudio | Self::Output(_))
    }
}

/// Source kind shown by `list_sources`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    SystemAudio,
    InputDevice,
}

#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
}

/// List capture sources on the default host.
pub fn list_sources() -> Vec<SourceInfo> {
    let mut sources = Vec::new();
    let host = cpal::default_host();
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    if let Some(ref name) = default_output {
        sources.push(SourceInfo {
            id: "system_audio".to_string(),
            name: format!("System Audio ({})", name),
            kind: SourceKind::SystemAudio,
        });
    }

    match host.output_devices() {
        Ok(devices) => {
            for name in devices.filter_map(|d| d.name().ok()) {
                if default_output.as_deref() == Some(name.as_str()) {
                    continue;
                }
                sources.push(SourceInfo {
                    id: format!("output:{}", name),
                    name: format!("Loopback: {}", name),
                    kind: SourceKind::SystemAudio,
                });
            }
        }
        Err(e) => log::warn!("Failed to enumerate output devices: {}", e),
    }

    match host.input_devices() {
        Ok(devices) => {
            for name in devices.filter_map(|d| d.name().ok()) {
                sources.push(SourceInfo {
                    id: format!("input:{}", name),
                    name: format!("Input: {}", name),
                    kind: SourceKind::InputDevice,
                });
            }
        }
        Err(e) => log::warn!("Failed to enumerate input devices: {}", e),
    }

    sources
}

enum CaptureCommand {
    Stop,
}

/// Device capture. The cpal stream lives on its own thread, so this handle is `Send`.
pub struct CpalSource {
    selector: SourceSelector,
    command_tx: Option<Sender<CaptureCommand>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalSource {
    pub fn new(source_id: &str) -> Self {
        Self {
            selector: SourceSelector::parse(source_id),
            command_tx: None,
            thread_handle: None,
        }
    }
}

impl AudioSource for CpalSource {
    fn describe(&self) -> String {
        match &self.selector {
            SourceSelector::SystemAudio => "system audio".to_string(),
            SourceSelector::Output(name) => format!("loopback of {}", name),
            SourceSelector::DefaultInput => "default input".to_string(),
            SourceSelector::Input(name) => format!("input {}", name),
            SourceSelector::Unknown(id) => format!("unknown source {}", id),
        }
    }

    fn start(&mut self, handler: CaptureHandler) -> Result<StreamInfo, CaptureError> {
        self.stop();

        if let SourceSelector::Unknown(id) = &self.selector {
            return Err(CaptureError::SourceNotFound(id.clone()));
        }

        let (command_tx, command_rx) = bounded(1);
        let (ready_tx, ready_rx) = bounded(1);
        let selector = self.selector.clone();

        let thread_handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || run_capture_thread(selector, handler, ready_tx, command_rx))
            .map_err(|e| CaptureError::ThreadError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(info)) => {
                self.command_tx = Some(command_tx);
                self.thread_handle = Some(thread_handle);
                Ok(info)
            }
            Ok(Err(e)) => {
                let _ = thread_handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(CaptureError::ThreadError(
                    "capture thread exited before reporting".to_string(),
                ))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(CaptureCommand::Stop);
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_capture_thread(
    selector: SourceSelector,
    handler: CaptureHandler,
    ready_tx: Sender<Result<StreamInfo, CaptureError>>,
    command_rx: Receiver<CaptureCommand>,
) {
    let stream = match open_stream(&selector, handler) {
        Ok((stream, info)) => {
            let _ = ready_tx.send(Ok(info));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Blocks until stop is requested or the handle is dropped
    let _ = command_rx.recv();
    drop(stream);
    log::info!("Audio capture stopped");
}

fn open_stream(
    selector: &SourceSelector,
    handler: CaptureHandler,
) -> Result<(cpal::Stream, StreamInfo), CaptureError> {
    let host = cpal::default_host();
    let device = resolve_device(&host, selector)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    // For loopback the device is an output, so query what it is producing
    let config = if selector.is_loopback() {
        device
            .default_output_config()
            .map_err(|e| CaptureError::ConfigError(format!("Loopback config: {}", e)))?
    } else {
        device
            .default_input_config()
            .map_err(|e| CaptureError::ConfigError(e.to_string()))?
    };

    let info = StreamInfo {
        sample_rate: config.sample_rate().0,
        channels: config.channels(),
    };
    log::info!(
        "Audio capture from {}: {} Hz, {} channels, {:?}",
        device_name,
        info.sample_rate,
        info.channels,
        config.sample_format()
    );

    let stream_config: StreamConfig = config.config();
    let stream = match config.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, handler, info),
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, handler, info),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, handler, info),
        SampleFormat::I32 => build_stream::<i32>(&device, &stream_config, handler, info),
        other => {
            return Err(CaptureError::ConfigError(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(|e| CaptureError::StreamError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::PlayError(e.to_string()))?;

    Ok((stream, info))
}

fn resolve_device(host: &cpal::Host, selector: &SourceSelector) -> Result<Device, CaptureError> {
    match selector {
        SourceSelector::SystemAudio => host
            .default_output_device()
            .ok_or(CaptureError::NoOutputDevice),
        SourceSelector::DefaultInput => host
            .default_input_device()
            .ok_or(CaptureError::NoInputDevice),
        SourceSelector::Output(name) => find_named(host.output_devices(), name),
        SourceSelector::Input(name) => find_named(host.input_devices(), name),
        SourceSelector::Unknown(id) => Err(CaptureError::SourceNotFound(id.clone())),
    }
}

fn find_named<I>(devices: Result<I, cpal::DevicesError>, name: &str) -> Result<Device, CaptureError>
where
    I: Iterator<Item = Device>,
{
    devices
        .map_err(|e| CaptureError::ConfigError(e.to_string()))?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| CaptureError::SourceNotFound(name.to_string()))
}

fn build_stream<T: cpal::Sample + cpal::SizedSample>(
    device: &Device,
    config: &StreamConfig,
    handler: CaptureHandler,
    info: StreamInfo,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    f32: cpal::FromSample<T>,
{
    let error_handler = handler.clone();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples: Vec<f32> = data
                .iter()
                .map(|s| cpal::Sample::from_sample(*s))
                .collect();
            handler.deliver(AudioBlock::interleaved(samples, info.channels, info.sample_rate));
        },
        move |err| match err {
            cpal::StreamError::DeviceNotAvailable => {
                error_handler.invalidate("capture device is no longer available")
            }
            other => log::error!("Audio stream error: {}", other),
        },
        None,
    )
}
