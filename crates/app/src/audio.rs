use anyhow::{Context, Result};
use atlasvoice_core::constants::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use atlasvoice_core::error::DeviceError;
use crate::resample::{downmix, upmix, MonoResampler};
use atlasvoice_core::{
    AudioFrame, EventSender, InputDevice, Mixer, OutputDevice, SegmentId, SessionEvent,
    SessionState, StateWatch,
};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use log::{debug, info, warn};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn find_input_device(host: &cpal::Host, name: &str) -> Result<cpal::Device> {
    if name == "default" {
        host.default_input_device()
            .context("No default input found")
    } else {
        host.input_devices()?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .context("Input device not found")
    }
}

fn find_output_device(host: &cpal::Host, name: &str) -> Result<cpal::Device> {
    if name == "default" {
        host.default_output_device()
            .context("No default output found")
    } else {
        host.output_devices()?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .context("Output device not found")
    }
}

/// Stream format chosen for a device.
#[derive(Debug, Clone)]
struct DeviceFormat {
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
}

impl DeviceFormat {
    fn channels(&self) -> usize {
        self.config.channels.max(1) as usize
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

/// Mono f32 at `rate` when the device offers it, otherwise the device default.
fn pick_format(
    rate: u32,
    supported: &[cpal::SupportedStreamConfigRange],
    default: &cpal::SupportedStreamConfig,
) -> DeviceFormat {
    let native = supported.iter().any(|range| {
        range.channels() == 1
            && range.sample_format() == cpal::SampleFormat::F32
            && range.min_sample_rate().0 <= rate
            && rate <= range.max_sample_rate().0
    });
    if native {
        return DeviceFormat {
            config: cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            },
            sample_format: cpal::SampleFormat::F32,
        };
    }
    DeviceFormat {
        config: default.config(),
        sample_format: default.sample_format(),
    }
}

fn input_format(device: &cpal::Device) -> Result<DeviceFormat> {
    let supported: Vec<_> = device
        .supported_input_configs()
        .map(|configs| configs.collect())
        .unwrap_or_default();
    let default = device
        .default_input_config()
        .context("Failed to get default input config")?;
    Ok(pick_format(INPUT_SAMPLE_RATE, &supported, &default))
}

fn output_format(device: &cpal::Device) -> Result<DeviceFormat> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map(|configs| configs.collect())
        .unwrap_or_default();
    let default = device
        .default_output_config()
        .context("Failed to get default output config")?;
    Ok(pick_format(OUTPUT_SAMPLE_RATE, &supported, &default))
}

/// Only a vanished device ends the call; other stream hiccups are logged.
fn report_stream_error(events: &EventSender, label: &str, err: cpal::StreamError) {
    warn!("{} error: {}", label, err);
    if matches!(err, cpal::StreamError::DeviceNotAvailable) {
        let _ = events.send(SessionEvent::DeviceFailed(format!("{}: {}", label, err)));
    }
}

fn build_capture_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut prod: HeapProd<f32>,
    events: EventSender,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device.build_input_stream(
        config,
        move |data: &[T], _| {
            for sample in data {
                let _ = prod.try_push(f32::from_sample(*sample));
            }
        },
        move |err| report_stream_error(&events, "Input", err),
        None,
    )
}

/// Cuts device-format capture into fixed 16kHz mono blocks.
struct CaptureFramer {
    channels: usize,
    resampler: MonoResampler,
    block_size: usize,
    pending: Vec<f32>,
}

impl CaptureFramer {
    fn new(format: &DeviceFormat, block_size: usize) -> Result<Self> {
        // 10ms of device audio per resampler chunk
        let chunk = (format.sample_rate() / 100).max(1) as usize;
        Ok(Self {
            channels: format.channels(),
            resampler: MonoResampler::new(format.sample_rate(), INPUT_SAMPLE_RATE, chunk)?,
            block_size,
            pending: Vec::with_capacity(block_size * 2),
        })
    }

    /// Takes whole interleaved frames and returns every completed block.
    fn push(&mut self, interleaved: &[f32]) -> Result<Vec<Vec<f32>>> {
        let mono = downmix(interleaved, self.channels);
        let resampled = self.resampler.process(&mono)?;
        self.pending.extend_from_slice(&resampled);

        let mut blocks = Vec::new();
        while self.pending.len() >= self.block_size {
            blocks.push(self.pending.drain(..self.block_size).collect());
        }
        Ok(blocks)
    }
}

/// Microphone capture delivered as 16kHz mono blocks.
///
/// The cpal callback only copies into a ring buffer. A pump thread downmixes
/// and resamples, cuts fixed-size blocks and queues them as `CaptureBlock`
/// events, discarding audio while the session is not connected.
pub struct CpalInput {
    stream: Option<cpal::Stream>,
    is_running: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl CpalInput {
    pub fn acquire(
        device_name: &str,
        block_size: usize,
        events: EventSender,
        state: StateWatch,
    ) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = find_input_device(&host, device_name)
            .map_err(|e| DeviceError::NotFound(format!("{} ({:#})", device_name, e)))?;
        let format = input_format(&device).map_err(|e| DeviceError::device(format!("{:#}", e)))?;
        let mut framer = CaptureFramer::new(&format, block_size)
            .map_err(|e| DeviceError::device(format!("{:#}", e)))?;
        info!(
            "Using input device: {} ({} Hz, {} ch, {:?}{})",
            device.name().unwrap_or_default(),
            format.sample_rate(),
            format.channels(),
            format.sample_format,
            if framer.resampler.is_passthrough() { "" } else { ", resampled" }
        );

        // Room for a few blocks of jitter between callback and pump
        let capacity = (block_size * 4)
            .max(format.sample_rate() as usize / 4)
            * format.channels();
        let rb = HeapRb::<f32>::new(capacity);
        let (prod, mut cons) = rb.split();

        let error_events = events.clone();
        let stream = match format.sample_format {
            cpal::SampleFormat::F32 => {
                build_capture_stream::<f32>(&device, &format.config, prod, error_events)
            }
            cpal::SampleFormat::I16 => {
                build_capture_stream::<i16>(&device, &format.config, prod, error_events)
            }
            cpal::SampleFormat::U16 => {
                build_capture_stream::<u16>(&device, &format.config, prod, error_events)
            }
            other => {
                return Err(DeviceError::device(format!(
                    "Unsupported input sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| DeviceError::stream(e.to_string()))?;

        let is_running = Arc::new(AtomicBool::new(true));
        let run_flag = is_running.clone();
        let channels = format.channels();

        let pump = thread::Builder::new()
            .name("atlasvoice-capture".into())
            .spawn(move || {
                let mut scratch = vec![0.0f32; capacity];
                while run_flag.load(Ordering::Relaxed) {
                    let available = cons.occupied_len() / channels * channels;
                    if available == 0 {
                        thread::sleep(Duration::from_millis(2));
                        continue;
                    }
                    let read = cons.pop_slice(&mut scratch[..available]);
                    let blocks = match framer.push(&scratch[..read]) {
                        Ok(blocks) => blocks,
                        Err(e) => {
                            warn!("Dropping capture audio: {:#}", e);
                            continue;
                        }
                    };
                    if state.get() != SessionState::Connected {
                        continue;
                    }
                    for block in blocks {
                        let frame = AudioFrame::new(block);
                        if events.send(SessionEvent::CaptureBlock(frame)).is_err() {
                            return;
                        }
                    }
                }
            })
            .map_err(|e| DeviceError::device(format!("Failed to spawn capture thread: {}", e)))?;

        Ok(Self {
            stream: Some(stream),
            is_running,
            pump: Some(pump),
        })
    }
}

impl InputDevice for CpalInput {
    fn start(&mut self) -> Result<(), DeviceError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| DeviceError::stream("input already released"))?;
        stream.play().map_err(|e| DeviceError::stream(e.to_string()))
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        self.is_running.store(false, Ordering::Relaxed);
        let paused = match self.stream.take() {
            Some(stream) => stream.pause().map_err(|e| DeviceError::stream(e.to_string())),
            None => Ok(()),
        };
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
        paused
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Relaxed);
    }
}

fn lock_mixer(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mixer blocks are 20ms of 24kHz audio.
const RENDER_BLOCK: usize = 480;

/// Pulls 24kHz mono from the mixer and shapes it for the device.
struct OutputRenderer {
    mixer: Arc<Mutex<Mixer>>,
    resampler: MonoResampler,
    channels: usize,
    ready: VecDeque<f32>,
    block: Vec<f32>,
    mono: Vec<f32>,
    finished: Vec<SegmentId>,
    events: EventSender,
}

impl OutputRenderer {
    fn new(
        mixer: Arc<Mutex<Mixer>>,
        format: &DeviceFormat,
        events: EventSender,
    ) -> Result<Self> {
        Ok(Self {
            mixer,
            resampler: MonoResampler::new(OUTPUT_SAMPLE_RATE, format.sample_rate(), RENDER_BLOCK)?,
            channels: format.channels(),
            ready: VecDeque::with_capacity(RENDER_BLOCK * 4),
            block: vec![0.0; RENDER_BLOCK],
            mono: Vec::with_capacity(RENDER_BLOCK * 4),
            finished: Vec::with_capacity(16),
            events,
        })
    }

    /// Fills one interleaved device buffer.
    fn fill(&mut self, data: &mut [f32]) {
        let frames = data.len() / self.channels;
        while self.ready.len() < frames {
            lock_mixer(&self.mixer).render(&mut self.block, &mut self.finished);
            for id in self.finished.drain(..) {
                let _ = self.events.send(SessionEvent::SegmentFinished(id));
            }
            match self.resampler.process(&self.block) {
                Ok(samples) if !samples.is_empty() => self.ready.extend(samples),
                Ok(_) => break,
                Err(e) => {
                    warn!("Output resampling failed: {:#}", e);
                    break;
                }
            }
        }

        self.mono.clear();
        let take = frames.min(self.ready.len());
        self.mono.extend(self.ready.drain(..take));
        self.mono.resize(frames, 0.0);
        upmix(&self.mono, self.channels, data);
    }
}

fn build_playback_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut renderer: OutputRenderer,
    events: EventSender,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            scratch.resize(data.len(), 0.0);
            renderer.fill(&mut scratch);
            for (out, sample) in data.iter_mut().zip(&scratch) {
                *out = T::from_sample(*sample);
            }
        },
        move |err| report_stream_error(&events, "Output", err),
        None,
    )
}

/// Speaker playback of the 24kHz mono mix.
///
/// The output callback renders the shared `Mixer`, whose sample counter is
/// the device clock, converts it to the device format and reports finished
/// segments back to the session.
pub struct CpalOutput {
    stream: Option<cpal::Stream>,
    mixer: Arc<Mutex<Mixer>>,
}

impl CpalOutput {
    pub fn acquire(device_name: &str, events: EventSender) -> Result<Self, DeviceError> {
        let host = cpal::default_host();
        let device = find_output_device(&host, device_name)
            .map_err(|e| DeviceError::NotFound(format!("{} ({:#})", device_name, e)))?;
        let format =
            output_format(&device).map_err(|e| DeviceError::device(format!("{:#}", e)))?;

        let mixer = Arc::new(Mutex::new(Mixer::new(OUTPUT_SAMPLE_RATE)));
        let renderer = OutputRenderer::new(mixer.clone(), &format, events.clone())
            .map_err(|e| DeviceError::device(format!("{:#}", e)))?;
        info!(
            "Using output device: {} ({} Hz, {} ch, {:?}{})",
            device.name().unwrap_or_default(),
            format.sample_rate(),
            format.channels(),
            format.sample_format,
            if renderer.resampler.is_passthrough() { "" } else { ", resampled" }
        );

        let stream = match format.sample_format {
            cpal::SampleFormat::F32 => {
                build_playback_stream::<f32>(&device, &format.config, renderer, events)
            }
            cpal::SampleFormat::I16 => {
                build_playback_stream::<i16>(&device, &format.config, renderer, events)
            }
            cpal::SampleFormat::U16 => {
                build_playback_stream::<u16>(&device, &format.config, renderer, events)
            }
            other => {
                return Err(DeviceError::device(format!(
                    "Unsupported output sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| DeviceError::stream(e.to_string()))?;

        // The clock starts running as soon as the device is acquired
        stream
            .play()
            .map_err(|e| DeviceError::stream(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            mixer,
        })
    }
}

impl OutputDevice for CpalOutput {
    fn now(&self) -> f64 {
        lock_mixer(&self.mixer).now()
    }

    fn schedule(
        &mut self,
        id: SegmentId,
        start_time: f64,
        samples: Arc<[f32]>,
    ) -> Result<(), DeviceError> {
        if self.stream.is_none() {
            return Err(DeviceError::stream("output already released"));
        }
        lock_mixer(&self.mixer).schedule(id, start_time, samples);
        Ok(())
    }

    fn stop(&mut self, id: SegmentId) -> Result<(), DeviceError> {
        lock_mixer(&self.mixer).stop(id);
        Ok(())
    }

    fn release(&mut self) -> Result<(), DeviceError> {
        {
            let mut mixer = lock_mixer(&self.mixer);
            debug!("Releasing output with {} segment(s) still mixed", mixer.active_len());
            mixer.clear();
        }
        match self.stream.take() {
            Some(stream) => stream.pause().map_err(|e| DeviceError::stream(e.to_string())),
            None => Ok(()),
        }
    }
}

/// Prints the audio host and every input/output device name.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    println!("Audio Host: {}", host.id().name());
    println!("\nInput Devices:");
    for device in host.input_devices()? {
        println!("  - {}", device.name().unwrap_or("Unknown".to_string()));
    }
    println!("\nOutput Devices:");
    for device in host.output_devices()? {
        println!("  - {}", device.name().unwrap_or("Unknown".to_string()));
    }
    Ok(())
}
