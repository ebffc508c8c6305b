//! Audio device output.
//!
//! [`CpalDevice`] discovers output devices; with the `cpal_sink` feature
//! enabled, [`CpalDevice::play`] moves a [`Runtime`] onto the device's
//! callback thread, where it renders blocks on demand.
//!
//! # Example
//!
//! ```no_run
//! use patchbay::{Atom, CpalDevice, ObjectLibrary, Runtime};
//!
//! let device = CpalDevice::default_output().expect("no output device");
//! let mut runtime = Runtime::new(device.settings(), ObjectLibrary::default());
//! let patch = runtime.create_patch(vec![]);
//! let osc = runtime.create_object(patch, "osc~", vec![Atom::Float(440.0)]).unwrap();
//! let dac = runtime.create_object(patch, "dac~", vec![]).unwrap();
//! runtime.connect(runtime.outlet(osc, 0).unwrap(), runtime.inlet(dac, 0).unwrap()).unwrap();
//! runtime.start();
//!
//! # #[cfg(feature = "cpal_sink")]
//! let playback = device.play(runtime).unwrap();
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! ```

#[cfg(feature = "cpal_sink")]
use cpal::traits::{DeviceTrait, HostTrait};

use crate::runtime::Runtime;
use crate::settings::Settings;

/// Errors raised while opening an output stream.
#[cfg(feature = "cpal_sink")]
#[derive(thiserror::Error, Debug)]
pub enum DeviceError {
    #[error("failed to build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
    #[error("unsupported sample format {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),
    #[error("audio thread exited before the stream started")]
    ThreadExited,
}

/// A discovered audio output device.
pub struct CpalDevice {
    #[cfg(feature = "cpal_sink")]
    device: cpal::Device,
    #[cfg(feature = "cpal_sink")]
    config: cpal::SupportedStreamConfig,

    name: String,
    sample_rate: u32,
    channels: u16,
}

impl CpalDevice {
    /// The system's default output device, if there is one.
    #[cfg(feature = "cpal_sink")]
    pub fn default_output() -> Option<Self> {
        let host = cpal::default_host();
        Self::from_device(host.default_output_device()?)
    }

    #[cfg(not(feature = "cpal_sink"))]
    pub fn default_output() -> Option<Self> {
        None
    }

    /// Every output device that reports a default configuration.
    #[cfg(feature = "cpal_sink")]
    pub fn list_outputs() -> Vec<Self> {
        let host = cpal::default_host();
        host.output_devices()
            .map(|devices| devices.filter_map(Self::from_device).collect())
            .unwrap_or_default()
    }

    #[cfg(not(feature = "cpal_sink"))]
    pub fn list_outputs() -> Vec<Self> {
        Vec::new()
    }

    #[cfg(feature = "cpal_sink")]
    fn from_device(device: cpal::Device) -> Option<Self> {
        let config = device.default_output_config().ok()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".into());
        Some(Self {
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            name,
            device,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Runtime settings matching this device.
    pub fn settings(&self) -> Settings {
        Settings::default()
            .with_sample_rate(self.sample_rate)
            .with_channel_count(self.channels as usize)
    }

    /// Start playing `runtime` on this device.
    ///
    /// The stream lives on its own thread and keeps rendering until the
    /// returned [`Playback`] is dropped. Talk to the runtime through a
    /// [`ControlSender`](crate::ControlSender) created beforehand.
    #[cfg(feature = "cpal_sink")]
    pub fn play(&self, runtime: Runtime) -> Result<Playback, DeviceError> {
        use cpal::traits::StreamTrait;
        use std::sync::mpsc;

        if runtime.sample_rate() != self.sample_rate {
            tracing::warn!(
                runtime = runtime.sample_rate(),
                device = self.sample_rate,
                "sample rate mismatch, audio will play at the wrong speed"
            );
        }

        let device = self.device.clone();
        let format = self.config.sample_format();
        let config = self.config.config();
        let (started_tx, started_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        // cpal streams are not Send everywhere, so the stream stays on the
        // thread that built it.
        let thread = std::thread::spawn(move || {
            let stream = match build_stream(&device, format, &config, runtime) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = started_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = started_tx.send(Err(e.into()));
                return;
            }
            let _ = started_tx.send(Ok(()));
            // blocks until the Playback handle is dropped
            let _ = stop_rx.recv();
        });

        started_rx.recv().map_err(|_| DeviceError::ThreadExited)??;
        tracing::debug!(device = %self.name, sample_rate = self.sample_rate, "playback started");
        Ok(Playback { stop: Some(stop_tx), thread: Some(thread) })
    }
}

/// A running output stream. Dropping it stops playback and drops the
/// runtime.
#[cfg(feature = "cpal_sink")]
pub struct Playback {
    stop: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

#[cfg(feature = "cpal_sink")]
impl Drop for Playback {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(feature = "cpal_sink")]
fn build_stream(
    device: &cpal::Device,
    format: cpal::SampleFormat,
    config: &cpal::StreamConfig,
    runtime: Runtime,
) -> Result<cpal::Stream, DeviceError> {
    use cpal::SampleFormat;

    match format {
        SampleFormat::F32 => build_typed_stream::<f32>(device, config, runtime),
        SampleFormat::I16 => build_typed_stream::<i16>(device, config, runtime),
        SampleFormat::U16 => build_typed_stream::<u16>(device, config, runtime),
        other => Err(DeviceError::UnsupportedFormat(other)),
    }
}

#[cfg(feature = "cpal_sink")]
fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut runtime: Runtime,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let mut interleaver = BlockInterleaver::new(config.channels as usize);
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for sample in data.iter_mut() {
                *sample = T::from_sample(interleaver.next_sample(&mut runtime).clamp(-1.0, 1.0));
            }
        },
        |err| tracing::error!(%err, "audio stream error"),
        None,
    )?;
    Ok(stream)
}

/// Renders blocks from a [`Runtime`] and hands them out one interleaved
/// sample at a time.
///
/// Output channels past the runtime's bus repeat its last channel, so a mono
/// runtime plays on both sides of a stereo device.
pub struct BlockInterleaver {
    channels: usize,
    frame: Vec<f32>,
    position: usize,
}

impl BlockInterleaver {
    pub fn new(channels: usize) -> Self {
        let channels = channels.max(1);
        Self { channels, frame: Vec::with_capacity(channels * dasp_graph::Buffer::LEN), position: 0 }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The next interleaved sample, rendering a new block when the current
    /// one is used up.
    pub fn next_sample(&mut self, runtime: &mut Runtime) -> f32 {
        if self.position >= self.frame.len() {
            self.refill(runtime);
        }
        let sample = self.frame.get(self.position).copied().unwrap_or(0.0);
        self.position += 1;
        sample
    }

    /// Fill `out` with interleaved samples.
    pub fn fill(&mut self, runtime: &mut Runtime, out: &mut [f32]) {
        for sample in out.iter_mut() {
            *sample = self.next_sample(runtime);
        }
    }

    fn refill(&mut self, runtime: &mut Runtime) {
        let bus = runtime.process_block();
        self.frame.clear();
        self.position = 0;
        if bus.is_empty() {
            self.frame.resize(self.channels * dasp_graph::Buffer::LEN, 0.0);
            return;
        }
        for i in 0..dasp_graph::Buffer::LEN {
            for ch in 0..self.channels {
                self.frame.push(bus[ch.min(bus.len() - 1)][i]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ObjectLibrary;
    use crate::message::Atom;

    #[test]
    fn interleaves_and_duplicates_mono() {
        let settings = Settings::default().with_channel_count(1);
        let mut runtime = Runtime::new(settings, ObjectLibrary::default());
        let patch = runtime.create_patch(vec![]);
        let sig = runtime.create_object(patch, "sig~", vec![Atom::Float(0.5)]).unwrap();
        let dac = runtime.create_object(patch, "dac~", vec![Atom::Float(1.0)]).unwrap();
        runtime.connect(runtime.outlet(sig, 0).unwrap(), runtime.inlet(dac, 0).unwrap()).unwrap();
        runtime.start();

        let mut interleaver = BlockInterleaver::new(2);
        let mut out = vec![0.0; 2 * dasp_graph::Buffer::LEN + 2];
        interleaver.fill(&mut runtime, &mut out);

        assert!(out.iter().all(|s| *s == 0.5));
        assert_eq!(runtime.frame(), 2);
    }
}
