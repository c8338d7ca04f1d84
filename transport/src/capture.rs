//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The bridge between an audio driver's capture callback and the pull based
//! media graph.
//!
//! The driver calls [`CaptureSlot::callback`] on its own thread with every
//! captured chunk. The chunk goes into a single latest-value slot; the
//! consumer takes it from there with [`CaptureSlot::read`]. There is no
//! queue: if the consumer falls behind, older chunks are replaced and counted
//! as overruns, and the driver thread never waits.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use arc_swap::ArcSwapOption;
use log::*;
use media_common::Instant;
use parking_lot::Mutex;
use thiserror::Error;

use crate::conference::{MediaBuffer, MixerError, SourceStream, FLAG_SYSTEM_TIME};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub sample_size_bits: u16,
    pub channels: u16,
    pub little_endian: bool,
    pub signed: bool,
}

impl AudioFormat {
    pub const fn frame_size(&self) -> usize {
        (self.sample_size_bits as usize / 8) * self.channels as usize
    }

    pub const fn bytes_per_second(&self) -> usize {
        self.frame_size() * self.sample_rate as usize
    }
}

/// Captured audio is always this; it's not negotiated with the device.
pub const CAPTURE_FORMAT: AudioFormat = AudioFormat {
    sample_rate: 44100,
    sample_size_bits: 16,
    channels: 1,
    little_endian: true,
    signed: true,
};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no captured audio available")]
    NoData,
    #[error("capture stream is already started")]
    AlreadyStarted,
    #[error("no usable capture device")]
    NoDevice,
    #[error("audio backend error: {0}")]
    Backend(String),
}

/// What the driver should do after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Continue,
    Complete,
    Abort,
}

// One chunk as the driver delivered it.
struct CapturedBuffer {
    data: Vec<u8>,
    captured_at: Instant,
}

/// Told about every new chunk, on the driver thread. Must not block.
pub trait TransferHandler: Send + Sync {
    fn transfer_data(&self, slot: &CaptureSlot);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
}

pub type InputCallback = Box<dyn FnMut(&[u8]) -> CallbackResult + Send>;

/// An opened driver stream.
pub trait NativeStream: Send {
    fn start(&mut self) -> Result<(), CaptureError>;
    fn stop(&mut self) -> Result<(), CaptureError>;
    fn close(&mut self) -> Result<(), CaptureError>;
}

/// The audio driver, set up once at startup and handed to whoever needs it.
pub trait AudioBackend {
    fn devices(&self) -> Vec<DeviceInfo>;
    fn open_input(
        &self,
        device_index: usize,
        format: AudioFormat,
        callback: InputCallback,
    ) -> Result<Box<dyn NativeStream>, CaptureError>;
}

/// Prefers capture-only devices over duplex ones.
pub fn pick_input_device(devices: &[DeviceInfo]) -> Option<usize> {
    let usable = || {
        devices
            .iter()
            .filter(|device| device.max_input_channels >= CAPTURE_FORMAT.channels)
    };
    usable()
        .find(|device| device.max_output_channels == 0)
        .or_else(|| usable().next())
        .map(|device| device.index)
}

// arc-swap can't hold unsized values directly.
struct Handler(Arc<dyn TransferHandler>);

/// Everything the driver thread touches. The driver's callback owns a
/// reference to this and nothing else, so the driver stream is never stopped
/// or closed from inside its own callback.
pub struct CaptureSlot {
    latest: ArcSwapOption<CapturedBuffer>,
    transfer_handler: ArcSwapOption<Handler>,
    next_sequence_number: AtomicU64,
    callbacks: AtomicU64,
    overruns: AtomicU64,
    stopped: AtomicBool,
}

impl CaptureSlot {
    fn new() -> Self {
        Self {
            latest: ArcSwapOption::const_empty(),
            transfer_handler: ArcSwapOption::const_empty(),
            next_sequence_number: AtomicU64::new(0),
            callbacks: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Runs on the driver thread for every captured chunk.
    pub fn callback(&self, input: &[u8]) -> CallbackResult {
        if self.stopped.load(Ordering::Acquire) {
            return CallbackResult::Abort;
        }
        let captured = Arc::new(CapturedBuffer {
            data: input.to_vec(),
            captured_at: Instant::now(),
        });
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        if self.latest.swap(Some(captured)).is_some() {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(handler) = &*self.transfer_handler.load() {
            handler.0.transfer_data(self);
        }
        CallbackResult::Continue
    }

    /// Takes the newest chunk. Each chunk is handed out at most once.
    pub fn read(&self, buffer: &mut MediaBuffer) -> Result<(), CaptureError> {
        let captured = self.latest.swap(None).ok_or(CaptureError::NoData)?;
        buffer.set_data(&captured.data);
        buffer.sequence_number = self.next_sequence_number.fetch_add(1, Ordering::Relaxed);
        buffer.timestamp = Some(captured.captured_at);
        buffer.flags = FLAG_SYSTEM_TIME;
        Ok(())
    }

    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    /// Chunks replaced before anybody read them.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }
}

pub struct CaptureStream {
    device_index: Option<usize>,
    slot: Arc<CaptureSlot>,
    native: Mutex<Option<Box<dyn NativeStream>>>,
}

impl CaptureStream {
    /// Captures from `device_index`, or from whatever [`pick_input_device`]
    /// chooses when the stream starts.
    pub fn new(device_index: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            device_index,
            slot: Arc::new(CaptureSlot::new()),
            native: Mutex::new(None),
        })
    }

    pub fn format(&self) -> AudioFormat {
        CAPTURE_FORMAT
    }

    pub fn slot(&self) -> &Arc<CaptureSlot> {
        &self.slot
    }

    pub fn set_transfer_handler(&self, handler: Option<Arc<dyn TransferHandler>>) {
        self.slot
            .transfer_handler
            .store(handler.map(|handler| Arc::new(Handler(handler))));
    }

    pub fn callback(&self, input: &[u8]) -> CallbackResult {
        self.slot.callback(input)
    }

    pub fn read(&self, buffer: &mut MediaBuffer) -> Result<(), CaptureError> {
        self.slot.read(buffer)
    }

    pub fn callbacks(&self) -> u64 {
        self.slot.callbacks()
    }

    pub fn overruns(&self) -> u64 {
        self.slot.overruns()
    }

    pub fn is_started(&self) -> bool {
        self.native.lock().is_some()
    }

    /// Opens and starts the driver stream. If starting fails, the half opened
    /// stream is closed again and the start error is returned.
    pub fn start(&self, backend: &dyn AudioBackend) -> Result<(), CaptureError> {
        let mut native = self.native.lock();
        if native.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }
        let device_index = match self.device_index {
            Some(index) => index,
            None => pick_input_device(&backend.devices()).ok_or(CaptureError::NoDevice)?,
        };

        let slot = self.slot.clone();
        let callback: InputCallback = Box::new(move |input| slot.callback(input));

        let mut stream = backend.open_input(device_index, CAPTURE_FORMAT, callback)?;
        self.slot.stopped.store(false, Ordering::Release);
        if let Err(start_err) = stream.start() {
            self.slot.stopped.store(true, Ordering::Release);
            if let Err(close_err) = stream.close() {
                warn!(
                    "failed to close capture stream after failed start: {}",
                    close_err
                );
            }
            return Err(start_err);
        }
        info!(
            "capture started on device {} at {} Hz",
            device_index, CAPTURE_FORMAT.sample_rate
        );
        *native = Some(stream);
        Ok(())
    }

    /// Stops and closes the driver stream. Does nothing if not started.
    pub fn stop(&self) -> Result<(), CaptureError> {
        let stream = self.native.lock().take();
        let Some(mut stream) = stream else {
            return Ok(());
        };
        // Callbacks still in flight finish; later ones abort.
        self.slot.stopped.store(true, Ordering::Release);
        let stopped = stream.stop();
        let closed = stream.close();
        info!("capture stopped after {} callbacks", self.callbacks());
        stopped.and(closed)
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("failed to stop capture stream: {}", err);
        }
    }
}

impl SourceStream for CaptureStream {
    fn read(&self, buffer: &mut MediaBuffer) -> Result<(), MixerError> {
        CaptureStream::read(self, buffer).map_err(|err| match err {
            CaptureError::NoData => MixerError::NoData,
            err => MixerError::Capture(err),
        })
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{atomic::AtomicUsize, mpsc},
        thread,
    };

    use super::*;

    type StopThreads = Arc<Mutex<Vec<Option<String>>>>;

    #[derive(Default)]
    struct FakeDriver {
        callback: Mutex<Option<InputCallback>>,
        log: Arc<Mutex<Vec<String>>>,
        stop_threads: StopThreads,
        fail_start: bool,
    }

    impl FakeDriver {
        fn deliver(&self, input: &[u8]) -> CallbackResult {
            let mut callback = self.callback.lock();
            (callback.as_mut().unwrap())(input)
        }
    }

    struct FakeStream {
        log: Arc<Mutex<Vec<String>>>,
        stop_threads: StopThreads,
        fail_start: bool,
    }

    impl NativeStream for FakeStream {
        fn start(&mut self) -> Result<(), CaptureError> {
            self.log.lock().push("start".to_string());
            if self.fail_start {
                Err(CaptureError::Backend("device busy".to_string()))
            } else {
                Ok(())
            }
        }

        fn stop(&mut self) -> Result<(), CaptureError> {
            self.log.lock().push("stop".to_string());
            self.stop_threads
                .lock()
                .push(thread::current().name().map(str::to_string));
            Ok(())
        }

        fn close(&mut self) -> Result<(), CaptureError> {
            self.log.lock().push("close".to_string());
            Ok(())
        }
    }

    impl AudioBackend for FakeDriver {
        fn devices(&self) -> Vec<DeviceInfo> {
            vec![
                DeviceInfo {
                    index: 0,
                    name: "speakers".to_string(),
                    max_input_channels: 0,
                    max_output_channels: 2,
                },
                DeviceInfo {
                    index: 1,
                    name: "headset".to_string(),
                    max_input_channels: 1,
                    max_output_channels: 2,
                },
                DeviceInfo {
                    index: 2,
                    name: "microphone".to_string(),
                    max_input_channels: 2,
                    max_output_channels: 0,
                },
            ]
        }

        fn open_input(
            &self,
            device_index: usize,
            format: AudioFormat,
            callback: InputCallback,
        ) -> Result<Box<dyn NativeStream>, CaptureError> {
            assert_eq!(CAPTURE_FORMAT, format);
            self.log.lock().push(format!("open {}", device_index));
            *self.callback.lock() = Some(callback);
            Ok(Box::new(FakeStream {
                log: self.log.clone(),
                stop_threads: self.stop_threads.clone(),
                fail_start: self.fail_start,
            }))
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        transfers: AtomicUsize,
    }

    impl TransferHandler for CountingHandler {
        fn transfer_data(&self, _slot: &CaptureSlot) {
            self.transfers.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_format() {
        assert_eq!(2, CAPTURE_FORMAT.frame_size());
        assert_eq!(88200, CAPTURE_FORMAT.bytes_per_second());
        assert!(CAPTURE_FORMAT.little_endian && CAPTURE_FORMAT.signed);
    }

    #[test]
    fn test_read_without_data() {
        let stream = CaptureStream::new(None);
        let mut buffer = MediaBuffer::default();
        assert!(matches!(stream.read(&mut buffer), Err(CaptureError::NoData)));
    }

    #[test]
    fn test_latest_wins() {
        let stream = CaptureStream::new(None);
        assert_eq!(CallbackResult::Continue, stream.callback(&[1, 1]));
        assert_eq!(CallbackResult::Continue, stream.callback(&[2, 2]));
        assert_eq!(CallbackResult::Continue, stream.callback(&[3, 3]));
        assert_eq!(2, stream.overruns());

        let mut buffer = MediaBuffer::default();
        stream.read(&mut buffer).unwrap();
        assert_eq!(&[3, 3], buffer.as_slice());
        assert_eq!(0, buffer.sequence_number);
        assert_eq!(FLAG_SYSTEM_TIME, buffer.flags);
        assert!(buffer.timestamp.is_some());

        // Each chunk is read once.
        assert!(matches!(stream.read(&mut buffer), Err(CaptureError::NoData)));
    }

    #[test]
    fn test_sequence_numbers_and_timestamps_increase() {
        let stream = CaptureStream::new(None);
        let mut previous: Option<MediaBuffer> = None;
        for i in 0..5u8 {
            stream.callback(&[i; 4]);
            let mut buffer = MediaBuffer::default();
            stream.read(&mut buffer).unwrap();
            assert_eq!(&[i; 4], buffer.as_slice());
            if let Some(previous) = previous {
                assert_eq!(previous.sequence_number + 1, buffer.sequence_number);
                assert!(previous.timestamp <= buffer.timestamp);
            }
            previous = Some(buffer);
        }
        assert_eq!(0, stream.overruns());
        assert_eq!(5, stream.callbacks());
    }

    #[test]
    fn test_transfer_handler() {
        let stream = CaptureStream::new(None);
        let handler = Arc::new(CountingHandler::default());
        stream.set_transfer_handler(Some(handler.clone() as Arc<dyn TransferHandler>));
        stream.callback(&[0; 2]);
        stream.callback(&[0; 2]);
        assert_eq!(2, handler.transfers.load(Ordering::SeqCst));

        stream.set_transfer_handler(None);
        stream.callback(&[0; 2]);
        assert_eq!(2, handler.transfers.load(Ordering::SeqCst));
    }

    #[test]
    fn test_start_and_stop() {
        let driver = FakeDriver::default();
        let stream = CaptureStream::new(None);
        stream.start(&driver).unwrap();
        assert!(stream.is_started());
        assert!(matches!(stream.start(&driver), Err(CaptureError::AlreadyStarted)));

        assert_eq!(CallbackResult::Continue, driver.deliver(&[5, 6]));
        let mut buffer = MediaBuffer::default();
        stream.read(&mut buffer).unwrap();
        assert_eq!(&[5, 6], buffer.as_slice());

        stream.stop().unwrap();
        stream.stop().unwrap();
        assert!(!stream.is_started());
        assert_eq!(vec!["open 2", "start", "stop", "close"], *driver.log.lock());
    }

    #[test]
    fn test_failed_start_closes_stream() {
        let driver = FakeDriver {
            fail_start: true,
            ..Default::default()
        };
        let stream = CaptureStream::new(Some(1));
        assert!(matches!(
            stream.start(&driver),
            Err(CaptureError::Backend(message)) if message == "device busy"
        ));
        assert!(!stream.is_started());
        assert_eq!(vec!["open 1", "start", "close"], *driver.log.lock());
    }

    #[test]
    fn test_callback_after_drop_aborts() {
        let driver = FakeDriver::default();
        let stream = CaptureStream::new(None);
        stream.start(&driver).unwrap();
        drop(stream);
        assert_eq!(CallbackResult::Abort, driver.deliver(&[1]));
        assert_eq!(vec!["open 2", "start", "stop", "close"], *driver.log.lock());
    }

    struct BlockingHandler {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl TransferHandler for BlockingHandler {
        fn transfer_data(&self, _slot: &CaptureSlot) {
            self.entered.lock().send(()).unwrap();
            self.release.lock().recv().unwrap();
        }
    }

    #[test]
    fn test_drop_during_callback_stops_on_owner_thread() {
        let driver = Arc::new(FakeDriver::default());
        let stream = CaptureStream::new(None);
        stream.start(&*driver).unwrap();

        let (entered_sender, entered) = mpsc::channel();
        let (release, release_receiver) = mpsc::channel();
        stream.set_transfer_handler(Some(Arc::new(BlockingHandler {
            entered: Mutex::new(entered_sender),
            release: Mutex::new(release_receiver),
        })));

        let audio_thread = {
            let driver = driver.clone();
            thread::Builder::new()
                .name("audio-driver".to_string())
                .spawn(move || driver.deliver(&[1, 2]))
                .unwrap()
        };
        entered.recv().unwrap();

        // The driver is stopped here and now, not when the callback returns.
        drop(stream);
        let owner_thread = thread::current().name().map(str::to_string);
        assert_ne!(Some("audio-driver".to_string()), owner_thread);
        assert_eq!(vec![owner_thread], *driver.stop_threads.lock());

        release.send(()).unwrap();
        assert_eq!(CallbackResult::Continue, audio_thread.join().unwrap());
        assert_eq!(CallbackResult::Abort, driver.deliver(&[3, 4]));
        assert_eq!(1, driver.stop_threads.lock().len());
    }

    #[test]
    fn test_pick_input_device() {
        let driver = FakeDriver::default();
        let mut devices = driver.devices();
        assert_eq!(Some(2), pick_input_device(&devices));
        devices.pop();
        assert_eq!(Some(1), pick_input_device(&devices));
        devices.pop();
        assert_eq!(None, pick_input_device(&devices));
    }

    #[test]
    fn test_as_mixer_source() {
        let stream = CaptureStream::new(None);
        let source: Arc<dyn SourceStream> = stream.clone();
        let mut buffer = MediaBuffer::default();
        assert!(matches!(source.read(&mut buffer), Err(MixerError::NoData)));
        stream.callback(&[4, 0]);
        source.read(&mut buffer).unwrap();
        assert_eq!(&[4, 0], buffer.as_slice());
    }

    #[test]
    fn test_concurrent_producer_and_consumer() {
        let stream = CaptureStream::new(None);
        let producer = {
            let stream = stream.clone();
            thread::spawn(move || {
                for i in 0..1000u32 {
                    stream.callback(&i.to_le_bytes());
                }
            })
        };

        let mut last_seen = None;
        let mut reads = 0u64;
        let mut buffer = MediaBuffer::default();
        loop {
            let finished = producer.is_finished();
            match stream.read(&mut buffer) {
                Ok(()) => {
                    reads += 1;
                    let value = u32::from_le_bytes(buffer.as_slice().try_into().unwrap());
                    // Chunks come out in the order they went in.
                    assert!(last_seen.map_or(true, |last| last < value));
                    last_seen = Some(value);
                }
                Err(_) if finished => break,
                Err(_) => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert!(reads > 0);
        assert_eq!(1000, stream.callbacks());
    }
}
