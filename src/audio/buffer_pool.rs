// BufferPool - lock-free frame transport with dual SPSC queues
//
// Implements an object pool pattern using two lock-free SPSC (Single Producer Single Consumer)
// ring buffers. The capture callback never allocates: it borrows a pre-allocated
// buffer, copies the frame in, and hands it to the analysis thread.
//
// Architecture:
// - DATA_QUEUE: Capture callback pushes filled buffers, analysis thread consumes
// - POOL_QUEUE: Analysis thread returns empty buffers, capture callback recycles
//
// Buffer flow:
// 1. Capture callback pops empty buffer from POOL_QUEUE
// 2. Capture callback copies the frame and stamps the capture instant
// 3. Capture callback pushes filled buffer to DATA_QUEUE
// 4. Analysis thread pops filled buffer from DATA_QUEUE
// 5. Analysis thread runs the spectral/onset pipeline on it
// 6. Analysis thread pushes the buffer back to POOL_QUEUE
//
// When the pool is exhausted the frame is dropped and counted; the capture
// side never waits.

use rtrb::{Consumer, Producer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::engine::backend::{FrameObserver, TimeSource};

/// Configuration constants for buffer pool
pub const DEFAULT_BUFFER_COUNT: usize = 32;
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Pooled frame: samples plus capture metadata
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub captured_at: Instant,
}

impl AudioBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            sample_rate: 0,
            captured_at: Instant::now(),
        }
    }
}

/// Split buffer pool channels for producer/consumer separation
pub struct BufferPoolChannels {
    /// Producer for sending filled buffers to analysis thread
    pub data_producer: Producer<AudioBuffer>,
    /// Consumer for receiving filled buffers in analysis thread
    pub data_consumer: Consumer<AudioBuffer>,
    /// Producer for returning empty buffers from analysis thread
    pub pool_producer: Producer<AudioBuffer>,
    /// Consumer for retrieving empty buffers in capture callback
    pub pool_consumer: Consumer<AudioBuffer>,
}

/// Capture-side half of the pool
pub struct CaptureChannels {
    pub data_producer: Producer<AudioBuffer>,
    pub pool_consumer: Consumer<AudioBuffer>,
}

/// Analysis-side half of the pool
pub struct AnalysisChannels {
    pub data_consumer: Consumer<AudioBuffer>,
    pub pool_producer: Producer<AudioBuffer>,
}

impl BufferPoolChannels {
    /// Hand each thread only the ends it is allowed to touch
    pub fn split_for_threads(self) -> (CaptureChannels, AnalysisChannels) {
        (
            CaptureChannels {
                data_producer: self.data_producer,
                pool_consumer: self.pool_consumer,
            },
            AnalysisChannels {
                data_consumer: self.data_consumer,
                pool_producer: self.pool_producer,
            },
        )
    }
}

/// Lock-free buffer pool using dual SPSC ring buffers
///
/// Pre-allocates a fixed number of buffers and manages them through two
/// lock-free queues. All heap allocation happens during initialization.
pub struct BufferPool;

impl BufferPool {
    /// Create a new BufferPool with specified buffer count and capacity
    ///
    /// # Arguments
    /// * `buffer_count` - Number of buffers to pre-allocate (typical: 16-64)
    /// * `buffer_size` - Capacity of each buffer in f32 samples
    ///
    /// # Panics
    /// Panics if buffer_count is 0 or buffer_size is 0
    #[allow(clippy::new_ret_no_self)]
    pub fn new(buffer_count: usize, buffer_size: usize) -> BufferPoolChannels {
        assert!(buffer_count > 0, "buffer_count must be greater than 0");
        assert!(buffer_size > 0, "buffer_size must be greater than 0");

        let (mut pool_producer, pool_consumer) = rtrb::RingBuffer::new(buffer_count);
        let (data_producer, data_consumer) = rtrb::RingBuffer::new(buffer_count);

        for _ in 0..buffer_count {
            pool_producer
                .push(AudioBuffer::with_capacity(buffer_size))
                .expect("Failed to push buffer to pool queue during initialization");
        }

        BufferPoolChannels {
            data_producer,
            data_consumer,
            pool_producer,
            pool_consumer,
        }
    }
}

/// Frame observer handed to a capture source
///
/// Copies each delivered frame into a pooled buffer stamped by the session's
/// clock, so hits and taps are timed against the same source. Once the shared
/// `accepting` flag is cleared every further frame is discarded, which is
/// how frames arriving after a session stops are kept out of the pipeline.
pub struct FrameWriter {
    channels: CaptureChannels,
    accepting: Arc<AtomicBool>,
    clock: Arc<dyn TimeSource>,
    dropped: Arc<AtomicU64>,
}

impl FrameWriter {
    pub fn new(
        channels: CaptureChannels,
        accepting: Arc<AtomicBool>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            channels,
            accepting,
            clock,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Counter of frames dropped because the pool was exhausted
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl FrameObserver for FrameWriter {
    fn on_frame(&mut self, samples: &[f32], sample_rate: u32) {
        if !self.accepting.load(Ordering::Acquire) {
            return;
        }

        let mut buffer = match self.channels.pool_consumer.pop() {
            Ok(buffer) => buffer,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        // Never grow past the pre-allocated capacity on the capture thread
        let len = samples.len().min(buffer.samples.capacity());
        buffer.samples.clear();
        buffer.samples.extend_from_slice(&samples[..len]);
        buffer.sample_rate = sample_rate;
        buffer.captured_at = self.clock.now();

        if self.channels.data_producer.push(buffer).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
