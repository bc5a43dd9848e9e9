// Audio module - buffer transport, beat clock and tick scheduling

pub mod buffer_pool;
pub mod metronome;
pub mod scheduler;

// Re-export commonly used types for convenience
pub use buffer_pool::{
    AudioBuffer, BufferPool, BufferPoolChannels, FrameWriter, DEFAULT_BUFFER_COUNT,
    DEFAULT_BUFFER_SIZE,
};
pub use metronome::{generate_click_sample, BeatClock, BeatGrid, ClockEvent, SessionPhase};
pub use scheduler::{TickScheduler, TickSink};
