// Managers Module
//
// Focused manager classes owned by the training session.
//
// - BroadcastChannelManager: Tokio broadcast channels for the display layer

pub mod broadcast_manager;

pub use broadcast_manager::BroadcastChannelManager;
