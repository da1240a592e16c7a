// Audio output devices for the speech pipeline

#[cfg(feature = "player")]
pub mod player;

#[cfg(feature = "player")]
pub use player::{PlayerConfig, PlayerSink};

pub mod silent;

pub use silent::SilentSink;
