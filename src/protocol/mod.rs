pub mod messages;
pub mod rest;
pub mod stats;
pub mod tracks;

pub use messages::*;
pub use rest::*;
pub use stats::*;
pub use tracks::{LoadError, LoadResult, PlaylistData, PlaylistInfo, Track, TrackInfo};
