/// Data entities for tracks, coordinates and annotations
pub mod entities;
/// Error types and result aliases
pub mod errors;
/// Map region and dropped pins
pub mod map;
/// Spotify authorization session
pub mod session;
/// Spotify Web API track search
pub mod spotify;

pub use map::MapCoordinator;
pub use session::SessionManager;
pub use spotify::SearchClient;
