//! MusicHive - Spotify session handshake, track search and map pins
//!
//! This library authorizes against the Spotify app, searches tracks through the
//! Spotify Web API and keeps the pins a user drops on a map, optionally tagged
//! with the selected track. Platform pieces (the Spotify SDK, location services
//! and the map view) are plugged in through traits.

/// Configuration and the event-driven application runtime
pub mod app;
/// Client modules for the Spotify session, search and the map
pub mod clients;
