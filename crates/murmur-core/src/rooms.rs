//! Registry of independent message buffers, one per room.
//!
//! Each room has its own replay window and waiter set; publishing to one
//! room never wakes readers of another.

use crate::buffer::{BufferConfig, BufferStats, MessageBuffer, DEFAULT_CACHE_SIZE};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.starts_with('$') {
        return Err("Room names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// Room registry errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidName(&'static str),

    /// Maximum rooms reached.
    #[error("Maximum rooms reached")]
    MaxRoomsReached,
}

/// Room registry configuration.
#[derive(Debug, Clone)]
pub struct RoomsConfig {
    /// Maximum number of rooms.
    pub max_rooms: usize,
    /// Cache size of each room's buffer.
    pub cache_size: usize,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            max_rooms: 1_000,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }
}

/// Registry of per-room message buffers.
#[derive(Debug)]
pub struct Rooms {
    rooms: DashMap<String, Arc<MessageBuffer>>,
    config: RoomsConfig,
}

impl Rooms {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RoomsConfig::default())
    }

    /// Create a registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RoomsConfig) -> Self {
        info!("Creating room registry with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            config,
        }
    }

    /// Get a room's buffer, creating the room if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the room limit is reached.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<MessageBuffer>, RoomError> {
        if let Some(buffer) = self.rooms.get(name) {
            return Ok(Arc::clone(buffer.value()));
        }

        validate_room_name(name).map_err(RoomError::InvalidName)?;

        if self.rooms.len() >= self.config.max_rooms {
            warn!(room = %name, "Room limit reached");
            return Err(RoomError::MaxRoomsReached);
        }

        let buffer = match self.rooms.entry(name.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                debug!(room = %name, "Creating new room");
                let buffer = Arc::new(MessageBuffer::with_config(BufferConfig {
                    cache_size: self.config.cache_size,
                }));
                entry.insert(Arc::clone(&buffer));
                buffer
            }
        };
        Ok(buffer)
    }

    /// Get an existing room's buffer.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<MessageBuffer>> {
        self.rooms.get(name).map(|b| Arc::clone(b.value()))
    }

    /// Remove a room, returning its buffer.
    ///
    /// Readers already waiting on the removed buffer stay pending until it
    /// is published to or they cancel.
    pub fn remove(&self, name: &str) -> Option<Arc<MessageBuffer>> {
        let removed = self.rooms.remove(name).map(|(_, b)| b);
        if removed.is_some() {
            debug!(room = %name, "Removed room");
        }
        removed
    }

    /// Check if a room exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.rooms.contains_key(name)
    }

    /// Number of rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Check if there are no rooms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Get all room names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Per-room buffer statistics.
    #[must_use]
    pub fn stats(&self) -> Vec<(String, BufferStats)> {
        self.rooms
            .iter()
            .map(|e| (e.key().clone(), e.value().stats()))
            .collect()
    }
}

impl Default for Rooms {
    fn default() -> Self {
        Self::new()
    }
}
