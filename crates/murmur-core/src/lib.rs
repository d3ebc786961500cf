//! # murmur-core
//!
//! Long-poll message distribution for the Murmur chat server.
//!
//! This crate provides the building blocks the HTTP layer calls into:
//!
//! - **MessageBuffer** - Bounded replay window plus pending long-poll waiters
//! - **Rooms** - Registry of independent buffers keyed by room name
//! - **Message** - Published message and its id
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐  publish   ┌───────────────┐  resolve   ┌─────────────┐
//! │  Publisher  │───────────▶│ MessageBuffer │───────────▶│   Waiters   │
//! └─────────────┘            └───────────────┘            └─────────────┘
//!                                    ▲
//!                                    │ wait(cursor) / cancel
//!                             ┌─────────────┐
//!                             │   Reader    │
//!                             └─────────────┘
//! ```
//!
//! ```
//! use murmur_core::{Message, MessageBuffer};
//!
//! let buffer = MessageBuffer::with_cache_size(2);
//! let handle = buffer.wait(None);
//! assert!(!handle.is_ready());
//!
//! buffer.publish_one(Message::with_id("a", "hi"));
//! assert_eq!(buffer.waiter_count(), 0);
//! ```

pub mod buffer;
pub mod message;
pub mod rooms;

pub use buffer::{Batch, BufferConfig, BufferStats, MessageBuffer, WaitHandle, WaiterId};
pub use message::{Message, MessageId};
pub use rooms::{Rooms, RoomError, RoomsConfig};
