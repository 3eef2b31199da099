//! # IOStream - Back-Pressured Streams over Duplex I/O Channels
//!
//! IOStream turns an OS-style duplex handle into asynchronous byte streams:
//!
//! - **Reads** deliver chunks of at least a requested size until end of input
//! - **Writes** report how many bytes are still outstanding after every step
//! - **Aggregated writes** fold many concurrent writes into one total
//! - **Disposal** cancels an operation and releases its channel exactly once
//! - **Pluggable backends** through the [`Descriptor`] / [`RawChannel`] traits
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Application Layer                     │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Stream Layer                          │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐   │
//! │  │   Reader    │ │   Writer    │ │    Aggregate    │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Channel Layer                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────┐   │
//! │  │ Close-once  │ │ Late drops  │ │  Serial queue   │   │
//! │  └─────────────┘ └─────────────┘ └─────────────────┘   │
//! ├─────────────────────────────────────────────────────────┤
//! │                    Transport Layer                       │
//! │  ┌─────────────────────────────────────────────────┐   │
//! │  │      Descriptor / RawChannel (tokio, scripted)   │   │
//! │  └─────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use iostream::{Duplex, Queue, ReadableIoStream, TokioDescriptor, WritableIoStream};
//!
//! let queue = Queue::new("io");
//! tokio::spawn(queue.clone().run());
//!
//! let stream = Duplex::new(TokioDescriptor::new(socket)?, queue);
//!
//! // Write and watch the outstanding count drain
//! let (mut progress, _cancel) = stream.write(Bytes::from_static(b"Hello, World!"));
//! while let Some(event) = progress.next().await { /* ... */ }
//!
//! // Read chunks of at least 1 KiB
//! let (mut events, cancel) = stream.read(1024);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod config;
pub mod error;
pub mod io;
pub mod queue;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use channel::{Channel, ChannelState};
pub use config::StreamConfig;
pub use error::{Error, Result};
pub use io::{ChannelKind, Completion};
pub use queue::Queue;
pub use stream::{
    AggregateProgress, Disposable, Duplex, Event, Events, IoStream, ReadEvents, ReadableIoStream,
    WritableIoStream, WriteProgress,
};
pub use transport::{Descriptor, RawChannel, TokioDescriptor};
