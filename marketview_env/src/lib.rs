//! MarketView Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the MarketView
//! viewer to run against both a **Production** runtime (tokio, a live server
//! connection) and a **Simulation** runtime (virtual clock, scripted feed).
//!
//! # Core Concept: The Reactor Pattern
//!
//! Everything the viewer needs from the outside world is intercepted:
//! - Time (`now()`, `sleep()`) drives the display-rate render loop
//! - Tasks (`spawn()`) return a handle so the loop can be cancelled
//! - Snapshots (`recv()`) arrive through a transport the viewer does not own
//!
//! # Example
//!
//! ```ignore
//! use marketview_env::{ViewContext, SnapshotTransport};
//!
//! async fn frame_loop<Ctx: ViewContext>(ctx: &Ctx) {
//!     loop {
//!         render_one_frame(ctx.now());
//!         ctx.sleep(Duration::from_millis(16)).await;
//!     }
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod tokio_impl;

pub use context::{ViewContext, TaskHandle};
pub use network::{SnapshotTransport, TransportController};
pub use types::{SessionId, WireFrame};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
