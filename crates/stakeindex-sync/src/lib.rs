//! stakeindex-sync — keeps the index on the node's branch.
//!
//! Three tasks cooperate:
//!
//! - the [`HeadNotifier`] publishes the remote head into a `watch` channel;
//! - the [`Observer`] worker applies and reverts levels through the engine
//!   until the local head equals the remote one;
//! - [`StatusSync`] persists the known head and the last catch-up time.
//!
//! # Example
//!
//! ```rust,ignore
//! use stakeindex_sync::ObserverBuilder;
//!
//! let handle = ObserverBuilder::new(engine, node)
//!     .from_settings(&settings.observer)
//!     .spawn();
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await?;
//! ```

pub mod notifier;
pub mod observer;
pub mod state;
pub mod status;

pub use notifier::HeadNotifier;
pub use observer::{Observer, ObserverBuilder, ObserverHandle};
pub use state::ObserverState;
pub use status::StatusSync;
