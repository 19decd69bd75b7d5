//! # Otter VM Inline Caches
//!
//! Per-site feedback for property loads and stores. Every access site owns
//! a slot in a [`FeedbackVector`]; the slot moves through the
//! [`IcState`] lattice as the site sees receivers of different shapes and
//! remembers a [`Handler`] per shape that performs the access without a
//! full property lookup.
//!
//! ## Design
//!
//! - **Runtime entry points**: [`IcRuntime`] runs cached handlers and falls
//!   back to the generic object operations on a miss
//! - **Weak feedback**: slots never keep shapes, holders or cells alive
//! - **Shared handlers**: handlers are cached per shape and shared between
//!   sites, megamorphic sites share a global stub cache
//! - **Validity cells**: prototype chain changes invalidate handlers
//!   without visiting the sites that hold them

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod config;
mod dispatch;
pub mod error;
pub mod feedback;
pub mod handler;
pub mod handler_cache;
mod ic;
mod keyed_load;
mod keyed_store;
mod load;
pub mod runtime;
pub mod state;
pub mod stats;
mod store;
pub mod store_mode;
pub mod stub_cache;

pub use config::{IcConfig, MapIndependentHandlers};
pub use error::{IcError, IcResult};
pub use feedback::{Feedback, FeedbackSlot, FeedbackSlotKind, FeedbackSnapshot, FeedbackVector, KeyType, MapHandler};
pub use handler::{DictionaryMode, ElementAccess, ElementHandler, Handler, HolderRef};
pub use handler_cache::{HandlerCache, HandlerKey, HandlerKind};
pub use runtime::IcRuntime;
pub use state::IcState;
pub use stats::{IcStats, IcStatsSnapshot};
pub use store_mode::{KeyedAccessStoreMode, get_store_mode};
pub use stub_cache::{StubCache, StubCacheKind};
