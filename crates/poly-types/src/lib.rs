//! Foundation types for the Polycentric engine.
//!
//! Every other `poly-*` crate depends on `poly-types`. The types here describe
//! the replicated data model and carry no storage or network behavior.
//!
//! # Key Types
//!
//! - [`PublicKey`]: the permanent address of an identity ("system")
//! - [`Process`]: per-device log owner with its own logical clock
//! - [`Event`] / [`SignedEvent`]: immutable, signed log records
//! - [`Pointer`]: stable `(system, process, logical_clock)` reference
//! - [`SystemState`]: CRDT fold of an identity's events
//! - [`Range`] and [`ranges`]: inclusive sequence intervals
//! - [`CancelContext`]: cooperative cancellation shared by async chains

pub mod cancel;
pub mod content_type;
pub mod error;
pub mod event;
pub mod identity;
pub mod pointer;
pub mod ranges;
pub mod state;

pub use cancel::{CancelContext, CancelToken, Cancelled};
pub use content_type::ContentType;
pub use error::{TypeError, TypeResult};
pub use event::{Delete, Event, Index, LwwElement, SignedEvent};
pub use identity::{Process, PublicKey};
pub use pointer::Pointer;
pub use ranges::{ProcessRanges, ProcessState, Range};
pub use state::{CrdtItem, SystemState};
