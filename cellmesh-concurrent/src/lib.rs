//! Lock-free and lock-striped building blocks shared by the scheduler and
//! the world runtime: a striped concurrent map, a Chase-Lev work-stealing
//! deque, and a single-consumer MPSC inbox.
//!
//! None of these types know anything about cells, entities, or tasks —
//! they are generic primitives, kept here so the scheduler and the world
//! crates can both depend on them without depending on each other.

mod deque;
mod error;
mod inbox;
mod striped_map;

pub use deque::{Deque, StealOutcome};
pub use error::ConcurrentError;
pub use inbox::{Inbox, InboxConsumer};
pub use striped_map::StripedMap;
