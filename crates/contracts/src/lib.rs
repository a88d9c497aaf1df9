//! # Contracts
//!
//! Frozen interface contracts (ICD), defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Time Model
//! - The host clock delivers `FrameTick { frame, elapsed }` once per tick
//! - Sensor schedules run on sequence time (elapsed seconds since the sequence started)
//! - Every handle is tagged with the `Epoch` of the simulation that issued it

mod blueprint;
mod definition;
mod error;
mod handle;
mod report;
mod sensor;
mod sink;
mod spatial;

pub use blueprint::*;
pub use definition::*;
pub use error::*;
pub use handle::*;
pub use report::*;
pub use sensor::*;
pub use sink::*;
pub use spatial::*;
