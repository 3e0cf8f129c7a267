//! Left-Right concurrency control.
//!
//! Wraps any single-threaded data structure in two copies so that readers
//! never wait: they are told which copy is active and read it, while one
//! writer at a time mutates the other copy, flips, waits for the readers of
//! the old copy to leave and replays the mutation there.
//!
//! How readers announce themselves is pluggable through
//! [`readindicator::ReadIndicator`]. Two variants pack all reader state in
//! one atomic word ([`LeftRightAL`], [`LeftRightALNV`]) and one lets
//! concurrent writers share a single toggle ([`LeftRightFlatCombining`]).
//!
//! Misusing a primitive, e.g. departing without arriving, panics with a
//! message starting with `misuse:`.

pub mod config;
pub mod error;
pub mod leftright;
pub mod readindicator;
pub mod slot;
pub mod sync;

pub use config::{Config, WaitPolicy};
pub use error::{Error, Result};
pub use leftright::{
    LeftRight, LeftRightAL, LeftRightALNV, LeftRightFlatCombining, Mutation, Side, VersionIndex,
};
pub use slot::Slot;
