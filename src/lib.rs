//! Event routing core of a small thermostat.
//!
//! Four managers run as independent tasks: control samples the temperature
//! and runs the PID loop, display renders state, packet talks to the host,
//! and system routes everything between them. They share nothing but the
//! mailboxes, notifiers and log in [`registry::Resources`].
//!
//! Bring-up builds the resources with [`registry::init`], constructs each
//! manager with its collaborators and drives it with [`task::run`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod hal;
pub mod mailbox;
pub mod memlog;
pub mod notify;
pub mod registry;
pub mod state;
pub mod task;
pub mod timer;

pub use error::Error;
