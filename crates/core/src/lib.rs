//! razercfg-core: USB transport, reconnect tracking, and per-device
//! protocols for Razer mice.
//!
//! A [`context::Context`] scans the bus, binds each recognized device to its
//! driver and hands out [`mouse::Mouse`] objects exposing a uniform
//! capability API (profiles, DPI mappings, scan frequency, buttons, LEDs).

pub mod backend;
pub mod buttonmapping;
pub mod comm;
pub mod config;
pub mod context;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod identity;
#[cfg(test)]
mod integration_tests;
pub mod model;
pub mod mouse;
pub mod profile_emulation;
pub mod reconnect;
pub mod synapse;
pub mod timing;
pub mod usb;
pub mod util;

/// Razer USB vendor id.
pub const RAZER_VID: u16 = 0x1532;
