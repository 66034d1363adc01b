//! Bluetooth Module
//!
//! Enumerates BLE peripherals, caches them, and drives the sample device
//! protocol over GATT.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (Coordinator - owns the cache and the selection)        │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌──────────────┐  ┌──────────┐
//! │   Cache   │  │ SampleDevice │  │ Protocol │
//! │           │  │              │  │          │
//! │ - by id   │  │ - connect    │  │ - send   │
//! │ - summary │  │ - discovery  │  │ - UUID   │
//! │           │  │ - sensor     │  │   match  │
//! └───────────┘  └──────┬───────┘  └──────────┘
//!                       │
//!                       ▼
//!               ┌───────────────┐
//!               │  BleProvider  │
//!               │ WinRT | Mock  │
//!               └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`provider`] - Platform abstraction traits
//! - [`device`] - Per-device state machine and characteristic discovery
//! - [`cache`] - Devices seen during enumeration
//! - [`protocol`] - Command dispatch and UUID matching
//! - [`service`] - Main service coordinator
//! - [`mock`] - In-memory backend
//! - `winrt` - Windows backend

pub mod cache;
pub mod device;
pub mod error;
pub mod mock;
pub mod protocol;
pub mod provider;
pub mod service;
#[cfg(windows)]
pub mod winrt;

pub use error::BleError;
pub use service::{BluetoothService, ServiceConfig};
