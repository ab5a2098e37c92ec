//! VTouch GW - virtual touch plane gateway
//!
//! Turns skeletal hand tracking into multitouch contacts. Each cycle the
//! [`engine`] reads torso and hand joints from a [`sensor`], smooths the
//! hands ([`filter`]), classifies them against a virtual touch plane
//! ([`classifier`]), derives New/Moved/Removed contact events
//! ([`contact`]) and hands them to a consumer as one [`frame`].

pub mod classifier;
pub mod config;
pub mod consumer;
pub mod contact;
pub mod engine;
pub mod error;
pub mod filter;
pub mod frame;
pub mod paths;
pub mod sensor;
pub mod tracking;

pub use engine::{EngineReport, TouchEngine};
pub use error::{ConfigError, DeliveryError, SensorError};
