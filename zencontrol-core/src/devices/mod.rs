//! Stateful device objects over the protocol layer.
//!
//! Each object wraps a protocol handle plus an address or instance, caches
//! the last state heard on the wire, and is interned per address so that a
//! handle obtained from enumeration and the object updated by the event
//! stream are the same instance.

pub mod button;
pub mod client;
pub mod client_data;
pub mod group;
pub mod light;
pub mod profile;
pub mod sensor;
pub mod sysvar;

pub use button::Button;
pub use client::{StateChange, ZenControl};
pub use client_data::ClientData;
pub use group::Group;
pub use light::{Light, LightFeatures};
pub use profile::Profile;
pub use sensor::MotionSensor;
pub use sysvar::SystemVariable;
