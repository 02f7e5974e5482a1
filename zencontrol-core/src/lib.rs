//! This crate provides a client for the Zencontrol "TPI Advanced" protocol.
//!
//! This lets you drive DALI lighting buses behind Zencontrol controllers on
//! your local network: set levels, colours and scenes, watch buttons and
//! motion sensors, and exchange state through system variables.
//!
//! The crate is layered.  [Request], [Response] and [EventFrame] carry the
//! wire framings, [Client] and [Listener] own the sockets, [Protocol]
//! implements the documented command set, and [devices::ZenControl] wraps
//! the lot in stateful device objects with an event-driven callback
//! surface.
//!
//! # Request/response
//!
//! Commands go to a controller's UDP port (5108 by default) and are
//! correlated by a one-byte sequence number, so any number of requests can
//! be in flight to the same controller at once.  Lost datagrams are retried
//! with the same sequence; a retry satisfied by a late response to an
//! earlier attempt is indistinguishable from a fast answer, which is
//! exactly what we want.
//!
//! # Events
//!
//! Controllers push events either to the multicast group 239.255.90.67:6969
//! or, configured via [Protocol::set_tpi_event_unicast_address], to a
//! unicast endpoint.  One [Listener] per process receives them; events are
//! attributed to controllers by source IP.
//!
//! # Hostile input
//!
//! Both sockets treat the network as untrusted: short datagrams, bad
//! checksums and unknown type bytes are counted and dropped, and can never
//! panic the reader threads or satisfy a waiter.

mod client;
mod commands;
mod config;
mod error;
mod events;
mod frame;
mod listener;
mod protocol;
mod types;
pub mod devices;

pub use client::{Client, DEFAULT_TIMEOUT, MAX_TIMEOUT, MIN_TIMEOUT};
pub use commands::Command;
pub use config::{ControllerConfig, ListenerConfig, MacAddress, DEFAULT_PORT};
pub use error::Error;
pub use events::{dispatch_event, EventCallbacks, EventMonitor, SystemVariableValue};
pub use frame::{checksum, EventFrame, Request, Response, ResponseType, EVENT_SENTINEL, MAGIC};
pub use listener::{local_ipv4, Listener, MULTICAST_GROUP, MULTICAST_PORT};
pub use protocol::{
	CacheEntry, CacheKey, ColourFeatures, ColourTempLimits, Controller, EventFilter, FilterTarget,
	GearStatus, GroupStatus, InstanceGroups, OccupancyTimers, ProfileBehaviour, ProfileInformation,
	ProfilePriority, Protocol, UnicastConfig, CACHE_TTL,
};
pub use types::{
	Address, AddressKind, Colour, ControllerId, ErrorCode, EventCode, EventMask, EventMode,
	Instance, InstanceKind, MAX_KELVIN, MAX_LEVEL, MAX_SCENE, MAX_SYSVAR, MIN_KELVIN,
};
