use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::Error;
use crate::types::ControllerId;

/// Default TPI command port.
pub const DEFAULT_PORT: u16 = 5108;

/// A controller MAC address, as printed on the unit.
///
/// Events used to be matched to controllers by this; matching is by source
/// IP now, but the address is still part of the configured identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress(pub [u8; 6]);

impl FromStr for MacAddress {
	type Err = Error;

	fn from_str(s: &str) -> Result<MacAddress, Error> {
		let mut bytes = [0u8; 6];
		let mut parts = 0;
		for (i, part) in s.split(|c| c == ':' || c == '-').enumerate() {
			if i >= 6 {
				return Err(Error::Config(format!("bad MAC address {:?}", s)));
			}
			bytes[i] = u8::from_str_radix(part, 16)
				.map_err(|_| Error::Config(format!("bad MAC address {:?}", s)))?;
			parts += 1;
		}
		if parts != 6 {
			return Err(Error::Config(format!("bad MAC address {:?}", s)));
		}
		Ok(MacAddress(bytes))
	}
}

impl fmt::Display for MacAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let b = &self.0;
		write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2], b[3], b[4], b[5])
	}
}

/// Identity and transport settings for one controller.
///
/// The library does not read configuration files; whatever loads them
/// builds one of these per controller and hands it to
/// [crate::devices::ZenControl::add_controller].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
	/// Stable identifier, also the first byte of query-cache keys.
	pub id: ControllerId,
	/// Short machine-friendly name (alphanumeric), used by integrations for
	/// topic/entity naming.
	pub name: String,
	/// Human-readable label.
	pub label: String,
	pub host: Ipv4Addr,
	pub port: u16,
	pub mac: MacAddress,
	/// Ask the controller to apply event filters when enabling emission.
	pub filtering: bool,
}

impl ControllerConfig {
	pub fn new(id: ControllerId, name: &str, host: Ipv4Addr) -> ControllerConfig {
		ControllerConfig {
			id,
			name: name.to_owned(),
			label: name.to_owned(),
			host,
			port: DEFAULT_PORT,
			mac: MacAddress([0; 6]),
			filtering: false,
		}
	}

	pub fn validate(&self) -> Result<(), Error> {
		if self.name.is_empty() || !self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
			return Err(Error::Config(format!(
				"controller name must be non-empty alphanumeric, got {:?}",
				self.name
			)));
		}
		if self.port == 0 {
			return Err(Error::Config("controller port must be 1-65535".into()));
		}
		Ok(())
	}
}

/// How the process receives TPI events.
#[derive(Debug, Clone, Default)]
pub struct ListenerConfig {
	/// Unicast instead of the default multicast group.
	pub unicast: bool,
	/// Unicast bind address; defaults to 0.0.0.0.
	pub listen_ip: Option<Ipv4Addr>,
	/// Unicast bind port; defaults to a kernel-assigned port.
	pub listen_port: Option<u16>,
}
