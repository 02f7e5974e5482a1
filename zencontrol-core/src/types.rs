use std::convert::TryFrom;
use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::error::Error;

/// DALI dimming ceiling.  255 is the mask value ("no change" on egress,
/// "mixed" on ingress) and is never a valid level.
pub const MAX_LEVEL: u8 = 254;
/// Scenes run 0-11.
pub const MAX_SCENE: u8 = 12;
/// System variables run 0-147.
pub const MAX_SYSVAR: u8 = 148;
/// Colour temperature bounds accepted by controllers, in Kelvin.
pub const MIN_KELVIN: u16 = 1000;
pub const MAX_KELVIN: u16 = 20000;

/// Opaque handle identifying a registered controller.
///
/// Entities and addresses carry this instead of a reference to the
/// controller itself, so the object graph stays acyclic.  The id doubles as
/// the first byte of query cache keys, which is why it is a single byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerId(pub u8);

impl fmt::Display for ControllerId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "ctrl#{}", self.0)
	}
}

/// The four ways a DALI target can be addressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
	Broadcast,
	/// Control gear: a load (0-63).
	Ecg,
	/// Control device: an input device (0-63), carried as number+64.
	Ecd,
	/// One of 16 DALI groups, carried as number+64.
	Group,
}

/// A validated DALI address on a specific controller.
///
/// The numeric range is checked at construction, and the wire accessors
/// refuse kind mismatches, so a group number can never end up in a field
/// that expects control gear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
	pub controller: ControllerId,
	pub kind: AddressKind,
	pub number: u8,
}

impl Address {
	pub fn broadcast(controller: ControllerId) -> Address {
		Address { controller, kind: AddressKind::Broadcast, number: 255 }
	}

	pub fn ecg(controller: ControllerId, number: u8) -> Result<Address, Error> {
		if number > 63 {
			return Err(Error::InvalidArgument(format!("ECG address must be 0-63, got {}", number)));
		}
		Ok(Address { controller, kind: AddressKind::Ecg, number })
	}

	pub fn ecd(controller: ControllerId, number: u8) -> Result<Address, Error> {
		if number > 63 {
			return Err(Error::InvalidArgument(format!("ECD address must be 0-63, got {}", number)));
		}
		Ok(Address { controller, kind: AddressKind::Ecd, number })
	}

	pub fn group(controller: ControllerId, number: u8) -> Result<Address, Error> {
		if number > 15 {
			return Err(Error::InvalidArgument(format!("group address must be 0-15, got {}", number)));
		}
		Ok(Address { controller, kind: AddressKind::Group, number })
	}

	fn refuse(&self, wanted: &str) -> Error {
		Error::InvalidArgument(format!("address {:?} {} is not {}", self.kind, self.number, wanted))
	}

	/// Wire byte for commands that accept control gear only.
	pub fn ecg_byte(&self) -> Result<u8, Error> {
		match self.kind {
			AddressKind::Ecg => Ok(self.number),
			_ => Err(self.refuse("control gear")),
		}
	}

	/// Wire byte for commands that accept control gear or a group.
	pub fn ecg_or_group_byte(&self) -> Result<u8, Error> {
		match self.kind {
			AddressKind::Ecg => Ok(self.number),
			AddressKind::Group => Ok(self.number + 64),
			_ => Err(self.refuse("control gear or group")),
		}
	}

	/// Wire byte for commands that accept control gear, a group or broadcast.
	pub fn ecg_or_group_or_broadcast_byte(&self) -> Result<u8, Error> {
		match self.kind {
			AddressKind::Ecg => Ok(self.number),
			AddressKind::Group => Ok(self.number + 64),
			AddressKind::Broadcast => Ok(255),
			_ => Err(self.refuse("control gear, group or broadcast")),
		}
	}

	/// Wire byte for commands that accept control gear or a control device.
	pub fn ecg_or_ecd_byte(&self) -> Result<u8, Error> {
		match self.kind {
			AddressKind::Ecg => Ok(self.number),
			AddressKind::Ecd => Ok(self.number + 64),
			_ => Err(self.refuse("control gear or control device")),
		}
	}

	/// Wire byte for commands that accept gear, device or broadcast.
	pub fn ecg_or_ecd_or_broadcast_byte(&self) -> Result<u8, Error> {
		match self.kind {
			AddressKind::Ecg => Ok(self.number),
			AddressKind::Ecd => Ok(self.number + 64),
			AddressKind::Broadcast => Ok(255),
			_ => Err(self.refuse("control gear, control device or broadcast")),
		}
	}

	/// Wire byte for commands that accept control devices only.
	pub fn ecd_byte(&self) -> Result<u8, Error> {
		match self.kind {
			AddressKind::Ecd => Ok(self.number + 64),
			_ => Err(self.refuse("a control device")),
		}
	}

	/// Raw group number for commands that accept groups only.
	pub fn group_byte(&self) -> Result<u8, Error> {
		match self.kind {
			AddressKind::Group => Ok(self.number),
			_ => Err(self.refuse("a group")),
		}
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self.kind {
			AddressKind::Broadcast => write!(f, "{} broadcast", self.controller),
			AddressKind::Ecg => write!(f, "{} ECG {}", self.controller, self.number),
			AddressKind::Ecd => write!(f, "{} ECD {}", self.controller, self.number),
			AddressKind::Group => write!(f, "{} group {}", self.controller, self.number),
		}
	}
}

/// DALI-2 instance types reported by control devices.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceKind {
	PushButton = 0x01,
	AbsoluteInput = 0x02,
	OccupancySensor = 0x03,
	LightSensor = 0x04,
	GeneralSensor = 0x06,
}

impl TryFrom<u8> for InstanceKind {
	type Error = Error;
	fn try_from(val: u8) -> Result<InstanceKind, Error> {
		match val {
			0x01 => Ok(InstanceKind::PushButton),
			0x02 => Ok(InstanceKind::AbsoluteInput),
			0x03 => Ok(InstanceKind::OccupancySensor),
			0x04 => Ok(InstanceKind::LightSensor),
			0x06 => Ok(InstanceKind::GeneralSensor),
			x => Err(Error::Protocol(format!("unknown instance type 0x{:02X}", x))),
		}
	}
}

/// One instance on a control device (button 3 on a four-button panel, the
/// occupancy half of a combined sensor, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instance {
	/// Always an ECD address.
	pub address: Address,
	pub kind: InstanceKind,
	pub number: u8,
	pub active: Option<bool>,
	pub error: Option<bool>,
}

impl Instance {
	pub fn new(address: Address, kind: InstanceKind, number: u8) -> Result<Instance, Error> {
		if address.kind != AddressKind::Ecd {
			return Err(Error::InvalidArgument(format!("instance address must be a control device, got {:?}", address.kind)));
		}
		if number > 31 {
			return Err(Error::InvalidArgument(format!("instance number must be 0-31, got {}", number)));
		}
		Ok(Instance { address, kind, number, active: None, error: None })
	}
}

/// Colour type tag bytes used on the wire.
pub const COLOUR_TAG_XY: u8 = 0x10;
pub const COLOUR_TAG_TC: u8 = 0x20;
pub const COLOUR_TAG_RGBWAF: u8 = 0x80;

/// A DALI colour value.
///
/// Exactly one arm is active; the tag byte on the wire picks it.  Tunable
/// white carries Kelvin, RGBWAF carries up to six channel levels, XY carries
/// CIE 1931 coordinates scaled to 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Colour {
	Tc { kelvin: u16 },
	Rgbwaf { r: u8, g: u8, b: u8, w: u8, a: u8, f: u8 },
	Xy { x: u16, y: u16 },
}

impl Colour {
	/// Tunable-white colour.  Out-of-range Kelvin is clamped to the
	/// controller-accepted band rather than rejected, since event payloads
	/// from misconfigured gear occasionally stray outside it.
	pub fn tc(kelvin: u16) -> Colour {
		let clamped = kelvin.max(MIN_KELVIN).min(MAX_KELVIN);
		if clamped != kelvin {
			tracing::warn!(kelvin, clamped, "colour temperature out of range, clamping");
		}
		Colour::Tc { kelvin: clamped }
	}

	pub fn rgb(r: u8, g: u8, b: u8) -> Colour {
		Colour::Rgbwaf { r, g, b, w: 0, a: 0, f: 0 }
	}

	pub fn xy(x: u16, y: u16) -> Colour {
		Colour::Xy { x, y }
	}

	/// Decode a colour from response or event bytes, where byte 0 is the
	/// type tag.  Controllers send 3, 5 or 7 byte forms depending on the
	/// command; the trailing padding of the 7-byte form is ignored.
	pub fn decode(bytes: &[u8]) -> Option<Colour> {
		if bytes.is_empty() {
			return None;
		}
		match bytes[0] {
			COLOUR_TAG_RGBWAF if bytes.len() == 7 => Some(Colour::Rgbwaf {
				r: bytes[1],
				g: bytes[2],
				b: bytes[3],
				w: bytes[4],
				a: bytes[5],
				f: bytes[6],
			}),
			COLOUR_TAG_TC if bytes.len() == 3 || bytes.len() == 7 => {
				Some(Colour::tc(BigEndian::read_u16(&bytes[1..3])))
			}
			COLOUR_TAG_XY if bytes.len() == 5 || bytes.len() == 7 => Some(Colour::Xy {
				x: BigEndian::read_u16(&bytes[1..3]),
				y: BigEndian::read_u16(&bytes[3..5]),
			}),
			_ => None,
		}
	}

	/// Encode as `[level, tag, data...]` for the DALI colour command.
	/// `level` 255 means "leave the level alone".
	pub fn to_wire(&self, level: u8) -> Vec<u8> {
		match *self {
			Colour::Tc { kelvin } => {
				let mut v = vec![level, COLOUR_TAG_TC, 0, 0];
				BigEndian::write_u16(&mut v[2..4], kelvin);
				v
			}
			Colour::Rgbwaf { r, g, b, w, a, f } => vec![level, COLOUR_TAG_RGBWAF, r, g, b, w, a, f],
			Colour::Xy { x, y } => {
				let mut v = vec![level, COLOUR_TAG_XY, 0, 0, 0, 0];
				BigEndian::write_u16(&mut v[2..4], x);
				BigEndian::write_u16(&mut v[4..6], y);
				v
			}
		}
	}
}

/// Event codes emitted by controllers.
///
/// 0x03 and 0x04 are the legacy level-change events, superseded by
/// [EventCode::LevelChangeV2]; the dispatcher drops them.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
	ButtonPress = 0x00,
	ButtonHold = 0x01,
	AbsoluteInput = 0x02,
	LevelChange = 0x03,
	GroupLevelChange = 0x04,
	SceneChange = 0x05,
	IsOccupied = 0x06,
	SystemVariableChange = 0x07,
	ColourChange = 0x08,
	ProfileChange = 0x09,
	GroupOccupied = 0x0A,
	LevelChangeV2 = 0x0B,
}

impl TryFrom<u8> for EventCode {
	type Error = Error;
	fn try_from(val: u8) -> Result<EventCode, Error> {
		match val {
			0x00 => Ok(EventCode::ButtonPress),
			0x01 => Ok(EventCode::ButtonHold),
			0x02 => Ok(EventCode::AbsoluteInput),
			0x03 => Ok(EventCode::LevelChange),
			0x04 => Ok(EventCode::GroupLevelChange),
			0x05 => Ok(EventCode::SceneChange),
			0x06 => Ok(EventCode::IsOccupied),
			0x07 => Ok(EventCode::SystemVariableChange),
			0x08 => Ok(EventCode::ColourChange),
			0x09 => Ok(EventCode::ProfileChange),
			0x0A => Ok(EventCode::GroupOccupied),
			0x0B => Ok(EventCode::LevelChangeV2),
			x => Err(Error::Protocol(format!("unknown event code 0x{:02X}", x))),
		}
	}
}

/// Which event codes a controller should emit (or a filter should mute).
///
/// One bit per [EventCode], serialised big-endian as two bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventMask(u16);

impl EventMask {
	pub fn none() -> EventMask {
		EventMask(0)
	}

	pub fn all() -> EventMask {
		EventMask(0x0FFF)
	}

	pub fn with(mut self, code: EventCode) -> EventMask {
		self.0 |= 1 << (code as u16);
		self
	}

	pub fn without(mut self, code: EventCode) -> EventMask {
		self.0 &= !(1 << (code as u16));
		self
	}

	pub fn contains(&self, code: EventCode) -> bool {
		self.0 & (1 << (code as u16)) != 0
	}

	pub fn bitmask(&self) -> u16 {
		self.0
	}

	pub fn from_double_byte(mask: u16) -> EventMask {
		EventMask(mask & 0x0FFF)
	}

	pub fn from_upper_lower(upper: u8, lower: u8) -> EventMask {
		EventMask::from_double_byte((u16::from(upper) << 8) | u16::from(lower))
	}

	pub fn upper(&self) -> u8 {
		(self.0 >> 8) as u8
	}

	pub fn lower(&self) -> u8 {
		(self.0 & 0xFF) as u8
	}
}

/// TPI event emitter mode byte.
///
/// Note the inverted sense of the multicast bit: controllers set 0x80 to
/// mean "multicast disabled".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMode {
	pub enabled: bool,
	pub filtering: bool,
	pub unicast: bool,
	pub multicast: bool,
}

impl EventMode {
	pub fn to_byte(&self) -> u8 {
		let mut flag = 0x00;
		if self.enabled {
			flag |= 0x01;
		}
		if self.filtering {
			flag |= 0x02;
		}
		if self.unicast {
			flag |= 0x40;
		}
		if !self.multicast {
			flag |= 0x80;
		}
		flag
	}

	pub fn from_byte(flag: u8) -> EventMode {
		EventMode {
			enabled: flag & 0x01 != 0,
			filtering: flag & 0x02 != 0,
			unicast: flag & 0x40 != 0,
			multicast: flag & 0x80 == 0,
		}
	}
}

/// Error codes carried in 0xA3 responses.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
	Checksum = 0x01,
	ShortCircuit = 0x02,
	ReceiveError = 0x03,
	UnknownCmd = 0x04,
	PaidFeature = 0xB0,
	InvalidArgs = 0xB1,
	CmdRefused = 0xB2,
	QueueFailure = 0xB3,
	ResponseUnavail = 0xB4,
	OtherDaliError = 0xB5,
	MaxLimit = 0xB6,
	UnexpectedResult = 0xB7,
	UnknownTarget = 0xB8,
}

impl TryFrom<u8> for ErrorCode {
	type Error = Error;
	fn try_from(val: u8) -> Result<ErrorCode, Error> {
		match val {
			0x01 => Ok(ErrorCode::Checksum),
			0x02 => Ok(ErrorCode::ShortCircuit),
			0x03 => Ok(ErrorCode::ReceiveError),
			0x04 => Ok(ErrorCode::UnknownCmd),
			0xB0 => Ok(ErrorCode::PaidFeature),
			0xB1 => Ok(ErrorCode::InvalidArgs),
			0xB2 => Ok(ErrorCode::CmdRefused),
			0xB3 => Ok(ErrorCode::QueueFailure),
			0xB4 => Ok(ErrorCode::ResponseUnavail),
			0xB5 => Ok(ErrorCode::OtherDaliError),
			0xB6 => Ok(ErrorCode::MaxLimit),
			0xB7 => Ok(ErrorCode::UnexpectedResult),
			0xB8 => Ok(ErrorCode::UnknownTarget),
			x => Err(Error::Protocol(format!("unknown error code 0x{:02X}", x))),
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:?} (0x{:02X})", self, *self as u8)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn address_ranges() {
		let c = ControllerId(1);
		assert!(Address::ecg(c, 63).is_ok());
		assert!(Address::ecg(c, 64).is_err());
		assert!(Address::ecd(c, 63).is_ok());
		assert!(Address::ecd(c, 64).is_err());
		assert!(Address::group(c, 15).is_ok());
		assert!(Address::group(c, 16).is_err());
		assert_eq!(Address::broadcast(c).number, 255);
	}

	#[test]
	fn address_wire_encoding() {
		let c = ControllerId(0);
		let ecg = Address::ecg(c, 5).unwrap();
		let ecd = Address::ecd(c, 5).unwrap();
		let group = Address::group(c, 2).unwrap();
		let bcast = Address::broadcast(c);

		assert_eq!(ecg.ecg_byte().unwrap(), 5);
		assert_eq!(ecd.ecd_byte().unwrap(), 69);
		assert_eq!(group.ecg_or_group_byte().unwrap(), 66);
		assert_eq!(bcast.ecg_or_group_or_broadcast_byte().unwrap(), 255);

		// kind mismatches refuse
		assert!(group.ecg_byte().is_err());
		assert!(ecg.ecd_byte().is_err());
		assert!(ecd.ecg_or_group_byte().is_err());
		assert!(bcast.ecg_or_group_byte().is_err());
	}

	#[test]
	fn instance_requires_ecd() {
		let c = ControllerId(0);
		let ecd = Address::ecd(c, 1).unwrap();
		let ecg = Address::ecg(c, 1).unwrap();
		assert!(Instance::new(ecd, InstanceKind::PushButton, 31).is_ok());
		assert!(Instance::new(ecd, InstanceKind::PushButton, 32).is_err());
		assert!(Instance::new(ecg, InstanceKind::PushButton, 0).is_err());
	}

	#[test]
	fn colour_round_trips_at_boundaries() {
		for &kelvin in &[MIN_KELVIN, 4000, MAX_KELVIN] {
			let c = Colour::tc(kelvin);
			let wire = c.to_wire(255);
			assert_eq!(wire[1], COLOUR_TAG_TC);
			assert_eq!(Colour::decode(&wire[1..]).unwrap(), c);
		}
		for &(lo, hi) in &[(0u8, 255u8), (255, 0)] {
			let c = Colour::Rgbwaf { r: lo, g: hi, b: lo, w: hi, a: lo, f: hi };
			let wire = c.to_wire(128);
			assert_eq!(wire.len(), 8);
			assert_eq!(Colour::decode(&wire[1..]).unwrap(), c);
		}
		for &(x, y) in &[(0u16, 65535u16), (65535, 0)] {
			let c = Colour::Xy { x, y };
			let wire = c.to_wire(255);
			assert_eq!(Colour::decode(&wire[1..]).unwrap(), c);
		}
	}

	#[test]
	fn colour_tc_wire_layout() {
		// level 200, 4000 K
		assert_eq!(Colour::tc(4000).to_wire(200), vec![0xC8, 0x20, 0x0F, 0xA0]);
	}

	#[test]
	fn colour_decode_rejects_garbage() {
		assert_eq!(Colour::decode(&[]), None);
		assert_eq!(Colour::decode(&[0x55, 1, 2]), None);
		assert_eq!(Colour::decode(&[COLOUR_TAG_RGBWAF, 1, 2]), None);
	}

	#[test]
	fn event_mask_bit_layout() {
		let codes = [
			EventCode::ButtonPress,
			EventCode::ButtonHold,
			EventCode::AbsoluteInput,
			EventCode::LevelChange,
			EventCode::GroupLevelChange,
			EventCode::SceneChange,
			EventCode::IsOccupied,
			EventCode::SystemVariableChange,
			EventCode::ColourChange,
			EventCode::ProfileChange,
			EventCode::GroupOccupied,
			EventCode::LevelChangeV2,
		];
		for &code in &codes {
			assert_eq!(EventMask::none().with(code).bitmask(), 1 << (code as u16));
		}
		assert_eq!(EventMask::all().bitmask(), 0x0FFF);
		let m = EventMask::from_upper_lower(0x0F, 0xFF);
		assert_eq!((m.upper(), m.lower()), (0x0F, 0xFF));
	}

	#[test]
	fn event_mode_byte_round_trip() {
		let mode = EventMode { enabled: true, filtering: false, unicast: true, multicast: false };
		assert_eq!(mode.to_byte(), 0x01 | 0x40 | 0x80);
		assert_eq!(EventMode::from_byte(mode.to_byte()), mode);

		let multicast = EventMode { enabled: true, filtering: true, unicast: false, multicast: true };
		assert_eq!(multicast.to_byte(), 0x03);
		assert_eq!(EventMode::from_byte(0x03), multicast);
	}
}
