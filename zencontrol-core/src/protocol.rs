use std::collections::HashMap;
use std::convert::TryFrom;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, error, warn};

use crate::client::{Client, DEFAULT_TIMEOUT};
use crate::commands::Command;
use crate::config::{ControllerConfig, MacAddress};
use crate::error::Error;
use crate::frame::{Request, Response, ResponseType};
use crate::types::{
	Address, Colour, ControllerId, ErrorCode, EventMask, EventMode, Instance, InstanceKind,
	MAX_LEVEL, MAX_SCENE, MAX_SYSVAR,
};

/// Cacheable query results are reused for this long.
pub const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// A registered controller: configured identity plus its command socket and
/// a little cached runtime state.
pub struct Controller {
	pub id: ControllerId,
	pub name: String,
	pub label: String,
	pub host: Ipv4Addr,
	pub port: u16,
	pub mac: MacAddress,
	pub filtering: bool,
	pub(crate) client: Client,
	state: Mutex<ControllerState>,
}

#[derive(Default)]
struct ControllerState {
	version: Option<String>,
	startup_complete: bool,
	current_profile: Option<u16>,
	last_seen: Option<Instant>,
}

impl Controller {
	/// Last cached firmware version, if it has been queried.
	pub fn version(&self) -> Option<String> {
		self.state.lock().unwrap().version.clone()
	}

	pub fn startup_complete(&self) -> bool {
		self.state.lock().unwrap().startup_complete
	}

	pub fn current_profile(&self) -> Option<u16> {
		self.state.lock().unwrap().current_profile
	}

	/// When a response or event from this controller was last seen.
	pub fn last_seen(&self) -> Option<Instant> {
		self.state.lock().unwrap().last_seen
	}

	pub(crate) fn mark_seen(&self) {
		self.state.lock().unwrap().last_seen = Some(Instant::now());
	}

	pub(crate) fn set_current_profile(&self, profile: u16) {
		self.state.lock().unwrap().current_profile = Some(profile);
	}

	pub fn broadcast_address(&self) -> Address {
		Address::broadcast(self.id)
	}
}

impl std::fmt::Debug for Controller {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("Controller")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("host", &self.host)
			.field("port", &self.port)
			.finish()
	}
}

/// Key for the cacheable-query cache: controller, opcode, basic payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
	pub controller: ControllerId,
	pub command: u8,
	pub payload: [u8; 4],
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
	pub rtype: ResponseType,
	pub data: Vec<u8>,
	stamp: Instant,
}

impl CacheEntry {
	pub fn age(&self) -> Duration {
		self.stamp.elapsed()
	}
}

/// The TPI Advanced command surface.
///
/// Owns the registered controllers (each with its own [Client]) and the
/// query cache.  Methods translate typed arguments into basic/colour/
/// dynamic request frames and decode the heterogeneous answer shapes back
/// into typed results.
///
/// Result conventions: acknowledged commands return `bool` (OK vs refused
/// or unanswered), queries return `Option` (`None` uniformly covers "no
/// answer" and "controller reported an error", which is logged).  Only a
/// response timeout becomes an `Err`, because callers cannot distinguish
/// "no data" from "controller offline" on their own.
pub struct Protocol {
	controllers: RwLock<Vec<Arc<Controller>>>,
	cache: Mutex<HashMap<CacheKey, CacheEntry>>,
	request_timeout: Duration,
	request_retries: u32,
}

impl Default for Protocol {
	fn default() -> Protocol {
		Protocol::new()
	}
}

impl Protocol {
	pub fn new() -> Protocol {
		Protocol {
			controllers: RwLock::new(Vec::new()),
			cache: Mutex::new(HashMap::new()),
			request_timeout: DEFAULT_TIMEOUT,
			request_retries: 2,
		}
	}

	/// Override the per-request timeout and retry budget used by every
	/// command method.
	pub fn with_request_budget(mut self, timeout: Duration, retries: u32) -> Protocol {
		self.request_timeout = timeout;
		self.request_retries = retries;
		self
	}

	// ============================
	// Controller registry
	// ============================

	pub fn add_controller(&self, config: ControllerConfig) -> Result<Arc<Controller>, Error> {
		config.validate()?;
		let mut controllers = self.controllers.write().unwrap();
		if controllers.iter().any(|c| c.id == config.id) {
			return Err(Error::Config(format!("duplicate controller id {}", config.id)));
		}
		let client = Client::connect(config.host, config.port)?;
		let controller = Arc::new(Controller {
			id: config.id,
			name: config.name,
			label: config.label,
			host: config.host,
			port: config.port,
			mac: config.mac,
			filtering: config.filtering,
			client,
			state: Mutex::new(ControllerState::default()),
		});
		controllers.push(controller.clone());
		Ok(controller)
	}

	pub fn controllers(&self) -> Vec<Arc<Controller>> {
		self.controllers.read().unwrap().clone()
	}

	pub fn controller(&self, id: ControllerId) -> Option<Arc<Controller>> {
		self.controllers.read().unwrap().iter().find(|c| c.id == id).cloned()
	}

	/// Resolve the origin controller of an event by its source IP.
	pub fn controller_by_ip(&self, ip: IpAddr) -> Option<Arc<Controller>> {
		self.controllers.read().unwrap().iter().find(|c| IpAddr::V4(c.host) == ip).cloned()
	}

	fn controller_for(&self, address: &Address) -> Result<Arc<Controller>, Error> {
		self.controller(address.controller)
			.ok_or_else(|| Error::Config(format!("unknown controller {}", address.controller)))
	}

	// ============================
	// Cache plumbing
	// ============================

	/// Snapshot of the cache for external persistence.
	pub fn cache_entries(&self) -> Vec<(CacheKey, CacheEntry)> {
		self.cache.lock().unwrap().iter().map(|(k, v)| (*k, v.clone())).collect()
	}

	/// Seed the cache, e.g. from externally persisted state.  `age` is how
	/// old the entry already is; entries past the TTL are skipped.
	pub fn prime_cache<I>(&self, entries: I)
	where
		I: IntoIterator<Item = (CacheKey, ResponseType, Vec<u8>, Duration)>,
	{
		let now = Instant::now();
		let mut cache = self.cache.lock().unwrap();
		for (key, rtype, data, age) in entries {
			if age >= CACHE_TTL {
				continue;
			}
			if let Some(stamp) = now.checked_sub(age) {
				cache.insert(key, CacheEntry { rtype, data, stamp });
			}
		}
	}

	pub fn clear_cache(&self) {
		self.cache.lock().unwrap().clear();
	}

	// ============================
	// Packet dispatch
	// ============================

	/// Send a basic request and return the raw disposition.  A cache hit is
	/// indistinguishable from a live response to the typed decoders above
	/// this.
	fn send_basic(
		&self,
		ctrl: &Controller,
		cmd: Command,
		address: u8,
		data: &[u8],
		cacheable: bool,
	) -> Result<(ResponseType, Vec<u8>), Error> {
		let request = Request::basic(cmd.opcode(), address, data)?;
		let key = if cacheable {
			let mut payload = [0u8; 4];
			payload.copy_from_slice(request.payload());
			Some(CacheKey { controller: ctrl.id, command: cmd.opcode(), payload })
		} else {
			None
		};

		if let Some(key) = key {
			let mut cache = self.cache.lock().unwrap();
			if let Some(entry) = cache.get(&key) {
				if entry.age() < CACHE_TTL {
					debug!(?key, "cache hit");
					return Ok((entry.rtype, entry.data.clone()));
				}
				cache.remove(&key);
			}
		}

		let response = self.transmit(ctrl, &request)?;

		if let Some(key) = key {
			// Only settled wire outcomes are worth remembering.
			if matches!(response.rtype, ResponseType::Ok | ResponseType::Answer | ResponseType::NoAnswer) {
				self.cache.lock().unwrap().insert(
					key,
					CacheEntry { rtype: response.rtype, data: response.data.clone(), stamp: Instant::now() },
				);
			}
		}
		Ok((response.rtype, response.data))
	}

	fn send_colour(&self, ctrl: &Controller, cmd: Command, address: u8, colour: &Colour, level: u8) -> Result<bool, Error> {
		let request = Request::colour(cmd.opcode(), address, &colour.to_wire(level))?;
		let response = self.transmit(ctrl, &request)?;
		match response.rtype {
			ResponseType::Ok => Ok(true),
			ResponseType::NoAnswer => Ok(false),
			other => {
				self.note_failure(ctrl, cmd, other, &response.data);
				Ok(false)
			}
		}
	}

	fn send_dynamic(&self, ctrl: &Controller, cmd: Command, data: &[u8]) -> Result<Option<Vec<u8>>, Error> {
		let request = Request::dynamic(cmd.opcode(), data)?;
		let response = self.transmit(ctrl, &request)?;
		match response.rtype {
			ResponseType::Ok | ResponseType::Answer => Ok(Some(response.data)),
			other => {
				self.note_failure(ctrl, cmd, other, &response.data);
				Ok(None)
			}
		}
	}

	fn transmit(&self, ctrl: &Controller, request: &Request) -> Result<Response, Error> {
		let response = ctrl.client.send_with(request, self.request_timeout, self.request_retries)?;
		if response.rtype == ResponseType::Timeout {
			let attempts = self.request_retries + 1;
			error!(peer = %ctrl.client.peer(), attempts, command = request.command, "request timed out");
			return Err(Error::Timeout { peer: ctrl.client.peer().to_string(), attempts });
		}
		ctrl.mark_seen();
		Ok(response)
	}

	fn note_failure(&self, ctrl: &Controller, cmd: Command, rtype: ResponseType, data: &[u8]) {
		match rtype {
			ResponseType::Error => match data.first().copied().map(ErrorCode::try_from) {
				Some(Ok(code)) => warn!(controller = %ctrl.id, command = ?cmd, %code, "command failed"),
				Some(Err(_)) => warn!(controller = %ctrl.id, command = ?cmd, code = data[0], "command failed with unknown error code"),
				None => warn!(controller = %ctrl.id, command = ?cmd, "command failed without an error code"),
			},
			ResponseType::Invalid => warn!(controller = %ctrl.id, command = ?cmd, "malformed response"),
			_ => debug!(controller = %ctrl.id, command = ?cmd, ?rtype, "unexpected response type"),
		}
	}

	// Typed decode helpers over send_basic.

	fn basic_ok(&self, ctrl: &Controller, cmd: Command, address: u8, data: &[u8]) -> Result<bool, Error> {
		let (rtype, payload) = self.send_basic(ctrl, cmd, address, data, false)?;
		match rtype {
			ResponseType::Ok => Ok(true),
			ResponseType::NoAnswer => Ok(false),
			other => {
				self.note_failure(ctrl, cmd, other, &payload);
				Ok(false)
			}
		}
	}

	fn basic_bytes(&self, ctrl: &Controller, cmd: Command, address: u8, data: &[u8], cacheable: bool) -> Result<Option<Vec<u8>>, Error> {
		let (rtype, payload) = self.send_basic(ctrl, cmd, address, data, cacheable)?;
		match rtype {
			ResponseType::Answer => Ok(Some(payload)),
			ResponseType::NoAnswer | ResponseType::Ok => Ok(None),
			other => {
				self.note_failure(ctrl, cmd, other, &payload);
				Ok(None)
			}
		}
	}

	fn basic_str(&self, ctrl: &Controller, cmd: Command, address: u8, data: &[u8], cacheable: bool) -> Result<Option<String>, Error> {
		Ok(self.basic_bytes(ctrl, cmd, address, data, cacheable)?.and_then(|bytes| {
			// Controllers answer labels in plain ASCII; anything else is
			// treated as no label rather than an error.
			if bytes.is_ascii() {
				String::from_utf8(bytes).ok()
			} else {
				None
			}
		}))
	}

	fn basic_u8(&self, ctrl: &Controller, cmd: Command, address: u8, data: &[u8]) -> Result<Option<u8>, Error> {
		Ok(self
			.basic_bytes(ctrl, cmd, address, data, false)?
			.and_then(|bytes| if bytes.len() == 1 { Some(bytes[0]) } else { None }))
	}

	fn basic_bool(&self, ctrl: &Controller, cmd: Command, address: u8, data: &[u8]) -> Result<Option<bool>, Error> {
		Ok(self.basic_u8(ctrl, cmd, address, data)?.map(|b| b != 0))
	}

	/// Expand a two-byte bitmap sent as `[high, low]` into sorted indices.
	fn u16_bitmap_indices(high: u8, low: u8) -> Vec<u8> {
		let mask = (u16::from(high) << 8) | u16::from(low);
		(0..16u8).filter(|&i| mask & (1u16 << i) != 0).collect()
	}

	/// Expand a byte-array bitmap (byte 0 carries indices 0-7) into sorted
	/// indices.
	fn byte_bitmap_indices(bytes: &[u8]) -> Vec<u8> {
		let mut out = Vec::new();
		for (byte_index, byte) in bytes.iter().enumerate() {
			for bit in 0..8 {
				if byte & (1 << bit) != 0 {
					out.push((byte_index * 8 + bit) as u8);
				}
			}
		}
		out
	}

	// ============================
	// Controller introspection
	// ============================

	/// Firmware version as "major.minor.patch", or `None` if the query
	/// fails.  The result is cached on the controller handle.
	pub fn query_controller_version_number(&self, ctrl: &Controller) -> Result<Option<String>, Error> {
		let version = self
			.basic_bytes(ctrl, Command::QueryControllerVersionNumber, 0, &[], false)?
			.filter(|b| b.len() == 3)
			.map(|b| format!("{}.{}.{}", b[0], b[1], b[2]));
		if let Some(v) = &version {
			ctrl.state.lock().unwrap().version = Some(v.clone());
		}
		Ok(version)
	}

	pub fn query_controller_label(&self, ctrl: &Controller) -> Result<Option<String>, Error> {
		self.basic_str(ctrl, Command::QueryControllerLabel, 0, &[], true)
	}

	pub fn query_controller_fitting_number(&self, ctrl: &Controller) -> Result<Option<String>, Error> {
		self.basic_str(ctrl, Command::QueryControllerFittingNumber, 0, &[], false)
	}

	/// Whether the DALI line is ready (false means a bus fault).
	pub fn query_is_dali_ready(&self, ctrl: &Controller) -> Result<bool, Error> {
		self.basic_ok(ctrl, Command::QueryIsDaliReady, 0, &[])
	}

	/// Whether the controller has finished its startup queries.  Startup
	/// scales with the number of devices on the line; waiting for it
	/// matters before trusting DALI queries.
	pub fn query_controller_startup_complete(&self, ctrl: &Controller) -> Result<bool, Error> {
		let complete = self.basic_ok(ctrl, Command::QueryControllerStartupComplete, 0, &[])?;
		ctrl.state.lock().unwrap().startup_complete = complete;
		Ok(complete)
	}

	// ============================
	// ECG control
	// ============================

	/// DIRECT ARC level (0-254) to gear, group or broadcast, fading at the
	/// target's fade rate.
	pub fn dali_arc_level(&self, address: &Address, level: u8) -> Result<bool, Error> {
		if level > MAX_LEVEL {
			return Err(Error::InvalidArgument(format!("level must be 0-254, got {}", level)));
		}
		let ctrl = self.controller_for(address)?;
		self.basic_ok(&ctrl, Command::DaliArcLevel, address.ecg_or_group_or_broadcast_byte()?, &[0x00, 0x00, level])
	}

	pub fn dali_off(&self, address: &Address) -> Result<bool, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_ok(&ctrl, Command::DaliOff, address.ecg_or_group_or_broadcast_byte()?, &[])
	}

	pub fn dali_up(&self, address: &Address) -> Result<bool, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_ok(&ctrl, Command::DaliUp, address.ecg_or_group_or_broadcast_byte()?, &[])
	}

	pub fn dali_down(&self, address: &Address) -> Result<bool, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_ok(&ctrl, Command::DaliDown, address.ecg_or_group_or_broadcast_byte()?, &[])
	}

	/// On-if-off and step up, with no fade.
	pub fn dali_on_step_up(&self, address: &Address) -> Result<bool, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_ok(&ctrl, Command::DaliOnStepUp, address.ecg_or_group_or_broadcast_byte()?, &[])
	}

	/// Step down and off once at min, with no fade.
	pub fn dali_step_down_off(&self, address: &Address) -> Result<bool, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_ok(&ctrl, Command::DaliStepDownOff, address.ecg_or_group_or_broadcast_byte()?, &[])
	}

	pub fn dali_recall_max(&self, address: &Address) -> Result<bool, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_ok(&ctrl, Command::DaliRecallMax, address.ecg_or_group_or_broadcast_byte()?, &[])
	}

	pub fn dali_recall_min(&self, address: &Address) -> Result<bool, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_ok(&ctrl, Command::DaliRecallMin, address.ecg_or_group_or_broadcast_byte()?, &[])
	}

	/// Fade to `level` over `seconds` (0-65535), overriding the configured
	/// fade rate.
	pub fn dali_custom_fade(&self, address: &Address, level: u8, seconds: u16) -> Result<bool, Error> {
		if level > MAX_LEVEL {
			return Err(Error::InvalidArgument(format!("level must be 0-254, got {}", level)));
		}
		let ctrl = self.controller_for(address)?;
		let secs = seconds.to_be_bytes();
		self.basic_ok(&ctrl, Command::DaliCustomFade, address.ecg_or_group_byte()?, &[level, secs[0], secs[1]])
	}

	/// Stop a running fade where it is; the target stays at whatever level
	/// the fade had reached.
	pub fn dali_stop_fade(&self, address: &Address) -> Result<bool, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_ok(&ctrl, Command::DaliStopFade, address.ecg_or_group_or_broadcast_byte()?, &[])
	}

	pub fn dali_go_to_last_active_level(&self, address: &Address) -> Result<bool, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_ok(&ctrl, Command::DaliGoToLastActiveLevel, address.ecg_or_group_byte()?, &[])
	}

	/// Keep sensors from driving the target for `seconds` (0-65535).
	pub fn dali_inhibit(&self, address: &Address, seconds: u16) -> Result<bool, Error> {
		let ctrl = self.controller_for(address)?;
		let secs = seconds.to_be_bytes();
		self.basic_ok(&ctrl, Command::DaliInhibit, address.ecg_or_group_or_broadcast_byte()?, &[0x00, secs[0], secs[1]])
	}

	/// Begin a DAPC sequence: fades are suppressed for ~250 ms windows as
	/// long as arc levels keep arriving.
	pub fn dali_enable_dapc_sequence(&self, address: &Address) -> Result<Option<bool>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_bool(&ctrl, Command::DaliEnableDapcSeq, address.ecg_byte()?, &[])
	}

	/// Set a colour, optionally with a level (255 leaves the level alone).
	pub fn dali_colour(&self, address: &Address, colour: &Colour, level: u8) -> Result<bool, Error> {
		let ctrl = self.controller_for(address)?;
		self.send_colour(&ctrl, Command::DaliColour, address.ecg_or_group_or_broadcast_byte()?, colour, level)
	}

	/// Recall scene 0-11 on gear, group or broadcast.
	pub fn dali_scene(&self, address: &Address, scene: u8) -> Result<bool, Error> {
		if scene >= MAX_SCENE {
			return Err(Error::InvalidArgument(format!("scene must be 0-11, got {}", scene)));
		}
		let ctrl = self.controller_for(address)?;
		self.basic_ok(&ctrl, Command::DaliScene, address.ecg_or_group_or_broadcast_byte()?, &[0x00, 0x00, scene])
	}

	// ============================
	// ECG queries
	// ============================

	/// Arc level of gear or a group; `None` when members are at mixed
	/// levels (the controller answers 255).
	pub fn dali_query_level(&self, address: &Address) -> Result<Option<u8>, Error> {
		let ctrl = self.controller_for(address)?;
		Ok(self
			.basic_u8(&ctrl, Command::DaliQueryLevel, address.ecg_or_group_byte()?, &[])?
			.filter(|&level| level != 255))
	}

	pub fn dali_query_control_gear_status(&self, address: &Address) -> Result<Option<GearStatus>, Error> {
		let ctrl = self.controller_for(address)?;
		Ok(self
			.basic_u8(&ctrl, Command::DaliQueryControlGearStatus, address.ecg_or_group_or_broadcast_byte()?, &[])?
			.map(GearStatus::from_byte))
	}

	/// DALI device types implemented by the gear, expanded from the 4-byte
	/// bitmap.
	pub fn dali_query_cg_type(&self, address: &Address) -> Result<Option<Vec<u8>>, Error> {
		let ctrl = self.controller_for(address)?;
		Ok(self
			.basic_bytes(&ctrl, Command::DaliQueryCgType, address.ecg_byte()?, &[], false)?
			.filter(|b| b.len() == 4)
			.map(|b| Self::byte_bitmap_indices(&b)))
	}

	pub fn query_dali_colour(&self, address: &Address) -> Result<Option<Colour>, Error> {
		let ctrl = self.controller_for(address)?;
		Ok(self
			.basic_bytes(&ctrl, Command::QueryDaliColour, address.ecg_byte()?, &[], false)?
			.and_then(|b| Colour::decode(&b)))
	}

	pub fn query_dali_colour_features(&self, address: &Address) -> Result<Option<ColourFeatures>, Error> {
		let ctrl = self.controller_for(address)?;
		let (rtype, payload) = self.send_basic(&ctrl, Command::QueryDaliColourFeatures, address.ecg_byte()?, &[], true)?;
		match rtype {
			ResponseType::Answer if payload.len() == 1 => Ok(Some(ColourFeatures::from_byte(payload[0]))),
			ResponseType::Answer => Ok(None),
			// Gear without colour support often doesn't answer at all;
			// report that as "no features" rather than "unknown".
			ResponseType::NoAnswer => Ok(Some(ColourFeatures::default())),
			other => {
				self.note_failure(&ctrl, Command::QueryDaliColourFeatures, other, &payload);
				Ok(None)
			}
		}
	}

	pub fn query_dali_colour_temp_limits(&self, address: &Address) -> Result<Option<ColourTempLimits>, Error> {
		let ctrl = self.controller_for(address)?;
		Ok(self
			.basic_bytes(&ctrl, Command::QueryDaliColourTempLimits, address.ecg_byte()?, &[], true)?
			.filter(|b| b.len() == 10)
			.map(|b| ColourTempLimits {
				physical_warmest: BigEndian::read_u16(&b[0..2]),
				physical_coolest: BigEndian::read_u16(&b[2..4]),
				soft_warmest: BigEndian::read_u16(&b[4..6]),
				soft_coolest: BigEndian::read_u16(&b[6..8]),
				step: BigEndian::read_u16(&b[8..10]),
			}))
	}

	pub fn dali_query_min_level(&self, address: &Address) -> Result<Option<u8>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_u8(&ctrl, Command::DaliQueryMinLevel, address.ecg_byte()?, &[])
	}

	pub fn dali_query_max_level(&self, address: &Address) -> Result<Option<u8>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_u8(&ctrl, Command::DaliQueryMaxLevel, address.ecg_byte()?, &[])
	}

	pub fn dali_query_fade_running(&self, address: &Address) -> Result<Option<bool>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_bool(&ctrl, Command::DaliQueryFadeRunning, address.ecg_byte()?, &[])
	}

	/// Last heard scene.  Group and broadcast scene commands also update
	/// the last heard scene of every member address.
	pub fn dali_query_last_scene(&self, address: &Address) -> Result<Option<u8>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_u8(&ctrl, Command::DaliQueryLastScene, address.ecg_or_group_or_broadcast_byte()?, &[])
	}

	/// Whether the last heard scene is still current, i.e. no level or
	/// colour command has been heard since.
	pub fn dali_query_last_scene_is_current(&self, address: &Address) -> Result<Option<bool>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_bool(&ctrl, Command::DaliQueryLastSceneIsCurrent, address.ecg_or_group_or_broadcast_byte()?, &[])
	}

	/// European Article Number, a 48-bit big-endian integer.
	pub fn query_dali_ean(&self, address: &Address) -> Result<Option<u64>, Error> {
		let ctrl = self.controller_for(address)?;
		Ok(self
			.basic_bytes(&ctrl, Command::QueryDaliEan, address.ecg_or_ecd_byte()?, &[], false)?
			.filter(|b| b.len() == 6)
			.map(|b| b.iter().fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))))
	}

	/// Serial number, a 64-bit big-endian integer.
	pub fn query_dali_serial(&self, address: &Address) -> Result<Option<u64>, Error> {
		let ctrl = self.controller_for(address)?;
		Ok(self
			.basic_bytes(&ctrl, Command::QueryDaliSerial, address.ecg_or_ecd_byte()?, &[], false)?
			.filter(|b| b.len() == 8)
			.map(|b| b.iter().fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))))
	}

	pub fn query_dali_fitting_number(&self, address: &Address) -> Result<Option<String>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_str(&ctrl, Command::QueryDaliFittingNumber, address.ecg_or_ecd_byte()?, &[], true)
	}

	pub fn query_operating_mode_by_address(&self, address: &Address) -> Result<Option<u8>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_u8(&ctrl, Command::QueryOperatingModeByAddress, address.ecg_or_ecd_byte()?, &[])
	}

	/// Label of gear or a device; `None` if unset.
	pub fn query_dali_device_label(&self, address: &Address) -> Result<Option<String>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_str(&ctrl, Command::QueryDaliDeviceLabel, address.ecg_or_ecd_byte()?, &[], true)
	}

	/// Control gear present in the controller database, from the 8-byte
	/// presence bitmap.
	pub fn query_control_gear_dali_addresses(&self, ctrl: &Controller) -> Result<Vec<Address>, Error> {
		let bytes = match self.basic_bytes(ctrl, Command::QueryControlGearDaliAddresses, 0, &[], false)? {
			Some(b) if b.len() == 8 => b,
			_ => return Ok(Vec::new()),
		};
		Self::byte_bitmap_indices(&bytes)
			.into_iter()
			.map(|n| Address::ecg(ctrl.id, n))
			.collect()
	}

	// ============================
	// Groups
	// ============================

	pub fn query_group_numbers(&self, ctrl: &Controller) -> Result<Vec<Address>, Error> {
		let mut numbers = self
			.basic_bytes(ctrl, Command::QueryGroupNumbers, 0, &[], false)?
			.unwrap_or_default();
		numbers.sort_unstable();
		numbers.into_iter().map(|n| Address::group(ctrl.id, n)).collect()
	}

	pub fn query_group_label(&self, address: &Address) -> Result<Option<String>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_str(&ctrl, Command::QueryGroupLabel, address.group_byte()?, &[], true)
	}

	/// Groups an ECG belongs to, from the `[high, low]` membership bitmap.
	pub fn query_group_membership_by_address(&self, address: &Address) -> Result<Vec<Address>, Error> {
		let ctrl = self.controller_for(address)?;
		let bytes = match self.basic_bytes(&ctrl, Command::QueryGroupMembershipByAddress, address.ecg_byte()?, &[], false)? {
			Some(b) if b.len() == 2 => b,
			_ => return Ok(Vec::new()),
		};
		Self::u16_bitmap_indices(bytes[0], bytes[1])
			.into_iter()
			.map(|n| Address::group(ctrl.id, n))
			.collect()
	}

	/// Occupancy and level of a group.
	pub fn query_group_by_number(&self, address: &Address) -> Result<Option<GroupStatus>, Error> {
		let ctrl = self.controller_for(address)?;
		Ok(self
			.basic_bytes(&ctrl, Command::QueryGroupByNumber, address.group_byte()?, &[], false)?
			.filter(|b| b.len() == 3)
			.map(|b| GroupStatus { number: b[0], occupied: b[1] != 0, level: b[2] }))
	}

	/// Scene numbers configured for a group, from the `[high, low]` bitmap.
	pub fn query_scene_numbers_for_group(&self, address: &Address) -> Result<Vec<u8>, Error> {
		let ctrl = self.controller_for(address)?;
		let bytes = match self.basic_bytes(&ctrl, Command::QuerySceneNumbersForGroup, address.group_byte()?, &[], true)? {
			Some(b) if b.len() == 2 => b,
			_ => return Ok(Vec::new()),
		};
		Ok(Self::u16_bitmap_indices(bytes[0], bytes[1]))
	}

	pub fn query_scene_label_for_group(&self, address: &Address, scene: u8) -> Result<Option<String>, Error> {
		if scene >= MAX_SCENE {
			return Err(Error::InvalidArgument(format!("scene must be 0-11, got {}", scene)));
		}
		let ctrl = self.controller_for(address)?;
		self.basic_str(&ctrl, Command::QuerySceneLabelForGroup, address.group_byte()?, &[scene], true)
	}

	/// Labels of all 12 group scenes; `None` entries have no configured
	/// scene or no label.
	pub fn query_scenes_for_group(&self, address: &Address) -> Result<Vec<Option<String>>, Error> {
		let mut labels: Vec<Option<String>> = vec![None; MAX_SCENE as usize];
		for scene in self.query_scene_numbers_for_group(address)? {
			if scene < MAX_SCENE {
				labels[scene as usize] = self.query_scene_label_for_group(address, scene)?;
			}
		}
		Ok(labels)
	}

	// ============================
	// Scenes
	// ============================

	/// Scenes an ECG has levels for.
	pub fn query_scene_numbers_by_address(&self, address: &Address) -> Result<Option<Vec<u8>>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_bytes(&ctrl, Command::QuerySceneNumbersByAddress, address.ecg_byte()?, &[], false)
	}

	/// Per-scene levels for an ECG; 255 on the wire means "not part of the
	/// scene" and comes back as `None`.
	pub fn query_scene_levels_by_address(&self, address: &Address) -> Result<Vec<Option<u8>>, Error> {
		let ctrl = self.controller_for(address)?;
		match self.basic_bytes(&ctrl, Command::QuerySceneLevelsByAddress, address.ecg_byte()?, &[], false)? {
			Some(bytes) => Ok(bytes.iter().map(|&b| if b == 255 { None } else { Some(b) }).collect()),
			None => Ok(vec![None; MAX_SCENE as usize]),
		}
	}

	/// Scenes that carry colour change data for an ECG.
	pub fn query_colour_scene_membership_by_address(&self, address: &Address) -> Result<Option<Vec<u8>>, Error> {
		let ctrl = self.controller_for(address)?;
		self.basic_bytes(&ctrl, Command::QueryColourSceneMembershipByAddr, address.ecg_byte()?, &[], false)
	}

	/// Colour data for all 12 scenes of an ECG.  The controller splits this
	/// over two queries (scenes 0-7 and 8-11); the concatenated answer is
	/// twelve 7-byte colour blocks.
	pub fn query_scene_colours_by_address(&self, address: &Address) -> Result<Vec<Option<Colour>>, Error> {
		let mut out: Vec<Option<Colour>> = vec![None; MAX_SCENE as usize];
		let ctrl = self.controller_for(address)?;
		let first = match self.basic_bytes(&ctrl, Command::QueryColourScene07DataForAddr, address.ecg_byte()?, &[], false)? {
			Some(b) => b,
			None => return Ok(out),
		};
		let mut data = first;
		if let Some(rest) = self.basic_bytes(&ctrl, Command::QueryColourScene811DataForAddr, address.ecg_byte()?, &[], false)? {
			data.extend_from_slice(&rest);
		}
		if data.len() != 7 * MAX_SCENE as usize {
			warn!(len = data.len(), "unexpected colour scene data length, expected 84");
			return Ok(out);
		}
		for (i, chunk) in data.chunks(7).enumerate() {
			out[i] = Colour::decode(chunk);
		}
		Ok(out)
	}

	// ============================
	// Instances
	// ============================

	/// Control device addresses that have instances.  The answer payload is
	/// bounded, so the address space is swept in windows; the two window
	/// starts cover the full ECD range.
	pub fn query_dali_addresses_with_instances(&self, ctrl: &Controller) -> Result<Vec<Address>, Error> {
		let mut out = Vec::new();
		for start in &[0u8, 60] {
			let numbers = self
				.basic_bytes(ctrl, Command::QueryDaliAddressesWithInstances, 0, &[0, 0, *start], false)?
				.unwrap_or_default();
			for n in numbers {
				// Device addresses arrive offset by 64.
				if (64..=127).contains(&n) {
					let address = Address::ecd(ctrl.id, n - 64)?;
					if !out.contains(&address) {
						out.push(address);
					}
				}
			}
		}
		Ok(out)
	}

	pub fn query_instances_by_address(&self, address: &Address) -> Result<Vec<Instance>, Error> {
		let ctrl = self.controller_for(address)?;
		let bytes = match self.basic_bytes(&ctrl, Command::QueryInstancesByAddress, address.ecd_byte()?, &[], false)? {
			Some(b) if b.len() >= 4 => b,
			_ => return Ok(Vec::new()),
		};
		let mut instances = Vec::new();
		for chunk in bytes.chunks_exact(4) {
			let kind = match InstanceKind::try_from(chunk[1]) {
				Ok(kind) => kind,
				Err(_) => {
					debug!(raw = chunk[1], "skipping instance of unknown type");
					continue;
				}
			};
			let mut instance = Instance::new(*address, kind, chunk[0])?;
			instance.active = Some(chunk[2] & 0x02 != 0);
			instance.error = Some(chunk[2] & 0x01 != 0);
			instances.push(instance);
		}
		Ok(instances)
	}

	/// Group targets of an instance: primary (where the device lives),
	/// first and second action targets.  255 means not configured.
	pub fn query_instance_groups(&self, instance: &Instance) -> Result<Option<InstanceGroups>, Error> {
		let ctrl = self.controller_for(&instance.address)?;
		Ok(self
			.basic_bytes(&ctrl, Command::QueryInstanceGroups, instance.address.ecd_byte()?, &[0x00, 0x00, instance.number], false)?
			.filter(|b| b.len() == 3)
			.map(|b| InstanceGroups {
				primary: if b[0] == 0xFF { None } else { Some(b[0]) },
				first: if b[1] == 0xFF { None } else { Some(b[1]) },
				second: if b[2] == 0xFF { None } else { Some(b[2]) },
			}))
	}

	pub fn query_dali_instance_label(&self, instance: &Instance) -> Result<Option<String>, Error> {
		let ctrl = self.controller_for(&instance.address)?;
		self.basic_str(&ctrl, Command::QueryDaliInstanceLabel, instance.address.ecd_byte()?, &[0x00, 0x00, instance.number], true)
	}

	pub fn query_dali_instance_fitting_number(&self, instance: &Instance) -> Result<Option<String>, Error> {
		let ctrl = self.controller_for(&instance.address)?;
		self.basic_str(&ctrl, Command::QueryDaliInstanceFittingNumber, instance.address.ecd_byte()?, &[0x00, 0x00, instance.number], false)
	}

	pub fn query_occupancy_instance_timers(&self, instance: &Instance) -> Result<Option<OccupancyTimers>, Error> {
		let ctrl = self.controller_for(&instance.address)?;
		Ok(self
			.basic_bytes(&ctrl, Command::QueryOccupancyInstanceTimers, instance.address.ecd_byte()?, &[0x00, 0x00, instance.number], false)?
			.filter(|b| b.len() >= 5)
			.map(|b| OccupancyTimers {
				deadtime_s: b[0],
				hold_s: b[1],
				report_s: b[2],
				last_detect_s: BigEndian::read_u16(&b[3..5]),
			}))
	}

	/// Override a push-button LED.  Only meaningful where the controller or
	/// the TPI caller manages LED state; many devices drive their own.
	pub fn override_dali_button_led_state(&self, instance: &Instance, on: bool) -> Result<bool, Error> {
		let ctrl = self.controller_for(&instance.address)?;
		let state = if on { 0x02 } else { 0x01 };
		self.basic_ok(&ctrl, Command::OverrideDaliButtonLedState, instance.address.ecd_byte()?, &[0x00, state, instance.number])
	}

	pub fn query_last_known_dali_button_led_state(&self, instance: &Instance) -> Result<Option<bool>, Error> {
		let ctrl = self.controller_for(&instance.address)?;
		Ok(self
			.basic_bytes(&ctrl, Command::QueryLastKnownDaliButtonLedState, instance.address.ecd_byte()?, &[0x00, 0x00, instance.number], false)?
			.and_then(|b| match b.as_slice() {
				[0x01] => Some(false),
				[0x02] => Some(true),
				_ => None,
			}))
	}

	// ============================
	// Profiles
	// ============================

	pub fn query_profile_information(&self, ctrl: &Controller) -> Result<Option<ProfileInformation>, Error> {
		let bytes = match self.basic_bytes(ctrl, Command::QueryProfileInformation, 0, &[], true)? {
			Some(b) if b.len() >= 12 => b,
			_ => return Ok(None),
		};
		let mut profiles = Vec::new();
		for chunk in bytes[12..].chunks_exact(3) {
			let number = BigEndian::read_u16(&chunk[0..2]);
			let behaviour = chunk[2];
			profiles.push(ProfileBehaviour {
				number,
				enabled: behaviour & 0x01 == 0,
				priority: ProfilePriority::from_bits((behaviour >> 1) & 0x03),
			});
		}
		Ok(Some(ProfileInformation {
			current_active: BigEndian::read_u16(&bytes[0..2]),
			last_scheduled: BigEndian::read_u16(&bytes[2..4]),
			last_overridden_utc: BigEndian::read_u32(&bytes[4..8]),
			last_scheduled_utc: BigEndian::read_u32(&bytes[8..12]),
			profiles,
		}))
	}

	pub fn query_profile_numbers(&self, ctrl: &Controller) -> Result<Option<Vec<u16>>, Error> {
		Ok(self
			.basic_bytes(ctrl, Command::QueryProfileNumbers, 0, &[], false)?
			.filter(|b| b.len() >= 2)
			.map(|b| b.chunks_exact(2).map(|c| BigEndian::read_u16(c)).collect()))
	}

	/// Label for a profile number (0-65535).
	pub fn query_profile_label(&self, ctrl: &Controller, profile: u16) -> Result<Option<String>, Error> {
		let p = profile.to_be_bytes();
		self.basic_str(ctrl, Command::QueryProfileLabel, 0, &[0x00, p[0], p[1]], true)
	}

	pub fn query_current_profile_number(&self, ctrl: &Controller) -> Result<Option<u16>, Error> {
		let current = self
			.basic_bytes(ctrl, Command::QueryCurrentProfileNumber, 0, &[], false)?
			.filter(|b| b.len() >= 2)
			.map(|b| BigEndian::read_u16(&b[0..2]));
		if let Some(p) = current {
			ctrl.set_current_profile(p);
		}
		Ok(current)
	}

	pub fn change_profile_number(&self, ctrl: &Controller, profile: u16) -> Result<bool, Error> {
		let p = profile.to_be_bytes();
		self.basic_ok(ctrl, Command::ChangeProfileNumber, 0, &[0x00, p[0], p[1]])
	}

	/// 0xFFFF asks the controller to go back to the scheduled profile.
	pub fn return_to_scheduled_profile(&self, ctrl: &Controller) -> Result<bool, Error> {
		self.change_profile_number(ctrl, 0xFFFF)
	}

	// ============================
	// TPI events
	// ============================

	/// Enable or disable event emission.  The controller echoes the mode
	/// byte; the call succeeds only when the echo matches.
	pub fn tpi_event_emit(&self, ctrl: &Controller, mode: EventMode) -> Result<bool, Error> {
		let mask = mode.to_byte();
		let (rtype, payload) = self.send_basic(ctrl, Command::EnableTpiEventEmit, mask, &[], false)?;
		match rtype {
			ResponseType::Answer | ResponseType::Ok => Ok(payload.first() == Some(&mask)),
			other => {
				self.note_failure(ctrl, Command::EnableTpiEventEmit, other, &payload);
				Ok(false)
			}
		}
	}

	pub fn query_tpi_event_emit_state(&self, ctrl: &Controller) -> Result<Option<EventMode>, Error> {
		Ok(self
			.basic_u8(ctrl, Command::QueryTpiEventEmitState, 0, &[])?
			.map(EventMode::from_byte))
	}

	/// Point a controller's unicast events at `target`, or clear the
	/// configuration with `None`.
	pub fn set_tpi_event_unicast_address(&self, ctrl: &Controller, target: Option<(Ipv4Addr, u16)>) -> Result<bool, Error> {
		let mut data = [0u8; 6];
		if let Some((ip, port)) = target {
			data[0..2].copy_from_slice(&port.to_be_bytes());
			data[2..6].copy_from_slice(&ip.octets());
		}
		Ok(self.send_dynamic(ctrl, Command::SetTpiEventUnicastAddress, &data)?.is_some())
	}

	pub fn query_tpi_event_unicast_address(&self, ctrl: &Controller) -> Result<Option<UnicastConfig>, Error> {
		Ok(self
			.basic_bytes(ctrl, Command::QueryTpiEventUnicastAddress, 0, &[], false)?
			.filter(|b| b.len() >= 7)
			.map(|b| UnicastConfig {
				mode: EventMode::from_byte(b[0]),
				port: BigEndian::read_u16(&b[1..3]),
				ip: Ipv4Addr::new(b[3], b[4], b[5], b[6]),
			}))
	}

	/// Mute the masked events from an address, or from one instance of it.
	pub fn dali_add_tpi_event_filter(&self, target: &FilterTarget, mask: EventMask) -> Result<bool, Error> {
		let (address, instance_number) = target.parts()?;
		let ctrl = self.controller_for(&target.address())?;
		self.basic_ok(&ctrl, Command::DaliAddTpiEventFilter, address, &[instance_number, mask.upper(), mask.lower()])
	}

	/// Unmute the masked events again.
	pub fn dali_clear_tpi_event_filter(&self, target: &FilterTarget, mask: EventMask) -> Result<bool, Error> {
		let (address, instance_number) = target.parts()?;
		let ctrl = self.controller_for(&target.address())?;
		self.basic_ok(&ctrl, Command::DaliClearTpiEventFilters, address, &[instance_number, mask.upper(), mask.lower()])
	}

	/// Active event filters for an address or instance.  A response carries
	/// at most 15 filter records, so the query pages in steps of 15 until a
	/// short or empty page arrives.
	pub fn query_dali_tpi_event_filters(&self, target: &FilterTarget) -> Result<Vec<EventFilter>, Error> {
		let (address, instance_number) = target.parts()?;
		let ctrl = self.controller_for(&target.address())?;
		let mut filters = Vec::new();
		let mut start_at = 0u8;
		loop {
			let bytes = match self.basic_bytes(&ctrl, Command::QueryDaliTpiEventFilters, address, &[start_at, 0x00, instance_number], false)? {
				// Byte 0 repeats the active event modes; records follow.
				Some(b) if b.len() >= 5 => b,
				_ => break,
			};
			let before = filters.len();
			for chunk in bytes[1..].chunks_exact(4) {
				filters.push(EventFilter {
					address: chunk[0],
					instance: chunk[1],
					mask: EventMask::from_upper_lower(chunk[2], chunk[3]),
				});
			}
			if filters.len() - before < 15 {
				break;
			}
			start_at = start_at.saturating_add(15);
		}
		Ok(filters)
	}

	// ============================
	// System variables
	// ============================

	/// Set a system variable (0-147) to a signed 16-bit value.
	pub fn set_system_variable(&self, ctrl: &Controller, variable: u8, value: i16) -> Result<bool, Error> {
		if variable >= MAX_SYSVAR {
			return Err(Error::InvalidArgument(format!("variable must be 0-147, got {}", variable)));
		}
		let v = value.to_be_bytes();
		self.basic_ok(ctrl, Command::SetSystemVariable, variable, &[0x00, v[0], v[1]])
	}

	/// Current value of a system variable, or `None` if unset.
	pub fn query_system_variable(&self, ctrl: &Controller, variable: u8) -> Result<Option<i16>, Error> {
		if variable >= MAX_SYSVAR {
			return Err(Error::InvalidArgument(format!("variable must be 0-147, got {}", variable)));
		}
		Ok(self
			.basic_bytes(ctrl, Command::QuerySystemVariable, variable, &[], false)?
			.filter(|b| b.len() == 2)
			.map(|b| BigEndian::read_i16(&b[0..2])))
	}

	pub fn query_system_variable_name(&self, ctrl: &Controller, variable: u8) -> Result<Option<String>, Error> {
		if variable >= MAX_SYSVAR {
			return Err(Error::InvalidArgument(format!("variable must be 0-147, got {}", variable)));
		}
		self.basic_str(ctrl, Command::QuerySystemVariableName, variable, &[], true)
	}
}

/// Target of an event filter operation: a whole address, or one instance.
#[derive(Debug, Clone, Copy)]
pub enum FilterTarget {
	Address(Address),
	Instance(Instance),
}

impl FilterTarget {
	fn address(&self) -> Address {
		match self {
			FilterTarget::Address(a) => *a,
			FilterTarget::Instance(i) => i.address,
		}
	}

	/// (wire address byte, instance number), where 0xFF addresses every
	/// instance.
	fn parts(&self) -> Result<(u8, u8), Error> {
		match self {
			FilterTarget::Address(a) => Ok((a.ecg_or_ecd_or_broadcast_byte()?, 0xFF)),
			FilterTarget::Instance(i) => Ok((i.address.ecd_byte()?, i.number)),
		}
	}
}

/// Decoded control gear status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GearStatus {
	pub cg_failure: bool,
	pub lamp_failure: bool,
	pub lamp_power_on: bool,
	/// An arc level above max or below min was requested.
	pub limit_error: bool,
	pub fade_running: bool,
	pub reset: bool,
	pub missing_short_address: bool,
	pub power_failure: bool,
}

impl GearStatus {
	pub fn from_byte(b: u8) -> GearStatus {
		GearStatus {
			cg_failure: b & 0x01 != 0,
			lamp_failure: b & 0x02 != 0,
			lamp_power_on: b & 0x04 != 0,
			limit_error: b & 0x08 != 0,
			fade_running: b & 0x10 != 0,
			reset: b & 0x20 != 0,
			missing_short_address: b & 0x40 != 0,
			power_failure: b & 0x80 != 0,
		}
	}
}

/// Colour capabilities of control gear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColourFeatures {
	pub supports_xy: bool,
	pub supports_tunable: bool,
	pub primary_count: u8,
	pub rgbwaf_channels: u8,
}

impl ColourFeatures {
	pub fn from_byte(b: u8) -> ColourFeatures {
		ColourFeatures {
			supports_xy: b & 0x01 != 0,
			supports_tunable: b & 0x02 != 0,
			primary_count: (b & 0x1C) >> 2,
			rgbwaf_channels: (b & 0xE0) >> 5,
		}
	}
}

/// Colour temperature limits in Kelvin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColourTempLimits {
	pub physical_warmest: u16,
	pub physical_coolest: u16,
	pub soft_warmest: u16,
	pub soft_coolest: u16,
	pub step: u16,
}

/// Occupancy and level of a group, as reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupStatus {
	pub number: u8,
	pub occupied: bool,
	pub level: u8,
}

/// Timer values of an occupancy sensor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupancyTimers {
	pub deadtime_s: u8,
	pub hold_s: u8,
	pub report_s: u8,
	pub last_detect_s: u16,
}

/// Group targets configured on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceGroups {
	pub primary: Option<u8>,
	pub first: Option<u8>,
	pub second: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilePriority {
	Scheduled,
	Medium,
	High,
	Emergency,
}

impl ProfilePriority {
	fn from_bits(bits: u8) -> ProfilePriority {
		match bits & 0x03 {
			0 => ProfilePriority::Scheduled,
			1 => ProfilePriority::Medium,
			2 => ProfilePriority::High,
			_ => ProfilePriority::Emergency,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileBehaviour {
	pub number: u16,
	pub enabled: bool,
	pub priority: ProfilePriority,
}

/// Schedule state plus the per-profile behaviour table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInformation {
	pub current_active: u16,
	pub last_scheduled: u16,
	/// Seconds since the Unix epoch.
	pub last_overridden_utc: u32,
	pub last_scheduled_utc: u32,
	pub profiles: Vec<ProfileBehaviour>,
}

/// One active event filter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
	pub address: u8,
	pub instance: u8,
	pub mask: EventMask,
}

/// TPI event emitter state and unicast endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnicastConfig {
	pub mode: EventMode,
	pub port: u16,
	pub ip: Ipv4Addr,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::frame::checksum;
	use std::net::{SocketAddr, UdpSocket};
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::thread;

	/// Scripted controller: answers each request via the supplied function,
	/// counting transmissions.
	fn mock_controller<F>(script: F) -> (SocketAddr, Arc<AtomicU32>)
	where
		F: Fn(&[u8]) -> Option<Vec<u8>> + Send + 'static,
	{
		let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
		let addr = sock.local_addr().unwrap();
		let transmits = Arc::new(AtomicU32::new(0));
		let counter = transmits.clone();
		thread::spawn(move || {
			let mut buf = [0u8; 1024];
			while let Ok((n, from)) = sock.recv_from(&mut buf) {
				counter.fetch_add(1, Ordering::SeqCst);
				if let Some(reply) = script(&buf[..n]) {
					sock.send_to(&reply, from).unwrap();
				}
			}
		});
		(addr, transmits)
	}

	fn answer(seq: u8, data: &[u8]) -> Vec<u8> {
		let mut pkt = vec![0xA1, seq, data.len() as u8];
		pkt.extend_from_slice(data);
		pkt.push(checksum(&pkt));
		pkt
	}

	fn ok(seq: u8) -> Vec<u8> {
		let mut pkt = vec![0xA0, seq, 0x00];
		pkt.push(checksum(&pkt));
		pkt
	}

	fn setup<F>(script: F) -> (Protocol, Arc<Controller>, Arc<AtomicU32>)
	where
		F: Fn(&[u8]) -> Option<Vec<u8>> + Send + 'static,
	{
		let (addr, transmits) = mock_controller(script);
		let protocol = Protocol::new().with_request_budget(Duration::from_millis(200), 0);
		let mut cfg = ControllerConfig::new(ControllerId(1), "test", Ipv4Addr::LOCALHOST);
		cfg.port = addr.port();
		let ctrl = protocol.add_controller(cfg).unwrap();
		(protocol, ctrl, transmits)
	}

	#[test]
	fn dali_off_maps_ok_to_true() {
		let (protocol, ctrl, _) = setup(|req| {
			assert_eq!(req[2], 0xA9);
			assert_eq!(req[3], 3);
			Some(ok(req[1]))
		});
		let address = Address::ecg(ctrl.id, 3).unwrap();
		assert!(protocol.dali_off(&address).unwrap());
	}

	#[test]
	fn label_query_decodes_ascii() {
		let (protocol, ctrl, _) = setup(|req| Some(answer(req[1], b"Zone1")));
		assert_eq!(protocol.query_controller_label(&ctrl).unwrap().unwrap(), "Zone1");
	}

	#[test]
	fn cacheable_query_transmits_once() {
		let (protocol, ctrl, transmits) = setup(|req| Some(answer(req[1], b"Zone1")));
		protocol.query_controller_label(&ctrl).unwrap();
		protocol.query_controller_label(&ctrl).unwrap();
		assert_eq!(transmits.load(Ordering::SeqCst), 1);

		// a non-cacheable query always transmits
		protocol.query_controller_fitting_number(&ctrl).unwrap();
		protocol.query_controller_fitting_number(&ctrl).unwrap();
		assert_eq!(transmits.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn primed_cache_entries_respect_the_ttl() {
		let (protocol, ctrl, transmits) = setup(|req| Some(answer(req[1], b"Zone1")));
		let key = CacheKey {
			controller: ctrl.id,
			command: Command::QueryControllerLabel.opcode(),
			payload: [0, 0, 0, 0],
		};

		// an entry that has already outlived the TTL is not admitted
		protocol.prime_cache(vec![(key, ResponseType::Answer, b"Stale".to_vec(), CACHE_TTL)]);
		assert_eq!(protocol.query_controller_label(&ctrl).unwrap().unwrap(), "Zone1");
		assert_eq!(transmits.load(Ordering::SeqCst), 1);

		// a fresh primed entry is served without a transmit
		protocol.prime_cache(vec![(key, ResponseType::Answer, b"Primed".to_vec(), Duration::from_secs(0))]);
		assert_eq!(protocol.query_controller_label(&ctrl).unwrap().unwrap(), "Primed");
		assert_eq!(transmits.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn error_response_becomes_none() {
		let (protocol, ctrl, _) = setup(|req| {
			// 0xA3 with CMD_REFUSED
			let mut pkt = vec![0xA3, req[1], 0x01, 0xB2];
			pkt.push(checksum(&pkt));
			Some(pkt)
		});
		let address = Address::ecg(ctrl.id, 0).unwrap();
		assert_eq!(protocol.dali_query_level(&address).unwrap(), None);
	}

	#[test]
	fn timeout_becomes_an_error() {
		let (protocol, ctrl, _) = setup(|_| None);
		let address = Address::ecg(ctrl.id, 0).unwrap();
		match protocol.dali_query_level(&address) {
			Err(Error::Timeout { attempts, .. }) => assert_eq!(attempts, 1),
			other => panic!("expected timeout, got {:?}", other),
		}
	}

	#[test]
	fn mixed_level_answer_maps_to_none() {
		let (protocol, ctrl, _) = setup(|req| Some(answer(req[1], &[255])));
		let address = Address::group(ctrl.id, 1).unwrap();
		assert_eq!(protocol.dali_query_level(&address).unwrap(), None);
	}

	#[test]
	fn group_membership_expands_bitmap() {
		// high byte carries groups 8-15, low byte groups 0-7
		let (protocol, ctrl, _) = setup(|req| Some(answer(req[1], &[0b0000_0001, 0b1000_0001])));
		let address = Address::ecg(ctrl.id, 4).unwrap();
		let groups: Vec<u8> = protocol
			.query_group_membership_by_address(&address)
			.unwrap()
			.into_iter()
			.map(|a| a.number)
			.collect();
		assert_eq!(groups, vec![0, 7, 8]);
	}

	#[test]
	fn filter_query_paginates_in_steps_of_15() {
		// 20 filters: a full page of 15 then a page of 5.
		let (protocol, ctrl, transmits) = setup(|req| {
			assert_eq!(req[2], 0x32);
			let start_at = req[4];
			let count = if start_at == 0 { 15 } else { 5 };
			let mut data = vec![0x01]; // modes byte
			for i in 0..count {
				data.extend_from_slice(&[start_at + i, 0xFF, 0x0F, 0xFF]);
			}
			Some(answer(req[1], &data))
		});
		let target = FilterTarget::Address(Address::ecg(ctrl.id, 2).unwrap());
		let filters = protocol.query_dali_tpi_event_filters(&target).unwrap();
		assert_eq!(filters.len(), 20);
		assert_eq!(transmits.load(Ordering::SeqCst), 2);
		assert_eq!(filters[15].address, 15);
		assert_eq!(filters[0].mask, EventMask::all());
	}

	#[test]
	fn colour_set_sends_encoded_payload() {
		let (protocol, ctrl, _) = setup(|req| {
			// [magic, seq, cmd, addr, level, tag, kelvin hi, kelvin lo, 0, 0, 0, cs]
			assert_eq!(req[2], 0x0E);
			assert_eq!(&req[3..9], &[66, 200, 0x20, 0x0F, 0xA0, 0x00]);
			Some(ok(req[1]))
		});
		let address = Address::group(ctrl.id, 2).unwrap();
		assert!(protocol.dali_colour(&address, &Colour::tc(4000), 200).unwrap());
	}

	#[test]
	fn validation_fails_before_transmit() {
		let (protocol, ctrl, transmits) = setup(|req| Some(ok(req[1])));
		let address = Address::ecg(ctrl.id, 1).unwrap();
		assert!(protocol.dali_arc_level(&address, 255).is_err());
		assert!(protocol.dali_scene(&address, 12).is_err());
		assert!(protocol.set_system_variable(&ctrl, 148, 0).is_err());
		assert_eq!(transmits.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn system_variable_round_trip_values() {
		let (protocol, ctrl, _) = setup(|req| match req[2] {
			0x36 => {
				// set: address byte is the variable, data is [0, hi, lo]
				assert_eq!(req[3], 7);
				assert_eq!(&req[4..7], &[0x00, 0xFF, 0x38]); // -200
				Some(ok(req[1]))
			}
			0x37 => Some(answer(req[1], &[0xFF, 0x38])),
			_ => None,
		});
		assert!(protocol.set_system_variable(&ctrl, 7, -200).unwrap());
		assert_eq!(protocol.query_system_variable(&ctrl, 7).unwrap(), Some(-200));
	}
}
