use std::convert::TryFrom;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, error, warn};

use crate::config::ListenerConfig;
use crate::error::Error;
use crate::frame::EventFrame;
use crate::listener::{local_ipv4, Listener};
use crate::protocol::{Controller, Protocol};
use crate::types::{Address, Colour, EventCode, EventMode, Instance, InstanceKind, MAX_SYSVAR};

/// The scaled value carried by system variable change events:
/// `raw * 10^magnitude`.  Controllers use negative magnitudes for
/// fractional values, which a plain 16-bit query can never report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemVariableValue {
	pub raw: i32,
	pub magnitude: i8,
}

impl SystemVariableValue {
	pub fn value(&self) -> f64 {
		f64::from(self.raw) * 10f64.powi(i32::from(self.magnitude))
	}

	/// The value as an integer, when the magnitude allows it.
	pub fn as_integer(&self) -> Option<i32> {
		if self.magnitude >= 0 {
			let scale = 10i32.checked_pow(self.magnitude as u32)?;
			self.raw.checked_mul(scale)
		} else {
			None
		}
	}
}

type ButtonCallback = Box<dyn Fn(Instance, &[u8]) + Send + Sync>;
type LevelCallback = Box<dyn Fn(Address, u8, &[u8]) + Send + Sync>;
type SceneCallback = Box<dyn Fn(Address, u8, &[u8]) + Send + Sync>;
type ColourCallback = Box<dyn Fn(Address, Option<Colour>, &[u8]) + Send + Sync>;
type SysVarCallback = Box<dyn Fn(Arc<Controller>, u8, SystemVariableValue, &[u8]) + Send + Sync>;
type ProfileCallback = Box<dyn Fn(Arc<Controller>, u16, &[u8]) + Send + Sync>;

/// The callbacks a subscriber cares about; unset ones are skipped.
///
/// Handlers run on the dispatch thread and must be re-entrant with respect
/// to commands: it is fine to send requests from inside one.
#[derive(Default)]
pub struct EventCallbacks {
	pub button_press: Option<ButtonCallback>,
	pub button_hold: Option<ButtonCallback>,
	pub absolute_input: Option<ButtonCallback>,
	pub level_change: Option<LevelCallback>,
	pub group_level_change: Option<LevelCallback>,
	pub scene_change: Option<SceneCallback>,
	pub is_occupied: Option<ButtonCallback>,
	pub system_variable_change: Option<SysVarCallback>,
	pub colour_change: Option<ColourCallback>,
	pub profile_change: Option<ProfileCallback>,
}

/// Decode one event frame and invoke the matching callback.
///
/// Unknown source controllers are dropped with a warning.  The legacy
/// level-change events (0x03/0x04) are dropped even when a level callback
/// is registered; code 0x0B carries the same information reliably.
pub fn dispatch_event(protocol: &Protocol, callbacks: &EventCallbacks, event: &EventFrame) {
	let controller = match protocol.controller_by_ip(event.source.ip()) {
		Some(c) => c,
		None => {
			warn!(source = %event.source, code = event.code, "event from unknown controller");
			return;
		}
	};
	controller.mark_seen();

	let code = match EventCode::try_from(event.code) {
		Ok(code) => code,
		Err(_) => {
			debug!(code = event.code, "ignoring unknown event code");
			return;
		}
	};
	let target = event.target;
	let payload = &event.payload[..];

	match code {
		EventCode::ButtonPress | EventCode::ButtonHold => {
			let cb = match code {
				EventCode::ButtonPress => &callbacks.button_press,
				_ => &callbacks.button_hold,
			};
			if let Some(cb) = cb {
				if let Some(instance) = ecd_instance(&controller, target, payload, InstanceKind::PushButton) {
					cb(instance, payload);
				}
			}
		}
		EventCode::AbsoluteInput => {
			if let Some(cb) = &callbacks.absolute_input {
				if let Some(instance) = ecd_instance(&controller, target, payload, InstanceKind::AbsoluteInput) {
					cb(instance, payload);
				}
			}
		}
		// Superseded by LevelChangeV2; dropped even if a callback is set.
		EventCode::LevelChange | EventCode::GroupLevelChange => {}
		EventCode::SceneChange => {
			if let Some(cb) = &callbacks.scene_change {
				let address = match gear_or_group(&controller, target) {
					Some(a) => a,
					None => {
						error!(target, "invalid scene change target");
						return;
					}
				};
				if let Some(&scene) = payload.first() {
					cb(address, scene, payload);
				}
			}
		}
		EventCode::IsOccupied => {
			if let Some(cb) = &callbacks.is_occupied {
				if let Some(instance) = ecd_instance(&controller, target, payload, InstanceKind::OccupancySensor) {
					cb(instance, payload);
				}
			}
		}
		EventCode::SystemVariableChange => {
			if target >= u16::from(MAX_SYSVAR) {
				error!(target, "system variable change target out of range");
				return;
			}
			if let Some(cb) = &callbacks.system_variable_change {
				if payload.len() < 5 {
					debug!(len = payload.len(), "short system variable payload");
					return;
				}
				let value = SystemVariableValue {
					raw: BigEndian::read_i32(&payload[0..4]),
					magnitude: payload[4] as i8,
				};
				cb(controller.clone(), target as u8, value, payload);
			}
		}
		EventCode::ColourChange => {
			if let Some(cb) = &callbacks.colour_change {
				let address = if target < 64 {
					Address::ecg(controller.id, target as u8).ok()
				} else if (64..=79).contains(&target) {
					Address::group(controller.id, (target - 64) as u8).ok()
				} else if (127..=143).contains(&target) {
					// Observed on live controllers; documentation only
					// lists 64-79 for groups.
					warn!(target, "colour change with undocumented target range, assuming group");
					Address::group(controller.id, (target - 128) as u8).ok()
				} else {
					None
				};
				match address {
					Some(address) => cb(address, Colour::decode(payload), payload),
					None => error!(target, "invalid colour change target"),
				}
			}
		}
		EventCode::ProfileChange => {
			let profile = event
				.payload
				.iter()
				.fold(0u32, |acc, &b| (acc << 8) | u32::from(b)) as u16;
			controller.set_current_profile(profile);
			if let Some(cb) = &callbacks.profile_change {
				cb(controller.clone(), profile, payload);
			}
		}
		EventCode::GroupOccupied => {}
		EventCode::LevelChangeV2 => {
			let level = match payload.get(1) {
				Some(&level) => level,
				None => {
					debug!(len = payload.len(), "short level change payload");
					return;
				}
			};
			if target <= 63 {
				if let Some(cb) = &callbacks.level_change {
					if let Ok(address) = Address::ecg(controller.id, target as u8) {
						cb(address, level, payload);
					}
				}
			} else if (64..=79).contains(&target) {
				if let Some(cb) = &callbacks.group_level_change {
					if let Ok(address) = Address::group(controller.id, (target - 64) as u8) {
						cb(address, level, payload);
					}
				}
			} else {
				error!(target, "invalid level change target");
			}
		}
	}
}

/// ECD-targeted events carry the device address offset by 64 and the
/// instance number in payload byte 0.
fn ecd_instance(controller: &Controller, target: u16, payload: &[u8], kind: InstanceKind) -> Option<Instance> {
	if !(64..=127).contains(&target) {
		error!(target, ?kind, "event target is not a control device");
		return None;
	}
	let number = match payload.first() {
		Some(&n) => n,
		None => return None,
	};
	let address = Address::ecd(controller.id, (target - 64) as u8).ok()?;
	Instance::new(address, kind, number).ok()
}

fn gear_or_group(controller: &Controller, target: u16) -> Option<Address> {
	if target <= 63 {
		Address::ecg(controller.id, target as u8).ok()
	} else if (64..=79).contains(&target) {
		Address::group(controller.id, (target - 64) as u8).ok()
	} else {
		None
	}
}

/// Handle for a running event dispatch loop.  Stopping (or dropping) it
/// closes the listener; callbacks already in flight complete.
pub struct EventMonitor {
	stop: Arc<AtomicBool>,
	thread: Option<JoinHandle<()>>,
}

impl EventMonitor {
	pub fn stop(&mut self) {
		self.stop.store(true, Ordering::Relaxed);
		if let Some(thread) = self.thread.take() {
			let _ = thread.join();
		}
	}
}

impl Drop for EventMonitor {
	fn drop(&mut self) {
		self.stop();
	}
}

impl Protocol {
	/// Configure every registered controller to emit events, start a
	/// listener per `config`, and dispatch events to `callbacks` on a
	/// background thread.
	///
	/// All controllers must emit the same way (multicast, or unicast to the
	/// one listener endpoint); per-controller filtering follows each
	/// controller's configuration flag.
	pub fn start_event_monitoring(
		self: Arc<Self>,
		config: &ListenerConfig,
		callbacks: EventCallbacks,
	) -> Result<EventMonitor, Error> {
		let listener = if config.unicast {
			Listener::unicast(
				config.listen_ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
				config.listen_port.unwrap_or(0),
			)?
		} else {
			Listener::multicast()?
		};

		let unicast_target = if config.unicast {
			let ip = config
				.listen_ip
				.filter(|ip| !ip.is_unspecified())
				.or_else(local_ipv4)
				.ok_or_else(|| Error::Config("cannot determine a local IP to receive unicast events".into()))?;
			Some((ip, listener.local_addr().port()))
		} else {
			None
		};

		for controller in self.controllers() {
			if let Some(target) = unicast_target {
				if !self.set_tpi_event_unicast_address(&controller, Some(target))? {
					warn!(controller = %controller.id, "setting unicast event address failed");
				}
			}
			let mode = EventMode {
				enabled: true,
				filtering: controller.filtering,
				unicast: config.unicast,
				multicast: !config.unicast,
			};
			if !self.tpi_event_emit(&controller, mode)? {
				warn!(controller = %controller.id, "controller refused event emission");
			}
		}

		let stop = listener.stop_signal();
		let protocol = self;
		let thread = thread::spawn(move || {
			for event in listener.events() {
				dispatch_event(&protocol, &callbacks, &event);
			}
		});

		Ok(EventMonitor { stop, thread: Some(thread) })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::ControllerConfig;
	use crate::frame::checksum;
	use crate::types::{AddressKind, ControllerId};
	use std::net::SocketAddr;
	use std::sync::Mutex;

	fn test_protocol() -> (Arc<Protocol>, SocketAddr) {
		// A real socket is needed so add_controller can connect, but these
		// tests never transmit.
		let sock = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
		let addr = sock.local_addr().unwrap();
		std::mem::forget(sock);
		let protocol = Arc::new(Protocol::new());
		let mut cfg = ControllerConfig::new(ControllerId(1), "test", Ipv4Addr::LOCALHOST);
		cfg.port = addr.port();
		protocol.add_controller(cfg).unwrap();
		(protocol, addr)
	}

	fn event(target: u16, code: u8, payload: &[u8], source: SocketAddr) -> EventFrame {
		let mut pkt = vec![0x5A, 0x43, 1, 2, 3, 4, 5, 6];
		pkt.extend_from_slice(&target.to_be_bytes());
		pkt.push(code);
		pkt.push(payload.len() as u8);
		pkt.extend_from_slice(payload);
		pkt.push(checksum(&pkt));
		EventFrame::parse(&pkt, source).unwrap()
	}

	#[test]
	fn level_change_v2_resolves_gear_and_level() {
		let (protocol, _) = test_protocol();
		let seen: Arc<Mutex<Vec<(Address, u8)>>> = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();
		let callbacks = EventCallbacks {
			level_change: Some(Box::new(move |address, level, _| {
				sink.lock().unwrap().push((address, level));
			})),
			..Default::default()
		};

		let source = "127.0.0.1:6969".parse().unwrap();
		dispatch_event(&protocol, &callbacks, &event(10, 0x0B, &[0xFE, 0x80], source));

		let seen = seen.lock().unwrap();
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0].0.kind, AddressKind::Ecg);
		assert_eq!(seen[0].0.number, 10);
		assert_eq!(seen[0].1, 128);
	}

	#[test]
	fn group_targets_map_to_group_addresses() {
		let (protocol, _) = test_protocol();
		let seen: Arc<Mutex<Vec<Address>>> = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();
		let callbacks = EventCallbacks {
			group_level_change: Some(Box::new(move |address, _, _| {
				sink.lock().unwrap().push(address);
			})),
			..Default::default()
		};

		let source = "127.0.0.1:6969".parse().unwrap();
		dispatch_event(&protocol, &callbacks, &event(66, 0x0B, &[0x01, 0x40], source));

		let seen = seen.lock().unwrap();
		assert_eq!(seen[0].kind, AddressKind::Group);
		assert_eq!(seen[0].number, 2);
	}

	#[test]
	fn legacy_level_events_never_fire() {
		let (protocol, _) = test_protocol();
		let fired = Arc::new(Mutex::new(0u32));
		let a = fired.clone();
		let b = fired.clone();
		let callbacks = EventCallbacks {
			level_change: Some(Box::new(move |_, _, _| *a.lock().unwrap() += 1)),
			group_level_change: Some(Box::new(move |_, _, _| *b.lock().unwrap() += 1)),
			..Default::default()
		};

		let source = "127.0.0.1:6969".parse().unwrap();
		dispatch_event(&protocol, &callbacks, &event(10, 0x03, &[0x80], source));
		dispatch_event(&protocol, &callbacks, &event(2, 0x04, &[0x80], source));
		assert_eq!(*fired.lock().unwrap(), 0);
	}

	#[test]
	fn events_from_unknown_sources_are_dropped() {
		let (protocol, _) = test_protocol();
		let fired = Arc::new(Mutex::new(0u32));
		let sink = fired.clone();
		let callbacks = EventCallbacks {
			level_change: Some(Box::new(move |_, _, _| *sink.lock().unwrap() += 1)),
			..Default::default()
		};

		let stranger = "203.0.113.9:6969".parse().unwrap();
		dispatch_event(&protocol, &callbacks, &event(10, 0x0B, &[0xFE, 0x80], stranger));
		assert_eq!(*fired.lock().unwrap(), 0);
	}

	#[test]
	fn colour_change_accepts_documented_and_observed_group_ranges() {
		let (protocol, _) = test_protocol();
		let seen: Arc<Mutex<Vec<(Address, Option<Colour>)>>> = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();
		let callbacks = EventCallbacks {
			colour_change: Some(Box::new(move |address, colour, _| {
				sink.lock().unwrap().push((address, colour));
			})),
			..Default::default()
		};

		let source = "127.0.0.1:6969".parse().unwrap();
		let tc = [0x20, 0x0F, 0xA0];
		dispatch_event(&protocol, &callbacks, &event(5, 0x08, &tc, source));
		dispatch_event(&protocol, &callbacks, &event(70, 0x08, &tc, source));
		dispatch_event(&protocol, &callbacks, &event(130, 0x08, &tc, source));

		let seen = seen.lock().unwrap();
		assert_eq!(seen.len(), 3);
		assert_eq!((seen[0].0.kind, seen[0].0.number), (AddressKind::Ecg, 5));
		assert_eq!((seen[1].0.kind, seen[1].0.number), (AddressKind::Group, 6));
		assert_eq!((seen[2].0.kind, seen[2].0.number), (AddressKind::Group, 2));
		assert_eq!(seen[0].1, Some(Colour::tc(4000)));
	}

	#[test]
	fn system_variable_events_decode_scaled_values() {
		let (protocol, _) = test_protocol();
		let seen: Arc<Mutex<Vec<(u8, SystemVariableValue)>>> = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();
		let callbacks = EventCallbacks {
			system_variable_change: Some(Box::new(move |_, id, value, _| {
				sink.lock().unwrap().push((id, value));
			})),
			..Default::default()
		};

		let source = "127.0.0.1:6969".parse().unwrap();
		// raw 1234, magnitude -2 => 12.34
		dispatch_event(&protocol, &callbacks, &event(42, 0x07, &[0x00, 0x00, 0x04, 0xD2, 0xFE], source));

		let seen = seen.lock().unwrap();
		assert_eq!(seen[0].0, 42);
		assert_eq!(seen[0].1.raw, 1234);
		assert_eq!(seen[0].1.magnitude, -2);
		assert!((seen[0].1.value() - 12.34).abs() < 1e-9);
		assert_eq!(seen[0].1.as_integer(), None);
	}

	#[test]
	fn button_press_builds_push_button_instance() {
		let (protocol, _) = test_protocol();
		let seen: Arc<Mutex<Vec<Instance>>> = Arc::new(Mutex::new(Vec::new()));
		let sink = seen.clone();
		let callbacks = EventCallbacks {
			button_press: Some(Box::new(move |instance, _| {
				sink.lock().unwrap().push(instance);
			})),
			..Default::default()
		};

		let source = "127.0.0.1:6969".parse().unwrap();
		dispatch_event(&protocol, &callbacks, &event(68, 0x00, &[3], source));

		let seen = seen.lock().unwrap();
		assert_eq!(seen[0].address.kind, AddressKind::Ecd);
		assert_eq!(seen[0].address.number, 4);
		assert_eq!(seen[0].kind, InstanceKind::PushButton);
		assert_eq!(seen[0].number, 3);
	}

	#[test]
	fn profile_change_updates_controller_state() {
		let (protocol, _) = test_protocol();
		let callbacks = EventCallbacks::default();
		let source = "127.0.0.1:6969".parse().unwrap();
		dispatch_event(&protocol, &callbacks, &event(0, 0x09, &[0x01, 0x05], source));
		let ctrl = protocol.controller(ControllerId(1)).unwrap();
		assert_eq!(ctrl.current_profile(), Some(0x0105));
	}
}
