//! End-to-end tests against a scripted mock controller on localhost.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use zencontrol_core::devices::{StateChange, ZenControl};
use zencontrol_core::{
	checksum, Address, AddressKind, Colour, ControllerConfig, ControllerId, Error, ListenerConfig,
	Protocol,
};

/// A mock controller: answers requests per `script`, remembering the
/// unicast event endpoint it is asked to emit to.
struct MockController {
	addr: SocketAddr,
	event_target: Arc<Mutex<Option<SocketAddr>>>,
}

fn spawn_mock<F>(script: F) -> MockController
where
	F: Fn(&[u8]) -> Option<Vec<u8>> + Send + 'static,
{
	let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
	let addr = sock.local_addr().unwrap();
	let event_target = Arc::new(Mutex::new(None));
	let recorded = event_target.clone();
	thread::spawn(move || {
		let mut buf = [0u8; 1024];
		while let Ok((n, from)) = sock.recv_from(&mut buf) {
			let req = &buf[..n];
			let reply = match req[2] {
				// set unicast event address: remember where events go
				0x40 => {
					let port = (u16::from(req[4]) << 8) | u16::from(req[5]);
					let ip = Ipv4Addr::new(req[6], req[7], req[8], req[9]);
					*recorded.lock().unwrap() = Some(SocketAddr::from((ip, port)));
					Some(ok_reply(req[1]))
				}
				// enable event emission: echo the mode byte
				0x08 => Some(answer_reply(req[1], &[req[3]])),
				_ => script(req),
			};
			if let Some(reply) = reply {
				sock.send_to(&reply, from).unwrap();
			}
		}
	});
	MockController { addr, event_target }
}

fn ok_reply(seq: u8) -> Vec<u8> {
	let mut pkt = vec![0xA0, seq, 0x00];
	pkt.push(checksum(&pkt));
	pkt
}

fn answer_reply(seq: u8, data: &[u8]) -> Vec<u8> {
	let mut pkt = vec![0xA1, seq, data.len() as u8];
	pkt.extend_from_slice(data);
	pkt.push(checksum(&pkt));
	pkt
}

fn event_packet(target: u16, code: u8, payload: &[u8]) -> Vec<u8> {
	let mut pkt = vec![0x5A, 0x43, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
	pkt.extend_from_slice(&target.to_be_bytes());
	pkt.push(code);
	pkt.push(payload.len() as u8);
	pkt.extend_from_slice(payload);
	pkt.push(checksum(&pkt));
	pkt
}

fn protocol_for(mock: &MockController) -> (Protocol, Arc<zencontrol_core::Controller>) {
	let protocol = Protocol::new().with_request_budget(Duration::from_millis(300), 0);
	let mut cfg = ControllerConfig::new(ControllerId(1), "mock", Ipv4Addr::LOCALHOST);
	cfg.port = mock.addr.port();
	let ctrl = protocol.add_controller(cfg).unwrap();
	(protocol, ctrl)
}

fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
	let deadline = Instant::now() + Duration::from_secs(5);
	while !cond() {
		if Instant::now() > deadline {
			panic!("timed out waiting for {}", what);
		}
		thread::sleep(Duration::from_millis(20));
	}
}

#[test]
fn dali_off_round_trip_has_exact_wire_bytes() {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = seen.clone();
	let mock = spawn_mock(move |req| {
		sink.lock().unwrap().push(req.to_vec());
		Some(ok_reply(req[1]))
	});
	let (protocol, ctrl) = protocol_for(&mock);

	let address = Address::ecg(ctrl.id, 3).unwrap();
	assert!(protocol.dali_off(&address).unwrap());

	let seen = seen.lock().unwrap();
	// [magic, seq, DALI_OFF, ecg 3, padding, checksum]
	assert_eq!(seen[0], vec![0x04, 0x00, 0xA9, 0x03, 0x00, 0x00, 0x00, 0xAE]);
}

#[test]
fn label_query_decodes_the_ascii_answer() {
	let mock = spawn_mock(|req| match req[2] {
		0x24 => Some(answer_reply(req[1], b"Zone1")),
		_ => None,
	});
	let (protocol, ctrl) = protocol_for(&mock);
	assert_eq!(protocol.query_controller_label(&ctrl).unwrap().unwrap(), "Zone1");
}

#[test]
fn sequence_mismatch_times_out() {
	let mock = spawn_mock(|req| Some(ok_reply(req[1].wrapping_add(0x11))));
	let (protocol, ctrl) = protocol_for(&mock);
	let address = Address::ecg(ctrl.id, 0).unwrap();
	match protocol.dali_off(&address) {
		Err(Error::Timeout { .. }) => {}
		other => panic!("expected timeout, got {:?}", other),
	}
}

#[test]
fn colour_set_encodes_group_and_temperature() {
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = seen.clone();
	let mock = spawn_mock(move |req| {
		sink.lock().unwrap().push(req.to_vec());
		Some(ok_reply(req[1]))
	});
	let (protocol, ctrl) = protocol_for(&mock);

	let group = Address::group(ctrl.id, 2).unwrap();
	assert!(protocol.dali_colour(&group, &Colour::tc(4000), 200).unwrap());

	let seen = seen.lock().unwrap();
	// payload: group 2 on the wire is 66, then [level, tag, kelvin]
	assert_eq!(&seen[0][3..8], &[66, 0xC8, 0x20, 0x0F, 0xA0]);
	assert_eq!(seen[0].len(), 12);
}

#[test]
fn events_fan_out_to_device_objects_and_callbacks() {
	let mock = spawn_mock(|_| None);

	let zen = ZenControl::new().with_listener(ListenerConfig {
		unicast: true,
		listen_ip: Some(Ipv4Addr::LOCALHOST),
		listen_port: None,
	});
	{
		let mut cfg = ControllerConfig::new(ControllerId(1), "mock", Ipv4Addr::LOCALHOST);
		cfg.port = mock.addr.port();
		zen.add_controller(cfg).unwrap();
	}

	let light_changes: Arc<Mutex<Vec<(Address, StateChange)>>> = Arc::new(Mutex::new(Vec::new()));
	let sink = light_changes.clone();
	zen.on_light_change(move |light, change| {
		sink.lock().unwrap().push((light.address, change));
	});

	let presses = Arc::new(Mutex::new(0u32));
	let long_presses = Arc::new(Mutex::new(0u32));
	let press_sink = presses.clone();
	let long_sink = long_presses.clone();
	zen.on_button_press(move |_| *press_sink.lock().unwrap() += 1);
	zen.on_button_long_press(move |_| *long_sink.lock().unwrap() += 1);

	let motions: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
	let motion_sink = motions.clone();
	let sensors = Arc::new(Mutex::new(Vec::new()));
	let sensor_sink = sensors.clone();
	zen.on_motion_event(move |sensor, occupied| {
		sensor_sink.lock().unwrap().push(sensor.clone());
		motion_sink.lock().unwrap().push(occupied);
	});

	zen.start().unwrap();

	// The controller was told where to send unicast events during start().
	let target = mock.event_target.lock().unwrap().expect("unicast endpoint configured");
	let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

	// Arc level change for ECG 10, level 128.
	sender.send_to(&event_packet(10, 0x0B, &[0xFE, 0x80]), target).unwrap();
	wait_until("light change", || !light_changes.lock().unwrap().is_empty());
	{
		let changes = light_changes.lock().unwrap();
		assert_eq!(changes[0].0.kind, AddressKind::Ecg);
		assert_eq!(changes[0].0.number, 10);
		assert_eq!(changes[0].1.level, Some(128));
	}
	let light = zen.light(Address::ecg(ControllerId(1), 10).unwrap());
	assert_eq!(light.level(), Some(128));

	// Press, then two holds: one short press, exactly one long press.
	sender.send_to(&event_packet(68, 0x00, &[3]), target).unwrap();
	sender.send_to(&event_packet(68, 0x01, &[3]), target).unwrap();
	sender.send_to(&event_packet(68, 0x01, &[3]), target).unwrap();
	sender.send_to(&event_packet(68, 0x01, &[3]), target).unwrap();
	wait_until("long press", || *long_presses.lock().unwrap() == 1);
	assert_eq!(*presses.lock().unwrap(), 1);

	// Occupancy: event drives it true, hold-time expiry drives it false.
	sender.send_to(&event_packet(68, 0x06, &[1]), target).unwrap();
	wait_until("occupied", || motions.lock().unwrap().first() == Some(&true));
	let sensor = sensors.lock().unwrap()[0].clone();
	assert!(sensor.occupied());
	sensor.set_hold_time(Duration::from_millis(50));
	sender.send_to(&event_packet(68, 0x06, &[1]), target).unwrap();
	wait_until("vacancy", || motions.lock().unwrap().last() == Some(&false));
	assert!(!sensor.occupied());

	zen.stop();
}

#[test]
fn group_scene_cascades_to_member_lights() {
	let mock = spawn_mock(|req| match req[2] {
		// one group, number 2
		0x09 => Some(answer_reply(req[1], &[2])),
		// group label
		0x01 => Some(answer_reply(req[1], b"Lounge")),
		// scenes for group: bitmap with scenes 0 and 1
		0x1A => Some(answer_reply(req[1], &[0x00, 0x03])),
		// scene labels
		0x1B => Some(answer_reply(req[1], if req[4] == 0 { &b"Relax"[..] } else { &b"Work"[..] })),
		// control gear present: ECG 5
		0x1D => Some(answer_reply(req[1], &[0x20, 0, 0, 0, 0, 0, 0, 0])),
		// ECG 5 is a member of group 2
		0x15 => Some(answer_reply(req[1], &[0x00, 0x04])),
		// device label / serial / colour features for hydration
		0x03 => Some(answer_reply(req[1], b"Spot")),
		0xB9 => Some(answer_reply(req[1], &[0, 0, 0, 0, 0, 0, 0, 9])),
		0x35 => Some(answer_reply(req[1], &[0x00])),
		// scene recall ack
		0xA1 => Some(ok_reply(req[1])),
		_ => None,
	});

	let zen = ZenControl::new().with_listener(ListenerConfig {
		unicast: true,
		listen_ip: Some(Ipv4Addr::LOCALHOST),
		listen_port: None,
	});
	{
		let mut cfg = ControllerConfig::new(ControllerId(1), "mock", Ipv4Addr::LOCALHOST);
		cfg.port = mock.addr.port();
		zen.add_controller(cfg).unwrap();
	}

	let groups = zen.groups().unwrap();
	assert_eq!(groups.len(), 1);
	let group = groups[0].clone();
	assert_eq!(group.label().unwrap(), "Lounge");
	assert_eq!(group.scene_label_names(), vec!["Relax".to_string(), "Work".to_string()]);
	assert_eq!(group.lights().len(), 1);

	// recall by label resolves through the scene table
	assert!(group.set_scene_by_label("Work").unwrap());
	assert_eq!(group.scene(), Some(1));
	assert!(group.set_scene_by_label("Dinner").is_err());

	zen.start().unwrap();
	let target = mock.event_target.lock().unwrap().expect("unicast endpoint configured");
	let sender = UdpSocket::bind("127.0.0.1:0").unwrap();

	// scene change event for group 2 (wire target 66): members follow
	sender.send_to(&event_packet(66, 0x05, &[0]), target).unwrap();
	let member = group.lights()[0].clone();
	wait_until("member scene", || member.scene() == Some(0));
	assert_eq!(group.scene(), Some(0));
	assert!(!group.is_discoordinated());

	// a member changing on its own discoordinates the group
	sender.send_to(&event_packet(5, 0x0B, &[0xFE, 0x10]), target).unwrap();
	wait_until("discoordination", || group.is_discoordinated());
	assert_eq!(group.scene(), None);

	zen.stop();
}
