use std::net::Ipv4Addr;
use std::{env, thread, time::Duration};

use zencontrol_core::devices::ZenControl;
use zencontrol_core::{ControllerConfig, ControllerId, ListenerConfig};

/// Print every light and group on a controller, then tail events.
///
/// Usage: monitor <host> [port]
fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt::init();

	let mut args = env::args().skip(1);
	let host: Ipv4Addr = args
		.next()
		.ok_or_else(|| anyhow::anyhow!("usage: monitor <host> [port]"))?
		.parse()?;
	let port: u16 = match args.next() {
		Some(port) => port.parse()?,
		None => zencontrol_core::DEFAULT_PORT,
	};

	let zen = ZenControl::new().with_listener(ListenerConfig::default());
	let mut config = ControllerConfig::new(ControllerId(0), "monitor", host);
	config.port = port;
	let ctrl = zen.add_controller(config)?;

	if let Some(version) = zen.protocol().query_controller_version_number(&ctrl)? {
		println!("controller {} firmware {}", ctrl.host, version);
	}
	while !zen.protocol().query_controller_startup_complete(&ctrl)? {
		println!("waiting for controller startup to complete...");
		thread::sleep(Duration::from_secs(5));
	}

	println!("\nlights:");
	for light in zen.lights()? {
		light.refresh_from_controller()?;
		println!("  {:?}", light);
	}

	println!("\ngroups:");
	for group in zen.groups()? {
		println!("  {:?}", group);
	}

	zen.on_light_change(|light, change| {
		println!("light {:?} changed: {:?}", light, change);
	});
	zen.on_group_change(|group, change| {
		println!("group {:?} changed: {:?}", group, change);
	});
	zen.on_button_press(|button| println!("press {:?}", button));
	zen.on_button_long_press(|button| println!("long press {:?}", button));
	zen.on_motion_event(|sensor, occupied| println!("{:?} -> {}", sensor, occupied));
	zen.on_system_variable_change(|sysvar, value, changed, by_me| {
		println!("{:?} = {} (changed: {}, by_me: {})", sysvar, value, changed, by_me);
	});

	zen.start()?;
	println!("\nlistening for events, ctrl-c to quit");
	loop {
		thread::sleep(Duration::from_secs(60));
	}
}
