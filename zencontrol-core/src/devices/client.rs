use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::debug;

use crate::config::{ControllerConfig, ListenerConfig};
use crate::devices::button::Button;
use crate::devices::group::Group;
use crate::devices::light::Light;
use crate::devices::profile::Profile;
use crate::devices::sensor::MotionSensor;
use crate::devices::sysvar::SystemVariable;
use crate::events::{EventCallbacks, EventMonitor};
use crate::protocol::{Controller, Protocol};
use crate::types::{Address, Colour, ControllerId, Instance, InstanceKind, MAX_SYSVAR};

/// How often the occupancy sweeper checks sensor hold-time expiry.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// What changed on a light or group, as delivered to change callbacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateChange {
	pub level: Option<u8>,
	pub colour: Option<Colour>,
	pub scene: Option<u8>,
	/// The group's members diverged; its scene is unknown until the next
	/// coordinated command.
	pub discoordinated: bool,
}

impl StateChange {
	fn level(level: u8) -> StateChange {
		StateChange { level: Some(level), ..StateChange::default() }
	}

	fn colour(colour: Colour) -> StateChange {
		StateChange { colour: Some(colour), ..StateChange::default() }
	}

	fn scene(scene: u8) -> StateChange {
		StateChange { scene: Some(scene), ..StateChange::default() }
	}

	fn discoordinated() -> StateChange {
		StateChange { discoordinated: true, ..StateChange::default() }
	}
}

type VoidCb = Arc<dyn Fn() + Send + Sync>;
type ProfileCb = Arc<dyn Fn(Profile) + Send + Sync>;
type LightCb = Arc<dyn Fn(Arc<Light>, StateChange) + Send + Sync>;
type GroupCb = Arc<dyn Fn(Arc<Group>, StateChange) + Send + Sync>;
type ButtonCb = Arc<dyn Fn(Arc<Button>) + Send + Sync>;
type MotionCb = Arc<dyn Fn(Arc<MotionSensor>, bool) + Send + Sync>;
type SysVarCb = Arc<dyn Fn(Arc<SystemVariable>, f64, bool, bool) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
	on_connect: Mutex<Option<VoidCb>>,
	on_disconnect: Mutex<Option<VoidCb>>,
	profile_change: Mutex<Option<ProfileCb>>,
	light_change: Mutex<Option<LightCb>>,
	group_change: Mutex<Option<GroupCb>>,
	button_press: Mutex<Option<ButtonCb>>,
	button_long_press: Mutex<Option<ButtonCb>>,
	motion_event: Mutex<Option<MotionCb>>,
	system_variable_change: Mutex<Option<SysVarCb>>,
}

impl Callbacks {
	fn fire_light(&self, light: &Arc<Light>, change: StateChange) {
		let cb = self.light_change.lock().unwrap().clone();
		if let Some(cb) = cb {
			cb(light.clone(), change);
		}
	}

	fn fire_group(&self, group: &Arc<Group>, change: StateChange) {
		let cb = self.group_change.lock().unwrap().clone();
		if let Some(cb) = cb {
			cb(group.clone(), change);
		}
	}

	fn fire_motion(&self, sensor: &Arc<MotionSensor>, occupied: bool) {
		let cb = self.motion_event.lock().unwrap().clone();
		if let Some(cb) = cb {
			cb(sensor.clone(), occupied);
		}
	}
}

/// Interned device objects, keyed by wire identity, so events and user
/// handles share one instance per device.
#[derive(Default)]
struct Registry {
	lights: Mutex<HashMap<(ControllerId, u8), Arc<Light>>>,
	groups: Mutex<HashMap<(ControllerId, u8), Arc<Group>>>,
	buttons: Mutex<HashMap<(ControllerId, u8, u8), Arc<Button>>>,
	sensors: Mutex<HashMap<(ControllerId, u8, u8), Arc<MotionSensor>>>,
	sysvars: Mutex<HashMap<(ControllerId, u8), Arc<SystemVariable>>>,
}

impl Registry {
	fn light(&self, protocol: &Arc<Protocol>, address: Address) -> Arc<Light> {
		self.lights
			.lock()
			.unwrap()
			.entry((address.controller, address.number))
			.or_insert_with(|| Arc::new(Light::new(protocol.clone(), address)))
			.clone()
	}

	fn group(&self, protocol: &Arc<Protocol>, address: Address) -> Arc<Group> {
		self.groups
			.lock()
			.unwrap()
			.entry((address.controller, address.number))
			.or_insert_with(|| Arc::new(Group::new(protocol.clone(), address)))
			.clone()
	}

	fn button(&self, protocol: &Arc<Protocol>, instance: Instance) -> Arc<Button> {
		self.buttons
			.lock()
			.unwrap()
			.entry((instance.address.controller, instance.address.number, instance.number))
			.or_insert_with(|| Arc::new(Button::new(protocol.clone(), instance)))
			.clone()
	}

	fn sensor(&self, protocol: &Arc<Protocol>, instance: Instance) -> Arc<MotionSensor> {
		self.sensors
			.lock()
			.unwrap()
			.entry((instance.address.controller, instance.address.number, instance.number))
			.or_insert_with(|| Arc::new(MotionSensor::new(protocol.clone(), instance)))
			.clone()
	}

	fn sysvar(&self, protocol: &Arc<Protocol>, controller: ControllerId, id: u8) -> Arc<SystemVariable> {
		self.sysvars
			.lock()
			.unwrap()
			.entry((controller, id))
			.or_insert_with(|| Arc::new(SystemVariable::new(protocol.clone(), controller, id)))
			.clone()
	}

	fn groups_containing(&self, address: &Address) -> Vec<Arc<Group>> {
		self.groups
			.lock()
			.unwrap()
			.values()
			.filter(|g| g.contains(address))
			.cloned()
			.collect()
	}

	fn all_sensors(&self) -> Vec<Arc<MotionSensor>> {
		self.sensors.lock().unwrap().values().cloned().collect()
	}
}

/// The high-level client: registers controllers, runs the event loop, and
/// hands out interned device objects.
pub struct ZenControl {
	protocol: Arc<Protocol>,
	listener_config: ListenerConfig,
	registry: Arc<Registry>,
	callbacks: Arc<Callbacks>,
	monitor: Mutex<Option<EventMonitor>>,
	sweeper_stop: Arc<AtomicBool>,
	sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Default for ZenControl {
	fn default() -> ZenControl {
		ZenControl::new()
	}
}

impl ZenControl {
	/// A client receiving events over the default multicast group.
	pub fn new() -> ZenControl {
		ZenControl {
			protocol: Arc::new(Protocol::new()),
			listener_config: ListenerConfig::default(),
			registry: Arc::new(Registry::default()),
			callbacks: Arc::new(Callbacks::default()),
			monitor: Mutex::new(None),
			sweeper_stop: Arc::new(AtomicBool::new(false)),
			sweeper: Mutex::new(None),
		}
	}

	pub fn with_listener(mut self, config: ListenerConfig) -> ZenControl {
		self.listener_config = config;
		self
	}

	/// Direct access to the protocol layer, for commands the device objects
	/// don't wrap.
	pub fn protocol(&self) -> &Arc<Protocol> {
		&self.protocol
	}

	pub fn add_controller(&self, config: ControllerConfig) -> Result<Arc<Controller>> {
		Ok(self.protocol.add_controller(config)?)
	}

	pub fn controllers(&self) -> Vec<Arc<Controller>> {
		self.protocol.controllers()
	}

	// ============================
	// Callback surface
	// ============================

	pub fn on_connect(&self, f: impl Fn() + Send + Sync + 'static) {
		*self.callbacks.on_connect.lock().unwrap() = Some(Arc::new(f));
	}

	pub fn on_disconnect(&self, f: impl Fn() + Send + Sync + 'static) {
		*self.callbacks.on_disconnect.lock().unwrap() = Some(Arc::new(f));
	}

	pub fn on_profile_change(&self, f: impl Fn(Profile) + Send + Sync + 'static) {
		*self.callbacks.profile_change.lock().unwrap() = Some(Arc::new(f));
	}

	pub fn on_light_change(&self, f: impl Fn(Arc<Light>, StateChange) + Send + Sync + 'static) {
		*self.callbacks.light_change.lock().unwrap() = Some(Arc::new(f));
	}

	pub fn on_group_change(&self, f: impl Fn(Arc<Group>, StateChange) + Send + Sync + 'static) {
		*self.callbacks.group_change.lock().unwrap() = Some(Arc::new(f));
	}

	pub fn on_button_press(&self, f: impl Fn(Arc<Button>) + Send + Sync + 'static) {
		*self.callbacks.button_press.lock().unwrap() = Some(Arc::new(f));
	}

	pub fn on_button_long_press(&self, f: impl Fn(Arc<Button>) + Send + Sync + 'static) {
		*self.callbacks.button_long_press.lock().unwrap() = Some(Arc::new(f));
	}

	pub fn on_motion_event(&self, f: impl Fn(Arc<MotionSensor>, bool) + Send + Sync + 'static) {
		*self.callbacks.motion_event.lock().unwrap() = Some(Arc::new(f));
	}

	/// `(variable, value, changed, by_me)`; `by_me` is true when the event
	/// echoes a value this process recently wrote.
	pub fn on_system_variable_change(&self, f: impl Fn(Arc<SystemVariable>, f64, bool, bool) + Send + Sync + 'static) {
		*self.callbacks.system_variable_change.lock().unwrap() = Some(Arc::new(f));
	}

	// ============================
	// Start / stop
	// ============================

	/// Configure controllers for event emission, start the listener and
	/// dispatch thread, and start the occupancy sweeper.
	pub fn start(&self) -> Result<()> {
		let monitor = self
			.protocol
			.clone()
			.start_event_monitoring(&self.listener_config, self.event_callbacks())?;
		*self.monitor.lock().unwrap() = Some(monitor);

		self.sweeper_stop.store(false, Ordering::Relaxed);
		let stop = self.sweeper_stop.clone();
		let registry = self.registry.clone();
		let callbacks = self.callbacks.clone();
		*self.sweeper.lock().unwrap() = Some(thread::spawn(move || {
			while !stop.load(Ordering::Relaxed) {
				thread::sleep(SWEEP_INTERVAL);
				let now = Instant::now();
				for sensor in registry.all_sensors() {
					if sensor.expire(now) {
						callbacks.fire_motion(&sensor, false);
					}
				}
			}
		}));

		let cb = self.callbacks.on_connect.lock().unwrap().clone();
		if let Some(cb) = cb {
			cb();
		}
		Ok(())
	}

	pub fn stop(&self) {
		let monitor = self.monitor.lock().unwrap().take();
		let was_running = monitor.is_some();
		if let Some(mut monitor) = monitor {
			monitor.stop();
		}
		self.sweeper_stop.store(true, Ordering::Relaxed);
		if let Some(sweeper) = self.sweeper.lock().unwrap().take() {
			let _ = sweeper.join();
		}
		if was_running {
			let cb = self.callbacks.on_disconnect.lock().unwrap().clone();
			if let Some(cb) = cb {
				cb();
			}
		}
	}

	/// Wire protocol-level events into the interned device objects and the
	/// user callback surface.
	fn event_callbacks(&self) -> EventCallbacks {
		let mut callbacks = EventCallbacks::default();

		{
			let (protocol, registry, cbs) = self.fanout_context();
			callbacks.level_change = Some(Box::new(move |address, level, _| {
				let light = registry.light(&protocol, address);
				light.apply_level(level);
				for group in registry.groups_containing(&address) {
					if group.mark_discoordinated() {
						cbs.fire_group(&group, StateChange::discoordinated());
					}
				}
				cbs.fire_light(&light, StateChange::level(level));
			}));
		}
		{
			let (protocol, registry, cbs) = self.fanout_context();
			callbacks.group_level_change = Some(Box::new(move |address, level, _| {
				let group = registry.group(&protocol, address);
				group.apply_level(level);
				cbs.fire_group(&group, StateChange::level(level));
			}));
		}
		{
			let (protocol, registry, cbs) = self.fanout_context();
			callbacks.scene_change = Some(Box::new(move |address, scene, _| {
				match address.kind {
					crate::types::AddressKind::Group => {
						let group = registry.group(&protocol, address);
						group.apply_scene(scene);
						for light in group.lights() {
							light.apply_scene(scene);
							cbs.fire_light(&light, StateChange::scene(scene));
						}
						cbs.fire_group(&group, StateChange::scene(scene));
					}
					_ => {
						let light = registry.light(&protocol, address);
						light.apply_scene(scene);
						for group in registry.groups_containing(&address) {
							if group.mark_discoordinated() {
								cbs.fire_group(&group, StateChange::discoordinated());
							}
						}
						cbs.fire_light(&light, StateChange::scene(scene));
					}
				}
			}));
		}
		{
			let (protocol, registry, cbs) = self.fanout_context();
			callbacks.colour_change = Some(Box::new(move |address, colour, _| {
				let colour = match colour {
					Some(colour) => colour,
					None => {
						debug!(%address, "colour change with undecodable colour");
						return;
					}
				};
				match address.kind {
					crate::types::AddressKind::Group => {
						let group = registry.group(&protocol, address);
						group.apply_colour(colour);
						for light in group.lights() {
							light.apply_colour(colour);
							cbs.fire_light(&light, StateChange::colour(colour));
						}
						cbs.fire_group(&group, StateChange::colour(colour));
					}
					_ => {
						let light = registry.light(&protocol, address);
						light.apply_colour(colour);
						cbs.fire_light(&light, StateChange::colour(colour));
					}
				}
			}));
		}
		{
			let (protocol, registry, cbs) = self.fanout_context();
			callbacks.button_press = Some(Box::new(move |instance, _| {
				let button = registry.button(&protocol, instance);
				button.register_press();
				let cb = cbs.button_press.lock().unwrap().clone();
				if let Some(cb) = cb {
					cb(button);
				}
			}));
		}
		{
			let (protocol, registry, cbs) = self.fanout_context();
			callbacks.button_hold = Some(Box::new(move |instance, _| {
				let button = registry.button(&protocol, instance);
				if button.register_hold() {
					let cb = cbs.button_long_press.lock().unwrap().clone();
					if let Some(cb) = cb {
						cb(button);
					}
				}
			}));
		}
		{
			let (protocol, registry, cbs) = self.fanout_context();
			callbacks.is_occupied = Some(Box::new(move |instance, _| {
				let sensor = registry.sensor(&protocol, instance);
				sensor.register_occupied();
				cbs.fire_motion(&sensor, true);
			}));
		}
		{
			let (protocol, registry, cbs) = self.fanout_context();
			callbacks.system_variable_change = Some(Box::new(move |controller, id, value, _| {
				let sysvar = registry.sysvar(&protocol, controller.id, id);
				let (changed, by_me) = sysvar.register_event(value);
				let cb = cbs.system_variable_change.lock().unwrap().clone();
				if let Some(cb) = cb {
					cb(sysvar, value.value(), changed, by_me);
				}
			}));
		}
		{
			let cbs = self.callbacks.clone();
			callbacks.profile_change = Some(Box::new(move |controller, number, _| {
				let cb = cbs.profile_change.lock().unwrap().clone();
				if let Some(cb) = cb {
					cb(Profile { controller: controller.id, number, label: None });
				}
			}));
		}

		callbacks
	}

	fn fanout_context(&self) -> (Arc<Protocol>, Arc<Registry>, Arc<Callbacks>) {
		(self.protocol.clone(), self.registry.clone(), self.callbacks.clone())
	}

	// ============================
	// Enumeration
	// ============================

	/// All control gear across all controllers, hydrated with labels and
	/// capabilities.
	pub fn lights(&self) -> Result<Vec<Arc<Light>>> {
		let mut lights = Vec::new();
		for ctrl in self.protocol.controllers() {
			for address in self.protocol.query_control_gear_dali_addresses(&ctrl)? {
				let light = self.registry.light(&self.protocol, address);
				light.hydrate()?;
				lights.push(light);
			}
		}
		Ok(lights)
	}

	/// All groups, hydrated with labels, scene tables and member lights.
	pub fn groups(&self) -> Result<Vec<Arc<Group>>> {
		let mut groups = Vec::new();
		for ctrl in self.protocol.controllers() {
			let group_addresses = self.protocol.query_group_numbers(&ctrl)?;
			for address in &group_addresses {
				let group = self.registry.group(&self.protocol, *address);
				group.hydrate()?;
				groups.push(group);
			}
			// membership comes from the lights' side of the relation
			for light_address in self.protocol.query_control_gear_dali_addresses(&ctrl)? {
				let light = self.registry.light(&self.protocol, light_address);
				light.hydrate()?;
				for member_of in self.protocol.query_group_membership_by_address(&light_address)? {
					let group = self.registry.group(&self.protocol, member_of);
					group.attach_light(light.clone());
				}
			}
		}
		Ok(groups)
	}

	/// All push buttons found behind addresses with instances.
	pub fn buttons(&self) -> Result<Vec<Arc<Button>>> {
		let mut buttons = Vec::new();
		for ctrl in self.protocol.controllers() {
			for address in self.protocol.query_dali_addresses_with_instances(&ctrl)? {
				for instance in self.protocol.query_instances_by_address(&address)? {
					if instance.kind == InstanceKind::PushButton {
						let button = self.registry.button(&self.protocol, instance);
						button.hydrate()?;
						buttons.push(button);
					}
				}
			}
		}
		Ok(buttons)
	}

	/// All occupancy sensors found behind addresses with instances.
	pub fn motion_sensors(&self) -> Result<Vec<Arc<MotionSensor>>> {
		let mut sensors = Vec::new();
		for ctrl in self.protocol.controllers() {
			for address in self.protocol.query_dali_addresses_with_instances(&ctrl)? {
				for instance in self.protocol.query_instances_by_address(&address)? {
					if instance.kind == InstanceKind::OccupancySensor {
						let sensor = self.registry.sensor(&self.protocol, instance);
						sensor.hydrate()?;
						sensors.push(sensor);
					}
				}
			}
		}
		Ok(sensors)
	}

	/// All profiles, labelled where the controller has labels for them.
	pub fn profiles(&self) -> Result<Vec<Profile>> {
		let mut profiles = Vec::new();
		for ctrl in self.protocol.controllers() {
			let numbers = match self.protocol.query_profile_information(&ctrl)? {
				Some(info) => info.profiles.iter().map(|p| p.number).collect(),
				None => self.protocol.query_profile_numbers(&ctrl)?.unwrap_or_default(),
			};
			for number in numbers {
				let label = self.protocol.query_profile_label(&ctrl, number)?;
				profiles.push(Profile { controller: ctrl.id, number, label });
			}
		}
		Ok(profiles)
	}

	/// Labelled system variables, found by scanning ids until
	/// `give_up_after` consecutive ids have no name.
	pub fn system_variables(&self, give_up_after: u32) -> Result<Vec<Arc<SystemVariable>>> {
		let mut sysvars = Vec::new();
		for ctrl in self.protocol.controllers() {
			let mut unlabelled = 0u32;
			for id in 0..MAX_SYSVAR {
				match self.protocol.query_system_variable_name(&ctrl, id)? {
					Some(label) => {
						unlabelled = 0;
						let sysvar = self.registry.sysvar(&self.protocol, ctrl.id, id);
						sysvar.set_label(Some(label));
						sysvars.push(sysvar);
					}
					None => {
						unlabelled += 1;
						if unlabelled >= give_up_after {
							break;
						}
					}
				}
			}
		}
		Ok(sysvars)
	}

	// Interned handles for a known identity, without hydration.

	pub fn light(&self, address: Address) -> Arc<Light> {
		self.registry.light(&self.protocol, address)
	}

	pub fn group(&self, address: Address) -> Arc<Group> {
		self.registry.group(&self.protocol, address)
	}

	pub fn button(&self, instance: Instance) -> Arc<Button> {
		self.registry.button(&self.protocol, instance)
	}

	pub fn motion_sensor(&self, instance: Instance) -> Arc<MotionSensor> {
		self.registry.sensor(&self.protocol, instance)
	}

	pub fn system_variable(&self, controller: ControllerId, id: u8) -> Arc<SystemVariable> {
		self.registry.sysvar(&self.protocol, controller, id)
	}
}

impl Drop for ZenControl {
	fn drop(&mut self) {
		self.stop();
	}
}
