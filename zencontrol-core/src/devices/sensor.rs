use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::devices::client_data::ClientData;
use crate::protocol::Protocol;
use crate::types::Instance;

const DEFAULT_HOLD_TIME: Duration = Duration::from_secs(60);

struct SensorState {
	label: Option<String>,
	instance_label: Option<String>,
	hold_time: Duration,
	occupied: bool,
	last_motion: Option<Instant>,
	hydrated: bool,
}

impl Default for SensorState {
	fn default() -> SensorState {
		SensorState {
			label: None,
			instance_label: None,
			hold_time: DEFAULT_HOLD_TIME,
			occupied: false,
			last_motion: None,
			hydrated: false,
		}
	}
}

/// An occupancy sensor instance.
///
/// The wire only reports "occupied"; vacancy is inferred locally when no
/// occupied event arrives for the hold time.  The hold time is seeded from
/// the sensor's own timer configuration where it answers the query.
pub struct MotionSensor {
	protocol: Arc<Protocol>,
	pub instance: Instance,
	state: Mutex<SensorState>,
	pub client_data: ClientData,
}

impl MotionSensor {
	pub(crate) fn new(protocol: Arc<Protocol>, instance: Instance) -> MotionSensor {
		MotionSensor { protocol, instance, state: Mutex::new(SensorState::default()), client_data: ClientData::default() }
	}

	pub fn label(&self) -> Option<String> {
		self.state.lock().unwrap().label.clone()
	}

	pub fn instance_label(&self) -> Option<String> {
		self.state.lock().unwrap().instance_label.clone()
	}

	pub fn occupied(&self) -> bool {
		self.state.lock().unwrap().occupied
	}

	pub fn hold_time(&self) -> Duration {
		self.state.lock().unwrap().hold_time
	}

	pub fn set_hold_time(&self, hold_time: Duration) {
		self.state.lock().unwrap().hold_time = hold_time;
	}

	pub fn last_motion(&self) -> Option<Instant> {
		self.state.lock().unwrap().last_motion
	}

	pub(crate) fn hydrate(&self) -> Result<()> {
		if self.state.lock().unwrap().hydrated {
			return Ok(());
		}
		let label = self.protocol.query_dali_device_label(&self.instance.address)?;
		let instance_label = self.protocol.query_dali_instance_label(&self.instance)?;
		let timers = self.protocol.query_occupancy_instance_timers(&self.instance)?;
		let mut state = self.state.lock().unwrap();
		state.label = label;
		state.instance_label = instance_label;
		if let Some(timers) = timers {
			if timers.hold_s > 0 {
				state.hold_time = Duration::from_secs(u64::from(timers.hold_s));
			}
		}
		state.hydrated = true;
		Ok(())
	}

	/// An occupied event arrived.  Returns true when this flips the sensor
	/// from vacant to occupied.
	pub(crate) fn register_occupied(&self) -> bool {
		let mut state = self.state.lock().unwrap();
		state.last_motion = Some(Instant::now());
		let changed = !state.occupied;
		state.occupied = true;
		changed
	}

	/// Hold-time expiry check, driven by the client's sweeper.  Returns
	/// true when the sensor just became vacant.
	pub(crate) fn expire(&self, now: Instant) -> bool {
		let mut state = self.state.lock().unwrap();
		if !state.occupied {
			return false;
		}
		match state.last_motion {
			Some(last) if now.duration_since(last) >= state.hold_time => {
				state.occupied = false;
				true
			}
			_ => false,
		}
	}
}

impl std::fmt::Debug for MotionSensor {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let state = self.state.lock().unwrap();
		write!(f, "sensor {} #{}", self.instance.address, self.instance.number)?;
		if let Some(label) = &state.instance_label {
			write!(f, " ({})", label)?;
		}
		write!(f, " {}", if state.occupied { "occupied" } else { "clear" })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{Address, ControllerId, InstanceKind};

	fn sensor() -> MotionSensor {
		let address = Address::ecd(ControllerId(1), 2).unwrap();
		let instance = Instance::new(address, InstanceKind::OccupancySensor, 1).unwrap();
		MotionSensor::new(Arc::new(Protocol::new()), instance)
	}

	#[test]
	fn occupancy_decays_after_hold_time() {
		let s = sensor();
		s.set_hold_time(Duration::from_millis(50));
		assert!(s.register_occupied());
		assert!(s.occupied());
		// repeated events keep it occupied without reporting a change
		assert!(!s.register_occupied());

		let now = Instant::now();
		assert!(!s.expire(now));
		assert!(s.expire(now + Duration::from_millis(60)));
		assert!(!s.occupied());
		// already vacant: expiry does not re-fire
		assert!(!s.expire(now + Duration::from_millis(120)));
	}
}
