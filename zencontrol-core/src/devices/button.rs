use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::devices::client_data::ClientData;
use crate::protocol::Protocol;
use crate::types::Instance;

/// Controllers repeat the button-hold event roughly this often while the
/// button stays down.
const HOLD_REPEAT: Duration = Duration::from_millis(500);

/// A hold train with a gap longer than this belongs to a previous press.
const STALE_HOLD: Duration = Duration::from_millis(1500);

const DEFAULT_LONG_PRESS: Duration = Duration::from_millis(1000);

struct ButtonState {
	label: Option<String>,
	instance_label: Option<String>,
	long_press_time: Duration,
	hold_count: u32,
	long_press_fired: bool,
	last_hold: Option<Instant>,
	hydrated: bool,
}

impl Default for ButtonState {
	fn default() -> ButtonState {
		ButtonState {
			label: None,
			instance_label: None,
			long_press_time: DEFAULT_LONG_PRESS,
			hold_count: 0,
			long_press_fired: false,
			last_hold: None,
			hydrated: false,
		}
	}
}

/// A push-button instance on a control device.
///
/// The wire only reports presses and periodic holds; long presses are
/// detected locally by counting hold repeats, and fire exactly once per
/// physical press.
pub struct Button {
	protocol: Arc<Protocol>,
	pub instance: Instance,
	state: Mutex<ButtonState>,
	pub client_data: ClientData,
}

impl Button {
	pub(crate) fn new(protocol: Arc<Protocol>, instance: Instance) -> Button {
		Button { protocol, instance, state: Mutex::new(ButtonState::default()), client_data: ClientData::default() }
	}

	/// Label of the device the button sits on.
	pub fn label(&self) -> Option<String> {
		self.state.lock().unwrap().label.clone()
	}

	/// Label of this button instance.
	pub fn instance_label(&self) -> Option<String> {
		self.state.lock().unwrap().instance_label.clone()
	}

	pub fn long_press_time(&self) -> Duration {
		self.state.lock().unwrap().long_press_time
	}

	/// How long a button must be held before the long press fires.
	/// Rounded to the ~500 ms hold-repeat granularity of the wire.
	pub fn set_long_press_time(&self, time: Duration) {
		self.state.lock().unwrap().long_press_time = time;
	}

	/// Override the button's LED, where the controller manages it.
	pub fn set_led(&self, on: bool) -> Result<bool> {
		Ok(self.protocol.override_dali_button_led_state(&self.instance, on)?)
	}

	pub fn led_state(&self) -> Result<Option<bool>> {
		Ok(self.protocol.query_last_known_dali_button_led_state(&self.instance)?)
	}

	pub(crate) fn hydrate(&self) -> Result<()> {
		if self.state.lock().unwrap().hydrated {
			return Ok(());
		}
		let label = self.protocol.query_dali_device_label(&self.instance.address)?;
		let instance_label = self.protocol.query_dali_instance_label(&self.instance)?;
		let mut state = self.state.lock().unwrap();
		state.label = label;
		state.instance_label = instance_label;
		state.hydrated = true;
		Ok(())
	}

	/// A press event arrived.  Resets hold tracking; the caller fires the
	/// short-press callback.
	pub(crate) fn register_press(&self) {
		let mut state = self.state.lock().unwrap();
		state.hold_count = 0;
		state.long_press_fired = false;
		state.last_hold = None;
	}

	/// A hold event arrived.  Returns true when this crosses the long-press
	/// threshold for the first time in this press.
	pub(crate) fn register_hold(&self) -> bool {
		let now = Instant::now();
		let mut state = self.state.lock().unwrap();
		if let Some(last) = state.last_hold {
			if now.duration_since(last) > STALE_HOLD {
				state.hold_count = 0;
				state.long_press_fired = false;
			}
		}
		state.last_hold = Some(now);
		state.hold_count += 1;

		let threshold = threshold_repeats(state.long_press_time);
		if state.hold_count >= threshold && !state.long_press_fired {
			state.long_press_fired = true;
			true
		} else {
			false
		}
	}
}

fn threshold_repeats(long_press_time: Duration) -> u32 {
	let repeats = (long_press_time.as_millis() / HOLD_REPEAT.as_millis()) as u32;
	repeats.max(1)
}

impl std::fmt::Debug for Button {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let state = self.state.lock().unwrap();
		write!(f, "button {} #{}", self.instance.address, self.instance.number)?;
		if let Some(label) = &state.instance_label {
			write!(f, " ({})", label)?;
		}
		Ok(())
	}
}
