use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::devices::client_data::ClientData;
use crate::events::SystemVariableValue;
use crate::protocol::{Controller, Protocol};
use crate::types::ControllerId;

/// An event value matching a local write inside this window is treated as
/// our own echo.
const WRITE_DEBOUNCE: Duration = Duration::from_secs(2);

#[derive(Default)]
struct SysVarState {
	label: Option<String>,
	value: Option<f64>,
	last_write: Option<(i16, Instant)>,
}

/// A named signed-16-bit slot on a controller, used to exchange state with
/// external automation.
///
/// Change events report `by_me` so an integration that wrote the value can
/// suppress its own echo.
pub struct SystemVariable {
	protocol: Arc<Protocol>,
	pub controller: ControllerId,
	pub id: u8,
	state: Mutex<SysVarState>,
	pub client_data: ClientData,
}

impl SystemVariable {
	pub(crate) fn new(protocol: Arc<Protocol>, controller: ControllerId, id: u8) -> SystemVariable {
		SystemVariable {
			protocol,
			controller,
			id,
			state: Mutex::new(SysVarState::default()),
			client_data: ClientData::default(),
		}
	}

	pub fn label(&self) -> Option<String> {
		self.state.lock().unwrap().label.clone()
	}

	pub(crate) fn set_label(&self, label: Option<String>) {
		self.state.lock().unwrap().label = label;
	}

	/// Last value heard from an event or query, scaled.
	pub fn cached_value(&self) -> Option<f64> {
		self.state.lock().unwrap().value
	}

	fn controller_handle(&self) -> Result<Arc<Controller>> {
		self.protocol
			.controller(self.controller)
			.ok_or_else(|| anyhow::anyhow!("unknown controller {}", self.controller))
	}

	/// Query the current value from the controller.
	pub fn get_value(&self) -> Result<Option<i16>> {
		let ctrl = self.controller_handle()?;
		let value = self.protocol.query_system_variable(&ctrl, self.id)?;
		if let Some(v) = value {
			self.state.lock().unwrap().value = Some(f64::from(v));
		}
		Ok(value)
	}

	/// Write a value.  The write is remembered briefly so the echoing
	/// change event can be attributed to us.
	pub fn set_value(&self, value: i16) -> Result<bool> {
		let ctrl = self.controller_handle()?;
		{
			let mut state = self.state.lock().unwrap();
			state.last_write = Some((value, Instant::now()));
		}
		let acknowledged = self.protocol.set_system_variable(&ctrl, self.id, value)?;
		if acknowledged {
			self.state.lock().unwrap().value = Some(f64::from(value));
		}
		Ok(acknowledged)
	}

	/// A change event arrived.  Returns `(changed, by_me)`.
	pub(crate) fn register_event(&self, value: SystemVariableValue) -> (bool, bool) {
		let scaled = value.value();
		let mut state = self.state.lock().unwrap();
		let changed = state.value.map_or(true, |old| (old - scaled).abs() > f64::EPSILON);
		state.value = Some(scaled);
		let by_me = match state.last_write {
			Some((written, at)) => {
				at.elapsed() < WRITE_DEBOUNCE && value.as_integer() == Some(i32::from(written))
			}
			None => false,
		};
		(changed, by_me)
	}
}

impl std::fmt::Debug for SystemVariable {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let state = self.state.lock().unwrap();
		write!(f, "{} sysvar {}", self.controller, self.id)?;
		if let Some(label) = &state.label {
			write!(f, " ({})", label)?;
		}
		if let Some(value) = state.value {
			write!(f, " = {}", value)?;
		}
		Ok(())
	}
}
