use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use crate::devices::client_data::ClientData;
use crate::protocol::Protocol;
use crate::types::{Address, Colour};

/// Fade used by [Light::off] when a soft turn-off is requested.
const OFF_FADE_SECS: u16 = 2;

/// Kelvin band assumed when gear supports tunable white but won't answer
/// the limits query.
const DEFAULT_WARMEST_K: u16 = 2700;
const DEFAULT_COOLEST_K: u16 = 6500;

/// What a light can do, derived from its colour features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightFeatures {
	pub brightness: bool,
	pub temperature: bool,
	pub rgb: bool,
	pub rgbw: bool,
	pub rgbww: bool,
}

#[derive(Default)]
struct LightState {
	label: Option<String>,
	serial: Option<u64>,
	features: LightFeatures,
	min_kelvin: Option<u16>,
	max_kelvin: Option<u16>,
	level: Option<u8>,
	colour: Option<Colour>,
	scene: Option<u8>,
	hydrated: bool,
}

/// One piece of control gear, with its last heard level, colour and scene.
///
/// Commands go out through the protocol handle; events flow in through the
/// client's dispatcher, which updates the same interned instance.
pub struct Light {
	protocol: Arc<Protocol>,
	pub address: Address,
	state: Mutex<LightState>,
	pub client_data: ClientData,
}

impl Light {
	pub(crate) fn new(protocol: Arc<Protocol>, address: Address) -> Light {
		Light { protocol, address, state: Mutex::new(LightState::default()), client_data: ClientData::default() }
	}

	pub fn label(&self) -> Option<String> {
		self.state.lock().unwrap().label.clone()
	}

	pub fn serial(&self) -> Option<u64> {
		self.state.lock().unwrap().serial
	}

	pub fn features(&self) -> LightFeatures {
		self.state.lock().unwrap().features
	}

	pub fn min_kelvin(&self) -> Option<u16> {
		self.state.lock().unwrap().min_kelvin
	}

	pub fn max_kelvin(&self) -> Option<u16> {
		self.state.lock().unwrap().max_kelvin
	}

	/// Last heard arc level; `None` until something is heard.
	pub fn level(&self) -> Option<u8> {
		self.state.lock().unwrap().level
	}

	pub fn colour(&self) -> Option<Colour> {
		self.state.lock().unwrap().colour
	}

	pub fn scene(&self) -> Option<u8> {
		self.state.lock().unwrap().scene
	}

	pub fn is_on(&self) -> bool {
		self.state.lock().unwrap().level.map_or(false, |l| l > 0)
	}

	/// Set level, colour, or both in one command.
	///
	/// Level-only goes out as a direct arc level; colour-only uses the mask
	/// level 255 so the brightness is left alone; both go out as a single
	/// colour command.
	pub fn set(&self, level: Option<u8>, colour: Option<&Colour>) -> Result<bool> {
		let acknowledged = match (level, colour) {
			(Some(level), None) => self.protocol.dali_arc_level(&self.address, level)?,
			(None, Some(colour)) => self.protocol.dali_colour(&self.address, colour, 255)?,
			(Some(level), Some(colour)) => self.protocol.dali_colour(&self.address, colour, level)?,
			(None, None) => bail!("set() needs a level or a colour"),
		};
		if acknowledged {
			let mut state = self.state.lock().unwrap();
			if let Some(level) = level {
				state.level = Some(level);
			}
			if let Some(colour) = colour {
				state.colour = Some(*colour);
			}
			state.scene = None;
		}
		Ok(acknowledged)
	}

	/// Fade to `level` over `seconds`, overriding the configured fade rate.
	pub fn set_with_fade(&self, level: u8, seconds: u16) -> Result<bool> {
		let acknowledged = self.protocol.dali_custom_fade(&self.address, level, seconds)?;
		if acknowledged {
			let mut state = self.state.lock().unwrap();
			state.level = Some(level);
			state.scene = None;
		}
		Ok(acknowledged)
	}

	/// Return to the last active level.
	pub fn on(&self) -> Result<bool> {
		Ok(self.protocol.dali_go_to_last_active_level(&self.address)?)
	}

	/// Turn off, either immediately (DALI OFF) or with a short fade to
	/// zero.
	pub fn off(&self, fade: bool) -> Result<bool> {
		let acknowledged = if fade {
			self.protocol.dali_custom_fade(&self.address, 0, OFF_FADE_SECS)?
		} else {
			self.protocol.dali_off(&self.address)?
		};
		if acknowledged {
			let mut state = self.state.lock().unwrap();
			state.level = Some(0);
			state.scene = None;
		}
		Ok(acknowledged)
	}

	pub fn stop_fade(&self) -> Result<bool> {
		Ok(self.protocol.dali_stop_fade(&self.address)?)
	}

	/// Query level, colour and scene from the controller and replace the
	/// cached state.
	pub fn refresh_from_controller(&self) -> Result<()> {
		let level = self.protocol.dali_query_level(&self.address)?;
		let colour = if self.features().temperature || self.features().rgb {
			self.protocol.query_dali_colour(&self.address)?
		} else {
			None
		};
		let scene = match self.protocol.dali_query_last_scene_is_current(&self.address)? {
			Some(true) => self.protocol.dali_query_last_scene(&self.address)?,
			_ => None,
		};
		let mut state = self.state.lock().unwrap();
		state.level = level;
		if colour.is_some() {
			state.colour = colour;
		}
		state.scene = scene;
		Ok(())
	}

	/// Populate label, serial and capabilities once, on first enumeration.
	pub(crate) fn hydrate(&self) -> Result<()> {
		if self.state.lock().unwrap().hydrated {
			return Ok(());
		}
		let label = self.protocol.query_dali_device_label(&self.address)?;
		let serial = self.protocol.query_dali_serial(&self.address)?;
		let features = self.protocol.query_dali_colour_features(&self.address)?;

		let mut light_features = LightFeatures { brightness: true, ..LightFeatures::default() };
		let mut min_kelvin = None;
		let mut max_kelvin = None;
		if let Some(features) = features {
			light_features.temperature = features.supports_tunable;
			light_features.rgb = features.rgbwaf_channels >= 3;
			light_features.rgbw = features.rgbwaf_channels >= 4;
			light_features.rgbww = features.rgbwaf_channels >= 5;
		}
		if light_features.temperature {
			match self.protocol.query_dali_colour_temp_limits(&self.address)? {
				Some(limits) => {
					min_kelvin = Some(limits.soft_warmest);
					max_kelvin = Some(limits.soft_coolest);
				}
				None => {
					min_kelvin = Some(DEFAULT_WARMEST_K);
					max_kelvin = Some(DEFAULT_COOLEST_K);
				}
			}
		}

		let mut state = self.state.lock().unwrap();
		state.label = label;
		state.serial = serial;
		state.features = light_features;
		state.min_kelvin = min_kelvin;
		state.max_kelvin = max_kelvin;
		state.hydrated = true;
		Ok(())
	}

	// Event intake.  Each returns whether the cached state changed.

	pub(crate) fn apply_level(&self, level: u8) -> bool {
		let mut state = self.state.lock().unwrap();
		let changed = state.level != Some(level);
		state.level = Some(level);
		changed
	}

	pub(crate) fn apply_colour(&self, colour: Colour) -> bool {
		let mut state = self.state.lock().unwrap();
		let changed = state.colour != Some(colour);
		state.colour = Some(colour);
		changed
	}

	pub(crate) fn apply_scene(&self, scene: u8) -> bool {
		let mut state = self.state.lock().unwrap();
		let changed = state.scene != Some(scene);
		state.scene = Some(scene);
		changed
	}
}

impl std::fmt::Debug for Light {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let state = self.state.lock().unwrap();
		write!(f, "{}", self.address)?;
		if let Some(label) = &state.label {
			write!(f, "  {:<20}", label)?;
		}
		match state.level {
			Some(0) => write!(f, "  off")?,
			Some(level) => write!(f, "  level {}", level)?,
			None => write!(f, "  level ??")?,
		}
		if let Some(colour) = &state.colour {
			write!(f, "  {:?}", colour)?;
		}
		if let Some(scene) = state.scene {
			write!(f, "  scene {}", scene)?;
		}
		Ok(())
	}
}
