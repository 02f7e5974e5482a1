use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use crate::devices::client_data::ClientData;
use crate::devices::light::Light;
use crate::protocol::Protocol;
use crate::types::{Address, Colour, MAX_SCENE};

#[derive(Default)]
struct GroupState {
	label: Option<String>,
	level: Option<u8>,
	colour: Option<Colour>,
	scene: Option<u8>,
	scene_labels: Vec<Option<String>>,
	lights: Vec<Arc<Light>>,
	discoordinated: bool,
	hydrated: bool,
}

/// A DALI group: its member lights, scene-label table and last coordinated
/// state.
///
/// A group is *discoordinated* when a member light has changed on its own
/// since the last group-wide command; its scene is then unknown and a UI
/// should show it as such.  The next coordinated group event clears the
/// flag.
pub struct Group {
	protocol: Arc<Protocol>,
	pub address: Address,
	state: Mutex<GroupState>,
	pub client_data: ClientData,
}

impl Group {
	pub(crate) fn new(protocol: Arc<Protocol>, address: Address) -> Group {
		Group { protocol, address, state: Mutex::new(GroupState::default()), client_data: ClientData::default() }
	}

	pub fn label(&self) -> Option<String> {
		self.state.lock().unwrap().label.clone()
	}

	pub fn level(&self) -> Option<u8> {
		self.state.lock().unwrap().level
	}

	pub fn colour(&self) -> Option<Colour> {
		self.state.lock().unwrap().colour
	}

	/// Current scene, or `None` when unknown or discoordinated.
	pub fn scene(&self) -> Option<u8> {
		let state = self.state.lock().unwrap();
		if state.discoordinated {
			None
		} else {
			state.scene
		}
	}

	pub fn is_discoordinated(&self) -> bool {
		self.state.lock().unwrap().discoordinated
	}

	pub fn lights(&self) -> Vec<Arc<Light>> {
		self.state.lock().unwrap().lights.clone()
	}

	pub fn contains(&self, address: &Address) -> bool {
		self.state.lock().unwrap().lights.iter().any(|l| l.address == *address)
	}

	pub fn contains_temperature_lights(&self) -> bool {
		self.state.lock().unwrap().lights.iter().any(|l| l.features().temperature)
	}

	pub fn contains_dimmable_lights(&self) -> bool {
		self.state.lock().unwrap().lights.iter().any(|l| l.features().brightness)
	}

	/// Kelvin band covering the tunable members.
	pub fn kelvin_range(&self) -> Option<(u16, u16)> {
		let state = self.state.lock().unwrap();
		let mins: Vec<u16> = state.lights.iter().filter_map(|l| l.min_kelvin()).collect();
		let maxs: Vec<u16> = state.lights.iter().filter_map(|l| l.max_kelvin()).collect();
		match (mins.iter().min(), maxs.iter().max()) {
			(Some(&min), Some(&max)) => Some((min, max)),
			_ => None,
		}
	}

	/// The 12-entry scene label table.
	pub fn scene_labels(&self) -> Vec<Option<String>> {
		self.state.lock().unwrap().scene_labels.clone()
	}

	/// Labels of configured scenes only, for building selection lists.
	pub fn scene_label_names(&self) -> Vec<String> {
		self.state.lock().unwrap().scene_labels.iter().flatten().cloned().collect()
	}

	pub fn scene_label_from_number(&self, scene: u8) -> Option<String> {
		self.state.lock().unwrap().scene_labels.get(scene as usize).cloned().flatten()
	}

	pub fn scene_number_from_label(&self, label: &str) -> Option<u8> {
		self.state
			.lock()
			.unwrap()
			.scene_labels
			.iter()
			.position(|entry| entry.as_deref() == Some(label))
			.map(|i| i as u8)
	}

	/// Recall a scene by number.
	pub fn set_scene(&self, scene: u8) -> Result<bool> {
		let acknowledged = self.protocol.dali_scene(&self.address, scene)?;
		if acknowledged {
			let mut state = self.state.lock().unwrap();
			state.scene = Some(scene);
			state.discoordinated = false;
		}
		Ok(acknowledged)
	}

	/// Recall a scene by its label in this group's scene table.
	pub fn set_scene_by_label(&self, label: &str) -> Result<bool> {
		match self.scene_number_from_label(label) {
			Some(scene) => self.set_scene(scene),
			None => bail!("group {} has no scene labelled {:?}", self.address, label),
		}
	}

	/// Set level, colour or both on every member at once.
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
			state.discoordinated = false;
		}
		Ok(acknowledged)
	}

	pub fn on(&self) -> Result<bool> {
		Ok(self.protocol.dali_go_to_last_active_level(&self.address)?)
	}

	pub fn off(&self, fade: bool) -> Result<bool> {
		let acknowledged = if fade {
			self.protocol.dali_custom_fade(&self.address, 0, 2)?
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

	/// Query the controller for the group's level and occupancy and update
	/// the cache.
	pub fn refresh_from_controller(&self) -> Result<()> {
		let level = self.protocol.dali_query_level(&self.address)?;
		let scene = match self.protocol.dali_query_last_scene_is_current(&self.address)? {
			Some(true) => self.protocol.dali_query_last_scene(&self.address)?,
			_ => None,
		};
		let mut state = self.state.lock().unwrap();
		state.level = level;
		state.scene = scene;
		Ok(())
	}

	/// Populate label and the scene table once, on first enumeration.
	pub(crate) fn hydrate(&self) -> Result<()> {
		if self.state.lock().unwrap().hydrated {
			return Ok(());
		}
		let label = self.protocol.query_group_label(&self.address)?;
		let scene_labels = self.protocol.query_scenes_for_group(&self.address)?;
		let mut state = self.state.lock().unwrap();
		state.label = label;
		state.scene_labels = scene_labels;
		if state.scene_labels.len() != MAX_SCENE as usize {
			state.scene_labels.resize(MAX_SCENE as usize, None);
		}
		state.hydrated = true;
		Ok(())
	}

	pub(crate) fn attach_light(&self, light: Arc<Light>) {
		let mut state = self.state.lock().unwrap();
		if !state.lights.iter().any(|l| l.address == light.address) {
			state.lights.push(light);
		}
	}

	// Event intake.

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
		state.discoordinated = false;
		changed
	}

	pub(crate) fn apply_scene(&self, scene: u8) -> bool {
		let mut state = self.state.lock().unwrap();
		let changed = state.scene != Some(scene) || state.discoordinated;
		state.scene = Some(scene);
		state.discoordinated = false;
		changed
	}

	/// A member light diverged from the last coordinated state.  Returns
	/// true when this newly discoordinates the group.
	pub(crate) fn mark_discoordinated(&self) -> bool {
		let mut state = self.state.lock().unwrap();
		if state.discoordinated {
			false
		} else {
			state.discoordinated = true;
			true
		}
	}
}

impl std::fmt::Debug for Group {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let state = self.state.lock().unwrap();
		write!(f, "{}", self.address)?;
		if let Some(label) = &state.label {
			write!(f, "  {:<20}", label)?;
		}
		write!(f, "  {} light(s)", state.lights.len())?;
		if state.discoordinated {
			write!(f, "  (discoordinated)")?;
		} else if let Some(scene) = state.scene {
			write!(f, "  scene {}", scene)?;
		}
		Ok(())
	}
}
