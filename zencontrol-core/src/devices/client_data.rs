use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Per-integration state attached to a device object.
///
/// A higher layer (an MQTT bridge, say) defines its own state type and
/// hangs it off the devices it manages; the core never looks inside.  The
/// slot is keyed by type, so independent integrations can coexist on the
/// same device without coordinating.
#[derive(Default)]
pub struct ClientData {
	slots: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl ClientData {
	pub fn set<T: Any + Send + Sync>(&self, value: T) {
		self.slots.lock().unwrap().insert(TypeId::of::<T>(), Box::new(value));
	}

	pub fn get<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
		self.slots
			.lock()
			.unwrap()
			.get(&TypeId::of::<T>())
			.and_then(|boxed| boxed.downcast_ref::<T>())
			.cloned()
	}

	/// Run `f` against the stored value in place, avoiding the clone.
	pub fn with<T: Any + Send + Sync, R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
		let slots = self.slots.lock().unwrap();
		f(slots.get(&TypeId::of::<T>()).and_then(|boxed| boxed.downcast_ref::<T>()))
	}

	pub fn remove<T: Any + Send + Sync>(&self) {
		self.slots.lock().unwrap().remove(&TypeId::of::<T>());
	}
}

impl std::fmt::Debug for ClientData {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "ClientData({} slots)", self.slots.lock().unwrap().len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Clone, Debug, PartialEq)]
	struct BridgeState {
		topic: String,
	}

	#[derive(Clone, Debug, PartialEq)]
	struct OtherState(u32);

	#[test]
	fn integrations_do_not_collide() {
		let data = ClientData::default();
		data.set(BridgeState { topic: "zen/light/3".into() });
		data.set(OtherState(7));

		assert_eq!(data.get::<BridgeState>().unwrap().topic, "zen/light/3");
		assert_eq!(data.get::<OtherState>(), Some(OtherState(7)));

		data.remove::<OtherState>();
		assert_eq!(data.get::<OtherState>(), None);
		assert!(data.get::<BridgeState>().is_some());
	}
}
