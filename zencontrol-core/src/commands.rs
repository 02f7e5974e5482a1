/// The TPI Advanced command set.
///
/// One variant per documented opcode.  The discriminant is the wire byte;
/// requests carry `cmd as u8` in the third frame position.  A few commands
/// are listed for completeness but have no typed wrapper (DMX, virtual
/// instances, SDDP), and the legacy scene queries are superseded by the
/// group-scene commands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
	// Controller
	/// Query the controller firmware version.
	QueryControllerVersionNumber = 0x1C,
	/// Query the label of the controller.
	QueryControllerLabel = 0x24,
	/// Query the fitting number of the controller itself.
	QueryControllerFittingNumber = 0x25,
	/// Query whether the DALI bus is ready (or has a fault).
	QueryIsDaliReady = 0x26,
	/// Query whether controller startup is complete.
	QueryControllerStartupComplete = 0x27,

	// System variables
	/// Set a system variable value.
	SetSystemVariable = 0x36,
	/// Query a system variable value.
	QuerySystemVariable = 0x37,
	/// Query the name of a system variable.
	QuerySystemVariableName = 0x42,

	// TPI settings
	/// Enable or disable TPI event emission.
	EnableTpiEventEmit = 0x08,
	/// Query whether TPI events are enabled or disabled.
	QueryTpiEventEmitState = 0x07,
	/// Request that filters be added for DALI TPI events.
	DaliAddTpiEventFilter = 0x31,
	/// Query DALI TPI event filters on an address.
	QueryDaliTpiEventFilters = 0x32,
	/// Request that DALI TPI event filters be cleared.
	DaliClearTpiEventFilters = 0x33,
	/// Set the TPI event unicast address and port.
	SetTpiEventUnicastAddress = 0x40,
	/// Query TPI event state, unicast address and port.
	QueryTpiEventUnicastAddress = 0x41,

	// Any address
	/// Query the operating mode for a device.
	QueryOperatingModeByAddress = 0x28,
	/// Query the label for a DALI ECG or ECD by address.
	QueryDaliDeviceLabel = 0x03,
	/// Query the serial number at an address.
	QueryDaliSerial = 0xB9,
	/// Query the fitting number for control gear/devices.
	QueryDaliFittingNumber = 0x22,
	/// Query the DALI European Article Number at an address.
	QueryDaliEan = 0xB8,

	// Groups
	/// Query DALI group membership by address.
	QueryGroupMembershipByAddress = 0x15,
	/// Query the DALI group numbers.
	QueryGroupNumbers = 0x09,
	/// Query the label for a DALI group.
	QueryGroupLabel = 0x01,
	/// Query scene numbers attributed to a group.
	QuerySceneNumbersForGroup = 0x1A,
	/// Query the label of a group scene.
	QuerySceneLabelForGroup = 0x1B,
	/// Query DALI group information by group number.
	QueryGroupByNumber = 0x12,

	// Profiles
	/// Query profile numbers, behaviours and schedule state.
	QueryProfileInformation = 0x43,
	/// Query all available profile numbers (superseded by
	/// [Command::QueryProfileInformation]).
	QueryProfileNumbers = 0x0B,
	/// Query the label for a controller profile.
	QueryProfileLabel = 0x04,
	/// Query the current profile number.
	QueryCurrentProfileNumber = 0x05,
	/// Request a profile change on the controller.
	ChangeProfileNumber = 0xC0,

	// Instances
	/// Query DALI addresses that have instances.
	QueryDaliAddressesWithInstances = 0x16,
	/// Query instance information for an address.
	QueryInstancesByAddress = 0x0D,
	/// Query the fitting number for an instance.
	QueryDaliInstanceFittingNumber = 0x23,
	/// Query a DALI instance for its label.
	QueryDaliInstanceLabel = 0xB7,
	/// Query group targets related to an instance.
	QueryInstanceGroups = 0x21,
	/// Query an occupancy instance for its timer values.
	QueryOccupancyInstanceTimers = 0x0C,

	// Control gear
	/// Query control gear present in the database.
	QueryControlGearDaliAddresses = 0x1D,
	/// Query the arc level on an address.
	DaliQueryLevel = 0xAA,
	/// Query control gear type data on an address.
	DaliQueryCgType = 0xAC,
	/// Query the DALI colour features/capabilities.
	QueryDaliColourFeatures = 0x35,
	/// Query colour temperature limits in Kelvin.
	QueryDaliColourTempLimits = 0x38,
	/// Query status flags on an address, group or broadcast.
	DaliQueryControlGearStatus = 0xAB,
	/// Query the colour of a DALI target.
	QueryDaliColour = 0x34,
	/// Set a DALI target to a colour.
	DaliColour = 0x0E,
	/// Inhibit sensors from affecting a target for n seconds.
	DaliInhibit = 0xA0,
	/// Set an arc level on an address.
	DaliArcLevel = 0xA2,
	/// On-if-off and step up.
	DaliOnStepUp = 0xA3,
	/// Step down and off-at-min.
	DaliStepDownOff = 0xA4,
	/// Step up.
	DaliUp = 0xA5,
	/// Step down.
	DaliDown = 0xA6,
	/// Recall the max level.
	DaliRecallMax = 0xA7,
	/// Recall the min level.
	DaliRecallMin = 0xA8,
	/// Turn an address off.
	DaliOff = 0xA9,
	/// Query the min level of a DALI device.
	DaliQueryMinLevel = 0xAF,
	/// Query the max level of a DALI device.
	DaliQueryMaxLevel = 0xB0,
	/// Query whether a fade is running on an address.
	DaliQueryFadeRunning = 0xB1,
	/// Begin a DALI DAPC sequence.
	DaliEnableDapcSeq = 0xB2,
	/// Arc level with a custom fade length.
	DaliCustomFade = 0xB4,
	/// Command DALI addresses to go to their last active level.
	DaliGoToLastActiveLevel = 0xB5,
	/// Request a running DALI fade be stopped.
	DaliStopFade = 0xC1,

	// Scenes
	/// Query which scenes an address has levels for.
	QuerySceneNumbersByAddress = 0x14,
	/// Query scene level values for an address.
	QuerySceneLevelsByAddress = 0x1E,
	/// Recall a DALI scene on an address.
	DaliScene = 0xA1,
	/// Query the last heard DALI scene.
	DaliQueryLastScene = 0xAD,
	/// Query whether the last heard scene is the current scene.
	DaliQueryLastSceneIsCurrent = 0xAE,
	/// Query which scenes have colour change data for an address.
	QueryColourSceneMembershipByAddr = 0x44,
	/// Query the colour control data for scenes 0-7.
	QueryColourScene07DataForAddr = 0x45,
	/// Query the colour control data for scenes 8-11.
	QueryColourScene811DataForAddr = 0x46,

	// Button LEDs
	/// Override a button LED state.
	OverrideDaliButtonLedState = 0x29,
	/// Query the last known button LED state.
	QueryLastKnownDaliButtonLedState = 0x30,

	// Present on the wire, no typed wrapper here
	/// Trigger a Control4 SDDP identify.
	TriggerSddpIdentify = 0x06,
	/// Send values to a set of DMX channels.
	DmxColour = 0x10,
	/// Query DMX device information.
	QueryDmxDeviceNumbers = 0x17,
	/// Query DMX device information by channel number.
	QueryDmxDeviceByNumber = 0x18,
	/// Query a DMX channel value.
	QueryDmxLevelByChannel = 0x19,
	/// Query a DMX device label.
	QueryDmxDeviceLabelByNumber = 0x20,
	/// Perform an action on a virtual instance.
	VirtualInstance = 0xB3,
	/// Query virtual instances and their types.
	QueryVirtualInstances = 0xB6,

	// Legacy
	/// Legacy scene label query.
	QuerySceneLabel = 0x02,
	/// Legacy scene numbers query.
	QuerySceneNumbers = 0x0A,
	/// Legacy scene-by-number query.
	QuerySceneByNumber = 0x13,
}

impl Command {
	pub fn opcode(self) -> u8 {
		self as u8
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn opcodes_match_the_documented_values() {
		assert_eq!(Command::DaliOff.opcode(), 0xA9);
		assert_eq!(Command::QueryControllerLabel.opcode(), 0x24);
		assert_eq!(Command::DaliColour.opcode(), 0x0E);
		assert_eq!(Command::QueryDaliTpiEventFilters.opcode(), 0x32);
		assert_eq!(Command::ChangeProfileNumber.opcode(), 0xC0);
	}
}
