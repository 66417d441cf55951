//! Fixed endpoint identifiers, bundled as one injectable table.
//!
//! Transports receive an [`EndpointTable`] at construction. Tests and firmware
//! variants swap the table instead of patching constants.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vns_shell_protocol::CommandNames;

use crate::transport::Endpoint;

/// SmartVNS system configuration characteristic.
const SYSTEM_CONFIG_UUID: Uuid = Uuid::from_u128(0xCE60014D_AE91_11E1_4496_9FC5DD4AFF01);
/// SmartVNS stimulation configuration/control characteristic.
const STIM_CONTROL_UUID: Uuid = Uuid::from_u128(0xCE60014E_AE91_11E1_4496_9FC5DD4AFF01);
/// SmartVNS telemetry notify characteristic.
const TELEMETRY_UUID: Uuid = Uuid::from_u128(0xCE60014D_AE91_11E1_4495_9FC5DD4AFF08);
/// Bluetooth SIG battery level characteristic (0x2A19 on the base UUID).
const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x00002A19_0000_1000_8000_00805F9B34FB);

/// BLE characteristic identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GattProfile {
    /// System configuration (read/write).
    pub system_config: Uuid,
    /// Stimulation configuration (read) and tagged stimulation commands (write).
    pub stim_control: Uuid,
    /// Telemetry stream (notify).
    pub telemetry: Uuid,
    /// Battery level (read).
    pub battery_level: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        GattProfile {
            system_config: SYSTEM_CONFIG_UUID,
            stim_control: STIM_CONTROL_UUID,
            telemetry: TELEMETRY_UUID,
            battery_level: BATTERY_LEVEL_UUID,
        }
    }
}

impl GattProfile {
    /// Characteristic backing an endpoint, if BLE exposes it.
    ///
    /// The stimulation config is read from the control characteristic; the BLE
    /// profile has no version characteristic.
    pub fn characteristic(&self, endpoint: Endpoint) -> Option<Uuid> {
        match endpoint {
            Endpoint::SystemConfig => Some(self.system_config),
            Endpoint::StimConfig | Endpoint::StimControl => Some(self.stim_control),
            Endpoint::Telemetry => Some(self.telemetry),
            Endpoint::Battery => Some(self.battery_level),
            Endpoint::Version => None,
        }
    }
}

/// Every fixed identifier the transports need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointTable {
    /// BLE characteristics.
    pub gatt: GattProfile,
    /// Serial shell command words.
    pub shell: CommandNames,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uuids() {
        let profile = GattProfile::default();
        assert_eq!(
            profile.system_config.to_string(),
            "ce60014d-ae91-11e1-4496-9fc5dd4aff01"
        );
        assert_eq!(
            profile.battery_level.to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_stim_endpoints_share_characteristic() {
        let profile = GattProfile::default();
        assert_eq!(
            profile.characteristic(Endpoint::StimConfig),
            profile.characteristic(Endpoint::StimControl)
        );
        assert_eq!(profile.characteristic(Endpoint::Version), None);
    }

    #[test]
    fn test_table_from_yaml_overrides_one_field() {
        let yaml = "shell:\n  bootloader: boot\n";
        let table: EndpointTable = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(table.shell.bootloader, "boot");
        assert_eq!(table.shell.config, "cfg");
        assert_eq!(table.gatt, GattProfile::default());
    }
}
