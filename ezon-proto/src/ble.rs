//! BLE GATT attributes of the EZON tracker
//!
//! All traffic, commands and notifications, goes through one vendor
//! characteristic.

use uuid::Uuid;

/// Main EZON characteristic (write/notify): 0000ffb2-0000-1000-8000-00805f9b34fb
pub const EZON_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ffb2_0000_1000_8000_00805f9b34fb);

/// Known attribute names, for diagnostics
const ATTRIBUTES: &[(Uuid, &str)] = &[(EZON_CHARACTERISTIC_UUID, "Main ezon characteristic")];

/// Human readable name of a GATT attribute
pub fn lookup<'a>(uuid: &Uuid, default: &'a str) -> &'a str {
    ATTRIBUTES
        .iter()
        .find(|(known, _)| known == uuid)
        .map(|(_, name)| *name)
        .unwrap_or(default)
}

/// Whether an advertised local name looks like an EZON watch
pub fn is_ezon_name(name: &str) -> bool {
    name.to_ascii_uppercase().contains("EZON")
}
