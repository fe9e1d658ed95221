use uuid::Uuid;

/**
 * How long (milliseconds) establishing the backend session may take.
 */
pub const CONNECT_DEADLINE: u64 = 5000;

/**
 * How long (milliseconds) a write to a device may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) `close()` waits for the final stop of every device. Exceeds
 * `WRITE_DEADLINE`, so a single slow device times out on its own first.
 */
pub const CLOSE_DEADLINE: u64 = 3000;

/**
 * How long (milliseconds) `close()` waits for the backend to disconnect, after the final stops.
 */
pub const DISCONNECT_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) connecting to a discovered peripheral may take.
 */
pub const PERIPHERAL_CONNECT_DEADLINE: u64 = 10000;

/**
 * Capacity of the host -> worker action queue. Host calls never wait on it; a full queue
 * makes the call report failure.
 */
pub const ACTION_QUEUE_CAPACITY: usize = 256;

pub const SPEED_MIN: f32 = 0.0;
pub const SPEED_MAX: f32 = 1.0;

/**
 * Enabled flag reported for identities that have no settings entry.
 */
pub const DEFAULT_ENABLED: bool = true;

/**
 * Local name prefix advertised by Lovense toys ("LVS-Edge", "LVS-Lush3", ...)
 */
pub const LOVENSE_NAME_PREFIX: &str = "LVS-";

/**
 * Lovense devices take an integer vibration level between 0 and this value.
 */
pub const LOVENSE_VIBRATE_STEPS: f64 = 20.0;

/**
 * TX characteristics of the older Lovense service families (fff0 and nordic uart).
 */
pub const LOVENSE_TX_CHARACTERISTICS: [&str; 2] = [
    "0000fff2-0000-1000-8000-00805f9b34fb",
    "6e400002-b5a3-f393-e0a9-e50e24dcca9e",
];

/**
 * Newer Lovense firmware uses "xy300001-0023-4bd4-bbd5-a6920e4c5653" services, where xy varies
 * per model. The TX characteristic is "xy300002-..." with the same suffix.
 */
pub const LOVENSE_UUID_SUFFIX: &str = "-0023-4bd4-bbd5-a6920e4c5653";

pub fn make_lovense_tx_uuids() -> Vec<Uuid> {
    LOVENSE_TX_CHARACTERISTICS
        .iter()
        .filter_map(|s| Uuid::parse_str(s).ok())
        .collect()
}

pub fn is_lovense_tx_uuid(uuid: &Uuid) -> bool {
    if make_lovense_tx_uuids().contains(uuid) {
        return true;
    }

    let text = uuid.hyphenated().to_string();
    text.ends_with(LOVENSE_UUID_SUFFIX) && text.get(2..8) == Some("300002")
}

pub fn lovense_vibrate_command(speed: f64) -> Vec<u8> {
    let level = (speed.clamp(0.0, 1.0) * LOVENSE_VIBRATE_STEPS).round() as u8;
    format!("Vibrate:{};", level).into_bytes()
}
