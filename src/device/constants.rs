/**
 * Capacity of the adapter callback and device event channels.
 */
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/**
 * Capacity of the link command channel.
 */
pub const COMMAND_CHANNEL_CAPACITY: usize = 8;

/**
 * How long (milliseconds) a duty-cycled scan stays off before it is
 * restarted, when the config enables cycling without naming a pause.
 */
pub const DEFAULT_SCAN_PAUSE_MS: u64 = 1000;
