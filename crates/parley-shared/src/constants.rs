/// Application name
pub const APP_NAME: &str = "Parley";

/// Maximum size of a single live event frame in bytes (256 KiB)
pub const MAX_EVENT_SIZE: usize = 262_144;

/// Default HTTP/WebSocket port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Path of the live event endpoint
pub const WS_PATH: &str = "/ws";

/// Default per-connection outbound queue length
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;
