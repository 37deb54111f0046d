use ntex_util::time::Seconds;

use crate::frame::WindowSize;

// Constants
pub const MAX_WINDOW_SIZE: WindowSize = (1 << 31) - 1;
pub const DEFAULT_CONNECTION_WINDOW_SIZE: WindowSize = 1_048_576;
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 256;
pub const DEFAULT_RESET_STREAM_MAX: usize = 10;
pub const DEFAULT_RESET_STREAM_SECS: Seconds = Seconds(10);
pub const DEFAULT_SETTINGS_MAX_HEADER_LIST_SIZE: u32 = 48 << 10;
pub const DEFAULT_MAX_CONTINUATIONS: usize = 5;
pub const DEFAULT_IDLE_TIMEOUT: Seconds = Seconds(30);
pub const DEFAULT_GOAWAY_GRACE: Seconds = Seconds(5);

pub(crate) const PREFACE: [u8; 24] = *b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
pub(crate) const READ_BUF_SIZE: usize = 16 * 1024;
