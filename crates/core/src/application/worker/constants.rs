// Worker constants (no magic values)
use std::time::Duration;

/// Sleep duration after a claim error before retrying (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Grace period for in-flight jobs when no timeout is configured (5 seconds)
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
