//! Free host port allocation for cluster endpoints.

use std::net::TcpListener;
use std::sync::atomic::{AtomicU16, Ordering};

use berth_common::constants::HIGH_PORT_START;
use berth_common::error::{BerthError, Result};

/// Next candidate port; ports handed out in this process are never reused.
static NEXT_PORT: AtomicU16 = AtomicU16::new(HIGH_PORT_START);

/// Returns `count` distinct host ports at or above the high port range that
/// are currently free.
///
/// # Errors
///
/// Returns a config error when the range is exhausted.
pub fn allocate(count: usize) -> Result<Vec<u16>> {
    let mut ports = Vec::with_capacity(count);
    while ports.len() < count {
        let candidate = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
        if candidate < HIGH_PORT_START || candidate == u16::MAX {
            return Err(BerthError::Config {
                message: format!("no free host ports left above {HIGH_PORT_START}"),
            });
        }
        if TcpListener::bind(("0.0.0.0", candidate)).is_ok() {
            ports.push(candidate);
        }
    }
    Ok(ports)
}
