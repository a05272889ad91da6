// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::types::Endpoint;
use std::io;
use thiserror::Error;

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// Errors the core surfaces to its caller. Per spec.md §7 this is a small
/// set: transient conditions (try-lock misses) and logical drops are logged
/// and counted, not returned, so this enum only covers local-fatal and
/// peer-fatal conditions a caller must react to.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("listener could not bind: {0}")]
    ListenerBindFailed(#[from] io::Error),

    #[error("the core mutex could not be acquired within {0:?}")]
    TryLockTimeout(std::time::Duration),

    #[error("handshake with {endpoint} rejected: {reason}")]
    HandshakeRejected { endpoint: Endpoint, reason: String },

    #[error("received malformed packet from {0}")]
    MalformedPacket(Endpoint),

    #[error("network core is not active")]
    NotActive,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn handshake_rejected_reports_endpoint_and_reason() {
        let err = CoreError::HandshakeRejected {
            endpoint: Endpoint::new(Ipv4Addr::new(127, 0, 0, 1), 6346),
            reason: "bad header".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:6346"));
        assert!(msg.contains("bad header"));
    }

    #[test]
    fn io_error_converts_via_from() {
        let io_err = io::Error::new(io::ErrorKind::AddrInUse, "in use");
        let core_err: CoreError = io_err.into();
        assert!(matches!(core_err, CoreError::ListenerBindFailed(_)));
    }
}
