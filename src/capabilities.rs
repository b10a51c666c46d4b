//! Protocol capabilities resolved at connect time
//!
//! The server picks one of the protocol versions offered in `op_connect`.
//! Every version-dependent behavior in the crate is decided by consulting
//! the flags derived here, instead of by per-version code paths.

use crate::constants::protocol;

/// Driver name reported to the server
pub const DRIVER_NAME: &str = concat!("firebird-rs : ", env!("CARGO_PKG_VERSION"));

/// How null values are marked in row messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullFormat {
    /// Each value is followed by a 32-bit indicator (protocols 10 to 12)
    Inline,
    /// A bitmap precedes the non-null values (protocol 13)
    Bitmap,
}

/// One protocol offered in the connect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolOffer {
    /// Protocol version code
    pub version: i32,
    /// Client architecture
    pub architecture: i32,
    /// Lowest packet type accepted
    pub min_type: i32,
    /// Highest packet type accepted
    pub max_type: i32,
    /// Preference, higher wins
    pub weight: i32,
}

/// Protocols offered to the server, oldest first
///
/// Lazy send is never offered, so every request gets its own response.
pub fn offered_protocols() -> Vec<ProtocolOffer> {
    [
        protocol::VERSION10,
        protocol::VERSION11,
        protocol::VERSION12,
        protocol::VERSION13,
    ]
    .iter()
    .enumerate()
    .map(|(weight, &version)| ProtocolOffer {
        version,
        architecture: protocol::ARCH_GENERIC,
        min_type: protocol::PTYPE_RPC,
        max_type: protocol::PTYPE_BATCH_SEND,
        weight: weight as i32,
    })
    .collect()
}

/// Restore the flag bit of a version read back as a negative number
pub fn normalize_version(version: i32) -> i32 {
    if version < 0 {
        (version & protocol::FB_PROTOCOL_MASK & 0xFFFF) | protocol::FB_PROTOCOL_FLAG
    } else {
        version
    }
}

/// Capabilities negotiated between client and server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Accepted protocol version
    pub protocol_version: i32,
    /// Accepted architecture
    pub architecture: i32,
    /// Accepted packet type
    pub packet_type: i32,
    /// Row null marking
    pub null_format: NullFormat,
    /// Server may answer attach with `op_cont_auth`
    pub supports_cont_auth: bool,
    /// Wire encryption can be negotiated
    pub supports_wire_crypt: bool,
    /// `op_cancel` is understood
    pub supports_cancel: bool,
    /// Statement type can be requested together with prepare
    pub supports_prepare_info_type: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::for_version(protocol::VERSION10)
    }
}

impl Capabilities {
    /// Flags implied by a protocol version
    pub fn for_version(version: i32) -> Self {
        let version = normalize_version(version);
        let v13 = version >= protocol::VERSION13;
        Self {
            protocol_version: version,
            architecture: protocol::ARCH_GENERIC,
            packet_type: protocol::PTYPE_BATCH_SEND,
            null_format: if v13 { NullFormat::Bitmap } else { NullFormat::Inline },
            supports_cont_auth: v13,
            supports_wire_crypt: v13,
            supports_cancel: version >= protocol::VERSION12,
            supports_prepare_info_type: version >= protocol::VERSION11,
        }
    }

    /// Flags from an `op_accept` family reply
    pub fn from_accept(version: i32, architecture: i32, packet_type: i32) -> Self {
        Self {
            architecture,
            packet_type: packet_type & protocol::PTYPE_MASK,
            ..Self::for_version(version)
        }
    }

    /// Version number without the flag bit
    pub fn version_number(&self) -> i32 {
        self.protocol_version & protocol::FB_PROTOCOL_MASK
    }

    /// Whether the server may defer responses
    pub fn is_lazy(&self) -> bool {
        self.packet_type == protocol::PTYPE_LAZY_SEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offered_protocols() {
        let offers = offered_protocols();
        assert_eq!(offers.len(), 4);
        assert_eq!(offers[0].version, 10);
        assert_eq!(offers[3].version, 0x8000 | 13);
        assert!(offers.iter().all(|o| o.max_type == protocol::PTYPE_BATCH_SEND));
        assert_eq!(offers[3].weight, 3);
    }

    #[test]
    fn test_version_10_is_inline() {
        let caps = Capabilities::for_version(protocol::VERSION10);
        assert_eq!(caps.null_format, NullFormat::Inline);
        assert!(!caps.supports_cont_auth);
        assert!(!caps.supports_wire_crypt);
        assert!(!caps.supports_cancel);
        assert_eq!(caps.version_number(), 10);
    }

    #[test]
    fn test_version_12_has_cancel_only() {
        let caps = Capabilities::for_version(protocol::VERSION12);
        assert_eq!(caps.null_format, NullFormat::Inline);
        assert!(caps.supports_cancel);
        assert!(!caps.supports_cont_auth);
    }

    #[test]
    fn test_version_13_full() {
        let caps = Capabilities::for_version(protocol::VERSION13);
        assert_eq!(caps.null_format, NullFormat::Bitmap);
        assert!(caps.supports_cont_auth);
        assert!(caps.supports_wire_crypt);
        assert!(caps.supports_cancel);
        assert_eq!(caps.version_number(), 13);
    }

    #[test]
    fn test_negative_version_is_normalized() {
        let raw = (0xFFFF_800Du32) as i32;
        assert_eq!(normalize_version(raw), protocol::VERSION13);
        assert_eq!(normalize_version(protocol::VERSION12), protocol::VERSION12);
    }

    #[test]
    fn test_from_accept_masks_packet_type() {
        let caps = Capabilities::from_accept(protocol::VERSION13, 1, 0x0103);
        assert_eq!(caps.packet_type, protocol::PTYPE_BATCH_SEND);
        assert!(!caps.is_lazy());
    }
}
