// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::fmt;

/// MQTT 5 DISCONNECT reason codes reachable from PUBLISH decoding.
///
/// Sent by server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReasonCode {
    MalformedPacket = 0x81,
    ProtocolError = 0x82,
    TopicAliasInvalid = 0x94,
    QuotaExceeded = 0x97,
    PayloadFormatInvalid = 0x99,
}

impl From<ReasonCode> for u8 {
    fn from(code: ReasonCode) -> Self {
        code as Self
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::MalformedPacket => "MALFORMED_PACKET",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::TopicAliasInvalid => "TOPIC_ALIAS_INVALID",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::PayloadFormatInvalid => "PAYLOAD_FORMAT_INVALID",
        };
        write!(f, "{name}")
    }
}

/// Broker-level decode failure taxonomy.
///
/// A superset of [`codec::DecodeError`]: the wire codec only ever produces
/// the two variants that don't require knowledge of a connection's alias
/// table or the global alias limiter. This type adds the three that do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeFailure {
    Malformed(String),
    Protocol(String),
    AliasInvalid(String),
    Quota(String),
    PayloadFormat(String),
}

impl DecodeFailure {
    #[must_use]
    pub const fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Malformed(_) => ReasonCode::MalformedPacket,
            Self::Protocol(_) => ReasonCode::ProtocolError,
            Self::AliasInvalid(_) => ReasonCode::TopicAliasInvalid,
            Self::Quota(_) => ReasonCode::QuotaExceeded,
            Self::PayloadFormat(_) => ReasonCode::PayloadFormatInvalid,
        }
    }

    #[must_use]
    pub fn reason_string(&self) -> &str {
        match self {
            Self::Malformed(s)
            | Self::Protocol(s)
            | Self::AliasInvalid(s)
            | Self::Quota(s)
            | Self::PayloadFormat(s) => s,
        }
    }
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.reason_code(), self.reason_string())
    }
}

impl std::error::Error for DecodeFailure {}

impl From<codec::DecodeError> for DecodeFailure {
    fn from(err: codec::DecodeError) -> Self {
        match err {
            codec::DecodeError::Malformed(detail) => Self::Malformed(detail),
            codec::DecodeError::Protocol(detail) => Self::Protocol(detail),
        }
    }
}

/// Collaborator the embedding broker implements on its per-session
/// connection type. Hosts both the per-connection topic-alias table (since
/// the table's lifetime is the connection's) and the disconnect call (since
/// the connection already owns the outbound channel).
pub trait Connection {
    /// Peer address, used only for the log line emitted alongside a
    /// disconnect.
    fn peer_addr(&self) -> String;

    /// Mutable access to this connection's topic-alias table.
    fn topic_alias_table(&mut self) -> &mut crate::alias::TopicAliasTable;

    /// Sends a DISCONNECT with the given reason code and (if
    /// `reason_strings_enabled`) reason string, then tears down the
    /// connection. Implementations perform the actual socket write; this
    /// trait only describes the call the decoder makes.
    fn disconnect(&mut self, reason_code: ReasonCode, reason_string: Option<&str>);
}

/// Logs and disconnects a connection for the given failure, following this
/// crate's `reason_strings_enabled` configuration knob for whether the
/// human-readable detail is sent to the client.
pub fn emit(conn: &mut dyn Connection, failure: &DecodeFailure, reason_strings_enabled: bool) {
    log::error!(
        "dropping connection from {}: {failure}",
        conn.peer_addr()
    );
    let reason_string = reason_strings_enabled.then(|| failure.reason_string());
    conn.disconnect(failure.reason_code(), reason_string);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_code_hex_values_match_the_mqtt_spec() {
        assert_eq!(u8::from(ReasonCode::MalformedPacket), 0x81);
        assert_eq!(u8::from(ReasonCode::ProtocolError), 0x82);
        assert_eq!(u8::from(ReasonCode::TopicAliasInvalid), 0x94);
        assert_eq!(u8::from(ReasonCode::QuotaExceeded), 0x97);
        assert_eq!(u8::from(ReasonCode::PayloadFormatInvalid), 0x99);
    }

    #[test]
    fn codec_errors_convert_into_the_broker_taxonomy() {
        let failure: DecodeFailure = codec::DecodeError::malformed("bad vbi").into();
        assert_eq!(failure.reason_code(), ReasonCode::MalformedPacket);

        let failure: DecodeFailure = codec::DecodeError::protocol("dup at qos0").into();
        assert_eq!(failure.reason_code(), ReasonCode::ProtocolError);
    }
}
