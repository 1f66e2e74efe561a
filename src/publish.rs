// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use codec::{ByteReader, PayloadFormat, PublishFlags, PublishProperties, QoS};

use crate::alias::GlobalAliasLimiter;
use crate::config::DecoderConfig;
use crate::disconnect::{self, Connection, DecodeFailure};

/// A fully decoded, validated PUBLISH application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mqtt5Publish {
    pub topic: String,
    pub qos: QosLevel,
    pub retain: bool,
    pub dup: bool,
    pub packet_identifier: u16,
    pub payload: Vec<u8>,
    pub payload_format_indicator: Option<PayloadFormatTag>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub message_expiry_interval: Option<u32>,
    pub user_properties: Vec<(String, String)>,
    pub is_new_topic_alias: bool,
    pub broker_id: String,
}

/// Mirrors [`codec::QoS`] at the crate boundary so callers don't need to
/// depend on the codec crate just to match on a delivered message's QoS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<QoS> for QosLevel {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::AtMostOnce,
            QoS::AtLeastOnce => Self::AtLeastOnce,
            QoS::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// Mirrors [`codec::PayloadFormat`] at the crate boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormatTag {
    Unspecified,
    Utf8,
}

impl From<PayloadFormat> for PayloadFormatTag {
    fn from(format: PayloadFormat) -> Self {
        match format {
            PayloadFormat::Unspecified => Self::Unspecified,
            PayloadFormat::Utf8 => Self::Utf8,
        }
    }
}

/// Stateless save for configuration and identity; all mutable state it
/// touches (the per-connection alias table, the global alias limiter)
/// is borrowed for the duration of a single `decode` call.
#[derive(Debug, Clone)]
pub struct Decoder {
    config: DecoderConfig,
    alias_limiter: GlobalAliasLimiter,
    broker_id: String,
}

impl Decoder {
    #[must_use]
    pub fn new(config: DecoderConfig, alias_limiter: GlobalAliasLimiter, broker_id: String) -> Self {
        Self {
            config,
            alias_limiter,
            broker_id,
        }
    }

    /// Decodes one PUBLISH packet's variable-header-and-payload bytes.
    ///
    /// On success, returns the decoded message. On any validation
    /// failure, sends the appropriate DISCONNECT on `conn` and returns
    /// `None` — never both, never neither.
    pub fn decode(
        &self,
        conn: &mut dyn Connection,
        first_header_byte: u8,
        bytes: &[u8],
    ) -> Option<Mqtt5Publish> {
        match self.try_decode(conn, first_header_byte, bytes) {
            Ok(publish) => Some(publish),
            Err(failure) => {
                disconnect::emit(conn, &failure, self.config.reason_strings_enabled);
                None
            }
        }
    }

    fn try_decode(
        &self,
        conn: &mut dyn Connection,
        first_header_byte: u8,
        bytes: &[u8],
    ) -> Result<Mqtt5Publish, DecodeFailure> {
        let flags = PublishFlags::decode(first_header_byte)?;

        let mut reader = ByteReader::new(bytes);

        let raw_topic = reader.read_string()?;
        let topic_name = if raw_topic.is_empty() {
            None
        } else {
            codec::topic::validate_topic_name(&raw_topic)?;
            Some(raw_topic)
        };

        let packet_identifier = if flags.qos.is_zero() {
            0
        } else {
            let pid = reader.read_u16()?;
            if pid == 0 {
                return Err(DecodeFailure::Protocol(
                    "packet identifier must be non-zero at QoS > 0".to_string(),
                ));
            }
            pid
        };

        let properties = PublishProperties::decode(&mut reader)?;

        let (topic, is_new_topic_alias) =
            self.resolve_topic(conn, topic_name, properties.topic_alias)?;

        let payload = reader.read_bytes(reader.remaining())?.to_vec();

        if let Some(PayloadFormat::Utf8) = properties.payload_format_indicator {
            if self.config.validate_payload_format && std::str::from_utf8(&payload).is_err() {
                return Err(DecodeFailure::PayloadFormat(
                    "payload format indicator declares UTF-8 but payload is not well-formed"
                        .to_string(),
                ));
            }
        }

        let user_properties_len: usize = properties
            .user_properties
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        if user_properties_len > self.config.max_user_properties_length {
            return Err(DecodeFailure::Malformed(
                "user properties exceed configured size limit".to_string(),
            ));
        }

        let message_expiry_interval = properties
            .message_expiry_interval
            .map(|interval| interval.min(self.config.max_message_expiry_interval));

        Ok(Mqtt5Publish {
            topic,
            qos: flags.qos.into(),
            retain: flags.retain,
            dup: flags.dup,
            packet_identifier,
            payload,
            payload_format_indicator: properties.payload_format_indicator.map(Into::into),
            content_type: properties.content_type,
            response_topic: properties.response_topic,
            correlation_data: properties.correlation_data,
            message_expiry_interval,
            user_properties: properties.user_properties,
            is_new_topic_alias,
            broker_id: self.broker_id.clone(),
        })
    }

    /// Implements the topic-name / topic-alias decision matrix.
    ///
    /// The global limiter's usage counters are mutated before the
    /// exceedance check, and are not rolled back if the check fails — the
    /// alias slot stays bound, the client is disconnected, and connection
    /// teardown is what eventually releases the usage.
    fn resolve_topic(
        &self,
        conn: &mut dyn Connection,
        topic_name: Option<String>,
        topic_alias: Option<u16>,
    ) -> Result<(String, bool), DecodeFailure> {
        let table = conn.topic_alias_table();

        match (topic_name, topic_alias) {
            (None, None) => Err(DecodeFailure::Protocol(
                "absent topic alias while topic name is zero length".to_string(),
            )),
            (None, Some(alias)) => {
                if !table.in_range(alias) {
                    return Err(DecodeFailure::AliasInvalid(
                        "topic alias exceeds the negotiated table size".to_string(),
                    ));
                }
                table
                    .get(alias)
                    .map(|topic| (topic.to_string(), false))
                    .ok_or_else(|| {
                        DecodeFailure::AliasInvalid("topic alias has no mapping yet".to_string())
                    })
            }
            (Some(topic), None) => Ok((topic, false)),
            (Some(topic), Some(alias)) => {
                if !table.in_range(alias) {
                    return Err(DecodeFailure::AliasInvalid(
                        "topic alias exceeds the negotiated table size".to_string(),
                    ));
                }

                let previous = table.set(alias, topic.clone());
                if let Some(previous_topic) = previous {
                    self.alias_limiter.remove_usage(&previous_topic);
                }
                self.alias_limiter.add_usage(&topic);

                if self.alias_limiter.limit_exceeded() {
                    return Err(DecodeFailure::Quota(
                        "global topic alias byte limit exceeded".to_string(),
                    ));
                }

                Ok((topic, true))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::TopicAliasTable;

    struct FakeConnection {
        table: TopicAliasTable,
        last_disconnect: Option<disconnect::ReasonCode>,
    }

    impl FakeConnection {
        fn new(alias_table_size: u16) -> Self {
            Self {
                table: TopicAliasTable::new(alias_table_size),
                last_disconnect: None,
            }
        }
    }

    impl Connection for FakeConnection {
        fn peer_addr(&self) -> String {
            "127.0.0.1:1883".to_string()
        }

        fn topic_alias_table(&mut self) -> &mut TopicAliasTable {
            &mut self.table
        }

        fn disconnect(&mut self, reason_code: disconnect::ReasonCode, _reason_string: Option<&str>) {
            self.last_disconnect = Some(reason_code);
        }
    }

    fn empty_properties() -> Vec<u8> {
        vec![0x00]
    }

    fn decoder() -> Decoder {
        Decoder::new(
            DecoderConfig::default(),
            GlobalAliasLimiter::new(10 * 1024 * 1024),
            "broker-1".to_string(),
        )
    }

    fn string_field(s: &str) -> Vec<u8> {
        let mut buf = (s.len() as u16).to_be_bytes().to_vec();
        buf.extend_from_slice(s.as_bytes());
        buf
    }

    #[test]
    fn s1_qos0_publish_with_empty_payload() {
        let mut bytes = string_field("test");
        bytes.extend(empty_properties());

        let mut conn = FakeConnection::new(0);
        let publish = decoder().decode(&mut conn, 0b0011_0000, &bytes).unwrap();
        assert_eq!(publish.topic, "test");
        assert_eq!(publish.qos, QosLevel::AtMostOnce);
        assert!(publish.payload.is_empty());
        assert!(conn.last_disconnect.is_none());
    }

    #[test]
    fn s2_qos1_publish_carries_packet_identifier() {
        let mut bytes = string_field("test");
        bytes.extend_from_slice(&42u16.to_be_bytes());
        bytes.extend(empty_properties());

        let mut conn = FakeConnection::new(0);
        let publish = decoder().decode(&mut conn, 0b0011_0010, &bytes).unwrap();
        assert_eq!(publish.qos, QosLevel::AtLeastOnce);
        assert_eq!(publish.packet_identifier, 42);
    }

    #[test]
    fn s3_zero_topic_alias_is_rejected() {
        let mut bytes = string_field("test");
        let mut props = vec![0x23, 0x00, 0x00];
        bytes.push(props.len() as u8);
        bytes.append(&mut props);

        let mut conn = FakeConnection::new(0);
        let publish = decoder().decode(&mut conn, 0b0011_0000, &bytes);
        assert!(publish.is_none());
        assert_eq!(
            conn.last_disconnect,
            Some(disconnect::ReasonCode::ProtocolError)
        );
    }

    #[test]
    fn s4_absent_topic_and_alias_is_protocol_error() {
        let mut bytes = string_field("");
        bytes.extend(empty_properties());

        let mut conn = FakeConnection::new(0);
        let publish = decoder().decode(&mut conn, 0b0011_0000, &bytes);
        assert!(publish.is_none());
        assert_eq!(
            conn.last_disconnect,
            Some(disconnect::ReasonCode::ProtocolError)
        );
    }

    #[test]
    fn s5_alias_larger_than_table_is_invalid() {
        let mut bytes = string_field("");
        let mut props = vec![0x23, 0x00, 0x05];
        bytes.push(props.len() as u8);
        bytes.append(&mut props);

        let mut conn = FakeConnection::new(3);
        let publish = decoder().decode(&mut conn, 0b0011_0000, &bytes);
        assert!(publish.is_none());
        assert_eq!(
            conn.last_disconnect,
            Some(disconnect::ReasonCode::TopicAliasInvalid)
        );
    }

    #[test]
    fn s6_bad_payload_format_indicator_value_is_malformed() {
        let mut bytes = string_field("test");
        let mut props = vec![0x01, 0x02];
        bytes.push(props.len() as u8);
        bytes.append(&mut props);

        let mut conn = FakeConnection::new(0);
        let publish = decoder().decode(&mut conn, 0b0011_0000, &bytes);
        assert!(publish.is_none());
        assert_eq!(
            conn.last_disconnect,
            Some(disconnect::ReasonCode::MalformedPacket)
        );
    }

    #[test]
    fn s7_dup_at_qos0_is_protocol_error() {
        let mut bytes = string_field("test");
        bytes.extend(empty_properties());

        let mut conn = FakeConnection::new(0);
        let publish = decoder().decode(&mut conn, 0b0011_1000, &bytes);
        assert!(publish.is_none());
        assert_eq!(
            conn.last_disconnect,
            Some(disconnect::ReasonCode::ProtocolError)
        );
    }

    #[test]
    fn s8_alias_only_resolves_against_existing_binding() {
        let mut first = string_field("a/b");
        let mut props = vec![0x23, 0x00, 0x01];
        first.push(props.len() as u8);
        first.append(&mut props);

        let mut conn = FakeConnection::new(2);
        let dec = decoder();
        let publish = dec.decode(&mut conn, 0b0011_0000, &first).unwrap();
        assert!(publish.is_new_topic_alias);

        let mut second = string_field("");
        let mut props = vec![0x23, 0x00, 0x01];
        second.push(props.len() as u8);
        second.append(&mut props);

        let publish = dec.decode(&mut conn, 0b0011_0000, &second).unwrap();
        assert_eq!(publish.topic, "a/b");
        assert!(!publish.is_new_topic_alias);
    }

    #[test]
    fn s9_rebinding_alias_swaps_limiter_usage() {
        let limiter = GlobalAliasLimiter::new(10 * 1024 * 1024);
        let dec = Decoder::new(DecoderConfig::default(), limiter.clone(), "broker-1".to_string());
        let mut conn = FakeConnection::new(2);

        let mut first = string_field("a/b");
        let mut props = vec![0x23, 0x00, 0x01];
        first.push(props.len() as u8);
        first.append(&mut props);
        dec.decode(&mut conn, 0b0011_0000, &first).unwrap();

        let mut second = string_field("c/d");
        let mut props = vec![0x23, 0x00, 0x01];
        second.push(props.len() as u8);
        second.append(&mut props);
        dec.decode(&mut conn, 0b0011_0000, &second).unwrap();

        assert_eq!(conn.table.get(1), Some("c/d"));
    }

    #[test]
    fn s10_non_utf8_payload_with_format_indicator_is_rejected() {
        let mut bytes = string_field("test");
        let mut props = vec![0x01, 0x01];
        bytes.push(props.len() as u8);
        bytes.append(&mut props);
        bytes.extend_from_slice(&[0xff, 0xfe]);

        let mut conn = FakeConnection::new(0);
        let publish = decoder().decode(&mut conn, 0b0011_0000, &bytes);
        assert!(publish.is_none());
        assert_eq!(
            conn.last_disconnect,
            Some(disconnect::ReasonCode::PayloadFormatInvalid)
        );
    }

    #[test]
    fn s11_message_expiry_interval_is_clamped() {
        let mut config = DecoderConfig::default();
        config.max_message_expiry_interval = 60;
        let dec = Decoder::new(config, GlobalAliasLimiter::new(1024), "broker-1".to_string());

        let mut bytes = string_field("test");
        let mut props = vec![0x02];
        props.extend_from_slice(&3600u32.to_be_bytes());
        bytes.push(props.len() as u8);
        bytes.append(&mut props);

        let mut conn = FakeConnection::new(0);
        let publish = dec.decode(&mut conn, 0b0011_0000, &bytes).unwrap();
        assert_eq!(publish.message_expiry_interval, Some(60));
    }

    #[test]
    fn s13_properties_length_overrun_is_malformed() {
        let mut bytes = string_field("test");
        bytes.push(10);
        bytes.push(0x01);
        bytes.push(0x01);

        let mut conn = FakeConnection::new(0);
        let publish = decoder().decode(&mut conn, 0b0011_0000, &bytes);
        assert!(publish.is_none());
        assert_eq!(
            conn.last_disconnect,
            Some(disconnect::ReasonCode::MalformedPacket)
        );
    }

    #[test]
    fn s14_subscription_identifier_from_client_is_rejected() {
        let mut bytes = string_field("test");
        let mut props = vec![0x0b, 0x01];
        bytes.push(props.len() as u8);
        bytes.append(&mut props);

        let mut conn = FakeConnection::new(0);
        let publish = decoder().decode(&mut conn, 0b0011_0000, &bytes);
        assert!(publish.is_none());
        assert_eq!(
            conn.last_disconnect,
            Some(disconnect::ReasonCode::ProtocolError)
        );
    }
}
