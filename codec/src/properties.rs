// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use crate::{ByteReader, DecodeError};

/// Declared value of the Payload Format Indicator property (0x01).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Unspecified,
    Utf8,
}

/// Properties recognized on an inbound PUBLISH, accumulated directly into
/// their final shape as the properties loop runs.
///
/// Building the final struct in place — rather than collecting an
/// intermediate list of property values and validating it in a second pass
/// — means the "at most once" check is just "is this field already
/// `Some`" at the point of assignment, and there is no second pass to
/// forget to write.
#[derive(Debug, Clone, Default)]
pub struct PublishProperties {
    pub payload_format_indicator: Option<PayloadFormat>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub topic_alias: Option<u16>,
    pub user_properties: Vec<(String, String)>,
}

const PAYLOAD_FORMAT_INDICATOR: u8 = 0x01;
const MESSAGE_EXPIRY_INTERVAL: u8 = 0x02;
const CONTENT_TYPE: u8 = 0x03;
const RESPONSE_TOPIC: u8 = 0x08;
const CORRELATION_DATA: u8 = 0x09;
const SUBSCRIPTION_IDENTIFIER: u8 = 0x0b;
const TOPIC_ALIAS: u8 = 0x23;
const USER_PROPERTY: u8 = 0x26;

impl PublishProperties {
    /// Reads the properties length prefix, then decodes properties from a
    /// sub-reader bounded to exactly that many bytes. Looping "while the
    /// sub-reader has bytes left" makes the "declared length must equal
    /// bytes consumed" invariant a consequence of the sub-reader's own
    /// bounds: any property whose payload would read past the boundary
    /// fails the same underrun check `ByteReader` already performs.
    pub fn decode(reader: &mut ByteReader) -> Result<Self, DecodeError> {
        let properties_length = reader.read_vbi()? as usize;
        let mut sub = reader.sub_reader(properties_length)?;
        let mut props = Self::default();

        while sub.remaining() > 0 {
            let id = sub.read_u8()?;
            match id {
                PAYLOAD_FORMAT_INDICATOR => {
                    if props.payload_format_indicator.is_some() {
                        return Err(DecodeError::protocol(
                            "payload format indicator present more than once",
                        ));
                    }
                    let value = sub.read_u8()?;
                    props.payload_format_indicator = Some(match value {
                        0 => PayloadFormat::Unspecified,
                        1 => PayloadFormat::Utf8,
                        _ => {
                            return Err(DecodeError::malformed(
                                "payload format indicator must be 0 or 1",
                            ))
                        }
                    });
                }
                MESSAGE_EXPIRY_INTERVAL => {
                    if props.message_expiry_interval.is_some() {
                        return Err(DecodeError::protocol(
                            "message expiry interval present more than once",
                        ));
                    }
                    props.message_expiry_interval = Some(sub.read_u32()?);
                }
                CONTENT_TYPE => {
                    if props.content_type.is_some() {
                        return Err(DecodeError::protocol("content type present more than once"));
                    }
                    props.content_type = Some(sub.read_string()?);
                }
                RESPONSE_TOPIC => {
                    if props.response_topic.is_some() {
                        return Err(DecodeError::protocol(
                            "response topic present more than once",
                        ));
                    }
                    let topic = sub.read_string()?;
                    crate::topic::validate_topic_name(&topic)?;
                    props.response_topic = Some(topic);
                }
                CORRELATION_DATA => {
                    if props.correlation_data.is_some() {
                        return Err(DecodeError::protocol(
                            "correlation data present more than once",
                        ));
                    }
                    props.correlation_data = Some(sub.read_binary()?.to_vec());
                }
                SUBSCRIPTION_IDENTIFIER => {
                    return Err(DecodeError::protocol(
                        "subscription identifier is not valid on a client PUBLISH",
                    ));
                }
                TOPIC_ALIAS => {
                    if props.topic_alias.is_some() {
                        return Err(DecodeError::protocol("topic alias present more than once"));
                    }
                    let alias = sub.read_u16()?;
                    if alias == 0 {
                        return Err(DecodeError::protocol("topic alias must not be zero"));
                    }
                    props.topic_alias = Some(alias);
                }
                USER_PROPERTY => {
                    let key = sub.read_string()?;
                    let value = sub.read_string()?;
                    props.user_properties.push((key, value));
                }
                other => {
                    return Err(DecodeError::malformed(format!(
                        "unrecognized property identifier 0x{other:02x}"
                    )));
                }
            }
        }

        Ok(props)
    }
}
