// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;

/// PUBLISH-decoder configuration, embedded as one section of the broker's
/// overall configuration file. Each field carries its own default so the
/// surrounding file doesn't need to specify every field explicitly.
#[derive(Debug, Clone, Deserialize)]
pub struct DecoderConfig {
    /// Ceiling applied to the `Message Expiry Interval` property; values
    /// above this are silently clamped rather than rejected.
    #[serde(default = "DecoderConfig::default_max_message_expiry_interval")]
    pub max_message_expiry_interval: u32,

    /// Whether a `Payload Format Indicator` of `Utf8` triggers a UTF-8
    /// well-formedness check of the payload bytes.
    #[serde(default = "DecoderConfig::default_validate_payload_format")]
    pub validate_payload_format: bool,

    /// Hard cap, in bytes, on the serialized size of a PUBLISH's user
    /// properties taken together.
    #[serde(default = "DecoderConfig::default_max_user_properties_length")]
    pub max_user_properties_length: usize,

    /// Whether DISCONNECT packets emitted by this decoder include a
    /// human-readable reason string alongside the reason code.
    #[serde(default = "DecoderConfig::default_reason_strings_enabled")]
    pub reason_strings_enabled: bool,
}

impl DecoderConfig {
    #[must_use]
    pub const fn default_max_message_expiry_interval() -> u32 {
        4_294_967_295
    }

    #[must_use]
    pub const fn default_validate_payload_format() -> bool {
        true
    }

    #[must_use]
    pub const fn default_max_user_properties_length() -> usize {
        64 * 1024
    }

    #[must_use]
    pub const fn default_reason_strings_enabled() -> bool {
        true
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_message_expiry_interval: Self::default_max_message_expiry_interval(),
            validate_payload_format: Self::default_validate_payload_format(),
            max_user_properties_length: Self::default_max_user_properties_length(),
            reason_strings_enabled: Self::default_reason_strings_enabled(),
        }
    }
}
