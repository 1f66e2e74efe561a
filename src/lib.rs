// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

pub mod alias;
pub mod config;
pub mod disconnect;
pub mod publish;

pub use alias::{GlobalAliasLimiter, TopicAliasTable};
pub use config::DecoderConfig;
pub use disconnect::{Connection, DecodeFailure, ReasonCode};
pub use publish::{Decoder, Mqtt5Publish, PayloadFormatTag, QosLevel};
