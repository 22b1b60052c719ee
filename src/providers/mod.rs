//! Provider-side media APIs, one client per provider that exposes one.
//!
//! The provider set is closed (see [`crate::domain::ProviderName`]); a
//! channel's credentials enum decides at compile time which client shape
//! exists, so there is no stringly-typed runtime registry.

pub mod waba;

use crate::domain::{Channel, ChannelCredentials};
use crate::error::{PipelineError, Result};
use std::time::Duration;

pub use waba::{MediaInfo, WabaMediaClient};

/// Timeout applied to every provider media call.
pub const MEDIA_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the WABA media client for a channel, or fail if the channel is
/// bound to a provider without a media-info API.
pub fn waba_client_for(http: &reqwest::Client, channel: &Channel) -> Result<WabaMediaClient> {
    match &channel.credentials {
        ChannelCredentials::Waba {
            access_token,
            phone_number_id,
            version,
            ..
        } => Ok(WabaMediaClient::new(
            http.clone(),
            access_token.clone(),
            phone_number_id.clone(),
            version.clone(),
        )),
        ChannelCredentials::Wapi { .. } => Err(PipelineError::Validation(format!(
            "channel '{}' has no media-info API (wapi payloads carry direct URLs)",
            channel.platform_id
        ))),
    }
}
