use std::sync::OnceLock;

use llmgate_provider_core::{ProviderError, ProviderResult};

static CLIENT: OnceLock<wreq::Client> = OnceLock::new();

/// The gateway shares one outbound client across providers. wreq pools
/// connections per host internally, so there is no benefit to per-provider
/// clients and every saved socket/TLS-session is shared across attempts.
pub fn shared_client() -> ProviderResult<wreq::Client> {
    if let Some(client) = CLIENT.get() {
        return Ok(client.clone());
    }
    let client = wreq::Client::builder()
        .build()
        .map_err(|err| ProviderError::Other(err.to_string()))?;
    Ok(CLIENT.get_or_init(|| client).clone())
}
