//! Ollama transport. Ollama exposes an OpenAI-compatible
//! `/v1/chat/completions` route alongside its native `/api/chat`, and
//! `relaygate_adapters::openai_chat` already speaks the former — so this
//! client is a thin, unauthenticated specialization of
//! `OpenAiCompatibleClient` rather than a second wire format.

use crate::openai::OpenAiCompatibleClient;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434/v1";

pub fn ollama_client(base_url: Option<&str>) -> OpenAiCompatibleClient {
    OpenAiCompatibleClient::ollama(base_url.unwrap_or(DEFAULT_OLLAMA_URL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ProviderClient;

    #[test]
    fn defaults_to_local_ollama_address() {
        let client = ollama_client(None);
        assert_eq!(client.name(), "ollama");
    }
}
