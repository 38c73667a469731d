//! `select_path` — the single decision function for whether a request
//! takes the passthrough fast path or the canonicalizing adapter path.
//! Every layer that cares (handler, validator, model catalog) asks here
//! instead of re-deriving the answer.

use relaygate_core::schema::ClientFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Path {
    Passthrough,
    Adapter,
}

/// `client_format` is the wire format the inbound request declared (by
/// which endpoint it hit). `provider_name` is the upstream the router
/// picked. `canonical_mode` is the `CANONICAL_MODE=1` debug override that
/// forces the adapter path even where passthrough would normally apply, so
/// the two outputs can be diffed.
pub fn select_path(client_format: ClientFormat, provider_name: &str, canonical_mode: bool) -> Path {
    if canonical_mode {
        return Path::Adapter;
    }

    let passthrough = match client_format {
        ClientFormat::AnthropicMessages => provider_name == "anthropic" || provider_name == "xai",
        ClientFormat::OpenAiResponses => provider_name == "openai",
        ClientFormat::OpenAiChat => false,
    };

    if passthrough {
        Path::Passthrough
    } else {
        Path::Adapter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_client_to_anthropic_provider_is_passthrough() {
        assert_eq!(
            select_path(ClientFormat::AnthropicMessages, "anthropic", false),
            Path::Passthrough
        );
    }

    #[test]
    fn anthropic_client_to_xai_provider_is_passthrough() {
        assert_eq!(
            select_path(ClientFormat::AnthropicMessages, "xai", false),
            Path::Passthrough
        );
    }

    #[test]
    fn anthropic_client_to_openai_provider_is_adapter() {
        assert_eq!(
            select_path(ClientFormat::AnthropicMessages, "openai", false),
            Path::Adapter
        );
    }

    #[test]
    fn openai_responses_client_to_openai_provider_is_passthrough() {
        assert_eq!(
            select_path(ClientFormat::OpenAiResponses, "openai", false),
            Path::Passthrough
        );
    }

    #[test]
    fn openai_responses_client_to_anthropic_provider_is_adapter() {
        assert_eq!(
            select_path(ClientFormat::OpenAiResponses, "anthropic", false),
            Path::Adapter
        );
    }

    #[test]
    fn openai_chat_client_is_always_adapter() {
        assert_eq!(
            select_path(ClientFormat::OpenAiChat, "openai", false),
            Path::Adapter
        );
        assert_eq!(
            select_path(ClientFormat::OpenAiChat, "anthropic", false),
            Path::Adapter
        );
    }

    #[test]
    fn canonical_mode_forces_adapter_path_even_for_native_pairs() {
        assert_eq!(
            select_path(ClientFormat::AnthropicMessages, "anthropic", true),
            Path::Adapter
        );
        assert_eq!(
            select_path(ClientFormat::OpenAiResponses, "openai", true),
            Path::Adapter
        );
    }
}
