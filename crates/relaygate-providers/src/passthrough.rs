//! The passthrough tee: when `select_path` picks `Path::Passthrough`, the
//! gateway forwards the upstream's native wire bytes to the client
//! unchanged while still needing to record usage/cost. The sniffer here
//! consumes the same byte sequence on the side — SSE-decoding it and
//! folding every event through the provider-native `StreamProcessor` — to
//! recover the terminal `Usage` for the ledger without touching what the
//! client receives.

use relaygate_adapters::StreamProcessor;
use relaygate_core::schema::Usage;
use relaygate_core::stream::StreamEventKind;
use serde_json::Value;
use tracing::warn;

use crate::streaming::SseDecoder;

/// Fold one raw provider event through `processor`, returning the usage it
/// carried (if any) without consuming or altering `raw_event` — the caller
/// still forwards the original bytes to the client verbatim.
pub fn sniff_usage<P: StreamProcessor>(processor: &mut P, raw_event: &Value) -> Option<Usage> {
    let events = processor.process(raw_event).ok()?;
    events.into_iter().find_map(|e| match e.kind {
        StreamEventKind::Usage { usage } => Some(usage),
        StreamEventKind::MessageDelta { usage, .. } => Some(usage),
        _ => None,
    })
}

/// Accumulates the last-seen usage across a whole passthrough stream —
/// some providers (Anthropic) split input/output tokens across
/// `message_start` and `message_delta`, so later sightings win rather than
/// the first.
#[derive(Default)]
pub struct UsageAccumulator {
    latest: Option<Usage>,
}

impl UsageAccumulator {
    pub fn observe(&mut self, usage: Usage) {
        self.latest = Some(usage);
    }

    pub fn finish(self) -> Option<Usage> {
        self.latest
    }
}

/// One passthrough stream's side-channel analyzer: feed it every byte
/// chunk *after* that chunk has been enqueued to the client, and collect
/// the terminal usage once the stream ends. Failures inside the sniffer
/// are logged and swallowed — the forwarded byte stream is never blocked,
/// reordered, or modified on its account.
pub struct PassthroughSniffer {
    decoder: SseDecoder,
    processor: Box<dyn StreamProcessor>,
    accumulator: UsageAccumulator,
}

impl PassthroughSniffer {
    /// `processor` must match the *provider's* native stream format — which,
    /// for a passthrough pair, is also the client's declared format.
    pub fn new(processor: Box<dyn StreamProcessor>) -> Self {
        Self {
            decoder: SseDecoder::new(),
            processor,
            accumulator: UsageAccumulator::default(),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        for event in self.decoder.push(chunk) {
            if event.as_str() == Some("[DONE]") {
                continue;
            }
            match self.processor.process(&event) {
                Ok(events) => {
                    for e in events {
                        match e.kind {
                            StreamEventKind::Usage { usage }
                            | StreamEventKind::MessageDelta { usage, .. } => {
                                self.accumulator.observe(usage)
                            }
                            _ => {}
                        }
                    }
                }
                Err(e) => warn!(error = %e, "usage sniffer failed on a stream event"),
            }
        }
    }

    pub fn finish(self) -> Option<Usage> {
        self.accumulator.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaygate_adapters::anthropic::AnthropicStreamProcessor;
    use relaygate_adapters::openai_responses::OpenAiResponsesStreamProcessor;
    use serde_json::json;

    #[test]
    fn sniffs_usage_without_consuming_the_event_for_forwarding() {
        let mut processor = AnthropicStreamProcessor::default();
        let mut acc = UsageAccumulator::default();

        let start = json!({
            "type": "message_start",
            "message": {"id": "msg_1", "model": "claude-sonnet-4", "usage": {"input_tokens": 10}},
        });
        assert!(sniff_usage(&mut processor, &start).is_none());

        let delta = json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn"},
            "usage": {"output_tokens": 7},
        });
        if let Some(usage) = sniff_usage(&mut processor, &delta) {
            acc.observe(usage);
        }

        // The raw event itself is untouched — still has its original shape
        // for forwarding to the client.
        assert_eq!(delta["type"], "message_delta");

        let usage = acc.finish().unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 7);
    }

    #[test]
    fn s6_anthropic_transcript_yields_exactly_the_terminal_usage() {
        let mut sniffer = PassthroughSniffer::new(Box::new(AnthropicStreamProcessor::default()));

        let transcript = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-sonnet-4\",\"usage\":{\"input_tokens\":100,\"cache_read_input_tokens\":20}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":42}}\n\n",
        );
        // Feed in awkwardly-split chunks, the way a socket would deliver them.
        let bytes = transcript.as_bytes();
        let mid = bytes.len() / 2;
        sniffer.feed(&bytes[..mid]);
        sniffer.feed(&bytes[mid..]);

        let usage = sniffer.finish().unwrap();
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.cached_tokens, 20);
        assert_eq!(usage.output_tokens, 42);
    }

    #[test]
    fn openai_responses_completed_event_is_sniffed_from_bytes() {
        let mut sniffer = PassthroughSniffer::new(Box::new(OpenAiResponsesStreamProcessor::default()));
        sniffer.feed(
            b"data: {\"type\":\"response.output_text.delta\",\"delta\":\"hi\"}\n\n\
              data: {\"type\":\"response.completed\",\"response\":{\"usage\":{\"input_tokens\":50,\"input_tokens_details\":{\"cached_tokens\":10},\"output_tokens\":9}}}\n\n",
        );
        let usage = sniffer.finish().unwrap();
        assert_eq!(usage.input_tokens, 40);
        assert_eq!(usage.cached_tokens, 10);
        assert_eq!(usage.output_tokens, 9);
    }

    #[test]
    fn garbage_bytes_never_panic_the_sniffer() {
        let mut sniffer = PassthroughSniffer::new(Box::new(AnthropicStreamProcessor::default()));
        sniffer.feed(b"data: not json at all\n\n\xff\xfe\n");
        assert!(sniffer.finish().is_none());
    }
}
