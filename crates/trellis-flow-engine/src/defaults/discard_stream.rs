//! Stream sink that drops every token.

use async_trait::async_trait;

use crate::traits::StreamSink;

/// Discards all streamed tokens.
///
/// The default when no real transport is wired in, so nodes can stream
/// unconditionally.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardStreamSink;

#[async_trait]
impl StreamSink for DiscardStreamSink {
    async fn stream_token(&self, _chat_id: &str, _token: &str) {}
}
