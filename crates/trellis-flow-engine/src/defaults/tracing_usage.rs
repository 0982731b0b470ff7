//! Usage sink that logs reports instead of persisting them.

use async_trait::async_trait;

use crate::errors::UsageSinkError;
use crate::traits::UsageSink;
use crate::types::execution::UsageReport;

/// Emits every usage report as a `tracing` debug event.
///
/// The default when no billing backend is wired in. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, report: UsageReport) -> Result<(), UsageSinkError> {
        tracing::debug!(
            request_id = %report.request_id,
            execution_id = %report.execution_id,
            provider = %report.provider,
            model = %report.model,
            prompt_tokens = report.prompt_tokens,
            completion_tokens = report.completion_tokens,
            total_tokens = report.total_tokens,
            processing_time_ms = report.processing_time_ms,
            success = report.success,
            "usage recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::execution::UsageReport;

    #[tokio::test]
    async fn test_record_always_succeeds() {
        let sink = TracingUsageSink;
        let report = UsageReport {
            request_id: "r".into(),
            execution_id: "e".into(),
            org_id: "o".into(),
            user_id: "u".into(),
            provider: "openai".into(),
            model: "gpt-4o".into(),
            prompt_tokens: 1,
            completion_tokens: 2,
            total_tokens: 3,
            processing_time_ms: 4,
            success: true,
        };
        sink.record(report).await.unwrap();
    }
}
