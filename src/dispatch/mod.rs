use std::sync::Arc;
use tokio::sync::watch;

use crate::backend::{BackendAdapter, KycBackend};
use crate::codec;
use crate::messaging::{InboundRecord, RequestSource, ResponseSink, SourceError};
use crate::metrics::Metrics;
use crate::models::ResultStatus;

// ============================================================================
// Dispatch Loop
// ============================================================================
//
// Idle       -> waiting on the next poll (or the shutdown signal)
// Processing -> decode -> execute -> encode -> publish
//
// One message is handled to completion before the next poll, so at most one
// request is in flight and its correlation id never needs a lookup table.
// Shutdown is only observed while Idle: an issued backend call and its
// publish always finish first.
//
// Messages are lost in two places only, both logged and counted:
// - the body cannot be decoded (no trustworthy correlation id to answer to)
// - the response cannot be published (no redelivery is attempted)
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Processing,
}

/// Why a consumed message ended without a published response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Decode,
    Encode,
    Publish,
}

impl DropReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            DropReason::Decode => "decode",
            DropReason::Encode => "encode",
            DropReason::Publish => "publish",
        }
    }
}

/// What happened to one consumed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Published(ResultStatus),
    Dropped(DropReason),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("request source closed: {0}")]
    SourceClosed(#[source] SourceError),
}

pub struct Dispatcher<S, P, B> {
    source: S,
    sink: P,
    adapter: BackendAdapter<B>,
    metrics: Arc<Metrics>,
    state: DispatchState,
}

impl<S, P, B> Dispatcher<S, P, B>
where
    S: RequestSource,
    P: ResponseSink,
    B: KycBackend,
{
    pub fn new(source: S, sink: P, adapter: BackendAdapter<B>, metrics: Arc<Metrics>) -> Self {
        Self {
            source,
            sink,
            adapter,
            metrics,
            state: DispatchState::Idle,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Consume the sink back, e.g. to flush it after the loop returns.
    pub fn into_sink(self) -> P {
        self.sink
    }

    /// Run until shutdown is signalled or the source fails fatally.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), DispatchError> {
        tracing::info!("Dispatch loop started");

        loop {
            if *shutdown.borrow() {
                tracing::info!("Shutdown requested, leaving dispatch loop");
                return Ok(());
            }

            let polled = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        tracing::info!("Shutdown sender dropped, leaving dispatch loop");
                        return Ok(());
                    }
                    continue;
                }
                polled = self.source.next_record() => polled,
            };

            match polled {
                Ok(Some(record)) => {
                    self.state = DispatchState::Processing;
                    self.handle_record(record).await;
                    self.state = DispatchState::Idle;
                }
                Ok(None) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Request source closed, stopping dispatch loop");
                    return Err(DispatchError::SourceClosed(e));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Poll failed, retrying on next cycle");
                }
            }
        }
    }

    /// Take one message through decode, execute, encode and publish.
    pub async fn handle_record(&self, record: InboundRecord) -> RecordOutcome {
        let request = match codec::decode(record.payload.as_deref(), record.correlation_header.as_deref()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Dropping undecodable message, no response will be sent"
                );
                return self.dropped(DropReason::Decode);
            }
        };

        self.metrics.record_received(request.kind.metric_label());
        tracing::debug!(
            correlation_id = %request.correlation_id,
            operation = %request.kind,
            client_id = %request.subject_id,
            offset = record.offset,
            "Processing request"
        );

        let result = self.adapter.execute(&request).await;

        let envelope = match codec::encode(&result, &request.correlation_id) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    correlation_id = %request.correlation_id,
                    error = %e,
                    "Failed to encode response, response lost"
                );
                return self.dropped(DropReason::Encode);
            }
        };

        if let Err(e) = self.sink.publish(&envelope).await {
            tracing::error!(
                correlation_id = %request.correlation_id,
                error = %e,
                "Failed to publish response, response lost"
            );
            return self.dropped(DropReason::Publish);
        }

        let status = result.status();
        self.metrics.record_published(status.as_str());
        tracing::info!(
            correlation_id = %request.correlation_id,
            operation = %request.kind,
            status = status.as_str(),
            "Response published"
        );

        RecordOutcome::Published(status)
    }

    fn dropped(&self, reason: DropReason) -> RecordOutcome {
        self.metrics.record_dropped(reason.as_label());
        RecordOutcome::Dropped(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::backend::memory::InMemoryKyc;
    use crate::backend::BackendError;
    use crate::codec::{CorrelationEnvelope, CORRELATION_HEADER};
    use crate::messaging::PublishError;
    use crate::models::{OutboundMessage, UserData};

    /// Replays queued polls, then reports the consumer as closed.
    struct ScriptedSource {
        polls: VecDeque<Result<Option<InboundRecord>, SourceError>>,
    }

    impl ScriptedSource {
        fn new(polls: impl IntoIterator<Item = Result<Option<InboundRecord>, SourceError>>) -> Self {
            Self {
                polls: polls.into_iter().collect(),
            }
        }

        fn of_bodies(bodies: &[&str]) -> Self {
            Self::new(bodies.iter().enumerate().map(|(offset, body)| Ok(Some(record(body, offset as i64)))))
        }
    }

    #[async_trait]
    impl RequestSource for ScriptedSource {
        async fn next_record(&mut self) -> Result<Option<InboundRecord>, SourceError> {
            self.polls
                .pop_front()
                .unwrap_or_else(|| Err(SourceError::Closed("drained".to_string())))
        }
    }

    /// A source that never yields, like an idle topic.
    struct IdleSource;

    #[async_trait]
    impl RequestSource for IdleSource {
        async fn next_record(&mut self) -> Result<Option<InboundRecord>, SourceError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(None)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        published: Arc<Mutex<Vec<CorrelationEnvelope>>>,
        fail_first: Arc<Mutex<usize>>,
    }

    impl RecordingSink {
        fn failing_first(n: usize) -> Self {
            let sink = Self::default();
            *sink.fail_first.lock().unwrap() = n;
            sink
        }

        fn published(&self) -> Vec<CorrelationEnvelope> {
            self.published.lock().unwrap().clone()
        }

        fn bodies(&self) -> Vec<OutboundMessage> {
            self.published()
                .iter()
                .map(|e| serde_json::from_slice(&e.value).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl ResponseSink for RecordingSink {
        async fn publish(&self, envelope: &CorrelationEnvelope) -> Result<(), PublishError> {
            {
                let mut remaining = self.fail_first.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PublishError::Delivery {
                        topic: "Output".to_string(),
                        reason: "broker unavailable".to_string(),
                    });
                }
            }
            self.published.lock().unwrap().push(envelope.clone());
            Ok(())
        }
    }

    fn record(body: &str, offset: i64) -> InboundRecord {
        InboundRecord {
            topic: "Income".to_string(),
            partition: 0,
            offset,
            payload: Some(body.as_bytes().to_vec()),
            correlation_header: None,
        }
    }

    fn kyc_store() -> InMemoryKyc {
        InMemoryKyc::with_users([
            UserData {
                status: "Approved".into(),
                ..UserData::new("clientA123", 0.15)
            },
            UserData::new("clientX", 0.9),
        ])
    }

    fn dispatcher<S: RequestSource>(
        source: S,
        sink: RecordingSink,
        backend: InMemoryKyc,
    ) -> (Dispatcher<S, RecordingSink, InMemoryKyc>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new().unwrap());
        let adapter = BackendAdapter::new(backend, metrics.clone());
        (Dispatcher::new(source, sink, adapter, metrics.clone()), metrics)
    }

    async fn run_to_drain(source: ScriptedSource, sink: RecordingSink, backend: InMemoryKyc) -> Arc<Metrics> {
        let (mut dispatcher, metrics) = dispatcher(source, sink, backend);
        let (_tx, rx) = watch::channel(false);
        let err = dispatcher.run(rx).await.unwrap_err();
        assert!(matches!(err, DispatchError::SourceClosed(_)));
        metrics
    }

    #[tokio::test]
    async fn test_read_existing_client_is_answered_with_correlation() {
        let sink = RecordingSink::default();
        let source = ScriptedSource::of_bodies(&[r#"{"type":"READ","correlationId":"c1","clientId":"clientA123"}"#]);

        run_to_drain(source, sink.clone(), kyc_store()).await;

        let published = sink.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].correlation_id, "c1");
        assert_eq!(published[0].key, "clientA123");
        assert_eq!(
            sink.bodies()[0],
            OutboundMessage {
                client_id: "clientA123".to_string(),
                risk: 0.15,
                status: ResultStatus::Success,
                message: "User data retrieved".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_read_unknown_client_is_error_response() {
        let sink = RecordingSink::default();
        let source = ScriptedSource::of_bodies(&[r#"{"type":"READ","correlationId":"c2","clientId":"ghost"}"#]);

        run_to_drain(source, sink.clone(), kyc_store()).await;

        let body = &sink.bodies()[0];
        assert_eq!(body.status, ResultStatus::Error);
        assert!(body.message.contains("not found"));
        assert_eq!(sink.published()[0].correlation_id, "c2");
    }

    #[tokio::test]
    async fn test_delete_success_carries_no_payload() {
        let sink = RecordingSink::default();
        let backend = kyc_store();
        let source = ScriptedSource::of_bodies(&[r#"{"type":"DELETE","correlationId":"c3","clientId":"clientX"}"#]);

        run_to_drain(source, sink.clone(), backend.clone()).await;

        let body = &sink.bodies()[0];
        assert_eq!(body.status, ResultStatus::Success);
        assert_eq!(body.message, "User deleted");
        assert_eq!(body.risk, 0.0);
        assert!(!backend.contains("clientX"));
    }

    #[tokio::test]
    async fn test_backend_timeout_answers_and_loop_continues() {
        let sink = RecordingSink::default();
        let backend = kyc_store();
        backend.fail_next(BackendError::Timeout(Duration::from_secs(10)));
        let source = ScriptedSource::of_bodies(&[
            r#"{"type":"READ","correlationId":"slow","clientId":"clientA123"}"#,
            r#"{"type":"READ","correlationId":"next","clientId":"clientA123"}"#,
        ]);

        run_to_drain(source, sink.clone(), backend).await;

        let published = sink.published();
        let bodies = sink.bodies();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].correlation_id, "slow");
        assert_eq!(bodies[0].status, ResultStatus::Error);
        assert!(bodies[0].message.contains("timed out"));
        assert_eq!(published[1].correlation_id, "next");
        assert_eq!(bodies[1].status, ResultStatus::Success);
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped_and_loop_continues() {
        let sink = RecordingSink::default();
        let source = ScriptedSource::of_bodies(&[
            "{not json",
            r#"{"type":"READ","correlationId":"c1","clientId":"clientA123"}"#,
        ]);

        let metrics = run_to_drain(source, sink.clone(), kyc_store()).await;

        let published = sink.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].correlation_id, "c1");
        assert_eq!(metrics.messages_dropped.with_label_values(&["decode"]).get(), 1);
    }

    #[tokio::test]
    async fn test_unknown_operation_never_reaches_backend() {
        let sink = RecordingSink::default();
        let backend = kyc_store();
        let source = ScriptedSource::of_bodies(&[r#"{"type":"PURGE","correlationId":"c9","clientId":"clientA123"}"#]);

        run_to_drain(source, sink.clone(), backend.clone()).await;

        assert_eq!(backend.calls(), 0);
        let body = &sink.bodies()[0];
        assert_eq!(body.status, ResultStatus::Error);
        assert!(body.message.contains("PURGE"));
        assert_eq!(sink.published()[0].correlation_id, "c9");
    }

    #[tokio::test]
    async fn test_header_correlation_used_when_body_has_none() {
        let sink = RecordingSink::default();
        let (dispatcher, _) = dispatcher(ScriptedSource::new([]), sink.clone(), kyc_store());

        let mut inbound = record(r#"{"type":"READ","clientId":"clientA123"}"#, 0);
        inbound.correlation_header = Some("from-header".to_string());

        let outcome = dispatcher.handle_record(inbound).await;

        assert_eq!(outcome, RecordOutcome::Published(ResultStatus::Success));
        assert_eq!(sink.published()[0].correlation_id, "from-header");
        // The correlation id travels beside the body, not inside it.
        let raw = String::from_utf8(sink.published()[0].value.clone()).unwrap();
        assert!(!raw.contains(CORRELATION_HEADER));
    }

    #[tokio::test]
    async fn test_publish_failure_loses_response_but_not_the_loop() {
        let sink = RecordingSink::failing_first(1);
        let source = ScriptedSource::of_bodies(&[
            r#"{"type":"READ","correlationId":"lost","clientId":"clientA123"}"#,
            r#"{"type":"READ","correlationId":"kept","clientId":"clientA123"}"#,
        ]);

        let metrics = run_to_drain(source, sink.clone(), kyc_store()).await;

        let published = sink.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].correlation_id, "kept");
        assert_eq!(metrics.messages_dropped.with_label_values(&["publish"]).get(), 1);
        assert_eq!(metrics.responses_published.with_label_values(&["Success"]).get(), 1);
    }

    #[tokio::test]
    async fn test_transient_poll_errors_and_empty_polls_are_skipped() {
        let sink = RecordingSink::default();
        let source = ScriptedSource::new([
            Ok(None),
            Err(SourceError::Transient("broker transport failure".to_string())),
            Ok(Some(record(r#"{"type":"READ","correlationId":"c1","clientId":"clientA123"}"#, 7))),
        ]);

        run_to_drain(source, sink.clone(), kyc_store()).await;

        assert_eq!(sink.published().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loop() {
        let (mut dispatcher, _) = dispatcher(IdleSource, RecordingSink::default(), kyc_store());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let outcome = dispatcher.run(rx).await;
            (outcome, dispatcher.state())
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let (outcome, state) = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_ok());
        assert_eq!(state, DispatchState::Idle);
    }
}
