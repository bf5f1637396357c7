//! Queue consumption loop (spec.md §4.4 "Queue contract"): pull with a blocking 1s
//! timeout, skip unknown/undecodable messages, sleep 1s and continue on handler
//! failure. At-least-once; handlers must be idempotent (spec.md §5, §9).

use std::time::Duration;

use kv::Store;

use crate::messages::IntentMessage;

const POP_TIMEOUT: Duration = Duration::from_secs(1);
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandleError(pub String);

#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: IntentMessage) -> Result<(), HandleError>;
}

/// Drains `queue_name` until `cancel` fires. Decode errors are logged and skipped
/// (spec.md §7 "Queue decode error"); handler errors sleep [`RETRY_BACKOFF`] and
/// continue rather than requeuing (the message is not requeued by the handler itself,
/// per spec.md §4.4).
pub async fn run_consumer(
    store: &Store,
    queue_name: &str,
    handler: &dyn MessageHandler,
    cancel: &tokio_util::sync::CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let popped = tokio::select! {
            result = store.blpop_one(queue_name, POP_TIMEOUT) => result,
            _ = cancel.cancelled() => return,
        };

        let raw = match popped {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("queue pop failed: {e}");
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }
        };

        let message: IntentMessage = match serde_json::from_str(&raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("discarding undecodable queue message: {e}");
                continue;
            }
        };

        let kind = message.kind();
        if let Err(e) = handler.handle(message).await {
            tracing::warn!("handler failed for {kind} message: {e}");
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ServiceKey, Replicas};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait::async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _message: IntentMessage) -> Result<(), HandleError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(HandleError("synthetic failure".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn control_service_message_decodes() {
        let msg = IntentMessage::ControlService {
            key: ServiceKey { organization_id: "o".into(), project_id: "p".into(), service_id: "s".into() },
            replicas: Replicas::Down,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let decoded: IntentMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.kind(), "control-service");
    }

    #[tokio::test]
    async fn handler_is_invoked_for_decoded_messages() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler { calls: calls.clone(), fail_first: false };
        let msg = IntentMessage::DeleteOrganization { organization_id: "org".into() };
        handler.handle(msg).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
