use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::{
    error::{Error, Result},
    schema::{LoggingLevel, RequestId, ServerNotification},
};

/// Context handed to `ServerConn` methods for talking back to the client.
///
/// A context is scoped to one connection; `with_request_id` derives a copy
/// tagged with the request currently being handled.
#[derive(Clone)]
pub struct ServerCtx {
    /// Sender for server notifications
    pub(crate) notification_tx: broadcast::Sender<ServerNotification>,
    /// Minimum level forwarded as `notifications/message`
    log_level: Arc<watch::Sender<LoggingLevel>>,
    request_id: Option<RequestId>,
}

impl ServerCtx {
    pub(crate) fn new(notification_tx: broadcast::Sender<ServerNotification>) -> Self {
        let (log_level, _) = watch::channel(LoggingLevel::Info);
        Self {
            notification_tx,
            log_level: Arc::new(log_level),
            request_id: None,
        }
    }

    pub(crate) fn with_request_id(&self, request_id: RequestId) -> Self {
        Self {
            request_id: Some(request_id),
            ..self.clone()
        }
    }

    /// The id of the request being handled, if any
    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    /// Send a notification to the client
    pub fn notify(&self, notification: ServerNotification) -> Result<()> {
        self.notification_tx
            .send(notification)
            .map_err(|_| Error::InternalError("Failed to send notification".into()))?;
        Ok(())
    }

    pub fn log_level(&self) -> LoggingLevel {
        *self.log_level.borrow()
    }

    pub(crate) fn set_log_level(&self, level: LoggingLevel) {
        self.log_level.send_replace(level);
    }

    /// Forward a log message to the client if it passes the level set with
    /// `logging/setLevel`. Delivery is best effort.
    pub fn log(&self, level: LoggingLevel, logger: &str, data: impl Into<Value>) {
        if level < self.log_level() {
            return;
        }
        let notification = ServerNotification::LoggingMessage {
            level,
            logger: Some(logger.to_string()),
            data: data.into(),
        };
        if self.notify(notification).is_err() {
            tracing::debug!("No client listening for log notifications");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_respects_level() {
        let (tx, mut rx) = broadcast::channel(8);
        let ctx = ServerCtx::new(tx);

        ctx.log(LoggingLevel::Debug, "weather", "dropped");
        ctx.set_log_level(LoggingLevel::Debug);
        ctx.log(LoggingLevel::Debug, "weather", "kept");

        match rx.recv().await.unwrap() {
            ServerNotification::LoggingMessage { data, level, .. } => {
                assert_eq!(data, Value::from("kept"));
                assert_eq!(level, LoggingLevel::Debug);
            }
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_request_scoped_context_shares_level() {
        let (tx, _rx) = broadcast::channel(8);
        let ctx = ServerCtx::new(tx);
        let scoped = ctx.with_request_id(RequestId::Number(4));
        scoped.set_log_level(LoggingLevel::Error);
        assert_eq!(ctx.log_level(), LoggingLevel::Error);
        assert_eq!(scoped.request_id(), Some(&RequestId::Number(4)));
        assert!(ctx.request_id().is_none());
    }
}
