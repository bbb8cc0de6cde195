use std::sync::{Arc, Mutex};

use chrono::Utc;
use once_cell::sync::Lazy;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::database::request_log::RequestLog;
use crate::schema::enum_def::LogStatus;
use crate::utils::ID_GENERATOR;

/// Recorded when the client went away before the gateway finished.
pub const CLIENT_CLOSED_REQUEST: i32 = 499;

/// Everything the gateway knows about one inbound request, accumulated across
/// the pipeline and written out exactly once as a request_log row.
#[derive(Debug, Clone)]
pub struct RequestLogContext {
    pub id: i64,
    pub tenant_key_id: Option<i64>,
    pub model_name: String,
    pub status_code: Option<i32>,
    pub status: LogStatus,
    pub is_stream: bool,
    pub received_at: i64,
    pub dispatch_started_at: Option<i64>,
    pub first_delta_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub tokens_estimated: bool,
}

impl RequestLogContext {
    pub fn new(model_name: &str, is_stream: bool) -> Self {
        Self {
            id: ID_GENERATOR.generate_id(),
            tenant_key_id: None,
            model_name: model_name.to_string(),
            status_code: None,
            status: LogStatus::Error,
            is_stream,
            received_at: Utc::now().timestamp_millis(),
            dispatch_started_at: None,
            first_delta_at: None,
            completed_at: None,
            input_tokens: None,
            output_tokens: None,
            tokens_estimated: false,
        }
    }

    /// Stamps the start of an upstream attempt. TTFT is measured from the
    /// attempt that ends up producing the response.
    pub fn mark_dispatch(&mut self) {
        self.dispatch_started_at = Some(Utc::now().timestamp_millis());
    }

    pub fn mark_first_delta(&mut self) {
        if self.first_delta_at.is_none() {
            self.first_delta_at = Some(Utc::now().timestamp_millis());
        }
    }

    pub fn finish(&mut self, status: LogStatus, status_code: Option<i32>) {
        self.status = status;
        self.status_code = status_code;
        self.completed_at = Some(Utc::now().timestamp_millis());
    }

    fn into_row(self) -> RequestLog {
        let completed_at = self.completed_at.unwrap_or_else(|| Utc::now().timestamp_millis());
        let latency = (completed_at - self.received_at).max(0) as f64 / 1000.0;
        let ttft = match (self.dispatch_started_at, self.first_delta_at) {
            (Some(dispatched), Some(first_delta)) => {
                (first_delta - dispatched).max(0) as f64 / 1000.0
            }
            _ => 0.0,
        };

        RequestLog {
            id: self.id,
            tenant_key_id: self.tenant_key_id,
            model_name: self.model_name,
            status_code: self.status_code,
            status: self.status,
            latency,
            ttft,
            is_stream: self.is_stream,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            tokens_estimated: self.tokens_estimated,
            created_at: self.received_at,
        }
    }
}

/// Serializes request-log writes through one channel-fed task.
pub struct LogManager {
    sender: mpsc::Sender<RequestLogContext>,
}

impl LogManager {
    fn new() -> Self {
        let (sender, mut receiver) = mpsc::channel::<RequestLogContext>(100);

        tokio::spawn(async move {
            while let Some(context) = receiver.recv().await {
                let log_id = context.id;
                debug!("writing request log {} ({:?})", log_id, context.status);
                if let Err(e) = RequestLog::insert(&context.into_row()) {
                    error!("failed to write request log {}: {:?}", log_id, e);
                }
            }
        });

        Self { sender }
    }

    pub async fn log(&self, context: RequestLogContext) {
        if let Err(e) = self.sender.send(context).await {
            error!("failed to queue request log: {:?}", e);
        }
    }

    /// Fire-and-forget variant for drop paths that cannot await.
    pub fn log_detached(&self, context: RequestLogContext) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            if let Err(e) = sender.send(context).await {
                error!("failed to queue request log: {:?}", e);
            }
        });
    }
}

static LOG_MANAGER: Lazy<LogManager> = Lazy::new(LogManager::new);

pub fn get_log_manager() -> &'static LogManager {
    &LOG_MANAGER
}

/// Guarantees the one-row-per-request invariant: every terminal path disarms
/// this guard and logs explicitly; if the handler future is dropped instead
/// (client disconnect), the guard writes the row with `status=error`.
pub struct LogGuard {
    context: Arc<Mutex<RequestLogContext>>,
    armed: bool,
}

impl LogGuard {
    pub fn new(context: Arc<Mutex<RequestLogContext>>) -> Self {
        Self {
            context,
            armed: true,
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let snapshot = {
            let mut context = self.context.lock().unwrap();
            warn!("request {} cancelled by the client", context.id);
            context.status = LogStatus::Error;
            if context.status_code.is_none() {
                context.status_code = Some(CLIENT_CLOSED_REQUEST);
            }
            context.completed_at = Some(Utc::now().timestamp_millis());
            context.clone()
        };
        get_log_manager().log_detached(snapshot);
    }
}
