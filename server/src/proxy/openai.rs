use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use rand::Rng;
use reqwest::{header::CONTENT_TYPE, StatusCode};
use tracing::{debug, error, info, warn};

use super::auth::authenticate_request;
use super::logging::{get_log_manager, LogGuard, RequestLogContext};
use super::relay;
use super::util::{error_response, read_request_body};
use crate::config::CONFIG;
use crate::database::credential::UpstreamCredential;
use crate::database::preset::Preset;
use crate::database::regex_rule::RegexRule;
use crate::schema::enum_def::{LogStatus, RegexPhase};
use crate::service::app_state::AppState;
use crate::service::pool::{FatalKind, Lease, PoolCandidate, RetryKind, SettleOutcome};
use crate::service::preset::expand_preset;
use crate::service::rewrite::RegexPipeline;
use crate::service::transform::gemini::{
    build_gemini_request, map_finish_reason, ChatCompletionResponse,
};
use crate::service::transform::{
    estimate_message_tokens, estimate_tokens, ChatCompletionRequest, TokenUsage,
};
use crate::service::upstream::UpstreamFailure;
use crate::service::vars::VarScope;

/// Terminal rejection: records the log row, disarms the cancellation guard,
/// and produces the OpenAI-shaped error body.
async fn reject(
    context: &Arc<Mutex<RequestLogContext>>,
    guard: &mut LogGuard,
    status: StatusCode,
    message: &str,
) -> Response<Body> {
    let snapshot = {
        let mut ctx = context.lock().unwrap();
        ctx.finish(LogStatus::Error, Some(status.as_u16() as i32));
        ctx.clone()
    };
    guard.disarm();
    get_log_manager().log(snapshot).await;
    error_response(status, message)
}

/// Settles the lease for a failed attempt and decides whether the failure
/// terminates the request. A `permanently_invalid` rejection passes the
/// upstream's 400 through to the client; everything else leaves room for
/// another attempt.
fn settle_failed_attempt(
    lease: Lease,
    failure: &UpstreamFailure,
    exclude: &mut HashSet<i64>,
) -> Option<(StatusCode, String)> {
    exclude.insert(lease.credential_id);
    match failure {
        UpstreamFailure::Retryable {
            kind, status_code, ..
        } => {
            lease.settle(SettleOutcome::Retryable {
                kind: *kind,
                status_code: *status_code,
            });
            None
        }
        UpstreamFailure::Fatal {
            kind,
            status_code,
            message,
        } => {
            lease.settle(SettleOutcome::Fatal { kind: *kind });
            if *kind == FatalKind::PermanentlyInvalid {
                let status = StatusCode::from_u16(*status_code)
                    .unwrap_or(StatusCode::BAD_REQUEST);
                Some((status, message.clone()))
            } else {
                None
            }
        }
    }
}

/// The request-execution pipeline: auth, preset expansion, pre-phase
/// rewrite, credential dispatch with failover, then relay.
pub(super) async fn handle_chat_request(
    state: Arc<AppState>,
    params: HashMap<String, String>,
    request: Request<Body>,
) -> Response<Body> {
    let headers = request.headers().clone();
    let context = Arc::new(Mutex::new(RequestLogContext::new("", false)));
    let mut guard = LogGuard::new(context.clone());

    // 1. Authenticate the tenant key.
    let tenant = match authenticate_request(&headers, &params) {
        Ok(tenant) => tenant,
        Err((status, message)) => return reject(&context, &mut guard, status, &message).await,
    };
    context.lock().unwrap().tenant_key_id = Some(tenant.key.id);

    // 2. Parse the OpenAI request body.
    let body = match read_request_body(request).await {
        Ok(body) => body,
        Err((status, message)) => return reject(&context, &mut guard, status, &message).await,
    };
    let chat_request: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return reject(
                &context,
                &mut guard,
                StatusCode::BAD_REQUEST,
                &format!("Invalid request body: {}", e),
            )
            .await;
        }
    };

    // OpenAI clients often hardcode gpt-* model names; map those onto the
    // first configured upstream model.
    let model = if chat_request.model.starts_with("gpt-") {
        CONFIG
            .models
            .first()
            .cloned()
            .unwrap_or_else(|| chat_request.model.clone())
    } else {
        chat_request.model.clone()
    };
    {
        let mut ctx = context.lock().unwrap();
        ctx.model_name = model.clone();
        ctx.is_stream = chat_request.stream;
    }
    info!(
        "chat request for model {} (stream: {})",
        model, chat_request.stream
    );

    // 3. Load the tenant's preset and rewrite rules.
    let preset_detail = match tenant.key.preset_id {
        Some(preset_id) => match Preset::get_with_items(preset_id) {
            Ok(detail) => detail,
            Err(e) => {
                error!("failed to load preset {}: {:?}", preset_id, e);
                return reject(
                    &context,
                    &mut guard,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to prepare request",
                )
                .await;
            }
        },
        None => None,
    };

    let preset_rules = match &preset_detail {
        Some(detail) => match RegexRule::list_for_preset(detail.preset.id) {
            Ok(rules) => rules,
            Err(e) => {
                error!("failed to load preset regex rules: {:?}", e);
                return reject(
                    &context,
                    &mut guard,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to prepare request",
                )
                .await;
            }
        },
        None => Vec::new(),
    };
    let account_rules = if tenant.key.apply_regex {
        match RegexRule::list_for_account(tenant.account.id) {
            Ok(rules) => rules,
            Err(e) => {
                error!("failed to load account regex rules: {:?}", e);
                return reject(
                    &context,
                    &mut guard,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to prepare request",
                )
                .await;
            }
        }
    } else {
        Vec::new()
    };

    // 4. Expand the preset and run the pre-phase rewrite.
    let seed = CONFIG.var_seed.unwrap_or_else(|| rand::rng().random());
    let mut scope = VarScope::new(seed);
    let mut messages = expand_preset(preset_detail.as_ref(), &chat_request.messages, &mut scope);

    let pre_pipeline = RegexPipeline::build(RegexPhase::Pre, &account_rules, &preset_rules);
    if !pre_pipeline.is_empty() {
        for message in &mut messages {
            message.content = pre_pipeline.apply(&message.content);
        }
    }
    let post_pipeline = RegexPipeline::build(RegexPhase::Post, &account_rules, &preset_rules);

    let payload = build_gemini_request(&chat_request, &messages);
    let estimated_input = estimate_message_tokens(&messages);

    // 5. Dispatch with failover.
    let candidates: Vec<PoolCandidate> = match UpstreamCredential::list_enabled() {
        Ok(list) => list.iter().map(PoolCandidate::from).collect(),
        Err(e) => {
            error!("failed to load upstream credentials: {:?}", e);
            return reject(
                &context,
                &mut guard,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to select upstream credential",
            )
            .await;
        }
    };
    if candidates.is_empty() {
        return reject(
            &context,
            &mut guard,
            StatusCode::BAD_GATEWAY,
            "No upstream credentials available",
        )
        .await;
    }

    let max_attempts = CONFIG.max_attempts.max(1);
    let deadline = Instant::now() + Duration::from_secs(CONFIG.request_timeout_secs);
    let attempt_timeout = Duration::from_secs(CONFIG.attempt_timeout_secs);
    let mut exclude: HashSet<i64> = HashSet::new();

    for attempt in 1..=max_attempts {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return reject(
                &context,
                &mut guard,
                StatusCode::GATEWAY_TIMEOUT,
                "Request deadline exceeded",
            )
            .await;
        }
        let budget = attempt_timeout.min(remaining);

        // Distinct credentials while fresh ones remain; once every enabled
        // credential has been attempted, the remaining budget may revisit.
        if exclude.len() >= candidates.len() {
            exclude.clear();
        }

        let lease = match state.pool.lease(&candidates, &exclude).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!("credential lease failed on attempt {}: {}", attempt, e);
                break;
            }
        };
        context.lock().unwrap().mark_dispatch();

        if chat_request.stream {
            match tokio::time::timeout(
                budget,
                state.upstream.stream_generate(&model, &lease.secret, &payload),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    // Committed: the relay owns the lease and the log row
                    // from here on.
                    guard.disarm();
                    return relay::stream_response(
                        lease,
                        stream,
                        post_pipeline,
                        context,
                        model,
                        estimated_input,
                    );
                }
                Ok(Err(failure)) => {
                    warn!("attempt {} failed: {}", attempt, failure);
                    if let Some((status, message)) =
                        settle_failed_attempt(lease, &failure, &mut exclude)
                    {
                        return reject(&context, &mut guard, status, &message).await;
                    }
                }
                Err(_) => {
                    warn!("attempt {} timed out", attempt);
                    exclude.insert(lease.credential_id);
                    lease.settle(SettleOutcome::Retryable {
                        kind: RetryKind::Transport,
                        status_code: None,
                    });
                }
            }
        } else {
            match tokio::time::timeout(
                budget,
                state.upstream.generate(&model, &lease.secret, &payload),
            )
            .await
            {
                Ok(Ok(reply)) => {
                    let text = post_pipeline.apply(&reply.text);
                    let usage = match reply.usage {
                        Some(meta) => {
                            debug!(
                                "upstream usage: prompt {}, candidates {}, total {}",
                                meta.prompt_token_count,
                                meta.candidates_token_count,
                                meta.total_token_count
                            );
                            TokenUsage {
                                input_tokens: meta.prompt_token_count,
                                output_tokens: meta.candidates_token_count,
                                estimated: false,
                            }
                        }
                        None => TokenUsage {
                            input_tokens: estimated_input,
                            output_tokens: estimate_tokens(text.chars().count()),
                            estimated: true,
                        },
                    };
                    lease.settle(SettleOutcome::Ok {
                        tokens_in: i64::from(usage.input_tokens),
                        tokens_out: i64::from(usage.output_tokens),
                    });

                    let snapshot = {
                        let mut ctx = context.lock().unwrap();
                        ctx.input_tokens = Some(usage.input_tokens);
                        ctx.output_tokens = Some(usage.output_tokens);
                        ctx.tokens_estimated = usage.estimated;
                        ctx.finish(LogStatus::Ok, Some(200));
                        ctx.clone()
                    };
                    guard.disarm();
                    get_log_manager().log(snapshot).await;

                    let finish_reason =
                        map_finish_reason(reply.finish_reason.as_deref().unwrap_or("STOP"));
                    let response_body =
                        ChatCompletionResponse::new(&model, text, finish_reason, &usage);
                    return Response::builder()
                        .status(StatusCode::OK)
                        .header(CONTENT_TYPE, "application/json")
                        .body(Body::from(serde_json::to_string(&response_body).unwrap()))
                        .unwrap();
                }
                Ok(Err(failure)) => {
                    warn!("attempt {} failed: {}", attempt, failure);
                    if let Some((status, message)) =
                        settle_failed_attempt(lease, &failure, &mut exclude)
                    {
                        return reject(&context, &mut guard, status, &message).await;
                    }
                }
                Err(_) => {
                    warn!("attempt {} timed out", attempt);
                    exclude.insert(lease.credential_id);
                    lease.settle(SettleOutcome::Retryable {
                        kind: RetryKind::Transport,
                        status_code: None,
                    });
                }
            }
        }
    }

    reject(
        &context,
        &mut guard,
        StatusCode::BAD_GATEWAY,
        "Upstream request failed on all available credentials",
    )
    .await
}
