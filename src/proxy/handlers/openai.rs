// OpenAI `/v1/chat/completions` handler. Requests are normalized into
// Anthropic shape, ride the Kiro pipeline, and are re-serialized into
// OpenAI wire format on the way out.

use axum::{
    body::Body,
    extract::{Json, State},
    http::{header, StatusCode},
    response::Response,
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{dispatch_error_response, new_trace_id, Surface};
use crate::proxy::common::errors::openai_error_response;
use crate::proxy::common::model_mapping::map_model_id;
use crate::proxy::mappers::openai::convert::to_claude_request;
use crate::proxy::mappers::openai::models::OpenAiRequest;
use crate::proxy::pool::Served;
use crate::proxy::server::AppState;
use crate::proxy::tokenizer::{context_warning, estimate_request_tokens};
use crate::proxy::upstream::openai_stream::{assemble_chat_completion, OpenAiStreamConverter};
use crate::proxy::upstream::parsers::EventStreamParser;
use crate::proxy::upstream::sse::{assemble_message, AnthropicStreamBuilder};

pub async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Response {
    let trace_id = new_trace_id();

    let openai_request: OpenAiRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return openai_error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                &format!("Invalid request body: {}", e),
            );
        }
    };

    let request = to_claude_request(&openai_request);
    let model_id = map_model_id(&request.model);
    let estimated = estimate_request_tokens(&request);
    let warning = context_warning(estimated);

    info!(
        "[{}] openai request | model: {} | stream: {} | messages: {} | ~{} tokens",
        trace_id,
        request.model,
        request.stream,
        request.messages.len(),
        estimated
    );

    let served = match state.pool.dispatch(&request, &model_id, &trace_id).await {
        Ok(served) => served,
        Err(err) => return dispatch_error_response(err, Surface::OpenAi),
    };

    if request.stream {
        stream_response(served, request.model.clone(), estimated, warning, trace_id)
    } else {
        buffered_response(served, &request.model, estimated, warning, &trace_id).await
    }
}

fn stream_response(
    served: Served,
    model: String,
    estimated_input: u32,
    warning: Option<String>,
    trace_id: String,
) -> Response {
    let email = served.account_email.clone();
    let sse = async_stream::stream! {
        if let Some(message) = warning {
            // SSE comment line: protocol-legal and invisible to chunk parsers.
            yield Ok::<Bytes, std::io::Error>(Bytes::from(format!(": warning: {}\n\n", message)));
        }

        let mut parser = EventStreamParser::new();
        let mut builder = AnthropicStreamBuilder::new(&model, estimated_input);
        let mut converter = OpenAiStreamConverter::new(&model);
        let mut upstream = served.response.bytes_stream();

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in parser.feed(&chunk) {
                        for frame in builder.on_event(event) {
                            for line in converter.convert(&frame) {
                                yield Ok(Bytes::from(line));
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("[{}] upstream stream error, closing: {}", trace_id, e);
                    break;
                }
            }
        }

        for event in parser.finish() {
            for frame in builder.on_event(event) {
                for line in converter.convert(&frame) {
                    yield Ok(Bytes::from(line));
                }
            }
        }
        for frame in builder.finalize() {
            for line in converter.convert(&frame) {
                yield Ok(Bytes::from(line));
            }
        }
        yield Ok(Bytes::from(OpenAiStreamConverter::done_line()));
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .header("X-Account-Email", email)
        .body(Body::from_stream(sse))
        .unwrap()
}

async fn buffered_response(
    served: Served,
    public_model: &str,
    estimated_input: u32,
    warning: Option<String>,
    trace_id: &str,
) -> Response {
    let body = match served.response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            warn!("[{}] failed to read upstream body: {}", trace_id, e);
            return openai_error_response(
                StatusCode::BAD_GATEWAY,
                "api_error",
                &format!("failed to read upstream response: {}", e),
            );
        }
    };

    let mut parser = EventStreamParser::new();
    let mut events = parser.feed(&body);
    events.extend(parser.finish());

    let message = assemble_message(public_model, estimated_input, events);
    let mut completion = assemble_chat_completion(public_model, &message);
    if let Some(w) = warning {
        completion["warning"] = json!(w);
    }

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Account-Email", served.account_email)
        .body(Body::from(
            serde_json::to_string(&completion).unwrap_or_default(),
        ))
        .unwrap()
}
