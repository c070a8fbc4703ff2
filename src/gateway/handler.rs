// Request dispatch: decode, validate, match, then reply or stream

use super::frames;
use super::protocol::{Codec, Dialect};
use crate::error::RpcError;
use crate::matching;
use crate::rules::Candidate;
use crate::schema::MethodSpec;
use crate::streaming::{self, StreamPlan};
use crate::world::{AppState, World};
use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode};
use http_body::Frame;
use http_body_util::StreamBody;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Requests larger than this are rejected before decoding.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

type FrameResult = Result<Frame<Bytes>, Infallible>;

/// Fallback handler serving `POST /{package}.{Service}/{Method}` for all
/// three dialects.
pub async fn rpc(State(state): State<Arc<AppState>>, request: Request<Body>) -> Response {
    if request.method() != Method::POST {
        return plain_response(StatusCode::METHOD_NOT_ALLOWED, "POST required");
    }

    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let Some(dialect) = Dialect::from_content_type(&content_type) else {
        return plain_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported content type",
        );
    };

    state.metrics.record_request(dialect.protocol());

    // Pin one snapshot for the whole call, including any stream it starts
    let world = state.snapshot();

    let fqmn = request.uri().path().trim_start_matches('/').to_string();
    let headers = request.headers().clone();

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(err) => {
            state.metrics.record_error(dialect.protocol());
            return error_response(dialect, &RpcError::DecodeError(err.to_string()));
        }
    };

    match dispatch(&state, &world, dialect, &fqmn, &headers, body).await {
        Ok(response) => response,
        Err(err) => {
            match &err {
                RpcError::Cancelled => debug!("{}: {}", fqmn, err),
                RpcError::EncodeError(_) | RpcError::Internal(_) => error!("{}: {}", fqmn, err),
                _ => debug!("{}: {}", fqmn, err),
            }
            state.metrics.record_error(dialect.protocol());
            error_response(dialect, &err)
        }
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    world: &Arc<World>,
    dialect: Dialect,
    fqmn: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, RpcError> {
    let method = world.registry.lookup_method(fqmn)?.clone();

    let payload = request_payload(dialect, body)?;
    let message = match dialect.codec() {
        Codec::Json => world.registry.decode_json(&method.request_type, &payload)?,
        Codec::Proto => world.registry.decode_proto(&method.request_type, &payload)?,
    };

    if world.validator.enabled() {
        let checked = world.validator.ir_for(&method.request_type).is_some();
        let report = world.validator.validate(&message);
        for constraint_id in &report.unsupported {
            state
                .metrics
                .record_validation_unsupported(&method.request_type, constraint_id);
            warn!(
                target: "wishmock::validation",
                "{}: constraint {} not evaluated (no CEL engine)",
                method.request_type, constraint_id
            );
        }
        if !report.ok() {
            let first = &report.violations[0];
            state.metrics.record_validation_failure(
                &method.request_type,
                &first.constraint_id,
                &first.message,
            );
            debug!(
                target: "wishmock::validation",
                "{} failed validation: {} violation(s), first at {}",
                method.request_type,
                report.violations.len(),
                first.field_path
            );
            return Err(RpcError::ValidationFailed(report.violations));
        }
        if checked {
            state.metrics.record_validation_ok(&method.request_type);
        }
    }

    let metadata = lower_headers(headers);
    let request_json = world
        .registry
        .message_to_json(&message)
        .map_err(|e| RpcError::Internal(e.to_string()))?;

    state.metrics.record_match_attempt();
    let candidate =
        match matching::select(world.rules.candidates(&method.rule_key), &metadata, &request_json)
        {
            Some(candidate) => candidate,
            None => {
                state.metrics.record_miss();
                return Err(RpcError::RuleNotMatched);
            }
        };
    state.metrics.record_match(&method.rule_key);
    debug!(
        "{} matched {} (load index {})",
        fqmn, candidate.source_file, candidate.load_index
    );

    if method.response_stream && candidate.response.is_stream() {
        Ok(stream_response(world, dialect, &method, candidate))
    } else {
        unary_response(world, dialect, &method, candidate).await
    }
}

fn request_payload(dialect: Dialect, body: Bytes) -> Result<Bytes, RpcError> {
    match dialect {
        Dialect::Connect { enveloped: false, .. } => Ok(body),
        Dialect::Connect { enveloped: true, .. } => {
            frames::decode_first(&body).map_err(RpcError::DecodeError)
        }
        Dialect::GrpcWeb { text: true, .. } => {
            let raw = frames::base64_decode(&body).map_err(RpcError::DecodeError)?;
            frames::decode_first(&raw).map_err(RpcError::DecodeError)
        }
        Dialect::GrpcWeb { .. } | Dialect::Grpc { .. } => {
            frames::decode_first(&body).map_err(RpcError::DecodeError)
        }
    }
}

async fn unary_response(
    world: &Arc<World>,
    dialect: Dialect,
    method: &MethodSpec,
    candidate: &Candidate,
) -> Result<Response, RpcError> {
    let body_value = candidate.response.body.clone().unwrap_or_else(|| json!({}));
    let trailers = trailer_pairs(candidate.response.trailers.as_ref());

    if candidate.response.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(candidate.response.delay_ms)).await;
    }

    match dialect {
        Dialect::Connect { codec, .. } => {
            let payload = match codec {
                Codec::Json => {
                    let value = world.registry.encode_json(&method.response_type, &body_value)?;
                    Bytes::from(
                        serde_json::to_vec(&value)
                            .map_err(|e| RpcError::EncodeError(e.to_string()))?,
                    )
                }
                Codec::Proto => {
                    Bytes::from(world.registry.encode_proto(&method.response_type, &body_value)?)
                }
            };

            let mut response = Response::new(Body::from(payload));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static(dialect.response_content_type(false)),
            );
            // Connect carries unary trailers as Trailer- prefixed headers
            for (key, value) in &trailers {
                if let (Ok(name), Ok(header_value)) = (
                    HeaderName::try_from(format!("trailer-{}", key)),
                    HeaderValue::from_str(value),
                ) {
                    response.headers_mut().insert(name, header_value);
                }
            }
            Ok(response)
        }
        Dialect::GrpcWeb { codec, text } => {
            let payload = encode_message(world, &method.response_type, &body_value, codec)?;
            let mut buf = BytesMut::new();
            buf.extend_from_slice(&frames::encode(frames::FLAG_MESSAGE, &payload));
            buf.extend_from_slice(&frames::grpc_web_trailers(0, "", &trailers));
            let body = if text {
                frames::base64_encode(&buf)
            } else {
                buf.freeze()
            };

            let mut response = Response::new(Body::from(body));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static(dialect.response_content_type(false)),
            );
            Ok(response)
        }
        Dialect::Grpc { codec } => {
            let payload = encode_message(world, &method.response_type, &body_value, codec)?;
            let frame = frames::encode(frames::FLAG_MESSAGE, &payload);

            let (tx, rx) = mpsc::channel::<FrameResult>(2);
            let trailer_map = grpc_trailer_map(0, "", &trailers);
            tokio::spawn(async move {
                if tx.send(Ok(Frame::data(frame))).await.is_ok() {
                    let _ = tx.send(Ok(Frame::trailers(trailer_map))).await;
                }
            });

            Ok(grpc_body_response(dialect, rx))
        }
    }
}

/// Build the streamed response: a scheduler task paces rule items through
/// a channel and a framing task encodes them for the wire. The world
/// snapshot stays pinned by the framing task until the stream ends.
fn stream_response(
    world: &Arc<World>,
    dialect: Dialect,
    method: &MethodSpec,
    candidate: &Candidate,
) -> Response {
    let plan = StreamPlan::from_rule(&candidate.response);
    let initial_delay = Duration::from_millis(candidate.response.delay_ms);
    let trailers = trailer_pairs(candidate.response.trailers.as_ref());

    let cancel = CancellationToken::new();
    let (item_tx, mut item_rx) = mpsc::channel(1);
    let (frame_tx, frame_rx) = mpsc::channel::<FrameResult>(2);

    let scheduler_cancel = cancel.clone();
    tokio::spawn(async move {
        if !initial_delay.is_zero()
            && !streaming::unary_delay(initial_delay, &scheduler_cancel).await
        {
            return;
        }
        streaming::run(plan, scheduler_cancel, item_tx).await;
    });

    let framer_world = world.clone();
    let response_type = method.response_type.clone();
    tokio::spawn(async move {
        loop {
            match item_rx.recv().await {
                Some(item) => {
                    match encode_stream_item(&framer_world, &response_type, &item, dialect) {
                        Ok(chunk) => {
                            if frame_tx.send(Ok(Frame::data(chunk))).await.is_err() {
                                // Receiver gone: client went away
                                cancel.cancel();
                                return;
                            }
                        }
                        Err(err) => {
                            error!("stream item for {} failed to encode: {}", response_type, err);
                            send_terminal(&frame_tx, dialect, Some(&err), &trailers).await;
                            cancel.cancel();
                            return;
                        }
                    }
                }
                None => {
                    send_terminal(&frame_tx, dialect, None, &trailers).await;
                    return;
                }
            }
        }
    });

    let mut response = Response::new(Body::new(StreamBody::new(ReceiverStream::new(frame_rx))));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static(dialect.response_content_type(true)),
    );
    response
}

fn encode_message(
    world: &Arc<World>,
    type_name: &str,
    body: &serde_json::Value,
    codec: Codec,
) -> Result<Bytes, RpcError> {
    match codec {
        Codec::Json => {
            let value = world.registry.encode_json(type_name, body)?;
            serde_json::to_vec(&value)
                .map(Bytes::from)
                .map_err(|e| RpcError::EncodeError(e.to_string()))
        }
        Codec::Proto => world.registry.encode_proto(type_name, body).map(Bytes::from),
    }
}

fn encode_stream_item(
    world: &Arc<World>,
    type_name: &str,
    item: &serde_json::Value,
    dialect: Dialect,
) -> Result<Bytes, RpcError> {
    match dialect {
        // JSON-typed Connect streams are newline-delimited JSON
        Dialect::Connect { codec: Codec::Json, .. } => {
            let value = world.registry.encode_json(type_name, item)?;
            let mut line =
                serde_json::to_vec(&value).map_err(|e| RpcError::EncodeError(e.to_string()))?;
            line.push(b'\n');
            Ok(Bytes::from(line))
        }
        Dialect::Connect { codec: Codec::Proto, .. } => {
            let payload = world.registry.encode_proto(type_name, item)?;
            Ok(frames::encode(frames::FLAG_MESSAGE, &payload))
        }
        Dialect::GrpcWeb { codec, text } => {
            let payload = encode_message(world, type_name, item, codec)?;
            let frame = frames::encode(frames::FLAG_MESSAGE, &payload);
            Ok(if text {
                frames::base64_encode(&frame)
            } else {
                frame
            })
        }
        Dialect::Grpc { codec } => {
            let payload = encode_message(world, type_name, item, codec)?;
            Ok(frames::encode(frames::FLAG_MESSAGE, &payload))
        }
    }
}

/// Emit the dialect's end-of-stream marker, carrying the error when the
/// stream terminated abnormally.
async fn send_terminal(
    frame_tx: &mpsc::Sender<FrameResult>,
    dialect: Dialect,
    error: Option<&RpcError>,
    trailers: &[(String, String)],
) {
    match dialect {
        Dialect::Connect { codec: Codec::Json, .. } => {
            // Success just closes the NDJSON stream
            if let Some(err) = error {
                let mut line = serde_json::to_vec(&json!({
                    "error": {"code": err.connect_code(), "message": err.public_message()}
                }))
                .unwrap_or_default();
                line.push(b'\n');
                let _ = frame_tx.send(Ok(Frame::data(Bytes::from(line)))).await;
            }
        }
        Dialect::Connect { codec: Codec::Proto, .. } => {
            let mut end = serde_json::Map::new();
            if let Some(err) = error {
                end.insert(
                    "error".to_string(),
                    json!({"code": err.connect_code(), "message": err.public_message()}),
                );
            }
            if !trailers.is_empty() {
                let metadata: serde_json::Map<String, serde_json::Value> = trailers
                    .iter()
                    .map(|(k, v)| (k.clone(), json!([v])))
                    .collect();
                end.insert("metadata".to_string(), serde_json::Value::Object(metadata));
            }
            let payload = serde_json::to_vec(&serde_json::Value::Object(end)).unwrap_or_default();
            let frame = frames::encode(frames::FLAG_END_STREAM, &payload);
            let _ = frame_tx.send(Ok(Frame::data(frame))).await;
        }
        Dialect::GrpcWeb { text, .. } => {
            let (status, message) = status_of(error);
            let frame = frames::grpc_web_trailers(status, &message, trailers);
            let frame = if text {
                frames::base64_encode(&frame)
            } else {
                frame
            };
            let _ = frame_tx.send(Ok(Frame::data(frame))).await;
        }
        Dialect::Grpc { .. } => {
            let (status, message) = status_of(error);
            let map = grpc_trailer_map(status, &message, trailers);
            let _ = frame_tx.send(Ok(Frame::trailers(map))).await;
        }
    }
}

fn status_of(error: Option<&RpcError>) -> (u32, String) {
    match error {
        Some(err) => (err.grpc_status(), err.public_message()),
        None => (0, String::new()),
    }
}

fn error_response(dialect: Dialect, err: &RpcError) -> Response {
    match dialect {
        Dialect::Connect { .. } => {
            let mut body = json!({
                "code": err.connect_code(),
                "message": err.public_message(),
            });
            if !err.violations().is_empty() {
                body["details"] = json!(err.violations());
            }
            let bytes = serde_json::to_vec(&body).unwrap_or_default();

            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = err.connect_http_status();
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Dialect::GrpcWeb { text, .. } => {
            let frame =
                frames::grpc_web_trailers(err.grpc_status(), &err.public_message(), &[]);
            let body = if text {
                frames::base64_encode(&frame)
            } else {
                frame
            };

            let mut response = Response::new(Body::from(body));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static(dialect.response_content_type(false)),
            );
            response
        }
        Dialect::Grpc { .. } => {
            let (tx, rx) = mpsc::channel::<FrameResult>(1);
            let map = grpc_trailer_map(err.grpc_status(), &err.public_message(), &[]);
            tokio::spawn(async move {
                let _ = tx.send(Ok(Frame::trailers(map))).await;
            });
            grpc_body_response(dialect, rx)
        }
    }
}

fn grpc_body_response(dialect: Dialect, rx: mpsc::Receiver<FrameResult>) -> Response {
    let mut response = Response::new(Body::new(StreamBody::new(ReceiverStream::new(rx))));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static(dialect.response_content_type(false)),
    );
    response
}

fn grpc_trailer_map(status: u32, message: &str, extra: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in extra {
        match (
            HeaderName::try_from(key.as_str()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(header_value)) => {
                map.insert(name, header_value);
            }
            _ => warn!("Dropping trailer with invalid name or value: {}", key),
        }
    }
    if let Ok(value) = HeaderValue::from_str(&status.to_string()) {
        map.insert(HeaderName::from_static("grpc-status"), value);
    }
    if !message.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&frames::sanitize_message(message)) {
            map.insert(HeaderName::from_static("grpc-message"), value);
        }
    }
    map
}

/// Header keys are normalised to lower case on entry; the matcher compares
/// lowered keys.
fn lower_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    for (name, value) in headers {
        if let Ok(text) = value.to_str() {
            metadata
                .entry(name.as_str().to_lowercase())
                .or_insert_with(|| text.to_string());
        }
    }
    metadata
}

fn trailer_pairs(
    trailers: Option<&serde_json::Map<String, serde_json::Value>>,
) -> Vec<(String, String)> {
    let Some(trailers) = trailers else {
        return Vec::new();
    };
    trailers
        .iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.to_lowercase(), text)
        })
        .collect()
}

fn plain_response(status: StatusCode, message: &'static str) -> Response {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}
