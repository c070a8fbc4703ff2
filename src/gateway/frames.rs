// Length-prefixed framing shared by gRPC, gRPC-Web and enveloped Connect

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::{BufMut, Bytes, BytesMut};

/// Plain message frame.
pub const FLAG_MESSAGE: u8 = 0x00;
/// Connect end-of-stream frame.
pub const FLAG_END_STREAM: u8 = 0x02;
/// gRPC-Web trailer frame.
pub const FLAG_TRAILERS: u8 = 0x80;

/// Wrap a payload in the 1-byte flag + 4-byte big-endian length header.
pub fn encode(flags: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u8(flags);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

/// Extract the first frame's payload from a request body. Client-streaming
/// envelopes beyond the first message are consumed and ignored.
pub fn decode_first(body: &[u8]) -> Result<Bytes, String> {
    if body.len() < 5 {
        return Err(format!("frame header truncated: {} byte(s)", body.len()));
    }
    let flags = body[0];
    if flags & FLAG_TRAILERS != 0 {
        return Err("unexpected trailer frame in request".to_string());
    }
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    if body.len() < 5 + len {
        return Err(format!(
            "frame truncated: declared {} byte(s), got {}",
            len,
            body.len() - 5
        ));
    }
    Ok(Bytes::copy_from_slice(&body[5..5 + len]))
}

/// Render a gRPC-Web trailer frame. Custom trailers precede the status
/// pair, all encoded as HTTP/1 header lines.
pub fn grpc_web_trailers(
    status: u32,
    message: &str,
    extra: &[(String, String)],
) -> Bytes {
    let mut text = String::new();
    for (key, value) in extra {
        text.push_str(&format!("{}: {}\r\n", key, value));
    }
    text.push_str(&format!("grpc-status: {}\r\n", status));
    if !message.is_empty() {
        text.push_str(&format!("grpc-message: {}\r\n", sanitize_message(message)));
    }
    encode(FLAG_TRAILERS, text.as_bytes())
}

/// Trailer values travel on one header line.
pub fn sanitize_message(message: &str) -> String {
    message.replace(['\r', '\n'], " ")
}

pub fn base64_encode(bytes: &[u8]) -> Bytes {
    Bytes::from(BASE64.encode(bytes))
}

pub fn base64_decode(body: &[u8]) -> Result<Vec<u8>, String> {
    let trimmed: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    BASE64
        .decode(trimmed)
        .map_err(|e| format!("invalid base64 body: {}", e))
}
