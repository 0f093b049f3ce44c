//! The webhook service: synchronous HTTP calls whose request and response
//! traces are captured for the event log.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

// response content-types we'll capture bodies for
const FETCH_RESPONSE_CONTENT_TYPES: &[&str] = &[
    "application/json",
    "application/javascript",
    "application/xml",
    "text/html",
    "text/plain",
    "text/xml",
    "text/javascript",
];

const BODY_TRIMMED_MARKER: &str = "<response body trimmed>";

#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub resthook: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    ResponseError,
    ConnectionError,
    SubscriberGone,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::ResponseError => "response_error",
            CallStatus::ConnectionError => "connection_error",
            CallStatus::SubscriberGone => "subscriber_gone",
        }
    }
}

/// The trace of one webhook call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookCall {
    pub url: String,
    pub method: String,
    pub status_code: u16,
    pub status: CallStatus,
    pub request: String,
    pub response: String,
    /// The captured response body, when the content type allowed capture.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub time_taken_ms: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resthook: String,
}

#[async_trait]
pub trait WebhookService: Send + Sync {
    async fn call(&self, request: WebhookRequest) -> WebhookCall;
}

/// Determines the call status from the HTTP status code.
/// An HTTP 410 on a resthook means the subscriber is gone.
pub fn status_from_code(code: u16, is_resthook: bool) -> CallStatus {
    if is_resthook && code == 410 {
        return CallStatus::SubscriberGone;
    }
    if code / 100 == 2 {
        CallStatus::Success
    } else {
        CallStatus::ResponseError
    }
}

/// Strips parameters from a Content-Type header value. Returns `None` when
/// the value doesn't parse as `type/subtype`.
pub fn parse_media_type(header: &str) -> Option<String> {
    let media_type = header.split(';').next()?.trim().to_lowercase();
    let (main, sub) = media_type.split_once('/')?;
    if main.is_empty() || sub.is_empty() || main.contains(' ') || sub.contains(' ') {
        return None;
    }
    Some(media_type)
}

/// Sniffs a content type from the first bytes of a body, used when the
/// response has no Content-Type header.
pub fn sniff_content_type(body: &[u8]) -> String {
    let head = &body[..body.len().min(512)];
    let trimmed: &[u8] = {
        let mut slice = head;
        while let [first, rest @ ..] = slice {
            if first.is_ascii_whitespace() {
                slice = rest;
            } else {
                break;
            }
        }
        slice
    };
    match trimmed.first() {
        Some(b'{') | Some(b'[') => "application/json".to_string(),
        Some(b'<') => "text/html".to_string(),
        _ => {
            if std::str::from_utf8(head).is_ok() {
                "text/plain".to_string()
            } else {
                "application/octet-stream".to_string()
            }
        }
    }
}

/// Renders the request as an HTTP trace for the event log.
pub fn dump_request(request: &WebhookRequest) -> String {
    let path = Url::parse(&request.url)
        .map(|u| {
            let mut p = u.path().to_string();
            if let Some(q) = u.query() {
                p.push('?');
                p.push_str(q);
            }
            p
        })
        .unwrap_or_else(|_| "/".to_string());
    let host = Url::parse(&request.url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default();

    let mut trace = format!("{} {} HTTP/1.1\r\nHost: {}\r\n", request.method, path, host);
    for (name, value) in &request.headers {
        trace.push_str(&format!("{}: {}\r\n", name, value));
    }
    trace.push_str("\r\n");
    if let Some(body) = &request.body {
        trace.push_str(body);
    }
    trace
}

/// Builds a [`WebhookCall`] from a received response, applying the body
/// capture policy:
///
/// - bodies are read up to `max_body_bytes` + 1; an overrun marks the call
///   `response_error` and records a trimmed marker instead of the body;
/// - bodies are only captured for the supported content types; the header is
///   media-type parsed, and absent headers are sniffed from the first 512
///   bytes.
pub fn call_from_response(
    request: &WebhookRequest,
    request_trace: String,
    status_code: u16,
    content_type_header: Option<&str>,
    body: &[u8],
    max_body_bytes: usize,
    time_taken_ms: u64,
) -> WebhookCall {
    let mut call = WebhookCall {
        url: request.url.clone(),
        method: request.method.clone(),
        status_code,
        status: status_from_code(status_code, !request.resthook.is_empty()),
        request: request_trace,
        response: format!("HTTP/1.1 {}\r\n\r\n", status_code),
        body: None,
        time_taken_ms,
        resthook: request.resthook.clone(),
    };

    let content_type = match content_type_header {
        Some(header) => parse_media_type(header),
        None => Some(sniff_content_type(body)),
    };

    let save_body = content_type
        .as_deref()
        .map(|ct| FETCH_RESPONSE_CONTENT_TYPES.contains(&ct))
        .unwrap_or(false);

    if !save_body {
        // unsupported or unparseable content type, body is not captured
        return call;
    }

    if body.len() > max_body_bytes {
        call.status = CallStatus::ResponseError;
        call.response.push_str(BODY_TRIMMED_MARKER);
        return call;
    }

    let text = String::from_utf8_lossy(body).to_string();
    call.response.push_str(&text);
    call.body = Some(text);
    call
}

/// The default webhook service over reqwest. Default headers fill in any
/// request headers the caller didn't set.
pub struct HttpWebhookService {
    client: reqwest::Client,
    default_headers: Vec<(String, String)>,
    max_body_bytes: usize,
}

impl HttpWebhookService {
    pub fn new(
        client: reqwest::Client,
        default_headers: Vec<(String, String)>,
        max_body_bytes: usize,
    ) -> Self {
        HttpWebhookService {
            client,
            default_headers,
            max_body_bytes,
        }
    }

    fn connection_error(&self, request: &WebhookRequest, request_trace: String) -> WebhookCall {
        WebhookCall {
            url: request.url.clone(),
            method: request.method.clone(),
            status_code: 0,
            status: CallStatus::ConnectionError,
            request: request_trace,
            response: String::new(),
            body: None,
            time_taken_ms: 0,
            resthook: request.resthook.clone(),
        }
    }
}

#[async_trait]
impl WebhookService for HttpWebhookService {
    async fn call(&self, mut request: WebhookRequest) -> WebhookCall {
        for (name, value) in &self.default_headers {
            let already_set = request
                .headers
                .iter()
                .any(|(n, _)| n.eq_ignore_ascii_case(name));
            if !already_set {
                request.headers.push((name.clone(), value.clone()));
            }
        }

        let request_trace = dump_request(&request);

        let method = match request.method.to_uppercase().parse::<reqwest::Method>() {
            Ok(m) => m,
            Err(_) => return self.connection_error(&request, request_trace),
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started = std::time::Instant::now();
        let response = match builder.send().await {
            Ok(r) => r,
            Err(_) => return self.connection_error(&request, request_trace),
        };

        let status_code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        // read at most one byte past the cap so overruns are detectable
        let body = match response.bytes().await {
            Ok(b) => {
                let limit = self.max_body_bytes + 1;
                b[..b.len().min(limit)].to_vec()
            }
            Err(_) => return self.connection_error(&request, request_trace),
        };
        let time_taken_ms = started.elapsed().as_millis() as u64;

        call_from_response(
            &request,
            request_trace,
            status_code,
            content_type.as_deref(),
            &body,
            self.max_body_bytes,
            time_taken_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> WebhookRequest {
        WebhookRequest {
            method: "GET".into(),
            url: "http://temba.io/test?cmd=success".into(),
            headers: vec![],
            body: None,
            resthook: String::new(),
        }
    }

    #[test]
    fn test_status_from_code() {
        assert_eq!(status_from_code(200, false), CallStatus::Success);
        assert_eq!(status_from_code(201, false), CallStatus::Success);
        assert_eq!(status_from_code(400, false), CallStatus::ResponseError);
        assert_eq!(status_from_code(500, false), CallStatus::ResponseError);
        assert_eq!(status_from_code(410, true), CallStatus::SubscriberGone);
        assert_eq!(status_from_code(410, false), CallStatus::ResponseError);
    }

    #[test]
    fn test_parse_media_type() {
        assert_eq!(
            parse_media_type("text/html; charset=utf-8"),
            Some("text/html".to_string())
        );
        assert_eq!(
            parse_media_type("Application/JSON"),
            Some("application/json".to_string())
        );
        assert_eq!(parse_media_type("nonsense"), None);
        assert_eq!(parse_media_type("bad type/html"), None);
    }

    #[test]
    fn test_sniff_content_type() {
        assert_eq!(sniff_content_type(b"  {\"a\": 1}"), "application/json");
        assert_eq!(sniff_content_type(b"<html></html>"), "text/html");
        assert_eq!(sniff_content_type(b"hello world"), "text/plain");
        assert_eq!(sniff_content_type(&[0xff, 0xfe, 0x00]), "application/octet-stream");
    }

    #[test]
    fn test_body_captured_for_supported_type() {
        let call = call_from_response(
            &request(),
            "GET /test HTTP/1.1\r\n\r\n".into(),
            200,
            Some("application/json"),
            br#"{"ok": true}"#,
            1024,
            12,
        );
        assert_eq!(call.status, CallStatus::Success);
        assert_eq!(call.body.as_deref(), Some(r#"{"ok": true}"#));
        assert!(call.response.contains(r#"{"ok": true}"#));
    }

    #[test]
    fn test_body_too_large_trimmed() {
        let body = vec![b'Y'; 2000];
        let call = call_from_response(
            &request(),
            String::new(),
            200,
            Some("text/plain"),
            &body,
            1024,
            12,
        );
        assert_eq!(call.status, CallStatus::ResponseError);
        assert!(call.body.is_none());
        assert!(call.response.contains("trimmed"));
    }

    #[test]
    fn test_unsupported_type_not_captured() {
        let call = call_from_response(
            &request(),
            String::new(),
            200,
            Some("image/png"),
            &[1, 2, 3],
            1024,
            12,
        );
        assert_eq!(call.status, CallStatus::Success);
        assert!(call.body.is_none());
    }

    #[test]
    fn test_unparseable_content_type_not_captured() {
        let call = call_from_response(
            &request(),
            String::new(),
            200,
            Some("garbage"),
            b"{}",
            1024,
            12,
        );
        assert!(call.body.is_none());
    }

    #[test]
    fn test_missing_content_type_sniffed() {
        let call = call_from_response(
            &request(),
            String::new(),
            200,
            None,
            br#"{"sniffed": true}"#,
            1024,
            12,
        );
        assert_eq!(call.body.as_deref(), Some(r#"{"sniffed": true}"#));
    }

    #[test]
    fn test_dump_request() {
        let mut req = request();
        req.headers.push(("Accept".into(), "application/json".into()));
        let trace = dump_request(&req);
        assert!(trace.starts_with("GET /test?cmd=success HTTP/1.1\r\n"));
        assert!(trace.contains("Host: temba.io\r\n"));
        assert!(trace.contains("Accept: application/json\r\n"));
    }
}
