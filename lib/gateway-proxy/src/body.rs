//! Body type shared by every handler and canned responses

use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Response, StatusCode};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};
use std::error::Error;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Streaming body used for both directions of the proxy. Not `Sync`, so
/// file bodies from the static handler fit too.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

pub fn full(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// Wrap a hyper body without buffering it.
pub fn incoming(body: Incoming) -> ProxyBody {
    body.map_err(BoxError::from).boxed_unsync()
}

/// Plain-text response with a trailing newline.
pub fn text_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut response = Response::new(full(format!("{}\n", message.trim_end())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn forbidden() -> Response<ProxyBody> {
    text_response(StatusCode::FORBIDDEN, "Forbidden")
}

pub fn not_found() -> Response<ProxyBody> {
    text_response(StatusCode::NOT_FOUND, "404 page not found")
}

/// 500 carrying the error text and its causes, as written before any
/// upstream bytes.
pub fn internal_error(err: &dyn Error) -> Response<ProxyBody> {
    text_response(StatusCode::INTERNAL_SERVER_ERROR, &error_chain(err))
}

/// `err` followed by each cause in its `source()` chain. Causes whose text
/// is already part of the message are skipped.
pub fn error_chain(err: &dyn Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string();
        if !text.contains(&message) {
            text.push_str(": ");
            text.push_str(&message);
        }
        source = cause.source();
    }
    text
}
