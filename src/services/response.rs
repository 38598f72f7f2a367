//! HTTP response building helpers
//!
//! Every entity response carries its `ETag`; every error is a JSON body
//! `{"error": ..., "kind": ..., "retryable": ...}` with a status derived from
//! the error kind.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::error::LedgerError;
use crate::etag::{EntityTag, Tagged};

/// Seconds a client should wait before resolving an undecided ballot again
const RETRY_AFTER_SECS: &str = "30";

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut resp = Response::new(Full::new(Bytes::from(json)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    resp
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a response for a tagged entity, setting `ETag`
pub fn tagged<T: Serialize>(status: StatusCode, entity: &Tagged<T>) -> Response<Full<Bytes>> {
    let mut resp = json_response(status, entity);
    set_etag(&mut resp, &entity.etag);
    resp
}

/// Build a 404 Not Found response with message
pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": message, "kind": "not_found", "retryable": false }),
    )
}

/// Build a 405 Method Not Allowed response
pub fn method_not_allowed() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &serde_json::json!({ "error": "Method not allowed", "kind": "method_not_allowed", "retryable": false }),
    )
}

fn set_etag(resp: &mut Response<Full<Bytes>>, tag: &EntityTag) {
    if let Ok(value) = HeaderValue::from_str(&tag.header_value()) {
        resp.headers_mut().insert(header::ETAG, value);
    }
}

/// Status code and machine-readable kind for an error
pub fn classify(error: &LedgerError) -> (StatusCode, &'static str) {
    match error {
        LedgerError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "invalid_amount"),
        LedgerError::SameParty(_) => (StatusCode::BAD_REQUEST, "same_party"),
        LedgerError::InvalidQuantity { .. } => (StatusCode::BAD_REQUEST, "invalid_quantity"),
        LedgerError::NoRecipients => (StatusCode::BAD_REQUEST, "no_recipients"),
        LedgerError::InvalidIndicator(_) => (StatusCode::BAD_REQUEST, "invalid_indicator"),
        LedgerError::InvalidVote(_) => (StatusCode::BAD_REQUEST, "invalid_vote"),
        LedgerError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
        LedgerError::Json(_) => (StatusCode::BAD_REQUEST, "invalid_json"),
        LedgerError::UnknownUser(_) => (StatusCode::NOT_FOUND, "unknown_user"),
        LedgerError::UnknownEntity { .. } => (StatusCode::NOT_FOUND, "unknown_entity"),
        LedgerError::NotPermitted(_) => (StatusCode::FORBIDDEN, "not_permitted"),
        LedgerError::AlreadyClosed { .. } => (StatusCode::CONFLICT, "already_closed"),
        LedgerError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        LedgerError::InsufficientConsensus { .. } => {
            (StatusCode::CONFLICT, "insufficient_consensus")
        }
        LedgerError::PreconditionRequired => {
            (StatusCode::PRECONDITION_REQUIRED, "precondition_required")
        }
        LedgerError::PreconditionFailed => (StatusCode::PRECONDITION_FAILED, "precondition_failed"),
        LedgerError::NotModified(_) => (StatusCode::NOT_MODIFIED, "not_modified"),
        LedgerError::MissingCommunityUser => {
            (StatusCode::INTERNAL_SERVER_ERROR, "missing_community_user")
        }
        LedgerError::Database(_)
        | LedgerError::Pool(_)
        | LedgerError::Config(_)
        | LedgerError::Io(_)
        | LedgerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

/// Convert a LedgerError to an appropriate HTTP response
pub fn error_response(error: LedgerError) -> Response<Full<Bytes>> {
    let (status, kind) = classify(&error);

    if let LedgerError::NotModified(tag) = &error {
        let mut resp = Response::new(Full::new(Bytes::new()));
        *resp.status_mut() = status;
        set_etag(&mut resp, tag);
        return resp;
    }

    let mut resp = json_response(
        status,
        &serde_json::json!({
            "error": error.to_string(),
            "kind": kind,
            "retryable": error.is_retryable(),
        }),
    );
    if matches!(error, LedgerError::InsufficientConsensus { .. }) {
        resp.headers_mut().insert(
            header::RETRY_AFTER,
            HeaderValue::from_static(RETRY_AFTER_SECS),
        );
    }
    resp
}

/// Result type alias for handlers
pub type HandlerResult = Result<Response<Full<Bytes>>, LedgerError>;

/// Wrap a tagged service result into an HTTP response
pub fn from_tagged<T: Serialize>(
    status: StatusCode,
    result: Result<Tagged<T>, LedgerError>,
) -> Response<Full<Bytes>> {
    match result {
        Ok(entity) => tagged(status, &entity),
        Err(e) => error_response(e),
    }
}

/// Wrap a plain service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, LedgerError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (LedgerError::PreconditionRequired, 428),
            (LedgerError::PreconditionFailed, 412),
            (LedgerError::NotModified(EntityTag::parse("x")), 304),
            (LedgerError::AlreadyClosed { kind: "refund", id: 1 }, 409),
            (LedgerError::NotPermitted("no".into()), 403),
            (LedgerError::UnknownUser(4), 404),
            (LedgerError::NoRecipients, 400),
        ];
        for (error, status) in cases {
            assert_eq!(error_response(error).status().as_u16(), status);
        }
    }

    #[test]
    fn test_undecided_ballot_sets_retry_after() {
        let resp = error_response(LedgerError::InsufficientConsensus { ballot_id: 1, sum: 1 });
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "30");
    }

    #[test]
    fn test_not_modified_echoes_tag() {
        let resp = error_response(LedgerError::NotModified(EntityTag::parse("abc")));
        assert_eq!(resp.headers()[header::ETAG], "\"abc\"");
    }

    #[test]
    fn test_tagged_sets_etag() {
        let entity = Tagged {
            value: serde_json::json!({"id": 1}),
            etag: EntityTag::parse("f00"),
        };
        let resp = tagged(StatusCode::OK, &entity);
        assert_eq!(resp.headers()[header::ETAG], "\"f00\"");
    }
}
