//! Wire protocol: endpoints, request and response bodies, error envelope
//! and batch limits.
//!
//! Requests and responses are transport-agnostic. The HTTP transport posts
//! the body of a request to `/sync/{endpoint}`; the in-process transport
//! passes the enums around directly.

use crate::{
    error::Result, CommitSummary, Error, ItemIdentity, ItemType, Knowledge, SessionId, WireItem,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Protocol endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Endpoint {
    BeginSession,
    EndSession,
    GetChanges,
    GetItemData,
    GetItemDataBatch,
    PutChanges,
    PutItemDataBatch,
    ApplyChanges,
}

impl Endpoint {
    pub const ALL: [Endpoint; 8] = [
        Endpoint::BeginSession,
        Endpoint::EndSession,
        Endpoint::GetChanges,
        Endpoint::GetItemData,
        Endpoint::GetItemDataBatch,
        Endpoint::PutChanges,
        Endpoint::PutItemDataBatch,
        Endpoint::ApplyChanges,
    ];

    /// Path segment of the endpoint.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::BeginSession => "beginSession",
            Endpoint::EndSession => "endSession",
            Endpoint::GetChanges => "getChanges",
            Endpoint::GetItemData => "getItemData",
            Endpoint::GetItemDataBatch => "getItemDataBatch",
            Endpoint::PutChanges => "putChanges",
            Endpoint::PutItemDataBatch => "putItemDataBatch",
            Endpoint::ApplyChanges => "applyChanges",
        }
    }

    /// Parse a path segment.
    pub fn from_path(path: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|e| e.path() == path)
            .ok_or_else(|| Error::UnknownEndpoint(path.to_string()))
    }

    /// Every endpoint except `BeginSession` runs inside an open session.
    pub fn requires_session(&self) -> bool {
        !matches!(self, Endpoint::BeginSession)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginSessionRequest {
    pub item_types: Vec<ItemType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginSessionResponse {
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    pub max_batch_count: usize,
    pub max_batch_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndSessionRequest {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndSessionResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetChangesRequest {
    /// Knowledge of the caller
    pub knowledge: Knowledge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetChangesResponse {
    /// Knowledge of the callee
    pub knowledge: Knowledge,
    /// Items the caller has not observed yet
    pub total_changes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetItemDataRequest {
    pub item: ItemIdentity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetItemDataResponse {
    pub item: WireItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetItemDataBatchRequest {
    /// Index of the first change to return
    pub start_item: usize,
    pub max_batch_count: usize,
    pub max_batch_size: usize,
}

/// One numbered change inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    pub change_number: usize,
    pub item: WireItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetItemDataBatchResponse {
    pub batch: Vec<ChangeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutChangesRequest {
    pub knowledge: Knowledge,
    pub change_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PutChangesResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutItemDataBatchRequest {
    pub batch: Vec<ChangeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutItemDataBatchResponse {
    /// Items staged so far in this session
    pub received: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyChangesRequest {
    pub change_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyChangesResponse {
    pub summary: CommitSummary,
}

/// A request to one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "endpoint", content = "body", rename_all = "camelCase")]
pub enum Request {
    BeginSession(BeginSessionRequest),
    EndSession(EndSessionRequest),
    GetChanges(GetChangesRequest),
    GetItemData(GetItemDataRequest),
    GetItemDataBatch(GetItemDataBatchRequest),
    PutChanges(PutChangesRequest),
    PutItemDataBatch(PutItemDataBatchRequest),
    ApplyChanges(ApplyChangesRequest),
}

/// The response of one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "endpoint", content = "body", rename_all = "camelCase")]
pub enum Response {
    BeginSession(BeginSessionResponse),
    EndSession(EndSessionResponse),
    GetChanges(GetChangesResponse),
    GetItemData(GetItemDataResponse),
    GetItemDataBatch(GetItemDataBatchResponse),
    PutChanges(PutChangesResponse),
    PutItemDataBatch(PutItemDataBatchResponse),
    ApplyChanges(ApplyChangesResponse),
}

fn split_envelope(envelope: Value) -> Result<Value> {
    match envelope {
        Value::Object(mut map) => Ok(map.remove("body").unwrap_or(Value::Null)),
        _ => Err(Error::InvalidRequest("envelope must be an object".into())),
    }
}

impl Request {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Request::BeginSession(_) => Endpoint::BeginSession,
            Request::EndSession(_) => Endpoint::EndSession,
            Request::GetChanges(_) => Endpoint::GetChanges,
            Request::GetItemData(_) => Endpoint::GetItemData,
            Request::GetItemDataBatch(_) => Endpoint::GetItemDataBatch,
            Request::PutChanges(_) => Endpoint::PutChanges,
            Request::PutItemDataBatch(_) => Endpoint::PutItemDataBatch,
            Request::ApplyChanges(_) => Endpoint::ApplyChanges,
        }
    }

    /// Parse the body posted to an endpoint.
    pub fn from_body(endpoint: Endpoint, body: Value) -> Result<Self> {
        serde_json::from_value(json!({ "endpoint": endpoint, "body": body }))
            .map_err(|e| Error::InvalidRequest(format!("{endpoint}: {e}")))
    }

    /// The body to post to [`Request::endpoint`].
    pub fn to_body(&self) -> Result<Value> {
        let envelope =
            serde_json::to_value(self).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        split_envelope(envelope)
    }
}

impl Response {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Response::BeginSession(_) => Endpoint::BeginSession,
            Response::EndSession(_) => Endpoint::EndSession,
            Response::GetChanges(_) => Endpoint::GetChanges,
            Response::GetItemData(_) => Endpoint::GetItemData,
            Response::GetItemDataBatch(_) => Endpoint::GetItemDataBatch,
            Response::PutChanges(_) => Endpoint::PutChanges,
            Response::PutItemDataBatch(_) => Endpoint::PutItemDataBatch,
            Response::ApplyChanges(_) => Endpoint::ApplyChanges,
        }
    }

    /// Parse the body returned by an endpoint.
    pub fn from_body(endpoint: Endpoint, body: Value) -> Result<Self> {
        serde_json::from_value(json!({ "endpoint": endpoint, "body": body }))
            .map_err(|e| Error::InvalidRequest(format!("{endpoint}: {e}")))
    }

    /// The body returned to the caller.
    pub fn to_body(&self) -> Result<Value> {
        let envelope =
            serde_json::to_value(self).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        split_envelope(envelope)
    }
}

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    SchemaMismatch,
    UnknownEndpoint,
    InvalidRequest,
    SessionNotFound,
    ItemNotFound,
    SessionLimit,
    SessionMismatch,
    AuthenticationFailed,
    ReplayedNonce,
    StaleTimestamp,
    Conflict,
    Internal,
}

impl ErrorCode {
    /// HTTP-equivalent status.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidRequest => 400,
            ErrorCode::AuthenticationFailed | ErrorCode::ReplayedNonce | ErrorCode::StaleTimestamp => {
                401
            }
            ErrorCode::SessionMismatch => 403,
            ErrorCode::UnknownEndpoint | ErrorCode::SessionNotFound | ErrorCode::ItemNotFound => {
                404
            }
            ErrorCode::Conflict => 409,
            ErrorCode::SchemaMismatch => 422,
            ErrorCode::Internal => 500,
            ErrorCode::SessionLimit => 503,
        }
    }
}

/// Failure body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(error: &Error) -> Self {
        Self {
            error_code: error.code(),
            error_message: error.to_string(),
        }
    }
}

/// HTTP header names carrying credentials and the session id.
pub mod headers {
    pub const USERNAME: &str = "x-sync-username";
    pub const CREATED: &str = "x-sync-created";
    pub const NONCE: &str = "x-sync-nonce";
    pub const DIGEST: &str = "x-sync-digest";
    pub const SESSION: &str = "x-sync-session";
}

/// Per-batch caps on item count and serialized size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchLimits {
    pub max_count: usize,
    /// Bytes
    pub max_size: usize,
}

impl BatchLimits {
    pub fn new(max_count: usize, max_size: usize) -> Self {
        Self {
            max_count,
            max_size,
        }
    }

    /// The tighter of two limits on each axis.
    pub fn min(self, other: BatchLimits) -> Self {
        Self {
            max_count: self.max_count.min(other.max_count),
            max_size: self.max_size.min(other.max_size),
        }
    }

    /// Whether an item of `size` bytes joins a batch already holding
    /// `count` items totalling `used` bytes. The first item always fits.
    pub fn admits(&self, count: usize, used: usize, size: usize) -> bool {
        count == 0 || (count < self.max_count && used.saturating_add(size) <= self.max_size)
    }
}

/// Take items from the front of `items` while they fit in one batch.
///
/// Stops at the first item that does not fit, which is left for the next
/// batch. At least one item is taken when any is available.
pub fn take_batch<T>(
    items: impl IntoIterator<Item = Result<T>>,
    limits: &BatchLimits,
    size_of: impl Fn(&T) -> Result<usize>,
) -> Result<Vec<T>> {
    let mut batch = Vec::new();
    let mut used = 0;
    for item in items {
        let item = item?;
        let size = size_of(&item)?;
        if !limits.admits(batch.len(), used, size) {
            break;
        }
        used += size;
        batch.push(item);
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths_roundtrip() {
        for endpoint in Endpoint::ALL {
            assert_eq!(Endpoint::from_path(endpoint.path()).unwrap(), endpoint);
        }
        assert_eq!(
            Endpoint::from_path("dropTables"),
            Err(Error::UnknownEndpoint("dropTables".into()))
        );
        assert!(!Endpoint::BeginSession.requires_session());
        assert!(Endpoint::ApplyChanges.requires_session());
    }

    #[test]
    fn request_body_matches_endpoint() {
        let request = Request::PutChanges(PutChangesRequest {
            knowledge: Knowledge::new().with("a", 3),
            change_count: 7,
        });

        let body = request.to_body().unwrap();
        assert_eq!(body["changeCount"], 7);
        assert_eq!(body["knowledge"][0]["tickCount"], 3);

        let parsed = Request::from_body(Endpoint::PutChanges, body).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn empty_bodies_parse() {
        let parsed = Request::from_body(Endpoint::EndSession, json!({})).unwrap();
        assert_eq!(parsed, Request::EndSession(EndSessionRequest {}));
    }

    #[test]
    fn malformed_body_is_invalid_request() {
        let result = Request::from_body(Endpoint::ApplyChanges, json!({ "changeCount": "x" }));
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn begin_session_response_names() {
        let response = Response::BeginSession(BeginSessionResponse {
            session_id: "s1".into(),
            max_batch_count: 10,
            max_batch_size: 100,
        });
        let body = response.to_body().unwrap();
        assert_eq!(body["sessionID"], "s1");
        assert_eq!(body["maxBatchCount"], 10);
    }

    #[test]
    fn error_envelope() {
        let body = serde_json::to_value(ErrorResponse::from(&Error::SessionNotFound(
            "s1".into(),
        )))
        .unwrap();
        assert_eq!(body["errorCode"], "sessionNotFound");
        assert_eq!(body["errorMessage"], "session not found: s1");
        assert_eq!(ErrorCode::SessionNotFound.http_status(), 404);
    }

    #[test]
    fn batch_respects_count() {
        let limits = BatchLimits::new(3, usize::MAX);
        let items = (0..10).map(Ok);
        let batch = take_batch(items, &limits, |_| Ok(1)).unwrap();
        assert_eq!(batch, vec![0, 1, 2]);
    }

    #[test]
    fn batch_respects_size_but_takes_one() {
        let limits = BatchLimits::new(100, 10);
        let batch = take_batch([4, 4, 4].map(Ok), &limits, |n| Ok(*n)).unwrap();
        assert_eq!(batch, vec![4, 4]);

        let batch = take_batch([50, 1].map(Ok), &limits, |n| Ok(*n)).unwrap();
        assert_eq!(batch, vec![50]);
    }

    #[test]
    fn batch_size_errors_are_propagated() {
        let limits = BatchLimits::new(100, 10);
        let result = take_batch([1, 2].map(Ok), &limits, |n| {
            if *n == 2 {
                Err(Error::InvalidPayload("unencodable".into()))
            } else {
                Ok(*n)
            }
        });
        assert_eq!(result, Err(Error::InvalidPayload("unencodable".into())));
    }

    #[test]
    fn min_limits() {
        let a = BatchLimits::new(500, 1 << 20);
        let b = BatchLimits::new(5000, 1 << 10);
        assert_eq!(a.min(b), BatchLimits::new(500, 1 << 10));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_batches_cover_every_item_once(
                sizes in proptest::collection::vec(1usize..200, 0..300),
                max_count in 1usize..50,
                max_size in 1usize..1000,
            ) {
                let limits = BatchLimits::new(max_count, max_size);
                let mut start = 0;
                let mut seen = Vec::new();
                while start < sizes.len() {
                    let batch = take_batch(
                        sizes[start..].iter().copied().enumerate().map(|(i, s)| Ok((start + i, s))),
                        &limits,
                        |(_, s)| Ok(*s),
                    ).unwrap();
                    prop_assert!(!batch.is_empty());
                    prop_assert!(batch.len() <= max_count);
                    let total: usize = batch.iter().map(|(_, s)| s).sum();
                    prop_assert!(batch.len() == 1 || total <= max_size);
                    start += batch.len();
                    seen.extend(batch.into_iter().map(|(i, _)| i));
                }
                prop_assert_eq!(seen, (0..sizes.len()).collect::<Vec<_>>());
            }
        }
    }
}
