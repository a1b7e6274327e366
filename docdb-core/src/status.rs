//! HTTP-like status and sub-status codes returned by the service.

use std::fmt;

/// A status code attached to a batch response or an individual operation result.
///
/// The service speaks HTTP status semantics on every transport, so the values
/// mirror HTTP where one exists. Unknown codes are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    /// 200 OK.
    pub const OK: StatusCode = StatusCode(200);
    /// 201 Created.
    pub const CREATED: StatusCode = StatusCode(201);
    /// 204 No Content.
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    /// 207 Multi-Status, returned when results of a batch differ per operation.
    pub const MULTI_STATUS: StatusCode = StatusCode(207);
    /// 304 Not Modified.
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    /// 400 Bad Request.
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    /// 401 Unauthorized.
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    /// 403 Forbidden.
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    /// 404 Not Found.
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    /// 408 Request Timeout.
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    /// 409 Conflict.
    pub const CONFLICT: StatusCode = StatusCode(409);
    /// 410 Gone. Combined with a split sub-status this signals stale routing.
    pub const GONE: StatusCode = StatusCode(410);
    /// 412 Precondition Failed.
    pub const PRECONDITION_FAILED: StatusCode = StatusCode(412);
    /// 413 Request Entity Too Large.
    pub const REQUEST_ENTITY_TOO_LARGE: StatusCode = StatusCode(413);
    /// 424 Failed Dependency: the operation was not executed because another
    /// operation of the same atomic batch failed.
    pub const FAILED_DEPENDENCY: StatusCode = StatusCode(424);
    /// 429 Too Many Requests.
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    /// 500 Internal Server Error.
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    /// 503 Service Unavailable.
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    /// Creates a status code from its numeric value.
    pub const fn from_u16(value: u16) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Returns true for any 2xx code.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// Returns the canonical reason phrase, if the code is one the client knows.
    pub fn reason(&self) -> Option<&'static str> {
        let reason = match self.0 {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            207 => "Multi-Status",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            408 => "Request Timeout",
            409 => "Conflict",
            410 => "Gone",
            412 => "Precondition Failed",
            413 => "Request Entity Too Large",
            424 => "Failed Dependency",
            429 => "Too Many Requests",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => return None,
        };
        Some(reason)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} {}", self.0, reason),
            None => write!(f, "{}", self.0),
        }
    }
}

impl From<u16> for StatusCode {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

/// A service-specific refinement of a [`StatusCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SubStatusCode(u32);

impl SubStatusCode {
    /// No sub-status.
    pub const NONE: SubStatusCode = SubStatusCode(0);
    /// The cached collection name resolved to a stale resource.
    pub const NAME_CACHE_IS_STALE: SubStatusCode = SubStatusCode(1000);
    /// The addressed partition key range no longer exists.
    pub const PARTITION_KEY_RANGE_GONE: SubStatusCode = SubStatusCode(1002);
    /// The addressed partition key range is in the middle of a split.
    pub const COMPLETING_SPLIT: SubStatusCode = SubStatusCode(1007);
    /// The addressed partition key range is being migrated.
    pub const COMPLETING_PARTITION_MIGRATION: SubStatusCode = SubStatusCode(1008);
    /// The request was throttled because of provisioned throughput limits.
    pub const USER_REQUEST_RATE_TOO_LARGE: SubStatusCode = SubStatusCode(3200);

    /// Creates a sub-status code from its numeric value.
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    /// Returns the numeric value.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns true if this sub-status signals a partition topology change.
    pub fn is_split(&self) -> bool {
        matches!(
            *self,
            Self::PARTITION_KEY_RANGE_GONE
                | Self::COMPLETING_SPLIT
                | Self::COMPLETING_PARTITION_MIGRATION
        )
    }
}

impl fmt::Display for SubStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SubStatusCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Returns true when the status pair means routing information is stale and
/// the request should be re-issued against a refreshed partition map.
pub fn is_split(status: StatusCode, sub_status: SubStatusCode) -> bool {
    status == StatusCode::GONE && sub_status.is_split()
}
