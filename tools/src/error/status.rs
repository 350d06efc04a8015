//! Status kinds and their transport mappings

use serde::{Deserialize, Serialize};
use tonic::Code;

/// Closed set of application error categories.
///
/// Any other integer seen at runtime is read as `Internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
#[repr(i32)]
pub enum StatusKind {
    Internal = 0,
    NotFound = 1,
    BadInput = 2,
    Conflict = 3,
    Forbidden = 4,
    Unauthorized = 5,
}

impl StatusKind {
    pub fn to_http_code(self) -> u16 {
        match self {
            StatusKind::Internal => 500,
            StatusKind::NotFound => 404,
            StatusKind::BadInput => 400,
            StatusKind::Unauthorized => 401,
            StatusKind::Forbidden => 403,
            StatusKind::Conflict => 409,
        }
    }

    /// `Forbidden` has no gRPC counterpart here and maps to `Internal`
    pub fn to_grpc_code(self) -> Code {
        match self {
            StatusKind::Internal => Code::Internal,
            StatusKind::NotFound => Code::NotFound,
            StatusKind::BadInput => Code::InvalidArgument,
            StatusKind::Unauthorized => Code::Unauthenticated,
            StatusKind::Conflict => Code::AlreadyExists,
            StatusKind::Forbidden => Code::Internal,
        }
    }

    pub fn from_grpc_code(code: Code) -> Self {
        match code {
            Code::Internal => StatusKind::Internal,
            Code::NotFound => StatusKind::NotFound,
            Code::InvalidArgument => StatusKind::BadInput,
            Code::Unauthenticated => StatusKind::Unauthorized,
            Code::AlreadyExists => StatusKind::Conflict,
            _ => StatusKind::Internal,
        }
    }
}

impl From<i32> for StatusKind {
    fn from(raw: i32) -> Self {
        match raw {
            1 => StatusKind::NotFound,
            2 => StatusKind::BadInput,
            3 => StatusKind::Conflict,
            4 => StatusKind::Forbidden,
            5 => StatusKind::Unauthorized,
            _ => StatusKind::Internal,
        }
    }
}

impl From<StatusKind> for i32 {
    fn from(kind: StatusKind) -> Self {
        kind as i32
    }
}

/// HTTP body shape: the message only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonError {
    pub error: String,
}
