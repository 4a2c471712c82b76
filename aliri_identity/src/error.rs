//! Common errors

use std::{error::Error as StdError, fmt};

use thiserror::Error;

/// A boxed error returned by pluggable storage and notification hooks
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The reason an interactive flow is required
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UiRequiredCode {
    /// No cached account has the supplied login hint as its username
    NoAccountForLoginHint,
    /// More than one cached account has the supplied login hint as its username
    MultipleAccountsForLoginHint,
    /// No refresh token is available for the account
    NoTokensFound,
    /// The authority does not issue tokens without explicitly requested scopes
    ScopesRequired,
}

impl UiRequiredCode {
    /// The wire-stable error code
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoAccountForLoginHint => "no_account_for_login_hint",
            Self::MultipleAccountsForLoginHint => "multiple_accounts_for_login_hint",
            Self::NoTokensFound => "no_tokens_found",
            Self::ScopesRequired => "scopes_required",
        }
    }

    const fn message(self) -> &'static str {
        match self {
            Self::NoAccountForLoginHint => {
                "no account in the token cache has this login hint as its username"
            }
            Self::MultipleAccountsForLoginHint => {
                "multiple accounts in the token cache have this login hint as their username; pass the account explicitly"
            }
            Self::NoTokensFound => "no refresh token found in the cache",
            Self::ScopesRequired => "at least one scope must be requested for this authority",
        }
    }
}

impl fmt::Display for UiRequiredCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stage at which an interactive flow became necessary
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UiRequiredClassification {
    /// Silent token acquisition could not proceed with the cached state
    AcquireTokenSilentFailed,
}

/// Silent acquisition cannot succeed; the caller must fall back to an interactive flow
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Error)]
#[error("{code}: {}", .code.message())]
pub struct UiRequiredError {
    code: UiRequiredCode,
    classification: UiRequiredClassification,
}

impl UiRequiredError {
    /// The specific reason
    pub const fn code(&self) -> UiRequiredCode {
        self.code
    }

    /// The classification of the failure
    pub const fn classification(&self) -> UiRequiredClassification {
        self.classification
    }
}

pub(crate) const fn ui_required(code: UiRequiredCode) -> UiRequiredError {
    UiRequiredError {
        code,
        classification: UiRequiredClassification::AcquireTokenSilentFailed,
    }
}

/// Coarse classification of a service error, used to select recovery behavior
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClassification {
    /// The grant was rejected
    InvalidGrant,
    /// The refresh token is unusable and should be evicted
    BadToken,
    /// A family refresh token was used by a client outside the family
    ClientMismatch,
    /// The identity provider is temporarily unavailable
    BackendUnavailable,
    /// Any other rejection
    Other,
}

/// Well-known OAuth2 error and sub-error codes
pub mod codes {
    /// `invalid_grant`
    pub const INVALID_GRANT: &str = "invalid_grant";
    /// `interaction_required`
    pub const INTERACTION_REQUIRED: &str = "interaction_required";
    /// `bad_token`
    pub const BAD_TOKEN: &str = "bad_token";
    /// `client_mismatch`
    pub const CLIENT_MISMATCH: &str = "client_mismatch";
    /// `protection_policy_required`
    pub const PROTECTION_POLICY_REQUIRED: &str = "protection_policy_required";
    /// `service_not_available`
    pub const SERVICE_NOT_AVAILABLE: &str = "service_not_available";
    /// `request_timeout`
    pub const REQUEST_TIMEOUT: &str = "request_timeout";
    /// `authorization_pending`
    pub const AUTHORIZATION_PENDING: &str = "authorization_pending";
}

/// The identity provider rejected a request
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("identity provider returned '{error_code}'{}", .sub_error.as_deref().map(|s| format!(" ({})", s)).unwrap_or_default())]
pub struct ServiceError {
    error_code: String,
    sub_error: Option<String>,
    description: Option<String>,
    status_code: Option<u16>,
    correlation_id: Option<String>,
}

impl ServiceError {
    /// Constructs a service error with the given OAuth2 error code
    pub fn new(error_code: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            sub_error: None,
            description: None,
            status_code: None,
            correlation_id: None,
        }
    }

    /// Attaches a sub-error code
    pub fn with_sub_error(mut self, sub_error: impl Into<String>) -> Self {
        self.sub_error = Some(sub_error.into());
        self
    }

    /// Attaches a human-readable description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attaches the HTTP status code of the response
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// Attaches the correlation ID reported by the identity provider
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// The OAuth2 error code
    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    /// The sub-error code, if any
    pub fn sub_error(&self) -> Option<&str> {
        self.sub_error.as_deref()
    }

    /// The error description, if any
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The HTTP status code, if the error came from an HTTP response
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// The correlation ID, if any
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    fn sub_error_is(&self, code: &str) -> bool {
        self.sub_error
            .as_deref()
            .map_or(false, |s| s.eq_ignore_ascii_case(code))
    }

    fn error_code_is(&self, code: &str) -> bool {
        self.error_code.eq_ignore_ascii_case(code)
    }

    /// Whether the identity provider appears to be down or throttling
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self.status_code, Some(429) | Some(500..=599))
            || self.error_code_is(codes::SERVICE_NOT_AVAILABLE)
            || self.error_code_is(codes::REQUEST_TIMEOUT)
    }

    /// Whether the user must interact with the identity provider to resolve the error
    pub fn requires_interaction(&self) -> bool {
        if self.error_code_is(codes::INTERACTION_REQUIRED) {
            return true;
        }

        self.error_code_is(codes::INVALID_GRANT)
            && !self.sub_error_is(codes::CLIENT_MISMATCH)
            && !self.sub_error_is(codes::PROTECTION_POLICY_REQUIRED)
    }

    /// Classifies the error for recovery decisions
    pub fn classification(&self) -> ErrorClassification {
        if self.sub_error_is(codes::BAD_TOKEN) {
            ErrorClassification::BadToken
        } else if self.sub_error_is(codes::CLIENT_MISMATCH) {
            ErrorClassification::ClientMismatch
        } else if self.is_backend_unavailable() {
            ErrorClassification::BackendUnavailable
        } else if self.error_code_is(codes::INVALID_GRANT) {
            ErrorClassification::InvalidGrant
        } else {
            ErrorClassification::Other
        }
    }
}

/// The library was used incorrectly; these errors never reach the network
#[derive(Debug, Error)]
pub enum ClientError {
    /// Neither an account nor a login hint was supplied for a silent request
    #[error("a silent request needs either an account or a login hint")]
    MissingAccountOrLoginHint,
    /// A family lookup was attempted without a family ID
    #[error("family ID cannot be empty")]
    EmptyFamilyId,
    /// The authority string could not be parsed
    #[error("invalid authority '{0}'")]
    InvalidAuthority(String),
}

/// The primary token cache could not be read or written
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache accessor failed
    #[error("cache storage failed")]
    Storage(#[source] BoxError),
    /// A serialized cache could not be read or written
    #[error("malformed serialized token cache")]
    Malformed(#[from] serde_json::Error),
    /// A cache notification hook failed
    #[error("cache notification '{hook}' failed")]
    Notification {
        /// The hook that failed
        hook: &'static str,
        /// The underlying error
        #[source]
        source: BoxError,
    },
}

pub(crate) fn storage(source: BoxError) -> CacheError {
    CacheError::Storage(source)
}

/// The client info blob returned by the identity provider is malformed
#[derive(Debug, Error)]
#[error("malformed client info")]
pub struct MalformedClientInfo {
    #[from]
    source: BoxError,
}

pub(crate) fn malformed_client_info(source: impl Into<BoxError>) -> MalformedClientInfo {
    MalformedClientInfo {
        source: source.into(),
    }
}

/// An ID token could not be decoded into claims
#[derive(Debug, Error)]
#[error("malformed ID token")]
pub struct MalformedIdToken {
    #[from]
    source: BoxError,
}

pub(crate) fn malformed_id_token(source: impl Into<BoxError>) -> MalformedIdToken {
    MalformedIdToken {
        source: source.into(),
    }
}

/// An error while acquiring a token
#[derive(Debug, Error)]
pub enum AcquireTokenError {
    /// An interactive flow is required
    #[error(transparent)]
    UiRequired(#[from] UiRequiredError),
    /// The identity provider rejected the request
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The library was used incorrectly
    #[error(transparent)]
    Client(#[from] ClientError),
    /// The token cache failed
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// The request was cancelled before the token exchange
    #[error("token acquisition was cancelled")]
    Cancelled,
}

impl AcquireTokenError {
    /// The service error, if this failure came from the identity provider
    pub fn as_service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(e) => Some(e),
            _ => None,
        }
    }

    /// The interaction-required error, if this failure needs a prompt
    pub fn as_ui_required(&self) -> Option<&UiRequiredError> {
        match self {
            Self::UiRequired(e) => Some(e),
            _ => None,
        }
    }
}
