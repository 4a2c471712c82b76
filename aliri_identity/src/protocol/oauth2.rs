//! A token exchange that redeems refresh tokens at an OAuth2 token endpoint

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{TokenExchange, TokenRequest, TokenResponse};
use crate::{
    authority::Authority,
    error::{codes, ServiceError},
    scopes::{ScopeSet, RESERVED_SCOPES},
    ClientIdRef, RefreshTokenRef,
};

/// The response body could not be understood
pub const JSON_PARSE_FAILED: &str = "json_parse_failed";

/// Redeems refresh tokens over HTTP
///
/// The token endpoint is derived from the request's authority unless a fixed
/// endpoint is configured.
#[derive(Debug, Clone)]
pub struct OAuth2TokenExchange {
    client: reqwest::Client,
    token_url: Option<reqwest::Url>,
}

impl OAuth2TokenExchange {
    /// Constructs an exchange that sends requests with the given client
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            token_url: None,
        }
    }

    /// Sends every request to a fixed token endpoint
    pub fn with_token_url(mut self, token_url: reqwest::Url) -> Self {
        self.token_url = Some(token_url);
        self
    }

    fn token_url_for(&self, authority: &Authority) -> Result<reqwest::Url, ServiceError> {
        if let Some(url) = &self.token_url {
            return Ok(url.clone());
        }

        let raw = format!("{}oauth2/v2.0/token", authority.canonical());
        raw.parse().map_err(|_| {
            ServiceError::new("invalid_authority").with_description(format!(
                "unable to construct token endpoint from '{}'",
                raw
            ))
        })
    }
}

#[async_trait]
impl TokenExchange for OAuth2TokenExchange {
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse, ServiceError> {
        let token_url = self.token_url_for(&request.authority)?;

        let mut scopes = request.scopes.clone();
        for reserved in RESERVED_SCOPES {
            scopes.insert(reserved);
        }

        let grant = RefreshTokenGrant {
            grant_type: "refresh_token",
            client_id: &request.client_id,
            scope: scopes.normalized(),
            refresh_token: &request.refresh_token,
            client_info: "1",
            claims: request.claims.as_deref(),
        };

        request_token(&self.client, token_url, &grant, &scopes).await
    }
}

#[derive(Serialize)]
struct RefreshTokenGrant<'a> {
    grant_type: &'static str,
    client_id: &'a ClientIdRef,
    scope: String,
    refresh_token: &'a RefreshTokenRef,
    client_info: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<&'a str>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    suberror: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
}

impl ErrorBody {
    fn into_service_error(self, status: u16) -> ServiceError {
        let mut error = ServiceError::new(self.error).with_status_code(status);
        if let Some(sub_error) = self.suberror {
            error = error.with_sub_error(sub_error);
        }
        if let Some(description) = self.error_description {
            error = error.with_description(description);
        }
        if let Some(correlation_id) = self.correlation_id {
            error = error.with_correlation_id(correlation_id);
        }
        error
    }
}

fn transport_error(error: reqwest::Error) -> ServiceError {
    let code = if error.is_timeout() {
        codes::REQUEST_TIMEOUT
    } else {
        codes::SERVICE_NOT_AVAILABLE
    };

    ServiceError::new(code).with_description(error.to_string())
}

#[tracing::instrument(
    err,
    skip(client, token_url, grant, scopes),
    fields(
        token_url = %token_url,
        client_id = %grant.client_id,
        scopes = %scopes.normalized(),
        has_claims = grant.claims.is_some(),
    ),
)]
async fn request_token(
    client: &reqwest::Client,
    token_url: reqwest::Url,
    grant: &RefreshTokenGrant<'_>,
    scopes: &ScopeSet,
) -> Result<TokenResponse, ServiceError> {
    tracing::trace!("redeeming refresh token at token endpoint");

    let resp = client
        .post(token_url)
        .form(grant)
        .send()
        .await
        .map_err(transport_error)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from identity provider"
    );

    let body = resp.bytes().await.map_err(transport_error)?;

    if !status.is_success() {
        return Err(match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(error) => error.into_service_error(status.as_u16()),
            Err(_) if status.is_server_error() => {
                ServiceError::new(codes::SERVICE_NOT_AVAILABLE).with_status_code(status.as_u16())
            }
            Err(_) => ServiceError::new(JSON_PARSE_FAILED)
                .with_status_code(status.as_u16())
                .with_description(String::from_utf8_lossy(&body).into_owned()),
        });
    }

    let token: TokenResponse = serde_json::from_slice(&body).map_err(|error| {
        ServiceError::new(JSON_PARSE_FAILED)
            .with_status_code(status.as_u16())
            .with_description(error.to_string())
    })?;

    tracing::info!(
        has_id_token = token.id_token.is_some(),
        has_refresh_token = token.refresh_token.is_some(),
        is_family_token = token.foci.is_some(),
        lifetime = token.expires_in,
        "received new tokens"
    );

    Ok(token)
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use serde_json::json;
    use wiremock::{
        matchers::{body_string_contains, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        error::ErrorClassification, ClientId, RefreshToken,
    };

    fn grant() -> Result<TokenRequest> {
        Ok(TokenRequest {
            authority: Authority::parse("https://login.example.com/utid")?,
            client_id: ClientId::from_static("client"),
            scopes: ScopeSet::parse("User.Read"),
            refresh_token: RefreshToken::from_static("rt-secret"),
            claims: None,
        })
    }

    async fn exchange_for(server: &MockServer) -> Result<OAuth2TokenExchange> {
        Ok(OAuth2TokenExchange::new(reqwest::Client::new())
            .with_token_url(format!("{}/token", server.uri()).parse()?))
    }

    #[tokio::test]
    async fn redeems_refresh_token() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-secret"))
            .and(body_string_contains("client_info=1"))
            .and(body_string_contains("offline_access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-at",
                "refresh_token": "new-rt",
                "expires_in": 3599,
                "ext_expires_in": 3599,
                "token_type": "Bearer",
                "scope": "User.Read openid profile",
                "foci": "1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = exchange_for(&server).await?.exchange(&grant()?).await?;

        assert_eq!(response.access_token.as_str(), "new-at");
        assert_eq!(
            response.refresh_token.as_ref().map(|t| t.as_str()),
            Some("new-rt")
        );
        assert_eq!(response.expires_in, 3599);
        assert_eq!(response.foci.as_ref().map(|f| f.as_str()), Some("1"));
        Ok(())
    }

    #[tokio::test]
    async fn error_bodies_are_classified() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "suberror": "bad_token",
                "error_description": "the refresh token was revoked",
                "correlation_id": "corr-1"
            })))
            .mount(&server)
            .await;

        let error = exchange_for(&server)
            .await?
            .exchange(&grant()?)
            .await
            .err()
            .ok_or_else(|| color_eyre::eyre::eyre!("expected an error"))?;

        assert_eq!(error.classification(), ErrorClassification::BadToken);
        assert_eq!(error.status_code(), Some(400));
        assert_eq!(error.correlation_id(), Some("corr-1"));
        Ok(())
    }

    #[tokio::test]
    async fn server_errors_without_a_body_are_backend_unavailable() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down for maintenance"))
            .mount(&server)
            .await;

        let error = exchange_for(&server)
            .await?
            .exchange(&grant()?)
            .await
            .err()
            .ok_or_else(|| color_eyre::eyre::eyre!("expected an error"))?;

        assert_eq!(
            error.classification(),
            ErrorClassification::BackendUnavailable
        );
        Ok(())
    }

    #[test]
    fn token_url_is_derived_from_the_authority() -> Result<()> {
        let exchange = OAuth2TokenExchange::new(reqwest::Client::new());
        let url = exchange.token_url_for(&Authority::parse("https://login.example.com/utid")?)?;

        assert_eq!(
            url.as_str(),
            "https://login.example.com/utid/oauth2/v2.0/token"
        );
        Ok(())
    }
}
