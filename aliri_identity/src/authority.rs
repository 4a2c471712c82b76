//! Authorities that issue tokens

use std::{fmt, str::FromStr};

use crate::{error::ClientError, Environment, EnvironmentRef, TenantId, TenantIdRef};

/// The tenant used when no specific tenant is known
pub const COMMON_TENANT: &str = "common";

/// The flavor of identity provider behind an authority
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AuthorityType {
    /// A multi-tenant directory that supports re-tenanting
    Aad,
    /// A business-to-consumer directory, addressed with a user-flow policy
    B2C,
    /// An on-premises federation server
    Adfs,
    /// Any other OpenID Connect issuer
    Generic,
}

/// An authority: the host and tenant a token request is sent to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Authority {
    kind: AuthorityType,
    host: Environment,
    tenant: Option<TenantId>,
    policy: Option<String>,
}

impl Authority {
    /// A multi-tenant authority on the given host
    pub fn new(host: Environment, tenant: Option<TenantId>) -> Self {
        Self {
            kind: AuthorityType::Aad,
            host,
            tenant,
            policy: None,
        }
    }

    /// Parses an authority from its `https://host/tenant/` form
    pub fn parse(authority: &str) -> Result<Self, ClientError> {
        let invalid = || ClientError::InvalidAuthority(authority.to_owned());

        let rest = authority.strip_prefix("https://").ok_or_else(invalid)?;
        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let host = segments.next().ok_or_else(invalid)?.to_ascii_lowercase();
        let first = segments.next();

        let authority = match first {
            Some(s) if s.eq_ignore_ascii_case("tfp") => {
                let tenant = segments.next().ok_or_else(invalid)?;
                let policy = segments.next().ok_or_else(invalid)?;
                Self {
                    kind: AuthorityType::B2C,
                    host: Environment::new(host),
                    tenant: Some(TenantId::new(tenant.to_owned())),
                    policy: Some(policy.to_owned()),
                }
            }
            Some(tenant) if host.ends_with(".b2clogin.com") => {
                let policy = segments.next().ok_or_else(invalid)?;
                Self {
                    kind: AuthorityType::B2C,
                    host: Environment::new(host),
                    tenant: Some(TenantId::new(tenant.to_owned())),
                    policy: Some(policy.to_owned()),
                }
            }
            Some(s) if s.eq_ignore_ascii_case("adfs") => Self {
                kind: AuthorityType::Adfs,
                host: Environment::new(host),
                tenant: None,
                policy: None,
            },
            Some(tenant) => Self::new(Environment::new(host), Some(TenantId::new(tenant.to_owned()))),
            None => Self::new(Environment::new(host), None),
        };

        Ok(authority)
    }

    /// Marks this authority as a generic OpenID Connect issuer
    pub fn generic(mut self) -> Self {
        self.kind = AuthorityType::Generic;
        self
    }

    /// The kind of authority
    #[inline]
    pub fn kind(&self) -> AuthorityType {
        self.kind
    }

    /// The authority's host, used as the cache environment
    #[inline]
    pub fn host(&self) -> &EnvironmentRef {
        &self.host
    }

    /// The tenant, if one was specified
    #[inline]
    pub fn tenant(&self) -> Option<&TenantIdRef> {
        self.tenant.as_deref()
    }

    /// Whether this is a business-to-consumer authority
    #[inline]
    pub fn is_b2c(&self) -> bool {
        self.kind == AuthorityType::B2C
    }

    /// Rebuilds this authority for the given tenant
    ///
    /// Only multi-tenant authorities are re-tenanted. Business-to-consumer and
    /// federation authorities are returned unchanged.
    pub fn with_tenant(&self, tenant: Option<&TenantIdRef>) -> Self {
        match (self.kind, tenant) {
            (AuthorityType::Aad, Some(t)) | (AuthorityType::Generic, Some(t))
                if !t.as_str().is_empty() =>
            {
                Self {
                    tenant: Some(t.to_owned()),
                    ..self.clone()
                }
            }
            _ => self.clone(),
        }
    }

    /// The canonical URL form, always ending with `/`
    pub fn canonical(&self) -> String {
        let tenant = self
            .tenant
            .as_ref()
            .map(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .unwrap_or(COMMON_TENANT);

        match self.kind {
            AuthorityType::Adfs => format!("https://{}/adfs/", self.host),
            AuthorityType::B2C => format!(
                "https://{}/tfp/{}/{}/",
                self.host,
                tenant,
                self.policy.as_deref().unwrap_or_default()
            ),
            AuthorityType::Aad | AuthorityType::Generic => {
                format!("https://{}/{}/", self.host, tenant)
            }
        }
    }
}

/// Builds the authority string for a cached item, defaulting to the `common` tenant
pub fn authority_for(environment: &EnvironmentRef, tenant: Option<&TenantIdRef>) -> String {
    Authority::new(environment.to_owned(), tenant.map(ToOwned::to_owned)).canonical()
}

impl FromStr for Authority {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
