use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use raffle_types::RaffleId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub is_admin: bool,
}

impl Identity {
    pub fn anonymous() -> Self { Self { name: "anonymous".into(), is_admin: false } }
    pub fn admin(name: impl Into<String>) -> Self { Self { name: name.into(), is_admin: true } }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    Anonymous,
}

impl Credentials {
    /// Read an `Authorization: Bearer <token>` header.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| Self::Bearer(t.trim().to_string()))
            .unwrap_or(Self::Anonymous)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    RegisterRaffle,
    SelectWinner { raffle: RaffleId },
    /// Draw bypassing the minimum-ticket and waiting-period rules.
    ForceDraw { raffle: RaffleId },
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegisterRaffle => write!(f, "register-raffle"),
            Self::SelectWinner { raffle } => write!(f, "select-winner:{raffle}"),
            Self::ForceDraw { raffle } => write!(f, "force-draw:{raffle}"),
        }
    }
}

/// Admin authorization boundary. Session issuance happens elsewhere; this
/// only checks what a request presents.
#[async_trait]
pub trait AdminAuth: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Identity;
    async fn authorize(&self, identity: &Identity, action: &Action) -> bool;
}

/// A single shared bearer token grants every admin action.
pub struct StaticTokenAuth {
    token: Option<String>,
}

impl StaticTokenAuth {
    /// With `None` nobody is admin.
    pub fn new(token: Option<String>) -> Self {
        Self { token: token.filter(|t| !t.is_empty()) }
    }
}

#[async_trait]
impl AdminAuth for StaticTokenAuth {
    async fn authenticate(&self, credentials: &Credentials) -> Identity {
        match (credentials, &self.token) {
            (Credentials::Bearer(presented), Some(expected))
                if constant_time_eq(presented.as_bytes(), expected.as_bytes()) =>
            {
                Identity::admin("static-token")
            }
            _ => Identity::anonymous(),
        }
    }

    async fn authorize(&self, identity: &Identity, _action: &Action) -> bool {
        identity.is_admin
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
