//! Authentication and ability checks.
//!
//! Credential verification itself belongs to a [`TokenVerifier`] (bearer
//! tokens) or a [`CredentialVerifier`] (HTTP Basic); this module only
//! extracts credentials, asks the configured verifiers, and records the
//! [`Principal`] that one of them vouches for.
//!
//! Failures are always machine-readable: `401` with a JSON body and a
//! `www-authenticate` challenge, or `403` for `guest`, `verified` and `can`.
//! Never a redirect to a login page: API clients cannot follow a redirect to
//! an HTML form, so there is no redirect mode.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::StatusCode;
use tracing::{debug, warn};

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

/// The authenticated caller, attached to the request extensions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Principal {
    pub id: String,
    pub abilities: Vec<String>,
    /// Whether the caller's email address has been confirmed.
    pub verified: bool,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), abilities: Vec::new(), verified: false }
    }

    pub fn email_verified(mut self) -> Self {
        self.verified = true;
        self
    }

    pub fn with_abilities<I, S>(mut self, abilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abilities.extend(abilities.into_iter().map(Into::into));
        self
    }

    /// `*` grants every ability.
    pub fn can(&self, ability: &str) -> bool {
        self.abilities.iter().any(|a| a == "*" || a == ability)
    }
}

/// Checks a bearer token. Implemented by whatever owns credentials.
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(&self, token: &str) -> BoxFuture<'_, Option<Principal>>;
}

/// Checks a username and password for `auth.basic`.
pub trait CredentialVerifier: Send + Sync + 'static {
    fn verify(&self, username: &str, password: &str) -> BoxFuture<'_, Option<Principal>>;
}

type NamedVerifiers = Arc<[(String, Arc<dyn TokenVerifier>)]>;

/// Named token verifiers. The first one added is the default guard.
#[derive(Clone, Default)]
pub struct Guards {
    order: Vec<String>,
    verifiers: HashMap<String, Arc<dyn TokenVerifier>>,
}

impl Guards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(mut self, name: &str, verifier: impl TokenVerifier) -> Self {
        if self.verifiers.insert(name.to_owned(), Arc::new(verifier)).is_none() {
            self.order.push(name.to_owned());
        }
        self
    }

    /// Builds the stage for `auth` or `auth:<guard>[,<guard>...]`. Unknown
    /// guard names are a configuration error.
    pub fn authenticate(&self, argument: Option<&str>) -> Result<Authenticate, String> {
        Ok(Authenticate { guards: self.select(argument)? })
    }

    /// Builds the stage for `guest` or `guest:<guard>[,<guard>...]`.
    pub fn guest(&self, argument: Option<&str>) -> Result<RejectIfAuthenticated, String> {
        Ok(RejectIfAuthenticated { guards: self.select(argument)? })
    }

    fn select(&self, argument: Option<&str>) -> Result<NamedVerifiers, String> {
        let names: Vec<&str> = match argument {
            Some(list) => list.split(',').map(str::trim).collect(),
            None => self.order.first().map(String::as_str).into_iter().collect(),
        };
        if names.is_empty() {
            return Err("no guards are configured".to_owned());
        }

        let guards = names
            .into_iter()
            .map(|name| {
                self.verifiers
                    .get(name)
                    .map(|v| (name.to_owned(), Arc::clone(v)))
                    .ok_or_else(|| format!("unknown guard `{name}`"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(guards.into())
    }
}

/// Requires a bearer token that one of the guards accepts.
pub struct Authenticate {
    guards: NamedVerifiers,
}

impl Middleware for Authenticate {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture<'static, Response> {
        let Some(token) = bearer_token(&req).map(str::to_owned) else {
            debug!(path = req.path(), "missing bearer token");
            return Box::pin(async { unauthenticated("Bearer") });
        };
        let guards = Arc::clone(&self.guards);

        Box::pin(async move {
            for (name, verifier) in guards.iter() {
                if let Some(principal) = verifier.verify(&token).await {
                    debug!(guard = %name, principal = %principal.id, "authenticated");
                    req.extensions_mut().insert(principal);
                    return next.run(req).await;
                }
            }
            warn!(path = req.path(), "bearer token rejected by every guard");
            unauthenticated("Bearer")
        })
    }
}

/// `auth.basic`: HTTP Basic credentials checked by a [`CredentialVerifier`].
pub struct AuthenticateWithBasicAuth {
    verifier: Arc<dyn CredentialVerifier>,
    challenge: String,
}

impl AuthenticateWithBasicAuth {
    pub fn new(verifier: impl CredentialVerifier) -> Self {
        Self { verifier: Arc::new(verifier), challenge: "Basic".to_owned() }
    }

    /// Realm named in the `www-authenticate` challenge.
    pub fn realm(mut self, realm: &str) -> Self {
        self.challenge = format!("Basic realm=\"{realm}\"");
        self
    }
}

impl Middleware for AuthenticateWithBasicAuth {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture<'static, Response> {
        let challenge = self.challenge.clone();
        let Some((username, password)) = basic_credentials(&req) else {
            debug!(path = req.path(), "missing basic credentials");
            return Box::pin(async move { unauthenticated(&challenge) });
        };
        let verifier = Arc::clone(&self.verifier);

        Box::pin(async move {
            match verifier.verify(&username, &password).await {
                Some(principal) => {
                    debug!(principal = %principal.id, "authenticated with basic credentials");
                    req.extensions_mut().insert(principal);
                    next.run(req).await
                }
                None => {
                    warn!(path = req.path(), "basic credentials rejected");
                    unauthenticated(&challenge)
                }
            }
        })
    }
}

fn unauthenticated(challenge: &str) -> Response {
    let mut res = Response::error(StatusCode::UNAUTHORIZED, "Unauthenticated.");
    res.set_header("www-authenticate", challenge);
    res
}

/// Username and password from `authorization: Basic <base64>`.
pub fn basic_credentials(req: &Request) -> Option<(String, String)> {
    let (scheme, encoded) = req.header("authorization")?.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_owned(), password.to_owned()))
}

/// `guest`: only callers that are not signed in. A principal attached by an
/// earlier stage, or a bearer token one of the guards accepts, ends the
/// request with `403`.
pub struct RejectIfAuthenticated {
    guards: NamedVerifiers,
}

impl Middleware for RejectIfAuthenticated {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        if req.extensions().get::<Principal>().is_some() {
            return Box::pin(async { already_authenticated() });
        }
        let Some(token) = bearer_token(&req).map(str::to_owned) else {
            return next.run(req);
        };
        let guards = Arc::clone(&self.guards);

        Box::pin(async move {
            for (_, verifier) in guards.iter() {
                if verifier.verify(&token).await.is_some() {
                    return already_authenticated();
                }
            }
            next.run(req).await
        })
    }
}

fn already_authenticated() -> Response {
    Response::error(StatusCode::FORBIDDEN, "Already authenticated.")
}

/// `verified`: the principal's email address must be confirmed.
pub struct EnsureEmailIsVerified;

impl Middleware for EnsureEmailIsVerified {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        if req.extensions().get::<Principal>().is_some_and(|p| p.verified) {
            return next.run(req);
        }
        debug!(path = req.path(), "email not verified");
        Box::pin(async { Response::error(StatusCode::FORBIDDEN, "Your email address is not verified.") })
    }
}

/// The token from `authorization: Bearer <token>`; the scheme is
/// case-insensitive.
pub fn bearer_token(req: &Request) -> Option<&str> {
    let (scheme, token) = req.header("authorization")?.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// `can:<ability>`: the authenticated principal must hold the ability.
pub struct Authorize {
    ability: String,
}

impl Authorize {
    pub fn new(ability: impl Into<String>) -> Self {
        Self { ability: ability.into() }
    }

    /// Factory form; the ability argument is mandatory.
    pub fn from_argument(argument: Option<&str>) -> Result<Self, String> {
        argument
            .map(Self::new)
            .ok_or_else(|| "expects an ability, e.g. `can:bookings.create`".to_owned())
    }
}

impl Middleware for Authorize {
    fn handle(&self, req: Request, next: Next) -> BoxFuture<'static, Response> {
        let allowed = req
            .extensions()
            .get::<Principal>()
            .is_some_and(|p| p.can(&self.ability));
        if allowed {
            return next.run(req);
        }
        debug!(ability = %self.ability, path = req.path(), "ability denied");
        Box::pin(async { Response::error(StatusCode::FORBIDDEN, "This action is unauthorized.") })
    }
}
