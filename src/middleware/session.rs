//! Cookie-backed sessions.
//!
//! [`StartSession`] reads the session id from the session cookie, loads the
//! data from a [`SessionStore`], and puts a [`Session`] handle in the request
//! extensions. Once the rest of the chain has produced a response it writes
//! the data back and (re)sets the cookie. Every session carries a CSRF token
//! under [`CSRF_TOKEN_KEY`] from the moment it is created.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use http::HeaderValue;
use http::header::SET_COOKIE;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Next};
use crate::{Request, Response};

pub const DEFAULT_COOKIE: &str = "strata_session";
pub const CSRF_TOKEN_KEY: &str = "_token";

pub type SessionData = HashMap<String, String>;

/// Where session data lives between requests. Implementations must be safe
/// to share across concurrent requests.
pub trait SessionStore: Send + Sync + 'static {
    fn load(&self, id: &str) -> BoxFuture<'_, Option<SessionData>>;
    fn save(&self, id: &str, data: SessionData) -> BoxFuture<'_, ()>;
}

/// Idle lifetime of a [`MemorySessionStore`] entry unless configured.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120 * 60);

/// Process-local store. Sessions are lost on restart, and a session not
/// saved for longer than the idle timeout is gone.
pub struct MemorySessionStore {
    idle_timeout: Duration,
    state: tokio::sync::Mutex<Sessions>,
}

#[derive(Default)]
struct Sessions {
    entries: HashMap<String, (SessionData, Instant)>,
    next_sweep: Option<Instant>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self { idle_timeout, state: Default::default() }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &str) -> BoxFuture<'_, Option<SessionData>> {
        let id = id.to_owned();
        Box::pin(async move {
            let now = Instant::now();
            let mut state = self.state.lock().await;
            if state.entries.get(&id).is_some_and(|(_, expires)| now >= *expires) {
                debug!("session expired");
                state.entries.remove(&id);
            }
            state.entries.get(&id).map(|(data, _)| data.clone())
        })
    }

    fn save(&self, id: &str, data: SessionData) -> BoxFuture<'_, ()> {
        let id = id.to_owned();
        Box::pin(async move {
            let now = Instant::now();
            let mut state = self.state.lock().await;
            if state.next_sweep.is_none_or(|at| now >= at) {
                state.entries.retain(|_, (_, expires)| now < *expires);
                state.next_sweep = Some(now + self.idle_timeout);
            }
            state.entries.insert(id, (data, now + self.idle_timeout));
        })
    }
}

/// Handle to the current request's session.
#[derive(Clone, Debug)]
pub struct Session {
    id: String,
    data: Arc<Mutex<SessionData>>,
}

impl Session {
    fn new(id: String, data: SessionData) -> Self {
        Self { id, data: Arc::new(Mutex::new(data)) }
    }

    pub fn id(&self) -> &str { &self.id }

    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        self.lock().remove(key)
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.get(CSRF_TOKEN_KEY)
    }

    fn snapshot(&self) -> SessionData {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct StartSession {
    store: Arc<dyn SessionStore>,
    cookie: String,
}

impl StartSession {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store, cookie: DEFAULT_COOKIE.to_owned() }
    }

    pub fn cookie_name(mut self, name: &str) -> Self {
        self.cookie = name.to_owned();
        self
    }
}

impl Middleware for StartSession {
    fn handle(&self, mut req: Request, next: Next) -> BoxFuture<'static, Response> {
        let store = Arc::clone(&self.store);
        let cookie = self.cookie.clone();
        let presented = req.header("cookie").and_then(|h| cookie_value(h, &cookie)).map(str::to_owned);

        Box::pin(async move {
            let loaded = match &presented {
                Some(id) => store.load(id).await.map(|data| (id.clone(), data)),
                None => None,
            };
            let (id, mut data) = loaded.unwrap_or_else(|| {
                debug!("starting new session");
                (Uuid::new_v4().simple().to_string(), SessionData::new())
            });
            data.entry(CSRF_TOKEN_KEY.to_owned())
                .or_insert_with(|| Uuid::new_v4().simple().to_string());

            let session = Session::new(id, data);
            req.extensions_mut().insert(session.clone());

            let mut res = next.run(req).await;

            store.save(session.id(), session.snapshot()).await;
            let set_cookie = format!("{cookie}={}; Path=/; HttpOnly; SameSite=Lax", session.id());
            match HeaderValue::try_from(set_cookie) {
                Ok(value) => {
                    res.headers_mut().append(SET_COOKIE, value);
                }
                Err(e) => warn!("invalid session cookie: {e}"),
            }
            res
        })
    }
}

/// Value of cookie `name` in a `cookie` request header.
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}
