use crate::error::{Error, Result};
use crate::inner::SessionId;
use crate::storage::Storage;
use crate::store::SessionStore;
use async_trait::async_trait;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderName, HeaderValue, StatusCode};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

/// Resolves a presented token to the principal it authenticates.
#[async_trait]
pub trait TokenAuthenticator: Send + Sync + 'static {
    type Principal: Clone + Send + Sync + 'static;

    /// `Ok(None)` means the token is not (or no longer) valid.
    async fn authenticate_token(&self, token: &SessionId) -> Result<Option<Self::Principal>>;
}

/// Treats the token as a session id and yields the stored session payload.
pub struct SessionAuthenticator<S: Storage, P> {
    store: SessionStore<S>,
    _principal: PhantomData<fn() -> P>,
}

impl<S: Storage, P> SessionAuthenticator<S, P> {
    pub fn new(store: SessionStore<S>) -> Self {
        SessionAuthenticator {
            store,
            _principal: PhantomData,
        }
    }
}

#[async_trait]
impl<S, P> TokenAuthenticator for SessionAuthenticator<S, P>
where
    S: Storage,
    P: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Principal = P;

    async fn authenticate_token(&self, token: &SessionId) -> Result<Option<P>> {
        match self.store.session::<P>(token).await {
            Ok(principal) => Ok(Some(principal)),
            Err(Error::SessionNotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Accepts exactly one fixed token; useful for service-to-service calls.
#[derive(Debug, Clone)]
pub struct SingleTokenAuthenticator {
    token: SessionId,
}

impl SingleTokenAuthenticator {
    pub fn new(token: SessionId) -> Self {
        SingleTokenAuthenticator { token }
    }
}

#[async_trait]
impl TokenAuthenticator for SingleTokenAuthenticator {
    type Principal = SessionId;

    async fn authenticate_token(&self, token: &SessionId) -> Result<Option<SessionId>> {
        Ok((*token == self.token).then_some(*token))
    }
}

#[derive(Debug, Clone)]
enum TokenSource {
    /// `access_token` query parameter, then `Authorization: Bearer`.
    Bearer,
    Header(HeaderName),
}

impl TokenSource {
    fn extract(&self, req: &Request) -> Option<SessionId> {
        let raw = match self {
            TokenSource::Bearer => query_token(req).or_else(|| bearer_token(req))?,
            TokenSource::Header(name) => req.headers().get(name)?.to_str().ok()?.trim().to_string(),
        };
        raw.parse().ok()
    }
}

fn query_token(req: &Request) -> Option<String> {
    req.uri()
        .query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == "access_token")
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn bearer_token(req: &Request) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim().to_string())
}

/// What [`BearerAuth`] does with a request that carries no valid token.
pub trait Unauthenticated<E>: Clone + Send + 'static {
    /// `challenge` is set when tokens are read the bearer way, so a
    /// rejection can carry `WWW-Authenticate: Bearer`.
    fn respond(&self, req: Request, challenge: bool) -> BoxFuture<'static, std::result::Result<Response, E>>;
}

/// Answers 401.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reject;

impl<E: Send + 'static> Unauthenticated<E> for Reject {
    fn respond(&self, _req: Request, challenge: bool) -> BoxFuture<'static, std::result::Result<Response, E>> {
        let mut res = StatusCode::UNAUTHORIZED.into_response();
        if challenge {
            res.headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        Box::pin(std::future::ready(Ok(res)))
    }
}

/// Hands the request to another service, e.g. an anonymous view.
#[derive(Debug, Clone)]
pub struct Fallback<F>(pub F);

impl<F> Unauthenticated<F::Error> for Fallback<F>
where
    F: Service<Request, Response = Response> + Clone + Send + 'static,
    F::Future: Send + 'static,
    F::Error: Send + 'static,
{
    fn respond(&self, req: Request, _challenge: bool) -> BoxFuture<'static, std::result::Result<Response, F::Error>> {
        Box::pin(self.0.clone().oneshot(req))
    }
}

/// Tower layer guarding a service with token authentication.
///
/// Missing or unknown tokens get 401 unless a [`fallback`] service is set,
/// authenticator failures 500. On success the principal is inserted into
/// the request extensions, so handlers can take it with
/// `Extension<Principal>`.
///
/// [`fallback`]: BearerAuthLayer::fallback
pub struct BearerAuthLayer<A, U = Reject> {
    authenticator: Arc<A>,
    source: TokenSource,
    unauthenticated: U,
}

impl<A: TokenAuthenticator> BearerAuthLayer<A> {
    pub fn new(authenticator: A) -> Self {
        BearerAuthLayer {
            authenticator: Arc::new(authenticator),
            source: TokenSource::Bearer,
            unauthenticated: Reject,
        }
    }

    /// Reads the token from the header `name` instead.
    pub fn with_header(authenticator: A, name: HeaderName) -> Self {
        BearerAuthLayer {
            authenticator: Arc::new(authenticator),
            source: TokenSource::Header(name),
            unauthenticated: Reject,
        }
    }
}

impl<A, U> BearerAuthLayer<A, U> {
    /// Routes requests without a valid token to `service` instead of
    /// answering 401.
    pub fn fallback<F>(self, service: F) -> BearerAuthLayer<A, Fallback<F>> {
        BearerAuthLayer {
            authenticator: self.authenticator,
            source: self.source,
            unauthenticated: Fallback(service),
        }
    }
}

impl<A, U: Clone> Clone for BearerAuthLayer<A, U> {
    fn clone(&self) -> Self {
        BearerAuthLayer {
            authenticator: self.authenticator.clone(),
            source: self.source.clone(),
            unauthenticated: self.unauthenticated.clone(),
        }
    }
}

impl<S, A, U: Clone> Layer<S> for BearerAuthLayer<A, U> {
    type Service = BearerAuth<S, A, U>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuth {
            inner,
            authenticator: self.authenticator.clone(),
            source: self.source.clone(),
            unauthenticated: self.unauthenticated.clone(),
        }
    }
}

pub struct BearerAuth<S, A, U = Reject> {
    inner: S,
    authenticator: Arc<A>,
    source: TokenSource,
    unauthenticated: U,
}

impl<S: Clone, A, U: Clone> Clone for BearerAuth<S, A, U> {
    fn clone(&self) -> Self {
        BearerAuth {
            inner: self.inner.clone(),
            authenticator: self.authenticator.clone(),
            source: self.source.clone(),
            unauthenticated: self.unauthenticated.clone(),
        }
    }
}

impl<S, A, U> Service<Request> for BearerAuth<S, A, U>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    A: TokenAuthenticator,
    U: Unauthenticated<S::Error>,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let authenticator = self.authenticator.clone();
        let unauthenticated = self.unauthenticated.clone();
        let challenge = matches!(self.source, TokenSource::Bearer);
        let token = self.source.extract(&req);

        Box::pin(async move {
            let Some(token) = token else {
                debug!(path = %req.uri().path(), "request without a usable token");
                return unauthenticated.respond(req, challenge).await;
            };
            match authenticator.authenticate_token(&token).await {
                Ok(Some(principal)) => {
                    req.extensions_mut().insert(principal);
                    inner.call(req).await
                }
                Ok(None) => unauthenticated.respond(req, challenge).await,
                Err(err) => {
                    warn!(error = %err, "token authentication failed");
                    Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response())
                }
            }
        })
    }
}
