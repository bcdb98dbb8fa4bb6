//! Bearer-token gate for the image API.
//!
//! The token is resolved into an owner ID once per request and parked in the
//! request extensions. Handlers read it back through [`AuthenticatedUser`].

use super::jwt::{JwtError, JwtService};
use actix_web::body::EitherBody;
use actix_web::dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform, forward_ready};
use actix_web::http::{StatusCode, header};
use actix_web::{Error, FromRequest, HttpMessage, HttpRequest, HttpResponse, ResponseError};
use futures::future::{LocalBoxFuture, Ready, ready};
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// Why a request could not be tied to an owner.
#[derive(Debug, thiserror::Error)]
pub enum OwnerError {
    #[error("no bearer token")]
    MissingToken,
    #[error("Authorization header is not a bearer token")]
    MalformedHeader,
    #[error("token rejected: {0}")]
    Rejected(#[from] JwtError),
    #[error("token subject {0:?} is not an owner ID")]
    InvalidOwner(String),
    #[error("no owner resolved for this request")]
    Unresolved,
}

impl ResponseError for OwnerError {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            OwnerError::Rejected(JwtError::TokenExpired) => "Token expired",
            OwnerError::Rejected(_) | OwnerError::InvalidOwner(_) => "Token verification failed",
            OwnerError::MissingToken | OwnerError::MalformedHeader | OwnerError::Unresolved => {
                "Missing or invalid authorization token"
            }
        };
        HttpResponse::build(self.status_code()).json(serde_json::json!({ "error": message }))
    }
}

/// Owner of every record the request may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

impl FromRequest for AuthenticatedUser {
    type Error = OwnerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthenticatedUser>()
                .copied()
                .ok_or(OwnerError::Unresolved),
        )
    }
}

fn is_public_path(path: &str) -> bool {
    path == "/" || path == "/api/health" || path.starts_with("/static/")
}

fn resolve_owner(req: &ServiceRequest, jwt: &JwtService) -> Result<AuthenticatedUser, OwnerError> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(OwnerError::MissingToken)?;
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(OwnerError::MalformedHeader)?;
    let claims = jwt.verify_token(token.trim())?;
    Uuid::parse_str(&claims.sub)
        .map(AuthenticatedUser)
        .map_err(|_| OwnerError::InvalidOwner(claims.sub))
}

/// Rejects non-public requests that do not carry a valid owner token.
#[derive(Clone)]
pub struct AuthMiddleware {
    jwt: Arc<JwtService>,
}

impl AuthMiddleware {
    pub fn new(jwt: JwtService) -> Self {
        Self { jwt: Arc::new(jwt) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = OwnerGate<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(OwnerGate {
            service: Rc::new(service),
            jwt: self.jwt.clone(),
        }))
    }
}

pub struct OwnerGate<S> {
    service: Rc<S>,
    jwt: Arc<JwtService>,
}

impl<S, B> Service<ServiceRequest> for OwnerGate<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if !is_public_path(req.path()) {
            match resolve_owner(&req, &self.jwt) {
                Ok(owner) => {
                    req.extensions_mut().insert(owner);
                }
                Err(e) => {
                    log::warn!("Rejected {} {}: {}", req.method(), req.path(), e);
                    let response = e.error_response().map_into_right_body();
                    return Box::pin(async move { Ok(req.into_response(response)) });
                }
            }
        }

        let service = self.service.clone();
        Box::pin(async move { Ok(service.call(req).await?.map_into_left_body()) })
    }
}
