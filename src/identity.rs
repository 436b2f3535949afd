//! Identity context. Authentication happens upstream; the pipeline only sees a resolved [`Actor`]
//! in the request extensions.

use crate::permissions::Role;
use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_LABEL_HEADER: &str = "X-User-Label";
/// Comma-separated role names.
pub const USER_ROLES_HEADER: &str = "X-User-Roles";

/// The caller of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    /// Display label, usually an email.
    pub label: String,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn new(id: impl Into<String>, label: impl Into<String>, roles: Vec<Role>) -> Self {
        Actor {
            id: id.into(),
            label: label.into(),
            roles,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(Role::is_admin)
    }
}

/// Middleware that trusts identity headers set by an authenticating proxy. Requests without
/// `X-User-Id` pass through with no actor attached.
pub async fn trusted_headers(mut req: Request, next: Next) -> Response {
    if let Some(actor) = actor_from(req.headers()) {
        req.extensions_mut().insert(actor);
    }
    next.run(req).await
}

/// Actor described by the identity headers, if `X-User-Id` is present.
pub fn actor_from(headers: &HeaderMap) -> Option<Actor> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let id = header(USER_ID_HEADER)?;
    let label = header(USER_LABEL_HEADER).unwrap_or_default();
    let roles = header(USER_ROLES_HEADER)
        .map(|raw| parse_roles(&raw))
        .unwrap_or_default();
    Some(Actor::new(id, label, roles))
}

fn parse_roles(raw: &str) -> Vec<Role> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Role::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, routing::get, Extension, Router};
    use tower::ServiceExt;

    #[test]
    fn admin_role_marks_admin() {
        assert!(Actor::new("1", "a", vec![Role::visitor(), Role::admin()]).is_admin());
        assert!(!Actor::new("1", "a", vec![Role::visitor()]).is_admin());
    }

    #[test]
    fn roles_header_is_comma_separated() {
        assert_eq!(parse_roles(" admin, visitor ,,"), vec![Role::admin(), Role::visitor()]);
    }

    #[test]
    fn actor_needs_a_user_id() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ROLES_HEADER, "admin".parse().unwrap());
        assert!(actor_from(&headers).is_none());

        headers.insert(USER_ID_HEADER, " u7 ".parse().unwrap());
        let actor = actor_from(&headers).unwrap();
        assert_eq!(actor.id, "u7");
        assert_eq!(actor.label, "");
        assert!(actor.is_admin());
    }

    #[tokio::test]
    async fn headers_become_an_actor() {
        let app = Router::new()
            .route(
                "/",
                get(|actor: Option<Extension<Actor>>| async move {
                    actor.map(|Extension(a)| format!("{}|{}|{}", a.id, a.label, a.roles.len())).unwrap_or_default()
                }),
            )
            .layer(axum::middleware::from_fn(trusted_headers));

        let req = HttpRequest::builder()
            .uri("/")
            .header(USER_ID_HEADER, "u1")
            .header(USER_LABEL_HEADER, "ada@example.com")
            .header(USER_ROLES_HEADER, "visitor,admin")
            .body(Body::empty())
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"u1|ada@example.com|2");

        let res = app
            .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }
}
