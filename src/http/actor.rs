use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use ulid::Ulid;

use crate::model::{Actor, Role};

use super::ApiError;

/// Set by the upstream gateway after authenticating the caller.
pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, ApiError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| ApiError::unauthorized(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| ApiError::unauthorized(format!("invalid {name} header")))
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id: Ulid = header(parts, USER_ID_HEADER)?
            .trim()
            .parse()
            .map_err(|_| ApiError::unauthorized(format!("invalid {USER_ID_HEADER} header")))?;
        let role: Role = header(parts, USER_ROLE_HEADER)?
            .parse()
            .map_err(|_| ApiError::unauthorized(format!("invalid {USER_ROLE_HEADER} header")))?;
        Ok(Actor { user_id, role })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(headers: &[(&str, &str)]) -> Result<Actor, ApiError> {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (mut parts, ()) = builder.body(()).unwrap().into_parts();
        Actor::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_identity_headers() {
        let id = Ulid::new();
        let actor = extract(&[(USER_ID_HEADER, &id.to_string()), (USER_ROLE_HEADER, "host")])
            .await
            .unwrap();
        assert_eq!(actor, Actor::host(id));
    }

    #[tokio::test]
    async fn missing_or_bad_headers_are_unauthorized() {
        let err = extract(&[(USER_ROLE_HEADER, "guest")]).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);

        let id = Ulid::new().to_string();
        let err = extract(&[(USER_ID_HEADER, &id), (USER_ROLE_HEADER, "admin")])
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNAUTHORIZED);
    }
}
