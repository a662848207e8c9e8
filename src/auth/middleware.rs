//! Axum extractors for authentication and scope checks: a marker type per
//! named scope (`EntitiesReadScope`, `GsOperateScope`, ...), generated with
//! a small macro since the §4.G scope list is large and homogeneous.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::auth::scope::accepts;
use crate::auth::store::AuthStore;
use crate::auth::token::{TokenAuthority, TokenType, Validated, TEST_AUTH_SUBJECT};
use crate::auth::UsedScopes;
use crate::error::Error;

/// Anything able to hand extractors the pieces of the Auth Core they need.
/// Implemented by the crate's `AppState`; kept as a trait here so this
/// module has no forward dependency on `http`.
pub trait AuthState: Send + Sync {
    fn token_authority(&self) -> &TokenAuthority;
    fn auth_store(&self) -> &dyn AuthStore;
    fn used_scopes(&self) -> &UsedScopes;
}

/// The authenticated caller of a request: a stable `userid` plus the set of
/// scopes it is allowed to exercise (resolved eagerly so every downstream
/// scope check is a pure in-memory lookup).
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub userid: uuid::Uuid,
    pub scopes: Vec<String>,
}

impl AuthUser {
    fn accepts(&self, needed: &[&str]) -> bool {
        accepts(self.scopes.iter().map(String::as_str), needed)
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, Error> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(Error::MissingCredentials)?
        .to_str()
        .map_err(|_| Error::InvalidToken("authorization header is not valid UTF-8".to_owned()))?;

    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| Error::InvalidToken("authorization header is not a bearer token".to_owned()))
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: AuthState,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;

        match state.token_authority().validate(token, TokenType::Access)? {
            Validated::Token(claims) => {
                let scopes = state.auth_store().get_entity_scopes(claims.sub).await?;
                Ok(Self {
                    userid: claims.sub,
                    scopes: scopes.into_iter().collect(),
                })
            }
            Validated::TestBypass { scopes, .. } => Ok(Self {
                userid: TEST_AUTH_SUBJECT,
                scopes,
            }),
        }
    }
}

/// Declares a zero-sized extractor that requires an [`AuthUser`] whose
/// scopes satisfy `$needed` (the single-stored-scope rule, see
/// [`crate::auth::scope`]), recording the check in [`UsedScopes`].
macro_rules! scope_guard {
    ($name:ident, $needed:expr) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name(pub AuthUser);

        impl<S> axum::extract::FromRequestParts<S> for $name
        where
            S: AuthState,
        {
            type Rejection = Error;

            async fn from_request_parts(
                parts: &mut axum::http::request::Parts,
                state: &S,
            ) -> Result<Self, Self::Rejection> {
                let user = AuthUser::from_request_parts(parts, state).await?;
                state.used_scopes().record($needed);
                if user.accepts($needed) {
                    Ok(Self(user))
                } else {
                    Err(Error::InsufficientPermissions)
                }
            }
        }
    };
}

scope_guard!(EntitiesCreateScope, &["satop.auth.entities.create"]);
scope_guard!(EntitiesReadScope, &["satop.auth.entities.read"]);
scope_guard!(EntitiesUpdateScope, &["satop.auth.entities.update"]);
scope_guard!(EntitiesDeleteScope, &["satop.auth.entities.delete"]);
scope_guard!(RolesReadScope, &["satop.auth.roles.read"]);
scope_guard!(RolesWriteScope, &["satop.auth.roles.write"]);
scope_guard!(ProvidersReadScope, &["satop.auth.providers.read"]);
scope_guard!(IntrospectionReadScope, &["satop.auth.introspection.read"]);
// Scope names here are the literal contracts from §4.G: `satop.log.write`
// guards the upload route, `satop.log.read` guards the download route.
scope_guard!(LogReadScope, &["satop.log.read"]);
scope_guard!(LogWriteScope, &["satop.log.write"]);
scope_guard!(GsOperateScope, &["satop.gs.operate"]);
scope_guard!(GsTerminalScope, &["satop.gs.terminal"]);

#[derive(Debug, Clone, Copy)]
pub struct AuthUserPresent;

impl<S> FromRequestParts<S> for AuthUserPresent
where
    S: AuthState,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        AuthUser::from_request_parts(parts, state).await?;
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::InMemoryAuthStore;

    struct TestState {
        authority: TokenAuthority,
        store: InMemoryAuthStore,
        used: UsedScopes,
    }

    impl AuthState for TestState {
        fn token_authority(&self) -> &TokenAuthority {
            &self.authority
        }
        fn auth_store(&self) -> &dyn AuthStore {
            &self.store
        }
        fn used_scopes(&self) -> &UsedScopes {
            &self.used
        }
    }

    fn request_with_bearer(token: &str) -> Parts {
        let request = axum::http::Request::builder()
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(())
            .unwrap();
        request.into_parts().0
    }

    #[tokio::test]
    async fn missing_authorization_header_is_rejected() {
        let state = TestState {
            authority: TokenAuthority::new(b"secret-secret-secret-secret-1234"),
            store: InMemoryAuthStore::new(),
            used: UsedScopes::new(),
        };
        let mut parts = axum::http::Request::builder().body(()).unwrap().into_parts().0;
        let err = AuthUser::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert!(matches!(err, Error::MissingCredentials));
    }

    #[tokio::test]
    async fn scope_guard_records_usage_and_enforces_wildcard() {
        // SAFETY: single-threaded test, no concurrent env mutation.
        unsafe { std::env::set_var("SATOP_ENABLE_TEST_AUTH", "1") };

        let state = TestState {
            authority: TokenAuthority::new(b"secret-secret-secret-secret-1234"),
            store: InMemoryAuthStore::new(),
            used: UsedScopes::new(),
        };

        let mut parts = request_with_bearer("operator;satop.auth.*");
        let guard = EntitiesReadScope::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(guard.0.userid, TEST_AUTH_SUBJECT);
        assert_eq!(state.used_scopes().snapshot().len(), 1);

        unsafe { std::env::remove_var("SATOP_ENABLE_TEST_AUTH") };
    }

    #[tokio::test]
    async fn scope_guard_rejects_insufficient_scope() {
        unsafe { std::env::set_var("SATOP_ENABLE_TEST_AUTH", "1") };

        let state = TestState {
            authority: TokenAuthority::new(b"secret-secret-secret-secret-1234"),
            store: InMemoryAuthStore::new(),
            used: UsedScopes::new(),
        };

        let mut parts = request_with_bearer("auditor;satop.artifact.log.read");
        let err = EntitiesReadScope::from_request_parts(&mut parts, &state).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientPermissions));

        unsafe { std::env::remove_var("SATOP_ENABLE_TEST_AUTH") };
    }
}
