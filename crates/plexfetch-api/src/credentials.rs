//! Credential resolution: which server, with which token, for this principal.
//!
//! Every upstream call goes through `resolve`. The server URL always comes
//! from the administrator's settings, so a user token can never point the
//! proxy at another host.

use plexfetch_plex::PlexServer;
use plexfetch_types::models::{Principal, ServerCredentials, ServerSettings};
use thiserror::Error;

use crate::error::ApiError;
use crate::state::AppStateInner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("no media server has been configured")]
    ServerNotConfigured,

    #[error("access denied, please sign in again")]
    AccessDenied,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn resolve(principal: &Principal, settings: &ServerSettings) -> Result<ServerCredentials, CredentialError> {
    let server_url = non_empty(settings.server_url.as_deref()).ok_or(CredentialError::ServerNotConfigured)?;

    let token = match (principal.upstream_token(), principal) {
        (Some(own), _) => own,
        (None, Principal::Admin(_)) => {
            non_empty(settings.server_token.as_deref()).ok_or(CredentialError::AccessDenied)?
        }
        (None, Principal::Delegated(_)) => return Err(CredentialError::AccessDenied),
    };

    Ok(ServerCredentials {
        server_url: server_url.to_string(),
        token: token.to_string(),
    })
}

/// Settings are re-read on every call; nothing is cached between requests.
pub async fn resolve_for_request(state: &AppStateInner, principal: &Principal) -> Result<ServerCredentials, ApiError> {
    let settings = state.with_db(|db| db.get_server_settings()).await?;
    Ok(resolve(principal, &settings)?)
}

/// A request-scoped query client for the principal's effective server.
pub async fn server_for(state: &AppStateInner, principal: &Principal) -> Result<PlexServer, ApiError> {
    let creds = resolve_for_request(state, principal).await?;
    Ok(PlexServer::new(state.http.clone(), &creds)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexfetch_types::models::{AdminPrincipal, DelegatedPrincipal};

    fn admin() -> Principal {
        Principal::Admin(AdminPrincipal {
            id: "a1".into(),
            username: "root".into(),
            password_hash: String::new(),
            last_login: None,
        })
    }

    fn delegated(token: Option<&str>, home: Option<&str>) -> Principal {
        Principal::Delegated(DelegatedPrincipal {
            id: "u1".into(),
            plex_account_id: 5,
            username: "viewer".into(),
            email: None,
            upstream_token: token.map(String::from),
            home_server_url: home.map(String::from),
            last_login: None,
        })
    }

    fn configured() -> ServerSettings {
        ServerSettings {
            server_url: Some("http://10.0.0.5:32400".into()),
            server_token: Some("T1".into()),
            server_machine_id: Some("machine-1".into()),
            server_name: None,
        }
    }

    #[test]
    fn unconfigured_server_fails_for_everyone() {
        let settings = ServerSettings::default();
        assert_eq!(resolve(&admin(), &settings), Err(CredentialError::ServerNotConfigured));
        assert_eq!(
            resolve(&delegated(Some("T2"), None), &settings),
            Err(CredentialError::ServerNotConfigured)
        );

        let blank = ServerSettings {
            server_url: Some("  ".into()),
            ..configured()
        };
        assert_eq!(resolve(&admin(), &blank), Err(CredentialError::ServerNotConfigured));
    }

    #[test]
    fn admin_falls_back_to_configured_token() {
        let creds = resolve(&admin(), &configured()).unwrap();
        assert_eq!(creds.server_url, "http://10.0.0.5:32400");
        assert_eq!(creds.token, "T1");
    }

    #[test]
    fn admin_without_any_token_is_denied() {
        let settings = ServerSettings {
            server_token: None,
            ..configured()
        };
        assert_eq!(resolve(&admin(), &settings), Err(CredentialError::AccessDenied));
    }

    #[test]
    fn delegated_token_is_paired_with_admin_url_only() {
        let user = delegated(Some("T2"), Some("https://attacker.example:443"));
        let creds = resolve(&user, &configured()).unwrap();
        assert_eq!(
            creds,
            ServerCredentials {
                server_url: "http://10.0.0.5:32400".into(),
                token: "T2".into(),
            }
        );
    }

    #[test]
    fn delegated_without_token_never_gets_admin_token() {
        for token in [None, Some("")] {
            let user = delegated(token, None);
            assert_eq!(resolve(&user, &configured()), Err(CredentialError::AccessDenied));
        }
    }
}
