//! AUTH (RFC 4954) with the PLAIN, LOGIN and CRAM-MD5 mechanisms.
//!
//! Every mechanism is skipped when the URI carries no user name, when the
//! connection is already authenticated, or when the server does not list
//! the mechanism in its AUTH capability.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use md5::Md5;

use super::Extension;
use crate::client::{Client, ClientEvent};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::session::AuthInfo;
use crate::types::{AuthMechanism, Reply, ReplyCode};

struct Credentials {
    username: String,
    password: String,
}

/// Returns the credentials if `mechanism` should run on this connection.
fn applicable(client: &Client, mechanism: AuthMechanism) -> Option<Credentials> {
    let username = client.uri().username()?;
    let session = client.session();
    if session.is_authenticated() {
        return None;
    }
    let offered = session
        .capabilities()
        .is_some_and(|caps| caps.auth_mechanisms().contains(&mechanism));
    if !offered {
        return None;
    }
    Some(Credentials {
        username: username.to_string(),
        password: client.uri().password().unwrap_or_default().to_string(),
    })
}

fn expect(reply: &Reply, code: ReplyCode) -> Result<()> {
    if reply.code == code {
        Ok(())
    } else {
        Err(Error::auth(reply))
    }
}

fn authenticated(client: &mut Client, mechanism: AuthMechanism, reply: Reply) -> Result<()> {
    expect(&reply, ReplyCode::AUTH_SUCCESS)?;
    tracing::info!(%mechanism, "Authenticated");
    client.session_mut().auth = Some(AuthInfo { mechanism, reply });
    client.emit(ClientEvent::Authenticated { mechanism });
    Ok(())
}

fn plain_response(username: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{username}\0{password}"))
}

fn cram_md5_response(username: &str, password: &str, challenge: &str) -> Result<String> {
    let challenge = STANDARD
        .decode(challenge.trim())
        .map_err(|e| Error::Protocol(format!("Invalid CRAM-MD5 challenge: {e}")))?;
    let mut mac = <Hmac<Md5> as Mac>::new_from_slice(password.as_bytes())
        .map_err(|e| Error::Protocol(format!("Invalid CRAM-MD5 key: {e}")))?;
    mac.update(&challenge);
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(STANDARD.encode(format!("{username} {digest}")))
}

/// AUTH PLAIN with an initial response.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthPlain;

#[async_trait]
impl Extension for AuthPlain {
    fn keyword(&self) -> &str {
        "AUTH-PLAIN"
    }

    fn verb(&self) -> &str {
        "AUTH"
    }

    fn priority(&self) -> u8 {
        10
    }

    fn new_instance(&self) -> Box<dyn Extension> {
        Box::new(Self)
    }

    async fn enable(&mut self, client: &mut Client) -> Result<()> {
        let Some(credentials) = applicable(client, AuthMechanism::Plain) else {
            return Ok(());
        };
        let command = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(plain_response(&credentials.username, &credentials.password)),
        };
        let reply = client.exchange(&command).await?;
        authenticated(client, AuthMechanism::Plain, reply)
    }
}

/// AUTH LOGIN: user name and password each answer a 334 challenge.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthLogin;

#[async_trait]
impl Extension for AuthLogin {
    fn keyword(&self) -> &str {
        "AUTH-LOGIN"
    }

    fn verb(&self) -> &str {
        "AUTH"
    }

    fn priority(&self) -> u8 {
        15
    }

    fn new_instance(&self) -> Box<dyn Extension> {
        Box::new(Self)
    }

    async fn enable(&mut self, client: &mut Client) -> Result<()> {
        let Some(credentials) = applicable(client, AuthMechanism::Login) else {
            return Ok(());
        };
        let start = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        let reply = client.exchange(&start).await?;
        expect(&reply, ReplyCode::AUTH_CONTINUE)?;

        let user = Command::AuthResponse(STANDARD.encode(&credentials.username));
        let reply = client.exchange(&user).await?;
        expect(&reply, ReplyCode::AUTH_CONTINUE)?;

        let password = Command::AuthResponse(STANDARD.encode(&credentials.password));
        let reply = client.exchange(&password).await?;
        authenticated(client, AuthMechanism::Login, reply)
    }
}

/// AUTH CRAM-MD5 (RFC 2195).
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthCramMd5;

#[async_trait]
impl Extension for AuthCramMd5 {
    fn keyword(&self) -> &str {
        "AUTH-CRAM-MD5"
    }

    fn verb(&self) -> &str {
        "AUTH"
    }

    fn priority(&self) -> u8 {
        10
    }

    fn new_instance(&self) -> Box<dyn Extension> {
        Box::new(Self)
    }

    async fn enable(&mut self, client: &mut Client) -> Result<()> {
        let Some(credentials) = applicable(client, AuthMechanism::CramMd5) else {
            return Ok(());
        };
        let start = Command::Auth {
            mechanism: AuthMechanism::CramMd5,
            initial_response: None,
        };
        let reply = client.exchange(&start).await?;
        expect(&reply, ReplyCode::AUTH_CONTINUE)?;

        let response =
            cram_md5_response(&credentials.username, &credentials.password, reply.message())?;
        let reply = client.exchange(&Command::AuthResponse(response)).await?;
        authenticated(client, AuthMechanism::CramMd5, reply)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_response() {
        assert_eq!(plain_response("user", "pass"), "AHVzZXIAcGFzcw==");
    }

    #[test]
    fn test_cram_md5_rfc2195_example() {
        let response = cram_md5_response(
            "tim",
            "tanstaaftanstaaf",
            "PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+",
        )
        .unwrap();
        assert_eq!(response, "dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw");
    }

    #[test]
    fn test_cram_md5_bad_challenge() {
        assert!(cram_md5_response("tim", "secret", "not base64!").is_err());
    }

    #[test]
    fn test_expect() {
        let ok = Reply::new(ReplyCode::AUTH_SUCCESS, vec!["2.7.0 Accepted".into()]);
        assert!(expect(&ok, ReplyCode::AUTH_SUCCESS).is_ok());
        let denied = Reply::new(ReplyCode::AUTH_FAILED, vec!["5.7.8 Bad credentials".into()]);
        let err = expect(&denied, ReplyCode::AUTH_SUCCESS).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to authenticate to server: 535 5.7.8 Bad credentials"
        );
    }
}
