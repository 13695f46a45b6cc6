//! Configuration for the actions service
//!
//! Everything comes from the environment. Outside test mode the Auth0,
//! SendGrid, frontend and Chime settings are mandatory; `EVENT_SECRET`
//! always is.
//! Missing variables are collected and reported together.

use clowdr_core::sigv4::AwsCredentials;
use thiserror::Error;

/// Default listening port
pub const DEFAULT_PORT: u16 = 4000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Auth0 settings used to verify bearer tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub api_domain: String,
    pub audience: String,
    pub issuer_domain: String,
    /// Shared secret for HS256 token signatures
    pub signing_secret: String,
}

impl AuthConfig {
    /// Expected `iss` claim
    pub fn issuer(&self) -> String {
        format!("https://{}/", self.issuer_domain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendGridConfig {
    pub api_key: String,
    pub sender: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendConfig {
    pub domain: String,
    pub protocol: String,
}

impl FrontendConfig {
    /// Build from a domain, defaulting the protocol to `http` for localhost
    pub fn new(domain: impl Into<String>, protocol: Option<String>) -> Self {
        let domain = domain.into();
        let protocol = protocol.filter(|p| !p.is_empty()).unwrap_or_else(|| {
            if domain.starts_with("localhost") {
                "http".to_string()
            } else {
                "https".to_string()
            }
        });
        Self { domain, protocol }
    }

    /// Absolute frontend URL for `path`
    pub fn url(&self, path: &str) -> String {
        format!("{}://{}/{}", self.protocol, self.domain, path.trim_start_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasuraConfig {
    pub url: String,
    pub admin_secret: String,
}

/// Region and credentials for the Chime meetings API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChimeConfig {
    pub region: String,
    pub credentials: AwsCredentials,
}

/// Complete actions service configuration
#[derive(Debug, Clone)]
pub struct ActionsConfig {
    pub port: u16,
    /// Value expected in the `x-hasura-event-secret` header
    pub event_secret: String,
    pub auth: Option<AuthConfig>,
    pub sendgrid: Option<SendGridConfig>,
    pub frontend: Option<FrontendConfig>,
    pub stop_emails_contact: Option<String>,
    pub hasura: Option<HasuraConfig>,
    pub chime: Option<ChimeConfig>,
    pub test_mode: bool,
}

impl ActionsConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut require = |name: &str| -> String {
            match lookup(name).filter(|v| !v.is_empty()) {
                Some(value) => value,
                None => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        };

        let test_mode = lookup("NODE_ENV").as_deref() == Some("test");

        let (auth, sendgrid, frontend, stop_emails_contact, hasura, chime) = if test_mode {
            (None, None, None, None, None, None)
        } else {
            let auth = AuthConfig {
                api_domain: require("AUTH0_API_DOMAIN"),
                audience: require("AUTH0_AUDIENCE"),
                issuer_domain: require("AUTH0_ISSUER_DOMAIN"),
                signing_secret: require("AUTH0_SIGNING_SECRET"),
            };
            let sendgrid = SendGridConfig {
                api_key: require("SENDGRID_API_KEY"),
                sender: require("SENDGRID_SENDER"),
            };
            let frontend_domain = require("FRONTEND_DOMAIN");
            let stop_emails = require("STOP_EMAILS_CONTACT_EMAIL_ADDRESS");
            let hasura = HasuraConfig {
                url: require("HASURA_URL"),
                admin_secret: require("HASURA_ADMIN_SECRET"),
            };
            let chime = ChimeConfig {
                region: require("AWS_REGION"),
                credentials: AwsCredentials {
                    access_key_id: require("AWS_ACCESS_KEY_ID"),
                    secret_access_key: require("AWS_SECRET_ACCESS_KEY"),
                    session_token: lookup("AWS_SESSION_TOKEN").filter(|v| !v.is_empty()),
                },
            };
            (
                Some(auth),
                Some(sendgrid),
                Some(FrontendConfig::new(frontend_domain, lookup("FRONTEND_PROTOCOL"))),
                Some(stop_emails),
                Some(hasura),
                Some(chime),
            )
        };

        let event_secret = require("EVENT_SECRET");

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value: raw,
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            port,
            event_secret,
            auth,
            sendgrid,
            frontend,
            stop_emails_contact,
            hasura,
            chime,
            test_mode,
        })
    }

    /// Minimal test-mode configuration
    pub fn for_tests(event_secret: impl Into<String>) -> Self {
        Self {
            port: DEFAULT_PORT,
            event_secret: event_secret.into(),
            auth: None,
            sendgrid: None,
            frontend: None,
            stop_emails_contact: None,
            hasura: None,
            chime: None,
            test_mode: true,
        }
    }

    /// Set the Auth0 settings
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Set the frontend location
    pub fn with_frontend(mut self, frontend: FrontendConfig) -> Self {
        self.frontend = Some(frontend);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn full_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("AUTH0_API_DOMAIN", "api.example.org"),
            ("AUTH0_AUDIENCE", "hasura"),
            ("AUTH0_ISSUER_DOMAIN", "clowdr.eu.auth0.com"),
            ("AUTH0_SIGNING_SECRET", "shh"),
            ("SENDGRID_API_KEY", "SG.key"),
            ("SENDGRID_SENDER", "noreply@example.org"),
            ("FRONTEND_DOMAIN", "app.example.org"),
            ("STOP_EMAILS_CONTACT_EMAIL_ADDRESS", "stop@example.org"),
            ("HASURA_URL", "http://hasura:8080/v1/graphql"),
            ("HASURA_ADMIN_SECRET", "admin"),
            ("AWS_REGION", "eu-west-1"),
            ("AWS_ACCESS_KEY_ID", "AKIDEXAMPLE"),
            ("AWS_SECRET_ACCESS_KEY", "aws-secret"),
            ("EVENT_SECRET", "event"),
        ]
    }

    #[test]
    fn test_full_config() {
        let config = ActionsConfig::from_lookup(lookup(&full_env())).unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(!config.test_mode);
        let frontend = config.frontend.unwrap();
        assert_eq!(frontend.protocol, "https");
        assert_eq!(
            frontend.url("/invitation/accept/abc"),
            "https://app.example.org/invitation/accept/abc"
        );
        assert_eq!(config.auth.unwrap().issuer(), "https://clowdr.eu.auth0.com/");
        let chime = config.chime.unwrap();
        assert_eq!(chime.region, "eu-west-1");
        assert_eq!(chime.credentials.session_token, None);
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        let err = ActionsConfig::from_lookup(lookup(&[("SENDGRID_SENDER", "x")])).unwrap_err();
        let ConfigError::Missing(names) = err else {
            panic!("expected missing variables");
        };
        assert!(names.contains(&"AUTH0_AUDIENCE".to_string()));
        assert!(names.contains(&"EVENT_SECRET".to_string()));
        assert!(names.contains(&"AWS_SECRET_ACCESS_KEY".to_string()));
        assert!(!names.contains(&"SENDGRID_SENDER".to_string()));
    }

    #[test]
    fn test_test_mode_only_needs_event_secret() {
        let config =
            ActionsConfig::from_lookup(lookup(&[("NODE_ENV", "test"), ("EVENT_SECRET", "e")]))
                .unwrap();
        assert!(config.test_mode);
        assert!(config.auth.is_none());

        let err = ActionsConfig::from_lookup(lookup(&[("NODE_ENV", "test")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing(vec!["EVENT_SECRET".to_string()]));
    }

    #[test]
    fn test_localhost_frontend_uses_http() {
        let mut env = full_env();
        env.retain(|(k, _)| *k != "FRONTEND_DOMAIN");
        env.push(("FRONTEND_DOMAIN", "localhost:3000"));
        env.push(("PORT", "3001"));
        let config = ActionsConfig::from_lookup(lookup(&env)).unwrap();
        assert_eq!(config.frontend.unwrap().protocol, "http");
        assert_eq!(config.port, 3001);
    }

    #[test]
    fn test_invalid_port() {
        let err = ActionsConfig::from_lookup(lookup(&[
            ("NODE_ENV", "test"),
            ("EVENT_SECRET", "e"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }
}
