//! Configuration for the playout service
//!
//! AWS deployment settings and the public host the service is reachable on.
//! Missing variables are collected and reported together.

use thiserror::Error;

/// Default listening port
pub const DEFAULT_PORT: u16 = 3003;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variables: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Settings needed to deploy a channel stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsConfig {
    /// Prefix for every stack name (`<prefix>-room-<shortId>`)
    pub prefix: String,
    pub input_security_group_id: String,
    pub media_live_service_role_arn: String,
    pub notifications_topic_arn: String,
    pub region: String,
    pub account_id: String,
}

impl AwsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

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

        let config = Self {
            prefix: require("AWS_PREFIX"),
            input_security_group_id: require("AWS_MEDIALIVE_INPUT_SECURITY_GROUP_ID"),
            media_live_service_role_arn: require("AWS_MEDIALIVE_SERVICE_ROLE_ARN"),
            notifications_topic_arn: require("AWS_CLOUDFORMATION_NOTIFICATIONS_TOPIC_ARN"),
            region: require("AWS_REGION"),
            account_id: require("AWS_ACCOUNT_ID"),
        };

        if missing.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Missing(missing))
        }
    }
}

/// Where this service is reachable from AWS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub domain: String,
    pub secure: bool,
}

impl HostConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// `HOST_DOMAIN` is required; only `HOST_SECURE_PROTOCOLS=false` turns TLS off
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let domain = lookup("HOST_DOMAIN")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::Missing(vec!["HOST_DOMAIN".to_string()]))?;
        let secure = lookup("HOST_SECURE_PROTOCOLS").as_deref() != Some("false");
        Ok(Self { domain, secure })
    }

    pub fn protocol(&self) -> &'static str {
        if self.secure { "https" } else { "http" }
    }

    /// Base URL of the service, e.g. `https://playout.example.org`
    pub fn url(&self) -> String {
        format!("{}://{}", self.protocol(), self.domain)
    }
}

/// Complete playout service configuration
#[derive(Debug, Clone)]
pub struct PlayoutConfig {
    pub port: u16,
    pub aws: AwsConfig,
    pub host: HostConfig,
}

impl PlayoutConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let aws = AwsConfig::from_lookup(&lookup);
        let host = HostConfig::from_lookup(&lookup);
        let (aws, host) = match (aws, host) {
            (Ok(aws), Ok(host)) => (aws, host),
            (aws, host) => {
                let mut missing = Vec::new();
                for err in [aws.err(), host.err()].into_iter().flatten() {
                    if let ConfigError::Missing(names) = err {
                        missing.extend(names);
                    }
                }
                return Err(ConfigError::Missing(missing));
            }
        };

        let port = match lookup("PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value: raw,
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self { port, aws, host })
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

    fn aws_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("AWS_PREFIX", "clowdr-dev"),
            ("AWS_MEDIALIVE_INPUT_SECURITY_GROUP_ID", "1234567"),
            ("AWS_MEDIALIVE_SERVICE_ROLE_ARN", "arn:aws:iam::111122223333:role/MediaLive"),
            (
                "AWS_CLOUDFORMATION_NOTIFICATIONS_TOPIC_ARN",
                "arn:aws:sns:eu-west-1:111122223333:cfn",
            ),
            ("AWS_REGION", "eu-west-1"),
            ("AWS_ACCOUNT_ID", "111122223333"),
        ]
    }

    #[test]
    fn test_aws_config() {
        let config = AwsConfig::from_lookup(lookup(&aws_env())).unwrap();
        assert_eq!(config.prefix, "clowdr-dev");
        assert_eq!(config.region, "eu-west-1");
    }

    #[test]
    fn test_every_missing_aws_variable_is_reported() {
        let err = AwsConfig::from_lookup(lookup(&[("AWS_REGION", "eu-west-1")])).unwrap_err();
        let ConfigError::Missing(names) = err else {
            panic!("expected missing variables");
        };
        assert_eq!(names.len(), 5);
        assert!(names.contains(&"AWS_PREFIX".to_string()));
        assert!(!names.contains(&"AWS_REGION".to_string()));
    }

    #[test]
    fn test_host_url() {
        let host = HostConfig::from_lookup(lookup(&[("HOST_DOMAIN", "playout.example.org")])).unwrap();
        assert_eq!(host.url(), "https://playout.example.org");

        let host = HostConfig::from_lookup(lookup(&[
            ("HOST_DOMAIN", "localhost:3003"),
            ("HOST_SECURE_PROTOCOLS", "false"),
        ]))
        .unwrap();
        assert_eq!(host.url(), "http://localhost:3003");

        // Anything other than "false" keeps TLS on
        let host = HostConfig::from_lookup(lookup(&[
            ("HOST_DOMAIN", "playout.example.org"),
            ("HOST_SECURE_PROTOCOLS", "no"),
        ]))
        .unwrap();
        assert!(host.secure);
    }

    #[test]
    fn test_playout_config_collects_all_missing() {
        let err = PlayoutConfig::from_lookup(lookup(&[])).unwrap_err();
        let ConfigError::Missing(names) = err else {
            panic!("expected missing variables");
        };
        assert_eq!(names.len(), 7);
        assert!(names.contains(&"HOST_DOMAIN".to_string()));

        let mut env = aws_env();
        env.push(("HOST_DOMAIN", "playout.example.org"));
        env.push(("PORT", "8080"));
        let config = PlayoutConfig::from_lookup(lookup(&env)).unwrap();
        assert_eq!(config.port, 8080);
    }
}
