use anyhow::{bail, Context};
use std::env;
use std::str::FromStr;

/// Minimum length the cookie signing key accepts.
pub const SESSION_KEY_LEN: usize = 64;

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub temporary: bool,
    pub session_key: Option<Vec<u8>>,
    pub secure_cookie: bool,
    pub bcrypt_cost: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            db_path: "cinelog.db".to_owned(),
            temporary: false,
            session_key: None,
            secure_cookie: false,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let session_key = match lookup("CINELOG_SESSION_KEY") {
            Some(key) if key.len() < SESSION_KEY_LEN => {
                bail!("CINELOG_SESSION_KEY must be at least {} bytes", SESSION_KEY_LEN)
            }
            Some(key) => Some(key.into_bytes()),
            None => None,
        };
        let bcrypt_cost = parse(&lookup, "CINELOG_BCRYPT_COST", defaults.bcrypt_cost)?;
        if !(4..=31).contains(&bcrypt_cost) {
            bail!("CINELOG_BCRYPT_COST must be between 4 and 31");
        }
        Ok(Config {
            host: lookup("CINELOG_HOST").unwrap_or(defaults.host),
            port: parse(&lookup, "CINELOG_PORT", defaults.port)?,
            db_path: lookup("CINELOG_DB_PATH").unwrap_or(defaults.db_path),
            temporary: parse(&lookup, "CINELOG_TEMPORARY", defaults.temporary)?,
            session_key,
            secure_cookie: parse(&lookup, "CINELOG_SECURE_COOKIE", defaults.secure_cookie)?,
            bcrypt_cost,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {} value: {:?}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert!(config.session_key.is_none());
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("CINELOG_PORT", "9000"),
            ("CINELOG_TEMPORARY", "true"),
            ("CINELOG_BCRYPT_COST", "4"),
        ])
        .unwrap();
        assert_eq!(config.port, 9000);
        assert!(config.temporary);
        assert_eq!(config.bcrypt_cost, 4);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(config(&[("CINELOG_PORT", "eighty")]).is_err());
        assert!(config(&[("CINELOG_BCRYPT_COST", "2")]).is_err());
        assert!(config(&[("CINELOG_SESSION_KEY", "short")]).is_err());
        let key = "k".repeat(SESSION_KEY_LEN);
        assert!(config(&[("CINELOG_SESSION_KEY", key.as_str())]).is_ok());
    }
}
