//! Configuration boundary
//!
//! All ambient environment access happens here, once, at invocation time.
//! The resulting `Config` is passed by value into the lifecycle driver;
//! core logic never reads process globals. Lookups are case-insensitive
//! across as-is, lowercase, and uppercase aliases of each name, mirroring
//! the conventions of the modeling environment that invokes this tool.

use kestrel_client::{Credentials, DEFAULT_HOST, DEFAULT_PORT};
use kestrel_core::JobHandle;
use thiserror::Error;

/// Document option overrides read verbatim from the environment when set.
const DOCUMENT_OPTIONS: &[&str] = &["kestrel_auxfiles", "mip_priorities", "objective_precision"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("an email address is required for NEOS submissions; set the email option")]
    MissingEmail,
}

/// Invocation configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Contact address, required by the service for every submission.
    pub email: String,
    /// Requested solver name, still to be resolved against the live list.
    pub solver: Option<String>,
    /// Scheduling priority; `None` means the service default.
    pub priority: Option<String>,
    /// Job handle supplied via `job=`/`password=` options, which lets solve
    /// and kill target an already-submitted job.
    pub job_override: Option<JobHandle>,
    /// Account credentials for authenticated submission.
    pub credentials: Option<Credentials>,
    /// Stub used when a command names none.
    pub default_stub: String,
    /// Identity of the invoking session, naming the queue store.
    pub session_id: Option<String>,
    /// `user on host` tag sent with anonymous submissions.
    pub submitted_by: String,
    /// Snapshot of the document option overrides.
    pub document_options: Vec<(String, String)>,
}

impl Config {
    /// Build the configuration from the invoking environment. The
    /// `--server` flag wins over the ambient `neos_server` option.
    pub fn from_env(server_override: Option<&str>) -> Result<Self, ConfigError> {
        let email = env_option("email")
            .map(|value| value.trim().to_string())
            .unwrap_or_default();
        if email.is_empty() {
            return Err(ConfigError::MissingEmail);
        }

        let options = env_option("kestrel_options").unwrap_or_default();

        let server = server_override
            .map(str::to_string)
            .or_else(|| env_option("neos_server"));
        let (host, port) = match server.as_deref() {
            Some(value) => parse_host_port(value),
            None => (DEFAULT_HOST.to_string(), DEFAULT_PORT),
        };

        let username = env_option("neos_username").unwrap_or_default();
        let password = env_option("neos_user_password").unwrap_or_default();
        let credentials = parse_credentials(&username, &password);

        let default_stub = env_option("kestrel_stub")
            .filter(|stub| !stub.is_empty())
            .unwrap_or_else(|| "kmodel".to_string());

        let user = env_any(&["LOGNAME", "USER"]).unwrap_or_default();
        let host_name = env_any(&["HOSTNAME"]).unwrap_or_else(|| "unknown-host".to_string());

        let document_options = DOCUMENT_OPTIONS
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
            .collect();

        Ok(Self {
            host,
            port,
            email,
            solver: option_value(&options, "solver"),
            priority: option_value(&options, "priority"),
            job_override: parse_job_override(&options),
            credentials,
            default_stub,
            session_id: env_option("ampl_id").filter(|id| !id.is_empty()),
            submitted_by: format!("{user} on {host_name}"),
            document_options,
        })
    }

    /// Solver-specific option string (`<solver>_options`), looked up through
    /// the configuration boundary once the canonical solver name is known.
    pub fn solver_options_for(&self, solver: &str) -> Option<String> {
        env_option(&format!("{solver}_options")).filter(|value| !value.is_empty())
    }
}

fn env_any(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| std::env::var(name).ok())
}

fn env_option(name: &str) -> Option<String> {
    let lower = name.to_lowercase();
    let upper = name.to_uppercase();
    env_any(&[name, lower.as_str(), upper.as_str()])
}

/// Extract `key=value` from an option string. Keys match case-insensitively
/// at word boundaries; whitespace is tolerated around the `=`.
fn option_value(options: &str, key: &str) -> Option<String> {
    let haystack = options.to_ascii_lowercase();
    let needle = key.to_ascii_lowercase();
    let mut from = 0;
    while let Some(found) = haystack[from..].find(&needle) {
        let at = from + found;
        from = at + needle.len();
        let bounded = at == 0
            || options[..at]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_whitespace());
        if !bounded {
            continue;
        }
        let rest = options[at + key.len()..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else {
            continue;
        };
        let value: String = rest
            .trim_start()
            .chars()
            .take_while(|c| !c.is_whitespace())
            .collect();
        if !value.is_empty() {
            return Some(value);
        }
    }
    None
}

/// Parse `host[:port]`, tolerating whitespace around the separator.
fn parse_host_port(raw: &str) -> (String, u16) {
    let (host, port) = match raw.split_once(':') {
        Some((host, port)) => (host.trim(), port.trim().parse().unwrap_or(DEFAULT_PORT)),
        None => (raw.trim(), DEFAULT_PORT),
    };
    if host.is_empty() {
        (DEFAULT_HOST.to_string(), port)
    } else {
        (host.to_string(), port)
    }
}

fn parse_credentials(username: &str, password: &str) -> Option<Credentials> {
    let username = username.trim();
    let password = password.trim();
    if username.is_empty() || password.is_empty() {
        return None;
    }
    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

fn parse_job_override(options: &str) -> Option<JobHandle> {
    let number = option_value(options, "job")?.parse::<i32>().ok()?;
    if number <= 0 {
        return None;
    }
    let password = option_value(options, "password").unwrap_or_default();
    Some(JobHandle::new(number, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_values_tolerate_whitespace_around_the_equals() {
        let options = " job  =  2746671  password  =  AnVsgUKc  ";
        assert_eq!(option_value(options, "job").as_deref(), Some("2746671"));
        assert_eq!(
            option_value(options, "password").as_deref(),
            Some("AnVsgUKc")
        );
    }

    #[test]
    fn absent_keys_yield_nothing() {
        assert_eq!(option_value("password=AnVsgUKc", "job"), None);
        assert_eq!(option_value("", "priority"), None);
        // A broken key must not match.
        assert_eq!(option_value(" priorit y = 1 ", "priority"), None);
    }

    #[test]
    fn keys_match_case_insensitively() {
        assert_eq!(
            option_value(" SOLVER = CpLeX", "solver").as_deref(),
            Some("CpLeX")
        );
        assert_eq!(
            option_value("priority=short", "PRIORITY").as_deref(),
            Some("short")
        );
    }

    #[test]
    fn keys_must_sit_at_word_boundaries() {
        assert_eq!(option_value("myjob=5", "job"), None);
        assert_eq!(option_value("job=5", "job").as_deref(), Some("5"));
    }

    #[test]
    fn host_port_parsing_matches_the_environment_contract() {
        assert_eq!(
            parse_host_port(" neos-server.org:3333 "),
            ("neos-server.org".to_string(), 3333)
        );
        assert_eq!(
            parse_host_port("   neos-server.org : 123  "),
            ("neos-server.org".to_string(), 123)
        );
        assert_eq!(
            parse_host_port("  127.0.0.1  :  456  "),
            ("127.0.0.1".to_string(), 456)
        );
        assert_eq!(
            parse_host_port("127.0.0.1"),
            ("127.0.0.1".to_string(), DEFAULT_PORT)
        );
        assert_eq!(
            parse_host_port("host:notaport"),
            ("host".to_string(), DEFAULT_PORT)
        );
    }

    #[test]
    fn credentials_require_both_halves() {
        assert!(parse_credentials(" user ", " pw ").is_some());
        assert!(parse_credentials("user", "").is_none());
        assert!(parse_credentials("", "pw").is_none());
        let creds = parse_credentials(" user ", " pw ").unwrap();
        assert_eq!(creds.username, "user");
        assert_eq!(creds.password, "pw");
    }

    #[test]
    fn job_override_needs_a_positive_job_number() {
        let job = parse_job_override("job=2746671 password=AnVsgUKc").unwrap();
        assert_eq!(job, JobHandle::new(2746671, "AnVsgUKc"));

        // Password alone is not a job.
        assert!(parse_job_override("password=AnVsgUKc").is_none());
        assert!(parse_job_override("job=0 password=x").is_none());

        // A job without a password still resolves; the password is empty.
        let job = parse_job_override("job=42").unwrap();
        assert_eq!(job, JobHandle::new(42, ""));
    }
}
