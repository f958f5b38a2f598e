//! Best-effort discovery of the dev server's reachable URL.
//!
//! Log scanning runs first against the configured ready patterns; a port
//! probe over the configured candidate ports is the fallback. Both inputs
//! come from [`DevServerConfig`], not from code.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::DevServerConfig;

/// Where the server can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub port: Option<u16>,
    pub url: String,
}

/// Compiled ready patterns plus the public host.
#[derive(Debug, Clone)]
pub struct UrlDiscovery {
    patterns: Vec<Regex>,
    ansi: Regex,
    port_in_url: Regex,
    public_host: String,
}

impl UrlDiscovery {
    pub fn from_config(config: &DevServerConfig) -> Result<Self, regex::Error> {
        let patterns = config
            .ready_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            ansi: Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]")?,
            port_in_url: Regex::new(r"^https?://[^/:]+:(\d{1,5})")?,
            public_host: config.public_host.clone(),
        })
    }

    /// Scan log text, most recent line first.
    pub fn scan_log(&self, log: &str) -> Option<Endpoint> {
        let clean = self.ansi.replace_all(log, "");
        for line in clean.lines().rev() {
            for pattern in &self.patterns {
                let Some(capture) = pattern.captures(line).and_then(|c| c.get(1)) else {
                    continue;
                };
                if let Some(endpoint) = self.endpoint_from_capture(capture.as_str()) {
                    return Some(endpoint);
                }
            }
        }
        None
    }

    pub fn endpoint_for_port(&self, port: u16) -> Endpoint {
        Endpoint {
            port: Some(port),
            url: format!("http://{}:{port}", self.public_host),
        }
    }

    fn endpoint_from_capture(&self, raw: &str) -> Option<Endpoint> {
        let raw = raw.trim_end_matches(['/', ',', '.', ')', ';']);
        if let Ok(port) = raw.parse::<u16>() {
            return (port > 0).then(|| self.endpoint_for_port(port));
        }
        if !raw.starts_with("http://") && !raw.starts_with("https://") {
            return None;
        }
        let url = raw
            .replacen("0.0.0.0", &self.public_host, 1)
            .replacen("127.0.0.1", &self.public_host, 1);
        let port = self
            .port_in_url
            .captures(&url)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        Some(Endpoint { port, url })
    }
}

/// `curl` argv that prints the HTTP status of `http://localhost:<port>`.
pub fn probe_command(port: u16) -> Vec<String> {
    vec![
        "curl".into(),
        "-s".into(),
        "-o".into(),
        "/dev/null".into(),
        "-w".into(),
        "%{http_code}".into(),
        "--max-time".into(),
        "1".into(),
        format!("http://localhost:{port}"),
    ]
}

/// Whether a probe's stdout shows an HTTP response.
pub fn probe_answered(stdout: &str) -> bool {
    let code = stdout.trim();
    code.len() == 3 && code.chars().all(|c| c.is_ascii_digit()) && code != "000"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery() -> UrlDiscovery {
        UrlDiscovery::from_config(&DevServerConfig::default()).unwrap()
    }

    #[test]
    fn test_vite_banner_with_ansi_codes() {
        let log = "\x1b[32mVITE v5.0.0\x1b[39m ready\n  \x1b[32m➜\x1b[39m  Local:   \x1b[36mhttp://localhost:\x1b[1m5173\x1b[22m/\x1b[39m\n";
        let ep = discovery().scan_log(log).unwrap();
        assert_eq!(ep.url, "http://localhost:5173");
        assert_eq!(ep.port, Some(5173));
    }

    #[test]
    fn test_next_style_url_rewrites_bind_address() {
        let log = "ready - started server on 0.0.0.0:3000, url: http://0.0.0.0:3000\n";
        let ep = discovery().scan_log(log).unwrap();
        assert_eq!(ep.url, "http://localhost:3000");
        assert_eq!(ep.port, Some(3000));
    }

    #[test]
    fn test_bare_port_line() {
        let ep = discovery().scan_log("Server listening on port 8080\n").unwrap();
        assert_eq!(ep, discovery().endpoint_for_port(8080));
    }

    #[test]
    fn test_latest_line_wins() {
        let log = "Local: http://localhost:3000/\nport in use, retrying\nLocal: http://localhost:3001/\n";
        assert_eq!(discovery().scan_log(log).unwrap().port, Some(3001));
    }

    #[test]
    fn test_no_match() {
        assert!(discovery().scan_log("compiling...\nwaiting\n").is_none());
    }

    #[test]
    fn test_probe_answered() {
        assert!(probe_answered("200"));
        assert!(probe_answered("404\n"));
        assert!(!probe_answered("000"));
        assert!(!probe_answered(""));
    }

    #[test]
    fn test_custom_host() {
        let cfg = DevServerConfig {
            public_host: "sb-1.preview.local".into(),
            ..DevServerConfig::default()
        };
        let d = UrlDiscovery::from_config(&cfg).unwrap();
        assert_eq!(d.endpoint_for_port(4200).url, "http://sb-1.preview.local:4200");
    }
}
