//! Minimal `.netrc` reader

use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetrcEntry {
    pub login: String,
    pub password: String,
}

/// Credentials for `host`, falling back to a `default` entry
#[must_use]
pub fn find_entry(contents: &str, host: &str) -> Option<NetrcEntry> {
    #[derive(Clone, Copy, PartialEq)]
    enum Kind {
        Host,
        Other,
        Default,
    }

    #[derive(Default)]
    struct Pending {
        login: Option<String>,
        password: Option<String>,
    }

    impl Pending {
        fn finish(self) -> Option<NetrcEntry> {
            Some(NetrcEntry {
                login: self.login?,
                password: self.password?,
            })
        }
    }

    let mut tokens = contents.split_whitespace();
    let mut current: Option<(Kind, Pending)> = None;
    let mut default: Option<NetrcEntry> = None;

    loop {
        let token = tokens.next();
        if matches!(token, None | Some("machine" | "default")) {
            if let Some((kind, pending)) = current.take() {
                match (kind, pending.finish()) {
                    (Kind::Host, Some(entry)) => return Some(entry),
                    (Kind::Default, Some(entry)) => default = default.or(Some(entry)),
                    _ => {}
                }
            }
        }

        match token {
            None => return default,
            Some("machine") => {
                let name = tokens.next()?;
                let kind = if name == host { Kind::Host } else { Kind::Other };
                current = Some((kind, Pending::default()));
            }
            Some("default") => current = Some((Kind::Default, Pending::default())),
            Some("login") => {
                let value = tokens.next().map(str::to_string);
                if let Some((_, pending)) = current.as_mut() {
                    pending.login = value;
                }
            }
            Some("password") => {
                let value = tokens.next().map(str::to_string);
                if let Some((_, pending)) = current.as_mut() {
                    pending.password = value;
                }
            }
            Some("account") => {
                tokens.next();
            }
            Some(_) => {}
        }
    }
}

/// Configured path, else `~/.netrc`
#[must_use]
pub fn resolve_path(configured: Option<&str>) -> Option<PathBuf> {
    configured
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".netrc")))
}

/// Read the file and look up `host`; a missing file is not an error
pub async fn load_entry(path: &Path, host: &str) -> Option<NetrcEntry> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => find_entry(&contents, host),
        Err(e) => {
            debug!("No netrc at {}: {}", path.display(), e);
            None
        }
    }
}
