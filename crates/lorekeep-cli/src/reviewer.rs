//! Reviewer identity for approve/reject commands.
//!
//! The resolution chain: `--reviewer` flag > `LOREKEEP_REVIEWER` env > `USER` env (TTY only).
//! Dispositions require a reviewer; everything else works without one.

use std::env;

use lorekeep_core::ErrorCode;

/// No reviewer could be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("reviewer identity required for this command; set --reviewer or LOREKEEP_REVIEWER")]
pub struct MissingReviewer;

impl MissingReviewer {
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidValue
    }
}

trait EnvReader {
    fn get(&self, key: &str) -> Option<String>;
    fn is_tty(&self) -> bool;
}

struct RealEnv;

impl EnvReader for RealEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    fn is_tty(&self) -> bool {
        use std::io::IsTerminal;
        std::io::stdin().is_terminal()
    }
}

fn resolve_with(flag: Option<&str>, env: &dyn EnvReader) -> Option<String> {
    if let Some(name) = flag.map(str::trim).filter(|n| !n.is_empty()) {
        return Some(name.to_string());
    }
    if let Some(name) = env.get("LOREKEEP_REVIEWER") {
        return Some(name);
    }
    if env.is_tty() {
        return env.get("USER");
    }
    None
}

/// Resolve the reviewer recorded on a disposition.
pub fn require_reviewer(flag: Option<&str>) -> Result<String, MissingReviewer> {
    resolve_with(flag, &RealEnv).ok_or(MissingReviewer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MockEnv {
        vars: HashMap<String, String>,
        tty: bool,
    }

    impl MockEnv {
        fn new() -> Self {
            Self {
                vars: HashMap::new(),
                tty: false,
            }
        }

        fn var(mut self, key: &str, val: &str) -> Self {
            self.vars.insert(key.to_string(), val.to_string());
            self
        }

        const fn tty(mut self) -> Self {
            self.tty = true;
            self
        }
    }

    impl EnvReader for MockEnv {
        fn get(&self, key: &str) -> Option<String> {
            self.vars.get(key).filter(|v| !v.is_empty()).cloned()
        }

        fn is_tty(&self) -> bool {
            self.tty
        }
    }

    #[test]
    fn flag_wins() {
        let env = MockEnv::new().var("LOREKEEP_REVIEWER", "from-env");
        assert_eq!(resolve_with(Some("editor"), &env).as_deref(), Some("editor"));
    }

    #[test]
    fn blank_flag_falls_back_to_env() {
        let env = MockEnv::new().var("LOREKEEP_REVIEWER", "from-env");
        assert_eq!(resolve_with(Some("  "), &env).as_deref(), Some("from-env"));
    }

    #[test]
    fn user_only_on_a_terminal() {
        let env = MockEnv::new().var("USER", "maya");
        assert_eq!(resolve_with(None, &env), None);
        let env = MockEnv::new().var("USER", "maya").tty();
        assert_eq!(resolve_with(None, &env).as_deref(), Some("maya"));
    }

    #[test]
    fn missing_reviewer_names_both_sources() {
        let msg = MissingReviewer.to_string();
        assert!(msg.contains("--reviewer"));
        assert!(msg.contains("LOREKEEP_REVIEWER"));
        assert_eq!(MissingReviewer.code(), ErrorCode::InvalidValue);
    }
}
