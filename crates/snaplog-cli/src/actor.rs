//! Actor identity resolution for mutating commands.
//!
//! The resolution chain: `--actor` flag > `SNAPLOG_ACTOR` env > `EMAIL` env.
//! The resolved value is still validated by the core on append.

use std::env;

/// No actor could be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorResolutionError {
    pub message: String,
}

impl std::fmt::Display for ActorResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActorResolutionError {}

/// Environment reader trait for dependency injection in tests.
trait EnvReader {
    fn get(&self, key: &str) -> Option<String>;
}

struct RealEnv;

impl EnvReader for RealEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

fn resolve_actor_with(cli_flag: Option<&str>, env: &dyn EnvReader) -> Option<String> {
    cli_flag
        .map(str::trim)
        .filter(|actor| !actor.is_empty())
        .map(str::to_string)
        .or_else(|| env.get("SNAPLOG_ACTOR"))
        .or_else(|| env.get("EMAIL"))
        .map(|actor| actor.trim().to_string())
}

/// Resolve the actor, returning an error if none is configured.
pub fn require_actor(cli_flag: Option<&str>) -> Result<String, ActorResolutionError> {
    resolve_actor_with(cli_flag, &RealEnv).ok_or_else(|| ActorResolutionError {
        message: "Actor identity required for this command. \
                  Set --actor or the SNAPLOG_ACTOR environment variable."
            .to_string(),
    })
}
