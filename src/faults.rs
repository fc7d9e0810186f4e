//! # Fault injection.
//!
//! Named injection points let tests make a specific stage of a specific node fail
//! without touching its code. A rule is set per tag, usually from the environment:
//!
//! ```text
//! PILOT_RAISE_ON_<TAG>=N          fail the Nth invocation of <TAG> (1-based, once)
//! PILOT_RAISE_ON_<TAG>=RANDOM_P   fail each invocation with probability P percent
//! ```
//!
//! `<TAG>` is the tag upper-cased with every non-alphanumeric character replaced by
//! `_`, so the work point of node `agent.worker.2` is `PILOT_RAISE_ON_AGENT_WORKER_2_WORK`.
//!
//! Points raised by the runtime:
//! - `<uid>.init`, `<uid>.work` (after each iteration), `<uid>.finalize` in the node driver
//! - `<uid>.watch` in each watcher cycle
//! - `tracker.cycle` before each tracker poll
//!
//! Counters are local to this process.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::Rng;
use tracing::warn;

use crate::error::TaskError;

/// When a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// On exactly the Nth invocation.
    Nth(u64),
    /// With this probability in percent on every invocation.
    Percent(u8),
}

impl Trigger {
    /// Parses `N` or `RANDOM_P`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Some(p) = raw
            .strip_prefix("RANDOM_")
            .or_else(|| raw.strip_prefix("random_"))
        {
            return p.parse::<u8>().ok().map(|p| Trigger::Percent(p.min(100)));
        }
        raw.parse::<u64>().ok().filter(|n| *n > 0).map(Trigger::Nth)
    }
}

/// Tag-keyed fault rules with per-tag invocation counters.
#[derive(Debug, Default)]
pub struct FaultInjector {
    rules: HashMap<String, Trigger>,
    counts: Mutex<HashMap<String, u64>>,
}

impl FaultInjector {
    /// Environment prefix of fault rules.
    pub const ENV_PREFIX: &'static str = "PILOT_RAISE_ON_";

    /// Injector without rules; `raise_on` always succeeds.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Injector with rules from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        )
    }

    /// Injector with rules from `(key, value)` pairs; keys without the prefix are ignored.
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut rules = HashMap::new();
        for (key, value) in vars {
            let Some(tag) = key.strip_prefix(Self::ENV_PREFIX) else {
                continue;
            };
            match Trigger::parse(&value) {
                Some(trigger) => {
                    rules.insert(Self::normalize(tag), trigger);
                }
                None => warn!(var = %key, value = %value, "ignoring malformed fault rule"),
            }
        }
        Self {
            rules,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a rule for `tag` (raw tag, normalized here).
    pub fn with_rule(mut self, tag: &str, trigger: Trigger) -> Self {
        self.rules.insert(Self::normalize(tag), trigger);
        self
    }

    /// True when no rule is configured.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Maps a tag to its environment form: upper case, non-alphanumerics as `_`.
    pub fn normalize(tag: &str) -> String {
        tag.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Counts one invocation of `tag` and returns `TaskError::Injected` if its rule fires.
    pub fn raise_on(&self, tag: &str) -> Result<(), TaskError> {
        if self.rules.is_empty() {
            return Ok(());
        }
        let key = Self::normalize(tag);
        let Some(trigger) = self.rules.get(&key).copied() else {
            return Ok(());
        };

        let invocation = {
            let mut counts = self.counts.lock();
            let n = counts.entry(key).or_insert(0);
            *n += 1;
            *n
        };
        let fire = match trigger {
            Trigger::Nth(n) => invocation == n,
            Trigger::Percent(p) => rand::rng().random_range(0..100u8) < p,
        };
        if fire {
            warn!(tag, invocation, "raising injected fault");
            return Err(TaskError::Injected {
                tag: tag.to_string(),
                invocation,
            });
        }
        Ok(())
    }
}
