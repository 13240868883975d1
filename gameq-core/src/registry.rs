//! Protocol lookup by identifier.

use crate::error::EngineError;
use gameq_protocol::protocols::gamespy3::{self, GameSpy3};
use gameq_protocol::protocols::source::{self, Source, SourceEngine};
use gameq_protocol::{Game, Options, Protocol};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Builds a fresh protocol instance for one server.
pub type ProtocolFactory = Arc<dyn Fn(&Options) -> Box<dyn Protocol> + Send + Sync>;

/// Maps protocol identifiers to factories. Identifiers are matched
/// case-insensitively.
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    factories: HashMap<String, ProtocolFactory>,
}

impl ProtocolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in protocol.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for game in [
            source::SOURCE,
            source::CSGO,
            source::CSS,
            source::TF2,
            source::GMOD,
            source::ARMA3,
        ] {
            registry.register(game.kind, move |_| Box::new(Source::new(game)));
        }
        registry.register(source::CS16.kind, |_| {
            Box::new(Source::with_engine(source::CS16, SourceEngine::GoldSource))
        });
        registry.register(gamespy3::GAMESPY3.kind, |options| {
            gamespy3_with_options(gamespy3::GAMESPY3, true, options)
        });
        registry.register(gamespy3::BF2.kind, |options| {
            gamespy3_with_options(gamespy3::BF2, false, options)
        });
        registry
    }

    /// Registers (or replaces) the factory for `kind`.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&Options) -> Box<dyn Protocol> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_lowercase(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(&kind.to_lowercase())
    }

    /// Instantiates the protocol registered for `kind`.
    pub fn create(&self, kind: &str, options: &Options) -> Result<Box<dyn Protocol>, EngineError> {
        let factory = self
            .factories
            .get(&kind.to_lowercase())
            .ok_or_else(|| EngineError::UnknownProtocol(kind.to_string()))?;
        Ok(factory(options))
    }

    /// Registered identifiers, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// GameSpy3 servers differ in whether they want a challenge round; the
/// boolean `challenge` option overrides the game's default.
fn gamespy3_with_options(game: Game, challenge: bool, options: &Options) -> Box<dyn Protocol> {
    let challenge = match options.get("challenge") {
        Some(Value::Bool(enabled)) => *enabled,
        Some(other) => {
            tracing::warn!("Ignoring non-boolean challenge option: {}", other);
            challenge
        }
        None => challenge,
    };
    if challenge {
        Box::new(GameSpy3::new(game))
    } else {
        Box::new(GameSpy3::without_challenge(game))
    }
}

impl fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
