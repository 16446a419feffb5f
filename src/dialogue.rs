//! Lines the companion can say on its own.
//!
//! The phrase corpus is a content concern; the controller only needs
//! something that hands back a string. [`StaticDialogue`] is the built-in
//! provider with a small fixed corpus.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Category of a line picked for a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    Greeting,
    Joke,
    Fact,
}

impl LineKind {
    pub const ALL: [LineKind; 3] = [LineKind::Greeting, LineKind::Joke, LineKind::Fact];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Joke => "joke",
            Self::Fact => "fact",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }
}

/// Supplier of spoken text.
pub trait DialogueProvider: Send {
    fn random_greeting(&mut self) -> String;

    fn random_joke(&mut self) -> String {
        self.random_greeting()
    }

    fn random_fact(&mut self) -> String {
        self.random_greeting()
    }

    fn line(&mut self, kind: LineKind) -> String {
        match kind {
            LineKind::Greeting => self.random_greeting(),
            LineKind::Joke => self.random_joke(),
            LineKind::Fact => self.random_fact(),
        }
    }
}

const GREETINGS: &[&str] = &[
    "Hi there!",
    "Hello, friend!",
    "Oh, you found me!",
    "Hey! What are we doing today?",
    "I was getting a little bored...",
];

const JOKES: &[&str] = &[
    "Why did the cursor blush? It saw the desktop naked!",
    "I'm not lazy, I'm in power-saving mode.",
    "What do you call a fluffy program? Soft-ware!",
];

const FACTS: &[&str] = &[
    "Honey never spoils.",
    "Octopuses have three hearts.",
    "A day on Venus is longer than its year.",
];

/// Fixed in-binary corpus.
pub struct StaticDialogue {
    rng: StdRng,
}

impl StaticDialogue {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic picks, for tests and reproducible demos.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn pick(&mut self, lines: &[&str]) -> String {
        lines
            .choose(&mut self.rng)
            .copied()
            .unwrap_or("Hello!")
            .to_owned()
    }
}

impl Default for StaticDialogue {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogueProvider for StaticDialogue {
    fn random_greeting(&mut self) -> String {
        self.pick(GREETINGS)
    }

    fn random_joke(&mut self) -> String {
        self.pick(JOKES)
    }

    fn random_fact(&mut self) -> String {
        self.pick(FACTS)
    }
}
