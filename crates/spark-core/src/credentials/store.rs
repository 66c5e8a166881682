use std::collections::HashMap;

use super::scope::sort_scope;
use super::Token;

/// Downscoped child tokens keyed by canonical scope.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    tokens: HashMap<String, Token>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope: &str) -> Option<&Token> {
        self.tokens.get(&sort_scope(scope))
    }

    /// Insert `token` under its own scope, replacing any previous entry.
    pub fn insert(&mut self, token: Token) -> Option<Token> {
        self.tokens.insert(sort_scope(&token.scope), token)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.values()
    }

    pub fn drain(&mut self) -> Vec<Token> {
        self.tokens.drain().map(|(_, token)| token).collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
