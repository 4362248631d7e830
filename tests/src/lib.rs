//! Cross-module scenario tests for Statusdeck.

#[cfg(test)]
mod unit;
