//! Operator commands
//!
//! Keys come from the terminal or from `COMMAND` lines embedded in the data
//! stream. Both go through the same `Console`, which turns them into
//! `Action`s for the render loop.

use std::fmt;

/// A key press, or a key name received from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    /// Any other named key, e.g. `backspace` or `esc`.
    Named(String),
}

impl Key {
    /// Parses a stream command payload. `enter` is the enter key, a single
    /// character is that character, anything else is a named key.
    pub fn parse(name: &str) -> Key {
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Key::Char(c),
            _ if name.eq_ignore_ascii_case("enter") => Key::Enter,
            _ => Key::Named(name.to_lowercase()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{}", c),
            Key::Enter => write!(f, "enter"),
            Key::Named(name) => write!(f, "{}", name),
        }
    }
}

/// What the render loop should do in response to a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ResetWindows,
    TogglePause,
    Rediscover,
    SaveSnapshot,
    /// Following keys are collected into an outbound command.
    BeginCompose,
    /// Write this text, terminator included, to the source.
    Send(String),
    /// The key was added to or removed from the pending command.
    Composing,
    /// Composing was abandoned.
    CancelCompose,
    Quit,
    Ignored,
}

/// Line terminator appended to outbound commands.
pub const COMMAND_TERMINATOR: &str = "\r\n";

#[derive(Debug, Default)]
pub struct Console {
    pending: Option<String>,
}

impl Console {
    pub fn new() -> Console {
        Console::default()
    }

    /// The command being composed, if any.
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn press(&mut self, key: Key) -> Action {
        if let Some(pending) = self.pending.as_mut() {
            return match key {
                Key::Enter => {
                    let mut text = self.pending.take().unwrap_or_default();
                    text.push_str(COMMAND_TERMINATOR);
                    Action::Send(text)
                }
                Key::Char(c) => {
                    pending.push(c);
                    Action::Composing
                }
                Key::Named(name) => match name.as_str() {
                    "backspace" => {
                        pending.pop();
                        Action::Composing
                    }
                    "esc" | "escape" => {
                        self.pending = None;
                        Action::CancelCompose
                    }
                    _ => Action::Ignored,
                },
            };
        }
        match key {
            Key::Char('x') => Action::ResetWindows,
            Key::Char('p') => Action::TogglePause,
            Key::Char('r') => Action::Rediscover,
            Key::Char('g') => Action::SaveSnapshot,
            Key::Char('q') => Action::Quit,
            Key::Enter => {
                self.pending = Some(String::new());
                Action::BeginCompose
            }
            _ => Action::Ignored,
        }
    }

    /// Dispatches a `COMMAND` payload from the data stream.
    pub fn command(&mut self, payload: &str) -> Action {
        if payload.is_empty() {
            return Action::Ignored;
        }
        self.press(Key::parse(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_names() {
        assert_eq!(Key::parse("x"), Key::Char('x'));
        assert_eq!(Key::parse("enter"), Key::Enter);
        assert_eq!(Key::parse("Enter"), Key::Enter);
        assert_eq!(Key::parse("ctrl+x"), Key::Named("ctrl+x".into()));
        assert_eq!(Key::parse("é"), Key::Char('é'));
    }

    #[test]
    fn single_keys() {
        let mut c = Console::new();
        assert_eq!(c.press(Key::Char('x')), Action::ResetWindows);
        assert_eq!(c.press(Key::Char('p')), Action::TogglePause);
        assert_eq!(c.press(Key::Char('r')), Action::Rediscover);
        assert_eq!(c.press(Key::Char('g')), Action::SaveSnapshot);
        assert_eq!(c.press(Key::Char('q')), Action::Quit);
        assert_eq!(c.press(Key::Char('z')), Action::Ignored);
    }

    #[test]
    fn compose_and_send() {
        let mut c = Console::new();
        assert_eq!(c.press(Key::Enter), Action::BeginCompose);
        // Command keys are text while composing.
        for ch in "rate 10".chars() {
            assert_eq!(c.press(Key::Char(ch)), Action::Composing);
        }
        assert_eq!(c.pending(), Some("rate 10"));
        assert_eq!(c.press(Key::Enter), Action::Send("rate 10\r\n".into()));
        assert_eq!(c.pending(), None);
        assert_eq!(c.press(Key::Char('q')), Action::Quit);
    }

    #[test]
    fn compose_editing() {
        let mut c = Console::new();
        c.press(Key::Enter);
        c.press(Key::Char('a'));
        c.press(Key::Char('b'));
        c.press(Key::Named("backspace".into()));
        assert_eq!(c.pending(), Some("a"));
        assert_eq!(c.press(Key::Named("esc".into())), Action::CancelCompose);
        assert_eq!(c.pending(), None);
    }

    #[test]
    fn stream_commands() {
        let mut c = Console::new();
        assert_eq!(c.command("x"), Action::ResetWindows);
        assert_eq!(c.command(""), Action::Ignored);
        assert_eq!(c.command("enter"), Action::BeginCompose);
        c.command("h");
        c.command("i");
        assert_eq!(c.command("enter"), Action::Send("hi\r\n".into()));
    }
}
