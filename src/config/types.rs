use anyhow::{Result, anyhow, bail};
use std::fmt;
use std::time::Duration;

use crate::config::helper::parse_duration;

/// One step of a rule's response.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendKey(Key),
    SendText(String),
    Wait(Duration),
}

impl Action {
    /// Whether the action writes to the child's input.
    pub fn is_write(&self) -> bool {
        !matches!(self, Action::Wait(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::SendKey(key) => write!(f, "{key}"),
            Action::SendText(text) => write!(f, "string:{text}"),
            Action::Wait(d) => write!(f, "wait:{}ms", d.as_millis()),
        }
    }
}

/// Named keys understood in action lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Up,
    Down,
    Left,
    Right,
    Tab,
    Escape,
    Space,
    Backspace,
    /// Control chord, stored as the resulting control byte.
    Ctrl(u8),
}

impl Key {
    /// Byte sequence written to the child. `enter` is the supervisor's line ending.
    pub fn bytes(&self, enter: &[u8]) -> Vec<u8> {
        let bytes: &[u8] = match self {
            Key::Enter => enter,
            Key::Up => b"\x1b[A",
            Key::Down => b"\x1b[B",
            Key::Right => b"\x1b[C",
            Key::Left => b"\x1b[D",
            Key::Tab => b"\x09",
            Key::Escape => b"\x1b",
            Key::Space => b" ",
            Key::Backspace => b"\x7f",
            Key::Ctrl(byte) => return vec![*byte],
        };
        bytes.to_vec()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Enter => f.write_str("enter"),
            Key::Up => f.write_str("up"),
            Key::Down => f.write_str("down"),
            Key::Left => f.write_str("left"),
            Key::Right => f.write_str("right"),
            Key::Tab => f.write_str("tab"),
            Key::Escape => f.write_str("escape"),
            Key::Space => f.write_str("space"),
            Key::Backspace => f.write_str("backspace"),
            Key::Ctrl(byte) => write!(f, "ctrl-{}", (byte + b'a' - 1) as char),
        }
    }
}

/// Parse one action token from a rule's action list.
///
/// Accepted forms: key names (`enter`, `down`, `ctrl-c`, ...), `string:<literal>`
/// and `wait:<duration>`. Key names and prefixes are case-insensitive; the
/// literal after `string:` is kept verbatim.
pub fn parse_action(token: &str) -> Result<Action> {
    if let Some(literal) = strip_prefix_ci(token, "string:") {
        if literal.is_empty() {
            bail!("'string:' action requires a literal");
        }
        return Ok(Action::SendText(literal.to_string()));
    }

    if let Some(duration) =
        strip_prefix_ci(token, "wait:").or_else(|| strip_prefix_ci(token, "sleep:"))
    {
        return Ok(Action::Wait(parse_duration(duration)?));
    }

    parse_key(token)
        .map(Action::SendKey)
        .ok_or_else(|| anyhow!("Unknown action: {}", token))
}

fn parse_key(token: &str) -> Option<Key> {
    let lower = token.trim().to_ascii_lowercase();
    let key = match lower.as_str() {
        "enter" | "return" => Key::Enter,
        "up" => Key::Up,
        "down" => Key::Down,
        "left" => Key::Left,
        "right" => Key::Right,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        _ => return parse_ctrl_key(&lower).map(Key::Ctrl),
    };
    Some(key)
}

fn parse_ctrl_key(key: &str) -> Option<u8> {
    let rest = key
        .strip_prefix("ctrl-")
        .or_else(|| key.strip_prefix("c-"))
        .or_else(|| key.strip_prefix('^'))?;

    let mut chars = rest.chars();
    let ch = chars.next()?;
    if chars.next().is_some() {
        return None;
    }

    if ch.is_ascii_lowercase() {
        Some((ch as u8) - b'a' + 1)
    } else {
        None
    }
}

fn strip_prefix_ci<'a>(token: &'a str, prefix: &str) -> Option<&'a str> {
    let head = token.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&token[prefix.len()..])
    } else {
        None
    }
}
