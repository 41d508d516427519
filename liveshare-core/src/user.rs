//! Session members and cursor colors.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DocumentKey, Position, TextRange, UserId};

/// RGB color for cursor/selection decorations. Serialized as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CursorColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Fixed member palette, assigned round-robin at join time.
pub const PALETTE: [CursorColor; 8] = [
    CursorColor::rgb(0x00, 0x7A, 0xCC),
    CursorColor::rgb(0xFF, 0x6B, 0x6B),
    CursorColor::rgb(0x4E, 0xCD, 0xC4),
    CursorColor::rgb(0x45, 0xB7, 0xD1),
    CursorColor::rgb(0x96, 0xCE, 0xB4),
    CursorColor::rgb(0xFF, 0xEA, 0xA7),
    CursorColor::rgb(0xDD, 0xA0, 0xDD),
    CursorColor::rgb(0xFF, 0xB3, 0x47),
];

impl CursorColor {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Palette slot for the member joining a room that already has
    /// `member_count` members.
    pub fn for_member_count(member_count: usize) -> Self {
        PALETTE[member_count % PALETTE.len()]
    }

    /// Parse `#RRGGBB` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        Some(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    /// Normalized RGBA, opaque.
    pub fn to_array(&self) -> [f32; 4] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
            1.0,
        ]
    }
}

impl Default for CursorColor {
    fn default() -> Self {
        PALETTE[0]
    }
}

impl fmt::Display for CursorColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for CursorColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value).ok_or_else(|| format!("invalid color '{value}'"))
    }
}

impl From<CursorColor> for String {
    fn from(color: CursorColor) -> Self {
        color.to_hex()
    }
}

/// A session member as seen by this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    /// Stable for the whole membership.
    pub color: CursorColor,
    pub cursor: Option<Position>,
    pub selection: Option<TextRange>,
    pub active_document: Option<DocumentKey>,
    /// Local-only annotation: the local actor is following this user.
    #[serde(default)]
    pub following: bool,
}

impl User {
    pub fn new(id: UserId, display_name: impl Into<String>, color: CursorColor) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            color,
            cursor: None,
            selection: None,
            active_document: None,
            following: false,
        }
    }
}
