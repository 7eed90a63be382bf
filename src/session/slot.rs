use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::capture::CapturedClip;

/// A spoken digit, 1 through 9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Digit(u8);

impl Digit {
    pub fn new(value: u8) -> Option<Self> {
        (1..=9).contains(&value).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Every digit in prompt order.
    pub fn all() -> impl Iterator<Item = Self> {
        (1..=9).map(Self)
    }
}

impl fmt::Display for Digit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Digit {
    type Err = ParseSlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| ParseSlotError::Digit(s.to_string()))
    }
}

/// One of the three prompted speaking styles for each digit.
///
/// Prompts label the styles with Arabic letters; stored object names use the
/// 1-based ordinal instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    A,
    B,
    C,
}

impl Variant {
    pub fn all() -> impl Iterator<Item = Self> {
        [Self::A, Self::B, Self::C].into_iter()
    }

    /// 1-based position used in stored object names.
    pub fn ordinal(self) -> u8 {
        match self {
            Self::A => 1,
            Self::B => 2,
            Self::C => 3,
        }
    }

    /// Arabic letter shown next to the digit in prompts.
    pub fn glyph(self) -> &'static str {
        match self {
            Self::A => "\u{0623}", // أ
            Self::B => "\u{0628}", // ب
            Self::C => "\u{062C}", // ج
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::C => "c",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = ParseSlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" | "1" | "\u{0623}" => Ok(Self::A),
            "b" | "2" | "\u{0628}" => Ok(Self::B),
            "c" | "3" | "\u{062C}" => Ok(Self::C),
            _ => Err(ParseSlotError::Variant(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseSlotError {
    #[error("invalid digit '{0}': expected 1 through 9")]
    Digit(String),

    #[error("invalid variant '{0}': expected a, b or c (1, 2 or 3)")]
    Variant(String),
}

/// Identifies one of the 27 clip slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SlotKey {
    pub digit: Digit,
    pub variant: Variant,
}

impl SlotKey {
    /// Total number of slots a complete session holds.
    pub const COUNT: usize = 27;

    pub fn new(digit: Digit, variant: Variant) -> Self {
        Self { digit, variant }
    }

    /// Every slot in prompt order: digit-major, variant-minor.
    pub fn all() -> impl Iterator<Item = Self> {
        Digit::all().flat_map(|digit| Variant::all().map(move |variant| Self::new(digit, variant)))
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.digit, self.variant)
    }
}

/// Capture lifecycle of a single slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    #[default]
    Empty,
    Recording,
    Captured,
}

/// One slot's state plus whatever clip it currently holds.
///
/// While a captured slot is being re-recorded its previous clip stays in
/// place, so an aborted attempt loses nothing.
#[derive(Debug, Clone, Default)]
pub struct ClipSlot {
    pub status: SlotStatus,
    pub clip: Option<CapturedClip>,
    pub preview: Option<PathBuf>,
}
