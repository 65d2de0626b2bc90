//! Team colours and per-render line-style allocation.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{PaceError, PaceParams};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Result<Self, PaceError> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PaceError::InvalidParameter(format!(
                "invalid colour '{}': expected #rrggbb",
                hex
            )));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| PaceError::InvalidParameter(e.to_string()))
        };
        Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Color {
    type Error = PaceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::from_hex(&value)
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.to_hex()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineStyle {
    Solid,
    Dashed,
    Dotted,
}

impl LineStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStyle::Solid => "solid",
            LineStyle::Dashed => "dashed",
            LineStyle::Dotted => "dotted",
        }
    }
}

/// Whether a driver was the first of their team to be drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StyleRank {
    Primary,
    Secondary,
}

/// Colour and line style for one driver's series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StyleDirective {
    pub team: String,
    pub color: Color,
    pub linestyle: LineStyle,
    pub rank: StyleRank,
}

/// Source of team colours. Lookup depends on the team alone.
pub trait TeamColors {
    fn team_color(&self, team: &str) -> Result<Color, PaceError>;
}

impl<T: TeamColors + ?Sized> TeamColors for &T {
    fn team_color(&self, team: &str) -> Result<Color, PaceError> {
        (**self).team_color(team)
    }
}

/// Season colour table keyed by lower-case team name fragments.
#[derive(Clone, Debug, Default)]
pub struct SeasonPalette {
    entries: Vec<(String, Color)>,
}

const PALETTE_2022: &[(&str, &str)] = &[
    ("mercedes", "#00d2be"),
    ("ferrari", "#dc0000"),
    ("red bull", "#0600ef"),
    ("alpine", "#0090ff"),
    ("haas", "#ffffff"),
    ("aston martin", "#006f62"),
    ("alphatauri", "#2b4562"),
    ("mclaren", "#ff8700"),
    ("alfa romeo", "#900000"),
    ("williams", "#005aff"),
];

const PALETTE_2023: &[(&str, &str)] = &[
    ("mercedes", "#6cd3bf"),
    ("ferrari", "#f91536"),
    ("red bull", "#3671c6"),
    ("alpine", "#2293d1"),
    ("haas", "#b6babd"),
    ("aston martin", "#358c75"),
    ("alphatauri", "#5e8faa"),
    ("mclaren", "#f58020"),
    ("alfa romeo", "#c92d4b"),
    ("williams", "#37bedd"),
];

const PALETTE_2024: &[(&str, &str)] = &[
    ("mercedes", "#27f4d2"),
    ("ferrari", "#e8002d"),
    ("red bull", "#3671c6"),
    ("alpine", "#ff87bc"),
    ("haas", "#b6babd"),
    ("aston martin", "#229971"),
    ("racing bulls", "#6692ff"),
    ("rb f1", "#6692ff"),
    ("mclaren", "#ff8000"),
    ("kick sauber", "#52e252"),
    ("williams", "#64c4ff"),
];

impl SeasonPalette {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in colours for a championship season.
    pub fn for_season(year: i32) -> Self {
        let table = match year {
            i32::MIN..=2022 => PALETTE_2022,
            2023 => PALETTE_2023,
            _ => PALETTE_2024,
        };
        let mut palette = Self::new();
        for (key, hex) in table {
            if let Ok(color) = Color::from_hex(hex) {
                palette.insert(key, color);
            }
        }
        palette
    }

    /// Add or replace the colour for a team name fragment.
    pub fn insert(&mut self, key: &str, color: Color) {
        let key = key.trim().to_ascii_lowercase();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = color;
        } else {
            self.entries.push((key, color));
        }
        self.entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    pub fn with_overrides(mut self, overrides: &HashMap<String, Color>) -> Self {
        for (key, color) in overrides {
            self.insert(key, *color);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TeamColors for SeasonPalette {
    fn team_color(&self, team: &str) -> Result<Color, PaceError> {
        let needle = team.trim().to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(key, _)| needle == *key || needle.contains(key.as_str()))
            .map(|(_, color)| *color)
            .ok_or_else(|| PaceError::UnknownTeam(team.to_string()))
    }
}

#[derive(Clone, Debug)]
struct TeamEntry {
    team: String,
    color: Color,
    linestyle: LineStyle,
}

/// Teams already drawn during one render, in first-seen order.
///
/// Build a fresh registry for every render; styles depend on call order.
#[derive(Clone, Debug)]
pub struct TeamStyleRegistry {
    entries: Vec<TeamEntry>,
    primary: LineStyle,
    secondary: LineStyle,
    fallback_color: Color,
}

impl TeamStyleRegistry {
    pub fn new(params: &PaceParams) -> Self {
        Self {
            entries: Vec::new(),
            primary: params.primary_linestyle,
            secondary: params.secondary_linestyle,
            fallback_color: params.fallback_color,
        }
    }

    pub fn contains(&self, team: &str) -> bool {
        self.entries.iter().any(|e| e.team == team)
    }

    pub fn teams(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.team.as_str()).collect()
    }

    pub fn assign<C: TeamColors + ?Sized>(&mut self, team: &str, colors: &C) -> StyleDirective {
        if let Some(entry) = self.entries.iter().find(|e| e.team == team) {
            return StyleDirective {
                team: team.to_string(),
                color: entry.color,
                linestyle: self.secondary,
                rank: StyleRank::Secondary,
            };
        }

        let color = match colors.team_color(team) {
            Ok(color) => color,
            Err(err) => {
                warn!("{}; using fallback colour {}", err, self.fallback_color);
                self.fallback_color
            }
        };
        debug!(team, color = %color, "registered team style");
        self.entries.push(TeamEntry {
            team: team.to_string(),
            color,
            linestyle: self.primary,
        });
        StyleDirective {
            team: team.to_string(),
            color,
            linestyle: self.primary,
            rank: StyleRank::Primary,
        }
    }
}

/// Style for the next driver of `team`, registering the team on first sight.
pub fn assign_style<C: TeamColors + ?Sized>(
    registry: &mut TeamStyleRegistry,
    team: &str,
    colors: &C,
) -> StyleDirective {
    registry.assign(team, colors)
}
