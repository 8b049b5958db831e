//! Issue label classification.
//!
//! Labels are compared upper-cased. One label marks an issue as accepted into
//! the programme, three set its difficulty, `BOUNTY-<n>` sets the promised
//! bounty and anything else becomes a free-form tag.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label a maintainer applies to accept an issue into the programme.
pub const ACCEPTANCE_LABEL: &str = "AMSOC-ACCEPTED";

const BOUNTY_LABEL_PREFIX: &str = "BOUNTY-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Difficulty {
    #[default]
    Unset,
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Unset => "UNSET",
            Difficulty::Easy => "EASY",
            Difficulty::Medium => "MEDIUM",
            Difficulty::Hard => "HARD",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = UnknownDifficulty;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNSET" => Ok(Difficulty::Unset),
            "EASY" => Ok(Difficulty::Easy),
            "MEDIUM" => Ok(Difficulty::Medium),
            "HARD" => Ok(Difficulty::Hard),
            other => Err(UnknownDifficulty(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown difficulty '{0}'")]
pub struct UnknownDifficulty(pub String);

/// What a label means for the issue it was applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelKind {
    Accepted,
    Difficulty(Difficulty),
    Bounty(u32),
    Tag(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid bounty label '{label}': amount must be a non-negative integer")]
pub struct InvalidBountyLabel {
    pub label: String,
}

impl LabelKind {
    /// Classify a label name.
    ///
    /// Fails only for `BOUNTY-` labels whose suffix is not a non-negative
    /// integer; every other label has a meaning.
    pub fn classify(name: &str) -> Result<LabelKind, InvalidBountyLabel> {
        let label = name.trim().to_uppercase();

        if label == ACCEPTANCE_LABEL {
            return Ok(LabelKind::Accepted);
        }

        match label.as_str() {
            "EASY" => return Ok(LabelKind::Difficulty(Difficulty::Easy)),
            "MEDIUM" => return Ok(LabelKind::Difficulty(Difficulty::Medium)),
            "HARD" => return Ok(LabelKind::Difficulty(Difficulty::Hard)),
            _ => {}
        }

        if let Some(amount) = label.strip_prefix(BOUNTY_LABEL_PREFIX) {
            return amount
                .parse::<u32>()
                .map(LabelKind::Bounty)
                .map_err(|_| InvalidBountyLabel { label });
        }

        Ok(LabelKind::Tag(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acceptance_label_case_insensitive() {
        assert_eq!(LabelKind::classify("amsoc-accepted"), Ok(LabelKind::Accepted));
        assert_eq!(LabelKind::classify("AMSOC-Accepted"), Ok(LabelKind::Accepted));
    }

    #[test]
    fn test_difficulty_labels() {
        assert_eq!(
            LabelKind::classify("easy"),
            Ok(LabelKind::Difficulty(Difficulty::Easy))
        );
        assert_eq!(
            LabelKind::classify("Medium"),
            Ok(LabelKind::Difficulty(Difficulty::Medium))
        );
        assert_eq!(
            LabelKind::classify("HARD"),
            Ok(LabelKind::Difficulty(Difficulty::Hard))
        );
    }

    #[test]
    fn test_bounty_label() {
        assert_eq!(LabelKind::classify("bounty-150"), Ok(LabelKind::Bounty(150)));
        assert_eq!(LabelKind::classify("BOUNTY-0"), Ok(LabelKind::Bounty(0)));
    }

    #[test]
    fn test_bounty_label_with_bad_amount() {
        assert!(LabelKind::classify("bounty-lots").is_err());
        assert!(LabelKind::classify("bounty--5").is_err());
        assert!(LabelKind::classify("bounty-").is_err());
    }

    #[test]
    fn test_other_labels_become_upper_cased_tags() {
        assert_eq!(
            LabelKind::classify("good first issue"),
            Ok(LabelKind::Tag("GOOD FIRST ISSUE".to_string()))
        );
    }

    #[test]
    fn test_difficulty_round_trips_through_str() {
        for d in [
            Difficulty::Unset,
            Difficulty::Easy,
            Difficulty::Medium,
            Difficulty::Hard,
        ] {
            assert_eq!(d.as_str().parse::<Difficulty>(), Ok(d));
        }
        assert!("TRIVIAL".parse::<Difficulty>().is_err());
    }
}
