//! Comment command grammar.
//!
//! Commands are slash-verbs on their own line, e.g. `/bounty 50 @alice`.
//! Which verbs exist depends on the commentator's resolved role, and the
//! grammar is a declarative table of `(role, verb) -> (arguments, intent)`
//! rows ([`COMMAND_TABLE`]) that is validated once at startup with
//! [`validate_command_table`].
//!
//! Parsing distinguishes three outcomes:
//! - `Ok(Some(command))` - a well-formed command for this role
//! - `Ok(None)` - nothing to do (no command line, unknown verb, a verb that
//!   belongs to another role, or an unknown commentator)
//! - `Err(CommandSyntaxError)` - a verb this role owns, with the wrong number
//!   or type of arguments

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payload::normalize_login;

/// Resolved role of the author of a comment, relative to one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Commentator {
    Maintainer,
    Participant,
    Unknown,
}

impl fmt::Display for Commentator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Commentator::Maintainer => write!(f, "maintainer"),
            Commentator::Participant => write!(f, "participant"),
            Commentator::Unknown => write!(f, "unknown"),
        }
    }
}

/// Achievement badges a maintainer can award.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Help,
    Doc,
    Test,
    Impact,
    Bug,
}

impl Badge {
    pub const ALL: [Badge; 5] = [Badge::Help, Badge::Doc, Badge::Test, Badge::Impact, Badge::Bug];

    pub fn as_str(&self) -> &'static str {
        match self {
            Badge::Help => "help",
            Badge::Doc => "doc",
            Badge::Test => "test",
            Badge::Impact => "impact",
            Badge::Bug => "bug",
        }
    }
}

/// Direction of a bounty ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Bounty,
    Penalty,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Bounty => "bounty",
            LedgerKind::Penalty => "penalty",
        }
    }

    /// Apply this kind's sign to an unsigned amount.
    pub fn signed(&self, amount: u32) -> i64 {
        match self {
            LedgerKind::Bounty => i64::from(amount),
            LedgerKind::Penalty => -i64::from(amount),
        }
    }
}

/// A parsed, well-formed command. Exactly one payload shape per variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Participant claims the issue for themselves.
    Assign { participant: String },
    /// Participant drops their claim on the issue.
    Unassign { participant: String },
    /// Maintainer awards (or takes back) bounty.
    Ledger {
        kind: LedgerKind,
        amount: u32,
        target: String,
    },
    /// Maintainer awards a badge.
    Achievement { badge: Badge, target: String },
    /// Maintainer pushes back the expiry of a participant's claim.
    Extend { days: u32, target: String },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Assign { participant } => write!(f, "/assign (by {})", participant),
            Command::Unassign { participant } => write!(f, "/unassign (by {})", participant),
            Command::Ledger {
                kind,
                amount,
                target,
            } => write!(f, "/{} {} @{}", kind.as_str(), amount, target),
            Command::Achievement { badge, target } => {
                write!(f, "/{} @{}", badge.as_str(), target)
            }
            Command::Extend { days, target } => write!(f, "/extend {} @{}", days, target),
        }
    }
}

/// Type of a positional command argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Integer greater than zero.
    PositiveInt,
    /// `@username`.
    User,
}

/// What a table row produces once its arguments are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntentKind {
    Assign,
    Unassign,
    Ledger(LedgerKind),
    Achievement(Badge),
    Extend,
}

impl IntentKind {
    /// Argument list the intent needs to be built.
    fn expected_args(&self) -> &'static [ArgKind] {
        match self {
            IntentKind::Assign | IntentKind::Unassign => &[],
            IntentKind::Ledger(_) | IntentKind::Extend => &[ArgKind::PositiveInt, ArgKind::User],
            IntentKind::Achievement(_) => &[ArgKind::User],
        }
    }

    fn all() -> Vec<IntentKind> {
        let mut all = vec![
            IntentKind::Assign,
            IntentKind::Unassign,
            IntentKind::Ledger(LedgerKind::Bounty),
            IntentKind::Ledger(LedgerKind::Penalty),
            IntentKind::Extend,
        ];
        all.extend(Badge::ALL.iter().copied().map(IntentKind::Achievement));
        all
    }
}

/// One row of the command grammar.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub role: Commentator,
    pub verb: &'static str,
    pub args: &'static [ArgKind],
    pub intent: IntentKind,
    pub usage: &'static str,
}

const AMOUNT_AND_USER: &[ArgKind] = &[ArgKind::PositiveInt, ArgKind::User];
const USER: &[ArgKind] = &[ArgKind::User];

pub const COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec {
        role: Commentator::Participant,
        verb: "/assign",
        args: &[],
        intent: IntentKind::Assign,
        usage: "/assign",
    },
    CommandSpec {
        role: Commentator::Participant,
        verb: "/unassign",
        args: &[],
        intent: IntentKind::Unassign,
        usage: "/unassign",
    },
    CommandSpec {
        role: Commentator::Maintainer,
        verb: "/bounty",
        args: AMOUNT_AND_USER,
        intent: IntentKind::Ledger(LedgerKind::Bounty),
        usage: "/bounty <amount> @user",
    },
    CommandSpec {
        role: Commentator::Maintainer,
        verb: "/penalty",
        args: AMOUNT_AND_USER,
        intent: IntentKind::Ledger(LedgerKind::Penalty),
        usage: "/penalty <amount> @user",
    },
    CommandSpec {
        role: Commentator::Maintainer,
        verb: "/help",
        args: USER,
        intent: IntentKind::Achievement(Badge::Help),
        usage: "/help @user",
    },
    CommandSpec {
        role: Commentator::Maintainer,
        verb: "/doc",
        args: USER,
        intent: IntentKind::Achievement(Badge::Doc),
        usage: "/doc @user",
    },
    CommandSpec {
        role: Commentator::Maintainer,
        verb: "/test",
        args: USER,
        intent: IntentKind::Achievement(Badge::Test),
        usage: "/test @user",
    },
    CommandSpec {
        role: Commentator::Maintainer,
        verb: "/impact",
        args: USER,
        intent: IntentKind::Achievement(Badge::Impact),
        usage: "/impact @user",
    },
    CommandSpec {
        role: Commentator::Maintainer,
        verb: "/bug",
        args: USER,
        intent: IntentKind::Achievement(Badge::Bug),
        usage: "/bug @user",
    },
    CommandSpec {
        role: Commentator::Maintainer,
        verb: "/extend",
        args: AMOUNT_AND_USER,
        intent: IntentKind::Extend,
        usage: "/extend <days> @user",
    },
];

/// Problems with a command table, found at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandTableError {
    #[error("verb '{verb}' is declared twice for role {role}")]
    Duplicate { role: Commentator, verb: String },
    #[error("verb '{0}' must be a single word starting with '/'")]
    BadVerb(String),
    #[error("verb '{0}' is declared for the unknown role, which never runs commands")]
    UnknownRole(String),
    #[error("verb '{verb}' declares arguments that do not build its intent {intent:?}")]
    ArgumentMismatch { verb: String, intent: IntentKind },
    #[error("no verb produces intent {0:?}")]
    Uncovered(IntentKind),
}

/// Check that a table is unambiguous and that every intent is reachable.
pub fn validate_command_table(table: &[CommandSpec]) -> Result<(), CommandTableError> {
    let mut seen = HashSet::new();
    let mut covered = HashSet::new();

    for spec in table {
        if !spec.verb.starts_with('/')
            || spec.verb.len() < 2
            || spec.verb.chars().any(char::is_whitespace)
        {
            return Err(CommandTableError::BadVerb(spec.verb.to_string()));
        }
        if spec.role == Commentator::Unknown {
            return Err(CommandTableError::UnknownRole(spec.verb.to_string()));
        }
        if !seen.insert((spec.role, spec.verb.to_ascii_lowercase())) {
            return Err(CommandTableError::Duplicate {
                role: spec.role,
                verb: spec.verb.to_string(),
            });
        }
        if spec.args != spec.intent.expected_args() {
            return Err(CommandTableError::ArgumentMismatch {
                verb: spec.verb.to_string(),
                intent: spec.intent,
            });
        }
        covered.insert(spec.intent);
    }

    for intent in IntentKind::all() {
        if !covered.contains(&intent) {
            return Err(CommandTableError::Uncovered(intent));
        }
    }

    Ok(())
}

/// A recognised verb with bad arguments. Reported back, never dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandSyntaxError {
    #[error("{verb} takes {expected} argument(s) but got {got} (usage: {usage})")]
    Arity {
        verb: &'static str,
        expected: usize,
        got: usize,
        usage: &'static str,
    },
    #[error("{verb}: '{value}' is not a positive integer (usage: {usage})")]
    NotAPositiveInteger {
        verb: &'static str,
        value: String,
        usage: &'static str,
    },
    #[error("{verb}: '{value}' is not a @username (usage: {usage})")]
    NotAUser {
        verb: &'static str,
        value: String,
        usage: &'static str,
    },
}

enum Arg {
    Int(u32),
    User(String),
}

/// Parse a comment with the built-in [`COMMAND_TABLE`].
pub fn parse_comment(
    body: &str,
    role: Commentator,
    author: &str,
) -> Result<Option<Command>, CommandSyntaxError> {
    parse_comment_with(COMMAND_TABLE, body, role, author)
}

/// Parse a comment against an explicit table.
///
/// The first line whose trimmed text starts with `/` is the command line;
/// later lines are never scanned, even if the first one turns out not to be
/// a command. Verbs match case-insensitively.
pub fn parse_comment_with(
    table: &[CommandSpec],
    body: &str,
    role: Commentator,
    author: &str,
) -> Result<Option<Command>, CommandSyntaxError> {
    if role == Commentator::Unknown {
        return Ok(None);
    }

    let Some(line) = body
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('/'))
    else {
        return Ok(None);
    };

    let mut tokens = line.split_whitespace();
    let Some(verb) = tokens.next() else {
        return Ok(None);
    };

    let Some(spec) = table
        .iter()
        .find(|spec| spec.role == role && spec.verb.eq_ignore_ascii_case(verb))
    else {
        return Ok(None);
    };

    let raw_args: Vec<&str> = tokens.collect();
    if raw_args.len() != spec.args.len() {
        return Err(CommandSyntaxError::Arity {
            verb: spec.verb,
            expected: spec.args.len(),
            got: raw_args.len(),
            usage: spec.usage,
        });
    }

    let mut args = Vec::with_capacity(raw_args.len());
    for (kind, raw) in spec.args.iter().zip(raw_args) {
        args.push(parse_arg(spec, *kind, raw)?);
    }

    Ok(Some(build(spec, args, author)))
}

fn parse_arg(spec: &CommandSpec, kind: ArgKind, raw: &str) -> Result<Arg, CommandSyntaxError> {
    match kind {
        ArgKind::PositiveInt => match raw.parse::<u32>() {
            Ok(n) if n > 0 => Ok(Arg::Int(n)),
            _ => Err(CommandSyntaxError::NotAPositiveInteger {
                verb: spec.verb,
                value: raw.to_string(),
                usage: spec.usage,
            }),
        },
        ArgKind::User => parse_username(raw)
            .map(|u| Arg::User(normalize_login(u)))
            .ok_or_else(|| CommandSyntaxError::NotAUser {
                verb: spec.verb,
                value: raw.to_string(),
                usage: spec.usage,
            }),
    }
}

/// Strip the `@` from a GitHub handle and check its characters.
///
/// GitHub logins are 1-39 ASCII alphanumerics or hyphens. Bot accounts end
/// in `[bot]`, which is also accepted.
fn parse_username(raw: &str) -> Option<&str> {
    let name = raw.strip_prefix('@')?;
    let core = name.strip_suffix("[bot]").unwrap_or(name);
    let valid = !core.is_empty()
        && core.len() <= 39
        && core.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    valid.then_some(name)
}

fn build(spec: &CommandSpec, args: Vec<Arg>, author: &str) -> Command {
    let mut int = None;
    let mut user = None;
    for arg in args {
        match arg {
            Arg::Int(n) => int = Some(n),
            Arg::User(u) => user = Some(u),
        }
    }
    // The table is validated at startup, so the argument list always matches
    // the intent; the fallbacks are unreachable for a validated table.
    let int = int.unwrap_or_default();
    let user = user.unwrap_or_default();

    match spec.intent {
        IntentKind::Assign => Command::Assign {
            participant: normalize_login(author),
        },
        IntentKind::Unassign => Command::Unassign {
            participant: normalize_login(author),
        },
        IntentKind::Ledger(kind) => Command::Ledger {
            kind,
            amount: int,
            target: user,
        },
        IntentKind::Achievement(badge) => Command::Achievement {
            badge,
            target: user,
        },
        IntentKind::Extend => Command::Extend {
            days: int,
            target: user,
        },
    }
}
