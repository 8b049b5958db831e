//! Durable stream channels, bootstrap structures and the records published
//! to downstream workers.
//!
//! The JSON field names of each record are the wire contract with the
//! consumers and must not change.

use std::fmt;

use serde::Serialize;

use crate::command::{Badge, LedgerKind};

/// Field every record is appended under.
pub const RECORD_FIELD: &str = "data";

/// Member, field or stream key written to create an empty structure.
pub const SENTINEL: &str = "__dummy__";

/// The append-only streams the pipeline publishes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Admin,
    IssueClaim,
    AutomaticEvents,
    Bounty,
    SolutionMerge,
    LiveUpdates,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Channel::Admin,
        Channel::IssueClaim,
        Channel::AutomaticEvents,
        Channel::Bounty,
        Channel::SolutionMerge,
        Channel::LiveUpdates,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Channel::Admin => "admin-bot-stream",
            Channel::IssueClaim => "issue-stream",
            Channel::AutomaticEvents => "automatic-events-stream",
            Channel::Bounty => "bounty-stream",
            Channel::SolutionMerge => "solution-merged-stream",
            Channel::LiveUpdates => "live-update-stream",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category a structure must report when introspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructureKind {
    Stream,
    Hash,
    SortedSet,
}

impl StructureKind {
    /// Name the store's `TYPE` command reports for this category.
    pub fn type_name(&self) -> &'static str {
        match self {
            StructureKind::Stream => "stream",
            StructureKind::Hash => "hash",
            StructureKind::SortedSet => "zset",
        }
    }
}

impl fmt::Display for StructureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructureSpec {
    pub name: &'static str,
    pub kind: StructureKind,
}

const fn stream(channel: Channel) -> StructureSpec {
    StructureSpec {
        name: channel.as_str(),
        kind: StructureKind::Stream,
    }
}

const fn hash(name: &'static str) -> StructureSpec {
    StructureSpec {
        name,
        kind: StructureKind::Hash,
    }
}

const fn sorted_set(name: &'static str) -> StructureSpec {
    StructureSpec {
        name,
        kind: StructureKind::SortedSet,
    }
}

/// Every structure that must exist before webhooks are accepted.
pub const REQUIRED_STRUCTURES: &[StructureSpec] = &[
    stream(Channel::Admin),
    stream(Channel::IssueClaim),
    stream(Channel::AutomaticEvents),
    stream(Channel::Bounty),
    stream(Channel::SolutionMerge),
    stream(Channel::LiveUpdates),
    // Badge buckets
    hash("bug-hunter-set"),
    hash("language-set"),
    hash("helper-set"),
    hash("testing-set"),
    hash("feature-suggestion-set"),
    hash("doc-set"),
    hash("enamoured-set"),
    // Leaderboard and per-language rankings
    sorted_set("leaderboard-sset"),
    sorted_set("cpp-ranking-sset"),
    sorted_set("java-ranking-sset"),
    sorted_set("py-ranking-sset"),
    sorted_set("js-ranking-sset"),
    sorted_set("go-ranking-sset"),
    sorted_set("rs-ranking-sset"),
    sorted_set("zig-ranking-sset"),
    sorted_set("flutter-ranking-sset"),
    sorted_set("kotlin-ranking-sset"),
];

/// Claim created, removed or extended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimRecord {
    pub github_username: String,
    pub url: String,
    pub claimed: bool,
    pub extend: bool,
}

/// Bounty or penalty applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BountyRecord {
    pub github_username: String,
    pub amount: u32,
    pub url: String,
    pub action: &'static str,
}

/// Badge awarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AchievementRecord {
    pub github_username: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// Pull request opened or merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SolutionRecord {
    pub github_username: String,
    pub pull_request_url: String,
    pub merged: bool,
}

/// A record bound for exactly one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRecord {
    Claim(ClaimRecord),
    Bounty(BountyRecord),
    Achievement(AchievementRecord),
    Solution(SolutionRecord),
}

impl StreamRecord {
    pub fn claimed(username: &str, url: &str) -> Self {
        StreamRecord::Claim(ClaimRecord {
            github_username: username.to_string(),
            url: url.to_string(),
            claimed: true,
            extend: false,
        })
    }

    pub fn unclaimed(username: &str, url: &str) -> Self {
        StreamRecord::Claim(ClaimRecord {
            github_username: username.to_string(),
            url: url.to_string(),
            claimed: false,
            extend: false,
        })
    }

    pub fn extended(username: &str, url: &str) -> Self {
        StreamRecord::Claim(ClaimRecord {
            github_username: username.to_string(),
            url: url.to_string(),
            claimed: false,
            extend: true,
        })
    }

    pub fn ledger(kind: LedgerKind, username: &str, amount: u32, url: &str) -> Self {
        StreamRecord::Bounty(BountyRecord {
            github_username: username.to_string(),
            amount,
            url: url.to_string(),
            action: kind.as_str(),
        })
    }

    pub fn achievement(badge: Badge, username: &str, url: &str) -> Self {
        StreamRecord::Achievement(AchievementRecord {
            github_username: username.to_string(),
            url: url.to_string(),
            kind: badge.as_str(),
        })
    }

    pub fn solution(username: &str, pull_request_url: &str, merged: bool) -> Self {
        StreamRecord::Solution(SolutionRecord {
            github_username: username.to_string(),
            pull_request_url: pull_request_url.to_string(),
            merged,
        })
    }

    pub fn channel(&self) -> Channel {
        match self {
            StreamRecord::Claim(_) => Channel::IssueClaim,
            StreamRecord::Bounty(_) => Channel::Bounty,
            StreamRecord::Achievement(_) => Channel::AutomaticEvents,
            StreamRecord::Solution(_) => Channel::SolutionMerge,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            StreamRecord::Claim(r) => serde_json::to_string(r),
            StreamRecord::Bounty(r) => serde_json::to_string(r),
            StreamRecord::Achievement(r) => serde_json::to_string(r),
            StreamRecord::Solution(r) => serde_json::to_string(r),
        }
    }
}
