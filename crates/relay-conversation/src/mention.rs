//! Teammate mention extraction.
//!
//! Two forms are recognised in an agent's reply:
//!
//! - tagged: `[@coder: please add tests]` or `[@coder,reviewer: look at this]`,
//!   one directed message per target
//! - bare: the first `@coder` that names a valid teammate, forwarding the
//!   whole reply; only used when the reply has no tags at all
//!
//! Text outside the tags is shared context and is prepended to every
//! directed message from that reply.

use std::sync::OnceLock;

use regex::Regex;
use relay_core::{Roster, TeamRef};
use tracing::{debug, warn};

const SHARED_SEPARATOR: &str = "\n\n------\n\nDirected to you:\n";

fn tag_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\[@([^\]:\[]+?):\s*(.*?)\]").expect("valid tag regex"))
}

fn bare_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^\w@.])@([A-Za-z0-9][A-Za-z0-9_-]*)").expect("valid mention regex")
    })
}

/// A valid mention: one message to deliver to one teammate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    /// Configured id of the teammate.
    pub target: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionRejection {
    /// The agent addressed itself.
    SelfMention,
    /// No agent with that id.
    Unknown,
    /// The agent exists but is not on the conversation's team.
    NotInTeam,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedMention {
    pub target: String,
    pub reason: MentionRejection,
}

/// Result of scanning one reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MentionScan {
    pub mentions: Vec<Mention>,
    pub rejected: Vec<RejectedMention>,
    /// Reply text with every tag removed.
    pub shared_context: String,
}

impl MentionScan {
    pub fn targets(&self) -> Vec<&str> {
        self.mentions.iter().map(|m| m.target.as_str()).collect()
    }
}

fn validate<'r>(
    raw: &str,
    responder: &str,
    team: &TeamRef<'_>,
    roster: &'r Roster,
) -> Result<&'r str, MentionRejection> {
    let target = roster.agent(raw).ok_or(MentionRejection::Unknown)?;
    if target.eq_ignore_ascii_case(responder) {
        return Err(MentionRejection::SelfMention);
    }
    if !team.has_member(target) {
        return Err(MentionRejection::NotInTeam);
    }
    Ok(target)
}

/// Extracts the teammate mentions in `reply`, written by `responder`
/// inside `team`.
///
/// Invalid tagged mentions are logged and returned in `rejected`; they
/// never produce a [`Mention`].
pub fn scan_mentions(reply: &str, responder: &str, team: &TeamRef<'_>, roster: &Roster) -> MentionScan {
    let tags = tag_pattern();
    let shared_context = collapse_blank_lines(tags.replace_all(reply, "").trim());
    let mut scan = MentionScan {
        shared_context,
        ..Default::default()
    };

    let mut saw_tag = false;
    for caps in tags.captures_iter(reply) {
        saw_tag = true;
        let text = caps[2].trim();
        let mut seen: Vec<String> = Vec::new();

        for raw in caps[1].split(',') {
            let raw = raw.trim().trim_start_matches('@');
            if raw.is_empty() {
                continue;
            }
            match validate(raw, responder, team, roster) {
                Ok(target) => {
                    if seen.iter().any(|s| s == target) {
                        continue;
                    }
                    seen.push(target.to_string());
                    scan.mentions.push(Mention {
                        target: target.to_string(),
                        message: directed_message(&scan.shared_context, text),
                    });
                }
                Err(reason) => {
                    warn!(
                        from = responder,
                        target = raw,
                        team = team.id,
                        ?reason,
                        "dropping invalid mention"
                    );
                    scan.rejected.push(RejectedMention {
                        target: raw.to_string(),
                        reason,
                    });
                }
            }
        }
    }

    if !saw_tag {
        for caps in bare_pattern().captures_iter(reply) {
            let raw = &caps[1];
            match validate(raw, responder, team, roster) {
                Ok(target) => {
                    scan.mentions.push(Mention {
                        target: target.to_string(),
                        message: reply.trim().to_string(),
                    });
                    break;
                }
                Err(reason) => debug!(from = responder, target = raw, ?reason, "ignoring bare mention"),
            }
        }
    }

    scan
}

fn directed_message(shared: &str, text: &str) -> String {
    if shared.is_empty() {
        text.to_string()
    } else {
        format!("{}{}{}", shared, SHARED_SEPARATOR, text)
    }
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out
}
