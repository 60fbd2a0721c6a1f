use regex::Regex;
use std::sync::LazyLock;

/// Inline mention markup: `[id123|Name]` for users, `[club123|Name]` for communities.
static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(id|club)(\d+)\|[^\]]*\]").expect("hardcoded regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionTarget {
    User(u64),
    Group(u64),
}

fn parse_mention(caps: &regex::Captures) -> Option<MentionTarget> {
    let id = caps[2].parse().ok()?;
    match &caps[1] {
        "id" => Some(MentionTarget::User(id)),
        _ => Some(MentionTarget::Group(id)),
    }
}

/// Pick the author override out of a command text.
///
/// The first mention wins. If it tags `owner_group_id` (people address the bot
/// that way) the second mention is used instead, whatever it is. Tokens whose
/// id does not fit a platform id are not mentions and are skipped.
pub fn parse_override(command_text: &str, owner_group_id: u64) -> Option<MentionTarget> {
    let mut mentions = MENTION
        .captures_iter(command_text)
        .filter_map(|caps| parse_mention(&caps));
    let first = mentions.next()?;

    if first == MentionTarget::Group(owner_group_id) {
        return mentions.next();
    }
    Some(first)
}

/// True when the text tags the bot's community in any form (`club<id>`, any case).
pub fn mentions_owner(text: &str, owner_group_id: u64) -> bool {
    let needle = format!("club{}", owner_group_id);
    text.to_lowercase().contains(&needle)
}
