//! Command and callback dispatch.
//!
//! Commands are an exact match against a small closed set. Callback
//! payloads are matched by longest registered prefix over an explicit
//! table — never `SplitN`/`LastIndex` string surgery, which would be
//! ambiguous between a prefix like `photo_custom_file_*` and `photo_*`.

use bridge_core::BridgeError;

/// The closed set of slash commands.
pub const COMMANDS: &[&str] = &[
    "start", "help", "repo", "llm", "sync", "insight", "stats", "todo", "issue", "customfile", "coffee",
    "resetusage",
];

pub fn is_known_command(name: &str) -> bool {
    COMMANDS.contains(&name)
}

pub fn dispatch_command(name: &str) -> Result<&'static str, BridgeError> {
    COMMANDS
        .iter()
        .find(|c| **c == name)
        .copied()
        .ok_or_else(|| BridgeError::UnknownCommand(name.to_string()))
}

/// One entry in the callback prefix table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    FileCustom,
    FilePinned,
    File,
    PhotoCustom,
    PhotoPinned,
    Photo,
    CustomFile,
    AddCustom,
    RemoveCustomFile,
    BackToFiles,
    IssueMore,
    IssueComment,
    IssueClose,
    TodoMore,
    TodoDone,
    PinFile,
    Coffee,
    Subscription,
}

/// Ordered longest-prefix-first so the first match is always correct
/// without needing a second length comparison at dispatch time.
const PREFIX_TABLE: &[(&str, CallbackKind)] = &[
    ("file_PINNED_", CallbackKind::FilePinned),
    ("file_CUSTOM_", CallbackKind::FileCustom),
    ("file_", CallbackKind::File),
    ("photo_custom_file_", CallbackKind::PhotoCustom),
    ("photo_PINNED_", CallbackKind::PhotoPinned),
    ("photo_", CallbackKind::Photo),
    ("custom_file_", CallbackKind::CustomFile),
    ("add_custom_", CallbackKind::AddCustom),
    ("remove_custom_file_", CallbackKind::RemoveCustomFile),
    ("back_to_files_", CallbackKind::BackToFiles),
    ("issue_more_", CallbackKind::IssueMore),
    ("issue_comment_", CallbackKind::IssueComment),
    ("issue_close_", CallbackKind::IssueClose),
    ("todo_more_", CallbackKind::TodoMore),
    ("todo_done_", CallbackKind::TodoDone),
    ("pin_file_", CallbackKind::PinFile),
    ("coffee_", CallbackKind::Coffee),
    ("subscription_", CallbackKind::Subscription),
];

/// Match `payload` against the longest registered prefix, returning the
/// matched kind and the remainder after the prefix.
pub fn dispatch_callback(payload: &str) -> Result<(CallbackKind, &str), BridgeError> {
    PREFIX_TABLE
        .iter()
        .filter(|(prefix, _)| payload.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(prefix, kind)| (*kind, &payload[prefix.len()..]))
        .ok_or_else(|| BridgeError::UnknownCommand(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_commands_dispatch() {
        assert!(dispatch_command("sync").is_ok());
        assert!(matches!(dispatch_command("nope"), Err(BridgeError::UnknownCommand(_))));
    }

    #[test]
    fn photo_custom_file_wins_over_photo_prefix() {
        let (kind, rest) = dispatch_callback("photo_custom_file_42_7").unwrap();
        assert_eq!(kind, CallbackKind::PhotoCustom);
        assert_eq!(rest, "42_7");
    }

    #[test]
    fn plain_photo_still_matches_when_not_custom() {
        let (kind, rest) = dispatch_callback("photo_NOTE_42_7").unwrap();
        assert_eq!(kind, CallbackKind::Photo);
        assert_eq!(rest, "NOTE_42_7");
    }

    #[test]
    fn file_pinned_wins_over_file() {
        let (kind, _) = dispatch_callback("file_PINNED_0_42_7").unwrap();
        assert_eq!(kind, CallbackKind::FilePinned);
    }

    #[test]
    fn unrecognized_payload_is_unknown_command() {
        assert!(matches!(dispatch_callback("totally_unknown_x"), Err(BridgeError::UnknownCommand(_))));
    }

    #[test]
    fn every_prefix_pair_resolves_to_its_longer_match() {
        for (prefix, expected_kind) in PREFIX_TABLE {
            let probe = format!("{prefix}rest");
            let (kind, _) = dispatch_callback(&probe).unwrap();
            assert_eq!(kind, *expected_kind, "prefix {prefix} matched the wrong table entry");
        }
    }
}
