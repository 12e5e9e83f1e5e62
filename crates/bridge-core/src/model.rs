//! Core data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A chat-platform user bound to a remote repository.
///
/// `encrypted_remote_token` is the output of [`crate::crypto::encrypt_token`];
/// nothing in this crate ever holds the plaintext token longer than a single
/// decrypt call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Chat platform identifier. Signed because some chat platforms (e.g.
    /// Telegram) hand out negative ids for group chats.
    pub chat_id: i64,
    pub display_name: String,
    pub encrypted_remote_token: Vec<u8>,
    pub remote_repo_url: String,
    pub committer_identity: String,
    pub llm_provider: Option<String>,
    pub llm_endpoint: Option<String>,
    pub llm_auth_env: Option<String>,
    pub llm_model: Option<String>,
    pub custom_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(chat_id: i64, display_name: impl Into<String>, encrypted_remote_token: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            chat_id,
            display_name: display_name.into(),
            encrypted_remote_token,
            remote_repo_url: String::new(),
            committer_identity: String::new(),
            llm_provider: None,
            llm_endpoint: None,
            llm_auth_env: None,
            llm_model: None,
            custom_files: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate and push a new custom path.
    pub fn add_custom_file(&mut self, path: &str, limit: usize) -> Result<(), ValidationError> {
        validate_custom_path(path)?;
        if self.custom_files.len() >= limit {
            return Err(ValidationError::CustomFileLimitReached(limit));
        }
        if self.custom_files.iter().any(|p| p == path) {
            return Err(ValidationError::DuplicateCustomFile);
        }
        self.custom_files.push(path.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// The first two custom files, rendered as dedicated "pinned" buttons.
    pub fn pinned_files(&self) -> &[String] {
        &self.custom_files[..self.custom_files.len().min(2)]
    }

    /// Uses the default platform LLM rather than a user-supplied one.
    pub fn uses_platform_llm(&self) -> bool {
        self.llm_endpoint.is_none()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("custom file path must be a relative forward-slash path ending in .md, with no .. segments")]
    BadCustomPath,
    #[error("custom file limit of {0} reached for this tier")]
    CustomFileLimitReached(usize),
    #[error("that custom file already exists")]
    DuplicateCustomFile,
    #[error("TODOs cannot contain line breaks")]
    TodoHasLineBreak,
    #[error("comment body cannot be empty")]
    EmptyComment,
    #[error("file index out of range")]
    BadFileIndex,
}

/// Custom file path invariant: forward-slash relative path, `.md` suffix,
/// never absolute, never containing `..` segments.
pub fn validate_custom_path(path: &str) -> Result<(), ValidationError> {
    if path.starts_with('/') || !path.ends_with(".md") || path.is_empty() {
        return Err(ValidationError::BadCustomPath);
    }
    if path.split('/').any(|seg| seg == "..") {
        return Err(ValidationError::BadCustomPath);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PremiumState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free = 0,
    Coffee = 1,
    Cake = 2,
    Sponsor = 3,
}

impl Tier {
    pub fn from_level(level: i32) -> Option<Self> {
        match level {
            0 => Some(Tier::Free),
            1 => Some(Tier::Coffee),
            2 => Some(Tier::Cake),
            3 => Some(Tier::Sponsor),
            _ => None,
        }
    }

    pub fn level(&self) -> i32 {
        *self as i32
    }

    /// Tier multiplier against free-tier base limits.
    pub fn multiplier(&self) -> u64 {
        match self {
            Tier::Free => 1,
            Tier::Coffee => 2,
            Tier::Cake => 4,
            Tier::Sponsor => 10,
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Tier::Free => Some(Tier::Coffee),
            Tier::Coffee => Some(Tier::Cake),
            Tier::Cake => Some(Tier::Sponsor),
            Tier::Sponsor => None,
        }
    }
}

/// Never-expires sentinel for [`PremiumState::expiry_epoch`].
pub const NEVER_EXPIRES: i64 = -1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiumState {
    pub chat_id: i64,
    pub tier_level: i32,
    pub expiry_epoch: i64,
    pub subscription: bool,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub billing_period: Option<String>,
}

impl PremiumState {
    pub fn free(chat_id: i64) -> Self {
        Self {
            chat_id,
            tier_level: Tier::Free.level(),
            expiry_epoch: NEVER_EXPIRES,
            subscription: false,
            external_customer_id: None,
            external_subscription_id: None,
            billing_period: None,
        }
    }

    /// A tier of zero is never active regardless of expiry.
    pub fn is_active(&self, now_epoch: i64) -> bool {
        self.tier_level > 0 && (self.expiry_epoch == NEVER_EXPIRES || self.expiry_epoch > now_epoch)
    }

    pub fn tier(&self, now_epoch: i64) -> Tier {
        if self.is_active(now_epoch) {
            Tier::from_level(self.tier_level).unwrap_or(Tier::Free)
        } else {
            Tier::Free
        }
    }
}

// ---------------------------------------------------------------------------
// UsagePeriod / Insights
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsagePeriod {
    pub issues_created: u32,
    pub images_uploaded: u32,
    pub llm_input_tokens: u64,
    pub llm_output_tokens: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Insights {
    pub commits: u64,
    pub issues_opened: u64,
    pub issues_closed: u64,
    pub issue_comments: u64,
    pub images: u64,
    pub sync_invocations: u64,
    pub insight_invocations: u64,
    pub reset_events: u64,
    pub lifetime_llm_tokens: u64,
}

// ---------------------------------------------------------------------------
// TopupLog / ResetLog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopupLog {
    pub id: i64,
    pub chat_id: i64,
    pub tier_name: String,
    pub amount_cents: i64,
    pub external_event_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetLog {
    pub id: i64,
    pub chat_id: i64,
    pub topup_log_id: i64,
    pub snapshot: UsagePeriod,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// PendingInteraction
// ---------------------------------------------------------------------------

pub const PENDING_DELIM: &str = "|||DELIM|||";

/// Decoded payload carried by a [`PendingInteraction`] entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingPayload {
    Text {
        body: String,
        original_message_id: i64,
    },
    Photo {
        caption: String,
        original_message_id: i64,
        photo_cdn_url: String,
        base64_image: String,
    },
    /// Reply-awaiting states (e.g. "add_custom_{chatID}") carry a free-form
    /// string the handler alone knows how to interpret.
    Raw(String),
}

impl PendingPayload {
    /// Encode using `SplitN`-equivalent semantics: joining preserves any
    /// literal delimiter occurrences inside content bodies because decoding
    /// only ever splits the expected number of times.
    pub fn encode(&self) -> String {
        match self {
            PendingPayload::Text { body, original_message_id } => {
                format!("{body}{PENDING_DELIM}{original_message_id}")
            }
            PendingPayload::Photo {
                caption,
                original_message_id,
                photo_cdn_url,
                base64_image,
            } => format!(
                "{caption}{PENDING_DELIM}{original_message_id}{PENDING_DELIM}{photo_cdn_url}{PENDING_DELIM}{base64_image}"
            ),
            PendingPayload::Raw(s) => s.clone(),
        }
    }

    /// Decode a text-message payload (`body|||DELIM|||originalMessageID`).
    pub fn decode_text(encoded: &str) -> Option<PendingPayload> {
        let (body, id) = encoded.rsplit_once(PENDING_DELIM)?;
        let original_message_id = id.parse().ok()?;
        Some(PendingPayload::Text {
            body: body.to_string(),
            original_message_id,
        })
    }

    /// Decode a photo-message payload (4 delimited fields).
    pub fn decode_photo(encoded: &str) -> Option<PendingPayload> {
        let parts: Vec<&str> = encoded.splitn(4, PENDING_DELIM).collect();
        if parts.len() != 4 {
            return None;
        }
        let original_message_id = parts[1].parse().ok()?;
        Some(PendingPayload::Photo {
            caption: parts[0].to_string(),
            original_message_id,
            photo_cdn_url: parts[2].to_string(),
            base64_image: parts[3].to_string(),
        })
    }
}

/// Build the per-message pending key `"{chatID}_{messageID}"`.
pub fn pending_message_key(chat_id: i64, message_id: i64) -> String {
    format!("{chat_id}_{message_id}")
}

// ---------------------------------------------------------------------------
// TargetFile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuiltinFileType {
    Note,
    Todo,
    Issue,
    Idea,
    Inbox,
    Tool,
}

impl BuiltinFileType {
    pub const ALL: [BuiltinFileType; 6] = [
        BuiltinFileType::Note,
        BuiltinFileType::Todo,
        BuiltinFileType::Issue,
        BuiltinFileType::Idea,
        BuiltinFileType::Inbox,
        BuiltinFileType::Tool,
    ];

    /// The fixed set of recognized built-in destinations.
    pub fn filename(&self) -> &'static str {
        match self {
            BuiltinFileType::Note => "note.md",
            BuiltinFileType::Todo => "todo.md",
            BuiltinFileType::Issue => "issue.md",
            BuiltinFileType::Idea => "idea.md",
            BuiltinFileType::Inbox => "inbox.md",
            BuiltinFileType::Tool => "tool.md",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "NOTE" => Some(BuiltinFileType::Note),
            "TODO" => Some(BuiltinFileType::Todo),
            "ISSUE" => Some(BuiltinFileType::Issue),
            "IDEA" => Some(BuiltinFileType::Idea),
            "INBOX" => Some(BuiltinFileType::Inbox),
            "TOOL" => Some(BuiltinFileType::Tool),
            _ => None,
        }
    }
}

pub const ISSUE_ARCHIVE_FILENAME: &str = "issue_archived.md";

// ---------------------------------------------------------------------------
// RepoSizeSample
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RepoSizeSample {
    pub size_mb: f64,
    pub percentage: f64,
    pub sampled_at: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl RepoSizeSample {
    /// Serve the cached repo size while still within its TTL.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.sampled_at + chrono::Duration::seconds(self.ttl_secs)
    }
}

// ---------------------------------------------------------------------------
// IssueIndexRow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn emoji(&self) -> char {
        match self {
            IssueState::Open => '🟢',
            IssueState::Closed => '🔴',
        }
    }

    pub fn from_emoji(c: char) -> Option<Self> {
        match c {
            '🟢' => Some(IssueState::Open),
            '🔴' => Some(IssueState::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueIndexRow {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub state: IssueState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premium_state_expiry_invariant() {
        let mut p = PremiumState::free(1);
        p.tier_level = Tier::Coffee.level();
        p.expiry_epoch = NEVER_EXPIRES;
        assert!(p.is_active(1_000_000));

        p.expiry_epoch = 100;
        assert!(!p.is_active(200));
        assert!(p.is_active(50));
    }

    #[test]
    fn custom_path_validation() {
        assert!(validate_custom_path("notes/today.md").is_ok());
        assert_eq!(validate_custom_path("/abs.md"), Err(ValidationError::BadCustomPath));
        assert_eq!(validate_custom_path("a.txt"), Err(ValidationError::BadCustomPath));
        assert_eq!(validate_custom_path("../escape.md"), Err(ValidationError::BadCustomPath));
        assert_eq!(validate_custom_path("a/../b.md"), Err(ValidationError::BadCustomPath));
    }

    #[test]
    fn user_add_custom_file_respects_limit() {
        let mut u = User::new(1, "alice", vec![]);
        assert!(u.add_custom_file("a.md", 2).is_ok());
        assert!(u.add_custom_file("b.md", 2).is_ok());
        assert_eq!(u.add_custom_file("c.md", 2), Err(ValidationError::CustomFileLimitReached(2)));
    }

    #[test]
    fn pending_text_payload_roundtrip() {
        let p = PendingPayload::Text {
            body: "Buy milk".into(),
            original_message_id: 7,
        };
        let encoded = p.encode();
        assert_eq!(encoded, "Buy milk|||DELIM|||7");
        assert_eq!(PendingPayload::decode_text(&encoded), Some(p));
    }

    #[test]
    fn pending_text_payload_preserves_delimiter_in_body() {
        // A body that happens to contain the delimiter token must still
        // round-trip because decode splits from the right, once.
        let p = PendingPayload::Text {
            body: "weird |||DELIM||| looking note".into(),
            original_message_id: 99,
        };
        let encoded = p.encode();
        assert_eq!(PendingPayload::decode_text(&encoded), Some(p));
    }

    #[test]
    fn pending_photo_payload_roundtrip() {
        let p = PendingPayload::Photo {
            caption: "lunch".into(),
            original_message_id: 12,
            photo_cdn_url: "https://cdn.example/img.png".into(),
            base64_image: "QUJD".into(),
        };
        let encoded = p.encode();
        assert_eq!(PendingPayload::decode_photo(&encoded), Some(p));
    }

    #[test]
    fn builtin_file_type_filenames() {
        assert_eq!(BuiltinFileType::Note.filename(), "note.md");
        assert_eq!(BuiltinFileType::from_tag("ISSUE"), Some(BuiltinFileType::Issue));
        assert_eq!(BuiltinFileType::from_tag("BOGUS"), None);
    }

    #[test]
    fn repo_size_sample_freshness() {
        let now = Utc::now();
        let sample = RepoSizeSample {
            size_mb: 10.0,
            percentage: 10.0,
            sampled_at: now - chrono::Duration::seconds(10),
            ttl_secs: 1800,
        };
        assert!(sample.is_fresh(now));
        let stale = RepoSizeSample {
            sampled_at: now - chrono::Duration::seconds(2000),
            ..sample
        };
        assert!(!stale.is_fresh(now));
    }
}
