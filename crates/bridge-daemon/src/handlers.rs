//! Real command/callback business logic, wired onto the ingress pool's two
//! handler slots.
//!
//! `WorkItem::payload` carries no chat/message identity of its own (the
//! chat-platform adapter that would split those out is out of scope here),
//! so this layer defines its own wire shape: every payload is
//! `"{chat_id}\u{1}{message_id}\u{1}{body}"`. `user_key`/`dedup_key` stay the
//! ingress pool's concern and are set by whatever submits the `WorkItem`.

use std::sync::Arc;

use bridge_core::config::TierLimitsConfig;
use bridge_core::markdown::{
    format_issue_index_line, format_note_block, format_photo_block, format_todo_item, parse_issue_index,
    parse_todo_line, NoteBlock, TodoItem,
};
use bridge_core::model::{BuiltinFileType, IssueState, PendingPayload};
use bridge_core::{BridgeError, SqliteStore};
use bridge_dispatch::router::{dispatch_callback, dispatch_command, CallbackKind};
use bridge_dispatch::{PendingStore, WorkItem};
use bridge_quota::{check_issue_create_admission, check_write_admission, limits_for_tier};
use bridge_repo::{CommitMode, FileLockManager};
use bridge_webhook::ChatNotifier;

use crate::providers::ProviderCache;

pub const FIELD_SEP: char = '\u{1}';

pub fn encode_payload(chat_id: i64, message_id: i64, body: &str) -> String {
    format!("{chat_id}{FIELD_SEP}{message_id}{FIELD_SEP}{body}")
}

fn decode_payload(payload: &str) -> Option<(i64, i64, &str)> {
    let mut parts = payload.splitn(3, FIELD_SEP);
    let chat_id: i64 = parts.next()?.parse().ok()?;
    let message_id: i64 = parts.next()?.parse().ok()?;
    let body = parts.next()?;
    Some((chat_id, message_id, body))
}

pub struct HandlerContext {
    pub store: SqliteStore,
    pub locks: Arc<FileLockManager>,
    pub pending: Arc<PendingStore>,
    pub providers: Arc<ProviderCache>,
    pub notifier: Arc<dyn ChatNotifier>,
    pub tier_base: TierLimitsConfig,
}

impl HandlerContext {
    async fn reply(&self, chat_id: i64, text: impl Into<String>) {
        self.notifier.notify(chat_id, &text.into()).await;
    }

    async fn reply_result(&self, chat_id: i64, result: Result<String, BridgeError>) {
        match result {
            Ok(text) => self.reply(chat_id, text).await,
            Err(e) => self.reply(chat_id, format!("⚠️ {e}")).await,
        }
    }

    async fn tier_now(&self, chat_id: i64) -> Result<bridge_core::model::Tier, BridgeError> {
        let state = self.store.get_premium_user(chat_id).await.map_err(store_err)?;
        let now = chrono::Utc::now().timestamp();
        Ok(state.map(|s| s.tier(now)).unwrap_or(bridge_core::model::Tier::Free))
    }

    fn pending_key(&self, chat_id: i64) -> String {
        format!("chat:{chat_id}")
    }
}

fn store_err(e: bridge_core::StoreError) -> BridgeError {
    BridgeError::Transient(e.to_string())
}

/// Commands dispatch purely as a string-keyed table; rendering chat-specific
/// UI (keyboards, reply threading) is the chat-platform adapter's job, out
/// of scope here.
pub fn content_handler(ctx: Arc<HandlerContext>) -> bridge_dispatch::ingress::Handler {
    Arc::new(move |item: WorkItem| {
        let ctx = ctx.clone();
        Box::pin(async move { handle_content(&ctx, item).await })
    })
}

pub fn callback_handler(ctx: Arc<HandlerContext>) -> bridge_dispatch::ingress::Handler {
    Arc::new(move |item: WorkItem| {
        let ctx = ctx.clone();
        Box::pin(async move { handle_callback(&ctx, item).await })
    })
}

async fn handle_content(ctx: &HandlerContext, item: WorkItem) {
    let Some((chat_id, message_id, body)) = decode_payload(&item.payload) else {
        tracing::warn!(user = %item.user_key, "content payload missing chat/message framing");
        return;
    };

    if let Some(rest) = body.strip_prefix('/') {
        let mut tokens = rest.splitn(2, ' ');
        let name = tokens.next().unwrap_or("");
        let args = tokens.next().unwrap_or("").trim();
        let result = match dispatch_command(name) {
            Ok(known) => run_command(ctx, chat_id, message_id, known, args).await,
            Err(e) => Err(e),
        };
        ctx.reply_result(chat_id, result).await;
        return;
    }

    // Not a command: either the reply half of a pending two-step
    // interaction (e.g. `issue_comment_<N>`), or plain text destined for
    // `note.md`. LLM summarization is out of scope at this layer — text is
    // committed verbatim.
    if let Some(marker) = ctx.pending.take(&ctx.pending_key(chat_id)) {
        let result = resume_pending(ctx, chat_id, &marker, body).await;
        ctx.reply_result(chat_id, result).await;
        return;
    }

    let result = commit_note(ctx, chat_id, message_id, body).await;
    ctx.reply_result(chat_id, result).await;
}

async fn resume_pending(ctx: &HandlerContext, chat_id: i64, marker: &str, body: &str) -> Result<String, BridgeError> {
    if let Some(number) = marker.strip_prefix("issue_comment:") {
        let number: u64 = number.parse().map_err(|_| BridgeError::Validation("corrupt pending marker".into()))?;
        let provider = ctx.providers.get(chat_id).await?;
        provider.add_issue_comment(number, body).await?;
        ctx.store.increment_issue_comment_count(chat_id).await.map_err(store_err)?;
        return Ok(format!("💬 comment posted on #{number}"));
    }
    Err(BridgeError::Validation(format!("unrecognized pending marker: {marker}")))
}

async fn commit_note(ctx: &HandlerContext, chat_id: i64, message_id: i64, text: &str) -> Result<String, BridgeError> {
    let provider = ctx.providers.get(chat_id).await?;
    let size = provider.get_repo_size().await?;
    check_write_admission(size.percentage)?;

    let block = NoteBlock {
        msg_id: message_id,
        chat_id,
        timestamp: chrono::Utc::now().naive_utc(),
        title: "Note".to_string(),
        tags: Vec::new(),
        body: text.to_string(),
    };
    let formatted = format_note_block(&block);
    provider
        .commit_file(BuiltinFileType::Note.filename(), &formatted, CommitMode::Prepend, "add note")
        .await?;
    ctx.store.increment_commit_count(chat_id).await.map_err(store_err)?;
    Ok("📝 noted".to_string())
}

async fn run_command(
    ctx: &HandlerContext,
    chat_id: i64,
    message_id: i64,
    name: &str,
    args: &str,
) -> Result<String, BridgeError> {
    match name {
        "start" => cmd_start(ctx, chat_id).await,
        "help" => Ok(help_text()),
        "repo" => cmd_repo(ctx, chat_id, args).await,
        "llm" => cmd_llm(ctx, chat_id, args).await,
        "sync" => cmd_sync(ctx, chat_id).await,
        "insight" => cmd_insight(ctx, chat_id).await,
        "stats" => cmd_stats(ctx).await,
        "todo" => cmd_todo(ctx, chat_id, message_id, args).await,
        "issue" => cmd_issue(ctx, chat_id, args).await,
        "customfile" => cmd_customfile(ctx, chat_id, args).await,
        "coffee" => cmd_coffee(ctx, chat_id).await,
        "resetusage" => cmd_resetusage(ctx, chat_id, message_id).await,
        other => Err(BridgeError::UnknownCommand(other.to_string())),
    }
}

fn help_text() -> String {
    format!("commands: {}", bridge_dispatch::router::COMMANDS.join(", "))
}

async fn cmd_start(ctx: &HandlerContext, chat_id: i64) -> Result<String, BridgeError> {
    ctx.store
        .get_or_create_user(chat_id, &format!("chat-{chat_id}"), Vec::new())
        .await
        .map_err(store_err)?;
    Ok("👋 welcome — connect a repo with /repo <owner/repo>, then authenticate via GitHub OAuth.".to_string())
}

async fn cmd_repo(ctx: &HandlerContext, chat_id: i64, args: &str) -> Result<String, BridgeError> {
    if bridge_integrations::github::client::split_owner_repo(args).is_none() {
        return Err(BridgeError::Validation("expected /repo <owner/repo>".into()));
    }
    ctx.store.update_user_repo_url(chat_id, args).await.map_err(store_err)?;
    ctx.providers.invalidate(chat_id);
    Ok(format!("🔗 repository set to {args}"))
}

async fn cmd_llm(ctx: &HandlerContext, chat_id: i64, args: &str) -> Result<String, BridgeError> {
    if args.trim() == "platform" {
        ctx.store.update_user_llm_config(chat_id, None, None, None, None).await.map_err(store_err)?;
        return Ok("🤖 reverted to the platform default LLM".to_string());
    }
    let fields: Vec<&str> = args.split_whitespace().collect();
    let [provider, endpoint, auth_env, model] = fields[..] else {
        return Err(BridgeError::Validation("expected /llm <provider> <endpoint> <auth_env> <model>, or /llm platform".into()));
    };
    ctx.store
        .update_user_llm_config(chat_id, Some(provider), Some(endpoint), Some(auth_env), Some(model))
        .await
        .map_err(store_err)?;
    Ok(format!("🤖 using {provider}/{model} at {endpoint}"))
}

async fn cmd_sync(ctx: &HandlerContext, chat_id: i64) -> Result<String, BridgeError> {
    let user = ctx
        .store
        .get_user(chat_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| BridgeError::NotFound(format!("no user row for chat {chat_id}")))?;

    let _guard = ctx
        .locks
        .try_acquire_file_lock(chat_id, &user.remote_repo_url, "__sync_guard__")
        .map_err(|_| BridgeError::Validation("a sync is already in progress".into()))?;

    let provider = ctx.providers.get(chat_id).await?;
    let summary = bridge_repo::run_issue_sync(provider.as_ref(), &ctx.locks, chat_id, &user.remote_repo_url).await?;
    ctx.store.increment_sync_cmd_count(chat_id).await.map_err(store_err)?;
    Ok(format!("🔄 sync complete — archived {} closed issue(s)", summary.archived_count))
}

async fn cmd_insight(ctx: &HandlerContext, chat_id: i64) -> Result<String, BridgeError> {
    let insights = ctx.store.get_user_insights(chat_id).await.map_err(store_err)?;
    ctx.store.increment_insight_cmd_count(chat_id).await.map_err(store_err)?;
    Ok(format!(
        "📊 commits {} · issues opened {} · closed {} · comments {} · images {} · syncs {} · llm tokens {}",
        insights.commits,
        insights.issues_opened,
        insights.issues_closed,
        insights.issue_comments,
        insights.images,
        insights.sync_invocations,
        insights.lifetime_llm_tokens,
    ))
}

async fn cmd_stats(ctx: &HandlerContext) -> Result<String, BridgeError> {
    let stats = ctx.store.get_global_stats().await.map_err(store_err)?;
    Ok(format!(
        "🌐 {} users · {} commits · {} issues opened · {} images",
        stats.total_users, stats.total_commits, stats.total_issues_opened, stats.total_images
    ))
}

async fn cmd_todo(ctx: &HandlerContext, chat_id: i64, message_id: i64, args: &str) -> Result<String, BridgeError> {
    if args.is_empty() {
        return Err(BridgeError::Validation("expected /todo <text>".into()));
    }
    let provider = ctx.providers.get(chat_id).await?;
    let size = provider.get_repo_size().await?;
    check_write_admission(size.percentage)?;

    let item = TodoItem { msg_id: message_id, chat_id, text: args.to_string(), date: chrono::Utc::now().date_naive(), done: false };
    let line = format_todo_item(&item)?;
    provider.commit_file(BuiltinFileType::Todo.filename(), &format!("{line}\n"), CommitMode::Prepend, "add todo").await?;
    ctx.store.increment_commit_count(chat_id).await.map_err(store_err)?;
    Ok("☑️ todo added".to_string())
}

async fn cmd_issue(ctx: &HandlerContext, chat_id: i64, args: &str) -> Result<String, BridgeError> {
    let (title, body) = args.split_once('|').unwrap_or((args, ""));
    let title = title.trim();
    if title.is_empty() {
        return Err(BridgeError::Validation("expected /issue <title>[|body]".into()));
    }

    let provider = ctx.providers.get(chat_id).await?;
    let size = provider.get_repo_size().await?;
    let tier = ctx.tier_now(chat_id).await?;
    check_issue_create_admission(&ctx.store, chat_id, tier, &ctx.tier_base, size.percentage).await?;

    let row = provider.create_issue(title, body.trim()).await?;
    let line = format_issue_index_line(&row);
    provider.commit_file(BuiltinFileType::Issue.filename(), &format!("{line}\n"), CommitMode::Prepend, "open issue").await?;

    ctx.store.increment_usage_issue_count(chat_id).await.map_err(store_err)?;
    ctx.store.increment_issue_count(chat_id).await.map_err(store_err)?;
    Ok(format!("🆕 opened {}#{}", row.repo, row.number))
}

async fn cmd_customfile(ctx: &HandlerContext, chat_id: i64, args: &str) -> Result<String, BridgeError> {
    let path = args.trim();
    if path.is_empty() {
        return Err(BridgeError::Validation("expected /customfile <path.md>".into()));
    }
    let mut user = ctx
        .store
        .get_user(chat_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| BridgeError::NotFound(format!("no user row for chat {chat_id}")))?;
    let tier = ctx.tier_now(chat_id).await?;
    let limit = limits_for_tier(&ctx.tier_base, tier).custom_files;
    user.add_custom_file(path, limit)?;

    let provider = ctx.providers.get(chat_id).await?;
    provider.replace_file(path, "", &format!("create custom file {path}")).await?;
    ctx.store.update_user_custom_files(chat_id, user.custom_files).await.map_err(store_err)?;
    Ok(format!("📁 custom file {path} created"))
}

async fn cmd_coffee(ctx: &HandlerContext, chat_id: i64) -> Result<String, BridgeError> {
    let tier = ctx.tier_now(chat_id).await?;
    Ok(format!("☕ current tier: {tier:?}. Use the /coffee checkout link from the bot profile to upgrade."))
}

async fn cmd_resetusage(ctx: &HandlerContext, chat_id: i64, message_id: i64) -> Result<String, BridgeError> {
    bridge_quota::apply_topup_reset(&ctx.store, chat_id, "manual", 0, &format!("manual-reset-{chat_id}-{message_id}"))
        .await?;
    Ok("♻️ usage period reset".to_string())
}

async fn handle_callback(ctx: &HandlerContext, item: WorkItem) {
    let Some((chat_id, _message_id, body)) = decode_payload(&item.payload) else {
        tracing::warn!(user = %item.user_key, "callback payload missing chat/message framing");
        return;
    };

    let result = match dispatch_callback(body) {
        Ok((kind, rest)) => run_callback(ctx, chat_id, kind, rest).await,
        Err(e) => Err(e),
    };
    ctx.reply_result(chat_id, result).await;
}

async fn run_callback(ctx: &HandlerContext, chat_id: i64, kind: CallbackKind, rest: &str) -> Result<String, BridgeError> {
    match kind {
        CallbackKind::PinFile => cb_pin_file(ctx, chat_id, rest).await,
        CallbackKind::TodoDone => cb_todo_done(ctx, chat_id, rest).await,
        CallbackKind::IssueClose => cb_issue_close(ctx, chat_id, rest).await,
        CallbackKind::IssueComment => cb_issue_comment(ctx, chat_id, rest).await,
        CallbackKind::Coffee | CallbackKind::Subscription => cmd_coffee(ctx, chat_id).await,
        CallbackKind::File | CallbackKind::FilePinned | CallbackKind::FileCustom => cb_show_file(ctx, chat_id, rest).await,
        CallbackKind::PhotoPinned | CallbackKind::PhotoCustom | CallbackKind::Photo => cb_attach_pending_photo(ctx, chat_id, rest).await,
        CallbackKind::CustomFile | CallbackKind::AddCustom | CallbackKind::RemoveCustomFile | CallbackKind::BackToFiles => {
            cb_list_custom_files(ctx, chat_id).await
        }
        CallbackKind::IssueMore => cb_show_file(ctx, chat_id, BuiltinFileType::Issue.filename()).await,
        CallbackKind::TodoMore => cb_show_file(ctx, chat_id, BuiltinFileType::Todo.filename()).await,
    }
}

async fn cb_pin_file(ctx: &HandlerContext, chat_id: i64, path: &str) -> Result<String, BridgeError> {
    let mut user = ctx
        .store
        .get_user(chat_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| BridgeError::NotFound(format!("no user row for chat {chat_id}")))?;
    user.custom_files.retain(|p| p != path);
    user.custom_files.insert(0, path.to_string());
    ctx.store.update_user_custom_files(chat_id, user.custom_files).await.map_err(store_err)?;
    Ok(format!("📌 pinned {path}"))
}

async fn cb_todo_done(ctx: &HandlerContext, chat_id: i64, msg_id_str: &str) -> Result<String, BridgeError> {
    let target: i64 = msg_id_str.parse().map_err(|_| BridgeError::Validation("bad todo id".into()))?;
    let provider = ctx.providers.get(chat_id).await?;
    let contents = provider.read_file(BuiltinFileType::Todo.filename()).await?.unwrap_or_default();
    let mut found = false;
    let rebuilt: Vec<String> = contents
        .lines()
        .map(|line| match parse_todo_line(line) {
            Some(mut item) if item.msg_id == target && item.chat_id == chat_id => {
                item.done = true;
                found = true;
                format_todo_item(&item).unwrap_or_else(|_| line.to_string())
            }
            _ => line.to_string(),
        })
        .collect();
    if !found {
        return Err(BridgeError::NotFound(format!("todo {target} not found")));
    }
    let new_contents = format!("{}\n", rebuilt.join("\n"));
    provider.replace_file(BuiltinFileType::Todo.filename(), &new_contents, "todo: mark done").await?;
    Ok("✅ todo marked done".to_string())
}

async fn cb_issue_close(ctx: &HandlerContext, chat_id: i64, number_str: &str) -> Result<String, BridgeError> {
    let number: u64 = number_str.parse().map_err(|_| BridgeError::Validation("bad issue number".into()))?;
    let provider = ctx.providers.get(chat_id).await?;
    provider.close_issue(number).await?;

    let contents = provider.read_file(BuiltinFileType::Issue.filename()).await?.unwrap_or_default();
    let mut rows = parse_issue_index(&contents);
    for row in &mut rows {
        if row.number == number {
            row.state = IssueState::Closed;
        }
    }
    let new_contents = rows.iter().map(format_issue_index_line).collect::<Vec<_>>().join("\n");
    let new_contents = if new_contents.is_empty() { new_contents } else { format!("{new_contents}\n") };
    provider.replace_file(BuiltinFileType::Issue.filename(), &new_contents, &format!("close issue #{number}")).await?;

    ctx.store.increment_issue_close_count(chat_id).await.map_err(store_err)?;
    Ok(format!("🔴 closed #{number}"))
}

async fn cb_issue_comment(ctx: &HandlerContext, chat_id: i64, number_str: &str) -> Result<String, BridgeError> {
    let number: u64 = number_str.parse().map_err(|_| BridgeError::Validation("bad issue number".into()))?;
    ctx.pending.put(ctx.pending_key(chat_id), format!("issue_comment:{number}"));
    Ok(format!("💬 reply with your comment for #{number}"))
}

async fn cb_show_file(ctx: &HandlerContext, chat_id: i64, path: &str) -> Result<String, BridgeError> {
    let provider = ctx.providers.get(chat_id).await?;
    let contents = provider.read_file(path).await?.unwrap_or_else(|| "(empty)".to_string());
    const PREVIEW_CHARS: usize = 500;
    let preview: String = contents.chars().take(PREVIEW_CHARS).collect();
    Ok(format!("📄 {path}\n{preview}"))
}

async fn cb_list_custom_files(ctx: &HandlerContext, chat_id: i64) -> Result<String, BridgeError> {
    let user = ctx
        .store
        .get_user(chat_id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| BridgeError::NotFound(format!("no user row for chat {chat_id}")))?;
    if user.custom_files.is_empty() {
        return Ok("📁 no custom files yet — add one with /customfile <path.md>".to_string());
    }
    Ok(format!("📁 custom files: {}", user.custom_files.join(", ")))
}

/// A photo callback attaches whatever photo is pending for this chat (set by
/// the chat adapter before this dispatch layer ever sees the interaction —
/// ingesting raw photo bytes is its job, not this crate's) to the chosen
/// target file.
async fn cb_attach_pending_photo(ctx: &HandlerContext, chat_id: i64, target_hint: &str) -> Result<String, BridgeError> {
    let Some(encoded) = ctx.pending.take(&ctx.pending_key(chat_id)) else {
        return Err(BridgeError::NotFound("no pending photo for this chat".into()));
    };
    let Some(PendingPayload::Photo { caption, photo_cdn_url, .. }) = PendingPayload::decode_photo(&encoded) else {
        return Err(BridgeError::Validation("corrupt pending photo payload".into()));
    };
    let target = if target_hint.is_empty() { BuiltinFileType::Inbox.filename() } else { target_hint };
    let caption_ref = Some(caption.as_str()).filter(|c| !c.is_empty());
    let block = format_photo_block(&photo_cdn_url, caption_ref);
    let provider = ctx.providers.get(chat_id).await?;
    provider.commit_file(target, &format!("{block}\n"), CommitMode::Prepend, "attach photo").await?;
    ctx.store.increment_image_count(chat_id).await.map_err(store_err)?;
    Ok(format!("🖼️ photo attached to {target}"))
}
