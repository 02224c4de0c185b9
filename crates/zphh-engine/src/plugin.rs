//! The chat-bot facing plugin: routes each inbound message to one action and
//! owns all shared state (session, pending slot, credentials, workers).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use zphh_contracts::chat::{parse_intent, CommandKind, CommandTable, Intent};
use zphh_contracts::config::PluginConfig;
use zphh_contracts::events::{EventPayload, EventWriter, JournalEvent};
use zphh_contracts::message::{
    HandleOutcome, MessageContext, Reply, ReplyChannel, ReplyTarget,
};
use zphh_contracts::video::{
    parse_video_parameters, AspectRatio, CameraMotion, VideoMood, VideoParameters, VideoStyle,
};

use crate::acquire::{AcquiredImage, ImageAcquirer};
use crate::client::ChatGlmClient;
use crate::credentials::{CredentialManager, TokenRefresher};
use crate::draw::run_draw;
use crate::gateway::Gateway;
use crate::pending::{PendingImageRequest, PendingImageSlot};
use crate::replies;
use crate::session::Session;
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::upload::upload_image;
use crate::video::{submit_video, PollSettings, VideoJobError, VideoJobPoller, VideoMode};
use crate::{error_chain_text, record_event, truncate_text};

pub const PLUGIN_NAME: &str = "ZPHH";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum VideoJob {
    Text(VideoParameters),
    Image { prompt: String, image: AcquiredImage },
}

struct FinishedVideo {
    task_id: String,
    url: String,
}

/// State shared between the dispatch thread and video workers.
struct PluginCore {
    config: PluginConfig,
    table: CommandTable,
    client: ChatGlmClient,
    acquirer: ImageAcquirer,
    session: Mutex<Session>,
    pending: Mutex<PendingImageSlot>,
    poll: PollSettings,
    journal: EventWriter,
}

impl PluginCore {
    fn journal_event(&self, event: JournalEvent, payload: EventPayload) {
        record_event(&self.journal, event, payload);
    }

    fn run_video_job(&self, job: VideoJob) -> Result<FinishedVideo, VideoJobError> {
        let mode = match job {
            VideoJob::Text(params) => VideoMode::TextToVideo(params),
            VideoJob::Image { prompt, image } => {
                let source = upload_image(&self.client, &image)?;
                VideoMode::ImageToVideo {
                    prompt,
                    source_id: source.source_id,
                }
            }
        };
        let task_id = submit_video(&self.client, &mode)?;

        let mut payload = EventPayload::new();
        payload.insert("task_id".to_string(), Value::String(task_id.clone()));
        payload.insert("mode".to_string(), Value::String(mode.label().to_string()));
        payload.insert(
            "prompt".to_string(),
            Value::String(truncate_text(mode.prompt(), 200)),
        );
        self.journal_event(JournalEvent::VideoJobSubmitted, payload);

        let url = VideoJobPoller::new(&self.client, self.poll)
            .with_cleanup_dir(self.acquirer.work_dir())
            .poll(&task_id)
            .into_result(&task_id)?;
        Ok(FinishedVideo { task_id, url })
    }

    fn finish_video_job(&self, job: VideoJob, target: &ReplyTarget, channel: &dyn ReplyChannel) {
        match self.run_video_job(job) {
            Ok(FinishedVideo { task_id, url }) => {
                let mut payload = EventPayload::new();
                payload.insert("task_id".to_string(), Value::String(task_id));
                payload.insert("video_url".to_string(), Value::String(url.clone()));
                self.journal_event(JournalEvent::VideoJobFinished, payload);
                channel.send(Reply::video_url(url), target);
            }
            Err(err) => {
                let reason = error_chain_text(&err, 320);
                error!(target = %target, "video job failed: {reason}");
                let mut payload = EventPayload::new();
                payload.insert("error".to_string(), Value::String(reason));
                self.journal_event(JournalEvent::VideoJobFailed, payload);
                channel.send(Reply::error(err.user_message()), target);
            }
        }
    }
}

pub struct ZphhPlugin {
    core: Arc<PluginCore>,
    credentials: Arc<CredentialManager>,
    refresher: Mutex<Option<TokenRefresher>>,
    jobs: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ZphhPlugin {
    /// Builds the plugin without touching the network. Call
    /// [`ZphhPlugin::start_background`] to refresh credentials and keep them
    /// fresh.
    pub fn new(config: PluginConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let journal = EventWriter::from_optional_path(config.journal_path.as_deref(), PLUGIN_NAME);
        let credentials = Arc::new(CredentialManager::new(
            Arc::clone(&transport),
            &config,
            journal.clone(),
        ));
        let gateway = Gateway::new(Arc::clone(&transport), Arc::clone(&credentials), &config);
        let core = PluginCore {
            table: CommandTable::new(&config.commands),
            client: ChatGlmClient::new(gateway, &config),
            acquirer: ImageAcquirer::new(transport, &config),
            session: Mutex::new(Session::default()),
            pending: Mutex::new(PendingImageSlot::new()),
            poll: PollSettings::from_config(&config),
            journal,
            config,
        };
        Self {
            core: Arc::new(core),
            credentials,
            refresher: Mutex::new(None),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Production wiring: real HTTP, startup refresh, background refresher.
    pub fn connect(config: PluginConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        let plugin = Self::new(config, Arc::new(transport));
        plugin.start_background()?;
        Ok(plugin)
    }

    pub fn start_background(&self) -> Result<()> {
        if !self.credentials.refresh() {
            warn!("startup token refresh failed; continuing with the configured access token");
        }
        let mut slot = lock(&self.refresher);
        if slot.is_some() {
            return Ok(());
        }
        let refresher = TokenRefresher::spawn(
            Arc::clone(&self.credentials),
            self.core.config.token_refresh_interval(),
        )
        .context("failed starting token refresher")?;
        *slot = Some(refresher);
        Ok(())
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn conversation_id(&self) -> String {
        lock(&self.core.session).conversation_id().to_string()
    }

    pub fn pending_request(&self) -> Option<PendingImageRequest> {
        lock(&self.core.pending).peek().cloned()
    }

    pub fn help_text(&self) -> String {
        let table = &self.core.table;
        let join = |labels: Vec<&str>| labels.join("/");
        let ratios: Vec<String> = AspectRatio::KNOWN
            .iter()
            .map(|(width, height)| AspectRatio::new(*width, *height).to_string())
            .collect();
        let wait_minutes = (self.core.config.pending_ttl_secs / 60).max(1);

        let mut text = String::from("AI绘画插件\n使用方法:\n");
        text.push_str(&format!(
            "{} [提示词]: 生成图片\n",
            table.trigger(CommandKind::Draw)
        ));
        text.push_str(&format!(
            "{} [描述]-[风格]-[氛围]-[运镜]-[比例]: 文字生成视频\n",
            table.trigger(CommandKind::Video)
        ));
        text.push_str(&format!(
            "{} [描述]: 图片生成视频,随后{}分钟内发送一张图片\n",
            table.trigger(CommandKind::VideoRef),
            wait_minutes
        ));
        text.push_str(&format!(
            "{}: 重置绘画会话\n",
            table.trigger(CommandKind::Reset)
        ));
        text.push_str(&format!("{}: 显示帮助\n", table.trigger(CommandKind::Help)));
        text.push_str(&format!(
            "风格: {}\n",
            join(VideoStyle::ALL.iter().map(|style| style.label()).collect())
        ));
        text.push_str(&format!(
            "氛围: {}\n",
            join(VideoMood::ALL.iter().map(|mood| mood.label()).collect())
        ));
        text.push_str(&format!(
            "运镜: {}\n",
            join(CameraMotion::ALL.iter().map(|camera| camera.label()).collect())
        ));
        text.push_str(&format!("比例: {}", ratios.join("/")));
        text
    }

    pub fn handle(
        &self,
        context: &mut MessageContext,
        channel: Arc<dyn ReplyChannel>,
    ) -> HandleOutcome {
        self.handle_at(context, channel, Instant::now())
    }

    /// Same as [`ZphhPlugin::handle`] with an explicit clock, so wait-slot
    /// expiry can be driven by the caller.
    pub fn handle_at(
        &self,
        context: &mut MessageContext,
        channel: Arc<dyn ReplyChannel>,
        now: Instant,
    ) -> HandleOutcome {
        let ttl = self.core.config.pending_ttl();
        let pending_fresh = lock(&self.core.pending).expire(now, ttl);
        let intent = parse_intent(&self.core.table, context.kind, &context.content, pending_fresh);
        if intent != Intent::PassThrough {
            debug!(action = intent.action(), target = %context.target, "dispatching message");
        }

        match intent {
            Intent::PassThrough => HandleOutcome::pass(),
            Intent::Reset => {
                lock(&self.core.session).reset();
                info!(target = %context.target, "draw session reset");
                HandleOutcome::reply(Reply::info(replies::SESSION_RESET))
            }
            Intent::Help => HandleOutcome::reply(Reply::info(self.help_text())),
            Intent::Draw { prompt } => {
                if prompt.is_empty() {
                    return HandleOutcome::reply(Reply::error(replies::DRAW_PROMPT_MISSING));
                }
                self.draw(&prompt, &context.target, channel.as_ref())
            }
            Intent::TextToVideo { prompt } => {
                if prompt.is_empty() {
                    return HandleOutcome::reply(Reply::error(replies::VIDEO_PROMPT_MISSING));
                }
                let mut warnings = Vec::new();
                let params = parse_video_parameters(&prompt, &mut warnings);
                if params.prompt.is_empty() {
                    return HandleOutcome::reply(Reply::error(replies::VIDEO_PROMPT_MISSING));
                }
                self.dispatch_video(VideoJob::Text(params), context.target.clone(), channel)
            }
            Intent::ImageToVideo { prompt } => {
                if prompt.is_empty() {
                    return HandleOutcome::reply(Reply::error(replies::VIDEO_PROMPT_MISSING));
                }
                let request = PendingImageRequest::new(prompt, context.target.clone(), now);
                if lock(&self.core.pending).put(request).is_some() {
                    info!(target = %context.target, "replaced earlier pending image request");
                }
                HandleOutcome::reply(Reply::info(replies::waiting_for_image(
                    self.core.config.pending_ttl_secs,
                )))
            }
            Intent::ConsumePendingImage => {
                let Some(request) = lock(&self.core.pending).take_fresh(now, ttl) else {
                    return HandleOutcome::pass();
                };
                let image = match self.core.acquirer.acquire(context) {
                    Ok(image) => image,
                    Err(err) => {
                        error!(target = %context.target, "image acquisition failed: {err}");
                        let mut payload = EventPayload::new();
                        payload.insert("error".to_string(), Value::String(err.to_string()));
                        self.core.journal_event(JournalEvent::VideoJobFailed, payload);
                        return HandleOutcome::reply(Reply::error(
                            VideoJobError::from(err).user_message(),
                        ));
                    }
                };
                let job = VideoJob::Image {
                    prompt: request.prompt,
                    image,
                };
                self.dispatch_video(job, request.reply_target, channel)
            }
        }
    }

    fn draw(&self, prompt: &str, target: &ReplyTarget, channel: &dyn ReplyChannel) -> HandleOutcome {
        channel.send(Reply::info(replies::DRAW_IN_PROGRESS), target);
        let outcome = match run_draw(&self.core.client, &self.core.session, prompt) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(target = %target, "draw request failed: {}", error_chain_text(&err, 320));
                return HandleOutcome::reply(Reply::error(replies::DRAW_REQUEST_FAILED));
            }
        };

        let mut payload = EventPayload::new();
        payload.insert("has_image".to_string(), Value::Bool(outcome.image_url.is_some()));
        payload.insert("has_text".to_string(), Value::Bool(outcome.text.is_some()));
        payload.insert(
            "conversation_id".to_string(),
            Value::String(self.conversation_id()),
        );
        self.core.journal_event(JournalEvent::DrawFinished, payload);

        if let Some(url) = outcome.image_url.as_ref() {
            channel.send(Reply::image_url(url.clone()), target);
        }
        match (outcome.text, outcome.image_url) {
            (Some(text), _) => HandleOutcome::reply(Reply::text(text)),
            (None, Some(_)) => HandleOutcome::consumed(),
            (None, None) => HandleOutcome::reply(Reply::error(replies::DRAW_EMPTY_RESULT)),
        }
    }

    fn dispatch_video(
        &self,
        job: VideoJob,
        target: ReplyTarget,
        channel: Arc<dyn ReplyChannel>,
    ) -> HandleOutcome {
        let core = Arc::clone(&self.core);
        let spawned = thread::Builder::new()
            .name("zphh-video-job".to_string())
            .spawn(move || core.finish_video_job(job, &target, channel.as_ref()));
        match spawned {
            Ok(handle) => {
                let mut jobs = lock(&self.jobs);
                jobs.retain(|job| !job.is_finished());
                jobs.push(handle);
                HandleOutcome::reply(Reply::info(replies::VIDEO_IN_PROGRESS))
            }
            Err(err) => {
                error!("failed spawning video worker: {err}");
                HandleOutcome::reply(Reply::error(replies::WORKER_START_FAILED))
            }
        }
    }

    pub fn active_jobs(&self) -> usize {
        lock(&self.jobs)
            .iter()
            .filter(|job| !job.is_finished())
            .count()
    }

    /// Blocks until every video worker started so far has replied.
    pub fn wait_for_jobs(&self) -> usize {
        let handles = std::mem::take(&mut *lock(&self.jobs));
        let count = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                warn!("video worker panicked");
            }
        }
        count
    }

    pub fn shutdown(&self) {
        if let Some(mut refresher) = lock(&self.refresher).take() {
            refresher.stop();
        }
        let joined = self.wait_for_jobs();
        info!(joined, "plugin shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use serde_json::{json, Value};
    use zphh_contracts::config::{CommandTriggers, PluginConfig};
    use zphh_contracts::message::{
        EventAction, HandleOutcome, MessageContext, Reply, ReplyKind, ReplyTarget,
    };

    use super::ZphhPlugin;
    use crate::client::{DRAW_STREAM_PATH, UPLOAD_PATH, VIDEO_SUBMIT_PATH};
    use crate::credentials::REFRESH_PATH;
    use crate::replies;
    use crate::testing::{
        fast_config, png_bytes, RecordingChannel, Scripted, ScriptedTransport,
    };
    use crate::transport::{Method, RequestBody};

    const STATUS: &str = "/video-api/v1/chat/status/task-1";

    fn config_in(dir: &Path) -> PluginConfig {
        PluginConfig {
            work_dir: Some(dir.join("work")),
            journal_path: Some(dir.join("events.jsonl")),
            ..fast_config()
        }
    }

    fn text(content: &str) -> MessageContext {
        MessageContext::text(content, ReplyTarget::new("room-1"))
    }

    fn journal_types(dir: &Path) -> anyhow::Result<Vec<String>> {
        let path = dir.join("events.jsonl");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut types = Vec::new();
        for line in fs::read_to_string(path)?.lines() {
            let event: Value = serde_json::from_str(line)?;
            types.push(event["type"].as_str().unwrap_or_default().to_string());
        }
        Ok(types)
    }

    fn script_video_success(transport: &ScriptedTransport) {
        transport.on(
            Method::Post,
            VIDEO_SUBMIT_PATH,
            vec![Scripted::ok(json!({"status": 0, "result": {"chat_id": "task-1"}}))],
        );
        transport.on(
            Method::Get,
            STATUS,
            vec![
                Scripted::ok(json!({"status": 0, "result": {"status": "processing"}})),
                Scripted::ok(json!({
                    "status": 0,
                    "result": {"status": "finished", "video_url": "https://cdn/v.mp4"}
                })),
            ],
        );
    }

    fn submitted_prompts(transport: &ScriptedTransport) -> Vec<String> {
        transport
            .requests()
            .into_iter()
            .filter(|request| request.url.ends_with(VIDEO_SUBMIT_PATH))
            .filter_map(|request| match request.body {
                RequestBody::Json(body) => body["prompt"].as_str().map(str::to_string),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn only_exact_reset_clears_the_conversation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Post,
            DRAW_STREAM_PATH,
            vec![Scripted::raw(
                200,
                "data: {\"conversation_id\": \"conv-1\", \"parts\": [{\"content\": [{\"type\": \"text\", \"text\": \"hi\"}]}]}\n",
            )],
        );
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport);
        let channel = RecordingChannel::new();
        plugin.handle(&mut text("绘 猫"), channel.clone());
        assert_eq!(plugin.conversation_id(), "conv-1");

        let near_miss = plugin.handle(&mut text("z重置会话吧"), channel.clone());
        assert_eq!(near_miss, HandleOutcome::pass());
        assert_eq!(plugin.conversation_id(), "conv-1");

        let reset = plugin.handle(&mut text("z重置会话"), channel.clone());
        assert_eq!(reset, HandleOutcome::reply(Reply::info(replies::SESSION_RESET)));
        assert_eq!(plugin.conversation_id(), "");
        Ok(())
    }

    #[test]
    fn unrelated_text_and_images_pass_through() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport.clone());
        let channel = RecordingChannel::new();

        let outcome = plugin.handle(&mut text("hello there"), channel.clone());
        assert_eq!(outcome.action, EventAction::Continue);
        assert!(outcome.reply.is_none());
        let image = plugin.handle(
            &mut MessageContext::image("/tmp/x.png", ReplyTarget::new("room-1")),
            channel.clone(),
        );
        assert_eq!(image, HandleOutcome::pass());
        assert!(channel.replies().is_empty());
        assert!(transport.requests().is_empty());
        Ok(())
    }

    #[test]
    fn help_lists_configured_triggers() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = PluginConfig {
            commands: CommandTriggers {
                draw: "画".to_string(),
                ..CommandTriggers::default()
            },
            ..config_in(temp.path())
        };
        let plugin = ZphhPlugin::new(config, ScriptedTransport::new());
        let outcome = plugin.handle(&mut text("z帮助"), RecordingChannel::new());
        let reply = outcome.reply.unwrap_or_else(|| Reply::error("missing"));
        assert_eq!(reply.kind, ReplyKind::Info);
        assert!(reply.content.contains("画 [提示词]"));
        assert!(reply.content.contains("z视频"));
        assert!(reply.content.contains("z图生视频"));
        assert!(reply.content.contains("卡通3D"));
        assert!(reply.content.contains("16:9"));
        Ok(())
    }

    #[test]
    fn empty_prompts_are_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport.clone());
        let channel = RecordingChannel::new();

        assert_eq!(
            plugin.handle(&mut text("绘   "), channel.clone()),
            HandleOutcome::reply(Reply::error(replies::DRAW_PROMPT_MISSING))
        );
        assert_eq!(
            plugin.handle(&mut text("z视频"), channel.clone()),
            HandleOutcome::reply(Reply::error(replies::VIDEO_PROMPT_MISSING))
        );
        assert_eq!(
            plugin.handle(&mut text("z图生视频 "), channel.clone()),
            HandleOutcome::reply(Reply::error(replies::VIDEO_PROMPT_MISSING))
        );
        assert!(plugin.pending_request().is_none());
        assert!(transport.requests().is_empty());
        Ok(())
    }

    #[test]
    fn draw_sends_progress_then_image_and_returns_text() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Post,
            DRAW_STREAM_PATH,
            vec![Scripted::raw(
                200,
                "data: {\"parts\": [{\"content\": [{\"type\": \"image\", \"image\": [{\"image_url\": \"https://img/cat.png\"}]}, {\"type\": \"text\", \"text\": \"画好了\"}]}]}\n",
            )],
        );
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport);
        let channel = RecordingChannel::new();

        let outcome = plugin.handle(&mut text("绘 一只猫"), channel.clone());
        assert_eq!(outcome, HandleOutcome::reply(Reply::text("画好了")));
        assert_eq!(
            channel.replies(),
            vec![
                Reply::info(replies::DRAW_IN_PROGRESS),
                Reply::image_url("https://img/cat.png"),
            ]
        );
        assert_eq!(journal_types(temp.path())?, vec!["draw_finished"]);
        Ok(())
    }

    #[test]
    fn draw_image_only_is_consumed_after_channel_delivery() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Post,
            DRAW_STREAM_PATH,
            vec![Scripted::raw(
                200,
                "data: {\"parts\": [{\"content\": [{\"type\": \"image\", \"image\": [{\"image_url\": \"https://img/a.png\"}]}]}]}\n",
            )],
        );
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport);
        let channel = RecordingChannel::new();
        let outcome = plugin.handle(&mut text("绘 风景"), channel.clone());
        assert_eq!(outcome, HandleOutcome::consumed());
        assert_eq!(channel.replies().len(), 2);
        Ok(())
    }

    #[test]
    fn draw_failures_map_to_error_replies() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Post,
            DRAW_STREAM_PATH,
            vec![Scripted::raw(200, "event: done\n"), Scripted::Fail],
        );
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport);
        let channel = RecordingChannel::new();

        assert_eq!(
            plugin.handle(&mut text("绘 a"), channel.clone()),
            HandleOutcome::reply(Reply::error(replies::DRAW_EMPTY_RESULT))
        );
        assert_eq!(
            plugin.handle(&mut text("绘 b"), channel.clone()),
            HandleOutcome::reply(Reply::error(replies::DRAW_REQUEST_FAILED))
        );
        Ok(())
    }

    #[test]
    fn text_to_video_acknowledges_then_delivers_url() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        script_video_success(&transport);
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport.clone());
        let channel = RecordingChannel::new();

        let outcome = plugin.handle(&mut text("z视频 a cat-卡通3D-温馨和谐-水平-16:9"), channel.clone());
        assert_eq!(outcome, HandleOutcome::reply(Reply::info(replies::VIDEO_IN_PROGRESS)));
        assert_eq!(plugin.wait_for_jobs(), 1);

        assert_eq!(channel.replies(), vec![Reply::video_url("https://cdn/v.mp4")]);
        assert_eq!(channel.targets(), vec![ReplyTarget::new("room-1")]);
        assert_eq!(submitted_prompts(&transport), vec!["a cat"]);
        assert_eq!(
            journal_types(temp.path())?,
            vec!["video_job_submitted", "video_job_finished"]
        );
        Ok(())
    }

    #[test]
    fn video_trigger_wins_over_draw_prefix() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        script_video_success(&transport);
        let config = PluginConfig {
            commands: CommandTriggers {
                draw: "z".to_string(),
                ..CommandTriggers::default()
            },
            ..config_in(temp.path())
        };
        let plugin = ZphhPlugin::new(config, transport.clone());
        let outcome = plugin.handle(&mut text("z视频 海浪"), RecordingChannel::new());
        assert_eq!(outcome, HandleOutcome::reply(Reply::info(replies::VIDEO_IN_PROGRESS)));
        plugin.wait_for_jobs();
        assert_eq!(transport.count(DRAW_STREAM_PATH), 0);
        Ok(())
    }

    #[test]
    fn rejected_submission_reports_submit_failure() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Post,
            VIDEO_SUBMIT_PATH,
            vec![Scripted::ok(json!({"status": 1, "message": "busy"}))],
        );
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport);
        let channel = RecordingChannel::new();
        plugin.handle(&mut text("z视频 海浪"), channel.clone());
        plugin.wait_for_jobs();
        assert_eq!(channel.replies(), vec![Reply::error(replies::VIDEO_SUBMIT_FAILED)]);
        assert_eq!(journal_types(temp.path())?, vec!["video_job_failed"]);
        Ok(())
    }

    #[test]
    fn failed_job_reports_result_failure() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Post,
            VIDEO_SUBMIT_PATH,
            vec![Scripted::ok(json!({"status": 0, "result": {"chat_id": "task-1"}}))],
        );
        transport.on(
            Method::Get,
            STATUS,
            vec![Scripted::ok(json!({"status": 0, "result": {"status": "failed", "msg": "x"}}))],
        );
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport);
        let channel = RecordingChannel::new();
        plugin.handle(&mut text("z视频 海浪"), channel.clone());
        plugin.wait_for_jobs();
        assert_eq!(channel.replies(), vec![Reply::error(replies::VIDEO_RESULT_FAILED)]);
        Ok(())
    }

    fn write_png(dir: &Path) -> anyhow::Result<String> {
        let path = dir.join("photo.png");
        fs::write(&path, png_bytes(8, 4))?;
        Ok(path.display().to_string())
    }

    #[test]
    fn image_to_video_round_trip_replies_to_requesting_conversation() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Post,
            UPLOAD_PATH,
            vec![Scripted::ok(json!({"status": 0, "result": {"source_id": "src-1"}}))],
        );
        script_video_success(&transport);
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport.clone());
        let channel = RecordingChannel::new();

        let waiting = plugin.handle(&mut text("z图生视频 让海浪动起来"), channel.clone());
        assert_eq!(
            waiting,
            HandleOutcome::reply(Reply::info(replies::waiting_for_image(300)))
        );
        assert!(plugin.pending_request().is_some());

        let mut image =
            MessageContext::image(write_png(temp.path())?, ReplyTarget::new("room-2"));
        let outcome = plugin.handle(&mut image, channel.clone());
        assert_eq!(outcome, HandleOutcome::reply(Reply::info(replies::VIDEO_IN_PROGRESS)));
        assert!(plugin.pending_request().is_none());
        plugin.wait_for_jobs();

        assert_eq!(channel.replies(), vec![Reply::video_url("https://cdn/v.mp4")]);
        assert_eq!(channel.targets(), vec![ReplyTarget::new("room-1")]);
        assert_eq!(submitted_prompts(&transport), vec!["让海浪动起来"]);
        let submit_body = transport
            .requests()
            .into_iter()
            .find(|request| request.url.ends_with(VIDEO_SUBMIT_PATH))
            .map(|request| request.body);
        match submit_body {
            Some(RequestBody::Json(body)) => assert_eq!(body["source_list"], json!(["src-1"])),
            other => panic!("unexpected submit body: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn stale_pending_request_is_discarded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport.clone());
        let channel = RecordingChannel::new();
        let start = Instant::now();

        plugin.handle_at(&mut text("z图生视频 海浪"), channel.clone(), start);
        let mut image =
            MessageContext::image(write_png(temp.path())?, ReplyTarget::new("room-1"));
        let outcome = plugin.handle_at(&mut image, channel.clone(), start + Duration::from_secs(301));

        assert_eq!(outcome, HandleOutcome::pass());
        assert!(plugin.pending_request().is_none());
        assert!(transport.requests().is_empty());
        Ok(())
    }

    #[test]
    fn pending_request_at_ttl_is_consumed() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Post,
            UPLOAD_PATH,
            vec![Scripted::ok(json!({"status": 0, "result": {"source_id": "src-1"}}))],
        );
        script_video_success(&transport);
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport);
        let start = Instant::now();

        plugin.handle_at(&mut text("z图生视频 海浪"), RecordingChannel::new(), start);
        let mut image =
            MessageContext::image(write_png(temp.path())?, ReplyTarget::new("room-1"));
        let outcome = plugin.handle_at(
            &mut image,
            RecordingChannel::new(),
            start + Duration::from_secs(300),
        );
        assert_eq!(outcome, HandleOutcome::reply(Reply::info(replies::VIDEO_IN_PROGRESS)));
        plugin.wait_for_jobs();
        Ok(())
    }

    #[test]
    fn second_initiation_wins() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Post,
            UPLOAD_PATH,
            vec![Scripted::ok(json!({"status": 0, "result": {"source_id": "src-1"}}))],
        );
        script_video_success(&transport);
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport.clone());
        let channel = RecordingChannel::new();

        plugin.handle(&mut text("z图生视频 第一个"), channel.clone());
        plugin.handle(&mut text("z图生视频 第二个"), channel.clone());
        let mut image =
            MessageContext::image(write_png(temp.path())?, ReplyTarget::new("room-1"));
        plugin.handle(&mut image, channel.clone());
        plugin.wait_for_jobs();

        assert_eq!(submitted_prompts(&transport), vec!["第二个"]);
        Ok(())
    }

    #[test]
    fn unreadable_image_clears_slot_with_retry_prompt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let plugin = ZphhPlugin::new(config_in(temp.path()), ScriptedTransport::new());
        let channel = RecordingChannel::new();

        plugin.handle(&mut text("z图生视频 海浪"), channel.clone());
        let missing = temp.path().join("missing.png").display().to_string();
        let outcome = plugin.handle(
            &mut MessageContext::image(missing, ReplyTarget::new("room-1")),
            channel.clone(),
        );
        assert_eq!(
            outcome,
            HandleOutcome::reply(Reply::error(replies::IMAGE_ACQUIRE_FAILED))
        );
        assert!(plugin.pending_request().is_none());
        Ok(())
    }

    #[test]
    fn upload_failure_reports_upload_stage() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Post,
            UPLOAD_PATH,
            vec![Scripted::ok(json!({"status": 2, "message": "too large"}))],
        );
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport.clone());
        let channel = RecordingChannel::new();

        plugin.handle(&mut text("z图生视频 海浪"), channel.clone());
        let mut image =
            MessageContext::image(write_png(temp.path())?, ReplyTarget::new("room-1"));
        plugin.handle(&mut image, channel.clone());
        plugin.wait_for_jobs();

        assert_eq!(channel.replies(), vec![Reply::error(replies::IMAGE_UPLOAD_FAILED)]);
        assert_eq!(transport.count(VIDEO_SUBMIT_PATH), 0);
        Ok(())
    }

    #[test]
    fn background_refresh_starts_and_shutdown_stops_it() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let transport = ScriptedTransport::new();
        transport.on(
            Method::Post,
            REFRESH_PATH,
            vec![Scripted::ok(json!({"status": 0, "result": {"access_token": "at-2"}}))],
        );
        let plugin = ZphhPlugin::new(config_in(temp.path()), transport.clone());
        plugin.start_background()?;
        assert_eq!(plugin.credentials().access_token(), "at-2");
        assert_eq!(transport.count(REFRESH_PATH), 1);

        plugin.shutdown();
        assert_eq!(plugin.active_jobs(), 0);
        assert_eq!(journal_types(temp.path())?, vec!["token_refreshed"]);
        Ok(())
    }

    #[test]
    fn failed_startup_refresh_is_not_fatal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = PluginConfig {
            refresh_token: None,
            ..config_in(temp.path())
        };
        let plugin = ZphhPlugin::new(config, ScriptedTransport::new());
        plugin.start_background()?;
        assert_eq!(plugin.credentials().access_token(), "at-1");
        plugin.shutdown();
        Ok(())
    }
}
