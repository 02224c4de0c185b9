use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use zphh_contracts::chat::{CommandKind, CommandTable};
use zphh_contracts::config::PluginConfig;
use zphh_contracts::message::{
    HandleOutcome, MessageContext, Reply, ReplyChannel, ReplyKind, ReplyTarget,
};
use zphh_engine::ZphhPlugin;

#[derive(Debug, Parser)]
#[command(name = "zphh-rs", version, about = "ZPHH image and video generation plugin host")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: each stdin line is one chat message.
    Chat(ChatArgs),
    /// One draw request.
    Draw(DrawArgs),
    /// One video request, from text or from a reference image.
    Video(VideoArgs),
}

#[derive(Debug, Parser)]
struct HostArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    journal: Option<PathBuf>,
    #[arg(long)]
    work_dir: Option<PathBuf>,
    #[arg(long, default_value = "cli")]
    target: String,
    /// Print replies as JSON lines instead of plain text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    host: HostArgs,
}

#[derive(Debug, Parser)]
struct DrawArgs {
    #[command(flatten)]
    host: HostArgs,
    #[arg(long)]
    prompt: String,
}

#[derive(Debug, Parser)]
struct VideoArgs {
    #[command(flatten)]
    host: HostArgs,
    /// `<description>-<style>-<mood>-<camera>-<ratio>`; trailing parts optional.
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    image: Option<PathBuf>,
}

const IMAGE_COMMAND: &str = "/image";
const QUIT_COMMANDS: &[&str] = &["/quit", "/exit"];

struct StdoutChannel {
    json: bool,
}

impl StdoutChannel {
    fn print(&self, reply: &Reply, target: &ReplyTarget) {
        if self.json {
            println!(
                "{}",
                json!({
                    "target": target.as_str(),
                    "kind": kind_label(reply.kind),
                    "content": reply.content,
                })
            );
        } else {
            println!("[{}] {}", kind_label(reply.kind), reply.content);
        }
        let _ = io::stdout().flush();
    }
}

impl ReplyChannel for StdoutChannel {
    fn send(&self, reply: Reply, target: &ReplyTarget) {
        self.print(&reply, target);
    }
}

fn kind_label(kind: ReplyKind) -> &'static str {
    match kind {
        ReplyKind::Info => "info",
        ReplyKind::Error => "error",
        ReplyKind::Text => "text",
        ReplyKind::ImageUrl => "image",
        ReplyKind::VideoUrl => "video",
    }
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("zphh-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Draw(args) => run_draw(args),
        Command::Video(args) => run_video(args),
    }
}

fn load_config(host: &HostArgs) -> PluginConfig {
    let mut config = match host.config.as_deref() {
        Some(path) => PluginConfig::load_or_default(path),
        None => PluginConfig::default(),
    }
    .with_env_overrides();
    if let Some(journal) = host.journal.clone() {
        config.journal_path = Some(journal);
    }
    if let Some(work_dir) = host.work_dir.clone() {
        config.work_dir = Some(work_dir);
    }
    config
}

/// Sends one message and prints whatever comes back synchronously.
/// Returns false when the plugin answered with an error.
fn deliver(
    plugin: &ZphhPlugin,
    channel: &Arc<StdoutChannel>,
    context: &mut MessageContext,
) -> bool {
    let outcome: HandleOutcome = plugin.handle(context, channel.clone());
    debug!(action = ?outcome.action, "message handled");
    match outcome.reply {
        Some(reply) => {
            channel.print(&reply, &context.target);
            reply.kind != ReplyKind::Error
        }
        None => true,
    }
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let config = load_config(&args.host);
    let plugin = ZphhPlugin::connect(config).context("failed starting plugin")?;
    let channel = Arc::new(StdoutChannel {
        json: args.host.json,
    });
    let target = ReplyTarget::new(args.host.target.clone());

    let stdin = io::stdin();
    let mut line = String::new();
    println!("ZPHH chat started. Use `{IMAGE_COMMAND} <path-or-url>` to send an image, /quit to leave.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        if input.trim().is_empty() {
            continue;
        }
        if QUIT_COMMANDS.contains(&input.trim()) {
            break;
        }

        let mut context = match parse_image_line(input) {
            Ok(Some(location)) => MessageContext::image(location, target.clone()),
            Ok(None) => MessageContext::text(input, target.clone()),
            Err(err) => {
                println!("{err:#}");
                continue;
            }
        };
        deliver(&plugin, &channel, &mut context);
    }

    info!(active_jobs = plugin.active_jobs(), "waiting for video jobs before exit");
    plugin.shutdown();
    Ok(())
}

/// `/image <location>` becomes an image message; anything else is text.
fn parse_image_line(input: &str) -> Result<Option<String>> {
    let Some(rest) = input.trim().strip_prefix(IMAGE_COMMAND) else {
        return Ok(None);
    };
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Ok(None);
    }
    let args = shell_words::split(rest).context("could not parse image arguments")?;
    match args.as_slice() {
        [location] => Ok(Some(location.clone())),
        [] => bail!("{IMAGE_COMMAND} requires a path or URL"),
        _ => bail!("{IMAGE_COMMAND} takes exactly one path or URL"),
    }
}

fn command_text(table: &CommandTable, kind: CommandKind, prompt: &str) -> String {
    format!("{} {}", table.trigger(kind), prompt.trim())
}

fn run_draw(args: DrawArgs) -> Result<i32> {
    let config = load_config(&args.host);
    let table = CommandTable::new(&config.commands);
    let plugin = ZphhPlugin::connect(config).context("failed starting plugin")?;
    let channel = Arc::new(StdoutChannel {
        json: args.host.json,
    });
    let target = ReplyTarget::new(args.host.target.clone());

    let mut context = MessageContext::text(
        command_text(&table, CommandKind::Draw, &args.prompt),
        target,
    );
    let ok = deliver(&plugin, &channel, &mut context);
    plugin.shutdown();
    Ok(if ok { 0 } else { 1 })
}

fn run_video(args: VideoArgs) -> Result<i32> {
    let config = load_config(&args.host);
    let table = CommandTable::new(&config.commands);
    let plugin = ZphhPlugin::connect(config).context("failed starting plugin")?;
    let channel = Arc::new(StdoutChannel {
        json: args.host.json,
    });
    let target = ReplyTarget::new(args.host.target.clone());

    let ok = match args.image.as_ref() {
        Some(image) => {
            let mut request = MessageContext::text(
                command_text(&table, CommandKind::VideoRef, &args.prompt),
                target.clone(),
            );
            deliver(&plugin, &channel, &mut request)
                && deliver(
                    &plugin,
                    &channel,
                    &mut MessageContext::image(image.display().to_string(), target),
                )
        }
        None => {
            let mut request = MessageContext::text(
                command_text(&table, CommandKind::Video, &args.prompt),
                target,
            );
            deliver(&plugin, &channel, &mut request)
        }
    };
    plugin.shutdown();
    Ok(if ok { 0 } else { 1 })
}
