use anyhow::{Context, Result};
use fn_error_context::context;
use std::io::{Read, Write};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

mod archive;
mod bot;
mod download;
mod error;
mod metadata;
mod object_storage;
mod pipeline;
mod provider;
mod qemu_img;
mod signer;
mod source;
mod stack;

use bot::KEEP_IT_IN_THE_HERD;
use provider::{ImageProvider, Properties};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// The image the deployment boots from.
const TALOS_IMAGE_URL: &str = "https://factory.talos.dev/image/4a0d65c669d46663f377e7161e50cfd570c401f26fd9e7bda34a0216b6f1922b/v1.11.5/oracle-arm64.raw.xz";

#[derive(Debug, StructOpt)]
struct CreateOpts {
    /// Path to a JSON properties document, or `-` for stdin
    #[structopt(long, default_value = "-")]
    properties: String,
}

#[derive(Debug, StructOpt)]
struct DiffOpts {
    /// Resource ID as returned by `create`
    #[structopt(long, default_value = "")]
    id: String,

    /// Properties recorded by the previous `create`
    #[structopt(long)]
    olds: String,

    /// Desired properties
    #[structopt(long)]
    news: String,
}

#[derive(Debug, StructOpt)]
struct DeleteOpts {
    /// Resource ID as returned by `create`
    #[structopt(long, default_value = "")]
    id: String,

    /// Path to the recorded output properties, or `-` for stdin
    #[structopt(long, default_value = "-")]
    properties: String,
}

#[derive(Debug, StructOpt)]
struct BuildOpts {
    /// Source image URL; must contain a `/v<version>/` path component
    #[structopt(long, default_value = TALOS_IMAGE_URL)]
    url: String,

    /// Where to write the archive
    #[structopt(long)]
    output: String,
}

#[derive(Debug, StructOpt)]
#[structopt(rename_all = "kebab-case")]
enum BotCmd {
    /// Print the reply to the `/website` command
    Website,
    /// Handle one recorded event and print the posts it produces as JSON
    Event {
        /// Path to a `{"event": ..., "replies": [...]}` document, or `-` for stdin
        #[structopt(long, default_value = "-")]
        event: String,

        /// The channel the bot serves
        #[structopt(long, default_value = KEEP_IT_IN_THE_HERD)]
        channel: String,

        /// Seed for picking a thread participant
        #[structopt(long)]
        seed: Option<u64>,
    },
}

#[derive(Debug, StructOpt)]
#[structopt(name = "talos-image-provider")]
#[structopt(rename_all = "kebab-case")]
struct Opt {
    /// Path to the qemu-img binary
    #[structopt(long, global = true, default_value = "qemu-img")]
    qemu_img: String,

    #[structopt(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, StructOpt)]
#[structopt(rename_all = "kebab-case")]
enum Cmd {
    /// Build and upload the image archive; prints the result as JSON
    Create(CreateOpts),
    /// Decide whether a property change requires replacement
    Diff(DiffOpts),
    /// Delete the uploaded archive
    Delete(DeleteOpts),
    /// Build the archive locally without uploading it
    Build(BuildOpts),
    /// Print the version parsed from an image URL
    VersionToken {
        #[structopt(default_value = TALOS_IMAGE_URL)]
        url: String,
    },
    /// Print the deployment's resources in dependency order
    Plan {
        #[structopt(long, default_value = TALOS_IMAGE_URL)]
        url: String,
    },
    /// Chat-bot handlers
    Bot(BotCmd),
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let mut buf = String::new();
    if path == "-" {
        std::io::stdin().read_to_string(&mut buf)?;
    } else {
        buf = std::fs::read_to_string(path)?;
    }
    Ok(serde_json::from_str(&buf)?)
}

#[context("Reading properties from {}", path)]
fn load_properties<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    read_json(path)
}

#[context("Reading event from {}", path)]
fn load_event(path: &str) -> Result<bot::EventDocument> {
    read_json(path)
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, v)?;
    writeln!(out)?;
    Ok(())
}

fn build(
    opts: &BuildOpts,
    fetcher: &dyn download::Fetcher,
    converter: &dyn qemu_img::Converter,
) -> Result<()> {
    let source = source::ImageSource::new(opts.url.as_str())?;
    let size = pipeline::with_workspace(|dir| {
        let built = pipeline::transcode(&source, fetcher, converter, dir)?;
        tracing::debug!("Archive members: {:?}", archive::list_tar_gz(&built)?);
        Ok(std::fs::copy(&built, &opts.output)?)
    })
    .with_context(|| format!("Building archive from {}", source.url()))?;
    tracing::info!("Wrote {} ({})", opts.output, indicatif::HumanBytes(size));
    Ok(())
}

fn plan(url: &str) -> Result<()> {
    let source = source::ImageSource::new(url)?;
    let stack = stack::Stack::deployment(source.url(), source.version())?;
    for r in stack.order()? {
        println!("{} ({})", r.name, r.kind);
        if !r.depends_on.is_empty() {
            println!("  depends on: {}", r.depends_on.join(", "));
        }
        for (k, v) in &r.settings {
            println!("  {}: {}", k, v);
        }
    }
    Ok(())
}

fn bot_event(
    path: &str,
    channel: &str,
    seed: Option<u64>,
    model: &dyn bot::Model,
) -> Result<()> {
    let doc = load_event(path)?;
    let chat = bot::TranscriptChat::new(doc.replies);
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    bot::Bot::new(&chat, model, channel)
        .handle(&doc.event, &mut rng)
        .context("Handling event")?;
    print_json(&chat.posts())
}

fn run() -> Result<()> {
    let opt = Opt::from_args();
    let client = download::new_http_client()?;
    let converter = qemu_img::QemuImg::new(opt.qemu_img.as_str());
    let connector = object_storage::OciConnector;
    let provider = ImageProvider::new(&client, &converter, &connector);
    let model = bot::OpenRouterModel::new(client.clone(), std::env::var("OPEN_ROUTER_KEY").ok());
    match opt.cmd {
        Cmd::Create(ref opts) => {
            let props: Properties = load_properties(&opts.properties)?;
            let r = provider.create(&props).context("Creating image")?;
            print_json(&r)
        }
        Cmd::Diff(ref opts) => {
            let olds: serde_json::Value = load_properties(&opts.olds)?;
            let news: serde_json::Value = load_properties(&opts.news)?;
            print_json(&provider.diff(&opts.id, &olds, &news))
        }
        Cmd::Delete(ref opts) => {
            let props: Properties = load_properties(&opts.properties)?;
            provider
                .delete(&opts.id, &props)
                .context("Deleting image")?;
            Ok(())
        }
        Cmd::Build(ref opts) => build(opts, &client, &converter),
        Cmd::VersionToken { ref url } => {
            println!("{}", source::ImageSource::new(url.as_str())?.version());
            Ok(())
        }
        Cmd::Plan { ref url } => plan(url),
        Cmd::Bot(BotCmd::Website) => {
            println!("{}", bot::WEBSITE_URL);
            Ok(())
        }
        Cmd::Bot(BotCmd::Event {
            ref event,
            ref channel,
            seed,
        }) => bot_event(event, channel, seed, &model),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    // Print the error
    if let Err(e) = run() {
        eprintln!("{:#}", e);
        std::process::exit(1)
    }
}
