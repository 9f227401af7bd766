//! CLI entry point for `xroad-swa`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use humansize::{format_size, BINARY};

use xroad_swa::config::{self, Config};
use xroad_swa::model::attachment::{generate_content_id, Attachment};
use xroad_swa::model::part::DecodedBodyPart;
use xroad_swa::multipart::decoder::{decode_multipart, DecoderOptions};
use xroad_swa::multipart::encoder::encode_multipart;

#[derive(Parser)]
#[command(
    name = "xroad-swa",
    version,
    about = "Inspect and build SOAP-with-Attachments messages"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List the parts of a multipart message body
    Decode {
        path: PathBuf,
        /// Content-Type header the body was sent with
        #[arg(short = 't', long, env = "XROAD_SWA_CONTENT_TYPE")]
        content_type: String,
        #[arg(long)]
        json: bool,
    },
    /// Write the attachments of a multipart message body to a directory
    Extract {
        path: PathBuf,
        #[arg(short = 't', long, env = "XROAD_SWA_CONTENT_TYPE")]
        content_type: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Build a multipart/related message from a SOAP document and files
    Encode {
        /// SOAP document for the root part
        #[arg(long)]
        xml: PathBuf,
        /// File to attach (repeatable)
        #[arg(short, long)]
        attach: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Decode {
            path,
            content_type,
            json,
        } => cmd_decode(&path, &content_type, json, &config),
        Commands::Extract {
            path,
            content_type,
            output,
        } => cmd_extract(&path, &content_type, &output, &config),
        Commands::Encode { xml, attach, output } => cmd_encode(&xml, &attach, &output, &config),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_file = config::log_file_path(config);
    let log_dir = config::cache_dir(config);
    let created = std::fs::create_dir_all(&log_dir).is_ok();
    if let (true, Some(name)) = (created, log_file.file_name()) {
        let file_appender = tracing_appender::rolling::never(&log_dir, name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "xroad-swa", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Read and split a body, flattening nested `multipart/mixed` parts.
fn read_parts(
    path: &Path,
    content_type: &str,
    options: &DecoderOptions,
) -> anyhow::Result<Vec<DecodedBodyPart>> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    let body = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let parts = decode_multipart(content_type, &body, options)?;

    let mut flat = Vec::with_capacity(parts.len());
    let mut pending = parts;
    pending.reverse();
    while let Some(part) = pending.pop() {
        if part.is_multipart_mixed {
            let mut nested = part.nested_parts(options)?;
            nested.reverse();
            pending.extend(nested);
        } else {
            flat.push(part);
        }
    }
    Ok(flat)
}

/// List the parts of a multipart body.
fn cmd_decode(path: &Path, content_type: &str, json: bool, config: &Config) -> anyhow::Result<()> {
    let start = Instant::now();
    let parts = read_parts(path, content_type, &config.decoder_options())?;
    let elapsed = start.elapsed();

    if json {
        let output = serde_json::json!({
            "file": path.to_string_lossy(),
            "part_count": parts.len(),
            "decoding_time_ms": elapsed.as_millis(),
            "parts": parts,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!();
    println!("  {} part(s) in {} ({:.2?})", parts.len(), path.display(), elapsed);
    println!();
    println!(
        "  {:<4} {:<28} {:<26} {:>10}  {}",
        "#", "Content-ID", "Content-Type", "Size", "Filename"
    );
    println!("  {}", "-".repeat(90));
    for (i, part) in parts.iter().enumerate() {
        let cid: String = part.content_id.as_deref().unwrap_or("-").chars().take(27).collect();
        let ct: String = part.content_type.chars().take(25).collect();
        let digest = match part.digest() {
            Some(_) if !part.digest_matches() => "  (digest mismatch)",
            _ => "",
        };
        println!(
            "  {:<4} {:<28} {:<26} {:>10}  {}{}",
            i + 1,
            cid,
            ct,
            format_size(part.size, BINARY),
            part.filename.as_deref().unwrap_or("-"),
            digest
        );
    }
    println!();
    Ok(())
}

/// Write every attachment part of a multipart body to `output`.
fn cmd_extract(
    path: &Path,
    content_type: &str,
    output: &Path,
    config: &Config,
) -> anyhow::Result<()> {
    let parts = read_parts(path, content_type, &config.decoder_options())?;
    let attachments: Vec<&DecodedBodyPart> = parts
        .iter()
        .filter(|p| p.is_attachment || p.filename.is_some())
        .collect();

    if attachments.is_empty() {
        println!("  No attachments found.");
        return Ok(());
    }

    std::fs::create_dir_all(output)?;
    let mut written = 0usize;
    for part in attachments {
        if !part.digest_matches() {
            tracing::warn!(
                content_id = part.content_id.as_deref().unwrap_or("-"),
                "Attachment does not match its Content-Digest"
            );
        }
        let attachment = part.to_attachment();
        let name = sanitize_filename(&attachment.filename);
        let target = unique_path(&output.join(name));
        std::fs::write(&target, &attachment.content)
            .with_context(|| format!("writing {}", target.display()))?;
        tracing::debug!(path = %target.display(), size = attachment.size(), "Extracted attachment");
        written += 1;
    }

    println!("  Extracted {} attachment(s) to {}", written, output.display());
    Ok(())
}

/// Build a `multipart/related` message and print its HTTP headers.
fn cmd_encode(
    xml_path: &Path,
    files: &[PathBuf],
    output: &Path,
    config: &Config,
) -> anyhow::Result<()> {
    let xml = std::fs::read_to_string(xml_path)
        .with_context(|| format!("reading {}", xml_path.display()))?;
    let hash = config.hash_function();
    let limit = config.attachments.max_filesize;

    let mut attachments = Vec::with_capacity(files.len());
    for file in files {
        let content = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
        if limit > 0 && content.len() > limit {
            anyhow::bail!(
                "{} is {} and exceeds the configured limit of {}",
                file.display(),
                format_size(content.len(), BINARY),
                format_size(limit, BINARY)
            );
        }
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let mut attachment = Attachment::new(filename.as_str(), guess_mimetype(&filename), content)
            .with_content_id(&generate_content_id());
        attachment.digest = Some(hash.digest(&attachment.content));
        println!(
            "  {:<40} {}",
            filename,
            attachment.content_id.as_deref().unwrap_or("-")
        );
        attachments.push(attachment);
    }

    let message = encode_multipart(&xml, &attachments)?;
    std::fs::write(output, &message.body)
        .with_context(|| format!("writing {}", output.display()))?;

    println!();
    for (name, value) in &message.headers {
        println!("{name}: {value}");
    }
    println!();
    println!(
        "  Wrote {} to {}",
        format_size(message.body.len(), BINARY),
        output.display()
    );
    Ok(())
}

/// Guess a mimetype from a file extension.
fn guess_mimetype(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "xml" => "text/xml",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bdoc" | "asice" => "application/vnd.etsi.asic-e+zip",
        "ddoc" => "application/x-ddoc",
        _ => "application/octet-stream",
    }
}

/// Replace characters that are unsafe in file names.
fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '.' | '_' | '@' | ' ') {
                c
            } else {
                '_'
            }
        })
        .take(200)
        .collect();
    let trimmed = sanitized.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "attachment".to_string()
    } else {
        trimmed.to_string()
    }
}

fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    for i in 1..1000 {
        let candidate = if ext.is_empty() {
            parent.join(format!("{stem}_{i}"))
        } else {
            parent.join(format!("{stem}_{i}.{ext}"))
        };
        if !candidate.exists() {
            return candidate;
        }
    }
    parent.join(format!("{stem}_dup.{ext}"))
}
