use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use pastel_core::attachment::FileSource;
use pastel_core::{CreatePaste, NewAttachment, Paste, User};
use pastel_service::PasteService;

use crate::config::{Cli, Command};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Execute the parsed command against `svc`, writing results to `out`.
pub async fn run(cli: &Cli, svc: &dyn PasteService, out: &mut dyn Write) -> Result<()> {
    match &cli.command {
        Command::UserAdd { username } => {
            let user = svc.create_user(username).await?;
            if cli.json {
                print_json(out, &user)?;
            } else {
                writeln!(out, "created user {} ({})", user.username, user.id)?;
            }
        }

        Command::Create {
            file,
            slug,
            format,
            visibility,
            expires_in,
            attachments,
        } => {
            let actor = acting_user(cli, svc).await?;
            let content = match file {
                Some(path) => fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => {
                    let mut content = String::new();
                    io::stdin()
                        .read_to_string(&mut content)
                        .context("reading stdin")?;
                    content
                }
            };

            let now = Utc::now();
            let mut req = CreatePaste::new(content, format.clone()).with_visibility(*visibility);
            if let Some(slug) = slug {
                req = req.with_slug(slug.clone());
            }
            if let Some(lifetime) = expires_in {
                req = req.with_expiry(now + *lifetime);
            }
            for arg in attachments {
                req = req.with_attachment(file_attachment(arg)?);
            }
            req.validate(now)?;

            let id = svc.create_paste(&actor.id, req).await?;
            let (paste, owner) = svc.get_paste_by_id(&actor.id, &id).await?;
            if cli.json {
                print_json(out, &json!({ "id": id, "owner": owner, "slug": paste.slug }))?;
            } else {
                writeln!(out, "{owner}/{}", paste.slug)?;
            }
        }

        Command::Show { owner, slug } => {
            let actor = acting_user(cli, svc).await?;
            let paste = svc.get_paste_by_slug(&actor.id, owner, slug).await?;
            if cli.json {
                print_json(out, &paste)?;
            } else {
                out.write_all(paste.content.as_bytes())?;
                if !paste.content.ends_with('\n') {
                    writeln!(out)?;
                }
            }
        }

        Command::Resolve { paste_id } => {
            let actor = acting_user(cli, svc).await?;
            let (paste, owner) = svc.get_paste_by_id(&actor.id, paste_id).await?;
            if cli.json {
                print_json(out, &json!({ "id": paste.id, "owner": owner, "slug": paste.slug }))?;
            } else {
                writeln!(out, "{owner}/{}", paste.slug)?;
            }
        }

        Command::Latest { limit } => {
            let pastes = svc.get_latest_public_pastes(*limit).await?;
            print_pastes(out, cli.json, &pastes)?;
        }

        Command::List { username } => {
            let actor = acting_user(cli, svc).await?;
            let pastes = svc.list_user_pastes(&actor.id, username).await?;
            print_pastes(out, cli.json, &pastes)?;
        }

        Command::Attachments { owner, slug } => {
            let actor = acting_user(cli, svc).await?;
            let attachments = svc.list_paste_attachments(&actor.id, owner, slug).await?;
            if cli.json {
                print_json(out, &attachments)?;
            } else {
                for a in &attachments {
                    writeln!(out, "{}\t{}\t{}\t{}", a.slug, a.mime_type, a.size, a.checksum)?;
                }
            }
        }

        Command::Attachment {
            owner,
            slug,
            attachment,
            output,
        } => {
            let actor = acting_user(cli, svc).await?;
            let mut download = svc
                .get_attachment(&actor.id, owner, slug, attachment)
                .await?;
            match output {
                Some(path) => {
                    let mut file = File::create(path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    let n = io::copy(&mut download, &mut file)?;
                    info!(
                        "wrote {n} bytes of {} to {} (etag {})",
                        download.mime_type(),
                        path.display(),
                        download.etag()
                    );
                }
                None => {
                    io::copy(&mut download, out)?;
                }
            }
        }

        Command::Delete { paste_id } => {
            let actor = acting_user(cli, svc).await?;
            svc.delete_paste(&actor.id, paste_id).await?;
            if cli.json {
                print_json(out, &json!({ "deleted": paste_id }))?;
            } else {
                writeln!(out, "deleted {paste_id}")?;
            }
        }

        Command::PurgeExpired => {
            let purged = svc.purge_expired().await?;
            if cli.json {
                print_json(
                    out,
                    &json!({
                        "pastes": purged.pastes,
                        "attachments": purged.attachment_ids.len(),
                    }),
                )?;
            } else {
                writeln!(
                    out,
                    "purged {} paste(s), {} attachment(s)",
                    purged.pastes,
                    purged.attachment_ids.len()
                )?;
            }
        }

        Command::SweepOrphans => {
            let removed = svc.sweep_orphan_blobs().await?;
            if cli.json {
                print_json(out, &json!({ "removed": removed }))?;
            } else {
                writeln!(out, "removed {removed} orphaned blob(s)")?;
            }
        }

        Command::Check => {
            if !svc.is_healthy().await {
                bail!("metadata database is not reachable");
            }
            writeln!(out, "ok")?;
        }
    }
    Ok(())
}

async fn acting_user(cli: &Cli, svc: &dyn PasteService) -> Result<User> {
    svc.resolve_user(&cli.user)
        .await
        .with_context(|| format!("acting as '{}'", cli.user))
}

/// Build an attachment from `PATH[=MIME]`, named after the file.
fn file_attachment(arg: &str) -> Result<NewAttachment> {
    let (path, mime_type) = match arg.rsplit_once('=') {
        Some((path, mime)) if !mime.is_empty() => (path, mime),
        _ => (arg, DEFAULT_MIME_TYPE),
    };
    let path = PathBuf::from(path);
    let slug = file_name(&path)?;
    let size = fs::metadata(&path)
        .with_context(|| format!("reading {}", path.display()))?
        .len();
    let size = i64::try_from(size).context("attachment too large")?;
    Ok(NewAttachment::new(slug, mime_type, size, FileSource(path)))
}

fn file_name(path: &Path) -> Result<String> {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => Ok(name.to_string()),
        None => bail!("cannot name attachment {}", path.display()),
    }
}

fn print_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn print_pastes(out: &mut dyn Write, json: bool, pastes: &[Paste]) -> Result<()> {
    if json {
        return print_json(out, pastes);
    }
    for p in pastes {
        let expiry = p
            .expires_at
            .map(|t| format!("expires {}", t.format("%Y-%m-%d %H:%M")))
            .unwrap_or_default();
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{expiry}",
            p.created_at.format("%Y-%m-%d %H:%M"),
            p.visibility,
            p.slug,
            p.content_format,
        )?;
    }
    Ok(())
}
