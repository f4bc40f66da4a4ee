//! `dubq add <url>...` – create a batch from URLs and queue its tasks.

use anyhow::{Context, Result};
use dubq_core::config::DubqConfig;
use dubq_core::db::{Db, TaskConfig};
use serde_json::Value;
use std::path::Path;

use super::offline_context;

/// Command-line URLs followed by the URLs of `file_contents`.
///
/// A file holding a JSON array is taken as-is so non-string entries get
/// rejected per item; otherwise every non-empty line that is not a `#`
/// comment is one URL.
fn collect_urls(args: &[String], file_contents: Option<&str>) -> Vec<Value> {
    let mut urls: Vec<Value> = args.iter().cloned().map(Value::String).collect();
    let Some(contents) = file_contents else {
        return urls;
    };
    match serde_json::from_str::<Value>(contents) {
        Ok(Value::Array(entries)) => urls.extend(entries),
        _ => urls.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(|l| Value::String(l.to_string())),
        ),
    }
    urls
}

pub async fn run_add(
    cfg: &DubqConfig,
    db: Db,
    args: &[String],
    file: Option<&Path>,
    name: Option<&str>,
    task_cfg: &TaskConfig,
) -> Result<()> {
    let contents = match file {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        None => None,
    };
    let urls = collect_urls(args, contents.as_deref());

    let ctx = offline_context(cfg, db);
    let created = ctx.batches.create_batch(&urls, task_cfg, name).await?;
    println!(
        "Created batch {}: {} accepted, {} rejected",
        created.batch_id, created.accepted, created.rejected
    );
    for rejected in &created.rejected_items {
        println!("  #{} {}: {}", rejected.index, rejected.url, rejected.reason);
    }
    if !created.task_ids.is_empty() {
        let ids: Vec<String> = created.task_ids.iter().map(|id| id.to_string()).collect();
        println!("Queued tasks: {}", ids.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_only() {
        let urls = collect_urls(&["https://youtu.be/a".to_string()], None);
        assert_eq!(urls, vec![Value::String("https://youtu.be/a".into())]);
    }

    #[test]
    fn file_lines_skip_blanks_and_comments() {
        let contents = "# weekly\nhttps://youtu.be/a\n\n  https://youtu.be/b  \n";
        let urls = collect_urls(&[], Some(contents));
        assert_eq!(
            urls,
            vec![
                Value::String("https://youtu.be/a".into()),
                Value::String("https://youtu.be/b".into())
            ]
        );
    }

    #[test]
    fn json_file_entries_are_kept_verbatim() {
        let urls = collect_urls(
            &["https://youtu.be/x".to_string()],
            Some(r#"["https://youtu.be/a", 5]"#),
        );
        assert_eq!(urls.len(), 3);
        assert_eq!(urls[2], Value::from(5));
    }
}
