use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use storyhive_schema::Chapter;

/// Reads `*.txt` files from `dir`, sorted by file name, as chapters 1..n.
///
/// The first non-empty line of each file is the title and the rest is the
/// body. All chapters go into volume 1.
pub fn read_chapter_dir(dir: &Path, project_id: i64) -> Result<Vec<Chapter>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("failed to read chapter dir: {}", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read dir entry: {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("txt") {
            paths.push(path);
        }
    }
    paths.sort();

    if paths.is_empty() {
        return Err(anyhow!("no .txt chapter files in {}", dir.display()));
    }

    let mut chapters = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read chapter file: {}", path.display()))?;
        let (title, content) = split_title(&raw);
        let title = title.unwrap_or_else(|| file_stem(path));
        chapters.push(Chapter {
            project_id,
            index: u32::try_from(i + 1)?,
            volume: 1,
            title,
            content,
        });
    }
    Ok(chapters)
}

fn split_title(raw: &str) -> (Option<String>, String) {
    let trimmed = raw.trim_start();
    match trimmed.split_once('\n') {
        Some((first, rest)) => (
            Some(first.trim().to_string()).filter(|t| !t.is_empty()),
            rest.trim().to_string(),
        ),
        None if trimmed.trim().is_empty() => (None, String::new()),
        None => (Some(trimmed.trim().to_string()), String::new()),
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}
