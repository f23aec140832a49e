//! The JSON state file: an array of posts, rewritten after every run.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use postscout_shared::{Post, sort_newest_first};

/// Read the posts in `path`. A missing file is an empty state.
pub(crate) fn load_posts(path: &Path) -> Result<Vec<Post>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).wrap_err_with(|| format!("failed to read {}", path.display())),
    };
    serde_json::from_str(&content)
        .wrap_err_with(|| format!("{} is not a JSON array of posts", path.display()))
}

/// Write `posts` newest first, replacing `path` atomically.
pub(crate) fn save_posts(path: &Path, posts: &mut [Post]) -> Result<()> {
    sort_newest_first(posts);
    let json = serde_json::to_string_pretty(posts)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state.json".into());
    let tmp = path.with_file_name(format!(".{name}.tmp"));

    fs::write(&tmp, json).wrap_err_with(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).wrap_err_with(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

/// Replace posts in `state` that share a URL with one in `updates`; append
/// the rest.
pub(crate) fn merge_posts(state: &mut Vec<Post>, updates: Vec<Post>) {
    let mut index: HashMap<String, usize> = state
        .iter()
        .enumerate()
        .map(|(i, p)| (p.url.clone(), i))
        .collect();

    for post in updates {
        match index.get(&post.url) {
            Some(&i) => state[i] = post,
            None => {
                index.insert(post.url.clone(), state.len());
                state.push(post);
            }
        }
    }
}

/// Scope name derived from the state file name (`acme.json` -> `acme`).
pub(crate) fn default_scope(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "default".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use postscout_shared::EnrichmentStatus;

    #[test]
    fn merge_replaces_by_url_and_appends_new() {
        let mut state = vec![
            Post::new("https://a.example/1", "One", "first body text here"),
            Post::new("https://a.example/2", "Two", "second body text here"),
        ];
        let mut updated = state[1].clone();
        updated.mark_failed("boom");
        let added = Post::new("https://a.example/3", "Three", "third body text here");

        merge_posts(&mut state, vec![updated, added]);

        assert_eq!(state.len(), 3);
        assert_eq!(state[0].status, EnrichmentStatus::Pending);
        assert_eq!(state[1].status, EnrichmentStatus::Failed);
        assert_eq!(state[2].url, "https://a.example/3");
    }

    #[test]
    fn fixture_state_loads_and_saves() {
        let tmp = std::env::temp_dir().join(format!("ps-cli-state-{}", uuid::Uuid::now_v7()));
        fs::create_dir_all(&tmp).unwrap();
        let path = tmp.join("acme.json");
        fs::copy("../../fixtures/json/posts.fixture.json", &path).unwrap();

        let mut posts = load_posts(&path).unwrap();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts.iter().filter(|p| p.needs_enrichment()).count(), 2);

        save_posts(&path, &mut posts).unwrap();
        assert_eq!(load_posts(&path).unwrap(), posts);
        assert!(!tmp.join(".acme.json.tmp").exists());
        assert_eq!(default_scope(&path), "acme");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_state_is_empty() {
        let path = std::env::temp_dir().join(format!("ps-missing-{}.json", uuid::Uuid::now_v7()));
        assert!(load_posts(&path).unwrap().is_empty());
    }
}
