//! Media catalog: recursive library scan and playlist ordering.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("video directory does not exist: {0}")]
    Missing(PathBuf),
    #[error("video directory is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How scanned files are ordered into a playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaylistOrder {
    /// Lexicographic by path.
    #[default]
    Path,
    /// `SxxEyy` files by (season, episode), then everything else by path.
    Episode,
    /// Path order shuffled once per scan. Reproducible when seeded.
    Shuffle { seed: Option<u64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EpisodeTag {
    pub season: u32,
    pub episode: u32,
}

/// One playable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub path: PathBuf,
    pub title: String,
    pub episode: Option<EpisodeTag>,
}

impl MediaItem {
    pub fn from_path(path: PathBuf) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let episode = parse_episode(&stem);
        let title = match episode {
            Some(tag) => format!("S{:02}E{:02}", tag.season, tag.episode),
            None => title_from_stem(&stem),
        };
        Self { path, title, episode }
    }

    fn stem_upper(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_uppercase())
            .unwrap_or_default()
    }
}

/// Result of asking the catalog for the item after `current`.
#[derive(Debug, PartialEq, Eq)]
pub enum Next<'a> {
    Item {
        index: usize,
        item: &'a MediaItem,
        /// True when a looping catalog restarted from the top.
        wrapped: bool,
    },
    EndOfCatalog,
}

/// The last scanned, ordered set of playable files.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    extensions: Vec<String>,
    order: PlaylistOrder,
    items: Vec<MediaItem>,
}

impl Catalog {
    /// Scan `root` and build the catalog. An empty result is not an error.
    pub fn open(
        root: impl Into<PathBuf>,
        extensions: &[String],
        order: PlaylistOrder,
    ) -> Result<Self, CatalogError> {
        let root = root.into();
        let items = scan(&root, extensions, order)?;
        Ok(Self {
            root,
            extensions: extensions.to_vec(),
            order,
            items,
        })
    }

    /// Re-walk the directory. On error the previous ordering is kept.
    pub fn rescan(&mut self) -> Result<usize, CatalogError> {
        self.items = scan(&self.root, &self.extensions, self.order)?;
        Ok(self.items.len())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn items(&self) -> &[MediaItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MediaItem> {
        self.items.get(index)
    }

    /// Item following `current` (`None` means "before the first item").
    pub fn next(&self, current: Option<usize>, loop_playlist: bool) -> Next<'_> {
        if self.items.is_empty() {
            return Next::EndOfCatalog;
        }
        let candidate = current.map_or(0, |i| i.saturating_add(1));
        if let Some(item) = self.items.get(candidate) {
            return Next::Item {
                index: candidate,
                item,
                wrapped: false,
            };
        }
        if loop_playlist {
            Next::Item {
                index: 0,
                item: &self.items[0],
                wrapped: true,
            }
        } else {
            Next::EndOfCatalog
        }
    }

    /// First item whose file stem equals or contains `needle`, ignoring case.
    pub fn find_start(&self, needle: &str) -> Option<usize> {
        let needle = needle.trim().to_uppercase();
        if needle.is_empty() {
            return None;
        }
        self.items.iter().position(|item| {
            let stem = item.stem_upper();
            stem == needle || stem.contains(&needle)
        })
    }

    pub fn position_of(&self, path: &Path) -> Option<usize> {
        self.items.iter().position(|item| item.path == path)
    }
}

/// Recursively collect files under `root` whose extension is in
/// `extensions` (lower-case, no dot; matched case-insensitively).
pub fn scan(
    root: &Path,
    extensions: &[String],
    order: PlaylistOrder,
) -> Result<Vec<MediaItem>, CatalogError> {
    if !root.exists() {
        return Err(CatalogError::Missing(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(CatalogError::NotADirectory(root.to_path_buf()));
    }

    // Filesystem errors are surfaced, not treated as "empty": a stale NAS
    // mount must not look like an empty library.
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let rd = std::fs::read_dir(&dir).map_err(|source| CatalogError::Unreadable {
            path: dir.clone(),
            source,
        })?;
        for ent in rd {
            let ent = ent.map_err(|source| CatalogError::Unreadable {
                path: dir.clone(),
                source,
            })?;
            let path = ent.path();
            // Do not follow directory symlinks; they can form cycles.
            let is_real_dir = ent.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_real_dir {
                stack.push(path);
                continue;
            }
            if !path.is_file() {
                continue;
            }
            let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                continue;
            };
            let ext = ext.to_ascii_lowercase();
            if extensions.iter().any(|a| *a == ext) {
                files.push(path);
            }
        }
    }

    let mut items: Vec<MediaItem> = files.into_iter().map(MediaItem::from_path).collect();
    sort_items(&mut items, order);
    Ok(items)
}

fn sort_items(items: &mut [MediaItem], order: PlaylistOrder) {
    match order {
        PlaylistOrder::Path => items.sort_by(|a, b| a.path.cmp(&b.path)),
        PlaylistOrder::Episode => items.sort_by_cached_key(|item| {
            let lower = item.path.to_string_lossy().to_lowercase();
            match item.episode {
                Some(tag) => (0u8, tag, lower),
                None => (1u8, EpisodeTag { season: 0, episode: 0 }, lower),
            }
        }),
        PlaylistOrder::Shuffle { seed } => {
            items.sort_by(|a, b| a.path.cmp(&b.path));
            let mut rng = match seed {
                Some(seed) => fastrand::Rng::with_seed(seed),
                None => fastrand::Rng::new(),
            };
            rng.shuffle(items);
        }
    }
}

fn episode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)S(?P<season>\d{2})E(?P<episode>\d{2})").expect("static regex")
    })
}

fn parse_episode(stem: &str) -> Option<EpisodeTag> {
    let caps = episode_re().captures(stem)?;
    Some(EpisodeTag {
        season: caps["season"].parse().ok()?,
        episode: caps["episode"].parse().ok()?,
    })
}

fn title_from_stem(stem: &str) -> String {
    let title = stem.replace(['_', '.'], " ");
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        "VIDEO".to_string()
    } else {
        title.chars().take(64).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(p: &str) -> MediaItem {
        MediaItem::from_path(PathBuf::from(p))
    }

    fn catalog(paths: &[&str]) -> Catalog {
        Catalog {
            root: PathBuf::from("/v"),
            extensions: vec!["mp4".into()],
            order: PlaylistOrder::Path,
            items: paths.iter().map(|p| item(p)).collect(),
        }
    }

    #[test]
    fn titles_prefer_episode_tags() {
        assert_eq!(item("/v/Show.Name.s01e03.1080p.mkv").title, "S01E03");
        assert_eq!(
            item("/v/Show.Name.s01e03.mkv").episode,
            Some(EpisodeTag { season: 1, episode: 3 })
        );
        assert_eq!(item("/v/My_Home_Movie.mp4").title, "My Home Movie");
        assert_eq!(item("/v/___.mp4").title, "VIDEO");
    }

    #[test]
    fn next_walks_then_ends_or_wraps() {
        let c = catalog(&["/v/a.mp4", "/v/b.mp4", "/v/c.mp4"]);

        match c.next(None, false) {
            Next::Item { index, wrapped, .. } => {
                assert_eq!(index, 0);
                assert!(!wrapped);
            }
            Next::EndOfCatalog => panic!("expected first item"),
        }
        match c.next(Some(2), true) {
            Next::Item { index, item, wrapped } => {
                assert_eq!(index, 0);
                assert_eq!(item.path, PathBuf::from("/v/a.mp4"));
                assert!(wrapped);
            }
            Next::EndOfCatalog => panic!("looping catalog must wrap"),
        }
        assert_eq!(c.next(Some(2), false), Next::EndOfCatalog);
    }

    #[test]
    fn empty_catalog_is_always_exhausted() {
        let c = catalog(&[]);
        assert_eq!(c.next(None, true), Next::EndOfCatalog);
        assert_eq!(c.next(None, false), Next::EndOfCatalog);
    }

    #[test]
    fn episode_order_sorts_tagged_files_first() {
        let mut items = vec![
            item("/v/extras/behind.mkv"),
            item("/v/s2/Show S02E01.mkv"),
            item("/v/s1/Show S01E10.mkv"),
            item("/v/s1/Show S01E02.mkv"),
        ];
        sort_items(&mut items, PlaylistOrder::Episode);
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["S01E02", "S01E10", "S02E01", "behind"]);
    }

    #[test]
    fn seeded_shuffle_is_reproducible() {
        let paths: Vec<String> = (0..20).map(|i| format!("/v/{i:02}.mkv")).collect();
        let mk = || paths.iter().map(|p| item(p)).collect::<Vec<_>>();

        let mut a = mk();
        let mut b = mk();
        sort_items(&mut a, PlaylistOrder::Shuffle { seed: Some(7) });
        sort_items(&mut b, PlaylistOrder::Shuffle { seed: Some(7) });
        assert_eq!(a, b);
    }

    #[test]
    fn find_start_matches_stem_substrings() {
        let c = catalog(&["/v/Show S01E01.mp4", "/v/Show S01E02.mp4"]);
        assert_eq!(c.find_start("s01e02"), Some(1));
        assert_eq!(c.find_start("show s01e01"), Some(0));
        assert_eq!(c.find_start("S09E09"), None);
        assert_eq!(c.find_start("  "), None);
    }
}
