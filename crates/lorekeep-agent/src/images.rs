//! Images that may illustrate an entry.
//!
//! Images live beside the text sources under `<sources>/<kind>/`, usually in
//! an `images/` folder. Matching looks only at file names and captions; the
//! image data is never read. A caption comes from a sibling `<stem>.txt`
//! when one exists.

use std::fs;
use std::path::Path;

use serde::Serialize;

use lorekeep_core::model::SourceKind;

/// Images attached to one entry.
pub const MAX_IMAGES: usize = 3;
/// Characters of a caption file kept.
const CAPTION_CHARS: usize = 200;

const EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

/// One image file found under the sources root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    /// Relative to the sources root, `/`-separated.
    pub path: String,
    pub kind: SourceKind,
    pub caption: Option<String>,
}

/// An image chosen for an entry, as written to its frontmatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedImage {
    pub path: String,
    pub caption: String,
}

impl ImageFile {
    #[must_use]
    pub fn new(path: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            path: path.into(),
            kind,
            caption: None,
        }
    }

    #[must_use]
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Read the caption sidecar for the image at `file`, if any.
    pub(crate) fn load(path: String, kind: SourceKind, file: &Path) -> Self {
        let caption = fs::read_to_string(file.with_extension("txt"))
            .ok()
            .and_then(|text| {
                let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
                Some(line.chars().take(CAPTION_CHARS).collect::<String>())
            });
        Self {
            path,
            kind,
            caption,
        }
    }

    fn stem(&self) -> &str {
        let name = self.path.rsplit('/').next().unwrap_or(&self.path);
        name.rsplit_once('.').map_or(name, |(stem, _)| stem)
    }

    /// How well this image fits `name`; zero means not at all.
    ///
    /// The whole name in the file name weighs most, then every word of it
    /// somewhere in the file name, then the name in the caption. Shop
    /// images get a small bonus once something matched.
    #[must_use]
    pub fn score(&self, name: &str) -> u32 {
        let wanted = tokens(name);
        if wanted.is_empty() {
            return 0;
        }
        let in_file = tokens(self.stem());
        let mut score = 0;
        if contains_run(&in_file, &wanted) || in_file.contains(&wanted.concat()) {
            score += 10;
        } else if wanted.len() > 1 && wanted.iter().all(|w| in_file.contains(w)) {
            score += 6;
        }
        if let Some(caption) = &self.caption {
            if contains_run(&tokens(caption), &wanted) {
                score += 5;
            }
        }
        if score > 0 && self.kind == SourceKind::Shop {
            score += 2;
        }
        score
    }
}

/// Whether `file_name` looks like an image by extension.
#[must_use]
pub fn is_image(file_name: &str) -> bool {
    file_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// The best images for `name`, at most `limit`, best first.
#[must_use]
pub fn match_images(images: &[ImageFile], name: &str, limit: usize) -> Vec<MatchedImage> {
    let mut scored: Vec<(u32, &ImageFile)> = images
        .iter()
        .map(|img| (img.score(name), img))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.path.cmp(&b.1.path)));
    scored
        .into_iter()
        .take(limit)
        .map(|(_, img)| MatchedImage {
            path: img.path.clone(),
            caption: img
                .caption
                .clone()
                .unwrap_or_else(|| default_caption(name, img.kind)),
        })
        .collect()
}

fn default_caption(name: &str, kind: SourceKind) -> String {
    let what = match kind {
        SourceKind::Shop => "Product image",
        SourceKind::Rulebook => "Rulebook art",
        SourceKind::Newsletter => "Newsletter image",
        SourceKind::Community => "Community image",
    };
    format!("{name} - {what}")
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
