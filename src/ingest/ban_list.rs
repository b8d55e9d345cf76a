//! Banned file name patterns
//!
//! Glob-style, case-insensitive patterns matched anywhere in a forward-slash
//! path. A trailing `/` targets directories and everything below them.

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BanListError {
    #[error("invalid file name pattern: {0}")]
    InvalidPattern(String),
}

pub type BanListResult<T> = Result<T, BanListError>;

pub const DEFAULT_BANNED: [&str; 8] = [
    "@eaDir/",
    "@__thumb/",
    "SYNOFILE_THUMB_*.*",
    "Lightroom Catalog/",
    "thumbnails/",
    ".DS_Store/",
    "._*.*",
    ".photostructure/",
];

#[derive(Debug, Clone, Default)]
pub struct BanList {
    patterns: Vec<String>,
    regexes: Vec<Regex>,
}

impl BanList {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> BanListResult<Self> {
        let mut list = Self::default();
        for p in patterns {
            list.add(p.as_ref())?;
        }
        Ok(list)
    }

    pub fn with_defaults() -> BanListResult<Self> {
        Self::new(&DEFAULT_BANNED)
    }

    pub fn add(&mut self, pattern: &str) -> BanListResult<()> {
        if pattern.is_empty() {
            return Ok(());
        }
        self.regexes.push(pattern_to_regex(pattern)?);
        self.patterns.push(pattern.to_string());
        Ok(())
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether a file path is banned
    pub fn is_banned(&self, path: &str) -> bool {
        self.regexes.iter().any(|re| re.is_match(path))
    }

    /// Whether a directory path is banned
    pub fn is_banned_dir(&self, dir: &str) -> bool {
        let with_slash = format!("{}/", dir.trim_end_matches('/'));
        self.is_banned(&with_slash)
    }
}

fn pattern_to_regex(pattern: &str) -> BanListResult<Regex> {
    let mut re = String::from("(?i)");
    let mut chars = pattern.chars().peekable();
    let mut first = true;
    while let Some(c) = chars.next() {
        match c {
            '/' if first => re.push_str("(^|/)"),
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '.' | '^' | '$' | '(' | ')' | '|' | '+' | '{' | '}' => {
                re.push('\\');
                re.push(c);
            }
            '\\' => {
                re.push('\\');
                if let Some(next) = chars.next() {
                    re.push(next);
                }
            }
            '[' => {
                re.push('[');
                let mut closed = false;
                for b in chars.by_ref() {
                    re.push(b);
                    if b == ']' {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(BanListError::InvalidPattern(pattern.to_string()));
                }
            }
            c => re.push(c),
        }
        first = false;
    }
    Regex::new(&re).map_err(|_| BanListError::InvalidPattern(pattern.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns() {
        let list = BanList::with_defaults().unwrap();
        assert!(list.is_banned_dir("photos/@eaDir"));
        assert!(list.is_banned("photos/@eaDir/IMG_1.jpg"));
        assert!(list.is_banned("photos/SYNOFILE_THUMB_M.jpg"));
        assert!(list.is_banned("photos/._IMG_0001.JPG"));
        assert!(list.is_banned_dir("Lightroom Catalog"));
        assert!(list.is_banned_dir("x/Thumbnails"));
        assert!(!list.is_banned("photos/IMG_1.jpg"));
        assert!(!list.is_banned_dir("photos"));
    }

    #[test]
    fn test_anchor_and_wildcards() {
        let list = BanList::new(&["/backup/", "IMG_?.jpg"]).unwrap();
        assert!(list.is_banned_dir("backup"));
        assert!(list.is_banned_dir("a/backup"));
        assert!(!list.is_banned_dir("a/oldbackup"));
        assert!(list.is_banned("a/IMG_1.jpg"));
        assert!(!list.is_banned("a/IMG_12.jpg"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(BanList::new(&["[abc"]).is_err());
    }
}
