//! Picasa folder albums
//!
//! A `.picasa.ini` (or `picasa.ini`) names the album of its directory in the
//! `[Picasa]` section.

use std::io::{BufRead, BufReader, Read};

use super::{ReaderError, ReaderResult};
use crate::ingest::asset::Album;
use crate::ingest::fsys::SourceFs;

pub fn is_picasa_ini(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower == ".picasa.ini" || lower == "picasa.ini"
}

/// Album declared by the ini file at `path`
pub fn read_album(fs: &SourceFs, path: &str) -> ReaderResult<Album> {
    parse_ini(fs.open(path)?).map_err(|e| match e {
        ReaderError::Invalid(msg) => ReaderError::Invalid(format!("error parsing picasa ini file: {}", msg)),
        other => other,
    })
}

fn parse_ini(reader: impl Read) -> ReaderResult<Album> {
    let mut section = String::new();
    let mut album = Album::default();

    for line in BufReader::new(reader).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].to_string();
            continue;
        }
        if section != "Picasa" {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(ReaderError::Invalid(format!("invalid line: {}", line)));
        };
        match key.trim() {
            "name" => album.title = value.trim().to_string(),
            "description" => album.description = value.trim().to_string(),
            _ => {}
        }
    }
    Ok(album)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ini() {
        let ini = "; picasa\n[IMG_1.jpg]\nstar=yes\n[Picasa]\nname = Summer 2010\ndescription=Beach week\n";
        let album = parse_ini(ini.as_bytes()).unwrap();
        assert_eq!(album.title, "Summer 2010");
        assert_eq!(album.description, "Beach week");

        assert!(parse_ini("[Picasa]\nbroken line\n".as_bytes()).is_err());
        assert!(is_picasa_ini(".Picasa.ini"));
    }
}
