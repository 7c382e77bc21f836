use crate::config::ConfigErrors;
use globset::GlobBuilder;
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use tracing::debug;

fn is_glob(reference: &str) -> bool {
    reference.contains(['*', '?', '[', '{'])
}

/// longest leading part of a glob without any glob syntax
fn glob_root(reference: &str) -> PathBuf {
    Path::new(reference)
        .components()
        .take_while(|component| !is_glob(&component.as_os_str().to_string_lossy()))
        .collect()
}

/// Resolve a map reference to aperture map paths. Plain references are used as
/// is, globs are walked and the matches sorted. Only the reference is a
/// pattern, `base_dir` is always taken literally.
pub fn collect_maps(reference: &str, base_dir: &Path) -> Result<Vec<PathBuf>, ConfigErrors> {
    if !is_glob(reference) {
        return Ok(vec![base_dir.join(reference)]);
    }

    let pattern = reference.strip_prefix("./").unwrap_or(reference);
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()?
        .compile_matcher();

    // matches are tested relative to the anchor, absolute patterns against the full path
    let anchor = if Path::new(pattern).is_absolute() {
        Path::new("")
    } else if base_dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        base_dir
    };
    let root = anchor.join(glob_root(pattern));

    debug!("Collecting maps with glob: {glob:?} below {root:?}");

    let maps = WalkBuilder::new(&root)
        .standard_filters(false)
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|kind| kind.is_file()))
        .map(DirEntry::into_path)
        .filter_map(|path| {
            let relative = path.strip_prefix(anchor).ok()?;
            glob.is_match(relative).then(|| base_dir.join(relative))
        })
        .sorted()
        .collect_vec();

    if maps.is_empty() {
        Err(ConfigErrors::NoMapsMatched(reference.to_string()))
    } else {
        Ok(maps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn plain_reference_is_joined() {
        let maps = collect_maps("maps/a.txt", Path::new("/data")).unwrap();

        assert_eq!(maps, vec![PathBuf::from("/data/maps/a.txt")]);
    }

    #[test]
    fn glob_matches_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("maps/nested")).unwrap();
        for name in ["b.txt", "a.txt", "notes.md", "nested/c.txt"] {
            fs::write(dir.path().join("maps").join(name), "1 2\n").unwrap();
        }

        let maps = collect_maps("maps/*.txt", dir.path()).unwrap();

        assert_eq!(
            maps,
            vec![dir.path().join("maps/a.txt"), dir.path().join("maps/b.txt")]
        );
    }

    #[test]
    fn glob_characters_in_base_dir_are_literal() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("run[1]");
        fs::create_dir_all(base.join("maps")).unwrap();
        fs::write(base.join("maps/a.txt"), "1 2\n").unwrap();

        let maps = collect_maps("maps/*.txt", &base).unwrap();

        assert_eq!(maps, vec![base.join("maps/a.txt")]);
    }

    #[test]
    fn absolute_glob_ignores_base_dir() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "1 2\n").unwrap();
        let reference = format!("{}/*.txt", dir.path().display());

        let maps = collect_maps(&reference, Path::new("/elsewhere")).unwrap();

        assert_eq!(maps, vec![dir.path().join("a.txt")]);
    }

    #[test]
    fn empty_glob_is_an_error() {
        let dir = TempDir::new().unwrap();

        assert!(matches!(
            collect_maps("*.txt", dir.path()),
            Err(ConfigErrors::NoMapsMatched(_))
        ));
    }
}
