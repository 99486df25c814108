use std::iter::repeat;
use std::path::{Path, PathBuf};

use base64::engine::GeneralPurpose;

pub fn find_first_subpath<P: AsRef<Path>, F: Fn(&Path) -> bool>(
    root: impl AsRef<Path>,
    subpaths: &[P],
    search: F,
) -> Option<PathBuf> {
    subpaths
        .iter()
        .zip(repeat(root.as_ref()))
        .map(|(b, a)| a.join(b))
        .find(|it: &PathBuf| search(it))
}

pub fn base64_engine() -> GeneralPurpose {
    base64::engine::GeneralPurpose::new(
        &base64::alphabet::URL_SAFE,
        base64::engine::general_purpose::NO_PAD,
    )
}

/// Trims `value` and returns `None` when nothing is left.
pub fn non_empty_trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|it| !it.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn first_existing_subpath() {
        let dir = tempfile::tempdir().expect("unable to create temp dir");
        std::fs::write(dir.path().join("b.yml"), "").expect("unable to write file");

        let found = find_first_subpath(dir.path(), &["a.yml", "b.yml"], Path::exists);
        assert_eq!(found, Some(dir.path().join("b.yml")));
        assert_eq!(
            find_first_subpath(dir.path(), &["c.yml"], Path::exists),
            None
        );
    }

    #[test]
    fn url_safe_without_padding() {
        let encoded = base64_engine().encode([0xfb, 0xff]);
        assert_eq!(encoded, "-_8");
        assert_eq!(
            base64_engine().decode(&encoded).expect("must decode"),
            vec![0xfb, 0xff]
        );
    }

    #[test]
    fn trimming() {
        assert_eq!(non_empty_trimmed(Some("  Fall 2024 ")), Some("Fall 2024".into()));
        assert_eq!(non_empty_trimmed(Some("   ")), None);
        assert_eq!(non_empty_trimmed(None), None);
    }
}
