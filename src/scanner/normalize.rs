use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{info, warn};

use crate::scanner::Lstater;

/// The canonical normalization form of a relative path. Mac OS file names
/// are NFD normalized; every other platform gets NFC.
#[cfg(target_os = "macos")]
pub fn canonical_form(rel_path: &str) -> Cow<'_, str> {
    use unicode_normalization::{is_nfd, UnicodeNormalization};
    if is_nfd(rel_path) {
        Cow::Borrowed(rel_path)
    } else {
        Cow::Owned(rel_path.nfd().collect())
    }
}

#[cfg(not(target_os = "macos"))]
pub fn canonical_form(rel_path: &str) -> Cow<'_, str> {
    use unicode_normalization::{is_nfc, UnicodeNormalization};
    if is_nfc(rel_path) {
        Cow::Borrowed(rel_path)
    } else {
        Cow::Owned(rel_path.nfc().collect())
    }
}

/// Return the normalized relative path, possibly after renaming the entry on
/// disk, or `None` when the entry should be skipped.
///
/// With `auto_normalize` unset a mis-normalized name is only reported. With
/// it set the entry is renamed to the canonical form when nothing else
/// occupies that name; an occupied name or a failed rename is a conflict and
/// the entry is skipped, leaving the disk untouched.
pub fn normalize_path(
    dir: &Path,
    abs_path: &Path,
    rel_path: &str,
    auto_normalize: bool,
    lstater: &dyn Lstater,
) -> Option<String> {
    let norm_path = canonical_form(rel_path);
    if norm_path == rel_path {
        return Some(norm_path.into_owned());
    }

    if !auto_normalize {
        warn!(
            rel_path,
            "file name is not in the canonical UTF-8 normalization form; skipping"
        );
        return None;
    }

    let normalized_abs = dir.join(norm_path.as_ref());
    match lstater.lstat(&normalized_abs) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            // Nothing occupies the normalized name, so take it.
            if let Err(err) = fs::rename(abs_path, &normalized_abs) {
                info!(rel_path, error = %err, "error normalizing UTF-8 encoding of file name");
                return None;
            }
            info!(rel_path, "normalized UTF-8 encoding of file name");
            Some(norm_path.into_owned())
        }
        _ => {
            info!(
                rel_path,
                "file name has a UTF-8 encoding conflict with another entry; ignoring"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn ascii_is_already_canonical() {
        assert!(matches!(canonical_form("plain/name.txt"), Cow::Borrowed(_)));
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn decomposed_names_compose() {
        // "e" followed by a combining acute accent composes to a single char.
        let decomposed = "caf\u{0065}\u{0301}";
        let canonical = canonical_form(decomposed);
        assert_eq!(canonical.as_ref(), "caf\u{00e9}");
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn composed_names_decompose() {
        let composed = "caf\u{00e9}";
        let canonical = canonical_form(composed);
        assert_eq!(canonical.as_ref(), "caf\u{0065}\u{0301}");
    }
}
