//! Identifier rules for bins and filenames.

use super::storage_service::{StorageError, StorageResult};
use uuid::Uuid;

const BIN_ID_MIN_LEN: usize = 8;
const GENERATED_ID_LEN: usize = 16;

/// Validate a bin id: at least 8 characters of `[a-zA-Z0-9_-]`.
///
/// Keeps every bin a plain directory name directly under the root.
pub fn ensure_bin_id_valid(bin: &str) -> StorageResult<()> {
    if bin.len() < BIN_ID_MIN_LEN {
        return Err(StorageError::InvalidBin {
            bin: bin.to_string(),
            reason: format!("must be at least {} characters", BIN_ID_MIN_LEN),
        });
    }

    if !bin
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StorageError::InvalidBin {
            bin: bin.to_string(),
            reason: "allowed characters are letters, digits, hyphens and underscores".into(),
        });
    }

    Ok(())
}

/// Reduce a client-supplied filename to a safe, flat name.
///
/// - keeps only the final path component
/// - trims surrounding spaces
/// - replaces anything outside `[A-Za-z0-9-_=,. ]` with `_`
/// - replaces leading dots, so no object shadows `.cache` or staging files
///
/// May return an empty string; uploads substitute a generated name.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim_matches(' ');

    let mut sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '=' | ',' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let leading_dots = sanitized.chars().take_while(|c| *c == '.').count();
    if leading_dots > 0 {
        sanitized.replace_range(..leading_dots, &"_".repeat(leading_dots));
    }

    sanitized
}

/// Accept only names an upload could have produced.
///
/// Lookups and deletes use this instead of sanitising, so a request for
/// `.cache` or `../x` fails instead of being quietly rewritten.
pub fn ensure_filename_valid(filename: &str) -> StorageResult<()> {
    if filename.is_empty() || sanitize_filename(filename) != filename {
        return Err(StorageError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

/// Generate a random id usable both as a bin id and as a filename.
pub fn generate_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(GENERATED_ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_ids() {
        assert!(ensure_bin_id_valid("testbin1").is_ok());
        assert!(ensure_bin_id_valid("my-bin_2024").is_ok());
        assert!(matches!(
            ensure_bin_id_valid("short"),
            Err(StorageError::InvalidBin { .. })
        ));
        assert!(ensure_bin_id_valid("../../etc").is_err());
        assert!(ensure_bin_id_valid("has space").is_err());
        assert!(ensure_bin_id_valid(".cachebin").is_err());
    }

    #[test]
    fn filenames_are_flattened_and_cleaned() {
        assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\doc.pdf"), "doc.pdf");
        assert_eq!(sanitize_filename("  spaced name.txt "), "spaced name.txt");
        assert_eq!(sanitize_filename("weird<>|name?.txt"), "weird___name_.txt");
        assert_eq!(sanitize_filename("a=1,b=2.csv"), "a=1,b=2.csv");
    }

    #[test]
    fn hidden_names_are_never_kept() {
        assert_eq!(sanitize_filename(".cache"), "_cache");
        assert_eq!(sanitize_filename(".."), "__");
        assert_eq!(sanitize_filename("..hidden"), "__hidden");
        assert_eq!(sanitize_filename("/"), "");
    }

    #[test]
    fn lookups_reject_unsanitised_names() {
        assert!(ensure_filename_valid("photo.jpg").is_ok());
        assert!(matches!(
            ensure_filename_valid(".cache"),
            Err(StorageError::InvalidFilename(_))
        ));
        assert!(ensure_filename_valid("").is_err());
        assert!(ensure_filename_valid("a/b").is_err());
    }

    #[test]
    fn generated_ids_are_valid_bin_ids() {
        let id = generate_id();
        assert_eq!(id.len(), 16);
        assert!(ensure_bin_id_valid(&id).is_ok());
        assert_eq!(sanitize_filename(&id), id);
        assert_ne!(generate_id(), id);
    }
}
