//! Registry-safe tag slugs.

use crate::util::hash::hash_bytes;

/// Maximum length of a docker tag.
pub const MAX_TAG_LEN: usize = 128;

const HASH_LEN: usize = 8;

/// `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
pub fn is_valid_docker_tag(value: &str) -> bool {
  let mut chars = value.chars();
  let Some(first) = chars.next() else {
    return false;
  };
  value.len() <= MAX_TAG_LEN
    && (first.is_ascii_alphanumeric() || first == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Turn an arbitrary string into a valid docker tag.
///
/// Valid tags are returned unchanged. Anything else is lower-cased, runs of
/// invalid characters become a single `-`, and the first 8 hex characters of
/// the SHA-256 of the raw value are appended, so two different raw values
/// rewrite to different slugs.
pub fn docker_tag(raw: &str) -> String {
  if is_valid_docker_tag(raw) {
    return raw.to_string();
  }

  let mut base = String::with_capacity(raw.len());
  for c in raw.to_lowercase().chars() {
    if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
      base.push(c);
    } else if !base.ends_with('-') {
      base.push('-');
    }
  }

  let hash = hash_bytes(raw.as_bytes());
  let suffix = &hash.0[..HASH_LEN];

  let trim = |s: &str| s.trim_matches(|c| c == '-' || c == '.').to_string();
  let mut base = trim(&base);
  // ASCII only at this point, so byte truncation is char-safe.
  base.truncate(MAX_TAG_LEN - HASH_LEN - 1);
  let base = trim(&base);

  if base.is_empty() {
    suffix.to_string()
  } else {
    format!("{}-{}", base, suffix)
  }
}
